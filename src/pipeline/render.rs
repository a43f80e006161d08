//! Rendered backend: load the page in a pooled browser context and capture
//! the live DOM.
//!
//! ## Bounded at every step
//!
//! | Step | Bound | Failure |
//! |------|-------|---------|
//! | lease a context | `pool_acquire_timeout` | `PoolExhausted` |
//! | navigate | `navigation_timeout` | `NavigationTimeout` |
//! | main document status | 2xx | `UpstreamHttp` |
//! | wait for selector | `selector_timeout` | `SelectorNotFound` |
//! | extra wait | [`MAX_WAIT_MS`](crate::config::MAX_WAIT_MS) | (clamped) |
//! | capture DOM | `max_body_bytes` | `SizeLimitExceeded` |
//!
//! The handle is released on every path. A render that failed marks its
//! context failed so the pool destroys it rather than reusing a tab in an
//! unknown state. If the whole future is dropped, the handle's `Drop`
//! destroys the context.
//!
//! ## Guarding the browser
//!
//! The guard is handed to the context as its [`RequestGate`], so each
//! request the tab makes (redirect hops and subresources included) is
//! checked before it leaves the browser. Pages can still move themselves
//! with script after loading; the URL the tab ends up on goes through the
//! guard again before its DOM is accepted.

use super::guard::{UrlGuard, ValidatedUrl};
use crate::browser::pool::{BrowserHandle, BrowserPool};
use crate::browser::RequestGate;
use crate::config::ScrapeConfig;
use crate::error::Web2MdError;
use crate::output::FetchResult;
use crate::request::FetchOptions;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

/// Browser-rendering fetcher. Stateless between calls apart from the pool.
#[derive(Clone)]
pub struct RenderedFetcher {
    config: Arc<ScrapeConfig>,
    guard: UrlGuard,
    pool: BrowserPool,
}

impl RenderedFetcher {
    pub fn new(config: Arc<ScrapeConfig>, guard: UrlGuard, pool: BrowserPool) -> Self {
        Self { config, guard, pool }
    }

    pub fn pool(&self) -> &BrowserPool {
        &self.pool
    }

    pub async fn fetch(&self, target: &ValidatedUrl, opts: &FetchOptions) -> Result<FetchResult, Web2MdError> {
        let start = Instant::now();
        let mut handle = self.pool.acquire(self.config.pool_acquire_timeout).await?;
        debug!(url = %target.url, waited_ms = start.elapsed().as_millis() as u64, "browser context leased");

        let result = self.render(&mut handle, target, opts).await;
        if result.is_err() {
            handle.mark_failed();
        }
        handle.release().await;

        let (html, final_url, status) = result?;
        info!(
            url = %final_url,
            status,
            bytes = html.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "rendered fetch complete"
        );
        Ok(FetchResult {
            final_url,
            status,
            content_type: Some("text/html".to_string()),
            body: html.into_bytes(),
            elapsed: start.elapsed(),
        })
    }

    async fn render(
        &self,
        handle: &mut BrowserHandle,
        target: &ValidatedUrl,
        opts: &FetchOptions,
    ) -> Result<(String, Url, u16), Web2MdError> {
        // ── Step 1: Navigate ────────────────────────────────────────────
        let nav_start = Instant::now();
        let gate: Arc<dyn RequestGate> = Arc::new(self.guard.clone());
        let nav = handle.context()?.navigate(&target.url, gate);
        let navigation = match tokio::time::timeout(self.config.navigation_timeout, nav).await {
            Err(_) => {
                return Err(Web2MdError::NavigationTimeout {
                    url: target.url.to_string(),
                    elapsed_ms: nav_start.elapsed().as_millis() as u64,
                })
            }
            Ok(res) => res?,
        };
        let status = navigation.status.unwrap_or(200);
        if !(200..300).contains(&status) {
            return Err(Web2MdError::UpstreamHttp {
                url: target.url.to_string(),
                status: Some(status),
                detail: format!("rendered page returned HTTP {status}"),
            });
        }

        // ── Step 2: Wait for selector ───────────────────────────────────
        if let Some(selector) = opts.wait_for_selector.as_deref() {
            self.wait_for_selector(handle, selector).await?;
        }

        // ── Step 3: Extra wait ──────────────────────────────────────────
        if !opts.wait().is_zero() {
            tokio::time::sleep(opts.wait()).await;
        }

        // ── Step 4: Capture ─────────────────────────────────────────────
        let html = handle.context()?.content().await?;
        if html.len() > self.config.max_body_bytes {
            return Err(Web2MdError::SizeLimitExceeded {
                url: target.url.to_string(),
                limit: self.config.max_body_bytes,
            });
        }

        // ── Step 5: Re-check where the tab ended up ─────────────────────
        let landed = handle
            .context()?
            .current_url()
            .await?
            .and_then(|u| Url::parse(&u).ok())
            .filter(|u| u.scheme() != "about");
        let final_url = match landed {
            Some(url) if url != target.url => {
                debug!(from = %target.url, to = %url, "page navigated away, re-validating");
                self.guard.validate_url(url).await?.url
            }
            _ => target.url.clone(),
        };

        Ok((html, final_url, status))
    }

    /// Poll for `selector` until it appears or `selector_timeout` elapses.
    async fn wait_for_selector(&self, handle: &mut BrowserHandle, selector: &str) -> Result<(), Web2MdError> {
        let start = Instant::now();
        let interval = self.config.selector_poll_interval;
        let poll = async {
            loop {
                if handle.context()?.has_selector(selector).await? {
                    return Ok::<(), Web2MdError>(());
                }
                tokio::time::sleep(interval).await;
            }
        };
        match tokio::time::timeout(self.config.selector_timeout, poll).await {
            Ok(res) => {
                res?;
                debug!(selector, waited_ms = start.elapsed().as_millis() as u64, "selector appeared");
                Ok(())
            }
            Err(_) => Err(Web2MdError::SelectorNotFound {
                selector: selector.to_string(),
                elapsed_ms: start.elapsed().as_millis() as u64,
            }),
        }
    }
}
