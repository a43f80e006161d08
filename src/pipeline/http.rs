//! Static backend: plain HTTP GET with guarded redirects and a streamed
//! size cap.
//!
//! ## Why follow redirects by hand?
//!
//! A public URL can answer `302 Location: http://10.0.0.1/admin`. reqwest's
//! built-in redirect policy would follow it before we could look. Here the
//! client never follows redirects (`Policy::none()`); each `Location` is
//! resolved against the current URL, passed through the
//! [`UrlGuard`](super::guard::UrlGuard), and only then requested.
//!
//! ## Why one client per hop?
//!
//! Each client is pinned with `resolve_to_addrs` to the exact addresses the
//! guard approved for that hop, so a second DNS answer at connect time
//! cannot redirect the socket elsewhere.

use super::guard::{UrlGuard, ValidatedUrl};
use crate::config::ScrapeConfig;
use crate::error::Web2MdError;
use crate::output::FetchResult;
use futures::StreamExt;
use reqwest::header::{ACCEPT, CONTENT_LENGTH, CONTENT_TYPE, LOCATION};
use reqwest::redirect::Policy;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info};
use url::Url;

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml;q=0.9,*/*;q=0.5";

/// Plain HTTP fetcher. Stateless between calls.
#[derive(Clone)]
pub struct HttpFetcher {
    config: Arc<ScrapeConfig>,
    guard: UrlGuard,
}

impl HttpFetcher {
    pub fn new(config: Arc<ScrapeConfig>, guard: UrlGuard) -> Self {
        Self { config, guard }
    }

    /// GET `target`, following at most `max_redirects` guarded redirects.
    pub async fn fetch(&self, target: &ValidatedUrl) -> Result<FetchResult, Web2MdError> {
        let start = Instant::now();
        let origin = target.url.to_string();
        let mut current = target.clone();

        for hop in 0..=self.config.max_redirects {
            let client = self.client_for(&current)?;
            let response = self.send(&client, &current.url).await?;
            let status = response.status();

            if status.is_redirection() {
                let Some(location) = response.headers().get(LOCATION) else {
                    return Err(Web2MdError::UpstreamHttp {
                        url: current.url.to_string(),
                        status: Some(status.as_u16()),
                        detail: "redirect without Location header".into(),
                    });
                };
                if hop == self.config.max_redirects {
                    return Err(Web2MdError::TooManyRedirects {
                        url: origin,
                        limit: self.config.max_redirects,
                    });
                }
                let next = redirect_target(&current.url, location.to_str().unwrap_or_default())?;
                debug!(from = %current.url, to = %next, hop = hop + 1, "following redirect");
                current = self.guard.validate_url(next).await?;
                continue;
            }

            if !status.is_success() {
                return Err(Web2MdError::UpstreamHttp {
                    url: current.url.to_string(),
                    status: Some(status.as_u16()),
                    detail: status
                        .canonical_reason()
                        .unwrap_or("unexpected status")
                        .to_string(),
                });
            }

            let content_type = response
                .headers()
                .get(CONTENT_TYPE)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let body = self.read_body(response, &current.url).await?;

            info!(
                url = %current.url,
                status = status.as_u16(),
                bytes = body.len(),
                redirects = hop,
                "static fetch complete"
            );

            return Ok(FetchResult {
                final_url: current.url,
                status: status.as_u16(),
                content_type,
                body,
                elapsed: start.elapsed(),
            });
        }

        // The loop returns on every path; reaching here means max_redirects
        // overflowed the range.
        Err(Web2MdError::Internal("redirect loop exited without a result".into()))
    }

    fn client_for(&self, target: &ValidatedUrl) -> Result<reqwest::Client, Web2MdError> {
        let mut builder = reqwest::Client::builder()
            .redirect(Policy::none())
            .no_proxy()
            .connect_timeout(self.config.connect_timeout)
            .user_agent(self.config.user_agent.as_str());
        if let Some(domain) = target.domain() {
            builder = builder.resolve_to_addrs(domain, &target.addrs);
        }
        builder
            .build()
            .map_err(|e| Web2MdError::Internal(format!("HTTP client build failed: {e}")))
    }

    async fn send(&self, client: &reqwest::Client, url: &Url) -> Result<reqwest::Response, Web2MdError> {
        let start = Instant::now();
        let request = client.get(url.clone()).header(ACCEPT, ACCEPT_HTML).send();
        match tokio::time::timeout(self.config.read_timeout, request).await {
            Err(_) => Err(Web2MdError::ReadTimeout {
                url: url.to_string(),
                elapsed_ms: millis(start.elapsed()),
            }),
            Ok(Err(e)) => Err(map_reqwest_error(url, e, start.elapsed())),
            Ok(Ok(resp)) => Ok(resp),
        }
    }

    /// Stream the body, aborting the moment the running total would cross
    /// `max_body_bytes`.
    async fn read_body(&self, response: reqwest::Response, url: &Url) -> Result<Vec<u8>, Web2MdError> {
        let limit = self.config.max_body_bytes;
        let too_large = || Web2MdError::SizeLimitExceeded {
            url: url.to_string(),
            limit,
        };

        let declared = response
            .headers()
            .get(CONTENT_LENGTH)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok());
        if declared.is_some_and(|len| len > limit as u64) {
            debug!(url = %url, declared = ?declared, "rejecting body by Content-Length");
            return Err(too_large());
        }

        let start = Instant::now();
        let mut body: Vec<u8> = Vec::with_capacity(declared.unwrap_or(0).min(limit as u64) as usize);
        let mut stream = response.bytes_stream();
        loop {
            let next = tokio::time::timeout(self.config.read_timeout, stream.next())
                .await
                .map_err(|_| Web2MdError::ReadTimeout {
                    url: url.to_string(),
                    elapsed_ms: millis(start.elapsed()),
                })?;
            match next {
                None => break,
                Some(Err(e)) => return Err(map_reqwest_error(url, e, start.elapsed())),
                Some(Ok(chunk)) => {
                    if body.len() + chunk.len() > limit {
                        debug!(url = %url, received = body.len() + chunk.len(), limit, "body over cap");
                        return Err(too_large());
                    }
                    body.extend_from_slice(&chunk);
                }
            }
        }
        Ok(body)
    }
}

/// Resolve a `Location` header value against the URL that returned it.
fn redirect_target(current: &Url, location: &str) -> Result<Url, Web2MdError> {
    if location.trim().is_empty() {
        return Err(Web2MdError::UpstreamHttp {
            url: current.to_string(),
            status: None,
            detail: "redirect with an empty or non-ASCII Location header".into(),
        });
    }
    current.join(location.trim()).map_err(|e| Web2MdError::InvalidUrl {
        url: location.to_string(),
        reason: format!("bad redirect target: {e}"),
    })
}

fn map_reqwest_error(url: &Url, e: reqwest::Error, elapsed: Duration) -> Web2MdError {
    let elapsed_ms = millis(elapsed);
    if e.is_connect() && e.is_timeout() {
        Web2MdError::ConnectTimeout {
            url: url.to_string(),
            elapsed_ms,
        }
    } else if e.is_timeout() {
        Web2MdError::ReadTimeout {
            url: url.to_string(),
            elapsed_ms,
        }
    } else {
        Web2MdError::UpstreamHttp {
            url: url.to_string(),
            status: e.status().map(|s| s.as_u16()),
            detail: e.to_string(),
        }
    }
}

fn millis(d: Duration) -> u64 {
    d.as_millis() as u64
}
