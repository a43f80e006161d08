//! Configuration types for web-to-Markdown scraping.
//!
//! All scraping behaviour is controlled through [`ScrapeConfig`], built via
//! its [`ScrapeConfigBuilder`]. One struct carries every limit the pipeline
//! enforces (body size, redirect count, each timeout layer, pool size and
//! quotas) so a deployment can be audited by printing a single value.
//!
//! # Timeout layering
//! Timeouts nest: `connect_timeout < read_timeout < request_timeout`, and
//! `navigation_timeout < request_timeout`. Under normal conditions the
//! innermost timeout fires first and reports the most specific error.
//! [`ScrapeConfigBuilder::build`] rejects configurations that break the
//! ordering.

use crate::error::Web2MdError;
use crate::progress::ScrapeObserver;
use crate::ratelimit::DEFAULT_CRAWL_QUOTA;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on the extra post-render wait, whatever the caller asks for.
pub const MAX_WAIT_MS: u64 = 10_000;

/// Default body size cap: 10 MiB.
pub const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Configuration for a [`crate::Scraper`].
///
/// Built via [`ScrapeConfig::builder()`] or using [`ScrapeConfig::default()`].
///
/// # Example
/// ```rust
/// use edgequake_web2md::ScrapeConfig;
/// use std::time::Duration;
///
/// let config = ScrapeConfig::builder()
///     .max_body_bytes(2 * 1024 * 1024)
///     .pool_size(4)
///     .request_timeout(Duration::from_secs(45))
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct ScrapeConfig {
    /// Maximum response body size in bytes. Default: 10 MiB.
    ///
    /// Enforced while streaming: the download aborts with
    /// [`Web2MdError::SizeLimitExceeded`] as soon as the running total
    /// crosses the cap. The same cap applies to the serialised DOM captured
    /// from the browser.
    pub max_body_bytes: usize,

    /// Maximum number of redirects followed by the static backend. Default: 5.
    pub max_redirects: usize,

    /// TCP + TLS connect timeout per hop. Default: 5 s.
    pub connect_timeout: Duration,

    /// Read timeout: maximum silence while waiting for headers or the next
    /// body chunk. Default: 10 s.
    pub read_timeout: Duration,

    /// Timeout on DNS resolution in the URL guard. Default: 3 s.
    pub dns_timeout: Duration,

    /// Browser navigation timeout. Default: 15 s.
    pub navigation_timeout: Duration,

    /// Upper bound on waiting for a caller's `wait_for_selector`. Default: 10 s.
    pub selector_timeout: Duration,

    /// Interval between selector checks. Default: 100 ms.
    pub selector_poll_interval: Duration,

    /// Overall per-request deadline covering every stage. Default: 30 s.
    pub request_timeout: Duration,

    /// Number of concurrently live rendering contexts. Default: 2.
    ///
    /// Each headless context costs tens to hundreds of MB of RAM. The pool
    /// never exceeds this number, however many requests are in flight.
    pub pool_size: usize,

    /// How long a rendered request waits for a free context. Default: 5 s.
    pub pool_acquire_timeout: Duration,

    /// Reset and reuse contexts after a successful render instead of
    /// destroying them. Default: true.
    ///
    /// Failed contexts are always destroyed.
    pub reuse_contexts: bool,

    /// Static-route requests allowed per client per window. Default: 10.
    pub static_quota: u32,

    /// Rendered-route requests allowed per client per window. Default: 5.
    pub rendered_quota: u32,

    /// Crawls allowed per client per window. Default: 5.
    ///
    /// A crawl is charged once however many pages it visits; its pages are
    /// bounded by [`crate::crawl::MAX_PAGES_HARD_LIMIT`] instead.
    pub crawl_quota: u32,

    /// Rate-limit window length. Default: 60 s.
    pub rate_window: Duration,

    /// Accounting strategy for the rate limiter. Default: fixed window.
    pub rate_limit_strategy: RateLimitStrategy,

    /// Minimum score a subtree needs to be picked as main content. Default: 10.0.
    ///
    /// Below this threshold the whole cleaned body is converted instead.
    pub min_content_score: f64,

    /// `User-Agent` header sent by the static backend.
    pub user_agent: String,

    /// Addresses exempt from the reserved-range check.
    ///
    /// Only exact matches are trusted. Intended for local testing and for
    /// private deployments that must reach one known internal host.
    pub trusted_addrs: Vec<IpAddr>,

    /// Structured event sink. Default: none.
    pub observer: Option<Arc<dyn ScrapeObserver>>,
}

impl Default for ScrapeConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: DEFAULT_MAX_BODY_BYTES,
            max_redirects: 5,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(10),
            dns_timeout: Duration::from_secs(3),
            navigation_timeout: Duration::from_secs(15),
            selector_timeout: Duration::from_secs(10),
            selector_poll_interval: Duration::from_millis(100),
            request_timeout: Duration::from_secs(30),
            pool_size: 2,
            pool_acquire_timeout: Duration::from_secs(5),
            reuse_contexts: true,
            static_quota: 10,
            rendered_quota: 5,
            crawl_quota: DEFAULT_CRAWL_QUOTA,
            rate_window: Duration::from_secs(60),
            rate_limit_strategy: RateLimitStrategy::default(),
            min_content_score: 10.0,
            user_agent: format!("edgequake-web2md/{}", env!("CARGO_PKG_VERSION")),
            trusted_addrs: Vec::new(),
            observer: None,
        }
    }
}

impl fmt::Debug for ScrapeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScrapeConfig")
            .field("max_body_bytes", &self.max_body_bytes)
            .field("max_redirects", &self.max_redirects)
            .field("connect_timeout", &self.connect_timeout)
            .field("read_timeout", &self.read_timeout)
            .field("navigation_timeout", &self.navigation_timeout)
            .field("selector_timeout", &self.selector_timeout)
            .field("request_timeout", &self.request_timeout)
            .field("pool_size", &self.pool_size)
            .field("pool_acquire_timeout", &self.pool_acquire_timeout)
            .field("static_quota", &self.static_quota)
            .field("rendered_quota", &self.rendered_quota)
            .field("crawl_quota", &self.crawl_quota)
            .field("rate_window", &self.rate_window)
            .field("rate_limit_strategy", &self.rate_limit_strategy)
            .field("trusted_addrs", &self.trusted_addrs)
            .field("observer", &self.observer.as_ref().map(|_| "<dyn ScrapeObserver>"))
            .finish()
    }
}

impl ScrapeConfig {
    /// Create a new builder for `ScrapeConfig`.
    pub fn builder() -> ScrapeConfigBuilder {
        ScrapeConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`ScrapeConfig`].
#[derive(Debug)]
pub struct ScrapeConfigBuilder {
    config: ScrapeConfig,
}

impl ScrapeConfigBuilder {
    pub fn max_body_bytes(mut self, bytes: usize) -> Self {
        self.config.max_body_bytes = bytes.max(1024);
        self
    }

    pub fn max_redirects(mut self, n: usize) -> Self {
        self.config.max_redirects = n.min(20);
        self
    }

    pub fn connect_timeout(mut self, d: Duration) -> Self {
        self.config.connect_timeout = d;
        self
    }

    pub fn read_timeout(mut self, d: Duration) -> Self {
        self.config.read_timeout = d;
        self
    }

    pub fn dns_timeout(mut self, d: Duration) -> Self {
        self.config.dns_timeout = d;
        self
    }

    pub fn navigation_timeout(mut self, d: Duration) -> Self {
        self.config.navigation_timeout = d;
        self
    }

    pub fn selector_timeout(mut self, d: Duration) -> Self {
        self.config.selector_timeout = d;
        self
    }

    pub fn selector_poll_interval(mut self, d: Duration) -> Self {
        self.config.selector_poll_interval = d.max(Duration::from_millis(10));
        self
    }

    pub fn request_timeout(mut self, d: Duration) -> Self {
        self.config.request_timeout = d;
        self
    }

    pub fn pool_size(mut self, n: usize) -> Self {
        self.config.pool_size = n.max(1);
        self
    }

    pub fn pool_acquire_timeout(mut self, d: Duration) -> Self {
        self.config.pool_acquire_timeout = d;
        self
    }

    pub fn reuse_contexts(mut self, v: bool) -> Self {
        self.config.reuse_contexts = v;
        self
    }

    pub fn static_quota(mut self, n: u32) -> Self {
        self.config.static_quota = n;
        self
    }

    pub fn rendered_quota(mut self, n: u32) -> Self {
        self.config.rendered_quota = n;
        self
    }

    pub fn crawl_quota(mut self, n: u32) -> Self {
        self.config.crawl_quota = n;
        self
    }

    pub fn rate_window(mut self, d: Duration) -> Self {
        self.config.rate_window = d;
        self
    }

    pub fn rate_limit_strategy(mut self, strategy: RateLimitStrategy) -> Self {
        self.config.rate_limit_strategy = strategy;
        self
    }

    pub fn min_content_score(mut self, score: f64) -> Self {
        self.config.min_content_score = score.max(0.0);
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.user_agent = ua.into();
        self
    }

    pub fn trust_addr(mut self, addr: IpAddr) -> Self {
        if !self.config.trusted_addrs.contains(&addr) {
            self.config.trusted_addrs.push(addr);
        }
        self
    }

    pub fn observer(mut self, observer: Arc<dyn ScrapeObserver>) -> Self {
        self.config.observer = Some(observer);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<ScrapeConfig, Web2MdError> {
        let c = &self.config;
        if c.connect_timeout.is_zero() {
            return Err(Web2MdError::InvalidConfig(
                "connect_timeout must be greater than zero".into(),
            ));
        }
        if c.connect_timeout >= c.read_timeout {
            return Err(Web2MdError::InvalidConfig(format!(
                "connect_timeout ({:?}) must be shorter than read_timeout ({:?})",
                c.connect_timeout, c.read_timeout
            )));
        }
        if c.read_timeout >= c.request_timeout {
            return Err(Web2MdError::InvalidConfig(format!(
                "read_timeout ({:?}) must be shorter than request_timeout ({:?})",
                c.read_timeout, c.request_timeout
            )));
        }
        if c.navigation_timeout.is_zero() || c.navigation_timeout >= c.request_timeout {
            return Err(Web2MdError::InvalidConfig(format!(
                "navigation_timeout ({:?}) must be non-zero and shorter than request_timeout ({:?})",
                c.navigation_timeout, c.request_timeout
            )));
        }
        if c.static_quota == 0 || c.rendered_quota == 0 || c.crawl_quota == 0 {
            return Err(Web2MdError::InvalidConfig(
                "Rate-limit quotas must be ≥ 1".into(),
            ));
        }
        if c.rate_window.is_zero() {
            return Err(Web2MdError::InvalidConfig(
                "rate_window must be greater than zero".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// Rate-limit accounting strategy.
///
/// | Strategy | Behaviour |
/// |----------|-----------|
/// | `FixedWindow` | N requests per aligned window, counter reset at expiry (default) |
/// | `TokenBucket` | N-token burst refilled continuously over the window |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    #[default]
    FixedWindow,
    TokenBucket,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_layered() {
        let c = ScrapeConfig::default();
        assert!(c.connect_timeout < c.read_timeout);
        assert!(c.read_timeout < c.request_timeout);
        assert!(c.navigation_timeout < c.request_timeout);
        assert_eq!(c.max_redirects, 5);
        assert_eq!(c.max_body_bytes, 10 * 1024 * 1024);
        assert!(c.rendered_quota < c.static_quota);
        ScrapeConfig::builder().build().expect("defaults must validate");
    }

    #[test]
    fn rejects_inverted_timeouts() {
        let err = ScrapeConfig::builder()
            .connect_timeout(Duration::from_secs(20))
            .read_timeout(Duration::from_secs(10))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("connect_timeout"), "got: {err}");

        let err = ScrapeConfig::builder()
            .navigation_timeout(Duration::from_secs(60))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("navigation_timeout"), "got: {err}");
    }

    #[test]
    fn setters_clamp() {
        let c = ScrapeConfig::builder()
            .pool_size(0)
            .max_body_bytes(1)
            .max_redirects(500)
            .build()
            .unwrap();
        assert_eq!(c.pool_size, 1);
        assert_eq!(c.max_body_bytes, 1024);
        assert_eq!(c.max_redirects, 20);
    }

    #[test]
    fn trust_addr_deduplicates() {
        let ip: IpAddr = "127.0.0.1".parse().unwrap();
        let c = ScrapeConfig::builder()
            .trust_addr(ip)
            .trust_addr(ip)
            .build()
            .unwrap();
        assert_eq!(c.trusted_addrs, vec![ip]);
    }

    #[test]
    fn zero_quota_is_invalid() {
        assert!(ScrapeConfig::builder().rendered_quota(0).build().is_err());
        assert!(ScrapeConfig::builder().crawl_quota(0).build().is_err());
    }
}
