//! Error types for the edgequake-web2md library.
//!
//! Every stage of the scrape pipeline fails with a [`Web2MdError`]. The first
//! error short-circuits the request: later stages never run, and no partial
//! [`crate::output::ScrapeResponse`] is produced.
//!
//! The variants fall into three groups that callers usually treat
//! differently:
//!
//! * **User errors** (invalid URL, SSRF target, oversized body, rate limit):
//!   the request itself is unacceptable. Retrying will not help.
//! * **Upstream errors** (timeouts, HTTP status, navigation, missing
//!   selector): the target misbehaved. The library never retries; retry
//!   policy belongs to the caller.
//! * **Internal errors**: unexpected faults. Their detail is logged but
//!   [`Web2MdError::public_message`] hides it from end users.

use crate::ratelimit::Route;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// All errors returned by the edgequake-web2md library.
#[derive(Debug, Error)]
pub enum Web2MdError {
    // ── Validation errors ─────────────────────────────────────────────────
    /// The URL could not be parsed, uses a scheme other than http(s),
    /// embeds credentials, or its host does not resolve.
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    /// The URL (or one of its redirect targets) resolves to a loopback,
    /// private, link-local, multicast or otherwise reserved address.
    #[error("Blocked request to '{url}': {reason}")]
    SsrfBlocked { url: String, reason: String },

    /// The redirect chain is longer than the configured cap.
    #[error("Too many redirects starting at '{url}' (limit {limit})")]
    TooManyRedirects { url: String, limit: usize },

    /// The response body crossed the configured size cap mid-stream.
    #[error("Response from '{url}' exceeds the {limit} byte limit")]
    SizeLimitExceeded { url: String, limit: usize },

    // ── Network errors ────────────────────────────────────────────────────
    /// TCP/TLS connection could not be established in time.
    #[error("Connecting to '{url}' timed out after {elapsed_ms}ms")]
    ConnectTimeout { url: String, elapsed_ms: u64 },

    /// The upstream stopped sending data for longer than the read timeout.
    #[error("Reading from '{url}' timed out after {elapsed_ms}ms")]
    ReadTimeout { url: String, elapsed_ms: u64 },

    /// Non-success HTTP status, or a transport failure with no status.
    #[error("Upstream error for '{url}'{}: {detail}", status_suffix(.status))]
    UpstreamHttp {
        url: String,
        status: Option<u16>,
        detail: String,
    },

    // ── Browser errors ────────────────────────────────────────────────────
    /// Browser navigation did not finish within the navigation timeout.
    #[error("Navigation to '{url}' timed out after {elapsed_ms}ms")]
    NavigationTimeout { url: String, elapsed_ms: u64 },

    /// The wait-for selector never appeared within the selector timeout.
    #[error("Selector '{selector}' did not appear within {elapsed_ms}ms")]
    SelectorNotFound { selector: String, elapsed_ms: u64 },

    /// No rendering context became free within the acquire timeout.
    #[error("No browser context available after waiting {waited_ms}ms (pool size {pool_size})")]
    PoolExhausted { pool_size: usize, waited_ms: u64 },

    // ── Admission errors ──────────────────────────────────────────────────
    /// The client has used its quota for this route in the current window.
    #[error("Rate limit exceeded for the {route} route; retry in {retry_after_secs}s")]
    RateLimited { route: Route, retry_after_secs: u64 },

    /// The overall per-request deadline elapsed.
    #[error("Request for '{url}' exceeded its {elapsed_ms}ms deadline")]
    DeadlineExceeded { url: String, elapsed_ms: u64 },

    // ── Extraction errors ─────────────────────────────────────────────────
    /// No subtree scored above the main-content threshold.
    ///
    /// The orchestrator recovers from this by converting the whole body, so
    /// it only escapes when extraction is invoked directly.
    #[error("No content region scored above {threshold}")]
    ExtractionEmpty { threshold: f64 },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (HTTP {s})")).unwrap_or_default()
}

/// Payload-free discriminant of [`Web2MdError`], for logs and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidUrl,
    SsrfBlocked,
    TooManyRedirects,
    SizeLimitExceeded,
    ConnectTimeout,
    ReadTimeout,
    UpstreamHttp,
    NavigationTimeout,
    SelectorNotFound,
    PoolExhausted,
    RateLimited,
    DeadlineExceeded,
    ExtractionEmpty,
    InvalidConfig,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidUrl => "invalid_url",
            ErrorKind::SsrfBlocked => "ssrf_blocked",
            ErrorKind::TooManyRedirects => "too_many_redirects",
            ErrorKind::SizeLimitExceeded => "size_limit_exceeded",
            ErrorKind::ConnectTimeout => "connect_timeout",
            ErrorKind::ReadTimeout => "read_timeout",
            ErrorKind::UpstreamHttp => "upstream_http",
            ErrorKind::NavigationTimeout => "navigation_timeout",
            ErrorKind::SelectorNotFound => "selector_not_found",
            ErrorKind::PoolExhausted => "pool_exhausted",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::ExtractionEmpty => "extraction_empty",
            ErrorKind::InvalidConfig => "invalid_config",
            ErrorKind::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Web2MdError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Web2MdError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            Web2MdError::SsrfBlocked { .. } => ErrorKind::SsrfBlocked,
            Web2MdError::TooManyRedirects { .. } => ErrorKind::TooManyRedirects,
            Web2MdError::SizeLimitExceeded { .. } => ErrorKind::SizeLimitExceeded,
            Web2MdError::ConnectTimeout { .. } => ErrorKind::ConnectTimeout,
            Web2MdError::ReadTimeout { .. } => ErrorKind::ReadTimeout,
            Web2MdError::UpstreamHttp { .. } => ErrorKind::UpstreamHttp,
            Web2MdError::NavigationTimeout { .. } => ErrorKind::NavigationTimeout,
            Web2MdError::SelectorNotFound { .. } => ErrorKind::SelectorNotFound,
            Web2MdError::PoolExhausted { .. } => ErrorKind::PoolExhausted,
            Web2MdError::RateLimited { .. } => ErrorKind::RateLimited,
            Web2MdError::DeadlineExceeded { .. } => ErrorKind::DeadlineExceeded,
            Web2MdError::ExtractionEmpty { .. } => ErrorKind::ExtractionEmpty,
            Web2MdError::InvalidConfig(_) => ErrorKind::InvalidConfig,
            Web2MdError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// True when the request itself was unacceptable and retrying is pointless.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            Web2MdError::InvalidUrl { .. }
                | Web2MdError::SsrfBlocked { .. }
                | Web2MdError::TooManyRedirects { .. }
                | Web2MdError::SizeLimitExceeded { .. }
                | Web2MdError::RateLimited { .. }
        )
    }

    /// Message safe to hand to an untrusted caller.
    ///
    /// Internal errors collapse to a fixed string; their detail belongs in
    /// the logs only.
    pub fn public_message(&self) -> String {
        match self {
            Web2MdError::Internal(_) => "internal error".to_string(),
            other => other.to_string(),
        }
    }

    /// Suggested HTTP status for a routing layer that maps errors to responses.
    pub fn http_status(&self) -> u16 {
        match self {
            Web2MdError::InvalidUrl { .. } | Web2MdError::TooManyRedirects { .. } => 400,
            Web2MdError::SsrfBlocked { .. } => 403,
            Web2MdError::SizeLimitExceeded { .. } => 413,
            Web2MdError::RateLimited { .. } => 429,
            Web2MdError::UpstreamHttp { .. } | Web2MdError::SelectorNotFound { .. } => 502,
            Web2MdError::PoolExhausted { .. } => 503,
            Web2MdError::ConnectTimeout { .. }
            | Web2MdError::ReadTimeout { .. }
            | Web2MdError::NavigationTimeout { .. }
            | Web2MdError::DeadlineExceeded { .. } => 504,
            Web2MdError::ExtractionEmpty { .. }
            | Web2MdError::InvalidConfig(_)
            | Web2MdError::Internal(_) => 500,
        }
    }
}
