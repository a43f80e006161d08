//! Observer trait for structured per-request events.
//!
//! Inject an [`Arc<dyn ScrapeObserver>`] via
//! [`crate::config::ScrapeConfigBuilder::observer`] to receive an event when
//! a request starts, after every pipeline stage, and when it finishes.
//!
//! # Why an observer instead of logging directly?
//!
//! The pipeline does not decide where events go. A server can forward them
//! to its access log or a metrics registry, the CLI drives a spinner, and
//! tests count calls. [`TracingObserver`] is the stock implementation that
//! turns each event into a `tracing` record with structured fields.
//!
//! # Example
//!
//! ```rust
//! use edgequake_web2md::{ScrapeConfig, ScrapeObserver, Stage};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//! use std::time::Duration;
//!
//! struct FetchCounter(AtomicUsize);
//!
//! impl ScrapeObserver for FetchCounter {
//!     fn on_stage_complete(&self, stage: Stage, _elapsed: Duration) {
//!         if stage == Stage::Fetch {
//!             self.0.fetch_add(1, Ordering::SeqCst);
//!         }
//!     }
//! }
//!
//! let config = ScrapeConfig::builder()
//!     .observer(Arc::new(FetchCounter(AtomicUsize::new(0))))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::ErrorKind;
use crate::ratelimit::Route;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Pipeline stage, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    RateLimit,
    Guard,
    Fetch,
    Sanitize,
    Extract,
    Normalize,
    Convert,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::RateLimit => "rate_limit",
            Stage::Guard => "guard",
            Stage::Fetch => "fetch",
            Stage::Sanitize => "sanitize",
            Stage::Extract => "extract",
            Stage::Normalize => "normalize",
            Stage::Convert => "convert",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Summary emitted once per request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RequestOutcome {
    pub route: Route,
    pub url: String,
    /// Last stage that started. On failure, the stage that failed.
    pub stage: Stage,
    pub elapsed: Duration,
    /// `None` on success.
    pub error: Option<ErrorKind>,
}

impl RequestOutcome {
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }
}

/// Receives structured events from the scrape pipeline.
///
/// Implementations must be `Send + Sync`: one observer is shared by every
/// concurrent request. All methods have default no-op implementations so
/// callers only override what they care about.
pub trait ScrapeObserver: Send + Sync {
    /// Called once, before the rate limiter is consulted.
    fn on_request_start(&self, route: Route, url: &str) {
        let _ = (route, url);
    }

    /// Called after each stage that completed successfully.
    fn on_stage_complete(&self, stage: Stage, elapsed: Duration) {
        let _ = (stage, elapsed);
    }

    /// Called once per request with its outcome, success or failure.
    fn on_request_complete(&self, outcome: &RequestOutcome) {
        let _ = outcome;
    }
}

/// A no-op implementation for callers that don't need events.
pub struct NoopObserver;

impl ScrapeObserver for NoopObserver {}

/// Forwards every event to `tracing` with structured fields.
pub struct TracingObserver;

impl ScrapeObserver for TracingObserver {
    fn on_request_start(&self, route: Route, url: &str) {
        debug!(route = %route, url, "scrape started");
    }

    fn on_stage_complete(&self, stage: Stage, elapsed: Duration) {
        debug!(stage = %stage, elapsed_ms = elapsed.as_millis() as u64, "stage complete");
    }

    fn on_request_complete(&self, outcome: &RequestOutcome) {
        let elapsed_ms = outcome.elapsed.as_millis() as u64;
        match outcome.error {
            None => info!(
                route = %outcome.route,
                url = %outcome.url,
                elapsed_ms,
                outcome = "ok",
                "scrape finished"
            ),
            Some(kind) => warn!(
                route = %outcome.route,
                url = %outcome.url,
                stage = %outcome.stage,
                elapsed_ms,
                error_kind = %kind,
                outcome = "error",
                "scrape failed"
            ),
        }
    }
}

/// Convenience alias matching the type stored in [`crate::config::ScrapeConfig`].
pub type Observer = Arc<dyn ScrapeObserver>;
