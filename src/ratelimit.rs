//! Per-client, per-route admission control.
//!
//! The orchestrator consults a [`RateLimiter`] before any other stage runs,
//! so a rejected request never reaches the URL guard or the network.
//!
//! Two in-process implementations are provided:
//!
//! * [`FixedWindowLimiter`]: a `dashmap` of per-key windows. Each check holds
//!   the shard lock for its key while it reads and bumps the counter, so
//!   concurrent bursts from one client are counted exactly.
//! * [`TokenBucketLimiter`]: `governor`'s keyed GCRA limiter, one per route.
//!
//! Both keep state in process memory. Deployments running several replicas
//! need a shared store; the [`RateLimiter`] trait is the seam for one.
//!
//! Every [`DEFAULT_PRUNE_INTERVAL`]th check first sweeps out keys whose
//! state has gone back to fresh, so the maps stay bounded by the number of
//! recently active clients.

use crate::config::{RateLimitStrategy, ScrapeConfig};
use crate::error::Web2MdError;
use dashmap::DashMap;
use governor::clock::{Clock, DefaultClock};
use governor::state::keyed::DefaultKeyedStateStore;
use governor::{Quota, RateLimiter as GovRateLimiter};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Logical entry point a request arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Route {
    /// Plain HTTP fetch. Higher quota.
    Static,
    /// Headless-browser render. Lower quota.
    Rendered,
    /// Multi-page crawl. Charged once per crawl, not per page.
    Crawl,
}

impl Route {
    pub fn as_str(self) -> &'static str {
        match self {
            Route::Static => "static",
            Route::Rendered => "rendered",
            Route::Crawl => "crawl",
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Counter identity: one window or bucket per (client, route).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RateLimitKey {
    pub client: String,
    pub route: Route,
}

impl RateLimitKey {
    pub fn new(client: impl Into<String>, route: Route) -> Self {
        Self {
            client: client.into(),
            route,
        }
    }
}

/// Admission check consulted before any fetch work.
///
/// Implementations must be linearizable per key: two concurrent checks on
/// the same key must never both consume the last unit of quota.
pub trait RateLimiter: Send + Sync {
    /// `Ok(())` admits the request and consumes one unit of quota.
    /// Rejections return [`Web2MdError::RateLimited`].
    fn check(&self, key: &RateLimitKey) -> Result<(), Web2MdError>;
}

/// Crawls allowed per client per window unless configured otherwise.
pub const DEFAULT_CRAWL_QUOTA: u32 = 5;

/// Checks between two sweeps of idle keys.
pub const DEFAULT_PRUNE_INTERVAL: u64 = 1024;

/// Counts checks and says when a sweep is due.
#[derive(Debug)]
struct PruneSchedule {
    every: u64,
    checks: AtomicU64,
}

impl PruneSchedule {
    fn new(every: u64) -> Self {
        Self {
            every: every.max(1),
            checks: AtomicU64::new(0),
        }
    }

    fn due(&self) -> bool {
        (self.checks.fetch_add(1, Ordering::Relaxed) + 1) % self.every == 0
    }
}

/// Build the limiter selected by `config.rate_limit_strategy`.
pub fn limiter_from_config(config: &ScrapeConfig) -> Result<Arc<dyn RateLimiter>, Web2MdError> {
    let limiter: Arc<dyn RateLimiter> = match config.rate_limit_strategy {
        RateLimitStrategy::FixedWindow => Arc::new(
            FixedWindowLimiter::new(config.static_quota, config.rendered_quota, config.rate_window)
                .with_crawl_quota(config.crawl_quota),
        ),
        RateLimitStrategy::TokenBucket => Arc::new(
            TokenBucketLimiter::new(config.static_quota, config.rendered_quota, config.rate_window)?
                .with_crawl_quota(config.crawl_quota)?,
        ),
    };
    Ok(limiter)
}

// ── Fixed window ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Window {
    started: Instant,
    count: u32,
}

/// Fixed-window counter per (client, route).
///
/// A window opens at the key's first request and lasts `window`; the count
/// resets when a request arrives after it has expired.
pub struct FixedWindowLimiter {
    static_quota: u32,
    rendered_quota: u32,
    crawl_quota: u32,
    window: Duration,
    windows: DashMap<RateLimitKey, Window>,
    schedule: PruneSchedule,
}

impl FixedWindowLimiter {
    pub fn new(static_quota: u32, rendered_quota: u32, window: Duration) -> Self {
        Self {
            static_quota,
            rendered_quota,
            crawl_quota: DEFAULT_CRAWL_QUOTA,
            window,
            windows: DashMap::new(),
            schedule: PruneSchedule::new(DEFAULT_PRUNE_INTERVAL),
        }
    }

    /// Sweep expired windows every `every` checks instead of the default.
    pub fn with_prune_interval(mut self, every: u64) -> Self {
        self.schedule = PruneSchedule::new(every);
        self
    }

    pub fn with_crawl_quota(mut self, quota: u32) -> Self {
        self.crawl_quota = quota;
        self
    }

    fn quota(&self, route: Route) -> u32 {
        match route {
            Route::Static => self.static_quota,
            Route::Rendered => self.rendered_quota,
            Route::Crawl => self.crawl_quota,
        }
    }

    /// [`RateLimiter::check`] with an explicit clock reading.
    pub fn check_at(&self, key: &RateLimitKey, now: Instant) -> Result<(), Web2MdError> {
        let limit = self.quota(key.route);
        // Sweep before taking the entry: `retain` locks every shard.
        if self.schedule.due() {
            self.prune_at(now);
        }
        // The entry guard holds the shard write lock until it drops.
        let mut entry = self.windows.entry(key.clone()).or_insert(Window {
            started: now,
            count: 0,
        });

        let age = now.saturating_duration_since(entry.started);
        if age >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        if entry.count >= limit {
            let remaining = self
                .window
                .saturating_sub(now.saturating_duration_since(entry.started));
            return Err(Web2MdError::RateLimited {
                route: key.route,
                retry_after_secs: ceil_secs(remaining),
            });
        }

        entry.count += 1;
        Ok(())
    }

    /// Drop windows that have expired by `now`.
    pub fn prune_at(&self, now: Instant) {
        self.windows
            .retain(|_, w| now.saturating_duration_since(w.started) < self.window);
    }

    pub fn prune(&self) {
        self.prune_at(Instant::now());
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }
}

impl RateLimiter for FixedWindowLimiter {
    fn check(&self, key: &RateLimitKey) -> Result<(), Web2MdError> {
        self.check_at(key, Instant::now())
    }
}

// ── Token bucket ─────────────────────────────────────────────────────────

type KeyedGovernor = GovRateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Token bucket per (client, route), backed by `governor`.
///
/// The bucket holds `quota` tokens and refills one token every
/// `window / quota`, so a client can burst its full quota and then sustain
/// the same average rate as the fixed window.
pub struct TokenBucketLimiter {
    static_limiter: KeyedGovernor,
    rendered_limiter: KeyedGovernor,
    crawl_limiter: KeyedGovernor,
    window: Duration,
    clock: DefaultClock,
    schedule: PruneSchedule,
}

impl TokenBucketLimiter {
    pub fn new(static_quota: u32, rendered_quota: u32, window: Duration) -> Result<Self, Web2MdError> {
        Ok(Self {
            static_limiter: GovRateLimiter::keyed(bucket_quota(static_quota, window)?),
            rendered_limiter: GovRateLimiter::keyed(bucket_quota(rendered_quota, window)?),
            crawl_limiter: GovRateLimiter::keyed(bucket_quota(DEFAULT_CRAWL_QUOTA, window)?),
            window,
            clock: DefaultClock::default(),
            schedule: PruneSchedule::new(DEFAULT_PRUNE_INTERVAL),
        })
    }

    /// Sweep refilled buckets every `every` checks instead of the default.
    pub fn with_prune_interval(mut self, every: u64) -> Self {
        self.schedule = PruneSchedule::new(every);
        self
    }

    /// Replace the crawl bucket. Existing crawl state is discarded.
    pub fn with_crawl_quota(mut self, quota: u32) -> Result<Self, Web2MdError> {
        self.crawl_limiter = GovRateLimiter::keyed(bucket_quota(quota, self.window)?);
        Ok(self)
    }

    /// Forget clients whose buckets have refilled completely.
    pub fn prune(&self) {
        self.static_limiter.retain_recent();
        self.rendered_limiter.retain_recent();
        self.crawl_limiter.retain_recent();
    }

    /// Number of buckets currently tracked across all routes.
    pub fn tracked_keys(&self) -> usize {
        self.static_limiter.len() + self.rendered_limiter.len() + self.crawl_limiter.len()
    }
}

impl RateLimiter for TokenBucketLimiter {
    fn check(&self, key: &RateLimitKey) -> Result<(), Web2MdError> {
        let limiter = match key.route {
            Route::Static => &self.static_limiter,
            Route::Rendered => &self.rendered_limiter,
            Route::Crawl => &self.crawl_limiter,
        };
        if self.schedule.due() {
            self.prune();
        }
        limiter
            .check_key(&key.client)
            .map_err(|not_until| Web2MdError::RateLimited {
                route: key.route,
                retry_after_secs: ceil_secs(not_until.wait_time_from(self.clock.now())),
            })
    }
}

fn bucket_quota(quota: u32, window: Duration) -> Result<Quota, Web2MdError> {
    let burst = NonZeroU32::new(quota)
        .ok_or_else(|| Web2MdError::InvalidConfig("Rate-limit quota must be ≥ 1".into()))?;
    let period = window / quota;
    Quota::with_period(period)
        .map(|q| q.allow_burst(burst))
        .ok_or_else(|| Web2MdError::InvalidConfig(format!("Invalid rate window {window:?}")))
}

fn ceil_secs(d: Duration) -> u64 {
    let secs = d.as_secs() + u64::from(d.subsec_nanos() > 0);
    secs.max(1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter() -> FixedWindowLimiter {
        FixedWindowLimiter::new(10, 5, Duration::from_secs(60))
    }

    #[test]
    fn eleventh_static_request_is_rejected() {
        let l = limiter();
        let key = RateLimitKey::new("203.0.113.7", Route::Static);
        let t0 = Instant::now();
        for i in 0..10 {
            assert!(
                l.check_at(&key, t0 + Duration::from_secs(i)).is_ok(),
                "request {} should pass",
                i + 1
            );
        }
        let err = l.check_at(&key, t0 + Duration::from_secs(30)).unwrap_err();
        match err {
            Web2MdError::RateLimited {
                route,
                retry_after_secs,
            } => {
                assert_eq!(route, Route::Static);
                assert_eq!(retry_after_secs, 30);
            }
            other => panic!("expected RateLimited, got {other:?}"),
        }
    }

    #[test]
    fn sixth_rendered_request_is_rejected() {
        let l = limiter();
        let key = RateLimitKey::new("client-a", Route::Rendered);
        let t0 = Instant::now();
        for _ in 0..5 {
            l.check_at(&key, t0).unwrap();
        }
        assert!(l.check_at(&key, t0 + Duration::from_secs(59)).is_err());
    }

    #[test]
    fn routes_and_clients_are_independent() {
        let l = limiter();
        let t0 = Instant::now();
        let rendered = RateLimitKey::new("client-a", Route::Rendered);
        for _ in 0..5 {
            l.check_at(&rendered, t0).unwrap();
        }
        assert!(l.check_at(&rendered, t0).is_err());
        assert!(l
            .check_at(&RateLimitKey::new("client-a", Route::Static), t0)
            .is_ok());
        assert!(l
            .check_at(&RateLimitKey::new("client-b", Route::Rendered), t0)
            .is_ok());
    }

    #[test]
    fn window_expiry_resets_count() {
        let l = limiter();
        let key = RateLimitKey::new("client-a", Route::Rendered);
        let t0 = Instant::now();
        for _ in 0..5 {
            l.check_at(&key, t0).unwrap();
        }
        assert!(l.check_at(&key, t0 + Duration::from_secs(59)).is_err());
        assert!(l.check_at(&key, t0 + Duration::from_secs(60)).is_ok());
    }

    #[test]
    fn prune_removes_expired_windows() {
        let l = limiter();
        let t0 = Instant::now();
        l.check_at(&RateLimitKey::new("a", Route::Static), t0).unwrap();
        l.check_at(&RateLimitKey::new("b", Route::Static), t0 + Duration::from_secs(45))
            .unwrap();
        l.prune_at(t0 + Duration::from_secs(61));
        assert_eq!(l.tracked_keys(), 1);
    }

    #[test]
    fn idle_windows_are_swept_during_checks() {
        let l = limiter().with_prune_interval(4);
        let t0 = Instant::now();
        for client in ["a", "b", "c"] {
            l.check_at(&RateLimitKey::new(client, Route::Static), t0).unwrap();
        }
        assert_eq!(l.tracked_keys(), 3);

        // Fourth check: the sweep runs first and drops the three expired
        // windows, then the new key is inserted.
        l.check_at(&RateLimitKey::new("d", Route::Static), t0 + Duration::from_secs(61))
            .unwrap();
        assert_eq!(l.tracked_keys(), 1);
    }

    #[test]
    fn many_one_off_clients_stay_bounded() {
        let l = limiter().with_prune_interval(100);
        let t0 = Instant::now();
        for i in 0..10_000u64 {
            let now = t0 + Duration::from_secs(i);
            l.check_at(&RateLimitKey::new(format!("client-{i}"), Route::Static), now)
                .unwrap();
        }
        assert!(l.tracked_keys() <= 160, "tracked = {}", l.tracked_keys());
    }

    #[test]
    fn token_buckets_are_swept_during_checks() {
        let l = TokenBucketLimiter::new(1, 1, Duration::from_millis(100))
            .unwrap()
            .with_prune_interval(2);
        l.check(&RateLimitKey::new("a", Route::Static)).unwrap();
        assert_eq!(l.tracked_keys(), 1);
        std::thread::sleep(Duration::from_millis(250));
        l.check(&RateLimitKey::new("b", Route::Static)).unwrap();
        assert_eq!(l.tracked_keys(), 1);
    }

    #[test]
    fn concurrent_burst_is_counted_exactly() {
        let l = Arc::new(FixedWindowLimiter::new(10, 5, Duration::from_secs(60)));
        let key = RateLimitKey::new("burst", Route::Static);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let l = Arc::clone(&l);
                let key = key.clone();
                std::thread::spawn(move || (0..5).filter(|_| l.check(&key).is_ok()).count())
            })
            .collect();
        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(admitted, 10);
    }

    #[test]
    fn token_bucket_allows_burst_then_rejects() {
        let l = TokenBucketLimiter::new(10, 5, Duration::from_secs(60)).unwrap();
        let key = RateLimitKey::new("client-a", Route::Rendered);
        for _ in 0..5 {
            l.check(&key).unwrap();
        }
        let err = l.check(&key).unwrap_err();
        assert!(matches!(err, Web2MdError::RateLimited { route: Route::Rendered, .. }));
        assert!(l.check(&RateLimitKey::new("client-a", Route::Static)).is_ok());
    }

    #[test]
    fn crawl_route_has_its_own_quota() {
        let l = limiter().with_crawl_quota(2);
        let t0 = Instant::now();
        let crawl = RateLimitKey::new("client-a", Route::Crawl);
        l.check_at(&crawl, t0).unwrap();
        l.check_at(&crawl, t0).unwrap();
        let err = l.check_at(&crawl, t0).unwrap_err();
        assert!(matches!(err, Web2MdError::RateLimited { route: Route::Crawl, .. }));
        assert!(l
            .check_at(&RateLimitKey::new("client-a", Route::Static), t0)
            .is_ok());
    }

    #[test]
    fn default_crawl_quota_is_five() {
        for strategy in [RateLimitStrategy::FixedWindow, RateLimitStrategy::TokenBucket] {
            let config = ScrapeConfig::builder()
                .rate_limit_strategy(strategy)
                .build()
                .unwrap();
            let l = limiter_from_config(&config).unwrap();
            let key = RateLimitKey::new("x", Route::Crawl);
            for _ in 0..5 {
                l.check(&key).unwrap();
            }
            assert!(l.check(&key).is_err(), "{strategy:?}");
        }
    }

    #[test]
    fn factory_honours_strategy() {
        let config = ScrapeConfig::builder()
            .rate_limit_strategy(RateLimitStrategy::TokenBucket)
            .static_quota(2)
            .build()
            .unwrap();
        let l = limiter_from_config(&config).unwrap();
        let key = RateLimitKey::new("x", Route::Static);
        assert!(l.check(&key).is_ok());
        assert!(l.check(&key).is_ok());
        assert!(l.check(&key).is_err());
    }
}
