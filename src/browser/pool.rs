//! Bounded pool of rendering contexts.
//!
//! ## Why a semaphore plus an idle list?
//!
//! The semaphore is the bound: every live context is backed by one permit,
//! so at most `pool_size` contexts exist however many requests are waiting.
//! Waiting for a permit is how callers queue, and `tokio::time::timeout`
//! around the wait is what turns a saturated pool into
//! [`Web2MdError::PoolExhausted`] instead of unbounded growth.
//!
//! The idle list only saves start-up cost: a context released healthy and
//! successfully reset is pushed back and handed to the next caller.
//!
//! ## Release on every path
//!
//! [`BrowserHandle::release`] is the normal exit and is idempotent. If a
//! handle is dropped without it (early return, panic, or the request future
//! being cancelled), `Drop` schedules the context's destruction on the
//! runtime and the permit is returned immediately. A context that was not
//! released explicitly is never reused.

use super::{RenderContext, RenderEngine};
use crate::error::Web2MdError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tracing::{debug, info, warn};

struct PoolInner {
    engine: Arc<dyn RenderEngine>,
    permits: Arc<Semaphore>,
    idle: Mutex<Vec<Box<dyn RenderContext>>>,
    size: usize,
    reuse: bool,
    created: AtomicUsize,
    destroyed: AtomicUsize,
}

/// Point-in-time pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub size: usize,
    /// Permits not currently leased.
    pub available: usize,
    /// Contexts parked for reuse.
    pub idle: usize,
    pub created: usize,
    pub destroyed: usize,
}

/// Bounded set of reusable rendering contexts. Cheap to clone.
#[derive(Clone)]
pub struct BrowserPool {
    inner: Arc<PoolInner>,
}

impl BrowserPool {
    pub fn new(engine: Arc<dyn RenderEngine>, size: usize, reuse: bool) -> Self {
        let size = size.max(1);
        Self {
            inner: Arc::new(PoolInner {
                engine,
                permits: Arc::new(Semaphore::new(size)),
                idle: Mutex::new(Vec::new()),
                size,
                reuse,
                created: AtomicUsize::new(0),
                destroyed: AtomicUsize::new(0),
            }),
        }
    }

    /// Lease a context, waiting at most `timeout` for one to become free.
    pub async fn acquire(&self, timeout: Duration) -> Result<BrowserHandle, Web2MdError> {
        let start = Instant::now();
        let permit = match tokio::time::timeout(timeout, self.inner.permits.clone().acquire_owned()).await {
            Err(_) => {
                warn!(pool_size = self.inner.size, waited_ms = timeout.as_millis() as u64, "browser pool exhausted");
                return Err(Web2MdError::PoolExhausted {
                    pool_size: self.inner.size,
                    waited_ms: start.elapsed().as_millis() as u64,
                });
            }
            Ok(Err(_)) => return Err(Web2MdError::Internal("browser pool is shut down".into())),
            Ok(Ok(permit)) => permit,
        };

        let parked = self.inner.idle.lock().await.pop();
        let context = match parked {
            Some(ctx) => {
                debug!("reusing idle browser context");
                ctx
            }
            None => {
                // On failure the permit drops with this frame.
                let ctx = self.inner.engine.new_context().await?;
                self.inner.created.fetch_add(1, Ordering::Relaxed);
                debug!("created browser context");
                ctx
            }
        };

        Ok(BrowserHandle {
            context: Some(context),
            permit: Some(permit),
            failed: false,
            pool: Arc::clone(&self.inner),
        })
    }

    pub async fn stats(&self) -> PoolStats {
        PoolStats {
            size: self.inner.size,
            available: self.inner.permits.available_permits(),
            idle: self.inner.idle.lock().await.len(),
            created: self.inner.created.load(Ordering::Relaxed),
            destroyed: self.inner.destroyed.load(Ordering::Relaxed),
        }
    }

    /// Refuse new leases, close idle contexts and shut the engine down.
    ///
    /// Leased handles stay valid until released; their contexts are then
    /// destroyed instead of parked.
    pub async fn shutdown(&self) -> Result<(), Web2MdError> {
        self.inner.permits.close();
        let idle: Vec<_> = self.inner.idle.lock().await.drain(..).collect();
        let count = idle.len();
        for ctx in idle {
            ctx.close().await;
            self.inner.destroyed.fetch_add(1, Ordering::Relaxed);
        }
        info!(closed = count, "browser pool shut down");
        self.inner.engine.shutdown().await
    }
}

/// A leased rendering context.
///
/// Owned by one request for one fetch. Give it back with
/// [`BrowserHandle::release`]; dropping it destroys the context.
pub struct BrowserHandle {
    context: Option<Box<dyn RenderContext>>,
    permit: Option<OwnedSemaphorePermit>,
    failed: bool,
    pool: Arc<PoolInner>,
}

impl BrowserHandle {
    /// The leased context. Fails after release.
    pub fn context(&mut self) -> Result<&mut (dyn RenderContext + 'static), Web2MdError> {
        self.context
            .as_deref_mut()
            .ok_or_else(|| Web2MdError::Internal("browser handle used after release".into()))
    }

    /// Mark the context as unfit for reuse. Release will destroy it.
    pub fn mark_failed(&mut self) {
        self.failed = true;
    }

    pub fn is_released(&self) -> bool {
        self.context.is_none()
    }

    /// Return the context to the pool, or destroy it if it failed, reuse is
    /// off, the pool is shut down, or its reset fails.
    ///
    /// Idempotent: later calls do nothing.
    pub async fn release(&mut self) {
        let Some(mut ctx) = self.context.take() else {
            return;
        };
        let permit = self.permit.take();

        let reusable = self.pool.reuse && !self.failed && !self.pool.permits.is_closed();
        if reusable {
            match ctx.reset().await {
                Ok(()) => {
                    self.pool.idle.lock().await.push(ctx);
                    debug!("browser context returned to pool");
                    drop(permit);
                    return;
                }
                Err(e) => warn!(error = %e, "browser context reset failed, destroying"),
            }
        }

        ctx.close().await;
        self.pool.destroyed.fetch_add(1, Ordering::Relaxed);
        debug!(failed = self.failed, "browser context destroyed");
        drop(permit);
    }
}

impl Drop for BrowserHandle {
    fn drop(&mut self) {
        let Some(ctx) = self.context.take() else {
            return;
        };
        self.pool.destroyed.fetch_add(1, Ordering::Relaxed);
        match tokio::runtime::Handle::try_current() {
            Ok(rt) => {
                debug!("browser handle dropped without release, closing context in background");
                rt.spawn(async move { ctx.close().await });
            }
            Err(_) => warn!("browser handle dropped outside a runtime, context leaked to engine"),
        }
        // `permit` drops after this body, freeing the slot.
    }
}
