//! Bounded pool of reusable evaluator processes.
//!
//! A semaphore with `max_size` permits gates every checkout. Whoever holds a
//! permit either takes an idle resource or constructs a new one, so the
//! number of live resources never exceeds `max_size`. Resources go back to
//! the idle list before their permit is returned.

use crate::context::EvalContext;
use crate::error::{Error, Result};
use crate::worker::Worker;
use std::future::Future;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Upper bound for `max_size`: `i32::MAX`, or the semaphore's permit limit
/// where that is lower.
pub const MAX_POOL_SIZE: usize = if (i32::MAX as usize) < Semaphore::MAX_PERMITS {
    i32::MAX as usize
} else {
    Semaphore::MAX_PERMITS
};

/// Something the pool can hand out, check for liveness and tear down.
pub trait Poolable: Send + 'static {
    /// Whether the resource died while idle and must not be handed out.
    fn has_exited(&mut self) -> bool;

    fn destroy(self);
}

/// Pool of evaluator worker processes shared by pooled VMs.
pub type ProcessPool = Pool<Worker>;

#[derive(Debug, Clone)]
pub struct PoolConfig {
    /// Maximum number of live resources, clamped to `1..=MAX_POOL_SIZE`
    pub max_size: usize,
    /// How often idle resources are checked for exited processes
    pub reap_interval: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1),
            reap_interval: Duration::from_secs(10),
        }
    }
}

impl PoolConfig {
    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }
}

/// Point-in-time counters of a pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStat {
    /// Constructed and not yet destroyed, idle or checked out
    pub live: usize,
    pub idle: usize,
    pub max_size: usize,
}

struct Idle<T> {
    resources: Vec<T>,
    closed: bool,
}

struct Inner<T: Poolable> {
    semaphore: Arc<Semaphore>,
    idle: Mutex<Idle<T>>,
    live: AtomicUsize,
    max_size: usize,
    shutdown: CancellationToken,
}

impl<T: Poolable> Inner<T> {
    fn lock_idle(&self) -> MutexGuard<'_, Idle<T>> {
        self.idle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn destroy(&self, resource: T) {
        resource.destroy();
        self.live.fetch_sub(1, Ordering::SeqCst);
    }

    /// Most recently returned idle resource that is still alive.
    fn take_idle(&self) -> Option<T> {
        let mut dead = Vec::new();
        let found = {
            let mut idle = self.lock_idle();
            loop {
                match idle.resources.pop() {
                    Some(mut resource) => {
                        if resource.has_exited() {
                            dead.push(resource);
                        } else {
                            break Some(resource);
                        }
                    }
                    None => break None,
                }
            }
        };
        for resource in dead {
            debug!("Discarding exited idle resource");
            self.destroy(resource);
        }
        found
    }

    fn put_back(&self, resource: T) {
        let rejected = {
            let mut idle = self.lock_idle();
            if idle.closed {
                Some(resource)
            } else {
                idle.resources.push(resource);
                None
            }
        };
        if let Some(resource) = rejected {
            self.destroy(resource);
        }
    }

    fn reap_idle(&self) -> usize {
        let mut dead = Vec::new();
        {
            let mut idle = self.lock_idle();
            let mut alive = Vec::with_capacity(idle.resources.len());
            for mut resource in idle.resources.drain(..) {
                if resource.has_exited() {
                    dead.push(resource);
                } else {
                    alive.push(resource);
                }
            }
            idle.resources = alive;
        }
        let reaped = dead.len();
        for resource in dead {
            self.destroy(resource);
        }
        reaped
    }
}

impl<T: Poolable> Drop for Inner<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        let idle = self.idle.get_mut().unwrap_or_else(PoisonError::into_inner);
        for resource in idle.resources.drain(..) {
            resource.destroy();
        }
    }
}

/// Bounded, lazily filled pool. Cloning is cheap and shares the pool.
pub struct Pool<T: Poolable> {
    inner: Arc<Inner<T>>,
}

impl<T: Poolable> Clone for Pool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Poolable> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool").field("stat", &self.stat()).finish()
    }
}

impl<T: Poolable> Pool<T> {
    /// Creates an empty pool and starts its reaper.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn new(config: PoolConfig) -> Self {
        let max_size = config.max_size.clamp(1, MAX_POOL_SIZE);
        let inner = Arc::new(Inner {
            semaphore: Arc::new(Semaphore::new(max_size)),
            idle: Mutex::new(Idle {
                resources: Vec::new(),
                closed: false,
            }),
            live: AtomicUsize::new(0),
            max_size,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(reap(
            Arc::downgrade(&inner),
            inner.shutdown.clone(),
            config.reap_interval,
        ));

        Self { inner }
    }

    /// Checks out a resource, constructing one with `create` when no idle
    /// resource is available. Waits for a free slot while the pool is full.
    pub async fn acquire<F, Fut>(&self, ctx: &EvalContext, create: F) -> Result<Checkout<T>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        if let Some(err) = ctx.err() {
            return Err(err);
        }

        let permit = tokio::select! {
            err = ctx.done() => return Err(err),
            permit = Arc::clone(&self.inner.semaphore).acquire_owned() => {
                permit.map_err(|_| Error::PoolClosed)?
            }
        };

        let resource = match self.inner.take_idle() {
            Some(resource) => resource,
            None => {
                self.inner.live.fetch_add(1, Ordering::SeqCst);
                let created = tokio::select! {
                    err = ctx.done() => Err(err),
                    created = create() => created,
                };
                match created {
                    Ok(resource) => resource,
                    Err(e) => {
                        self.inner.live.fetch_sub(1, Ordering::SeqCst);
                        return Err(e);
                    }
                }
            }
        };

        Ok(Checkout {
            resource: Some(resource),
            pool: Arc::clone(&self.inner),
            _permit: permit,
        })
    }

    /// Rejects pending and future checkouts, destroys idle resources and
    /// makes later releases destroy instead of returning to the pool.
    pub fn close(&self) {
        let idle = {
            let mut idle = self.inner.lock_idle();
            idle.closed = true;
            std::mem::take(&mut idle.resources)
        };
        self.inner.semaphore.close();
        self.inner.shutdown.cancel();
        for resource in idle {
            self.inner.destroy(resource);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.inner.semaphore.is_closed()
    }

    /// Destroys idle resources whose process has exited. Runs periodically
    /// in the background; exposed for callers that want an immediate sweep.
    pub fn reap_idle(&self) -> usize {
        self.inner.reap_idle()
    }

    pub fn stat(&self) -> PoolStat {
        PoolStat {
            live: self.inner.live.load(Ordering::SeqCst),
            idle: self.inner.lock_idle().resources.len(),
            max_size: self.inner.max_size,
        }
    }
}

impl ProcessPool {
    pub fn with_max_size(max_size: usize) -> Self {
        Self::new(PoolConfig::default().with_max_size(max_size))
    }
}

async fn reap<T: Poolable>(pool: Weak<Inner<T>>, shutdown: CancellationToken, period: Duration) {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(inner) = pool.upgrade() else {
            break;
        };
        let reaped = inner.reap_idle();
        if reaped > 0 {
            debug!(reaped, "Reaped exited idle resources");
        }
    }
}

/// A resource lent to one caller.
///
/// Call [`Checkout::release`] after a clean exchange to return it to the
/// pool. Dropping a checkout without releasing it destroys the resource.
pub struct Checkout<T: Poolable> {
    resource: Option<T>,
    pool: Arc<Inner<T>>,
    _permit: OwnedSemaphorePermit,
}

impl<T: Poolable> Checkout<T> {
    pub fn release(mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.put_back(resource);
        }
    }

    pub fn destroy(mut self) {
        if let Some(resource) = self.resource.take() {
            self.pool.destroy(resource);
        }
    }
}

impl<T: Poolable + std::fmt::Debug> std::fmt::Debug for Checkout<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Checkout")
            .field("resource", &self.resource)
            .finish()
    }
}

impl<T: Poolable> Deref for Checkout<T> {
    type Target = T;

    fn deref(&self) -> &T {
        self.resource
            .as_ref()
            .expect("checkout holds its resource until consumed")
    }
}

impl<T: Poolable> DerefMut for Checkout<T> {
    fn deref_mut(&mut self) -> &mut T {
        self.resource
            .as_mut()
            .expect("checkout holds its resource until consumed")
    }
}

impl<T: Poolable> Drop for Checkout<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take() {
            debug!("Destroying resource dropped without release");
            self.pool.destroy(resource);
        }
    }
}
