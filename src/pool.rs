//! Core resource pool implementation

use crate::breaker::{CreateBreaker, CreateState};
use crate::config::{ExhaustedAction, PoolConfig};
use crate::errors::{PoolError, PoolResult};
use crate::eviction::{self, EvictionReason};
use crate::health::HealthStatus;
use crate::index::{PoolIndex, PooledData, ResourceId, ResourceMeta};
use crate::lifecycle::Lifecycle;
use crate::metrics::{MetricsTracker, PoolMetrics};

use parking_lot::{Condvar, Mutex};
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// A checked-out resource that goes back to its pool when dropped
///
/// Use [`ResourcePool::release`] (or [`Pooled::release`]) instead of dropping
/// when the caller wants to see release errors.
pub struct Pooled<T> {
    resource: Option<T>,
    id: ResourceId,
    pool: Arc<PoolInner<T>>,
}

impl<T> Pooled<T> {
    fn new(resource: T, id: ResourceId, pool: Arc<PoolInner<T>>) -> Self {
        Self {
            resource: Some(resource),
            id,
            pool,
        }
    }

    /// Identity of the resource within its pool
    pub fn id(&self) -> ResourceId {
        self.id
    }

    /// Retire the resource when it is released instead of pooling it again
    pub fn deprecate(&self) {
        self.pool.state.lock().index.deprecate(self.id);
    }

    /// Take the resource out of the pool for good
    ///
    /// The pool stops tracking it, so it no longer counts against `max_active`.
    /// Returns `None` if the resource was already taken.
    ///
    /// # Panics
    ///
    /// Dereferencing the handle after this call panics.
    pub fn take(&mut self) -> Option<T> {
        let resource = self.resource.take()?;
        self.pool.forget(self.id);
        Some(resource)
    }
}

impl<T: Send + 'static> Pooled<T> {
    /// Release the resource, reporting errors instead of logging them
    pub fn release(self) -> PoolResult<()> {
        let pool = ResourcePool {
            inner: Arc::clone(&self.pool),
        };
        pool.release(self)
    }
}

impl<T> Deref for Pooled<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.resource.as_ref().expect("Resource already taken")
    }
}

impl<T> DerefMut for Pooled<T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.resource.as_mut().expect("Resource already taken")
    }
}

impl<T> Drop for Pooled<T> {
    fn drop(&mut self) {
        if let Some(resource) = self.resource.take()
            && let Err(e) = self.pool.give_back(self.id, resource)
        {
            warn!(pool = self.pool.name(), resource = %self.id, error = %e, "release on drop failed");
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Pooled<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("id", &self.id)
            .field("resource", &self.resource)
            .finish()
    }
}

/// Mutable pool state, guarded by the pool mutex
pub(crate) struct PoolState<T> {
    pub index: PoolIndex<T>,
    pub config: Arc<PoolConfig>,
    pub running: bool,
    pub waiting: usize,
    pub breaker: CreateBreaker,
}

impl<T> PoolState<T> {
    fn is_exhausted(&self) -> bool {
        self.config
            .active_limit()
            .is_some_and(|max| self.index.committed() >= max)
    }

    fn has_idle_room(&self) -> bool {
        self.running && self.index.num_idle() < self.config.max_idle
    }
}

/// A reserved creation slot, handed back if the create hook unwinds
struct CreationSlot<'a, T> {
    pool: &'a PoolInner<T>,
    settled: bool,
}

impl<'a, T> CreationSlot<'a, T> {
    fn new(pool: &'a PoolInner<T>) -> Self {
        Self { pool, settled: false }
    }

    /// The caller accounts for the slot under its own lock
    fn settle(mut self) {
        self.settled = true;
    }
}

impl<T> Drop for CreationSlot<'_, T> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        self.pool.state.lock().index.creating -= 1;
        self.pool.idle_available.notify_one();
        warn!(pool = self.pool.name(), "create hook panicked");
    }
}

enum Candidate<T> {
    Idle(ResourceId, T),
    Create,
}

pub(crate) struct PoolInner<T> {
    pub lifecycle: Box<dyn Lifecycle<T>>,
    pub state: Mutex<PoolState<T>>,
    /// Signalled whenever an idle resource or active capacity frees up
    pub idle_available: Condvar,
    pub metrics: MetricsTracker,
}

impl<T> PoolInner<T> {
    pub fn name(&self) -> &str {
        self.lifecycle.object_name()
    }

    fn acquire(self: &Arc<Self>, may_block: bool) -> PoolResult<Pooled<T>> {
        let started = Instant::now();
        loop {
            let (candidate, config) = self.checkout(started, may_block)?;
            match candidate {
                Candidate::Idle(id, mut resource) => {
                    if self.activate(&mut resource, &config) {
                        MetricsTracker::incr(&self.metrics.reused);
                        MetricsTracker::incr(&self.metrics.acquired);
                        debug!(pool = self.name(), resource = %id, "reusing idle resource");
                        return Ok(Pooled::new(resource, id, Arc::clone(self)));
                    }
                    self.discard_active(id, resource, EvictionReason::Invalid);
                }
                Candidate::Create => {
                    let (id, resource) = self.create_active(&config)?;
                    MetricsTracker::incr(&self.metrics.acquired);
                    return Ok(Pooled::new(resource, id, Arc::clone(self)));
                }
            }
        }
    }

    /// Reserve an idle resource or a creation slot, waiting if the policy says so
    fn checkout(&self, started: Instant, may_block: bool) -> PoolResult<(Candidate<T>, Arc<PoolConfig>)> {
        let mut state = self.state.lock();
        let mut counted_exhaustion = false;
        loop {
            if !state.running {
                return Err(PoolError::PoolStopped);
            }
            let config = Arc::clone(&state.config);

            if let Some(mut data) = state.index.pop_idle() {
                data.meta.claim(config.test_threads);
                self.check_thread_affinity(&state, &data.meta);
                let id = data.meta.id;
                state.index.insert_active(data.meta, config.test_threads);
                return Ok((Candidate::Idle(id, data.resource), config));
            }

            if !state.is_exhausted() || config.exhausted_action == ExhaustedAction::Grow {
                if state.breaker.should_short_circuit(state.index.creating) {
                    return Err(PoolError::BrokenCreate {
                        object: self.name().to_string(),
                        failures: state.breaker.consecutive_failures(),
                    });
                }
                state.index.creating += 1;
                return Ok((Candidate::Create, config));
            }

            if !counted_exhaustion {
                MetricsTracker::incr(&self.metrics.exhausted_events);
                counted_exhaustion = true;
            }
            if config.exhausted_action == ExhaustedAction::Fail || !may_block {
                return Err(PoolError::PoolExhausted);
            }

            state.waiting += 1;
            let deadline = config.wait_limit().and_then(|max| started.checked_add(max));
            let timed_out = match deadline {
                Some(deadline) => self.idle_available.wait_until(&mut state, deadline).timed_out(),
                None => {
                    self.idle_available.wait(&mut state);
                    false
                }
            };
            state.waiting -= 1;

            if timed_out && state.running && state.index.num_idle() == 0 && state.is_exhausted() {
                MetricsTracker::incr(&self.metrics.wait_timeouts);
                return Err(PoolError::WaitTimeout {
                    active: state.index.num_active(),
                    idle: state.index.num_idle(),
                    waiting: state.waiting,
                    elapsed: started.elapsed(),
                });
            }
        }
    }

    /// Run the lifecycle's create hook for a reserved slot and register the result as active
    fn create_active(&self, config: &PoolConfig) -> PoolResult<(ResourceId, T)> {
        let slot = CreationSlot::new(self);
        let created = self.lifecycle.create();

        let mut state = self.state.lock();
        slot.settle();
        state.index.creating -= 1;
        let mut resource = match created {
            Ok(resource) => resource,
            Err(cause) => {
                state.breaker.record_failure();
                drop(state);
                self.idle_available.notify_one();
                warn!(pool = self.name(), error = %cause, "resource creation failed");
                return Err(PoolError::creation_failed(self.name(), cause));
            }
        };
        state.breaker.record_success();
        MetricsTracker::incr(&self.metrics.created);

        if !state.running {
            drop(state);
            self.destroy_resource(resource);
            return Err(PoolError::PoolStopped);
        }

        let mut meta = ResourceMeta::new(state.index.next_id());
        meta.claim(config.test_threads);
        self.check_thread_affinity(&state, &meta);
        let id = meta.id;
        state.index.insert_active(meta, config.test_threads);
        drop(state);
        debug!(pool = self.name(), resource = %id, "created resource");

        if !self.activate(&mut resource, config) {
            self.discard_active(id, resource, EvictionReason::Invalid);
            return Err(PoolError::ActivationFailed {
                object: self.name().to_string(),
            });
        }
        Ok((id, resource))
    }

    fn activate(&self, resource: &mut T, config: &PoolConfig) -> bool {
        if !self.lifecycle.activate(resource, config.always_check_on_activate) {
            return false;
        }
        !config.validates_on_activate() || self.lifecycle.validate(resource, false)
    }

    fn check_thread_affinity(&self, state: &PoolState<T>, meta: &ResourceMeta) {
        if !state.config.test_threads {
            return;
        }
        let held = state.index.held_by(thread::current().id());
        if !held.is_empty() {
            warn!(
                pool = self.name(),
                resource = %meta.id,
                already_held = ?held,
                "thread checks out a resource while still holding others"
            );
        }
    }

    /// Drop an active resource that failed a lifecycle check
    fn discard_active(&self, id: ResourceId, resource: T, reason: EvictionReason) {
        self.state.lock().index.remove_active(id);
        self.idle_available.notify_one();
        MetricsTracker::incr(&self.metrics.broken);
        debug!(pool = self.name(), resource = %id, %reason, "discarding resource");
        self.destroy_resource(resource);
    }

    pub(crate) fn destroy_resource(&self, resource: T) {
        self.lifecycle.destroy(resource);
        MetricsTracker::incr(&self.metrics.destroyed);
    }

    fn forget(&self, id: ResourceId) {
        let removed = self.state.lock().index.remove_active(id);
        self.idle_available.notify_one();
        if removed.is_some() {
            debug!(pool = self.name(), resource = %id, "resource taken out of the pool");
        }
    }

    /// Return an active resource: recycle it into the idle set or destroy it
    pub(crate) fn give_back(&self, id: ResourceId, mut resource: T) -> PoolResult<()> {
        let snapshot = {
            let state = self.state.lock();
            state
                .index
                .active_meta(id)
                .map(|meta| (meta.clone(), Arc::clone(&state.config), state.running))
        };
        let Some((meta, config, running)) = snapshot else {
            // Reclaimed by the reaper (or never ours); the caller handed ownership back, so finish it off.
            self.destroy_resource(resource);
            return Err(PoolError::UnknownResource(id));
        };

        if config.test_threads && meta.owner != Some(thread::current().id()) {
            warn!(pool = self.name(), resource = %id, "resource returned by a different thread than took it");
        }

        let mut retire = None;
        if running {
            let reusable = if config.test_on_deactivate {
                self.lifecycle.validate(&resource, false)
            } else {
                self.lifecycle.deactivate(&mut resource)
            };
            if !reusable {
                MetricsTracker::incr(&self.metrics.broken);
                retire = Some(EvictionReason::Invalid);
            } else {
                retire = eviction::return_expiry(&meta, &config);
            }
        }
        self.metrics.record_use(meta.unused_for());

        let mut state = self.state.lock();
        let Some(mut current) = state.index.remove_active(id) else {
            drop(state);
            self.destroy_resource(resource);
            return Err(PoolError::UnknownResource(id));
        };
        if retire.is_none() && current.deprecated {
            retire = Some(EvictionReason::Deprecated);
        }
        let recycle = retire.is_none() && state.has_idle_room();
        let leftover = if recycle {
            current.release_claim();
            state.index.push_idle(PooledData::new(resource, current));
            None
        } else {
            Some(resource)
        };
        drop(state);
        self.idle_available.notify_one();
        MetricsTracker::incr(&self.metrics.released);

        if let Some(resource) = leftover {
            match retire {
                Some(reason) => debug!(pool = self.name(), resource = %id, %reason, "retiring returned resource"),
                None => debug!(pool = self.name(), resource = %id, "no idle room, destroying returned resource"),
            }
            self.destroy_resource(resource);
        }
        Ok(())
    }
}

impl<T> Drop for PoolInner<T> {
    fn drop(&mut self) {
        let idle = self.state.get_mut().index.drain_idle();
        for data in idle {
            self.lifecycle.destroy(data.resource);
        }
    }
}

/// Bounded, thread-safe pool of resources managed by a [`Lifecycle`]
///
/// Cloning is cheap and yields another handle to the same pool.
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{FactoryLifecycle, PoolConfig, ResourcePool};
///
/// let pool = ResourcePool::new(
///     FactoryLifecycle::new("buffer", || Ok(Vec::<u8>::new())),
///     PoolConfig::new().with_max_active(2),
/// );
///
/// {
///     let mut buf = pool.acquire().unwrap();
///     buf.extend_from_slice(b"hello");
/// }
/// assert_eq!(pool.num_idle(), 1);
/// assert_eq!(pool.num_active(), 0);
/// ```
pub struct ResourcePool<T> {
    inner: Arc<PoolInner<T>>,
}

impl<T> Clone for ResourcePool<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Create an empty pool; resources are created on demand
    pub fn new<L>(lifecycle: L, config: PoolConfig) -> Self
    where
        L: Lifecycle<T> + 'static,
    {
        Self {
            inner: Arc::new(PoolInner {
                lifecycle: Box::new(lifecycle),
                state: Mutex::new(PoolState {
                    index: PoolIndex::new(),
                    config: Arc::new(config),
                    running: true,
                    waiting: 0,
                    breaker: CreateBreaker::new(),
                }),
                idle_available: Condvar::new(),
                metrics: MetricsTracker::new(),
            }),
        }
    }

    /// Create a pool after checking the configuration
    pub fn try_new<L>(lifecycle: L, config: PoolConfig) -> PoolResult<Self>
    where
        L: Lifecycle<T> + 'static,
    {
        config.validate()?;
        Ok(Self::new(lifecycle, config))
    }

    /// Check out a resource, applying the configured exhaustion policy
    pub fn acquire(&self) -> PoolResult<Pooled<T>> {
        self.inner.acquire(true)
    }

    /// Check out a resource without ever blocking
    ///
    /// Behaves like [`acquire`](Self::acquire) except that a `Block` policy fails
    /// with [`PoolError::PoolExhausted`] instead of waiting.
    pub fn try_acquire(&self) -> PoolResult<Pooled<T>> {
        self.inner.acquire(false)
    }

    /// Check out a resource from async code
    ///
    /// The blocking acquire runs on tokio's blocking thread pool.
    pub async fn acquire_async(&self) -> PoolResult<Pooled<T>> {
        let pool = self.clone();
        tokio::task::spawn_blocking(move || pool.acquire())
            .await
            .map_err(|_| PoolError::Cancelled)?
    }

    /// Return a resource to the pool
    ///
    /// Fails with [`PoolError::UnknownResource`] if the handle belongs to another
    /// pool (it then returns to its own pool when dropped) or if the reaper has
    /// already reclaimed it, and with [`PoolError::InvalidArgument`] if the
    /// resource was taken out of the handle.
    pub fn release(&self, mut pooled: Pooled<T>) -> PoolResult<()> {
        if !Arc::ptr_eq(&pooled.pool, &self.inner) {
            return Err(PoolError::UnknownResource(pooled.id));
        }
        let resource = pooled
            .resource
            .take()
            .ok_or(PoolError::InvalidArgument("handle no longer holds a resource"))?;
        self.inner.give_back(pooled.id, resource)
    }

    /// Create idle resources ahead of demand
    ///
    /// Stops at `count`, at `max_idle`, or when the active limit leaves no room.
    /// Returns how many were created.
    pub fn prefill(&self, count: usize) -> PoolResult<usize> {
        let mut created = 0;
        while created < count {
            {
                let mut state = self.inner.state.lock();
                if !state.running {
                    return Err(PoolError::PoolStopped);
                }
                let footprint = state.index.committed() + state.index.num_idle();
                let room = state.config.active_limit().is_none_or(|max| footprint < max);
                if !room || !state.has_idle_room() {
                    break;
                }
                state.index.creating += 1;
            }

            let slot = CreationSlot::new(&*self.inner);
            let result = self.inner.lifecycle.create();
            let mut state = self.inner.state.lock();
            slot.settle();
            state.index.creating -= 1;
            match result {
                Ok(resource) => {
                    state.breaker.record_success();
                    MetricsTracker::incr(&self.inner.metrics.created);
                    let meta = ResourceMeta::new(state.index.next_id());
                    state.index.push_idle(PooledData::new(resource, meta));
                    created += 1;
                }
                Err(cause) => {
                    state.breaker.record_failure();
                    drop(state);
                    self.inner.idle_available.notify_one();
                    return Err(PoolError::creation_failed(self.inner.name(), cause));
                }
            }
            drop(state);
            self.inner.idle_available.notify_one();
        }
        debug!(pool = self.inner.name(), created, "prefilled pool");
        Ok(created)
    }

    /// Stop the pool: destroy idle resources and refuse further acquires
    ///
    /// Resources still checked out are destroyed as they are released.
    pub fn destroy(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            if !state.running {
                return;
            }
            state.running = false;
            state.index.drain_idle()
        };
        self.inner.idle_available.notify_all();
        info!(pool = self.inner.name(), idle = idle.len(), "stopping pool");
        for data in idle {
            self.inner.destroy_resource(data.resource);
        }
    }

    /// Whether [`destroy`](Self::destroy) has been called
    pub fn is_stopped(&self) -> bool {
        !self.inner.state.lock().running
    }

    /// Replace the configuration; applies to every subsequent operation
    pub fn set_config(&self, config: PoolConfig) -> PoolResult<()> {
        config.validate()?;
        self.inner.state.lock().config = Arc::new(config);
        // Limits may have grown; let waiters re-check.
        self.inner.idle_available.notify_all();
        Ok(())
    }

    /// Current configuration snapshot
    pub fn config(&self) -> PoolConfig {
        PoolConfig::clone(&self.inner.state.lock().config)
    }

    /// Mark every current resource deprecated so none of them is reused
    pub fn deprecate_all(&self) -> usize {
        self.inner.state.lock().index.deprecate_all()
    }

    /// Name reported by the lifecycle
    pub fn object_name(&self) -> &str {
        self.inner.name()
    }

    /// Idle plus active resources
    pub fn size(&self) -> usize {
        self.inner.state.lock().index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }

    pub fn num_idle(&self) -> usize {
        self.inner.state.lock().index.num_idle()
    }

    pub fn num_active(&self) -> usize {
        self.inner.state.lock().index.num_active()
    }

    /// Callers currently blocked in `acquire`
    pub fn num_waiting(&self) -> usize {
        self.inner.state.lock().waiting
    }

    /// Resources discarded after failing a lifecycle check
    pub fn num_broken(&self) -> usize {
        self.inner.metrics.broken.load(Ordering::Relaxed)
    }

    pub fn max_use_time(&self) -> Duration {
        self.inner.metrics.max_use_time()
    }

    pub fn min_use_time(&self) -> Duration {
        self.inner.metrics.min_use_time()
    }

    pub fn average_use_time(&self) -> Duration {
        self.inner.metrics.average_use_time()
    }

    /// Reset the longest recorded use time, returning the previous value
    pub fn reset_max_use_time(&self) -> Duration {
        self.inner.metrics.reset_max_use_time()
    }

    /// Reset the shortest recorded use time, returning the previous value
    pub fn reset_min_use_time(&self) -> Duration {
        self.inner.metrics.reset_min_use_time()
    }

    /// Get pool metrics
    pub fn metrics(&self) -> PoolMetrics {
        let state = self.inner.state.lock();
        self.inner.metrics.snapshot(
            state.index.num_active(),
            state.index.num_idle(),
            state.waiting,
            state.config.active_limit(),
        )
    }

    /// Get health status
    pub fn health_status(&self) -> HealthStatus {
        let create_state = self.create_state();
        HealthStatus::new(&self.metrics(), create_state, self.is_stopped())
    }

    /// Whether resource creation is currently failing
    pub fn create_state(&self) -> CreateState {
        self.inner.state.lock().breaker.state()
    }

    pub(crate) fn inner(&self) -> &Arc<PoolInner<T>> {
        &self.inner
    }
}
