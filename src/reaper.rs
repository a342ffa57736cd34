//! Maintenance sweep and the task that runs it periodically

use crate::eviction::{self, EvictionReason};
use crate::index::PooledData;
use crate::metrics::MetricsTracker;
use crate::pool::{PoolInner, ResourcePool};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, warn};

/// What one maintenance sweep did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Idle resources destroyed for idle time, lifetime or deprecation
    pub expired: usize,

    /// Idle resources destroyed because the idle set was over `max_idle`
    pub trimmed: usize,

    /// Idle resources that passed validation and went back to the idle set
    pub validated: usize,

    /// Idle resources destroyed after failing validation
    pub invalid: usize,

    /// Active resources reclaimed as leaked
    pub leaked: usize,
}

impl SweepReport {
    /// Whether the sweep took nothing out of circulation
    pub fn is_noop(&self) -> bool {
        self.removed() == 0
    }

    /// Resources taken out of circulation
    pub fn removed(&self) -> usize {
        self.expired + self.trimmed + self.invalid + self.leaked
    }
}

impl<T> PoolInner<T> {
    /// Evict expired idle resources, validate the rest if configured and reclaim leaks
    ///
    /// Lifecycle hooks run after the lock is released. Leaked resources are
    /// still owned by their callers, so their destroy hook runs when the caller
    /// finally releases them (which then reports `UnknownResource`).
    pub(crate) fn maintain(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let (expired, trimmed, to_check, leaked) = {
            let mut state = self.state.lock();
            if !state.running {
                return report;
            }
            let config = Arc::clone(&state.config);

            let mut reasons: Vec<EvictionReason> = Vec::new();
            let expired = state.index.extract_idle(|data| match eviction::idle_expiry(&data.meta, &config) {
                Some(reason) => {
                    reasons.push(reason);
                    true
                }
                None => false,
            });
            let trimmed = state.index.trim_idle(config.max_idle);

            let to_check = if config.test_on_idle {
                let to_check = state.index.drain_idle();
                state.index.validating += to_check.len();
                to_check
            } else {
                Vec::new()
            };

            let leaked = state.index.extract_active(|meta| eviction::is_leaked(meta, &config));

            (expired.into_iter().zip(reasons).collect::<Vec<_>>(), trimmed, to_check, leaked)
        };

        if !leaked.is_empty() {
            self.idle_available.notify_all();
        }
        for meta in &leaked {
            MetricsTracker::incr(&self.metrics.leaked);
            match &meta.trace {
                Some(trace) => warn!(
                    pool = self.name(),
                    resource = %meta.id,
                    reason = %EvictionReason::Leaked,
                    held_for = ?meta.unused_for(),
                    owner = ?meta.owner,
                    checkout_trace = %trace,
                    "reclaiming leaked resource"
                ),
                None => warn!(
                    pool = self.name(),
                    resource = %meta.id,
                    reason = %EvictionReason::Leaked,
                    held_for = ?meta.unused_for(),
                    "reclaiming leaked resource"
                ),
            }
        }
        report.leaked = leaked.len();

        report.expired = expired.len();
        for (data, reason) in expired {
            self.evict(data, reason);
        }
        report.trimmed = trimmed.len();
        for data in trimmed {
            self.evict(data, EvictionReason::OverCapacity);
        }

        for data in to_check {
            if self.lifecycle.validate(&data.resource, true) {
                if let Some(rejected) = self.reinsert_validated(data) {
                    self.evict(rejected, EvictionReason::OverCapacity);
                    report.trimmed += 1;
                } else {
                    report.validated += 1;
                }
            } else {
                self.state.lock().index.validating -= 1;
                MetricsTracker::incr(&self.metrics.broken);
                warn!(pool = self.name(), resource = %data.meta.id, "idle resource failed validation");
                self.evict(data, EvictionReason::Invalid);
                report.invalid += 1;
            }
        }

        if !report.is_noop() {
            debug!(pool = self.name(), ?report, "maintenance sweep");
        }
        report
    }

    /// Put a validated resource back into the idle set, or hand it back if there is no room
    fn reinsert_validated(&self, data: PooledData<T>) -> Option<PooledData<T>> {
        let mut state = self.state.lock();
        state.index.validating -= 1;
        if state.running && state.index.num_idle() < state.config.max_idle {
            state.index.push_idle(data);
            drop(state);
            self.idle_available.notify_one();
            None
        } else {
            Some(data)
        }
    }

    fn evict(&self, data: PooledData<T>, reason: EvictionReason) {
        debug!(pool = self.name(), resource = %data.meta.id, %reason, "evicting idle resource");
        self.destroy_resource(data.resource);
    }
}

impl<T: Send + 'static> ResourcePool<T> {
    /// Run one maintenance sweep
    ///
    /// Intended to be called periodically, either by an external scheduler or
    /// by a [`Reaper`]. Never fails; problems are logged and the affected
    /// resources destroyed.
    pub fn maintain(&self) -> SweepReport {
        self.inner().maintain()
    }
}

/// Background task running [`ResourcePool::maintain`] at a fixed interval
///
/// The sweep itself runs on tokio's blocking thread pool since lifecycle hooks
/// may block. The task ends on [`shutdown`](Reaper::shutdown) or once the pool
/// is stopped.
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{FactoryLifecycle, PoolConfig, Reaper, ResourcePool};
/// use std::time::Duration;
///
/// # #[tokio::main]
/// # async fn main() {
/// let pool = ResourcePool::new(FactoryLifecycle::new("n", || Ok(1u32)), PoolConfig::default());
/// let reaper = Reaper::spawn(pool.clone(), Duration::from_secs(30));
/// // ...
/// reaper.shutdown().await;
/// # }
/// ```
pub struct Reaper {
    handle: JoinHandle<()>,
    shutdown: Arc<Notify>,
}

impl Reaper {
    /// Spawn the sweep task on the current tokio runtime
    pub fn spawn<T: Send + 'static>(pool: ResourcePool<T>, interval: Duration) -> Self {
        let shutdown = Arc::new(Notify::new());
        let signal = Arc::clone(&shutdown);

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = signal.notified() => break,
                    _ = ticker.tick() => {
                        if pool.is_stopped() {
                            break;
                        }
                        let sweeper = pool.clone();
                        if let Err(e) = tokio::task::spawn_blocking(move || sweeper.maintain()).await {
                            error!(pool = pool.object_name(), error = %e, "maintenance sweep panicked");
                        }
                    }
                }
            }
            debug!(pool = pool.object_name(), "reaper stopped");
        });

        Self { handle, shutdown }
    }

    /// Whether the task has ended
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the task and wait for it to end
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.handle.await {
            error!(error = %e, "reaper task failed");
        }
    }
}
