use lifecycle_pool::{
    BoxError, CreateState, ExhaustedAction, Lifecycle, PoolConfig, PoolError, ResourcePool,
};

use std::collections::HashSet;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, mpsc};
use std::thread;
use std::time::{Duration, Instant};

/// Lifecycle whose behavior is toggled through shared flags
#[derive(Clone, Default)]
struct Probe {
    inner: Arc<ProbeState>,
}

#[derive(Default)]
struct ProbeState {
    created: AtomicUsize,
    destroyed: AtomicUsize,
    validated: AtomicUsize,
    fail_create: AtomicBool,
    reject_validation: AtomicBool,
    reject_below: AtomicUsize,
    create_delay_ms: AtomicUsize,
    panic_create: AtomicBool,
}

impl Probe {
    fn created(&self) -> usize {
        self.inner.created.load(Ordering::SeqCst)
    }

    fn destroyed(&self) -> usize {
        self.inner.destroyed.load(Ordering::SeqCst)
    }
}

impl Lifecycle<usize> for Probe {
    fn create(&self) -> Result<usize, BoxError> {
        let delay = self.inner.create_delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay as u64));
        }
        if self.inner.panic_create.load(Ordering::SeqCst) {
            panic!("create hook blew up");
        }
        if self.inner.fail_create.load(Ordering::SeqCst) {
            return Err("backend unavailable".into());
        }
        Ok(self.inner.created.fetch_add(1, Ordering::SeqCst))
    }

    fn validate(&self, resource: &usize, _for_idle_check: bool) -> bool {
        self.inner.validated.fetch_add(1, Ordering::SeqCst);
        !self.inner.reject_validation.load(Ordering::SeqCst)
            && *resource >= self.inner.reject_below.load(Ordering::SeqCst)
    }

    fn destroy(&self, _resource: usize) {
        self.inner.destroyed.fetch_add(1, Ordering::SeqCst);
    }

    fn object_name(&self) -> &str {
        "probe"
    }
}

fn pool_with(config: PoolConfig) -> (ResourcePool<usize>, Probe) {
    let probe = Probe::default();
    (ResourcePool::new(probe.clone(), config), probe)
}

#[test]
fn blocked_acquire_completes_after_release() {
    let (pool, _probe) = pool_with(
        PoolConfig::new()
            .with_max_active(1)
            .with_exhausted_action(ExhaustedAction::Block)
            .wait_forever(),
    );
    let held = pool.acquire().unwrap();

    let (tx, rx) = mpsc::channel();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || {
            let got = pool.acquire().map(|r| *r);
            tx.send(()).unwrap();
            got
        })
    };

    while pool.num_waiting() == 0 {
        thread::sleep(Duration::from_millis(5));
    }
    assert!(rx.try_recv().is_err(), "second acquire must block while the first is held");

    pool.release(held).unwrap();
    assert_eq!(waiter.join().unwrap().unwrap(), 0);
    assert_eq!(pool.num_waiting(), 0);
}

#[test]
fn blocked_acquire_times_out() {
    let (pool, _probe) = pool_with(
        PoolConfig::new()
            .with_max_active(1)
            .with_exhausted_action(ExhaustedAction::Block)
            .with_max_wait(Duration::from_millis(100)),
    );
    let _held = pool.acquire().unwrap();

    let started = Instant::now();
    let err = pool.acquire().unwrap_err();
    let elapsed = started.elapsed();

    match err {
        PoolError::WaitTimeout { active, idle, waiting, .. } => {
            assert_eq!(active, 1);
            assert_eq!(idle, 0);
            assert_eq!(waiting, 0);
        }
        other => panic!("expected WaitTimeout, got {other:?}"),
    }
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));
    // No phantom entry left behind.
    assert_eq!(pool.num_active(), 1);
    assert_eq!(pool.metrics().wait_timeouts, 1);
}

#[test]
fn zero_max_wait_blocks_until_release() {
    let (pool, _probe) = pool_with(
        PoolConfig::new()
            .with_max_active(1)
            .with_exhausted_action(ExhaustedAction::Block)
            .with_max_wait(Duration::ZERO),
    );
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|r| *r))
    };
    thread::sleep(Duration::from_millis(50));
    assert_eq!(pool.num_waiting(), 1);
    assert!(!waiter.is_finished());

    pool.release(held).unwrap();
    assert_eq!(waiter.join().unwrap().unwrap(), 0);
}

#[test]
fn zero_idle_time_never_reclaims() {
    let (pool, probe) = pool_with(PoolConfig::new().with_max_idle_time(Duration::ZERO));
    let held = pool.acquire().unwrap();
    drop(pool.acquire().unwrap());

    thread::sleep(Duration::from_millis(20));
    assert!(pool.maintain().is_noop());
    assert_eq!(pool.num_active(), 1);
    assert_eq!(pool.num_idle(), 1);

    pool.release(held).unwrap();
    assert_eq!(probe.destroyed(), 0);
}

#[test]
fn zero_lifetime_keeps_pooling() {
    let (pool, probe) = pool_with(PoolConfig::new().with_max_lifetime(Duration::ZERO));
    let handle = pool.acquire().unwrap();
    thread::sleep(Duration::from_millis(10));
    pool.release(handle).unwrap();

    assert_eq!(pool.num_idle(), 1);
    assert_eq!(probe.destroyed(), 0);
}

#[test]
fn panicking_create_gives_its_slot_back() {
    let (pool, probe) = pool_with(
        PoolConfig::new()
            .with_max_active(1)
            .with_exhausted_action(ExhaustedAction::Fail),
    );
    probe.inner.panic_create.store(true, Ordering::SeqCst);
    assert!(panic::catch_unwind(AssertUnwindSafe(|| pool.acquire())).is_err());
    assert!(panic::catch_unwind(AssertUnwindSafe(|| pool.prefill(1))).is_err());

    probe.inner.panic_create.store(false, Ordering::SeqCst);
    let handle = pool.acquire().unwrap();
    assert_eq!(*handle, 0);
    assert_eq!(pool.num_active(), 1);
}

#[test]
fn fail_policy_fails_immediately() {
    let (pool, _probe) = pool_with(
        PoolConfig::new()
            .with_max_active(1)
            .with_exhausted_action(ExhaustedAction::Fail)
            .with_max_wait(Duration::from_secs(10)),
    );
    let _held = pool.acquire().unwrap();

    let started = Instant::now();
    assert!(matches!(pool.acquire(), Err(PoolError::PoolExhausted)));
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[test]
fn double_release_is_unknown() {
    let (pool, _probe) = pool_with(PoolConfig::new().with_max_idle_time(Duration::from_millis(10)));
    let handle = pool.acquire().unwrap();
    let id = handle.id();

    thread::sleep(Duration::from_millis(30));
    assert_eq!(pool.maintain().leaked, 1);

    match pool.release(handle) {
        Err(PoolError::UnknownResource(unknown)) => assert_eq!(unknown, id),
        other => panic!("expected UnknownResource, got {other:?}"),
    }
}

#[test]
fn idle_eviction_is_final() {
    let (pool, probe) = pool_with(PoolConfig::new().with_max_idle_time(Duration::from_millis(20)));
    let first = pool.acquire().unwrap();
    let evicted_id = first.id();
    drop(first);

    thread::sleep(Duration::from_millis(40));
    assert_eq!(pool.maintain().expired, 1);
    assert_eq!(probe.destroyed(), 1);

    let next = pool.acquire().unwrap();
    assert_ne!(next.id(), evicted_id);
    assert_eq!(probe.created(), 2);
}

#[test]
fn invalid_idle_resources_are_replaced_transparently() {
    let (pool, probe) = pool_with(PoolConfig::new().with_test_on_activate(true));
    pool.prefill(3).unwrap();

    // Resources 0..3 are stale; the next fresh one passes.
    probe.inner.reject_below.store(3, Ordering::SeqCst);
    let handle = pool.acquire().unwrap();
    assert_eq!(*handle, 3);
    assert_eq!(pool.num_idle(), 0);
    assert_eq!(pool.num_broken(), 3);
    assert_eq!(probe.destroyed(), 3);
}

#[test]
fn unusable_fresh_resource_is_never_handed_out() {
    let (pool, probe) = pool_with(PoolConfig::new().with_test_on_activate(true));
    pool.prefill(2).unwrap();

    probe.inner.reject_validation.store(true, Ordering::SeqCst);
    assert!(matches!(pool.acquire(), Err(PoolError::ActivationFailed { .. })));
    assert_eq!(pool.num_idle(), 0);
    assert_eq!(pool.num_active(), 0);
    assert_eq!(pool.num_broken(), 3);
    assert_eq!(probe.created(), 3);
}

#[test]
fn broken_create_fails_fast_while_creation_in_flight() {
    let (pool, probe) = pool_with(PoolConfig::new().with_max_active(4));
    probe.inner.fail_create.store(true, Ordering::SeqCst);
    assert!(matches!(pool.acquire(), Err(PoolError::CreationFailed { .. })));
    assert_eq!(pool.create_state(), CreateState::Broken);

    // A slow failing creation is in flight; a concurrent attempt must not call create again.
    probe.inner.create_delay_ms.store(200, Ordering::SeqCst);
    let slow = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|_| ()))
    };
    thread::sleep(Duration::from_millis(50));

    match pool.acquire() {
        Err(PoolError::BrokenCreate { failures, .. }) => assert_eq!(failures, 1),
        other => panic!("expected BrokenCreate, got {:?}", other.map(|_| ())),
    }
    assert!(matches!(slow.join().unwrap(), Err(PoolError::CreationFailed { .. })));

    // Recovery clears the state.
    probe.inner.create_delay_ms.store(0, Ordering::SeqCst);
    probe.inner.fail_create.store(false, Ordering::SeqCst);
    assert!(pool.acquire().is_ok());
    assert_eq!(pool.create_state(), CreateState::Healthy);
}

#[test]
fn active_limit_holds_under_contention() {
    const MAX: usize = 3;
    let (pool, probe) = pool_with(
        PoolConfig::new()
            .with_max_active(MAX)
            .with_max_idle(MAX)
            .with_exhausted_action(ExhaustedAction::Block)
            .wait_forever(),
    );
    let peak = Arc::new(AtomicUsize::new(0));
    let barrier = Arc::new(Barrier::new(8));

    let workers: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            let peak = Arc::clone(&peak);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    let handle = pool.acquire().unwrap();
                    peak.fetch_max(pool.num_active(), Ordering::SeqCst);
                    thread::yield_now();
                    pool.release(handle).unwrap();
                }
            })
        })
        .collect();
    for worker in workers {
        worker.join().unwrap();
    }

    assert!(peak.load(Ordering::SeqCst) <= MAX);
    assert!(probe.created() <= MAX);
    assert_eq!(pool.num_active(), 0);
    assert_eq!(pool.metrics().total_acquired, 400);
    assert_eq!(pool.metrics().total_released, 400);
}

#[test]
fn idle_and_active_stay_disjoint() {
    let (pool, probe) = pool_with(PoolConfig::new().with_max_active(5).with_max_idle(5));
    let held: Vec<_> = (0..3).map(|_| pool.acquire().unwrap()).collect();
    let held_ids: HashSet<_> = held.iter().map(|h| h.id()).collect();
    pool.prefill(2).unwrap();

    assert_eq!(pool.num_active(), 3);
    assert_eq!(pool.num_idle(), 2);
    assert_eq!(pool.size(), 5);

    drop(held);
    assert_eq!(pool.num_active(), 0);
    assert_eq!(pool.num_idle(), 5);

    let again: Vec<_> = (0..5).map(|_| pool.acquire().unwrap()).collect();
    let again_ids: HashSet<_> = again.iter().map(|h| h.id()).collect();
    assert_eq!(again_ids.len(), 5);
    assert!(held_ids.is_subset(&again_ids));
    assert_eq!(probe.created(), 5);
    assert_eq!(probe.destroyed(), 0);
}

#[test]
fn destroy_wakes_blocked_callers() {
    let (pool, probe) = pool_with(PoolConfig::new().with_max_active(1).wait_forever());
    let held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|_| ()))
    };
    while pool.num_waiting() == 0 {
        thread::sleep(Duration::from_millis(5));
    }

    pool.destroy();
    assert!(matches!(waiter.join().unwrap(), Err(PoolError::PoolStopped)));

    pool.release(held).unwrap();
    assert_eq!(probe.destroyed(), 1);
    assert!(pool.is_empty());
}

#[test]
fn raising_the_limit_releases_waiters() {
    let (pool, _probe) = pool_with(PoolConfig::new().with_max_active(1).wait_forever());
    let _held = pool.acquire().unwrap();

    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|r| *r))
    };
    while pool.num_waiting() == 0 {
        thread::sleep(Duration::from_millis(5));
    }

    pool.set_config(pool.config().with_max_active(2)).unwrap();
    assert_eq!(waiter.join().unwrap().unwrap(), 1);
}

#[test]
fn deprecate_all_retires_everything() {
    let (pool, probe) = pool_with(PoolConfig::default());
    let active = pool.acquire().unwrap();
    pool.prefill(2).unwrap();

    assert_eq!(pool.deprecate_all(), 3);
    assert_eq!(pool.maintain().expired, 2);
    pool.release(active).unwrap();

    assert_eq!(pool.num_idle(), 0);
    assert_eq!(probe.destroyed(), 3);
}

#[test]
fn dropping_the_pool_destroys_idle_resources() {
    let (pool, probe) = pool_with(PoolConfig::default());
    pool.prefill(3).unwrap();
    drop(pool);
    assert_eq!(probe.destroyed(), 3);
}

#[cfg(feature = "prometheus")]
#[test]
fn prometheus_export_includes_counters() {
    use lifecycle_pool::MetricsExporter;

    let (pool, _probe) = pool_with(PoolConfig::default());
    drop(pool.acquire().unwrap());

    let output = MetricsExporter::export_prometheus(&pool.metrics(), "probe_pool", None).unwrap();
    assert!(output.contains("resourcepool_created_total{pool=\"probe_pool\"} 1"));
    assert!(output.contains("resourcepool_resources_idle{pool=\"probe_pool\"} 1"));
}

#[tokio::test]
async fn async_acquire_waits_for_release() {
    let (pool, _probe) = pool_with(PoolConfig::new().with_max_active(1).wait_forever());
    let held = pool.acquire().unwrap();
    let id = held.id();

    let waiter = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.acquire_async().await.map(|r| r.id()) })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    pool.release(held).unwrap();

    assert_eq!(waiter.await.unwrap().unwrap(), id);
}
