//! Basic usage examples for ResourcePool

use lifecycle_pool::{
    BoxError, ExhaustedAction, FactoryLifecycle, Lifecycle, PoolConfig, PoolError, Reaper, ResourcePool,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;

fn main() {
    tracing_subscriber::fmt().with_env_filter("info").init();

    println!("=== lifecycle_pool - Basic Examples ===\n");

    // Example 1: Pool backed by a closure
    simple_pool();

    // Example 2: Blocking when exhausted
    blocking_pool();

    // Example 3: Failing fast when exhausted
    failing_pool();

    // Example 4: Custom lifecycle with validation
    custom_lifecycle();

    // Example 5: Metrics and health
    metrics_and_health();

    // Example 6: Background reaper
    background_reaper();
}

fn simple_pool() {
    println!("1. Simple Pool:");
    let pool = ResourcePool::new(
        FactoryLifecycle::new("buffer", || Ok(Vec::<u8>::with_capacity(64))),
        PoolConfig::default(),
    );

    {
        let mut buf = pool.acquire().unwrap();
        buf.extend_from_slice(b"hello");
        println!("   Got buffer {} holding {} bytes", buf.id(), buf.len());
        // Buffer goes back to the pool when dropped
    }

    println!("   Idle after return: {}\n", pool.num_idle());
}

fn blocking_pool() {
    println!("2. Blocking Pool:");
    let pool = ResourcePool::new(
        FactoryLifecycle::new("slot", || Ok(())),
        PoolConfig::new()
            .with_max_active(1)
            .with_exhausted_action(ExhaustedAction::Block)
            .with_max_wait(Duration::from_secs(2)),
    );

    let held = pool.acquire().unwrap();
    let waiter = {
        let pool = pool.clone();
        thread::spawn(move || pool.acquire().map(|slot| slot.id()))
    };

    thread::sleep(Duration::from_millis(100));
    println!("   Waiting callers: {}", pool.num_waiting());
    pool.release(held).unwrap();

    match waiter.join().unwrap() {
        Ok(id) => println!("   Waiter got slot {id}\n"),
        Err(e) => println!("   Waiter failed: {e}\n"),
    }
}

fn failing_pool() {
    println!("3. Failing Pool:");
    let pool = ResourcePool::new(
        FactoryLifecycle::new("slot", || Ok(())),
        PoolConfig::new()
            .with_max_active(1)
            .with_exhausted_action(ExhaustedAction::Fail),
    );

    let _held = pool.acquire().unwrap();
    match pool.acquire() {
        Err(PoolError::PoolExhausted) => println!("   Second acquire: exhausted\n"),
        other => println!("   Second acquire: {:?}\n", other.map(|_| ())),
    }
}

struct Connections {
    opened: AtomicUsize,
}

impl Lifecycle<String> for Connections {
    fn create(&self) -> Result<String, BoxError> {
        let n = self.opened.fetch_add(1, Ordering::Relaxed);
        Ok(format!("connection-{n}"))
    }

    fn validate(&self, conn: &String, _for_idle_check: bool) -> bool {
        conn.starts_with("connection-")
    }

    fn destroy(&self, conn: String) {
        println!("   Closing {conn}");
    }

    fn object_name(&self) -> &str {
        "connection"
    }
}

fn custom_lifecycle() {
    println!("4. Custom Lifecycle:");
    let pool = ResourcePool::new(
        Connections {
            opened: AtomicUsize::new(0),
        },
        PoolConfig::new().with_test_on_activate(true).with_max_idle(1),
    );

    let a = pool.acquire().unwrap();
    let b = pool.acquire().unwrap();
    println!("   Using {} and {}", *a, *b);
    pool.release(a).unwrap();
    pool.release(b).unwrap();
    println!("   Idle after return: {}\n", pool.num_idle());
}

fn metrics_and_health() {
    println!("5. Metrics and Health:");
    let pool = ResourcePool::new(FactoryLifecycle::new("n", || Ok(0u64)), PoolConfig::new().with_max_active(2));

    {
        let _a = pool.acquire().unwrap();
        let _b = pool.acquire().unwrap();

        let health = pool.health_status();
        println!("   Health: {}", if health.is_healthy { "Healthy" } else { "Unhealthy" });
        println!("   Utilization: {:.1}%", health.utilization * 100.0);
        println!("   Active: {}, Idle: {}", health.active_resources, health.idle_resources);
    }

    let metrics = pool.metrics().export();
    println!("\n   Metrics:");
    for (key, value) in metrics {
        println!("     {}: {}", key, value);
    }
    println!();
}

fn background_reaper() {
    println!("6. Background Reaper:");
    let runtime = tokio::runtime::Runtime::new().unwrap();
    runtime.block_on(async {
        let pool = ResourcePool::new(
            FactoryLifecycle::new("short-lived", || Ok(())),
            PoolConfig::new().with_max_idle_time(Duration::from_millis(50)),
        );
        pool.prefill(3).unwrap();
        println!("   Idle before sweep: {}", pool.num_idle());

        let reaper = Reaper::spawn(pool.clone(), Duration::from_millis(25));
        tokio::time::sleep(Duration::from_millis(200)).await;
        println!("   Idle after sweep: {}", pool.num_idle());
        reaper.shutdown().await;
    });
}
