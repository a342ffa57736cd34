// lifecycle_pool demo binary
// The library lives in lib.rs; run the fuller demo with: cargo run --example basic

use lifecycle_pool::{FactoryLifecycle, PoolConfig, ResourcePool};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug")))
        .init();

    println!("=== lifecycle_pool ===");
    println!("Run: cargo run --example basic");
    println!();

    println!("Quick Demo:");
    let pool = ResourcePool::new(
        FactoryLifecycle::new("session", || Ok(String::from("session"))),
        PoolConfig::new().with_max_active(2),
    );

    match pool.acquire() {
        Ok(session) => println!("  Got resource {}: {}", session.id(), *session),
        Err(e) => println!("  Acquire failed: {e}"),
    }

    println!("  Idle after return: {}", pool.num_idle());
    pool.destroy();
}
