//! # lifecycle_pool
//!
//! Bounded, thread-safe pool for expensive resources such as database or mail
//! server connections.
//!
//! ## Features
//!
//! - Pluggable [`Lifecycle`] for creating, activating, validating and destroying resources
//! - Active and idle limits with `Grow`, `Fail` or `Block` exhaustion policies
//! - Blocking acquire with optional deadline and waiter diagnostics
//! - Fail-fast creation while the backing service is known to be down
//! - Maintenance sweep evicting idle, expired, deprecated and leaked resources
//! - Background [`Reaper`] driving the sweep on a tokio interval
//! - Use-time statistics, metrics and Prometheus export
//! - Hot reconfiguration
//!
//! ## Quick Start
//!
//! ```rust
//! use lifecycle_pool::{FactoryLifecycle, PoolConfig, ResourcePool};
//!
//! let pool = ResourcePool::new(
//!     FactoryLifecycle::new("connection", || Ok(String::from("conn"))),
//!     PoolConfig::new().with_max_active(4),
//! );
//! {
//!     let conn = pool.acquire().unwrap();
//!     println!("Got: {}", *conn);
//!     // Resource goes back to the pool when `conn` goes out of scope
//! }
//! assert_eq!(pool.num_idle(), 1);
//! ```

mod pool;
mod config;
mod lifecycle;
mod index;
mod metrics;
mod health;
mod eviction;
mod breaker;
mod reaper;
mod errors;

pub use pool::{Pooled, ResourcePool};
pub use config::{ExhaustedAction, PoolConfig};
pub use lifecycle::{FactoryLifecycle, Lifecycle};
pub use index::ResourceId;
pub use metrics::{MetricsExporter, PoolMetrics, USE_TIME_WINDOW};
pub use health::HealthStatus;
pub use eviction::EvictionReason;
pub use breaker::CreateState;
pub use reaper::{Reaper, SweepReport};
pub use errors::{BoxError, PoolError, PoolResult};
