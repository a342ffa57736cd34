//! Health monitoring for resource pools

use crate::breaker::CreateState;
use crate::metrics::PoolMetrics;

/// Health status of a resource pool
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{FactoryLifecycle, PoolConfig, ResourcePool};
///
/// let pool = ResourcePool::new(FactoryLifecycle::new("n", || Ok(1u32)), PoolConfig::default());
///
/// let health = pool.health_status();
/// assert!(health.is_healthy());
/// assert_eq!(health.idle_resources, 0);
/// ```
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Whether the pool is healthy
    pub is_healthy: bool,

    /// Number of warnings detected
    pub warning_count: usize,

    /// Current pool utilization (0.0 to 1.0, 0.0 when unbounded)
    pub utilization: f64,

    /// Idle resources count
    pub idle_resources: usize,

    /// Active resources count
    pub active_resources: usize,

    /// Callers currently blocked in acquire
    pub waiting: usize,

    /// Whether resource creation is currently failing
    pub create_state: CreateState,

    /// Warning messages
    pub warnings: Vec<String>,
}

impl HealthStatus {
    /// Derive a health status from a metrics snapshot
    pub fn new(metrics: &PoolMetrics, create_state: CreateState, stopped: bool) -> Self {
        let mut warnings = Vec::new();
        let mut is_healthy = true;

        if stopped {
            warnings.push("Pool is stopped".to_string());
            is_healthy = false;
        }

        if create_state == CreateState::Broken {
            warnings.push("Resource creation is failing".to_string());
            is_healthy = false;
        }

        if metrics.utilization > 0.9 {
            warnings.push(format!("High utilization: {:.1}%", metrics.utilization * 100.0));
            is_healthy = false;
        }

        if metrics.waiting > 0 {
            warnings.push(format!("{} caller(s) waiting for a resource", metrics.waiting));
        }

        if metrics.leaked > 0 {
            warnings.push(format!("{} leaked resource(s) reclaimed", metrics.leaked));
        }

        Self {
            is_healthy,
            warning_count: warnings.len(),
            utilization: metrics.utilization,
            idle_resources: metrics.idle_resources,
            active_resources: metrics.active_resources,
            waiting: metrics.waiting,
            create_state,
            warnings,
        }
    }

    /// Check if the pool is healthy
    pub fn is_healthy(&self) -> bool {
        self.is_healthy
    }
}
