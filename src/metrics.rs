//! Metrics collection and export for resource pools

use crossbeam::queue::ArrayQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

/// Number of use-time samples kept for the rolling average
pub const USE_TIME_WINDOW: usize = 100;

/// Snapshot of pool counters and gauges
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{FactoryLifecycle, PoolConfig, ResourcePool};
///
/// let pool = ResourcePool::new(FactoryLifecycle::new("n", || Ok(1u32)), PoolConfig::default());
///
/// {
///     let _n = pool.acquire().unwrap();
///     let metrics = pool.metrics();
///     assert_eq!(metrics.total_created, 1);
///     assert_eq!(metrics.active_resources, 1);
/// }
/// assert_eq!(pool.metrics().idle_resources, 1);
/// ```
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolMetrics {
    /// Resources created by the lifecycle
    pub total_created: usize,

    /// Resources passed to the lifecycle's destroy hook
    pub total_destroyed: usize,

    /// Successful acquires
    pub total_acquired: usize,

    /// Acquires served from the idle set
    pub total_reused: usize,

    /// Successful releases
    pub total_released: usize,

    /// Resources discarded after failing activation, deactivation or validation
    pub broken: usize,

    /// Active resources reclaimed by the reaper
    pub leaked: usize,

    /// Acquires that found the pool exhausted
    pub exhausted_events: usize,

    /// Blocked acquires that gave up
    pub wait_timeouts: usize,

    /// Currently checked out
    pub active_resources: usize,

    /// Currently idle
    pub idle_resources: usize,

    /// Callers blocked in `acquire`
    pub waiting: usize,

    /// Active limit, 0 when unbounded
    pub max_active: usize,

    /// Active / max_active (0.0 when unbounded)
    pub utilization: f64,

    /// Average checkout duration over the last samples
    pub average_use_time: Duration,

    /// Longest checkout since the last reset
    pub max_use_time: Duration,

    /// Shortest checkout since the last reset
    pub min_use_time: Duration,
}

impl PoolMetrics {
    /// Export metrics as a HashMap
    pub fn export(&self) -> HashMap<String, String> {
        let mut metrics = HashMap::new();
        metrics.insert("total_created".to_string(), self.total_created.to_string());
        metrics.insert("total_destroyed".to_string(), self.total_destroyed.to_string());
        metrics.insert("total_acquired".to_string(), self.total_acquired.to_string());
        metrics.insert("total_reused".to_string(), self.total_reused.to_string());
        metrics.insert("total_released".to_string(), self.total_released.to_string());
        metrics.insert("broken".to_string(), self.broken.to_string());
        metrics.insert("leaked".to_string(), self.leaked.to_string());
        metrics.insert("exhausted_events".to_string(), self.exhausted_events.to_string());
        metrics.insert("wait_timeouts".to_string(), self.wait_timeouts.to_string());
        metrics.insert("active_resources".to_string(), self.active_resources.to_string());
        metrics.insert("idle_resources".to_string(), self.idle_resources.to_string());
        metrics.insert("waiting".to_string(), self.waiting.to_string());
        metrics.insert("max_active".to_string(), self.max_active.to_string());
        metrics.insert("utilization".to_string(), format!("{:.2}", self.utilization));
        metrics.insert(
            "average_use_time_ms".to_string(),
            self.average_use_time.as_millis().to_string(),
        );
        metrics.insert("max_use_time_ms".to_string(), self.max_use_time.as_millis().to_string());
        metrics.insert("min_use_time_ms".to_string(), self.min_use_time.as_millis().to_string());
        metrics
    }
}

/// Metrics exporter for Prometheus format
pub struct MetricsExporter;

#[cfg(feature = "prometheus")]
impl MetricsExporter {
    /// Export metrics in Prometheus exposition format
    ///
    /// # Examples
    ///
    /// ```
    /// use lifecycle_pool::{FactoryLifecycle, MetricsExporter, PoolConfig, ResourcePool};
    /// use std::collections::HashMap;
    ///
    /// let pool = ResourcePool::new(FactoryLifecycle::new("n", || Ok(1u32)), PoolConfig::default());
    ///
    /// let mut tags = HashMap::new();
    /// tags.insert("service".to_string(), "api".to_string());
    ///
    /// let output = MetricsExporter::export_prometheus(&pool.metrics(), "my_pool", Some(&tags)).unwrap();
    /// assert!(output.contains("resourcepool_resources_active"));
    /// assert!(output.contains("service=\"api\""));
    /// ```
    pub fn export_prometheus(
        metrics: &PoolMetrics,
        pool_name: &str,
        tags: Option<&HashMap<String, String>>,
    ) -> Result<String, prometheus::Error> {
        use prometheus::{Encoder, Gauge, IntCounter, IntGauge, Opts, Registry, TextEncoder};

        let mut labels = HashMap::new();
        labels.insert("pool".to_string(), pool_name.to_string());
        if let Some(tags) = tags {
            labels.extend(tags.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let registry = Registry::new();
        let opts = |name: &str, help: &str| Opts::new(name, help).const_labels(labels.clone());

        let gauge = |name: &str, help: &str, value: usize| -> Result<(), prometheus::Error> {
            let gauge = IntGauge::with_opts(opts(name, help))?;
            gauge.set(value as i64);
            registry.register(Box::new(gauge))
        };
        gauge("resourcepool_resources_active", "Current active resources", metrics.active_resources)?;
        gauge("resourcepool_resources_idle", "Current idle resources", metrics.idle_resources)?;
        gauge("resourcepool_waiters", "Callers blocked in acquire", metrics.waiting)?;

        let utilization = Gauge::with_opts(opts("resourcepool_utilization", "Pool utilization ratio"))?;
        utilization.set(metrics.utilization);
        registry.register(Box::new(utilization))?;

        let use_time = Gauge::with_opts(opts(
            "resourcepool_use_time_average_seconds",
            "Average checkout duration",
        ))?;
        use_time.set(metrics.average_use_time.as_secs_f64());
        registry.register(Box::new(use_time))?;

        let counter = |name: &str, help: &str, value: usize| -> Result<(), prometheus::Error> {
            let counter = IntCounter::with_opts(opts(name, help))?;
            counter.inc_by(value as u64);
            registry.register(Box::new(counter))
        };
        counter("resourcepool_created_total", "Resources created", metrics.total_created)?;
        counter("resourcepool_destroyed_total", "Resources destroyed", metrics.total_destroyed)?;
        counter("resourcepool_acquired_total", "Successful acquires", metrics.total_acquired)?;
        counter("resourcepool_released_total", "Successful releases", metrics.total_released)?;
        counter("resourcepool_broken_total", "Resources discarded as broken", metrics.broken)?;
        counter("resourcepool_leaked_total", "Active resources reclaimed", metrics.leaked)?;
        counter("resourcepool_exhausted_total", "Pool exhausted events", metrics.exhausted_events)?;
        counter("resourcepool_wait_timeouts_total", "Acquire wait timeouts", metrics.wait_timeouts)?;

        let mut buffer = Vec::new();
        TextEncoder::new().encode(&registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

const NO_SAMPLE: u64 = u64::MAX;

fn to_nanos(duration: Duration) -> u64 {
    u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX - 1)
}

/// Internal metrics tracker
pub(crate) struct MetricsTracker {
    pub created: AtomicUsize,
    pub destroyed: AtomicUsize,
    pub acquired: AtomicUsize,
    pub reused: AtomicUsize,
    pub released: AtomicUsize,
    pub broken: AtomicUsize,
    pub leaked: AtomicUsize,
    pub exhausted_events: AtomicUsize,
    pub wait_timeouts: AtomicUsize,
    use_times: ArrayQueue<u64>,
    use_time_sum: AtomicU64,
    max_use: AtomicU64,
    min_use: AtomicU64,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            created: AtomicUsize::new(0),
            destroyed: AtomicUsize::new(0),
            acquired: AtomicUsize::new(0),
            reused: AtomicUsize::new(0),
            released: AtomicUsize::new(0),
            broken: AtomicUsize::new(0),
            leaked: AtomicUsize::new(0),
            exhausted_events: AtomicUsize::new(0),
            wait_timeouts: AtomicUsize::new(0),
            use_times: ArrayQueue::new(USE_TIME_WINDOW),
            use_time_sum: AtomicU64::new(0),
            max_use: AtomicU64::new(0),
            min_use: AtomicU64::new(NO_SAMPLE),
        }
    }

    pub fn incr(counter: &AtomicUsize) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Record how long a resource was checked out
    pub fn record_use(&self, used: Duration) {
        let nanos = to_nanos(used);
        self.use_time_sum.fetch_add(nanos, Ordering::Relaxed);
        if let Some(evicted) = self.use_times.force_push(nanos) {
            self.use_time_sum.fetch_sub(evicted, Ordering::Relaxed);
        }
        self.max_use.fetch_max(nanos, Ordering::Relaxed);
        self.min_use.fetch_min(nanos, Ordering::Relaxed);
    }

    pub fn average_use_time(&self) -> Duration {
        match self.use_times.len() as u64 {
            0 => Duration::ZERO,
            samples => Duration::from_nanos(self.use_time_sum.load(Ordering::Relaxed) / samples),
        }
    }

    pub fn max_use_time(&self) -> Duration {
        Duration::from_nanos(self.max_use.load(Ordering::Relaxed))
    }

    pub fn min_use_time(&self) -> Duration {
        match self.min_use.load(Ordering::Relaxed) {
            NO_SAMPLE => Duration::ZERO,
            nanos => Duration::from_nanos(nanos),
        }
    }

    pub fn reset_max_use_time(&self) -> Duration {
        Duration::from_nanos(self.max_use.swap(0, Ordering::Relaxed))
    }

    pub fn reset_min_use_time(&self) -> Duration {
        match self.min_use.swap(NO_SAMPLE, Ordering::Relaxed) {
            NO_SAMPLE => Duration::ZERO,
            nanos => Duration::from_nanos(nanos),
        }
    }

    pub fn snapshot(&self, active: usize, idle: usize, waiting: usize, max_active: Option<usize>) -> PoolMetrics {
        let load = |counter: &AtomicUsize| counter.load(Ordering::Relaxed);
        let utilization = match max_active {
            Some(max) if max > 0 => active as f64 / max as f64,
            _ => 0.0,
        };

        PoolMetrics {
            total_created: load(&self.created),
            total_destroyed: load(&self.destroyed),
            total_acquired: load(&self.acquired),
            total_reused: load(&self.reused),
            total_released: load(&self.released),
            broken: load(&self.broken),
            leaked: load(&self.leaked),
            exhausted_events: load(&self.exhausted_events),
            wait_timeouts: load(&self.wait_timeouts),
            active_resources: active,
            idle_resources: idle,
            waiting,
            max_active: max_active.unwrap_or(0),
            utilization,
            average_use_time: self.average_use_time(),
            max_use_time: self.max_use_time(),
            min_use_time: self.min_use_time(),
        }
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}
