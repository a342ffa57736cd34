//! Expiry rules for pooled resources

use crate::config::PoolConfig;
use crate::index::ResourceMeta;
use std::fmt;

/// Why a resource was taken out of circulation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictionReason {
    /// Idle longer than `max_idle_time`
    IdleTimeout,

    /// Older than `max_lifetime`
    LifetimeExceeded,

    /// Flagged deprecated by the application
    Deprecated,

    /// More idle resources than `max_idle` allows
    OverCapacity,

    /// Rejected by the lifecycle's validation
    Invalid,

    /// Checked out longer than `max_idle_time` without being returned
    Leaked,
}

impl fmt::Display for EvictionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let reason = match self {
            EvictionReason::IdleTimeout => "idle timeout",
            EvictionReason::LifetimeExceeded => "lifetime exceeded",
            EvictionReason::Deprecated => "deprecated",
            EvictionReason::OverCapacity => "over idle capacity",
            EvictionReason::Invalid => "failed validation",
            EvictionReason::Leaked => "leaked",
        };
        f.write_str(reason)
    }
}

/// Expiry check for a resource sitting in the idle set
pub(crate) fn idle_expiry(meta: &ResourceMeta, config: &PoolConfig) -> Option<EvictionReason> {
    if meta.deprecated {
        return Some(EvictionReason::Deprecated);
    }
    if config.lifetime_limit().is_some_and(|max| meta.age() > max) {
        return Some(EvictionReason::LifetimeExceeded);
    }
    if config.idle_time_limit().is_some_and(|max| meta.unused_for() > max) {
        return Some(EvictionReason::IdleTimeout);
    }
    None
}

/// Retirement check for a resource being returned
pub(crate) fn return_expiry(meta: &ResourceMeta, config: &PoolConfig) -> Option<EvictionReason> {
    if meta.deprecated {
        return Some(EvictionReason::Deprecated);
    }
    if config.lifetime_limit().is_some_and(|max| meta.age() > max) {
        return Some(EvictionReason::LifetimeExceeded);
    }
    None
}

/// Whether an active resource has been held long enough to count as leaked
pub(crate) fn is_leaked(meta: &ResourceMeta, config: &PoolConfig) -> bool {
    config.idle_time_limit().is_some_and(|max| meta.unused_for() > max)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::ResourceId;
    use std::time::{Duration, Instant};

    fn meta_aged(age: Duration, unused: Duration) -> ResourceMeta {
        let mut meta = ResourceMeta::new(ResourceId(1));
        let now = Instant::now();
        meta.created_at = now - age;
        meta.last_used = now - unused;
        meta
    }

    #[test]
    fn fresh_resource_is_kept() {
        let config = PoolConfig::new()
            .with_max_idle_time(Duration::from_millis(100))
            .with_max_lifetime(Duration::from_millis(600));
        let meta = meta_aged(Duration::from_millis(10), Duration::from_millis(10));
        assert_eq!(idle_expiry(&meta, &config), None);
        assert!(!is_leaked(&meta, &config));
    }

    #[test]
    fn lifetime_wins_over_idle_time() {
        let config = PoolConfig::new()
            .with_max_idle_time(Duration::from_millis(100))
            .with_max_lifetime(Duration::from_millis(200));
        let meta = meta_aged(Duration::from_millis(400), Duration::from_millis(300));
        assert_eq!(idle_expiry(&meta, &config), Some(EvictionReason::LifetimeExceeded));
    }

    #[test]
    fn idle_timeout_disabled_keeps_everything() {
        let config = PoolConfig::new().without_idle_timeout();
        let meta = meta_aged(Duration::from_millis(500), Duration::from_millis(500));
        assert_eq!(idle_expiry(&meta, &config), None);
        assert!(!is_leaked(&meta, &config));
    }

    #[test]
    fn zero_limits_never_expire() {
        let config = PoolConfig::new()
            .with_max_idle_time(Duration::ZERO)
            .with_max_lifetime(Duration::ZERO);
        let meta = meta_aged(Duration::from_millis(500), Duration::from_millis(500));
        assert_eq!(idle_expiry(&meta, &config), None);
        assert_eq!(return_expiry(&meta, &config), None);
        assert!(!is_leaked(&meta, &config));
    }

    #[test]
    fn reasons_display_for_logs() {
        assert_eq!(EvictionReason::Leaked.to_string(), "leaked");
        assert_eq!(EvictionReason::OverCapacity.to_string(), "over idle capacity");
    }

    #[test]
    fn deprecated_resources_are_retired_on_return() {
        let config = PoolConfig::new();
        let mut meta = meta_aged(Duration::ZERO, Duration::ZERO);
        meta.deprecated = true;
        assert_eq!(return_expiry(&meta, &config), Some(EvictionReason::Deprecated));
    }
}
