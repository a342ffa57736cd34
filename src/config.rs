//! Pool configuration options

use crate::errors::{PoolError, PoolResult};
use std::time::Duration;

/// What `acquire` does when no idle resource exists and the active limit is reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExhaustedAction {
    /// Ignore the limit and create another resource
    Grow,

    /// Fail immediately with [`PoolError::PoolExhausted`]
    Fail,

    /// Wait until a resource is released or `max_wait` elapses
    #[default]
    Block,
}

/// Configuration for resource pool behavior
///
/// A pool holds one snapshot at a time; [`ResourcePool::set_config`](crate::ResourcePool::set_config)
/// replaces it and the new values apply to every subsequent operation.
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{ExhaustedAction, PoolConfig};
/// use std::time::Duration;
///
/// let config = PoolConfig::new()
///     .with_max_active(16)
///     .with_max_idle(4)
///     .with_max_wait(Duration::from_millis(500))
///     .with_exhausted_action(ExhaustedAction::Block);
///
/// assert_eq!(config.max_active, Some(16));
/// assert_eq!(config.max_idle, 4);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct PoolConfig {
    /// Maximum number of idle resources kept for reuse
    pub max_idle: usize,

    /// Maximum number of resources checked out at once; `None` or `Some(0)` is unbounded
    pub max_active: Option<usize>,

    /// How long a blocked `acquire` waits; `None` or zero waits forever
    pub max_wait: Option<Duration>,

    /// Total lifetime after which a resource is retired; `None` or zero disables
    pub max_lifetime: Option<Duration>,

    /// Idle time after which the reaper evicts an idle resource, and checkout
    /// time after which it reclaims an active one; `None` or zero disables both
    pub max_idle_time: Option<Duration>,

    /// Behavior when the pool is exhausted
    pub exhausted_action: ExhaustedAction,

    /// Validate resources after activation
    pub test_on_activate: bool,

    /// Ask the lifecycle for a full check on every activation (implies validation)
    pub always_check_on_activate: bool,

    /// Validate returned resources instead of deactivating them
    pub test_on_deactivate: bool,

    /// Validate idle resources during the maintenance sweep
    pub test_on_idle: bool,

    /// Record owning threads and checkout backtraces for leak diagnostics
    pub test_threads: bool,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_idle: 8,
            max_active: Some(8),
            max_wait: Some(Duration::from_secs(30)),
            max_lifetime: None,
            max_idle_time: Some(Duration::from_secs(60)),
            exhausted_action: ExhaustedAction::Block,
            test_on_activate: false,
            always_check_on_activate: false,
            test_on_deactivate: false,
            test_on_idle: false,
            test_threads: false,
        }
    }
}

impl PoolConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of idle resources
    pub fn with_max_idle(mut self, max_idle: usize) -> Self {
        self.max_idle = max_idle;
        self
    }

    /// Set the maximum number of active resources
    ///
    /// # Examples
    ///
    /// ```
    /// use lifecycle_pool::PoolConfig;
    ///
    /// let config = PoolConfig::new().with_max_active(3);
    /// assert_eq!(config.active_limit(), Some(3));
    ///
    /// let config = PoolConfig::new().unbounded();
    /// assert_eq!(config.active_limit(), None);
    /// ```
    pub fn with_max_active(mut self, max_active: usize) -> Self {
        self.max_active = Some(max_active);
        self
    }

    /// Remove the active limit
    pub fn unbounded(mut self) -> Self {
        self.max_active = None;
        self
    }

    /// Set how long a blocked acquire may wait; zero waits forever
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = Some(max_wait);
        self
    }

    /// Let blocked acquires wait without a deadline
    pub fn wait_forever(mut self) -> Self {
        self.max_wait = None;
        self
    }

    /// Set the maximum lifetime of a resource
    pub fn with_max_lifetime(mut self, lifetime: Duration) -> Self {
        self.max_lifetime = Some(lifetime);
        self
    }

    /// Set the idle eviction / leak reclamation threshold
    pub fn with_max_idle_time(mut self, idle_time: Duration) -> Self {
        self.max_idle_time = Some(idle_time);
        self
    }

    /// Disable idle eviction and leak reclamation
    pub fn without_idle_timeout(mut self) -> Self {
        self.max_idle_time = None;
        self
    }

    /// Set the exhaustion behavior
    pub fn with_exhausted_action(mut self, action: ExhaustedAction) -> Self {
        self.exhausted_action = action;
        self
    }

    /// Validate resources when they are handed out
    pub fn with_test_on_activate(mut self, enabled: bool) -> Self {
        self.test_on_activate = enabled;
        self
    }

    /// Request a full lifecycle check on every activation
    pub fn with_always_check_on_activate(mut self, enabled: bool) -> Self {
        self.always_check_on_activate = enabled;
        self
    }

    /// Validate resources when they are returned
    pub fn with_test_on_deactivate(mut self, enabled: bool) -> Self {
        self.test_on_deactivate = enabled;
        self
    }

    /// Validate idle resources during maintenance
    pub fn with_test_on_idle(mut self, enabled: bool) -> Self {
        self.test_on_idle = enabled;
        self
    }

    /// Track owning threads for diagnostics
    pub fn with_test_threads(mut self, enabled: bool) -> Self {
        self.test_threads = enabled;
        self
    }

    /// The active limit, with `Some(0)` folded into `None`
    pub fn active_limit(&self) -> Option<usize> {
        self.max_active.filter(|max| *max > 0)
    }

    /// The acquire wait limit, with a zero wait folded into `None`
    pub fn wait_limit(&self) -> Option<Duration> {
        self.max_wait.filter(|d| !d.is_zero())
    }

    /// The resource lifetime limit, with zero folded into `None`
    pub fn lifetime_limit(&self) -> Option<Duration> {
        self.max_lifetime.filter(|d| !d.is_zero())
    }

    /// The idle and checkout time limit, with zero folded into `None`
    pub fn idle_time_limit(&self) -> Option<Duration> {
        self.max_idle_time.filter(|d| !d.is_zero())
    }

    /// Whether activation should be followed by validation
    pub(crate) fn validates_on_activate(&self) -> bool {
        self.test_on_activate || self.always_check_on_activate
    }

    /// Reject configurations that could never serve a request
    pub fn validate(&self) -> PoolResult<()> {
        if self.max_active == Some(0) && self.exhausted_action == ExhaustedAction::Fail {
            return Err(PoolError::InvalidArgument(
                "max_active of 0 with ExhaustedAction::Fail is ambiguous; use unbounded()",
            ));
        }
        Ok(())
    }
}
