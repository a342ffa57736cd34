//! Pluggable resource lifecycles

use crate::errors::BoxError;

/// Strategy for creating, checking and destroying pooled resources
///
/// Every hook runs outside the pool's lock, so slow I/O in one of them never
/// stalls other pool operations. All hooks except [`create`](Lifecycle::create)
/// and [`object_name`](Lifecycle::object_name) have permissive defaults.
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{BoxError, Lifecycle};
///
/// struct Connections;
///
/// impl Lifecycle<String> for Connections {
///     fn create(&self) -> Result<String, BoxError> {
///         Ok("conn".to_string())
///     }
///
///     fn validate(&self, conn: &String, _for_idle_check: bool) -> bool {
///         !conn.is_empty()
///     }
///
///     fn object_name(&self) -> &str {
///         "connection"
///     }
/// }
/// ```
pub trait Lifecycle<T>: Send + Sync {
    /// Construct a new resource
    fn create(&self) -> Result<T, BoxError>;

    /// Prepare a resource for a caller; `false` discards it
    fn activate(&self, _resource: &mut T, _always_check: bool) -> bool {
        true
    }

    /// Reset a returned resource; `false` discards it
    fn deactivate(&self, _resource: &mut T) -> bool {
        true
    }

    /// Check that a resource is still usable
    fn validate(&self, _resource: &T, _for_idle_check: bool) -> bool {
        true
    }

    /// Release whatever the resource holds
    fn destroy(&self, resource: T) {
        drop(resource);
    }

    /// Name used in diagnostics and log events
    fn object_name(&self) -> &str;
}

/// Lifecycle built from closures
///
/// Only the factory is required; validation defaults to accepting everything.
///
/// # Examples
///
/// ```
/// use lifecycle_pool::{FactoryLifecycle, Lifecycle};
///
/// let lifecycle = FactoryLifecycle::new("buffer", || Ok(Vec::<u8>::with_capacity(1024)))
///     .with_validation(|buf: &Vec<u8>| buf.capacity() >= 1024);
///
/// let buf = lifecycle.create().unwrap();
/// assert!(lifecycle.validate(&buf, false));
/// ```
pub struct FactoryLifecycle<T> {
    name: String,
    factory: Box<dyn Fn() -> Result<T, BoxError> + Send + Sync>,
    validation: Option<Box<dyn Fn(&T) -> bool + Send + Sync>>,
    reset: Option<Box<dyn Fn(&mut T) + Send + Sync>>,
}

impl<T> FactoryLifecycle<T> {
    /// Create a lifecycle from a fallible factory
    pub fn new<F>(name: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> Result<T, BoxError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            validation: None,
            reset: None,
        }
    }

    /// Check resources with `validation` on activation, return and idle sweeps
    pub fn with_validation<V>(mut self, validation: V) -> Self
    where
        V: Fn(&T) -> bool + Send + Sync + 'static,
    {
        self.validation = Some(Box::new(validation));
        self
    }

    /// Reset resources with `reset` whenever they are returned
    pub fn with_reset<R>(mut self, reset: R) -> Self
    where
        R: Fn(&mut T) + Send + Sync + 'static,
    {
        self.reset = Some(Box::new(reset));
        self
    }
}

impl<T> Lifecycle<T> for FactoryLifecycle<T> {
    fn create(&self) -> Result<T, BoxError> {
        (self.factory)()
    }

    fn deactivate(&self, resource: &mut T) -> bool {
        if let Some(reset) = &self.reset {
            reset(resource);
        }
        true
    }

    fn validate(&self, resource: &T, _for_idle_check: bool) -> bool {
        self.validation.as_ref().is_none_or(|validate| validate(resource))
    }

    fn object_name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn factory_lifecycle_resets_on_deactivate() {
        let lifecycle = FactoryLifecycle::new("buf", || Ok(vec![1u8, 2, 3])).with_reset(|v: &mut Vec<u8>| v.clear());
        let mut buf = lifecycle.create().unwrap();
        assert!(lifecycle.deactivate(&mut buf));
        assert!(buf.is_empty());
    }

    #[test]
    fn factory_errors_surface() {
        let lifecycle: FactoryLifecycle<u32> = FactoryLifecycle::new("flaky", || Err("down".into()));
        assert!(lifecycle.create().is_err());
        assert_eq!(lifecycle.object_name(), "flaky");
    }
}
