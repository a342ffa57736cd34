//! Error types for the resource pool

use crate::index::ResourceId;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// Error type returned by [`Lifecycle::create`](crate::Lifecycle::create)
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug, Clone)]
pub enum PoolError {
    #[error("Pool is exhausted - maximum active resources reached")]
    PoolExhausted,

    #[error(
        "Timed out after {elapsed:?} waiting for a resource (active: {active}, idle: {idle}, waiting: {waiting})"
    )]
    WaitTimeout {
        active: usize,
        idle: usize,
        waiting: usize,
        elapsed: Duration,
    },

    #[error("Cannot create {object}: {source}")]
    CreationFailed {
        object: String,
        #[source]
        source: Arc<dyn std::error::Error + Send + Sync + 'static>,
    },

    #[error("Newly created {object} failed activation")]
    ActivationFailed { object: String },

    #[error("Creation of {object} is failing ({failures} consecutive failures), not retrying concurrently")]
    BrokenCreate { object: String, failures: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Resource {0} is not active in this pool")]
    UnknownResource(ResourceId),

    #[error("Pool has been stopped")]
    PoolStopped,

    #[error("Operation was cancelled")]
    Cancelled,
}

impl PoolError {
    pub(crate) fn creation_failed(object: &str, cause: BoxError) -> Self {
        PoolError::CreationFailed {
            object: object.to_string(),
            source: Arc::from(cause),
        }
    }
}

pub type PoolResult<T> = Result<T, PoolError>;
