//! The error taxonomy shared by every Nimbus crate: a `thiserror` enum, a
//! `Result<T>` alias, and small helper constructors so call sites don't
//! repeat variant construction boilerplate.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, NimbusError>;

/// Every way a Nimbus operation can fail, distinguishing infrastructure
/// failure (breaker/pool), policy limits (timeouts), and caller bugs
/// (config/validation).
#[derive(Debug, Error)]
pub enum NimbusError {
    /// The circuit breaker for this pool key is OPEN and the call was
    /// rejected without touching the underlying store.
    #[error("circuit breaker open for {pool_key}")]
    BreakerOpen { pool_key: String },

    /// A connection could not be obtained from the pool within the
    /// configured acquire budget.
    #[error("timed out acquiring a connection for {pool_key} after {waited:?}")]
    AcquireTimeout { pool_key: String, waited: Duration },

    /// The connection factory failed to establish a new connection.
    #[error("failed to create a connection for {pool_key}: {source}")]
    FactoryFailed {
        pool_key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The work closure exceeded the per-tier query timeout.
    #[error("operation on {pool_key} exceeded its timeout of {timeout:?}")]
    OpTimeout { pool_key: String, timeout: Duration },

    /// The work closure itself returned an error; the connection was
    /// healthy, the call the caller made was not.
    #[error("operation on {pool_key} failed: {source}")]
    WorkError {
        pool_key: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// The pool has been drained and is refusing new acquisitions.
    #[error("pool for {pool_key} has been drained")]
    PoolDrained { pool_key: String },

    /// A connection failed its on-borrow health check and was discarded.
    #[error("connection validation failed for {pool_key}: {reason}")]
    ValidationFailed { pool_key: String, reason: String },

    /// A configuration value was rejected at construction time, before any
    /// pool or breaker was created.
    #[error("invalid configuration: {reason}")]
    ConfigInvalid { reason: String },

    /// A document aggregation pipeline failed validation before any
    /// connection was checked out.
    #[error("aggregation pipeline rejected: {reason}")]
    PipelineRejected { reason: String },
}

impl NimbusError {
    pub fn breaker_open(pool_key: impl Into<String>) -> Self {
        NimbusError::BreakerOpen {
            pool_key: pool_key.into(),
        }
    }

    pub fn acquire_timeout(pool_key: impl Into<String>, waited: Duration) -> Self {
        NimbusError::AcquireTimeout {
            pool_key: pool_key.into(),
            waited,
        }
    }

    pub fn factory_failed(
        pool_key: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        NimbusError::FactoryFailed {
            pool_key: pool_key.into(),
            source: Box::new(source),
        }
    }

    pub fn op_timeout(pool_key: impl Into<String>, timeout: Duration) -> Self {
        NimbusError::OpTimeout {
            pool_key: pool_key.into(),
            timeout,
        }
    }

    pub fn work_error(
        pool_key: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        NimbusError::WorkError {
            pool_key: pool_key.into(),
            source: Box::new(source),
        }
    }

    /// Like [`work_error`](Self::work_error), but for a cause an adapter has
    /// already boxed (e.g. a driver error trait object) — avoids a
    /// pointless double box.
    pub fn work_error_boxed(
        pool_key: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        NimbusError::WorkError {
            pool_key: pool_key.into(),
            source,
        }
    }

    pub fn pool_drained(pool_key: impl Into<String>) -> Self {
        NimbusError::PoolDrained {
            pool_key: pool_key.into(),
        }
    }

    pub fn validation_failed(pool_key: impl Into<String>, reason: impl Into<String>) -> Self {
        NimbusError::ValidationFailed {
            pool_key: pool_key.into(),
            reason: reason.into(),
        }
    }

    pub fn config_invalid(reason: impl Into<String>) -> Self {
        NimbusError::ConfigInvalid {
            reason: reason.into(),
        }
    }

    pub fn pipeline_rejected(reason: impl Into<String>) -> Self {
        NimbusError::PipelineRejected {
            reason: reason.into(),
        }
    }

    /// Whether the failure reflects infrastructure state (breaker/pool) as
    /// opposed to the caller's own work closure failing.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            NimbusError::BreakerOpen { .. }
                | NimbusError::AcquireTimeout { .. }
                | NimbusError::FactoryFailed { .. }
                | NimbusError::PoolDrained { .. }
                | NimbusError::ValidationFailed { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn breaker_open_formats_with_pool_key() {
        let err = NimbusError::breaker_open("tenant-1:kv");
        assert_eq!(err.to_string(), "circuit breaker open for tenant-1:kv");
    }

    #[test]
    fn work_error_is_not_infrastructure() {
        let err = NimbusError::work_error("tenant-1:relational", io::Error::other("boom"));
        assert!(!err.is_infrastructure());
    }

    #[test]
    fn acquire_timeout_is_infrastructure() {
        let err = NimbusError::acquire_timeout("tenant-1:document", Duration::from_millis(100));
        assert!(err.is_infrastructure());
    }
}
