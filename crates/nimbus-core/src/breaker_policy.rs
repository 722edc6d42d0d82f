//! Per-store circuit breaker defaults.

use crate::pool_key::StoreKind;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Rolling-window breaker configuration. One per `StoreKind`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerPolicy {
    /// Ceiling on a single invocation; exceeding it counts as a failure.
    pub op_timeout: Duration,
    /// Percentage (0-100) of failures within the window that trips the breaker.
    pub error_threshold_percent: u8,
    /// How long OPEN holds before admitting a HALF_OPEN probe.
    pub reset_timeout: Duration,
    /// Total width of the rolling window.
    pub rolling_window: Duration,
    /// Number of buckets the rolling window is divided into.
    pub rolling_buckets: usize,
    /// Minimum number of samples in the window before a trip can fire.
    pub volume_threshold: u32,
}

/// Look up the recommended breaker policy for a store.
pub fn breaker_policy(store: StoreKind) -> BreakerPolicy {
    match store {
        StoreKind::Relational => BreakerPolicy {
            op_timeout: Duration::from_secs(5),
            error_threshold_percent: 50,
            reset_timeout: Duration::from_secs(30),
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
            volume_threshold: 10,
        },
        StoreKind::Document => BreakerPolicy {
            op_timeout: Duration::from_secs(10),
            error_threshold_percent: 60,
            reset_timeout: Duration::from_secs(45),
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
            volume_threshold: 10,
        },
        StoreKind::Kv => BreakerPolicy {
            op_timeout: Duration::from_secs(1),
            error_threshold_percent: 70,
            reset_timeout: Duration::from_secs(15),
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
            volume_threshold: 10,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kv_has_the_tightest_timeout_and_document_the_loosest() {
        let kv = breaker_policy(StoreKind::Kv);
        let doc = breaker_policy(StoreKind::Document);
        let rel = breaker_policy(StoreKind::Relational);

        assert!(kv.op_timeout < rel.op_timeout);
        assert!(rel.op_timeout < doc.op_timeout);
    }
}
