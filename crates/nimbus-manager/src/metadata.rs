//! `ConnectionMetadata`: the per-`PoolKey` usage record updated after
//! every `execute` outcome.

use std::time::{SystemTime, UNIX_EPOCH};

use nimbus_core::{PoolKey, Tier};

/// Milliseconds since the Unix epoch. Plain `u64` rather than pulling in a
/// date/time crate here — nothing in this crate renders it for humans, it
/// only needs to compare and subtract.
pub type TimestampMillis = u64;

fn now_millis() -> TimestampMillis {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Per-`PoolKey` usage record. `query_count` and `error_count` are
/// monotonically non-decreasing, as is `last_used_at`.
#[derive(Debug, Clone)]
pub struct ConnectionMetadata {
    pub pool_key: PoolKey,
    pub tier: Tier,
    pub created_at: TimestampMillis,
    pub last_used_at: TimestampMillis,
    pub query_count: u64,
    pub error_count: u64,
}

impl ConnectionMetadata {
    pub(crate) fn new(pool_key: PoolKey, tier: Tier) -> Self {
        let now = now_millis();
        Self {
            pool_key,
            tier,
            created_at: now,
            last_used_at: now,
            query_count: 0,
            error_count: 0,
        }
    }

    pub(crate) fn record_outcome(&mut self, success: bool) {
        self.last_used_at = now_millis();
        self.query_count += 1;
        if !success {
            self.error_count += 1;
        }
    }

    /// Whether this `PoolKey` has been idle for at least `idle_timeout` —
    /// the idle-reclaimer's trigger condition.
    pub(crate) fn is_idle(&self, idle_timeout_millis: u64) -> bool {
        now_millis().saturating_sub(self.last_used_at) >= idle_timeout_millis
    }
}
