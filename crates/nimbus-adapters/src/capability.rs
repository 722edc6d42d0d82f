//! The capability set every store adapter shares: health-check, close, and
//! pool-stats, with each adapter diverging in its store-specific operations.
//!
//! The Connection Manager never discriminates among adapters — it only
//! ever sees `execute` calls. This trait is the surface an embedding
//! application programs against when it wants to treat adapters
//! polymorphically (e.g. a readiness probe that iterates every configured
//! adapter without caring which store backs it).

use async_trait::async_trait;
use nimbus_resilience::PoolStats;

/// Capability set common to every store adapter: `health_check`, `close`,
/// `pool_stats`.
#[async_trait]
pub trait StoreAdapter: Send + Sync {
    /// Perform a minimal liveness round-trip against the store. Also
    /// updates `db_active_connections` for the underlying `PoolKey` as a
    /// side effect of exercising the pool.
    async fn health_check(&self) -> bool;

    /// Drain the adapter's underlying pool(s).
    async fn close(&self);

    /// Current pool size breakdown for observability.
    async fn pool_stats(&self) -> PoolStats;
}
