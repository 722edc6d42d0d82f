/*!
 * Nimbus - Advanced multi-database connection manager
 *
 * Provides multi-tenant connection management across relational,
 * document and key-value stores, including:
 * - Tier-aware pooling with lazy growth and optional eager warmup
 * - Per-`PoolKey` circuit breaking with a rolling error window
 * - Prometheus metrics and a structured event bus
 * - Connection-string-at-rest encryption and TLS configuration
 * - Relational, document and replica-aware KV store adapters
 *
 * This crate is a facade: it carries no logic of its own, only the
 * re-exports of its workspace members.
 */

pub use nimbus_core::{
    apply_pool_override, breaker_policy, tier_policy, BreakerPolicy, NimbusError, PoolKey, Priority, Result, StoreKind,
    Tier, TierPolicy,
};

pub use nimbus_resilience::{
    CircuitAdmission, CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState, CircuitTransition,
    ConnectionFactory, ConnectionPool, PoolConfig, PoolStats,
};

pub use nimbus_telemetry::{metrics, init_logging, EventBus, LogFormat, LoggingConfig, NimbusEvent, NimbusEventPayload};

pub use nimbus_secrets::{redact_connection_string, redact_credential, DecryptedSecret, EncryptionKey, TlsOptions};

pub use nimbus_manager::{ConnectionManager, ConnectionMetadata, ExecuteRequest};

pub use nimbus_adapters::{
    estimate_cost, validate_collection_name, validate_database_name, validate_pipeline, DocumentAdapter,
    DocumentConnection, HotKeyObserver, KvAdapter, KvConnection, NoopHotKeyObserver, RelationalAdapter,
    RelationalConnection, ReplicaAwareKvAdapter, ReplicaHealth, StoreAdapter,
};

/// Convenience re-export of every public type under one path, for callers
/// who prefer `use nimbus_db::prelude::*;` over naming each type.
pub mod prelude {
    pub use nimbus_core::prelude::*;
    pub use nimbus_resilience::prelude::*;
    pub use nimbus_telemetry::prelude::*;
    pub use nimbus_secrets::prelude::*;
    pub use nimbus_manager::prelude::*;
    pub use nimbus_adapters::prelude::*;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn facade_reexports_are_usable_end_to_end() {
        let pool_key = PoolKey::new("tenant-1", StoreKind::Kv);
        assert_eq!(pool_key.to_string(), "tenant-1:kv");
        assert!(tier_policy(Tier::Free).max_pool > 0);
    }
}
