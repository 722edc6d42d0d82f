//! `ConnectionManager<T>`: owns every Pool/Breaker/Metadata triple for a
//! single `StoreKind`, serializes their construction per `PoolKey`, and
//! exposes the one hot-path entrypoint adapters call. A registry lookup
//! connects on miss and caches the result, generalized from a single
//! channel per remote to a full pool/breaker/metadata triple per `PoolKey`,
//! with the breaker wrapping an arbitrary unit of work end to end.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OnceCell};
use tracing::{debug, warn};

use nimbus_core::{apply_pool_override, tier_policy, NimbusError, PoolKey, Result, StoreKind, Tier};
use nimbus_resilience::{CircuitBreaker, CircuitBreakerConfig, ConnectionFactory, ConnectionPool, PoolConfig, PoolStats};
use nimbus_telemetry::{metrics, EventBus, NimbusEvent, NimbusEventPayload};
use nimbus_resilience::CircuitTransition;

use crate::metadata::ConnectionMetadata;

/// Everything `execute` needs beyond the tenant/op name: the tier (governs
/// pool sizing and timeouts), the factory used the first time this
/// `PoolKey` is seen, and an optional per-tenant pool-size override
/// supplied by the platform DB.
pub struct ExecuteRequest<T> {
    pub tenant_id: String,
    pub tier: Tier,
    pub op_name: String,
    pub factory: Arc<dyn ConnectionFactory<T>>,
    pub pool_override: Option<(usize, usize)>,
}

impl<T> ExecuteRequest<T> {
    pub fn new(
        tenant_id: impl Into<String>,
        tier: Tier,
        op_name: impl Into<String>,
        factory: Arc<dyn ConnectionFactory<T>>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            tier,
            op_name: op_name.into(),
            factory,
            pool_override: None,
        }
    }

    pub fn with_pool_override(mut self, min: usize, max: usize) -> Self {
        self.pool_override = Some((min, max));
        self
    }
}

struct PoolKeyEntry<T> {
    pool: ConnectionPool<T>,
    breaker: CircuitBreaker,
    metadata: Mutex<ConnectionMetadata>,
}

/// Owns every Pool/Breaker/Metadata triple for one `StoreKind`.
/// A deployment with three store families runs three `ConnectionManager`
/// instances, one per adapter — the manager itself never discriminates
/// among connection types (specialized here to connection type, since
/// that is what Rust's type system requires it to be generic over).
pub struct ConnectionManager<T: Send + 'static> {
    store: StoreKind,
    breaker_config: CircuitBreakerConfig,
    entries: Mutex<HashMap<PoolKey, Arc<OnceCell<Arc<PoolKeyEntry<T>>>>>>,
    event_bus: EventBus,
    idle_timeout: Duration,
}

impl<T: Send + 'static> ConnectionManager<T> {
    pub fn new(store: StoreKind, event_bus: EventBus, idle_timeout: Duration) -> Self {
        // Force series registration now so every metric `execute` records is
        // counted from the first call, not only after the first scrape.
        metrics::registry();
        Self {
            store,
            breaker_config: nimbus_core::breaker_policy(store).into(),
            entries: Mutex::new(HashMap::new()),
            event_bus,
            idle_timeout,
        }
    }

    /// Get or lazily construct the Pool/Breaker/Metadata triple for
    /// `pool_key`. Concurrent first-use calls for the same key race on the
    /// outer `Mutex` only long enough to install a shared `OnceCell`;
    /// the actual async construction runs inside `get_or_try_init`, so
    /// other keys are never blocked by it — exactly one caller constructs,
    /// the rest wait and reuse the same Pool/Breaker.
    async fn entry_for(
        &self,
        pool_key: &PoolKey,
        tier: Tier,
        pool_config: PoolConfig,
        factory: Arc<dyn ConnectionFactory<T>>,
    ) -> Result<Arc<PoolKeyEntry<T>>> {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries
                .entry(pool_key.clone())
                .or_insert_with(|| Arc::new(OnceCell::new()))
                .clone()
        };

        cell.get_or_try_init(|| async {
            debug!(pool_key = %pool_key, "constructing pool/breaker/metadata");
            let min_pool = pool_config.min_pool;
            let max_pool = pool_config.max_pool;
            let pool = ConnectionPool::new(pool_key.to_string(), factory, pool_config);
            pool.warm_min_pool().await;

            let entry = Arc::new(PoolKeyEntry {
                pool,
                breaker: CircuitBreaker::new(self.breaker_config),
                metadata: Mutex::new(ConnectionMetadata::new(pool_key.clone(), tier)),
            });

            self.event_bus.publish(NimbusEvent::new(
                pool_key.to_string(),
                NimbusEventPayload::PoolCreated { min_pool, max_pool },
            ));
            metrics::set_pool_size(self.store.as_str(), tier.as_str(), "total", min_pool as i64);

            Ok(entry)
        })
        .await
        .cloned()
    }

    fn publish_transition(&self, pool_key: &PoolKey, tier: Tier, transition: CircuitTransition) {
        let (payload, gauge, inc_open) = match transition {
            CircuitTransition::Opened => (NimbusEventPayload::CircuitOpen, 2, true),
            CircuitTransition::HalfOpened => (NimbusEventPayload::CircuitHalfOpen, 1, false),
            CircuitTransition::Closed => (NimbusEventPayload::CircuitClosed, 0, false),
            CircuitTransition::FailureRecorded => {
                self.event_bus.publish(NimbusEvent::new(
                    pool_key.to_string(),
                    NimbusEventPayload::CircuitFailure {
                        reason: "rolling window recorded a failure".to_string(),
                    },
                ));
                return;
            }
        };

        metrics::set_circuit_breaker_state(self.store.as_str(), &pool_key.tenant_id, gauge);
        if inc_open {
            metrics::inc_circuit_breaker_open(self.store.as_str(), &pool_key.tenant_id);
            warn!(pool_key = %pool_key, tier = %tier, "circuit breaker opened");
        }
        self.event_bus.publish(NimbusEvent::new(pool_key.to_string(), payload));
    }

    /// The single hot-path entrypoint: consult the breaker, acquire a
    /// connection under the tier's connect-timeout, run `work` under the
    /// tighter of the tier's query-timeout and the breaker's op-timeout,
    /// then release or destroy and report outcome.
    pub async fn execute<F, Fut, R>(&self, request: ExecuteRequest<T>, work: F) -> Result<R>
    where
        F: FnOnce(&T) -> Fut + Send,
        Fut: Future<Output = std::result::Result<R, Box<dyn std::error::Error + Send + Sync>>> + Send,
        R: Send,
    {
        let policy = apply_pool_override(tier_policy(request.tier), request.pool_override);
        let pool_key = PoolKey::new(request.tenant_id.clone(), self.store);
        let pool_config = PoolConfig {
            min_pool: policy.min_pool,
            max_pool: policy.max_pool,
            idle_timeout: Some(Duration::from_secs(30)),
            max_lifetime: Some(Duration::from_secs(1800)),
        };
        let entry = self
            .entry_for(&pool_key, request.tier, pool_config, request.factory)
            .await?;

        let store = self.store.as_str();
        let tier = request.tier.as_str();

        debug!(pool_key = %pool_key, op = %request.op_name, "acquire-start");
        let admission = match entry.breaker.try_admit().await {
            Ok((admission, transition)) => {
                if let Some(t) = transition {
                    self.publish_transition(&pool_key, request.tier, t);
                }
                admission
            }
            Err(()) => {
                metrics::inc_queries(store, tier, "error");
                metrics::inc_errors(store, tier, "breaker_open");
                return Err(NimbusError::breaker_open(pool_key.to_string()));
            }
        };

        let acquire_start = Instant::now();
        let conn = match entry.pool.acquire(policy.connect_timeout).await {
            Ok(conn) => conn,
            Err(err) => {
                metrics::record_acquire_duration(store, tier, acquire_start.elapsed().as_secs_f64());
                metrics::inc_queries(store, tier, "error");
                metrics::inc_errors(store, tier, error_kind(&err));

                // AcquireTimeout is a capacity concern, not a store-health
                // signal, so a CLOSED-state admission simply drops its
                // `CircuitAdmission` without a
                // matching `record_outcome` call, and the failure never
                // reaches the rolling window. A HALF_OPEN probe still has
                // to release its single admission slot, or the breaker
                // would stay stuck unable to ever admit another probe.
                if admission.is_probe() {
                    if let Some(t) = entry.breaker.record_outcome(admission, false).await {
                        self.publish_transition(&pool_key, request.tier, t);
                    }
                }

                entry.metadata.lock().await.record_outcome(false);
                set_active_connections(&entry, store, tier, &pool_key).await;
                return Err(err);
            }
        };
        metrics::record_acquire_duration(store, tier, acquire_start.elapsed().as_secs_f64());
        set_active_connections(&entry, store, tier, &pool_key).await;
        debug!(pool_key = %pool_key, op = %request.op_name, "acquire-complete op-start");

        let effective_timeout = policy.query_timeout.min(entry.breaker.op_timeout());
        let op_start = Instant::now();
        let outcome = tokio::time::timeout(effective_timeout, work(&conn)).await;
        metrics::record_query_duration(store, tier, &request.op_name, op_start.elapsed().as_secs_f64());

        let result = match outcome {
            Ok(Ok(value)) => {
                entry.pool.release(conn).await;
                if let Some(t) = entry.breaker.record_outcome(admission, true).await {
                    self.publish_transition(&pool_key, request.tier, t);
                }
                entry.metadata.lock().await.record_outcome(true);
                metrics::inc_queries(store, tier, "success");
                Ok(value)
            }
            Ok(Err(source)) => {
                entry.pool.destroy(conn).await;
                if let Some(t) = entry.breaker.record_outcome(admission, false).await {
                    self.publish_transition(&pool_key, request.tier, t);
                }
                entry.metadata.lock().await.record_outcome(false);
                metrics::inc_queries(store, tier, "error");
                metrics::inc_errors(store, tier, "work_error");
                Err(NimbusError::work_error_boxed(pool_key.to_string(), source))
            }
            Err(_elapsed) => {
                entry.pool.destroy(conn).await;
                if let Some(t) = entry.breaker.record_outcome(admission, false).await {
                    self.publish_transition(&pool_key, request.tier, t);
                }
                entry.metadata.lock().await.record_outcome(false);
                metrics::inc_queries(store, tier, "error");
                metrics::inc_errors(store, tier, "op_timeout");
                Err(NimbusError::op_timeout(pool_key.to_string(), effective_timeout))
            }
        };

        debug!(pool_key = %pool_key, op = %request.op_name, "op-complete release");
        set_active_connections(&entry, store, tier, &pool_key).await;
        result
    }

    /// Read-only snapshot of usage for one `PoolKey`.
    pub async fn metadata(&self, pool_key: &PoolKey) -> Option<ConnectionMetadata> {
        let cell = self.entries.lock().await.get(pool_key)?.clone();
        let entry = cell.get()?;
        Some(entry.metadata.lock().await.clone())
    }

    /// Snapshot of every currently tracked `PoolKey`'s usage.
    pub async fn all_metadata(&self) -> Vec<ConnectionMetadata> {
        let cells: Vec<_> = self.entries.lock().await.values().cloned().collect();
        let mut out = Vec::with_capacity(cells.len());
        for cell in cells {
            if let Some(entry) = cell.get() {
                out.push(entry.metadata.lock().await.clone());
            }
        }
        out
    }

    /// Pool size breakdown for one `PoolKey`.
    pub async fn pool_stats(&self, pool_key: &PoolKey) -> Option<PoolStats> {
        let cell = self.entries.lock().await.get(pool_key)?.clone();
        let entry = cell.get()?;
        Some(entry.pool.stats().await)
    }

    /// True iff the breaker for `pool_key` is not OPEN. A `PoolKey` never
    /// seen before is reported healthy — there is nothing unhealthy about
    /// it yet.
    pub async fn health(&self, pool_key: &PoolKey) -> bool {
        let Some(cell) = self.entries.lock().await.get(pool_key).cloned() else {
            return true;
        };
        let Some(entry) = cell.get() else { return true };
        entry.breaker.state().await != nimbus_resilience::CircuitState::Open
    }

    /// Render the process-wide Prometheus text exposition.
    pub fn metrics(&self) -> String {
        metrics::metrics_text()
    }

    /// The `StoreKind` this manager instance is scoped to.
    pub fn store(&self) -> StoreKind {
        self.store
    }

    /// Drain and remove a single `PoolKey`.
    pub async fn close(&self, pool_key: &PoolKey) {
        let cell = {
            let mut entries = self.entries.lock().await;
            entries.remove(pool_key)
        };
        if let Some(cell) = cell {
            if let Some(entry) = cell.get() {
                entry.pool.drain(Duration::from_secs(30)).await;
                self.event_bus
                    .publish(NimbusEvent::new(pool_key.to_string(), NimbusEventPayload::PoolDrained));
            }
        }
    }

    /// Drain and remove every tracked `PoolKey`.
    pub async fn close_all(&self) {
        let keys: Vec<_> = self.entries.lock().await.keys().cloned().collect();
        for key in keys {
            self.close(&key).await;
        }
    }

    /// Drain and remove every `PoolKey` idle for at least `idle_timeout`.
    /// This is the idle-reclaimer's sweep, also callable on demand.
    pub async fn close_idle(&self) {
        let idle_millis = self.idle_timeout.as_millis() as u64;
        let candidates: Vec<_> = {
            let entries = self.entries.lock().await;
            entries.keys().cloned().collect()
        };

        for pool_key in candidates {
            let is_idle = {
                let cell = self.entries.lock().await.get(&pool_key).cloned();
                match cell.and_then(|c| c.get().cloned()) {
                    Some(entry) => entry.metadata.lock().await.is_idle(idle_millis),
                    None => false,
                }
            };
            if is_idle {
                debug!(pool_key = %pool_key, "idle-reclaimer draining pool key");
                self.close(&pool_key).await;
            }
        }
    }

    /// Spawn the background idle-reclaimer loop, which runs periodically
    /// (default every ~5 minutes). The manager must be held behind an
    /// `Arc` so the spawned task can outlive the caller's stack frame.
    pub fn spawn_idle_reclaimer(self: &Arc<Self>, sweep_interval: Duration) -> tokio::task::JoinHandle<()>
    where
        T: 'static,
    {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                ticker.tick().await;
                manager.close_idle().await;
            }
        })
    }
}

fn error_kind(err: &NimbusError) -> &'static str {
    match err {
        NimbusError::AcquireTimeout { .. } => "acquire_timeout",
        NimbusError::FactoryFailed { .. } => "factory_failed",
        NimbusError::PoolDrained { .. } => "pool_drained",
        _ => "unknown",
    }
}

async fn set_active_connections<T: Send + 'static>(entry: &PoolKeyEntry<T>, store: &str, tier: &str, pool_key: &PoolKey) {
    let stats = entry.pool.stats().await;
    metrics::set_active_connections(store, tier, &pool_key.tenant_id, stats.active as i64);
    metrics::set_pool_size(store, tier, "total", stats.total as i64);
    metrics::set_pool_size(store, tier, "available", stats.idle as i64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use nimbus_core::StoreKind;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone)]
    struct FakeConn(usize);

    struct FakeFactory {
        counter: AtomicUsize,
        fail: bool,
    }

    impl FakeFactory {
        fn ok() -> Arc<Self> {
            Arc::new(Self {
                counter: AtomicUsize::new(0),
                fail: false,
            })
        }
    }

    #[async_trait]
    impl ConnectionFactory<FakeConn> for FakeFactory {
        async fn create(&self) -> std::result::Result<FakeConn, Box<dyn std::error::Error + Send + Sync>> {
            if self.fail {
                return Err("factory configured to fail".into());
            }
            Ok(FakeConn(self.counter.fetch_add(1, Ordering::SeqCst)))
        }

        async fn is_healthy(&self, _conn: &FakeConn) -> bool {
            true
        }
    }

    fn manager() -> ConnectionManager<FakeConn> {
        ConnectionManager::new(StoreKind::Kv, EventBus::default(), Duration::from_secs(300))
    }

    #[tokio::test]
    async fn successful_execute_updates_metadata_and_returns_the_value() {
        let manager = manager();
        let request = ExecuteRequest::new("tenant-1", Tier::Free, "get", FakeFactory::ok());

        let value = manager
            .execute(request, |conn| {
                let id = conn.0;
                async move { Ok::<_, Box<dyn std::error::Error + Send + Sync>>(id) }
            })
            .await
            .unwrap();
        assert_eq!(value, 0);

        let pool_key = PoolKey::new("tenant-1", StoreKind::Kv);
        let metadata = manager.metadata(&pool_key).await.unwrap();
        assert_eq!(metadata.query_count, 1);
        assert_eq!(metadata.error_count, 0);
        assert!(manager.health(&pool_key).await);
    }

    #[tokio::test]
    async fn work_error_is_surfaced_and_counted_as_a_breaker_failure() {
        let manager = manager();
        let request = ExecuteRequest::new("tenant-1", Tier::Free, "get", FakeFactory::ok());

        let result = manager
            .execute(request, |_conn| async {
                Err::<(), Box<dyn std::error::Error + Send + Sync>>("boom".into())
            })
            .await;
        assert!(matches!(result, Err(NimbusError::WorkError { .. })));

        let pool_key = PoolKey::new("tenant-1", StoreKind::Kv);
        let metadata = manager.metadata(&pool_key).await.unwrap();
        assert_eq!(metadata.error_count, 1);
    }

    #[tokio::test]
    async fn concurrent_first_use_constructs_exactly_one_pool() {
        let manager = Arc::new(manager());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                let request = ExecuteRequest::new("tenant-race", Tier::Free, "get", FakeFactory::ok());
                manager
                    .execute(request, |conn| {
                        let id = conn.0;
                        async move { Ok::<_, Box<dyn std::error::Error + Send + Sync>>(id) }
                    })
                    .await
                    .unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let pool_key = PoolKey::new("tenant-race", StoreKind::Kv);
        let metadata = manager.metadata(&pool_key).await.unwrap();
        assert_eq!(metadata.query_count, 8);
    }

    #[tokio::test]
    async fn close_drains_and_forgets_the_pool_key() {
        let manager = manager();
        let request = ExecuteRequest::new("tenant-1", Tier::Free, "get", FakeFactory::ok());
        manager
            .execute(request, |conn| {
                let id = conn.0;
                async move { Ok::<_, Box<dyn std::error::Error + Send + Sync>>(id) }
            })
            .await
            .unwrap();

        let pool_key = PoolKey::new("tenant-1", StoreKind::Kv);
        assert!(manager.metadata(&pool_key).await.is_some());

        manager.close(&pool_key).await;
        assert!(manager.metadata(&pool_key).await.is_none());
    }

    #[tokio::test]
    async fn breaker_open_rejects_without_touching_the_pool() {
        let manager = manager();
        let pool_key = PoolKey::new("tenant-flaky", StoreKind::Kv);

        for _ in 0..20 {
            let request = ExecuteRequest::new("tenant-flaky", Tier::Free, "get", FakeFactory::ok());
            let _ = manager
                .execute(request, |_conn| async {
                    Err::<Infallible, Box<dyn std::error::Error + Send + Sync>>("boom".into())
                })
                .await;
        }

        assert!(!manager.health(&pool_key).await);

        let request = ExecuteRequest::new("tenant-flaky", Tier::Free, "get", FakeFactory::ok());
        let result = manager
            .execute(request, |conn| {
                let id = conn.0;
                async move { Ok::<_, Box<dyn std::error::Error + Send + Sync>>(id) }
            })
            .await;
        assert!(matches!(result, Err(NimbusError::BreakerOpen { .. })));
    }

    #[tokio::test]
    async fn idle_reclaim_drains_the_pool_key_and_a_later_execute_rebuilds_it() {
        let manager = ConnectionManager::new(StoreKind::Kv, EventBus::default(), Duration::from_millis(50));
        let pool_key = PoolKey::new("tenant-1", StoreKind::Kv);

        let request = ExecuteRequest::new("tenant-1", Tier::Free, "get", FakeFactory::ok());
        manager
            .execute(request, |conn| {
                let id = conn.0;
                async move { Ok::<_, Box<dyn std::error::Error + Send + Sync>>(id) }
            })
            .await
            .unwrap();
        assert!(manager.metadata(&pool_key).await.is_some());

        tokio::time::sleep(Duration::from_millis(60)).await;
        manager.close_idle().await;
        assert!(manager.metadata(&pool_key).await.is_none());

        let request = ExecuteRequest::new("tenant-1", Tier::Free, "get", FakeFactory::ok());
        let value = manager
            .execute(request, |conn| {
                let id = conn.0;
                async move { Ok::<_, Box<dyn std::error::Error + Send + Sync>>(id) }
            })
            .await
            .unwrap();
        assert_eq!(value, 0);
        assert!(manager.metadata(&pool_key).await.is_some());
    }
}
