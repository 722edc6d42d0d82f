//! Replica-aware KV adapter: two pools over the same logical store — a
//! primary-only write pool and a replica-preferred read pool — with
//! automatic read-to-write fallback and a failover observer. The two pools
//! share a tenant/tier but never a `PoolKey`'s underlying connections.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use nimbus_core::{PoolKey, Result, Tier};
use nimbus_manager::{ConnectionManager, ExecuteRequest};
use nimbus_resilience::{ConnectionFactory, PoolStats};
use nimbus_telemetry::{EventBus, NimbusEvent, NimbusEventPayload};

use crate::capability::StoreAdapter;
use crate::kv::{DriverResult, KvConnection};

/// Consecutive unhealthy health-watch ticks before a subjectively-down
/// primary is declared objectively down, fixed here at a conservative 3.
const OBJECTIVELY_DOWN_THRESHOLD: u32 = 3;

/// Snapshot returned by `ReplicaAwareKvAdapter::health_check_detail`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReplicaHealth {
    pub healthy: bool,
    pub write_ok: bool,
    pub read_ok: bool,
    pub replication_offset: Option<u64>,
}

/// Replica-aware KV adapter: mutating operations always target the write
/// (primary) pool; read operations prefer the read (replica) pool and
/// fall back to the write pool exactly once on an adapter-level failure.
pub struct ReplicaAwareKvAdapter<C: KvConnection> {
    write_manager: Arc<ConnectionManager<C>>,
    read_manager: Arc<ConnectionManager<C>>,
    write_factory: Arc<dyn ConnectionFactory<C>>,
    read_factory: Arc<dyn ConnectionFactory<C>>,
    tenant_id: String,
    tier: Tier,
    event_bus: EventBus,
    consecutive_unhealthy: AtomicU32,
}

impl<C: KvConnection> ReplicaAwareKvAdapter<C> {
    pub fn new(
        write_manager: Arc<ConnectionManager<C>>,
        read_manager: Arc<ConnectionManager<C>>,
        write_factory: Arc<dyn ConnectionFactory<C>>,
        read_factory: Arc<dyn ConnectionFactory<C>>,
        tenant_id: impl Into<String>,
        tier: Tier,
        event_bus: EventBus,
    ) -> Self {
        Self {
            write_manager,
            read_manager,
            write_factory,
            read_factory,
            tenant_id: tenant_id.into(),
            tier,
            event_bus,
            consecutive_unhealthy: AtomicU32::new(0),
        }
    }

    fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.tenant_id.clone(), self.write_manager.store())
    }

    fn write_request(&self, op_name: &str) -> ExecuteRequest<C> {
        ExecuteRequest::new(self.tenant_id.clone(), self.tier, op_name, self.write_factory.clone())
    }

    /// The read pool is sized at 2x the tier's default bounds since it
    /// absorbs both steady-state reads and write-pool fallback traffic.
    fn read_request(&self, op_name: &str) -> ExecuteRequest<C> {
        let policy = nimbus_core::tier_policy(self.tier);
        ExecuteRequest::new(self.tenant_id.clone(), self.tier, op_name, self.read_factory.clone())
            .with_pool_override(policy.min_pool * 2, policy.max_pool * 2)
    }

    /// Run `f` against the read pool; on any adapter-level failure, log a
    /// `ReplicaReadFallback` event and retry exactly once against the
    /// write pool — never more, to avoid a retry storm.
    async fn read_with_fallback<F, Fut, R>(&self, op_name: &str, f: F) -> Result<R>
    where
        F: Fn(&C) -> Fut + Send + Sync,
        Fut: Future<Output = DriverResult<R>> + Send,
        R: Send,
    {
        match self.read_manager.execute(self.read_request(op_name), |conn| f(conn)).await {
            Ok(value) => Ok(value),
            Err(err) => {
                warn!(tenant_id = %self.tenant_id, op = op_name, error = %err, "read replica failed, falling back to write pool");
                self.event_bus.publish(NimbusEvent::new(
                    self.pool_key().to_string(),
                    NimbusEventPayload::ReplicaReadFallback { op: op_name.to_string() },
                ));
                self.write_manager.execute(self.write_request(op_name), |conn| f(conn)).await
            }
        }
    }

    async fn write_only<F, Fut, R>(&self, op_name: &str, f: F) -> Result<R>
    where
        F: FnOnce(&C) -> Fut + Send,
        Fut: Future<Output = DriverResult<R>> + Send,
        R: Send,
    {
        self.write_manager.execute(self.write_request(op_name), f).await
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        let key = key.to_string();
        self.read_with_fallback("get", move |conn| {
            let key = key.clone();
            async move { conn.get(&key).await }
        })
        .await
    }

    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        let keys = keys.to_vec();
        self.read_with_fallback("mget", move |conn| {
            let keys = keys.clone();
            async move { conn.mget(&keys).await }
        })
        .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        let key = key.to_string();
        self.read_with_fallback("exists", move |conn| {
            let key = key.clone();
            async move { conn.exists(&key).await }
        })
        .await
    }

    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        let key = key.to_string();
        self.read_with_fallback("hgetall", move |conn| {
            let key = key.clone();
            async move { conn.hgetall(&key).await }
        })
        .await
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        let key = key.to_string();
        self.read_with_fallback("lrange", move |conn| {
            let key = key.clone();
            async move { conn.lrange(&key, start, stop).await }
        })
        .await
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        let key = key.to_string();
        self.read_with_fallback("smembers", move |conn| {
            let key = key.clone();
            async move { conn.smembers(&key).await }
        })
        .await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        let (key, value) = (key.to_string(), value.to_string());
        self.write_only("set", move |conn| async move { conn.set(&key, &value).await }).await
    }

    pub async fn del(&self, keys: &[String]) -> Result<u64> {
        let keys = keys.to_vec();
        self.write_only("del", move |conn| async move { conn.del(&keys).await }).await
    }

    pub async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        let key = key.to_string();
        self.write_only("incr", move |conn| async move { conn.incr(&key, by).await }).await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        let (key, field, value) = (key.to_string(), field.to_string(), value.to_string());
        self.write_only("hset", move |conn| async move { conn.hset(&key, &field, &value).await })
            .await
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let (channel, message) = (channel.to_string(), message.to_string());
        self.write_only("publish", move |conn| async move { conn.publish(&channel, &message).await })
            .await
    }

    /// Clear the current database on the primary. The replica will catch
    /// up through normal replication rather than being flushed directly.
    pub async fn flushdb(&self) -> Result<()> {
        warn!(tenant_id = %self.tenant_id, "FLUSHDB issued against the write primary");
        self.write_only("flushdb", |conn| conn.flushdb()).await
    }

    /// Detailed health snapshot covering write-pool health, read-pool
    /// health, and the observed replication offset.
    pub async fn health_check_detail(&self) -> ReplicaHealth {
        let write_key = self.pool_key();
        let read_key = PoolKey::new(self.tenant_id.clone(), self.read_manager.store());

        let write_ok = self
            .write_manager
            .execute(self.write_request("ping"), |conn| conn.ping())
            .await
            .is_ok()
            && self.write_manager.health(&write_key).await;
        let read_ok = self
            .read_manager
            .execute(self.read_request("ping"), |conn| conn.ping())
            .await
            .is_ok()
            && self.read_manager.health(&read_key).await;

        let replication_offset = self
            .read_manager
            .execute(self.read_request("replication_offset"), |conn| conn.replication_offset())
            .await
            .ok()
            .flatten();

        ReplicaHealth {
            healthy: write_ok,
            write_ok,
            read_ok,
            replication_offset,
        }
    }

    /// One tick of the failover state machine: check the write primary's
    /// health and publish the appropriate event as the outage escalates,
    /// walking through `FailoverSubjectivelyDown` ->
    /// `FailoverObjectivelyDown` -> `FailoverSwitchPrimary` ->
    /// `FailoverReconnecting` without prescribing exactly how a new primary
    /// is chosen — that step is left to the embedding application; this
    /// observer only reports the transition through the event bus.
    pub async fn failover_watch_tick(&self) {
        let write_key = self.pool_key();
        let healthy = self.write_manager.health(&write_key).await
            && self
                .write_manager
                .execute(self.write_request("ping"), |conn| conn.ping())
                .await
                .is_ok();

        if healthy {
            self.consecutive_unhealthy.store(0, Ordering::SeqCst);
            return;
        }

        let count = self.consecutive_unhealthy.fetch_add(1, Ordering::SeqCst) + 1;
        if count == 1 {
            warn!(tenant_id = %self.tenant_id, "write primary subjectively down");
            self.event_bus
                .publish(NimbusEvent::new(write_key.to_string(), NimbusEventPayload::FailoverSubjectivelyDown));
        } else if count == OBJECTIVELY_DOWN_THRESHOLD {
            warn!(tenant_id = %self.tenant_id, "write primary objectively down, switching primary");
            self.event_bus
                .publish(NimbusEvent::new(write_key.to_string(), NimbusEventPayload::FailoverObjectivelyDown));
            self.event_bus
                .publish(NimbusEvent::new(write_key.to_string(), NimbusEventPayload::FailoverSwitchPrimary));
            info!(tenant_id = %self.tenant_id, "reconnecting to the new primary");
            self.event_bus
                .publish(NimbusEvent::new(write_key.to_string(), NimbusEventPayload::FailoverReconnecting));
            self.consecutive_unhealthy.store(0, Ordering::SeqCst);
        }
    }

    /// Spawn the background failover-watch loop.
    pub fn spawn_failover_watch(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()>
    where
        C: 'static,
    {
        let adapter = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                adapter.failover_watch_tick().await;
            }
        })
    }
}

#[async_trait]
impl<C: KvConnection> StoreAdapter for ReplicaAwareKvAdapter<C> {
    async fn health_check(&self) -> bool {
        self.health_check_detail().await.healthy
    }

    async fn close(&self) {
        let read_key = PoolKey::new(self.tenant_id.clone(), self.read_manager.store());
        self.write_manager.close(&self.pool_key()).await;
        self.read_manager.close(&read_key).await;
    }

    /// Pool stats for the write pool; the read pool is a distinct
    /// `ConnectionManager` instance and is not folded in here since
    /// `PoolStats` has no room for a second dimension.
    async fn pool_stats(&self) -> PoolStats {
        self.write_manager.pool_stats(&self.pool_key()).await.unwrap_or(PoolStats {
            idle: 0,
            active: 0,
            total: 0,
            max_pool: 0,
        })
    }
}
