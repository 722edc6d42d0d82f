//! KV adapter: the string/hash/list/set/sorted-set/pub-sub surface of a
//! key-value store (e.g. Redis), layered over the Connection Manager the
//! same way the other two adapters are.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tracing::warn;

use nimbus_core::{PoolKey, Result, Tier};
use nimbus_manager::{ConnectionManager, ExecuteRequest};
use nimbus_resilience::{ConnectionFactory, PoolStats};

use crate::capability::StoreAdapter;

/// What a driver-specific connection failure looks like to the adapter.
pub type DriverResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// The capability surface a KV-store driver connection must expose.
#[async_trait]
pub trait KvConnection: Send + Sync + 'static {
    // Strings
    async fn get(&self, key: &str) -> DriverResult<Option<String>>;
    async fn set(&self, key: &str, value: &str) -> DriverResult<()>;
    async fn mget(&self, keys: &[String]) -> DriverResult<Vec<Option<String>>>;
    async fn mset(&self, pairs: &[(String, String)]) -> DriverResult<()>;
    async fn del(&self, keys: &[String]) -> DriverResult<u64>;
    async fn exists(&self, key: &str) -> DriverResult<bool>;
    async fn expire(&self, key: &str, ttl_seconds: u64) -> DriverResult<bool>;
    async fn ttl(&self, key: &str) -> DriverResult<Option<i64>>;
    async fn incr(&self, key: &str, by: i64) -> DriverResult<i64>;
    async fn decr(&self, key: &str, by: i64) -> DriverResult<i64>;

    // Hashes
    async fn hget(&self, key: &str, field: &str) -> DriverResult<Option<String>>;
    async fn hset(&self, key: &str, field: &str, value: &str) -> DriverResult<()>;
    async fn hdel(&self, key: &str, fields: &[String]) -> DriverResult<u64>;
    async fn hgetall(&self, key: &str) -> DriverResult<Vec<(String, String)>>;
    async fn hexists(&self, key: &str, field: &str) -> DriverResult<bool>;

    // Lists
    async fn lpush(&self, key: &str, values: &[String]) -> DriverResult<u64>;
    async fn rpush(&self, key: &str, values: &[String]) -> DriverResult<u64>;
    async fn lpop(&self, key: &str) -> DriverResult<Option<String>>;
    async fn rpop(&self, key: &str) -> DriverResult<Option<String>>;
    async fn lrange(&self, key: &str, start: i64, stop: i64) -> DriverResult<Vec<String>>;
    async fn llen(&self, key: &str) -> DriverResult<u64>;

    // Sets
    async fn sadd(&self, key: &str, members: &[String]) -> DriverResult<u64>;
    async fn srem(&self, key: &str, members: &[String]) -> DriverResult<u64>;
    async fn smembers(&self, key: &str) -> DriverResult<Vec<String>>;
    async fn sismember(&self, key: &str, member: &str) -> DriverResult<bool>;

    // Sorted sets
    async fn zadd(&self, key: &str, members: &[(f64, String)]) -> DriverResult<u64>;
    async fn zrange(&self, key: &str, start: i64, stop: i64) -> DriverResult<Vec<String>>;
    async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> DriverResult<Vec<String>>;

    // Pub/sub
    async fn publish(&self, channel: &str, message: &str) -> DriverResult<u64>;

    // Introspection
    async fn info(&self) -> DriverResult<Value>;
    async fn dbsize(&self) -> DriverResult<u64>;
    async fn scan(&self, cursor: u64, pattern: &str) -> DriverResult<(u64, Vec<String>)>;
    async fn keys(&self, pattern: &str) -> DriverResult<Vec<String>>;

    // Maintenance
    async fn flushdb(&self) -> DriverResult<()>;
    async fn flushall(&self) -> DriverResult<()>;

    async fn ping(&self) -> DriverResult<()>;

    /// Replica lag in store-specific units (e.g. Redis `master_repl_offset`),
    /// if the underlying driver exposes one. `None` on a non-replicated
    /// connection or a driver that doesn't report it. Defaulted so a plain
    /// `KvConnection` impl doesn't have to know about replication at all.
    async fn replication_offset(&self) -> DriverResult<Option<u64>> {
        Ok(None)
    }
}

/// Observes every read/write the adapter performs, keyed by the logical
/// key being touched. Hot-key detection itself is left to the embedding
/// application — this trait is the seam it plugs into.
/// `KvAdapter` calls `observe` on the adapter's own async task, so a slow
/// implementation directly slows down the calling request; heavy
/// aggregation belongs on a channel the implementation owns, not in here.
pub trait HotKeyObserver: Send + Sync {
    fn observe(&self, key: &str, op: &str);
}

/// A `HotKeyObserver` that does nothing, used when no caller supplies one.
pub struct NoopHotKeyObserver;

impl HotKeyObserver for NoopHotKeyObserver {
    fn observe(&self, _key: &str, _op: &str) {}
}

/// KV store adapter, layered over one `ConnectionManager<C>` per
/// `StoreKind::Kv` deployment.
pub struct KvAdapter<C: KvConnection> {
    manager: Arc<ConnectionManager<C>>,
    factory: Arc<dyn ConnectionFactory<C>>,
    tenant_id: String,
    tier: Tier,
    hot_key_observer: Arc<dyn HotKeyObserver>,
}

impl<C: KvConnection> KvAdapter<C> {
    pub fn new(
        manager: Arc<ConnectionManager<C>>,
        factory: Arc<dyn ConnectionFactory<C>>,
        tenant_id: impl Into<String>,
        tier: Tier,
    ) -> Self {
        Self {
            manager,
            factory,
            tenant_id: tenant_id.into(),
            tier,
            hot_key_observer: Arc::new(NoopHotKeyObserver),
        }
    }

    pub fn with_hot_key_observer(mut self, observer: Arc<dyn HotKeyObserver>) -> Self {
        self.hot_key_observer = observer;
        self
    }

    fn request(&self, op_name: &str) -> ExecuteRequest<C> {
        ExecuteRequest::new(self.tenant_id.clone(), self.tier, op_name, self.factory.clone())
    }

    fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.tenant_id.clone(), self.manager.store())
    }

    pub async fn get(&self, key: &str) -> Result<Option<String>> {
        self.hot_key_observer.observe(key, "get");
        let key = key.to_string();
        self.manager
            .execute(self.request("get"), move |conn| {
                let key = key.clone();
                async move { conn.get(&key).await }
            })
            .await
    }

    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        self.hot_key_observer.observe(key, "set");
        let (key, value) = (key.to_string(), value.to_string());
        self.manager
            .execute(self.request("set"), move |conn| {
                let (key, value) = (key.clone(), value.clone());
                async move { conn.set(&key, &value).await }
            })
            .await
    }

    pub async fn mget(&self, keys: &[String]) -> Result<Vec<Option<String>>> {
        for key in keys {
            self.hot_key_observer.observe(key, "mget");
        }
        let keys = keys.to_vec();
        self.manager
            .execute(self.request("mget"), move |conn| {
                let keys = keys.clone();
                async move { conn.mget(&keys).await }
            })
            .await
    }

    pub async fn mset(&self, pairs: &[(String, String)]) -> Result<()> {
        for (key, _) in pairs {
            self.hot_key_observer.observe(key, "mset");
        }
        let pairs = pairs.to_vec();
        self.manager
            .execute(self.request("mset"), move |conn| {
                let pairs = pairs.clone();
                async move { conn.mset(&pairs).await }
            })
            .await
    }

    pub async fn del(&self, keys: &[String]) -> Result<u64> {
        for key in keys {
            self.hot_key_observer.observe(key, "del");
        }
        let keys = keys.to_vec();
        self.manager
            .execute(self.request("del"), move |conn| {
                let keys = keys.clone();
                async move { conn.del(&keys).await }
            })
            .await
    }

    pub async fn exists(&self, key: &str) -> Result<bool> {
        self.hot_key_observer.observe(key, "exists");
        let key = key.to_string();
        self.manager
            .execute(self.request("exists"), move |conn| {
                let key = key.clone();
                async move { conn.exists(&key).await }
            })
            .await
    }

    pub async fn expire(&self, key: &str, ttl_seconds: u64) -> Result<bool> {
        self.hot_key_observer.observe(key, "expire");
        let key = key.to_string();
        self.manager
            .execute(self.request("expire"), move |conn| {
                let key = key.clone();
                async move { conn.expire(&key, ttl_seconds).await }
            })
            .await
    }

    pub async fn ttl(&self, key: &str) -> Result<Option<i64>> {
        self.hot_key_observer.observe(key, "ttl");
        let key = key.to_string();
        self.manager
            .execute(self.request("ttl"), move |conn| {
                let key = key.clone();
                async move { conn.ttl(&key).await }
            })
            .await
    }

    pub async fn incr(&self, key: &str, by: i64) -> Result<i64> {
        self.hot_key_observer.observe(key, "incr");
        let key = key.to_string();
        self.manager
            .execute(self.request("incr"), move |conn| {
                let key = key.clone();
                async move { conn.incr(&key, by).await }
            })
            .await
    }

    pub async fn decr(&self, key: &str, by: i64) -> Result<i64> {
        self.hot_key_observer.observe(key, "decr");
        let key = key.to_string();
        self.manager
            .execute(self.request("decr"), move |conn| {
                let key = key.clone();
                async move { conn.decr(&key, by).await }
            })
            .await
    }

    pub async fn hget(&self, key: &str, field: &str) -> Result<Option<String>> {
        self.hot_key_observer.observe(key, "hget");
        let (key, field) = (key.to_string(), field.to_string());
        self.manager
            .execute(self.request("hget"), move |conn| {
                let (key, field) = (key.clone(), field.clone());
                async move { conn.hget(&key, &field).await }
            })
            .await
    }

    pub async fn hset(&self, key: &str, field: &str, value: &str) -> Result<()> {
        self.hot_key_observer.observe(key, "hset");
        let (key, field, value) = (key.to_string(), field.to_string(), value.to_string());
        self.manager
            .execute(self.request("hset"), move |conn| {
                let (key, field, value) = (key.clone(), field.clone(), value.clone());
                async move { conn.hset(&key, &field, &value).await }
            })
            .await
    }

    pub async fn hdel(&self, key: &str, fields: &[String]) -> Result<u64> {
        self.hot_key_observer.observe(key, "hdel");
        let key = key.to_string();
        let fields = fields.to_vec();
        self.manager
            .execute(self.request("hdel"), move |conn| {
                let key = key.clone();
                let fields = fields.clone();
                async move { conn.hdel(&key, &fields).await }
            })
            .await
    }

    pub async fn hgetall(&self, key: &str) -> Result<Vec<(String, String)>> {
        self.hot_key_observer.observe(key, "hgetall");
        let key = key.to_string();
        self.manager
            .execute(self.request("hgetall"), move |conn| {
                let key = key.clone();
                async move { conn.hgetall(&key).await }
            })
            .await
    }

    pub async fn hexists(&self, key: &str, field: &str) -> Result<bool> {
        self.hot_key_observer.observe(key, "hexists");
        let (key, field) = (key.to_string(), field.to_string());
        self.manager
            .execute(self.request("hexists"), move |conn| {
                let (key, field) = (key.clone(), field.clone());
                async move { conn.hexists(&key, &field).await }
            })
            .await
    }

    pub async fn lpush(&self, key: &str, values: &[String]) -> Result<u64> {
        self.hot_key_observer.observe(key, "lpush");
        let key = key.to_string();
        let values = values.to_vec();
        self.manager
            .execute(self.request("lpush"), move |conn| {
                let key = key.clone();
                let values = values.clone();
                async move { conn.lpush(&key, &values).await }
            })
            .await
    }

    pub async fn rpush(&self, key: &str, values: &[String]) -> Result<u64> {
        self.hot_key_observer.observe(key, "rpush");
        let key = key.to_string();
        let values = values.to_vec();
        self.manager
            .execute(self.request("rpush"), move |conn| {
                let key = key.clone();
                let values = values.clone();
                async move { conn.rpush(&key, &values).await }
            })
            .await
    }

    pub async fn lpop(&self, key: &str) -> Result<Option<String>> {
        self.hot_key_observer.observe(key, "lpop");
        let key = key.to_string();
        self.manager
            .execute(self.request("lpop"), move |conn| {
                let key = key.clone();
                async move { conn.lpop(&key).await }
            })
            .await
    }

    pub async fn rpop(&self, key: &str) -> Result<Option<String>> {
        self.hot_key_observer.observe(key, "rpop");
        let key = key.to_string();
        self.manager
            .execute(self.request("rpop"), move |conn| {
                let key = key.clone();
                async move { conn.rpop(&key).await }
            })
            .await
    }

    pub async fn lrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.hot_key_observer.observe(key, "lrange");
        let key = key.to_string();
        self.manager
            .execute(self.request("lrange"), move |conn| {
                let key = key.clone();
                async move { conn.lrange(&key, start, stop).await }
            })
            .await
    }

    pub async fn llen(&self, key: &str) -> Result<u64> {
        self.hot_key_observer.observe(key, "llen");
        let key = key.to_string();
        self.manager
            .execute(self.request("llen"), move |conn| {
                let key = key.clone();
                async move { conn.llen(&key).await }
            })
            .await
    }

    pub async fn sadd(&self, key: &str, members: &[String]) -> Result<u64> {
        self.hot_key_observer.observe(key, "sadd");
        let key = key.to_string();
        let members = members.to_vec();
        self.manager
            .execute(self.request("sadd"), move |conn| {
                let key = key.clone();
                let members = members.clone();
                async move { conn.sadd(&key, &members).await }
            })
            .await
    }

    pub async fn srem(&self, key: &str, members: &[String]) -> Result<u64> {
        self.hot_key_observer.observe(key, "srem");
        let key = key.to_string();
        let members = members.to_vec();
        self.manager
            .execute(self.request("srem"), move |conn| {
                let key = key.clone();
                let members = members.clone();
                async move { conn.srem(&key, &members).await }
            })
            .await
    }

    pub async fn smembers(&self, key: &str) -> Result<Vec<String>> {
        self.hot_key_observer.observe(key, "smembers");
        let key = key.to_string();
        self.manager
            .execute(self.request("smembers"), move |conn| {
                let key = key.clone();
                async move { conn.smembers(&key).await }
            })
            .await
    }

    pub async fn sismember(&self, key: &str, member: &str) -> Result<bool> {
        self.hot_key_observer.observe(key, "sismember");
        let (key, member) = (key.to_string(), member.to_string());
        self.manager
            .execute(self.request("sismember"), move |conn| {
                let (key, member) = (key.clone(), member.clone());
                async move { conn.sismember(&key, &member).await }
            })
            .await
    }

    pub async fn zadd(&self, key: &str, members: &[(f64, String)]) -> Result<u64> {
        self.hot_key_observer.observe(key, "zadd");
        let key = key.to_string();
        let members = members.to_vec();
        self.manager
            .execute(self.request("zadd"), move |conn| {
                let key = key.clone();
                let members = members.clone();
                async move { conn.zadd(&key, &members).await }
            })
            .await
    }

    pub async fn zrange(&self, key: &str, start: i64, stop: i64) -> Result<Vec<String>> {
        self.hot_key_observer.observe(key, "zrange");
        let key = key.to_string();
        self.manager
            .execute(self.request("zrange"), move |conn| {
                let key = key.clone();
                async move { conn.zrange(&key, start, stop).await }
            })
            .await
    }

    pub async fn zrangebyscore(&self, key: &str, min: f64, max: f64) -> Result<Vec<String>> {
        self.hot_key_observer.observe(key, "zrangebyscore");
        let key = key.to_string();
        self.manager
            .execute(self.request("zrangebyscore"), move |conn| {
                let key = key.clone();
                async move { conn.zrangebyscore(&key, min, max).await }
            })
            .await
    }

    pub async fn publish(&self, channel: &str, message: &str) -> Result<u64> {
        let (channel, message) = (channel.to_string(), message.to_string());
        self.manager
            .execute(self.request("publish"), move |conn| {
                let (channel, message) = (channel.clone(), message.clone());
                async move { conn.publish(&channel, &message).await }
            })
            .await
    }

    pub async fn info(&self) -> Result<Value> {
        self.manager.execute(self.request("info"), |conn| conn.info()).await
    }

    pub async fn dbsize(&self) -> Result<u64> {
        self.manager.execute(self.request("dbsize"), |conn| conn.dbsize()).await
    }

    pub async fn scan(&self, cursor: u64, pattern: &str) -> Result<(u64, Vec<String>)> {
        let pattern = pattern.to_string();
        self.manager
            .execute(self.request("scan"), move |conn| {
                let pattern = pattern.clone();
                async move { conn.scan(cursor, &pattern).await }
            })
            .await
    }

    pub async fn keys(&self, pattern: &str) -> Result<Vec<String>> {
        let pattern = pattern.to_string();
        self.manager
            .execute(self.request("keys"), move |conn| {
                let pattern = pattern.clone();
                async move { conn.keys(&pattern).await }
            })
            .await
    }

    /// Clear the current database. Logged loudly since this is destructive
    /// and almost always a mistake in a multi-tenant deployment.
    pub async fn flushdb(&self) -> Result<()> {
        warn!(tenant_id = %self.tenant_id, "FLUSHDB issued");
        self.manager.execute(self.request("flushdb"), |conn| conn.flushdb()).await
    }

    /// Clear every database on the connected store. Logged loudly for the
    /// same reason as [`Self::flushdb`], at higher severity given the
    /// blast radius spans tenants.
    pub async fn flushall(&self) -> Result<()> {
        warn!(tenant_id = %self.tenant_id, "FLUSHALL issued — clearing every database on this store");
        self.manager.execute(self.request("flushall"), |conn| conn.flushall()).await
    }
}

#[async_trait]
impl<C: KvConnection> StoreAdapter for KvAdapter<C> {
    async fn health_check(&self) -> bool {
        self.manager
            .execute(self.request("health_check"), |conn| conn.ping())
            .await
            .is_ok()
    }

    async fn close(&self) {
        self.manager.close(&self.pool_key()).await;
    }

    async fn pool_stats(&self) -> PoolStats {
        self.manager.pool_stats(&self.pool_key()).await.unwrap_or(PoolStats {
            idle: 0,
            active: 0,
            total: 0,
            max_pool: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nimbus_core::StoreKind;
    use nimbus_telemetry::EventBus;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;
    use std::time::Duration;

    struct FakeConn {
        store: StdMutex<std::collections::HashMap<String, String>>,
    }

    #[async_trait]
    impl KvConnection for FakeConn {
        async fn get(&self, key: &str) -> DriverResult<Option<String>> {
            Ok(self.store.lock().unwrap().get(key).cloned())
        }
        async fn set(&self, key: &str, value: &str) -> DriverResult<()> {
            self.store.lock().unwrap().insert(key.to_string(), value.to_string());
            Ok(())
        }
        async fn mget(&self, keys: &[String]) -> DriverResult<Vec<Option<String>>> {
            let store = self.store.lock().unwrap();
            Ok(keys.iter().map(|k| store.get(k).cloned()).collect())
        }
        async fn mset(&self, pairs: &[(String, String)]) -> DriverResult<()> {
            let mut store = self.store.lock().unwrap();
            for (k, v) in pairs {
                store.insert(k.clone(), v.clone());
            }
            Ok(())
        }
        async fn del(&self, keys: &[String]) -> DriverResult<u64> {
            let mut store = self.store.lock().unwrap();
            Ok(keys.iter().filter(|k| store.remove(*k).is_some()).count() as u64)
        }
        async fn exists(&self, key: &str) -> DriverResult<bool> {
            Ok(self.store.lock().unwrap().contains_key(key))
        }
        async fn expire(&self, _key: &str, _ttl_seconds: u64) -> DriverResult<bool> {
            Ok(true)
        }
        async fn ttl(&self, _key: &str) -> DriverResult<Option<i64>> {
            Ok(Some(60))
        }
        async fn incr(&self, _key: &str, by: i64) -> DriverResult<i64> {
            Ok(by)
        }
        async fn decr(&self, _key: &str, by: i64) -> DriverResult<i64> {
            Ok(-by)
        }
        async fn hget(&self, _key: &str, _field: &str) -> DriverResult<Option<String>> {
            Ok(None)
        }
        async fn hset(&self, _key: &str, _field: &str, _value: &str) -> DriverResult<()> {
            Ok(())
        }
        async fn hdel(&self, _key: &str, _fields: &[String]) -> DriverResult<u64> {
            Ok(0)
        }
        async fn hgetall(&self, _key: &str) -> DriverResult<Vec<(String, String)>> {
            Ok(vec![])
        }
        async fn hexists(&self, _key: &str, _field: &str) -> DriverResult<bool> {
            Ok(false)
        }
        async fn lpush(&self, _key: &str, values: &[String]) -> DriverResult<u64> {
            Ok(values.len() as u64)
        }
        async fn rpush(&self, _key: &str, values: &[String]) -> DriverResult<u64> {
            Ok(values.len() as u64)
        }
        async fn lpop(&self, _key: &str) -> DriverResult<Option<String>> {
            Ok(None)
        }
        async fn rpop(&self, _key: &str) -> DriverResult<Option<String>> {
            Ok(None)
        }
        async fn lrange(&self, _key: &str, _start: i64, _stop: i64) -> DriverResult<Vec<String>> {
            Ok(vec![])
        }
        async fn llen(&self, _key: &str) -> DriverResult<u64> {
            Ok(0)
        }
        async fn sadd(&self, _key: &str, members: &[String]) -> DriverResult<u64> {
            Ok(members.len() as u64)
        }
        async fn srem(&self, _key: &str, _members: &[String]) -> DriverResult<u64> {
            Ok(0)
        }
        async fn smembers(&self, _key: &str) -> DriverResult<Vec<String>> {
            Ok(vec![])
        }
        async fn sismember(&self, _key: &str, _member: &str) -> DriverResult<bool> {
            Ok(false)
        }
        async fn zadd(&self, _key: &str, members: &[(f64, String)]) -> DriverResult<u64> {
            Ok(members.len() as u64)
        }
        async fn zrange(&self, _key: &str, _start: i64, _stop: i64) -> DriverResult<Vec<String>> {
            Ok(vec![])
        }
        async fn zrangebyscore(&self, _key: &str, _min: f64, _max: f64) -> DriverResult<Vec<String>> {
            Ok(vec![])
        }
        async fn publish(&self, _channel: &str, _message: &str) -> DriverResult<u64> {
            Ok(0)
        }
        async fn info(&self) -> DriverResult<Value> {
            Ok(serde_json::json!({"role": "master"}))
        }
        async fn dbsize(&self) -> DriverResult<u64> {
            Ok(self.store.lock().unwrap().len() as u64)
        }
        async fn scan(&self, _cursor: u64, _pattern: &str) -> DriverResult<(u64, Vec<String>)> {
            Ok((0, vec![]))
        }
        async fn keys(&self, _pattern: &str) -> DriverResult<Vec<String>> {
            Ok(vec![])
        }
        async fn flushdb(&self) -> DriverResult<()> {
            self.store.lock().unwrap().clear();
            Ok(())
        }
        async fn flushall(&self) -> DriverResult<()> {
            self.store.lock().unwrap().clear();
            Ok(())
        }
        async fn ping(&self) -> DriverResult<()> {
            Ok(())
        }
    }

    struct FakeFactory;

    #[async_trait]
    impl ConnectionFactory<FakeConn> for FakeFactory {
        async fn create(&self) -> DriverResult<FakeConn> {
            Ok(FakeConn {
                store: StdMutex::new(std::collections::HashMap::new()),
            })
        }
        async fn is_healthy(&self, _conn: &FakeConn) -> bool {
            true
        }
    }

    fn adapter() -> KvAdapter<FakeConn> {
        let manager = Arc::new(ConnectionManager::new(StoreKind::Kv, EventBus::default(), Duration::from_secs(300)));
        KvAdapter::new(manager, Arc::new(FakeFactory), "tenant-1", Tier::Pro)
    }

    #[tokio::test]
    async fn set_then_get_round_trips_a_value() {
        let adapter = adapter();
        adapter.set("k", "v").await.unwrap();
        assert_eq!(adapter.get("k").await.unwrap(), Some("v".to_string()));
    }

    #[tokio::test]
    async fn del_reports_the_number_of_keys_removed() {
        let adapter = adapter();
        adapter.set("a", "1").await.unwrap();
        adapter.set("b", "2").await.unwrap();
        let removed = adapter.del(&["a".to_string(), "missing".to_string()]).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn flushdb_clears_the_store() {
        let adapter = adapter();
        adapter.set("k", "v").await.unwrap();
        adapter.flushdb().await.unwrap();
        assert_eq!(adapter.dbsize().await.unwrap(), 0);
    }

    struct CountingObserver {
        count: AtomicUsize,
    }

    impl HotKeyObserver for CountingObserver {
        fn observe(&self, _key: &str, _op: &str) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn hot_key_observer_is_notified_on_reads_and_writes() {
        let manager = Arc::new(ConnectionManager::new(StoreKind::Kv, EventBus::default(), Duration::from_secs(300)));
        let observer = Arc::new(CountingObserver {
            count: AtomicUsize::new(0),
        });
        let adapter = KvAdapter::new(manager, Arc::new(FakeFactory), "tenant-1", Tier::Pro)
            .with_hot_key_observer(observer.clone());

        adapter.set("k", "v").await.unwrap();
        adapter.get("k").await.unwrap();
        adapter.hset("h", "field", "v").await.unwrap();
        adapter.lpush("l", &["v".to_string()]).await.unwrap();
        adapter.sadd("s", &["v".to_string()]).await.unwrap();

        assert_eq!(observer.count.load(Ordering::SeqCst), 5);
    }
}
