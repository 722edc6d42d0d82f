//! Relational adapter: `query`/`execute`/`transaction` over a
//! bound-parameters-only driver surface. `RelationalConnection` is left
//! abstract — the embedding application supplies the concrete driver
//! (e.g. a `tokio-postgres` or `sqlx` connection) behind this trait.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value as SqlValue;

use nimbus_core::{PoolKey, Result, Tier};
use nimbus_resilience::{ConnectionFactory, PoolStats};
use nimbus_manager::{ConnectionManager, ExecuteRequest};

use crate::capability::StoreAdapter;

/// A single result row, column name to value. Kept generic over
/// `serde_json::Value` rather than a driver-specific row type so this crate
/// never depends on a particular SQL driver.
pub type Row = std::collections::HashMap<String, SqlValue>;

/// What a driver-specific connection failure looks like to the adapter.
pub type DriverResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// The capability surface a relational driver connection must expose.
/// Parameters are always bound — `sql` is a literal with placeholders,
/// `params` are bound values, never interpolated into the string by this
/// crate or its caller.
#[async_trait]
pub trait RelationalConnection: Send + Sync + 'static {
    async fn query(&self, sql: &str, params: &[SqlValue]) -> DriverResult<Vec<Row>>;
    async fn execute(&self, sql: &str, params: &[SqlValue]) -> DriverResult<u64>;
    async fn begin_transaction(&self) -> DriverResult<()>;
    async fn commit(&self) -> DriverResult<()>;
    async fn rollback(&self) -> DriverResult<()>;
    async fn ping(&self) -> DriverResult<()>;
}

/// Relational store adapter, layered over one `ConnectionManager<C>` per
/// `StoreKind::Relational` deployment.
pub struct RelationalAdapter<C: RelationalConnection> {
    manager: Arc<ConnectionManager<C>>,
    factory: Arc<dyn ConnectionFactory<C>>,
    tenant_id: String,
    tier: Tier,
}

impl<C: RelationalConnection> RelationalAdapter<C> {
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
        }
    }

    fn request(&self, op_name: &str) -> ExecuteRequest<C> {
        ExecuteRequest::new(self.tenant_id.clone(), self.tier, op_name, self.factory.clone())
    }

    fn pool_key(&self) -> PoolKey {
        PoolKey::new(self.tenant_id.clone(), self.manager.store())
    }

    /// Execute a `SELECT`-shaped statement and return its rows.
    pub async fn query(&self, sql: &str, params: &[SqlValue]) -> Result<Vec<Row>> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.manager
            .execute(self.request("query"), move |conn| {
                let sql = sql.clone();
                let params = params.clone();
                async move { conn.query(&sql, &params).await }
            })
            .await
    }

    /// Execute a non-returning statement (`INSERT`/`UPDATE`/`DELETE`/DDL),
    /// returning the number of rows affected.
    pub async fn execute(&self, sql: &str, params: &[SqlValue]) -> Result<u64> {
        let sql = sql.to_string();
        let params = params.to_vec();
        self.manager
            .execute(self.request("execute"), move |conn| {
                let sql = sql.clone();
                let params = params.clone();
                async move { conn.execute(&sql, &params).await }
            })
            .await
    }

    /// Run `body` inside a transaction: begin before, commit on success,
    /// rollback on any error. Cancellation (the whole call exceeding the
    /// tier's query-timeout or the breaker's op-timeout) destroys the
    /// connection outright rather than issuing an explicit rollback — the
    /// underlying store observes the connection simply drop, which aborts
    /// any open transaction server-side.
    pub async fn transaction<F, Fut, R>(&self, body: F) -> Result<R>
    where
        F: FnOnce(&C) -> Fut + Send,
        Fut: Future<Output = DriverResult<R>> + Send,
        R: Send,
    {
        self.manager
            .execute(self.request("transaction"), move |conn| async move {
                conn.begin_transaction().await?;
                match body(conn).await {
                    Ok(value) => {
                        conn.commit().await?;
                        Ok(value)
                    }
                    Err(err) => {
                        let _ = conn.rollback().await;
                        Err(err)
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl<C: RelationalConnection> StoreAdapter for RelationalAdapter<C> {
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
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeConn {
        rows: Vec<Row>,
        commits: AtomicUsize,
        rollbacks: AtomicUsize,
    }

    #[async_trait]
    impl RelationalConnection for FakeConn {
        async fn query(&self, _sql: &str, _params: &[SqlValue]) -> DriverResult<Vec<Row>> {
            Ok(self.rows.clone())
        }

        async fn execute(&self, _sql: &str, _params: &[SqlValue]) -> DriverResult<u64> {
            Ok(1)
        }

        async fn begin_transaction(&self) -> DriverResult<()> {
            Ok(())
        }

        async fn commit(&self) -> DriverResult<()> {
            self.commits.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn rollback(&self) -> DriverResult<()> {
            self.rollbacks.fetch_add(1, Ordering::SeqCst);
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
                rows: vec![Row::from([("id".to_string(), SqlValue::from(1))])],
                commits: AtomicUsize::new(0),
                rollbacks: AtomicUsize::new(0),
            })
        }

        async fn is_healthy(&self, _conn: &FakeConn) -> bool {
            true
        }
    }

    fn adapter() -> RelationalAdapter<FakeConn> {
        let manager = Arc::new(ConnectionManager::new(
            StoreKind::Relational,
            EventBus::default(),
            Duration::from_secs(300),
        ));
        RelationalAdapter::new(manager, Arc::new(FakeFactory), "tenant-1", Tier::Pro)
    }

    #[tokio::test]
    async fn query_returns_bound_rows() {
        let adapter = adapter();
        let rows = adapter.query("SELECT * FROM t WHERE id = $1", &[SqlValue::from(1)]).await.unwrap();
        assert_eq!(rows.len(), 1);
    }

    #[tokio::test]
    async fn transaction_commits_on_success() {
        let adapter = adapter();
        let result = adapter
            .transaction(|conn| async move {
                conn.execute("UPDATE t SET x = 1", &[]).await?;
                Ok(42)
            })
            .await
            .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn transaction_rolls_back_on_error() {
        let adapter = adapter();
        let result = adapter
            .transaction(|_conn| async move { Err::<(), _>("constraint violation".into()) })
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn health_check_reports_true_for_a_live_store() {
        let adapter = adapter();
        assert!(adapter.health_check().await);
    }
}
