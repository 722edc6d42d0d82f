//! Document adapter: the CRUD and aggregation surface of a document store
//! (e.g. MongoDB), layered over the Connection Manager the same way the
//! relational adapter is, plus pipeline validation that runs before any
//! connection is checked out.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use nimbus_core::{PoolKey, Result, Tier};
use nimbus_manager::{ConnectionManager, ExecuteRequest};
use nimbus_resilience::{ConnectionFactory, PoolStats};

use crate::aggregation::validate_pipeline;
use crate::capability::StoreAdapter;

/// What a driver-specific connection failure looks like to the adapter.
pub type DriverResult<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

/// The capability surface a document-store driver connection must expose.
#[async_trait]
pub trait DocumentConnection: Send + Sync + 'static {
    async fn find(&self, collection: &str, filter: Value) -> DriverResult<Vec<Value>>;
    async fn find_one(&self, collection: &str, filter: Value) -> DriverResult<Option<Value>>;
    async fn insert_one(&self, collection: &str, doc: Value) -> DriverResult<Value>;
    async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> DriverResult<Vec<Value>>;
    async fn update_one(&self, collection: &str, filter: Value, update: Value) -> DriverResult<u64>;
    async fn update_many(&self, collection: &str, filter: Value, update: Value) -> DriverResult<u64>;
    async fn delete_one(&self, collection: &str, filter: Value) -> DriverResult<u64>;
    async fn delete_many(&self, collection: &str, filter: Value) -> DriverResult<u64>;
    async fn count_documents(&self, collection: &str, filter: Value) -> DriverResult<u64>;
    async fn find_one_and_update(&self, collection: &str, filter: Value, update: Value) -> DriverResult<Option<Value>>;
    async fn find_one_and_delete(&self, collection: &str, filter: Value) -> DriverResult<Option<Value>>;
    async fn replace_one(&self, collection: &str, filter: Value, replacement: Value) -> DriverResult<u64>;
    async fn bulk_write(&self, collection: &str, operations: Vec<Value>) -> DriverResult<u64>;
    async fn distinct(&self, collection: &str, field: &str, filter: Value) -> DriverResult<Vec<Value>>;
    async fn estimated_count(&self, collection: &str) -> DriverResult<u64>;
    async fn aggregate(&self, collection: &str, pipeline: Vec<Value>) -> DriverResult<Vec<Value>>;
    async fn ping(&self) -> DriverResult<()>;
}

/// Document store adapter, layered over one `ConnectionManager<C>` per
/// `StoreKind::Document` deployment.
pub struct DocumentAdapter<C: DocumentConnection> {
    manager: Arc<ConnectionManager<C>>,
    factory: Arc<dyn ConnectionFactory<C>>,
    tenant_id: String,
    tier: Tier,
}

impl<C: DocumentConnection> DocumentAdapter<C> {
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

    pub async fn find(&self, collection: &str, filter: Value) -> Result<Vec<Value>> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("find"), move |conn| {
                let collection = collection.clone();
                let filter = filter.clone();
                async move { conn.find(&collection, filter).await }
            })
            .await
    }

    pub async fn find_one(&self, collection: &str, filter: Value) -> Result<Option<Value>> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("find_one"), move |conn| {
                let collection = collection.clone();
                let filter = filter.clone();
                async move { conn.find_one(&collection, filter).await }
            })
            .await
    }

    pub async fn insert_one(&self, collection: &str, doc: Value) -> Result<Value> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("insert_one"), move |conn| {
                let collection = collection.clone();
                let doc = doc.clone();
                async move { conn.insert_one(&collection, doc).await }
            })
            .await
    }

    pub async fn insert_many(&self, collection: &str, docs: Vec<Value>) -> Result<Vec<Value>> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("insert_many"), move |conn| {
                let collection = collection.clone();
                let docs = docs.clone();
                async move { conn.insert_many(&collection, docs).await }
            })
            .await
    }

    pub async fn update_one(&self, collection: &str, filter: Value, update: Value) -> Result<u64> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("update_one"), move |conn| {
                let collection = collection.clone();
                let (filter, update) = (filter.clone(), update.clone());
                async move { conn.update_one(&collection, filter, update).await }
            })
            .await
    }

    pub async fn update_many(&self, collection: &str, filter: Value, update: Value) -> Result<u64> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("update_many"), move |conn| {
                let collection = collection.clone();
                let (filter, update) = (filter.clone(), update.clone());
                async move { conn.update_many(&collection, filter, update).await }
            })
            .await
    }

    pub async fn delete_one(&self, collection: &str, filter: Value) -> Result<u64> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("delete_one"), move |conn| {
                let collection = collection.clone();
                let filter = filter.clone();
                async move { conn.delete_one(&collection, filter).await }
            })
            .await
    }

    pub async fn delete_many(&self, collection: &str, filter: Value) -> Result<u64> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("delete_many"), move |conn| {
                let collection = collection.clone();
                let filter = filter.clone();
                async move { conn.delete_many(&collection, filter).await }
            })
            .await
    }

    pub async fn count_documents(&self, collection: &str, filter: Value) -> Result<u64> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("count_documents"), move |conn| {
                let collection = collection.clone();
                let filter = filter.clone();
                async move { conn.count_documents(&collection, filter).await }
            })
            .await
    }

    pub async fn find_one_and_update(&self, collection: &str, filter: Value, update: Value) -> Result<Option<Value>> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("find_one_and_update"), move |conn| {
                let collection = collection.clone();
                let (filter, update) = (filter.clone(), update.clone());
                async move { conn.find_one_and_update(&collection, filter, update).await }
            })
            .await
    }

    pub async fn find_one_and_delete(&self, collection: &str, filter: Value) -> Result<Option<Value>> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("find_one_and_delete"), move |conn| {
                let collection = collection.clone();
                let filter = filter.clone();
                async move { conn.find_one_and_delete(&collection, filter).await }
            })
            .await
    }

    pub async fn replace_one(&self, collection: &str, filter: Value, replacement: Value) -> Result<u64> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("replace_one"), move |conn| {
                let collection = collection.clone();
                let (filter, replacement) = (filter.clone(), replacement.clone());
                async move { conn.replace_one(&collection, filter, replacement).await }
            })
            .await
    }

    pub async fn bulk_write(&self, collection: &str, operations: Vec<Value>) -> Result<u64> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("bulk_write"), move |conn| {
                let collection = collection.clone();
                let operations = operations.clone();
                async move { conn.bulk_write(&collection, operations).await }
            })
            .await
    }

    pub async fn distinct(&self, collection: &str, field: &str, filter: Value) -> Result<Vec<Value>> {
        let collection = collection.to_string();
        let field = field.to_string();
        self.manager
            .execute(self.request("distinct"), move |conn| {
                let collection = collection.clone();
                let field = field.clone();
                let filter = filter.clone();
                async move { conn.distinct(&collection, &field, filter).await }
            })
            .await
    }

    pub async fn estimated_count(&self, collection: &str) -> Result<u64> {
        let collection = collection.to_string();
        self.manager
            .execute(self.request("estimated_count"), move |conn| {
                let collection = collection.clone();
                async move { conn.estimated_count(&collection).await }
            })
            .await
    }

    /// Validate `pipeline` against the allow-list and bounds before ever
    /// consulting the breaker or checking out a connection — a rejected
    /// pipeline never touches the pool.
    pub async fn aggregate(&self, collection: &str, pipeline: Vec<Value>) -> Result<Vec<Value>> {
        validate_pipeline(&Value::Array(pipeline.clone()))?;

        let collection = collection.to_string();
        self.manager
            .execute(self.request("aggregate"), move |conn| {
                let collection = collection.clone();
                let pipeline = pipeline.clone();
                async move { conn.aggregate(&collection, pipeline).await }
            })
            .await
    }
}

#[async_trait]
impl<C: DocumentConnection> StoreAdapter for DocumentAdapter<C> {
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
