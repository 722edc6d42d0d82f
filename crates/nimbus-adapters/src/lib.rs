//! Store adapters: relational, document and KV capability sets, plus the
//! replica-aware KV adapter, each layered over
//! [`nimbus_manager::ConnectionManager`]. None of these adapters depend on
//! a concrete driver — the embedding application supplies one by
//! implementing the relevant `*Connection` trait.

pub mod aggregation;
pub mod capability;
pub mod document;
pub mod kv;
pub mod relational;
pub mod replica_kv;

pub use aggregation::{estimate_cost, validate_collection_name, validate_database_name, validate_pipeline};
pub use capability::StoreAdapter;
pub use document::{DocumentAdapter, DocumentConnection};
pub use kv::{HotKeyObserver, KvAdapter, KvConnection, NoopHotKeyObserver};
pub use relational::{RelationalAdapter, RelationalConnection};
pub use replica_kv::{ReplicaAwareKvAdapter, ReplicaHealth};

pub mod prelude {
    pub use crate::aggregation::{estimate_cost, validate_collection_name, validate_database_name, validate_pipeline};
    pub use crate::capability::StoreAdapter;
    pub use crate::document::{DocumentAdapter, DocumentConnection};
    pub use crate::kv::{HotKeyObserver, KvAdapter, KvConnection, NoopHotKeyObserver};
    pub use crate::relational::{RelationalAdapter, RelationalConnection};
    pub use crate::replica_kv::{ReplicaAwareKvAdapter, ReplicaHealth};
}
