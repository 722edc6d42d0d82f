//! Nimbus Manager: the Connection Manager.
//!
//! `ConnectionManager<T>` owns every Pool/Breaker/Metadata triple for a
//! single `StoreKind`, serializes their construction per `PoolKey`, and
//! exposes `execute` — the one hot-path entrypoint every store adapter in
//! `nimbus-adapters` is built on top of.
//!
//! # Example
//!
//! ```no_run
//! use nimbus_core::{StoreKind, Tier};
//! use nimbus_manager::{ConnectionManager, ExecuteRequest};
//! use nimbus_telemetry::EventBus;
//! use std::time::Duration;
//!
//! # async fn example(factory: std::sync::Arc<dyn nimbus_resilience::ConnectionFactory<()>>) -> nimbus_core::Result<()> {
//! let manager = ConnectionManager::new(StoreKind::Kv, EventBus::default(), Duration::from_secs(300));
//! let request = ExecuteRequest::new("tenant-1", Tier::Pro, "get", factory);
//! let _value: u32 = manager.execute(request, |_conn| async { Ok(7) }).await?;
//! # Ok(())
//! # }
//! ```

pub mod manager;
pub mod metadata;

pub use manager::{ConnectionManager, ExecuteRequest};
pub use metadata::ConnectionMetadata;

/// Re-exports the common set most call sites need.
pub mod prelude {
    pub use crate::manager::{ConnectionManager, ExecuteRequest};
    pub use crate::metadata::ConnectionMetadata;
}
