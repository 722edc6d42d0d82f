//! Nimbus telemetry: the Prometheus metrics registry (C2) and the
//! structured event bus components publish breaker/pool state changes to.
//!
//! ## Prometheus Metrics
//!
//! ```
//! use nimbus_telemetry::metrics;
//!
//! metrics::inc_queries("relational", "pro", "success");
//! metrics::record_query_duration("relational", "pro", "select", 0.012);
//!
//! let text = metrics::metrics_text();
//! assert!(text.contains("db_queries_total"));
//! ```
//!
//! ## Event Bus
//!
//! ```
//! use nimbus_telemetry::{EventBus, NimbusEvent, NimbusEventPayload};
//!
//! let bus = EventBus::default();
//! let _subscriber = bus.subscribe();
//! bus.publish(NimbusEvent::new("tenant-1:kv", NimbusEventPayload::CircuitOpen));
//! ```

pub mod event;
pub mod logging;
pub mod metrics;

pub use event::{EventBus, NimbusEvent, NimbusEventPayload};
pub use logging::{init_logging, LogFormat, LoggingConfig};

/// Re-exports the common set most call sites need.
pub mod prelude {
    pub use crate::event::{EventBus, NimbusEvent, NimbusEventPayload};
    pub use crate::logging::{init_logging, LogFormat, LoggingConfig};
    pub use crate::metrics;
}
