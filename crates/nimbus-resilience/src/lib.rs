//! Nimbus Resilience: pure-logic fault tolerance primitives.
//!
//! # Overview
//!
//! - **Circuit Breaker** (C3): a rolling-window breaker that fails fast
//!   once a PoolKey's recent error ratio crosses its threshold.
//! - **Connection Pool** (C4): a generic, bounded pool with validate-on-
//!   borrow and idle/lifetime-based shrink-back.
//!
//! Both are pure logic: no knowledge of SQL, document stores, or wire
//! protocols. `nimbus-adapters` supplies the `ConnectionFactory` impls that
//! connect these primitives to an actual store.
//!
//! # Example
//!
//! ```no_run
//! use nimbus_resilience::{CircuitBreaker, CircuitBreakerConfig};
//! use std::time::Duration;
//!
//! # async fn example() {
//! let breaker = CircuitBreaker::new(CircuitBreakerConfig::default());
//!
//! let (_transitions, result) = breaker
//!     .call(|| async { Ok::<_, std::io::Error>(42) })
//!     .await;
//! let _ = result;
//! # }
//! ```

pub mod circuit_breaker;
pub mod connection_pool;

pub use circuit_breaker::{
    CircuitAdmission, CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitState, CircuitTransition,
};
pub use connection_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats};

/// Re-exports the common set most call sites need.
pub mod prelude {
    pub use crate::circuit_breaker::{CircuitAdmission, CircuitBreaker, CircuitBreakerConfig, CircuitError, CircuitTransition};
    pub use crate::connection_pool::{ConnectionFactory, ConnectionPool, PoolConfig, PoolStats};
}
