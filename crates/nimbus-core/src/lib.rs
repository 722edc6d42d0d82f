//! Shared vocabulary for the Nimbus connection manager: tier policy,
//! per-store breaker defaults, pool identity, and the error taxonomy.
//!
//! Every other Nimbus crate depends on this one and nothing else in the
//! workspace; it carries no I/O, no async runtime, no logging — just types
//! and the static tables spec'd in §4.1 and §4.3.

pub mod breaker_policy;
pub mod error;
pub mod pool_key;
pub mod tier;

pub use breaker_policy::{breaker_policy, BreakerPolicy};
pub use error::{NimbusError, Result};
pub use pool_key::{PoolKey, StoreKind};
pub use tier::{apply_pool_override, tier_policy, Priority, Tier, TierPolicy};

/// Re-exports the common set most call sites need.
pub mod prelude {
    pub use crate::{
        apply_pool_override, breaker_policy, tier_policy, BreakerPolicy, NimbusError, PoolKey,
        Priority, Result, StoreKind, Tier, TierPolicy,
    };
}
