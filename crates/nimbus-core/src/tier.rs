//! Tier Policy: static per-tier resource envelopes, looked up by `Tier`
//! rather than constructed at each call site.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Paid-plan class controlling resource envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Free,
    Starter,
    Pro,
    Enterprise,
}

impl Tier {
    /// Parse a tier from a platform-DB supplied string. Unknown values fall
    /// back to `Free`.
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "starter" => Tier::Starter,
            "pro" => Tier::Pro,
            "enterprise" => Tier::Enterprise,
            _ => Tier::Free,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Starter => "starter",
            Tier::Pro => "pro",
            Tier::Enterprise => "enterprise",
        }
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Admission priority, informational: used by callers that schedule queued
/// work across tenants, not enforced internally by the pool/breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
    Critical,
}

/// Static per-tier configuration.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TierPolicy {
    pub min_pool: usize,
    pub max_pool: usize,
    pub max_concurrent: usize,
    pub priority: Priority,
    pub query_timeout: Duration,
    pub connect_timeout: Duration,
}

/// Look up the recommended policy for a tier.
pub fn tier_policy(tier: Tier) -> TierPolicy {
    match tier {
        Tier::Free => TierPolicy {
            min_pool: 2,
            max_pool: 5,
            max_concurrent: 20,
            priority: Priority::Low,
            query_timeout: Duration::from_secs(10),
            connect_timeout: Duration::from_secs(5),
        },
        Tier::Starter => TierPolicy {
            min_pool: 5,
            max_pool: 10,
            max_concurrent: 50,
            priority: Priority::Medium,
            query_timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        },
        Tier::Pro => TierPolicy {
            min_pool: 10,
            max_pool: 50,
            max_concurrent: 200,
            priority: Priority::High,
            query_timeout: Duration::from_secs(60),
            connect_timeout: Duration::from_secs(15),
        },
        Tier::Enterprise => TierPolicy {
            min_pool: 20,
            max_pool: 100,
            max_concurrent: 500,
            priority: Priority::Critical,
            query_timeout: Duration::from_secs(120),
            connect_timeout: Duration::from_secs(30),
        },
    }
}

/// Apply an optional per-tenant (min, max) override supplied by the
/// platform DB. The pair is normalized so the smaller value is always
/// `min_pool` and the larger `max_pool`, regardless of call-site order.
pub fn apply_pool_override(mut policy: TierPolicy, override_min_max: Option<(usize, usize)>) -> TierPolicy {
    if let Some((a, b)) = override_min_max {
        let max = a.max(b).max(1);
        let min = a.min(b).min(max);
        policy.min_pool = min;
        policy.max_pool = max;
    }
    policy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_tier_falls_back_to_free() {
        assert_eq!(Tier::from_str_lossy("platinum"), Tier::Free);
        assert_eq!(Tier::from_str_lossy(""), Tier::Free);
    }

    #[test]
    fn known_tiers_parse_case_insensitively() {
        assert_eq!(Tier::from_str_lossy("ENTERPRISE"), Tier::Enterprise);
        assert_eq!(Tier::from_str_lossy("Pro"), Tier::Pro);
    }

    #[test]
    fn enterprise_has_the_widest_envelope() {
        let free = tier_policy(Tier::Free);
        let ent = tier_policy(Tier::Enterprise);
        assert!(ent.max_pool > free.max_pool);
        assert!(ent.max_concurrent > free.max_concurrent);
        assert!(ent.priority > free.priority);
    }

    #[test]
    fn override_clamps_min_to_max() {
        let policy = apply_pool_override(tier_policy(Tier::Free), Some((10, 3)));
        assert_eq!(policy.max_pool, 10);
        assert_eq!(policy.min_pool, 3);
    }
}
