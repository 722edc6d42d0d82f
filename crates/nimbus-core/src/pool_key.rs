//! `StoreKind` and `PoolKey` — the primary identity for pools, breakers, and
//! connection metadata.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the three backing store families. Extensible by adding an
/// adapter; the manager never needs to know about new variants beyond the
/// label they contribute to metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StoreKind {
    Relational,
    Document,
    Kv,
}

impl StoreKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreKind::Relational => "relational",
            StoreKind::Document => "document",
            StoreKind::Kv => "kv",
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of a dedicated pool/breaker/metadata triple: a (tenant, store)
/// pair. `tenant_id` is an opaque string supplied by the platform DB —
/// Nimbus never interprets it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PoolKey {
    pub tenant_id: String,
    pub store: StoreKind,
}

impl PoolKey {
    pub fn new(tenant_id: impl Into<String>, store: StoreKind) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            store,
        }
    }
}

impl fmt::Display for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.tenant_id, self.store)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn pool_keys_with_same_fields_are_equal_and_hash_equal() {
        let a = PoolKey::new("tenant-1", StoreKind::Kv);
        let b = PoolKey::new("tenant-1", StoreKind::Kv);
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn different_stores_are_different_keys() {
        let a = PoolKey::new("tenant-1", StoreKind::Kv);
        let b = PoolKey::new("tenant-1", StoreKind::Document);
        assert_ne!(a, b);
    }
}
