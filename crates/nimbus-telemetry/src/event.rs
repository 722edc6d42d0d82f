//! Structured event schema and the broadcast bus components publish to.
//! A single struct carries correlation plus a tagged payload enum, covering
//! the breaker/pool/adapter domain.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// A structured event emitted by the breaker, pool, manager, or replica
/// adapter for a single `PoolKey`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NimbusEvent {
    /// `"tenant:store"`, matches `PoolKey`'s `Display`.
    pub pool_key: String,

    /// Event timestamp (UTC).
    pub timestamp: DateTime<Utc>,

    /// Monotonic sequence number, assigned by the bus at emission time.
    /// Used to recover wall-clock emission order when two events land in
    /// the same timestamp tick.
    pub sequence: u64,

    pub payload: NimbusEventPayload,
}

impl NimbusEvent {
    pub fn new(pool_key: impl Into<String>, payload: NimbusEventPayload) -> Self {
        Self {
            pool_key: pool_key.into(),
            timestamp: Utc::now(),
            sequence: 0,
            payload,
        }
    }
}

/// Every event kind a Nimbus component can publish. Tagged for clean JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NimbusEventPayload {
    /// Breaker tripped CLOSED/HALF_OPEN -> OPEN.
    CircuitOpen,
    /// Breaker admitted a HALF_OPEN probe.
    CircuitHalfOpen,
    /// Breaker probe succeeded, returning to CLOSED.
    CircuitClosed,
    /// A single call counted as a failure by the breaker (internal bookkeeping,
    /// not necessarily a state transition).
    CircuitFailure { reason: String },

    /// A pool was constructed for a `PoolKey`.
    PoolCreated { min_pool: usize, max_pool: usize },
    /// A pool was drained and will accept no further acquisitions.
    PoolDrained,
    /// A pooled connection failed validation on borrow and was discarded.
    ConnectionValidationFailed { reason: String },

    /// A replica-read fell through to the write pool.
    ReplicaReadFallback { op: String },
    /// Failover overlay observed the replica as subjectively down (one
    /// observer's view, not yet quorum).
    FailoverSubjectivelyDown,
    /// Failover overlay reached quorum that the replica is down.
    FailoverObjectivelyDown,
    /// A new primary was selected.
    FailoverSwitchPrimary,
    /// The observer reconnected to the overlay.
    FailoverReconnecting,

    /// Extension point for adapter-specific events not worth a dedicated
    /// variant.
    Custom {
        event_type: String,
        data: serde_json::Value,
    },
}

/// Broadcast bus components publish `NimbusEvent`s to. Wraps
/// `tokio::sync::broadcast` the way the rest of the workspace wraps
/// library primitives: a thin named type instead of bare generics at
/// every call site.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<NimbusEvent>,
    sequence: std::sync::Arc<std::sync::atomic::AtomicU64>,
}

impl EventBus {
    /// `capacity` is the channel's ring buffer size; slow subscribers that
    /// fall behind it see `RecvError::Lagged` rather than blocking
    /// publishers.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            sequence: std::sync::Arc::new(std::sync::atomic::AtomicU64::new(0)),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NimbusEvent> {
        self.sender.subscribe()
    }

    /// Publish an event, stamping it with the bus's monotonic sequence
    /// counter. A lack of subscribers is not an error.
    pub fn publish(&self, mut event: NimbusEvent) {
        event.sequence = self
            .sequence
            .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}
