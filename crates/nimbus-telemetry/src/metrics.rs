//! Prometheus metrics registry.
//!
//! Series names and labels are fixed; callers never get to introduce a
//! label of their own choosing. Cardinality is bounded by folding any
//! tenant beyond [`TENANT_CARDINALITY_CAP`] into an overflow bucket.

use prometheus::{CounterVec, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry};
use std::collections::HashSet;
use std::sync::{Mutex, OnceLock};

/// Label substituted for any tenant past the cardinality cap.
pub const TENANT_OVERFLOW_LABEL: &str = "_overflow";

/// Maximum number of distinct tenant label values tracked exactly before
/// new tenants fold into [`TENANT_OVERFLOW_LABEL`].
pub const TENANT_CARDINALITY_CAP: usize = 2_000;

static REGISTRY: OnceLock<Registry> = OnceLock::new();
static SEEN_TENANTS: OnceLock<Mutex<HashSet<String>>> = OnceLock::new();

static DB_ACTIVE_CONNECTIONS: OnceLock<GaugeVec> = OnceLock::new();
static DB_POOL_SIZE: OnceLock<GaugeVec> = OnceLock::new();
static CIRCUIT_BREAKER_STATE: OnceLock<GaugeVec> = OnceLock::new();
static DB_QUERIES_TOTAL: OnceLock<CounterVec> = OnceLock::new();
static DB_ERRORS_TOTAL: OnceLock<CounterVec> = OnceLock::new();
static CIRCUIT_BREAKER_OPEN_TOTAL: OnceLock<CounterVec> = OnceLock::new();
static DB_QUERY_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();
static DB_CONNECTION_ACQUIRE_DURATION_SECONDS: OnceLock<HistogramVec> = OnceLock::new();

/// Get or initialize the global registry. Safe to call from multiple
/// crates/threads; registration happens exactly once.
pub fn registry() -> &'static Registry {
    REGISTRY.get_or_init(|| {
        let r = Registry::new();
        register_metrics(&r);
        r
    })
}

fn register_metrics(registry: &Registry) {
    let active = GaugeVec::new(
        Opts::new(
            "db_active_connections",
            "Connections currently checked out of the pool",
        ),
        &["store", "tier", "tenant"],
    )
    .expect("failed to create db_active_connections");
    registry
        .register(Box::new(active.clone()))
        .expect("failed to register db_active_connections");
    DB_ACTIVE_CONNECTIONS.set(active).ok();

    let pool_size = GaugeVec::new(
        Opts::new("db_pool_size", "Pool size broken down by state"),
        &["store", "tier", "state"],
    )
    .expect("failed to create db_pool_size");
    registry
        .register(Box::new(pool_size.clone()))
        .expect("failed to register db_pool_size");
    DB_POOL_SIZE.set(pool_size).ok();

    let breaker_state = GaugeVec::new(
        Opts::new(
            "circuit_breaker_state",
            "0 CLOSED, 1 HALF_OPEN, 2 OPEN",
        ),
        &["store", "tenant"],
    )
    .expect("failed to create circuit_breaker_state");
    registry
        .register(Box::new(breaker_state.clone()))
        .expect("failed to register circuit_breaker_state");
    CIRCUIT_BREAKER_STATE.set(breaker_state).ok();

    let queries = CounterVec::new(
        Opts::new("db_queries_total", "Operations executed through the manager"),
        &["store", "tier", "status"],
    )
    .expect("failed to create db_queries_total");
    registry
        .register(Box::new(queries.clone()))
        .expect("failed to register db_queries_total");
    DB_QUERIES_TOTAL.set(queries).ok();

    let errors = CounterVec::new(
        Opts::new("db_errors_total", "Operations that failed, by error kind"),
        &["store", "tier", "error_kind"],
    )
    .expect("failed to create db_errors_total");
    registry
        .register(Box::new(errors.clone()))
        .expect("failed to register db_errors_total");
    DB_ERRORS_TOTAL.set(errors).ok();

    let breaker_open = CounterVec::new(
        Opts::new("circuit_breaker_open_total", "Breaker trips to OPEN"),
        &["store", "tenant"],
    )
    .expect("failed to create circuit_breaker_open_total");
    registry
        .register(Box::new(breaker_open.clone()))
        .expect("failed to register circuit_breaker_open_total");
    CIRCUIT_BREAKER_OPEN_TOTAL.set(breaker_open).ok();

    let query_duration = HistogramVec::new(
        HistogramOpts::new("db_query_duration_seconds", "Operation latency")
            .buckets(geometric_buckets(0.001, 30.0, 12)),
        &["store", "tier", "op"],
    )
    .expect("failed to create db_query_duration_seconds");
    registry
        .register(Box::new(query_duration.clone()))
        .expect("failed to register db_query_duration_seconds");
    DB_QUERY_DURATION_SECONDS.set(query_duration).ok();

    let acquire_duration = HistogramVec::new(
        HistogramOpts::new(
            "db_connection_acquire_duration_seconds",
            "Time spent waiting for a pooled connection",
        )
        .buckets(geometric_buckets(0.001, 1.0, 8)),
        &["store", "tier"],
    )
    .expect("failed to create db_connection_acquire_duration_seconds");
    registry
        .register(Box::new(acquire_duration.clone()))
        .expect("failed to register db_connection_acquire_duration_seconds");
    DB_CONNECTION_ACQUIRE_DURATION_SECONDS.set(acquire_duration).ok();
}

/// Geometric bucket boundaries from `start` to `end` seconds, `count` steps.
fn geometric_buckets(start: f64, end: f64, count: usize) -> Vec<f64> {
    let ratio = (end / start).powf(1.0 / (count as f64 - 1.0));
    let mut buckets = Vec::with_capacity(count);
    let mut v = start;
    for _ in 0..count {
        buckets.push(v);
        v *= ratio;
    }
    buckets
}

/// Fold `tenant` into the overflow bucket once the cardinality cap is
/// exceeded. The first [`TENANT_CARDINALITY_CAP`] distinct tenants seen
/// keep their own label value for the life of the process.
fn bounded_tenant(tenant: &str) -> String {
    let seen = SEEN_TENANTS.get_or_init(|| Mutex::new(HashSet::new()));
    let mut seen = seen.lock().unwrap_or_else(|e| e.into_inner());
    if seen.contains(tenant) {
        return tenant.to_string();
    }
    if seen.len() >= TENANT_CARDINALITY_CAP {
        return TENANT_OVERFLOW_LABEL.to_string();
    }
    seen.insert(tenant.to_string());
    tenant.to_string()
}

pub fn set_active_connections(store: &str, tier: &str, tenant: &str, count: i64) {
    if let Some(g) = DB_ACTIVE_CONNECTIONS.get() {
        g.with_label_values(&[store, tier, &bounded_tenant(tenant)])
            .set(count as f64);
    }
}

pub fn set_pool_size(store: &str, tier: &str, state: &str, count: i64) {
    if let Some(g) = DB_POOL_SIZE.get() {
        g.with_label_values(&[store, tier, state]).set(count as f64);
    }
}

/// `state` is 0 CLOSED, 1 HALF_OPEN, 2 OPEN.
pub fn set_circuit_breaker_state(store: &str, tenant: &str, state: i64) {
    if let Some(g) = CIRCUIT_BREAKER_STATE.get() {
        g.with_label_values(&[store, &bounded_tenant(tenant)])
            .set(state as f64);
    }
}

pub fn inc_queries(store: &str, tier: &str, status: &str) {
    if let Some(c) = DB_QUERIES_TOTAL.get() {
        c.with_label_values(&[store, tier, status]).inc();
    }
}

pub fn inc_errors(store: &str, tier: &str, error_kind: &str) {
    if let Some(c) = DB_ERRORS_TOTAL.get() {
        c.with_label_values(&[store, tier, error_kind]).inc();
    }
}

pub fn inc_circuit_breaker_open(store: &str, tenant: &str) {
    if let Some(c) = CIRCUIT_BREAKER_OPEN_TOTAL.get() {
        c.with_label_values(&[store, &bounded_tenant(tenant)]).inc();
    }
}

pub fn record_query_duration(store: &str, tier: &str, op: &str, seconds: f64) {
    if let Some(h) = DB_QUERY_DURATION_SECONDS.get() {
        h.with_label_values(&[store, tier, op]).observe(seconds);
    }
}

pub fn record_acquire_duration(store: &str, tier: &str, seconds: f64) {
    if let Some(h) = DB_CONNECTION_ACQUIRE_DURATION_SECONDS.get() {
        h.with_label_values(&[store, tier]).observe(seconds);
    }
}

/// Render the registry in Prometheus text exposition format.
pub fn metrics_text() -> String {
    use prometheus::{Encoder, TextEncoder};

    let encoder = TextEncoder::new();
    let metric_families = registry().gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}
