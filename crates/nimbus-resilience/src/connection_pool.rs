//! Generic connection pool.
//!
//! A semaphore gates capacity — tokio's `Semaphore` already grants permits
//! FIFO, which is what gives callers wait-queue fairness without a
//! hand-rolled queue. Idle connections are validated on borrow within a
//! fixed budget; anything that fails validation or has expired is
//! destroyed and acquisition continues.

use async_trait::async_trait;
use nimbus_core::error::{NimbusError, Result};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, Semaphore};

/// Validation must complete within this budget.
const VALIDATE_BUDGET: Duration = Duration::from_millis(100);

/// Pool sizing and lifetime configuration.
#[derive(Debug, Clone)]
pub struct PoolConfig {
    pub min_pool: usize,
    pub max_pool: usize,
    pub idle_timeout: Option<Duration>,
    pub max_lifetime: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_pool: 2,
            max_pool: 10,
            idle_timeout: Some(Duration::from_secs(300)),
            max_lifetime: Some(Duration::from_secs(1800)),
        }
    }
}

struct PooledConnection<T> {
    conn: T,
    created_at: Instant,
    last_used: Instant,
}

impl<T> PooledConnection<T> {
    fn new(conn: T) -> Self {
        let now = Instant::now();
        Self {
            conn,
            created_at: now,
            last_used: now,
        }
    }

    fn is_expired(&self, config: &PoolConfig) -> bool {
        if let Some(idle_timeout) = config.idle_timeout {
            if self.last_used.elapsed() > idle_timeout {
                return true;
            }
        }
        if let Some(max_lifetime) = config.max_lifetime {
            if self.created_at.elapsed() > max_lifetime {
                return true;
            }
        }
        false
    }
}

/// Creates and validates the connections a pool manages.
#[async_trait]
pub trait ConnectionFactory<T: Send + 'static>: Send + Sync {
    async fn create(&self) -> std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;

    /// Liveness check used both on acquire (idle reuse) and release.
    async fn is_healthy(&self, conn: &T) -> bool;

    /// Optional cleanup; defaults to dropping the connection.
    async fn close(&self, conn: T) {
        drop(conn);
    }
}

struct PoolState<T> {
    idle: VecDeque<PooledConnection<T>>,
    active_count: usize,
}

impl<T> PoolState<T> {
    fn new() -> Self {
        Self {
            idle: VecDeque::new(),
            active_count: 0,
        }
    }

    fn total_count(&self) -> usize {
        self.idle.len() + self.active_count
    }
}

/// A generic, bounded connection pool scoped to a single `PoolKey`.
pub struct ConnectionPool<T> {
    pool_key: String,
    config: PoolConfig,
    factory: Arc<dyn ConnectionFactory<T>>,
    state: Arc<Mutex<PoolState<T>>>,
    semaphore: Arc<Semaphore>,
    draining: Arc<AtomicBool>,
    idle_closed: Arc<Notify>,
}

impl<T: Send + 'static> ConnectionPool<T> {
    pub fn new(pool_key: impl Into<String>, factory: Arc<dyn ConnectionFactory<T>>, config: PoolConfig) -> Self {
        let max_pool = config.max_pool;
        Self {
            pool_key: pool_key.into(),
            config,
            factory,
            state: Arc::new(Mutex::new(PoolState::new())),
            semaphore: Arc::new(Semaphore::new(max_pool)),
            draining: Arc::new(AtomicBool::new(false)),
            idle_closed: Arc::new(Notify::new()),
        }
    }

    /// Eagerly create up to `min_pool` idle connections. Best-effort: a
    /// factory failure partway through is logged and simply
    /// leaves the pool smaller than `min_pool`, to be grown lazily on the
    /// next `acquire`.
    pub async fn warm_min_pool(&self) {
        for _ in 0..self.config.min_pool {
            let permit = match self.semaphore.try_acquire() {
                Ok(permit) => permit,
                Err(_) => break,
            };
            permit.forget();

            match self.factory.create().await {
                Ok(conn) => {
                    let mut state = self.state.lock().await;
                    state.idle.push_back(PooledConnection::new(conn));
                    drop(state);
                    self.semaphore.add_permits(1);
                }
                Err(_) => {
                    self.semaphore.add_permits(1);
                    break;
                }
            }
        }
    }

    /// Acquire a connection, waiting up to `deadline` for a permit or a
    /// freshly created connection.
    pub async fn acquire(&self, deadline: Duration) -> Result<T> {
        if self.draining.load(Ordering::SeqCst) {
            return Err(NimbusError::pool_drained(&self.pool_key));
        }

        let start = Instant::now();
        let permit = match tokio::time::timeout(deadline, self.semaphore.acquire()).await {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(NimbusError::pool_drained(&self.pool_key)),
            Err(_) => return Err(NimbusError::acquire_timeout(&self.pool_key, deadline)),
        };
        permit.forget();

        loop {
            let popped = {
                let mut state = self.state.lock().await;
                state.idle.pop_front()
            };
            let Some(pooled) = popped else { break };

            if pooled.is_expired(&self.config) {
                self.factory.close(pooled.conn).await;
                continue;
            }

            match tokio::time::timeout(VALIDATE_BUDGET, self.factory.is_healthy(&pooled.conn)).await {
                Ok(true) => {
                    let mut state = self.state.lock().await;
                    state.active_count += 1;
                    return Ok(pooled.conn);
                }
                _ => {
                    self.factory.close(pooled.conn).await;
                    continue;
                }
            }
        }

        let remaining = deadline.saturating_sub(start.elapsed()).max(Duration::from_millis(1));
        match tokio::time::timeout(remaining, self.factory.create()).await {
            Ok(Ok(conn)) => {
                let mut state = self.state.lock().await;
                state.active_count += 1;
                Ok(conn)
            }
            Ok(Err(e)) => {
                self.semaphore.add_permits(1);
                Err(NimbusError::FactoryFailed {
                    pool_key: self.pool_key.clone(),
                    source: e,
                })
            }
            Err(_) => {
                self.semaphore.add_permits(1);
                Err(NimbusError::acquire_timeout(&self.pool_key, deadline))
            }
        }
    }

    /// Return a validated connection to idle; a connection that fails
    /// validation is destroyed instead and its slot is freed.
    pub async fn release(&self, conn: T) {
        let healthy = self.factory.is_healthy(&conn).await;
        let draining = self.draining.load(Ordering::SeqCst);

        let mut state = self.state.lock().await;
        state.active_count -= 1;

        if healthy && !draining && state.total_count() < self.config.max_pool {
            state.idle.push_back(PooledConnection::new(conn));
            drop(state);
        } else {
            drop(state);
            self.factory.close(conn).await;
        }

        self.semaphore.add_permits(1);
        self.idle_closed.notify_waiters();
    }

    /// Forcibly remove a connection without returning it to idle (spec
    /// §4.4: used on unrecoverable errors and on `work` cancellation).
    pub async fn destroy(&self, conn: T) {
        {
            let mut state = self.state.lock().await;
            state.active_count -= 1;
        }
        self.factory.close(conn).await;
        self.semaphore.add_permits(1);
        self.idle_closed.notify_waiters();
    }

    pub async fn stats(&self) -> PoolStats {
        let state = self.state.lock().await;
        PoolStats {
            idle: state.idle.len(),
            active: state.active_count,
            total: state.total_count(),
            max_pool: self.config.max_pool,
        }
    }

    /// Evict idle connections past `idle_timeout`/`max_lifetime`, shrinking
    /// back toward `min_pool`.
    pub async fn reap_idle(&self) {
        let mut state = self.state.lock().await;
        let keep_at_least = self.config.min_pool;
        let mut survivors = VecDeque::new();
        let expired: Vec<_> = {
            let mut expired = Vec::new();
            while let Some(pooled) = state.idle.pop_front() {
                if survivors.len() + state.active_count < keep_at_least || !pooled.is_expired(&self.config) {
                    survivors.push_back(pooled);
                } else {
                    expired.push(pooled);
                }
            }
            expired
        };
        state.idle = survivors;
        drop(state);

        for pooled in expired {
            self.factory.close(pooled.conn).await;
        }
    }

    /// Stop admitting new acquisitions, close all idle connections, and
    /// wait up to `timeout` for outstanding checkouts to be released
    /// before returning.
    pub async fn drain(&self, timeout: Duration) {
        self.draining.store(true, Ordering::SeqCst);

        let idle = {
            let mut state = self.state.lock().await;
            std::mem::take(&mut state.idle)
        };
        for pooled in idle {
            self.factory.close(pooled.conn).await;
        }

        let deadline = Instant::now() + timeout;
        loop {
            if self.state.lock().await.active_count == 0 {
                return;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return;
            }
            let _ = tokio::time::timeout(remaining, self.idle_closed.notified()).await;
        }
    }

    pub fn pool_key(&self) -> &str {
        &self.pool_key
    }
}

/// Point-in-time pool size breakdown (mirrors `db_pool_size`'s
/// `total`/`available`/`pending` states).
#[derive(Debug, Clone)]
pub struct PoolStats {
    pub idle: usize,
    pub active: usize,
    pub total: usize,
    pub max_pool: usize,
}

impl PoolStats {
    pub fn utilization(&self) -> f64 {
        if self.max_pool == 0 {
            0.0
        } else {
            (self.total as f64 / self.max_pool as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[derive(Debug, Clone)]
    struct TestConnection {
        id: usize,
        healthy: Arc<Mutex<bool>>,
    }

    struct TestFactory {
        counter: AtomicUsize,
    }

    #[async_trait]
    impl ConnectionFactory<TestConnection> for TestFactory {
        async fn create(&self) -> std::result::Result<TestConnection, Box<dyn std::error::Error + Send + Sync>> {
            let id = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(TestConnection {
                id,
                healthy: Arc::new(Mutex::new(true)),
            })
        }

        async fn is_healthy(&self, conn: &TestConnection) -> bool {
            *conn.healthy.lock().await
        }
    }

    fn pool(config: PoolConfig) -> ConnectionPool<TestConnection> {
        let factory = Arc::new(TestFactory {
            counter: AtomicUsize::new(0),
        });
        ConnectionPool::new("tenant-1:relational", factory, config)
    }

    #[tokio::test]
    async fn acquire_then_release_returns_the_connection_to_idle() {
        let pool = pool(PoolConfig {
            max_pool: 5,
            ..Default::default()
        });

        let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(conn.id, 1);
        assert_eq!(pool.stats().await.active, 1);

        pool.release(conn).await;
        let stats = pool.stats().await;
        assert_eq!(stats.active, 0);
        assert_eq!(stats.idle, 1);
    }

    #[tokio::test]
    async fn idle_connections_are_reused() {
        let pool = pool(PoolConfig::default());

        let conn1 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let id1 = conn1.id;
        pool.release(conn1).await;

        let conn2 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(conn2.id, id1);
    }

    #[tokio::test]
    async fn acquire_beyond_max_pool_times_out() {
        let pool = Arc::new(pool(PoolConfig {
            max_pool: 2,
            ..Default::default()
        }));

        let conn1 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        let conn2 = pool.acquire(Duration::from_millis(100)).await.unwrap();

        let result = pool.acquire(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(NimbusError::AcquireTimeout { .. })));

        pool.release(conn1).await;
        let conn3 = pool.acquire(Duration::from_millis(100)).await.unwrap();
        pool.release(conn2).await;
        pool.release(conn3).await;
    }

    #[tokio::test]
    async fn waiters_are_served_in_arrival_order() {
        let pool = Arc::new(pool(PoolConfig {
            max_pool: 2,
            ..Default::default()
        }));

        let conn1 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let conn2 = pool.acquire(Duration::from_secs(1)).await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));

        let spawn_waiter = |label: &'static str| {
            let pool = Arc::clone(&pool);
            let order = Arc::clone(&order);
            tokio::spawn(async move {
                let conn = pool.acquire(Duration::from_secs(5)).await.unwrap();
                order.lock().await.push(label);
                conn
            })
        };

        let w1 = spawn_waiter("w1");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let w2 = spawn_waiter("w2");
        tokio::time::sleep(Duration::from_millis(10)).await;
        let w3 = spawn_waiter("w3");
        tokio::time::sleep(Duration::from_millis(10)).await;

        pool.release(conn1).await;
        let w1_conn = w1.await.unwrap();
        assert_eq!(*order.lock().await, vec!["w1"]);

        pool.release(conn2).await;
        let w2_conn = w2.await.unwrap();
        assert_eq!(*order.lock().await, vec!["w1", "w2"]);

        pool.release(w1_conn).await;
        let w3_conn = w3.await.unwrap();
        assert_eq!(*order.lock().await, vec!["w1", "w2", "w3"]);

        pool.release(w2_conn).await;
        pool.release(w3_conn).await;
    }

    #[tokio::test]
    async fn unhealthy_idle_connections_are_discarded_on_acquire() {
        let pool = pool(PoolConfig::default());

        let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let id1 = conn.id;
        *conn.healthy.lock().await = false;
        pool.release(conn).await;

        // release() itself validates, so the now-unhealthy conn was closed
        // rather than returned to idle; the next acquire creates a new one.
        let conn2 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_ne!(conn2.id, id1);
    }

    #[tokio::test]
    async fn drain_closes_idle_connections_and_rejects_new_acquires() {
        let pool = pool(PoolConfig::default());
        let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
        pool.release(conn).await;
        assert_eq!(pool.stats().await.idle, 1);

        pool.drain(Duration::from_millis(50)).await;
        assert_eq!(pool.stats().await.idle, 0);

        let result = pool.acquire(Duration::from_millis(50)).await;
        assert!(matches!(result, Err(NimbusError::PoolDrained { .. })));
    }

    #[tokio::test]
    async fn reap_idle_respects_min_pool_floor() {
        let pool = pool(PoolConfig {
            min_pool: 1,
            max_pool: 5,
            idle_timeout: Some(Duration::from_millis(10)),
            max_lifetime: None,
        });

        let c1 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        let c2 = pool.acquire(Duration::from_secs(1)).await.unwrap();
        pool.release(c1).await;
        pool.release(c2).await;
        assert_eq!(pool.stats().await.idle, 2);

        tokio::time::sleep(Duration::from_millis(20)).await;
        pool.reap_idle().await;

        assert_eq!(pool.stats().await.idle, 1);
    }

    #[tokio::test]
    async fn warm_min_pool_prewarms_up_to_the_floor() {
        let pool = pool(PoolConfig {
            min_pool: 3,
            max_pool: 5,
            ..Default::default()
        });

        pool.warm_min_pool().await;
        let stats = pool.stats().await;
        assert_eq!(stats.idle, 3);
        assert_eq!(stats.active, 0);

        let conn = pool.acquire(Duration::from_secs(1)).await.unwrap();
        assert_eq!(conn.id, 1);
    }
}
