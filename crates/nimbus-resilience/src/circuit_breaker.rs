//! Rolling-window circuit breaker.
//!
//! Three states, same shape as a classic breaker, but CLOSED's trip
//! decision is driven by a rolling window of fixed-width buckets rather
//! than a consecutive-failure counter: the window ages out its oldest
//! bucket on every invocation and trips once both a volume floor and an
//! error-ratio floor are crossed at the same time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Observable state of the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Rolling-window breaker configuration. The per-store defaults table lives
/// in `nimbus_core::breaker_policy`; this type is the runtime-facing
/// mirror of it.
#[derive(Debug, Clone, Copy)]
pub struct CircuitBreakerConfig {
    /// Ceiling on a single invocation; exceeding it counts as a failure.
    pub op_timeout: Duration,
    /// Percentage (0-100) of failures within the window that trips the breaker.
    pub error_threshold_percent: u8,
    /// How long OPEN holds before admitting a HALF_OPEN probe.
    pub reset_timeout: Duration,
    /// Total width of the rolling window.
    pub rolling_window: Duration,
    /// Number of buckets the rolling window is divided into.
    pub rolling_buckets: usize,
    /// Minimum number of samples in the window before a trip can fire.
    pub volume_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            op_timeout: Duration::from_secs(5),
            error_threshold_percent: 50,
            reset_timeout: Duration::from_secs(30),
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
            volume_threshold: 10,
        }
    }
}

impl From<nimbus_core::BreakerPolicy> for CircuitBreakerConfig {
    fn from(policy: nimbus_core::BreakerPolicy) -> Self {
        Self {
            op_timeout: policy.op_timeout,
            error_threshold_percent: policy.error_threshold_percent,
            reset_timeout: policy.reset_timeout,
            rolling_window: policy.rolling_window,
            rolling_buckets: policy.rolling_buckets,
            volume_threshold: policy.volume_threshold,
        }
    }
}

struct Bucket {
    start: Instant,
    successes: u32,
    failures: u32,
}

/// Fixed-width rolling window of success/failure counts.
struct RollingWindow {
    buckets: VecDeque<Bucket>,
    bucket_width: Duration,
    window: Duration,
}

impl RollingWindow {
    fn new(window: Duration, bucket_count: usize) -> Self {
        let bucket_count = bucket_count.max(1);
        Self {
            buckets: VecDeque::new(),
            bucket_width: window / bucket_count as u32,
            window,
        }
    }

    /// Evict stale buckets and ensure the last bucket covers `now`.
    fn roll(&mut self, now: Instant) {
        match self.buckets.back() {
            None => self.buckets.push_back(Bucket {
                start: now,
                successes: 0,
                failures: 0,
            }),
            Some(last) if now.duration_since(last.start) >= self.window => {
                // Idle for longer than the whole window: nothing survives.
                self.buckets.clear();
                self.buckets.push_back(Bucket {
                    start: now,
                    successes: 0,
                    failures: 0,
                });
            }
            Some(last) if now.duration_since(last.start) >= self.bucket_width => {
                let mut start = last.start + self.bucket_width;
                while now.duration_since(start) >= self.bucket_width {
                    start += self.bucket_width;
                }
                self.buckets.push_back(Bucket {
                    start,
                    successes: 0,
                    failures: 0,
                });
            }
            _ => {}
        }

        while let Some(front) = self.buckets.front() {
            if now.duration_since(front.start) >= self.window {
                self.buckets.pop_front();
            } else {
                break;
            }
        }
    }

    fn record(&mut self, now: Instant, success: bool) {
        self.roll(now);
        let bucket = self.buckets.back_mut().expect("roll always leaves a bucket");
        if success {
            bucket.successes += 1;
        } else {
            bucket.failures += 1;
        }
    }

    fn totals(&mut self, now: Instant) -> (u32, u32) {
        self.roll(now);
        self.buckets
            .iter()
            .fold((0, 0), |(s, f), b| (s + b.successes, f + b.failures))
    }

    fn reset(&mut self) {
        self.buckets.clear();
    }
}

struct Inner {
    state: CircuitState,
    window: RollingWindow,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
}

/// Outcome of a call guarded by the breaker: it was rejected outright
/// (breaker open), it ran past `op_timeout`, or it ran and failed on its
/// own terms.
#[derive(Debug)]
pub enum CircuitError<E> {
    Open,
    Timeout,
    Inner(E),
}

impl<E: std::fmt::Display> std::fmt::Display for CircuitError<E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CircuitError::Open => write!(f, "circuit breaker open"),
            CircuitError::Timeout => write!(f, "circuit breaker op_timeout elapsed"),
            CircuitError::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for CircuitError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CircuitError::Inner(e) => Some(e),
            CircuitError::Open | CircuitError::Timeout => None,
        }
    }
}

/// A transition the breaker made, reported back to the caller so it can
/// publish to the event bus and update metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitTransition {
    Opened,
    HalfOpened,
    Closed,
    /// A call counted as a failure without changing the externally visible
    /// state (e.g. a failure while already CLOSED, below the trip point).
    FailureRecorded,
}

/// A call admitted by [`CircuitBreaker::try_admit`], pending a matching
/// [`CircuitBreaker::record_outcome`] call.
#[derive(Debug, Clone, Copy)]
pub struct CircuitAdmission {
    is_probe: bool,
}

impl CircuitAdmission {
    /// Whether this admission is the single HALF_OPEN probe rather than a
    /// normal CLOSED-state passthrough.
    pub fn is_probe(&self) -> bool {
        self.is_probe
    }
}

/// Rolling-window circuit breaker guarding a single `PoolKey`.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Arc<Mutex<Inner>>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let window = RollingWindow::new(config.rolling_window, config.rolling_buckets);
        Self {
            config,
            inner: Arc::new(Mutex::new(Inner {
                state: CircuitState::Closed,
                window,
                opened_at: None,
                probe_in_flight: false,
            })),
        }
    }

    pub async fn state(&self) -> CircuitState {
        self.inner.lock().await.state
    }

    /// The op-timeout ceiling this breaker enforces. Exposed so a caller
    /// composing its own
    /// multi-step operation (see [`try_admit`]/[`record_outcome`]) can apply
    /// it alongside its own timeouts.
    ///
    /// [`try_admit`]: CircuitBreaker::try_admit
    /// [`record_outcome`]: CircuitBreaker::record_outcome
    pub fn op_timeout(&self) -> Duration {
        self.config.op_timeout
    }

    /// Decide whether a call may proceed, without running anything.
    ///
    /// Pairs with [`record_outcome`] for callers whose guarded operation
    /// spans more than one fallible step — e.g. acquiring a connection and
    /// then using it — where only some of those steps should influence the
    /// rolling window: acquiring a connection is a capacity concern, not a
    /// store-health signal, so `AcquireTimeout` should not itself count as
    /// a breaker failure. [`call`] remains the right choice when the
    /// guarded operation is a single step.
    ///
    /// [`call`]: CircuitBreaker::call
    /// [`record_outcome`]: CircuitBreaker::record_outcome
    pub async fn try_admit(&self) -> Result<(CircuitAdmission, Option<CircuitTransition>), ()> {
        let (is_probe, transition) = self.admit().await?;
        Ok((CircuitAdmission { is_probe }, transition))
    }

    /// Record the outcome of a call admitted via [`try_admit`]. Must be
    /// called at most once per admission; a HALF_OPEN probe admission that
    /// is never resolved leaves the breaker stuck unable to admit another
    /// probe, so every `try_admit` that returns `Ok` must eventually reach
    /// a matching `record_outcome` call.
    ///
    /// [`try_admit`]: CircuitBreaker::try_admit
    pub async fn record_outcome(&self, admission: CircuitAdmission, success: bool) -> Option<CircuitTransition> {
        if success {
            self.on_success(admission.is_probe).await
        } else {
            Some(self.on_failure(admission.is_probe).await)
        }
    }

    /// Decide whether a call may proceed right now, promoting OPEN ->
    /// HALF_OPEN if `reset_timeout` has elapsed. `Ok((is_probe, transition))`
    /// admits the call; `Err(())` means it must be rejected with
    /// `BreakerOpen`.
    async fn admit(&self) -> Result<(bool, Option<CircuitTransition>), ()> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        match inner.state {
            CircuitState::Closed => Ok((false, None)),
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(())
                } else {
                    inner.probe_in_flight = true;
                    Ok((true, None))
                }
            }
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                if now.duration_since(opened_at) >= self.config.reset_timeout {
                    inner.state = CircuitState::HalfOpen;
                    inner.probe_in_flight = true;
                    Ok((true, Some(CircuitTransition::HalfOpened)))
                } else {
                    Err(())
                }
            }
        }
    }

    /// Run `op` under breaker protection, subject to `op_timeout`. Returns
    /// every transition the call produced, in wall-clock order (at most
    /// two: an OPEN -> HALF_OPEN promotion followed by the probe's own
    /// outcome), alongside the call's result, so the caller can publish
    /// events/metrics without re-deriving breaker state.
    pub async fn call<F, Fut, T, E>(
        &self,
        op: F,
    ) -> (Vec<CircuitTransition>, Result<T, CircuitError<E>>)
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = Result<T, E>>,
    {
        let (is_probe, admit_transition) = match self.admit().await {
            Ok(result) => result,
            Err(()) => return (Vec::new(), Err(CircuitError::Open)),
        };
        let mut transitions: Vec<CircuitTransition> = admit_transition.into_iter().collect();

        let outcome = tokio::time::timeout(self.config.op_timeout, op()).await;

        match outcome {
            Ok(Ok(value)) => {
                transitions.extend(self.on_success(is_probe).await);
                (transitions, Ok(value))
            }
            Ok(Err(e)) => {
                transitions.push(self.on_failure(is_probe).await);
                (transitions, Err(CircuitError::Inner(e)))
            }
            Err(_elapsed) => {
                transitions.push(self.on_failure(is_probe).await);
                (transitions, Err(CircuitError::Timeout))
            }
        }
    }

    async fn on_success(&self, was_probe: bool) -> Option<CircuitTransition> {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if was_probe {
            inner.probe_in_flight = false;
            inner.state = CircuitState::Closed;
            inner.window.reset();
            inner.opened_at = None;
            return Some(CircuitTransition::Closed);
        }

        inner.window.record(now, true);
        None
    }

    async fn on_failure(&self, was_probe: bool) -> CircuitTransition {
        let mut inner = self.inner.lock().await;
        let now = Instant::now();

        if was_probe {
            inner.probe_in_flight = false;
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            inner.window.reset();
            return CircuitTransition::Opened;
        }

        inner.window.record(now, false);
        let (successes, failures) = inner.window.totals(now);
        let total = successes + failures;

        if inner.state == CircuitState::Closed
            && total >= self.config.volume_threshold
            && (failures as f64 / total as f64) * 100.0 >= self.config.error_threshold_percent as f64
        {
            inner.state = CircuitState::Open;
            inner.opened_at = Some(now);
            return CircuitTransition::Opened;
        }

        CircuitTransition::FailureRecorded
    }

    /// Force the breaker back to CLOSED with an empty window. Used by
    /// tests and by administrative overrides; not exercised on any normal
    /// call path.
    pub async fn reset(&self) {
        let mut inner = self.inner.lock().await;
        inner.state = CircuitState::Closed;
        inner.opened_at = None;
        inner.probe_in_flight = false;
        inner.window.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::io;

    fn config(volume_threshold: u32, error_threshold_percent: u8, reset_timeout: Duration) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            op_timeout: Duration::from_secs(5),
            error_threshold_percent,
            reset_timeout,
            rolling_window: Duration::from_secs(10),
            rolling_buckets: 10,
            volume_threshold,
        }
    }

    async fn ok_call(breaker: &CircuitBreaker) -> (Vec<CircuitTransition>, Result<(), CircuitError<Infallible>>) {
        breaker.call(|| async { Ok::<(), Infallible>(()) }).await
    }

    async fn err_call(breaker: &CircuitBreaker) -> (Vec<CircuitTransition>, Result<(), CircuitError<io::Error>>) {
        breaker
            .call(|| async { Err::<(), io::Error>(io::Error::other("boom")) })
            .await
    }

    #[tokio::test]
    async fn trips_open_once_volume_and_error_ratio_are_both_crossed() {
        let breaker = CircuitBreaker::new(config(10, 50, Duration::from_secs(30)));

        for _ in 0..4 {
            let _ = ok_call(&breaker).await;
        }
        let mut tripped = false;
        for _ in 0..6 {
            let (transitions, _) = err_call(&breaker).await;
            if transitions.contains(&CircuitTransition::Opened) {
                tripped = true;
            }
        }

        assert!(tripped);
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn rejects_calls_immediately_while_open() {
        let breaker = CircuitBreaker::new(config(2, 50, Duration::from_secs(30)));
        let _ = err_call(&breaker).await;
        let _ = err_call(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        let (transitions, result) = ok_call(&breaker).await;
        assert!(transitions.is_empty());
        assert!(matches!(result, Err(CircuitError::Open)));
    }

    #[tokio::test]
    async fn half_open_probe_success_closes_the_circuit() {
        let breaker = CircuitBreaker::new(config(2, 50, Duration::from_millis(20)));
        let _ = err_call(&breaker).await;
        let _ = err_call(&breaker).await;
        assert_eq!(breaker.state().await, CircuitState::Open);

        tokio::time::sleep(Duration::from_millis(30)).await;

        let (transitions, result) = ok_call(&breaker).await;
        assert_eq!(transitions, vec![CircuitTransition::HalfOpened, CircuitTransition::Closed]);
        assert!(result.is_ok());
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_failure_reopens_the_circuit() {
        let breaker = CircuitBreaker::new(config(2, 50, Duration::from_millis(20)));
        let _ = err_call(&breaker).await;
        let _ = err_call(&breaker).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        let (transitions, _) = err_call(&breaker).await;
        assert_eq!(transitions, vec![CircuitTransition::HalfOpened, CircuitTransition::Opened]);
        assert_eq!(breaker.state().await, CircuitState::Open);
    }

    #[tokio::test]
    async fn only_one_probe_is_admitted_concurrently() {
        let breaker = CircuitBreaker::new(config(2, 50, Duration::from_millis(20)));
        let _ = err_call(&breaker).await;
        let _ = err_call(&breaker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        {
            let mut inner = breaker.inner.lock().await;
            inner.state = CircuitState::HalfOpen;
            inner.probe_in_flight = true;
        }

        let (transitions, result) = ok_call(&breaker).await;
        assert!(transitions.is_empty());
        assert!(matches!(result, Err(CircuitError::Open)));
    }

    #[tokio::test]
    async fn reset_clears_window_and_state() {
        let breaker = CircuitBreaker::new(config(2, 50, Duration::from_secs(30)));
        let _ = err_call(&breaker).await;
        breaker.reset().await;
        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn try_admit_lets_a_caller_skip_recording_an_acquire_timeout() {
        let breaker = CircuitBreaker::new(config(10, 50, Duration::from_secs(30)));

        for _ in 0..20 {
            let (admission, _) = breaker.try_admit().await.unwrap();
            assert!(!admission.is_probe());
            // Simulate an AcquireTimeout: the admission is simply dropped,
            // never reaching `record_outcome`, so it cannot influence the
            // rolling window.
        }

        assert_eq!(breaker.state().await, CircuitState::Closed);
    }

    #[tokio::test]
    async fn half_open_probe_admission_reports_is_probe_true() {
        let breaker = CircuitBreaker::new(config(2, 50, Duration::from_millis(20)));
        let _ = err_call(&breaker).await;
        let _ = err_call(&breaker).await;
        tokio::time::sleep(Duration::from_millis(30)).await;

        let (admission, transition) = breaker.try_admit().await.unwrap();
        assert!(admission.is_probe());
        assert_eq!(transition, Some(CircuitTransition::HalfOpened));

        let resolved = breaker.record_outcome(admission, true).await;
        assert_eq!(resolved, Some(CircuitTransition::Closed));
    }
}
