//! Connection pool with health checks and a circuit breaker.
//!
//! One [`PooledConnection`] exists per endpoint, created lazily on first
//! use and reused afterwards. Each carries a [`HealthState`]:
//!
//! ```text
//!            failures < threshold
//!   ┌────────┐ ───────────────────► ┌────────┐
//!   │ Closed │                      │  Open  │  rejects until cooldown ends
//!   └────────┘ ◄──── success ────── └────────┘
//!        ▲                              │ cooldown elapsed
//!        │ success                      ▼
//!        └──────────────────────── ┌──────────┐
//!                                  │ HalfOpen │  admits exactly one trial
//!                                  └──────────┘
//! ```
//!
//! A failed trial re-opens the circuit and restarts the cooldown. A trial
//! whose [`Admission`] is dropped before an outcome is recorded (timeout,
//! cancellation) releases its slot so the next caller becomes the trial.

// ============================================================================
// Imports
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::future::join_all;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::discovery::MediatorEndpoint;
use crate::error::{Error, Result};

use super::clock::{Clock, SharedClock, SystemClock, Ticker};
use super::{ClientConfig, PoolConfig, TabClient};

// ============================================================================
// Types
// ============================================================================

/// Builds the bare backend for an endpoint.
pub type ClientFactory =
    Arc<dyn Fn(&MediatorEndpoint) -> Result<Arc<dyn TabClient>> + Send + Sync>;

// ============================================================================
// HealthState
// ============================================================================

/// Health bookkeeping for one endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HealthState {
    /// Last instant a probe or request succeeded.
    pub last_healthy_at: Option<Instant>,
    /// Failures since the last success.
    pub consecutive_failures: u32,
    /// When the circuit last (re-)opened.
    pub opened_at: Option<Instant>,
    /// A half-open trial is in progress.
    pub trial_in_flight: bool,
    /// Incremented each time a trial is admitted.
    pub trial_epoch: u64,
}

impl HealthState {
    /// Returns `true` if the breaker rejects calls at `now`.
    #[must_use]
    pub fn is_circuit_open(&self, config: &PoolConfig, now: Instant) -> bool {
        self.remaining_cooldown(config, now).is_some()
    }

    fn tripped(&self, config: &PoolConfig) -> bool {
        self.consecutive_failures >= config.failure_threshold
    }

    fn remaining_cooldown(&self, config: &PoolConfig, now: Instant) -> Option<Duration> {
        if !self.tripped(config) {
            return None;
        }
        let opened_at = self.opened_at?;
        let reopens_at = opened_at + config.cooldown;
        (now < reopens_at).then(|| reopens_at - now)
    }
}

// ============================================================================
// PooledConnection
// ============================================================================

/// A reusable client handle plus its health.
pub struct PooledConnection {
    endpoint: MediatorEndpoint,
    client: Arc<dyn TabClient>,
    health: Mutex<HealthState>,
    config: PoolConfig,
    clock: SharedClock,
}

impl PooledConnection {
    fn new(
        endpoint: MediatorEndpoint,
        client: Arc<dyn TabClient>,
        config: PoolConfig,
        clock: SharedClock,
    ) -> Self {
        Self {
            endpoint,
            client,
            health: Mutex::new(HealthState::default()),
            config,
            clock,
        }
    }

    /// The endpoint this connection targets.
    #[inline]
    #[must_use]
    pub fn endpoint(&self) -> &MediatorEndpoint {
        &self.endpoint
    }

    /// The underlying backend.
    #[inline]
    #[must_use]
    pub fn client(&self) -> &Arc<dyn TabClient> {
        &self.client
    }

    /// Snapshot of the health state.
    #[must_use]
    pub fn health(&self) -> HealthState {
        *self.health.lock()
    }

    /// Returns `true` if the breaker currently rejects calls.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        self.health
            .lock()
            .is_circuit_open(&self.config, self.clock.now())
    }

    /// Admits a call, or rejects it while the circuit is open.
    ///
    /// After the cooldown exactly one caller is admitted as the trial until
    /// its outcome is recorded or its [`Admission`] is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CircuitOpen`] while open or while another trial runs.
    pub fn admit(self: &Arc<Self>) -> Result<Admission> {
        let trial = self.acquire()?;
        Ok(Admission {
            connection: Arc::clone(self),
            trial,
        })
    }

    /// Returns the trial epoch when the caller was admitted as the half-open
    /// trial, `None` for an ordinary call.
    fn acquire(&self) -> Result<Option<u64>> {
        let now = self.clock.now();
        let mut health = self.health.lock();

        if !health.tripped(&self.config) {
            return Ok(None);
        }

        if let Some(remaining) = health.remaining_cooldown(&self.config, now) {
            return Err(Error::circuit_open(
                self.endpoint.describe(),
                remaining.as_millis() as u64,
            ));
        }

        if health.trial_in_flight {
            return Err(Error::circuit_open(self.endpoint.describe(), 0));
        }

        health.trial_in_flight = true;
        health.trial_epoch = health.trial_epoch.wrapping_add(1);
        debug!(endpoint = %self.endpoint, "Circuit half-open, admitting trial");
        Ok(Some(health.trial_epoch))
    }

    fn abandon_trial(&self, epoch: u64) {
        let mut health = self.health.lock();
        if health.trial_in_flight && health.trial_epoch == epoch {
            health.trial_in_flight = false;
            debug!(endpoint = %self.endpoint, "Trial abandoned, circuit stays half-open");
        }
    }

    /// Records a success: failures reset and the circuit closes.
    pub fn record_success(&self) {
        let now = self.clock.now();
        let mut health = self.health.lock();
        if health.tripped(&self.config) {
            info!(endpoint = %self.endpoint, "Circuit closed");
        }
        *health = HealthState {
            last_healthy_at: Some(now),
            consecutive_failures: 0,
            opened_at: None,
            trial_in_flight: false,
            trial_epoch: health.trial_epoch,
        };
    }

    /// Records a failure; reaching the threshold (or failing a trial) opens
    /// the circuit from now.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut health = self.health.lock();
        health.consecutive_failures = health.consecutive_failures.saturating_add(1);
        health.trial_in_flight = false;

        if health.tripped(&self.config) {
            if health.opened_at.is_none() {
                warn!(
                    endpoint = %self.endpoint,
                    failures = health.consecutive_failures,
                    cooldown_ms = self.config.cooldown.as_millis() as u64,
                    "Circuit opened"
                );
            } else {
                debug!(endpoint = %self.endpoint, "Circuit re-opened");
            }
            health.opened_at = Some(now);
        }
    }

    /// Records the outcome of a call.
    ///
    /// Errors reported by a mediator that answered still count as healthy.
    pub fn record<T>(&self, outcome: &Result<T>) {
        match outcome {
            Ok(_) => self.record_success(),
            Err(e) if counts_as_failure(e) => self.record_failure(),
            Err(_) => self.record_success(),
        }
    }

    /// Probes the endpoint once and records the outcome.
    pub async fn check_health(&self) -> bool {
        let outcome = match tokio::time::timeout(self.config.probe_timeout, self.client.probe()).await
        {
            Ok(outcome) => outcome,
            Err(_) => Err(Error::timeout(
                "health probe",
                self.config.probe_timeout.as_millis() as u64,
            )),
        };

        if let Err(e) = &outcome {
            debug!(endpoint = %self.endpoint, error = %e, "Health probe failed");
        }
        self.record(&outcome);
        outcome.is_ok()
    }
}

impl std::fmt::Debug for PooledConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("endpoint", &self.endpoint)
            .field("health", &self.health())
            .finish_non_exhaustive()
    }
}

// ============================================================================
// Admission
// ============================================================================

/// Permission to make one call through a [`PooledConnection`].
///
/// Dropping it without [`record`](Self::record) frees a half-open trial slot.
#[derive(Debug)]
#[must_use = "dropping an admission abandons the call"]
pub struct Admission {
    connection: Arc<PooledConnection>,
    trial: Option<u64>,
}

impl Admission {
    /// The admitted connection.
    #[inline]
    pub fn connection(&self) -> &Arc<PooledConnection> {
        &self.connection
    }

    /// The underlying backend.
    #[inline]
    pub fn client(&self) -> &Arc<dyn TabClient> {
        self.connection.client()
    }

    /// Returns `true` if this call is the half-open trial.
    #[inline]
    pub fn is_trial(&self) -> bool {
        self.trial.is_some()
    }

    /// Records the call's outcome on the connection.
    pub fn record<T>(mut self, outcome: &Result<T>) {
        self.trial = None;
        self.connection.record(outcome);
    }
}

impl Drop for Admission {
    fn drop(&mut self) {
        if let Some(epoch) = self.trial.take() {
            self.connection.abandon_trial(epoch);
        }
    }
}

fn counts_as_failure(error: &Error) -> bool {
    error.is_transport() || error.is_connection_error() || error.is_timeout() || matches!(
        error.innermost(),
        Error::Status { code, .. } if *code >= 500
    )
}

// ============================================================================
// ConnectionPool
// ============================================================================

/// Lazily populated map of endpoint → [`PooledConnection`].
pub struct ConnectionPool {
    connections: RwLock<FxHashMap<String, Arc<PooledConnection>>>,
    factory: ClientFactory,
    config: PoolConfig,
    clock: SharedClock,
}

impl ConnectionPool {
    /// Creates a pool whose backends come from [`super::connect`].
    #[must_use]
    pub fn new(config: &ClientConfig) -> Self {
        let client_config = config.clone();
        let factory: ClientFactory =
            Arc::new(move |endpoint| super::connect(endpoint, &client_config));
        Self::with_factory(config.pool, factory)
    }

    /// Creates a pool with a custom backend factory.
    #[must_use]
    pub fn with_factory(config: PoolConfig, factory: ClientFactory) -> Self {
        Self {
            connections: RwLock::new(FxHashMap::default()),
            factory,
            config,
            clock: Arc::new(SystemClock),
        }
    }

    /// Replaces the clock.
    #[must_use]
    pub fn with_clock(mut self, clock: SharedClock) -> Self {
        self.clock = clock;
        self
    }

    /// Pool settings.
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Number of pooled connections.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.read().len()
    }

    /// Returns `true` if nothing has been pooled yet.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.read().is_empty()
    }

    /// Returns the pooled connection for `endpoint`, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns the factory's error if the backend cannot be built.
    pub fn connection(&self, endpoint: &MediatorEndpoint) -> Result<Arc<PooledConnection>> {
        let key = endpoint.pool_key();
        if let Some(existing) = self.connections.read().get(&key) {
            return Ok(Arc::clone(existing));
        }

        let mut connections = self.connections.write();
        if let Some(existing) = connections.get(&key) {
            return Ok(Arc::clone(existing));
        }

        let client = (self.factory)(endpoint)?;
        debug!(endpoint = %endpoint, "Pooled new connection");
        let connection = Arc::new(PooledConnection::new(
            endpoint.clone(),
            client,
            self.config,
            Arc::clone(&self.clock),
        ));
        connections.insert(key, Arc::clone(&connection));
        Ok(connection)
    }

    /// Admits one call to `endpoint` through its circuit breaker.
    ///
    /// # Errors
    ///
    /// - [`Error::CircuitOpen`] while the endpoint's circuit is open
    /// - the factory's error if the backend cannot be built
    pub fn get_client(&self, endpoint: &MediatorEndpoint) -> Result<Admission> {
        self.connection(endpoint)?.admit()
    }

    /// Probes every pooled connection concurrently.
    ///
    /// Returns the number of healthy endpoints. Individual failures are only
    /// recorded, never returned.
    pub async fn check_health_once(&self) -> usize {
        let connections: Vec<Arc<PooledConnection>> =
            self.connections.read().values().cloned().collect();

        let results = join_all(connections.iter().map(|c| c.check_health())).await;
        let healthy = results.iter().filter(|ok| **ok).count();
        debug!(healthy, total = results.len(), "Health check complete");
        healthy
    }

    /// Spawns the periodic health check; it stops when `cancel` fires or the
    /// ticker is exhausted.
    pub fn spawn_health_checks<K>(
        self: &Arc<Self>,
        mut ticker: K,
        cancel: CancellationToken,
    ) -> JoinHandle<()>
    where
        K: Ticker + 'static,
    {
        let pool = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                let ticked = tokio::select! {
                    _ = cancel.cancelled() => break,
                    ticked = ticker.tick() => ticked,
                };
                if !ticked {
                    break;
                }
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = pool.check_health_once() => {}
                }
            }
            debug!("Health checker stopped");
        })
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    use crate::client::clock::{ManualClock, ManualTicker};
    use crate::identifiers::Prefix;
    use crate::test_support::StubClient;

    fn endpoint() -> MediatorEndpoint {
        MediatorEndpoint::tcp(Prefix::nth(0).expect("prefix"), "127.0.0.1", 4625)
    }

    fn pool_with(stub: Arc<StubClient>) -> (ConnectionPool, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new());
        let factory: ClientFactory = Arc::new(move |_| Ok(stub.clone() as Arc<dyn TabClient>));
        let pool = ConnectionPool::with_factory(PoolConfig::new(), factory).with_clock(clock.clone());
        (pool, clock)
    }

    #[test]
    fn test_connection_is_created_once() {
        let (pool, _clock) = pool_with(Arc::new(StubClient::new("a")));
        let first = pool.connection(&endpoint()).expect("connection");
        let second = pool.connection(&endpoint()).expect("connection");
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_three_failures_open_circuit_then_one_trial() {
        let (pool, clock) = pool_with(Arc::new(StubClient::new("a")));
        let conn = pool.connection(&endpoint()).expect("connection");

        conn.record_failure();
        conn.record_failure();
        assert!(pool.get_client(&endpoint()).is_ok());
        conn.record_failure();

        let err = pool.get_client(&endpoint()).unwrap_err();
        assert!(err.is_circuit_open());

        clock.advance(Duration::from_secs(29));
        assert!(pool.get_client(&endpoint()).is_err());

        clock.advance(Duration::from_secs(1));
        let trial = pool.get_client(&endpoint()).expect("trial admitted");
        assert!(trial.is_trial());
        assert!(
            pool.get_client(&endpoint()).unwrap_err().is_circuit_open(),
            "second caller rejected during trial"
        );

        trial.record::<()>(&Err(Error::connection("still down")));
        assert!(conn.is_circuit_open(), "failed trial re-opens");

        clock.advance(Duration::from_secs(30));
        let trial = pool.get_client(&endpoint()).expect("second trial");
        trial.record(&Ok(()));
        assert!(!conn.is_circuit_open());
        assert_eq!(conn.health().consecutive_failures, 0);
        assert!(!pool.get_client(&endpoint()).expect("closed").is_trial());
    }

    #[test]
    fn test_dropped_trial_frees_the_slot() {
        let (pool, clock) = pool_with(Arc::new(StubClient::new("a")));
        let conn = pool.connection(&endpoint()).expect("connection");
        for _ in 0..3 {
            conn.record_failure();
        }
        clock.advance(Duration::from_secs(31));

        let trial = pool.get_client(&endpoint()).expect("trial admitted");
        assert!(conn.health().trial_in_flight);
        drop(trial);
        assert!(!conn.health().trial_in_flight);
        assert!(!conn.is_circuit_open(), "cooldown already elapsed");

        clock.advance(Duration::from_secs(3600));
        let trial = pool.get_client(&endpoint()).expect("next caller becomes the trial");
        assert!(trial.is_trial());
    }

    #[test]
    fn test_stale_trial_drop_keeps_newer_trial() {
        let (pool, clock) = pool_with(Arc::new(StubClient::new("a")));
        let conn = pool.connection(&endpoint()).expect("connection");
        for _ in 0..3 {
            conn.record_failure();
        }
        clock.advance(Duration::from_secs(31));

        let first = pool.get_client(&endpoint()).expect("first trial");
        conn.record_failure();
        clock.advance(Duration::from_secs(31));
        let second = pool.get_client(&endpoint()).expect("second trial");

        drop(first);
        assert!(conn.health().trial_in_flight, "older guard must not free the newer trial");
        drop(second);
        assert!(!conn.health().trial_in_flight);
    }

    #[test]
    fn test_browser_errors_do_not_trip() {
        let (pool, _clock) = pool_with(Arc::new(StubClient::new("a")));
        let conn = pool.connection(&endpoint()).expect("connection");
        for _ in 0..5 {
            conn.record::<()>(&Err(Error::browser("no such tab")));
        }
        assert!(!conn.is_circuit_open());
    }

    #[tokio::test]
    async fn test_health_check_counts_and_resets() {
        let stub = Arc::new(StubClient::new("a"));
        let (pool, _clock) = pool_with(stub.clone());
        let conn = pool.connection(&endpoint()).expect("connection");

        stub.set_failing(true);
        for _ in 0..3 {
            assert_eq!(pool.check_health_once().await, 0);
        }
        assert!(conn.is_circuit_open());

        stub.set_failing(false);
        assert_eq!(pool.check_health_once().await, 1);
        assert!(!conn.is_circuit_open());
        assert!(conn.health().last_healthy_at.is_some());
    }

    #[tokio::test]
    async fn test_health_task_stops_on_cancel() {
        let stub = Arc::new(StubClient::new("a"));
        let (pool, _clock) = pool_with(stub.clone());
        let pool = Arc::new(pool);
        pool.connection(&endpoint()).expect("connection");

        let (ticker, handle) = ManualTicker::new();
        let cancel = CancellationToken::new();
        let task = pool.spawn_health_checks(ticker, cancel.clone());

        handle.fire();
        for _ in 0..100 {
            if stub.calls() > 0 {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(stub.calls(), 1);

        cancel.cancel();
        task.await.expect("health task exits");
    }
}
