//! Periodic polling coordinator
//!
//! The coordinator owns the refresh schedule for one device. It fetches a
//! [`Snapshot`] on a fixed interval and on demand, keeps the last good one
//! (and the one before it, for rate metrics), and tells subscribers about
//! every completed fetch, whether it succeeded or not.
//!
//! At most one fetch runs at a time. Manual refreshes that arrive while a
//! fetch is running wait for that fetch instead of starting another one; a
//! scheduled tick that lands on a running fetch is skipped.

use crate::client::DeviceClient;
use crate::derived::{DerivedMetricEngine, DerivedValues};
use crate::error::{CoordinatorError, ErrorContext, ErrorReporter, Result};
use crate::snapshot::Snapshot;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Source of fresh device state
#[async_trait]
pub trait StateFetcher: Send + Sync {
    /// Capture one complete snapshot
    async fn fetch(&self) -> Result<Snapshot>;
}

/// Fetches metrics and the active profile through a [`DeviceClient`]
pub struct ClientFetcher<C: ?Sized> {
    client: Arc<C>,
}

impl<C: ?Sized> ClientFetcher<C> {
    pub fn new(client: Arc<C>) -> Self {
        Self { client }
    }
}

#[async_trait]
impl<C: DeviceClient + ?Sized> StateFetcher for ClientFetcher<C> {
    async fn fetch(&self) -> Result<Snapshot> {
        debug!("Updating state cache");
        let metrics = self.client.fetch_metrics().await?;
        let profile = self.client.get_profile().await?;
        Ok(Snapshot::new(metrics, Utc::now(), Some(profile)))
    }
}

/// Adapts an async closure into a [`StateFetcher`]
pub struct FnFetcher<F>(F);

impl<F> FnFetcher<F> {
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

#[async_trait]
impl<F, Fut> StateFetcher for FnFetcher<F>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = Result<Snapshot>> + Send,
{
    async fn fetch(&self) -> Result<Snapshot> {
        (self.0)().await
    }
}

/// Coordinator settings
#[derive(Debug, Clone)]
pub struct CoordinatorConfig {
    /// Time between scheduled fetches
    pub update_interval: Duration,
    /// Upper bound for a single fetch; `None` leaves it to the transport
    pub fetch_timeout: Option<Duration>,
    /// Capacity of the broadcast channel behind [`Coordinator::subscribe`]
    pub event_buffer: usize,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(60),
            fetch_timeout: None,
            event_buffer: 64,
        }
    }
}

/// Health of the cached state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Health {
    /// No fetch has completed yet
    Pending,
    /// The last fetch succeeded
    Healthy,
    /// The last fetch failed; any cached snapshot is stale
    Degraded,
}

/// What subscribers receive after every completed fetch
#[derive(Debug, Clone)]
pub struct CoordinatorUpdate {
    pub generation: u64,
    pub health: Health,
    pub snapshot: Option<Arc<Snapshot>>,
    pub derived: Arc<DerivedValues>,
    /// Error of the fetch that produced this update, if it failed
    pub error: Option<CoordinatorError>,
    pub completed_at: DateTime<Utc>,
}

impl CoordinatorUpdate {
    /// Cached data is being served although the last fetch failed
    pub fn is_stale(&self) -> bool {
        self.health == Health::Degraded
    }
}

/// Point-in-time view of the coordinator
#[derive(Debug, Clone)]
pub struct CoordinatorStatus {
    pub name: String,
    pub generation: u64,
    pub health: Health,
    pub last_error: Option<CoordinatorError>,
    pub last_success: Option<DateTime<Utc>>,
    pub fetch_in_flight: bool,
    pub running: bool,
}

/// Handle returned by [`Coordinator::add_listener`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&CoordinatorUpdate) + Send + Sync>;
type SharedFetch = Shared<BoxFuture<'static, Result<u64>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOrigin {
    Startup,
    Scheduled,
    Manual,
}

struct CacheState {
    current: Option<Arc<Snapshot>>,
    previous: Option<Arc<Snapshot>>,
    generation: u64,
    health: Health,
    last_error: Option<CoordinatorError>,
    last_success: Option<DateTime<Utc>>,
    derived: Arc<DerivedValues>,
}

struct Inner {
    name: String,
    fetcher: Arc<dyn StateFetcher>,
    config: CoordinatorConfig,
    engine: DerivedMetricEngine,
    state: RwLock<CacheState>,
    in_flight: Mutex<Option<SharedFetch>>,
    events: broadcast::Sender<CoordinatorUpdate>,
    listeners: RwLock<Vec<(ListenerId, Listener)>>,
    next_listener: AtomicU64,
    started: AtomicBool,
    cancel: CancellationToken,
    ticker: Mutex<Option<JoinHandle<()>>>,
}

/// Polling coordinator for a single device
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Coordinator {
    /// Create a coordinator; nothing is fetched until [`start`](Self::start)
    pub fn new(
        name: impl Into<String>,
        fetcher: Arc<dyn StateFetcher>,
        config: CoordinatorConfig,
    ) -> Self {
        Self::with_derived_metrics(name, fetcher, config, DerivedMetricEngine::new())
    }

    /// Create a coordinator that also maintains derived metrics
    pub fn with_derived_metrics(
        name: impl Into<String>,
        fetcher: Arc<dyn StateFetcher>,
        config: CoordinatorConfig,
        engine: DerivedMetricEngine,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_buffer.max(1));

        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                fetcher,
                config,
                engine,
                state: RwLock::new(CacheState {
                    current: None,
                    previous: None,
                    generation: 0,
                    health: Health::Pending,
                    last_error: None,
                    last_success: None,
                    derived: Arc::new(DerivedValues::new()),
                }),
                in_flight: Mutex::new(None),
                events,
                listeners: RwLock::new(Vec::new()),
                next_listener: AtomicU64::new(1),
                started: AtomicBool::new(false),
                cancel: CancellationToken::new(),
                ticker: Mutex::new(None),
            }),
        }
    }

    /// Perform the first fetch and begin periodic scheduling
    ///
    /// If the first fetch fails the error is returned, nothing is published
    /// and no timer is started.
    pub async fn start(&self) -> Result<()> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoordinatorError::shut_down(format!(
                "{} coordinator was shut down",
                self.inner.name
            )));
        }
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(CoordinatorError::configuration(format!(
                "{} coordinator already started",
                self.inner.name
            )));
        }

        info!(
            coordinator = %self.inner.name,
            interval = ?self.inner.config.update_interval,
            "Starting coordinator"
        );

        if let Err(e) = self.inner.begin_fetch(FetchOrigin::Startup).await {
            self.inner.started.store(false, Ordering::SeqCst);
            return Err(e);
        }

        let handle = tokio::spawn(tick_loop(
            Arc::downgrade(&self.inner),
            self.inner.cancel.clone(),
            self.inner.config.update_interval,
        ));
        *lock(&self.inner.ticker) = Some(handle);

        Ok(())
    }

    /// Fetch now, or wait for the fetch that is already running
    ///
    /// Returns the generation reached by that fetch.
    pub async fn refresh_now(&self) -> Result<u64> {
        if self.inner.cancel.is_cancelled() {
            return Err(CoordinatorError::shut_down(format!(
                "{} coordinator was shut down",
                self.inner.name
            )));
        }
        self.inner.begin_fetch(FetchOrigin::Manual).await
    }

    /// Most recent successful snapshot; `None` until the first one arrives
    pub fn get_snapshot(&self) -> Option<Arc<Snapshot>> {
        read(&self.inner.state).current.clone()
    }

    /// Snapshot that preceded the current one
    pub fn previous_snapshot(&self) -> Option<Arc<Snapshot>> {
        read(&self.inner.state).previous.clone()
    }

    /// Derived values computed for the current snapshot pair
    pub fn derived_values(&self) -> Arc<DerivedValues> {
        Arc::clone(&read(&self.inner.state).derived)
    }

    /// One derived value; `None` when unknown or not configured
    pub fn derived(&self, name: &str) -> Option<f64> {
        read(&self.inner.state).derived.get(name).copied().flatten()
    }

    pub fn generation(&self) -> u64 {
        read(&self.inner.state).generation
    }

    pub fn health(&self) -> Health {
        read(&self.inner.state).health
    }

    /// Whether the last completed fetch succeeded
    pub fn last_update_success(&self) -> bool {
        self.health() == Health::Healthy
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn update_interval(&self) -> Duration {
        self.inner.config.update_interval
    }

    pub fn status(&self) -> CoordinatorStatus {
        let state = read(&self.inner.state);
        CoordinatorStatus {
            name: self.inner.name.clone(),
            generation: state.generation,
            health: state.health,
            last_error: state.last_error.clone(),
            last_success: state.last_success,
            fetch_in_flight: self.inner.fetch_in_flight(),
            running: self.inner.started.load(Ordering::SeqCst)
                && !self.inner.cancel.is_cancelled(),
        }
    }

    /// Receive an update after every completed fetch
    pub fn subscribe(&self) -> broadcast::Receiver<CoordinatorUpdate> {
        self.inner.events.subscribe()
    }

    /// Register a callback invoked after every completed fetch
    pub fn add_listener<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&CoordinatorUpdate) + Send + Sync + 'static,
    {
        let id = ListenerId(self.inner.next_listener.fetch_add(1, Ordering::Relaxed));
        write(&self.inner.listeners).push((id, Arc::new(listener)));
        id
    }

    /// Remove a callback; returns false if it was not registered
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = write(&self.inner.listeners);
        let before = listeners.len();
        listeners.retain(|(listener_id, _)| *listener_id != id);
        listeners.len() != before
    }

    /// Stop scheduling; a fetch still running is allowed to finish but its
    /// result is dropped
    pub async fn shutdown(&self) {
        if self.inner.cancel.is_cancelled() {
            return;
        }
        info!(coordinator = %self.inner.name, "Shutting down coordinator");
        self.inner.cancel.cancel();

        let handle = lock(&self.inner.ticker).take();
        if let Some(handle) = handle {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Inner {
    fn fetch_in_flight(&self) -> bool {
        lock(&self.in_flight).is_some()
    }

    /// Join the running fetch or spawn a new one
    fn begin_fetch(self: &Arc<Self>, origin: FetchOrigin) -> SharedFetch {
        let mut slot = lock(&self.in_flight);
        if let Some(fetch) = slot.as_ref() {
            debug!(coordinator = %self.name, ?origin, "Joining fetch already in flight");
            return fetch.clone();
        }
        let fetch = self.spawn_fetch(origin);
        *slot = Some(fetch.clone());
        fetch
    }

    /// Spawn a fetch only if none is running
    fn try_begin_fetch(self: &Arc<Self>, origin: FetchOrigin) -> Option<SharedFetch> {
        let mut slot = lock(&self.in_flight);
        if slot.is_some() {
            return None;
        }
        let fetch = self.spawn_fetch(origin);
        *slot = Some(fetch.clone());
        Some(fetch)
    }

    // Caller holds the in-flight lock, so the task cannot clear the slot
    // before it has been filled.
    fn spawn_fetch(self: &Arc<Self>, origin: FetchOrigin) -> SharedFetch {
        let inner = Arc::clone(self);
        let task = tokio::spawn(async move { inner.run_fetch(origin).await });

        async move {
            match task.await {
                Ok(result) => result,
                Err(e) => Err(CoordinatorError::internal(format!("fetch task failed: {e}"))),
            }
        }
        .boxed()
        .shared()
    }

    async fn fetch_with_timeout(&self) -> Result<Snapshot> {
        match self.config.fetch_timeout {
            Some(limit) => tokio::time::timeout(limit, self.fetcher.fetch())
                .await
                .unwrap_or_else(|_| {
                    Err(CoordinatorError::timeout(format!(
                        "fetch did not complete within {limit:?}"
                    )))
                }),
            None => self.fetcher.fetch().await,
        }
    }

    async fn run_fetch(self: Arc<Self>, origin: FetchOrigin) -> Result<u64> {
        let guard = InFlightGuard(&self.in_flight);
        let result = self.fetch_with_timeout().await;

        if self.cancel.is_cancelled() {
            debug!(coordinator = %self.name, "Discarding fetch result after shutdown");
            return Err(CoordinatorError::shut_down(format!(
                "{} coordinator was shut down",
                self.name
            )));
        }

        let (outcome, update) = {
            let mut state = write(&self.state);
            match result {
                Ok(snapshot) => {
                    let snapshot = Arc::new(snapshot);
                    let derived = self
                        .engine
                        .compute(state.current.as_deref(), &snapshot);

                    if state.health == Health::Degraded {
                        info!(coordinator = %self.name, "Fetching {} data recovered", self.name);
                    }

                    state.previous = state.current.replace(Arc::clone(&snapshot));
                    state.generation += 1;
                    state.health = Health::Healthy;
                    state.last_error = None;
                    state.last_success = Some(Utc::now());
                    state.derived = Arc::new(derived);

                    debug!(
                        coordinator = %self.name,
                        generation = state.generation,
                        metrics = snapshot.metrics().len(),
                        "Fetch completed"
                    );
                    (Ok(state.generation), Some(state.update(None)))
                }
                Err(error) => {
                    if origin == FetchOrigin::Startup && state.generation == 0 {
                        state.last_error = Some(error.clone());
                        warn!(coordinator = %self.name, "Initial fetch failed: {}", error);
                        (Err(error), None)
                    } else {
                        let first_failure = state.health != Health::Degraded;
                        state.health = Health::Degraded;
                        state.last_error = Some(error.clone());

                        if first_failure {
                            ErrorReporter::log_error(
                                &error,
                                Some(
                                    ErrorContext::new(
                                        error.to_error_code(),
                                        "coordinator",
                                        "fetch",
                                    )
                                    .with_metadata("coordinator", self.name.clone())
                                    .with_metadata("generation", state.generation),
                                ),
                            );
                        } else {
                            debug!(coordinator = %self.name, "Fetch failed again: {}", error);
                        }
                        (Err(error.clone()), Some(state.update(Some(error))))
                    }
                }
            }
        };

        drop(guard);
        if let Some(update) = update {
            self.notify(update);
        }
        outcome
    }

    fn notify(&self, update: CoordinatorUpdate) {
        // No receivers is fine
        let _ = self.events.send(update.clone());

        let listeners: Vec<Listener> = read(&self.listeners)
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&update);
        }
    }
}

// The last coordinator handle is gone; stop the schedule with it
impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Scheduled refreshes; holds only a weak reference so a dropped
/// coordinator stops polling
async fn tick_loop(inner: Weak<Inner>, cancel: CancellationToken, period: Duration) {
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let Some(inner) = inner.upgrade() else {
                    break;
                };
                if inner.try_begin_fetch(FetchOrigin::Scheduled).is_none() {
                    debug!(coordinator = %inner.name, "Fetch still in flight, skipping scheduled refresh");
                }
            }
        }
    }

    debug!("Refresh schedule stopped");
}

impl CacheState {
    fn update(&self, error: Option<CoordinatorError>) -> CoordinatorUpdate {
        CoordinatorUpdate {
            generation: self.generation,
            health: self.health,
            snapshot: self.current.clone(),
            derived: Arc::clone(&self.derived),
            error,
            completed_at: Utc::now(),
        }
    }
}

/// Clears the in-flight slot when a fetch task ends, including by panic
struct InFlightGuard<'a>(&'a Mutex<Option<SharedFetch>>);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        *lock(self.0) = None;
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl crate::dispatcher::RefreshTrigger for Coordinator {
    async fn refresh_now(&self) -> Result<u64> {
        Coordinator::refresh_now(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::MetricValue;
    use chrono::TimeZone;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Notify;

    /// Fetcher returning `bytes = 1000 * n` at `t = n` seconds, optionally
    /// failing or blocking on demand
    struct ScriptedFetcher {
        calls: AtomicUsize,
        fail: AtomicBool,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedFetcher {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                gate: None,
            })
        }

        fn gated(gate: Arc<Notify>) -> Arc<Self> {
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                gate: Some(gate),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl StateFetcher for ScriptedFetcher {
        async fn fetch(&self) -> Result<Snapshot> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) as i64 + 1;
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(CoordinatorError::transport("device unreachable"));
            }
            Ok(Snapshot::from_pairs(
                [("bytes", MetricValue::Int(1000 * n))],
                Utc.timestamp_opt(n, 0).unwrap(),
            ))
        }
    }

    fn config(secs: u64) -> CoordinatorConfig {
        CoordinatorConfig {
            update_interval: Duration::from_secs(secs),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_start_publishes_first_snapshot() {
        let fetcher = ScriptedFetcher::new();
        let coordinator = Coordinator::new("test", fetcher.clone(), config(30));

        assert!(coordinator.get_snapshot().is_none());
        assert_eq!(coordinator.health(), Health::Pending);

        coordinator.start().await.unwrap();

        assert_eq!(fetcher.calls(), 1);
        assert_eq!(coordinator.generation(), 1);
        assert_eq!(coordinator.health(), Health::Healthy);
        assert_eq!(
            coordinator.get_snapshot().unwrap().metric_f64("bytes"),
            Some(1000.0)
        );
        assert!(coordinator.previous_snapshot().is_none());
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_start_twice_is_rejected() {
        let coordinator = Coordinator::new("test", ScriptedFetcher::new(), config(30));
        coordinator.start().await.unwrap();
        let err = coordinator.start().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Configuration(_)));
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_startup_failure_publishes_nothing() {
        let fetcher = ScriptedFetcher::new();
        fetcher.fail.store(true, Ordering::SeqCst);
        let coordinator = Coordinator::new("test", fetcher.clone(), config(30));
        let mut events = coordinator.subscribe();

        let err = coordinator.start().await.unwrap_err();

        assert!(matches!(err, CoordinatorError::Transport(_)));
        assert!(coordinator.get_snapshot().is_none());
        assert_eq!(coordinator.generation(), 0);
        assert_eq!(coordinator.health(), Health::Pending);
        assert!(!coordinator.status().running);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scheduled_failure_keeps_cached_snapshot() {
        let fetcher = ScriptedFetcher::new();
        let coordinator = Coordinator::new("test", fetcher.clone(), config(30));
        coordinator.start().await.unwrap();
        let before = coordinator.get_snapshot().unwrap();
        let mut events = coordinator.subscribe();

        fetcher.fail.store(true, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(31)).await;

        let update = events.recv().await.unwrap();
        assert!(update.is_stale());
        assert!(matches!(update.error, Some(CoordinatorError::Transport(_))));
        assert_eq!(coordinator.health(), Health::Degraded);
        assert_eq!(coordinator.get_snapshot().unwrap(), before);
        assert_eq!(coordinator.generation(), 1);

        fetcher.fail.store(false, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(30)).await;

        let update = events.recv().await.unwrap();
        assert!(!update.is_stale());
        assert_eq!(update.generation, 2);
        assert_eq!(coordinator.health(), Health::Healthy);
        coordinator.shutdown().await;
    }

    #[tokio::test]
    async fn test_refresh_joins_in_flight_fetch() {
        let gate = Arc::new(Notify::new());
        let fetcher = ScriptedFetcher::gated(gate.clone());
        let coordinator = Coordinator::new("test", fetcher.clone(), config(3600));

        let first = tokio::spawn({
            let c = coordinator.clone();
            async move { c.refresh_now().await }
        });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }
        assert!(coordinator.status().fetch_in_flight);

        let second = tokio::spawn({
            let c = coordinator.clone();
            async move { c.refresh_now().await }
        });
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        gate.notify_one();
        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert_eq!(second.await.unwrap().unwrap(), 1);
        assert_eq!(fetcher.calls(), 1);
        assert!(!coordinator.status().fetch_in_flight);
    }

    #[tokio::test]
    async fn test_previous_snapshot_retained_for_one_generation() {
        let coordinator = Coordinator::new("test", ScriptedFetcher::new(), config(3600));
        coordinator.refresh_now().await.unwrap();
        coordinator.refresh_now().await.unwrap();
        coordinator.refresh_now().await.unwrap();

        assert_eq!(coordinator.generation(), 3);
        assert_eq!(
            coordinator.previous_snapshot().unwrap().metric_f64("bytes"),
            Some(2000.0)
        );
        assert_eq!(
            coordinator.get_snapshot().unwrap().metric_f64("bytes"),
            Some(3000.0)
        );
    }

    #[tokio::test]
    async fn test_derived_metrics_recomputed_each_fetch() {
        let engine = DerivedMetricEngine::new()
            .with_metric(crate::derived::RateMetric::new("bytes_per_second", "bytes"))
            .unwrap();
        let coordinator = Coordinator::with_derived_metrics(
            "test",
            ScriptedFetcher::new(),
            config(3600),
            engine,
        );

        coordinator.refresh_now().await.unwrap();
        assert_eq!(coordinator.derived("bytes_per_second"), None);

        coordinator.refresh_now().await.unwrap();
        assert_eq!(coordinator.derived("bytes_per_second"), Some(1000.0));
    }

    #[tokio::test]
    async fn test_listeners_see_success_and_failure() {
        let fetcher = ScriptedFetcher::new();
        let coordinator = Coordinator::new("test", fetcher.clone(), config(3600));
        let seen = Arc::new(Mutex::new(Vec::new()));

        let id = coordinator.add_listener({
            let seen = seen.clone();
            move |update: &CoordinatorUpdate| seen.lock().unwrap().push(update.health)
        });

        coordinator.refresh_now().await.unwrap();
        fetcher.fail.store(true, Ordering::SeqCst);
        assert!(coordinator.refresh_now().await.is_err());

        assert_eq!(
            *seen.lock().unwrap(),
            vec![Health::Healthy, Health::Degraded]
        );

        assert!(coordinator.remove_listener(id));
        assert!(!coordinator.remove_listener(id));
        let _ = coordinator.refresh_now().await;
        assert_eq!(seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_shutdown_discards_in_flight_result() {
        let gate = Arc::new(Notify::new());
        let fetcher = ScriptedFetcher::gated(gate.clone());
        let coordinator = Coordinator::new("test", fetcher.clone(), config(3600));
        let mut events = coordinator.subscribe();

        let pending = tokio::spawn({
            let c = coordinator.clone();
            async move { c.refresh_now().await }
        });
        while fetcher.calls() == 0 {
            tokio::task::yield_now().await;
        }

        coordinator.shutdown().await;
        gate.notify_one();

        let err = pending.await.unwrap().unwrap_err();
        assert!(matches!(err, CoordinatorError::ShutDown(_)));
        assert!(coordinator.get_snapshot().is_none());
        assert!(events.try_recv().is_err());
        assert!(matches!(
            coordinator.refresh_now().await,
            Err(CoordinatorError::ShutDown(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fetch_timeout() {
        let gate = Arc::new(Notify::new());
        let fetcher = ScriptedFetcher::gated(gate);
        let coordinator = Coordinator::new(
            "test",
            fetcher,
            CoordinatorConfig {
                fetch_timeout: Some(Duration::from_secs(5)),
                ..config(60)
            },
        );

        let err = coordinator.refresh_now().await.unwrap_err();
        assert!(matches!(err, CoordinatorError::Timeout(_)));
        assert_eq!(coordinator.health(), Health::Degraded);
    }
}
