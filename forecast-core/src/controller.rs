//! Query lifecycle: owns the session state and the single active fetch.
//!
//! Every refresh gets a fresh [`Generation`] and [`CancellationToken`]. Starting
//! a new refresh cancels the previous token, which drops its in-flight request,
//! and advances the generation. Writes from a refresh go through
//! [`Shared::commit`], which compares generations under the state lock, so a
//! response for a superseded query is discarded even if the remote call ignored
//! cancellation.

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard},
};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    config::Config,
    error::ForecastError,
    model::{ForecastResult, ResolvedPlace, SessionState, is_searchable},
    provider::{ForecastService, GeocodingService, OpenMeteoClient},
    storage::QueryStore,
};

/// Marker of one refresh attempt. Only the current generation may commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Generation(u64);

impl Generation {
    fn next(self) -> Self {
        Self(self.0 + 1)
    }
}

struct Inner {
    session: SessionState,
    generation: Generation,
    cancel: CancellationToken,
}

/// A refresh registered under the lock; `cancel` is `None` when nothing is fetched.
struct PendingRefresh {
    generation: Generation,
    cancel: Option<CancellationToken>,
}

struct Shared {
    geocoder: Arc<dyn GeocodingService>,
    forecaster: Arc<dyn ForecastService>,
    inner: Mutex<Inner>,
    updates: watch::Sender<SessionState>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish(&self, inner: &Inner) {
        self.updates.send_replace(inner.session.clone());
    }

    /// Apply `update` only if `generation` is still current. Returns whether it was applied.
    fn commit(&self, generation: Generation, update: impl FnOnce(&mut SessionState)) -> bool {
        let mut inner = self.lock();
        if inner.generation != generation {
            debug!(?generation, current = ?inner.generation, "discarding stale result");
            return false;
        }
        update(&mut inner.session);
        self.publish(&inner);
        true
    }

    /// Supersede the active refresh and prepare state for `inner.session.query`.
    /// Must be called with the state lock held; the caller spawns afterwards.
    fn begin_refresh(&self, inner: &mut Inner) -> PendingRefresh {
        inner.cancel.cancel();
        inner.generation = inner.generation.next();
        inner.cancel = CancellationToken::new();
        let generation = inner.generation;

        let cancel = if is_searchable(&inner.session.query) {
            inner.session.is_loading = true;
            Some(inner.cancel.clone())
        } else {
            inner.session.clear_results();
            inner.session.last_error = None;
            inner.session.is_loading = false;
            None
        };

        self.publish(inner);
        PendingRefresh { generation, cancel }
    }

    async fn resolve(
        &self,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<(ResolvedPlace, ForecastResult), ForecastError> {
        let candidates = cancellable(cancel, self.geocoder.search(query)).await?;

        let place = candidates
            .into_iter()
            .next()
            .ok_or_else(|| ForecastError::resolution(query))?;
        let resolved = ResolvedPlace::from(place);

        let series = cancellable(
            cancel,
            self.forecaster
                .daily(resolved.latitude, resolved.longitude, &resolved.timezone),
        )
        .await?;

        let forecast = ForecastResult::from_series(series)?;
        Ok((resolved, forecast))
    }
}

async fn cancellable<T>(
    cancel: &CancellationToken,
    call: impl Future<Output = Result<T, ForecastError>>,
) -> Result<T, ForecastError> {
    if cancel.is_cancelled() {
        return Err(ForecastError::Cancelled);
    }
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(ForecastError::Cancelled),
        result = call => result,
    }
}

async fn run_refresh(
    shared: Arc<Shared>,
    generation: Generation,
    cancel: CancellationToken,
    query: String,
) {
    match shared.resolve(&query, &cancel).await {
        Ok((place, forecast)) => {
            debug!(%query, days = forecast.len(), "forecast ready");
            shared.commit(generation, |s| {
                s.resolved_place = Some(place);
                s.forecast = forecast;
                s.last_error = None;
                s.is_loading = false;
            });
        }
        Err(err) if !err.is_reportable() => {
            debug!(%query, "refresh superseded");
        }
        Err(err) => {
            let applied = shared.commit(generation, |s| {
                s.last_error = Some(err.clone());
                s.is_loading = false;
            });
            if applied {
                warn!(%query, error = %err, "forecast refresh failed");
            }
        }
    }
}

/// Owns [`SessionState`] and the fetch lifecycle for one session.
///
/// `set_query` and `resume` spawn onto the current Tokio runtime and must be
/// called from within one.
pub struct ForecastController {
    shared: Arc<Shared>,
    store: Box<dyn QueryStore>,
}

impl ForecastController {
    /// Build a controller, seeding the query from `store`.
    pub fn new(
        geocoder: Arc<dyn GeocodingService>,
        forecaster: Arc<dyn ForecastService>,
        store: Box<dyn QueryStore>,
    ) -> Self {
        let seeded = match store.load() {
            Ok(value) => value.unwrap_or_default(),
            Err(err) => {
                warn!(error = %err, "could not load last query, starting empty");
                String::new()
            }
        };

        let session = SessionState::seeded(seeded);
        let (updates, _) = watch::channel(session.clone());

        Self {
            shared: Arc::new(Shared {
                geocoder,
                forecaster,
                inner: Mutex::new(Inner {
                    session,
                    generation: Generation::default(),
                    cancel: CancellationToken::new(),
                }),
                updates,
            }),
            store,
        }
    }

    /// Controller backed by the Open-Meteo APIs configured in `config`.
    pub fn open_meteo(config: &Config, store: Box<dyn QueryStore>) -> anyhow::Result<Self> {
        let client = Arc::new(OpenMeteoClient::from_config(config)?);
        Ok(Self::new(client.clone(), client, store))
    }

    /// Update the query. A changed value is persisted and refreshed.
    pub fn set_query(&self, new_query: impl Into<String>) {
        let new_query = new_query.into();

        // Query write and generation bump share one lock so an older refresh
        // can never commit against the new query.
        let pending = {
            let mut inner = self.shared.lock();
            if inner.session.query == new_query {
                return;
            }
            inner.session.query = new_query.clone();
            self.shared.begin_refresh(&mut inner)
        };

        if let Err(err) = self.store.save(&new_query) {
            warn!(error = %err, "could not persist query");
        }

        self.spawn_refresh(pending, new_query);
    }

    /// Fetch for the current (e.g. seeded) query without persisting anything.
    pub fn resume(&self) {
        self.refresh_forecast();
    }

    /// Refresh for the query currently held in the session.
    pub(crate) fn refresh_forecast(&self) -> Generation {
        let (pending, query) = {
            let mut inner = self.shared.lock();
            let query = inner.session.query.clone();
            (self.shared.begin_refresh(&mut inner), query)
        };
        let generation = pending.generation;
        self.spawn_refresh(pending, query);
        generation
    }

    fn spawn_refresh(&self, pending: PendingRefresh, query: String) {
        let Some(cancel) = pending.cancel else {
            return;
        };
        debug!(%query, generation = ?pending.generation, "starting refresh");
        tokio::spawn(run_refresh(
            self.shared.clone(),
            pending.generation,
            cancel,
            query,
        ));
    }

    pub fn snapshot(&self) -> SessionState {
        self.shared.lock().session.clone()
    }

    /// Receiver that observes every state change.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.shared.updates.subscribe()
    }

    /// Wait until no fetch is outstanding and return the state at that point.
    pub async fn settled(&self) -> SessionState {
        let mut rx = self.subscribe();
        match rx.wait_for(|s| !s.is_loading).await {
            Ok(state) => state.clone(),
            Err(_) => self.snapshot(),
        }
    }
}

impl Drop for ForecastController {
    fn drop(&mut self) {
        self.shared.lock().cancel.cancel();
    }
}

impl std::fmt::Debug for ForecastController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("ForecastController")
            .field("generation", &inner.generation)
            .field("session", &inner.session)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DailySeries, GeocodedPlace};
    use crate::storage::MemoryQueryStore;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    #[derive(Debug, Default)]
    struct FakeGeocoder {
        places: HashMap<String, GeocodedPlace>,
        gates: HashMap<String, Arc<Notify>>,
        calls: AtomicUsize,
    }

    impl FakeGeocoder {
        fn with(mut self, query: &str, name: &str, country: &str, latitude: f64) -> Self {
            self.places.insert(
                query.to_string(),
                GeocodedPlace {
                    name: name.to_string(),
                    latitude,
                    longitude: 10.0,
                    timezone: "UTC".to_string(),
                    country_code: Some(country.to_string()),
                },
            );
            self
        }

        fn gated(mut self, query: &str) -> (Self, Arc<Notify>) {
            let gate = Arc::new(Notify::new());
            self.gates.insert(query.to_string(), gate.clone());
            (self, gate)
        }
    }

    #[async_trait]
    impl GeocodingService for FakeGeocoder {
        async fn search(&self, name: &str) -> Result<Vec<GeocodedPlace>, ForecastError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(gate) = self.gates.get(name) {
                gate.notified().await;
            }
            Ok(self.places.get(name).cloned().into_iter().collect())
        }
    }

    /// Returns a 7-day series whose min temperature encodes the latitude.
    #[derive(Debug, Default)]
    struct FakeForecaster {
        fail: bool,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ForecastService for FakeForecaster {
        async fn daily(
            &self,
            latitude: f64,
            _longitude: f64,
            _timezone: &str,
        ) -> Result<DailySeries, ForecastError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(ForecastError::transport("status 500"));
            }
            let start = NaiveDate::from_ymd_opt(2024, 5, 1).expect("valid date");
            Ok(DailySeries {
                time: start.iter_days().take(7).collect(),
                weather_code: vec![Some(0); 7],
                temperature_min: vec![Some(latitude); 7],
                temperature_max: vec![Some(latitude + 10.0); 7],
            })
        }
    }

    fn controller(
        geocoder: FakeGeocoder,
        forecaster: FakeForecaster,
    ) -> (ForecastController, Arc<FakeGeocoder>, Arc<FakeForecaster>) {
        let geocoder = Arc::new(geocoder);
        let forecaster = Arc::new(forecaster);
        let controller = ForecastController::new(
            geocoder.clone(),
            forecaster.clone(),
            Box::new(MemoryQueryStore::default()),
        );
        (controller, geocoder, forecaster)
    }

    fn cities() -> FakeGeocoder {
        FakeGeocoder::default()
            .with("kashan", "Kashan", "IR", 33.0)
            .with("paris", "Paris", "FR", 48.0)
    }

    #[tokio::test]
    async fn short_queries_never_fetch() {
        let (controller, geocoder, _) = controller(cities(), FakeForecaster::default());

        for query in ["k", "", "é"] {
            controller.set_query(query);
            let state = controller.snapshot();
            assert!(!state.is_loading);
            assert!(state.forecast.is_empty());
            assert!(state.resolved_place.is_none());
        }

        tokio::task::yield_now().await;
        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn successful_query_commits_place_and_forecast() {
        let (controller, _, _) = controller(cities(), FakeForecaster::default());

        controller.set_query("kashan");
        assert!(controller.snapshot().is_loading);

        let state = controller.settled().await;
        assert!(!state.is_loading);
        assert_eq!(state.query, "kashan");
        let place = state.resolved_place.expect("place");
        assert!(place.display_label.starts_with("Kashan "));
        assert_eq!(state.forecast.len(), 7);
        assert_eq!(state.forecast.days()[0].min_temperature_c, 33.0);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn unknown_place_reports_resolution_error() {
        let (controller, _, forecaster) = controller(cities(), FakeForecaster::default());

        controller.set_query("xyzinvalidplace");
        let state = controller.settled().await;

        assert!(!state.is_loading);
        assert!(state.forecast.is_empty());
        assert!(state.resolved_place.is_none());
        assert_eq!(
            state.last_error,
            Some(ForecastError::resolution("xyzinvalidplace"))
        );
        assert_eq!(forecaster.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn error_after_success_keeps_prior_forecast() {
        let (controller, _, _) = controller(cities(), FakeForecaster::default());

        controller.set_query("kashan");
        let first = controller.settled().await;

        controller.set_query("xyzinvalidplace");
        let second = controller.settled().await;

        assert_eq!(second.query, "xyzinvalidplace");
        assert_eq!(second.forecast, first.forecast);
        assert_eq!(second.resolved_place, first.resolved_place);
        assert!(matches!(
            second.last_error,
            Some(ForecastError::Resolution { .. })
        ));
    }

    #[tokio::test]
    async fn transport_failure_is_recorded_and_loading_cleared() {
        let forecaster = FakeForecaster {
            fail: true,
            ..FakeForecaster::default()
        };
        let (controller, _, _) = controller(cities(), forecaster);

        controller.set_query("paris");
        let state = controller.settled().await;

        assert!(!state.is_loading);
        assert!(state.forecast.is_empty());
        assert!(matches!(
            state.last_error,
            Some(ForecastError::Transport { .. })
        ));
    }

    #[tokio::test]
    async fn later_query_in_same_tick_wins() {
        let (controller, _, forecaster) = controller(cities(), FakeForecaster::default());

        controller.set_query("kashan");
        controller.set_query("paris");

        let state = controller.settled().await;
        assert_eq!(state.query, "paris");
        assert!(
            state
                .resolved_place
                .expect("place")
                .display_label
                .starts_with("Paris")
        );
        assert_eq!(state.forecast.days()[0].min_temperature_c, 48.0);
        assert!(forecaster.calls.load(Ordering::SeqCst) <= 1);
    }

    #[tokio::test]
    async fn slow_superseded_query_is_never_committed() {
        let (geocoder, kashan_gate) = cities().gated("kashan");
        let (controller, _, _) = controller(geocoder, FakeForecaster::default());

        controller.set_query("kashan");
        tokio::task::yield_now().await;
        controller.set_query("paris");
        let settled = controller.settled().await;

        kashan_gate.notify_one();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let state = controller.snapshot();
        assert_eq!(state, settled);
        assert_eq!(state.forecast.days()[0].min_temperature_c, 48.0);
        assert!(state.last_error.is_none());
    }

    #[tokio::test]
    async fn short_query_cancels_outstanding_fetch() {
        let (geocoder, gate) = cities().gated("kashan");
        let (controller, _, _) = controller(geocoder, FakeForecaster::default());

        controller.set_query("kashan");
        controller.set_query("k");
        gate.notify_one();
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }

        let state = controller.snapshot();
        assert!(!state.is_loading);
        assert!(state.forecast.is_empty());
        assert!(state.resolved_place.is_none());
    }

    #[tokio::test]
    async fn stale_generation_cannot_commit() {
        let (controller, _, _) = controller(cities(), FakeForecaster::default());

        let stale = controller.refresh_forecast();
        let current = controller.refresh_forecast();
        assert!(current > stale);

        let applied = controller.shared.commit(stale, |s| s.query = "kashan".into());
        assert!(!applied);
        assert!(controller.shared.commit(current, |_| {}));
    }

    /// Store whose `save` blocks the calling thread for one specific query.
    #[derive(Debug)]
    struct SlowSaveStore {
        slow_for: &'static str,
        delay: Duration,
    }

    impl QueryStore for SlowSaveStore {
        fn load(&self) -> anyhow::Result<Option<String>> {
            Ok(None)
        }

        fn save(&self, query: &str) -> anyhow::Result<()> {
            if query == self.slow_for {
                std::thread::sleep(self.delay);
            }
            Ok(())
        }
    }

    /// A settled state must show the place of its own query.
    fn place_matches_query(state: &SessionState) -> bool {
        if state.is_loading {
            return true;
        }
        match &state.resolved_place {
            None => true,
            Some(place) => place
                .display_label
                .to_lowercase()
                .starts_with(&state.query.to_lowercase()),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn older_query_cannot_commit_while_new_query_is_saved() {
        let controller = Arc::new(ForecastController::new(
            Arc::new(cities()),
            Arc::new(FakeForecaster::default()),
            Box::new(SlowSaveStore {
                slow_for: "paris",
                delay: Duration::from_millis(300),
            }),
        ));

        let mut rx = controller.subscribe();
        let watcher = tokio::spawn(async move {
            let mut seen = Vec::new();
            while rx.changed().await.is_ok() {
                let state = rx.borrow_and_update().clone();
                let done = !state.is_loading && state.query == "paris";
                seen.push(state);
                if done {
                    break;
                }
            }
            seen
        });

        let setter = {
            let controller = controller.clone();
            tokio::task::spawn_blocking(move || {
                controller.set_query("kashan");
                controller.set_query("paris");
            })
        };

        tokio::time::sleep(Duration::from_millis(150)).await;
        let mid = controller.snapshot();
        assert_eq!(mid.query, "paris");
        assert!(mid.is_loading, "paris is still being saved: {mid:?}");
        assert!(place_matches_query(&mid), "mixed state: {mid:?}");

        setter.await.expect("setter finished");
        let seen = tokio::time::timeout(Duration::from_secs(5), watcher)
            .await
            .expect("paris settled")
            .expect("watcher finished");

        for state in &seen {
            assert!(place_matches_query(state), "mixed state: {state:?}");
        }

        let last = controller.snapshot();
        assert!(!last.is_loading);
        assert_eq!(last.forecast.days()[0].min_temperature_c, 48.0);
    }

    #[tokio::test]
    async fn unchanged_query_is_not_refetched_or_saved() {
        let (controller, geocoder, _) = controller(cities(), FakeForecaster::default());

        controller.set_query("kashan");
        controller.settled().await;
        controller.set_query("kashan");
        controller.settled().await;

        assert_eq!(geocoder.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn query_is_seeded_from_store_and_resumed() {
        let controller = ForecastController::new(
            Arc::new(cities()),
            Arc::new(FakeForecaster::default()),
            Box::new(MemoryQueryStore::new(Some("kashan".into()))),
        );

        assert_eq!(controller.snapshot().query, "kashan");
        assert!(controller.snapshot().forecast.is_empty());

        controller.resume();
        let state = controller.settled().await;
        assert_eq!(state.forecast.len(), 7);
    }

    #[tokio::test]
    async fn subscribers_see_loading_then_result() {
        let (controller, _, _) = controller(cities(), FakeForecaster::default());
        let mut rx = controller.subscribe();

        controller.set_query("paris");
        assert!(rx.borrow_and_update().is_loading);

        let state = rx
            .wait_for(|s| !s.is_loading)
            .await
            .expect("sender alive")
            .clone();
        assert_eq!(state.forecast.len(), 7);
    }
}
