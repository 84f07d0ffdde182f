// Tracking service - Session lifecycle, location subscription and batch delivery
use crate::application::location_provider::{LocationProvider, SampleStream};
use crate::application::pipeline::{EmitOutcome, PipelineState, SampleOutcome};
use crate::application::session_store::SessionStore;
use crate::application::snapshot::{
    elapsed_since, format_distance_km, format_duration_ms, TrackerSnapshot, TrackingPhase,
};
use crate::application::tracking_api::TrackingApi;
use crate::domain::activity::ActivityLog;
use crate::domain::averaging::SampleRejection;
use crate::domain::position::{format_coords, now_iso_utc, RawSample};
use crate::domain::session::{IngestResponse, SessionRecord, StopSessionRequest};
use crate::error::{FlushFailureKind, LocationError, TrackerError};
use crate::infrastructure::config::PipelineSettings;
use futures::StreamExt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum FlushOutcome {
    /// Another flush holds the gate
    InFlight,
    /// No session or nothing queued
    Idle,
    Sent { sent: usize, response: IngestResponse },
    Failed { requeued: usize, kind: FlushFailureKind },
}

/// Live tasks owned by the active watcher
#[derive(Debug, Default)]
struct WatcherHandles {
    subscription: Option<JoinHandle<()>>,
    one_shot: Option<JoinHandle<()>>,
    flush_timer: Option<JoinHandle<()>>,
}

impl WatcherHandles {
    fn abort_all(&mut self) {
        for handle in [
            self.subscription.take(),
            self.one_shot.take(),
            self.flush_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            handle.abort();
        }
    }
}

#[derive(Debug)]
struct TrackerState {
    phase: TrackingPhase,
    session: Option<SessionRecord>,
    pipeline: PipelineState,
    log: ActivityLog,
    last_error: Option<String>,
    last_sent_at: Option<String>,
    watchers: WatcherHandles,
    /// Bumped by logout so late completions of older operations are discarded
    generation: u64,
}

impl TrackerState {
    fn fail(&mut self, error: &TrackerError, context: &str) {
        self.last_error = Some(error.to_string());
        self.log.error(format!("{}: {}", context, error));
    }

    fn log_sample(&mut self, outcome: &SampleOutcome) {
        match outcome {
            SampleOutcome::Rejected(SampleRejection::Accuracy {
                accuracy_m,
                ceiling_m,
            }) => self.log.info(format!(
                "Skip point (accuracy {}m > {}m)",
                accuracy_m.round(),
                ceiling_m
            )),
            SampleOutcome::Rejected(SampleRejection::NonFinite) => {
                self.log.info("Skip point (non-finite coordinates)")
            }
            SampleOutcome::Buffered => {}
            SampleOutcome::Emitted(emit) => self.log_emit(emit),
        }
    }

    fn log_emit(&mut self, outcome: &EmitOutcome) {
        match outcome {
            EmitOutcome::RateLimited => self.log.info("Rate limit guard: skipping point (client)."),
            EmitOutcome::TooClose { distance_m } => {
                tracing::debug!("Skip point ({:.1}m from last accepted)", distance_m);
            }
            EmitOutcome::Enqueued { queue_len } => {
                tracing::debug!(queue_len, "Point queued");
            }
        }
    }
}

/// Owns one tracking session at a time: its location subscription, its
/// periodic flush timer and the queue of undelivered points.
///
/// Cheap to clone; clones share the same state.
#[derive(Clone)]
pub struct TrackingService {
    api: Arc<dyn TrackingApi>,
    locations: Arc<dyn LocationProvider>,
    store: Arc<dyn SessionStore>,
    state: Arc<Mutex<TrackerState>>,
    flush_gate: Arc<tokio::sync::Mutex<()>>,
    flush_interval: Duration,
    drain_attempts: usize,
}

impl TrackingService {
    /// Restores a persisted session, if any, in the `Paused` phase
    pub fn new(
        api: Arc<dyn TrackingApi>,
        locations: Arc<dyn LocationProvider>,
        store: Arc<dyn SessionStore>,
        settings: PipelineSettings,
    ) -> Self {
        let mut log = ActivityLog::new();
        let session = match store.load() {
            Ok(record) => record,
            Err(e) => {
                log.warn(format!("Could not read persisted session: {:#}", e));
                None
            }
        };
        let phase = match &session {
            Some(record) => {
                log.info(format!("Found unfinished session {}; resume available", record.session_id));
                TrackingPhase::Paused
            }
            None => TrackingPhase::Idle,
        };

        Self {
            api,
            locations,
            store,
            flush_interval: settings.flush_interval(),
            drain_attempts: settings.drain_attempts,
            state: Arc::new(Mutex::new(TrackerState {
                phase,
                session,
                pipeline: PipelineState::new(settings),
                log,
                last_error: None,
                last_sent_at: None,
                watchers: WatcherHandles::default(),
                generation: 0,
            })),
            flush_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState> {
        // State stays consistent between statements, so a poisoned lock is still usable
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start a new session, or resume the locally persisted one
    pub async fn start(&self) -> Result<(), TrackerError> {
        let generation = {
            let mut state = self.lock();
            state.last_error = None;
            if state.phase.is_busy() {
                return Err(TrackerError::Busy);
            }
            if state.phase == TrackingPhase::Watching {
                return Err(TrackerError::AlreadyWatching);
            }
            if !self.locations.is_available() {
                let err = TrackerError::CapabilityUnavailable;
                state.fail(&err, "Start FAIL");
                return Err(err);
            }
            if let Some(session_id) = state.session.as_ref().map(|s| s.session_id.clone()) {
                state.pipeline.reset_averaging();
                state.log.info(format!("Session RESUME: {}", session_id));
                self.subscribe(&mut state);
                return Ok(());
            }
            state.phase = TrackingPhase::Starting;
            state.generation
        };

        let result = self.api.start_session().await;

        let mut state = self.lock();
        if state.generation != generation {
            let session_id = result.as_ref().map(|r| r.session_id.as_str()).unwrap_or("-");
            state
                .log
                .warn(format!("Start of session {} completed after logout; discarded", session_id));
            return Err(TrackerError::Cancelled);
        }

        match result {
            Ok(response) => {
                let started_at = response.start_time.unwrap_or_else(now_iso_utc);
                let record = SessionRecord::new(response.session_id, started_at);
                if let Err(e) = self.store.save(&record) {
                    tracing::warn!("Could not persist session {}: {:#}", record.session_id, e);
                }

                state.pipeline.reset_session();
                state.log.info(format!("Session START: {}", record.session_id));
                state.session = Some(record);
                self.subscribe(&mut state);
                Ok(())
            }
            Err(e) => {
                let err = TrackerError::api(e, "Start session failed");
                state.phase = TrackingPhase::Idle;
                state.session = None;
                state.fail(&err, "Start FAIL");
                Err(err)
            }
        }
    }

    /// Re-subscribe to an existing local session without a backend start call
    pub async fn resume(&self) -> Result<(), TrackerError> {
        if self.lock().session.is_none() {
            return Err(TrackerError::NoSession);
        }
        self.start().await
    }

    /// Runs under the state lock so a concurrent logout cannot interleave
    fn subscribe(&self, state: &mut TrackerState) {
        state.phase = TrackingPhase::Watching;

        if state.watchers.subscription.is_none() {
            let stream = self.locations.watch();
            let service = self.clone();
            state.watchers.subscription =
                Some(tokio::spawn(async move { service.run_subscription(stream).await }));

            let service = self.clone();
            state.watchers.one_shot = Some(tokio::spawn(async move {
                let result = service.locations.current_position().await;
                service.handle_location(result);
            }));
        }

        if state.watchers.flush_timer.is_none() {
            let service = self.clone();
            let period = self.flush_interval;
            state.watchers.flush_timer = Some(tokio::spawn(async move {
                let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
                loop {
                    ticker.tick().await;
                    // Detached so cancelling the timer never cancels a request mid-flight
                    service.spawn_flush();
                }
            }));
        }
    }

    async fn run_subscription(&self, mut stream: SampleStream) {
        while let Some(item) = stream.next().await {
            self.handle_location(item);
        }
        tracing::info!("Location subscription ended");
    }

    pub fn handle_location(&self, item: Result<RawSample, LocationError>) {
        match item {
            Ok(sample) => self.handle_position(sample),
            Err(e) => self.handle_location_error(e),
        }
    }

    /// Feed one raw sample through the pipeline. Ignored unless watching.
    pub fn handle_position(&self, sample: RawSample) {
        let enqueued = {
            let mut state = self.lock();
            if state.phase != TrackingPhase::Watching {
                return;
            }
            let outcome = state.pipeline.ingest(sample, now_ms());
            state.log_sample(&outcome);
            outcome.enqueued()
        };

        if enqueued {
            self.spawn_flush();
        }
    }

    /// Surfaces the error; the session stays active
    pub fn handle_location_error(&self, error: LocationError) {
        let mut state = self.lock();
        if state.phase != TrackingPhase::Watching {
            return;
        }
        state.last_error = Some(error.to_string());
        state.log.error(format!("watchPosition error: {}", error));
    }

    fn spawn_flush(&self) {
        let service = self.clone();
        tokio::spawn(async move {
            service.flush().await;
        });
    }

    /// Deliver one batch unless another flush is already in flight.
    /// Only a watching or paused session flushes; stop drains on its own.
    pub async fn flush(&self) -> FlushOutcome {
        let Ok(_gate) = self.flush_gate.try_lock() else {
            return FlushOutcome::InFlight;
        };
        self.flush_batch(false).await
    }

    /// Must run to completion once started: the batch is out of the queue
    /// until the request resolves.
    async fn flush_batch(&self, draining: bool) -> FlushOutcome {
        let (session_id, generation, batch) = {
            let mut state = self.lock();
            if !draining && !matches!(state.phase, TrackingPhase::Watching | TrackingPhase::Paused) {
                return FlushOutcome::Idle;
            }
            let Some(session_id) = state.session.as_ref().map(|s| s.session_id.clone()) else {
                return FlushOutcome::Idle;
            };
            let batch = state.pipeline.take_batch();
            if batch.is_empty() {
                return FlushOutcome::Idle;
            }
            (session_id, state.generation, batch)
        };

        let result = self.api.ingest_points(&session_id, &batch).await;

        let mut state = self.lock();
        let same_session = state.generation == generation
            && state.session.as_ref().is_some_and(|s| s.session_id == session_id);
        match result {
            Ok(response) => {
                state.last_sent_at = Some(now_iso_utc());
                state.log.info(format!(
                    "Flush OK: accepted={} inserted={} (sent {})",
                    response.accepted,
                    response.inserted,
                    batch.len()
                ));
                FlushOutcome::Sent {
                    sent: batch.len(),
                    response,
                }
            }
            Err(e) => {
                let kind = FlushFailureKind::classify(&e);
                if !same_session {
                    state.log.warn(format!(
                        "Dropped {} points of ended session {} after failed flush",
                        batch.len(),
                        session_id
                    ));
                    return FlushOutcome::Failed { requeued: 0, kind };
                }

                let requeued = batch.len();
                state.pipeline.requeue_front(batch);

                let code = e
                    .status()
                    .map(|s| s.to_string())
                    .unwrap_or_else(|| "?".to_string());
                state
                    .log
                    .warn(format!("Flush FAIL ({}): {}", code, e.message_or("Flush failed")));
                if let Some(message) = kind.user_message() {
                    state.last_error = Some(message.to_string());
                }
                FlushOutcome::Failed { requeued, kind }
            }
        }
    }

    /// Bounded by attempts, not time; points may remain queued afterwards
    async fn drain(&self) {
        for _ in 0..self.drain_attempts {
            // Waits out an in-flight flush instead of skipping the attempt
            let _gate = self.flush_gate.lock().await;
            if !self.lock().pipeline.has_pending() {
                break;
            }
            self.flush_batch(true).await;
        }
    }

    /// Stop watching, drain the queue and close the session on the backend
    pub async fn stop(&self) -> Result<(), TrackerError> {
        let (session_id, generation) = {
            let mut state = self.lock();
            state.last_error = None;
            if state.phase.is_busy() {
                return Err(TrackerError::Busy);
            }
            state.watchers.abort_all();

            let Some(session_id) = state.session.as_ref().map(|s| s.session_id.clone()) else {
                state.phase = TrackingPhase::Idle;
                return Ok(());
            };
            state.phase = TrackingPhase::Stopping;

            if let Some(outcome) = state.pipeline.force_emit(now_ms()) {
                state.log_emit(&outcome);
            }
            (session_id, state.generation)
        };

        self.drain().await;

        let request = {
            let state = self.lock();
            let last = state.pipeline.last_sample();
            StopSessionRequest {
                stop_time: now_iso_utc(),
                stop_lat: last.map(|s| s.latitude),
                stop_lon: last.map(|s| s.longitude),
            }
        };

        let result = self.api.stop_session(&session_id, &request).await;

        let mut state = self.lock();
        if state.generation != generation {
            state
                .log
                .info(format!("Stop of session {} completed after logout", session_id));
            return Ok(());
        }

        match result {
            Ok(()) => {
                if let Err(e) = self.store.clear() {
                    tracing::warn!("Could not clear persisted session: {:#}", e);
                }
                let dropped = state.pipeline.clear_queue();
                if dropped > 0 {
                    state.log.warn(format!(
                        "Discarded {} undelivered points of closed session {}",
                        dropped, session_id
                    ));
                }
                state.session = None;
                state.phase = TrackingPhase::Idle;
                state.log.info(format!("Session STOP: {}", session_id));
                Ok(())
            }
            Err(e) => {
                let err = TrackerError::api(e, "Stop failed");
                state.phase = TrackingPhase::Paused;
                state.fail(&err, "Stop FAIL");
                Err(err)
            }
        }
    }

    /// Forget the local session regardless of backend state
    pub fn logout(&self) {
        if let Err(e) = self.store.clear() {
            tracing::warn!("Could not clear persisted session: {:#}", e);
        }
        let mut state = self.lock();
        state.generation += 1;
        state.watchers.abort_all();
        state.pipeline.reset_session();
        state.session = None;
        state.phase = TrackingPhase::Idle;
        state.last_error = None;
        state.log.info("Logged out; local session cleared");
    }

    pub fn phase(&self) -> TrackingPhase {
        self.lock().phase
    }

    pub fn queue_len(&self) -> usize {
        self.lock().pipeline.queue_len()
    }

    pub fn snapshot(&self) -> TrackerSnapshot {
        let state = self.lock();
        let session_id = state.session.as_ref().map(|s| s.session_id.clone());
        let session_started_at = state.session.as_ref().map(|s| s.started_at.clone());
        let duration_label = session_started_at
            .as_deref()
            .and_then(|start| elapsed_since(start, now_ms()))
            .map(format_duration_ms)
            .unwrap_or_else(|| "-".to_string());
        let distance_m = state.pipeline.distance_m();
        let raw_path = state.pipeline.raw_path();
        let last_position = state.pipeline.last_sample().cloned();

        TrackerSnapshot {
            phase: state.phase,
            tracking: session_id.is_some(),
            watching: state.phase == TrackingPhase::Watching,
            resume_available: state.phase == TrackingPhase::Paused && session_id.is_some(),
            busy: state.phase.is_busy(),
            session_id,
            session_started_at,
            duration_label,
            queue_len: state.pipeline.queue_len(),
            last_sent_at: state.last_sent_at.clone(),
            distance_m,
            distance_km: format_distance_km(distance_m),
            path_points: state.pipeline.path_len(),
            display_path: state.pipeline.display_path(),
            raw_path,
            last_position_label: format_coords(last_position.as_ref()),
            last_position,
            last_error: state.last_error.clone(),
            activity: state.log.entries(),
        }
    }
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::session_store::MemorySessionStore;
    use crate::domain::position::QueuedPoint;
    use crate::domain::session::{PointsPage, PointsQuery, SessionSummary, StartSessionResponse};
    use crate::error::ApiError;
    use async_trait::async_trait;
    use std::collections::{HashSet, VecDeque};
    use tokio::sync::{mpsc, Semaphore};
    use tokio_stream::wrappers::UnboundedReceiverStream;

    #[derive(Default)]
    struct FakeApiState {
        start_calls: usize,
        start_failure: Option<ApiError>,
        ingest_calls: usize,
        ingest_failures: VecDeque<ApiError>,
        ingest_always_fails: Option<ApiError>,
        delivered: Vec<QueuedPoint>,
        stop_entered: usize,
        stop_calls: Vec<(String, StopSessionRequest)>,
        stop_failure: Option<ApiError>,
    }

    #[derive(Default)]
    struct FakeApi {
        state: Mutex<FakeApiState>,
        start_gate: Option<Semaphore>,
        ingest_gate: Option<Semaphore>,
        stop_gate: Option<Semaphore>,
    }

    impl FakeApi {
        fn with<F: FnOnce(&mut FakeApiState)>(&self, f: F) {
            f(&mut self.state.lock().unwrap());
        }

        fn delivered(&self) -> Vec<QueuedPoint> {
            self.state.lock().unwrap().delivered.clone()
        }
    }

    fn server_error() -> ApiError {
        ApiError::Status {
            status: 500,
            message: "boom".to_string(),
        }
    }

    #[async_trait]
    impl TrackingApi for FakeApi {
        async fn start_session(&self) -> Result<StartSessionResponse, ApiError> {
            if let Some(gate) = &self.start_gate {
                let _permit = gate.acquire().await.unwrap();
            }
            let mut state = self.state.lock().unwrap();
            state.start_calls += 1;
            if let Some(err) = state.start_failure.clone() {
                return Err(err);
            }
            Ok(StartSessionResponse {
                session_id: format!("s-{}", state.start_calls),
                start_time: Some("2024-05-01T10:00:00.000Z".to_string()),
                status: Some("ACTIVE".to_string()),
            })
        }

        async fn stop_session(&self, session_id: &str, request: &StopSessionRequest) -> Result<(), ApiError> {
            {
                self.state.lock().unwrap().stop_entered += 1;
            }
            if let Some(gate) = &self.stop_gate {
                let _permit = gate.acquire().await.unwrap();
            }
            let mut state = self.state.lock().unwrap();
            state.stop_calls.push((session_id.to_string(), request.clone()));
            match state.stop_failure.clone() {
                Some(err) => Err(err),
                None => Ok(()),
            }
        }

        async fn ingest_points(&self, _session_id: &str, points: &[QueuedPoint]) -> Result<IngestResponse, ApiError> {
            {
                self.state.lock().unwrap().ingest_calls += 1;
            }
            if let Some(gate) = &self.ingest_gate {
                let _permit = gate.acquire().await.unwrap();
            }
            let mut state = self.state.lock().unwrap();
            if let Some(err) = state.ingest_always_fails.clone() {
                return Err(err);
            }
            if let Some(err) = state.ingest_failures.pop_front() {
                return Err(err);
            }
            state.delivered.extend_from_slice(points);
            Ok(IngestResponse {
                accepted: points.len() as u64,
                inserted: points.len() as u64,
            })
        }

        async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
            Ok(Vec::new())
        }

        async fn session_points(&self, _session_id: &str, _query: PointsQuery) -> Result<PointsPage, ApiError> {
            Ok(PointsPage::default())
        }
    }

    struct ChannelLocations {
        available: bool,
        receiver: Mutex<Option<mpsc::UnboundedReceiver<Result<RawSample, LocationError>>>>,
    }

    impl ChannelLocations {
        fn new() -> (Self, mpsc::UnboundedSender<Result<RawSample, LocationError>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            let locations = Self {
                available: true,
                receiver: Mutex::new(Some(rx)),
            };
            (locations, tx)
        }

        fn unavailable() -> Self {
            Self {
                available: false,
                receiver: Mutex::new(None),
            }
        }
    }

    #[async_trait]
    impl LocationProvider for ChannelLocations {
        fn is_available(&self) -> bool {
            self.available
        }

        fn watch(&self) -> SampleStream {
            match self.receiver.lock().unwrap().take() {
                Some(rx) => UnboundedReceiverStream::new(rx).boxed(),
                None => futures::stream::pending().boxed(),
            }
        }

        async fn current_position(&self) -> Result<RawSample, LocationError> {
            futures::future::pending().await
        }
    }

    struct Harness {
        service: TrackingService,
        api: Arc<FakeApi>,
        store: Arc<MemorySessionStore>,
        sender: mpsc::UnboundedSender<Result<RawSample, LocationError>>,
    }

    fn harness_with(api: FakeApi, store: MemorySessionStore) -> Harness {
        harness_with_settings(api, store, PipelineSettings::default())
    }

    fn harness_with_settings(api: FakeApi, store: MemorySessionStore, settings: PipelineSettings) -> Harness {
        let api = Arc::new(api);
        let store = Arc::new(store);
        let (locations, sender) = ChannelLocations::new();
        let service = TrackingService::new(
            api.clone(),
            Arc::new(locations),
            store.clone(),
            settings,
        );
        Harness {
            service,
            api,
            store,
            sender,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeApi::default(), MemorySessionStore::new())
    }

    /// Samples roughly 111 m apart, one every 5 s
    fn walk(n: usize) -> Vec<RawSample> {
        (0..n)
            .map(|i| RawSample::new(10.0 + i as f64 * 0.001, 20.0, i as i64 * 5_000).with_accuracy(5.0))
            .collect()
    }

    async fn wait_until<F: Fn() -> bool>(condition: F) {
        for _ in 0..1_000 {
            if condition() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition not reached");
    }

    #[tokio::test]
    async fn test_start_persists_session_and_watches() {
        let h = harness();
        h.service.start().await.unwrap();

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Watching);
        assert!(snapshot.tracking && snapshot.watching);
        assert_eq!(snapshot.session_id.as_deref(), Some("s-1"));
        assert_eq!(
            h.store.load().unwrap(),
            Some(SessionRecord::new("s-1".into(), "2024-05-01T10:00:00.000Z".into()))
        );
        assert_eq!(h.service.start().await, Err(TrackerError::AlreadyWatching));
    }

    #[tokio::test]
    async fn test_start_failure_reverts_to_idle() {
        let api = FakeApi::default();
        api.with(|s| s.start_failure = Some(ApiError::Status { status: 503, message: String::new() }));
        let h = harness_with(api, MemorySessionStore::new());

        let err = h.service.start().await.unwrap_err();
        assert_eq!(err.to_string(), "Start session failed");

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Idle);
        assert!(!snapshot.tracking);
        assert_eq!(snapshot.last_error.as_deref(), Some("Start session failed"));
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_start_without_location_capability() {
        let api = Arc::new(FakeApi::default());
        let service = TrackingService::new(
            api.clone(),
            Arc::new(ChannelLocations::unavailable()),
            Arc::new(MemorySessionStore::new()),
            PipelineSettings::default(),
        );
        assert_eq!(service.start().await, Err(TrackerError::CapabilityUnavailable));
        assert_eq!(service.phase(), TrackingPhase::Idle);
        api.with(|s| assert_eq!(s.start_calls, 0));
    }

    #[tokio::test]
    async fn test_persisted_session_resumes_without_backend_start() {
        let record = SessionRecord::new("persisted".into(), "2024-05-01T09:00:00.000Z".into());
        let h = harness_with(FakeApi::default(), MemorySessionStore::with_record(record));

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Paused);
        assert!(snapshot.resume_available);

        h.service.resume().await.unwrap();
        assert_eq!(h.service.phase(), TrackingPhase::Watching);
        assert_eq!(h.service.snapshot().session_id.as_deref(), Some("persisted"));
        h.api.with(|s| assert_eq!(s.start_calls, 0));
    }

    #[tokio::test]
    async fn test_resume_without_session() {
        let h = harness();
        assert_eq!(h.service.resume().await, Err(TrackerError::NoSession));
    }

    #[tokio::test]
    async fn test_first_sample_immediate_then_window_average_on_stop() {
        let h = harness();
        h.service.start().await.unwrap();

        h.service.handle_position(RawSample::new(10.0, 20.0, 1_000));
        h.service.handle_position(RawSample::new(10.0001, 20.0001, 1_400));
        h.service.handle_position(RawSample::new(10.0002, 20.0002, 1_900));

        // only the first sample is out; the other two wait for their window
        assert_eq!(h.service.queue_len(), 1);

        h.service.stop().await.unwrap();
        let delivered = h.api.delivered();
        assert_eq!(delivered.len(), 2);
        assert_eq!((delivered[0].lat, delivered[0].lon), (10.0, 20.0));
        assert!((delivered[1].lat - 10.00015).abs() < 1e-9);
        assert!((delivered[1].lon - 20.00015).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failed_flush_is_retried_without_duplicates() {
        let api = FakeApi::default();
        api.with(|s| s.ingest_failures.push_back(server_error()));
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();

        for sample in walk(3) {
            h.service.handle_position(sample);
        }
        let queued = h.service.queue_len();
        assert!(queued >= 1);

        assert_eq!(
            h.service.flush().await,
            FlushOutcome::Failed {
                requeued: queued,
                kind: FlushFailureKind::Other
            }
        );
        assert_eq!(h.service.queue_len(), queued);
        assert!(h.service.snapshot().last_error.is_none());

        assert!(matches!(h.service.flush().await, FlushOutcome::Sent { .. }));
        assert_eq!(h.service.queue_len(), 0);
        assert!(h.service.snapshot().last_sent_at.is_some());

        let delivered = h.api.delivered();
        let unique: HashSet<_> = delivered.iter().map(|p| p.event_id.clone()).collect();
        assert_eq!(unique.len(), delivered.len());
        assert_eq!(delivered.len(), queued);
    }

    #[tokio::test]
    async fn test_requeue_preserves_order_with_later_points() {
        let api = FakeApi::default();
        api.with(|s| s.ingest_failures.push_back(server_error()));
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();

        let samples = walk(12);
        for sample in &samples[..6] {
            h.service.handle_position(sample.clone());
        }
        assert!(matches!(h.service.flush().await, FlushOutcome::Failed { .. }));
        for sample in &samples[6..] {
            h.service.handle_position(sample.clone());
        }
        h.service.stop().await.unwrap();

        let delivered = h.api.delivered();
        let lats: Vec<f64> = delivered.iter().map(|p| p.lat).collect();
        let mut sorted = lats.clone();
        sorted.sort_by(|a, b| a.partial_cmp(b).unwrap());
        assert_eq!(lats, sorted);
        assert_eq!(delivered.len(), 12);
    }

    #[tokio::test]
    async fn test_flush_failure_guidance() {
        let api = FakeApi::default();
        api.with(|s| {
            s.ingest_failures.push_back(ApiError::Status { status: 400, message: String::new() });
            s.ingest_failures.push_back(ApiError::Status { status: 401, message: String::new() });
        });
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();
        h.service.handle_position(RawSample::new(10.0, 20.0, 0));

        h.service.flush().await;
        assert_eq!(
            h.service.snapshot().last_error.as_deref(),
            Some("Session is not ACTIVE / invalid. Please restart tracking.")
        );
        h.service.flush().await;
        assert_eq!(
            h.service.snapshot().last_error.as_deref(),
            Some("Unauthorized. Please login again.")
        );
        assert_eq!(h.service.queue_len(), 1);
    }

    #[tokio::test]
    async fn test_flush_is_single_flight() {
        let api = FakeApi {
            ingest_gate: Some(Semaphore::new(0)),
            ..FakeApi::default()
        };
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();
        h.service.handle_position(RawSample::new(10.0, 20.0, 0));

        // the opportunistic flush spawned by the enqueue blocks in the backend
        let api = h.api.clone();
        wait_until(|| api.state.lock().unwrap().ingest_calls == 1).await;

        assert_eq!(h.service.flush().await, FlushOutcome::InFlight);
        assert_eq!(h.api.state.lock().unwrap().ingest_calls, 1);

        h.api.ingest_gate.as_ref().unwrap().add_permits(1);
        let api = h.api.clone();
        wait_until(|| api.delivered().len() == 1).await;
        assert_eq!(h.service.flush().await, FlushOutcome::Idle);
    }

    #[tokio::test]
    async fn test_start_and_stop_are_mutually_exclusive() {
        let api = FakeApi {
            start_gate: Some(Semaphore::new(0)),
            ..FakeApi::default()
        };
        let h = harness_with(api, MemorySessionStore::new());

        let service = h.service.clone();
        let pending_start = tokio::spawn(async move { service.start().await });
        wait_until(|| h.service.phase() == TrackingPhase::Starting).await;

        assert_eq!(h.service.start().await, Err(TrackerError::Busy));
        assert_eq!(h.service.stop().await, Err(TrackerError::Busy));

        h.api.start_gate.as_ref().unwrap().add_permits(1);
        pending_start.await.unwrap().unwrap();
        assert_eq!(h.service.phase(), TrackingPhase::Watching);
    }

    #[tokio::test]
    async fn test_stop_sends_last_position_and_clears_session() {
        let h = harness();
        h.service.start().await.unwrap();
        for sample in walk(4) {
            h.service.handle_position(sample);
        }
        h.service.stop().await.unwrap();

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Idle);
        assert!(!snapshot.tracking);
        assert_eq!(snapshot.queue_len, 0);
        assert!(h.store.load().unwrap().is_none());

        h.api.with(|s| {
            assert_eq!(s.stop_calls.len(), 1);
            let (id, request) = &s.stop_calls[0];
            assert_eq!(id, "s-1");
            assert_eq!(request.stop_lat, Some(10.0 + 3.0 * 0.001));
            assert_eq!(request.stop_lon, Some(20.0));
            assert_eq!(s.delivered.len(), 4);
        });
    }

    #[tokio::test]
    async fn test_stop_without_position_sends_nulls() {
        let h = harness();
        h.service.start().await.unwrap();
        h.service.stop().await.unwrap();
        h.api.with(|s| {
            let (_, request) = &s.stop_calls[0];
            assert_eq!(request.stop_lat, None);
            assert_eq!(request.stop_lon, None);
        });
    }

    #[tokio::test]
    async fn test_stop_failure_keeps_session_and_queue() {
        let api = FakeApi::default();
        api.with(|s| {
            s.ingest_always_fails = Some(server_error());
            s.stop_failure = Some(ApiError::Transport("connection refused".into()));
        });
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();
        for sample in walk(3) {
            h.service.handle_position(sample);
        }

        let err = h.service.stop().await.unwrap_err();
        assert_eq!(err.to_string(), "Stop failed");

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Paused);
        assert!(snapshot.tracking && !snapshot.watching && snapshot.resume_available);
        // undelivered points survive a failed drain
        assert_eq!(snapshot.queue_len, 3);
        assert!(h.store.load().unwrap().is_some());
        h.api.with(|s| assert!(s.ingest_calls >= 10));

        // no new samples are accepted while paused
        h.service.handle_position(RawSample::new(50.0, 50.0, 100_000));
        assert_eq!(h.service.queue_len(), 3);

        h.service.resume().await.unwrap();
        assert_eq!(h.service.phase(), TrackingPhase::Watching);
        h.api.with(|s| assert_eq!(s.start_calls, 1));
    }

    #[tokio::test]
    async fn test_location_error_surfaced_session_stays_active() {
        let h = harness();
        h.service.start().await.unwrap();
        h.service.handle_location(Err(LocationError::PermissionDenied));

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Watching);
        assert_eq!(snapshot.last_error.as_deref(), Some("1: permission denied"));
        assert!(snapshot.activity[0].ends_with("watchPosition error: 1: permission denied"));
    }

    #[tokio::test]
    async fn test_subscription_stream_feeds_pipeline() {
        let h = harness();
        h.service.start().await.unwrap();
        // the third sample stays in the open averaging bucket
        for sample in walk(3) {
            h.sender.send(Ok(sample)).unwrap();
        }

        let api = h.api.clone();
        wait_until(|| api.delivered().len() == 2).await;
        assert_eq!(h.service.queue_len(), 0);
        assert_eq!(h.service.snapshot().path_points, 2);
    }

    #[tokio::test]
    async fn test_new_session_resets_path_and_distance() {
        let h = harness();
        h.service.start().await.unwrap();
        for sample in walk(3) {
            h.service.handle_position(sample);
        }
        assert!(h.service.snapshot().distance_m > 0.0);
        h.service.stop().await.unwrap();

        h.service.start().await.unwrap();
        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.session_id.as_deref(), Some("s-2"));
        assert_eq!(snapshot.distance_m, 0.0);
        assert!(snapshot.raw_path.is_empty());
    }

    #[tokio::test]
    async fn test_logout_clears_local_session() {
        let h = harness();
        h.service.start().await.unwrap();
        h.service.handle_position(RawSample::new(10.0, 20.0, 0));
        h.service.logout();

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Idle);
        assert!(!snapshot.tracking);
        assert_eq!(snapshot.queue_len, 0);
        assert!(h.store.load().unwrap().is_none());
        h.api.with(|s| assert!(s.stop_calls.is_empty()));
    }

    #[tokio::test]
    async fn test_logout_during_start_discards_late_session() {
        let api = FakeApi {
            start_gate: Some(Semaphore::new(0)),
            ..FakeApi::default()
        };
        let h = harness_with(api, MemorySessionStore::new());

        let service = h.service.clone();
        let pending_start = tokio::spawn(async move { service.start().await });
        wait_until(|| h.service.phase() == TrackingPhase::Starting).await;

        h.service.logout();
        h.api.start_gate.as_ref().unwrap().add_permits(1);
        assert_eq!(pending_start.await.unwrap(), Err(TrackerError::Cancelled));

        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Idle);
        assert!(snapshot.session_id.is_none());
        assert!(!snapshot.watching);
        assert!(h.store.load().unwrap().is_none());

        // the tracker is usable again afterwards
        h.service.start().await.unwrap();
        assert_eq!(h.service.snapshot().session_id.as_deref(), Some("s-2"));
    }

    #[tokio::test]
    async fn test_flush_is_refused_while_stopping() {
        let api = FakeApi {
            stop_gate: Some(Semaphore::new(0)),
            ..FakeApi::default()
        };
        api.with(|s| s.ingest_always_fails = Some(server_error()));
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();
        for sample in walk(3) {
            h.service.handle_position(sample);
        }

        let service = h.service.clone();
        let pending_stop = tokio::spawn(async move { service.stop().await });
        let api = h.api.clone();
        wait_until(|| api.state.lock().unwrap().stop_entered == 1).await;
        assert_eq!(h.service.phase(), TrackingPhase::Stopping);

        // the drain gave up; a late timer flush must not reach the closing session
        let calls_before = h.api.state.lock().unwrap().ingest_calls;
        h.api.with(|s| s.ingest_always_fails = None);
        assert_eq!(h.service.flush().await, FlushOutcome::Idle);
        h.api.with(|s| {
            assert_eq!(s.ingest_calls, calls_before);
            assert!(s.delivered.is_empty());
        });

        h.api.stop_gate.as_ref().unwrap().add_permits(1);
        pending_stop.await.unwrap().unwrap();
        assert_eq!(h.service.phase(), TrackingPhase::Idle);
    }

    #[tokio::test]
    async fn test_failed_flush_after_logout_is_not_requeued() {
        let api = FakeApi {
            ingest_gate: Some(Semaphore::new(0)),
            ..FakeApi::default()
        };
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();
        h.service.handle_position(RawSample::new(10.0, 20.0, 0));

        let api = h.api.clone();
        wait_until(|| api.state.lock().unwrap().ingest_calls == 1).await;
        h.api.with(|s| s.ingest_always_fails = Some(server_error()));
        h.service.logout();

        h.api.ingest_gate.as_ref().unwrap().add_permits(1);
        let service = h.service.clone();
        wait_until(|| {
            service
                .snapshot()
                .activity
                .iter()
                .any(|e| e.ends_with("Dropped 1 points of ended session s-1 after failed flush"))
        })
        .await;
        assert_eq!(h.service.queue_len(), 0);
        assert_eq!(h.service.phase(), TrackingPhase::Idle);
    }

    #[tokio::test]
    async fn test_stop_succeeds_after_failed_drain() {
        let api = FakeApi::default();
        api.with(|s| s.ingest_always_fails = Some(server_error()));
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();
        for sample in walk(3) {
            h.service.handle_position(sample);
        }

        h.service.stop().await.unwrap();

        h.api.with(|s| {
            assert_eq!(s.ingest_calls, 10);
            assert_eq!(s.stop_calls.len(), 1);
            assert!(s.delivered.is_empty());
        });
        let snapshot = h.service.snapshot();
        assert_eq!(snapshot.phase, TrackingPhase::Idle);
        assert!(!snapshot.tracking);
        assert_eq!(snapshot.queue_len, 0);
        assert!(snapshot
            .activity
            .iter()
            .any(|e| e.ends_with("Discarded 3 undelivered points of closed session s-1")));
        assert!(h.store.load().unwrap().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_timer_delivers_requeued_batch() {
        let api = FakeApi::default();
        api.with(|s| s.ingest_failures.push_back(server_error()));
        let h = harness_with(api, MemorySessionStore::new());
        h.service.start().await.unwrap();
        h.service.handle_position(RawSample::new(10.0, 20.0, 0));

        // the opportunistic flush fails and puts the point back
        let api = h.api.clone();
        wait_until(|| api.state.lock().unwrap().ingest_calls == 1).await;
        assert_eq!(h.service.queue_len(), 1);

        tokio::time::advance(Duration::from_millis(7_900)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(h.api.delivered().is_empty());

        tokio::time::advance(Duration::from_millis(200)).await;
        let api = h.api.clone();
        wait_until(|| api.delivered().len() == 1).await;
        assert_eq!(h.service.queue_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_timer_respects_floor() {
        let api = FakeApi::default();
        api.with(|s| s.ingest_failures.push_back(server_error()));
        let settings = PipelineSettings {
            flush_interval_secs: 1,
            ..PipelineSettings::default()
        };
        let h = harness_with_settings(api, MemorySessionStore::new(), settings);
        h.service.start().await.unwrap();
        h.service.handle_position(RawSample::new(10.0, 20.0, 0));

        let api = h.api.clone();
        wait_until(|| api.state.lock().unwrap().ingest_calls == 1).await;

        tokio::time::advance(Duration::from_millis(1_500)).await;
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        assert!(h.api.delivered().is_empty());

        tokio::time::advance(Duration::from_millis(600)).await;
        let api = h.api.clone();
        wait_until(|| api.delivered().len() == 1).await;
    }
}
