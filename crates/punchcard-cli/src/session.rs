//! Kiosk capture session.
//!
//! One session owns one capture device for its whole lifetime and drives
//! it through a small state machine:
//!
//! ```text
//! Idle -> Initializing -> Ready -> Observing -> Confirming -> Committing
//!                |                    ^              |            |
//!                v                    +--------------+------------+-> Cooldown
//!              Error
//! ```
//!
//! Face capture is tick-driven (about once a second); RFID capture is
//! event-driven and waits on the reader. Device calls are blocking and run
//! on the blocking pool. Only initialization failures are persistent;
//! every rejected punch returns the session to observing.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use punchcard_core::geofence;
use punchcard_core::{
    CaptureMethod, Direction, GeoPoint, GeofenceConfig, GeofenceDecision, Observation,
    PunchOrigin, PunchOutcome, PunchRequest, RfidCode, ServerSettings, StabilityFilter,
    WorkerEmbeddings, WorkerId, DEFAULT_COOLDOWN, DEFAULT_MATCH_THRESHOLD,
    DEFAULT_STABILITY_THRESHOLD, DEFAULT_STABILITY_WINDOW,
};
use punchcard_hw::{
    CaptureError, FaceSample, FaceSource, LocationError, LocationProvider, Readiness, RfidReader,
    DEFAULT_LOCATION_TIMEOUT,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::client::PunchClient;
use crate::mirror::SharedMirror;

/// Who is operating the kiosk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operator {
    /// Punches for any enrolled worker.
    Admin,
    /// Self-service: may only punch for this worker.
    Employee(WorkerId),
}

/// Explicit per-session context, passed in rather than read from globals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionContext {
    pub origin: PunchOrigin,
    pub operator: Operator,
}

impl SessionContext {
    /// Admin-operated console at the shop.
    pub fn console() -> Self {
        Self {
            origin: PunchOrigin::Console,
            operator: Operator::Admin,
        }
    }

    /// Employee self-service from their own device.
    pub fn personal(worker_id: WorkerId) -> Self {
        Self {
            origin: PunchOrigin::PersonalDevice,
            operator: Operator::Employee(worker_id),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Face detection cadence.
    pub tick_interval: Duration,
    /// Bound on one face sample.
    pub sample_timeout: Duration,
    /// How long to wait for camera metadata before capturing unscored.
    pub metadata_wait: Duration,
    /// How long one RFID wait lasts before the session checks for close.
    pub rfid_poll: Duration,
    pub location_timeout: Duration,
    pub stability_window: Duration,
    pub stability_threshold: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            sample_timeout: Duration::from_secs(3),
            metadata_wait: Duration::from_secs(3),
            rfid_poll: Duration::from_millis(500),
            location_timeout: DEFAULT_LOCATION_TIMEOUT,
            stability_window: DEFAULT_STABILITY_WINDOW,
            stability_threshold: DEFAULT_STABILITY_THRESHOLD,
        }
    }
}

/// The capture device a session owns.
pub enum Device {
    Face(Box<dyn FaceSource>),
    Rfid(Box<dyn RfidReader>),
}

impl Device {
    pub fn method(&self) -> CaptureMethod {
        match self {
            Device::Face(_) => CaptureMethod::Face,
            Device::Rfid(_) => CaptureMethod::Rfid,
        }
    }

    fn open(&mut self, metadata_wait: Duration) -> Result<Readiness, CaptureError> {
        match self {
            Device::Face(source) => source.open(metadata_wait),
            Device::Rfid(reader) => reader.open().map(|()| Readiness::Scored),
        }
    }

    fn sample(&mut self, timeout: Duration) -> Result<FaceSample, CaptureError> {
        match self {
            Device::Face(source) => source.sample(timeout),
            Device::Rfid(_) => Err(CaptureError::CaptureFailed("not a face source".into())),
        }
    }

    fn next_code(&mut self, timeout: Duration) -> Result<Option<String>, CaptureError> {
        match self {
            Device::Rfid(reader) => reader.next_code(timeout),
            Device::Face(_) => Err(CaptureError::CaptureFailed("not an RFID reader".into())),
        }
    }

    fn close(&mut self) {
        match self {
            Device::Face(source) => source.close(),
            Device::Rfid(reader) => reader.close(),
        }
    }
}

/// Persistent session failure. The session stops in [`SessionState::Error`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("capture device unavailable: {0}")]
    DeviceUnavailable(String),
    #[error("capture permission denied: {0}")]
    PermissionDenied(String),
    #[error("capture device timed out: {0}")]
    Timeout(String),
    #[error("attendance server unavailable: {0}")]
    ServerUnavailable(String),
    #[error("unsupported session: {0}")]
    Unsupported(String),
}

impl From<CaptureError> for SessionError {
    fn from(e: CaptureError) -> Self {
        match e {
            CaptureError::DeviceNotFound(device) => SessionError::DeviceUnavailable(device),
            CaptureError::PermissionDenied(device) => SessionError::PermissionDenied(device),
            CaptureError::DeviceBusy => SessionError::DeviceUnavailable("device busy".into()),
            CaptureError::Timeout(after) => SessionError::Timeout(format!("{after:?}")),
            CaptureError::CaptureFailed(msg) => SessionError::DeviceUnavailable(msg),
            CaptureError::Closed => SessionError::DeviceUnavailable("device closed".into()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionState {
    Idle,
    Initializing,
    Ready,
    Observing,
    Confirming,
    Committing,
    Cooldown,
    Error(SessionError),
}

/// Why a punch attempt did not produce a record.
#[derive(Debug, Clone, PartialEq)]
pub enum Rejection {
    CooldownActive {
        worker_id: WorkerId,
        remaining_seconds: u64,
    },
    OutOfRange {
        distance_meters: f64,
    },
    UnknownIdentity,
    LocationUnavailable(String),
    GeofenceNotConfigured,
    IdentityMismatch {
        expected: WorkerId,
        observed: WorkerId,
    },
    ServerUnavailable(String),
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::CooldownActive {
                worker_id,
                remaining_seconds,
            } => write!(f, "{worker_id} punched recently, wait {remaining_seconds}s"),
            Rejection::OutOfRange { distance_meters } => {
                write!(f, "outside the shop area ({distance_meters:.0} m away)")
            }
            Rejection::UnknownIdentity => f.write_str("not recognized"),
            Rejection::LocationUnavailable(reason) => write!(f, "location unavailable: {reason}"),
            Rejection::GeofenceNotConfigured => f.write_str("shop area not configured"),
            Rejection::IdentityMismatch { expected, observed } => {
                write!(f, "recognized {observed}, but this session belongs to {expected}")
            }
            Rejection::ServerUnavailable(reason) => write!(f, "server unavailable: {reason}"),
        }
    }
}

/// Notifications for the kiosk UI.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    State(SessionState),
    Accepted {
        worker_id: WorkerId,
        worker_name: String,
        direction: Direction,
        record_id: String,
    },
    Rejected(Rejection),
}

pub struct CaptureSession<C> {
    client: Arc<C>,
    mirror: SharedMirror,
    context: SessionContext,
    config: SessionConfig,
    /// Shared with in-flight blocking calls so shutdown can wait them out.
    device: Arc<Mutex<Option<Device>>>,
    method: CaptureMethod,
    location: Arc<Mutex<Option<Box<dyn LocationProvider>>>>,
    events: mpsc::UnboundedSender<SessionEvent>,
    state: SessionState,
    filter: StabilityFilter,
    settings: ServerSettings,
    gallery: Vec<WorkerEmbeddings>,
    geofence: GeofenceConfig,
    /// Codes the server has resolved during this session.
    rfid_workers: HashMap<String, WorkerId>,
    /// Worker whose cooldown the session is currently showing.
    cooling: Option<WorkerId>,
}

impl<C: PunchClient> CaptureSession<C> {
    pub fn new(
        client: Arc<C>,
        mirror: SharedMirror,
        context: SessionContext,
        device: Device,
    ) -> Self {
        let config = SessionConfig::default();
        let (events, _) = mpsc::unbounded_channel();
        Self {
            client,
            mirror,
            context,
            filter: StabilityFilter::new(config.stability_window, config.stability_threshold),
            config,
            method: device.method(),
            device: Arc::new(Mutex::new(Some(device))),
            location: Arc::new(Mutex::new(None)),
            events,
            state: SessionState::Idle,
            settings: ServerSettings {
                cooldown_seconds: DEFAULT_COOLDOWN.as_secs(),
                match_threshold: DEFAULT_MATCH_THRESHOLD,
                match_policy: Default::default(),
            },
            gallery: Vec::new(),
            geofence: GeofenceConfig::default(),
            rfid_workers: HashMap::new(),
            cooling: None,
        }
    }

    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.filter = StabilityFilter::new(config.stability_window, config.stability_threshold);
        self.config = config;
        self
    }

    pub fn with_location(self, provider: Box<dyn LocationProvider>) -> Self {
        *self.location.lock().unwrap_or_else(|e| e.into_inner()) = Some(provider);
        self
    }

    /// Start the session on the runtime.
    pub fn spawn(mut self) -> (SessionHandle, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        self.events = events;
        let (stop_tx, stop_rx) = oneshot::channel();
        let task = tokio::spawn(self.run(stop_rx));
        let handle = SessionHandle {
            stop: Some(stop_tx),
            task: Some(task),
        };
        (handle, rx)
    }

    async fn run(mut self, mut stop: oneshot::Receiver<()>) -> SessionState {
        tracing::info!(
            method = %self.method,
            origin = ?self.context.origin,
            "capture session starting"
        );
        self.set_state(SessionState::Initializing);

        let init = tokio::select! {
            _ = &mut stop => None,
            result = self.initialize() => Some(result),
        };
        match init {
            None => return self.shutdown().await,
            Some(Err(e)) => {
                tracing::error!(error = %e, "capture session failed to initialize");
                self.set_state(SessionState::Error(e));
                return self.shutdown().await;
            }
            Some(Ok(())) => {}
        }
        self.set_state(SessionState::Ready);
        self.set_state(SessionState::Observing);

        let mut ticker = match self.method {
            CaptureMethod::Face => {
                let mut ticker = tokio::time::interval(self.config.tick_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                Some(ticker)
            }
            CaptureMethod::Rfid => None,
        };

        loop {
            if let Some(ticker) = ticker.as_mut() {
                tokio::select! {
                    _ = &mut stop => break,
                    _ = ticker.tick() => {}
                }
            }
            let step = tokio::select! {
                _ = &mut stop => break,
                step = self.step() => step,
            };
            if let Err(e) = step {
                tracing::error!(error = %e, "capture session stopped");
                self.set_state(SessionState::Error(e));
                break;
            }
        }

        self.shutdown().await
    }

    async fn initialize(&mut self) -> Result<(), SessionError> {
        if matches!(self.context.operator, Operator::Employee(_))
            && self.method == CaptureMethod::Rfid
        {
            return Err(SessionError::Unsupported(
                "self-service sessions capture by face only".into(),
            ));
        }

        if self.method == CaptureMethod::Face {
            self.settings = self
                .client
                .settings()
                .await
                .map_err(|e| SessionError::ServerUnavailable(e.to_string()))?;
            self.gallery = self
                .client
                .gallery()
                .await
                .map_err(|e| SessionError::ServerUnavailable(e.to_string()))?;
            if self.gallery.is_empty() {
                tracing::warn!("gallery is empty; no face can be matched");
            }
            tracing::debug!(
                workers = self.gallery.len(),
                threshold = self.settings.match_threshold,
                policy = %self.settings.match_policy,
                "gallery loaded"
            );
        }

        if self.context.origin.requires_geofence(self.method) {
            self.geofence = self
                .client
                .geofence()
                .await
                .map_err(|e| SessionError::ServerUnavailable(e.to_string()))?;
            if !self.geofence.enabled {
                tracing::warn!("geofence disabled; self-service punches will be rejected");
            }
        }

        let metadata_wait = self.config.metadata_wait;
        match self.with_device(move |d| d.open(metadata_wait)).await? {
            Readiness::Scored => tracing::info!("capture device ready"),
            Readiness::Unscored => {
                tracing::warn!("capture device ready without metadata; frames are unscored")
            }
        }
        Ok(())
    }

    async fn step(&mut self) -> Result<(), SessionError> {
        let now = Utc::now();
        self.mirror.prune(now);
        if self.state == SessionState::Cooldown {
            let still_cooling = self
                .cooling
                .as_ref()
                .is_some_and(|w| self.mirror.remaining(w, now).is_some());
            if !still_cooling {
                self.cooling = None;
                self.set_state(SessionState::Observing);
            }
        }

        match self.method {
            CaptureMethod::Face => self.face_tick().await,
            CaptureMethod::Rfid => self.rfid_tick().await,
        }
    }

    async fn face_tick(&mut self) -> Result<(), SessionError> {
        let timeout = self.config.sample_timeout;
        let sample = match self.with_device(move |d| d.sample(timeout)).await {
            Ok(sample) => sample,
            Err(CaptureError::Timeout(after)) => {
                self.filter.observe(None, Instant::now());
                tracing::debug!(?after, "no frame this tick");
                return Ok(());
            }
            Err(e) => return Err(e.into()),
        };

        let embedding = match sample {
            FaceSample::NoFace => {
                self.filter.observe(None, Instant::now());
                tracing::trace!("no face in frame");
                return Ok(());
            }
            FaceSample::Face { embedding, .. } => embedding,
        };

        let Some(hit) = self.settings.match_policy.compare(
            &embedding,
            &self.gallery,
            self.settings.match_threshold,
        ) else {
            self.filter.observe(None, Instant::now());
            tracing::debug!("face not in gallery");
            return Ok(());
        };

        match self.filter.observe(Some(&hit.worker_id), Instant::now()) {
            Observation::Pending { consecutive } => {
                tracing::debug!(
                    worker_id = %hit.worker_id,
                    distance = hit.distance,
                    consecutive,
                    "awaiting stable match"
                );
                Ok(())
            }
            Observation::Confirmed(worker_id) => {
                tracing::info!(worker_id = %worker_id, name = %hit.name, "identity confirmed");
                self.confirm_face(worker_id).await;
                Ok(())
            }
        }
    }

    async fn confirm_face(&mut self, worker_id: WorkerId) {
        self.set_state(SessionState::Confirming);

        if let Operator::Employee(own) = &self.context.operator {
            if *own != worker_id {
                tracing::warn!(expected = %own, observed = %worker_id, "face belongs to another worker");
                let expected = own.clone();
                self.reject(Rejection::IdentityMismatch {
                    expected,
                    observed: worker_id,
                });
                return;
            }
        }

        if self.suppressed_locally(&worker_id) {
            return;
        }

        let location = if self.context.origin.requires_geofence(CaptureMethod::Face) {
            match self.precheck_location().await {
                Ok(point) => Some(point),
                Err(rejection) => {
                    self.reject(rejection);
                    return;
                }
            }
        } else {
            None
        };

        let request = PunchRequest::for_worker(worker_id, CaptureMethod::Face, self.context.origin)
            .with_location(location);
        self.commit(request).await;
    }

    async fn rfid_tick(&mut self) -> Result<(), SessionError> {
        let poll = self.config.rfid_poll;
        let Some(raw) = self.with_device(move |d| d.next_code(poll)).await? else {
            tracing::trace!("no scan");
            return Ok(());
        };
        self.set_state(SessionState::Confirming);

        let code = match RfidCode::parse(&raw) {
            Ok(code) => code,
            Err(e) => {
                tracing::warn!(error = %e, "rejecting scan");
                self.reject(Rejection::UnknownIdentity);
                return Ok(());
            }
        };

        if let Some(worker_id) = self.rfid_workers.get(code.as_str()).cloned() {
            if self.suppressed_locally(&worker_id) {
                return Ok(());
            }
        }

        let request = PunchRequest::for_rfid(code.as_str(), self.context.origin);
        self.commit(request).await;
        Ok(())
    }

    /// Skip a request the mirror knows is doomed.
    fn suppressed_locally(&mut self, worker_id: &WorkerId) -> bool {
        let Some(remaining_seconds) = self.mirror.remaining(worker_id, Utc::now()) else {
            return false;
        };
        tracing::debug!(worker_id = %worker_id, remaining_seconds, "cooldown active, not submitting");
        self.reject(Rejection::CooldownActive {
            worker_id: worker_id.clone(),
            remaining_seconds,
        });
        true
    }

    async fn precheck_location(&mut self) -> Result<GeoPoint, Rejection> {
        let timeout = self.config.location_timeout;
        let point = self.locate(timeout).await.map_err(|e| {
            tracing::warn!(error = %e, "no position for geofence check");
            Rejection::LocationUnavailable(e.to_string())
        })?;

        match geofence::validate(point, &self.geofence) {
            GeofenceDecision::Allowed { distance_m } => {
                tracing::debug!(distance_m, "inside geofence");
                Ok(point)
            }
            GeofenceDecision::Denied { distance_m } => {
                tracing::info!(distance_m, "outside geofence");
                Err(Rejection::OutOfRange {
                    distance_meters: distance_m,
                })
            }
            GeofenceDecision::NotConfigured => Err(Rejection::GeofenceNotConfigured),
        }
    }

    async fn locate(&self, timeout: Duration) -> Result<GeoPoint, LocationError> {
        let location = self.location.clone();
        let task = tokio::task::spawn_blocking(move || {
            let mut provider = location.lock().unwrap_or_else(|e| e.into_inner());
            match provider.as_mut() {
                Some(provider) => provider.locate(timeout),
                None => Err(LocationError::Unsupported),
            }
        });
        match tokio::time::timeout(timeout, task).await {
            Ok(joined) => joined
                .map_err(|e| LocationError::Unavailable(format!("location task failed: {e}")))?,
            Err(_) => Err(LocationError::Timeout(timeout)),
        }
    }

    async fn commit(&mut self, request: PunchRequest) {
        self.set_state(SessionState::Committing);
        let outcome = match self.client.submit_punch(&request).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "punch submission failed");
                self.reject(Rejection::ServerUnavailable(e.to_string()));
                return;
            }
        };

        if let (Some(code), Some(worker_id)) = (request.rfid_code, outcome.worker_id()) {
            self.rfid_workers.insert(code, worker_id.clone());
        }

        let now = Utc::now();
        match outcome {
            PunchOutcome::Accepted {
                worker_id,
                worker_name,
                direction,
                record_id,
                cooldown_seconds,
            } => {
                tracing::info!(
                    worker_id = %worker_id,
                    %direction,
                    record_id = %record_id,
                    "punch accepted"
                );
                self.mirror
                    .note_accepted(&worker_id, now, Duration::from_secs(cooldown_seconds));
                self.cooling = Some(worker_id.clone());
                self.emit(SessionEvent::Accepted {
                    worker_id,
                    worker_name,
                    direction,
                    record_id,
                });
                self.set_state(SessionState::Cooldown);
            }
            PunchOutcome::CooldownActive {
                worker_id,
                remaining_seconds,
            } => {
                tracing::info!(worker_id = %worker_id, remaining_seconds, "server reports cooldown");
                self.mirror.note_rejected(&worker_id, now, remaining_seconds);
                self.reject(Rejection::CooldownActive {
                    worker_id,
                    remaining_seconds,
                });
            }
            PunchOutcome::OutOfRange { distance_meters } => {
                self.reject(Rejection::OutOfRange { distance_meters })
            }
            PunchOutcome::UnknownIdentity => self.reject(Rejection::UnknownIdentity),
            PunchOutcome::LocationUnavailable => self.reject(Rejection::LocationUnavailable(
                "server did not receive a usable position".into(),
            )),
            PunchOutcome::GeofenceNotConfigured => self.reject(Rejection::GeofenceNotConfigured),
        }
    }

    /// Report a soft reject and go back to observing.
    fn reject(&mut self, rejection: Rejection) {
        tracing::debug!(?rejection, "punch rejected");
        self.emit(SessionEvent::Rejected(rejection));
        let cooling = self
            .cooling
            .as_ref()
            .is_some_and(|w| self.mirror.remaining(w, Utc::now()).is_some());
        if cooling {
            self.set_state(SessionState::Cooldown);
        } else {
            self.set_state(SessionState::Observing);
        }
    }

    async fn with_device<T, F>(&mut self, f: F) -> Result<T, CaptureError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Device) -> Result<T, CaptureError> + Send + 'static,
    {
        let device = self.device.clone();
        tokio::task::spawn_blocking(move || {
            let mut device = device.lock().unwrap_or_else(|e| e.into_inner());
            match device.as_mut() {
                Some(device) => f(device),
                None => Err(CaptureError::Closed),
            }
        })
        .await
        .map_err(|e| CaptureError::CaptureFailed(format!("capture task failed: {e}")))?
    }

    async fn shutdown(mut self) -> SessionState {
        // Blocks until any sample abandoned by a stop request has returned.
        let device = self.device.clone();
        let closed = tokio::task::spawn_blocking(move || {
            if let Some(mut device) = device.lock().unwrap_or_else(|e| e.into_inner()).take() {
                device.close();
            }
        })
        .await;
        if let Err(e) = closed {
            tracing::warn!(error = %e, "device close task failed");
        }
        if !matches!(self.state, SessionState::Error(_)) {
            self.set_state(SessionState::Idle);
        }
        tracing::info!("capture session closed");
        self.state
    }

    fn set_state(&mut self, state: SessionState) {
        if self.state == state {
            return;
        }
        tracing::debug!(from = ?self.state, to = ?state, "session state");
        self.state = state.clone();
        self.emit(SessionEvent::State(state));
    }

    fn emit(&self, event: SessionEvent) {
        // The UI may have gone away; the session still runs to completion.
        let _ = self.events.send(event);
    }
}

/// Owner of a running session. Dropping it aborts the session task.
pub struct SessionHandle {
    stop: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<SessionState>>,
}

impl SessionHandle {
    /// Stop the session and wait until the device has been released.
    pub async fn close(mut self) -> SessionState {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        match self.task.take() {
            Some(task) => task.await.unwrap_or_else(|e| {
                tracing::warn!(error = %e, "capture session task ended abnormally");
                SessionState::Idle
            }),
            None => SessionState::Idle,
        }
    }

    /// Wait for the session to end on its own (device error).
    pub async fn finished(&mut self) -> SessionState {
        match self.task.as_mut() {
            Some(task) => {
                let state = task.await.unwrap_or(SessionState::Idle);
                self.task = None;
                state
            }
            None => SessionState::Idle,
        }
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}
