//! Camera session state machine.
//!
//! `CameraSession` owns the device handle, the capture session and the frame
//! source of one logical camera lifetime and drives them through
//!
//! ```text
//! Idle -> Opening -> AwaitingSessionConfigure -> Streaming
//!            \              \                       \
//!             `-> Retrying <-'-----------------------'   (bounded, then Closed)
//! ```
//!
//! All device completions, retry timers and frame deliveries run on one worker
//! thread per session. The caller thread only enters through `start`, `stop` and
//! the setters. Two rules keep the two sides apart:
//!
//! - every completion carries the sequence number of the open attempt it belongs
//!   to; a completion for any other attempt, or one arriving after `stop`, only
//!   releases what it carries;
//! - opening and closing are serialized by the [`ResourceLock`]. An open attempt
//!   holds the permit from the native open call until the capture session
//!   configure call has been issued; `stop` and the retry path take it before
//!   closing handles.
//!
//! The `inner` mutex is never held while waiting for the resource lock.

use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use crate::device::{
    CameraBackend, CaptureHandle, DeviceCallbacks, DeviceCatalog, DeviceCharacteristics,
    DeviceHandle, DeviceId, Facing, FrameNotifier, FrameSourceHandle, PermissionGate,
    SessionCallbacks, Surface,
};
use crate::error::{DeviceError, Failure};
use crate::frame::{deliver_frame, DeliveryOutcome, FrameSink};
use crate::handle::Owned;
use crate::lock::{ResourceLock, ResourcePermit};
use crate::request::{CaptureRequest, CaptureSettings, FlashMode, FpsRange, TorchMode};
use crate::retry::{RetryDecision, RetryPolicy, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::sequence::{OpSeq, SequenceGuard};
use crate::size::{select_output_size, Resolution, SizePolicy};
use crate::worker::{Worker, WorkerHandle};

/// Default bounded wait for the resource lock on open.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_millis(2500);

/// Default frame-source queue depth.
pub const DEFAULT_FRAME_QUEUE_DEPTH: usize = 3;

/// Lifecycle of a [`CameraSession`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Opening,
    AwaitingSessionConfigure,
    Streaming,
    Retrying,
    /// Terminal until the next `start`.
    Closed,
}

/// Static session parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionConfig {
    pub facing: Facing,
    pub target: Resolution,
    pub size_policy: SizePolicy,
    pub fps_range: FpsRange,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub lock_timeout: Duration,
    pub frame_queue_depth: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            facing: Facing::Front,
            target: Resolution::new(1280, 720),
            size_policy: SizePolicy::default(),
            fps_range: FpsRange::default(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            frame_queue_depth: DEFAULT_FRAME_QUEUE_DEPTH,
        }
    }
}

/// External collaborators consumed by the session.
#[derive(Clone)]
pub struct SessionCollaborators {
    pub catalog: Arc<dyn DeviceCatalog>,
    pub backend: Arc<dyn CameraBackend>,
    pub permission: Arc<dyn PermissionGate>,
}

impl SessionCollaborators {
    /// Use one object as both catalog and backend, with permission granted.
    pub fn from_camera<C>(camera: Arc<C>) -> Self
    where
        C: DeviceCatalog + CameraBackend + 'static,
    {
        Self {
            catalog: camera.clone(),
            backend: camera,
            permission: Arc::new(|| true),
        }
    }

    pub fn with_permission(mut self, permission: Arc<dyn PermissionGate>) -> Self {
        self.permission = permission;
        self
    }
}

/// Messages handled on the session worker.
pub(crate) enum SessionEvent {
    /// Caller-initiated open. `resume` is the state to return to if the attempt
    /// fails before reaching the device.
    Open { resume: SessionState },
    RetryFired,
    DeviceOpened {
        seq: OpSeq,
        device: DeviceHandle,
    },
    DeviceDisconnected {
        seq: OpSeq,
        device: Option<DeviceHandle>,
    },
    DeviceError {
        seq: OpSeq,
        device: Option<DeviceHandle>,
        code: i32,
    },
    SessionConfigured {
        seq: OpSeq,
        session: CaptureHandle,
    },
    SessionConfigureFailed {
        seq: OpSeq,
        session: Option<CaptureHandle>,
    },
    FrameReady,
}

struct Inner {
    state: SessionState,
    facing: Facing,
    target: Resolution,
    device_id: Option<DeviceId>,
    preview_size: Option<Resolution>,
    sensor_orientation: u32,
    preview_surface: Option<Surface>,
    settings: CaptureSettings,
    retry: RetryPolicy,
    device: Option<DeviceHandle>,
    capture: Option<CaptureHandle>,
    frame_source: Option<FrameSourceHandle>,
    /// Resource-lock permit of the open attempt awaiting its completion.
    pending_open: Option<(OpSeq, ResourcePermit)>,
    events: Option<WorkerHandle<SessionEvent>>,
    last_failure: Option<Failure>,
    sink: Option<Arc<dyn FrameSink>>,
}

impl Inner {
    fn set_state(&mut self, state: SessionState) {
        if self.state != state {
            log::debug!("CameraSession: {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    /// Output targets for capture requests: the frame source, then the preview.
    fn targets(&self) -> Vec<Surface> {
        self.frame_source
            .iter()
            .map(|source| source.surface())
            .chain(self.preview_surface.iter().cloned())
            .collect()
    }

    fn take_pending(&mut self, seq: OpSeq) -> Option<ResourcePermit> {
        match self.pending_open.take() {
            Some((pending, permit)) if pending == seq => Some(permit),
            other => {
                self.pending_open = other;
                None
            }
        }
    }

    /// Issue the preview request, falling back to the reduced request.
    fn start_repeating(&mut self) -> Result<(), DeviceError> {
        let targets = self.targets();
        let preview = CaptureRequest::preview(targets.clone(), &self.settings);
        let Some(capture) = self.capture.as_mut() else {
            return Err(DeviceError::Closed);
        };
        match capture.set_repeating_request(&preview) {
            Ok(()) => Ok(()),
            Err(err) => {
                log::warn!(
                    "CameraSession: repeating request failed ({}); retrying with reduced request",
                    err
                );
                capture.set_repeating_request(&CaptureRequest::reduced(targets))
            }
        }
    }
}

struct Shared {
    config: SessionConfig,
    catalog: Arc<dyn DeviceCatalog>,
    backend: Arc<dyn CameraBackend>,
    permission: Arc<dyn PermissionGate>,
    lock: ResourceLock,
    sequence: SequenceGuard,
    stopped: AtomicBool,
    frames_delivered: AtomicU64,
    inner: Mutex<Inner>,
}

/// One logical camera: open, configure, stream, recover, close.
pub struct CameraSession {
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker<SessionEvent>>>,
}

impl CameraSession {
    pub fn new(config: SessionConfig, collaborators: SessionCollaborators) -> Self {
        let settings = CaptureSettings {
            fps_range: config.fps_range,
            ..CaptureSettings::default()
        };
        let inner = Inner {
            state: SessionState::Idle,
            facing: config.facing,
            target: config.target,
            device_id: None,
            preview_size: None,
            sensor_orientation: 0,
            preview_surface: None,
            settings,
            retry: RetryPolicy::new(config.max_retries, config.retry_delay),
            device: None,
            capture: None,
            frame_source: None,
            pending_open: None,
            events: None,
            last_failure: None,
            sink: None,
        };
        Self {
            shared: Arc::new(Shared {
                config,
                catalog: collaborators.catalog,
                backend: collaborators.backend,
                permission: collaborators.permission,
                lock: ResourceLock::new(),
                sequence: SequenceGuard::new(),
                stopped: AtomicBool::new(false),
                frames_delivered: AtomicU64::new(0),
                inner: Mutex::new(inner),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Begin opening the camera on the session worker.
    ///
    /// Only valid from `Idle` or `Closed`; otherwise logged and ignored. Permission,
    /// device and size problems are reported through [`Self::last_failure`], not
    /// as errors. Fails only if the worker thread cannot be spawned.
    pub fn start(&self) -> Result<()> {
        let mut worker = self.worker.lock().unwrap_or_else(PoisonError::into_inner);
        let resume = {
            let mut inner = self.shared.lock_inner();
            if !matches!(inner.state, SessionState::Idle | SessionState::Closed) {
                log::warn!("CameraSession: start ignored in state {:?}", inner.state);
                return Ok(());
            }
            let resume = inner.state;
            inner.set_state(SessionState::Opening);
            resume
        };
        self.shared.stopped.store(false, Ordering::SeqCst);

        if worker.is_none() {
            let shared = self.shared.clone();
            let spawned = Worker::spawn("camera-session", move |event| shared.handle(event));
            match spawned {
                Ok(spawned) => *worker = Some(spawned),
                Err(err) => {
                    self.shared.lock_inner().set_state(resume);
                    return Err(err);
                }
            }
        }
        let Some(events) = worker.as_ref().map(Worker::handle) else {
            return Ok(());
        };
        self.shared.lock_inner().events = Some(events.clone());
        log::info!("CameraSession: starting");
        events.post(SessionEvent::Open { resume });
        Ok(())
    }

    /// Tear everything down and stop the worker. Safe to call at any time, from any
    /// thread, and more than once.
    pub fn stop(&self) {
        let shared = &self.shared;
        shared.stopped.store(true, Ordering::SeqCst);
        shared.cancel_retry();

        // A stopped session never acts on the pending completion, so its permit
        // can go now.
        let pending = shared.lock_inner().pending_open.take();
        drop(pending);

        {
            let _permit = shared.lock.acquire();
            let (capture, device, frame_source) = {
                let mut inner = shared.lock_inner();
                inner.preview_surface = None;
                inner.set_state(SessionState::Closed);
                (
                    inner.capture.take(),
                    inner.device.take(),
                    inner.frame_source.take(),
                )
            };
            close_handles(capture, device, frame_source);
        }

        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            shared.lock_inner().events = None;
            if let Err(err) = worker.shutdown() {
                log::error!("CameraSession: {:#}", err);
            }
            log::info!("CameraSession: stopped");
        }
    }

    /// Cancel a pending retry, if any. A cancelled retry leaves the session
    /// `Closed`; otherwise nothing changes.
    pub fn cancel_retry(&self) {
        self.shared.cancel_retry();
    }

    /// Output target passed through to the next capture session configure.
    pub fn set_preview_surface(&self, surface: Option<Surface>) {
        self.shared.lock_inner().preview_surface = surface;
    }

    /// Facing used by the next open attempt.
    pub fn set_facing(&self, facing: Facing) {
        self.shared.lock_inner().facing = facing;
    }

    /// Target dimensions used by the next open attempt.
    pub fn set_target_dimensions(&self, width: u32, height: u32) {
        self.shared.lock_inner().target = Resolution::new(width, height);
    }

    pub fn set_frame_sink(&self, sink: Option<Arc<dyn FrameSink>>) {
        self.shared.lock_inner().sink = sink;
    }

    pub fn set_flash_mode(&self, mode: FlashMode) {
        self.shared.update_settings(|settings| settings.flash = mode);
    }

    pub fn set_torch_mode(&self, mode: TorchMode) {
        self.shared.update_settings(|settings| settings.torch = mode);
    }

    pub fn state(&self) -> SessionState {
        self.shared.lock_inner().state
    }

    pub fn facing(&self) -> Facing {
        self.shared.lock_inner().facing
    }

    /// Sensor orientation of the last selected device, in degrees.
    pub fn sensor_orientation(&self) -> u32 {
        self.shared.lock_inner().sensor_orientation
    }

    /// Output size chosen for the last open attempt.
    pub fn preview_size(&self) -> Option<Resolution> {
        self.shared.lock_inner().preview_size
    }

    pub fn device_id(&self) -> Option<DeviceId> {
        self.shared.lock_inner().device_id.clone()
    }

    pub fn retry_count(&self) -> u32 {
        self.shared.lock_inner().retry.count()
    }

    pub fn last_failure(&self) -> Option<Failure> {
        self.shared.lock_inner().last_failure.clone()
    }

    pub fn frames_delivered(&self) -> u64 {
        self.shared.frames_delivered.load(Ordering::SeqCst)
    }

    /// Rotation code for the renderer, derived from facing and sensor orientation.
    pub fn frame_rotation(&self) -> u32 {
        let inner = self.shared.lock_inner();
        frame_rotation(inner.facing, inner.sensor_orientation)
    }

    #[cfg(test)]
    fn post_open(&self) {
        let events = self.shared.lock_inner().events.clone();
        if let Some(events) = events {
            events.post(SessionEvent::Open {
                resume: SessionState::Idle,
            });
        }
    }
}

impl Drop for CameraSession {
    fn drop(&mut self) {
        let running = self
            .worker
            .get_mut()
            .map(|worker| worker.is_some())
            .unwrap_or(true);
        if running {
            self.stop();
        }
    }
}

/// Front: 270° -> 1, else 6. Back and external: 90° -> 2, else 1.
fn frame_rotation(facing: Facing, sensor_orientation: u32) -> u32 {
    match (facing, sensor_orientation) {
        (Facing::Front, 270) => 1,
        (Facing::Front, _) => 6,
        (_, 90) => 2,
        (_, _) => 1,
    }
}

/// Close in dependency order: capture session, device, frame source.
fn close_handles(
    capture: Option<CaptureHandle>,
    device: Option<DeviceHandle>,
    frame_source: Option<FrameSourceHandle>,
) {
    if let Some(capture) = capture {
        capture.close();
    }
    if let Some(device) = device {
        device.close();
    }
    if let Some(frame_source) = frame_source {
        frame_source.close();
    }
}

// ----------------------------------------------------------------------------
// Worker side
// ----------------------------------------------------------------------------

impl Shared {
    fn lock_inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    fn is_live(&self, seq: OpSeq) -> bool {
        self.sequence.is_current(seq) && !self.is_stopped()
    }

    fn handle(&self, event: SessionEvent) {
        match event {
            SessionEvent::Open { resume } => self.open_device(resume),
            SessionEvent::RetryFired => {
                let fire = self.lock_inner().retry.fire();
                if fire {
                    self.open_device(SessionState::Closed);
                }
            }
            SessionEvent::DeviceOpened { seq, device } => self.on_device_opened(seq, device),
            SessionEvent::DeviceDisconnected { seq, device } => {
                self.on_device_lost(seq, device, Failure::Disconnected)
            }
            SessionEvent::DeviceError { seq, device, code } => {
                self.on_device_lost(seq, device, Failure::DeviceError(code))
            }
            SessionEvent::SessionConfigured { seq, session } => {
                self.on_session_configured(seq, session)
            }
            SessionEvent::SessionConfigureFailed { seq, session } => {
                self.on_configure_failed(seq, session)
            }
            SessionEvent::FrameReady => self.on_frame_ready(),
        }
    }

    /// Failures that end the attempt without a retry.
    fn fail_fast(&self, failure: Failure, resume: SessionState) {
        log::error!("CameraSession: {}", failure);
        let mut inner = self.lock_inner();
        inner.last_failure = Some(failure);
        inner.set_state(resume);
    }

    /// First device with the requested facing, else the first device.
    fn resolve_device(&self, facing: Facing) -> Option<(DeviceId, DeviceCharacteristics)> {
        let ids = self.catalog.device_ids();
        let matching = ids.iter().find_map(|id| {
            self.catalog
                .characteristics(id)
                .filter(|characteristics| characteristics.facing == facing)
                .map(|characteristics| (id.clone(), characteristics))
        });
        if matching.is_some() {
            return matching;
        }
        let first = ids.first()?;
        log::info!(
            "CameraSession: no {:?} camera, falling back to device {}",
            facing,
            first
        );
        Some((first.clone(), self.catalog.characteristics(first)?))
    }

    fn open_device(&self, resume: SessionState) {
        if self.is_stopped() {
            log::debug!("CameraSession: open skipped, session stopped");
            return;
        }
        if !self.permission.is_granted() {
            self.fail(Failure::PermissionDenied, resume);
            return;
        }
        let seq = self.sequence.advance();
        let (facing, target) = {
            let inner = self.lock_inner();
            (inner.facing, inner.target)
        };
        let Some((id, characteristics)) = self.resolve_device(facing) else {
            self.fail(Failure::NoDevice, resume);
            return;
        };
        let size = characteristics
            .output_sizes
            .as_deref()
            .and_then(|sizes| select_output_size(sizes, target, &self.config.size_policy));
        let Some(size) = size else {
            self.fail(Failure::NoOutputSizes, resume);
            return;
        };

        let (events, superseded_permit, superseded_source) = {
            let mut inner = self.lock_inner();
            let Some(events) = inner.events.clone() else {
                return;
            };
            inner.device_id = Some(id.clone());
            inner.preview_size = Some(size);
            inner.sensor_orientation = characteristics.sensor_orientation;
            inner.set_state(SessionState::Opening);
            (events, inner.pending_open.take(), inner.frame_source.take())
        };
        log::info!(
            "CameraSession: opening device {} ({:?}, {}°) at {} {}",
            id,
            characteristics.facing,
            characteristics.sensor_orientation,
            size,
            seq
        );
        drop(superseded_permit);
        if let Some(source) = superseded_source {
            source.close();
        }

        let notifier = FrameNotifier::new(events.clone());
        match self
            .backend
            .create_frame_source(size, self.config.frame_queue_depth, notifier)
        {
            Ok(source) => {
                let source = Owned::new(source, "frame source");
                let mut inner = self.lock_inner();
                if self.is_stopped() {
                    drop(inner);
                    source.close();
                    return;
                }
                inner.frame_source = Some(source);
            }
            Err(err) => {
                self.fail(Failure::FrameSource(err.to_string()), resume);
                return;
            }
        }

        let Some(permit) = self.lock.try_acquire_for(self.config.lock_timeout) else {
            self.fail(Failure::LockTimeout, resume);
            return;
        };
        if self.is_stopped() {
            return;
        }
        if let Err(err) = self.backend.open(&id, DeviceCallbacks::new(seq, events)) {
            drop(permit);
            self.fail(Failure::OpenFailed(err.to_string()), resume);
            return;
        }

        let mut inner = self.lock_inner();
        // `stop` sets the latch before it clears the pending permit.
        if !self.is_stopped() {
            inner.pending_open = Some((seq, permit));
        }
    }

    fn on_device_opened(&self, seq: OpSeq, device: DeviceHandle) {
        let mut inner = self.lock_inner();
        let permit = inner.take_pending(seq);
        if !self.is_live(seq) {
            drop(inner);
            log::debug!("CameraSession: discarding stale device open {}", seq);
            device.close();
            drop(permit);
            return;
        }

        log::info!("CameraSession: device {} opened {}", device.id(), seq);
        let Some(events) = inner.events.clone() else {
            drop(inner);
            device.close();
            return;
        };
        let outputs = inner.targets();
        inner.set_state(SessionState::AwaitingSessionConfigure);
        let previous = inner.device.replace(device);
        let configure = match inner.device.as_mut() {
            Some(device) => {
                device.create_capture_session(&outputs, SessionCallbacks::new(seq, events))
            }
            None => Err(DeviceError::Closed),
        };
        // The configure call has been issued; the open attempt is done with the lock.
        drop(permit);
        drop(inner);
        if let Some(previous) = previous {
            previous.close();
        }

        if let Err(err) = configure {
            log::warn!("CameraSession: capture session configure failed: {}", err);
            self.schedule_retry(Failure::ConfigureFailed);
        }
    }

    fn on_device_lost(&self, seq: OpSeq, device: Option<DeviceHandle>, failure: Failure) {
        if let Some(device) = device {
            device.close();
        }
        let mut inner = self.lock_inner();
        let permit = inner.take_pending(seq);
        drop(permit);
        if !self.is_live(seq) {
            log::debug!("CameraSession: ignoring stale {} for {}", failure, seq);
            return;
        }
        let capture = inner.capture.take();
        let device = inner.device.take();
        drop(inner);
        close_handles(capture, device, None);

        log::warn!("CameraSession: {}", failure);
        self.schedule_retry(failure);
    }

    fn on_session_configured(&self, seq: OpSeq, session: CaptureHandle) {
        let mut inner = self.lock_inner();
        if !self.is_live(seq) || inner.device.is_none() {
            drop(inner);
            log::debug!("CameraSession: closing capture session of stale attempt {}", seq);
            session.close();
            return;
        }

        let previous = inner.capture.replace(session);
        let started = inner.start_repeating();
        match started {
            Ok(()) => {
                inner.retry.reset();
                inner.last_failure = None;
                inner.set_state(SessionState::Streaming);
                log::info!(
                    "CameraSession: streaming {} from device {}",
                    inner
                        .preview_size
                        .map(|size| size.to_string())
                        .unwrap_or_default(),
                    inner
                        .device_id
                        .as_ref()
                        .map(DeviceId::as_str)
                        .unwrap_or_default()
                );
                drop(inner);
            }
            Err(err) => {
                drop(inner);
                log::error!("CameraSession: reduced repeating request failed: {}", err);
                self.schedule_retry(Failure::RequestFailed);
            }
        }
        if let Some(previous) = previous {
            previous.close();
        }
    }

    fn on_configure_failed(&self, seq: OpSeq, session: Option<CaptureHandle>) {
        if let Some(session) = session {
            session.close();
        }
        if !self.is_live(seq) {
            log::debug!("CameraSession: ignoring stale configure failure {}", seq);
            return;
        }
        log::warn!("CameraSession: capture session configuration failed");
        self.schedule_retry(Failure::ConfigureFailed);
    }

    fn on_frame_ready(&self) {
        let (frame, sink) = {
            let mut inner = self.lock_inner();
            let frame = inner
                .frame_source
                .as_mut()
                .and_then(|source| source.acquire_latest());
            (frame, inner.sink.clone())
        };
        let Some(frame) = frame else {
            return;
        };
        if deliver_frame(frame, sink.as_deref()) == DeliveryOutcome::Delivered {
            self.frames_delivered.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Route a failure of the current attempt: transient failures go to the retry
    /// policy, the rest end the attempt in `resume`.
    fn fail(&self, failure: Failure, resume: SessionState) {
        if failure.is_transient() {
            self.schedule_retry(failure);
        } else {
            self.fail_fast(failure, resume);
        }
    }

    fn schedule_retry(&self, failure: Failure) {
        let (decision, max_retries, delay) = {
            let mut inner = self.lock_inner();
            inner.last_failure = Some(failure.clone());
            let decision = inner.retry.try_schedule(self.is_stopped());
            (decision, inner.retry.max_retries(), inner.retry.delay())
        };
        match decision {
            RetryDecision::Stopped => {
                log::debug!("CameraSession: no retry after stop ({})", failure);
            }
            RetryDecision::AlreadyPending => {
                log::debug!("CameraSession: retry already pending ({})", failure);
            }
            RetryDecision::Exhausted => {
                log::error!(
                    "CameraSession: giving up after {} retries: {}",
                    max_retries,
                    failure
                );
                self.close_all();
                self.lock_inner().set_state(SessionState::Closed);
            }
            RetryDecision::Schedule(attempt) => {
                log::warn!(
                    "CameraSession: retry {}/{} in {:?} after: {}",
                    attempt,
                    max_retries,
                    delay,
                    failure
                );
                self.close_all();
                let mut inner = self.lock_inner();
                inner.set_state(SessionState::Retrying);
                let timer = inner
                    .events
                    .as_ref()
                    .and_then(|events| events.post_delayed(delay, SessionEvent::RetryFired));
                match timer {
                    Some(timer) if !self.is_stopped() => inner.retry.arm(timer),
                    Some(timer) => {
                        inner.retry.cancel();
                        if let Some(events) = inner.events.as_ref() {
                            events.cancel(timer);
                        }
                    }
                    None => {
                        inner.retry.cancel();
                        inner.set_state(SessionState::Closed);
                    }
                }
            }
        }
    }

    /// Close every handle before a reopen or after giving up.
    fn close_all(&self) {
        let pending = self.lock_inner().pending_open.take();
        drop(pending);
        let _permit = self.lock.acquire();
        let (capture, device, frame_source) = {
            let mut inner = self.lock_inner();
            (
                inner.capture.take(),
                inner.device.take(),
                inner.frame_source.take(),
            )
        };
        close_handles(capture, device, frame_source);
    }

    fn cancel_retry(&self) {
        let mut inner = self.lock_inner();
        if !inner.retry.is_scheduled() {
            return;
        }
        if let Some(timer) = inner.retry.cancel() {
            if let Some(events) = inner.events.as_ref() {
                events.cancel(timer);
            }
        }
        log::info!("CameraSession: pending retry cancelled");
        if inner.state == SessionState::Retrying {
            inner.set_state(SessionState::Closed);
        }
    }

    fn update_settings(&self, update: impl FnOnce(&mut CaptureSettings)) {
        let mut inner = self.lock_inner();
        update(&mut inner.settings);
        if inner.state != SessionState::Streaming {
            return;
        }
        let request = CaptureRequest::preview(inner.targets(), &inner.settings);
        if let Some(capture) = inner.capture.as_mut() {
            if let Err(err) = capture.set_repeating_request(&request) {
                log::warn!("CameraSession: failed to apply capture settings: {}", err);
            }
        }
    }
}
