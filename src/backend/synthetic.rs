//! Synthetic camera backend.
//!
//! `SyntheticCamera` implements both collaborator traits in-process. It is used by
//! the test-suite and by `capture_demo` when no hardware is requested.
//!
//! - Open and configure outcomes can be scripted per attempt; unscripted attempts
//!   succeed.
//! - Completions are delivered from helper threads, like a real device API.
//! - Frames are I420 buffers generated either by a pump thread or on demand with
//!   [`SyntheticCamera::push_frame`]. A frame source only produces while a capture
//!   session holds a repeating request that targets it.
//! - Every handle opened and closed is counted so tests can assert that nothing
//!   leaks.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::device::{
    CameraBackend, CameraDevice, CaptureSession, DeviceCallbacks, DeviceCatalog,
    DeviceCharacteristics, DeviceId, Facing, FrameNotifier, FrameSource, NativeFrame,
    SessionCallbacks, Surface,
};
use crate::error::DeviceError;
use crate::frame::{PlanarBuffer, Plane};
use crate::handle::Close;
use crate::request::CaptureRequest;
use crate::size::Resolution;

/// Error code reported for scripted device failures without an explicit code.
pub const SYNTHETIC_DEVICE_ERROR: i32 = 4;

/// Scripted result of one `open` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OpenOutcome {
    Open,
    /// Report a device error with this code (the unopened handle is passed along).
    Error(i32),
    Disconnect,
    /// Keep the completion until [`SyntheticCamera::complete_held`].
    Hold,
    /// Fail synchronously from `open`.
    Reject,
}

/// Scripted result of one `create_capture_session` call.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigureOutcome {
    Configure,
    Fail,
    /// Report a device error with this code, then fail the configuration, both
    /// from the same completion thread.
    ErrorThenFail(i32),
    /// Fail synchronously from `create_capture_session`.
    Reject,
}

/// Snapshot of the backend's handle and frame accounting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SyntheticStats {
    pub open_attempts: u64,
    pub devices_opened: u64,
    pub devices_closed: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub frame_sources_created: u64,
    pub frame_sources_closed: u64,
    pub frames_produced: u64,
    pub frames_released: u64,
}

impl SyntheticStats {
    /// Device, session and frame-source handles not yet closed.
    pub fn open_handles(&self) -> u64 {
        (self.devices_opened - self.devices_closed)
            + (self.sessions_created - self.sessions_closed)
            + (self.frame_sources_created - self.frame_sources_closed)
    }

    /// Frames produced but not yet returned to the pool.
    pub fn frames_outstanding(&self) -> u64 {
        self.frames_produced - self.frames_released
    }
}

#[derive(Default)]
struct Counters {
    open_attempts: AtomicU64,
    devices_opened: AtomicU64,
    devices_closed: AtomicU64,
    sessions_created: AtomicU64,
    sessions_closed: AtomicU64,
    frame_sources_created: AtomicU64,
    frame_sources_closed: AtomicU64,
    frames_produced: AtomicU64,
    frames_released: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::SeqCst);
}

#[derive(Default)]
struct Script {
    opens: VecDeque<OpenOutcome>,
    configures: VecDeque<ConfigureOutcome>,
    request_failures: u32,
    frame_source_failures: u32,
}

/// State shared by the camera and every handle it hands out.
#[derive(Default)]
struct Bench {
    script: Mutex<Script>,
    counters: Counters,
    requests: Mutex<Vec<CaptureRequest>>,
    held: Mutex<Vec<(DeviceId, DeviceCallbacks)>>,
    /// Callbacks of the most recently opened device.
    live: Mutex<Option<DeviceCallbacks>>,
    sources: Mutex<Vec<Weak<SourceState>>>,
    /// Targets of the standing request of every open capture session.
    repeating: Mutex<Vec<(u64, Vec<Surface>)>>,
    next_id: AtomicU64,
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Bench {
    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::Relaxed)
    }

    fn is_streaming_to(&self, surface: &Surface) -> bool {
        locked(&self.repeating)
            .iter()
            .any(|(_, targets)| targets.iter().any(|target| target.same_target(surface)))
    }

    fn snapshot(&self) -> SyntheticStats {
        let c = &self.counters;
        let load = |counter: &AtomicU64| counter.load(Ordering::SeqCst);
        SyntheticStats {
            open_attempts: load(&c.open_attempts),
            devices_opened: load(&c.devices_opened),
            devices_closed: load(&c.devices_closed),
            sessions_created: load(&c.sessions_created),
            sessions_closed: load(&c.sessions_closed),
            frame_sources_created: load(&c.frame_sources_created),
            frame_sources_closed: load(&c.frame_sources_closed),
            frames_produced: load(&c.frames_produced),
            frames_released: load(&c.frames_released),
        }
    }
}

/// In-process camera with scriptable behaviour.
pub struct SyntheticCamera {
    devices: Vec<(DeviceId, DeviceCharacteristics)>,
    frame_interval: Option<Duration>,
    bench: Arc<Bench>,
}

impl Default for SyntheticCamera {
    fn default() -> Self {
        Self::new()
    }
}

impl SyntheticCamera {
    /// A camera with no devices.
    pub fn new() -> Self {
        Self {
            devices: Vec::new(),
            frame_interval: None,
            bench: Arc::new(Bench::default()),
        }
    }

    /// A phone-like pair: back camera "0" (90°) and front camera "1" (270°), both
    /// offering 1920x1080, 1280x720 and 640x480.
    pub fn with_default_devices() -> Self {
        let sizes = vec![
            Resolution::new(1920, 1080),
            Resolution::new(1280, 720),
            Resolution::new(640, 480),
        ];
        Self::new()
            .with_device(
                "0",
                DeviceCharacteristics {
                    facing: Facing::Back,
                    sensor_orientation: 90,
                    output_sizes: Some(sizes.clone()),
                },
            )
            .with_device(
                "1",
                DeviceCharacteristics {
                    facing: Facing::Front,
                    sensor_orientation: 270,
                    output_sizes: Some(sizes),
                },
            )
    }

    pub fn with_device(mut self, id: &str, characteristics: DeviceCharacteristics) -> Self {
        self.devices.push((DeviceId::new(id), characteristics));
        self
    }

    /// Generate a frame every `interval` on each streaming frame source.
    pub fn with_frame_interval(mut self, interval: Duration) -> Self {
        self.frame_interval = Some(interval);
        self
    }

    /// Queue outcomes for the next `open` calls, in order.
    pub fn script_opens(&self, outcomes: impl IntoIterator<Item = OpenOutcome>) {
        locked(&self.bench.script).opens.extend(outcomes);
    }

    /// Queue outcomes for the next `create_capture_session` calls, in order.
    pub fn script_configures(&self, outcomes: impl IntoIterator<Item = ConfigureOutcome>) {
        locked(&self.bench.script).configures.extend(outcomes);
    }

    /// Make the next `count` repeating requests fail.
    pub fn fail_repeating_requests(&self, count: u32) {
        locked(&self.bench.script).request_failures += count;
    }

    /// Make the next `count` frame-source creations fail.
    pub fn fail_frame_sources(&self, count: u32) {
        locked(&self.bench.script).frame_source_failures += count;
    }

    /// Number of open completions waiting for [`Self::complete_held`].
    pub fn held_opens(&self) -> usize {
        locked(&self.bench.held).len()
    }

    /// Deliver `outcome` for every held open, oldest first, on the calling thread.
    pub fn complete_held(&self, outcome: OpenOutcome) -> usize {
        let held = std::mem::take(&mut *locked(&self.bench.held));
        let count = held.len();
        for (id, callbacks) in held {
            complete_open(&self.bench, id, callbacks, outcome);
        }
        count
    }

    /// Report a device error with `code` for the most recently opened device, on
    /// the calling thread. Returns false when no device has been opened since the
    /// last call.
    pub fn fail_device(&self, code: i32) -> bool {
        let Some(callbacks) = locked(&self.bench.live).take() else {
            return false;
        };
        log::debug!("SyntheticCamera: device error {}", code);
        callbacks.error(None, code);
        true
    }

    /// Produce one frame on every streaming frame source. Returns how many
    /// sources received it.
    pub fn push_frame(&self) -> usize {
        let sources: Vec<Arc<SourceState>> = {
            let mut sources = locked(&self.bench.sources);
            sources.retain(|source| source.strong_count() > 0);
            sources.iter().filter_map(Weak::upgrade).collect()
        };
        sources
            .iter()
            .filter(|source| source.is_streaming())
            .filter(|source| source.produce())
            .count()
    }

    pub fn stats(&self) -> SyntheticStats {
        self.bench.snapshot()
    }

    /// Every repeating request accepted so far, in order.
    pub fn requests(&self) -> Vec<CaptureRequest> {
        locked(&self.bench.requests).clone()
    }

    pub fn last_request(&self) -> Option<CaptureRequest> {
        locked(&self.bench.requests).last().cloned()
    }
}

impl DeviceCatalog for SyntheticCamera {
    fn device_ids(&self) -> Vec<DeviceId> {
        self.devices.iter().map(|(id, _)| id.clone()).collect()
    }

    fn characteristics(&self, id: &DeviceId) -> Option<DeviceCharacteristics> {
        self.devices
            .iter()
            .find(|(known, _)| known == id)
            .map(|(_, characteristics)| characteristics.clone())
    }
}

impl CameraBackend for SyntheticCamera {
    fn open(&self, id: &DeviceId, callbacks: DeviceCallbacks) -> Result<(), DeviceError> {
        bump(&self.bench.counters.open_attempts);
        if !self.devices.iter().any(|(known, _)| known == id) {
            return Err(DeviceError::Unavailable(id.to_string()));
        }
        let outcome = locked(&self.bench.script)
            .opens
            .pop_front()
            .unwrap_or(OpenOutcome::Open);
        log::debug!("SyntheticCamera: open {} -> {:?}", id, outcome);
        match outcome {
            OpenOutcome::Reject => Err(DeviceError::Unavailable(id.to_string())),
            OpenOutcome::Hold => {
                locked(&self.bench.held).push((id.clone(), callbacks));
                Ok(())
            }
            outcome => {
                let bench = self.bench.clone();
                let id = id.clone();
                std::thread::Builder::new()
                    .name("synthetic-open".into())
                    .spawn(move || complete_open(&bench, id, callbacks, outcome))?;
                Ok(())
            }
        }
    }

    fn create_frame_source(
        &self,
        size: Resolution,
        max_images: usize,
        notifier: FrameNotifier,
    ) -> Result<Box<dyn FrameSource>, DeviceError> {
        {
            let mut script = locked(&self.bench.script);
            if script.frame_source_failures > 0 {
                script.frame_source_failures -= 1;
                return Err(DeviceError::Rejected("scripted frame source failure".into()));
            }
        }
        if max_images == 0 {
            return Err(DeviceError::Rejected("frame queue depth must be positive".into()));
        }
        let source = SyntheticFrameSource::start(
            self.bench.clone(),
            size,
            max_images,
            notifier,
            self.frame_interval,
        )?;
        bump(&self.bench.counters.frame_sources_created);
        Ok(Box::new(source))
    }
}

fn complete_open(bench: &Arc<Bench>, id: DeviceId, callbacks: DeviceCallbacks, outcome: OpenOutcome) {
    let device = || -> Box<dyn CameraDevice> {
        bump(&bench.counters.devices_opened);
        Box::new(SyntheticDevice {
            id: id.clone(),
            bench: bench.clone(),
            events: callbacks.clone(),
            closed: false,
        })
    };
    match outcome {
        OpenOutcome::Open => {
            *locked(&bench.live) = Some(callbacks.clone());
            callbacks.opened(device())
        }
        OpenOutcome::Error(code) => callbacks.error(Some(device()), code),
        OpenOutcome::Disconnect => callbacks.disconnected(Some(device())),
        OpenOutcome::Reject => callbacks.error(None, SYNTHETIC_DEVICE_ERROR),
        OpenOutcome::Hold => locked(&bench.held).push((id.clone(), callbacks)),
    }
}

// ----------------------------------------------------------------------------
// Device and capture session
// ----------------------------------------------------------------------------

struct SyntheticDevice {
    id: DeviceId,
    bench: Arc<Bench>,
    events: DeviceCallbacks,
    closed: bool,
}

impl CameraDevice for SyntheticDevice {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: &[Surface],
        callbacks: SessionCallbacks,
    ) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        if outputs.is_empty() {
            return Err(DeviceError::Rejected("capture session needs an output".into()));
        }
        let outcome = locked(&self.bench.script)
            .configures
            .pop_front()
            .unwrap_or(ConfigureOutcome::Configure);
        log::debug!("SyntheticCamera: configure {} -> {:?}", self.id, outcome);
        match outcome {
            ConfigureOutcome::Reject => {
                Err(DeviceError::Rejected("scripted configure rejection".into()))
            }
            ConfigureOutcome::Fail => {
                std::thread::Builder::new()
                    .name("synthetic-configure".into())
                    .spawn(move || callbacks.configure_failed(None))?;
                Ok(())
            }
            ConfigureOutcome::ErrorThenFail(code) => {
                let events = self.events.clone();
                std::thread::Builder::new()
                    .name("synthetic-configure".into())
                    .spawn(move || {
                        events.error(None, code);
                        callbacks.configure_failed(None);
                    })?;
                Ok(())
            }
            ConfigureOutcome::Configure => {
                let bench = self.bench.clone();
                std::thread::Builder::new()
                    .name("synthetic-configure".into())
                    .spawn(move || {
                        bump(&bench.counters.sessions_created);
                        let id = bench.next_id();
                        callbacks.configured(Box::new(SyntheticCaptureSession {
                            id,
                            bench,
                            closed: false,
                        }));
                    })?;
                Ok(())
            }
        }
    }
}

impl Close for SyntheticDevice {
    fn close(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            log::debug!("SyntheticCamera: device {} closed", self.id);
            bump(&self.bench.counters.devices_closed);
        }
    }
}

struct SyntheticCaptureSession {
    id: u64,
    bench: Arc<Bench>,
    closed: bool,
}

impl CaptureSession for SyntheticCaptureSession {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), DeviceError> {
        if self.closed {
            return Err(DeviceError::Closed);
        }
        {
            let mut script = locked(&self.bench.script);
            if script.request_failures > 0 {
                script.request_failures -= 1;
                return Err(DeviceError::Rejected("scripted request failure".into()));
            }
        }
        locked(&self.bench.requests).push(request.clone());
        let mut repeating = locked(&self.bench.repeating);
        repeating.retain(|(session, _)| *session != self.id);
        repeating.push((self.id, request.targets.clone()));
        Ok(())
    }
}

impl Close for SyntheticCaptureSession {
    fn close(&mut self) {
        if !std::mem::replace(&mut self.closed, true) {
            locked(&self.bench.repeating).retain(|(session, _)| *session != self.id);
            bump(&self.bench.counters.sessions_closed);
        }
    }
}

// ----------------------------------------------------------------------------
// Frame source
// ----------------------------------------------------------------------------

/// Output target type of synthetic frame sources.
#[derive(Debug)]
pub struct SyntheticTarget {
    pub source: u64,
}

struct SourceState {
    size: Resolution,
    max_images: usize,
    surface: Surface,
    queue: Mutex<VecDeque<PlanarBuffer>>,
    closed: AtomicBool,
    produced: AtomicU64,
    notifier: FrameNotifier,
    bench: Arc<Bench>,
}

impl SourceState {
    fn is_streaming(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && self.bench.is_streaming_to(&self.surface)
    }

    /// Queue one generated frame, dropping the oldest beyond `max_images`.
    fn produce(&self) -> bool {
        if self.closed.load(Ordering::SeqCst) {
            return false;
        }
        let n = self.produced.fetch_add(1, Ordering::Relaxed);
        let luma = (n % 220) as u8 + 16;
        let buffer = PlanarBuffer::filled(self.size.width, self.size.height, luma, 128);
        {
            let mut queue = locked(&self.queue);
            queue.push_back(buffer);
            bump(&self.bench.counters.frames_produced);
            while queue.len() > self.max_images {
                queue.pop_front();
                bump(&self.bench.counters.frames_released);
            }
        }
        self.notifier.notify();
        true
    }

    fn drain(&self) {
        let dropped = locked(&self.queue).drain(..).count() as u64;
        self.bench
            .counters
            .frames_released
            .fetch_add(dropped, Ordering::SeqCst);
    }
}

struct SyntheticFrameSource {
    state: Arc<SourceState>,
    pump: Option<JoinHandle<()>>,
}

impl SyntheticFrameSource {
    fn start(
        bench: Arc<Bench>,
        size: Resolution,
        max_images: usize,
        notifier: FrameNotifier,
        interval: Option<Duration>,
    ) -> Result<Self, DeviceError> {
        let surface = Surface::new(SyntheticTarget {
            source: bench.next_id(),
        });
        let state = Arc::new(SourceState {
            size,
            max_images,
            surface,
            queue: Mutex::new(VecDeque::with_capacity(max_images)),
            closed: AtomicBool::new(false),
            produced: AtomicU64::new(0),
            notifier,
            bench: bench.clone(),
        });
        locked(&bench.sources).push(Arc::downgrade(&state));

        let pump = match interval {
            Some(interval) => {
                let pumped = state.clone();
                let handle = std::thread::Builder::new()
                    .name("synthetic-frames".into())
                    .spawn(move || {
                        while !pumped.closed.load(Ordering::SeqCst) {
                            std::thread::sleep(interval);
                            if pumped.is_streaming() {
                                pumped.produce();
                            }
                        }
                    })?;
                Some(handle)
            }
            None => None,
        };
        Ok(Self { state, pump })
    }
}

impl FrameSource for SyntheticFrameSource {
    fn surface(&self) -> Surface {
        self.state.surface.clone()
    }

    fn acquire_latest(&mut self) -> Option<Box<dyn NativeFrame>> {
        let mut queue = locked(&self.state.queue);
        let latest = queue.pop_back()?;
        let older = queue.drain(..).count() as u64;
        drop(queue);
        if older > 0 {
            self.state
                .bench
                .counters
                .frames_released
                .fetch_add(older, Ordering::SeqCst);
        }
        Some(Box::new(SyntheticFrame {
            buffer: latest,
            bench: self.state.bench.clone(),
        }))
    }
}

impl Close for SyntheticFrameSource {
    fn close(&mut self) {
        if self.state.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(pump) = self.pump.take() {
            if pump.join().is_err() {
                log::error!("SyntheticCamera: frame pump panicked");
            }
        }
        self.state.drain();
        bump(&self.state.bench.counters.frame_sources_closed);
    }
}

impl Drop for SyntheticFrameSource {
    fn drop(&mut self) {
        // Stop the pump even when the owner forgot to close.
        self.state.closed.store(true, Ordering::SeqCst);
    }
}

struct SyntheticFrame {
    buffer: PlanarBuffer,
    bench: Arc<Bench>,
}

impl NativeFrame for SyntheticFrame {
    fn width(&self) -> u32 {
        self.buffer.width()
    }

    fn height(&self) -> u32 {
        self.buffer.height()
    }

    fn plane(&self, index: usize) -> Option<Plane<'_>> {
        self.buffer.plane(index)
    }
}

impl Drop for SyntheticFrame {
    fn drop(&mut self) {
        bump(&self.bench.counters.frames_released);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn catalog_lists_devices_in_order() {
        let camera = SyntheticCamera::with_default_devices();
        let ids: Vec<String> = camera
            .device_ids()
            .iter()
            .map(|id| id.to_string())
            .collect();
        assert_eq!(ids, vec!["0", "1"]);
        let front = camera.characteristics(&DeviceId::new("1")).unwrap();
        assert_eq!(front.facing, Facing::Front);
        assert_eq!(front.sensor_orientation, 270);
        assert!(camera.characteristics(&DeviceId::new("9")).is_none());
    }

    #[test]
    fn fail_device_needs_an_opened_device() {
        let camera = SyntheticCamera::with_default_devices();
        assert!(!camera.fail_device(SYNTHETIC_DEVICE_ERROR));
    }

    #[test]
    fn stats_track_open_handles() {
        let stats = SyntheticStats {
            devices_opened: 3,
            devices_closed: 2,
            sessions_created: 1,
            frame_sources_created: 2,
            frame_sources_closed: 2,
            frames_produced: 10,
            frames_released: 7,
            ..SyntheticStats::default()
        };
        assert_eq!(stats.open_handles(), 2);
        assert_eq!(stats.frames_outstanding(), 3);
    }

    #[test]
    fn scripts_are_consumed_in_order() {
        let camera = SyntheticCamera::new();
        camera.script_opens([OpenOutcome::Hold, OpenOutcome::Reject]);
        camera.fail_repeating_requests(2);
        let script = locked(&camera.bench.script);
        assert_eq!(
            script.opens.iter().copied().collect::<Vec<_>>(),
            vec![OpenOutcome::Hold, OpenOutcome::Reject]
        );
        assert_eq!(script.request_failures, 2);
    }
}
