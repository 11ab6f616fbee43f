//! V4L2 camera backend.
//!
//! This module provides `V4l2Camera` for capturing from local V4L2 nodes
//! (e.g. /dev/video0).
//!
//! The backend is responsible for:
//! - Enumerating device nodes and their discrete YU12 (I420) frame sizes
//! - Opening devices on a helper thread
//! - Streaming through a memory-mapped buffer queue into a latest-frame slot
//! - Reporting stream failures as device errors
//!
//! UVC devices expose no flash, torch or autofocus controls; repeating requests
//! only gate frame delivery.

use std::io;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;

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

const YU12: &[u8; 4] = b"YU12";

fn os_code(err: &io::Error) -> i32 {
    err.raw_os_error().unwrap_or(-1)
}

/// Local V4L2 devices.
pub struct V4l2Camera {
    devices: Vec<(DeviceId, DeviceCharacteristics)>,
}

impl V4l2Camera {
    /// Enumerate device nodes once. Nodes that cannot be queried are skipped.
    pub fn discover() -> Self {
        let mut devices = Vec::new();
        for node in v4l::context::enum_devices() {
            let path = node.path().to_path_buf();
            match query(&path) {
                Ok(characteristics) => {
                    log::info!(
                        "V4l2Camera: found {} ({} sizes)",
                        path.display(),
                        characteristics
                            .output_sizes
                            .as_ref()
                            .map(Vec::len)
                            .unwrap_or(0)
                    );
                    devices.push((DeviceId::new(path.display().to_string()), characteristics));
                }
                Err(err) => {
                    log::warn!("V4l2Camera: skipping {}: {}", path.display(), err);
                }
            }
        }
        Self { devices }
    }
}

fn query(path: &std::path::Path) -> io::Result<DeviceCharacteristics> {
    use v4l::framesize::FrameSizeEnum;
    use v4l::video::Capture;

    let device = v4l::Device::with_path(path)?;
    let mut sizes = Vec::new();
    for framesize in device.enum_framesizes(v4l::FourCC::new(YU12))? {
        match framesize.size {
            FrameSizeEnum::Discrete(discrete) => {
                sizes.push(Resolution::new(discrete.width, discrete.height))
            }
            FrameSizeEnum::Stepwise(stepwise) => {
                sizes.push(Resolution::new(stepwise.max_width, stepwise.max_height))
            }
        }
    }
    Ok(DeviceCharacteristics {
        facing: Facing::External,
        sensor_orientation: 0,
        output_sizes: (!sizes.is_empty()).then_some(sizes),
    })
}

impl DeviceCatalog for V4l2Camera {
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

impl CameraBackend for V4l2Camera {
    fn open(&self, id: &DeviceId, callbacks: DeviceCallbacks) -> Result<(), DeviceError> {
        if !self.devices.iter().any(|(known, _)| known == id) {
            return Err(DeviceError::Unavailable(id.to_string()));
        }
        let id = id.clone();
        std::thread::Builder::new()
            .name("v4l2-open".into())
            .spawn(move || {
                let path = PathBuf::from(id.as_str());
                match v4l::Device::with_path(&path) {
                    Ok(device) => {
                        log::info!("V4l2Camera: opened {}", path.display());
                        callbacks.opened(Box::new(V4l2Device {
                            id,
                            events: callbacks.clone(),
                            device: Some(device),
                            stream: None,
                        }));
                    }
                    Err(err) => {
                        log::warn!("V4l2Camera: open {} failed: {}", path.display(), err);
                        callbacks.error(None, os_code(&err));
                    }
                }
            })?;
        Ok(())
    }

    fn create_frame_source(
        &self,
        size: Resolution,
        max_images: usize,
        notifier: FrameNotifier,
    ) -> Result<Box<dyn FrameSource>, DeviceError> {
        if max_images == 0 {
            return Err(DeviceError::Rejected("frame queue depth must be positive".into()));
        }
        let slot = Arc::new(FrameSlot {
            size,
            max_images,
            latest: Mutex::new(None),
            closed: AtomicBool::new(false),
            notifier,
        });
        let surface = Surface::new(V4l2Target { slot: slot.clone() });
        Ok(Box::new(V4l2FrameSource { slot, surface }))
    }
}

// ----------------------------------------------------------------------------
// Frame slot
// ----------------------------------------------------------------------------

/// Output target handed to the capture session.
struct V4l2Target {
    slot: Arc<FrameSlot>,
}

struct FrameSlot {
    size: Resolution,
    max_images: usize,
    latest: Mutex<Option<PlanarBuffer>>,
    closed: AtomicBool,
    notifier: FrameNotifier,
}

impl FrameSlot {
    fn latest(&self) -> MutexGuard<'_, Option<PlanarBuffer>> {
        self.latest.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace the pending frame; an undelivered older frame is dropped.
    fn store(&self, frame: PlanarBuffer) {
        if self.closed.load(Ordering::SeqCst) {
            return;
        }
        *self.latest() = Some(frame);
        self.notifier.notify();
    }
}

struct V4l2FrameSource {
    slot: Arc<FrameSlot>,
    surface: Surface,
}

impl FrameSource for V4l2FrameSource {
    fn surface(&self) -> Surface {
        self.surface.clone()
    }

    fn acquire_latest(&mut self) -> Option<Box<dyn NativeFrame>> {
        let frame = self.slot.latest().take()?;
        Some(Box::new(V4l2Frame(frame)))
    }
}

impl Close for V4l2FrameSource {
    fn close(&mut self) {
        self.slot.closed.store(true, Ordering::SeqCst);
        self.slot.latest().take();
    }
}

struct V4l2Frame(PlanarBuffer);

impl NativeFrame for V4l2Frame {
    fn width(&self) -> u32 {
        self.0.width()
    }

    fn height(&self) -> u32 {
        self.0.height()
    }

    fn plane(&self, index: usize) -> Option<Plane<'_>> {
        self.0.plane(index)
    }
}

// ----------------------------------------------------------------------------
// Device and stream
// ----------------------------------------------------------------------------

struct StreamThread {
    running: Arc<AtomicBool>,
    join: JoinHandle<()>,
}

struct V4l2Device {
    id: DeviceId,
    events: DeviceCallbacks,
    device: Option<v4l::Device>,
    stream: Option<StreamThread>,
}

impl CameraDevice for V4l2Device {
    fn id(&self) -> &DeviceId {
        &self.id
    }

    fn create_capture_session(
        &mut self,
        outputs: &[Surface],
        callbacks: SessionCallbacks,
    ) -> Result<(), DeviceError> {
        use v4l::video::Capture;

        let slot = outputs
            .iter()
            .find_map(|surface| surface.downcast_ref::<V4l2Target>())
            .map(|target| target.slot.clone())
            .ok_or_else(|| DeviceError::Rejected("no V4L2 frame source among outputs".into()))?;
        let mut device = self.device.take().ok_or(DeviceError::Closed)?;

        let mut format = device.format()?;
        format.width = slot.size.width;
        format.height = slot.size.height;
        format.fourcc = v4l::FourCC::new(YU12);
        let format = device.set_format(&format)?;
        if format.fourcc != v4l::FourCC::new(YU12) {
            return Err(DeviceError::Rejected(format!(
                "{} does not stream YU12 (got {})",
                self.id, format.fourcc
            )));
        }
        log::info!(
            "V4l2Camera: {} streaming {}x{} stride {}",
            self.id,
            format.width,
            format.height,
            format.stride
        );

        let running = Arc::new(AtomicBool::new(true));
        let active = Arc::new(AtomicBool::new(false));
        let stream = CaptureLoop {
            device,
            format,
            slot,
            running: running.clone(),
            active,
            events: self.events.clone(),
        };
        let join = std::thread::Builder::new()
            .name("v4l2-capture".into())
            .spawn(move || stream.run(callbacks))?;
        self.stream = Some(StreamThread { running, join });
        Ok(())
    }
}

impl Close for V4l2Device {
    fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            stream.running.store(false, Ordering::SeqCst);
            if stream.join.join().is_err() {
                log::error!("V4l2Camera: capture thread for {} panicked", self.id);
            }
        }
        self.device = None;
        log::info!("V4l2Camera: closed {}", self.id);
    }
}

struct CaptureLoop {
    device: v4l::Device,
    format: v4l::Format,
    slot: Arc<FrameSlot>,
    running: Arc<AtomicBool>,
    active: Arc<AtomicBool>,
    events: DeviceCallbacks,
}

impl CaptureLoop {
    fn run(self, callbacks: SessionCallbacks) {
        use v4l::buffer::Type;
        use v4l::io::traits::CaptureStream;
        use v4l::prelude::MmapStream;

        let buffers = self.slot.max_images as u32;
        let mut stream = match MmapStream::with_buffers(&self.device, Type::VideoCapture, buffers) {
            Ok(stream) => stream,
            Err(err) => {
                log::warn!("V4l2Camera: create buffer stream failed: {}", err);
                callbacks.configure_failed(None);
                return;
            }
        };
        callbacks.configured(Box::new(V4l2CaptureSession {
            active: self.active.clone(),
        }));

        while self.running.load(Ordering::SeqCst) {
            match stream.next() {
                Ok((buf, _meta)) => {
                    if !self.active.load(Ordering::SeqCst) {
                        continue;
                    }
                    match PlanarBuffer::from_i420(
                        self.format.width,
                        self.format.height,
                        self.format.stride as usize,
                        buf,
                    ) {
                        Some(frame) => self.slot.store(frame),
                        None => log::warn!(
                            "V4l2Camera: short buffer ({} bytes) for {}x{}",
                            buf.len(),
                            self.format.width,
                            self.format.height
                        ),
                    }
                }
                Err(err) => {
                    if self.running.load(Ordering::SeqCst) {
                        log::error!("V4l2Camera: capture failed: {}", err);
                        self.events.error(None, os_code(&err));
                    }
                    break;
                }
            }
        }
    }
}

struct V4l2CaptureSession {
    active: Arc<AtomicBool>,
}

impl CaptureSession for V4l2CaptureSession {
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), DeviceError> {
        if request.targets.is_empty() {
            return Err(DeviceError::Rejected("request has no targets".into()));
        }
        log::debug!(
            "V4l2Camera: repeating request (flash {:?}, fps {:?})",
            request.flash_mode,
            request.ae_target_fps_range
        );
        self.active.store(true, Ordering::SeqCst);
        Ok(())
    }
}

impl Close for V4l2CaptureSession {
    fn close(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn discovery_reports_external_devices_only() {
        let camera = V4l2Camera::discover();
        for id in camera.device_ids() {
            let characteristics = camera.characteristics(&id).unwrap();
            assert_eq!(characteristics.facing, Facing::External);
            assert_eq!(characteristics.sensor_orientation, 0);
        }
    }

    #[test]
    fn unknown_device_is_unavailable() {
        let camera = V4l2Camera { devices: Vec::new() };
        assert!(camera.characteristics(&DeviceId::new("/dev/video99")).is_none());
    }
}
