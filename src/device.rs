//! Device collaborator seams.
//!
//! The session drives hardware exclusively through these traits:
//!
//! - [`DeviceCatalog`]: synchronous, side-effect-free enumeration of devices and
//!   their characteristics.
//! - [`CameraBackend`]: asynchronous device open and frame-source creation.
//! - [`CameraDevice`], [`CaptureSession`], [`FrameSource`]: opaque native handles,
//!   each released through [`Close`].
//! - [`PermissionGate`]: "is camera access granted?".
//!
//! Backends report asynchronous outcomes through the callback objects handed to
//! them ([`DeviceCallbacks`], [`SessionCallbacks`], [`FrameNotifier`]). They may call
//! these from any thread; the outcome is queued onto the session worker. A handle
//! passed into a callback after the session is gone is closed on the spot.

use serde::{Deserialize, Serialize};
use std::any::Any;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::DeviceError;
use crate::frame::Plane;
use crate::handle::{Close, Owned};
use crate::request::CaptureRequest;
use crate::sequence::OpSeq;
use crate::session::SessionEvent;
use crate::size::Resolution;
use crate::worker::WorkerHandle;

/// Platform identifier of a capture device.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId(String);

impl DeviceId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for DeviceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Which way the lens points.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Facing {
    #[default]
    Front,
    Back,
    External,
}

impl FromStr for Facing {
    type Err = anyhow::Error;

    fn from_str(value: &str) -> anyhow::Result<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Facing::Front),
            "back" => Ok(Facing::Back),
            "external" => Ok(Facing::External),
            other => Err(anyhow::anyhow!(
                "unknown facing '{}' (expected front, back or external)",
                other
            )),
        }
    }
}

/// Static capability metadata for one device.
#[derive(Clone, Debug, PartialEq)]
pub struct DeviceCharacteristics {
    pub facing: Facing,
    /// Clockwise rotation of the sensor relative to the device's natural
    /// orientation, in degrees.
    pub sensor_orientation: u32,
    /// Output sizes for planar YUV frames; `None` when the device reports none.
    pub output_sizes: Option<Vec<Resolution>>,
}

/// Enumerates devices. Must be cheap and free of side effects.
pub trait DeviceCatalog: Send + Sync {
    /// Device identifiers in platform order.
    fn device_ids(&self) -> Vec<DeviceId>;

    fn characteristics(&self, id: &DeviceId) -> Option<DeviceCharacteristics>;
}

/// Checked before every open attempt.
pub trait PermissionGate: Send + Sync {
    fn is_granted(&self) -> bool;
}

impl<F> PermissionGate for F
where
    F: Fn() -> bool + Send + Sync,
{
    fn is_granted(&self) -> bool {
        self()
    }
}

impl PermissionGate for AtomicBool {
    fn is_granted(&self) -> bool {
        self.load(Ordering::SeqCst)
    }
}

/// Opaque output target (frame-source endpoint or external preview surface).
///
/// The session passes surfaces through to the backend untouched. Backends recover
/// their own target types with [`Surface::downcast_ref`].
#[derive(Clone)]
pub struct Surface {
    target: Arc<dyn Any + Send + Sync>,
    type_name: &'static str,
}

impl Surface {
    pub fn new<T: Any + Send + Sync>(target: T) -> Self {
        Self::from_arc(Arc::new(target))
    }

    pub fn from_arc<T: Any + Send + Sync>(target: Arc<T>) -> Self {
        Self {
            target,
            type_name: std::any::type_name::<T>(),
        }
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.target.downcast_ref::<T>()
    }

    pub fn same_target(&self, other: &Surface) -> bool {
        Arc::ptr_eq(&self.target, &other.target)
    }
}

impl PartialEq for Surface {
    fn eq(&self, other: &Self) -> bool {
        self.same_target(other)
    }
}

impl std::fmt::Debug for Surface {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Surface")
            .field("type", &self.type_name)
            .finish()
    }
}

/// Asynchronous device API.
pub trait CameraBackend: Send + Sync {
    /// Begin opening `id`. Exactly one of `opened`, `disconnected` or `error` must
    /// eventually be reported through `callbacks` when this returns `Ok`.
    fn open(&self, id: &DeviceId, callbacks: DeviceCallbacks) -> Result<(), DeviceError>;

    /// Create a buffer-producing endpoint holding at most `max_images` frames.
    /// `notifier` must be signalled whenever a new frame becomes available.
    fn create_frame_source(
        &self,
        size: Resolution,
        max_images: usize,
        notifier: FrameNotifier,
    ) -> Result<Box<dyn FrameSource>, DeviceError>;
}

/// An opened device.
pub trait CameraDevice: Close + Send {
    fn id(&self) -> &DeviceId;

    /// Begin configuring a capture session writing into `outputs`. The outcome is
    /// reported through `callbacks`.
    fn create_capture_session(
        &mut self,
        outputs: &[Surface],
        callbacks: SessionCallbacks,
    ) -> Result<(), DeviceError>;
}

/// A configured streaming pipeline.
pub trait CaptureSession: Close + Send {
    /// Replace the standing request. Takes effect for subsequent frames.
    fn set_repeating_request(&mut self, request: &CaptureRequest) -> Result<(), DeviceError>;
}

/// The endpoint the capture session writes decoded frames into.
pub trait FrameSource: Close + Send {
    /// Output target to include in the capture session.
    fn surface(&self) -> Surface;

    /// Take the most recent complete frame, discarding any older ones.
    fn acquire_latest(&mut self) -> Option<Box<dyn NativeFrame>>;
}

/// A frame borrowed from a native buffer pool. Dropping it returns the buffer.
pub trait NativeFrame: Send {
    fn width(&self) -> u32;

    fn height(&self) -> u32;

    /// Plane 0 is Y, 1 is U, 2 is V.
    fn plane(&self, index: usize) -> Option<Plane<'_>>;
}

pub(crate) type DeviceHandle = Owned<dyn CameraDevice>;
pub(crate) type CaptureHandle = Owned<dyn CaptureSession>;
pub(crate) type FrameSourceHandle = Owned<dyn FrameSource>;

/// Reports the outcome of one open attempt.
#[derive(Clone, Debug)]
pub struct DeviceCallbacks {
    seq: OpSeq,
    events: WorkerHandle<SessionEvent>,
}

impl DeviceCallbacks {
    pub(crate) fn new(seq: OpSeq, events: WorkerHandle<SessionEvent>) -> Self {
        Self { seq, events }
    }

    /// The open attempt these callbacks belong to.
    pub fn sequence(&self) -> OpSeq {
        self.seq
    }

    pub fn opened(&self, device: Box<dyn CameraDevice>) {
        self.deliver(SessionEvent::DeviceOpened {
            seq: self.seq,
            device: Owned::new(device, "device"),
        });
    }

    /// The device went away. Pass the handle if it was never reported as opened.
    pub fn disconnected(&self, device: Option<Box<dyn CameraDevice>>) {
        self.deliver(SessionEvent::DeviceDisconnected {
            seq: self.seq,
            device: device.map(|device| Owned::new(device, "device")),
        });
    }

    /// The device failed. Pass the handle if it was never reported as opened.
    pub fn error(&self, device: Option<Box<dyn CameraDevice>>, code: i32) {
        self.deliver(SessionEvent::DeviceError {
            seq: self.seq,
            device: device.map(|device| Owned::new(device, "device")),
            code,
        });
    }

    fn deliver(&self, event: SessionEvent) {
        if !self.events.post(event) {
            log::debug!("device completion {} arrived after shutdown", self.seq);
        }
    }
}

/// Reports the outcome of one capture-session configuration.
#[derive(Clone, Debug)]
pub struct SessionCallbacks {
    seq: OpSeq,
    events: WorkerHandle<SessionEvent>,
}

impl SessionCallbacks {
    pub(crate) fn new(seq: OpSeq, events: WorkerHandle<SessionEvent>) -> Self {
        Self { seq, events }
    }

    pub fn sequence(&self) -> OpSeq {
        self.seq
    }

    pub fn configured(&self, session: Box<dyn CaptureSession>) {
        self.deliver(SessionEvent::SessionConfigured {
            seq: self.seq,
            session: Owned::new(session, "capture session"),
        });
    }

    pub fn configure_failed(&self, session: Option<Box<dyn CaptureSession>>) {
        self.deliver(SessionEvent::SessionConfigureFailed {
            seq: self.seq,
            session: session.map(|session| Owned::new(session, "capture session")),
        });
    }

    fn deliver(&self, event: SessionEvent) {
        if !self.events.post(event) {
            log::debug!("session completion {} arrived after shutdown", self.seq);
        }
    }
}

/// Buffer-ready signal from a frame source.
#[derive(Clone, Debug)]
pub struct FrameNotifier {
    events: WorkerHandle<SessionEvent>,
}

impl FrameNotifier {
    pub(crate) fn new(events: WorkerHandle<SessionEvent>) -> Self {
        Self { events }
    }

    /// Returns false once the session worker is gone.
    pub fn notify(&self) -> bool {
        self.events.post(SessionEvent::FrameReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn facing_parses_case_insensitively() {
        assert_eq!("Front".parse::<Facing>().unwrap(), Facing::Front);
        assert_eq!(" back ".parse::<Facing>().unwrap(), Facing::Back);
        assert_eq!("EXTERNAL".parse::<Facing>().unwrap(), Facing::External);
        assert!("sideways".parse::<Facing>().is_err());
    }

    #[test]
    fn surfaces_compare_by_identity() {
        let a = Surface::new(1u32);
        let b = Surface::new(1u32);
        assert_eq!(a, a.clone());
        assert_ne!(a, b);
        assert_eq!(a.downcast_ref::<u32>(), Some(&1));
        assert!(a.downcast_ref::<u64>().is_none());
    }

    #[test]
    fn closures_and_flags_are_permission_gates() {
        let granted = || true;
        assert!(granted.is_granted());
        let flag = AtomicBool::new(false);
        assert!(!flag.is_granted());
        flag.store(true, Ordering::SeqCst);
        assert!(flag.is_granted());
    }
}
