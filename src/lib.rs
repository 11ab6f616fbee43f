//! Capture Session
//!
//! This crate manages the lifecycle of a single video-capture device that streams
//! raw planar (YUV 4:2:0) frames to a consumer, driven by an asynchronous,
//! callback-based device API.
//!
//! # Architecture
//!
//! The session guarantees, by construction:
//!
//! 1. **No stale handles**: every asynchronous completion carries the sequence
//!    number of its open attempt; completions of superseded attempts only release
//!    what they carry.
//! 2. **No leaks**: native handles live in single-owner wrappers that close exactly
//!    once, on every path.
//! 3. **Serialized open/close**: a single-permit resource lock orders device opens
//!    against teardown across threads.
//! 4. **Bounded recovery**: transient failures reopen the device a fixed number of
//!    times, after a fixed delay, and never after `stop`.
//! 5. **One worker**: completions, retry timers and frame deliveries of a session
//!    run on one background thread, in order.
//!
//! # Module Structure
//!
//! - `session`: the state machine (`CameraSession`)
//! - `device`: collaborator traits implemented by backends
//! - `backend`: synthetic backend, V4L2 backend (feature: backend-v4l2)
//! - `size`, `sequence`, `lock`, `retry`, `worker`, `handle`: building blocks
//! - `request`, `frame`: capture requests and per-frame delivery
//! - `config`: file + environment configuration

pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod handle;
pub mod lock;
pub mod request;
pub mod retry;
pub mod sequence;
pub mod session;
pub mod size;
pub mod worker;

pub use config::CaptureConfig;
pub use device::{
    CameraBackend, CameraDevice, CaptureSession, DeviceCallbacks, DeviceCatalog,
    DeviceCharacteristics, DeviceId, Facing, FrameNotifier, FrameSource, NativeFrame,
    PermissionGate, SessionCallbacks, Surface,
};
pub use error::{DeviceError, Failure};
pub use frame::{deliver_frame, DeliveryOutcome, Frame, FrameSink, PlanarBuffer, Plane};
pub use handle::{Close, Owned};
pub use request::{
    AeMode, AfMode, CaptureRequest, CaptureSettings, ControlMode, FlashMode, FpsRange, TorchMode,
};
pub use session::{CameraSession, SessionCollaborators, SessionConfig, SessionState};
pub use size::{select_output_size, Resolution, SizePolicy};
