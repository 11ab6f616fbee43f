//! Device backends.
//!
//! - Synthetic backend (tests, demos): scriptable outcomes, generated frames
//! - V4L2 devices (feature: backend-v4l2)
//!
//! Backends implement [`crate::DeviceCatalog`] and [`crate::CameraBackend`] and
//! report every asynchronous outcome from their own threads.

pub mod synthetic;
#[cfg(feature = "backend-v4l2")]
pub mod v4l2;

pub use synthetic::{ConfigureOutcome, OpenOutcome, SyntheticCamera, SyntheticStats};
#[cfg(feature = "backend-v4l2")]
pub use v4l2::V4l2Camera;
