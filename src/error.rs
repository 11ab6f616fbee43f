//! Failure taxonomy for the capture session.

use thiserror::Error;

/// Errors reported by device backends.
#[derive(Debug, Error)]
pub enum DeviceError {
    /// Device is missing, busy or otherwise cannot be used right now.
    #[error("device {0} is unavailable")]
    Unavailable(String),

    #[error("device disconnected")]
    Disconnected,

    /// Backend-specific error code.
    #[error("device error code {0}")]
    Device(i32),

    /// The handle (device, session or frame source) was already closed.
    #[error("handle is closed")]
    Closed,

    /// The device refused a request or configuration.
    #[error("rejected by device: {0}")]
    Rejected(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Every failure the session can observe while driving the device.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Failure {
    #[error("camera permission not granted")]
    PermissionDenied,

    #[error("no capture device available")]
    NoDevice,

    #[error("device reports no output sizes")]
    NoOutputSizes,

    #[error("frame source could not be created: {0}")]
    FrameSource(String),

    #[error("timed out waiting for the device lock")]
    LockTimeout,

    #[error("device open failed: {0}")]
    OpenFailed(String),

    #[error("device disconnected")]
    Disconnected,

    #[error("device error code {0}")]
    DeviceError(i32),

    #[error("capture session configuration failed")]
    ConfigureFailed,

    #[error("repeating capture request failed")]
    RequestFailed,
}

impl Failure {
    /// Transient failures are routed to the retry policy; the rest end the attempt.
    pub fn is_transient(&self) -> bool {
        !matches!(
            self,
            Failure::PermissionDenied | Failure::NoDevice | Failure::NoOutputSizes
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_problems_are_terminal() {
        assert!(!Failure::PermissionDenied.is_transient());
        assert!(!Failure::NoDevice.is_transient());
        assert!(!Failure::NoOutputSizes.is_transient());
    }

    #[test]
    fn device_faults_are_transient() {
        for failure in [
            Failure::FrameSource("no buffers".into()),
            Failure::LockTimeout,
            Failure::OpenFailed("busy".into()),
            Failure::Disconnected,
            Failure::DeviceError(4),
            Failure::ConfigureFailed,
            Failure::RequestFailed,
        ] {
            assert!(failure.is_transient(), "{failure} should be transient");
        }
    }
}
