//! Repeating capture requests.
//!
//! A request is rebuilt from [`CaptureSettings`] every time it is issued, so flash
//! and torch changes always go through the same merge:
//!
//! - torch requested: auto-exposure runs in plain metering mode (`AeMode::On`) and
//!   the flash control is forced to `FlashMode::Torch`, whatever flash mode was set;
//! - otherwise: auto-exposure uses `AeMode::OnAutoFlash` and the requested flash
//!   mode is applied unchanged.
//!
//! The reduced request used as a fallback carries the auto control mode and nothing
//! else.

use serde::{Deserialize, Serialize};

use crate::device::Surface;

/// Flash control applied to each frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlashMode {
    #[default]
    Off,
    Single,
    Torch,
}

/// Continuous illumination, independent of per-frame flash metering.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TorchMode {
    #[default]
    Off,
    Torch,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ControlMode {
    Auto,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AeMode {
    /// Metering enabled, no flash involvement.
    On,
    OnAutoFlash,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AfMode {
    ContinuousPicture,
}

/// Auto-exposure target frame-rate range.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FpsRange {
    pub min: u32,
    pub max: u32,
}

impl Default for FpsRange {
    fn default() -> Self {
        Self { min: 15, max: 30 }
    }
}

/// Caller-controlled request parameters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CaptureSettings {
    pub fps_range: FpsRange,
    pub flash: FlashMode,
    pub torch: TorchMode,
}

/// Standing instruction for the device to keep producing frames into `targets`.
#[derive(Clone, Debug, PartialEq)]
pub struct CaptureRequest {
    pub targets: Vec<Surface>,
    pub control_mode: ControlMode,
    pub ae_mode: Option<AeMode>,
    pub ae_target_fps_range: Option<FpsRange>,
    pub af_mode: Option<AfMode>,
    pub flash_mode: Option<FlashMode>,
}

impl CaptureRequest {
    /// Full preview request with exposure, focus and flash/torch settings merged in.
    pub fn preview(targets: Vec<Surface>, settings: &CaptureSettings) -> Self {
        let (ae_mode, flash_mode) = match settings.torch {
            TorchMode::Torch => (AeMode::On, FlashMode::Torch),
            TorchMode::Off => (AeMode::OnAutoFlash, settings.flash),
        };
        Self {
            targets,
            control_mode: ControlMode::Auto,
            ae_mode: Some(ae_mode),
            ae_target_fps_range: Some(settings.fps_range),
            af_mode: Some(AfMode::ContinuousPicture),
            flash_mode: Some(flash_mode),
        }
    }

    /// Fallback request: auto control mode only.
    pub fn reduced(targets: Vec<Surface>) -> Self {
        Self {
            targets,
            control_mode: ControlMode::Auto,
            ae_mode: None,
            ae_target_fps_range: None,
            af_mode: None,
            flash_mode: None,
        }
    }

    pub fn is_reduced(&self) -> bool {
        self.ae_mode.is_none()
            && self.ae_target_fps_range.is_none()
            && self.af_mode.is_none()
            && self.flash_mode.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn torch_overrides_flash_and_metering() {
        let settings = CaptureSettings {
            flash: FlashMode::Single,
            torch: TorchMode::Torch,
            ..CaptureSettings::default()
        };
        let request = CaptureRequest::preview(Vec::new(), &settings);
        assert_eq!(request.ae_mode, Some(AeMode::On));
        assert_eq!(request.flash_mode, Some(FlashMode::Torch));
    }

    #[test]
    fn flash_mode_applies_as_is_without_torch() {
        for flash in [FlashMode::Off, FlashMode::Single, FlashMode::Torch] {
            let settings = CaptureSettings {
                flash,
                ..CaptureSettings::default()
            };
            let request = CaptureRequest::preview(Vec::new(), &settings);
            assert_eq!(request.ae_mode, Some(AeMode::OnAutoFlash));
            assert_eq!(request.flash_mode, Some(flash));
        }
    }

    #[test]
    fn preview_carries_fps_and_focus() {
        let settings = CaptureSettings {
            fps_range: FpsRange { min: 24, max: 30 },
            ..CaptureSettings::default()
        };
        let request = CaptureRequest::preview(Vec::new(), &settings);
        assert_eq!(
            request.ae_target_fps_range,
            Some(FpsRange { min: 24, max: 30 })
        );
        assert_eq!(request.af_mode, Some(AfMode::ContinuousPicture));
        assert!(!request.is_reduced());
    }

    #[test]
    fn reduced_request_has_only_auto_control() {
        let request = CaptureRequest::reduced(Vec::new());
        assert_eq!(request.control_mode, ControlMode::Auto);
        assert!(request.is_reduced());
    }
}
