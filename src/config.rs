use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use crate::device::Facing;
use crate::request::FpsRange;
use crate::retry::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY};
use crate::session::{SessionConfig, DEFAULT_FRAME_QUEUE_DEPTH, DEFAULT_LOCK_TIMEOUT};
use crate::size::{
    Resolution, SizePolicy, DEFAULT_ASPECT_RATIO, DEFAULT_ASPECT_TOLERANCE,
    DEFAULT_IDEAL_SHORT_SIDE,
};

const DEFAULT_TARGET_WIDTH: u32 = 1280;
const DEFAULT_TARGET_HEIGHT: u32 = 720;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    facing: Option<Facing>,
    target: Option<TargetConfigFile>,
    retry: Option<RetryConfigFile>,
    lock: Option<LockConfigFile>,
    frame_queue_depth: Option<usize>,
    fps_range: Option<FpsRange>,
    size: Option<SizeConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct TargetConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct RetryConfigFile {
    max_retries: Option<u32>,
    delay_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct LockConfigFile {
    timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SizeConfigFile {
    aspect_ratio: Option<f64>,
    aspect_tolerance: Option<f64>,
    ideal_short_side: Option<u32>,
}

/// Capture settings resolved from file, defaults and environment.
#[derive(Debug, Clone, PartialEq)]
pub struct CaptureConfig {
    pub facing: Facing,
    pub target: Resolution,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub lock_timeout: Duration,
    pub frame_queue_depth: usize,
    pub fps_range: FpsRange,
    pub size_policy: SizePolicy,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self::from_file(CaptureConfigFile::default())
    }
}

impl CaptureConfig {
    /// Load from `CAPTURE_CONFIG` (JSON, or TOML for `.toml` paths), then apply
    /// `CAPTURE_*` overrides and validate.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CAPTURE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Parameters for [`crate::CameraSession::new`].
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            facing: self.facing,
            target: self.target,
            size_policy: self.size_policy,
            fps_range: self.fps_range,
            max_retries: self.max_retries,
            retry_delay: self.retry_delay,
            lock_timeout: self.lock_timeout,
            frame_queue_depth: self.frame_queue_depth,
        }
    }

    fn from_file(file: CaptureConfigFile) -> Self {
        let target = Resolution::new(
            file.target
                .as_ref()
                .and_then(|target| target.width)
                .unwrap_or(DEFAULT_TARGET_WIDTH),
            file.target
                .as_ref()
                .and_then(|target| target.height)
                .unwrap_or(DEFAULT_TARGET_HEIGHT),
        );
        let size_policy = SizePolicy {
            aspect_ratio: file
                .size
                .as_ref()
                .and_then(|size| size.aspect_ratio)
                .unwrap_or(DEFAULT_ASPECT_RATIO),
            aspect_tolerance: file
                .size
                .as_ref()
                .and_then(|size| size.aspect_tolerance)
                .unwrap_or(DEFAULT_ASPECT_TOLERANCE),
            ideal_short_side: file
                .size
                .as_ref()
                .and_then(|size| size.ideal_short_side)
                .unwrap_or(DEFAULT_IDEAL_SHORT_SIDE),
        };
        Self {
            facing: file.facing.unwrap_or_default(),
            target,
            max_retries: file
                .retry
                .as_ref()
                .and_then(|retry| retry.max_retries)
                .unwrap_or(DEFAULT_MAX_RETRIES),
            retry_delay: file
                .retry
                .as_ref()
                .and_then(|retry| retry.delay_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_RETRY_DELAY),
            lock_timeout: file
                .lock
                .and_then(|lock| lock.timeout_ms)
                .map(Duration::from_millis)
                .unwrap_or(DEFAULT_LOCK_TIMEOUT),
            frame_queue_depth: file.frame_queue_depth.unwrap_or(DEFAULT_FRAME_QUEUE_DEPTH),
            fps_range: file.fps_range.unwrap_or_default(),
            size_policy,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(facing) = std::env::var("CAPTURE_FACING") {
            if !facing.trim().is_empty() {
                self.facing = facing
                    .parse()
                    .map_err(|e| anyhow!("CAPTURE_FACING: {}", e))?;
            }
        }
        if let Some(width) = env_number("CAPTURE_TARGET_WIDTH")? {
            self.target.width = width;
        }
        if let Some(height) = env_number("CAPTURE_TARGET_HEIGHT")? {
            self.target.height = height;
        }
        if let Some(retries) = env_number("CAPTURE_MAX_RETRIES")? {
            self.max_retries = retries;
        }
        if let Some(delay) = env_number("CAPTURE_RETRY_DELAY_MS")? {
            self.retry_delay = Duration::from_millis(delay);
        }
        if let Some(timeout) = env_number("CAPTURE_LOCK_TIMEOUT_MS")? {
            self.lock_timeout = Duration::from_millis(timeout);
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        if self.target.width == 0 || self.target.height == 0 {
            return Err(anyhow!(
                "target dimensions must be non-zero (got {})",
                self.target
            ));
        }
        if self.frame_queue_depth == 0 {
            return Err(anyhow!("frame_queue_depth must be at least 1"));
        }
        if self.fps_range.min > self.fps_range.max {
            return Err(anyhow!(
                "fps_range.min ({}) exceeds fps_range.max ({})",
                self.fps_range.min,
                self.fps_range.max
            ));
        }
        if !(self.size_policy.aspect_ratio.is_finite() && self.size_policy.aspect_ratio > 0.0) {
            return Err(anyhow!("size.aspect_ratio must be positive"));
        }
        if !(self.size_policy.aspect_tolerance.is_finite()
            && self.size_policy.aspect_tolerance >= 0.0)
        {
            return Err(anyhow!("size.aspect_tolerance must not be negative"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<CaptureConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a non-negative integer", key)),
        _ => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_session_defaults() {
        let cfg = CaptureConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.session_config(), SessionConfig::default());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let file: CaptureConfigFile =
            serde_json::from_str(r#"{"facing": "back", "retry": {"delay_ms": 50}}"#).unwrap();
        let cfg = CaptureConfig::from_file(file);
        assert_eq!(cfg.facing, Facing::Back);
        assert_eq!(cfg.retry_delay, Duration::from_millis(50));
        assert_eq!(cfg.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(cfg.target, Resolution::new(1280, 720));
    }

    #[test]
    fn toml_layout_matches_json() {
        let file: CaptureConfigFile = toml::from_str(
            r#"
            facing = "external"
            frame_queue_depth = 5

            [fps_range]
            min = 10
            max = 24

            [size]
            aspect_ratio = 1.3333
            "#,
        )
        .unwrap();
        let cfg = CaptureConfig::from_file(file);
        assert_eq!(cfg.facing, Facing::External);
        assert_eq!(cfg.frame_queue_depth, 5);
        assert_eq!(cfg.fps_range, FpsRange { min: 10, max: 24 });
        assert!((cfg.size_policy.aspect_ratio - 1.3333).abs() < 1e-9);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(serde_json::from_str::<CaptureConfigFile>(r#"{"facnig": "back"}"#).is_err());
    }

    #[test]
    fn validation_rejects_bad_values() {
        let base = CaptureConfig::default();

        let zero_target = CaptureConfig {
            target: Resolution::new(0, 720),
            ..base.clone()
        };
        assert!(zero_target.validate().is_err());

        let no_queue = CaptureConfig {
            frame_queue_depth: 0,
            ..base.clone()
        };
        assert!(no_queue.validate().is_err());

        let inverted_fps = CaptureConfig {
            fps_range: FpsRange { min: 30, max: 15 },
            ..base.clone()
        };
        assert!(inverted_fps.validate().is_err());

        let mut bad_aspect = base.clone();
        bad_aspect.size_policy.aspect_ratio = 0.0;
        assert!(bad_aspect.validate().is_err());

        let mut bad_tolerance = base;
        bad_tolerance.size_policy.aspect_tolerance = -0.5;
        assert!(bad_tolerance.validate().is_err());
    }
}
