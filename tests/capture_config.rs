use std::io::Write;
use std::sync::Mutex;
use std::time::Duration;

use tempfile::NamedTempFile;

use capture_session::config::CaptureConfig;
use capture_session::{Facing, FpsRange, Resolution};

static ENV_LOCK: Mutex<()> = Mutex::new(());

fn clear_env() {
    for key in [
        "CAPTURE_CONFIG",
        "CAPTURE_FACING",
        "CAPTURE_TARGET_WIDTH",
        "CAPTURE_TARGET_HEIGHT",
        "CAPTURE_MAX_RETRIES",
        "CAPTURE_RETRY_DELAY_MS",
        "CAPTURE_LOCK_TIMEOUT_MS",
    ] {
        std::env::remove_var(key);
    }
}

#[test]
fn defaults_without_file_or_env() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let cfg = CaptureConfig::load().expect("load defaults");
    assert_eq!(cfg.facing, Facing::Front);
    assert_eq!(cfg.target, Resolution::new(1280, 720));
    assert_eq!(cfg.max_retries, 2);
    assert_eq!(cfg.retry_delay, Duration::from_millis(200));
    assert_eq!(cfg.lock_timeout, Duration::from_millis(2500));
    assert_eq!(cfg.frame_queue_depth, 3);
    assert_eq!(cfg.fps_range, FpsRange { min: 15, max: 30 });
}

#[test]
fn loads_json_file_and_env_overrides() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    let json = r#"{
        "facing": "back",
        "target": { "width": 1920, "height": 1080 },
        "retry": { "max_retries": 4, "delay_ms": 50 },
        "lock": { "timeout_ms": 1000 },
        "frame_queue_depth": 2,
        "fps_range": { "min": 24, "max": 30 },
        "size": { "aspect_tolerance": 0.05 }
    }"#;
    file.write_all(json.as_bytes()).expect("write config");

    std::env::set_var("CAPTURE_CONFIG", file.path());
    std::env::set_var("CAPTURE_FACING", "external");
    std::env::set_var("CAPTURE_MAX_RETRIES", "1");

    let cfg = CaptureConfig::load().expect("load config");
    assert_eq!(cfg.facing, Facing::External);
    assert_eq!(cfg.target, Resolution::new(1920, 1080));
    assert_eq!(cfg.max_retries, 1);
    assert_eq!(cfg.retry_delay, Duration::from_millis(50));
    assert_eq!(cfg.lock_timeout, Duration::from_millis(1000));
    assert_eq!(cfg.frame_queue_depth, 2);
    assert_eq!(cfg.fps_range, FpsRange { min: 24, max: 30 });
    assert!((cfg.size_policy.aspect_tolerance - 0.05).abs() < 1e-9);

    let session = cfg.session_config();
    assert_eq!(session.facing, Facing::External);
    assert_eq!(session.max_retries, 1);
    assert_eq!(session.frame_queue_depth, 2);

    clear_env();
}

#[test]
fn loads_toml_file_by_extension() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    let mut file = tempfile::Builder::new()
        .suffix(".toml")
        .tempfile()
        .expect("temp config");
    let toml = r#"
        facing = "back"

        [target]
        width = 640
        height = 480

        [retry]
        delay_ms = 10
    "#;
    file.write_all(toml.as_bytes()).expect("write config");
    std::env::set_var("CAPTURE_CONFIG", file.path());
    std::env::set_var("CAPTURE_TARGET_WIDTH", "800");

    let cfg = CaptureConfig::load().expect("load config");
    assert_eq!(cfg.facing, Facing::Back);
    assert_eq!(cfg.target, Resolution::new(800, 480));
    assert_eq!(cfg.retry_delay, Duration::from_millis(10));

    clear_env();
}

#[test]
fn rejects_invalid_values() {
    let _guard = ENV_LOCK.lock().unwrap_or_else(|e| e.into_inner());
    clear_env();

    std::env::set_var("CAPTURE_RETRY_DELAY_MS", "soon");
    assert!(CaptureConfig::load().is_err());
    clear_env();

    std::env::set_var("CAPTURE_FACING", "sideways");
    assert!(CaptureConfig::load().is_err());
    clear_env();

    std::env::set_var("CAPTURE_TARGET_HEIGHT", "0");
    assert!(CaptureConfig::load().is_err());
    clear_env();

    let mut file = NamedTempFile::new().expect("temp config");
    file.write_all(br#"{ "frame_queue_depth": 0 }"#)
        .expect("write config");
    std::env::set_var("CAPTURE_CONFIG", file.path());
    assert!(CaptureConfig::load().is_err());
    clear_env();

    std::env::set_var("CAPTURE_CONFIG", "/nonexistent/capture.json");
    assert!(CaptureConfig::load().is_err());
    clear_env();
}
