use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use capture_session::backend::{OpenOutcome, SyntheticCamera};
use capture_session::{
    AeMode, CameraSession, Facing, Failure, FlashMode, Frame, FrameSink, Resolution,
    SessionCollaborators, SessionConfig, SessionState, Surface, TorchMode,
};

fn wait_for(what: &str, mut condition: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !condition() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        std::thread::sleep(Duration::from_millis(5));
    }
}

fn config() -> SessionConfig {
    SessionConfig {
        retry_delay: Duration::from_millis(20),
        lock_timeout: Duration::from_millis(500),
        ..SessionConfig::default()
    }
}

fn session_for(camera: &Arc<SyntheticCamera>) -> CameraSession {
    CameraSession::new(config(), SessionCollaborators::from_camera(camera.clone()))
}

#[test]
fn pumped_frames_flow_until_stop() {
    let camera = Arc::new(
        SyntheticCamera::with_default_devices().with_frame_interval(Duration::from_millis(5)),
    );
    let session = session_for(&camera);
    let frames = Arc::new(AtomicU64::new(0));
    let counter = frames.clone();
    let sink: Arc<dyn FrameSink> = Arc::new(move |frame: &Frame<'_>| {
        assert_eq!(frame.y.data.len(), 1280 * 720);
        assert_eq!(frame.u.data.len(), 640 * 360);
        counter.fetch_add(1, Ordering::SeqCst);
    });
    session.set_frame_sink(Some(sink));
    session.start().expect("start session");

    wait_for("frames", || frames.load(Ordering::SeqCst) >= 10);
    session.stop();

    let after_stop = frames.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(50));
    assert_eq!(frames.load(Ordering::SeqCst), after_stop);
    assert_eq!(session.frames_delivered(), after_stop);

    let stats = camera.stats();
    assert_eq!(stats.open_handles(), 0);
    assert_eq!(stats.frames_outstanding(), 0);
}

#[test]
fn preview_surface_is_a_request_target() {
    let camera = Arc::new(SyntheticCamera::with_default_devices());
    let session = session_for(&camera);
    let preview = Surface::new("display");
    session.set_preview_surface(Some(preview.clone()));
    session.start().expect("start session");
    wait_for("streaming", || session.state() == SessionState::Streaming);

    let request = camera.last_request().expect("repeating request");
    assert_eq!(request.targets.len(), 2);
    assert!(request.targets[1].same_target(&preview));
    session.stop();
}

#[test]
fn torch_request_survives_flash_changes() {
    let camera = Arc::new(SyntheticCamera::with_default_devices());
    let session = session_for(&camera);
    session.start().expect("start session");
    wait_for("streaming", || session.state() == SessionState::Streaming);

    session.set_torch_mode(TorchMode::Torch);
    session.set_flash_mode(FlashMode::Single);
    let request = camera.last_request().expect("repeating request");
    assert_eq!(request.ae_mode, Some(AeMode::On));
    assert_eq!(request.flash_mode, Some(FlashMode::Torch));

    session.set_torch_mode(TorchMode::Off);
    let request = camera.last_request().expect("repeating request");
    assert_eq!(request.ae_mode, Some(AeMode::OnAutoFlash));
    assert_eq!(request.flash_mode, Some(FlashMode::Single));
    session.stop();
}

#[test]
fn exhausted_session_can_be_started_again() {
    let camera = Arc::new(SyntheticCamera::with_default_devices());
    camera.script_opens([OpenOutcome::Disconnect; 3]);
    let session = session_for(&camera);
    session.start().expect("start session");
    wait_for("closed", || session.state() == SessionState::Closed);
    assert_eq!(session.last_failure(), Some(Failure::Disconnected));
    assert_eq!(camera.stats().open_attempts, 3);
    assert_eq!(camera.stats().open_handles(), 0);

    session.start().expect("restart session");
    wait_for("streaming", || session.state() == SessionState::Streaming);
    assert_eq!(session.retry_count(), 0);
    session.stop();
    assert_eq!(camera.stats().open_handles(), 0);
}

#[test]
fn facing_switch_reopens_other_camera() {
    let camera = Arc::new(SyntheticCamera::with_default_devices());
    let session = session_for(&camera);
    session.set_target_dimensions(1920, 1080);
    session.start().expect("start session");
    wait_for("streaming", || session.state() == SessionState::Streaming);
    assert_eq!(session.facing(), Facing::Front);
    assert_eq!(session.sensor_orientation(), 270);
    assert_eq!(session.preview_size(), Some(Resolution::new(1920, 1080)));

    session.stop();
    session.set_facing(Facing::Back);
    session.start().expect("restart session");
    wait_for("streaming", || session.state() == SessionState::Streaming);
    assert_eq!(session.sensor_orientation(), 90);
    session.stop();

    let stats = camera.stats();
    assert_eq!(stats.devices_opened, 2);
    assert_eq!(stats.open_handles(), 0);
}

#[test]
fn dropping_a_running_session_releases_everything() {
    let camera = Arc::new(
        SyntheticCamera::with_default_devices().with_frame_interval(Duration::from_millis(5)),
    );
    {
        let session = session_for(&camera);
        session.start().expect("start session");
        wait_for("streaming", || session.state() == SessionState::Streaming);
    }
    wait_for("handles closed", || camera.stats().open_handles() == 0);
    assert_eq!(camera.stats().frames_outstanding(), 0);
}
