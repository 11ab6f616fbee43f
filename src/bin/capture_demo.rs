//! capture_demo - drive a camera session end to end
//!
//! Streams from the synthetic backend (or a V4L2 device when built with
//! `--features backend-v4l2`), counts delivered frames and stops on timeout or
//! Ctrl-C.

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use capture_session::backend::{OpenOutcome, SyntheticCamera};
use capture_session::{
    CameraSession, CaptureConfig, DeviceCatalog, Facing, FlashMode, Frame, FrameSink,
    SessionCollaborators, TorchMode,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum BackendKind {
    Synthetic,
    V4l2,
}

#[derive(Parser, Debug)]
#[command(author, version, about = "Run a capture session and report frame delivery")]
struct Args {
    /// Device backend.
    #[arg(long, value_enum, env = "CAPTURE_BACKEND", default_value = "synthetic")]
    backend: BackendKind,
    /// List devices and exit.
    #[arg(long)]
    list: bool,
    /// How long to stream, in seconds.
    #[arg(long, default_value_t = 5)]
    seconds: u64,
    /// Synthetic frame rate.
    #[arg(long, default_value_t = 30)]
    fps: u32,
    /// Facing override (front, back, external).
    #[arg(long)]
    facing: Option<Facing>,
    /// Switch the torch on after this many seconds.
    #[arg(long, value_name = "SECS")]
    torch_after: Option<u64>,
    /// Flash mode applied before start.
    #[arg(long)]
    flash_single: bool,
    /// Make the first N synthetic opens fail to exercise the retry path.
    #[arg(long, default_value_t = 0)]
    fail_opens: u32,
}

struct FrameCounter {
    frames: AtomicU64,
    bytes: AtomicU64,
}

impl FrameSink for FrameCounter {
    fn on_frame(&self, frame: &Frame<'_>) {
        self.frames.fetch_add(1, Ordering::Relaxed);
        let bytes = frame.y.data.len() + frame.u.data.len() + frame.v.data.len();
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    if args.fps == 0 {
        return Err(anyhow!("fps must be >= 1"));
    }

    let mut config = CaptureConfig::load()?;
    if let Some(facing) = args.facing {
        config.facing = facing;
    }

    let (catalog, collaborators) = match args.backend {
        BackendKind::Synthetic => {
            let camera = Arc::new(
                SyntheticCamera::with_default_devices()
                    .with_frame_interval(Duration::from_millis(1000 / args.fps as u64)),
            );
            camera.script_opens((0..args.fail_opens).map(|_| OpenOutcome::Disconnect));
            let catalog: Arc<dyn DeviceCatalog> = camera.clone();
            (catalog, SessionCollaborators::from_camera(camera))
        }
        BackendKind::V4l2 => v4l2_collaborators()?,
    };

    if args.list {
        for id in catalog.device_ids() {
            match catalog.characteristics(&id) {
                Some(c) => {
                    let sizes = c
                        .output_sizes
                        .unwrap_or_default()
                        .iter()
                        .map(|size| size.to_string())
                        .collect::<Vec<_>>()
                        .join(", ");
                    println!(
                        "{}\t{:?}\t{}°\t{}",
                        id, c.facing, c.sensor_orientation, sizes
                    );
                }
                None => println!("{}\t(no characteristics)", id),
            }
        }
        return Ok(());
    }

    let counter = Arc::new(FrameCounter {
        frames: AtomicU64::new(0),
        bytes: AtomicU64::new(0),
    });
    let session = Arc::new(CameraSession::new(config.session_config(), collaborators));
    session.set_frame_sink(Some(counter.clone()));
    if args.flash_single {
        session.set_flash_mode(FlashMode::Single);
    }
    session.start()?;

    let (tx, rx) = mpsc::channel();
    let interrupt = tx.clone();
    ctrlc::set_handler(move || {
        let _ = interrupt.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    if let Some(delay) = args.torch_after {
        let torch_session = session.clone();
        std::thread::spawn(move || {
            std::thread::sleep(Duration::from_secs(delay));
            log::info!("capture_demo: torch on");
            torch_session.set_torch_mode(TorchMode::Torch);
        });
    }

    log::info!(
        "capture_demo: streaming for {}s (Ctrl-C to stop early)",
        args.seconds
    );
    if rx.recv_timeout(Duration::from_secs(args.seconds)).is_ok() {
        log::info!("capture_demo: interrupted");
    }

    let state = session.state();
    let retries = session.retry_count();
    let failure = session.last_failure();
    let preview = session.preview_size();
    let rotation = session.frame_rotation();
    session.stop();

    println!("state before stop: {:?}", state);
    println!(
        "preview size: {}",
        preview
            .map(|size| size.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
    println!("frame rotation code: {}", rotation);
    println!("retry count: {}", retries);
    if let Some(failure) = failure {
        println!("last failure: {}", failure);
    }
    println!(
        "frames delivered: {} ({} bytes)",
        counter.frames.load(Ordering::Relaxed),
        counter.bytes.load(Ordering::Relaxed)
    );
    Ok(())
}

#[cfg(feature = "backend-v4l2")]
fn v4l2_collaborators() -> Result<(Arc<dyn DeviceCatalog>, SessionCollaborators)> {
    let camera = Arc::new(capture_session::backend::V4l2Camera::discover());
    if camera.device_ids().is_empty() {
        return Err(anyhow!("no V4L2 devices found"));
    }
    let catalog: Arc<dyn DeviceCatalog> = camera.clone();
    Ok((catalog, SessionCollaborators::from_camera(camera)))
}

#[cfg(not(feature = "backend-v4l2"))]
fn v4l2_collaborators() -> Result<(Arc<dyn DeviceCatalog>, SessionCollaborators)> {
    Err(anyhow!(
        "V4L2 backend not compiled in (rebuild with --features backend-v4l2)"
    ))
}
