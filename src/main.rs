use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use clap::Parser;
use glam::Vec2;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use wlx_anchor::{
    backend::{
        BackendError,
        common::{AimSample, FrameInput, FrameReport, OverlayContainer},
        headless::HeadlessCompositor,
        input::{InteractTarget, TrackedDeviceRole},
    },
    config_io,
    state::{AppSession, AppState},
};

/// Overlay attachment and companion UI, driven against a headless compositor
#[derive(Default, Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Config directory to use instead of $XDG_CONFIG_HOME/wlxanchor
    #[arg(short, long, value_name = "DIR")]
    config: Option<PathBuf>,

    /// Number of frames to run before exiting
    #[arg(short, long, default_value_t = 600)]
    frames: u64,

    /// Path to write logs to
    #[arg(short, long, value_name = "FILE_PATH")]
    log_to: Option<String>,
}

fn main() -> anyhow::Result<()> {
    let mut args = Args::parse();
    logging_init(&mut args);

    log::info!(
        "Welcome to {} version {}!",
        env!("CARGO_PKG_NAME"),
        env!("ANCHOR_BUILD"),
    );

    let running = Arc::new(AtomicBool::new(true));
    let _ = ctrlc::set_handler({
        let running = running.clone();
        move || {
            running.store(false, Ordering::Relaxed);
        }
    });

    match headless_run(running, &args) {
        Ok(()) => Ok(()),
        Err(BackendError::Shutdown) => {
            log::info!("Interrupted, shutting down.");
            Ok(())
        }
        Err(BackendError::Fatal(e)) => {
            log::error!("{:?}", e);
            Err(e)
        }
    }
}

fn headless_run(running: Arc<AtomicBool>, args: &Args) -> Result<(), BackendError> {
    let config_root = args
        .config
        .clone()
        .unwrap_or_else(|| config_io::CONFIG_ROOT_PATH.clone());
    let config_root = config_io::ensure_config_root(&config_root);
    let session = AppSession::load(&config_root)?;

    let frame_time = Duration::from_secs_f32(1.0 / session.config.headless_fps as f32);
    let compositor = HeadlessCompositor::new();
    let mut app = AppState::new(Box::new(compositor.clone()), session);
    let mut overlays = OverlayContainer::new(&mut app)?;

    let devices = &mut app.input_state.devices;
    devices.set_controller_index(TrackedDeviceRole::LeftHand, Some(1));
    devices.set_controller_index(TrackedDeviceRole::RightHand, Some(2));

    let mut totals = FrameReport::default();
    let mut frame = 0;
    while running.load(Ordering::Relaxed) && frame < args.frames {
        app.begin_frame();

        let (input, click) = scripted_input(&overlays, frame);
        if let Some(pointer) = app.input_state.pointer_mut(TrackedDeviceRole::RightHand) {
            pointer.now.click = click;
        }

        let report = overlays.frame(&mut app, &input);
        totals.overlay_pushes += report.overlay_pushes;
        totals.companion_pushes += report.companion_pushes;

        while let Some(pulse) = app.input_state.haptics.pop_front() {
            log::trace!("Haptic pulse on {:?}: {:?}", pulse.device, pulse.haptics);
        }

        frame += 1;
        std::thread::sleep(frame_time);
    }

    overlays.disable_all(&mut app);

    log::info!(
        "Ran {} frames: {} overlay pushes, {} companion pushes",
        frame,
        totals.overlay_pushes,
        totals.companion_pushes
    );
    for (call, count) in compositor.call_counts() {
        log::info!("  {}: {}", call, count);
    }

    if frame < args.frames {
        return Err(BackendError::Shutdown);
    }
    Ok(())
}

/// Alternate every two seconds between nobody looking and the user looking
/// at everything while poking the first interface companion.
fn scripted_input(overlays: &OverlayContainer, frame: u64) -> (FrameInput, bool) {
    let mut input = FrameInput::default();
    let active = (frame / 180) % 2 == 1;
    if !active {
        return (input, false);
    }

    input.gaze.extend(
        overlays
            .values()
            .map(|o| (InteractTarget::Overlay(o.id), true)),
    );
    input.gaze.extend(
        overlays
            .companions()
            .map(|c| (InteractTarget::Companion(c.id), true)),
    );

    if let Some(target) = overlays
        .companions()
        .find(|c| c.interaction.canvas.is_some())
        .map(|c| InteractTarget::Companion(c.id))
    {
        input.aim.push(AimSample {
            target,
            device: TrackedDeviceRole::RightHand,
            uv: Vec2::splat(0.5),
        });
    }

    (input, frame % 180 >= 90)
}

fn logging_init(args: &mut Args) {
    let log_file_path = args
        .log_to
        .take()
        .or_else(|| std::env::var("WLX_ANCHOR_LOGFILE").ok());

    let file_writer = log_file_path.and_then(|path| {
        match std::fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)
        {
            Ok(file) => {
                println!("Logging to {}", &path);
                Some(file)
            }
            Err(e) => {
                println!("Failed to open log file (path: {:?}): {}", e, path);
                None
            }
        }
    });

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .pretty()
                .with_writer(std::io::stderr),
        )
        .with(
            /* read RUST_LOG env var */
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        );

    if let Some(writer) = file_writer {
        registry
            .with(
                tracing_subscriber::fmt::layer()
                    .with_file(true)
                    .with_line_number(true)
                    .with_writer(writer)
                    .with_ansi(false),
            )
            .init();
    } else {
        registry.init();
    }

    log_panics::init();
}
