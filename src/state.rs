use std::{
    path::{Path, PathBuf},
    time::Instant,
};

use glam::Affine3A;

use crate::{
    backend::{compositor::Compositor, input::InputState, overlay::HighQualitySlot},
    config::{self, GeneralConfig},
};

pub struct AppState {
    pub session: AppSession,
    pub compositor: Box<dyn Compositor>,
    pub input_state: InputState,
    pub high_quality: HighQualitySlot,
    pub frame: FrameInfo,
}

impl AppState {
    pub fn new(compositor: Box<dyn Compositor>, session: AppSession) -> Self {
        AppState {
            session,
            compositor,
            input_state: InputState::new(),
            high_quality: HighQualitySlot::default(),
            frame: FrameInfo::default(),
        }
    }

    /// Advance the frame clock and roll pointer state over.
    pub fn begin_frame(&mut self) {
        let now = Instant::now();
        self.frame.delta = now.duration_since(self.frame.started).as_secs_f32();
        self.frame.started = now;
        self.input_state.pre_update();
    }
}

pub struct AppSession {
    pub config_root_path: PathBuf,
    pub config: GeneralConfig,
}

impl AppSession {
    pub fn load(config_root_path: &Path) -> anyhow::Result<Self> {
        log::info!("Config root path: {}", config_root_path.to_string_lossy());
        let config = config::load_general(config_root_path)?;
        Ok(AppSession {
            config_root_path: config_root_path.to_path_buf(),
            config,
        })
    }

    pub fn with_config(config: GeneralConfig) -> Self {
        AppSession {
            config_root_path: PathBuf::new(),
            config,
        }
    }
}

pub struct FrameInfo {
    pub started: Instant,
    /// Seconds since the previous frame.
    pub delta: f32,
    /// Where the rendering camera sits in tracking space, while rendering.
    pub camera_origin: Option<Affine3A>,
}

impl Default for FrameInfo {
    fn default() -> Self {
        Self {
            started: Instant::now(),
            delta: 0.0,
            camera_origin: None,
        }
    }
}
