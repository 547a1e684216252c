use std::{collections::HashSet, path::Path, sync::Arc};

use anyhow::bail;
use config::{Config, File, FileFormat};
use log::error;
use serde::{Deserialize, Serialize};

use crate::{
    backend::{
        compositor::{InputMethod, TextureKind, TextureRef, TrackingUniverse},
        input::Haptics,
    },
    config_io,
    overlays::{
        animation::{AnimationType, StepMode},
        attachment::{AttachmentDevice, AttachmentPoint},
        companion::{CompanionMode, InterfaceAttachMode},
        interactions::AimLimit,
    },
};

const DEFAULT_CONFIG: &str = include_str!("res/config.yaml");

fn def_true() -> bool {
    true
}

fn def_false() -> bool {
    false
}

fn def_one() -> f32 {
    1.0
}

fn def_point1() -> f32 {
    0.1
}

fn def_point01() -> f32 {
    0.01
}

fn def_cursor_fade_interval_ms() -> u32 {
    25
}

fn def_headless_fps() -> u32 {
    90
}

fn def_aim_haptics() -> HapticsConfig {
    HapticsConfig {
        intensity: 0.1,
        duration: 0.01,
        frequency: 5.0,
    }
}

fn def_widget_haptics() -> HapticsConfig {
    HapticsConfig {
        intensity: 0.05,
        duration: 0.005,
        frequency: 5.0,
    }
}

fn def_overlays() -> Vec<OverlayConfig> {
    vec![]
}

fn def_companions() -> Vec<CompanionConfig> {
    vec![]
}

fn def_zero3() -> [f32; 3] {
    [0.0; 3]
}

fn def_zero2() -> [f32; 2] {
    [0.0; 2]
}

fn def_uv_offset() -> [f32; 4] {
    [0.0, 0.0, 1.0, 1.0]
}

fn def_curved_range() -> [f32; 2] {
    [1.0, 2.0]
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct HapticsConfig {
    pub intensity: f32,
    pub duration: f32,
    pub frequency: f32,
}

impl From<HapticsConfig> for Haptics {
    fn from(c: HapticsConfig) -> Self {
        Haptics {
            intensity: c.intensity,
            duration: c.duration,
            frequency: c.frequency,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize, Serialize)]
pub struct TextureConfig {
    pub width: u32,
    pub height: u32,
    #[serde(default)]
    pub kind: TextureKind,
}

impl TextureConfig {
    pub fn texture_ref(&self, id: u64) -> TextureRef {
        TextureRef {
            id,
            width: self.width,
            height: self.height,
            kind: self.kind,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverlayConfig {
    pub name: Arc<str>,

    #[serde(default)]
    pub texture: Option<TextureConfig>,

    #[serde(default = "def_true")]
    pub enabled: bool,

    #[serde(default = "def_one")]
    pub alpha: f32,

    #[serde(default = "def_one")]
    pub alpha_gazed: f32,

    #[serde(default = "def_point01")]
    pub alpha_speed: f32,

    #[serde(default = "def_one")]
    pub scale: f32,

    #[serde(default = "def_one")]
    pub scale_gazed: f32,

    #[serde(default = "def_point1")]
    pub scale_speed: f32,

    #[serde(default = "def_false")]
    pub high_quality: bool,

    #[serde(default = "def_false")]
    pub antialias: bool,

    #[serde(default = "def_false")]
    pub curved: bool,

    #[serde(default = "def_curved_range")]
    pub curved_range: [f32; 2],

    #[serde(default = "def_uv_offset")]
    pub uv_offset: [f32; 4],

    #[serde(default)]
    pub input_method: InputMethod,

    #[serde(default)]
    pub animate_on_gaze: AnimationType,

    #[serde(default = "def_zero2")]
    pub dodge_offset: [f32; 2],

    #[serde(default = "def_point1")]
    pub dodge_speed: f32,

    #[serde(default)]
    pub anchor_device: AttachmentDevice,

    #[serde(default)]
    pub anchor_point: AttachmentPoint,

    #[serde(default = "def_zero3")]
    pub anchor_offset: [f32; 3],

    /// Euler angles in degrees, applied YXZ.
    #[serde(default = "def_zero3")]
    pub rotation: [f32; 3],

    #[serde(default = "def_companions")]
    pub companions: Vec<CompanionConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CompanionConfig {
    pub name: Arc<str>,

    #[serde(default)]
    pub texture: Option<TextureConfig>,

    #[serde(default)]
    pub mode: CompanionMode,

    #[serde(default)]
    pub attach_mode: InterfaceAttachMode,

    #[serde(default = "def_zero3")]
    pub offset: [f32; 3],

    /// Euler angles in degrees, applied YXZ.
    #[serde(default = "def_zero3")]
    pub rotation: [f32; 3],

    /// Euler angles in degrees for the hinge when pivoting on an edge.
    #[serde(default = "def_zero3")]
    pub pivot_rotation: [f32; 3],

    #[serde(default = "def_one")]
    pub relative_alpha: f32,

    #[serde(default = "def_one")]
    pub relative_scale: f32,

    #[serde(default)]
    pub input_method: InputMethod,

    /// Size of the UI canvas in canvas units.
    #[serde(default)]
    pub canvas: Option<[f32; 2]>,

    #[serde(default)]
    pub aim_limit: Option<AimLimit>,

    #[serde(default = "def_true")]
    pub cursor: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GeneralConfig {
    #[serde(default = "def_true")]
    pub haptics_enabled: bool,

    #[serde(default = "def_aim_haptics")]
    pub aim_haptics: HapticsConfig,

    #[serde(default = "def_widget_haptics")]
    pub widget_haptics: HapticsConfig,

    #[serde(default = "def_point1")]
    pub cursor_fade_step: f32,

    #[serde(default = "def_cursor_fade_interval_ms")]
    pub cursor_fade_interval_ms: u32,

    #[serde(default)]
    pub animation_step_mode: StepMode,

    #[serde(default)]
    pub tracking_universe: TrackingUniverse,

    #[serde(default = "def_headless_fps")]
    pub headless_fps: u32,

    #[serde(default = "def_overlays")]
    pub overlays: Vec<OverlayConfig>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        GeneralConfig {
            haptics_enabled: def_true(),
            aim_haptics: def_aim_haptics(),
            widget_haptics: def_widget_haptics(),
            cursor_fade_step: def_point1(),
            cursor_fade_interval_ms: def_cursor_fade_interval_ms(),
            animation_step_mode: StepMode::default(),
            tracking_universe: TrackingUniverse::default(),
            headless_fps: def_headless_fps(),
            overlays: def_overlays(),
        }
    }
}

impl GeneralConfig {
    fn sanitize_range(name: &str, val: f32, from: f32, to: f32) -> anyhow::Result<()> {
        if !val.is_finite() || val < from || val > to {
            bail!("{} needs to be between {} and {}, got {}", name, from, to, val);
        }
        Ok(())
    }

    pub fn post_load(&self) -> anyhow::Result<()> {
        Self::sanitize_range("cursor_fade_step", self.cursor_fade_step, 0.001, 1.0)?;
        if self.cursor_fade_interval_ms == 0 {
            bail!("cursor_fade_interval_ms must be positive");
        }
        if self.headless_fps == 0 {
            bail!("headless_fps must be positive");
        }

        let mut names = HashSet::new();
        for o in &self.overlays {
            if !names.insert(o.name.clone()) {
                bail!("Duplicate overlay name: {}", o.name);
            }
            Self::sanitize_range(&format!("{}.alpha", o.name), o.alpha, 0.0, 1.0)?;
            Self::sanitize_range(&format!("{}.alpha_gazed", o.name), o.alpha_gazed, 0.0, 1.0)?;
            Self::sanitize_range(&format!("{}.alpha_speed", o.name), o.alpha_speed, 0.0, 1.0)?;
            Self::sanitize_range(&format!("{}.scale", o.name), o.scale, 0.001, 100.0)?;
            Self::sanitize_range(&format!("{}.scale_gazed", o.name), o.scale_gazed, 0.001, 100.0)?;
            Self::sanitize_range(&format!("{}.scale_speed", o.name), o.scale_speed, 0.0, 100.0)?;
            Self::sanitize_range(&format!("{}.dodge_speed", o.name), o.dodge_speed, 0.0, 1.0)?;

            for c in &o.companions {
                if !names.insert(c.name.clone()) {
                    bail!("Duplicate overlay name: {}", c.name);
                }
                Self::sanitize_range(&format!("{}.relative_alpha", c.name), c.relative_alpha, 0.0, 1.0)?;
                Self::sanitize_range(&format!("{}.relative_scale", c.name), c.relative_scale, 0.001, 100.0)?;
                if c.mode == CompanionMode::VRInterface && c.canvas.is_none() {
                    log::warn!("{}: interface companion has no canvas, it will not be interactive", c.name);
                }
            }
        }
        Ok(())
    }
}

/// Built-in defaults, then `<root>/config.yaml`, then `<root>/conf.d/*.yaml` in name order.
pub fn load_general(config_root: &Path) -> anyhow::Result<GeneralConfig> {
    let mut settings_builder =
        Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Yaml));

    let path_conf_d = config_io::get_conf_d_path(config_root);

    let mut base_conf = config_root.to_path_buf();
    base_conf.push("config.yaml");
    if base_conf.exists() {
        log::info!("Loading config file: {}", base_conf.to_string_lossy());
        settings_builder = settings_builder.add_source(File::from(base_conf));
    }

    if let Ok(paths_unsorted) = std::fs::read_dir(path_conf_d) {
        let mut paths: Vec<_> = paths_unsorted
            .filter_map(|r| match r {
                Ok(entry) => Some(entry.path()),
                Err(e) => {
                    error!("Failed to read conf.d directory: {}", e);
                    None
                }
            })
            .filter(|p| {
                p.extension()
                    .is_some_and(|ext| ext == "yaml" || ext == "yml")
            })
            .collect();
        // Sort paths alphabetically
        paths.sort();
        for path in paths {
            log::info!("Loading config file: {}", path.to_string_lossy());
            settings_builder = settings_builder.add_source(File::from(path));
        }
    }

    let config = settings_builder
        .build()?
        .try_deserialize::<GeneralConfig>()?;
    config.post_load()?;
    Ok(config)
}

/// Parse a standalone YAML document, with the same checks as [`load_general`].
pub fn parse_general(yaml: &str) -> anyhow::Result<GeneralConfig> {
    let config: GeneralConfig = serde_yaml::from_str(yaml)?;
    config.post_load()?;
    Ok(config)
}
