use std::{f32::consts::PI, sync::Arc, time::Duration};

use glam::{EulerRot, Quat, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::{
    backend::{
        compositor::{InputMethod, OverlayError, OverlayHandle, OverlayTransform, TextureRef},
        input::{InteractTarget, TrackedDeviceRole},
        overlay::{
            anchored_transform, is_streaming, overlay_key, push_overlay, push_texture,
            CompanionID, Lifecycle, OverlayID, OverlayState, OverlayUpload, Pose,
        },
    },
    config::{CompanionConfig, GeneralConfig},
    state::AppState,
};

use super::{
    animation::AnimationType,
    cursor::Cursor,
    events::{CompanionEvent, EventQueue, OverlayEvent},
    interactions::CompanionInteraction,
};

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, EnumString, AsRefStr,
)]
pub enum CompanionMode {
    /// Faces away from the parent, for a back cover.
    #[default]
    Backside,
    /// Interactive UI panel driven by controller aim.
    VRInterface,
    /// Invisible gaze detector that makes a dodging parent move aside.
    DodgeOnGaze,
}

/// How an interface companion hangs off its parent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, EnumString, AsRefStr,
)]
pub enum InterfaceAttachMode {
    #[default]
    Free,
    PivotTop,
    PivotRight,
    PivotBottom,
    PivotLeft,
}

/// Hinge on one edge of the parent, in the parent's space.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Pivot {
    pub pose: Pose,
    active: bool,
}

impl Pivot {
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Values last applied, for change detection.
#[derive(Debug, Clone, Copy)]
struct CompanionApplied {
    mode: CompanionMode,
    attach_mode: InterfaceAttachMode,
    texture: Option<TextureRef>,
    uv_offset: Vec4,
    offset: Vec3,
    rotation: Quat,
    relative_alpha: f32,
    relative_scale: f32,
}

pub(crate) fn euler_degrees(angles: [f32; 3]) -> Quat {
    Quat::from_euler(
        EulerRot::YXZ,
        angles[1].to_radians(),
        angles[0].to_radians(),
        angles[2].to_radians(),
    )
}

/// An overlay that follows a parent overlay around.
///
/// Companions observe their parent through its [`OverlayEvent`] queue and
/// never own it; the container hands the parent in on every call.
pub struct CompanionOverlay {
    pub id: CompanionID,
    pub parent: OverlayID,
    pub name: Arc<str>,
    pub key: Arc<str>,

    pub texture: Option<TextureRef>,
    pub auto_update_textures: bool,
    pub input_method: InputMethod,

    pub mode: CompanionMode,
    pub attach_mode: InterfaceAttachMode,
    pub relative_alpha: f32,
    pub relative_scale: f32,
    /// Position relative to the parent, or to the pivot edge.
    pub offset: Vec3,
    /// Free interface rotation relative to the parent.
    pub rotation: Quat,
    pub pivot_rotation: Quat,

    pub interaction: CompanionInteraction,
    pub events: EventQueue<CompanionEvent>,

    lifecycle: Lifecycle,
    applied: CompanionApplied,
    object: Pose,
    pivot: Option<Pivot>,
    pivot_offset: Vec3,
    alpha: f32,
    scale: f32,
    needs_attach: bool,
    force_update: bool,
    just_updated: bool,
}

impl CompanionOverlay {
    pub fn new(name: &str, parent: OverlayID, mode: CompanionMode) -> Self {
        Self {
            id: CompanionID::default(),
            parent,
            name: name.into(),
            key: overlay_key(name),
            texture: None,
            auto_update_textures: true,
            input_method: InputMethod::None,
            mode,
            attach_mode: InterfaceAttachMode::Free,
            relative_alpha: 1.0,
            relative_scale: 1.0,
            offset: Vec3::ZERO,
            rotation: Quat::IDENTITY,
            pivot_rotation: Quat::IDENTITY,
            interaction: CompanionInteraction::new(),
            events: EventQueue::new(),
            lifecycle: Lifecycle::Disabled,
            applied: CompanionApplied {
                mode,
                attach_mode: InterfaceAttachMode::Free,
                texture: None,
                uv_offset: Vec4::new(0.0, 0.0, 1.0, 1.0),
                offset: Vec3::ZERO,
                rotation: Quat::IDENTITY,
                relative_alpha: 1.0,
                relative_scale: 1.0,
            },
            object: Pose::IDENTITY,
            pivot: None,
            pivot_offset: Vec3::ZERO,
            alpha: 1.0,
            scale: 1.0,
            needs_attach: false,
            force_update: false,
            just_updated: false,
        }
    }

    pub fn from_config(parent: OverlayID, config: &CompanionConfig, general: &GeneralConfig) -> Self {
        let mut companion = Self::new(&config.name, parent, config.mode);
        companion.attach_mode = config.attach_mode;
        companion.relative_alpha = config.relative_alpha;
        companion.relative_scale = config.relative_scale;
        companion.offset = Vec3::from(config.offset);
        companion.rotation = euler_degrees(config.rotation);
        companion.pivot_rotation = euler_degrees(config.pivot_rotation);
        companion.input_method = config.input_method;

        let interaction = &mut companion.interaction;
        interaction.canvas = config.canvas.map(Vec2::from);
        interaction.aim_limit = config.aim_limit;
        if config.cursor {
            interaction.cursor = Some(Cursor::new(
                general.cursor_fade_step,
                Duration::from_millis(u64::from(general.cursor_fade_interval_ms)),
            ));
        }
        companion
    }

    pub fn lifecycle(&self) -> Lifecycle {
        self.lifecycle
    }

    pub fn is_enabled(&self) -> bool {
        matches!(self.lifecycle, Lifecycle::Enabled(_))
    }

    pub fn handle(&self) -> Option<OverlayHandle> {
        match self.lifecycle {
            Lifecycle::Enabled(handle) => Some(handle),
            _ => None,
        }
    }

    /// Local pose under the parent, or under the pivot while one is active.
    pub fn object(&self) -> Pose {
        self.object
    }

    pub fn pivot(&self) -> Option<&Pivot> {
        self.pivot.as_ref()
    }

    pub fn current_alpha(&self) -> f32 {
        self.alpha * self.relative_alpha
    }

    pub fn current_width(&self) -> f32 {
        self.scale * self.relative_scale
    }

    pub fn current_height(&self) -> f32 {
        self.current_width() * self.texture.map_or(1.0, |t| t.aspect())
    }

    pub fn request_update(&mut self) {
        self.force_update = true;
    }

    /// A dodge detector only makes sense under a parent that dodges.
    pub fn follows(&self, parent: &OverlayState) -> bool {
        self.mode != CompanionMode::DodgeOnGaze
            || parent.animate_on_gaze == AnimationType::DodgeGaze
    }

    pub fn enable(&mut self, app: &mut AppState) -> Result<(), OverlayError> {
        match self.lifecycle {
            Lifecycle::Enabled(_) => return Ok(()),
            Lifecycle::Failed(e) => return Err(e),
            Lifecycle::Disabled => {}
        }

        let handle = match app.compositor.create_overlay(&self.key, &self.name) {
            Ok(handle) => handle,
            Err(e) => {
                log::error!("{}: Failed to create overlay: {}", self.name, e);
                self.lifecycle = Lifecycle::Failed(e);
                return Err(e);
            }
        };
        log::debug!("{}: Created companion overlay {:?}", self.name, handle);

        self.applied.mode = self.mode;
        self.applied.relative_alpha = self.relative_alpha;
        self.applied.relative_scale = self.relative_scale;
        self.set_eligibility(app);

        self.lifecycle = Lifecycle::Enabled(handle);
        self.needs_attach = true;
        self.force_update = true;
        Ok(())
    }

    pub fn disable(&mut self, app: &mut AppState) {
        let target = InteractTarget::Companion(self.id);
        app.input_state.eligibility.set_gaze(target, false);
        app.input_state.eligibility.set_aim(target, false);

        let Lifecycle::Enabled(handle) = self.lifecycle else {
            return;
        };
        if let Err(e) = app.compositor.destroy_overlay(handle) {
            log::error!("{}: Failed to destroy overlay: {}", self.name, e);
        }
        log::debug!("{}: Destroyed companion overlay {:?}", self.name, handle);

        self.interaction.unaim();
        self.interaction.trigger_up();
        self.lifecycle = Lifecycle::Disabled;
    }

    fn set_eligibility(&self, app: &mut AppState) {
        let target = InteractTarget::Companion(self.id);
        let eligibility = &mut app.input_state.eligibility;
        eligibility.set_aim(target, self.mode == CompanionMode::VRInterface);
        eligibility.set_gaze(target, self.mode == CompanionMode::DodgeOnGaze);
    }

    /// Handle one notification from the parent, in the order it was fired.
    pub fn on_parent_event(&mut self, event: OverlayEvent, parent: &OverlayState, app: &mut AppState) {
        match event {
            OverlayEvent::Enabled | OverlayEvent::AnimationChanged(_) => {
                if !parent.is_enabled() {
                    return;
                }
                if self.follows(parent) {
                    if let Err(e) = self.enable(app) {
                        log::warn!(
                            "{}: Companion of {} stays hidden: {}",
                            self.name,
                            parent.name,
                            e
                        );
                    }
                } else {
                    self.disable(app);
                }
            }
            OverlayEvent::Disabled => self.disable(app),
            _ if !self.is_enabled() => {}
            OverlayEvent::AttachmentChanged => self.needs_attach = true,
            OverlayEvent::AlphaChanged(alpha) => {
                self.alpha = alpha;
                self.force_update = true;
            }
            OverlayEvent::ScaleChanged(scale) => {
                self.scale = scale;
                self.refresh_pivot(parent);
                self.force_update = true;
            }
            OverlayEvent::AspectChanged(_) => {
                self.refresh_pivot(parent);
                self.force_update = true;
            }
            OverlayEvent::PositionChanged(_) | OverlayEvent::RotationChanged(_) => {
                self.force_update = true;
            }
            OverlayEvent::AnchorChanged(_) | OverlayEvent::AnchorRotationChanged(_) => {}
        }
    }

    /// Run change detection and push at most once. Returns true if a full push happened.
    pub fn update(&mut self, parent: &OverlayState, app: &mut AppState) -> bool {
        if !self.is_enabled() {
            return false;
        }

        if self.needs_attach {
            self.attach(parent);
        }
        self.check_mode_changed(parent, app);
        self.check_texture_changed(parent);
        self.check_attach_mode_changed(parent);
        self.check_rotation_changed();
        self.check_position_changed();
        self.check_relative_alpha(app);
        self.check_relative_scale(app);

        if self.force_update {
            self.force_update = false;
            self.just_updated = true;
            self.push(parent, app);
            true
        } else {
            self.just_updated = false;
            self.update_texture(app);
            false
        }
    }

    /// Re-derive the local pose from the parent's current state.
    fn attach(&mut self, parent: &OverlayState) {
        self.needs_attach = false;
        self.applied.mode = self.mode;
        self.applied.attach_mode = self.attach_mode;
        self.applied.offset = self.offset;
        self.applied.rotation = self.rotation;
        self.alpha = parent.current_alpha();
        self.scale = parent.current_scale();

        if self.uses_pivot() {
            let pivot = self.pivot.get_or_insert_with(Pivot::default);
            pivot.active = true;
            pivot.pose.rotation = self.pivot_rotation;
        } else if let Some(pivot) = self.pivot.as_mut() {
            pivot.active = false;
        }
        self.refresh_pivot(parent);

        log::debug!(
            "{}: attached to {} as {:?} ({:?})",
            self.name,
            parent.name,
            self.mode,
            self.attach_mode
        );
        self.force_update = true;
    }

    fn uses_pivot(&self) -> bool {
        self.mode == CompanionMode::VRInterface && self.attach_mode != InterfaceAttachMode::Free
    }

    /// Move the pivot to the parent's edge and this companion's edge onto it.
    fn refresh_pivot(&mut self, parent: &OverlayState) {
        let (pw, ph) = (parent.current_width(), parent.current_height());
        let (w, h) = (self.current_width(), self.current_height());

        let (pivot_position, own) = match self.attach_mode {
            InterfaceAttachMode::Free => (Vec3::ZERO, Vec3::ZERO),
            InterfaceAttachMode::PivotTop => {
                (Vec3::new(0.0, -ph / 2.0, 0.0), Vec3::new(0.0, -h / 2.0, 0.0))
            }
            InterfaceAttachMode::PivotRight => {
                (Vec3::new(pw / 2.0, 0.0, 0.0), Vec3::new(w / 2.0, 0.0, 0.0))
            }
            InterfaceAttachMode::PivotBottom => {
                (Vec3::new(0.0, ph / 2.0, 0.0), Vec3::new(0.0, h / 2.0, 0.0))
            }
            InterfaceAttachMode::PivotLeft => {
                (Vec3::new(-pw / 2.0, 0.0, 0.0), Vec3::new(-w / 2.0, 0.0, 0.0))
            }
        };
        self.pivot_offset = own;
        if let Some(pivot) = self.pivot.as_mut() {
            pivot.pose.position = pivot_position;
        }
        self.object = self.local_pose();
    }

    fn local_pose(&self) -> Pose {
        match self.mode {
            CompanionMode::Backside => Pose::new(Vec3::ZERO, Quat::from_rotation_y(PI)),
            CompanionMode::DodgeOnGaze => Pose::IDENTITY,
            CompanionMode::VRInterface if self.uses_pivot() => {
                Pose::new(self.offset + self.pivot_offset, Quat::IDENTITY)
            }
            CompanionMode::VRInterface => Pose::new(self.offset, self.rotation),
        }
    }

    fn check_mode_changed(&mut self, parent: &OverlayState, app: &mut AppState) {
        if self.mode == self.applied.mode {
            return;
        }
        self.set_eligibility(app);
        if self.mode != CompanionMode::VRInterface {
            self.interaction.unaim();
            self.interaction.trigger_up();
        }
        self.attach(parent);
    }

    fn check_texture_changed(&mut self, parent: &OverlayState) {
        if self.texture == self.applied.texture && parent.uv_offset == self.applied.uv_offset {
            return;
        }
        self.applied.texture = self.texture;
        self.applied.uv_offset = parent.uv_offset;
        self.refresh_pivot(parent);
        self.force_update = true;
    }

    fn check_attach_mode_changed(&mut self, parent: &OverlayState) {
        if self.attach_mode == self.applied.attach_mode {
            return;
        }
        self.attach(parent);
    }

    fn check_rotation_changed(&mut self) {
        if self.rotation == self.applied.rotation {
            return;
        }
        self.applied.rotation = self.rotation;
        self.object = self.local_pose();
        self.force_update = true;
    }

    fn check_position_changed(&mut self) {
        if self.offset == self.applied.offset {
            return;
        }
        self.applied.offset = self.offset;
        self.object = self.local_pose();
        self.force_update = true;
    }

    fn check_relative_alpha(&mut self, app: &mut AppState) {
        if self.relative_alpha == self.applied.relative_alpha {
            return;
        }
        self.applied.relative_alpha = self.relative_alpha;
        let Lifecycle::Enabled(handle) = self.lifecycle else {
            return;
        };
        if let Err(e) = app.compositor.set_alpha(handle, self.current_alpha()) {
            log::error!("{}: Failed to set overlay alpha: {}", self.name, e);
        }
    }

    fn check_relative_scale(&mut self, app: &mut AppState) {
        if self.relative_scale == self.applied.relative_scale {
            return;
        }
        self.applied.relative_scale = self.relative_scale;
        let Lifecycle::Enabled(handle) = self.lifecycle else {
            return;
        };
        if let Err(e) = app.compositor.set_width(handle, self.current_width()) {
            log::error!("{}: Failed to set overlay width: {}", self.name, e);
        }
    }

    pub fn overlay_transform(&self, parent: &OverlayState, app: &AppState) -> OverlayTransform {
        // detectors stay where the parent was, not where it dodged to
        let reference = if self.mode == CompanionMode::DodgeOnGaze {
            parent.undodged_reference()
        } else {
            parent.reference
        };
        let mut local = parent.anchor_local(reference);
        if let Some(pivot) = self.pivot.filter(|p| p.active) {
            local = local * pivot.pose.to_affine();
        }
        local = local * self.object.to_affine();
        anchored_transform(app, parent.current_device(), parent.anchor_index(), local)
    }

    fn push(&mut self, parent: &OverlayState, app: &mut AppState) {
        let transform = self.overlay_transform(parent, app);
        let upload = OverlayUpload {
            name: &self.name,
            key: &self.key,
            texture: self.texture.as_ref(),
            color: Vec3::ONE,
            alpha: self.current_alpha(),
            width: self.current_width(),
            curve_range: None,
            uv_offset: parent.uv_offset,
            transform,
            input_method: self.input_method,
        };
        let Lifecycle::Enabled(handle) = &mut self.lifecycle else {
            log::debug!("{}: No overlay handle", self.name);
            return;
        };
        push_overlay(app.compositor.as_mut(), handle, &upload);
    }

    fn update_texture(&mut self, app: &mut AppState) {
        let Some(texture) = self.texture else {
            return;
        };
        if self.just_updated || !is_streaming(&texture, self.auto_update_textures) {
            return;
        }
        let Lifecycle::Enabled(handle) = self.lifecycle else {
            return;
        };
        push_texture(app.compositor.as_mut(), handle, &self.name, &texture);
    }

    /// Forward this frame's gaze raycast result to whoever listens.
    pub fn update_gaze(&mut self, hit: bool) {
        self.events.send(CompanionEvent::Gazed(hit));
    }

    /// A controller ray hits this companion at `uv`.
    pub fn aim(&mut self, uv: Vec2, device: TrackedDeviceRole, app: &mut AppState) {
        if self.mode != CompanionMode::VRInterface {
            return;
        }
        self.interaction.aim(uv, device, app);
    }

    pub fn unaim(&mut self) {
        self.interaction.unaim();
    }

    pub fn trigger_down(&mut self) {
        if self.mode == CompanionMode::VRInterface {
            self.interaction.trigger_down();
        }
    }

    pub fn trigger_up(&mut self) {
        if self.mode == CompanionMode::VRInterface {
            self.interaction.trigger_up();
        }
    }
}
