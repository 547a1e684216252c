use std::sync::Arc;

use glam::{Affine3A, Quat, Vec2, Vec3, Vec4};
use slotmap::new_key_type;
use smallvec::SmallVec;
use uuid::Uuid;

use crate::{
    overlays::{
        animation::AnimationType,
        attachment::{Attachment, AttachmentDevice, AttachmentPoint},
        dodge::GazeDodge,
        events::{EventQueue, OverlayEvent},
    },
    state::AppState,
};

use super::{
    compositor::{
        Compositor, InputMethod, OverlayError, OverlayFlag, OverlayHandle, OverlayTransform,
        TextureBounds, TextureKind, TextureRef, TrackedDeviceIndex,
    },
    input::{InteractTarget, TrackedDeviceRole},
};

new_key_type! {
    pub struct OverlayID;
    pub struct CompanionID;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for Pose {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Pose {
    pub const IDENTITY: Pose = Pose {
        position: Vec3::ZERO,
        rotation: Quat::IDENTITY,
    };

    pub const fn new(position: Vec3, rotation: Quat) -> Self {
        Self { position, rotation }
    }

    pub fn to_affine(&self) -> Affine3A {
        Affine3A::from_rotation_translation(self.rotation, self.position)
    }

    pub fn right(&self) -> Vec3 {
        self.rotation * Vec3::X
    }

    pub fn up(&self) -> Vec3 {
        self.rotation * Vec3::Y
    }
}

/// `wlx-anchor:<name>.<uuid>`; unique per process run with overwhelming probability.
pub fn overlay_key(name: &str) -> Arc<str> {
    format!("wlx-anchor:{}.{}", name, Uuid::new_v4()).into()
}

/// The compositor renders at most one overlay in high quality.
///
/// Claiming while another overlay holds the slot revokes the holder; it notices
/// on its own next frame via [`HighQualitySlot::take_revoked`].
#[derive(Debug, Default)]
pub struct HighQualitySlot {
    holder: Option<(OverlayID, Arc<str>)>,
    revoked: SmallVec<[OverlayID; 2]>,
}

impl HighQualitySlot {
    pub fn holder(&self) -> Option<OverlayID> {
        self.holder.as_ref().map(|(id, _)| *id)
    }

    pub fn claim(&mut self, id: OverlayID, name: &Arc<str>) {
        match &self.holder {
            Some((held, _)) if *held == id => return,
            Some((held, held_name)) => {
                log::warn!(
                    "{}: Only one overlay can be in high quality mode, revoking it from {}",
                    name,
                    held_name
                );
                self.revoked.push(*held);
            }
            None => {}
        }
        self.revoked.retain(|r| *r != id);
        self.holder = Some((id, name.clone()));
    }

    /// Drop `id` from the slot, along with any revocation it has not seen yet.
    pub fn release(&mut self, id: OverlayID) {
        if self.holder() == Some(id) {
            self.holder = None;
        }
        self.revoked.retain(|r| *r != id);
    }

    pub fn take_revoked(&mut self, id: OverlayID) -> bool {
        if let Some(pos) = self.revoked.iter().position(|r| *r == id) {
            self.revoked.swap_remove(pos);
            return true;
        }
        false
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Lifecycle {
    Disabled,
    Enabled(OverlayHandle),
    /// Creation failed; the overlay stays inert.
    Failed(OverlayError),
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub(crate) struct QualityFlags {
    pub high_quality: bool,
    pub antialias: bool,
    pub curved: bool,
}

/// Values last pushed to the compositor, for change detection.
#[derive(Debug, Clone, Copy)]
pub(crate) struct AppliedState {
    pub attachment: Option<Attachment>,
    pub object: Pose,
    pub texture: Option<TextureRef>,
    pub uv_offset: Vec4,
    pub animation: AnimationType,
    pub quality: QualityFlags,
}

impl Default for AppliedState {
    fn default() -> Self {
        Self {
            attachment: None,
            object: Pose::IDENTITY,
            texture: None,
            uv_offset: Vec4::new(0.0, 0.0, 1.0, 1.0),
            animation: AnimationType::None,
            quality: QualityFlags::default(),
        }
    }
}

/// Everything a full push sends.
pub(crate) struct OverlayUpload<'a> {
    pub name: &'a str,
    pub key: &'a str,
    pub texture: Option<&'a TextureRef>,
    pub color: Vec3,
    pub alpha: f32,
    pub width: f32,
    pub curve_range: Option<Vec2>,
    pub uv_offset: Vec4,
    pub transform: OverlayTransform,
    pub input_method: InputMethod,
}

/// Show the overlay, re-resolving a stale handle through its key.
/// Returns false if the overlay can't be found and the frame should be skipped.
pub(crate) fn show_overlay(
    compositor: &mut dyn Compositor,
    handle: &mut OverlayHandle,
    name: &str,
    key: &str,
) -> bool {
    match compositor.show_overlay(*handle) {
        Ok(()) => true,
        Err(e) if e.is_stale_handle() => match compositor.find_overlay(key) {
            Ok(found) => {
                log::debug!("{}: Overlay handle {:?} is now {:?}", name, handle, found);
                *handle = found;
                if let Err(e) = compositor.show_overlay(found) {
                    log::error!("{}: Failed to show overlay: {}", name, e);
                }
                true
            }
            Err(e) => {
                log::debug!("{}: Overlay not found, skipping frame: {}", name, e);
                false
            }
        },
        Err(e) => {
            log::error!("{}: Failed to show overlay: {}", name, e);
            true
        }
    }
}

/// Push one consolidated update. No texture hides the overlay instead.
/// Returns false if nothing was shown.
pub(crate) fn push_overlay(
    compositor: &mut dyn Compositor,
    handle: &mut OverlayHandle,
    upload: &OverlayUpload,
) -> bool {
    let name = upload.name;
    let Some(texture) = upload.texture else {
        if let Err(e) = compositor.hide_overlay(*handle) {
            log::error!("{}: Failed to hide overlay: {}", name, e);
        }
        return false;
    };

    if !show_overlay(compositor, handle, name, upload.key) {
        return false;
    }
    let handle = *handle;
    log::trace!("{}: push", name);

    if let Err(e) = compositor.set_color(handle, upload.color) {
        log::error!("{}: Failed to set overlay color: {}", name, e);
    }
    if let Err(e) = compositor.set_texture(handle, texture) {
        log::error!("{}: Failed to set overlay texture: {}", name, e);
    }
    if let Err(e) = compositor.set_alpha(handle, upload.alpha) {
        log::error!("{}: Failed to set overlay alpha: {}", name, e);
    }
    if let Err(e) = compositor.set_width(handle, upload.width) {
        log::error!("{}: Failed to set overlay width: {}", name, e);
    }
    if let Some(range) = upload.curve_range {
        if let Err(e) = compositor.set_auto_curve_range(handle, range) {
            log::error!("{}: Failed to set overlay curve range: {}", name, e);
        }
    }
    let bounds = TextureBounds::from_uv_offset(upload.uv_offset);
    if let Err(e) = compositor.set_texture_bounds(handle, &bounds) {
        log::error!("{}: Failed to set overlay texture bounds: {}", name, e);
    }
    if let Err(e) = compositor.set_mouse_scale(handle, Vec2::new(1.0, texture.aspect())) {
        log::error!("{}: Failed to set overlay mouse scale: {}", name, e);
    }
    if let Err(e) = compositor.set_transform(handle, &upload.transform) {
        log::error!("{}: Failed to set overlay transform: {}", name, e);
    }
    if let Err(e) = compositor.set_input_method(handle, upload.input_method) {
        log::error!("{}: Failed to set overlay input method: {}", name, e);
    }
    true
}

/// Texture-only refresh for frames where nothing else changed.
pub(crate) fn push_texture(
    compositor: &mut dyn Compositor,
    handle: OverlayHandle,
    name: &str,
    texture: &TextureRef,
) {
    if let Err(e) = compositor.set_mouse_scale(handle, Vec2::new(1.0, texture.aspect())) {
        log::error!("{}: Failed to set overlay mouse scale: {}", name, e);
    }
    if let Err(e) = compositor.set_texture(handle, texture) {
        log::error!("{}: Failed to set overlay texture: {}", name, e);
    }
}

/// Render target that refreshes itself every frame, or a video.
pub(crate) fn is_streaming(texture: &TextureRef, auto_update: bool) -> bool {
    match texture.kind {
        TextureKind::Static => false,
        TextureKind::RenderTarget => auto_update,
        TextureKind::Video => true,
    }
}

/// Transform for an overlay that follows the screen.
/// While rendering the camera origin is known and the pose is made absolute;
/// otherwise it is sent relative to the headset.
pub(crate) fn screen_transform(app: &AppState, local: Affine3A) -> OverlayTransform {
    match app.frame.camera_origin {
        Some(origin) => OverlayTransform::Absolute {
            universe: app.session.config.tracking_universe,
            pose: origin * local,
        },
        None => OverlayTransform::DeviceRelative {
            device: app.input_state.devices.hmd_index(),
            pose: local,
        },
    }
}

/// Device-relative while a tracked device is known, otherwise absolute for
/// World and screen-following for everything else.
pub(crate) fn anchored_transform(
    app: &AppState,
    device: AttachmentDevice,
    index: Option<TrackedDeviceIndex>,
    local: Affine3A,
) -> OverlayTransform {
    if let Some(device) = index {
        return OverlayTransform::DeviceRelative {
            device,
            pose: local,
        };
    }
    match device {
        AttachmentDevice::World => OverlayTransform::Absolute {
            universe: app.session.config.tracking_universe,
            pose: local,
        },
        _ => screen_transform(app, local),
    }
}

pub struct OverlayState {
    pub id: OverlayID,
    pub name: Arc<str>,
    pub key: Arc<str>,

    pub texture: Option<TextureRef>,
    pub auto_update_textures: bool,
    /// UV shift in xy, UV scale in zw.
    pub uv_offset: Vec4,
    pub color: Vec3,

    pub alpha: f32,
    pub alpha_gazed: f32,
    pub alpha_speed: f32,
    /// Width in meters.
    pub scale: f32,
    pub scale_gazed: f32,
    pub scale_speed: f32,

    pub high_quality: bool,
    pub antialias: bool,
    pub curved: bool,
    pub curved_range: Vec2,
    pub input_method: InputMethod,

    pub animate_on_gaze: AnimationType,
    pub dodge_offset: Vec2,
    pub dodge_speed: f32,

    pub anchor_device: AttachmentDevice,
    pub anchor_point: AttachmentPoint,
    pub anchor_offset: Vec3,

    /// Placement of the overlay in its anchor's space.
    pub object: Pose,
    /// Child pose the compositor transform is computed from.
    pub reference: Pose,

    pub events: EventQueue<OverlayEvent>,

    pub(crate) lifecycle: Lifecycle,
    pub(crate) applied: AppliedState,
    pub(crate) anchor_index: Option<TrackedDeviceIndex>,
    pub(crate) anchor_rotation: Quat,
    pub(crate) current_alpha: f32,
    pub(crate) current_scale: f32,
    pub(crate) dodge: GazeDodge,
    pub(crate) is_gazed: bool,
    pub(crate) gaze_lock: Option<bool>,
    pub(crate) aimed_uv: Option<Vec2>,
    force_update: bool,
    just_updated: bool,
    reattach: bool,
}

impl OverlayState {
    pub fn new(name: &str) -> Self {
        Self {
            id: OverlayID::default(),
            name: name.into(),
            key: overlay_key(name),
            texture: None,
            auto_update_textures: true,
            uv_offset: Vec4::new(0.0, 0.0, 1.0, 1.0),
            color: Vec3::ONE,
            alpha: 1.0,
            alpha_gazed: 1.0,
            alpha_speed: 0.01,
            scale: 1.0,
            scale_gazed: 1.0,
            scale_speed: 0.1,
            high_quality: false,
            antialias: false,
            curved: false,
            curved_range: Vec2::new(1.0, 2.0),
            input_method: InputMethod::None,
            animate_on_gaze: AnimationType::None,
            dodge_offset: Vec2::ZERO,
            dodge_speed: 0.1,
            anchor_device: AttachmentDevice::World,
            anchor_point: AttachmentPoint::Center,
            anchor_offset: Vec3::ZERO,
            object: Pose::IDENTITY,
            reference: Pose::IDENTITY,
            events: EventQueue::new(),
            lifecycle: Lifecycle::Disabled,
            applied: AppliedState::default(),
            anchor_index: None,
            anchor_rotation: Quat::IDENTITY,
            current_alpha: 1.0,
            current_scale: 1.0,
            dodge: GazeDodge::default(),
            is_gazed: false,
            gaze_lock: None,
            aimed_uv: None,
            force_update: false,
            just_updated: false,
            reattach: false,
        }
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

    pub fn anchor_index(&self) -> Option<TrackedDeviceIndex> {
        self.anchor_index
    }

    pub fn current_alpha(&self) -> f32 {
        self.current_alpha
    }

    pub fn current_scale(&self) -> f32 {
        self.current_scale
    }

    /// Height over width of the texture; 1 without one.
    pub fn current_aspect(&self) -> f32 {
        self.texture.map_or(1.0, |t| t.aspect())
    }

    pub fn current_width(&self) -> f32 {
        self.current_scale
    }

    pub fn current_height(&self) -> f32 {
        self.current_scale * self.current_aspect()
    }

    /// Device the overlay is attached to, or will be on its next frame.
    pub fn current_device(&self) -> AttachmentDevice {
        self.applied
            .attachment
            .map_or(self.anchor_device, |a| a.device)
    }

    /// Reference pose with any dodge displacement removed.
    pub fn undodged_reference(&self) -> Pose {
        if self.dodge.is_dodging() {
            Pose::new(self.dodge.base(), self.reference.rotation)
        } else {
            self.reference
        }
    }

    /// Last UV hit by a controller ray, for mouse-style input.
    pub fn aimed_uv(&self) -> Option<Vec2> {
        self.aimed_uv
    }

    pub fn set_aimed_uv(&mut self, uv: Option<Vec2>) {
        self.aimed_uv = uv;
    }

    /// Force a full push on the next frame.
    pub fn request_update(&mut self) {
        self.force_update = true;
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
        log::debug!("{}: Created overlay {:?}", self.name, handle);

        self.current_alpha = self.alpha;
        self.current_scale = self.scale;
        self.applied.uv_offset = self.uv_offset;
        self.applied.object = Pose::IDENTITY;
        self.applied.animation = self.animate_on_gaze;

        let target = InteractTarget::Overlay(self.id);
        let eligibility = &mut app.input_state.eligibility;
        eligibility.set_gaze(target, self.animate_on_gaze != AnimationType::DodgeGaze);
        eligibility.set_aim(target, true);

        self.lifecycle = Lifecycle::Enabled(handle);
        self.force_update = true;
        self.events.send(OverlayEvent::Enabled);
        Ok(())
    }

    pub fn disable(&mut self, app: &mut AppState) {
        let target = InteractTarget::Overlay(self.id);
        app.input_state.eligibility.set_gaze(target, false);
        app.input_state.eligibility.set_aim(target, false);
        app.high_quality.release(self.id);

        let Lifecycle::Enabled(handle) = self.lifecycle else {
            return;
        };
        if let Err(e) = app.compositor.destroy_overlay(handle) {
            log::error!("{}: Failed to destroy overlay: {}", self.name, e);
        }
        log::debug!("{}: Destroyed overlay {:?}", self.name, handle);

        self.lifecycle = Lifecycle::Disabled;
        self.aimed_uv = None;
        self.events.send(OverlayEvent::Disabled);
    }

    /// Flag for re-attachment if `role` is the hand this overlay follows.
    pub fn on_controller_index_changed(&mut self, role: TrackedDeviceRole) {
        if self.current_device().controller_role() == Some(role) {
            self.reattach = true;
        }
    }

    /// Run change detection and push at most once. Returns true if a full push happened.
    pub fn update(&mut self, app: &mut AppState) -> bool {
        if !self.is_enabled() {
            return false;
        }

        if app.high_quality.take_revoked(self.id) {
            self.high_quality = false;
        }

        let mut changed = self.check_animation_changed(app);
        changed |= self.check_texture_changed();
        changed |= self.check_anchor_changed(app);
        changed |= self.check_rotation_changed(false);
        changed |= self.check_position_changed();
        changed |= self.check_alpha_and_scale();
        changed |= self.check_quality_changed();

        if changed || self.force_update {
            self.just_updated = true;
            self.force_update = false;
            self.push(app);
            true
        } else {
            self.just_updated = false;
            self.update_texture(app, false);
            false
        }
    }

    /// Re-upload the texture now, unless a full push already happened this frame.
    pub fn refresh_texture(&mut self, app: &mut AppState) {
        self.update_texture(app, true);
    }

    pub fn clear_texture(&mut self, app: &mut AppState) -> Result<(), OverlayError> {
        let Lifecycle::Enabled(handle) = self.lifecycle else {
            return Err(OverlayError::InvalidHandle);
        };
        app.compositor.clear_texture(handle)
    }

    fn check_texture_changed(&mut self) -> bool {
        if self.texture == self.applied.texture && self.uv_offset == self.applied.uv_offset {
            return false;
        }
        let old_aspect = self.applied.texture.map(|t| t.aspect());
        self.applied.texture = self.texture;
        self.applied.uv_offset = self.uv_offset;

        if let Some(texture) = self.texture {
            if old_aspect != Some(texture.aspect()) {
                self.events
                    .send(OverlayEvent::AspectChanged(texture.aspect()));
            }
        }
        true
    }

    fn check_anchor_changed(&mut self, app: &AppState) -> bool {
        let requested = Attachment {
            device: self.anchor_device,
            point: self.anchor_point,
            offset: self.anchor_offset,
        };
        if !self.reattach && self.applied.attachment == Some(requested) {
            return false;
        }
        self.reattach = false;
        self.attach_to(
            app,
            requested.device,
            self.scale,
            requested.offset,
            requested.point,
        );
        true
    }

    pub(crate) fn check_rotation_changed(&mut self, force: bool) -> bool {
        let mut changed = false;
        let object_changed = self.object.rotation != self.applied.object.rotation;
        if object_changed {
            self.stop_dodging();
            self.applied.object.rotation = self.object.rotation;
            self.events
                .send(OverlayEvent::RotationChanged(self.object.rotation));
            changed = true;
        }

        // controllers carry the object rotation on the reference
        if !self.current_device().is_controller() {
            return changed;
        }
        let derived = self.anchor_rotation * self.object.rotation;
        if !force && !object_changed && self.reference.rotation == derived {
            return changed;
        }
        self.reference.rotation = derived;
        true
    }

    fn check_position_changed(&mut self) -> bool {
        if self.current_device().is_controller() {
            return false;
        }
        if self.object.position == self.applied.object.position {
            return false;
        }
        self.applied.object.position = self.object.position;
        self.events
            .send(OverlayEvent::PositionChanged(self.object.position));
        true
    }

    fn check_alpha_and_scale(&mut self) -> bool {
        let mut changed = false;
        if !self.animate_on_gaze.animates_alpha() && self.current_alpha != self.alpha {
            self.stop_dodging();
            self.set_current_alpha(self.alpha);
            changed = true;
        }
        if !self.animate_on_gaze.animates_scale() && self.current_scale != self.scale {
            self.stop_dodging();
            self.set_current_scale(self.scale);
            changed = true;
        }
        changed
    }

    fn check_quality_changed(&mut self) -> bool {
        let quality = QualityFlags {
            high_quality: self.high_quality,
            antialias: self.antialias,
            curved: self.curved,
        };
        if quality == self.applied.quality {
            return false;
        }
        self.applied.quality = quality;
        true
    }

    /// Pose relative to whatever the overlay is anchored to, using `reference`
    /// in place of the live reference pose.
    pub(crate) fn anchor_local(&self, reference: Pose) -> Affine3A {
        if self.anchor_index.is_some() {
            reference.to_affine()
        } else {
            self.object.to_affine() * reference.to_affine()
        }
    }

    pub fn overlay_transform(&self, app: &AppState) -> OverlayTransform {
        anchored_transform(
            app,
            self.current_device(),
            self.anchor_index,
            self.anchor_local(self.reference),
        )
    }

    fn push(&mut self, app: &mut AppState) {
        let transform = self.overlay_transform(app);
        let upload = OverlayUpload {
            name: &self.name,
            key: &self.key,
            texture: self.texture.as_ref(),
            color: self.color,
            alpha: self.current_alpha,
            width: self.current_scale,
            curve_range: Some(self.curved_range),
            uv_offset: self.uv_offset,
            transform,
            input_method: self.input_method,
        };
        let Lifecycle::Enabled(handle) = &mut self.lifecycle else {
            log::debug!("{}: No overlay handle", self.name);
            return;
        };
        if !push_overlay(app.compositor.as_mut(), handle, &upload) {
            return;
        }
        let handle = *handle;
        self.push_quality(app, handle);
    }

    fn push_quality(&mut self, app: &mut AppState, handle: OverlayHandle) {
        if self.high_quality {
            app.high_quality.claim(self.id, &self.name);
            if let Err(e) = app.compositor.set_high_quality_overlay(Some(handle)) {
                log::error!("{}: Failed to set high quality overlay: {}", self.name, e);
            }
            if let Err(e) = app
                .compositor
                .set_flag(handle, OverlayFlag::Curved, self.curved)
            {
                log::error!("{}: Failed to set curved flag: {}", self.name, e);
            }
            if let Err(e) = app
                .compositor
                .set_flag(handle, OverlayFlag::Rgss4x, self.antialias)
            {
                log::error!("{}: Failed to set antialias flag: {}", self.name, e);
            }
        } else if app.compositor.high_quality_overlay() == Some(handle) {
            if let Err(e) = app.compositor.set_high_quality_overlay(None) {
                log::error!("{}: Failed to clear high quality overlay: {}", self.name, e);
            }
            app.high_quality.release(self.id);
        }
    }

    fn update_texture(&mut self, app: &mut AppState, refresh: bool) {
        let Some(texture) = self.texture else {
            return;
        };
        if !refresh && !is_streaming(&texture, self.auto_update_textures) {
            return;
        }
        if self.just_updated {
            return;
        }
        let Lifecycle::Enabled(handle) = self.lifecycle else {
            return;
        };
        push_texture(app.compositor.as_mut(), handle, &self.name, &texture);
    }
}

#[cfg(test)]
mod tests {
    use glam::{Affine3A, Quat, Vec3};

    use super::*;
    use crate::{
        backend::{
            compositor::{OverlayTransform, TRACKED_DEVICE_INDEX_HMD},
            input::TrackedDeviceRole,
        },
        state::tests::{test_app, test_texture},
    };

    fn panel(app: &mut AppState) -> OverlayState {
        let mut overlay = OverlayState::new("panel");
        overlay.texture = Some(test_texture(100, 50, TextureKind::Static));
        overlay.enable(app).unwrap();
        overlay.update(app);
        overlay
    }

    #[test]
    fn key_format() {
        let overlay = OverlayState::new("desk");
        assert!(overlay.key.starts_with("wlx-anchor:desk."));
        assert_ne!(overlay.key, OverlayState::new("desk").key);
    }

    #[test]
    fn enable_creates_and_disable_destroys() {
        let (mut app, comp) = test_app();
        let mut overlay = OverlayState::new("panel");
        overlay.enable(&mut app).unwrap();
        let handle = overlay.handle().unwrap();
        assert!(comp.overlay(handle).is_some());
        assert!(app
            .input_state
            .eligibility
            .can_gaze(InteractTarget::Overlay(overlay.id)));
        assert_eq!(overlay.events.read(), Some(OverlayEvent::Enabled));

        overlay.disable(&mut app);
        assert!(overlay.handle().is_none());
        assert!(comp.overlay(handle).is_none());
        assert!(!app
            .input_state
            .eligibility
            .can_aim(InteractTarget::Overlay(overlay.id)));
        assert_eq!(overlay.events.read(), Some(OverlayEvent::Disabled));
    }

    #[test]
    fn failed_creation_is_permanent() {
        let (mut app, comp) = test_app();
        comp.fail_create(Some(OverlayError::OverlayLimitExceeded));
        let mut overlay = OverlayState::new("doomed");
        assert_eq!(
            overlay.enable(&mut app),
            Err(OverlayError::OverlayLimitExceeded)
        );

        comp.fail_create(None);
        assert_eq!(
            overlay.enable(&mut app),
            Err(OverlayError::OverlayLimitExceeded)
        );
        assert_eq!(comp.calls("create_overlay"), 1);
        assert!(!overlay.update(&mut app));
    }

    #[test]
    fn coalesces_changes_into_one_push() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        comp.reset_calls();

        overlay.object.position = Vec3::new(0.0, 1.0, -1.0);
        overlay.alpha = 0.5;
        overlay.scale = 2.0;
        assert!(overlay.update(&mut app));

        assert_eq!(comp.calls("show_overlay"), 1);
        assert_eq!(comp.calls("set_alpha"), 1);
        assert_eq!(comp.calls("set_width"), 1);
        let state = comp.overlay(overlay.handle().unwrap()).unwrap();
        assert_eq!(state.alpha, 0.5);
        assert_eq!(state.width, 2.0);
    }

    #[test]
    fn idle_static_overlay_pushes_nothing() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        comp.reset_calls();
        assert!(!overlay.update(&mut app));
        assert_eq!(comp.total_calls(), 0);
    }

    #[test]
    fn streaming_texture_refreshes_alone() {
        let (mut app, comp) = test_app();
        let mut overlay = OverlayState::new("video");
        overlay.texture = Some(test_texture(640, 480, TextureKind::Video));
        overlay.enable(&mut app).unwrap();
        overlay.update(&mut app);
        comp.reset_calls();

        assert!(!overlay.update(&mut app));
        assert_eq!(comp.calls("set_texture"), 1);
        assert_eq!(comp.calls("set_mouse_scale"), 1);
        assert_eq!(comp.calls("show_overlay"), 0);

        overlay.request_update();
        overlay.update(&mut app);
        comp.reset_calls();
        overlay.refresh_texture(&mut app);
        assert_eq!(comp.calls("set_texture"), 0);
    }

    #[test]
    fn missing_texture_hides() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        let handle = overlay.handle().unwrap();
        assert!(comp.overlay(handle).unwrap().visible);

        overlay.texture = None;
        overlay.update(&mut app);
        assert!(!comp.overlay(handle).unwrap().visible);
    }

    #[test]
    fn clear_texture_needs_a_live_overlay() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        let handle = overlay.handle().unwrap();
        assert!(comp.overlay(handle).unwrap().texture.is_some());

        overlay.clear_texture(&mut app).unwrap();
        assert!(comp.overlay(handle).unwrap().texture.is_none());

        overlay.disable(&mut app);
        assert_eq!(
            overlay.clear_texture(&mut app),
            Err(OverlayError::InvalidHandle)
        );
    }

    #[test]
    fn uv_and_mouse_scale_pushed() {
        let (mut app, comp) = test_app();
        let overlay = panel(&mut app);
        let state = comp.overlay(overlay.handle().unwrap()).unwrap();
        let bounds = state.bounds.unwrap();
        assert_eq!((bounds.u_min, bounds.v_min), (0.0, 1.0));
        assert_eq!((bounds.u_max, bounds.v_max), (1.0, 0.0));
        assert_eq!(state.mouse_scale, Some(Vec2::new(1.0, 0.5)));
    }

    #[test]
    fn stale_handle_is_re_resolved() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        let old = overlay.handle().unwrap();
        let fresh = comp.reissue_handle(old).unwrap();

        overlay.request_update();
        assert!(overlay.update(&mut app));
        assert_eq!(overlay.handle(), Some(fresh));
        assert!(comp.overlay(fresh).unwrap().visible);
    }

    #[test]
    fn high_quality_revokes_previous_holder() {
        let (mut app, comp) = test_app();
        let mut first = panel(&mut app);
        first.id = OverlayID::from(slotmap::KeyData::from_ffi(1));
        let mut second = panel(&mut app);
        second.id = OverlayID::from(slotmap::KeyData::from_ffi(2));

        first.high_quality = true;
        first.update(&mut app);
        assert_eq!(comp.high_quality_overlay(), first.handle());

        second.high_quality = true;
        second.update(&mut app);
        assert_eq!(comp.high_quality_overlay(), second.handle());
        assert_eq!(app.high_quality.holder(), Some(second.id));

        first.update(&mut app);
        assert!(!first.high_quality);
        assert_eq!(comp.high_quality_overlay(), second.handle());
    }

    #[test]
    fn disable_releases_high_quality() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        overlay.high_quality = true;
        overlay.update(&mut app);
        assert_eq!(app.high_quality.holder(), Some(overlay.id));

        overlay.disable(&mut app);
        assert_eq!(app.high_quality.holder(), None);
        assert_eq!(comp.high_quality_overlay(), None);
    }

    #[test]
    fn revoked_overlay_reclaims_after_reenable() {
        let (mut app, comp) = test_app();
        let mut first = panel(&mut app);
        first.id = OverlayID::from(slotmap::KeyData::from_ffi(1));
        let mut second = panel(&mut app);
        second.id = OverlayID::from(slotmap::KeyData::from_ffi(2));

        first.high_quality = true;
        first.update(&mut app);
        second.high_quality = true;
        second.update(&mut app);

        // disabled before it ever saw the revocation
        first.disable(&mut app);
        first.enable(&mut app).unwrap();
        first.high_quality = true;
        first.update(&mut app);

        assert!(first.high_quality);
        assert_eq!(app.high_quality.holder(), Some(first.id));
        assert_eq!(comp.high_quality_overlay(), first.handle());

        second.update(&mut app);
        assert!(!second.high_quality);
    }

    #[test]
    fn dropping_high_quality_clears_compositor() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        overlay.high_quality = true;
        overlay.curved = true;
        overlay.update(&mut app);
        let handle = overlay.handle().unwrap();
        assert!(comp.overlay(handle).unwrap().curved);

        overlay.high_quality = false;
        overlay.update(&mut app);
        assert_eq!(comp.high_quality_overlay(), None);
        assert_eq!(app.high_quality.holder(), None);
    }

    #[test]
    fn world_and_screen_transforms() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        overlay.anchor_offset = Vec3::new(0.0, 1.0, -2.0);
        overlay.update(&mut app);
        let handle = overlay.handle().unwrap();

        let Some(OverlayTransform::Absolute { pose, .. }) = comp.overlay(handle).unwrap().transform
        else {
            panic!("world overlay must be absolute");
        };
        assert!(pose
            .translation
            .abs_diff_eq(Vec3::new(0.0, 1.0, -2.0).into(), 1e-6));

        overlay.anchor_device = AttachmentDevice::Screen;
        overlay.update(&mut app);
        let Some(OverlayTransform::DeviceRelative { device, .. }) =
            comp.overlay(handle).unwrap().transform
        else {
            panic!("screen overlay without camera must follow the headset");
        };
        assert_eq!(device, TRACKED_DEVICE_INDEX_HMD);

        app.frame.camera_origin = Some(Affine3A::from_translation(Vec3::new(5.0, 0.0, 0.0)));
        overlay.request_update();
        overlay.update(&mut app);
        let Some(OverlayTransform::Absolute { pose, .. }) = comp.overlay(handle).unwrap().transform
        else {
            panic!("screen overlay while rendering must be absolute");
        };
        assert!(pose
            .translation
            .abs_diff_eq(Vec3::new(5.0, 1.0, -2.0).into(), 1e-6));
    }

    #[test]
    fn controller_index_change_reattaches() {
        let (mut app, comp) = test_app();
        let mut overlay = panel(&mut app);
        overlay.anchor_device = AttachmentDevice::LeftController;
        overlay.update(&mut app);
        assert_eq!(overlay.anchor_index(), None);
        overlay.events.drain().for_each(drop);

        app.input_state
            .devices
            .set_controller_index(TrackedDeviceRole::LeftHand, Some(2));
        overlay.on_controller_index_changed(TrackedDeviceRole::RightHand);
        assert!(!overlay.update(&mut app));

        overlay.on_controller_index_changed(TrackedDeviceRole::LeftHand);
        assert!(overlay.update(&mut app));
        assert_eq!(overlay.anchor_index(), Some(2));
        assert!(!overlay
            .events
            .drain()
            .any(|e| matches!(e, OverlayEvent::AnchorChanged(_))));

        let Some(OverlayTransform::DeviceRelative { device, .. }) =
            comp.overlay(overlay.handle().unwrap()).unwrap().transform
        else {
            panic!("controller overlay must be device relative");
        };
        assert_eq!(device, 2);
    }

    #[test]
    fn aspect_change_fires_once() {
        let (mut app, _comp) = test_app();
        let mut overlay = panel(&mut app);
        overlay.events.drain().for_each(drop);

        overlay.texture = Some(test_texture(100, 100, TextureKind::Static));
        overlay.update(&mut app);
        let aspects: Vec<_> = overlay
            .events
            .drain()
            .filter(|e| matches!(e, OverlayEvent::AspectChanged(_)))
            .collect();
        assert_eq!(aspects, vec![OverlayEvent::AspectChanged(1.0)]);
    }

    #[test]
    fn rotation_change_stops_dodging() {
        let (mut app, _comp) = test_app();
        let mut overlay = panel(&mut app);
        overlay.dodge_offset = Vec2::new(1.0, 0.0);
        overlay.gaze_detector_gazed(true);
        overlay.gaze_detector_gazed(true);
        assert!(overlay.dodge().is_dodging());

        overlay.object.rotation = Quat::from_rotation_y(0.3);
        overlay.update(&mut app);
        assert!(!overlay.dodge().is_dodging());
        assert_eq!(overlay.reference.position, Vec3::ZERO);
    }
}
