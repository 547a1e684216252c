use glam::{Vec2, Vec3};

use crate::backend::overlay::OverlayState;

/// Progress of an overlay sliding out of the line of sight.
#[derive(Debug, Clone, Copy, Default)]
pub struct GazeDodge {
    dodging: bool,
    full: bool,
    base: Vec3,
    target: Vec3,
    offset: Vec2,
    t: f32,
}

impl GazeDodge {
    pub fn is_dodging(&self) -> bool {
        self.dodging
    }

    pub fn is_full(&self) -> bool {
        self.full
    }

    pub fn progress(&self) -> f32 {
        self.t
    }

    pub fn base(&self) -> Vec3 {
        self.base
    }

    pub fn target(&self) -> Vec3 {
        self.target
    }

    fn position(&self) -> Vec3 {
        if self.t >= 1.0 {
            self.target
        } else if self.t <= 0.0 {
            self.base
        } else {
            self.base.lerp(self.target, self.t)
        }
    }
}

impl OverlayState {
    /// Feed the gaze result of a detector that asks this overlay to move aside.
    pub fn gaze_detector_gazed(&mut self, hit: bool) {
        let mut changed = false;

        if self.dodge.dodging && self.dodge.offset != self.dodge_offset {
            self.anchor_dodge();
            if self.dodge.full {
                self.reference.position = self.dodge.target;
                changed = true;
            }
        }

        if hit {
            if !self.dodge.dodging {
                self.dodge.dodging = true;
                self.dodge.base = self.reference.position;
                self.anchor_dodge();
                self.dodge.t = 0.0;
            } else if self.dodge.t < 1.0 {
                self.dodge.t = (self.dodge.t + self.dodge_speed).min(1.0);
                self.reference.position = self.dodge.position();
                changed = true;
            } else {
                self.dodge.full = true;
            }
        } else {
            self.dodge.full = false;
            if self.dodge.dodging {
                if self.dodge.t > 0.0 {
                    self.dodge.t = (self.dodge.t - self.dodge_speed).max(0.0);
                    self.reference.position = self.dodge.position();
                    changed = true;
                } else {
                    self.dodge.dodging = false;
                    self.reference.position = self.dodge.base;
                }
            }
        }

        if changed {
            self.request_update();
        }
    }

    /// Put the reference back on the dodge baseline, if dodging.
    pub fn stop_dodging(&mut self) {
        if self.dodge.dodging {
            self.reference.position = self.dodge.base;
            self.dodge.dodging = false;
            self.dodge.full = false;
            self.dodge.t = 0.0;
        }
    }

    pub fn dodge(&self) -> &GazeDodge {
        &self.dodge
    }

    fn anchor_dodge(&mut self) {
        self.dodge.offset = self.dodge_offset;
        let aspect = self.current_aspect();
        let dx = self.dodge.offset.x * self.scale;
        let dy = self.dodge.offset.y * self.scale * aspect;

        self.dodge.target = if self.current_device().is_controller() {
            self.dodge.base + self.reference.right() * dx + self.reference.up() * dy
        } else {
            self.dodge.base - self.object.right() * dx - self.object.up() * dy
        };
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec2, Vec3};

    use crate::{
        backend::{compositor::TextureKind, overlay::OverlayState},
        overlays::{
            animation::AnimationType,
            attachment::{AttachmentDevice, AttachmentPoint},
        },
        state::tests::{test_app, test_texture},
    };

    fn dodger() -> OverlayState {
        let mut overlay = OverlayState::new("dodger");
        overlay.texture = Some(test_texture(200, 100, TextureKind::Static));
        overlay.animate_on_gaze = AnimationType::DodgeGaze;
        overlay.dodge_offset = Vec2::new(1.0, 0.0);
        overlay.dodge_speed = 0.1;
        overlay.scale = 0.5;
        overlay
    }

    #[test]
    fn first_hit_only_arms() {
        let mut overlay = dodger();
        overlay.reference.position = Vec3::new(0.0, 0.0, -1.0);
        overlay.gaze_detector_gazed(true);
        assert!(overlay.dodge().is_dodging());
        assert_eq!(overlay.dodge().progress(), 0.0);
        assert_eq!(overlay.reference.position, Vec3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn reaches_target_exactly() {
        let mut overlay = dodger();
        overlay.gaze_detector_gazed(true);
        for _ in 0..10 {
            overlay.gaze_detector_gazed(true);
        }
        assert_eq!(overlay.dodge().progress(), 1.0);
        assert_eq!(overlay.reference.position, overlay.dodge().target());
        assert_eq!(overlay.dodge().target(), Vec3::new(-0.5, 0.0, 0.0));

        overlay.gaze_detector_gazed(true);
        assert!(overlay.dodge().is_full());
    }

    #[test]
    fn release_restores_baseline() {
        let mut overlay = dodger();
        let base = Vec3::new(0.3, 0.1, -2.0);
        overlay.reference.position = base;
        for _ in 0..6 {
            overlay.gaze_detector_gazed(true);
        }
        assert!(overlay.reference.position != base);

        for _ in 0..6 {
            overlay.gaze_detector_gazed(false);
        }
        assert!(overlay.dodge().is_dodging());
        assert_eq!(overlay.dodge().progress(), 0.0);
        assert_eq!(overlay.reference.position, base);

        overlay.gaze_detector_gazed(false);
        assert!(!overlay.dodge().is_dodging());
        assert_eq!(overlay.reference.position, base);
    }

    #[test]
    fn controller_dodge_follows_reference_axes() {
        let (app, _comp) = test_app();
        let mut overlay = dodger();
        overlay.dodge_offset = Vec2::new(0.0, 1.0);
        overlay.attach_to(
            &app,
            AttachmentDevice::RightController,
            0.5,
            Vec3::ZERO,
            AttachmentPoint::FlatAbove,
        );
        let base = overlay.reference.position;
        overlay.gaze_detector_gazed(true);
        let up = overlay.reference.rotation * Vec3::Y;
        let want = base + up * 0.5 * 0.5;
        assert!(overlay.dodge().target().abs_diff_eq(want, 1e-6));
    }

    #[test]
    fn offset_change_while_full_snaps() {
        let mut overlay = dodger();
        overlay.object.rotation = Quat::IDENTITY;
        for _ in 0..12 {
            overlay.gaze_detector_gazed(true);
        }
        assert!(overlay.dodge().is_full());

        overlay.dodge_offset = Vec2::new(2.0, 0.0);
        overlay.gaze_detector_gazed(true);
        assert_eq!(overlay.reference.position, Vec3::new(-1.0, 0.0, 0.0));
    }

    #[test]
    fn stop_dodging_returns_to_base() {
        let mut overlay = dodger();
        for _ in 0..5 {
            overlay.gaze_detector_gazed(true);
        }
        overlay.stop_dodging();
        assert!(!overlay.dodge().is_dodging());
        assert_eq!(overlay.reference.position, Vec3::ZERO);
    }
}
