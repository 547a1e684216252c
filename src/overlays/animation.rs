use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};

use crate::{
    backend::{input::InteractTarget, overlay::OverlayState},
    state::AppState,
};

use super::events::OverlayEvent;

/// How an overlay reacts to being looked at.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, EnumString, AsRefStr,
)]
pub enum AnimationType {
    #[default]
    None,
    Alpha,
    Scale,
    AlphaAndScale,
    /// Slide out of the way while a companion gaze detector is hit.
    DodgeGaze,
}

impl AnimationType {
    pub fn animates_alpha(self) -> bool {
        matches!(self, AnimationType::Alpha | AnimationType::AlphaAndScale)
    }

    pub fn animates_scale(self) -> bool {
        matches!(self, AnimationType::Scale | AnimationType::AlphaAndScale)
    }
}

/// Whether animation speeds are applied once per frame or scaled by frame time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum StepMode {
    #[default]
    PerFrame,
    PerSecond,
}

impl StepMode {
    pub fn step(self, speed: f32, delta: f32) -> f32 {
        match self {
            StepMode::PerFrame => speed,
            StepMode::PerSecond => speed * delta,
        }
    }
}

/// Move `current` toward `target` by `step` without overshooting.
/// Returns `None` when already there.
pub fn approach(current: f32, target: f32, step: f32) -> Option<f32> {
    if current < target {
        Some((current + step).min(target))
    } else if current > target {
        Some((current - step).max(target))
    } else {
        None
    }
}

impl OverlayState {
    /// Feed this frame's gaze raycast result.
    pub fn update_gaze(&mut self, hit: bool, app: &AppState) {
        let hit = self.gaze_lock.unwrap_or(hit);
        self.is_gazed = hit;
        self.animate_on_gaze(hit, app);
    }

    /// Pin the gaze result regardless of raycasts until [`Self::unlock_gaze`].
    pub fn lock_gaze(&mut self, locked_on: bool) {
        self.gaze_lock = Some(locked_on);
    }

    pub fn unlock_gaze(&mut self) {
        self.gaze_lock = None;
    }

    pub fn is_gazed(&self) -> bool {
        self.is_gazed
    }

    fn animate_on_gaze(&mut self, hit: bool, app: &AppState) {
        let mode = app.session.config.animation_step_mode;
        let delta = app.frame.delta;
        let mut changed = false;

        if self.animate_on_gaze.animates_alpha() {
            let target = if hit { self.alpha_gazed } else { self.alpha };
            let step = mode.step(self.alpha_speed, delta);
            if let Some(alpha) = approach(self.current_alpha, target, step) {
                self.set_current_alpha(alpha);
                changed = true;
            }
        }

        if self.animate_on_gaze.animates_scale() {
            let target = if hit { self.scale_gazed } else { self.scale };
            let step = mode.step(self.scale_speed, delta);
            if let Some(scale) = approach(self.current_scale, target, step) {
                self.set_current_scale(scale);
                changed = true;
            }
        }

        if changed {
            self.request_update();
        }
    }

    pub(crate) fn set_current_alpha(&mut self, alpha: f32) {
        self.current_alpha = alpha;
        self.events.send(OverlayEvent::AlphaChanged(alpha));
    }

    pub(crate) fn set_current_scale(&mut self, scale: f32) {
        self.current_scale = scale;
        self.events.send(OverlayEvent::ScaleChanged(scale));
    }

    /// React to `animate_on_gaze` being switched. Returns true if it was.
    pub(crate) fn check_animation_changed(&mut self, app: &mut AppState) -> bool {
        if self.animate_on_gaze == self.applied.animation {
            return false;
        }
        self.stop_dodging();
        self.applied.animation = self.animate_on_gaze;
        app.input_state.eligibility.set_gaze(
            InteractTarget::Overlay(self.id),
            self.animate_on_gaze != AnimationType::DodgeGaze,
        );
        self.events
            .send(OverlayEvent::AnimationChanged(self.animate_on_gaze));
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::tests::test_app;

    #[test]
    fn approach_clamps() {
        assert_eq!(approach(0.95, 1.0, 0.1), Some(1.0));
        assert_eq!(approach(0.05, 0.0, 0.1), Some(0.0));
        assert_eq!(approach(0.5, 0.5, 0.1), None);
    }

    #[test]
    fn alpha_reaches_gazed_exactly() {
        let (mut app, _comp) = test_app();
        let mut overlay = OverlayState::new("fader");
        overlay.animate_on_gaze = AnimationType::Alpha;
        overlay.alpha = 0.0;
        overlay.alpha_gazed = 1.0;
        overlay.alpha_speed = 0.1;
        overlay.enable(&mut app).unwrap();
        overlay.update(&mut app);
        assert_eq!(overlay.current_alpha(), 0.0);

        for _ in 0..10 {
            overlay.update_gaze(true, &app);
            assert!(overlay.current_alpha() <= 1.0);
        }
        assert_eq!(overlay.current_alpha(), 1.0);

        overlay.update_gaze(true, &app);
        assert_eq!(overlay.current_alpha(), 1.0);

        for _ in 0..11 {
            overlay.update_gaze(false, &app);
            assert!(overlay.current_alpha() >= 0.0);
        }
        assert_eq!(overlay.current_alpha(), 0.0);
    }

    #[test]
    fn scale_returns_to_base() {
        let (mut app, _comp) = test_app();
        let mut overlay = OverlayState::new("grower");
        overlay.animate_on_gaze = AnimationType::Scale;
        overlay.scale = 1.0;
        overlay.scale_gazed = 1.25;
        overlay.scale_speed = 0.1;
        overlay.enable(&mut app).unwrap();
        overlay.update(&mut app);

        overlay.update_gaze(true, &app);
        overlay.update_gaze(true, &app);
        overlay.update_gaze(true, &app);
        assert_eq!(overlay.current_scale(), 1.25);

        for _ in 0..3 {
            overlay.update_gaze(false, &app);
        }
        assert_eq!(overlay.current_scale(), 1.0);
    }

    #[test]
    fn gaze_lock_overrides_raycast() {
        let (mut app, _comp) = test_app();
        let mut overlay = OverlayState::new("locked");
        overlay.animate_on_gaze = AnimationType::Alpha;
        overlay.alpha = 0.5;
        overlay.alpha_gazed = 1.0;
        overlay.alpha_speed = 0.25;
        overlay.enable(&mut app).unwrap();
        overlay.update(&mut app);

        overlay.lock_gaze(true);
        overlay.update_gaze(false, &app);
        assert!(overlay.is_gazed());
        assert_eq!(overlay.current_alpha(), 0.75);

        overlay.unlock_gaze();
        overlay.update_gaze(false, &app);
        assert_eq!(overlay.current_alpha(), 0.5);
    }

    #[test]
    fn per_second_steps_scale_by_delta() {
        let (mut app, _comp) = test_app();
        app.session.config.animation_step_mode = StepMode::PerSecond;
        app.frame.delta = 0.5;
        let mut overlay = OverlayState::new("timed");
        overlay.animate_on_gaze = AnimationType::Alpha;
        overlay.alpha = 0.0;
        overlay.alpha_gazed = 1.0;
        overlay.alpha_speed = 1.0;
        overlay.enable(&mut app).unwrap();
        overlay.update(&mut app);

        overlay.update_gaze(true, &app);
        assert_eq!(overlay.current_alpha(), 0.5);
    }
}
