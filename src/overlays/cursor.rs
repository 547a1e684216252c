use std::time::Duration;

use glam::Vec3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FadePhase {
    #[default]
    Idle,
    In,
    Out,
}

/// Cursor drawn on an interface companion's canvas.
///
/// Fades advance in fixed steps on a fixed interval; starting one direction
/// cancels the other.
#[derive(Debug, Clone)]
pub struct Cursor {
    pub position: Vec3,
    visible: bool,
    alpha: f32,
    phase: FadePhase,
    step: f32,
    interval: f32,
    elapsed: f32,
}

impl Cursor {
    pub fn new(step: f32, interval: Duration) -> Self {
        Self {
            position: Vec3::ZERO,
            visible: false,
            alpha: 0.0,
            phase: FadePhase::Idle,
            step: step.clamp(0.001, 1.0),
            interval: interval.as_secs_f32(),
            elapsed: 0.0,
        }
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }

    pub fn phase(&self) -> FadePhase {
        self.phase
    }

    pub fn fade_in(&mut self) {
        if self.phase == FadePhase::In {
            return;
        }
        self.phase = FadePhase::In;
        self.elapsed = 0.0;
        self.visible = true;
        self.advance();
    }

    pub fn fade_out(&mut self) {
        if self.phase == FadePhase::Out {
            return;
        }
        if !self.visible {
            self.phase = FadePhase::Idle;
            return;
        }
        self.phase = FadePhase::Out;
        self.elapsed = 0.0;
        self.advance();
    }

    /// Advance any running fade by `delta` seconds.
    pub fn tick(&mut self, delta: f32) {
        if self.phase == FadePhase::Idle {
            return;
        }
        self.elapsed += delta;
        while self.phase != FadePhase::Idle && self.elapsed >= self.interval {
            self.elapsed -= self.interval;
            self.advance();
        }
    }

    fn advance(&mut self) {
        match self.phase {
            FadePhase::Idle => {}
            FadePhase::In => {
                self.alpha = (self.alpha + self.step).min(1.0);
                if self.alpha >= 1.0 {
                    self.phase = FadePhase::Idle;
                }
            }
            FadePhase::Out => {
                self.alpha = (self.alpha - self.step).max(0.0);
                if self.alpha <= 0.0 {
                    self.visible = false;
                    self.phase = FadePhase::Idle;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cursor() -> Cursor {
        Cursor::new(0.1, Duration::from_millis(25))
    }

    #[test]
    fn fade_in_steps_on_interval() {
        let mut c = cursor();
        c.fade_in();
        assert!(c.is_visible());
        assert_eq!(c.alpha(), 0.1);

        c.tick(0.02);
        assert_eq!(c.alpha(), 0.1);
        c.tick(0.01);
        assert!((c.alpha() - 0.2).abs() < 1e-6);

        c.tick(1.0);
        assert_eq!(c.alpha(), 1.0);
        assert_eq!(c.phase(), FadePhase::Idle);
    }

    #[test]
    fn fade_out_hides_at_zero() {
        let mut c = cursor();
        c.fade_in();
        c.tick(1.0);
        c.fade_out();
        c.tick(1.0);
        assert_eq!(c.alpha(), 0.0);
        assert!(!c.is_visible());
    }

    #[test]
    fn fades_cancel_each_other() {
        let mut c = cursor();
        c.fade_in();
        c.tick(0.05);
        let mid = c.alpha();
        c.fade_out();
        assert_eq!(c.phase(), FadePhase::Out);
        assert!(c.alpha() < mid);
        c.fade_in();
        assert_eq!(c.phase(), FadePhase::In);
        assert!(c.is_visible());
    }

    #[test]
    fn fade_out_of_hidden_cursor_is_noop() {
        let mut c = cursor();
        c.fade_out();
        assert_eq!(c.phase(), FadePhase::Idle);
        assert!(!c.is_visible());
    }
}
