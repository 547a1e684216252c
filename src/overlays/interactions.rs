use std::time::Instant;

use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

use crate::{
    backend::input::{HapticPulse, TrackedDeviceRole},
    state::AppState,
};

use super::cursor::Cursor;

/// Axis-aligned rectangle in canvas units, origin at the canvas center, y up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub min: Vec2,
    pub max: Vec2,
}

impl Rect {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn from_center_size(center: Vec2, size: Vec2) -> Self {
        Self {
            min: center - size / 2.0,
            max: center + size / 2.0,
        }
    }

    pub fn contains(&self, p: Vec2) -> bool {
        p.x >= self.min.x && p.x <= self.max.x && p.y >= self.min.y && p.y <= self.max.y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WidgetKind {
    Button,
    Toggle,
    Slider,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PointerButton {
    #[default]
    Left,
    Right,
    Middle,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointerEvent {
    pub position: Vec2,
    pub dragging: bool,
    pub button: PointerButton,
}

impl PointerEvent {
    fn at(position: Vec2) -> Self {
        Self {
            position,
            dragging: false,
            button: PointerButton::Left,
        }
    }
}

/// A UI toolkit widget as the interaction pipeline sees it.
pub trait Widget {
    fn kind(&self) -> WidgetKind;
    fn interactable(&self) -> bool;
    fn bounds(&self) -> Rect;
    /// Current value, for sliders.
    fn value(&self) -> f32 {
        0.0
    }
    fn on_pointer_enter(&mut self, event: &PointerEvent);
    fn on_pointer_exit(&mut self, event: &PointerEvent);
    fn on_pointer_down(&mut self, event: &PointerEvent);
    fn on_pointer_up(&mut self, event: &PointerEvent);
    fn on_drag(&mut self, _event: &PointerEvent) {}
    /// Buttons run their action, toggles flip.
    fn on_click(&mut self, _event: &PointerEvent) {}
}

/// Hit area that differs from the widget's own rect, like a slider handle.
pub trait VisualBounds {
    fn bounds(&self) -> Rect;
}

pub struct Raycastable {
    pub widget: Box<dyn Widget>,
    pub handle: Option<Box<dyn VisualBounds>>,
}

impl Raycastable {
    pub fn new(widget: Box<dyn Widget>) -> Self {
        Self {
            widget,
            handle: None,
        }
    }

    pub fn with_handle(widget: Box<dyn Widget>, handle: Box<dyn VisualBounds>) -> Self {
        Self {
            widget,
            handle: Some(handle),
        }
    }

    fn hit_rect(&self) -> Rect {
        match &self.handle {
            Some(handle) => handle.bounds(),
            None => self.widget.bounds(),
        }
    }
}

/// Aiming only counts while `y > y_low` and `x_low < x < x_high`.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
pub struct AimLimit {
    pub y_low: f32,
    pub x_low: f32,
    pub x_high: f32,
}

impl AimLimit {
    pub fn contains(&self, p: Vec2) -> bool {
        p.y > self.y_low && p.x > self.x_low && p.x < self.x_high
    }
}

const NOT_AIMING: Vec2 = Vec2::new(-1.0, -1.0);

/// Turns controller ray hits on an interface companion into widget events.
pub struct CompanionInteraction {
    /// Canvas size in canvas units. Without one, aiming does nothing.
    pub canvas: Option<Vec2>,
    pub cursor: Option<Cursor>,
    pub aim_limit: Option<AimLimit>,
    raycastables: Vec<Raycastable>,
    aiming: bool,
    aim_pos: Vec2,
    hovered: SmallVec<[usize; 2]>,
    aimed: Option<usize>,
    clicked: Option<usize>,
    dragging: Option<usize>,
    slider_value: f32,
    last_aimed_at: Option<Instant>,
}

impl Default for CompanionInteraction {
    fn default() -> Self {
        Self::new()
    }
}

impl CompanionInteraction {
    pub fn new() -> Self {
        Self {
            canvas: None,
            cursor: None,
            aim_limit: None,
            raycastables: Vec::new(),
            aiming: false,
            aim_pos: NOT_AIMING,
            hovered: SmallVec::new(),
            aimed: None,
            clicked: None,
            dragging: None,
            slider_value: 0.0,
            last_aimed_at: None,
        }
    }

    /// Widgets are hit-tested in registration order.
    pub fn add_raycastable(&mut self, raycastable: Raycastable) -> usize {
        self.raycastables.push(raycastable);
        self.raycastables.len() - 1
    }

    pub fn raycastable(&self, idx: usize) -> Option<&Raycastable> {
        self.raycastables.get(idx)
    }

    pub fn is_aiming(&self) -> bool {
        self.aiming
    }

    pub fn aim_position(&self) -> Vec2 {
        self.aim_pos
    }

    pub fn aimed(&self) -> Option<usize> {
        self.aimed
    }

    pub fn clicked(&self) -> Option<usize> {
        self.clicked
    }

    pub fn dragging(&self) -> Option<usize> {
        self.dragging
    }

    pub fn last_aimed_at(&self) -> Option<Instant> {
        self.last_aimed_at
    }

    fn fade_in_cursor(&mut self) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.fade_in();
        }
    }

    fn fade_out_cursor(&mut self) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.fade_out();
        }
    }

    fn pulse(app: &mut AppState, device: TrackedDeviceRole, enter: bool) {
        let config = &app.session.config;
        if !config.haptics_enabled {
            return;
        }
        let haptics = if enter {
            config.widget_haptics
        } else {
            config.aim_haptics
        };
        app.input_state.haptics.push_back(HapticPulse {
            device,
            haptics: haptics.into(),
        });
    }

    /// A controller ray hits the companion at `uv` (0..1, v down).
    pub fn aim(&mut self, uv: Vec2, device: TrackedDeviceRole, app: &mut AppState) {
        let Some(canvas) = self.canvas else {
            return;
        };
        let pos = Vec2::new(-(canvas.x / 2.0) + canvas.x * uv.x, canvas.y / 2.0 - canvas.y * uv.y);

        if self.aim_limit.map_or(true, |limit| limit.contains(pos)) {
            self.aim_action(pos, device, app);
        } else {
            self.fade_out_cursor();
            self.aiming = false;
            self.aimed = None;
        }

        if self.aim_pos == pos {
            return;
        }
        self.aim_pos = pos;

        if !self.aiming || self.dragging.is_some() {
            return;
        }

        let event = PointerEvent::at(pos);
        self.aimed = None;
        for (idx, r) in self.raycastables.iter_mut().enumerate() {
            if !r.widget.interactable() || !r.hit_rect().contains(pos) {
                continue;
            }
            if !self.hovered.contains(&idx) {
                self.hovered.push(idx);
                r.widget.on_pointer_enter(&event);
                Self::pulse(app, device, true);
            }
            self.aimed = Some(idx);
            break;
        }

        for &idx in &self.hovered {
            if Some(idx) == self.aimed {
                continue;
            }
            let widget = &mut self.raycastables[idx].widget;
            if widget.interactable() {
                widget.on_pointer_exit(&event);
            }
        }

        self.hovered.clear();
        if let Some(idx) = self.aimed {
            self.hovered.push(idx);
        }
    }

    fn aim_action(&mut self, pos: Vec2, device: TrackedDeviceRole, app: &mut AppState) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.position = Vec3::new(pos.x, pos.y, -10.0);
        }
        self.fade_in_cursor();
        self.last_aimed_at = Some(Instant::now());
        if !self.aiming {
            Self::pulse(app, device, false);
        }
        self.aiming = true;
    }

    /// The controller ray left the companion.
    pub fn unaim(&mut self) {
        if !self.aiming {
            return;
        }
        self.aimed = None;
        self.aiming = false;
        self.aim_pos = NOT_AIMING;
        self.fade_out_cursor();
    }

    /// Trigger pressed or held this frame.
    pub fn trigger_down(&mut self) {
        if !self.aiming {
            return;
        }
        let Some(aimed) = self.aimed else {
            return;
        };
        let event = PointerEvent {
            position: self.aim_pos,
            dragging: true,
            button: PointerButton::Left,
        };

        if self.clicked.is_none() {
            let widget = &mut self.raycastables[aimed].widget;
            if !widget.interactable() {
                return;
            }
            self.clicked = Some(aimed);
            widget.on_pointer_down(&event);
            if widget.kind() == WidgetKind::Slider {
                self.dragging = Some(aimed);
                self.slider_value = widget.value();
            }
            return;
        }

        let Some(dragging) = self.dragging else {
            return;
        };
        let widget = &mut self.raycastables[dragging].widget;
        widget.on_drag(&event);
        let value = widget.value();
        if value != self.slider_value {
            log::trace!("slider {} value {} -> {}", dragging, self.slider_value, value);
            self.slider_value = value;
        }
    }

    pub fn trigger_up(&mut self) {
        let Some(clicked) = self.clicked.take() else {
            return;
        };
        self.dragging = None;

        let event = PointerEvent::at(self.aim_pos);
        let widget = &mut self.raycastables[clicked].widget;
        widget.on_pointer_up(&event);

        if self.aimed == Some(clicked)
            && widget.interactable()
            && matches!(widget.kind(), WidgetKind::Button | WidgetKind::Toggle)
        {
            widget.on_click(&event);
        }
    }

    pub fn tick(&mut self, delta: f32) {
        if let Some(cursor) = self.cursor.as_mut() {
            cursor.tick(delta);
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{cell::RefCell, rc::Rc, time::Duration};

    use super::*;
    use crate::state::tests::test_app;

    pub(crate) type Log = Rc<RefCell<Vec<String>>>;

    pub(crate) struct TestWidget {
        pub name: &'static str,
        pub kind: WidgetKind,
        pub rect: Rect,
        pub interactable: bool,
        pub value: f32,
        pub log: Log,
    }

    impl TestWidget {
        pub(crate) fn boxed(name: &'static str, kind: WidgetKind, rect: Rect, log: &Log) -> Box<Self> {
            Box::new(Self {
                name,
                kind,
                rect,
                interactable: true,
                value: 0.0,
                log: log.clone(),
            })
        }

        fn record(&self, what: &str) {
            self.log.borrow_mut().push(format!("{}:{}", self.name, what));
        }
    }

    impl Widget for TestWidget {
        fn kind(&self) -> WidgetKind {
            self.kind
        }
        fn interactable(&self) -> bool {
            self.interactable
        }
        fn bounds(&self) -> Rect {
            self.rect
        }
        fn value(&self) -> f32 {
            self.value
        }
        fn on_pointer_enter(&mut self, _event: &PointerEvent) {
            self.record("enter");
        }
        fn on_pointer_exit(&mut self, _event: &PointerEvent) {
            self.record("exit");
        }
        fn on_pointer_down(&mut self, _event: &PointerEvent) {
            self.record("down");
        }
        fn on_pointer_up(&mut self, _event: &PointerEvent) {
            self.record("up");
        }
        fn on_drag(&mut self, event: &PointerEvent) {
            self.value = event.position.x;
            self.record("drag");
        }
        fn on_click(&mut self, _event: &PointerEvent) {
            self.record("click");
        }
    }

    struct Handle(Rect);

    impl VisualBounds for Handle {
        fn bounds(&self) -> Rect {
            self.0
        }
    }

    fn rect(x0: f32, y0: f32, x1: f32, y1: f32) -> Rect {
        Rect::new(Vec2::new(x0, y0), Vec2::new(x1, y1))
    }

    /// 200x100 canvas; uv (0.5, 0.5) is the origin.
    fn interaction() -> CompanionInteraction {
        let mut i = CompanionInteraction::new();
        i.canvas = Some(Vec2::new(200.0, 100.0));
        i.cursor = Some(Cursor::new(0.1, Duration::from_millis(25)));
        i
    }

    fn uv(x: f32, y: f32) -> Vec2 {
        Vec2::new((x + 100.0) / 200.0, (50.0 - y) / 100.0)
    }

    fn entries(log: &Log) -> Vec<String> {
        log.borrow_mut().drain(..).collect()
    }

    const RIGHT: TrackedDeviceRole = TrackedDeviceRole::RightHand;

    #[test]
    fn uv_maps_to_centered_canvas() {
        let (mut app, _comp) = test_app();
        let mut i = interaction();
        i.aim(Vec2::new(0.0, 0.0), RIGHT, &mut app);
        assert_eq!(i.aim_position(), Vec2::new(-100.0, 50.0));
        i.aim(Vec2::new(1.0, 1.0), RIGHT, &mut app);
        assert_eq!(i.aim_position(), Vec2::new(100.0, -50.0));
        let cursor = i.cursor.as_ref().unwrap();
        assert_eq!(cursor.position, Vec3::new(100.0, -50.0, -10.0));
        assert!(cursor.is_visible());
    }

    #[test]
    fn first_registered_match_wins() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "a",
            WidgetKind::Button,
            rect(-50.0, -20.0, 50.0, 20.0),
            &log,
        )));
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "b",
            WidgetKind::Button,
            rect(-10.0, -10.0, 10.0, 10.0),
            &log,
        )));

        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        assert_eq!(i.aimed(), Some(0));
        assert_eq!(entries(&log), vec!["a:enter"]);
    }

    #[test]
    fn non_interactable_is_skipped() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        let mut disabled =
            TestWidget::boxed("a", WidgetKind::Button, rect(-50.0, -20.0, 50.0, 20.0), &log);
        disabled.interactable = false;
        i.add_raycastable(Raycastable::new(disabled));
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "b",
            WidgetKind::Button,
            rect(-10.0, -10.0, 10.0, 10.0),
            &log,
        )));

        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        assert_eq!(i.aimed(), Some(1));
    }

    #[test]
    fn handle_bounds_take_precedence() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        i.add_raycastable(Raycastable::with_handle(
            TestWidget::boxed("slider", WidgetKind::Slider, rect(-90.0, -5.0, 90.0, 5.0), &log),
            Box::new(Handle(rect(60.0, -10.0, 70.0, 10.0))),
        ));

        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        assert_eq!(i.aimed(), None);
        i.aim(uv(65.0, 8.0), RIGHT, &mut app);
        assert_eq!(i.aimed(), Some(0));
    }

    #[test]
    fn enter_once_then_exit() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "a",
            WidgetKind::Button,
            rect(-50.0, -20.0, 50.0, 20.0),
            &log,
        )));

        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        i.aim(uv(1.0, 0.0), RIGHT, &mut app);
        assert_eq!(entries(&log), vec!["a:enter"]);

        i.aim(uv(80.0, 40.0), RIGHT, &mut app);
        assert_eq!(entries(&log), vec!["a:exit"]);
        assert_eq!(i.aimed(), None);
    }

    #[test]
    fn haptics_on_first_aim_and_enter() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "a",
            WidgetKind::Button,
            rect(-50.0, -20.0, 50.0, 20.0),
            &log,
        )));

        i.aim(uv(80.0, 40.0), RIGHT, &mut app);
        assert_eq!(app.input_state.haptics.len(), 1);
        i.aim(uv(81.0, 40.0), RIGHT, &mut app);
        assert_eq!(app.input_state.haptics.len(), 1);
        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        assert_eq!(app.input_state.haptics.len(), 2);
        assert_eq!(app.input_state.haptics[1].device, RIGHT);

        app.input_state.haptics.clear();
        app.session.config.haptics_enabled = false;
        i.unaim();
        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        assert!(app.input_state.haptics.is_empty());
    }

    #[test]
    fn button_click_activates() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "ok",
            WidgetKind::Button,
            rect(-50.0, -20.0, 50.0, 20.0),
            &log,
        )));

        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        i.trigger_down();
        i.trigger_down();
        i.trigger_up();
        assert_eq!(entries(&log), vec!["ok:enter", "ok:down", "ok:up", "ok:click"]);
        assert_eq!(i.clicked(), None);
    }

    #[test]
    fn release_off_widget_does_not_activate() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "ok",
            WidgetKind::Toggle,
            rect(-50.0, -20.0, 50.0, 20.0),
            &log,
        )));

        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        i.trigger_down();
        i.aim(uv(80.0, 40.0), RIGHT, &mut app);
        i.trigger_up();
        assert_eq!(entries(&log), vec!["ok:enter", "ok:down", "ok:exit", "ok:up"]);
        assert_eq!(i.clicked(), None);
    }

    #[test]
    fn slider_drags_while_held() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "vol",
            WidgetKind::Slider,
            rect(-90.0, -10.0, 90.0, 10.0),
            &log,
        )));

        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        i.trigger_down();
        assert_eq!(i.dragging(), Some(0));

        i.aim(uv(30.0, 0.0), RIGHT, &mut app);
        i.trigger_down();
        assert_eq!(i.raycastable(0).unwrap().widget.value(), 30.0);
        assert_eq!(i.aimed(), Some(0));

        i.trigger_up();
        assert_eq!(i.dragging(), None);
        assert_eq!(
            entries(&log),
            vec!["vol:enter", "vol:down", "vol:drag", "vol:up"]
        );
    }

    #[test]
    fn aim_limit_stops_aiming() {
        let (mut app, _comp) = test_app();
        let log = Log::default();
        let mut i = interaction();
        i.aim_limit = Some(AimLimit {
            y_low: -40.0,
            x_low: -90.0,
            x_high: 90.0,
        });
        i.add_raycastable(Raycastable::new(TestWidget::boxed(
            "a",
            WidgetKind::Button,
            rect(-50.0, -50.0, 50.0, 20.0),
            &log,
        )));

        i.aim(uv(0.0, 0.0), RIGHT, &mut app);
        assert!(i.is_aiming());
        assert_eq!(i.aimed(), Some(0));

        i.aim(uv(0.0, -45.0), RIGHT, &mut app);
        assert!(!i.is_aiming());
        assert_eq!(i.aimed(), None);
        i.trigger_down();
        assert_eq!(i.clicked(), None);
    }

    #[test]
    fn unaim_resets_and_fades() {
        let (mut app, _comp) = test_app();
        let mut i = interaction();
        i.aim(uv(10.0, 10.0), RIGHT, &mut app);
        assert!(i.last_aimed_at().is_some());
        i.unaim();
        assert!(!i.is_aiming());
        assert_eq!(i.aim_position(), Vec2::new(-1.0, -1.0));
        i.tick(1.0);
        assert!(!i.cursor.as_ref().unwrap().is_visible());
    }

    #[test]
    fn missing_canvas_ignores_aim() {
        let (mut app, _comp) = test_app();
        let mut i = CompanionInteraction::new();
        i.aim(Vec2::splat(0.5), RIGHT, &mut app);
        assert!(!i.is_aiming());
    }
}
