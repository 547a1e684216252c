use std::sync::Arc;

use glam::{Vec2, Vec3, Vec4};
use slotmap::HopSlotMap;

use crate::{
    config::OverlayConfig,
    overlays::{
        companion::{euler_degrees, CompanionMode, CompanionOverlay},
        events::CompanionEvent,
    },
    state::AppState,
};

use super::{
    input::{InteractTarget, TrackedDeviceRole},
    overlay::{CompanionID, OverlayID, OverlayState},
};

/// One controller ray hitting an overlay or companion this frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AimSample {
    pub target: InteractTarget,
    pub device: TrackedDeviceRole,
    pub uv: Vec2,
}

/// Raycast results for one frame, as reported by the tracking service.
/// Eligible targets missing from `gaze` count as not gazed at.
#[derive(Debug, Clone, Default)]
pub struct FrameInput {
    pub gaze: Vec<(InteractTarget, bool)>,
    pub aim: Vec<AimSample>,
}

impl FrameInput {
    fn gazed(&self, target: InteractTarget) -> bool {
        self.gaze.iter().any(|(t, hit)| *t == target && *hit)
    }

    fn aimed(&self, target: InteractTarget) -> Option<&AimSample> {
        self.aim.iter().find(|a| a.target == target)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameReport {
    pub overlay_pushes: usize,
    pub companion_pushes: usize,
}

#[derive(Clone, Debug)]
pub enum OverlaySelector {
    Id(OverlayID),
    Name(Arc<str>),
}

pub struct OverlayContainer {
    overlays: HopSlotMap<OverlayID, OverlayState>,
    companions: HopSlotMap<CompanionID, CompanionOverlay>,
    next_texture_id: u64,
}

impl OverlayContainer {
    /// Build every configured overlay and companion, enabling the ones that ask for it.
    /// Companions come up with their parent on its first frame.
    pub fn new(app: &mut AppState) -> anyhow::Result<Self> {
        let mut me = Self {
            overlays: HopSlotMap::with_key(),
            companions: HopSlotMap::with_key(),
            next_texture_id: 1,
        };

        let general = app.session.config.clone();
        for config in &general.overlays {
            let state = me.create_overlay(config);
            let id = me.add(state);
            for companion_config in &config.companions {
                let mut companion = CompanionOverlay::from_config(id, companion_config, &general);
                companion.texture = companion_config
                    .texture
                    .map(|t| t.texture_ref(me.texture_id()));
                me.add_companion(companion);
            }
            if config.enabled {
                if let Some(overlay) = me.overlays.get_mut(id) {
                    if let Err(e) = overlay.enable(app) {
                        log::warn!("{}: Overlay stays disabled: {}", overlay.name, e);
                    }
                }
            }
        }
        log::info!(
            "Loaded {} overlays with {} companions",
            me.overlays.len(),
            me.companions.len()
        );
        Ok(me)
    }

    fn texture_id(&mut self) -> u64 {
        let id = self.next_texture_id;
        self.next_texture_id += 1;
        id
    }

    fn create_overlay(&mut self, config: &OverlayConfig) -> OverlayState {
        let mut state = OverlayState::new(&config.name);
        state.texture = config.texture.map(|t| t.texture_ref(self.texture_id()));
        state.uv_offset = Vec4::from(config.uv_offset);
        state.alpha = config.alpha;
        state.alpha_gazed = config.alpha_gazed;
        state.alpha_speed = config.alpha_speed;
        state.scale = config.scale;
        state.scale_gazed = config.scale_gazed;
        state.scale_speed = config.scale_speed;
        state.high_quality = config.high_quality;
        state.antialias = config.antialias;
        state.curved = config.curved;
        state.curved_range = Vec2::from(config.curved_range);
        state.input_method = config.input_method;
        state.animate_on_gaze = config.animate_on_gaze;
        state.dodge_offset = Vec2::from(config.dodge_offset);
        state.dodge_speed = config.dodge_speed;
        state.anchor_device = config.anchor_device;
        state.anchor_point = config.anchor_point;
        state.anchor_offset = Vec3::from(config.anchor_offset);
        state.object.rotation = euler_degrees(config.rotation);
        state
    }

    pub fn add(&mut self, mut state: OverlayState) -> OverlayID {
        self.overlays.insert_with_key(|id| {
            state.id = id;
            state
        })
    }

    pub fn add_companion(&mut self, mut companion: CompanionOverlay) -> CompanionID {
        self.companions.insert_with_key(|id| {
            companion.id = id;
            companion
        })
    }

    pub fn get_by_id(&self, id: OverlayID) -> Option<&OverlayState> {
        self.overlays.get(id)
    }

    pub fn mut_by_id(&mut self, id: OverlayID) -> Option<&mut OverlayState> {
        self.overlays.get_mut(id)
    }

    pub fn get_by_name<'a>(&'a self, name: &str) -> Option<&'a OverlayState> {
        self.overlays.values().find(|o| *o.name == *name)
    }

    pub fn mut_by_name<'a>(&'a mut self, name: &str) -> Option<&'a mut OverlayState> {
        self.overlays.values_mut().find(|o| *o.name == *name)
    }

    pub fn mut_by_selector(&mut self, selector: &OverlaySelector) -> Option<&mut OverlayState> {
        match selector {
            OverlaySelector::Id(id) => self.mut_by_id(*id),
            OverlaySelector::Name(name) => self.mut_by_name(name),
        }
    }

    pub fn lookup(&self, name: &str) -> Option<OverlayID> {
        self.overlays
            .iter()
            .find(|(_, v)| v.name.as_ref() == name)
            .map(|(k, _)| k)
    }

    pub fn lookup_companion(&self, name: &str) -> Option<CompanionID> {
        self.companions
            .iter()
            .find(|(_, v)| v.name.as_ref() == name)
            .map(|(k, _)| k)
    }

    pub fn companion(&self, id: CompanionID) -> Option<&CompanionOverlay> {
        self.companions.get(id)
    }

    pub fn companion_mut(&mut self, id: CompanionID) -> Option<&mut CompanionOverlay> {
        self.companions.get_mut(id)
    }

    pub fn values(&self) -> impl Iterator<Item = &'_ OverlayState> {
        self.overlays.values()
    }

    pub fn companions(&self) -> impl Iterator<Item = &'_ CompanionOverlay> {
        self.companions.values()
    }

    pub fn disable_all(&mut self, app: &mut AppState) {
        for companion in self.companions.values_mut() {
            companion.disable(app);
        }
        for overlay in self.overlays.values_mut() {
            overlay.disable(app);
            overlay.events.drain().for_each(drop);
        }
    }

    /// Run one frame: input, parents, notifications, companions, interaction, cursors.
    pub fn frame(&mut self, app: &mut AppState, input: &FrameInput) -> FrameReport {
        let mut report = FrameReport::default();

        while let Some(change) = app.input_state.devices.pop_change() {
            log::debug!("{:?} is now {:?}", change.role, change.index);
            for overlay in self.overlays.values_mut() {
                overlay.on_controller_index_changed(change.role);
            }
        }

        for (id, overlay) in self.overlays.iter_mut() {
            let target = InteractTarget::Overlay(id);
            if app.input_state.eligibility.can_gaze(target) {
                overlay.update_gaze(input.gazed(target), app);
            }
        }
        for (id, companion) in self.companions.iter_mut() {
            let target = InteractTarget::Companion(id);
            if app.input_state.eligibility.can_gaze(target) {
                companion.update_gaze(input.gazed(target));
            }
            while let Some(CompanionEvent::Gazed(hit)) = companion.events.read() {
                if companion.mode != CompanionMode::DodgeOnGaze {
                    continue;
                }
                if let Some(parent) = self.overlays.get_mut(companion.parent) {
                    parent.gaze_detector_gazed(hit);
                }
            }
        }

        let mut notifications = Vec::with_capacity(self.overlays.len());
        for (id, overlay) in self.overlays.iter_mut() {
            let pushed = overlay.update(app);
            if pushed {
                report.overlay_pushes += 1;
            }
            let events: Vec<_> = overlay.events.drain().collect();
            notifications.push((id, pushed, events));
        }

        for (id, pushed, events) in notifications {
            let Some(overlay) = self.overlays.get(id) else {
                continue;
            };
            for companion in self.companions.values_mut().filter(|c| c.parent == id) {
                for event in &events {
                    companion.on_parent_event(*event, overlay, app);
                }
                if pushed {
                    companion.request_update();
                }
                if companion.update(overlay, app) {
                    report.companion_pushes += 1;
                }
            }
        }

        for (id, overlay) in self.overlays.iter_mut() {
            let target = InteractTarget::Overlay(id);
            if app.input_state.eligibility.can_aim(target) {
                overlay.set_aimed_uv(input.aimed(target).map(|a| a.uv));
            }
        }
        for (id, companion) in self.companions.iter_mut() {
            let target = InteractTarget::Companion(id);
            if !app.input_state.eligibility.can_aim(target) {
                continue;
            }
            match input.aimed(target) {
                Some(sample) => companion.aim(sample.uv, sample.device, app),
                None => companion.unaim(),
            }
        }

        for pointer in &app.input_state.pointers {
            let (held, released) = (pointer.trigger_held(), pointer.trigger_released());
            if !held && !released {
                continue;
            }
            for companion in self.companions.values_mut() {
                if held {
                    companion.trigger_down();
                } else {
                    companion.trigger_up();
                }
            }
        }

        let delta = app.frame.delta;
        for companion in self.companions.values_mut() {
            companion.interaction.tick(delta);
        }

        report
    }
}
