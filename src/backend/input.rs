use std::collections::{HashSet, VecDeque};

use super::{
    compositor::{TrackedDeviceIndex, TRACKED_DEVICE_INDEX_HMD},
    overlay::{CompanionID, OverlayID},
};

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TrackedDeviceRole {
    None,
    Hmd,
    LeftHand,
    RightHand,
    Tracker,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControllerIndexChanged {
    pub role: TrackedDeviceRole,
    pub index: Option<TrackedDeviceIndex>,
}

/// Live device indices as reported by the tracking service.
#[derive(Debug)]
pub struct TrackedDeviceRegistry {
    hmd: TrackedDeviceIndex,
    left: Option<TrackedDeviceIndex>,
    right: Option<TrackedDeviceIndex>,
    changes: VecDeque<ControllerIndexChanged>,
}

impl Default for TrackedDeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl TrackedDeviceRegistry {
    pub fn new() -> Self {
        Self {
            hmd: TRACKED_DEVICE_INDEX_HMD,
            left: None,
            right: None,
            changes: VecDeque::new(),
        }
    }

    pub fn hmd_index(&self) -> TrackedDeviceIndex {
        self.hmd
    }

    pub fn left_index(&self) -> Option<TrackedDeviceIndex> {
        self.left
    }

    pub fn right_index(&self) -> Option<TrackedDeviceIndex> {
        self.right
    }

    pub fn index_for_role(&self, role: TrackedDeviceRole) -> Option<TrackedDeviceIndex> {
        match role {
            TrackedDeviceRole::Hmd => Some(self.hmd),
            TrackedDeviceRole::LeftHand => self.left,
            TrackedDeviceRole::RightHand => self.right,
            _ => None,
        }
    }

    /// Returns true and queues a change notification if the index differs.
    pub fn set_controller_index(
        &mut self,
        role: TrackedDeviceRole,
        index: Option<TrackedDeviceIndex>,
    ) -> bool {
        let slot = match role {
            TrackedDeviceRole::LeftHand => &mut self.left,
            TrackedDeviceRole::RightHand => &mut self.right,
            _ => {
                log::warn!("Ignoring index update for non-controller role {:?}", role);
                return false;
            }
        };
        if *slot == index {
            return false;
        }
        log::debug!("{:?} controller index: {:?} -> {:?}", role, *slot, index);
        *slot = index;
        self.changes
            .push_back(ControllerIndexChanged { role, index });
        true
    }

    pub fn pop_change(&mut self) -> Option<ControllerIndexChanged> {
        self.changes.pop_front()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Haptics {
    pub intensity: f32,
    pub duration: f32,
    pub frequency: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HapticPulse {
    pub device: TrackedDeviceRole,
    pub haptics: Haptics,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PointerState {
    pub click: bool,
}

pub struct Pointer {
    pub role: TrackedDeviceRole,
    pub now: PointerState,
    pub before: PointerState,
}

impl Pointer {
    pub fn new(role: TrackedDeviceRole) -> Self {
        Self {
            role,
            now: PointerState::default(),
            before: PointerState::default(),
        }
    }

    /// Trigger is down this frame (pressed or held).
    pub fn trigger_held(&self) -> bool {
        self.now.click
    }

    pub fn trigger_released(&self) -> bool {
        !self.now.click && self.before.click
    }
}

/// Something that can be the target of a gaze or aim raycast.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractTarget {
    Overlay(OverlayID),
    Companion(CompanionID),
}

#[derive(Debug, Default)]
pub struct InteractionEligibility {
    gaze: HashSet<InteractTarget>,
    aim: HashSet<InteractTarget>,
}

impl InteractionEligibility {
    pub fn set_gaze(&mut self, target: InteractTarget, eligible: bool) {
        if eligible {
            self.gaze.insert(target);
        } else {
            self.gaze.remove(&target);
        }
    }

    pub fn set_aim(&mut self, target: InteractTarget, eligible: bool) {
        if eligible {
            self.aim.insert(target);
        } else {
            self.aim.remove(&target);
        }
    }

    pub fn can_gaze(&self, target: InteractTarget) -> bool {
        self.gaze.contains(&target)
    }

    pub fn can_aim(&self, target: InteractTarget) -> bool {
        self.aim.contains(&target)
    }
}

pub struct InputState {
    pub devices: TrackedDeviceRegistry,
    pub pointers: [Pointer; 2],
    pub eligibility: InteractionEligibility,
    pub haptics: VecDeque<HapticPulse>,
}

impl Default for InputState {
    fn default() -> Self {
        Self::new()
    }
}

impl InputState {
    pub fn new() -> Self {
        Self {
            devices: TrackedDeviceRegistry::new(),
            pointers: [
                Pointer::new(TrackedDeviceRole::LeftHand),
                Pointer::new(TrackedDeviceRole::RightHand),
            ],
            eligibility: InteractionEligibility::default(),
            haptics: VecDeque::new(),
        }
    }

    pub fn pre_update(&mut self) {
        self.pointers[0].before = self.pointers[0].now;
        self.pointers[1].before = self.pointers[1].now;
    }

    pub fn pointer_mut(&mut self, role: TrackedDeviceRole) -> Option<&mut Pointer> {
        self.pointers.iter_mut().find(|p| p.role == role)
    }
}
