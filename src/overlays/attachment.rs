use std::{
    f32::consts::{FRAC_PI_2, PI},
    str::FromStr,
};

use glam::{Quat, Vec3};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumIter, IntoEnumIterator};
use thiserror::Error;

use crate::{
    backend::{input::TrackedDeviceRole, overlay::OverlayState},
    state::AppState,
};

use super::events::OverlayEvent;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AttachmentError {
    #[error("invalid attachment device: {0}")]
    InvalidDevice(String),
    #[error("invalid attachment point: {0}")]
    InvalidPoint(String),
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize, EnumIter, AsRefStr,
)]
pub enum AttachmentDevice {
    #[default]
    World,
    Screen,
    LeftController,
    RightController,
}

impl AttachmentDevice {
    pub fn controller_role(self) -> Option<TrackedDeviceRole> {
        match self {
            AttachmentDevice::LeftController => Some(TrackedDeviceRole::LeftHand),
            AttachmentDevice::RightController => Some(TrackedDeviceRole::RightHand),
            _ => None,
        }
    }

    pub fn is_controller(self) -> bool {
        self.controller_role().is_some()
    }
}

/// Where on a controller an overlay is mounted. Ignored for World and Screen.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Deserialize, Serialize, EnumIter, AsRefStr,
)]
pub enum AttachmentPoint {
    /// Center of the controller, facing up through the trackpad.
    #[default]
    Center,
    /// Past the tip of the controller, facing the center.
    FlatAbove,
    /// Below the grip, facing away from the center.
    FlatBelow,
    /// Below the grip, facing the center.
    FlatBelowFlipped,
    Above,
    AboveFlipped,
    Below,
    BelowFlipped,
    Up,
    Down,
    Left,
    Right,
}

fn parse_variant<T: IntoEnumIterator + AsRef<str>>(s: &str) -> Option<T> {
    T::iter().find(|v| v.as_ref().eq_ignore_ascii_case(s))
}

impl FromStr for AttachmentDevice {
    type Err = AttachmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant(s).ok_or_else(|| AttachmentError::InvalidDevice(s.to_string()))
    }
}

impl FromStr for AttachmentPoint {
    type Err = AttachmentError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_variant(s).ok_or_else(|| AttachmentError::InvalidPoint(s.to_string()))
    }
}

impl TryFrom<i32> for AttachmentDevice {
    type Error = AttachmentError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::iter().nth(i))
            .ok_or_else(|| AttachmentError::InvalidDevice(value.to_string()))
    }
}

impl TryFrom<i32> for AttachmentPoint {
    type Error = AttachmentError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        usize::try_from(value)
            .ok()
            .and_then(|i| Self::iter().nth(i))
            .ok_or_else(|| AttachmentError::InvalidPoint(value.to_string()))
    }
}

/// A device, a mount point and a local offset: everything `attach_to` takes.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Attachment {
    pub device: AttachmentDevice,
    pub point: AttachmentPoint,
    pub offset: Vec3,
}

/// Reference position and anchor rotation for an overlay mounted on a controller.
///
/// The offset is nudged along the controller's axes by the mount point, then
/// swizzled into the overlay's frame.
pub fn controller_attachment(point: AttachmentPoint, offset: Vec3) -> (Vec3, Quat) {
    let Vec3 {
        x: mut dx,
        y: mut dy,
        z: mut dz,
    } = offset;

    match point {
        AttachmentPoint::Center => {}
        AttachmentPoint::FlatAbove => dz += 0.05,
        AttachmentPoint::FlatBelow => dz -= 0.18,
        AttachmentPoint::FlatBelowFlipped => dz += 0.18,
        AttachmentPoint::Above => dz -= 0.01,
        AttachmentPoint::AboveFlipped => dz += 0.01,
        AttachmentPoint::Below => dz += 0.1,
        AttachmentPoint::BelowFlipped => dz -= 0.1,
        AttachmentPoint::Up => dy += 0.5,
        AttachmentPoint::Down => dy -= 0.5,
        AttachmentPoint::Left => dx -= 0.5,
        AttachmentPoint::Right => dx += 0.5,
    }

    match point {
        AttachmentPoint::FlatAbove | AttachmentPoint::FlatBelow => {
            (Vec3::new(dx, dy, dz), Quat::IDENTITY)
        }
        AttachmentPoint::FlatBelowFlipped => (Vec3::new(dx, -dy, -dz), Quat::from_rotation_x(PI)),
        AttachmentPoint::AboveFlipped | AttachmentPoint::BelowFlipped => (
            Vec3::new(-dx, dz, dy),
            Quat::from_rotation_x(FRAC_PI_2) * Quat::from_rotation_y(PI),
        ),
        AttachmentPoint::Center
        | AttachmentPoint::Above
        | AttachmentPoint::Below
        | AttachmentPoint::Up
        | AttachmentPoint::Down
        | AttachmentPoint::Left
        | AttachmentPoint::Right => (Vec3::new(dx, -dz, dy), Quat::from_rotation_x(FRAC_PI_2)),
    }
}

impl OverlayState {
    /// Mount this overlay on `device`, sized to `scale` meters.
    ///
    /// Cancels any dodge in progress. For controllers, the anchor index is
    /// taken from the device registry at the time of the call.
    pub fn attach_to(
        &mut self,
        app: &AppState,
        device: AttachmentDevice,
        scale: f32,
        offset: Vec3,
        point: AttachmentPoint,
    ) {
        self.stop_dodging();

        let previous = self.applied.attachment.map(|a| a.device);
        if previous != Some(device) {
            self.events.send(OverlayEvent::AnchorChanged(device));
        }

        self.applied.attachment = Some(Attachment {
            device,
            point,
            offset,
        });
        self.anchor_device = device;
        self.anchor_point = point;
        self.anchor_offset = offset;
        self.scale = scale;

        self.events
            .send(OverlayEvent::AnchorRotationChanged(Quat::IDENTITY));

        match device.controller_role() {
            None => {
                self.anchor_index = None;
                self.anchor_rotation = Quat::IDENTITY;
                self.object.position = offset;
                self.reference = Default::default();
            }
            Some(role) => {
                self.anchor_index = app.input_state.devices.index_for_role(role);
                if self.anchor_index.is_none() {
                    log::debug!("{}: {:?} is not connected", self.name, role);
                }
                let (position, rotation) = controller_attachment(point, offset);
                self.reference.position = position;
                self.anchor_rotation = rotation;
                self.events
                    .send(OverlayEvent::AnchorRotationChanged(rotation));
                self.check_rotation_changed(true);
            }
        }

        log::debug!("{}: attached to {:?} at {:?}", self.name, device, point);
        self.events.send(OverlayEvent::AttachmentChanged);
    }
}
