use std::collections::VecDeque;

use glam::{Quat, Vec3};

use super::{animation::AnimationType, attachment::AttachmentDevice};

/// Notifications an overlay fires for its companions, delivered in fire order.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayEvent {
    Enabled,
    Disabled,
    AnimationChanged(AnimationType),
    PositionChanged(Vec3),
    RotationChanged(Quat),
    AlphaChanged(f32),
    ScaleChanged(f32),
    AspectChanged(f32),
    AnchorChanged(AttachmentDevice),
    AnchorRotationChanged(Quat),
    AttachmentChanged,
}

/// Notifications a companion fires for its parent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompanionEvent {
    Gazed(bool),
}

#[derive(Debug)]
pub struct EventQueue<DataType> {
    queue: VecDeque<DataType>,
}

impl<DataType> Default for EventQueue<DataType> {
    fn default() -> Self {
        Self::new()
    }
}

impl<DataType> EventQueue<DataType> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
        }
    }

    pub fn send(&mut self, message: DataType) {
        self.queue.push_back(message);
    }

    pub fn read(&mut self) -> Option<DataType> {
        self.queue.pop_front()
    }

    pub fn drain(&mut self) -> impl Iterator<Item = DataType> + '_ {
        self.queue.drain(..)
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}
