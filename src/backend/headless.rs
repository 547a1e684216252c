use std::{cell::RefCell, collections::HashMap, rc::Rc};

use glam::{Vec2, Vec3};

use super::compositor::{
    Affine3AConvert, Compositor, InputMethod, Matrix3x4, OverlayError, OverlayFlag,
    OverlayHandle, OverlayTransform, TextureBounds, TextureRef, TrackedDeviceIndex,
    TrackingUniverse,
};

/// What the compositor currently knows about one overlay.
#[derive(Debug, Clone)]
pub struct HeadlessOverlay {
    pub key: String,
    pub name: String,
    pub visible: bool,
    pub texture: Option<TextureRef>,
    pub color: Vec3,
    pub alpha: f32,
    pub width: f32,
    pub curve_range: Option<Vec2>,
    pub bounds: Option<TextureBounds>,
    pub mouse_scale: Option<Vec2>,
    pub input_method: InputMethod,
    pub transform: Option<OverlayTransform>,
    pub curved: bool,
    pub antialias: bool,
}

impl HeadlessOverlay {
    fn new(key: &str, name: &str) -> Self {
        Self {
            key: key.to_string(),
            name: name.to_string(),
            visible: false,
            texture: None,
            color: Vec3::ONE,
            alpha: 1.0,
            width: 1.0,
            curve_range: None,
            bounds: None,
            mouse_scale: None,
            input_method: InputMethod::None,
            transform: None,
            curved: false,
            antialias: false,
        }
    }
}

#[derive(Default)]
struct HeadlessData {
    next_handle: u64,
    overlays: HashMap<OverlayHandle, HeadlessOverlay>,
    high_quality: Option<OverlayHandle>,
    calls: HashMap<&'static str, usize>,
    fail_create: Option<OverlayError>,
}

impl HeadlessData {
    fn record(&mut self, call: &'static str) {
        log::trace!("headless: {}", call);
        *self.calls.entry(call).or_default() += 1;
    }

    fn overlay_mut(&mut self, handle: OverlayHandle) -> Result<&mut HeadlessOverlay, OverlayError> {
        self.overlays
            .get_mut(&handle)
            .ok_or(OverlayError::UnknownOverlay)
    }

    fn alloc_handle(&mut self) -> OverlayHandle {
        self.next_handle += 1;
        OverlayHandle(self.next_handle)
    }
}

/// In-memory compositor that records every request.
///
/// Clones share state, so a test can keep one clone for inspection while the
/// [`crate::state::AppState`] owns another.
#[derive(Clone, Default)]
pub struct HeadlessCompositor {
    data: Rc<RefCell<HeadlessData>>,
}

impl HeadlessCompositor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of times `call` (the trait method name) was issued.
    pub fn calls(&self, call: &str) -> usize {
        self.data.borrow().calls.get(call).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.data.borrow().calls.values().sum()
    }

    pub fn call_counts(&self) -> Vec<(&'static str, usize)> {
        let mut counts: Vec<_> = self
            .data
            .borrow()
            .calls
            .iter()
            .map(|(k, v)| (*k, *v))
            .collect();
        counts.sort();
        counts
    }

    pub fn reset_calls(&self) {
        self.data.borrow_mut().calls.clear();
    }

    pub fn overlay(&self, handle: OverlayHandle) -> Option<HeadlessOverlay> {
        self.data.borrow().overlays.get(&handle).cloned()
    }

    pub fn overlay_by_name(&self, name: &str) -> Option<HeadlessOverlay> {
        self.data
            .borrow()
            .overlays
            .values()
            .find(|o| o.name == name)
            .cloned()
    }

    pub fn overlay_count(&self) -> usize {
        self.data.borrow().overlays.len()
    }

    /// Make the next `create_overlay` calls fail with `error`.
    pub fn fail_create(&self, error: Option<OverlayError>) {
        self.data.borrow_mut().fail_create = error;
    }

    /// Re-issue the overlay under a fresh handle, leaving `handle` stale.
    pub fn reissue_handle(&self, handle: OverlayHandle) -> Option<OverlayHandle> {
        let mut data = self.data.borrow_mut();
        let overlay = data.overlays.remove(&handle)?;
        let new_handle = data.alloc_handle();
        if data.high_quality == Some(handle) {
            data.high_quality = Some(new_handle);
        }
        data.overlays.insert(new_handle, overlay);
        Some(new_handle)
    }
}

impl Compositor for HeadlessCompositor {
    fn create_overlay(&mut self, key: &str, name: &str) -> Result<OverlayHandle, OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("create_overlay");
        if let Some(e) = data.fail_create {
            return Err(e);
        }
        if data.overlays.values().any(|o| o.key == key) {
            return Err(OverlayError::KeyInUse);
        }
        let handle = data.alloc_handle();
        data.overlays.insert(handle, HeadlessOverlay::new(key, name));
        Ok(handle)
    }

    fn destroy_overlay(&mut self, handle: OverlayHandle) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("destroy_overlay");
        data.overlays
            .remove(&handle)
            .ok_or(OverlayError::UnknownOverlay)?;
        if data.high_quality == Some(handle) {
            data.high_quality = None;
        }
        Ok(())
    }

    fn find_overlay(&mut self, key: &str) -> Result<OverlayHandle, OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("find_overlay");
        data.overlays
            .iter()
            .find_map(|(h, o)| (o.key == key).then_some(*h))
            .ok_or(OverlayError::UnknownOverlay)
    }

    fn show_overlay(&mut self, handle: OverlayHandle) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("show_overlay");
        data.overlay_mut(handle)?.visible = true;
        Ok(())
    }

    fn hide_overlay(&mut self, handle: OverlayHandle) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("hide_overlay");
        data.overlay_mut(handle)?.visible = false;
        Ok(())
    }

    fn set_texture(
        &mut self,
        handle: OverlayHandle,
        texture: &TextureRef,
    ) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_texture");
        if texture.width == 0 || texture.height == 0 {
            return Err(OverlayError::InvalidTexture);
        }
        data.overlay_mut(handle)?.texture = Some(*texture);
        Ok(())
    }

    fn clear_texture(&mut self, handle: OverlayHandle) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("clear_texture");
        data.overlay_mut(handle)?.texture = None;
        Ok(())
    }

    fn set_color(&mut self, handle: OverlayHandle, color: Vec3) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_color");
        data.overlay_mut(handle)?.color = color;
        Ok(())
    }

    fn set_alpha(&mut self, handle: OverlayHandle, alpha: f32) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_alpha");
        if !(0.0..=1.0).contains(&alpha) {
            return Err(OverlayError::InvalidParameter);
        }
        data.overlay_mut(handle)?.alpha = alpha;
        Ok(())
    }

    fn set_width(&mut self, handle: OverlayHandle, width_meters: f32) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_width");
        if width_meters <= 0.0 {
            return Err(OverlayError::InvalidParameter);
        }
        data.overlay_mut(handle)?.width = width_meters;
        Ok(())
    }

    fn set_auto_curve_range(
        &mut self,
        handle: OverlayHandle,
        range: Vec2,
    ) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_auto_curve_range");
        data.overlay_mut(handle)?.curve_range = Some(range);
        Ok(())
    }

    fn set_texture_bounds(
        &mut self,
        handle: OverlayHandle,
        bounds: &TextureBounds,
    ) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_texture_bounds");
        data.overlay_mut(handle)?.bounds = Some(*bounds);
        Ok(())
    }

    fn set_mouse_scale(&mut self, handle: OverlayHandle, scale: Vec2) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_mouse_scale");
        data.overlay_mut(handle)?.mouse_scale = Some(scale);
        Ok(())
    }

    fn set_input_method(
        &mut self,
        handle: OverlayHandle,
        method: InputMethod,
    ) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_input_method");
        data.overlay_mut(handle)?.input_method = method;
        Ok(())
    }

    fn set_transform_absolute(
        &mut self,
        handle: OverlayHandle,
        universe: TrackingUniverse,
        transform: &Matrix3x4,
    ) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_transform_absolute");
        data.overlay_mut(handle)?.transform = Some(OverlayTransform::Absolute {
            universe,
            pose: transform.to_affine(),
        });
        Ok(())
    }

    fn set_transform_device_relative(
        &mut self,
        handle: OverlayHandle,
        device: TrackedDeviceIndex,
        transform: &Matrix3x4,
    ) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_transform_device_relative");
        data.overlay_mut(handle)?.transform = Some(OverlayTransform::DeviceRelative {
            device,
            pose: transform.to_affine(),
        });
        Ok(())
    }

    fn high_quality_overlay(&self) -> Option<OverlayHandle> {
        self.data.borrow().high_quality
    }

    fn set_high_quality_overlay(
        &mut self,
        handle: Option<OverlayHandle>,
    ) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_high_quality_overlay");
        if let Some(handle) = handle {
            data.overlay_mut(handle)?;
        }
        data.high_quality = handle;
        Ok(())
    }

    fn set_flag(
        &mut self,
        handle: OverlayHandle,
        flag: OverlayFlag,
        enabled: bool,
    ) -> Result<(), OverlayError> {
        let mut data = self.data.borrow_mut();
        data.record("set_flag");
        let overlay = data.overlay_mut(handle)?;
        match flag {
            OverlayFlag::Curved => overlay.curved = enabled,
            OverlayFlag::Rgss4x => overlay.antialias = enabled,
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duplicate_key_rejected() {
        let mut comp = HeadlessCompositor::new();
        comp.create_overlay("a", "A").unwrap();
        assert_eq!(
            comp.create_overlay("a", "A2"),
            Err(OverlayError::KeyInUse)
        );
    }

    #[test]
    fn reissued_handle_is_stale() {
        let mut comp = HeadlessCompositor::new();
        let handle = comp.create_overlay("a", "A").unwrap();
        let fresh = comp.reissue_handle(handle).unwrap();
        assert_eq!(comp.show_overlay(handle), Err(OverlayError::UnknownOverlay));
        assert_eq!(comp.find_overlay("a"), Ok(fresh));
        assert!(comp.show_overlay(fresh).is_ok());
    }

    #[test]
    fn clones_share_state() {
        let comp = HeadlessCompositor::new();
        let mut boxed: Box<dyn Compositor> = Box::new(comp.clone());
        boxed.create_overlay("k", "name").unwrap();
        assert_eq!(comp.overlay_count(), 1);
        assert_eq!(comp.calls("create_overlay"), 1);
    }
}
