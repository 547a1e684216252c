use glam::{Affine3A, Vec2, Vec3, Vec4};
use serde::{Deserialize, Serialize};
use strum::{AsRefStr, EnumString};
use thiserror::Error;

pub type TrackedDeviceIndex = u32;

pub const TRACKED_DEVICE_INDEX_HMD: TrackedDeviceIndex = 0;

/// Opaque handle issued by the compositor for one overlay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OverlayHandle(pub u64);

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayError {
    #[error("unknown overlay")]
    UnknownOverlay,
    #[error("invalid overlay handle")]
    InvalidHandle,
    #[error("permission denied")]
    PermissionDenied,
    #[error("overlay limit exceeded")]
    OverlayLimitExceeded,
    #[error("overlay key too long")]
    KeyTooLong,
    #[error("overlay name too long")]
    NameTooLong,
    #[error("overlay key already in use")]
    KeyInUse,
    #[error("invalid parameter")]
    InvalidParameter,
    #[error("invalid texture")]
    InvalidTexture,
    #[error("compositor request failed")]
    RequestFailed,
}

impl OverlayError {
    /// The handle no longer names a live overlay, but the key may still resolve.
    pub fn is_stale_handle(self) -> bool {
        matches!(self, OverlayError::InvalidHandle | OverlayError::UnknownOverlay)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum TextureKind {
    #[default]
    Static,
    RenderTarget,
    Video,
}

/// Reference to a texture owned by the renderer; only its id and size travel here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureRef {
    pub id: u64,
    pub width: u32,
    pub height: u32,
    pub kind: TextureKind,
}

impl TextureRef {
    pub fn aspect(&self) -> f32 {
        if self.width == 0 {
            return 1.0;
        }
        self.height as f32 / self.width as f32
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextureBounds {
    pub u_min: f32,
    pub v_min: f32,
    pub u_max: f32,
    pub v_max: f32,
}

impl TextureBounds {
    /// `offset` is `(x, y, z, w)`: a UV shift in xy and a UV scale in zw.
    /// V is flipped so that the texture reads top-down.
    pub fn from_uv_offset(offset: Vec4) -> Self {
        Self {
            u_min: (0.0 + offset.x) * offset.z,
            v_min: (1.0 + offset.y) * offset.w,
            u_max: (1.0 + offset.x) * offset.z,
            v_max: (0.0 + offset.y) * offset.w,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize, EnumString, AsRefStr)]
pub enum InputMethod {
    #[default]
    None,
    Mouse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OverlayFlag {
    Curved,
    Rgss4x,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
pub enum TrackingUniverse {
    Seated,
    #[default]
    Standing,
    RawAndUncalibrated,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OverlayTransform {
    Absolute {
        universe: TrackingUniverse,
        pose: Affine3A,
    },
    DeviceRelative {
        device: TrackedDeviceIndex,
        pose: Affine3A,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix3x4(pub [[f32; 4]; 3]);

pub trait Affine3AConvert {
    fn from_affine(affine: Affine3A) -> Self;
    fn to_affine(&self) -> Affine3A;
}

impl Affine3AConvert for Matrix3x4 {
    fn from_affine(affine: Affine3A) -> Self {
        let m = affine.matrix3;
        let t = affine.translation;
        Matrix3x4([
            [m.x_axis.x, m.y_axis.x, m.z_axis.x, t.x],
            [m.x_axis.y, m.y_axis.y, m.z_axis.y, t.y],
            [m.x_axis.z, m.y_axis.z, m.z_axis.z, t.z],
        ])
    }

    fn to_affine(&self) -> Affine3A {
        let r = &self.0;
        Affine3A::from_cols_array_2d(&[
            [r[0][0], r[1][0], r[2][0]],
            [r[0][1], r[1][1], r[2][1]],
            [r[0][2], r[1][2], r[2][2]],
            [r[0][3], r[1][3], r[2][3]],
        ])
    }
}

/// The VR compositor as seen by the overlay state machines.
///
/// Every call maps to one compositor request; failures surface as [`OverlayError`]
/// and are never fatal to the caller's frame.
pub trait Compositor {
    fn create_overlay(&mut self, key: &str, name: &str) -> Result<OverlayHandle, OverlayError>;
    fn destroy_overlay(&mut self, handle: OverlayHandle) -> Result<(), OverlayError>;
    fn find_overlay(&mut self, key: &str) -> Result<OverlayHandle, OverlayError>;

    fn show_overlay(&mut self, handle: OverlayHandle) -> Result<(), OverlayError>;
    fn hide_overlay(&mut self, handle: OverlayHandle) -> Result<(), OverlayError>;

    fn set_texture(&mut self, handle: OverlayHandle, texture: &TextureRef)
        -> Result<(), OverlayError>;
    fn clear_texture(&mut self, handle: OverlayHandle) -> Result<(), OverlayError>;
    fn set_color(&mut self, handle: OverlayHandle, color: Vec3) -> Result<(), OverlayError>;
    fn set_alpha(&mut self, handle: OverlayHandle, alpha: f32) -> Result<(), OverlayError>;
    fn set_width(&mut self, handle: OverlayHandle, width_meters: f32) -> Result<(), OverlayError>;
    fn set_auto_curve_range(
        &mut self,
        handle: OverlayHandle,
        range: Vec2,
    ) -> Result<(), OverlayError>;
    fn set_texture_bounds(
        &mut self,
        handle: OverlayHandle,
        bounds: &TextureBounds,
    ) -> Result<(), OverlayError>;
    fn set_mouse_scale(&mut self, handle: OverlayHandle, scale: Vec2) -> Result<(), OverlayError>;
    fn set_input_method(
        &mut self,
        handle: OverlayHandle,
        method: InputMethod,
    ) -> Result<(), OverlayError>;

    fn set_transform_absolute(
        &mut self,
        handle: OverlayHandle,
        universe: TrackingUniverse,
        transform: &Matrix3x4,
    ) -> Result<(), OverlayError>;
    fn set_transform_device_relative(
        &mut self,
        handle: OverlayHandle,
        device: TrackedDeviceIndex,
        transform: &Matrix3x4,
    ) -> Result<(), OverlayError>;

    fn high_quality_overlay(&self) -> Option<OverlayHandle>;
    fn set_high_quality_overlay(&mut self, handle: Option<OverlayHandle>)
        -> Result<(), OverlayError>;
    fn set_flag(
        &mut self,
        handle: OverlayHandle,
        flag: OverlayFlag,
        enabled: bool,
    ) -> Result<(), OverlayError>;

    fn set_transform(
        &mut self,
        handle: OverlayHandle,
        transform: &OverlayTransform,
    ) -> Result<(), OverlayError> {
        match *transform {
            OverlayTransform::Absolute { universe, pose } => {
                self.set_transform_absolute(handle, universe, &Matrix3x4::from_affine(pose))
            }
            OverlayTransform::DeviceRelative { device, pose } => {
                self.set_transform_device_relative(handle, device, &Matrix3x4::from_affine(pose))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::{Quat, Vec3};

    use super::*;

    #[test]
    fn full_uv_offset_flips_v() {
        let bounds = TextureBounds::from_uv_offset(Vec4::new(0.0, 0.0, 1.0, 1.0));
        assert_eq!(bounds.u_min, 0.0);
        assert_eq!(bounds.v_min, 1.0);
        assert_eq!(bounds.u_max, 1.0);
        assert_eq!(bounds.v_max, 0.0);
    }

    #[test]
    fn half_uv_offset() {
        let bounds = TextureBounds::from_uv_offset(Vec4::new(1.0, 0.0, 0.5, 0.5));
        assert_eq!(bounds.u_min, 0.5);
        assert_eq!(bounds.v_min, 0.5);
        assert_eq!(bounds.u_max, 1.0);
        assert_eq!(bounds.v_max, 0.0);
    }

    #[test]
    fn matrix_keeps_affine() {
        let affine = Affine3A::from_rotation_translation(
            Quat::from_rotation_y(0.7),
            Vec3::new(1.0, -2.0, 0.5),
        );
        let back = Matrix3x4::from_affine(affine).to_affine();
        assert!(back.abs_diff_eq(affine, 1e-6));
    }

    #[test]
    fn texture_aspect() {
        let tex = TextureRef {
            id: 1,
            width: 1920,
            height: 1080,
            kind: TextureKind::Static,
        };
        assert_eq!(tex.aspect(), 1080.0 / 1920.0);
    }

    #[test]
    fn stale_handle_errors() {
        assert!(OverlayError::InvalidHandle.is_stale_handle());
        assert!(OverlayError::UnknownOverlay.is_stale_handle());
        assert!(!OverlayError::KeyInUse.is_stale_handle());
    }
}
