use super::{CameraKind, Lens};
use crate::error::{RenderError, Result};
use crate::pose::ExtrinsicState;
use glam::{Mat4, Vec3, Vec4};
use serde::{Deserialize, Serialize};

pub(super) const WGSL: &str = include_str!("../../shaders/perspective.wgsl");

/// Converts the x-right/y-down/z-forward camera frame into the right-handed
/// y-up frame that `perspective_rh` expects (camera looking down -z).
#[rustfmt::skip]
const CAMERA_TO_GL: Mat4 = Mat4::from_cols_array(&[
    1.0,  0.0,  0.0, 0.0,
    0.0, -1.0,  0.0, 0.0,
    0.0,  0.0, -1.0, 0.0,
    0.0,  0.0,  0.0, 1.0,
]);

fn default_fov_deg() -> f32 {
    45.0
}

fn default_near() -> f32 {
    0.05
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerspectiveParams {
    /// Vertical field of view in degrees.
    #[serde(default = "default_fov_deg")]
    pub fov_deg: f32,
    #[serde(default = "default_near")]
    pub near:    f32,
}

impl Default for PerspectiveParams {
    fn default() -> Self {
        Self {
            fov_deg: default_fov_deg(),
            near:    default_near(),
        }
    }
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct PerspectiveUniforms {
    pub model_view: [[f32; 4]; 4],
    pub projection: [[f32; 4]; 4],
}

const _: [(); 128] = [(); core::mem::size_of::<PerspectiveUniforms>()];

/// Symmetric pinhole frustum; the whole projection is a CPU-side matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct PerspectiveLens {
    projection: Mat4,
    aspect:     f32,
}

impl PerspectiveLens {
    pub fn new(params: &PerspectiveParams, image_size: [u32; 2], far: f32) -> Result<Self> {
        if !(params.fov_deg > 0.0 && params.fov_deg < 180.0) {
            return Err(RenderError::InvalidGeometry(format!(
                "perspective fov {} must lie in (0, 180) degrees",
                params.fov_deg
            )));
        }
        if !(params.near > 0.0 && params.near < far) {
            return Err(RenderError::InvalidGeometry(format!(
                "near plane {} must lie in (0, far = {far})",
                params.near
            )));
        }

        let aspect = image_size[0] as f32 / image_size[1] as f32;
        let projection = Mat4::perspective_rh(params.fov_deg.to_radians(), aspect, params.near, far)
            * CAMERA_TO_GL;

        Ok(Self { projection, aspect })
    }

    pub fn projection(&self) -> Mat4 {
        self.projection
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }
}

impl Lens for PerspectiveLens {
    fn kind(&self) -> CameraKind {
        CameraKind::Perspective
    }

    fn uniform_size(&self) -> u64 {
        std::mem::size_of::<PerspectiveUniforms>() as u64
    }

    fn uniform_bytes(&self, extrinsics: &ExtrinsicState) -> Vec<u8> {
        let uniforms = PerspectiveUniforms {
            model_view: extrinsics.model_view.to_cols_array_2d(),
            projection: self.projection.to_cols_array_2d(),
        };
        bytemuck::bytes_of(&uniforms).to_vec()
    }

    fn project(&self, p_cam: Vec3) -> Option<Vec3> {
        let clip = self.projection * Vec4::from((p_cam, 1.0));
        if clip.w <= 0.0 {
            return None;
        }
        let ndc = clip.truncate() / clip.w;
        if ndc.x.abs() > 1.0 || ndc.y.abs() > 1.0 || !super::depth_in_range(ndc.z) {
            return None;
        }
        // Clip space is y up; image coordinates are y down.
        Some(Vec3::new(ndc.x, -ndc.y, ndc.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lens() -> PerspectiveLens {
        PerspectiveLens::new(&PerspectiveParams::default(), [800, 600], 20.0).unwrap()
    }

    #[test]
    fn optical_axis_hits_image_center() {
        let p = lens().project(Vec3::new(0.0, 0.0, 4.0)).unwrap();
        assert!(p.truncate().length() < 1e-6);
        assert!(p.z > 0.0 && p.z < 1.0);
    }

    #[test]
    fn points_below_axis_land_in_lower_half() {
        // +y is down in the camera frame, so the image y must be positive too.
        let p = lens().project(Vec3::new(0.0, 0.5, 4.0)).unwrap();
        assert!(p.y > 0.0);
        let p = lens().project(Vec3::new(0.5, 0.0, 4.0)).unwrap();
        assert!(p.x > 0.0);
    }

    #[test]
    fn points_behind_or_past_far_are_culled() {
        assert!(lens().project(Vec3::new(0.0, 0.0, -4.0)).is_none());
        assert!(lens().project(Vec3::new(0.0, 0.0, 25.0)).is_none());
    }

    #[test]
    fn rejects_degenerate_frustum() {
        let wide = PerspectiveParams { fov_deg: 180.0, near: 0.05 };
        assert!(PerspectiveLens::new(&wide, [800, 600], 20.0).is_err());
        let near = PerspectiveParams { fov_deg: 45.0, near: 30.0 };
        assert!(PerspectiveLens::new(&near, [800, 600], 20.0).is_err());
    }
}
