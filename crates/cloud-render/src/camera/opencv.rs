use super::{CameraKind, Lens};
use crate::error::{RenderError, Result};
use crate::pose::ExtrinsicState;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};

pub(super) const WGSL: &str = include_str!("../../shaders/opencv.wgsl");

/// k1, k2, p1, p2, k3.
pub const OPENCV_DISTORTION_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenCvParams {
    /// fx, fy in pixels.
    pub focal:      [f32; 2],
    /// cx, cy in pixels.
    pub center:     [f32; 2],
    /// k1, k2, p1, p2, k3.
    pub distortion: Vec<f32>,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OpenCvUniforms {
    pub model_view:   [[f32; 4]; 4], // 64 B
    /// k1, k2, p1, p2.
    pub distortion:   [f32; 4],      // +16
    /// Normalized fx, fy, cx, cy.
    pub focal_center: [f32; 4],      // +16
    /// k3, far, unused, unused.
    pub k3_far:       [f32; 4],      // +16 -> 112
}

const _: [(); 112] = [(); core::mem::size_of::<OpenCvUniforms>()];

/// Brown-Conrady distortion with normalized focal length and principal point.
#[derive(Debug, Clone, PartialEq)]
pub struct OpenCvLens {
    /// Focal length scaled so the image spans [-1, 1].
    focal:      Vec2,
    /// Principal point moved into [-1, 1].
    center:     Vec2,
    distortion: [f32; OPENCV_DISTORTION_LEN],
    far:        f32,
}

impl OpenCvLens {
    pub fn new(params: &OpenCvParams, image_size: [u32; 2], far: f32) -> Result<Self> {
        let distortion: [f32; OPENCV_DISTORTION_LEN] =
            params.distortion.as_slice().try_into().map_err(|_| {
                RenderError::InvalidParameterCount {
                    what:     "OpenCV distortion",
                    expected: OPENCV_DISTORTION_LEN,
                    got:      params.distortion.len(),
                }
            })?;

        let size = Vec2::new(image_size[0] as f32, image_size[1] as f32);
        let focal = Vec2::from(params.focal);
        if !(focal.x > 0.0 && focal.y > 0.0) {
            return Err(RenderError::InvalidGeometry(format!(
                "focal length {focal:?} must be positive"
            )));
        }

        Ok(Self {
            focal: focal / size * 2.0,
            center: Vec2::from(params.center) / size * 2.0 - Vec2::ONE,
            distortion,
            far,
        })
    }

    pub fn focal(&self) -> Vec2 {
        self.focal
    }

    pub fn center(&self) -> Vec2 {
        self.center
    }

    /// Applies radial and tangential distortion to an ideal image point.
    fn distort(&self, p: Vec2) -> Vec2 {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let r2 = p.length_squared();
        let radial = 1.0 + r2 * (k1 + r2 * (k2 + r2 * k3));
        let xy = p.x * p.y;
        Vec2::new(
            p.x * radial + 2.0 * p1 * xy + p2 * (r2 + 2.0 * p.x * p.x),
            p.y * radial + p1 * (r2 + 2.0 * p.y * p.y) + 2.0 * p2 * xy,
        )
    }
}

impl Lens for OpenCvLens {
    fn kind(&self) -> CameraKind {
        CameraKind::OpenCv
    }

    fn uniform_size(&self) -> u64 {
        std::mem::size_of::<OpenCvUniforms>() as u64
    }

    fn uniform_bytes(&self, extrinsics: &ExtrinsicState) -> Vec<u8> {
        let [k1, k2, p1, p2, k3] = self.distortion;
        let uniforms = OpenCvUniforms {
            model_view:   extrinsics.model_view.to_cols_array_2d(),
            distortion:   [k1, k2, p1, p2],
            focal_center: [self.focal.x, self.focal.y, self.center.x, self.center.y],
            k3_far:       [k3, self.far, 0.0, 0.0],
        };
        bytemuck::bytes_of(&uniforms).to_vec()
    }

    fn project(&self, p_cam: Vec3) -> Option<Vec3> {
        if p_cam.z <= 0.0 {
            return None;
        }
        let depth = p_cam.z / self.far;
        if !super::depth_in_range(depth) {
            return None;
        }
        let ideal = p_cam.truncate() / p_cam.z;
        let image = self.focal * self.distort(ideal) + self.center;
        if image.x.abs() > 1.0 || image.y.abs() > 1.0 {
            return None;
        }
        Some(image.extend(depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraDescriptor, CameraIntrinsics, CameraModel};

    fn params(distortion: Vec<f32>) -> OpenCvParams {
        OpenCvParams {
            focal: [870.4, 883.8],
            center: [977.2, 550.4],
            distortion,
        }
    }

    #[test]
    fn distortion_count_must_be_five() {
        for n in [4, 6] {
            let err = OpenCvLens::new(&params(vec![0.0; n]), [1920, 1080], 100.0).unwrap_err();
            match err {
                RenderError::InvalidParameterCount { expected, got, .. } => {
                    assert_eq!(expected, 5);
                    assert_eq!(got, n);
                }
                other => panic!("unexpected error {other:?}"),
            }
        }
        assert!(OpenCvLens::new(&params(vec![0.0; 5]), [1920, 1080], 100.0).is_ok());
    }

    #[test]
    fn count_is_checked_through_camera_model() {
        let desc = CameraDescriptor {
            image_size: [1920, 1080],
            far: 100.0,
            intrinsics: CameraIntrinsics::OpenCv(params(vec![0.1, 0.2, 0.0, 0.0])),
        };
        assert!(matches!(
            CameraModel::new(&desc).unwrap_err(),
            RenderError::InvalidParameterCount { .. }
        ));
    }

    #[test]
    fn intrinsics_are_normalized_by_image_size() {
        let lens = OpenCvLens::new(&params(vec![0.0; 5]), [1920, 1080], 100.0).unwrap();
        assert!((lens.focal() - Vec2::new(870.4 / 960.0, 883.8 / 540.0)).length() < 1e-6);
        assert!((lens.center() - Vec2::new(977.2 / 960.0 - 1.0, 550.4 / 540.0 - 1.0)).length() < 1e-6);
    }

    #[test]
    fn principal_point_matches_pixel_center() {
        let lens = OpenCvLens::new(&params(vec![-0.26, 0.1, 0.0, 0.0, 0.0]), [1920, 1080], 100.0).unwrap();
        let p = lens.project(Vec3::new(0.0, 0.0, 10.0)).unwrap();
        let px = crate::camera::ndc_to_pixel(p.truncate(), (1920, 1080));
        assert!((px - Vec2::new(977.2, 550.4)).length() < 1e-3, "{px:?}");
        assert!((p.z - 0.1).abs() < 1e-6);
    }

    #[test]
    fn undistorted_projection_is_pinhole() {
        let lens = OpenCvLens::new(&params(vec![0.0; 5]), [1920, 1080], 100.0).unwrap();
        let p = lens.project(Vec3::new(1.0, -0.5, 4.0)).unwrap();
        let px = crate::camera::ndc_to_pixel(p.truncate(), (1920, 1080));
        let expected = Vec2::new(870.4 * 0.25 + 977.2, 883.8 * -0.125 + 550.4);
        assert!((px - expected).length() < 1e-2, "{px:?} vs {expected:?}");
    }

    #[test]
    fn uniform_block_carries_coefficients() {
        let lens = OpenCvLens::new(&params(vec![1.0, 2.0, 3.0, 4.0, 5.0]), [1920, 1080], 80.0).unwrap();
        let bytes = lens.uniform_bytes(&ExtrinsicState::identity());
        let uniforms: OpenCvUniforms = bytemuck::pod_read_unaligned(&bytes);
        assert_eq!(uniforms.distortion, [1.0, 2.0, 3.0, 4.0]);
        assert_eq!(uniforms.k3_far, [5.0, 80.0, 0.0, 0.0]);
    }
}
