use super::{CameraKind, Lens};
use crate::error::{RenderError, Result};
use crate::pose::ExtrinsicState;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::FRAC_PI_2;

pub(super) const WGSL: &str = include_str!("../../shaders/ocam.wgsl");

/// Slots reserved for the world-to-image polynomial. Shorter calibrations are
/// zero padded, which leaves the polynomial unchanged.
pub const OCAM_INV_POLY_LEN: usize = 18;

fn default_fov_deg() -> f32 {
    360.0
}

/// OCamCalib (Scaramuzza) calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OcamParams {
    /// Image-to-world polynomial ("cam2world").
    pub cam2world: Vec<f32>,
    /// World-to-image polynomial ("world2cam"), pixels per power of theta.
    pub world2cam: Vec<f32>,
    /// Distortion center as (row, column) in pixels.
    pub center:    [f32; 2],
    /// Sensor affine terms c, d, e.
    pub affine:    [f32; 3],
    /// Modeled field of view in degrees.
    #[serde(default = "default_fov_deg")]
    pub fov_deg:   f32,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, bytemuck::Pod, bytemuck::Zeroable)]
pub struct OcamUniforms {
    pub model_view:   [[f32; 4]; 4], // 64 B
    /// Normalized world2cam coefficients, four per slot.
    pub inv_poly:     [[f32; 4]; 5], // +80
    /// c, d, e, theta threshold.
    pub affine_theta: [f32; 4],      // +16
    /// Row offset, column offset, far, unused.
    pub center_far:   [f32; 4],      // +16 -> 176
}

const _: [(); 176] = [(); core::mem::size_of::<OcamUniforms>()];

/// Omnidirectional polynomial lens.
#[derive(Debug, Clone, PartialEq)]
pub struct OcamLens {
    forward_poly: Vec<f32>,
    inv_poly:     [f32; OCAM_INV_POLY_LEN],
    /// c and d are rescaled by width / height, e is unchanged.
    affine:       [f32; 3],
    /// (row, column) offset of the distortion center in [-1, 1].
    center:       Vec2,
    theta_thresh: f32,
    far:          f32,
}

impl OcamLens {
    pub fn new(params: &OcamParams, image_size: [u32; 2], far: f32) -> Result<Self> {
        if params.cam2world.is_empty() {
            return Err(RenderError::InvalidParameterCount {
                what:     "ocam cam2world polynomial",
                expected: 1,
                got:      0,
            });
        }
        let n = params.world2cam.len();
        if n == 0 || n > OCAM_INV_POLY_LEN {
            return Err(RenderError::InvalidParameterCount {
                what:     "ocam world2cam polynomial",
                expected: OCAM_INV_POLY_LEN,
                got:      n,
            });
        }
        if !(params.fov_deg > 0.0 && params.fov_deg <= 360.0) {
            return Err(RenderError::InvalidGeometry(format!(
                "ocam field of view {} must lie in (0, 360] degrees",
                params.fov_deg
            )));
        }

        let width = image_size[0] as f32;
        let height = image_size[1] as f32;

        // rho is measured in pixels; half the width maps to 1.
        let mut inv_poly = [0.0; OCAM_INV_POLY_LEN];
        for (slot, coeff) in inv_poly.iter_mut().zip(&params.world2cam) {
            *slot = coeff / width * 2.0;
        }

        // Rows are normalized by the height, so the row terms pick up the aspect.
        let aspect = width / height;
        let [c, d, e] = params.affine;
        let center = Vec2::new(
            params.center[0] / height * 2.0 - 1.0,
            params.center[1] / width * 2.0 - 1.0,
        );

        Ok(Self {
            forward_poly: params.cam2world.clone(),
            inv_poly,
            affine: [c * aspect, d * aspect, e],
            center,
            theta_thresh: (params.fov_deg / 2.0).to_radians() - FRAC_PI_2,
            far,
        })
    }

    pub fn forward_poly(&self) -> &[f32] {
        &self.forward_poly
    }

    pub fn inv_poly(&self) -> &[f32; OCAM_INV_POLY_LEN] {
        &self.inv_poly
    }

    pub fn theta_thresh(&self) -> f32 {
        self.theta_thresh
    }

    /// Normalized radial distance for an incidence angle.
    fn rho(&self, theta: f32) -> f32 {
        self.inv_poly.iter().rev().fold(0.0, |acc, &k| acc * theta + k)
    }
}

impl Lens for OcamLens {
    fn kind(&self) -> CameraKind {
        CameraKind::Ocam
    }

    fn uniform_size(&self) -> u64 {
        std::mem::size_of::<OcamUniforms>() as u64
    }

    fn uniform_bytes(&self, extrinsics: &ExtrinsicState) -> Vec<u8> {
        let mut inv_poly = [[0.0; 4]; 5];
        for (i, k) in self.inv_poly.iter().enumerate() {
            inv_poly[i / 4][i % 4] = *k;
        }
        let [c, d, e] = self.affine;
        let uniforms = OcamUniforms {
            model_view: extrinsics.model_view.to_cols_array_2d(),
            inv_poly,
            affine_theta: [c, d, e, self.theta_thresh],
            center_far: [self.center.x, self.center.y, self.far, 0.0],
        };
        bytemuck::bytes_of(&uniforms).to_vec()
    }

    fn project(&self, p_cam: Vec3) -> Option<Vec3> {
        // OCamCalib axes: x along rows, y along columns, z out of the back of the lens.
        let q = Vec3::new(p_cam.y, p_cam.x, -p_cam.z);
        let norm = q.truncate().length();
        let theta = q.z.atan2(norm);
        if theta > self.theta_thresh {
            return None;
        }

        let depth = p_cam.length() / self.far;
        if !super::depth_in_range(depth) {
            return None;
        }

        let (row, col) = if norm > 0.0 {
            let rho = self.rho(theta);
            let x = q.x / norm * rho;
            let y = q.y / norm * rho;
            let [c, d, e] = self.affine;
            (x * c + y * d + self.center.x, x * e + y + self.center.y)
        } else {
            (self.center.x, self.center.y)
        };

        if row.abs() > 1.0 || col.abs() > 1.0 {
            return None;
        }
        Some(Vec3::new(col, row, depth))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(world2cam: Vec<f32>, fov_deg: f32) -> OcamParams {
        OcamParams {
            cam2world: vec![-310.0, 0.0, 6.5e-4, -2.1e-7, 3.4e-10],
            world2cam,
            center: [480.0, 640.0],
            affine: [1.0, 0.0, 0.0],
            fov_deg,
        }
    }

    #[test]
    fn long_inverse_polynomial_is_rejected() {
        let err = OcamLens::new(&params(vec![1.0; 19], 360.0), [1280, 960], 20.0).unwrap_err();
        assert!(matches!(
            err,
            RenderError::InvalidParameterCount { expected: 18, got: 19, .. }
        ));
        assert!(OcamLens::new(&params(vec![], 360.0), [1280, 960], 20.0).is_err());
    }

    #[test]
    fn short_inverse_polynomial_is_zero_padded() {
        let lens = OcamLens::new(&params(vec![640.0, 320.0], 360.0), [1280, 960], 20.0).unwrap();
        assert_eq!(lens.inv_poly()[0], 1.0);
        assert_eq!(lens.inv_poly()[1], 0.5);
        assert!(lens.inv_poly()[2..].iter().all(|k| *k == 0.0));

        let full = OcamLens::new(&params(vec![1.0; 18], 360.0), [1280, 960], 20.0).unwrap();
        assert_eq!(full.inv_poly().len(), OCAM_INV_POLY_LEN);
    }

    #[test]
    fn theta_threshold_follows_field_of_view() {
        let lens = OcamLens::new(&params(vec![400.0], 180.0), [1280, 960], 20.0).unwrap();
        assert!(lens.theta_thresh().abs() < 1e-6);
        let lens = OcamLens::new(&params(vec![400.0], 360.0), [1280, 960], 20.0).unwrap();
        assert!((lens.theta_thresh() - FRAC_PI_2).abs() < 1e-6);
    }

    #[test]
    fn rays_outside_coverage_are_clipped() {
        let lens = OcamLens::new(&params(vec![400.0, 100.0], 180.0), [1280, 960], 20.0).unwrap();
        // 90 degrees off axis sits on the threshold; slightly behind is outside.
        assert!(lens.project(Vec3::new(1.0, 0.0, -0.1)).is_none());
        assert!(lens.project(Vec3::new(0.1, 0.0, 1.0)).is_some());
    }

    #[test]
    fn optical_axis_maps_to_distortion_center() {
        let lens = OcamLens::new(&params(vec![400.0, 100.0], 360.0), [1280, 960], 20.0).unwrap();
        let p = lens.project(Vec3::new(0.0, 0.0, 2.0)).unwrap();
        // Center (row 480, col 640) on a 1280x960 image is the middle.
        assert!(p.truncate().length() < 1e-6);
        assert!((p.z - 0.1).abs() < 1e-6);
    }

    #[test]
    fn column_offset_follows_camera_x() {
        let lens = OcamLens::new(&params(vec![400.0, 100.0], 360.0), [1280, 960], 20.0).unwrap();
        let right = lens.project(Vec3::new(0.5, 0.0, 2.0)).unwrap();
        let down = lens.project(Vec3::new(0.0, 0.5, 2.0)).unwrap();
        assert!(right.x > 0.0 && right.y.abs() < 1e-6);
        assert!(down.y > 0.0 && down.x.abs() < 1e-6);
    }

    #[test]
    fn affine_rows_are_scaled_by_aspect() {
        let mut p = params(vec![400.0], 360.0);
        p.affine = [1.0, 0.5, 0.25];
        let lens = OcamLens::new(&p, [1280, 960], 20.0).unwrap();
        let bytes = lens.uniform_bytes(&ExtrinsicState::identity());
        let uniforms: OcamUniforms = bytemuck::pod_read_unaligned(&bytes);
        let aspect = 1280.0 / 960.0;
        assert!((uniforms.affine_theta[0] - aspect).abs() < 1e-6);
        assert!((uniforms.affine_theta[1] - 0.5 * aspect).abs() < 1e-6);
        assert_eq!(uniforms.affine_theta[2], 0.25);
        assert_eq!(uniforms.center_far[2], 20.0);
    }
}
