//! Lens models.
//!
//! Every lens turns a calibration descriptor into immutable, resolution
//! independent intrinsic state at construction time, packs that state together
//! with the current model-view matrix into a uniform block, and selects the
//! vertex stage that evaluates its projection on the GPU. Each model also
//! carries a CPU copy of its projection so callers can predict where a world
//! point lands.
//!
//! All lenses share the camera frame convention x right, y down, z forward.
//! Projections return normalized image coordinates: x in [-1, 1] left to right,
//! y in [-1, 1] top to bottom, plus a depth value in [0, 1].

mod ocam;
mod opencv;
mod perspective;

pub use ocam::{OcamLens, OcamParams, OcamUniforms, OCAM_INV_POLY_LEN};
pub use opencv::{OpenCvLens, OpenCvParams, OpenCvUniforms, OPENCV_DISTORTION_LEN};
pub use perspective::{PerspectiveLens, PerspectiveParams, PerspectiveUniforms};

use crate::error::{RenderError, Result};
use crate::pose::{ExtrinsicState, Pose};
use crate::renderer::RenderState;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const POINTS_COMMON_WGSL: &str = include_str!("../../shaders/points_common.wgsl");

pub const DEFAULT_FAR: f32 = 20.0;

fn default_far() -> f32 {
    DEFAULT_FAR
}

/// Lens geometry selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CameraKind {
    Perspective,
    OpenCv,
    Ocam,
}

impl CameraKind {
    /// Full WGSL source (shared fragment stage + lens vertex stage).
    pub fn shader_source(self) -> String {
        let lens = match self {
            CameraKind::Perspective => perspective::WGSL,
            CameraKind::OpenCv => opencv::WGSL,
            CameraKind::Ocam => ocam::WGSL,
        };
        format!("{POINTS_COMMON_WGSL}\n{lens}")
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CameraKind::Perspective => "perspective",
            CameraKind::OpenCv => "opencv",
            CameraKind::Ocam => "ocam",
        }
    }
}

impl fmt::Display for CameraKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CameraKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "perspective" => Ok(CameraKind::Perspective),
            "opencv" => Ok(CameraKind::OpenCv),
            "ocam" => Ok(CameraKind::Ocam),
            other => Err(format!("unknown camera model '{other}'")),
        }
    }
}

/// Raw calibration parameters, in pixels where applicable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "model", rename_all = "lowercase")]
pub enum CameraIntrinsics {
    Perspective(PerspectiveParams),
    OpenCv(OpenCvParams),
    Ocam(OcamParams),
}

impl CameraIntrinsics {
    pub fn kind(&self) -> CameraKind {
        match self {
            CameraIntrinsics::Perspective(_) => CameraKind::Perspective,
            CameraIntrinsics::OpenCv(_) => CameraKind::OpenCv,
            CameraIntrinsics::Ocam(_) => CameraKind::Ocam,
        }
    }
}

/// A calibrated camera: the image size the calibration refers to, the render
/// far plane and one set of lens parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraDescriptor {
    /// `[width, height]` of the calibration image.
    pub image_size: [u32; 2],
    #[serde(default = "default_far")]
    pub far:        f32,
    #[serde(flatten)]
    pub intrinsics: CameraIntrinsics,
}

impl CameraDescriptor {
    pub fn kind(&self) -> CameraKind {
        self.intrinsics.kind()
    }

    fn validate(&self) -> Result<()> {
        let [w, h] = self.image_size;
        if w == 0 || h == 0 {
            return Err(RenderError::InvalidGeometry(format!(
                "image size {w}x{h} must be non-zero"
            )));
        }
        if !(self.far.is_finite() && self.far > 0.0) {
            return Err(RenderError::InvalidGeometry(format!(
                "far plane {} must be positive",
                self.far
            )));
        }
        Ok(())
    }
}

/// Operations every lens variant provides.
pub trait Lens {
    fn kind(&self) -> CameraKind;

    /// Size in bytes of the uniform block this lens writes.
    fn uniform_size(&self) -> u64;

    /// Packs intrinsics and the current model-view matrix for upload.
    fn uniform_bytes(&self, extrinsics: &ExtrinsicState) -> Vec<u8>;

    /// Projects a camera-frame point; `None` when it falls outside the lens
    /// coverage or the depth range.
    fn project(&self, p_cam: Vec3) -> Option<Vec3>;
}

/// Closed set of lens variants with enum dispatch onto [`Lens`].
#[derive(Debug, Clone, PartialEq)]
pub enum LensState {
    Perspective(PerspectiveLens),
    OpenCv(OpenCvLens),
    Ocam(OcamLens),
}

impl LensState {
    pub fn from_descriptor(desc: &CameraDescriptor) -> Result<Self> {
        desc.validate()?;
        Ok(match &desc.intrinsics {
            CameraIntrinsics::Perspective(p) => {
                LensState::Perspective(PerspectiveLens::new(p, desc.image_size, desc.far)?)
            }
            CameraIntrinsics::OpenCv(p) => {
                LensState::OpenCv(OpenCvLens::new(p, desc.image_size, desc.far)?)
            }
            CameraIntrinsics::Ocam(p) => {
                LensState::Ocam(OcamLens::new(p, desc.image_size, desc.far)?)
            }
        })
    }

    pub fn as_lens(&self) -> &dyn Lens {
        match self {
            LensState::Perspective(l) => l,
            LensState::OpenCv(l) => l,
            LensState::Ocam(l) => l,
        }
    }
}

/// A lens plus the pose it currently renders from.
#[derive(Debug, Clone)]
pub struct CameraModel {
    lens:       LensState,
    extrinsics: ExtrinsicState,
}

impl CameraModel {
    /// Validates the descriptor and normalizes its intrinsics.
    pub fn new(desc: &CameraDescriptor) -> Result<Self> {
        let lens = LensState::from_descriptor(desc)?;
        tracing::debug!(model = %desc.kind(), image_size = ?desc.image_size, far = desc.far, "camera intrinsics ready");
        Ok(Self {
            lens,
            extrinsics: ExtrinsicState::identity(),
        })
    }

    pub fn kind(&self) -> CameraKind {
        self.lens.as_lens().kind()
    }

    pub fn lens(&self) -> &LensState {
        &self.lens
    }

    pub fn extrinsics(&self) -> &ExtrinsicState {
        &self.extrinsics
    }

    /// Applies a new pose; the derived state is used by every following draw.
    pub fn set_extrinsics(&mut self, pose: &Pose) -> &ExtrinsicState {
        self.extrinsics = ExtrinsicState::from_pose(pose);
        &self.extrinsics
    }

    pub fn uniform_size(&self) -> u64 {
        self.lens.as_lens().uniform_size()
    }

    pub fn uniform_bytes(&self) -> Vec<u8> {
        self.lens.as_lens().uniform_bytes(&self.extrinsics)
    }

    /// Writes the camera uniform block for the next draw.
    pub fn upload_uniforms(&self, queue: &wgpu::Queue, state: &RenderState) {
        queue.write_buffer(&state.camera_ubo, 0, &self.uniform_bytes());
    }

    /// CPU reference of the GPU projection for a world-space point.
    pub fn project_world(&self, p_world: Vec3) -> Option<Vec3> {
        let p_cam = self.extrinsics.model_view.transform_point3(p_world);
        self.lens.as_lens().project(p_cam)
    }
}

/// Maps normalized image coordinates (y down) to pixel coordinates.
pub fn ndc_to_pixel(ndc: Vec2, viewport: (u32, u32)) -> Vec2 {
    let size = Vec2::new(viewport.0 as f32, viewport.1 as f32);
    (ndc + Vec2::ONE) * 0.5 * size
}

/// Shared depth test for projections that write depth as `distance / far`.
fn depth_in_range(depth: f32) -> bool {
    (0.0..=1.0).contains(&depth)
}
