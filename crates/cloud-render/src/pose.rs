//! Camera poses and the view transforms derived from them.

use crate::error::{RenderError, Result};
use glam::{DMat3, DMat4, DQuat, DVec3, Mat4};
use std::fmt;
use std::str::FromStr;

/// Component order of a quaternion as stored by the pose producer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QuaternionOrder {
    /// `[x, y, z, w]`, scalar last.
    #[default]
    Xyzw,
    /// `[w, x, y, z]`, scalar first.
    Wxyz,
}

impl QuaternionOrder {
    /// Reorders a raw quaternion array into `[x, y, z, w]`.
    pub fn to_xyzw(self, q: [f64; 4]) -> [f64; 4] {
        match self {
            QuaternionOrder::Xyzw => q,
            QuaternionOrder::Wxyz => [q[1], q[2], q[3], q[0]],
        }
    }
}

impl FromStr for QuaternionOrder {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "xyzw" => Ok(QuaternionOrder::Xyzw),
            "wxyz" => Ok(QuaternionOrder::Wxyz),
            other => Err(format!("unknown quaternion order '{other}' (expected xyzw or wxyz)")),
        }
    }
}

impl fmt::Display for QuaternionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            QuaternionOrder::Xyzw => "xyzw",
            QuaternionOrder::Wxyz => "wxyz",
        })
    }
}

/// Camera-to-world placement: where the camera sits and how it is rotated.
///
/// The camera frame is x right, y down, z forward.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub position:    DVec3,
    pub orientation: DQuat,
}

impl Pose {
    /// Builds a pose from raw arrays, normalizing the quaternion.
    pub fn new(position: [f64; 3], quaternion: [f64; 4], order: QuaternionOrder) -> Result<Self> {
        let [x, y, z, w] = order.to_xyzw(quaternion);
        let q = DQuat::from_xyzw(x, y, z, w);
        let len = q.length();

        if !len.is_finite() || len < 1e-12 {
            return Err(RenderError::InvalidGeometry(format!(
                "quaternion {quaternion:?} cannot be normalized"
            )));
        }

        let position = DVec3::from(position);
        if !position.is_finite() {
            return Err(RenderError::InvalidGeometry(format!(
                "camera position {position:?} is not finite"
            )));
        }

        Ok(Self {
            position,
            orientation: q.normalize(),
        })
    }

    pub fn identity() -> Self {
        Self {
            position:    DVec3::ZERO,
            orientation: DQuat::IDENTITY,
        }
    }

    /// Camera-to-world rotation.
    pub fn rotation(&self) -> DMat3 {
        DMat3::from_quat(self.orientation)
    }
}

/// View state derived from a pose; read by every draw until the next pose.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtrinsicState {
    /// World-to-camera rigid transform.
    pub view:       Mat4,
    /// Object transform; the scene is drawn in world coordinates.
    pub model:      Mat4,
    /// `view * model`, the matrix the shaders consume.
    pub model_view: Mat4,
}

impl ExtrinsicState {
    pub fn identity() -> Self {
        Self {
            view:       Mat4::IDENTITY,
            model:      Mat4::IDENTITY,
            model_view: Mat4::IDENTITY,
        }
    }

    /// Inverts the camera placement: `view = [Rᵗ, -Rᵗ t; 0, 1]`.
    ///
    /// Computed in f64 so large world coordinates keep their precision until
    /// the final cast.
    pub fn from_pose(pose: &Pose) -> Self {
        let rt = pose.rotation().transpose();
        let t = -(rt * pose.position);

        let view = DMat4::from_cols(
            rt.x_axis.extend(0.0),
            rt.y_axis.extend(0.0),
            rt.z_axis.extend(0.0),
            t.extend(1.0),
        );
        let model = DMat4::IDENTITY;

        Self {
            view:       view.as_mat4(),
            model:      model.as_mat4(),
            model_view: (view * model).as_mat4(),
        }
    }
}

impl Default for ExtrinsicState {
    fn default() -> Self {
        Self::identity()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn identity_pose_gives_identity_view() {
        let pose = Pose::new([0.0; 3], [0.0, 0.0, 0.0, 1.0], QuaternionOrder::Xyzw).unwrap();
        let state = ExtrinsicState::from_pose(&pose);
        assert_eq!(state.view, Mat4::IDENTITY);
        assert_eq!(state.model_view, Mat4::IDENTITY);
    }

    #[test]
    fn view_moves_camera_to_origin_looking_down_z() {
        // Camera at (1, 2, 3), rotated 90 degrees about world y.
        let half = std::f64::consts::FRAC_PI_4;
        let quat = [0.0, half.sin(), 0.0, half.cos()];
        let pose = Pose::new([1.0, 2.0, 3.0], quat, QuaternionOrder::Xyzw).unwrap();
        let view = ExtrinsicState::from_pose(&pose).model_view;

        let at_camera = view.transform_point3(Vec3::new(1.0, 2.0, 3.0));
        assert!(at_camera.length() < 1e-5, "{at_camera:?}");

        // Camera forward (+z) rotated about y by 90 degrees points along world +x.
        let ahead = view.transform_point3(Vec3::new(2.0, 2.0, 3.0));
        assert!((ahead - Vec3::Z).length() < 1e-5, "{ahead:?}");
    }

    #[test]
    fn scalar_first_order_is_rolled() {
        let a = Pose::new([0.0; 3], [0.1, 0.2, 0.3, 0.9], QuaternionOrder::Xyzw).unwrap();
        let b = Pose::new([0.0; 3], [0.9, 0.1, 0.2, 0.3], QuaternionOrder::Wxyz).unwrap();
        assert!(a.orientation.abs_diff_eq(b.orientation, 1e-12));
    }

    #[test]
    fn quaternion_is_normalized() {
        let pose = Pose::new([0.0; 3], [0.0, 0.0, 0.0, 4.0], QuaternionOrder::Xyzw).unwrap();
        assert!((pose.orientation.length() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn degenerate_quaternion_is_rejected() {
        let err = Pose::new([0.0; 3], [0.0; 4], QuaternionOrder::Xyzw).unwrap_err();
        assert!(matches!(err, RenderError::InvalidGeometry(_)));
    }

    #[test]
    fn parses_order_names() {
        assert_eq!("WXYZ".parse::<QuaternionOrder>().unwrap(), QuaternionOrder::Wxyz);
        assert!("zyxw".parse::<QuaternionOrder>().is_err());
    }
}
