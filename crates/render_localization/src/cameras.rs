//! Calibrated cameras: the built-in registry and descriptor files.

use crate::config::Config;
use anyhow::{Context, Result};
use cloud_render::camera::OpenCvParams;
use cloud_render::{CameraDescriptor, CameraIntrinsics};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

/// Names accepted by `--camera`.
pub const KNOWN_CAMERAS: [&str; 2] = ["029756", "029757"];

/// Built-in OpenCV calibrations at 1920x1080. The calibrations carry four
/// distortion terms; k3 is zero.
pub fn known_camera(name: &str, far: f32) -> Option<CameraDescriptor> {
    let (focal, center, distortion) = match name {
        "029756" => (
            [871.800_2, 885.579_96],
            [961.544_25, 550.686_46],
            [-0.254_625_85, 0.080_390_95, 1.458_329e-4, -1.397_345_7e-5],
        ),
        "029757" => (
            [870.398, 883.777_7],
            [977.241_2, 550.421_55],
            [-0.265_123_9, 0.096_752_22, 6.042_069e-6, 1.246_742_4e-4],
        ),
        _ => return None,
    };
    let [k1, k2, p1, p2] = distortion;
    Some(CameraDescriptor {
        image_size: [1920, 1080],
        far,
        intrinsics: CameraIntrinsics::OpenCv(OpenCvParams {
            focal,
            center,
            distortion: vec![k1, k2, p1, p2, 0.0],
        }),
    })
}

pub fn load_descriptor(path: &Path) -> Result<CameraDescriptor> {
    let file = File::open(path).with_context(|| format!("opening camera file {}", path.display()))?;
    serde_json::from_reader(BufReader::new(file))
        .with_context(|| format!("parsing camera file {}", path.display()))
}

/// Picks the camera named on the command line; `--far` always wins.
pub fn resolve(config: &Config) -> Result<CameraDescriptor> {
    let mut descriptor = match (&config.camera, &config.camera_file) {
        (Some(name), _) => known_camera(name, config.far)
            .with_context(|| format!("unknown camera '{name}'"))?,
        (None, Some(path)) => load_descriptor(path)?,
        (None, None) => anyhow::bail!("either --camera or --camera-file is required"),
    };
    descriptor.far = config.far;
    tracing::info!(
        model = %descriptor.kind(),
        calibration = ?descriptor.image_size,
        far = descriptor.far,
        "camera resolved"
    );
    Ok(descriptor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloud_render::{CameraKind, CameraModel};

    #[test]
    fn registry_cameras_build() {
        for name in KNOWN_CAMERAS {
            let desc = known_camera(name, 100.0).unwrap();
            assert_eq!(desc.kind(), CameraKind::OpenCv);
            assert_eq!(desc.image_size, [1920, 1080]);
            CameraModel::new(&desc).unwrap();
        }
        assert!(known_camera("123", 100.0).is_none());
    }

    #[test]
    fn registry_pads_k3_with_zero() {
        let Some(CameraDescriptor { intrinsics: CameraIntrinsics::OpenCv(p), .. }) = known_camera("029757", 50.0) else {
            panic!("expected an OpenCV camera");
        };
        assert_eq!(p.distortion.len(), 5);
        assert_eq!(p.distortion[4], 0.0);
        assert!((p.center[0] - 977.2412).abs() < 1e-3);
    }

    #[test]
    fn descriptor_files_load() {
        let dir = std::env::temp_dir().join(format!("render_localization_cam_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("ocam.json");
        std::fs::write(
            &path,
            r#"{"model": "ocam", "image_size": [1280, 960], "cam2world": [-300.0, 0.0, 0.001],
                "world2cam": [450.0, 250.0], "center": [480.0, 640.0], "affine": [1.0, 0.0, 0.0]}"#,
        )
        .unwrap();
        let desc = load_descriptor(&path).unwrap();
        assert_eq!(desc.kind(), CameraKind::Ocam);
        std::fs::remove_dir_all(&dir).unwrap();
    }
}
