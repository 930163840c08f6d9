use crate::cameras::KNOWN_CAMERAS;
use clap::{Parser, ValueEnum};
use cloud_render::data::DEFAULT_CUBE_SIZE;
use cloud_render::{Primitive, QuaternionOrder, SplitSide, DEFAULT_QUEUE_DEPTH};
use std::path::PathBuf;

/// `render_localization` - renders a point cloud scan along a localized
/// camera trajectory into a video.
///
/// Every trajectory frame with a pose is drawn offscreen through the
/// calibrated lens; frames without one come out black. With a reference
/// video the render is shown next to the original footage.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
pub struct Config {
    /// Localization JSON: `{"<frame>": {"position": [..], "quaternion": [..]}}`.
    pub input_loc: PathBuf,

    /// Zip archive holding the scan as `pointcloud.ply`.
    pub input_pczip: PathBuf,

    /// Output video. A `.rgb` extension writes raw RGB24 frames instead of
    /// encoding with ffmpeg.
    pub output: PathBuf,

    /// Video recorded by the camera, shown on one side of a split view.
    #[arg(short = 'v', long)]
    pub input_video: Option<PathBuf>,

    /// Overrides the rendering resolution (the calibration is rescaled).
    #[arg(short, long, num_args = 2, value_names = ["WIDTH", "HEIGHT"])]
    pub resolution: Option<Vec<u32>>,

    /// Known calibrated camera.
    #[arg(
        short,
        long,
        value_parser = clap::builder::PossibleValuesParser::new(KNOWN_CAMERAS),
        required_unless_present = "camera_file",
        conflicts_with = "camera_file"
    )]
    pub camera: Option<String>,

    /// JSON camera descriptor, for cameras that are not built in.
    #[arg(long)]
    pub camera_file: Option<PathBuf>,

    /// Maximum amount of frames to render.
    #[arg(short, long)]
    pub total_frames: Option<u64>,

    /// First frame number to render.
    #[arg(short, long, default_value_t = 0)]
    pub starting_frame: u64,

    /// Maximum rendering distance.
    #[arg(long, default_value_t = 100.0)]
    pub far: f32,

    /// Side of the split view that shows the input video (l or r).
    #[arg(long, default_value = "l")]
    pub split_videoside: SplitSide,

    /// Frames kept in flight between drawing and encoding.
    #[arg(long, env = "RENDER_QUEUE_SIZE", default_value_t = DEFAULT_QUEUE_DEPTH)]
    pub queue_size: usize,

    /// Output frame rate.
    #[arg(long, default_value_t = 30)]
    pub fps: u32,

    /// libx264 preset.
    #[arg(long, default_value = "veryfast")]
    pub preset: String,

    /// Component order of the trajectory quaternions (xyzw or wxyz).
    #[arg(long, default_value = "xyzw")]
    pub quat_order: QuaternionOrder,

    /// How points are rasterized.
    #[arg(long, value_enum, default_value_t = PrimitiveArg::Points)]
    pub primitive: PrimitiveArg,

    /// Cube edge length for `--primitive cubes`.
    #[arg(long, default_value_t = DEFAULT_CUBE_SIZE)]
    pub cube_size: f32,

    /// Glob of the PLY entry inside the archive.
    #[arg(long)]
    pub scene_entry: Option<String>,

    #[arg(long, env = "FFMPEG", default_value = "ffmpeg")]
    pub ffmpeg: PathBuf,

    #[arg(long, env = "FFPROBE", default_value = "ffprobe")]
    pub ffprobe: PathBuf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PrimitiveArg {
    Points,
    Cubes,
}

impl Config {
    pub fn resolution(&self) -> Option<(u32, u32)> {
        match self.resolution.as_deref() {
            Some(&[w, h]) => Some((w, h)),
            _ => None,
        }
    }

    pub fn primitive(&self) -> Primitive {
        match self.primitive {
            PrimitiveArg::Points => Primitive::Points,
            PrimitiveArg::Cubes => Primitive::Cubes {
                size: self.cube_size,
            },
        }
    }

    /// Raw RGB output skips the encoder.
    pub fn raw_output(&self) -> bool {
        self.output
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("rgb"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<Config, clap::Error> {
        Config::try_parse_from(["render_localization", "loc.json", "scan.zip", "out.mp4"].iter().chain(args))
    }

    #[test]
    fn documented_defaults() {
        let config = parse(&["-c", "029756"]).unwrap();
        assert_eq!(config.far, 100.0);
        assert_eq!(config.fps, 30);
        assert_eq!(config.preset, "veryfast");
        assert_eq!(config.split_videoside, SplitSide::Left);
        assert_eq!(config.starting_frame, 0);
        assert_eq!(config.primitive(), Primitive::Points);
        assert_eq!(config.quat_order, QuaternionOrder::Xyzw);
        assert!(config.resolution().is_none());
        assert!(!config.raw_output());
    }

    #[test]
    fn a_camera_source_is_required() {
        assert!(parse(&[]).is_err());
        assert!(parse(&["-c", "000000"]).is_err());
        assert!(parse(&["-c", "029757", "--camera-file", "cam.json"]).is_err());
        assert!(parse(&["--camera-file", "cam.json"]).is_ok());
    }

    #[test]
    fn parses_overrides() {
        let config = parse(&[
            "-c", "029757", "-r", "960", "540", "--split-videoside", "right", "--quat-order", "wxyz",
            "--primitive", "cubes", "--cube-size", "0.1", "-t", "25", "-s", "10",
        ])
        .unwrap();
        assert_eq!(config.resolution(), Some((960, 540)));
        assert_eq!(config.split_videoside, SplitSide::Right);
        assert_eq!(config.quat_order, QuaternionOrder::Wxyz);
        assert_eq!(config.primitive(), Primitive::Cubes { size: 0.1 });
        assert_eq!(config.total_frames, Some(25));
        assert_eq!(config.starting_frame, 10);
    }

    #[test]
    fn rgb_extension_selects_raw_output() {
        let config = Config::try_parse_from(["render_localization", "loc.json", "scan.zip", "frames.RGB", "-c", "029756"]).unwrap();
        assert!(config.raw_output());
    }
}
