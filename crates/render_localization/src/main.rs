mod cameras;
mod config;
mod ply;
mod scene;
mod trajectory;
mod video;

use crate::config::Config;
use crate::trajectory::{frame_range, Trajectory};
use crate::video::{FfmpegReader, FfmpegWriter, RawWriter, VideoSink};
use anyhow::Context;
use clap::Parser;
use cloud_render::{GfxContext, PointCloudRenderer, ReadbackPipeline};
use indicatif::{ProgressBar, ProgressStyle};
use tracing_subscriber::{fmt, EnvFilter};

fn main() -> anyhow::Result<()> {
    // --- 1. Initialization ---
    fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let config = Config::parse();
    tracing::info!(config = ?config, "render_localization starting");

    let descriptor = cameras::resolve(&config)?;
    let [calib_w, calib_h] = descriptor.image_size;
    let resolution = config.resolution().unwrap_or((calib_w, calib_h));
    tracing::info!(width = resolution.0, height = resolution.1, "rendering resolution");

    let cloud = scene::load_point_cloud(&config.input_pczip, config.scene_entry.as_deref())?;
    let trajectory = Trajectory::load(&config.input_loc, config.quat_order)?;
    let last_frame = trajectory.last_frame().context("trajectory holds no poses")?;

    // --- 2. Reference video ---
    let mut reference = None;
    let mut video_frames = None;
    if let Some(video) = &config.input_video {
        let params = video::probe(&config.ffprobe, video)?;
        let native = (params.width, params.height);
        let scale = (native != resolution).then_some(resolution);
        if scale.is_some() {
            tracing::info!(?native, ?resolution, "reference video will be rescaled");
        }
        video_frames = params.frames.map(|n| n.saturating_sub(config.starting_frame));
        reference = Some(FfmpegReader::spawn(&config.ffmpeg, video, config.starting_frame, native, scale)?);
    }

    let Some(frames) = frame_range(config.starting_frame, last_frame, config.total_frames, video_frames) else {
        anyhow::bail!(
            "no frames to render from {} (last localized frame {last_frame})",
            config.starting_frame
        );
    };

    // --- 3. Renderer ---
    let gfx = GfxContext::acquire(resolution.0, resolution.1).context("acquiring headless GPU context")?;
    let mut renderer = PointCloudRenderer::new(gfx);
    renderer.init_gpu()?;
    renderer
        .init_context(&cloud, &descriptor, config.primitive())
        .context("preparing scene")?;
    drop(cloud);

    let sink = if config.raw_output() {
        VideoSink::Raw(RawWriter::create(&config.output, resolution)?)
    } else {
        VideoSink::Ffmpeg(FfmpegWriter::spawn(&config.ffmpeg, &config.output, resolution, config.fps, &config.preset)?)
    };

    let mut pipeline = ReadbackPipeline::new(renderer, sink, config.queue_size);
    if reference.is_some() {
        pipeline = pipeline.with_split(config.split_videoside);
    }

    // --- 4. Frame loop ---
    let pb = ProgressBar::new(frames.end() - frames.start() + 1);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("[{bar:40.green/blue}] {pos}/{len} frames ({percent}%) {per_sec} eta {eta}")
            .context("progress template")?
            .progress_chars("█▉▊▋▌▍▎▏"),
    );

    let mut reference_exhausted = false;
    for frame in frames {
        let pose = match trajectory.pose(frame) {
            Ok(pose) => Some(pose),
            Err(e) if e.is_recoverable() => None,
            Err(e) => return Err(e.into()),
        };

        let reference_frame = match reference.as_mut() {
            Some(reader) if !reference_exhausted => match reader.next_frame() {
                Ok(image) => Some(image),
                Err(e) if e.is_recoverable() => {
                    tracing::warn!(frame, "reference video exhausted, padding with black");
                    reference_exhausted = true;
                    None
                }
                Err(e) => return Err(e).context("decoding reference video"),
            },
            _ => None,
        };

        pipeline
            .push(frame, pose, reference_frame)
            .with_context(|| format!("rendering frame {frame}"))?;
        pb.inc(1);
    }

    // --- 5. Drain ---
    let (_, sink, stats) = pipeline.finish().context("flushing in-flight frames")?;
    sink.finish()?;
    if let Some(reader) = reference {
        reader.finish();
    }
    pb.finish_and_clear();

    tracing::info!(
        written = stats.written,
        rendered = stats.rendered,
        placeholders = stats.placeholders,
        output = %config.output.display(),
        "done"
    );
    Ok(())
}
