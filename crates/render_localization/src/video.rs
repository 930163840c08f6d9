//! Video in and out through external `ffmpeg` / `ffprobe` processes.
//!
//! Frames cross the process boundary as raw RGB24, top row first.

use anyhow::{bail, Context, Result};
use cloud_render::{FrameSink, RenderError};
use image::RgbImage;
use serde::Deserialize;
use std::ffi::OsString;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};

/// Stream parameters reported by `ffprobe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VideoParams {
    pub width:  u32,
    pub height: u32,
    /// Frame count when the container records one.
    pub frames: Option<u64>,
}

#[derive(Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Deserialize)]
struct ProbeStream {
    width:     u32,
    height:    u32,
    nb_frames: Option<String>,
}

pub fn parse_probe(json: &str) -> Result<VideoParams> {
    let probe: ProbeOutput = serde_json::from_str(json).context("parsing ffprobe output")?;
    let stream = probe.streams.into_iter().next().context("no video stream")?;
    Ok(VideoParams {
        width:  stream.width,
        height: stream.height,
        frames: stream.nb_frames.and_then(|n| n.parse().ok()),
    })
}

pub fn probe(ffprobe: &Path, video: &Path) -> Result<VideoParams> {
    let output = Command::new(ffprobe)
        .args(["-v", "error", "-select_streams", "v:0", "-show_entries", "stream=width,height,nb_frames", "-of", "json"])
        .arg(video)
        .output()
        .with_context(|| format!("running {}", ffprobe.display()))?;
    if !output.status.success() {
        bail!(
            "ffprobe failed on {}: {}",
            video.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    let params = parse_probe(&String::from_utf8_lossy(&output.stdout))?;
    tracing::info!(video = %video.display(), ?params, "reference video probed");
    Ok(params)
}

/// Arguments that encode RGB24 from stdin with libx264.
pub fn writer_args(output: &Path, (width, height): (u32, u32), fps: u32, preset: &str) -> Vec<OsString> {
    let mut args: Vec<OsString> = [
        "-y", "-loglevel", "error",
        "-f", "rawvideo", "-pix_fmt", "rgb24",
    ]
    .iter()
    .map(OsString::from)
    .collect();
    args.extend([
        "-s".into(),
        format!("{width}x{height}").into(),
        "-r".into(),
        fps.to_string().into(),
        "-i".into(),
        "-".into(),
        "-c:v".into(),
        "libx264".into(),
        "-preset".into(),
        preset.into(),
        "-pix_fmt".into(),
        "yuv420p".into(),
        output.as_os_str().to_owned(),
    ]);
    args
}

/// Arguments that decode `input` to RGB24 on stdout from frame `start`,
/// optionally rescaled.
pub fn reader_args(input: &Path, start: u64, scale: Option<(u32, u32)>) -> Vec<OsString> {
    let mut filters = Vec::new();
    if start > 0 {
        filters.push(format!("select=gte(n\\,{start})"));
    }
    if let Some((w, h)) = scale {
        filters.push(format!("scale={w}:{h}"));
    }

    let mut args: Vec<OsString> = vec!["-loglevel".into(), "error".into(), "-i".into(), input.as_os_str().to_owned()];
    if !filters.is_empty() {
        args.extend(["-vf".into(), filters.join(",").into()]);
    }
    args.extend(
        ["-fps_mode", "passthrough", "-f", "rawvideo", "-pix_fmt", "rgb24", "-"]
            .iter()
            .map(OsString::from),
    );
    args
}

/// Encodes frames by piping them into `ffmpeg`.
pub struct FfmpegWriter {
    child: Child,
    stdin: Option<BufWriter<ChildStdin>>,
    size:  (u32, u32),
}

impl FfmpegWriter {
    pub fn spawn(ffmpeg: &Path, output: &Path, size: (u32, u32), fps: u32, preset: &str) -> Result<Self> {
        let mut child = Command::new(ffmpeg)
            .args(writer_args(output, size, fps, preset))
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .spawn()
            .with_context(|| format!("starting {}", ffmpeg.display()))?;
        let stdin = child.stdin.take().context("ffmpeg stdin unavailable")?;
        tracing::info!(output = %output.display(), ?size, fps, preset, "encoder started");
        Ok(Self {
            child,
            stdin: Some(BufWriter::new(stdin)),
            size,
        })
    }

    /// Closes the pipe and waits for the encoder.
    pub fn finish(mut self) -> Result<()> {
        if let Some(mut stdin) = self.stdin.take() {
            stdin.flush().context("flushing frames to ffmpeg")?;
        }
        let status = self.child.wait().context("waiting for ffmpeg")?;
        if !status.success() {
            bail!("ffmpeg exited with {status}");
        }
        Ok(())
    }
}

impl FrameSink for FfmpegWriter {
    fn write_frame(&mut self, index: u64, frame: &RgbImage) -> cloud_render::Result<()> {
        check_size(index, frame, self.size)?;
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::BrokenPipe, "encoder already closed"))?;
        stdin.write_all(frame.as_raw())?;
        Ok(())
    }
}

/// Writes headerless RGB24 frames back to back.
pub struct RawWriter {
    out:  BufWriter<File>,
    size: (u32, u32),
}

impl RawWriter {
    pub fn create(path: &Path, size: (u32, u32)) -> Result<Self> {
        let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
        tracing::info!(output = %path.display(), ?size, "writing raw rgb24 frames");
        Ok(Self {
            out: BufWriter::new(file),
            size,
        })
    }

    pub fn finish(mut self) -> Result<()> {
        self.out.flush().context("flushing raw frames")
    }
}

impl FrameSink for RawWriter {
    fn write_frame(&mut self, index: u64, frame: &RgbImage) -> cloud_render::Result<()> {
        check_size(index, frame, self.size)?;
        self.out.write_all(frame.as_raw())?;
        Ok(())
    }
}

fn check_size(index: u64, frame: &RgbImage, size: (u32, u32)) -> cloud_render::Result<()> {
    if frame.dimensions() != size {
        return Err(RenderError::InvalidGeometry(format!(
            "frame {index} is {:?}, output expects {size:?}",
            frame.dimensions()
        )));
    }
    Ok(())
}

/// Output chosen from the file extension.
pub enum VideoSink {
    Ffmpeg(FfmpegWriter),
    Raw(RawWriter),
}

impl VideoSink {
    pub fn finish(self) -> Result<()> {
        match self {
            VideoSink::Ffmpeg(w) => w.finish(),
            VideoSink::Raw(w) => w.finish(),
        }
    }
}

impl FrameSink for VideoSink {
    fn write_frame(&mut self, index: u64, frame: &RgbImage) -> cloud_render::Result<()> {
        match self {
            VideoSink::Ffmpeg(w) => w.write_frame(index, frame),
            VideoSink::Raw(w) => w.write_frame(index, frame),
        }
    }
}

/// Decodes a reference video frame by frame.
pub struct FfmpegReader {
    child:  Child,
    stdout: BufReader<ChildStdout>,
    size:   (u32, u32),
    /// Frame number of the next frame read.
    next:   u64,
}

impl FfmpegReader {
    /// Starts decoding at frame `start`, rescaling when `scale` is set.
    /// Frames come out at `scale` or the native `size`.
    pub fn spawn(
        ffmpeg: &Path,
        input: &Path,
        start: u64,
        size: (u32, u32),
        scale: Option<(u32, u32)>,
    ) -> Result<Self> {
        let mut child = Command::new(ffmpeg)
            .args(reader_args(input, start, scale))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .spawn()
            .with_context(|| format!("starting {}", ffmpeg.display()))?;
        let stdout = child.stdout.take().context("ffmpeg stdout unavailable")?;
        let size = scale.unwrap_or(size);
        tracing::info!(input = %input.display(), start, ?size, "decoder started");
        Ok(Self {
            child,
            stdout: BufReader::new(stdout),
            size,
            next: start,
        })
    }

    /// Next frame, or `InputExhausted` once the stream ends.
    pub fn next_frame(&mut self) -> cloud_render::Result<RgbImage> {
        let (width, height) = self.size;
        let mut data = vec![0u8; width as usize * height as usize * 3];
        read_frame(&mut self.stdout, &mut data, self.next)?;
        self.next += 1;
        RgbImage::from_raw(width, height, data)
            .ok_or_else(|| RenderError::Readback(format!("short reference frame {}", self.next - 1)))
    }

    /// Stops the decoder, which may still have frames left.
    pub fn finish(mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

fn read_frame(reader: &mut impl Read, buf: &mut [u8], index: u64) -> cloud_render::Result<()> {
    match reader.read_exact(buf) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Err(RenderError::InputExhausted(index)),
        Err(e) => Err(e.into()),
    }
}
