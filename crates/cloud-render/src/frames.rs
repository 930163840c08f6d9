//! Ordered frame production over a bounded queue of in-flight readbacks.
//!
//! Each frame is drawn and its readback requested immediately, but the
//! pixels are only collected once the queue holds `depth` entries, so the
//! GPU keeps working while earlier frames are encoded. Frames leave in the
//! order they were pushed, exactly one per index; frames without a pose
//! become black placeholders.

use crate::composite::{compose_split, SplitSide};
use crate::error::{RenderError, Result};
use crate::pose::Pose;
use crate::renderer::{PixelTransfer, PointCloudRenderer};
use image::RgbImage;
use std::collections::VecDeque;

/// Readbacks kept in flight before the oldest one is collected.
pub const DEFAULT_QUEUE_DEPTH: usize = 50;

/// Anything that can render a pose and hand the pixels back later.
pub trait ColorSource {
    /// Handle of a readback in flight. Owns its buffer.
    type Transfer;

    /// Size of the frames this source produces.
    fn frame_size(&self) -> (u32, u32);

    /// Renders `pose` and starts reading it back, recycling `reuse` if possible.
    fn render_async(&mut self, pose: &Pose, reuse: Option<Self::Transfer>) -> Result<Self::Transfer>;

    /// Blocks for `transfer`; hands the buffer back unless `release` is set.
    fn complete(
        &mut self,
        transfer: Self::Transfer,
        release: bool,
    ) -> Result<(RgbImage, Option<Self::Transfer>)>;

    /// Drops a transfer that will not be used again.
    fn release(&mut self, transfer: Self::Transfer);
}

impl ColorSource for PointCloudRenderer {
    type Transfer = PixelTransfer;

    fn frame_size(&self) -> (u32, u32) {
        self.viewport()
    }

    fn render_async(&mut self, pose: &Pose, reuse: Option<PixelTransfer>) -> Result<PixelTransfer> {
        self.locate_camera(pose)?;
        self.draw()?;
        self.request_color_async(reuse)
    }

    fn complete(
        &mut self,
        transfer: PixelTransfer,
        release: bool,
    ) -> Result<(RgbImage, Option<PixelTransfer>)> {
        self.complete_color(transfer, release)
    }

    fn release(&mut self, transfer: PixelTransfer) {
        transfer.release();
    }
}

/// Receives finished frames in index order.
pub trait FrameSink {
    fn write_frame(&mut self, index: u64, frame: &RgbImage) -> Result<()>;
}

impl FrameSink for Vec<RgbImage> {
    fn write_frame(&mut self, _index: u64, frame: &RgbImage) -> Result<()> {
        self.push(frame.clone());
        Ok(())
    }
}

/// Counters reported when the pipeline finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames handed to the sink.
    pub written:      u64,
    /// Frames that were drawn.
    pub rendered:     u64,
    /// Frames written black because no pose existed.
    pub placeholders: u64,
}

struct InFlight<T> {
    index:     u64,
    /// `None` for frames without a pose.
    transfer:  Option<T>,
    reference: Option<RgbImage>,
}

pub struct ReadbackPipeline<S: ColorSource, K: FrameSink> {
    source:     S,
    sink:       K,
    depth:      usize,
    queue:      VecDeque<InFlight<S::Transfer>>,
    /// Idle transfers waiting to be reused.
    spare:      Vec<S::Transfer>,
    split:      Option<SplitSide>,
    last_index: Option<u64>,
    stats:      PipelineStats,
}

impl<S: ColorSource, K: FrameSink> ReadbackPipeline<S, K> {
    pub fn new(source: S, sink: K, depth: usize) -> Self {
        Self {
            source,
            sink,
            depth,
            queue: VecDeque::with_capacity(depth + 1),
            spare: Vec::new(),
            split: None,
            last_index: None,
            stats: PipelineStats::default(),
        }
    }

    /// Composes every frame with its reference frame on the given side.
    pub fn with_split(mut self, side: SplitSide) -> Self {
        self.split = Some(side);
        self
    }

    /// Number of frames drawn but not yet written.
    pub fn in_flight(&self) -> usize {
        self.queue.len()
    }

    pub fn stats(&self) -> PipelineStats {
        self.stats
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Enqueues frame `index`, collecting the oldest frame first when the
    /// queue is full. Indices must strictly increase.
    pub fn push(&mut self, index: u64, pose: Option<&Pose>, reference: Option<RgbImage>) -> Result<()> {
        if self.last_index.is_some_and(|last| index <= last) {
            return Err(RenderError::InvalidState("frame indices must strictly increase"));
        }
        self.last_index = Some(index);

        while !self.queue.is_empty() && self.queue.len() >= self.depth {
            self.drain_one(false)?;
        }

        let transfer = match pose {
            Some(pose) => {
                let reuse = self.spare.pop();
                let transfer = self.source.render_async(pose, reuse)?;
                self.stats.rendered += 1;
                Some(transfer)
            }
            None => {
                tracing::debug!(frame = index, "no pose, queuing placeholder");
                None
            }
        };

        self.queue.push_back(InFlight {
            index,
            transfer,
            reference,
        });
        Ok(())
    }

    fn drain_one(&mut self, release: bool) -> Result<()> {
        let Some(entry) = self.queue.pop_front() else {
            return Ok(());
        };

        let (width, height) = self.source.frame_size();
        let frame = match entry.transfer {
            Some(transfer) => {
                let (frame, back) = self.source.complete(transfer, release)?;
                self.spare.extend(back);
                frame
            }
            None => {
                self.stats.placeholders += 1;
                RgbImage::new(width, height)
            }
        };

        let frame = match self.split {
            Some(side) => {
                let reference = entry
                    .reference
                    .unwrap_or_else(|| RgbImage::new(frame.width(), frame.height()));
                compose_split(&frame, &reference, side)?
            }
            None => frame,
        };

        self.sink.write_frame(entry.index, &frame)?;
        self.stats.written += 1;
        Ok(())
    }

    /// Flushes every frame still in flight, releases all buffers and hands
    /// back the source and sink.
    pub fn finish(mut self) -> Result<(S, K, PipelineStats)> {
        self.depth = 0;
        while !self.queue.is_empty() {
            self.drain_one(true)?;
        }
        for transfer in self.spare.drain(..) {
            self.source.release(transfer);
        }
        tracing::info!(
            written = self.stats.written,
            rendered = self.stats.rendered,
            placeholders = self.stats.placeholders,
            "readback pipeline drained"
        );
        Ok((self.source, self.sink, self.stats))
    }
}
