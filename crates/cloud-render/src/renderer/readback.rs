//! Moving attachment contents back to the CPU.
//!
//! wgpu textures are addressed with row 0 at the top, so every image produced
//! here is already top-left origin. Copies into buffers need each row padded
//! to `COPY_BYTES_PER_ROW_ALIGNMENT`; the padding is stripped on the way out.

use super::targets::Attachments;
use crate::error::{RenderError, Result};
use crate::GfxContext;
use futures::channel::oneshot;
use image::{ImageBuffer, Luma, RgbImage};

/// Every attachment format used here is four bytes per texel.
const BYTES_PER_TEXEL: u32 = 4;

pub type IdImage = ImageBuffer<Luma<i32>, Vec<i32>>;
pub type DepthImage = ImageBuffer<Luma<f32>, Vec<f32>>;

/// Which attachments a synchronous read returns besides color.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadbackSet {
    Color,
    ColorAndIds,
    ColorAndDepth,
    All,
}

impl ReadbackSet {
    pub fn ids(self) -> bool {
        matches!(self, ReadbackSet::ColorAndIds | ReadbackSet::All)
    }

    pub fn depth(self) -> bool {
        matches!(self, ReadbackSet::ColorAndDepth | ReadbackSet::All)
    }
}

/// Result of a synchronous read.
#[derive(Debug, Clone)]
pub struct Readback {
    pub color: RgbImage,
    /// Point id per pixel, -1 where nothing was drawn.
    pub ids:   Option<IdImage>,
    /// Depth in [0, 1], 1 where nothing was drawn.
    pub depth: Option<DepthImage>,
}

/// Row pitch for a buffer copy of `width` texels.
pub fn padded_bytes_per_row(width: u32) -> u32 {
    let unpadded = width * BYTES_PER_TEXEL;
    let align = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;
    unpadded.div_ceil(align) * align
}

/// Strips row padding, keeping `width * 4` bytes per row.
fn depad(data: &[u8], width: u32, height: u32, padded_bpr: u32) -> Vec<u8> {
    let row = (width * BYTES_PER_TEXEL) as usize;
    data.chunks(padded_bpr as usize)
        .take(height as usize)
        .flat_map(|r| &r[..row])
        .copied()
        .collect()
}

fn rgba_rows_to_rgb(data: &[u8], width: u32, height: u32, padded_bpr: u32) -> Result<RgbImage> {
    let rgb = depad(data, width, height, padded_bpr)
        .chunks_exact(4)
        .flat_map(|px| [px[0], px[1], px[2]])
        .collect();
    RgbImage::from_raw(width, height, rgb)
        .ok_or_else(|| RenderError::Readback(format!("short color readback for {width}x{height}")))
}

fn word_rows<T>(
    data: &[u8],
    width: u32,
    height: u32,
    padded_bpr: u32,
    from_bytes: fn([u8; 4]) -> T,
) -> Vec<T> {
    depad(data, width, height, padded_bpr)
        .chunks_exact(4)
        .map(|w| from_bytes([w[0], w[1], w[2], w[3]]))
        .collect()
}

fn staging_buffer(gfx: &GfxContext, label: &str, width: u32, height: u32) -> Result<wgpu::Buffer> {
    let size = padded_bytes_per_row(width) as u64 * height as u64;
    gfx.allocate(label, |device| {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    })
}

fn copy_to_buffer(
    encoder: &mut wgpu::CommandEncoder,
    texture: &wgpu::Texture,
    buffer: &wgpu::Buffer,
    width: u32,
    height: u32,
) {
    encoder.copy_texture_to_buffer(
        wgpu::ImageCopyTexture {
            texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        wgpu::ImageCopyBuffer {
            buffer,
            layout: wgpu::ImageDataLayout {
                offset: 0,
                bytes_per_row: Some(padded_bytes_per_row(width)),
                rows_per_image: Some(height),
            },
        },
        wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        },
    );
}

type MapReceiver = oneshot::Receiver<std::result::Result<(), wgpu::BufferAsyncError>>;

fn request_map(buffer: &wgpu::Buffer) -> MapReceiver {
    let (tx, rx) = oneshot::channel();
    buffer.slice(..).map_async(wgpu::MapMode::Read, move |result| {
        let _ = tx.send(result);
    });
    rx
}

/// Blocks until `submission` retired and the map callback fired.
fn wait_mapped(gfx: &GfxContext, submission: wgpu::SubmissionIndex, ready: MapReceiver) -> Result<()> {
    let _ = gfx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
    pollster::block_on(ready)
        .map_err(|_| RenderError::Readback("map callback dropped".into()))?
        .map_err(|e| RenderError::Readback(e.to_string()))
}

/// Copies the requested attachments and waits for the GPU.
pub fn read_attachments(gfx: &GfxContext, att: &Attachments, set: ReadbackSet) -> Result<Readback> {
    let (width, height) = (att.width, att.height);
    let padded_bpr = padded_bytes_per_row(width);

    let color_buf = staging_buffer(gfx, "Color Readback", width, height)?;
    let id_buf = set
        .ids()
        .then(|| staging_buffer(gfx, "Id Readback", width, height))
        .transpose()?;
    let depth_buf = set
        .depth()
        .then(|| staging_buffer(gfx, "Depth Readback", width, height))
        .transpose()?;

    let (submission, copy_error) = gfx.scoped(|device| {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Readback Encoder"),
        });
        copy_to_buffer(&mut encoder, &att.color_tex, &color_buf, width, height);
        if let Some(buf) = &id_buf {
            copy_to_buffer(&mut encoder, &att.id_tex, buf, width, height);
        }
        if let Some(buf) = &depth_buf {
            copy_to_buffer(&mut encoder, &att.depth_value_tex, buf, width, height);
        }
        gfx.queue.submit(std::iter::once(encoder.finish()))
    });

    let buffers = [Some(&color_buf), id_buf.as_ref(), depth_buf.as_ref()];
    if let Some(err) = copy_error {
        for buf in buffers.into_iter().flatten() {
            buf.destroy();
        }
        tracing::error!(error = %err, "attachment copy rejected");
        return Err(RenderError::Readback(err.to_string()));
    }
    let receivers: Vec<_> = buffers.iter().flatten().map(|b| request_map(b)).collect();
    let _ = gfx.device.poll(wgpu::Maintain::WaitForSubmissionIndex(submission));
    for rx in receivers {
        pollster::block_on(rx)
            .map_err(|_| RenderError::Readback("map callback dropped".into()))?
            .map_err(|e| RenderError::Readback(e.to_string()))?;
    }

    let color = {
        let view = color_buf.slice(..).get_mapped_range();
        rgba_rows_to_rgb(&view, width, height, padded_bpr)?
    };
    let ids = id_buf
        .as_ref()
        .map(|buf| {
            let view = buf.slice(..).get_mapped_range();
            IdImage::from_raw(width, height, word_rows(&view, width, height, padded_bpr, i32::from_ne_bytes))
                .ok_or_else(|| RenderError::Readback("short id readback".into()))
        })
        .transpose()?;
    let depth = depth_buf
        .as_ref()
        .map(|buf| {
            let view = buf.slice(..).get_mapped_range();
            DepthImage::from_raw(width, height, word_rows(&view, width, height, padded_bpr, f32::from_ne_bytes))
                .ok_or_else(|| RenderError::Readback("short depth readback".into()))
        })
        .transpose()?;

    for buf in buffers.into_iter().flatten() {
        buf.unmap();
        buf.destroy();
    }

    Ok(Readback { color, ids, depth })
}

struct PendingMap {
    submission: wgpu::SubmissionIndex,
    ready:      MapReceiver,
}

/// A color readback in flight. Owns its staging buffer; moved, never shared.
pub struct PixelTransfer {
    buffer:     wgpu::Buffer,
    width:      u32,
    height:     u32,
    padded_bpr: u32,
    pending:    Option<PendingMap>,
}

impl PixelTransfer {
    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Destroys the staging buffer, waiting out any map in flight.
    pub fn release(self) {
        if self.pending.is_some() {
            self.buffer.unmap();
        }
        self.buffer.destroy();
    }
}

/// Queues a copy of the color attachment and requests the map without waiting.
///
/// `reuse` is recycled when it is idle and sized for the attachments;
/// otherwise it is released and a new buffer is allocated.
pub fn request_color(
    gfx: &GfxContext,
    att: &Attachments,
    reuse: Option<PixelTransfer>,
) -> Result<PixelTransfer> {
    let (width, height) = (att.width, att.height);

    let mut transfer = match reuse {
        Some(t) if t.dims() == (width, height) && !t.is_pending() => t,
        other => {
            if let Some(stale) = other {
                stale.release();
            }
            PixelTransfer {
                buffer: staging_buffer(gfx, "Async Color Readback", width, height)?,
                width,
                height,
                padded_bpr: padded_bytes_per_row(width),
                pending: None,
            }
        }
    };

    let (submission, copy_error) = gfx.scoped(|device| {
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Async Readback Encoder"),
        });
        copy_to_buffer(&mut encoder, &att.color_tex, &transfer.buffer, width, height);
        gfx.queue.submit(std::iter::once(encoder.finish()))
    });
    if let Some(err) = copy_error {
        transfer.release();
        tracing::error!(error = %err, "color copy rejected");
        return Err(RenderError::Readback(err.to_string()));
    }

    // The map is serviced once the copy retires; nothing blocks here.
    let ready = request_map(&transfer.buffer);
    transfer.pending = Some(PendingMap { submission, ready });
    Ok(transfer)
}

/// Waits for `transfer`, returns its pixels and either recycles or destroys
/// the buffer.
pub fn complete_color(
    gfx: &GfxContext,
    mut transfer: PixelTransfer,
    release: bool,
) -> Result<(RgbImage, Option<PixelTransfer>)> {
    let PendingMap { submission, ready } = transfer
        .pending
        .take()
        .ok_or_else(|| RenderError::Readback("transfer has no pending readback".into()))?;
    wait_mapped(gfx, submission, ready)?;

    let image = {
        let view = transfer.buffer.slice(..).get_mapped_range();
        rgba_rows_to_rgb(&view, transfer.width, transfer.height, transfer.padded_bpr)
    };
    transfer.buffer.unmap();
    let image = image?;

    if release {
        transfer.release();
        Ok((image, None))
    } else {
        Ok((image, Some(transfer)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_are_padded_to_copy_alignment() {
        assert_eq!(padded_bytes_per_row(64), 256);
        assert_eq!(padded_bytes_per_row(65), 512);
        assert_eq!(padded_bytes_per_row(1920), 7680);
        assert_eq!(padded_bytes_per_row(1), 256);
    }

    #[test]
    fn depad_keeps_row_order_and_drops_alpha() {
        // 2x2 image, 256-byte pitch; pixel value encodes (row, col).
        let pitch = 256;
        let mut data = vec![0xEE; pitch * 2];
        for row in 0..2 {
            for col in 0..2 {
                let v = (row * 10 + col) as u8;
                data[row * pitch + col * 4..][..4].copy_from_slice(&[v, v + 100, v + 200, 255]);
            }
        }
        let img = rgba_rows_to_rgb(&data, 2, 2, pitch as u32).unwrap();
        assert_eq!(img.get_pixel(0, 0).0, [0, 100, 200]);
        assert_eq!(img.get_pixel(1, 0).0, [1, 101, 201]);
        assert_eq!(img.get_pixel(0, 1).0, [10, 110, 210]);
    }

    #[test]
    fn id_words_decode() {
        let pitch = 256;
        let mut data = vec![0; pitch];
        data[..4].copy_from_slice(&(-1i32).to_ne_bytes());
        data[4..8].copy_from_slice(&42i32.to_ne_bytes());
        assert_eq!(word_rows(&data, 2, 1, pitch as u32, i32::from_ne_bytes), vec![-1, 42]);
    }

    #[test]
    fn readback_sets_select_attachments() {
        assert!(!ReadbackSet::Color.ids() && !ReadbackSet::Color.depth());
        assert!(ReadbackSet::ColorAndIds.ids() && !ReadbackSet::ColorAndIds.depth());
        assert!(ReadbackSet::All.ids() && ReadbackSet::All.depth());
    }
}
