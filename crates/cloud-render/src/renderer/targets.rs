//! Offscreen render targets: color, per-point id and depth attachments.
//!
//! Depth is written twice: into the depth buffer for the depth test and into
//! an `R32Float` color target for readback. Depth textures cannot be copied
//! to buffers on downlevel backends (GL), color targets always can.

use crate::error::Result;
use crate::GfxContext;

pub const COLOR_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Rgba8Unorm;
pub const ID_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Sint;
pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;
pub const DEPTH_VALUE_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::R32Float;

/// Formats rendered into and copied out of; the adapter must support both.
pub const READABLE_FORMATS: [wgpu::TextureFormat; 3] = [COLOR_FORMAT, ID_FORMAT, DEPTH_VALUE_FORMAT];

/// The attachments for one viewport size.
pub struct Attachments {
    pub color_tex:       wgpu::Texture,
    pub id_tex:          wgpu::Texture,
    /// Window-space depth per pixel, copied out on depth reads.
    pub depth_value_tex: wgpu::Texture,
    /// Depth-test buffer; never read back.
    pub depth_tex:       wgpu::Texture,

    pub color:        wgpu::TextureView,
    pub ids:          wgpu::TextureView,
    pub depth_values: wgpu::TextureView,
    pub depth:        wgpu::TextureView,

    pub width:  u32,
    pub height: u32,
}

impl Attachments {
    fn new(gfx: &GfxContext, width: u32, height: u32) -> Result<Self> {
        let tex_size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        gfx.allocate(&format!("{width}x{height} framebuffer"), |device| {
            let create_tex = |label: &str, format, usage| {
                device.create_texture(&wgpu::TextureDescriptor {
                    label: Some(label),
                    size: tex_size,
                    mip_level_count: 1,
                    sample_count: 1,
                    dimension: wgpu::TextureDimension::D2,
                    format,
                    usage,
                    view_formats: &[],
                })
            };

            let readable = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
            let color_tex = create_tex("Offscreen Color Target", COLOR_FORMAT, readable);
            let id_tex = create_tex("Offscreen Id Target", ID_FORMAT, readable);
            let depth_value_tex = create_tex("Offscreen Depth Value Target", DEPTH_VALUE_FORMAT, readable);
            let depth_tex = create_tex(
                "Offscreen Depth Target",
                DEPTH_FORMAT,
                wgpu::TextureUsages::RENDER_ATTACHMENT,
            );

            Self {
                color: color_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                ids: id_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                depth_values: depth_value_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                depth: depth_tex.create_view(&wgpu::TextureViewDescriptor::default()),
                color_tex,
                id_tex,
                depth_value_tex,
                depth_tex,
                width,
                height,
            }
        })
    }

    fn destroy(self) {
        self.color_tex.destroy();
        self.id_tex.destroy();
        self.depth_value_tex.destroy();
        self.depth_tex.destroy();
    }
}

/// Owns the attachments and keeps them matched to the viewport.
#[derive(Default)]
pub struct Framebuffer {
    attachments: Option<Attachments>,
    allocations: u64,
    releases:    u64,
}

impl Framebuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the attachments match `width` x `height`. Idempotent for an
    /// unchanged size; otherwise releases the old set before allocating.
    pub fn ensure(&mut self, gfx: &GfxContext, width: u32, height: u32) -> Result<&Attachments> {
        let matches = self
            .attachments
            .as_ref()
            .is_some_and(|a| a.width == width && a.height == height);
        if !matches {
            self.reallocate(gfx, width, height)?;
        }
        self.attachments().ok_or(crate::RenderError::InvalidState("framebuffer not allocated"))
    }

    /// Releases every attachment. The framebuffer is empty afterwards.
    pub fn invalidate(&mut self) {
        if let Some(old) = self.attachments.take() {
            tracing::debug!(width = old.width, height = old.height, "releasing framebuffer");
            old.destroy();
            self.releases += 1;
        }
    }

    pub fn reallocate(&mut self, gfx: &GfxContext, width: u32, height: u32) -> Result<()> {
        self.invalidate();
        let attachments = Attachments::new(gfx, width, height)?;
        self.attachments = Some(attachments);
        self.allocations += 1;
        tracing::debug!(width, height, "framebuffer allocated");
        Ok(())
    }

    pub fn attachments(&self) -> Option<&Attachments> {
        self.attachments.as_ref()
    }

    pub fn dims(&self) -> Option<(u32, u32)> {
        self.attachments.as_ref().map(|a| (a.width, a.height))
    }

    /// Attachment sets created so far.
    pub fn allocations(&self) -> u64 {
        self.allocations
    }

    /// Attachment sets released so far.
    pub fn releases(&self) -> u64 {
        self.releases
    }
}
