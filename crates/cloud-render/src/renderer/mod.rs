//! The rendering orchestrator. Owns the GPU context, the offscreen framebuffer
//! and the per-scene render state, and moves the results back to the CPU.

pub mod points;
pub mod readback;
pub mod targets;

pub use self::readback::{DepthImage, IdImage, PixelTransfer, Readback, ReadbackSet};
pub use self::targets::Framebuffer;

use self::points::PointsPipeline;
use crate::camera::{CameraDescriptor, CameraModel};
use crate::data::{GeometryBuffers, PointCloud, Primitive};
use crate::error::{RenderError, Result};
use crate::pose::{ExtrinsicState, Pose};
use crate::GfxContext;
use image::RgbImage;

/// Everything a draw binds, built by [`PointCloudRenderer::init_context`].
pub struct RenderState {
    pub pipeline:    PointsPipeline,
    pub camera_ubo:  wgpu::Buffer,
    pub camera_bind: wgpu::BindGroup,
    pub geometry:    GeometryBuffers,
}

/// Lifecycle of a renderer. Operations called ahead of their stage fail
/// with `InvalidState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RendererStage {
    Uninitialized,
    /// Framebuffer allocated.
    ContextReady,
    /// Geometry, lens and pipeline in place; drawable.
    SceneLoaded,
}

pub struct PointCloudRenderer {
    gfx:         GfxContext,
    viewport:    (u32, u32),
    framebuffer: Framebuffer,
    stage:       RendererStage,
    camera:      Option<CameraModel>,
    state:       Option<RenderState>,
}

impl PointCloudRenderer {
    /// Wraps a context; the viewport starts at the context's resolution.
    pub fn new(gfx: GfxContext) -> Self {
        let viewport = gfx.size();
        Self {
            gfx,
            viewport,
            framebuffer: Framebuffer::new(),
            stage: RendererStage::Uninitialized,
            camera: None,
            state: None,
        }
    }

    /// Allocates the framebuffer for the current viewport.
    pub fn init_gpu(&mut self) -> Result<()> {
        let (width, height) = self.viewport;
        self.framebuffer.ensure(&self.gfx, width, height)?;
        if self.stage < RendererStage::ContextReady {
            self.stage = RendererStage::ContextReady;
        }
        Ok(())
    }

    /// Moves the viewport; attachments are recreated at the new size.
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        let max = self.gfx.limits.max_texture_dimension_2d;
        if width == 0 || height == 0 || width > max || height > max {
            return Err(RenderError::InvalidGeometry(format!(
                "viewport {width}x{height} outside 1..={max}"
            )));
        }
        self.viewport = (width, height);
        if self.stage >= RendererStage::ContextReady {
            self.framebuffer.ensure(&self.gfx, width, height)?;
        }
        tracing::debug!(width, height, "viewport resized");
        Ok(())
    }

    /// Builds the lens, the pipeline for it and uploads the static geometry.
    pub fn init_context(
        &mut self,
        cloud: &PointCloud,
        descriptor: &CameraDescriptor,
        primitive: Primitive,
    ) -> Result<()> {
        if self.stage < RendererStage::ContextReady {
            return Err(RenderError::InvalidState("init_gpu must run before init_context"));
        }
        if cloud.is_empty() {
            return Err(RenderError::InvalidGeometry("point cloud is empty".into()));
        }

        let camera = CameraModel::new(descriptor)?;
        let geometry = cloud.upload(&self.gfx, primitive)?;

        let uniform_size = camera.uniform_size();
        let (pipeline, camera_ubo, camera_bind) = self.gfx.allocate("render pipeline", |device| {
            let pipeline = PointsPipeline::new(device, camera.kind(), primitive, uniform_size);
            let camera_ubo = device.create_buffer(&wgpu::BufferDescriptor {
                label: Some("Camera UBO"),
                size: uniform_size,
                usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
                mapped_at_creation: false,
            });
            let camera_bind = device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Camera BindGroup"),
                layout: &pipeline.camera_layout,
                entries: &[wgpu::BindGroupEntry {
                    binding: 0,
                    resource: camera_ubo.as_entire_binding(),
                }],
            });
            (pipeline, camera_ubo, camera_bind)
        })?;

        tracing::info!(lens = %camera.kind(), points = cloud.len(), "scene loaded");

        self.camera = Some(camera);
        self.state = Some(RenderState {
            pipeline,
            camera_ubo,
            camera_bind,
            geometry,
        });
        self.stage = RendererStage::SceneLoaded;
        Ok(())
    }

    /// Applies a pose; every following draw renders from it.
    pub fn locate_camera(&mut self, pose: &Pose) -> Result<&ExtrinsicState> {
        let camera = self
            .camera
            .as_mut()
            .ok_or(RenderError::InvalidState("init_context must run before locate_camera"))?;
        Ok(camera.set_extrinsics(pose))
    }

    /// Renders the scene into the framebuffer and submits the work.
    pub fn draw(&mut self) -> Result<()> {
        let (Some(camera), Some(state)) = (self.camera.as_ref(), self.state.as_ref()) else {
            return Err(RenderError::InvalidState("init_context must run before draw"));
        };
        let (width, height) = self.viewport;
        let att = self.framebuffer.ensure(&self.gfx, width, height)?;

        camera.upload_uniforms(&self.gfx.queue, state);

        let mut encoder = self
            .gfx
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Points Encoder"),
            });
        // Integer and float targets are cleared on their own, each as the
        // only attachment of its pass. GL drivers drop clears of draw buffers
        // other than the first in a multi-target pass.
        clear_target(&mut encoder, &att.ids, wgpu::Color { r: -1.0, g: 0.0, b: 0.0, a: 0.0 });
        clear_target(&mut encoder, &att.depth_values, wgpu::Color { r: 1.0, g: 0.0, b: 0.0, a: 0.0 });
        {
            let mut pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("Points Pass"),
                color_attachments: &[
                    Some(wgpu::RenderPassColorAttachment {
                        view: &att.color,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Clear(wgpu::Color::WHITE),
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: &att.ids,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                    Some(wgpu::RenderPassColorAttachment {
                        view: &att.depth_values,
                        resolve_target: None,
                        ops: wgpu::Operations {
                            load: wgpu::LoadOp::Load,
                            store: wgpu::StoreOp::Store,
                        },
                    }),
                ],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &att.depth,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Store,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            let geometry = &state.geometry;
            pass.set_viewport(0.0, 0.0, width as f32, height as f32, 0.0, 1.0);
            pass.set_pipeline(&state.pipeline.pipeline);
            pass.set_bind_group(0, &state.camera_bind, &[]);
            pass.set_vertex_buffer(0, geometry.positions.slice(..));
            pass.set_vertex_buffer(1, geometry.colors.slice(..));
            pass.set_vertex_buffer(2, geometry.ids.slice(..));
            match &geometry.indices {
                Some(indices) => {
                    pass.set_index_buffer(indices.slice(..), wgpu::IndexFormat::Uint32);
                    pass.draw_indexed(0..geometry.index_count, 0, 0..1);
                }
                None => pass.draw(0..geometry.vertex_count, 0..1),
            }
        }

        self.gfx.queue.submit(std::iter::once(encoder.finish()));
        Ok(())
    }

    /// Synchronously reads the selected attachments.
    pub fn read(&self, set: ReadbackSet) -> Result<Readback> {
        let att = self
            .framebuffer
            .attachments()
            .ok_or(RenderError::InvalidState("init_gpu must run before reading"))?;
        readback::read_attachments(&self.gfx, att, set)
    }

    pub fn read_color(&self) -> Result<RgbImage> {
        Ok(self.read(ReadbackSet::Color)?.color)
    }

    pub fn read_color_and_ids(&self) -> Result<(RgbImage, IdImage)> {
        let Readback { color, ids, .. } = self.read(ReadbackSet::ColorAndIds)?;
        let ids = ids.ok_or_else(|| RenderError::Readback("id attachment missing".into()))?;
        Ok((color, ids))
    }

    pub fn read_color_and_depth(&self) -> Result<(RgbImage, DepthImage)> {
        let Readback { color, depth, .. } = self.read(ReadbackSet::ColorAndDepth)?;
        let depth = depth.ok_or_else(|| RenderError::Readback("depth attachment missing".into()))?;
        Ok((color, depth))
    }

    /// Starts a color readback of the last draw without blocking.
    pub fn request_color_async(&self, reuse: Option<PixelTransfer>) -> Result<PixelTransfer> {
        let att = self
            .framebuffer
            .attachments()
            .ok_or(RenderError::InvalidState("init_gpu must run before reading"))?;
        readback::request_color(&self.gfx, att, reuse)
    }

    /// Finishes a readback started by [`Self::request_color_async`].
    pub fn complete_color(
        &self,
        transfer: PixelTransfer,
        release: bool,
    ) -> Result<(RgbImage, Option<PixelTransfer>)> {
        readback::complete_color(&self.gfx, transfer, release)
    }

    pub fn camera(&self) -> Option<&CameraModel> {
        self.camera.as_ref()
    }

    pub fn stage(&self) -> RendererStage {
        self.stage
    }

    pub fn viewport(&self) -> (u32, u32) {
        self.viewport
    }

    pub fn framebuffer(&self) -> &Framebuffer {
        &self.framebuffer
    }

    pub fn gfx(&self) -> &GfxContext {
        &self.gfx
    }
}

/// Clears `view` in a pass of its own.
fn clear_target(encoder: &mut wgpu::CommandEncoder, view: &wgpu::TextureView, value: wgpu::Color) {
    encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
        label: Some("Clear Pass"),
        color_attachments: &[Some(wgpu::RenderPassColorAttachment {
            view,
            resolve_target: None,
            ops: wgpu::Operations {
                load: wgpu::LoadOp::Clear(value),
                store: wgpu::StoreOp::Store,
            },
        })],
        depth_stencil_attachment: None,
        timestamp_writes: None,
        occlusion_query_set: None,
    });
}
