use crate::error::{RenderError, Result};
use crate::renderer::targets::READABLE_FORMATS;

/// Headless GPU device bound to a render resolution.
pub struct GfxContext {
    pub device: wgpu::Device,
    pub queue:  wgpu::Queue,
    pub info:   wgpu::AdapterInfo,
    pub limits: wgpu::Limits,
    size:       (u32, u32),
}

impl GfxContext {
    /// Acquires an adapter and device without any surface.
    pub async fn new(width: u32, height: u32) -> Result<Self> {
        let fail = |reason: String| RenderError::ContextAcquisition { width, height, reason };

        if width == 0 || height == 0 {
            return Err(fail("resolution must be non-zero".into()));
        }

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });

        // No surface: any adapter able to render offscreen will do.
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference:       wgpu::PowerPreference::HighPerformance,
                compatible_surface:     None,
                force_fallback_adapter: false,
            })
            .await
            .ok_or_else(|| fail("no suitable GPU adapter".into()))?;

        // Every attachment is rendered into and copied out of.
        let needed = wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC;
        for format in READABLE_FORMATS {
            let features = adapter.get_texture_format_features(format);
            if !features.allowed_usages.contains(needed) {
                return Err(fail(format!("adapter cannot render and read back {format:?}")));
            }
        }

        let limits = adapter.limits();
        let max_dim = limits.max_texture_dimension_2d;
        if width > max_dim || height > max_dim {
            return Err(fail(format!("adapter supports at most {max_dim} pixels per side")));
        }

        let (device, queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label:             Some("cloud_render device"),
                    required_features: wgpu::Features::empty(),
                    required_limits:   limits.clone(),
                },
                None, // no trace
            )
            .await
            .map_err(|e| fail(e.to_string()))?;

        // Errors outside an explicit scope would otherwise panic inside wgpu.
        device.on_uncaptured_error(Box::new(|err| {
            tracing::error!(error = %err, "uncaptured wgpu error");
        }));

        let info = adapter.get_info();
        tracing::info!(
            adapter = %info.name,
            backend = ?info.backend,
            width,
            height,
            "GPU context acquired"
        );

        Ok(Self {
            device,
            queue,
            info,
            limits,
            size: (width, height),
        })
    }

    /// Blocking wrapper around [`GfxContext::new`].
    pub fn acquire(width: u32, height: u32) -> Result<Self> {
        pollster::block_on(Self::new(width, height))
    }

    /// Resolution the context was acquired for.
    pub fn size(&self) -> (u32, u32) {
        self.size
    }

    /// Runs a GPU allocation inside error scopes so out-of-memory and
    /// validation failures come back as `ResourceExhaustion` instead of
    /// reaching the uncaptured handler.
    pub fn allocate<T>(&self, what: &str, f: impl FnOnce(&wgpu::Device) -> T) -> Result<T> {
        match self.scoped(f) {
            (value, None) => Ok(value),
            (_, Some(err)) => {
                tracing::error!(what, error = %err, "GPU allocation failed");
                Err(RenderError::ResourceExhaustion {
                    what:   what.to_string(),
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Runs `f` inside out-of-memory and validation error scopes and returns
    /// the first error either scope caught.
    pub fn scoped<T>(&self, f: impl FnOnce(&wgpu::Device) -> T) -> (T, Option<wgpu::Error>) {
        self.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        self.device.push_error_scope(wgpu::ErrorFilter::Validation);

        let value = f(&self.device);

        let validation = pollster::block_on(self.device.pop_error_scope());
        let oom = pollster::block_on(self.device.pop_error_scope());
        (value, oom.or(validation))
    }
}
