//! GPU-side geometry types.

/// Positions, location 0. Must match `VertexInput` in `points_common.wgsl`.
pub const POSITION_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
/// Colors in [0, 1], location 1.
pub const COLOR_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x3];
/// Per-point ids, location 2.
pub const ID_ATTRS: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![2 => Sint32];

/// One buffer per stream, all stepped per vertex.
pub fn vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 3] {
    [
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as u64,
            step_mode:    wgpu::VertexStepMode::Vertex,
            attributes:   &POSITION_ATTRS,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<[f32; 3]>() as u64,
            step_mode:    wgpu::VertexStepMode::Vertex,
            attributes:   &COLOR_ATTRS,
        },
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<i32>() as u64,
            step_mode:    wgpu::VertexStepMode::Vertex,
            attributes:   &ID_ATTRS,
        },
    ]
}

/// Static scene geometry; uploaded once per scene and never written again.
#[derive(Debug)]
pub struct GeometryBuffers {
    pub positions:    wgpu::Buffer,
    pub colors:       wgpu::Buffer,
    pub ids:          wgpu::Buffer,
    /// Triangle indices, present only for cube primitives.
    pub indices:      Option<wgpu::Buffer>,
    pub vertex_count: u32,
    pub index_count:  u32,
    /// Number of source points, independent of the primitive.
    pub point_count:  u32,
}

impl GeometryBuffers {
    pub fn is_indexed(&self) -> bool {
        self.indices.is_some()
    }
}
