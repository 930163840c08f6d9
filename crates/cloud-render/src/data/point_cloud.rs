use crate::data::types::GeometryBuffers;
use crate::error::{RenderError, Result};
use crate::GfxContext;
use glam::Vec3;
use rayon::prelude::*;
use wgpu::util::DeviceExt;

/// Edge length used when points are expanded into cubes and none is given.
pub const DEFAULT_CUBE_SIZE: f32 = 0.03;

/// Corner offsets in units of the half edge; bit 0 is x, bit 1 is y, bit 2 is z.
const CUBE_CORNERS: [[f32; 3]; 8] = [
    [-1.0, -1.0, -1.0],
    [1.0, -1.0, -1.0],
    [-1.0, 1.0, -1.0],
    [1.0, 1.0, -1.0],
    [-1.0, -1.0, 1.0],
    [1.0, -1.0, 1.0],
    [-1.0, 1.0, 1.0],
    [1.0, 1.0, 1.0],
];

/// Two triangles per face, faces ordered -x, +x, -y, +y, -z, +z.
#[rustfmt::skip]
const CUBE_TRIANGLES: [u32; 36] = [
    0, 4, 6,  0, 6, 2,
    1, 3, 7,  1, 7, 5,
    0, 1, 5,  0, 5, 4,
    2, 6, 7,  2, 7, 3,
    0, 2, 3,  0, 3, 1,
    4, 5, 7,  4, 7, 6,
];

/// How each point is rasterized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Primitive {
    /// One pixel per point.
    Points,
    /// An axis-aligned cube of the given edge length around each point.
    Cubes { size: f32 },
}

impl Default for Primitive {
    fn default() -> Self {
        Primitive::Points
    }
}

impl Primitive {
    pub fn topology(&self) -> wgpu::PrimitiveTopology {
        match self {
            Primitive::Points => wgpu::PrimitiveTopology::PointList,
            Primitive::Cubes { .. } => wgpu::PrimitiveTopology::TriangleList,
        }
    }
}

/// A colored point cloud in world coordinates. Point `i` carries id `i`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PointCloud {
    pub positions: Vec<[f32; 3]>,
    pub colors:    Vec<[u8; 3]>,
}

impl PointCloud {
    pub fn new(positions: Vec<[f32; 3]>, colors: Vec<[u8; 3]>) -> Result<Self> {
        if positions.len() != colors.len() {
            return Err(RenderError::InvalidGeometry(format!(
                "{} positions but {} colors",
                positions.len(),
                colors.len()
            )));
        }
        // Ids are int32 on the GPU and -1 is reserved for background.
        if positions.len() > i32::MAX as usize {
            return Err(RenderError::InvalidGeometry(format!(
                "{} points exceed the id range",
                positions.len()
            )));
        }
        Ok(Self { positions, colors })
    }

    /// Drops the alpha channel of RGBA colors.
    pub fn from_rgba(positions: Vec<[f32; 3]>, colors: &[[u8; 4]]) -> Result<Self> {
        let colors = colors.iter().map(|[r, g, b, _]| [*r, *g, *b]).collect();
        Self::new(positions, colors)
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Axis-aligned bounds, `None` for an empty cloud.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = Vec3::from(*self.positions.first()?);
        Some(self.positions.iter().fold((first, first), |(lo, hi), p| {
            let p = Vec3::from(*p);
            (lo.min(p), hi.max(p))
        }))
    }

    /// Expands the cloud into the vertex streams for `primitive`.
    pub fn streams(&self, primitive: Primitive) -> Result<VertexStreams> {
        match primitive {
            Primitive::Points => Ok(self.point_streams()),
            Primitive::Cubes { size } => self.cube_streams(size),
        }
    }

    fn point_streams(&self) -> VertexStreams {
        let colors = self.colors.par_iter().map(|c| normalize_color(*c)).collect();
        let ids = (0..self.len() as i32).into_par_iter().collect();
        VertexStreams {
            positions: self.positions.clone(),
            colors,
            ids,
            indices: None,
        }
    }

    fn cube_streams(&self, size: f32) -> Result<VertexStreams> {
        if !(size.is_finite() && size > 0.0) {
            return Err(RenderError::InvalidGeometry(format!(
                "cube size {size} must be positive"
            )));
        }
        let n = self.len();
        let vertex_count = n.checked_mul(CUBE_CORNERS.len()).filter(|v| *v <= u32::MAX as usize);
        let index_count = n.checked_mul(CUBE_TRIANGLES.len()).filter(|v| *v <= u32::MAX as usize);
        if vertex_count.is_none() || index_count.is_none() {
            return Err(RenderError::InvalidGeometry(format!(
                "{n} cubes exceed the 32-bit index range"
            )));
        }

        let half = size / 2.0;
        let positions = self
            .positions
            .par_iter()
            .flat_map_iter(|p| {
                let center = Vec3::from(*p);
                CUBE_CORNERS
                    .iter()
                    .map(move |c| (center + Vec3::from(*c) * half).to_array())
            })
            .collect();
        let colors = self
            .colors
            .par_iter()
            .flat_map_iter(|c| std::iter::repeat(normalize_color(*c)).take(CUBE_CORNERS.len()))
            .collect();
        let ids = (0..n as i32)
            .into_par_iter()
            .flat_map_iter(|id| std::iter::repeat(id).take(CUBE_CORNERS.len()))
            .collect();
        let indices = (0..n as u32)
            .into_par_iter()
            .flat_map_iter(|cube| {
                let base = cube * CUBE_CORNERS.len() as u32;
                CUBE_TRIANGLES.iter().map(move |i| base + i)
            })
            .collect();

        Ok(VertexStreams {
            positions,
            colors,
            ids,
            indices: Some(indices),
        })
    }

    /// Expands and uploads the cloud as static vertex buffers.
    pub fn upload(&self, gfx: &GfxContext, primitive: Primitive) -> Result<GeometryBuffers> {
        let streams = self.streams(primitive)?;
        let geometry = gfx.allocate("scene geometry", |device| {
            let init = |label: &str, contents: &[u8], usage| {
                device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                    label: Some(label),
                    contents,
                    usage,
                })
            };
            let vertex = wgpu::BufferUsages::VERTEX;
            GeometryBuffers {
                positions:    init("Point Positions VB", bytemuck::cast_slice(&streams.positions), vertex),
                colors:       init("Point Colors VB", bytemuck::cast_slice(&streams.colors), vertex),
                ids:          init("Point Ids VB", bytemuck::cast_slice(&streams.ids), vertex),
                indices:      streams.indices.as_ref().map(|indices| {
                    init("Cube Indices IB", bytemuck::cast_slice(indices), wgpu::BufferUsages::INDEX)
                }),
                vertex_count: streams.vertex_count(),
                index_count:  streams.index_count(),
                point_count:  self.len() as u32,
            }
        })?;

        tracing::info!(
            points = self.len(),
            vertices = geometry.vertex_count,
            indices = geometry.index_count,
            ?primitive,
            "scene geometry uploaded"
        );
        Ok(geometry)
    }
}

fn normalize_color([r, g, b]: [u8; 3]) -> [f32; 3] {
    [r as f32 / 255.0, g as f32 / 255.0, b as f32 / 255.0]
}

/// CPU-side vertex data, one entry per vertex in every stream.
#[derive(Debug, Clone, PartialEq)]
pub struct VertexStreams {
    pub positions: Vec<[f32; 3]>,
    pub colors:    Vec<[f32; 3]>,
    pub ids:       Vec<i32>,
    pub indices:   Option<Vec<u32>>,
}

impl VertexStreams {
    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    pub fn index_count(&self) -> u32 {
        self.indices.as_ref().map_or(0, |i| i.len() as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cloud() -> PointCloud {
        PointCloud::new(
            vec![[0.0, 0.0, 0.0], [1.0, 2.0, 3.0], [-1.0, 0.5, 2.0]],
            vec![[255, 0, 0], [0, 255, 0], [0, 0, 51]],
        )
        .unwrap()
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = PointCloud::new(vec![[0.0; 3]; 2], vec![[0; 3]]).unwrap_err();
        assert!(matches!(err, RenderError::InvalidGeometry(_)));
    }

    #[test]
    fn rgba_alpha_is_dropped() {
        let cloud = PointCloud::from_rgba(vec![[0.0; 3]], &[[10, 20, 30, 40]]).unwrap();
        assert_eq!(cloud.colors, vec![[10, 20, 30]]);
    }

    #[test]
    fn bounds_cover_all_points() {
        let (lo, hi) = cloud().bounds().unwrap();
        assert_eq!(lo, Vec3::new(-1.0, 0.0, 0.0));
        assert_eq!(hi, Vec3::new(1.0, 2.0, 3.0));
        assert!(PointCloud::default().bounds().is_none());
    }

    #[test]
    fn point_streams_carry_sequential_ids() {
        let streams = cloud().streams(Primitive::Points).unwrap();
        assert_eq!(streams.ids, vec![0, 1, 2]);
        assert_eq!(streams.colors[0], [1.0, 0.0, 0.0]);
        assert!((streams.colors[2][2] - 0.2).abs() < 1e-6);
        assert!(streams.indices.is_none());
    }

    #[test]
    fn cubes_expand_every_point() {
        let streams = cloud().streams(Primitive::Cubes { size: 0.5 }).unwrap();
        assert_eq!(streams.vertex_count(), 24);
        assert_eq!(streams.index_count(), 108);
        assert_eq!(&streams.ids[8..16], &[1; 8]);
        assert_eq!(streams.colors[15], [0.0, 1.0, 0.0]);

        // Corners of the second cube sit a half edge away from its point.
        for p in &streams.positions[8..16] {
            let d = Vec3::from(*p) - Vec3::new(1.0, 2.0, 3.0);
            assert_eq!(d.abs(), Vec3::splat(0.25));
        }

        let indices = streams.indices.unwrap();
        assert!(indices[36..72].iter().all(|i| (8..16).contains(i)));
        assert_eq!(*indices.iter().max().unwrap(), 23);
    }

    #[test]
    fn cube_faces_are_planar() {
        // Each triangle lies on one face: one coordinate is shared by all three corners.
        for tri in CUBE_TRIANGLES.chunks(3) {
            let [a, b, c] = [tri[0], tri[1], tri[2]].map(|i| Vec3::from(CUBE_CORNERS[i as usize]));
            let shared = (0..3).filter(|&axis| a[axis] == b[axis] && b[axis] == c[axis]).count();
            assert_eq!(shared, 1, "{tri:?}");
        }
    }

    #[test]
    fn non_positive_cube_size_is_rejected() {
        assert!(cloud().streams(Primitive::Cubes { size: 0.0 }).is_err());
    }
}
