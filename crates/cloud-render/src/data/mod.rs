// src/data/mod.rs
//! Scene data and its GPU representation.
//!
//! This module provides functionality for:
//! - Holding a colored point cloud and expanding it into vertex streams.
//! - Defining the vertex layouts and GPU buffers the renderer binds.

pub mod point_cloud;
pub mod types;

pub use self::point_cloud::{PointCloud, Primitive, VertexStreams, DEFAULT_CUBE_SIZE};
pub use self::types::GeometryBuffers;
