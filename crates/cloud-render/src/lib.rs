// src/lib.rs
//! Headless point cloud renderer.
//!
//! Renders a colored point cloud from a camera trajectory into offscreen
//! attachments (color, per-point id, depth) using one of several lens models,
//! and streams the color output back to the CPU through a bounded queue of
//! in-flight readbacks so GPU work overlaps with encoding.

pub mod camera;
pub mod composite;
pub mod context;
pub mod data;
pub mod error;
pub mod frames;
pub mod pose;
pub mod renderer;

pub use camera::{CameraDescriptor, CameraIntrinsics, CameraKind, CameraModel};
pub use composite::{compose_split, SplitSide};
pub use context::GfxContext;
pub use data::{PointCloud, Primitive};
pub use error::{RenderError, Result};
pub use frames::{ColorSource, FrameSink, PipelineStats, ReadbackPipeline, DEFAULT_QUEUE_DEPTH};
pub use pose::{ExtrinsicState, Pose, QuaternionOrder};
pub use renderer::{PointCloudRenderer, ReadbackSet};
