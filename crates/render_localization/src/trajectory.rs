//! Localization results: one camera pose per frame number.

use anyhow::Context;
use cloud_render::{Pose, QuaternionOrder, RenderError};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::ops::RangeInclusive;
use std::path::Path;

#[derive(Debug, thiserror::Error)]
pub enum TrajectoryError {
    #[error("trajectory is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("frame key '{0}' is not a frame number")]
    BadFrameKey(String),

    #[error("frame {frame}: {source}")]
    InvalidPose { frame: u64, source: RenderError },
}

#[derive(Debug, Deserialize)]
struct RawPose {
    position:   [f64; 3],
    quaternion: [f64; 4],
}

#[derive(Debug, Clone, Default)]
pub struct Trajectory {
    poses: BTreeMap<u64, Pose>,
}

impl Trajectory {
    pub fn from_reader(reader: impl Read, order: QuaternionOrder) -> Result<Self, TrajectoryError> {
        let raw: BTreeMap<String, RawPose> = serde_json::from_reader(reader)?;
        let mut poses = BTreeMap::new();
        for (key, raw) in raw {
            let frame: u64 = key
                .trim()
                .parse()
                .map_err(|_| TrajectoryError::BadFrameKey(key.clone()))?;
            let pose = Pose::new(raw.position, raw.quaternion, order)
                .map_err(|source| TrajectoryError::InvalidPose { frame, source })?;
            poses.insert(frame, pose);
        }
        Ok(Self { poses })
    }

    pub fn load(path: &Path, order: QuaternionOrder) -> anyhow::Result<Self> {
        let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
        let trajectory = Self::from_reader(BufReader::new(file), order)
            .with_context(|| format!("reading trajectory {}", path.display()))?;
        tracing::info!(
            poses = trajectory.len(),
            first = ?trajectory.first_frame(),
            last = ?trajectory.last_frame(),
            %order,
            "trajectory loaded"
        );
        Ok(trajectory)
    }

    /// Pose of `frame`; absent frames are `MissingPoseForFrame`.
    pub fn pose(&self, frame: u64) -> Result<&Pose, RenderError> {
        self.poses.get(&frame).ok_or(RenderError::MissingPoseForFrame(frame))
    }

    pub fn first_frame(&self) -> Option<u64> {
        self.poses.keys().next().copied()
    }

    pub fn last_frame(&self) -> Option<u64> {
        self.poses.keys().next_back().copied()
    }

    pub fn len(&self) -> usize {
        self.poses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.poses.is_empty()
    }
}

/// Frames to render: from `start` up to the last localized frame, cut short
/// by `total_frames` and by the frames the reference video still has after
/// `start`. `None` when nothing is left.
pub fn frame_range(
    start: u64,
    last_frame: u64,
    total_frames: Option<u64>,
    video_frames: Option<u64>,
) -> Option<RangeInclusive<u64>> {
    let mut last = last_frame;
    for limit in [total_frames, video_frames].into_iter().flatten() {
        if limit == 0 {
            return None;
        }
        last = last.min(start.saturating_add(limit - 1));
    }
    (start <= last).then_some(start..=last)
}
