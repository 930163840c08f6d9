//! Side-by-side comparison frames.

use crate::error::{RenderError, Result};
use image::RgbImage;
use std::fmt;
use std::str::FromStr;

/// Half of the output that shows the reference video.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SplitSide {
    /// Reference on the left, render on the right.
    Left,
    /// Render on the left, reference on the right.
    Right,
}

impl FromStr for SplitSide {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "l" | "left" => Ok(SplitSide::Left),
            "r" | "right" => Ok(SplitSide::Right),
            other => Err(format!("unknown split side '{other}' (expected l or r)")),
        }
    }
}

impl fmt::Display for SplitSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SplitSide::Left => "l",
            SplitSide::Right => "r",
        })
    }
}

/// Joins the left half of one frame with the right half of the other at
/// `width / 2`. Both frames must have the same size.
pub fn compose_split(rendered: &RgbImage, reference: &RgbImage, side: SplitSide) -> Result<RgbImage> {
    if rendered.dimensions() != reference.dimensions() {
        return Err(RenderError::InvalidGeometry(format!(
            "cannot split {:?} render with {:?} reference",
            rendered.dimensions(),
            reference.dimensions()
        )));
    }

    let split = rendered.width() / 2;
    let (left, right) = match side {
        SplitSide::Left => (reference, rendered),
        SplitSide::Right => (rendered, reference),
    };

    let mut out = left.clone();
    for (x, y, px) in out.enumerate_pixels_mut() {
        if x >= split {
            *px = *right.get_pixel(x, y);
        }
    }
    Ok(out)
}
