//! Counting line geometry
//!
//! The line is an arbitrary segment with an explicit positive side, so it
//! works for slanted camera setups, not only horizontal lines. The side of
//! a point is the sign of the cross product against the segment direction:
//! the positive side is the left of start->end. `flipped()` swaps sides.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// 2D point in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned bounding box in frame coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// Anchor point used for crossing checks: bottom-center of the box,
    /// which tracks the road contact point of a vehicle.
    pub fn anchor(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, self.y2)
    }
}

/// Which side of the counting line a point lies on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Positive,
    Negative,
    OnLine,
}

/// Counting line with an oriented positive side
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CountingLine {
    start: Point,
    end: Point,
}

impl CountingLine {
    /// Create a counting line. A degenerate segment (start == end) has no
    /// defined sides and is rejected as a config error.
    pub fn new(start: Point, end: Point) -> Result<Self> {
        if (start.x - end.x).abs() < f32::EPSILON && (start.y - end.y).abs() < f32::EPSILON {
            return Err(Error::Config(
                "counting line is degenerate (start == end)".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    /// Horizontal line at `y` spanning `[0, width]`, positive side below
    /// (larger y). The common single-camera approach setup.
    pub fn horizontal(y: f32, width: f32) -> Result<Self> {
        Self::new(Point::new(0.0, y), Point::new(width, y))
    }

    /// Same segment with the positive side swapped.
    pub fn flipped(self) -> Self {
        Self {
            start: self.end,
            end: self.start,
        }
    }

    /// Signed area of the (start, end, p) triangle. Positive on the
    /// positive side, negative on the other, zero exactly on the line.
    pub fn signed_side(&self, p: Point) -> f32 {
        let dx = self.end.x - self.start.x;
        let dy = self.end.y - self.start.y;
        dx * (p.y - self.start.y) - dy * (p.x - self.start.x)
    }

    pub fn side(&self, p: Point) -> Side {
        let s = self.signed_side(p);
        if s > 0.0 {
            Side::Positive
        } else if s < 0.0 {
            Side::Negative
        } else {
            Side::OnLine
        }
    }
}
