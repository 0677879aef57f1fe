//! Axis-Aligned Bounding Boxes
//!
//! Fixed-point boxes used by the spatial index and the collision
//! resolver. World space is y-down, so `min` is the top-left corner.
//!
//! ```text
//!   min ┌──────────┐
//!       │          │
//!       │  center  │ height
//!       │          │
//!       └──────────┘ max
//!          width
//! ```

use std::fmt;
use serde::{Serialize, Deserialize};

use super::fixed::{Fixed, FIXED_ONE, FIXED_SCALE, fixed_max, fixed_min};
use super::vec2::FixedVec2;

/// Axis of a penetration vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Axis {
    /// Horizontal
    X,
    /// Vertical
    Y,
}

/// Minimum translation needed to separate two overlapping boxes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Penetration {
    /// Axis of least penetration
    pub axis: Axis,
    /// Vector that moves the first box out of the second
    pub push: FixedVec2,
}

/// Axis-aligned bounding box with fixed-point corners.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Aabb {
    /// Top-left corner
    pub min: FixedVec2,
    /// Bottom-right corner
    pub max: FixedVec2,
}

impl Aabb {
    /// Create a box from its corners.
    #[inline]
    pub const fn new(min: FixedVec2, max: FixedVec2) -> Self {
        Self { min, max }
    }

    /// Create a box from a center point and half-extents.
    #[inline]
    pub fn from_center(center: FixedVec2, half: FixedVec2) -> Self {
        Self {
            min: center - half,
            max: center + half,
        }
    }

    /// Create a box from a top-left corner and a size.
    #[inline]
    pub fn from_rect(x: Fixed, y: Fixed, width: Fixed, height: Fixed) -> Self {
        Self {
            min: FixedVec2::new(x, y),
            max: FixedVec2::new(x.wrapping_add(width), y.wrapping_add(height)),
        }
    }

    /// Width of the box.
    #[inline]
    pub fn width(&self) -> Fixed {
        self.max.x.wrapping_sub(self.min.x)
    }

    /// Height of the box.
    #[inline]
    pub fn height(&self) -> Fixed {
        self.max.y.wrapping_sub(self.min.y)
    }

    /// Half of the width and height.
    #[inline]
    pub fn half_extents(&self) -> FixedVec2 {
        FixedVec2::new(self.width() >> 1, self.height() >> 1)
    }

    /// Center point.
    #[inline]
    pub fn center(&self) -> FixedVec2 {
        self.min + self.half_extents()
    }

    /// True if the box has no area.
    #[inline]
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    /// Strict overlap: boxes that only share an edge do not overlap.
    #[inline]
    pub fn overlaps(&self, other: &Aabb) -> bool {
        self.min.x < other.max.x
            && other.min.x < self.max.x
            && self.min.y < other.max.y
            && other.min.y < self.max.y
    }

    /// Inclusive overlap: shared edges count.
    #[inline]
    pub fn touches(&self, other: &Aabb) -> bool {
        self.min.x <= other.max.x
            && other.min.x <= self.max.x
            && self.min.y <= other.max.y
            && other.min.y <= self.max.y
    }

    /// True if `other` lies entirely inside this box (edges inclusive).
    #[inline]
    pub fn contains(&self, other: &Aabb) -> bool {
        self.min.x <= other.min.x
            && other.max.x <= self.max.x
            && self.min.y <= other.min.y
            && other.max.y <= self.max.y
    }

    /// True if the point lies inside this box (edges inclusive).
    #[inline]
    pub fn contains_point(&self, p: FixedVec2) -> bool {
        self.min.x <= p.x && p.x <= self.max.x && self.min.y <= p.y && p.y <= self.max.y
    }

    /// Smallest box containing both boxes.
    #[inline]
    pub fn union(&self, other: &Aabb) -> Aabb {
        Aabb {
            min: self.min.min(other.min),
            max: self.max.max(other.max),
        }
    }

    /// Box moved by `delta`.
    #[inline]
    pub fn translate(&self, delta: FixedVec2) -> Aabb {
        Aabb {
            min: self.min + delta,
            max: self.max + delta,
        }
    }

    /// Box grown by `half` on every side.
    #[inline]
    pub fn expand(&self, half: FixedVec2) -> Aabb {
        Aabb {
            min: self.min - half,
            max: self.max + half,
        }
    }

    /// Clamp both corners into `bounds`.
    ///
    /// A box entirely outside collapses onto the nearest edge of `bounds`.
    #[inline]
    pub fn clamp_to(&self, bounds: &Aabb) -> Aabb {
        Aabb {
            min: self.min.clamp_between(bounds.min, bounds.max),
            max: self.max.clamp_between(bounds.min, bounds.max),
        }
    }

    /// Split into four quadrants: top-left, top-right, bottom-left, bottom-right.
    pub fn quadrants(&self) -> [Aabb; 4] {
        let mid = FixedVec2::new(
            self.min.x.wrapping_add(self.width() >> 1),
            self.min.y.wrapping_add(self.height() >> 1),
        );
        [
            Aabb::new(self.min, mid),
            Aabb::new(FixedVec2::new(mid.x, self.min.y), FixedVec2::new(self.max.x, mid.y)),
            Aabb::new(FixedVec2::new(self.min.x, mid.y), FixedVec2::new(mid.x, self.max.y)),
            Aabb::new(mid, self.max),
        ]
    }

    /// Minimum translation vector that pushes `self` out of `other`.
    ///
    /// Returns `None` when the boxes do not strictly overlap. Ties between
    /// the axes resolve vertically so bodies settle onto ledges.
    pub fn penetration(&self, other: &Aabb) -> Option<Penetration> {
        let overlap_x = fixed_min(self.max.x, other.max.x) - fixed_max(self.min.x, other.min.x);
        let overlap_y = fixed_min(self.max.y, other.max.y) - fixed_max(self.min.y, other.min.y);
        if overlap_x <= 0 || overlap_y <= 0 {
            return None;
        }

        let ca = self.center();
        let cb = other.center();
        if overlap_x < overlap_y {
            let dx = if ca.x < cb.x { -overlap_x } else { overlap_x };
            Some(Penetration { axis: Axis::X, push: FixedVec2::new(dx, 0) })
        } else {
            let dy = if ca.y < cb.y { -overlap_y } else { overlap_y };
            Some(Penetration { axis: Axis::Y, push: FixedVec2::new(0, dy) })
        }
    }

    /// Swept test: move `self` by `delta` and find the first contact with `target`.
    ///
    /// Traces the center of `self` as a segment against `target` expanded by
    /// the half-extents of `self`. Returns the time of impact as a fraction of
    /// the move in `[0, FIXED_ONE]`, or `None` if the path never enters the
    /// target. Grazing contact along an edge is not a hit.
    pub fn sweep(&self, delta: FixedVec2, target: &Aabb) -> Option<Fixed> {
        let expanded = target.expand(self.half_extents());
        let origin = self.center();

        let mut t_enter = i64::MIN;
        let mut t_exit = i64::MAX;

        let axes = [
            (origin.x, delta.x, expanded.min.x, expanded.max.x),
            (origin.y, delta.y, expanded.min.y, expanded.max.y),
        ];
        for (o, d, lo, hi) in axes {
            if d == 0 {
                if o <= lo || o >= hi {
                    return None;
                }
                continue;
            }
            let t1 = time_ratio(lo, o, d);
            let t2 = time_ratio(hi, o, d);
            let (near, far) = if t1 < t2 { (t1, t2) } else { (t2, t1) };
            t_enter = t_enter.max(near);
            t_exit = t_exit.min(far);
        }

        if t_enter >= t_exit || t_exit <= 0 || t_enter > FIXED_ONE as i64 {
            return None;
        }
        Some(t_enter.clamp(0, FIXED_ONE as i64) as Fixed)
    }
}

/// (edge - origin) / delta as Q16.16 in i64, so long moves cannot overflow.
#[inline]
fn time_ratio(edge: Fixed, origin: Fixed, delta: Fixed) -> i64 {
    ((edge as i64 - origin as i64) << FIXED_SCALE) / delta as i64
}

impl fmt::Debug for Aabb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Aabb[{:?} .. {:?}]", self.min, self.max)
    }
}

// =============================================================================
// TESTS
// =============================================================================
