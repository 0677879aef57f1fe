//! Fixed-Point 2D Vector
//!
//! Deterministic 2D vector operations for platformer physics.
//! World space is y-down: positive Y points toward the floor.

use std::fmt;
use std::ops::{Add, Sub, Neg};
use serde::{Serialize, Deserialize};

use super::fixed::{Fixed, FIXED_SCALE, fixed_clamp, fixed_max, fixed_min, fixed_mul, to_f64};

/// 2D vector with fixed-point components.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct FixedVec2 {
    /// X component (Q16.16 fixed-point)
    pub x: Fixed,
    /// Y component (Q16.16 fixed-point)
    pub y: Fixed,
}

impl FixedVec2 {
    /// Zero vector
    pub const ZERO: Self = Self { x: 0, y: 0 };

    /// Create a new vector from fixed-point components.
    #[inline]
    pub const fn new(x: Fixed, y: Fixed) -> Self {
        Self { x, y }
    }

    /// Create a vector from integer components.
    #[inline]
    pub const fn from_ints(x: i32, y: i32) -> Self {
        Self {
            x: x << FIXED_SCALE,
            y: y << FIXED_SCALE,
        }
    }

    /// Scale by a fixed-point scalar.
    #[inline]
    pub fn scale(self, scalar: Fixed) -> Self {
        Self {
            x: fixed_mul(self.x, scalar),
            y: fixed_mul(self.y, scalar),
        }
    }

    /// Component-wise minimum.
    #[inline]
    pub fn min(self, other: Self) -> Self {
        Self {
            x: fixed_min(self.x, other.x),
            y: fixed_min(self.y, other.y),
        }
    }

    /// Component-wise maximum.
    #[inline]
    pub fn max(self, other: Self) -> Self {
        Self {
            x: fixed_max(self.x, other.x),
            y: fixed_max(self.y, other.y),
        }
    }

    /// Clamp each component into the box spanned by `lo` and `hi`.
    #[inline]
    pub fn clamp_between(self, lo: Self, hi: Self) -> Self {
        Self {
            x: fixed_clamp(self.x, lo.x, hi.x),
            y: fixed_clamp(self.y, lo.y, hi.y),
        }
    }

    /// Same vector with `x` replaced.
    #[inline]
    pub const fn with_x(self, x: Fixed) -> Self {
        Self { x, y: self.y }
    }

    /// Same vector with `y` replaced.
    #[inline]
    pub const fn with_y(self, y: Fixed) -> Self {
        Self { x: self.x, y }
    }
}

// Wrapping, like the scalar ops: overflow never panics inside a tick.
impl Add for FixedVec2 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x.wrapping_add(rhs.x), self.y.wrapping_add(rhs.y))
    }
}

impl Sub for FixedVec2 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x.wrapping_sub(rhs.x), self.y.wrapping_sub(rhs.y))
    }
}

impl Neg for FixedVec2 {
    type Output = Self;
    #[inline]
    fn neg(self) -> Self {
        Self::new(self.x.wrapping_neg(), self.y.wrapping_neg())
    }
}

impl fmt::Debug for FixedVec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.3}, {:.3})", to_f64(self.x), to_f64(self.y))
    }
}

// =============================================================================
// TESTS
// =============================================================================
