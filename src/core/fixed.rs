//! Q16.16 Fixed-Point Arithmetic
//!
//! Every quantity the tick touches is an `i32` with 16 fractional bits.
//! World units are pixels and velocities are pixels per tick, so the
//! representable range (about +/-32767) covers an 8000 x 1200 level with
//! room to spare. Floats appear only when config and level files are read.

/// Q16.16 fixed-point number stored as i32.
/// 16 bits integer, 16 bits fractional.
pub type Fixed = i32;

/// Number of fractional bits (16)
pub const FIXED_SCALE: i32 = 16;

/// 1.0 in fixed-point (65536)
pub const FIXED_ONE: Fixed = 1 << FIXED_SCALE; // 65536

/// 0.5 in fixed-point (32768)
pub const FIXED_HALF: Fixed = FIXED_ONE >> 1; // 32768

// =============================================================================
// PLATFORMER CONSTANTS (per-tick units, integer literals)
// =============================================================================

/// Gravity: 0.55 px/tick² = floor(0.55 * 65536) = 36044
pub const GRAVITY: Fixed = 36044;

/// Terminal fall speed: 14 px/tick = 14 * 65536
pub const MAX_FALL_SPEED: Fixed = 917504;

/// Player top run speed: 7 px/tick = 7 * 65536
pub const PLAYER_MAX_SPEED: Fixed = 458752;

/// Ground acceleration: 1.2 px/tick² = floor(1.2 * 65536)
pub const ACCELERATION: Fixed = 78643;

/// Velocity retained per tick without control: 0.88 = floor(0.88 * 65536)
pub const FRICTION: Fixed = 57671;

/// Jump impulse: -13.5 px/tick (y grows downward)
pub const JUMP_VELOCITY: Fixed = -884736;

/// Dash speed: 18 px/tick = 18 * 65536
pub const DASH_SPEED: Fixed = 1179648;

/// Default level width: 8000 px
pub const LEVEL_WIDTH: Fixed = 8000 << FIXED_SCALE;

/// Default level height: 1200 px
pub const LEVEL_HEIGHT: Fixed = 1200 << FIXED_SCALE;

// =============================================================================
// OPERATIONS
// =============================================================================

/// Convert a float to fixed-point, truncating toward zero.
///
/// Load-time and const contexts only.
///
/// # Example
/// ```
/// use hollow_sim::core::fixed::{to_fixed, FIXED_ONE};
/// const MY_VALUE: i32 = to_fixed(2.5);
/// assert_eq!(MY_VALUE, FIXED_ONE * 2 + FIXED_ONE / 2);
/// ```
#[inline]
pub const fn to_fixed(f: f64) -> Fixed {
    (f * (FIXED_ONE as f64)) as Fixed
}

/// Convert fixed-point to f64, for writing config back out.
#[inline]
pub fn to_f64(f: Fixed) -> f64 {
    f as f64 / FIXED_ONE as f64
}

/// Multiply two fixed-point numbers.
///
/// Uses i64 intermediate to prevent overflow, then truncates.
#[inline]
pub fn fixed_mul(a: Fixed, b: Fixed) -> Fixed {
    let wide = (a as i64) * (b as i64);
    (wide >> FIXED_SCALE) as Fixed
}

/// Absolute value of a fixed-point number.
#[inline]
pub fn fixed_abs(x: Fixed) -> Fixed {
    if x < 0 { x.wrapping_neg() } else { x }
}

/// Minimum of two fixed-point numbers.
#[inline]
pub fn fixed_min(a: Fixed, b: Fixed) -> Fixed {
    if a < b { a } else { b }
}

/// Maximum of two fixed-point numbers.
#[inline]
pub fn fixed_max(a: Fixed, b: Fixed) -> Fixed {
    if a > b { a } else { b }
}

/// Clamp a fixed-point number to a range.
#[inline]
pub fn fixed_clamp(value: Fixed, min: Fixed, max: Fixed) -> Fixed {
    fixed_max(min, fixed_min(max, value))
}

/// Move `current` toward `target` by at most `step`.
///
/// Used for acceleration toward a target run speed.
#[inline]
pub fn fixed_approach(current: Fixed, target: Fixed, step: Fixed) -> Fixed {
    if current < target {
        fixed_min(current.saturating_add(step), target)
    } else {
        fixed_max(current.saturating_sub(step), target)
    }
}

// =============================================================================
// TESTS
// =============================================================================
