//! Input Normalization
//!
//! Per-tick controller state and its translation into FSM triggers.
//! Uses a lookup table (MOVE_LUT) for exact i8 to Fixed conversion.

use serde::{Serialize, Deserialize};

use crate::core::fixed::Fixed;
use crate::game::actor::ActorTrigger;

// =============================================================================
// MOVE LOOKUP TABLE
// =============================================================================

/// Lookup table for converting i8 stick input to Fixed.
///
/// Converting i8 [-127..+127] to Fixed [-1.0..+1.0] is `value * 65536 / 127`,
/// which is not an integer multiply, so every value is precomputed once
/// with truncating division.
///
/// Index 128 (-128 as i8) maps to 0: stick released.
pub static MOVE_LUT: [Fixed; 256] = {
    let mut lut = [0i32; 256];
    let mut i = 0i32;
    while i < 256 {
        // 0..127 positive, 128..255 negative (-128..-1)
        let signed = if i < 128 { i } else { i - 256 };
        if signed != -128 {
            lut[i as usize] = (signed * 65536) / 127;
        }
        i += 1;
    }
    lut
};

/// Convert i8 stick input to Fixed.
#[inline]
pub fn move_to_fixed(input: i8) -> Fixed {
    MOVE_LUT[(input as u8) as usize]
}

// =============================================================================
// INPUT FRAME
// =============================================================================

/// Controller state for one tick.
///
/// No tick field; ticks are stored alongside when recording.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InputFrame {
    /// Horizontal stick: -127 (left) to +127 (right), -128 released
    pub move_x: i8,
    /// Button bits, see the `FLAG_*` constants
    pub flags: u8,
}

impl Default for InputFrame {
    fn default() -> Self {
        Self::new()
    }
}

impl InputFrame {
    /// Stick released
    pub const NO_INPUT: i8 = -128;

    /// Jump button
    pub const FLAG_JUMP: u8 = 0x01;
    /// Attack button
    pub const FLAG_ATTACK: u8 = 0x02;
    /// Dash button
    pub const FLAG_DASH: u8 = 0x04;
    /// Special button
    pub const FLAG_SPECIAL: u8 = 0x08;
    /// Heavy attack button
    pub const FLAG_HEAVY: u8 = 0x10;

    /// Idle frame: stick released, nothing pressed.
    pub const fn new() -> Self {
        Self {
            move_x: Self::NO_INPUT,
            flags: 0,
        }
    }

    /// Frame holding the stick at `move_x`.
    pub const fn moving(move_x: i8) -> Self {
        Self { move_x, flags: 0 }
    }

    /// Same frame with `flag` pressed.
    pub const fn with(mut self, flag: u8) -> Self {
        self.flags |= flag;
        self
    }

    /// Horizontal axis in [-1, 1].
    #[inline]
    pub fn move_axis(&self) -> Fixed {
        move_to_fixed(self.move_x)
    }

    /// True if `flag` is pressed.
    #[inline]
    pub fn pressed(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    /// True if nothing is held.
    #[inline]
    pub fn is_idle(&self) -> bool {
        self.move_axis() == 0 && self.flags == 0
    }

    /// Trigger intents for this tick, in the order they are fired:
    /// `Move`/`Stop`, `Jump`, `Attack`, `Heavy`, `Dash`, `Special`.
    pub fn triggers(&self) -> Vec<ActorTrigger> {
        let mut out = Vec::with_capacity(6);
        out.push(if self.move_axis() != 0 {
            ActorTrigger::Move
        } else {
            ActorTrigger::Stop
        });
        for (flag, trigger) in [
            (Self::FLAG_JUMP, ActorTrigger::Jump),
            (Self::FLAG_ATTACK, ActorTrigger::Attack),
            (Self::FLAG_HEAVY, ActorTrigger::Heavy),
            (Self::FLAG_DASH, ActorTrigger::Dash),
            (Self::FLAG_SPECIAL, ActorTrigger::Special),
        ] {
            if self.pressed(flag) {
                out.push(trigger);
            }
        }
        out
    }
}

// =============================================================================
// TESTS
// =============================================================================
