//! State Hashing
//!
//! SHA-256 digests of world state and input logs. Two runs are considered
//! identical when their digests match, so every field that can influence a
//! later tick must be fed in, in a fixed order.

use sha2::{Sha256, Digest};

use super::fixed::Fixed;
use super::vec2::FixedVec2;

/// 32-byte SHA-256 digest.
pub type StateHash = [u8; 32];

/// What a digest covers. Each domain prefixes a distinct tag so a world
/// digest can never collide with an input-log digest.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HashDomain {
    /// Full world state after a tick
    WorldState,
    /// Seed, tick count and recorded input changes
    InputLog,
}

impl HashDomain {
    fn tag(self) -> &'static [u8] {
        match self {
            HashDomain::WorldState => b"HOLLOW_SIM_STATE_V1",
            HashDomain::InputLog => b"HOLLOW_SIM_INPUTS_V1",
        }
    }
}

/// Incremental hasher with little-endian helpers for simulation types.
pub struct StateHasher {
    hasher: Sha256,
}

impl StateHasher {
    /// Start a digest in `domain`.
    pub fn new(domain: HashDomain) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(domain.tag());
        Self { hasher }
    }

    /// Add one byte.
    #[inline]
    pub fn update_u8(&mut self, value: u8) {
        self.hasher.update([value]);
    }

    /// Add a `u32`.
    #[inline]
    pub fn update_u32(&mut self, value: u32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Add a `u64`.
    #[inline]
    pub fn update_u64(&mut self, value: u64) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Add an `i32`.
    #[inline]
    pub fn update_i32(&mut self, value: i32) {
        self.hasher.update(value.to_le_bytes());
    }

    /// Add a fixed-point scalar (its raw bits).
    #[inline]
    pub fn update_fixed(&mut self, value: Fixed) {
        self.update_i32(value);
    }

    /// Add both components, x first.
    #[inline]
    pub fn update_vec2(&mut self, value: FixedVec2) {
        self.update_fixed(value.x);
        self.update_fixed(value.y);
    }

    /// Add a flag as one byte.
    #[inline]
    pub fn update_bool(&mut self, value: bool) {
        self.update_u8(value as u8);
    }

    /// Finish the digest.
    pub fn finalize(self) -> StateHash {
        self.hasher.finalize().into()
    }
}

/// World digest: tick and seed first, then whatever `add_state` feeds in.
pub fn compute_state_hash<F>(tick: u32, seed: u64, add_state: F) -> StateHash
where
    F: FnOnce(&mut StateHasher),
{
    let mut hasher = StateHasher::new(HashDomain::WorldState);
    hasher.update_u32(tick);
    hasher.update_u64(seed);
    add_state(&mut hasher);
    hasher.finalize()
}

/// First eight bytes in hex, for log lines.
pub fn short_hex(hash: &StateHash) -> String {
    hex::encode(&hash[..8])
}

// =============================================================================
// TESTS
// =============================================================================
