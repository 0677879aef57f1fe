//! Core primitives shared by every simulation module: fixed-point scalars
//! and vectors, boxes, the seeded generator and state digests.

pub mod fixed;
pub mod vec2;
pub mod aabb;
pub mod rng;
pub mod hash;

pub use fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use vec2::FixedVec2;
pub use aabb::{Aabb, Axis, Penetration};
pub use rng::DeterministicRng;
pub use hash::{compute_state_hash, HashDomain, StateHash, StateHasher};
