//! # Hollow Sim
//!
//! Deterministic simulation core for a 2D side-scrolling action game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        HOLLOW SIM                            │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/             - Deterministic primitives                │
//! │  ├── fixed.rs      - Q16.16 fixed-point arithmetic           │
//! │  ├── vec2.rs       - 2D vector with fixed-point              │
//! │  ├── aabb.rs       - Boxes, overlap, penetration, sweeps     │
//! │  ├── rng.rs        - Deterministic Xorshift128+ PRNG         │
//! │  └── hash.rs       - State hashing for verification          │
//! │                                                              │
//! │  game/             - Simulation (deterministic)              │
//! │  ├── fsm.rs        - Transition tables and state machines    │
//! │  ├── entity.rs     - Entities and the ordered store          │
//! │  ├── actor.rs      - Player and enemy behavior               │
//! │  ├── pool.rs       - Particle and projectile pools           │
//! │  ├── events.rs     - Tick-stamped event bus                  │
//! │  ├── quadtree.rs   - Broad-phase spatial index               │
//! │  ├── collision.rs  - Pair classification and resolution     │
//! │  ├── world.rs      - Load, spawn, despawn, unload            │
//! │  ├── tick.rs       - Seven-phase simulation step             │
//! │  ├── progression.rs- Experience and leveling                 │
//! │  └── replay.rs     - Input recording and re-simulation      │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Determinism Guarantee
//!
//! The `core/` and `game/` modules are deterministic:
//! - No floating-point arithmetic in the tick (floats only at load time)
//! - No HashMap (uses BTreeMap for sorted iteration)
//! - No system time dependencies
//! - All randomness from the seeded Xorshift128+
//!
//! Given the same level, config, seed and inputs, two runs produce the
//! same event sequence and the same final state hash.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;

// Re-export commonly used types
pub use core::fixed::{Fixed, FIXED_ONE, FIXED_HALF, FIXED_SCALE};
pub use core::vec2::FixedVec2;
pub use core::aabb::Aabb;
pub use core::rng::DeterministicRng;
pub use game::input::InputFrame;
pub use game::config::SimConfig;
pub use game::level::LevelData;
pub use game::world::World;
pub use game::tick::{tick, TickResult};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Simulation tick rate (Hz)
pub const TICK_RATE: u32 = 60;
