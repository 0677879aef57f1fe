//! Game Logic Module
//!
//! All simulation code. Deterministic given a level, a config, a seed and
//! the per-tick input map.
//!
//! ## Module Structure
//!
//! - `fsm`: Table-driven state machines with timers and deferred triggers
//! - `entity`: Entity records, tags and the ordered entity store
//! - `actor`: Player and enemy behavior tables and strategies
//! - `pool`: Fixed-capacity pools for particles and projectiles
//! - `events`: Tick-stamped event bus with deferred delivery
//! - `quadtree`: Broad-phase spatial index
//! - `collision`: Pair generation, classification and resolution
//! - `input`: Controller state and trigger translation
//! - `config`: Tunables loaded from JSON
//! - `level`: Level geometry and spawn points
//! - `world`: Entity lifecycle and world-level services
//! - `tick`: The seven-phase simulation step
//! - `progression`: Experience and leveling from bus events
//! - `replay`: Input recording and re-simulation

pub mod fsm;
pub mod entity;
pub mod actor;
pub mod pool;
pub mod events;
pub mod quadtree;
pub mod collision;
pub mod input;
pub mod config;
pub mod level;
pub mod world;
pub mod tick;
pub mod progression;
pub mod replay;

// Re-export key types
pub use fsm::{StateMachine, TableError, TransitionTable};
pub use entity::{Entity, EntityId, EntityKind, Tags};
pub use actor::{ActorState, ActorTrigger, EnemyKind};
pub use pool::{Pool, PoolExhausted, PoolHandle, PoolKind, PoolStats};
pub use events::{EventBus, EventKind, GameEvent, GameEventData};
pub use quadtree::{Quadtree, QuadtreeConfig, RebuildPolicy};
pub use input::{InputFrame, MOVE_LUT};
pub use config::{ConfigError, SimConfig};
pub use level::{LevelData, LevelError};
pub use world::{EntityView, World, WorldError};
pub use tick::{tick, TickResult};
pub use progression::{Progress, ProgressionTracker};
pub use replay::{replay, InputDelta, InputRecorder, ReplayError, ReplayLog, ReplayOutcome};
