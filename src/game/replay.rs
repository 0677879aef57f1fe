//! Replay
//!
//! Input recording and deterministic re-simulation.
//!
//! The recorder keeps only the ticks where the player's controller state
//! changed. A finished recording, together with the seed and the final
//! state hash, forms a [`ReplayLog`]. Feeding the log back through
//! [`replay`] against the same level and config must reproduce the hash.

use std::collections::BTreeMap;

use serde::{Serialize, Deserialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::hash::{short_hex, HashDomain, StateHash, StateHasher};
use crate::game::config::SimConfig;
use crate::game::events::GameEvent;
use crate::game::input::InputFrame;
use crate::game::level::LevelData;
use crate::game::tick::tick;
use crate::game::world::{World, WorldError};

/// Log format revision.
pub const REPLAY_VERSION: u16 = 1;

/// Replay errors.
#[derive(Debug, Error)]
pub enum ReplayError {
    /// The log could not be serialized.
    #[error("failed to encode replay: {0}")]
    Encode(#[source] bincode::Error),
    /// The bytes are not a replay log.
    #[error("failed to decode replay: {0}")]
    Decode(#[source] bincode::Error),
    /// The log was written by another format revision.
    #[error("replay version {found} is not supported (expected {expected})")]
    Version {
        /// Version in the log
        found: u16,
        /// Version this build reads
        expected: u16,
    },
    /// The world could not be built for the replay.
    #[error(transparent)]
    World(#[from] WorldError),
}

// =============================================================================
// INPUT DELTA
// =============================================================================

/// Input change entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputDelta {
    /// First tick the frame applies to
    pub tick: u32,
    /// The new input state
    pub frame: InputFrame,
}

impl InputDelta {
    /// Create new delta entry.
    pub fn new(tick: u32, frame: InputFrame) -> Self {
        Self { tick, frame }
    }
}

/// Frame in effect at `tick`: the most recent delta at or before it.
fn frame_at(deltas: &[InputDelta], tick: u32) -> InputFrame {
    let idx = deltas.partition_point(|d| d.tick <= tick);
    if idx == 0 {
        InputFrame::new()
    } else {
        deltas[idx - 1].frame
    }
}

// =============================================================================
// RECORDER
// =============================================================================

/// Delta-compressed recording of the player's input.
#[derive(Clone, Debug, Default)]
pub struct InputRecorder {
    deltas: Vec<InputDelta>,
    last_frame: InputFrame,
    last_tick: Option<u32>,
}

impl InputRecorder {
    /// Empty recording.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the frame applied at `tick`.
    ///
    /// Only stores if input changed from the previous frame. Ticks must be
    /// increasing; a repeated or earlier tick is dropped.
    pub fn record(&mut self, tick: u32, frame: InputFrame) {
        if let Some(last) = self.last_tick {
            if tick <= last {
                warn!(tick, last, "input recorded out of order, dropped");
                return;
            }
        }
        self.last_tick = Some(tick);
        if frame != self.last_frame {
            self.deltas.push(InputDelta::new(tick, frame));
            self.last_frame = frame;
        }
    }

    /// Frame in effect at `tick`.
    pub fn input_at(&self, tick: u32) -> InputFrame {
        frame_at(&self.deltas, tick)
    }

    /// Stored changes.
    pub fn deltas(&self) -> &[InputDelta] {
        &self.deltas
    }

    /// Number of stored changes.
    pub fn delta_count(&self) -> usize {
        self.deltas.len()
    }

    /// Last recorded tick.
    pub fn last_tick(&self) -> Option<u32> {
        self.last_tick
    }

    /// Close the recording against the world it drove.
    pub fn finish(self, world: &World) -> ReplayLog {
        ReplayLog {
            version: REPLAY_VERSION,
            seed: world.seed(),
            ticks: world.current_tick(),
            deltas: self.deltas,
            final_hash: world.compute_hash(),
        }
    }
}

// =============================================================================
// REPLAY LOG
// =============================================================================

/// A finished run: everything needed to reproduce it from a level and config.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplayLog {
    /// Format revision
    pub version: u16,
    /// World seed
    pub seed: u64,
    /// Number of ticks simulated
    pub ticks: u32,
    /// Input changes
    pub deltas: Vec<InputDelta>,
    /// State hash after the last tick
    pub final_hash: StateHash,
}

impl ReplayLog {
    /// Encode with bincode.
    pub fn to_bytes(&self) -> Result<Vec<u8>, ReplayError> {
        bincode::serialize(self).map_err(ReplayError::Encode)
    }

    /// Decode with bincode, rejecting other format revisions.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ReplayError> {
        let log: ReplayLog = bincode::deserialize(bytes).map_err(ReplayError::Decode)?;
        if log.version != REPLAY_VERSION {
            return Err(ReplayError::Version {
                found: log.version,
                expected: REPLAY_VERSION,
            });
        }
        Ok(log)
    }

    /// Frame in effect at `tick`.
    pub fn input_at(&self, tick: u32) -> InputFrame {
        frame_at(&self.deltas, tick)
    }

    /// Digest of the seed, tick count and input stream.
    pub fn input_hash(&self) -> StateHash {
        let mut hasher = StateHasher::new(HashDomain::InputLog);
        hasher.update_u64(self.seed);
        hasher.update_u32(self.ticks);
        for delta in &self.deltas {
            hasher.update_u32(delta.tick);
            hasher.update_u8(delta.frame.move_x as u8);
            hasher.update_u8(delta.frame.flags);
        }
        hasher.finalize()
    }
}

/// Result of a re-simulation.
#[derive(Clone, Debug)]
pub struct ReplayOutcome {
    /// State hash after the last tick
    pub final_hash: StateHash,
    /// Every event delivered, in order
    pub events: Vec<GameEvent>,
}

impl ReplayOutcome {
    /// Whether the re-simulation reproduced the recorded hash.
    pub fn matches(&self, log: &ReplayLog) -> bool {
        self.final_hash == log.final_hash
    }
}

/// Re-run `log` against a fresh world built from `level` and `config`.
pub fn replay(level: &LevelData, config: SimConfig, log: &ReplayLog) -> Result<ReplayOutcome, ReplayError> {
    let mut world = World::load(level, config, log.seed)?;
    let mut events = Vec::new();
    let mut inputs = BTreeMap::new();

    for t in 1..=log.ticks {
        inputs.clear();
        if let Some(player) = world.player() {
            inputs.insert(player, log.input_at(t));
        }
        events.extend(tick(&mut world, &inputs).events);
    }

    let final_hash = world.compute_hash();
    debug!(
        ticks = log.ticks,
        events = events.len(),
        hash = %short_hex(&final_hash),
        "replay finished"
    );
    Ok(ReplayOutcome { final_hash, events })
}

// =============================================================================
// TESTS
// =============================================================================
