//! Level Data
//!
//! Static geometry and spawn points supplied at load time. Values are world
//! units as floats (y grows downward, rectangles are top-left + size) and are
//! converted to fixed point when the world is built.

use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::aabb::Aabb;
use crate::core::fixed::{Fixed, to_fixed};
use crate::core::vec2::FixedVec2;
use crate::game::actor::EnemyKind;

/// Largest coordinate a level may use.
const MAX_EXTENT: f64 = 30000.0;

/// Level loading errors.
#[derive(Debug, Error)]
pub enum LevelError {
    /// The file could not be read.
    #[error("failed to read level {}: {source}", path.display())]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The JSON was malformed.
    #[error("invalid level JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// Geometry or spawn data was rejected.
    #[error("invalid level: {0}")]
    Invalid(String),
}

/// A point in world units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PointSpec {
    /// Horizontal position
    pub x: f64,
    /// Vertical position (down is positive)
    pub y: f64,
}

impl PointSpec {
    /// Fixed-point position.
    pub fn to_vec2(self) -> FixedVec2 {
        FixedVec2::new(to_fixed(self.x), to_fixed(self.y))
    }
}

/// Axis-aligned rectangle, top-left corner plus size.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct RectSpec {
    /// Left edge
    pub x: f64,
    /// Top edge
    pub y: f64,
    /// Width
    pub width: f64,
    /// Height
    pub height: f64,
}

impl RectSpec {
    /// Rectangle from its top-left corner and size.
    pub const fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self { x, y, width, height }
    }

    /// Fixed-point box.
    pub fn to_aabb(&self) -> Aabb {
        Aabb::from_rect(to_fixed(self.x), to_fixed(self.y), to_fixed(self.width), to_fixed(self.height))
    }

    fn validate(&self, what: &str) -> Result<(), LevelError> {
        let values = [self.x, self.y, self.width, self.height];
        if values.iter().any(|v| !v.is_finite() || v.abs() > MAX_EXTENT) {
            return Err(LevelError::Invalid(format!("{}: coordinates out of range", what)));
        }
        if self.width <= 0.0 || self.height <= 0.0 {
            return Err(LevelError::Invalid(format!("{}: degenerate rectangle", what)));
        }
        Ok(())
    }
}

/// Damaging rectangle.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct HazardSpec {
    /// Area
    #[serde(flatten)]
    pub rect: RectSpec,
    /// Contact damage
    pub damage: i32,
}

/// Enemy placement.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct EnemySpawn {
    /// Archetype
    pub kind: EnemyKind,
    /// Spawn point (body center)
    pub at: PointSpec,
    /// Patrol half-width around the spawn point
    #[serde(default = "default_patrol_range")]
    pub patrol_range: f64,
}

fn default_patrol_range() -> f64 {
    150.0
}

/// Complete level description.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LevelData {
    /// Display name
    pub name: String,
    /// Level width
    pub width: f64,
    /// Level height
    pub height: f64,
    /// Player spawn point (body center)
    pub player_spawn: PointSpec,
    /// Solid geometry
    #[serde(default)]
    pub platforms: Vec<RectSpec>,
    /// Damaging geometry
    #[serde(default)]
    pub hazards: Vec<HazardSpec>,
    /// Enemies placed at load
    #[serde(default)]
    pub enemies: Vec<EnemySpawn>,
}

impl LevelData {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, LevelError> {
        let level: LevelData = serde_json::from_str(json)?;
        level.validate()?;
        Ok(level)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, LevelError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| LevelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Reject non-positive extents, degenerate rectangles and spawns
    /// outside the level.
    pub fn validate(&self) -> Result<(), LevelError> {
        if !(self.width > 0.0 && self.width <= MAX_EXTENT && self.height > 0.0 && self.height <= MAX_EXTENT) {
            return Err(LevelError::Invalid(format!(
                "level extent {}x{} must be positive and at most {}",
                self.width, self.height, MAX_EXTENT
            )));
        }
        for (i, rect) in self.platforms.iter().enumerate() {
            rect.validate(&format!("platform {}", i))?;
        }
        for (i, hazard) in self.hazards.iter().enumerate() {
            hazard.rect.validate(&format!("hazard {}", i))?;
            if hazard.damage < 0 {
                return Err(LevelError::Invalid(format!("hazard {}: negative damage", i)));
            }
        }

        let inside = |p: PointSpec| p.x >= 0.0 && p.x <= self.width && p.y >= 0.0 && p.y <= self.height;
        if !inside(self.player_spawn) {
            return Err(LevelError::Invalid("player spawn is outside the level".into()));
        }
        for (i, spawn) in self.enemies.iter().enumerate() {
            if !inside(spawn.at) {
                return Err(LevelError::Invalid(format!("enemy {}: spawn is outside the level", i)));
            }
            if !(spawn.patrol_range >= 0.0 && spawn.patrol_range <= MAX_EXTENT) {
                return Err(LevelError::Invalid(format!("enemy {}: bad patrol range", i)));
            }
        }
        Ok(())
    }

    /// Level rectangle, origin at the top-left.
    pub fn bounds(&self) -> Aabb {
        Aabb::from_rect(0, 0, to_fixed(self.width), to_fixed(self.height))
    }

    /// Bottom edge in fixed point.
    pub fn floor_y(&self) -> Fixed {
        to_fixed(self.height)
    }

    /// Built-in village strip: a long ground slab, ledges at varied heights,
    /// one spike pit and a mix of every enemy archetype.
    pub fn demo() -> Self {
        let platforms = vec![
            RectSpec::new(0.0, 1100.0, 8000.0, 100.0),
            RectSpec::new(200.0, 1000.0, 200.0, 20.0),
            RectSpec::new(500.0, 900.0, 180.0, 20.0),
            RectSpec::new(800.0, 800.0, 200.0, 20.0),
            RectSpec::new(1200.0, 900.0, 150.0, 20.0),
            RectSpec::new(1500.0, 1000.0, 200.0, 20.0),
            RectSpec::new(3000.0, 900.0, 150.0, 20.0),
            RectSpec::new(3200.0, 1000.0, 200.0, 20.0),
            RectSpec::new(3400.0, 850.0, 180.0, 20.0),
            RectSpec::new(3700.0, 950.0, 150.0, 20.0),
            RectSpec::new(3900.0, 850.0, 200.0, 20.0),
        ];
        let hazards = vec![HazardSpec {
            rect: RectSpec::new(2400.0, 1085.0, 120.0, 15.0),
            damage: 15,
        }];
        let enemy = |kind, x, patrol_range| EnemySpawn {
            kind,
            at: PointSpec { x, y: 1050.0 },
            patrol_range,
        };
        let enemies = vec![
            enemy(EnemyKind::Melee, 600.0, 200.0),
            enemy(EnemyKind::Guardian, 800.0, 150.0),
            enemy(EnemyKind::Melee, 1000.0, 150.0),
            enemy(EnemyKind::Ranged, 1400.0, 200.0),
            enemy(EnemyKind::Guardian, 2000.0, 100.0),
            enemy(EnemyKind::Ranged, 3500.0, 150.0),
        ];

        Self {
            name: "village".into(),
            width: 8000.0,
            height: 1200.0,
            player_spawn: PointSpec { x: 100.0, y: 1000.0 },
            platforms,
            hazards,
            enemies,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
