//! Simulation Configuration
//!
//! Every tunable the simulation reads, loadable from JSON. Missing sections
//! and fields fall back to the built-in defaults, so an empty object is a
//! valid configuration.
//!
//! Fixed-point fields are written as plain numbers (`"gravity": 0.55`) and
//! converted to Q16.16 once, at load time.

use std::path::{Path, PathBuf};

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::fixed::{
    Fixed, ACCELERATION, DASH_SPEED, FIXED_ONE, FRICTION, GRAVITY, JUMP_VELOCITY, MAX_FALL_SPEED,
    PLAYER_MAX_SPEED, to_fixed,
};
use crate::game::actor::{
    guardian_table, melee_table, player_table, ranged_table, ActorState, ActorTables, ActorTrigger,
    EnemyKind, Guard,
};
use crate::game::fsm::{TableError, TableSpec};
use crate::game::quadtree::QuadtreeConfig;

/// Serialized actor transition table.
pub type ActorTableSpec = TableSpec<ActorState, ActorTrigger, Guard>;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    Io {
        /// Path that was read
        path: PathBuf,
        /// Underlying error
        #[source]
        source: std::io::Error,
    },
    /// The JSON was malformed or a value had the wrong type.
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    /// A value was out of range.
    #[error("invalid config: {0}")]
    Invalid(String),
    /// A behavior table was rejected.
    #[error("invalid behavior table: {0}")]
    Table(#[from] TableError),
}

/// Serde adapter: Fixed fields as plain JSON numbers.
pub mod fixed_units {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::core::fixed::{Fixed, to_f64, to_fixed};

    /// Largest magnitude a Q16.16 value can hold.
    const LIMIT: f64 = 32767.0;

    /// Write as a float.
    pub fn serialize<S: Serializer>(value: &Fixed, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(to_f64(*value))
    }

    /// Read a float and convert, rejecting values outside the fixed range.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Fixed, D::Error> {
        let value = f64::deserialize(deserializer)?;
        if !value.is_finite() || value.abs() > LIMIT {
            return Err(D::Error::custom(format!("{} is outside the fixed-point range", value)));
        }
        Ok(to_fixed(value))
    }
}

// =============================================================================
// SECTIONS
// =============================================================================

/// Pool sizing and pooled object lifetimes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Particle slots
    pub particles: usize,
    /// Projectile slots
    pub projectiles: usize,
    /// Ticks a particle lives
    pub particle_ttl: u32,
    /// Ticks a projectile flies before expiring
    pub projectile_ttl: u32,
    /// Particles emitted per hit or impact
    pub sparks_per_hit: u8,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            particles: 256,
            projectiles: 64,
            particle_ttl: 30,
            projectile_ttl: 180,
            sparks_per_hit: 4,
        }
    }
}

/// Integration constants, per tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhysicsConfig {
    /// Downward acceleration
    #[serde(with = "fixed_units")]
    pub gravity: Fixed,
    /// Terminal fall speed
    #[serde(with = "fixed_units")]
    pub max_fall_speed: Fixed,
    /// Horizontal acceleration under control
    #[serde(with = "fixed_units")]
    pub acceleration: Fixed,
    /// Horizontal velocity kept per tick without control
    #[serde(with = "fixed_units")]
    pub friction: Fixed,
    /// Distance below the level at which actors die
    #[serde(with = "fixed_units")]
    pub kill_margin: Fixed,
}

impl Default for PhysicsConfig {
    fn default() -> Self {
        Self {
            gravity: GRAVITY,
            max_fall_speed: MAX_FALL_SPEED,
            acceleration: ACCELERATION,
            friction: FRICTION,
            kill_margin: to_fixed(200.0),
        }
    }
}

/// Size, movement and combat numbers for one kind of actor.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActorProfile {
    /// Body width
    #[serde(with = "fixed_units")]
    pub width: Fixed,
    /// Body height
    #[serde(with = "fixed_units")]
    pub height: Fixed,
    /// Top horizontal speed
    #[serde(with = "fixed_units")]
    pub max_speed: Fixed,
    /// Jump impulse (negative is up)
    #[serde(with = "fixed_units")]
    pub jump_velocity: Fixed,
    /// Dash speed
    #[serde(with = "fixed_units")]
    pub dash_speed: Fixed,
    /// Knockback dealt
    #[serde(with = "fixed_units")]
    pub knockback: Fixed,
    /// Speed of fired projectiles (0: no projectiles)
    #[serde(with = "fixed_units")]
    pub projectile_speed: Fixed,
    /// Attack hitbox width (0: no hitbox)
    #[serde(with = "fixed_units")]
    pub hitbox_width: Fixed,
    /// Attack hitbox height
    #[serde(with = "fixed_units")]
    pub hitbox_height: Fixed,
    /// Hitbox center distance from the body center
    #[serde(with = "fixed_units")]
    pub hitbox_reach: Fixed,
    /// Horizontal distance at which the player is spotted
    #[serde(with = "fixed_units")]
    pub sight_range: Fixed,
    /// Horizontal distance at which an attack starts
    #[serde(with = "fixed_units")]
    pub attack_range: Fixed,
    /// Chance per decision to raise a shield
    #[serde(with = "fixed_units")]
    pub block_chance: Fixed,
    /// Starting health
    pub health: i32,
    /// Attack (or projectile) damage
    pub attack_damage: i32,
    /// Damage on touch (0: harmless to touch)
    pub contact_damage: i32,
    /// Ticks between attack starts
    pub attack_cooldown: u32,
    /// Ticks between dashes
    pub dash_cooldown: u32,
    /// Invulnerability ticks after being hurt
    pub invulnerability: u32,
    /// Experience awarded for the kill
    pub xp_reward: u32,
    /// Longest attack chain (0 or 1: no chaining)
    #[serde(default)]
    pub max_combo: u32,
    /// Ticks after an attack start in which the next one chains
    #[serde(default)]
    pub combo_window: u32,
    /// Chance for a melee hit to be critical
    #[serde(with = "fixed_units", default)]
    pub critical_chance: Fixed,
    /// Damage scale of a critical hit
    #[serde(with = "fixed_units", default)]
    pub critical_multiplier: Fixed,
    /// Ticks after walking off a ledge in which a jump is still allowed
    #[serde(default)]
    pub coyote_ticks: u32,
    /// Ticks a jump pressed in the air waits for a landing
    #[serde(default)]
    pub jump_buffer_ticks: u32,
}

impl ActorProfile {
    /// Default player numbers.
    pub fn player() -> Self {
        Self {
            width: to_fixed(24.0),
            height: to_fixed(40.0),
            max_speed: PLAYER_MAX_SPEED,
            jump_velocity: JUMP_VELOCITY,
            dash_speed: DASH_SPEED,
            knockback: to_fixed(6.0),
            projectile_speed: 0,
            hitbox_width: to_fixed(40.0),
            hitbox_height: to_fixed(28.0),
            hitbox_reach: to_fixed(26.0),
            sight_range: 0,
            attack_range: 0,
            block_chance: 0,
            health: 100,
            attack_damage: 12,
            contact_damage: 0,
            attack_cooldown: 30,
            dash_cooldown: 45,
            invulnerability: 60,
            xp_reward: 0,
            max_combo: 5,
            combo_window: 45,
            critical_chance: to_fixed(0.05),
            critical_multiplier: to_fixed(1.5),
            coyote_ticks: 6,
            jump_buffer_ticks: 6,
        }
    }

    /// Default melee enemy numbers.
    pub fn melee() -> Self {
        Self {
            width: to_fixed(28.0),
            height: to_fixed(36.0),
            max_speed: to_fixed(3.0),
            jump_velocity: 0,
            dash_speed: 0,
            knockback: to_fixed(5.0),
            projectile_speed: 0,
            hitbox_width: to_fixed(36.0),
            hitbox_height: to_fixed(24.0),
            hitbox_reach: to_fixed(24.0),
            sight_range: to_fixed(320.0),
            attack_range: to_fixed(40.0),
            block_chance: 0,
            health: 30,
            attack_damage: 10,
            contact_damage: 5,
            attack_cooldown: 60,
            dash_cooldown: 0,
            invulnerability: 0,
            xp_reward: 25,
            max_combo: 0,
            combo_window: 0,
            critical_chance: 0,
            critical_multiplier: 0,
            coyote_ticks: 0,
            jump_buffer_ticks: 0,
        }
    }

    /// Default ranged enemy numbers.
    pub fn ranged() -> Self {
        Self {
            width: to_fixed(24.0),
            height: to_fixed(36.0),
            max_speed: to_fixed(2.0),
            knockback: to_fixed(3.0),
            projectile_speed: to_fixed(6.0),
            hitbox_width: 0,
            hitbox_height: 0,
            hitbox_reach: 0,
            sight_range: to_fixed(480.0),
            attack_range: to_fixed(360.0),
            health: 20,
            attack_damage: 8,
            contact_damage: 0,
            attack_cooldown: 90,
            xp_reward: 35,
            ..Self::melee()
        }
    }

    /// Default guardian numbers.
    pub fn guardian() -> Self {
        Self {
            width: to_fixed(40.0),
            height: to_fixed(48.0),
            max_speed: to_fixed(1.5),
            knockback: to_fixed(9.0),
            hitbox_width: to_fixed(48.0),
            hitbox_height: to_fixed(32.0),
            hitbox_reach: to_fixed(32.0),
            sight_range: to_fixed(280.0),
            attack_range: to_fixed(56.0),
            block_chance: to_fixed(0.35),
            health: 80,
            attack_damage: 18,
            contact_damage: 8,
            attack_cooldown: 80,
            xp_reward: 80,
            ..Self::melee()
        }
    }

    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        if self.width <= 0 || self.height <= 0 {
            return Err(ConfigError::Invalid(format!("{}: body size must be positive", name)));
        }
        if self.health <= 0 {
            return Err(ConfigError::Invalid(format!("{}: health must be positive", name)));
        }
        if self.max_speed < 0 || self.dash_speed < 0 || self.projectile_speed < 0 {
            return Err(ConfigError::Invalid(format!("{}: speeds must not be negative", name)));
        }
        if self.hitbox_width < 0 || self.hitbox_height < 0 {
            return Err(ConfigError::Invalid(format!("{}: hitbox size must not be negative", name)));
        }
        if !(0..=FIXED_ONE).contains(&self.block_chance) {
            return Err(ConfigError::Invalid(format!("{}: block_chance must be in [0, 1]", name)));
        }
        if !(0..=FIXED_ONE).contains(&self.critical_chance) {
            return Err(ConfigError::Invalid(format!("{}: critical_chance must be in [0, 1]", name)));
        }
        if self.critical_chance > 0 && self.critical_multiplier < FIXED_ONE {
            return Err(ConfigError::Invalid(format!("{}: critical_multiplier must be at least 1", name)));
        }
        Ok(())
    }
}

impl Default for ActorProfile {
    fn default() -> Self {
        Self::player()
    }
}

/// Profiles per enemy kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnemyProfiles {
    /// Melee enemies
    #[serde(default = "ActorProfile::melee")]
    pub melee: ActorProfile,
    /// Ranged enemies
    #[serde(default = "ActorProfile::ranged")]
    pub ranged: ActorProfile,
    /// Guardians
    #[serde(default = "ActorProfile::guardian")]
    pub guardian: ActorProfile,
}

impl Default for EnemyProfiles {
    fn default() -> Self {
        Self {
            melee: ActorProfile::melee(),
            ranged: ActorProfile::ranged(),
            guardian: ActorProfile::guardian(),
        }
    }
}

impl EnemyProfiles {
    /// Profile for an enemy kind.
    pub fn get(&self, kind: EnemyKind) -> &ActorProfile {
        match kind {
            EnemyKind::Melee => &self.melee,
            EnemyKind::Ranged => &self.ranged,
            EnemyKind::Guardian => &self.guardian,
        }
    }
}

/// Transition tables per actor kind, as data.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BehaviorTables {
    /// Player table
    #[serde(default = "default_player_spec")]
    pub player: ActorTableSpec,
    /// Melee enemy table
    #[serde(default = "default_melee_spec")]
    pub melee: ActorTableSpec,
    /// Ranged enemy table
    #[serde(default = "default_ranged_spec")]
    pub ranged: ActorTableSpec,
    /// Guardian table
    #[serde(default = "default_guardian_spec")]
    pub guardian: ActorTableSpec,
}

fn default_player_spec() -> ActorTableSpec {
    TableSpec::from(&player_table())
}

fn default_melee_spec() -> ActorTableSpec {
    TableSpec::from(&melee_table())
}

fn default_ranged_spec() -> ActorTableSpec {
    TableSpec::from(&ranged_table())
}

fn default_guardian_spec() -> ActorTableSpec {
    TableSpec::from(&guardian_table())
}

impl Default for BehaviorTables {
    fn default() -> Self {
        Self {
            player: default_player_spec(),
            melee: default_melee_spec(),
            ranged: default_ranged_spec(),
            guardian: default_guardian_spec(),
        }
    }
}

impl BehaviorTables {
    /// Validate every table and build the shared lookup tables.
    pub fn build(&self) -> Result<ActorTables, TableError> {
        Ok(ActorTables {
            player: self.player.build()?.into(),
            melee: self.melee.build()?.into(),
            ranged: self.ranged.build()?.into(),
            guardian: self.guardian.build()?.into(),
        })
    }
}

// =============================================================================
// SIM CONFIG
// =============================================================================

/// Complete simulation configuration.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimConfig {
    /// Spatial index tuning
    pub quadtree: QuadtreeConfig,
    /// Pool sizes and lifetimes
    pub pools: PoolConfig,
    /// Integration constants
    pub physics: PhysicsConfig,
    /// Player profile
    pub player: ActorProfile,
    /// Enemy profiles
    pub enemies: EnemyProfiles,
    /// Transition tables
    pub behavior: BehaviorTables,
}

impl SimConfig {
    /// Parse and validate a JSON document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: SimConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Pretty-printed JSON.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Check ranges and tables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let qt = &self.quadtree;
        if qt.capacity == 0 {
            return Err(ConfigError::Invalid("quadtree.capacity must be at least 1".into()));
        }
        if qt.max_depth > 16 {
            return Err(ConfigError::Invalid("quadtree.max_depth must be at most 16".into()));
        }

        let pools = &self.pools;
        if pools.particles == 0 || pools.projectiles == 0 {
            return Err(ConfigError::Invalid("pool capacities must be at least 1".into()));
        }
        if pools.projectile_ttl == 0 {
            return Err(ConfigError::Invalid("pools.projectile_ttl must be at least 1".into()));
        }

        let physics = &self.physics;
        if physics.gravity < 0 || physics.max_fall_speed <= 0 {
            return Err(ConfigError::Invalid("gravity and max_fall_speed must be positive".into()));
        }
        if !(0..=FIXED_ONE).contains(&physics.friction) {
            return Err(ConfigError::Invalid("physics.friction must be in [0, 1]".into()));
        }
        if physics.kill_margin < 0 {
            return Err(ConfigError::Invalid("physics.kill_margin must not be negative".into()));
        }

        self.player.validate("player")?;
        self.enemies.melee.validate("enemies.melee")?;
        self.enemies.ranged.validate("enemies.ranged")?;
        self.enemies.guardian.validate("enemies.guardian")?;

        self.behavior.build()?;
        Ok(())
    }

    /// Build the shared transition tables.
    pub fn build_tables(&self) -> Result<ActorTables, ConfigError> {
        Ok(self.behavior.build()?)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::fsm::RuleSpec;
    use crate::game::quadtree::RebuildPolicy;

    #[test]
    fn test_empty_object_is_default() {
        let config = SimConfig::from_json("{}").unwrap();
        assert_eq!(config, SimConfig::default());
        assert_eq!(config.quadtree.capacity, 8);
        assert_eq!(config.quadtree.max_depth, 6);
        assert_eq!(config.physics.gravity, GRAVITY);
    }

    #[test]
    fn test_partial_sections_keep_defaults() {
        let json = r#"{
            "quadtree": { "capacity": 4, "policy": "incremental" },
            "physics": { "gravity": 0.5 },
            "enemies": { "ranged": {
                "width": 20, "height": 30, "max_speed": 2.5, "jump_velocity": 0,
                "dash_speed": 0, "knockback": 2, "projectile_speed": 9,
                "hitbox_width": 0, "hitbox_height": 0, "hitbox_reach": 0,
                "sight_range": 500, "attack_range": 400, "block_chance": 0,
                "health": 15, "attack_damage": 6, "contact_damage": 0,
                "attack_cooldown": 70, "dash_cooldown": 0, "invulnerability": 0,
                "xp_reward": 40
            } }
        }"#;
        let config = SimConfig::from_json(json).unwrap();
        assert_eq!(config.quadtree.capacity, 4);
        assert_eq!(config.quadtree.max_depth, 6);
        assert_eq!(config.quadtree.policy, RebuildPolicy::Incremental);
        assert_eq!(config.physics.gravity, FIXED_ONE / 2);
        assert_eq!(config.physics.friction, FRICTION);
        assert_eq!(config.enemies.ranged.projectile_speed, to_fixed(9.0));
        assert_eq!(config.enemies.melee, ActorProfile::melee());
    }

    #[test]
    fn test_profile_timing_fields_default_to_zero() {
        // A profile written before combos and crits existed still parses
        let melee: ActorProfile = serde_json::from_value(serde_json::json!({
            "width": 28, "height": 36, "max_speed": 3, "jump_velocity": 0,
            "dash_speed": 0, "knockback": 5, "projectile_speed": 0,
            "hitbox_width": 36, "hitbox_height": 24, "hitbox_reach": 24,
            "sight_range": 320, "attack_range": 40, "block_chance": 0,
            "health": 30, "attack_damage": 10, "contact_damage": 5,
            "attack_cooldown": 60, "dash_cooldown": 0, "invulnerability": 0,
            "xp_reward": 25
        }))
        .unwrap();
        assert_eq!(melee, ActorProfile::melee());

        let player = ActorProfile::player();
        assert_eq!((player.max_combo, player.combo_window), (5, 45));
        assert_eq!((player.coyote_ticks, player.jump_buffer_ticks), (6, 6));
        assert_eq!(player.critical_multiplier, to_fixed(1.5));
    }

    #[test]
    fn test_critical_values_validated() {
        let mut config = SimConfig::default();
        config.player.critical_chance = to_fixed(1.5);
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.player.critical_chance = to_fixed(0.2);
        config.player.critical_multiplier = FIXED_ONE / 2;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.player.critical_multiplier = to_fixed(2.0);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip() {
        let config = SimConfig::default();
        let json = config.to_json().unwrap();
        assert_eq!(SimConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_invalid_values_rejected() {
        let err = SimConfig::from_json(r#"{ "quadtree": { "capacity": 0 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SimConfig::from_json(r#"{ "physics": { "friction": 1.5 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));

        let err = SimConfig::from_json(r#"{ "physics": { "gravity": 1e9 } }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = SimConfig::from_json("not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_bad_table_rejected() {
        let mut config = SimConfig::default();
        config.behavior.melee.transitions.push(RuleSpec {
            from: ActorState::Patrol,
            on: ActorTrigger::Spot,
            to: ActorState::Dead,
            guard: None,
        });
        assert!(matches!(config.validate(), Err(ConfigError::Table(TableError::Duplicate { .. }))));
    }

    #[test]
    fn test_table_without_guards_or_timers_parses() {
        let json = r#"{
            "initial": "idle",
            "transitions": [
                { "from": "idle", "on": "move", "to": "move" },
                { "from": "move", "on": "attack", "to": "windup", "guard": "attack_ready" }
            ]
        }"#;
        let spec: ActorTableSpec = serde_json::from_str(json).unwrap();
        assert_eq!(spec.transitions[0].guard, None);
        assert_eq!(spec.transitions[1].guard, Some(Guard::AttackReady));
        assert!(spec.timers.is_empty());

        let table = spec.build().unwrap();
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = SimConfig::load("/nonexistent/sim.json").unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
        assert!(err.to_string().contains("/nonexistent/sim.json"));
    }

    #[test]
    fn test_tables_from_config_match_defaults() {
        let tables = SimConfig::default().build_tables().unwrap();
        assert_eq!(tables.player.len(), player_table().len());
        assert_eq!(tables.guardian.duration(ActorState::Shield), Some(40));
    }
}
