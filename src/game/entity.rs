//! Entities
//!
//! Every simulated object (player, enemy, projectile, hazard, platform,
//! attack hitbox) is one [`Entity`] record in a single arena keyed by
//! [`EntityId`]. Entities never hold references to each other; links such
//! as a hitbox's owner are stored as ids and resolved through the store.

use std::collections::BTreeMap;
use std::fmt;
use std::ops::BitOr;

use serde::{Serialize, Deserialize};

use crate::core::aabb::Aabb;
use crate::core::fixed::{Fixed, FIXED_ONE, FIXED_SCALE, fixed_abs, to_fixed};
use crate::core::hash::StateHasher;
use crate::core::vec2::FixedVec2;
use crate::game::actor::{Actor, ActorState, EnemyKind};
use crate::game::pool::PoolHandle;

/// Damage added per combo step beyond the first.
pub const COMBO_DAMAGE_STEP: Fixed = to_fixed(0.12);

/// Knockback added per combo step beyond the first.
pub const COMBO_KNOCKBACK_STEP: Fixed = to_fixed(0.1);

/// Damage and knockback scale of a heavy attack.
pub const HEAVY_SCALE: Fixed = to_fixed(1.8);

/// Scale an integer damage value, truncating.
#[inline]
pub fn scale_damage(damage: i32, scale: Fixed) -> i32 {
    ((damage as i64 * scale as i64) >> FIXED_SCALE) as i32
}

// =============================================================================
// ENTITY ID + TAGS
// =============================================================================

/// Stable entity handle. Assigned in ascending order and never reused
/// within a level.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct EntityId(pub u32);

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Tag bitset. An entity may carry several tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Tags(u8);

impl Tags {
    /// No tags
    pub const NONE: Tags = Tags(0);
    /// Player character
    pub const PLAYER: Tags = Tags(0x01);
    /// Hostile actor
    pub const ENEMY: Tags = Tags(0x02);
    /// Flying projectile
    pub const PROJECTILE: Tags = Tags(0x04);
    /// Deals contact damage
    pub const HAZARD: Tags = Tags(0x08);
    /// Solid static geometry
    pub const PLATFORM: Tags = Tags(0x10);
    /// Attack hitbox owned by an actor
    pub const HITBOX: Tags = Tags(0x20);

    /// Raw bits.
    #[inline]
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// True if every tag in `other` is set.
    #[inline]
    pub const fn contains(self, other: Tags) -> bool {
        self.0 & other.0 == other.0
    }

    /// Union of both sets.
    #[inline]
    pub const fn with(self, other: Tags) -> Tags {
        Tags(self.0 | other.0)
    }
}

impl BitOr for Tags {
    type Output = Tags;
    fn bitor(self, rhs: Tags) -> Tags {
        self.with(rhs)
    }
}

/// Side an entity fights for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Faction {
    /// The player and anything the player spawns
    Player,
    /// Enemies, hazards and their attacks
    Hostile,
    /// Geometry
    Neutral,
}

impl Faction {
    /// True if attacks from `self` can damage `other`.
    #[inline]
    pub fn opposes(self, other: Faction) -> bool {
        matches!(
            (self, other),
            (Faction::Player, Faction::Hostile) | (Faction::Hostile, Faction::Player)
        )
    }
}

/// What an entity is, independent of its tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntityKind {
    /// Player character
    Player,
    /// Enemy with a behavior strategy
    Enemy(EnemyKind),
    /// Static solid rectangle
    Platform,
    /// Static damaging rectangle
    Hazard,
    /// Pooled projectile
    Projectile,
    /// Attack hitbox that follows its owner
    Hitbox,
}

// =============================================================================
// COMPONENTS
// =============================================================================

/// Kinematic state. Position is the box center.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Body {
    /// Center position
    pub position: FixedVec2,
    /// Center position at the start of the current tick
    pub prev_position: FixedVec2,
    /// Half width and half height
    pub half_extents: FixedVec2,
    /// Velocity per tick
    pub velocity: FixedVec2,
    /// Desired horizontal direction in [-1, 1]
    pub move_axis: Fixed,
    /// Top horizontal speed
    pub max_speed: Fixed,
    /// +1 facing right, -1 facing left
    pub facing: i32,
    /// Resting on a platform after the last resolution
    pub grounded: bool,
    /// `grounded` from the previous tick
    pub was_grounded: bool,
    /// Affected by gravity
    pub gravity: bool,
}

impl Body {
    /// Body at `position` with the given half-extents, facing right.
    pub fn new(position: FixedVec2, half_extents: FixedVec2) -> Self {
        Self {
            position,
            prev_position: position,
            half_extents,
            facing: 1,
            ..Self::default()
        }
    }

    /// Current bounding box.
    #[inline]
    pub fn bounds(&self) -> Aabb {
        Aabb::from_center(self.position, self.half_extents)
    }

    /// Bounding box at the start of the tick.
    #[inline]
    pub fn prev_bounds(&self) -> Aabb {
        Aabb::from_center(self.prev_position, self.half_extents)
    }

    /// Box covering the whole path travelled this tick.
    #[inline]
    pub fn swept_bounds(&self) -> Aabb {
        self.bounds().union(&self.prev_bounds())
    }

    /// Movement since the start of the tick.
    #[inline]
    pub fn displacement(&self) -> FixedVec2 {
        self.position - self.prev_position
    }

    /// True if this tick's movement is larger than the body on either axis,
    /// which is when a discrete overlap test can tunnel.
    #[inline]
    pub fn is_fast_mover(&self) -> bool {
        let d = self.displacement();
        fixed_abs(d.x) > self.half_extents.x * 2 || fixed_abs(d.y) > self.half_extents.y * 2
    }
}

/// Health, damage and the tick-stamped timers driving combat.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Combat {
    /// Current health
    pub health: i32,
    /// Maximum health
    pub max_health: i32,
    /// Damage dealt by this actor's attack
    pub attack_damage: i32,
    /// Damage dealt by touching this entity
    pub contact_damage: i32,
    /// Horizontal knockback dealt
    pub knockback: Fixed,
    /// Ticks between attack starts
    pub attack_cooldown: u32,
    /// Ticks between dashes
    pub dash_cooldown: u32,
    /// Invulnerability granted on entering Hurt
    pub invulnerability: u32,
    /// Jump impulse (negative is up)
    pub jump_velocity: Fixed,
    /// Dash speed
    pub dash_speed: Fixed,
    /// Speed of fired projectiles (ranged attackers)
    pub projectile_speed: Fixed,
    /// First tick an attack may start
    pub attack_ready_at: u32,
    /// First tick a dash may start
    pub dash_ready_at: u32,
    /// Ticks before this are invulnerable
    pub invulnerable_until: u32,
    /// Incremented every time an attack starts
    pub swing: u32,
    /// Shield raised
    pub blocking: bool,
    /// Experience awarded to the killer
    pub xp_reward: u32,
    /// Last entity that damaged this one
    pub last_attacker: Option<EntityId>,
    /// Position in the current attack chain (1 for a fresh attack)
    pub combo: u32,
    /// Longest chain; the next attack after it starts over
    pub max_combo: u32,
    /// Ticks after an attack start in which the next one chains
    pub combo_window: u32,
    /// Attack starts before this tick continue the chain
    pub combo_until: u32,
    /// Chance for a melee hit to be critical
    pub crit_chance: Fixed,
    /// Damage scale of a critical hit
    pub crit_multiplier: Fixed,
    /// Ticks after walking off a ledge in which a jump is still allowed
    pub coyote_ticks: u32,
    /// Jumps before this tick are allowed while airborne
    pub coyote_until: u32,
    /// Ticks a rejected jump press is remembered
    pub jump_buffer_ticks: u32,
    /// A landing before this tick performs the buffered jump
    pub jump_buffered_until: u32,
}

impl Combat {
    /// True while health is above zero.
    #[inline]
    pub fn is_alive(&self) -> bool {
        self.health > 0
    }

    /// True during invulnerability frames.
    #[inline]
    pub fn is_invulnerable(&self, tick: u32) -> bool {
        tick < self.invulnerable_until
    }

    /// Count an attack starting at `tick` against the combo chain.
    pub fn advance_combo(&mut self, tick: u32) {
        self.combo = if tick < self.combo_until && self.combo < self.max_combo {
            self.combo + 1
        } else {
            1
        };
        self.combo_until = tick.saturating_add(self.combo_window);
    }

    /// Damage scale from the combo chain.
    pub fn combo_damage_scale(&self) -> Fixed {
        FIXED_ONE + COMBO_DAMAGE_STEP * self.combo.saturating_sub(1) as i32
    }

    /// Knockback scale from the combo chain.
    pub fn combo_knockback_scale(&self) -> Fixed {
        FIXED_ONE + COMBO_KNOCKBACK_STEP * self.combo.saturating_sub(1) as i32
    }

    /// True while a jump is allowed without standing on ground.
    #[inline]
    pub fn in_coyote_window(&self, tick: u32) -> bool {
        tick < self.coyote_until
    }

    /// True while a rejected jump press is waiting for a landing.
    #[inline]
    pub fn has_buffered_jump(&self, tick: u32) -> bool {
        tick < self.jump_buffered_until
    }
}

/// Link from a hitbox entity to its owner.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HitboxLink {
    /// Owning actor
    pub owner: EntityId,
    /// Distance from the owner's center along its facing
    pub reach: Fixed,
    /// Owner swing the `struck` list belongs to
    pub swing_seen: u32,
    /// Targets already hit during that swing
    pub struck: Vec<EntityId>,
}

/// Link from a projectile entity to its pool slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProjectileLink {
    /// Entity that fired it
    pub owner: EntityId,
    /// Damage on hit
    pub damage: i32,
    /// Knockback on hit
    pub knockback: Fixed,
    /// Pool slot backing the projectile
    pub handle: PoolHandle,
    /// Set once it has hit something
    pub spent: bool,
}

// =============================================================================
// ENTITY
// =============================================================================

/// One simulated object.
#[derive(Clone, Debug)]
pub struct Entity {
    /// Stable id
    pub id: EntityId,
    /// What it is
    pub kind: EntityKind,
    /// Tag set used for pair classification
    pub tags: Tags,
    /// Who it can damage
    pub faction: Faction,
    /// Kinematics and bounds
    pub body: Body,
    /// Combat numbers (zeroed for geometry)
    pub combat: Combat,
    /// State machine and AI strategy for actors
    pub actor: Option<Actor>,
    /// Set when this entity is an attack hitbox
    pub hitbox: Option<HitboxLink>,
    /// Set when this entity is a projectile
    pub projectile: Option<ProjectileLink>,
    /// Hitbox child owned by this actor
    pub child_hitbox: Option<EntityId>,
    /// Never moves; inserted into the spatial index once
    pub is_static: bool,
    /// Scheduled for destruction at the end of the tick
    pub despawn: bool,
}

impl Entity {
    /// Create an entity with empty combat data and no links.
    pub fn new(id: EntityId, kind: EntityKind, tags: Tags, faction: Faction, body: Body) -> Self {
        Self {
            id,
            kind,
            tags,
            faction,
            body,
            combat: Combat::default(),
            actor: None,
            hitbox: None,
            projectile: None,
            child_hitbox: None,
            is_static: false,
            despawn: false,
        }
    }

    /// Current FSM state, if this entity is an actor.
    #[inline]
    pub fn state(&self) -> Option<ActorState> {
        self.actor.as_ref().map(|a| a.machine.current())
    }

    /// True if the entity can currently be hurt.
    #[inline]
    pub fn is_vulnerable(&self, tick: u32) -> bool {
        self.actor.is_some()
            && self.combat.is_alive()
            && !self.combat.is_invulnerable(tick)
            && self.state() != Some(ActorState::Dead)
            && !self.despawn
    }

    /// Box used by the spatial index: the swept path for movers.
    #[inline]
    pub fn broad_bounds(&self) -> Aabb {
        if self.is_static {
            self.body.bounds()
        } else {
            self.body.swept_bounds()
        }
    }

    /// Feed simulation-relevant fields into a state hash.
    pub fn hash_into(&self, hasher: &mut StateHasher) {
        hasher.update_u32(self.id.0);
        hasher.update_u8(self.tags.bits());
        hasher.update_vec2(self.body.position);
        hasher.update_vec2(self.body.velocity);
        hasher.update_fixed(self.body.move_axis);
        hasher.update_i32(self.body.facing);
        hasher.update_bool(self.body.grounded);
        hasher.update_i32(self.combat.health);
        hasher.update_u32(self.combat.attack_ready_at);
        hasher.update_u32(self.combat.invulnerable_until);
        hasher.update_u32(self.combat.swing);
        hasher.update_bool(self.combat.blocking);
        hasher.update_u32(self.combat.combo);
        hasher.update_u32(self.combat.combo_until);
        hasher.update_u32(self.combat.coyote_until);
        hasher.update_u32(self.combat.jump_buffered_until);
        if let Some(actor) = &self.actor {
            hasher.update_u8(actor.machine.current() as u8);
            hasher.update_u32(actor.machine.expires_at().unwrap_or(u32::MAX));
        }
        hasher.update_bool(self.despawn);
    }
}

// =============================================================================
// STORE
// =============================================================================

/// Arena of entities, iterated in ascending id order.
#[derive(Clone, Debug, Default)]
pub struct EntityStore {
    entities: BTreeMap<EntityId, Entity>,
    next_id: u32,
}

impl EntityStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve the next id.
    pub fn allocate_id(&mut self) -> EntityId {
        let id = EntityId(self.next_id);
        self.next_id += 1;
        id
    }

    /// Insert an entity under its own id.
    pub fn insert(&mut self, entity: Entity) {
        self.entities.insert(entity.id, entity);
    }

    /// Remove an entity.
    pub fn remove(&mut self, id: EntityId) -> Option<Entity> {
        self.entities.remove(&id)
    }

    /// Borrow an entity.
    #[inline]
    pub fn get(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    /// Mutably borrow an entity.
    #[inline]
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// True if the id is live.
    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    /// Snapshot of live ids in ascending order.
    pub fn ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Iterate in ascending id order.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    /// Mutably iterate in ascending id order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut Entity> {
        self.entities.values_mut()
    }

    /// Number of live entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// True if no entity is live.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Remove every entity. Ids keep counting up.
    pub fn clear(&mut self) {
        self.entities.clear();
    }
}

// =============================================================================
// TESTS
// =============================================================================
