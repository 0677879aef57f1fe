//! World
//!
//! Everything one loaded level owns: the entity arena, the spatial index,
//! the pools, the event bus, the transition tables and the RNG. Built at
//! level load, torn down at unload, and passed explicitly to [`tick`].
//!
//! [`tick`]: crate::game::tick::tick

use thiserror::Error;
use tracing::{debug, info};
use serde::{Serialize, Deserialize};

use crate::core::aabb::Aabb;
use crate::core::fixed::{Fixed, FIXED_ONE, to_fixed};
use crate::core::hash::{compute_state_hash, StateHash};
use crate::core::rng::DeterministicRng;
use crate::core::vec2::FixedVec2;
use crate::game::actor::{Actor, ActorState, ActorTables, EnemyKind, Intent, Strategy};
use crate::game::config::{ActorProfile, ConfigError, SimConfig};
use crate::game::entity::{Body, Combat, Entity, EntityId, EntityKind, EntityStore, Faction, HitboxLink, ProjectileLink, Tags};
use crate::game::events::{EventBus, GameEventData};
use crate::game::level::{LevelData, LevelError};
use crate::game::pool::{Particle, Pool, PoolExhausted, PoolKind, PoolStats, ProjectileSlot};
use crate::game::quadtree::Quadtree;

/// Knockback dealt by static hazards.
const HAZARD_KNOCKBACK: Fixed = to_fixed(6.0);

/// Projectile half-extents.
const PROJECTILE_HALF: FixedVec2 = FixedVec2::new(to_fixed(4.0), to_fixed(2.0));

/// Top horizontal speed of an impact particle.
const SPARK_SPEED: Fixed = to_fixed(2.5);

/// World construction errors.
#[derive(Debug, Error)]
pub enum WorldError {
    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Level data was rejected.
    #[error(transparent)]
    Level(#[from] LevelError),
}

/// Read-only snapshot of one entity for the rendering collaborator.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityView {
    /// Entity id
    pub id: EntityId,
    /// What it is
    pub kind: EntityKind,
    /// Tag set
    pub tags: Tags,
    /// Center position
    pub position: FixedVec2,
    /// Current box
    pub bounds: Aabb,
    /// FSM state for actors
    pub state: Option<ActorState>,
    /// Current health (0 for geometry)
    pub health: i32,
}

impl EntityView {
    fn of(entity: &Entity) -> Self {
        Self {
            id: entity.id,
            kind: entity.kind,
            tags: entity.tags,
            position: entity.body.position,
            bounds: entity.body.bounds(),
            state: entity.state(),
            health: entity.combat.health,
        }
    }
}

/// A loaded level and all simulation state.
pub struct World {
    pub(crate) tick: u32,
    pub(crate) seed: u64,
    pub(crate) config: SimConfig,
    pub(crate) kill_y: Fixed,
    pub(crate) entities: EntityStore,
    pub(crate) index: Quadtree,
    pub(crate) particles: Pool<Particle>,
    pub(crate) projectiles: Pool<ProjectileSlot>,
    pub(crate) bus: EventBus,
    pub(crate) rng: DeterministicRng,
    pub(crate) tables: ActorTables,
    pub(crate) intents: Vec<Intent>,
    pub(crate) player: Option<EntityId>,
}

impl World {
    /// Build a world for `level`.
    ///
    /// Static geometry goes into the index once; the player and every
    /// enemy spawn are created in level order.
    pub fn load(level: &LevelData, config: SimConfig, seed: u64) -> Result<Self, WorldError> {
        level.validate()?;
        config.validate()?;
        let tables = config.build_tables()?;

        let bounds = level.bounds();
        let mut world = Self {
            tick: 0,
            seed,
            kill_y: level.floor_y().saturating_add(config.physics.kill_margin),
            entities: EntityStore::new(),
            index: Quadtree::new(bounds, config.quadtree),
            particles: Pool::new(PoolKind::Particle, config.pools.particles),
            projectiles: Pool::new(PoolKind::Projectile, config.pools.projectiles),
            bus: EventBus::new(),
            rng: DeterministicRng::new(seed),
            tables,
            intents: Vec::new(),
            player: None,
            config,
        };

        for rect in &level.platforms {
            world.spawn_platform(rect.to_aabb());
        }
        for hazard in &level.hazards {
            world.spawn_hazard(hazard.rect.to_aabb(), hazard.damage);
        }
        world.spawn_player(level.player_spawn.to_vec2());
        for spawn in &level.enemies {
            world.spawn_enemy(spawn.kind, spawn.at.to_vec2(), to_fixed(spawn.patrol_range));
        }

        info!(
            level = %level.name,
            seed,
            entities = world.entities.len(),
            enemies = level.enemies.len(),
            "level loaded"
        );
        Ok(world)
    }

    /// Tear the level down: drop subscribers, release every pooled slot,
    /// clear the index and the entity store.
    pub fn unload(&mut self) {
        let entities = self.entities.len();
        self.bus.clear_subscribers();
        self.bus.clear_pending();
        let particles = self.particles.release_all();
        let projectiles = self.projectiles.release_all();
        self.index.clear();
        self.entities.clear();
        self.intents.clear();
        self.player = None;
        info!(tick = self.tick, entities, particles, projectiles, "level unloaded");
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Ticks simulated so far.
    pub fn current_tick(&self) -> u32 {
        self.tick
    }

    /// RNG seed the level was loaded with.
    pub fn seed(&self) -> u64 {
        self.seed
    }

    /// Active configuration.
    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// Player entity, while it exists.
    pub fn player(&self) -> Option<EntityId> {
        self.player
    }

    /// Borrow an entity.
    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(id)
    }

    /// Mutably borrow an entity (test setup and tools).
    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(id)
    }

    /// Entity arena.
    pub fn entities(&self) -> &EntityStore {
        &self.entities
    }

    /// Spatial index.
    pub fn index(&self) -> &Quadtree {
        &self.index
    }

    /// Event bus, for subscribing collaborators.
    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    /// Particle pool.
    pub fn particles(&self) -> &Pool<Particle> {
        &self.particles
    }

    /// Particle pool counters.
    pub fn particle_stats(&self) -> PoolStats {
        self.particles.stats()
    }

    /// Projectile pool counters.
    pub fn projectile_stats(&self) -> PoolStats {
        self.projectiles.stats()
    }

    /// Read-only views of every entity, in id order.
    pub fn views(&self) -> Vec<EntityView> {
        self.entities.iter().map(EntityView::of).collect()
    }

    /// SHA-256 over tick, seed, every entity, the RNG and pool occupancy.
    pub fn compute_hash(&self) -> StateHash {
        compute_state_hash(self.tick, self.seed, |hasher| {
            for entity in self.entities.iter() {
                entity.hash_into(hasher);
            }

            let [s0, s1] = self.rng.state();
            hasher.update_u64(s0);
            hasher.update_u64(s1);

            for (handle, particle) in self.particles.iter_active() {
                hasher.update_u32(handle.index());
                hasher.update_u32(handle.generation());
                hasher.update_vec2(particle.position);
                hasher.update_u32(particle.ttl);
            }
            for (handle, slot) in self.projectiles.iter_active() {
                hasher.update_u32(handle.index());
                hasher.update_u32(slot.entity.0);
                hasher.update_u32(slot.ttl);
            }
        })
    }

    // =========================================================================
    // SPAWNING
    // =========================================================================

    fn add(&mut self, entity: Entity) -> EntityId {
        let id = entity.id;
        let bounds = entity.broad_bounds();
        if entity.is_static {
            self.index.insert_static(id, bounds);
        } else {
            self.index.insert(id, bounds);
        }
        self.bus.publish(GameEventData::Spawned { entity: id, tags: entity.tags });
        self.entities.insert(entity);
        id
    }

    /// Solid static rectangle.
    pub fn spawn_platform(&mut self, rect: Aabb) -> EntityId {
        let id = self.entities.allocate_id();
        let body = Body::new(rect.center(), rect.half_extents());
        let mut entity = Entity::new(id, EntityKind::Platform, Tags::PLATFORM, Faction::Neutral, body);
        entity.is_static = true;
        self.add(entity)
    }

    /// Damaging static rectangle.
    pub fn spawn_hazard(&mut self, rect: Aabb, damage: i32) -> EntityId {
        let id = self.entities.allocate_id();
        let body = Body::new(rect.center(), rect.half_extents());
        let mut entity = Entity::new(id, EntityKind::Hazard, Tags::HAZARD, Faction::Hostile, body);
        entity.combat.contact_damage = damage;
        entity.combat.knockback = HAZARD_KNOCKBACK;
        entity.is_static = true;
        self.add(entity)
    }

    /// Player at `at`, with its attack hitbox.
    pub fn spawn_player(&mut self, at: FixedVec2) -> EntityId {
        let profile = self.config.player;
        let id = self.entities.allocate_id();
        let mut entity = actor_entity(id, EntityKind::Player, Tags::PLAYER, Faction::Player, at, &profile);
        entity.actor = Some(Actor::controlled(self.tables.player.clone()));
        self.add(entity);
        self.attach_hitbox(id, &profile);
        self.player = Some(id);
        id
    }

    /// Enemy of `kind` at `at`, patrolling `patrol_range` either side.
    pub fn spawn_enemy(&mut self, kind: EnemyKind, at: FixedVec2, patrol_range: Fixed) -> EntityId {
        let profile = *self.config.enemies.get(kind);
        let tags = if profile.contact_damage > 0 {
            Tags::ENEMY | Tags::HAZARD
        } else {
            Tags::ENEMY
        };
        let id = self.entities.allocate_id();
        let mut entity = actor_entity(id, EntityKind::Enemy(kind), tags, Faction::Hostile, at, &profile);
        entity.body.facing = -1;
        let strategy = Strategy {
            kind,
            home_x: at.x,
            patrol_range,
            sight_range: profile.sight_range,
            attack_range: profile.attack_range,
            block_chance: profile.block_chance,
        };
        entity.actor = Some(Actor::autonomous(self.tables.for_enemy(kind), strategy));
        self.add(entity);
        self.attach_hitbox(id, &profile);
        id
    }

    /// Hitbox child that follows `owner`. Skipped for profiles without one.
    fn attach_hitbox(&mut self, owner: EntityId, profile: &ActorProfile) {
        if profile.hitbox_width <= 0 || profile.hitbox_height <= 0 {
            return;
        }
        let Some((position, facing, faction)) = self
            .entities
            .get(owner)
            .map(|o| (o.body.position, o.body.facing, o.faction))
        else {
            return;
        };

        let id = self.entities.allocate_id();
        let center = position + FixedVec2::new(profile.hitbox_reach * facing, 0);
        let half = FixedVec2::new(profile.hitbox_width >> 1, profile.hitbox_height >> 1);
        let mut entity = Entity::new(id, EntityKind::Hitbox, Tags::HITBOX, faction, Body::new(center, half));
        entity.hitbox = Some(HitboxLink {
            owner,
            reach: profile.hitbox_reach,
            ..HitboxLink::default()
        });
        self.add(entity);
        if let Some(owner) = self.entities.get_mut(owner) {
            owner.child_hitbox = Some(id);
        }
    }

    /// Fire a projectile from `owner` along its facing.
    ///
    /// Returns `None` when the owner is gone or the projectile pool is
    /// exhausted; exhaustion skips the spawn and publishes `PoolExhausted`.
    pub fn spawn_projectile(&mut self, owner: EntityId) -> Option<EntityId> {
        let (position, half, facing, faction, combat) = {
            let o = self.entities.get(owner)?;
            (o.body.position, o.body.half_extents, o.body.facing, o.faction, o.combat.clone())
        };

        let handle = match self.projectiles.acquire() {
            Ok(handle) => handle,
            Err(err) => {
                self.pool_exhausted(err);
                return None;
            }
        };

        let id = self.entities.allocate_id();
        let ttl = self.config.pools.projectile_ttl;
        if let Some(slot) = self.projectiles.get_mut(handle) {
            slot.entity = id;
            slot.ttl = ttl;
        }

        let start = position + FixedVec2::new((half.x + PROJECTILE_HALF.x) * facing, 0);
        let mut body = Body::new(start, PROJECTILE_HALF);
        body.velocity = FixedVec2::new(combat.projectile_speed * facing, 0);
        body.facing = facing;
        let mut entity = Entity::new(id, EntityKind::Projectile, Tags::PROJECTILE, faction, body);
        entity.projectile = Some(ProjectileLink {
            owner,
            damage: combat.attack_damage,
            knockback: combat.knockback,
            handle,
            spent: false,
        });
        Some(self.add(entity))
    }

    /// Emit up to `count` particles at `at`. Returns how many were emitted.
    pub fn emit_sparks(&mut self, at: FixedVec2, count: u8) -> usize {
        let ttl = self.config.pools.particle_ttl;
        let mut emitted = 0;
        for _ in 0..count {
            let velocity = FixedVec2::new(
                self.rng.next_spread(SPARK_SPEED),
                self.rng.next_fixed_range(-SPARK_SPEED * 2, -FIXED_ONE),
            );
            let acquired = self.particles.acquire_with(|p| {
                p.position = at;
                p.velocity = velocity;
                p.ttl = ttl;
            });
            match acquired {
                Ok(_) => emitted += 1,
                Err(err) => {
                    self.pool_exhausted(err);
                    break;
                }
            }
        }
        emitted
    }

    fn pool_exhausted(&mut self, err: PoolExhausted) {
        debug!(tick = self.tick, %err, "spawn skipped");
        self.bus.publish(GameEventData::PoolExhausted { pool: err.kind });
    }

    /// Carry out the work entry actions and collisions asked for.
    pub(crate) fn run_intents(&mut self) {
        for intent in std::mem::take(&mut self.intents) {
            match intent {
                Intent::FireProjectile { owner } => {
                    self.spawn_projectile(owner);
                }
                Intent::Sparks { at, count } => {
                    self.emit_sparks(at, count);
                }
            }
        }
    }

    // =========================================================================
    // DESTRUCTION
    // =========================================================================

    /// Remove an entity, its index entry, its pool slot and its hitbox.
    ///
    /// Returns `false` if the id was not live.
    pub fn destroy(&mut self, id: EntityId) -> bool {
        let Some(entity) = self.entities.remove(id) else {
            return false;
        };
        self.index.remove(id);
        if let Some(link) = entity.projectile {
            self.projectiles.release(link.handle);
        }
        if let Some(child) = entity.child_hitbox {
            self.destroy(child);
        }
        if self.player == Some(id) {
            self.player = None;
        }
        debug!(tick = self.tick, entity = id.0, kind = ?entity.kind, "despawned");
        true
    }
}

fn actor_entity(
    id: EntityId,
    kind: EntityKind,
    tags: Tags,
    faction: Faction,
    at: FixedVec2,
    profile: &ActorProfile,
) -> Entity {
    let mut body = Body::new(at, FixedVec2::new(profile.width >> 1, profile.height >> 1));
    body.max_speed = profile.max_speed;
    body.gravity = true;

    let mut entity = Entity::new(id, kind, tags, faction, body);
    entity.combat = Combat {
        health: profile.health,
        max_health: profile.health,
        attack_damage: profile.attack_damage,
        contact_damage: profile.contact_damage,
        knockback: profile.knockback,
        attack_cooldown: profile.attack_cooldown,
        dash_cooldown: profile.dash_cooldown,
        invulnerability: profile.invulnerability,
        jump_velocity: profile.jump_velocity,
        dash_speed: profile.dash_speed,
        projectile_speed: profile.projectile_speed,
        xp_reward: profile.xp_reward,
        max_combo: profile.max_combo,
        combo_window: profile.combo_window,
        crit_chance: profile.critical_chance,
        crit_multiplier: profile.critical_multiplier,
        coyote_ticks: profile.coyote_ticks,
        jump_buffer_ticks: profile.jump_buffer_ticks,
        ..Combat::default()
    };
    entity
}

// =============================================================================
// TESTS
// =============================================================================
