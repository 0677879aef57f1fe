//! Collision Detection and Resolution
//!
//! Deterministic broad phase, narrow phase and per-class resolution.
//!
//! ```text
//! ┌────────────┐   pairs    ┌─────────────┐  overlap   ┌──────────────────┐
//! │ broad phase│ ─────────▶ │ narrow phase│ ─────────▶ │ policy per class │
//! │ (quadtree) │ BTreeSet   │ AABB / sweep│  + toi     │ solid / strike / │
//! └────────────┘  deduped   └─────────────┘            │ shot / contact   │
//!                                                      └──────────────────┘
//! ```
//!
//! Pairs are unordered, stored with the smaller id first, and processed in
//! ascending order, so a tick with several simultaneous hits always resolves
//! the same way. Platform push-out is applied as each pair is processed;
//! damage is collected into [`Strike`]s against the pre-damage state and
//! applied after the pass by [`apply_strikes`].

use std::collections::BTreeSet;

use serde::{Serialize, Deserialize};

use crate::core::aabb::{Aabb, Axis};
use crate::core::fixed::{Fixed, FIXED_ONE, fixed_mul};
use crate::core::rng::DeterministicRng;
use crate::core::vec2::FixedVec2;
use crate::game::actor::{self, ActorState, ActorTrigger, Intent};
use crate::game::entity::{scale_damage, Entity, EntityId, EntityStore, Tags, HEAVY_SCALE};
use crate::game::events::{EventBus, GameEventData};
use crate::game::quadtree::Quadtree;

// =============================================================================
// PAIRS
// =============================================================================

/// Unordered pair of entity ids, stored smaller-first.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollisionPair {
    /// Smaller id
    pub a: EntityId,
    /// Larger id
    pub b: EntityId,
}

impl CollisionPair {
    /// Normalize two ids into a pair. `None` if they are the same entity.
    pub fn new(x: EntityId, y: EntityId) -> Option<Self> {
        match x.cmp(&y) {
            std::cmp::Ordering::Less => Some(Self { a: x, b: y }),
            std::cmp::Ordering::Greater => Some(Self { a: y, b: x }),
            std::cmp::Ordering::Equal => None,
        }
    }
}

/// Candidate pairs for every moving entity.
///
/// Each mover queries the index with its swept box; static geometry never
/// queries, so static-static pairs never appear. The set removes the
/// duplicate produced when two movers find each other.
pub fn broad_phase(index: &Quadtree, store: &EntityStore) -> BTreeSet<CollisionPair> {
    let mut pairs = BTreeSet::new();
    for entity in store.iter().filter(|e| !e.is_static && !e.despawn) {
        for other in index.query(&entity.broad_bounds()) {
            if let Some(pair) = CollisionPair::new(entity.id, other) {
                pairs.insert(pair);
            }
        }
    }
    pairs
}

// =============================================================================
// CLASSIFICATION + NARROW PHASE
// =============================================================================

/// Resolution policy chosen from the pair's tags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PairClass {
    /// Moving body against solid geometry: push out
    Solid {
        /// Moving entity
        body: EntityId,
        /// Platform
        platform: EntityId,
    },
    /// Attack hitbox against a hostile actor
    Strike {
        /// Hitbox entity
        hitbox: EntityId,
        /// Actor it overlaps
        target: EntityId,
    },
    /// Projectile against geometry or a hostile actor
    Shot {
        /// Projectile entity
        projectile: EntityId,
        /// What it reached
        other: EntityId,
    },
    /// Damaging touch against a hostile actor
    Contact {
        /// Entity carrying `HAZARD`
        source: EntityId,
        /// Actor touched
        target: EntityId,
    },
    /// No interaction
    Ignore,
}

/// Pick the policy for two entities.
pub fn classify(a: &Entity, b: &Entity) -> PairClass {
    let hostile = |x: &Entity, y: &Entity| x.faction.opposes(y.faction) && y.actor.is_some();

    for (x, y) in [(a, b), (b, a)] {
        if x.tags.contains(Tags::HITBOX) {
            return if hostile(x, y) && !y.tags.contains(Tags::HITBOX) {
                PairClass::Strike { hitbox: x.id, target: y.id }
            } else {
                PairClass::Ignore
            };
        }
    }
    for (x, y) in [(a, b), (b, a)] {
        if x.tags.contains(Tags::PROJECTILE) {
            return if y.tags.contains(Tags::PLATFORM) || hostile(x, y) {
                PairClass::Shot { projectile: x.id, other: y.id }
            } else {
                PairClass::Ignore
            };
        }
    }
    for (x, y) in [(a, b), (b, a)] {
        if x.tags.contains(Tags::PLATFORM) {
            return if y.actor.is_some() && !y.is_static {
                PairClass::Solid { body: y.id, platform: x.id }
            } else {
                PairClass::Ignore
            };
        }
    }
    for (x, y) in [(a, b), (b, a)] {
        if x.tags.contains(Tags::HAZARD) && hostile(x, y) {
            return PairClass::Contact { source: x.id, target: y.id };
        }
    }
    PairClass::Ignore
}

/// Exact test. Returns the time of impact in `[0, FIXED_ONE]`.
///
/// Fast movers are swept along their relative displacement so thin
/// geometry cannot be skipped; everything else uses end-of-tick strict
/// overlap, reported as `FIXED_ONE`.
pub fn narrow_phase(a: &Entity, b: &Entity) -> Option<Fixed> {
    if a.body.is_fast_mover() || b.body.is_fast_mover() {
        let relative = a.body.displacement() - b.body.displacement();
        a.body.prev_bounds().sweep(relative, &b.body.prev_bounds())
    } else if a.body.bounds().overlaps(&b.body.bounds()) {
        Some(FIXED_ONE)
    } else {
        None
    }
}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Damage collected during resolution, applied afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Strike {
    /// Entity credited (hitbox or projectile owner, or the hazard itself)
    pub attacker: EntityId,
    /// Entity whose box made contact
    pub source: EntityId,
    /// Entity hit
    pub target: EntityId,
    /// Damage to apply (0 when blocked)
    pub damage: i32,
    /// Velocity impulse for the target
    pub knockback: FixedVec2,
    /// Absorbed by a shield
    pub blocked: bool,
    /// Damage includes a critical multiplier
    pub critical: bool,
}

impl Strike {
    /// Build a strike pushing `target` away from `from_x`.
    fn against(attacker: EntityId, source: EntityId, target: &Entity, damage: i32, knockback: Fixed, from_x: Fixed) -> Self {
        let dir = if target.body.position.x < from_x { -1 } else { 1 };
        let blocked = target.combat.blocking && target.body.facing == -dir;
        let (damage, knockback) = if blocked {
            (0, FixedVec2::new((knockback >> 1) * dir, 0))
        } else {
            (damage, FixedVec2::new(knockback * dir, -(knockback >> 1)))
        };
        Self {
            attacker,
            source,
            target: target.id,
            damage,
            knockback,
            blocked,
            critical: false,
        }
    }
}

/// Outcome of one resolution pass.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ResolveReport {
    /// Pairs that reached the narrow phase
    pub tested: usize,
    /// Pairs whose narrow phase reported contact
    pub collided: usize,
    /// Damage to apply, in pair order
    pub strikes: Vec<Strike>,
    /// Projectiles that hit something and must be released
    pub spent: Vec<EntityId>,
    /// Follow-up work (impact sparks)
    pub intents: Vec<Intent>,
}

impl ResolveReport {
    fn record(&mut self, strike: Strike, at: FixedVec2, sparks: u8, bus: &mut EventBus) {
        bus.publish(GameEventData::Hit {
            attacker: strike.attacker,
            target: strike.target,
            damage: strike.damage,
            knockback: strike.knockback,
            blocked: strike.blocked,
            critical: strike.critical,
        });
        if sparks > 0 {
            self.intents.push(Intent::Sparks { at, count: sparks });
        }
        self.strikes.push(strike);
    }
}

/// Resolve every candidate pair in ascending order.
///
/// Narrow phase runs at most once per pair. `Hit` and `Impact` events are
/// published in pair order. Critical rolls draw from `rng` in that order.
pub fn resolve_pairs(
    pairs: &BTreeSet<CollisionPair>,
    store: &mut EntityStore,
    tick: u32,
    bus: &mut EventBus,
    rng: &mut DeterministicRng,
    sparks: u8,
) -> ResolveReport {
    let mut report = ResolveReport::default();

    for pair in pairs {
        let (Some(a), Some(b)) = (store.get(pair.a), store.get(pair.b)) else {
            continue;
        };
        if a.despawn || b.despawn {
            continue;
        }
        let class = classify(a, b);
        if class == PairClass::Ignore {
            continue;
        }

        report.tested += 1;
        let Some(toi) = narrow_phase(a, b) else {
            continue;
        };
        report.collided += 1;

        match class {
            PairClass::Solid { body, platform } => resolve_solid(store, body, platform, toi),
            PairClass::Strike { hitbox, target } => {
                if let Some((strike, at)) = strike_from_hitbox(store, hitbox, target, tick, rng) {
                    report.record(strike, at, sparks, bus);
                }
            }
            PairClass::Shot { projectile, other } => {
                resolve_shot(store, projectile, other, toi, tick, bus, sparks, &mut report);
            }
            PairClass::Contact { source, target } => {
                if let Some((strike, at)) = strike_from_contact(store, source, target, tick) {
                    report.record(strike, at, sparks, bus);
                }
            }
            PairClass::Ignore => {}
        }
    }
    report
}

/// Push a body out of a platform along the axis of least penetration.
fn resolve_solid(store: &mut EntityStore, body_id: EntityId, platform_id: EntityId, toi: Fixed) {
    let Some(platform) = store.get(platform_id).map(|p| p.body.bounds()) else {
        return;
    };
    let Some(entity) = store.get_mut(body_id) else {
        return;
    };
    let body = &mut entity.body;

    // Swept contact that ends clear of the platform: rewind to the impact
    if toi < FIXED_ONE && !body.bounds().overlaps(&platform) {
        body.position = body.prev_position + body.displacement().scale(toi);
    }

    let axis = match body.bounds().penetration(&platform) {
        Some(pen) => {
            body.position = body.position + pen.push;
            pen.axis
        }
        None => contact_axis(&body.bounds(), &platform),
    };

    match axis {
        Axis::X => body.velocity.x = 0,
        Axis::Y => {
            body.velocity.y = 0;
            if body.position.y < platform.center().y {
                body.grounded = true;
            }
        }
    }
}

/// Axis of a touching (non-overlapping) contact.
fn contact_axis(body: &Aabb, platform: &Aabb) -> Axis {
    let spans_x = body.min.x < platform.max.x && platform.min.x < body.max.x;
    if spans_x {
        Axis::Y
    } else {
        Axis::X
    }
}

/// Melee hit from an owner's active swing.
///
/// Damage scales with the combo chain, the heavy variant and a critical
/// roll; knockback with the combo chain and the heavy variant.
fn strike_from_hitbox(
    store: &mut EntityStore,
    hitbox_id: EntityId,
    target_id: EntityId,
    tick: u32,
    rng: &mut DeterministicRng,
) -> Option<(Strike, FixedVec2)> {
    let owner_id = store.get(hitbox_id)?.hitbox.as_ref()?.owner;
    let owner = store.get(owner_id)?;
    let state = owner.state()?;
    if !state.is_attack_active() {
        return None;
    }
    let combat = &owner.combat;
    let swing = combat.swing;
    let heavy = if state == ActorState::HeavyAttack { HEAVY_SCALE } else { FIXED_ONE };
    let damage_scale = fixed_mul(combat.combo_damage_scale(), heavy);
    let knockback = fixed_mul(fixed_mul(combat.knockback, combat.combo_knockback_scale()), heavy);
    let (damage, crit_chance, crit_multiplier) = (combat.attack_damage, combat.crit_chance, combat.crit_multiplier);
    let from_x = owner.body.position.x;

    if !store.get(target_id)?.is_vulnerable(tick) {
        return None;
    }

    let link = store.get_mut(hitbox_id)?.hitbox.as_mut()?;
    if link.swing_seen != swing {
        link.swing_seen = swing;
        link.struck.clear();
    }
    if link.struck.contains(&target_id) {
        return None;
    }
    link.struck.push(target_id);

    let critical = crit_chance > 0 && rng.roll(crit_chance);
    let damage_scale = if critical { fixed_mul(damage_scale, crit_multiplier) } else { damage_scale };

    let target = store.get(target_id)?;
    let mut strike = Strike::against(owner_id, hitbox_id, target, scale_damage(damage, damage_scale), knockback, from_x);
    strike.critical = critical && !strike.blocked;
    Some((strike, target.body.position))
}

fn strike_from_contact(
    store: &EntityStore,
    source_id: EntityId,
    target_id: EntityId,
    tick: u32,
) -> Option<(Strike, FixedVec2)> {
    let source = store.get(source_id)?;
    if source.combat.contact_damage <= 0 {
        return None;
    }
    if source.actor.is_some() && !source.combat.is_alive() {
        return None;
    }
    let target = store.get(target_id)?;
    if !target.is_vulnerable(tick) {
        return None;
    }
    let strike = Strike::against(
        source_id,
        source_id,
        target,
        source.combat.contact_damage,
        source.combat.knockback,
        source.body.position.x,
    );
    Some((strike, target.body.position))
}

#[allow(clippy::too_many_arguments)]
fn resolve_shot(
    store: &mut EntityStore,
    projectile_id: EntityId,
    other_id: EntityId,
    toi: Fixed,
    tick: u32,
    bus: &mut EventBus,
    sparks: u8,
    report: &mut ResolveReport,
) {
    let Some(projectile) = store.get(projectile_id) else {
        return;
    };
    let Some(link) = projectile.projectile else {
        return;
    };
    if link.spent {
        return;
    }
    let Some(other) = store.get(other_id) else {
        return;
    };
    let impact = projectile.body.prev_position + projectile.body.displacement().scale(toi);

    if other.tags.contains(Tags::PLATFORM) {
        bus.publish(GameEventData::Impact {
            projectile: projectile_id,
            surface: other_id,
            position: impact,
        });
        if sparks > 0 {
            report.intents.push(Intent::Sparks { at: impact, count: sparks });
        }
    } else {
        if !other.is_vulnerable(tick) {
            return;
        }
        let strike = Strike::against(link.owner, projectile_id, other, link.damage, link.knockback, projectile.body.prev_position.x);
        let at = other.body.position;
        report.record(strike, at, sparks, bus);
    }

    if let Some(entity) = store.get_mut(projectile_id) {
        entity.body.position = impact;
        entity.body.velocity = FixedVec2::ZERO;
        if let Some(link) = entity.projectile.as_mut() {
            link.spent = true;
        }
    }
    report.spent.push(projectile_id);
}

/// Apply collected damage and fire `Hurt` or `Die` on each target.
///
/// Runs after the resolution pass, so every strike in a tick was decided
/// against the same pre-damage state.
pub fn apply_strikes(
    strikes: &[Strike],
    store: &mut EntityStore,
    tick: u32,
    bus: &mut EventBus,
    intents: &mut Vec<Intent>,
) {
    for strike in strikes {
        let Some(target) = store.get_mut(strike.target) else {
            continue;
        };
        target.body.velocity = target.body.velocity + strike.knockback;
        if strike.blocked {
            continue;
        }
        target.combat.health = (target.combat.health - strike.damage).max(0);
        target.combat.last_attacker = Some(strike.attacker);

        let trigger = if target.combat.is_alive() {
            ActorTrigger::Hurt
        } else {
            ActorTrigger::Die
        };
        actor::fire(target, trigger, tick, bus, intents);
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use crate::core::fixed::to_fixed;
    use crate::game::actor::{melee_table, player_table, Actor, Strategy, EnemyKind};
    use crate::game::entity::{Body, Combat, EntityKind, Faction, HitboxLink, ProjectileLink, COMBO_KNOCKBACK_STEP};
    use crate::game::events::{EventKind, GameEvent};
    use crate::game::pool::{Pool, PoolKind, ProjectileSlot};
    use crate::game::quadtree::QuadtreeConfig;

    fn at(x: i32, y: i32, hw: i32, hh: i32) -> Body {
        Body::new(FixedVec2::from_ints(x, y), FixedVec2::from_ints(hw, hh))
    }

    fn player(id: u32, body: Body) -> Entity {
        let mut e = Entity::new(EntityId(id), EntityKind::Player, Tags::PLAYER, Faction::Player, body);
        e.combat.health = 100;
        e.combat.max_health = 100;
        e.combat.invulnerability = 60;
        e.actor = Some(Actor::controlled(Arc::new(player_table())));
        e
    }

    fn brute(id: u32, body: Body) -> Entity {
        let tags = Tags::ENEMY | Tags::HAZARD;
        let mut e = Entity::new(EntityId(id), EntityKind::Enemy(EnemyKind::Melee), tags, Faction::Hostile, body);
        e.combat.health = 30;
        e.combat.contact_damage = 10;
        e.combat.knockback = to_fixed(4.0);
        let strategy = Strategy {
            kind: EnemyKind::Melee,
            home_x: body.position.x,
            patrol_range: 0,
            sight_range: 0,
            attack_range: 0,
            block_chance: 0,
        };
        e.actor = Some(Actor::autonomous(Arc::new(melee_table()), strategy));
        e
    }

    fn platform(id: u32, rect: Aabb) -> Entity {
        let body = Body::new(rect.center(), rect.half_extents());
        let mut e = Entity::new(EntityId(id), EntityKind::Platform, Tags::PLATFORM, Faction::Neutral, body);
        e.is_static = true;
        e
    }

    fn store_of(entities: Vec<Entity>) -> EntityStore {
        let mut store = EntityStore::new();
        for e in entities {
            while store.allocate_id() < e.id {}
            store.insert(e);
        }
        store
    }

    fn index_of(store: &EntityStore) -> Quadtree {
        let bounds = Aabb::from_rect(0, 0, to_fixed(2048.0), to_fixed(2048.0));
        let mut index = Quadtree::new(bounds, QuadtreeConfig::default());
        for e in store.iter() {
            if e.is_static {
                index.insert_static(e.id, e.broad_bounds());
            } else {
                index.insert(e.id, e.broad_bounds());
            }
        }
        index
    }

    fn hits(events: &[GameEvent]) -> Vec<(EntityId, EntityId)> {
        events
            .iter()
            .filter_map(|e| match e.data {
                GameEventData::Hit { attacker, target, .. } => Some((attacker, target)),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_pair_normalization() {
        assert_eq!(CollisionPair::new(EntityId(5), EntityId(2)), Some(CollisionPair { a: EntityId(2), b: EntityId(5) }));
        assert_eq!(CollisionPair::new(EntityId(3), EntityId(3)), None);
    }

    #[test]
    fn test_two_hazard_enemies_hit_in_id_order() {
        let mut store = store_of(vec![
            brute(1, at(100, 100, 10, 10)),
            brute(2, at(104, 100, 10, 10)),
            player(3, at(102, 100, 12, 20)),
        ]);
        let index = index_of(&store);
        let mut bus = EventBus::new();
        bus.begin_tick(1);

        let pairs = broad_phase(&index, &store);
        let report = resolve_pairs(&pairs, &mut store, 1, &mut bus, &mut DeterministicRng::new(1), 0);
        assert_eq!(report.strikes.len(), 2);
        assert_eq!(pairs.len(), 3);
        // The two brutes share a faction and never reach the narrow phase
        assert_eq!(report.tested, 2);

        let mut intents = Vec::new();
        apply_strikes(&report.strikes, &mut store, 1, &mut bus, &mut intents);
        assert_eq!(store.get(EntityId(3)).map(|p| p.combat.health), Some(80));

        let events = bus.flush();
        assert_eq!(hits(&events), vec![(EntityId(1), EntityId(3)), (EntityId(2), EntityId(3))]);
        assert_eq!(events.iter().filter(|e| e.kind() == EventKind::Hit).count(), 2);
    }

    #[test]
    fn test_movers_that_find_each_other_are_tested_once() {
        let mut store = store_of(vec![brute(1, at(100, 100, 10, 10)), player(2, at(110, 100, 12, 20))]);
        let index = index_of(&store);

        // Both sides see the other through the index
        for id in [EntityId(1), EntityId(2)] {
            let bounds = store.get(id).map(Entity::broad_bounds).unwrap();
            assert_eq!(index.query(&bounds).len(), 2);
        }

        let pairs = broad_phase(&index, &store);
        assert_eq!(pairs.len(), 1);
        assert!(pairs.contains(&CollisionPair { a: EntityId(1), b: EntityId(2) }));

        let mut bus = EventBus::new();
        bus.begin_tick(1);
        let report = resolve_pairs(&pairs, &mut store, 1, &mut bus, &mut DeterministicRng::new(1), 0);
        assert_eq!(report.tested, 1);
        assert_eq!(report.collided, 1);
        assert_eq!(report.strikes.len(), 1);

        apply_strikes(&report.strikes, &mut store, 1, &mut bus, &mut Vec::new());
        assert_eq!(store.get(EntityId(2)).map(|p| p.combat.health), Some(90));
        assert_eq!(hits(&bus.flush()), vec![(EntityId(1), EntityId(2))]);
    }

    #[test]
    fn test_platform_push_out_grounds_body() {
        let ground = Aabb::from_rect(0, to_fixed(200.0), to_fixed(400.0), to_fixed(24.0));
        let mut body = at(100, 180, 12, 20);
        body.prev_position = FixedVec2::new(to_fixed(100.0), to_fixed(178.0));
        body.position.y = to_fixed(181.0); // 1px into the ground
        body.velocity.y = to_fixed(3.0);

        let mut store = store_of(vec![platform(0, ground), player(1, body)]);
        let index = index_of(&store);
        let mut bus = EventBus::new();
        let pairs = broad_phase(&index, &store);
        resolve_pairs(&pairs, &mut store, 1, &mut bus, &mut DeterministicRng::new(1), 0);

        let body = store.get(EntityId(1)).map(|e| e.body).unwrap();
        assert_eq!(body.position.y, to_fixed(180.0));
        assert_eq!(body.velocity.y, 0);
        assert!(body.grounded);
    }

    #[test]
    fn test_wall_push_out_stops_horizontal_motion() {
        let wall = Aabb::from_rect(to_fixed(200.0), 0, to_fixed(20.0), to_fixed(400.0));
        let mut body = at(190, 100, 12, 20);
        body.prev_position = FixedVec2::from_ints(186, 100);
        body.velocity.x = to_fixed(4.0);

        let mut store = store_of(vec![platform(0, wall), player(1, body)]);
        let index = index_of(&store);
        let pairs = broad_phase(&index, &store);
        resolve_pairs(&pairs, &mut store, 1, &mut EventBus::new(), &mut DeterministicRng::new(1), 0);

        let body = store.get(EntityId(1)).map(|e| e.body).unwrap();
        assert_eq!(body.position.x, to_fixed(188.0));
        assert_eq!(body.velocity.x, 0);
        assert!(!body.grounded);
    }

    #[test]
    fn test_fast_projectile_hits_thin_platform() {
        // 4px projectile moving 40px in one tick, wall 2px thick between start and end
        let wall = Aabb::from_rect(to_fixed(120.0), 0, to_fixed(2.0), to_fixed(200.0));
        let mut pool: Pool<ProjectileSlot> = Pool::new(PoolKind::Projectile, 4);
        let handle = pool.acquire().unwrap();

        let mut body = at(140, 100, 2, 2);
        body.prev_position = FixedVec2::from_ints(100, 100);
        body.velocity.x = to_fixed(40.0);
        let mut shot = Entity::new(EntityId(1), EntityKind::Projectile, Tags::PROJECTILE, Faction::Hostile, body);
        shot.projectile = Some(ProjectileLink { owner: EntityId(9), damage: 5, knockback: 0, handle, spent: false });

        assert!(!shot.body.bounds().overlaps(&wall), "end position is past the wall");
        assert!(shot.body.is_fast_mover());

        let mut store = store_of(vec![platform(0, wall), shot]);
        let index = index_of(&store);
        let mut bus = EventBus::new();
        let pairs = broad_phase(&index, &store);
        let report = resolve_pairs(&pairs, &mut store, 1, &mut bus, &mut DeterministicRng::new(1), 2);

        assert_eq!(report.spent, vec![EntityId(1)]);
        let events = bus.flush();
        assert_eq!(events.len(), 1);
        match &events[0].data {
            GameEventData::Impact { projectile, surface, position } => {
                assert_eq!((*projectile, *surface), (EntityId(1), EntityId(0)));
                // Contact at x = 118 (wall face minus half width), within rounding
                assert!((position.x - to_fixed(118.0)).abs() < to_fixed(0.01));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert_eq!(report.intents.len(), 1);
    }

    #[test]
    fn test_inactive_hitbox_is_harmless_and_swing_hits_once() {
        let mut owner = player(1, at(100, 100, 12, 20));
        owner.combat.attack_damage = 12;
        owner.combat.knockback = to_fixed(6.0);
        owner.child_hitbox = Some(EntityId(2));

        let mut hb = Entity::new(EntityId(2), EntityKind::Hitbox, Tags::HITBOX, Faction::Player, at(124, 100, 14, 12));
        hb.hitbox = Some(HitboxLink { owner: EntityId(1), reach: to_fixed(24.0), ..HitboxLink::default() });

        let mut store = store_of(vec![owner, hb, brute(3, at(130, 100, 10, 10))]);
        let index = index_of(&store);
        let mut bus = EventBus::new();
        let mut intents = Vec::new();

        // Idle: geometric overlap but no hit
        let pairs = broad_phase(&index, &store);
        let report = resolve_pairs(&pairs, &mut store, 1, &mut bus, &mut DeterministicRng::new(1), 0);
        assert!(report.strikes.iter().all(|s| s.source != EntityId(2)));

        // Put the owner into its active frames
        let owner = store.get_mut(EntityId(1)).unwrap();
        actor::fire(owner, ActorTrigger::Attack, 2, &mut bus, &mut intents);
        actor::with_machine(owner, 6, &mut bus, &mut intents, |m, h| m.fire_timeout(6, h));
        assert_eq!(owner.state(), Some(ActorState::Attack));

        let first = resolve_pairs(&pairs, &mut store, 6, &mut bus, &mut DeterministicRng::new(1), 0);
        let second = resolve_pairs(&pairs, &mut store, 7, &mut bus, &mut DeterministicRng::new(1), 0);
        let from_hitbox = |r: &ResolveReport| r.strikes.iter().filter(|s| s.source == EntityId(2)).count();
        assert_eq!(from_hitbox(&first), 1);
        assert_eq!(from_hitbox(&second), 0, "one hit per target per swing");
        assert_eq!(first.strikes[0].knockback.x, to_fixed(6.0));
    }

    /// Owner #1 with hitbox #2 over brute #3, started with `trigger` at
    /// tick 2 and advanced into its active frames at `2 + windup`.
    fn mid_swing(combat: Combat, trigger: ActorTrigger, windup: u32) -> EntityStore {
        let mut owner = player(1, at(100, 100, 12, 20));
        owner.combat = Combat { health: 100, max_health: 100, attack_damage: 12, knockback: to_fixed(6.0), ..combat };
        owner.child_hitbox = Some(EntityId(2));

        let mut hb = Entity::new(EntityId(2), EntityKind::Hitbox, Tags::HITBOX, Faction::Player, at(124, 100, 14, 12));
        hb.hitbox = Some(HitboxLink { owner: EntityId(1), reach: to_fixed(24.0), ..HitboxLink::default() });

        let mut store = store_of(vec![owner, hb, brute(3, at(130, 100, 10, 10))]);
        let owner = store.get_mut(EntityId(1)).unwrap();
        let mut bus = EventBus::new();
        let mut intents = Vec::new();
        let active = 2 + windup;
        actor::fire(owner, trigger, 2, &mut bus, &mut intents);
        actor::with_machine(owner, active, &mut bus, &mut intents, |m, h| m.fire_timeout(active, h));
        assert!(owner.state().is_some_and(ActorState::is_attack_active));
        store
    }

    fn swing_strike(store: &mut EntityStore, tick: u32, rng: &mut DeterministicRng, bus: &mut EventBus) -> Strike {
        let index = index_of(store);
        let pairs = broad_phase(&index, store);
        let report = resolve_pairs(&pairs, store, tick, bus, rng, 0);
        report.strikes.into_iter().find(|s| s.source == EntityId(2)).unwrap()
    }

    #[test]
    fn test_heavy_swing_scales_damage_and_knockback() {
        let mut store = mid_swing(Combat::default(), ActorTrigger::Heavy, 5);
        assert_eq!(store.get(EntityId(1)).and_then(Entity::state), Some(ActorState::HeavyAttack));

        let strike = swing_strike(&mut store, 7, &mut DeterministicRng::new(1), &mut EventBus::new());
        assert_eq!(strike.damage, 21);
        assert_eq!(strike.knockback.x, fixed_mul(to_fixed(6.0), HEAVY_SCALE));
        assert!(!strike.critical);
    }

    #[test]
    fn test_chained_swing_hits_harder() {
        let combat = Combat { max_combo: 5, combo_window: 45, ..Combat::default() };
        let mut store = mid_swing(combat, ActorTrigger::Attack, 4);
        let mut bus = EventBus::new();
        let mut intents = Vec::new();

        let owner = store.get_mut(EntityId(1)).unwrap();
        for tick in [14, 24] {
            actor::with_machine(owner, tick, &mut bus, &mut intents, |m, h| m.fire_timeout(tick, h));
        }
        assert_eq!(owner.state(), Some(ActorState::Idle));
        actor::fire(owner, ActorTrigger::Attack, 25, &mut bus, &mut intents);
        actor::with_machine(owner, 29, &mut bus, &mut intents, |m, h| m.fire_timeout(29, h));
        assert_eq!(owner.state(), Some(ActorState::Attack));
        assert_eq!(owner.combat.combo, 2);

        let strike = swing_strike(&mut store, 29, &mut DeterministicRng::new(1), &mut bus);
        assert_eq!(strike.damage, 13, "12 * 1.12, truncated");
        assert_eq!(strike.knockback.x, fixed_mul(to_fixed(6.0), FIXED_ONE + COMBO_KNOCKBACK_STEP));
    }

    #[test]
    fn test_critical_hit_is_flagged_on_strike_and_event() {
        let combat = Combat { crit_chance: FIXED_ONE, crit_multiplier: to_fixed(1.5), ..Combat::default() };
        let mut store = mid_swing(combat, ActorTrigger::Attack, 4);
        let mut bus = EventBus::new();
        bus.begin_tick(6);

        let strike = swing_strike(&mut store, 6, &mut DeterministicRng::new(1), &mut bus);
        assert_eq!(strike.damage, 18);
        assert!(strike.critical);

        let critical: Vec<bool> = bus
            .flush()
            .iter()
            .filter_map(|e| match e.data {
                GameEventData::Hit { attacker, critical, .. } if attacker == EntityId(1) => Some(critical),
                _ => None,
            })
            .collect();
        assert_eq!(critical, vec![true]);
    }

    #[test]
    fn test_no_crit_chance_leaves_rng_untouched() {
        let mut store = mid_swing(Combat::default(), ActorTrigger::Attack, 4);
        let mut rng = DeterministicRng::new(9);
        let before = rng.state();

        let strike = swing_strike(&mut store, 6, &mut rng, &mut EventBus::new());
        assert_eq!(strike.damage, 12);
        assert!(!strike.critical);
        assert_eq!(rng.state(), before);
    }

    #[test]
    fn test_partial_crit_chance_is_reproducible() {
        let combat = Combat { crit_chance: FIXED_ONE / 2, crit_multiplier: to_fixed(2.0), ..Combat::default() };
        let run = |seed: u64| {
            let mut store = mid_swing(combat.clone(), ActorTrigger::Attack, 4);
            let mut rng = DeterministicRng::new(seed);
            let strike = swing_strike(&mut store, 6, &mut rng, &mut EventBus::new());
            (strike.critical, strike.damage, rng.state())
        };
        let (critical, damage, _) = run(4);
        assert_eq!(run(4), run(4));
        assert_eq!(damage, if critical { 24 } else { 12 });
    }

    #[test]
    fn test_shield_facing_attacker_blocks() {
        let mut guard = brute(2, at(120, 100, 10, 10));
        guard.combat.blocking = true;
        guard.body.facing = -1;
        let attacker = brute(1, at(100, 100, 10, 10));

        let strike = Strike::against(attacker.id, attacker.id, &guard, 10, to_fixed(4.0), attacker.body.position.x);
        assert!(strike.blocked);
        assert_eq!(strike.damage, 0);

        guard.body.facing = 1;
        let strike = Strike::against(attacker.id, attacker.id, &guard, 10, to_fixed(4.0), attacker.body.position.x);
        assert!(!strike.blocked);
        assert_eq!(strike.damage, 10);
    }

    #[test]
    fn test_lethal_strike_fires_die() {
        let mut store = store_of(vec![brute(1, at(0, 0, 4, 4))]);
        let mut bus = EventBus::new();
        let mut intents = Vec::new();
        let strike = Strike {
            attacker: EntityId(7),
            source: EntityId(7),
            target: EntityId(1),
            damage: 50,
            knockback: FixedVec2::ZERO,
            blocked: false,
            critical: false,
        };
        apply_strikes(&[strike], &mut store, 3, &mut bus, &mut intents);

        let brute = store.get(EntityId(1)).unwrap();
        assert_eq!(brute.combat.health, 0);
        assert_eq!(brute.state(), Some(ActorState::Dead));
        assert!(brute.despawn);
        assert!(bus.pending().iter().any(|e| e.data == GameEventData::Died {
            entity: EntityId(1),
            killer: Some(EntityId(7)),
            xp_reward: 0,
        }));
    }
}
