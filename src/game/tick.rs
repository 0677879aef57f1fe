//! Simulation Tick
//!
//! One fixed-timestep step of the world. The phase order is fixed; each
//! phase relies on what the previous one left behind.
//!
//! ```text
//! ┌──────────────┬─────────────────────────────────────────────────┐
//! │ 1 triggers   │ timeouts, deferred, landing, jump timing, input │
//! │ 2 ai         │ strategies decide, queued intents run           │
//! │ 3 integrate  │ control, friction, gravity, kill plane          │
//! │ 4 index      │ rebuild or incremental update of movers         │
//! │ 5 collide    │ broad phase, resolve, strike, re-sync the index │
//! │ 6 flush      │ event bus delivers this tick's events           │
//! │ 7 recycle    │ expire pooled objects, destroy despawned        │
//! └──────────────┴─────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here returns an error. Pool exhaustion, ignored triggers, stale
//! handles and out-of-bounds entities all degrade without stopping the tick.

use std::collections::BTreeMap;

use crate::core::aabb::Aabb;
use crate::core::fixed::{Fixed, fixed_abs, fixed_approach, fixed_mul};
use crate::core::vec2::FixedVec2;
use crate::game::actor::{self, ActorState, ActorTrigger};
use crate::game::collision::{apply_strikes, broad_phase, resolve_pairs};
use crate::game::entity::{Entity, EntityId, EntityKind};
use crate::game::events::GameEvent;
use crate::game::input::InputFrame;
use crate::game::world::World;

/// Horizontal speed below which friction stops a body outright.
const REST_SPEED: Fixed = 1 << 10;

/// Result of a tick.
#[derive(Debug, Default)]
pub struct TickResult {
    /// Tick that was simulated
    pub tick: u32,
    /// Events delivered in this tick's flush
    pub events: Vec<GameEvent>,
    /// Candidate pairs from the broad phase
    pub candidate_pairs: usize,
    /// Pairs that reached the narrow phase
    pub tested: usize,
    /// Pairs in contact
    pub collided: usize,
    /// True if the index was rebuilt rather than updated
    pub rebuilt: bool,
    /// Entities destroyed at the end of the tick
    pub despawned: Vec<EntityId>,
}

/// Run one simulation tick.
///
/// `inputs` maps player entities to this tick's controller state; a player
/// missing from the map is treated as idle.
pub fn tick(world: &mut World, inputs: &BTreeMap<EntityId, InputFrame>) -> TickResult {
    world.tick += 1;
    let now = world.tick;
    world.bus.begin_tick(now);

    // 1. Triggers
    drive_triggers(world, inputs);

    // 2. AI
    run_ai(world);
    world.run_intents();

    // 3. Integrate
    integrate(world);

    // 4. Refresh index
    let rebuilt = refresh_index(world);

    // 5. Collide
    let pairs = broad_phase(&world.index, &world.entities);
    let sparks = world.config.pools.sparks_per_hit;
    let report = resolve_pairs(&pairs, &mut world.entities, now, &mut world.bus, &mut world.rng, sparks);
    apply_strikes(&report.strikes, &mut world.entities, now, &mut world.bus, &mut world.intents);
    for id in &report.spent {
        if let Some(projectile) = world.entities.get_mut(*id) {
            projectile.despawn = true;
        }
    }
    world.intents.extend(report.intents.iter().copied());
    world.run_intents();
    sync_moved(world);

    // 6. Flush
    let events = world.bus.flush();

    // 7. Recycle
    let despawned = recycle(world);

    TickResult {
        tick: now,
        events,
        candidate_pairs: pairs.len(),
        tested: report.tested,
        collided: report.collided,
        rebuilt,
        despawned,
    }
}

// =============================================================================
// PHASE 1: TRIGGERS
// =============================================================================

fn drive_triggers(world: &mut World, inputs: &BTreeMap<EntityId, InputFrame>) {
    let now = world.tick;
    let World { entities, bus, intents, .. } = world;

    for entity in entities.iter_mut() {
        if entity.actor.is_none() || entity.despawn {
            continue;
        }

        actor::with_machine(entity, now, bus, intents, |machine, host| {
            machine.fire_timeout(now, host);
            for trigger in machine.take_deferred() {
                machine.fire(trigger, now, host);
            }
        });

        let mut jumped = false;
        if entity.body.grounded && !entity.body.was_grounded {
            actor::fire(entity, ActorTrigger::Land, now, bus, intents);
            if entity.combat.has_buffered_jump(now) {
                jumped = !actor::fire(entity, ActorTrigger::Jump, now, bus, intents).is_ignored();
            }
        } else if entity.body.was_grounded && !entity.body.grounded {
            // Walked off a ledge
            entity.combat.coyote_until = now + entity.combat.coyote_ticks;
        }

        if entity.kind == EntityKind::Player {
            let frame = inputs.get(&entity.id).copied().unwrap_or_default();
            let axis = frame.move_axis();
            if axis != 0 && entity.state().is_some_and(ActorState::accepts_control) {
                entity.body.facing = if axis < 0 { -1 } else { 1 };
            }
            for trigger in frame.triggers() {
                let fired = actor::fire(entity, trigger, now, bus, intents);
                if trigger == ActorTrigger::Jump && fired.is_ignored() && !jumped && !entity.body.grounded {
                    entity.combat.jump_buffered_until = now + entity.combat.jump_buffer_ticks;
                }
            }
            let controllable = entity.state().is_some_and(ActorState::accepts_control);
            entity.body.move_axis = if controllable { axis } else { 0 };
        }
    }
}

// =============================================================================
// PHASE 2: AI
// =============================================================================

fn run_ai(world: &mut World) {
    let now = world.tick;
    let player = world
        .player
        .and_then(|id| world.entities.get(id))
        .filter(|p| !p.despawn && p.state() != Some(ActorState::Dead))
        .map(|p| (p.id, p.body.position));
    let World { entities, index, bus, intents, rng, .. } = world;

    for entity in entities.iter_mut() {
        if entity.despawn {
            continue;
        }
        let Entity { actor: behavior, body, .. } = &mut *entity;
        let Some(behavior) = behavior.as_ref() else {
            continue;
        };
        let Some(strategy) = behavior.strategy.as_ref() else {
            continue;
        };

        let target = player.and_then(|(player_id, position)| {
            let reach = FixedVec2::new(strategy.sight_range, strategy.sight_range >> 2);
            index.query(&body.bounds().expand(reach)).contains(&player_id).then_some(position)
        });
        let trigger = strategy.decide(behavior.machine.current(), body, target, rng);

        if let Some(trigger) = trigger {
            actor::fire(entity, trigger, now, bus, intents);
        }
    }
}

// =============================================================================
// PHASE 3: INTEGRATE
// =============================================================================

fn integrate(world: &mut World) {
    let physics = world.config.physics;
    let kill_y = world.kill_y;

    for entity in world.entities.iter_mut() {
        if entity.is_static || entity.hitbox.is_some() {
            continue;
        }
        let state = entity.state();
        let body = &mut entity.body;
        body.prev_position = body.position;

        if entity.actor.is_none() {
            body.position = body.position + body.velocity;
            continue;
        }

        body.was_grounded = body.grounded;
        body.grounded = false;

        // Dash holds its impulse and ignores gravity
        if state != Some(ActorState::Dash) {
            if body.move_axis != 0 {
                let target = fixed_mul(body.max_speed, body.move_axis);
                body.velocity.x = fixed_approach(body.velocity.x, target, physics.acceleration);
            } else {
                body.velocity.x = fixed_mul(body.velocity.x, physics.friction);
                if fixed_abs(body.velocity.x) < REST_SPEED {
                    body.velocity.x = 0;
                }
            }
            if body.gravity {
                body.velocity.y = (body.velocity.y + physics.gravity).min(physics.max_fall_speed);
            }
        }
        body.position = body.position + body.velocity;

        if body.position.y > kill_y {
            body.position.y = kill_y;
            body.velocity = FixedVec2::ZERO;
            body.gravity = false;
            if let Some(actor) = entity.actor.as_mut() {
                if !actor.machine.is_in(ActorState::Dead) && !actor.machine.has_deferred() {
                    actor.machine.defer(ActorTrigger::Die);
                }
            }
        }
    }

    // Hitboxes snap to their owners; they never sweep
    let anchors: Vec<(EntityId, Option<(FixedVec2, i32)>)> = world
        .entities
        .iter()
        .filter_map(|e| {
            let link = e.hitbox.as_ref()?;
            let owner = world.entities.get(link.owner).map(|o| (o.body.position, o.body.facing));
            Some((e.id, owner))
        })
        .collect();

    for (id, anchor) in anchors {
        let Some(hitbox) = world.entities.get_mut(id) else {
            continue;
        };
        match anchor {
            Some((position, facing)) => {
                let reach = hitbox.hitbox.as_ref().map_or(0, |link| link.reach);
                let center = position + FixedVec2::new(reach * facing, 0);
                hitbox.body.position = center;
                hitbox.body.prev_position = center;
            }
            None => hitbox.despawn = true,
        }
    }
}

// =============================================================================
// PHASE 4: INDEX
// =============================================================================

/// Bring every mover's index entry up to date. Returns `true` on rebuild.
fn refresh_index(world: &mut World) -> bool {
    let movers: Vec<(EntityId, Aabb)> = world
        .entities
        .iter()
        .filter(|e| !e.is_static && !e.despawn)
        .map(|e| (e.id, e.broad_bounds()))
        .collect();

    let rebuild = world.config.quadtree.prefers_rebuild(movers.len());
    if rebuild {
        world.index.rebuild_dynamic(movers);
    } else {
        for (id, bounds) in movers {
            world.index.update(id, bounds);
        }
    }
    rebuild
}

/// Re-index bodies the resolver pushed out or snapped after phase 4.
fn sync_moved(world: &mut World) {
    let World { entities, index, .. } = world;
    for entity in entities.iter() {
        if entity.is_static || entity.despawn {
            continue;
        }
        let bounds = entity.broad_bounds();
        if index.bounds_of(entity.id) != Some(bounds) {
            index.update(entity.id, bounds);
        }
    }
}

// =============================================================================
// PHASE 7: RECYCLE
// =============================================================================

fn recycle(world: &mut World) -> Vec<EntityId> {
    let drift = world.config.physics.gravity >> 1;
    let mut faded = Vec::new();
    for (handle, particle) in world.particles.iter_active_mut() {
        particle.ttl = particle.ttl.saturating_sub(1);
        if particle.ttl == 0 {
            faded.push(handle);
            continue;
        }
        particle.position = particle.position + particle.velocity;
        particle.velocity.y += drift;
    }
    for handle in faded {
        world.particles.release(handle);
    }

    let mut expired = Vec::new();
    for (_, slot) in world.projectiles.iter_active_mut() {
        slot.ttl = slot.ttl.saturating_sub(1);
        if slot.ttl == 0 {
            expired.push(slot.entity);
        }
    }
    for id in expired {
        if let Some(projectile) = world.entities.get_mut(id) {
            projectile.despawn = true;
        }
    }

    let level = world.index.bounds();
    for entity in world.entities.iter_mut() {
        if entity.projectile.is_some() && !entity.body.bounds().touches(&level) {
            entity.despawn = true;
        }
    }

    let doomed: Vec<EntityId> = world.entities.iter().filter(|e| e.despawn).map(|e| e.id).collect();
    for id in &doomed {
        world.destroy(*id);
    }
    doomed
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::fixed::to_fixed;
    use crate::game::actor::EnemyKind;
    use crate::game::config::SimConfig;
    use crate::game::entity::Tags;
    use crate::game::events::{EventKind, GameEventData};
    use crate::game::level::{EnemySpawn, LevelData, PointSpec, RectSpec};
    use crate::game::quadtree::RebuildPolicy;

    /// 800x600 room with a ground slab at y = 500 and the player standing
    /// on it at x = 100.
    fn room(enemies: Vec<EnemySpawn>) -> LevelData {
        LevelData {
            name: "room".into(),
            width: 800.0,
            height: 600.0,
            player_spawn: PointSpec { x: 100.0, y: 480.0 },
            platforms: vec![RectSpec::new(0.0, 500.0, 800.0, 100.0)],
            hazards: Vec::new(),
            enemies,
        }
    }

    fn enemy(kind: EnemyKind, x: f64, y: f64) -> EnemySpawn {
        EnemySpawn {
            kind,
            at: PointSpec { x, y },
            patrol_range: 0.0,
        }
    }

    fn step(world: &mut World, frame: InputFrame) -> TickResult {
        let mut inputs = BTreeMap::new();
        if let Some(player) = world.player() {
            inputs.insert(player, frame);
        }
        tick(world, &inputs)
    }

    fn player_state(world: &World) -> Option<ActorState> {
        world.player().and_then(|id| world.entity(id)).and_then(Entity::state)
    }

    fn script(t: u32) -> InputFrame {
        let mut frame = InputFrame::moving(if (t / 120) % 4 == 3 { -127 } else { 127 });
        if t % 45 == 0 {
            frame = frame.with(InputFrame::FLAG_JUMP);
        }
        if t % 20 == 7 {
            frame = frame.with(InputFrame::FLAG_ATTACK);
        }
        if t % 97 == 50 {
            frame = frame.with(InputFrame::FLAG_DASH);
        }
        frame
    }

    #[test]
    fn test_attack_during_cooldown_is_ignored() {
        let mut world = World::load(&room(Vec::new()), SimConfig::default(), 1).unwrap();
        let attack = InputFrame::new().with(InputFrame::FLAG_ATTACK);

        step(&mut world, attack);
        assert_eq!(player_state(&world), Some(ActorState::Windup));

        // Windup 4 + Attack 8 + Recovery 10 ticks
        for _ in 2..=24 {
            step(&mut world, InputFrame::new());
        }
        assert_eq!(player_state(&world), Some(ActorState::Idle));

        let result = step(&mut world, attack);
        assert_eq!(player_state(&world), Some(ActorState::Idle), "cooldown runs until tick 31");
        assert!(!result.events.iter().any(|e| e.kind() == EventKind::StateChanged));

        for _ in 26..=30 {
            step(&mut world, InputFrame::new());
        }
        step(&mut world, attack);
        assert_eq!(world.current_tick(), 31);
        assert_eq!(player_state(&world), Some(ActorState::Windup));
    }

    #[test]
    fn test_player_lands_and_jumps() {
        let mut world = World::load(&room(Vec::new()), SimConfig::default(), 1).unwrap();
        step(&mut world, InputFrame::new());
        let player = world.player().unwrap();
        assert!(world.entity(player).unwrap().body.grounded);

        step(&mut world, InputFrame::new().with(InputFrame::FLAG_JUMP));
        assert_eq!(player_state(&world), Some(ActorState::Jump));

        let mut landed = false;
        for _ in 0..120 {
            step(&mut world, InputFrame::new());
            if player_state(&world) == Some(ActorState::Idle) {
                landed = true;
                break;
            }
        }
        assert!(landed);
        assert_eq!(world.entity(player).unwrap().body.position.y, to_fixed(480.0));
    }

    /// Player grounded on a short ledge, then carried past its edge so the
    /// next tick is its first airborne one.
    fn walked_off(config: SimConfig) -> World {
        let mut level = room(Vec::new());
        level.platforms = vec![RectSpec::new(0.0, 500.0, 120.0, 100.0)];
        let mut world = World::load(&level, config, 1).unwrap();
        step(&mut world, InputFrame::new());

        let player = world.player().unwrap();
        let body = &mut world.entities.get_mut(player).unwrap().body;
        assert!(body.grounded);
        body.position.x = to_fixed(300.0);
        body.prev_position = body.position;
        step(&mut world, InputFrame::new());
        world
    }

    #[test]
    fn test_coyote_jump_after_walking_off() {
        let jump = InputFrame::new().with(InputFrame::FLAG_JUMP);

        // Window opens on tick 3 and lasts 6 ticks
        let mut world = walked_off(SimConfig::default());
        for _ in 3..5 {
            step(&mut world, InputFrame::new());
        }
        step(&mut world, jump);
        assert_eq!(world.current_tick(), 5);
        assert_eq!(player_state(&world), Some(ActorState::Jump));

        let mut world = walked_off(SimConfig::default());
        for _ in 3..9 {
            step(&mut world, InputFrame::new());
        }
        step(&mut world, jump);
        assert_eq!(player_state(&world), Some(ActorState::Idle), "window closed at tick 9");

        let mut config = SimConfig::default();
        config.player.coyote_ticks = 0;
        let mut world = walked_off(config);
        step(&mut world, jump);
        assert_eq!(player_state(&world), Some(ActorState::Idle));
    }

    /// Tick on which a jump made at tick 2 lands.
    fn landing_tick() -> u32 {
        let mut world = World::load(&room(Vec::new()), SimConfig::default(), 1).unwrap();
        step(&mut world, InputFrame::new());
        step(&mut world, InputFrame::new().with(InputFrame::FLAG_JUMP));
        while player_state(&world) != Some(ActorState::Idle) {
            assert!(world.current_tick() < 200, "never landed");
            step(&mut world, InputFrame::new());
        }
        world.current_tick()
    }

    /// Jump at tick 2, press again at `press`, run until `until`.
    fn jump_with_early_press(press: u32, until: u32) -> World {
        let mut world = World::load(&room(Vec::new()), SimConfig::default(), 1).unwrap();
        for t in 1..=until {
            let frame = if t == 2 || t == press {
                InputFrame::new().with(InputFrame::FLAG_JUMP)
            } else {
                InputFrame::new()
            };
            step(&mut world, frame);
        }
        world
    }

    #[test]
    fn test_buffered_jump_fires_on_landing() {
        let land = landing_tick();
        assert!(land > 12);

        let world = jump_with_early_press(land - 3, land);
        assert_eq!(player_state(&world), Some(ActorState::Jump), "buffered press jumps on landing");
        let player = world.player().and_then(|id| world.entity(id)).unwrap();
        assert!(player.body.velocity.y < 0);
        assert_eq!(player.combat.jump_buffered_until, 0);

        // The buffered jump is used once; the next landing stays put
        let mut world = world;
        let mut relanded = false;
        for _ in 0..200 {
            step(&mut world, InputFrame::new());
            if player_state(&world) == Some(ActorState::Idle) {
                relanded = true;
                break;
            }
        }
        assert!(relanded);
        step(&mut world, InputFrame::new());
        assert_eq!(player_state(&world), Some(ActorState::Idle));
    }

    #[test]
    fn test_stale_jump_press_is_dropped() {
        let land = landing_tick();
        let world = jump_with_early_press(land - 7, land);
        assert_eq!(player_state(&world), Some(ActorState::Idle));
    }

    #[test]
    fn test_two_hazard_enemies_hit_once_each_in_id_order() {
        let level = room(vec![
            enemy(EnemyKind::Melee, 104.0, 482.0),
            enemy(EnemyKind::Melee, 96.0, 482.0),
        ]);
        let mut world = World::load(&level, SimConfig::default(), 1).unwrap();
        let player = world.player().unwrap();

        let result = step(&mut world, InputFrame::new());
        let hits: Vec<(EntityId, EntityId)> = result
            .events
            .iter()
            .filter_map(|e| match e.data {
                GameEventData::Hit { attacker, target, .. } => Some((attacker, target)),
                _ => None,
            })
            .collect();

        assert_eq!(hits.len(), 2);
        assert!(hits[0].0 < hits[1].0, "hits are delivered in ascending id order");
        assert!(hits.iter().all(|(_, target)| *target == player));

        let contact = world.config().enemies.melee.contact_damage;
        let health = world.entity(player).unwrap().combat.health;
        assert_eq!(health, world.config().player.health - 2 * contact);
        assert_eq!(player_state(&world), Some(ActorState::Hurt));
    }

    #[test]
    fn test_fast_projectile_cannot_tunnel() {
        let mut world = World::load(&room(Vec::new()), SimConfig::default(), 1).unwrap();
        let player = world.player().unwrap();
        let wall = world.spawn_platform(Aabb::from_rect(to_fixed(140.0), to_fixed(400.0), to_fixed(2.0), to_fixed(100.0)));

        let shot = world.spawn_projectile(player).unwrap();
        if let Some(projectile) = world.entity_mut(shot) {
            projectile.body.velocity = FixedVec2::new(to_fixed(40.0), 0);
        }

        let result = step(&mut world, InputFrame::new());
        let impact = result.events.iter().find_map(|e| match e.data {
            GameEventData::Impact { projectile, surface, .. } => Some((projectile, surface)),
            _ => None,
        });
        assert_eq!(impact, Some((shot, wall)));
        assert!(result.despawned.contains(&shot));
        assert!(world.entity(shot).is_none());
        assert_eq!(world.projectile_stats().active, 0);
        assert_eq!(world.particles().active_count(), world.config().pools.sparks_per_hit as usize);
    }

    #[test]
    fn test_ranged_enemy_fires() {
        let level = room(vec![enemy(EnemyKind::Ranged, 400.0, 482.0)]);
        let mut world = World::load(&level, SimConfig::default(), 1).unwrap();

        let mut fired = false;
        for _ in 0..40 {
            let result = step(&mut world, InputFrame::new());
            fired |= result.events.iter().any(|e| {
                matches!(e.data, GameEventData::Spawned { tags, .. } if tags.contains(Tags::PROJECTILE))
            });
        }
        assert!(fired);
        assert!(world.projectile_stats().acquired >= 1);
    }

    #[test]
    fn test_falling_out_kills_player() {
        let mut level = room(Vec::new());
        level.platforms.clear();
        let mut world = World::load(&level, SimConfig::default(), 1).unwrap();

        let mut deaths = Vec::new();
        for _ in 0..200 {
            let result = step(&mut world, InputFrame::new());
            deaths.extend(result.events.into_iter().filter(|e| e.kind() == EventKind::Died));
        }
        assert_eq!(deaths.len(), 1);
        assert!(matches!(deaths[0].data, GameEventData::Died { killer: None, .. }));
        assert_eq!(player_state(&world), Some(ActorState::Dead));
        assert!(world.player().is_some(), "players stay in the world when dead");
    }

    #[test]
    fn test_identical_runs_match() {
        let run = || {
            let mut world = World::load(&LevelData::demo(), SimConfig::default(), 99).unwrap();
            let mut events = Vec::new();
            for t in 0..600 {
                events.extend(step(&mut world, script(t)).events);
            }
            (world.compute_hash(), events, world.views())
        };
        let (hash_a, events_a, views_a) = run();
        let (hash_b, events_b, views_b) = run();
        assert_eq!(hash_a, hash_b);
        assert_eq!(events_a, events_b);
        assert_eq!(views_a, views_b);
        assert!(!events_a.is_empty());
    }

    #[test]
    fn test_rebuild_and_incremental_agree() {
        let run = |policy| {
            let mut config = SimConfig::default();
            config.quadtree.policy = policy;
            let mut world = World::load(&LevelData::demo(), config, 5).unwrap();
            let mut rebuilt = false;
            for t in 0..300 {
                rebuilt |= step(&mut world, script(t)).rebuilt;
            }
            (world.compute_hash(), rebuilt)
        };
        let (rebuild_hash, rebuilt) = run(RebuildPolicy::Rebuild);
        let (incremental_hash, incremental_rebuilt) = run(RebuildPolicy::Incremental);
        assert!(rebuilt);
        assert!(!incremental_rebuilt);
        assert_eq!(rebuild_hash, incremental_hash);
    }

    #[test]
    fn test_push_out_is_reflected_in_index() {
        let mut world = World::load(&room(Vec::new()), SimConfig::default(), 1).unwrap();
        let player = world.player().unwrap();
        for _ in 0..3 {
            step(&mut world, InputFrame::new());
        }
        let entity = world.entity(player).unwrap();
        assert!(entity.body.grounded);
        assert_eq!(entity.body.bounds().max.y, to_fixed(500.0));
        assert_eq!(world.index().bounds_of(player), Some(entity.broad_bounds()));

        // Sight queries next tick see the resting box, not the sunk one
        let below = Aabb::from_rect(to_fixed(90.0), to_fixed(500.25), to_fixed(10.0), to_fixed(0.5));
        assert!(!world.index().query(&below).contains(&player));
    }

    #[test]
    fn test_index_tracks_movers() {
        let mut world = World::load(&LevelData::demo(), SimConfig::default(), 2).unwrap();
        for t in 0..120 {
            step(&mut world, script(t));
            let all: Vec<EntityId> = world.index().ids().collect();
            for entity in world.entities().iter() {
                assert!(world.index().contains(entity.id), "{} missing from the index", entity.id);
                assert!(all.contains(&entity.id));
                let expected = if entity.is_static { entity.body.bounds() } else { entity.broad_bounds() };
                assert_eq!(world.index().bounds_of(entity.id), Some(expected), "{} stale at tick {}", entity.id, t);
            }
            assert_eq!(all.len(), world.index().len());
        }
    }
}
