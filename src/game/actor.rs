//! Actor Behavior
//!
//! Concrete states, triggers and guards for players and enemies, the
//! default transition tables, entry/exit side effects, and the AI
//! strategies that pick enemy triggers each tick.
//!
//! ## Player table (default)
//!
//! ```text
//!   Idle ◀──Stop── Move        Jump ──Land──▶ Idle
//!    │  ──Move──▶              ▲ [Grounded]
//!    ├──Attack [AttackReady]──▶ Windup ─4─▶ Attack ─8─▶ Recovery ─10─▶ Idle
//!    ├──Dash [DashReady]──────▶ Dash ─12─▶ Idle
//!    ├──Special [Grounded]────▶ Shield ─30─▶ Idle
//!    └──Hurt──▶ Hurt ─20─▶ Idle          (any) ──Die──▶ Dead
//! ```
//!
//! Numbers are timed-state durations in ticks. Enemies follow the same
//! shape with Patrol/Chase in place of Idle/Move and a Telegraph phase
//! before each attack.

use std::sync::Arc;

use serde::{Serialize, Deserialize};
use tracing::trace;

use crate::core::fixed::{Fixed, FIXED_HALF, FIXED_ONE, fixed_abs, fixed_clamp};
use crate::core::rng::DeterministicRng;
use crate::core::vec2::FixedVec2;
use crate::game::entity::{Body, Combat, Entity, EntityId, EntityKind};
use crate::game::events::{EventBus, GameEventData};
use crate::game::fsm::{ActionCx, Fired, MachineHost, StateMachine, TransitionTable, Trigger};

// =============================================================================
// STATES, TRIGGERS, GUARDS
// =============================================================================

/// Every state an actor machine can be in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ActorState {
    /// Standing still
    Idle,
    /// Running
    Move,
    /// Airborne after a jump
    Jump,
    /// Dashing
    Dash,
    /// Attack wind-up, hitbox inactive
    Windup,
    /// Attack active frames, hitbox live
    Attack,
    /// Attack recovery, hitbox inactive
    Recovery,
    /// Hit stun
    Hurt,
    /// Dead
    Dead,
    /// Enemy walking its patrol route
    Patrol,
    /// Enemy pursuing the player
    Chase,
    /// Enemy signalling an attack
    Telegraph,
    /// Enemy shield raised
    Shield,
    /// Heavy attack wind-up
    HeavyWindup,
    /// Heavy attack active frames, hitbox live
    HeavyAttack,
    /// Heavy attack recovery
    HeavyRecovery,
}

impl ActorState {
    /// True if an owned hitbox deals damage in this state.
    #[inline]
    pub fn is_attack_active(self) -> bool {
        matches!(self, ActorState::Attack | ActorState::HeavyAttack)
    }

    /// True if movement input steers the body.
    #[inline]
    pub fn accepts_control(self) -> bool {
        matches!(
            self,
            ActorState::Idle | ActorState::Move | ActorState::Jump | ActorState::Patrol | ActorState::Chase
        )
    }
}

/// Triggers fed to actor machines.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorTrigger {
    /// Movement input started
    Move,
    /// Movement input released
    Stop,
    /// Jump pressed
    Jump,
    /// Touched ground while airborne
    Land,
    /// Attack pressed / AI decided to attack
    Attack,
    /// Heavy attack pressed
    Heavy,
    /// Dash pressed
    Dash,
    /// Special pressed
    Special,
    /// Took damage
    Hurt,
    /// Health reached zero
    Die,
    /// Timed state expired
    Timeout,
    /// AI spotted the player
    Spot,
    /// AI lost the player
    Lose,
    /// AI raises its shield
    Block,
}

impl Trigger for ActorTrigger {
    fn timeout() -> Self {
        ActorTrigger::Timeout
    }
}

/// Predicates a rule can require.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Guard {
    /// Attack cooldown has elapsed
    AttackReady,
    /// Dash cooldown has elapsed
    DashReady,
    /// Standing on a platform or just walked off one
    JumpReady,
    /// Standing on a platform
    Grounded,
    /// Not standing on a platform
    Airborne,
}

/// Enemy archetypes. Each selects a [`Strategy`] and a transition table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnemyKind {
    /// Walks up and swings
    Melee,
    /// Keeps distance and fires projectiles
    Ranged,
    /// Raises a shield, then bashes
    Guardian,
}

/// Transition table over actor states.
pub type ActorTable = TransitionTable<ActorState, ActorTrigger, Guard>;

/// Machine over actor states.
pub type ActorMachine = StateMachine<ActorState, ActorTrigger, Guard>;

// =============================================================================
// DEFAULT TABLES
// =============================================================================

/// Default player table.
pub fn player_table() -> ActorTable {
    use ActorState as S;
    use ActorTrigger as T;

    let mut table = ActorTable::new(S::Idle);
    table
        .allow(S::Idle, T::Move, S::Move)
        .allow(S::Move, T::Stop, S::Idle)
        .allow(S::Jump, T::Land, S::Idle)
        .allow(S::Windup, T::Timeout, S::Attack)
        .allow(S::Attack, T::Timeout, S::Recovery)
        .allow(S::Recovery, T::Timeout, S::Idle)
        .allow(S::HeavyWindup, T::Timeout, S::HeavyAttack)
        .allow(S::HeavyAttack, T::Timeout, S::HeavyRecovery)
        .allow(S::HeavyRecovery, T::Timeout, S::Idle)
        .allow(S::Dash, T::Timeout, S::Idle)
        .allow(S::Hurt, T::Timeout, S::Idle)
        .allow(S::Shield, T::Timeout, S::Idle)
        .allow(S::Shield, T::Die, S::Dead)
        .timed(S::Windup, 4)
        .timed(S::Attack, 8)
        .timed(S::Recovery, 10)
        .timed(S::HeavyWindup, 5)
        .timed(S::HeavyAttack, 8)
        .timed(S::HeavyRecovery, 8)
        .timed(S::Dash, 12)
        .timed(S::Hurt, 20)
        .timed(S::Shield, 30);

    for from in [S::Idle, S::Move] {
        table
            .allow_if(from, T::Jump, S::Jump, Guard::JumpReady)
            .allow_if(from, T::Special, S::Shield, Guard::Grounded);
    }
    for from in [S::Idle, S::Move, S::Jump] {
        table
            .allow_if(from, T::Attack, S::Windup, Guard::AttackReady)
            .allow_if(from, T::Heavy, S::HeavyWindup, Guard::AttackReady)
            .allow_if(from, T::Dash, S::Dash, Guard::DashReady);
    }
    let swinging = [S::Windup, S::Attack, S::Recovery, S::HeavyWindup, S::HeavyAttack, S::HeavyRecovery];
    for from in [S::Idle, S::Move, S::Jump, S::Dash].into_iter().chain(swinging) {
        table.allow(from, T::Hurt, S::Hurt);
    }
    for from in [S::Idle, S::Move, S::Jump, S::Dash, S::Hurt].into_iter().chain(swinging) {
        table.allow(from, T::Die, S::Dead);
    }
    table
}

/// Patrol/chase skeleton shared by every enemy kind.
fn enemy_base(telegraph: u32, active: u32, recovery: u32, stun: u32) -> ActorTable {
    use ActorState as S;
    use ActorTrigger as T;

    let mut table = ActorTable::new(S::Patrol);
    table
        .allow(S::Patrol, T::Spot, S::Chase)
        .allow(S::Chase, T::Lose, S::Patrol)
        .allow_if(S::Chase, T::Attack, S::Telegraph, Guard::AttackReady)
        .allow(S::Telegraph, T::Timeout, S::Attack)
        .allow(S::Attack, T::Timeout, S::Recovery)
        .allow(S::Recovery, T::Timeout, S::Chase)
        .allow(S::Hurt, T::Timeout, S::Chase)
        .timed(S::Telegraph, telegraph)
        .timed(S::Attack, active)
        .timed(S::Recovery, recovery)
        .timed(S::Hurt, stun);

    for from in [S::Patrol, S::Chase, S::Telegraph, S::Attack, S::Recovery] {
        table.allow(from, T::Hurt, S::Hurt);
    }
    for from in [S::Patrol, S::Chase, S::Telegraph, S::Attack, S::Recovery, S::Hurt] {
        table.allow(from, T::Die, S::Dead);
    }
    table
}

/// Default melee enemy table.
pub fn melee_table() -> ActorTable {
    enemy_base(18, 10, 20, 15)
}

/// Default ranged enemy table. Attack lasts just long enough to fire.
pub fn ranged_table() -> ActorTable {
    enemy_base(24, 4, 30, 15)
}

/// Default guardian table: shield up instead of taking hits, bash out of it.
pub fn guardian_table() -> ActorTable {
    use ActorState as S;
    use ActorTrigger as T;

    let mut table = enemy_base(8, 12, 18, 12);
    table
        .allow(S::Chase, T::Block, S::Shield)
        .allow(S::Shield, T::Timeout, S::Chase)
        .allow_if(S::Shield, T::Attack, S::Telegraph, Guard::AttackReady)
        .allow(S::Shield, T::Die, S::Dead)
        .timed(S::Shield, 40);
    table
}

/// Shared tables, one per actor kind.
#[derive(Clone, Debug)]
pub struct ActorTables {
    /// Player table
    pub player: Arc<ActorTable>,
    /// Melee enemy table
    pub melee: Arc<ActorTable>,
    /// Ranged enemy table
    pub ranged: Arc<ActorTable>,
    /// Guardian table
    pub guardian: Arc<ActorTable>,
}

impl ActorTables {
    /// Table for an enemy kind.
    pub fn for_enemy(&self, kind: EnemyKind) -> Arc<ActorTable> {
        match kind {
            EnemyKind::Melee => self.melee.clone(),
            EnemyKind::Ranged => self.ranged.clone(),
            EnemyKind::Guardian => self.guardian.clone(),
        }
    }
}

impl Default for ActorTables {
    fn default() -> Self {
        Self {
            player: Arc::new(player_table()),
            melee: Arc::new(melee_table()),
            ranged: Arc::new(ranged_table()),
            guardian: Arc::new(guardian_table()),
        }
    }
}

// =============================================================================
// ACTOR + HOST
// =============================================================================

/// Work an entry action asks the world to do after the current phase.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Intent {
    /// Spawn a projectile from the owner's pool
    FireProjectile {
        /// Shooter
        owner: EntityId,
    },
    /// Emit impact particles
    Sparks {
        /// Where
        at: FixedVec2,
        /// How many
        count: u8,
    },
}

/// The behavioral half of an actor entity.
#[derive(Clone, Debug)]
pub struct Actor {
    /// State machine instance
    pub machine: ActorMachine,
    /// AI strategy (enemies only)
    pub strategy: Option<Strategy>,
}

impl Actor {
    /// Actor driven by input.
    pub fn controlled(table: Arc<ActorTable>) -> Self {
        Self {
            machine: ActorMachine::new(table),
            strategy: None,
        }
    }

    /// Actor driven by a strategy.
    pub fn autonomous(table: Arc<ActorTable>, strategy: Strategy) -> Self {
        Self {
            machine: ActorMachine::new(table),
            strategy: Some(strategy),
        }
    }
}

/// Entity fields an actor's machine acts on.
pub struct ActorHost<'a> {
    id: EntityId,
    tick: u32,
    is_player: bool,
    body: &'a mut Body,
    combat: &'a mut Combat,
    despawn: &'a mut bool,
    bus: &'a mut EventBus,
    intents: &'a mut Vec<Intent>,
}

impl MachineHost<ActorState, ActorTrigger, Guard> for ActorHost<'_> {
    fn permits(&self, guard: &Guard) -> bool {
        match guard {
            Guard::AttackReady => self.tick >= self.combat.attack_ready_at,
            Guard::DashReady => self.tick >= self.combat.dash_ready_at,
            Guard::JumpReady => self.body.grounded || self.combat.in_coyote_window(self.tick),
            Guard::Grounded => self.body.grounded,
            Guard::Airborne => !self.body.grounded,
        }
    }

    fn on_exit(&mut self, state: ActorState, _cx: &mut ActionCx<'_, ActorTrigger>) {
        match state {
            ActorState::Shield => self.combat.blocking = false,
            ActorState::Dash => {
                let cap = self.body.max_speed;
                self.body.velocity.x = fixed_clamp(self.body.velocity.x, -cap, cap);
            }
            _ => {}
        }
    }

    fn on_enter(&mut self, state: ActorState, cx: &mut ActionCx<'_, ActorTrigger>) {
        let tick = cx.tick();
        match state {
            ActorState::Jump => {
                self.body.velocity.y = self.combat.jump_velocity;
                self.body.grounded = false;
                self.combat.coyote_until = 0;
                self.combat.jump_buffered_until = 0;
            }
            ActorState::Dash => {
                self.body.velocity = FixedVec2::new(self.combat.dash_speed * self.body.facing, 0);
                self.combat.dash_ready_at = tick + self.combat.dash_cooldown;
            }
            ActorState::Windup | ActorState::Telegraph => {
                self.combat.swing = self.combat.swing.wrapping_add(1);
                self.combat.attack_ready_at = tick + self.combat.attack_cooldown;
                self.combat.advance_combo(tick);
                self.body.move_axis = 0;
            }
            ActorState::HeavyWindup => {
                self.combat.swing = self.combat.swing.wrapping_add(1);
                self.combat.attack_ready_at = tick + self.combat.attack_cooldown * 3 / 2;
                self.combat.advance_combo(tick);
                self.body.move_axis = 0;
            }
            ActorState::Attack => {
                if self.combat.projectile_speed > 0 {
                    self.intents.push(Intent::FireProjectile { owner: self.id });
                }
            }
            ActorState::Hurt => {
                self.combat.invulnerable_until = tick + self.combat.invulnerability;
                self.body.move_axis = 0;
            }
            ActorState::Shield => {
                self.combat.blocking = true;
                self.body.move_axis = 0;
            }
            ActorState::Dead => {
                self.body.move_axis = 0;
                self.combat.blocking = false;
                self.bus.publish(GameEventData::Died {
                    entity: self.id,
                    killer: self.combat.last_attacker,
                    xp_reward: self.combat.xp_reward,
                });
                if !self.is_player {
                    *self.despawn = true;
                }
            }
            _ => {}
        }
    }

    fn on_transition(&mut self, from: ActorState, to: ActorState, tick: u32) {
        trace!(entity = self.id.0, ?from, ?to, tick, "state change");
        self.bus.publish(GameEventData::StateChanged {
            entity: self.id,
            from,
            to,
        });
    }
}

/// Run `f` with an entity's machine and a host over the rest of the entity.
///
/// Returns `None` for entities without an actor.
pub fn with_machine<R>(
    entity: &mut Entity,
    tick: u32,
    bus: &mut EventBus,
    intents: &mut Vec<Intent>,
    f: impl FnOnce(&mut ActorMachine, &mut ActorHost<'_>) -> R,
) -> Option<R> {
    let Entity { id, kind, body, combat, actor, despawn, .. } = entity;
    let actor = actor.as_mut()?;
    let mut host = ActorHost {
        id: *id,
        tick,
        is_player: matches!(kind, EntityKind::Player),
        body,
        combat,
        despawn,
        bus,
        intents,
    };
    Some(f(&mut actor.machine, &mut host))
}

/// Fire one trigger on an entity's machine.
pub fn fire(
    entity: &mut Entity,
    trigger: ActorTrigger,
    tick: u32,
    bus: &mut EventBus,
    intents: &mut Vec<Intent>,
) -> Fired<ActorState> {
    with_machine(entity, tick, bus, intents, |machine, host| machine.fire(trigger, tick, host))
        .unwrap_or(Fired::Ignored)
}

// =============================================================================
// STRATEGIES
// =============================================================================

/// Per-enemy AI parameters. Selected by [`EnemyKind`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Strategy {
    /// Archetype
    pub kind: EnemyKind,
    /// Patrol anchor
    pub home_x: Fixed,
    /// Patrol half-width around `home_x`
    pub patrol_range: Fixed,
    /// Horizontal distance at which the player is spotted
    pub sight_range: Fixed,
    /// Horizontal distance at which an attack starts
    pub attack_range: Fixed,
    /// Chance per decision to raise a shield (guardian only)
    pub block_chance: Fixed,
}

impl Strategy {
    /// Pick this tick's trigger and steer the body.
    ///
    /// `target` is the player's position when the player is in sight.
    pub fn decide(
        &self,
        state: ActorState,
        body: &mut Body,
        target: Option<FixedVec2>,
        rng: &mut DeterministicRng,
    ) -> Option<ActorTrigger> {
        match state {
            ActorState::Patrol => {
                if target.is_some() {
                    return Some(ActorTrigger::Spot);
                }
                self.patrol(body);
                None
            }
            ActorState::Chase => {
                let Some(target) = target else {
                    body.move_axis = 0;
                    return Some(ActorTrigger::Lose);
                };
                let dx = target.x - body.position.x;
                body.facing = if dx < 0 { -1 } else { 1 };

                if fixed_abs(dx) > self.attack_range {
                    body.move_axis = FIXED_ONE * body.facing;
                    return None;
                }
                body.move_axis = 0;
                if self.kind == EnemyKind::Guardian && rng.roll(self.block_chance) {
                    Some(ActorTrigger::Block)
                } else {
                    Some(ActorTrigger::Attack)
                }
            }
            ActorState::Shield => {
                let dx = target.map(|t| t.x - body.position.x)?;
                body.facing = if dx < 0 { -1 } else { 1 };
                (fixed_abs(dx) <= self.attack_range).then_some(ActorTrigger::Attack)
            }
            _ => None,
        }
    }

    /// Walk at half speed, turning around at the edges of the route.
    fn patrol(&self, body: &mut Body) {
        let offset = body.position.x - self.home_x;
        if offset > self.patrol_range {
            body.facing = -1;
        } else if offset < -self.patrol_range {
            body.facing = 1;
        }
        body.move_axis = FIXED_HALF * body.facing;
    }
}

// =============================================================================
// TESTS
// =============================================================================
