//! Finite State Machine Framework
//!
//! A generic, table-driven state machine shared by every entity kind.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  fire(trigger)                                              │
//! ├─────────────────────────────────────────────────────────────┤
//! │  1. look up (current, trigger) in the transition table      │
//! │     └─ no rule, or guard rejects  →  Fired::Ignored          │
//! │  2. host.on_exit(current)                                   │
//! │  3. current = rule.to, timer armed from the table           │
//! │  4. host.on_enter(new)                                      │
//! │  5. host.on_transition(old, new)                            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! Entry and exit actions run on a [`MachineHost`] that never sees the
//! machine itself, so an action cannot fire a nested transition. Actions
//! that need a follow-up transition queue it with [`ActionCx::defer`]; the
//! simulation loop drains deferred triggers at the start of the next tick.
//!
//! Timed states carry a duration in the table. Entering one records an
//! expiry tick, and [`StateMachine::fire_timeout`] fires the timeout trigger
//! once that tick is reached.

use std::collections::{BTreeMap, VecDeque};
use std::fmt::Debug;
use std::sync::Arc;

use serde::{Serialize, Deserialize};
use thiserror::Error;

/// Trigger enumerations provide the trigger fired when a timed state expires.
pub trait Trigger: Copy + Ord + Debug {
    /// Trigger fired automatically when a timed state reaches its expiry tick.
    fn timeout() -> Self;
}

/// Outcome of firing a trigger.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Fired<S> {
    /// A transition happened.
    Transitioned {
        /// State that was exited
        from: S,
        /// State that was entered
        to: S,
    },
    /// No rule matched, or its guard rejected the trigger. Nothing changed.
    Ignored,
}

impl<S> Fired<S> {
    /// True if the trigger was ignored.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Fired::Ignored)
    }
}

/// A single transition rule.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rule<S, G> {
    /// Destination state
    pub to: S,
    /// Optional predicate the host must accept
    pub guard: Option<G>,
}

/// Errors building a transition table from data.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TableError {
    /// Two rules share the same (state, trigger) key.
    #[error("duplicate transition from {from} on {trigger}")]
    Duplicate {
        /// Source state (debug form)
        from: String,
        /// Trigger (debug form)
        trigger: String,
    },
    /// A timed state was given a zero-tick duration.
    #[error("timed state {0} has zero duration")]
    ZeroDuration(String),
}

/// Immutable transition table keyed by (state, trigger).
///
/// Tables are data: built once per entity kind (usually from
/// configuration) and shared by every machine of that kind.
#[derive(Clone, Debug)]
pub struct TransitionTable<S, T, G> {
    initial: S,
    rules: BTreeMap<(S, T), Rule<S, G>>,
    timers: BTreeMap<S, u32>,
}

impl<S: Copy + Ord + Debug, T: Trigger, G: Clone> TransitionTable<S, T, G> {
    /// Create an empty table starting in `initial`.
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            rules: BTreeMap::new(),
            timers: BTreeMap::new(),
        }
    }

    /// Add an unguarded rule. A later rule for the same key replaces it.
    pub fn allow(&mut self, from: S, trigger: T, to: S) -> &mut Self {
        self.rules.insert((from, trigger), Rule { to, guard: None });
        self
    }

    /// Add a guarded rule.
    pub fn allow_if(&mut self, from: S, trigger: T, to: S, guard: G) -> &mut Self {
        self.rules.insert((from, trigger), Rule { to, guard: Some(guard) });
        self
    }

    /// Make `state` expire `ticks` ticks after it is entered.
    pub fn timed(&mut self, state: S, ticks: u32) -> &mut Self {
        self.timers.insert(state, ticks);
        self
    }

    /// Initial state for new machines.
    pub fn initial(&self) -> S {
        self.initial
    }

    /// Rule for (state, trigger), if any.
    pub fn rule(&self, state: S, trigger: T) -> Option<&Rule<S, G>> {
        self.rules.get(&(state, trigger))
    }

    /// Duration of a timed state.
    pub fn duration(&self, state: S) -> Option<u32> {
        self.timers.get(&state).copied()
    }

    /// Number of rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// True if the table has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

// =============================================================================
// TABLE DATA (serde form)
// =============================================================================

/// One rule in serialized form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: Deserialize<'de>, T: Deserialize<'de>, G: Deserialize<'de>"))]
pub struct RuleSpec<S, T, G> {
    /// Source state
    pub from: S,
    /// Trigger
    pub on: T,
    /// Destination state
    pub to: S,
    /// Optional guard
    #[serde(default)]
    pub guard: Option<G>,
}

/// One timed state in serialized form.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimerSpec<S> {
    /// Timed state
    pub state: S,
    /// Ticks until the timeout trigger fires
    pub ticks: u32,
}

/// Serialized transition table, as found in configuration files.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound(deserialize = "S: Deserialize<'de>, T: Deserialize<'de>, G: Deserialize<'de>"))]
pub struct TableSpec<S, T, G> {
    /// Initial state
    pub initial: S,
    /// Transition rules
    pub transitions: Vec<RuleSpec<S, T, G>>,
    /// Timed states
    #[serde(default)]
    pub timers: Vec<TimerSpec<S>>,
}

impl<S: Copy + Ord + Debug, T: Trigger, G: Clone> TableSpec<S, T, G> {
    /// Validate and build the lookup table.
    pub fn build(&self) -> Result<TransitionTable<S, T, G>, TableError> {
        let mut table = TransitionTable::new(self.initial);
        for spec in &self.transitions {
            if table.rule(spec.from, spec.on).is_some() {
                return Err(TableError::Duplicate {
                    from: format!("{:?}", spec.from),
                    trigger: format!("{:?}", spec.on),
                });
            }
            match &spec.guard {
                Some(guard) => table.allow_if(spec.from, spec.on, spec.to, guard.clone()),
                None => table.allow(spec.from, spec.on, spec.to),
            };
        }
        for timer in &self.timers {
            if timer.ticks == 0 {
                return Err(TableError::ZeroDuration(format!("{:?}", timer.state)));
            }
            table.timed(timer.state, timer.ticks);
        }
        Ok(table)
    }
}

impl<S: Copy + Ord + Debug, T: Trigger, G: Clone> From<&TransitionTable<S, T, G>> for TableSpec<S, T, G> {
    fn from(table: &TransitionTable<S, T, G>) -> Self {
        Self {
            initial: table.initial,
            transitions: table
                .rules
                .iter()
                .map(|(&(from, on), rule)| RuleSpec {
                    from,
                    on,
                    to: rule.to,
                    guard: rule.guard.clone(),
                })
                .collect(),
            timers: table
                .timers
                .iter()
                .map(|(&state, &ticks)| TimerSpec { state, ticks })
                .collect(),
        }
    }
}

// =============================================================================
// HOST + ACTION CONTEXT
// =============================================================================

/// Context handed to entry and exit actions.
pub struct ActionCx<'a, T> {
    tick: u32,
    timer: Option<u32>,
    deferred: &'a mut VecDeque<T>,
}

impl<T> ActionCx<'_, T> {
    /// Tick in which the transition happens.
    pub fn tick(&self) -> u32 {
        self.tick
    }

    /// Queue a trigger for after the current transition completes.
    pub fn defer(&mut self, trigger: T) {
        self.deferred.push_back(trigger);
    }

    /// Override the expiry of the state being entered.
    pub fn expire_in(&mut self, ticks: u32) {
        self.timer = Some(self.tick.saturating_add(ticks.max(1)));
    }
}

/// The entity side of a machine: guards plus entry/exit side effects.
pub trait MachineHost<S, T, G> {
    /// Evaluate a guard. Rules without a guard skip this.
    fn permits(&self, _guard: &G) -> bool {
        true
    }

    /// Runs before leaving `state`.
    fn on_exit(&mut self, _state: S, _cx: &mut ActionCx<'_, T>) {}

    /// Runs after entering `state`.
    fn on_enter(&mut self, _state: S, _cx: &mut ActionCx<'_, T>) {}

    /// Runs once the transition is complete.
    fn on_transition(&mut self, _from: S, _to: S, _tick: u32) {}
}

/// Host with no side effects and permissive guards.
pub struct NoopHost;

impl<S, T, G> MachineHost<S, T, G> for NoopHost {}

// =============================================================================
// STATE MACHINE
// =============================================================================

/// A state machine instance owned by one entity.
#[derive(Clone, Debug)]
pub struct StateMachine<S, T, G> {
    table: Arc<TransitionTable<S, T, G>>,
    current: S,
    entered_at: u32,
    expires_at: Option<u32>,
    deferred: VecDeque<T>,
    transitions: u64,
}

impl<S: Copy + Ord + Debug, T: Trigger, G: Clone> StateMachine<S, T, G> {
    /// Create a machine in the table's initial state.
    pub fn new(table: Arc<TransitionTable<S, T, G>>) -> Self {
        let current = table.initial();
        Self {
            table,
            current,
            entered_at: 0,
            expires_at: None,
            deferred: VecDeque::new(),
            transitions: 0,
        }
    }

    /// Current state.
    #[inline]
    pub fn current(&self) -> S {
        self.current
    }

    /// True if the machine is in `state`.
    #[inline]
    pub fn is_in(&self, state: S) -> bool {
        self.current == state
    }

    /// Tick in which the current state was entered.
    pub fn entered_at(&self) -> u32 {
        self.entered_at
    }

    /// Expiry tick of the current timed state.
    pub fn expires_at(&self) -> Option<u32> {
        self.expires_at
    }

    /// Number of transitions taken so far.
    pub fn transition_count(&self) -> u64 {
        self.transitions
    }

    /// Shared transition table.
    pub fn table(&self) -> &TransitionTable<S, T, G> {
        &self.table
    }

    /// Fire a trigger.
    ///
    /// Unmatched triggers and rejected guards return [`Fired::Ignored`] and
    /// leave the machine and the host untouched.
    pub fn fire<H>(&mut self, trigger: T, tick: u32, host: &mut H) -> Fired<S>
    where
        H: MachineHost<S, T, G>,
    {
        let Some(rule) = self.table.rule(self.current, trigger).cloned() else {
            return Fired::Ignored;
        };
        if let Some(guard) = &rule.guard {
            if !host.permits(guard) {
                return Fired::Ignored;
            }
        }

        let from = self.current;
        let to = rule.to;

        let mut cx = ActionCx {
            tick,
            timer: None,
            deferred: &mut self.deferred,
        };
        host.on_exit(from, &mut cx);

        cx.timer = self.table.duration(to).map(|d| tick.saturating_add(d));
        host.on_enter(to, &mut cx);
        let timer = cx.timer;

        self.current = to;
        self.entered_at = tick;
        self.expires_at = timer;
        self.transitions += 1;

        host.on_transition(from, to, tick);
        Fired::Transitioned { from, to }
    }

    /// True if the current timed state has reached its expiry tick.
    pub fn is_expired(&self, tick: u32) -> bool {
        self.expires_at.is_some_and(|at| tick >= at)
    }

    /// Fire the timeout trigger if the current state has expired.
    ///
    /// A state without a timeout rule consumes its expiry so it does not
    /// retry every tick. A guarded timeout rule that is rejected keeps the
    /// expiry armed and is retried on the next call.
    pub fn fire_timeout<H>(&mut self, tick: u32, host: &mut H) -> Fired<S>
    where
        H: MachineHost<S, T, G>,
    {
        if !self.is_expired(tick) {
            return Fired::Ignored;
        }
        if self.table.rule(self.current, T::timeout()).is_none() {
            self.expires_at = None;
            return Fired::Ignored;
        }
        self.fire(T::timeout(), tick, host)
    }

    /// Queue a trigger for the next drain.
    pub fn defer(&mut self, trigger: T) {
        self.deferred.push_back(trigger);
    }

    /// True if deferred triggers are waiting.
    pub fn has_deferred(&self) -> bool {
        !self.deferred.is_empty()
    }

    /// Take every trigger deferred so far.
    ///
    /// Triggers deferred while the returned batch is fired land in the
    /// next batch.
    pub fn take_deferred(&mut self) -> Vec<T> {
        self.deferred.drain(..).collect()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    enum Door {
        Closed,
        Open,
        Locked,
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
    enum Push {
        Open,
        Close,
        Lock,
        Timeout,
    }

    impl Trigger for Push {
        fn timeout() -> Self {
            Push::Timeout
        }
    }

    #[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
    enum HasKey {
        Yes,
    }

    #[derive(Default)]
    struct Recorder {
        has_key: bool,
        log: Vec<String>,
        chain: Option<Push>,
    }

    impl MachineHost<Door, Push, HasKey> for Recorder {
        fn permits(&self, _guard: &HasKey) -> bool {
            self.has_key
        }

        fn on_exit(&mut self, state: Door, _cx: &mut ActionCx<'_, Push>) {
            self.log.push(format!("exit {:?}", state));
        }

        fn on_enter(&mut self, state: Door, cx: &mut ActionCx<'_, Push>) {
            self.log.push(format!("enter {:?}", state));
            if let Some(next) = self.chain.take() {
                cx.defer(next);
            }
        }

        fn on_transition(&mut self, from: Door, to: Door, tick: u32) {
            self.log.push(format!("{:?}->{:?}@{}", from, to, tick));
        }
    }

    fn door_table() -> Arc<TransitionTable<Door, Push, HasKey>> {
        let mut table = TransitionTable::new(Door::Closed);
        table
            .allow(Door::Closed, Push::Open, Door::Open)
            .allow(Door::Open, Push::Close, Door::Closed)
            .allow(Door::Open, Push::Timeout, Door::Closed)
            .allow_if(Door::Closed, Push::Lock, Door::Locked, HasKey::Yes)
            .timed(Door::Open, 30);
        Arc::new(table)
    }

    #[test]
    fn test_fire_runs_actions_in_order() {
        let mut machine = StateMachine::new(door_table());
        let mut host = Recorder::default();

        let fired = machine.fire(Push::Open, 5, &mut host);
        assert_eq!(fired, Fired::Transitioned { from: Door::Closed, to: Door::Open });
        assert_eq!(machine.current(), Door::Open);
        assert_eq!(machine.entered_at(), 5);
        assert_eq!(host.log, vec!["exit Closed", "enter Open", "Closed->Open@5"]);
    }

    #[test]
    fn test_unmatched_trigger_is_ignored() {
        let mut machine = StateMachine::new(door_table());
        let mut host = Recorder::default();

        assert!(machine.fire(Push::Close, 1, &mut host).is_ignored());
        assert_eq!(machine.current(), Door::Closed);
        assert_eq!(machine.transition_count(), 0);
        assert!(host.log.is_empty(), "ignored trigger must not run actions");
    }

    #[test]
    fn test_guard_rejection_is_ignored() {
        let mut machine = StateMachine::new(door_table());
        let mut host = Recorder::default();

        assert!(machine.fire(Push::Lock, 1, &mut host).is_ignored());
        assert_eq!(machine.current(), Door::Closed);

        host.has_key = true;
        assert!(!machine.fire(Push::Lock, 2, &mut host).is_ignored());
        assert_eq!(machine.current(), Door::Locked);
    }

    #[test]
    fn test_timed_state_expires() {
        let mut machine = StateMachine::new(door_table());
        let mut host = NoopHost;

        machine.fire(Push::Open, 10, &mut host);
        assert_eq!(machine.expires_at(), Some(40));
        assert!(machine.fire_timeout(39, &mut host).is_ignored());
        assert_eq!(machine.current(), Door::Open);

        let fired = machine.fire_timeout(40, &mut host);
        assert_eq!(fired, Fired::Transitioned { from: Door::Open, to: Door::Closed });
        assert_eq!(machine.expires_at(), None);
    }

    #[test]
    fn test_guarded_timeout_retries_until_permitted() {
        let mut table = TransitionTable::new(Door::Closed);
        table
            .allow(Door::Closed, Push::Open, Door::Open)
            .allow_if(Door::Open, Push::Timeout, Door::Locked, HasKey::Yes)
            .timed(Door::Open, 5);
        let mut machine = StateMachine::new(Arc::new(table));
        let mut host = Recorder::default();

        machine.fire(Push::Open, 0, &mut host);
        assert!(machine.fire_timeout(5, &mut host).is_ignored());
        assert_eq!(machine.current(), Door::Open);
        assert_eq!(machine.expires_at(), Some(5), "rejected timeout stays armed");

        host.has_key = true;
        let fired = machine.fire_timeout(6, &mut host);
        assert_eq!(fired, Fired::Transitioned { from: Door::Open, to: Door::Locked });
        assert_eq!(machine.expires_at(), None);
    }

    #[test]
    fn test_timed_state_without_timeout_rule_consumes_expiry() {
        let mut table: TransitionTable<Door, Push, HasKey> = TransitionTable::new(Door::Closed);
        table.allow(Door::Closed, Push::Lock, Door::Locked).timed(Door::Locked, 2);
        let mut machine = StateMachine::new(Arc::new(table));
        let mut host = NoopHost;

        machine.fire(Push::Lock, 0, &mut host);
        assert!(machine.fire_timeout(2, &mut host).is_ignored());
        assert_eq!(machine.expires_at(), None);
        assert_eq!(machine.current(), Door::Locked);
    }

    #[test]
    fn test_leaving_timed_state_clears_expiry() {
        let mut machine = StateMachine::new(door_table());
        let mut host = NoopHost;

        machine.fire(Push::Open, 0, &mut host);
        machine.fire(Push::Close, 3, &mut host);
        assert_eq!(machine.expires_at(), None);
        assert!(machine.fire_timeout(100, &mut host).is_ignored());
    }

    #[test]
    fn test_deferred_trigger_waits_for_drain() {
        let mut machine = StateMachine::new(door_table());
        let mut host = Recorder { chain: Some(Push::Close), ..Default::default() };

        machine.fire(Push::Open, 1, &mut host);
        // The deferred Close has not run yet
        assert_eq!(machine.current(), Door::Open);
        assert!(machine.has_deferred());

        let batch = machine.take_deferred();
        assert_eq!(batch, vec![Push::Close]);
        for trigger in batch {
            machine.fire(trigger, 2, &mut host);
        }
        assert_eq!(machine.current(), Door::Closed);
        assert!(!machine.has_deferred());
    }

    #[test]
    fn test_table_spec_roundtrip_and_duplicates() {
        let table = door_table();
        let spec = TableSpec::from(table.as_ref());
        let json = serde_json::to_string(&spec).unwrap();
        let parsed: TableSpec<Door, Push, HasKey> = serde_json::from_str(&json).unwrap();
        let rebuilt = parsed.build().unwrap();
        assert_eq!(rebuilt.len(), table.len());
        assert_eq!(rebuilt.duration(Door::Open), Some(30));

        let mut dup = parsed.clone();
        dup.transitions.push(RuleSpec { from: Door::Closed, on: Push::Open, to: Door::Locked, guard: None });
        assert!(matches!(dup.build(), Err(TableError::Duplicate { .. })));

        let mut zero = parsed;
        zero.timers.push(TimerSpec { state: Door::Locked, ticks: 0 });
        assert!(matches!(zero.build(), Err(TableError::ZeroDuration(_))));
    }
}
