//! Game Events
//!
//! Events published during a tick and the bus that delivers them.
//!
//! ## Delivery model
//!
//! ```text
//!  phases 1-5        phase 6 (flush)                next tick
//!  ──────────        ───────────────                ─────────
//!  publish() ──▶ queue ──▶ handlers, in publish order
//!                              │
//!                              └─ Deferred::publish() ──▶ queued for tick+1
//! ```
//!
//! Producers never call consumers directly. Events are queued while the
//! simulation phases run and flushed once, after collision resolution.
//! Anything a handler publishes is held back and delivered in the next
//! tick's flush, so a handler can never alter the tick it is observing.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Serialize, Deserialize};
use tracing::warn;

use crate::core::vec2::FixedVec2;
use crate::game::actor::ActorState;
use crate::game::entity::{EntityId, Tags};
use crate::game::pool::PoolKind;

/// Event category used as the subscription key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum EventKind {
    /// Damage landed (or was blocked)
    Hit,
    /// Projectile struck static geometry
    Impact,
    /// An actor died
    Died,
    /// A tracked player gained a level
    LeveledUp,
    /// An actor's FSM changed state
    StateChanged,
    /// A new entity entered the world
    Spawned,
    /// A pool refused an acquisition
    PoolExhausted,
}

/// Event payload.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameEventData {
    /// Damage landed on `target`
    Hit {
        /// Entity credited with the hit (hitbox or projectile owner)
        attacker: EntityId,
        /// Entity that was hit
        target: EntityId,
        /// Damage applied (0 when blocked)
        damage: i32,
        /// Knockback impulse applied to the target
        knockback: FixedVec2,
        /// True if a shield absorbed the hit
        blocked: bool,
        /// True if the damage includes a critical multiplier
        critical: bool,
    },

    /// Projectile struck a platform
    Impact {
        /// Projectile entity
        projectile: EntityId,
        /// Platform it struck
        surface: EntityId,
        /// Contact point
        position: FixedVec2,
    },

    /// Actor reached zero health (or fell out of the level)
    Died {
        /// Entity that died
        entity: EntityId,
        /// Last attacker, if any
        killer: Option<EntityId>,
        /// Experience awarded to the killer
        xp_reward: u32,
    },

    /// Progression level gained
    LeveledUp {
        /// Player entity
        entity: EntityId,
        /// New level
        level: u32,
    },

    /// FSM transition
    StateChanged {
        /// Entity whose machine moved
        entity: EntityId,
        /// Previous state
        from: ActorState,
        /// New state
        to: ActorState,
    },

    /// Entity created
    Spawned {
        /// New entity
        entity: EntityId,
        /// Its tags
        tags: Tags,
    },

    /// Pool refused an acquisition; the spawn was skipped
    PoolExhausted {
        /// Pool that ran out
        pool: PoolKind,
    },
}

impl GameEventData {
    /// Subscription key for this payload.
    pub fn kind(&self) -> EventKind {
        match self {
            GameEventData::Hit { .. } => EventKind::Hit,
            GameEventData::Impact { .. } => EventKind::Impact,
            GameEventData::Died { .. } => EventKind::Died,
            GameEventData::LeveledUp { .. } => EventKind::LeveledUp,
            GameEventData::StateChanged { .. } => EventKind::StateChanged,
            GameEventData::Spawned { .. } => EventKind::Spawned,
            GameEventData::PoolExhausted { .. } => EventKind::PoolExhausted,
        }
    }

    /// Primary entity the event is about.
    pub fn subject(&self) -> Option<EntityId> {
        match self {
            GameEventData::Hit { target, .. } => Some(*target),
            GameEventData::Impact { projectile, .. } => Some(*projectile),
            GameEventData::Died { entity, .. }
            | GameEventData::LeveledUp { entity, .. }
            | GameEventData::StateChanged { entity, .. }
            | GameEventData::Spawned { entity, .. } => Some(*entity),
            GameEventData::PoolExhausted { .. } => None,
        }
    }
}

/// An immutable event stamped with its tick and publish order.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    /// Tick in which the event is delivered
    pub tick: u32,
    /// Publish order within the tick
    pub seq: u32,
    /// Payload
    pub data: GameEventData,
}

impl GameEvent {
    /// Subscription key.
    pub fn kind(&self) -> EventKind {
        self.data.kind()
    }
}

impl PartialOrd for GameEvent {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for GameEvent {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Delivery order: tick, then publish order
        self.tick.cmp(&other.tick).then(self.seq.cmp(&other.seq))
    }
}

// =============================================================================
// EVENT BUS
// =============================================================================

/// Sink handed to handlers. Events published here are delivered next tick.
#[derive(Debug, Default)]
pub struct Deferred {
    events: Vec<GameEventData>,
}

impl Deferred {
    /// Publish an event for delivery in the next tick.
    pub fn publish(&mut self, data: GameEventData) {
        self.events.push(data);
    }
}

/// Handler signature. Errors are logged and do not stop delivery.
pub type Handler = Box<dyn FnMut(&GameEvent, &mut Deferred) -> anyhow::Result<()>>;

/// Subscription token returned by [`EventBus::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u32);

/// Bus counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusStats {
    /// Events published by the simulation and by handlers
    pub published: u64,
    /// Handler invocations
    pub delivered: u64,
    /// Events published by handlers (held for the next tick)
    pub deferred: u64,
    /// Handler invocations that returned an error
    pub handler_failures: u64,
}

/// Publish/subscribe bus with end-of-tick delivery.
#[derive(Default)]
pub struct EventBus {
    tick: u32,
    next_seq: u32,
    next_subscription: u32,
    handlers: BTreeMap<EventKind, Vec<(SubscriptionId, Handler)>>,
    queue: Vec<GameEvent>,
    next_tick: Vec<GameEventData>,
    stats: BusStats,
}

impl EventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    ///
    /// Handlers of the same kind run in subscription order.
    pub fn subscribe<F>(&mut self, kind: EventKind, handler: F) -> SubscriptionId
    where
        F: FnMut(&GameEvent, &mut Deferred) -> anyhow::Result<()> + 'static,
    {
        let id = SubscriptionId(self.next_subscription);
        self.next_subscription += 1;
        self.handlers.entry(kind).or_default().push((id, Box::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not registered.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        for list in self.handlers.values_mut() {
            if let Some(pos) = list.iter().position(|(sid, _)| *sid == id) {
                drop(list.remove(pos));
                return true;
            }
        }
        false
    }

    /// Drop every handler (level teardown).
    pub fn clear_subscribers(&mut self) {
        self.handlers.clear();
    }

    /// Number of handlers registered for `kind`.
    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Start a new tick: stamp and queue events handlers deferred last flush.
    pub fn begin_tick(&mut self, tick: u32) {
        self.tick = tick;
        self.next_seq = 0;
        let carried = std::mem::take(&mut self.next_tick);
        for data in carried {
            self.enqueue(data);
        }
    }

    /// Queue an event for this tick's flush.
    pub fn publish(&mut self, data: GameEventData) {
        self.stats.published += 1;
        self.enqueue(data);
    }

    fn enqueue(&mut self, data: GameEventData) {
        let event = GameEvent {
            tick: self.tick,
            seq: self.next_seq,
            data,
        };
        self.next_seq += 1;
        self.queue.push(event);
    }

    /// Events waiting for the next flush.
    pub fn pending(&self) -> &[GameEvent] {
        &self.queue
    }

    /// Deliver every queued event, in publish order, to its handlers.
    ///
    /// Returns the delivered events. Events published by handlers are held
    /// until the next [`begin_tick`](Self::begin_tick).
    pub fn flush(&mut self) -> Vec<GameEvent> {
        let events = std::mem::take(&mut self.queue);
        let mut deferred = Deferred::default();

        for event in &events {
            let kind = event.kind();
            if let Some(list) = self.handlers.get_mut(&kind) {
                for (id, handler) in list.iter_mut() {
                    self.stats.delivered += 1;
                    if let Err(err) = handler(event, &mut deferred) {
                        self.stats.handler_failures += 1;
                        warn!(
                            tick = event.tick,
                            kind = ?kind,
                            subscription = id.0,
                            error = %err,
                            "event handler failed"
                        );
                    }
                }
            }
        }

        self.stats.published += deferred.events.len() as u64;
        self.stats.deferred += deferred.events.len() as u64;
        self.next_tick.extend(deferred.events);
        events
    }

    /// Discard queued and deferred events without delivering them.
    pub fn clear_pending(&mut self) {
        self.queue.clear();
        self.next_tick.clear();
    }

    /// Counters.
    pub fn stats(&self) -> BusStats {
        self.stats
    }
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventBus")
            .field("tick", &self.tick)
            .field("queued", &self.queue.len())
            .field("deferred", &self.next_tick.len())
            .field("subscriptions", &self.handlers.values().map(Vec::len).sum::<usize>())
            .finish()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    fn died(id: u32) -> GameEventData {
        GameEventData::Died { entity: EntityId(id), killer: None, xp_reward: 0 }
    }

    fn spawned(id: u32) -> GameEventData {
        GameEventData::Spawned { entity: EntityId(id), tags: Tags::ENEMY }
    }

    #[test]
    fn test_events_queue_until_flush() {
        let mut bus = EventBus::new();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let sink = seen.clone();
        bus.subscribe(EventKind::Died, move |e, _| {
            sink.borrow_mut().push(e.data.subject());
            Ok(())
        });

        bus.begin_tick(1);
        bus.publish(died(3));
        bus.publish(died(1));
        assert!(seen.borrow().is_empty(), "no delivery before flush");

        let delivered = bus.flush();
        assert_eq!(delivered.len(), 2);
        assert_eq!(*seen.borrow(), vec![Some(EntityId(3)), Some(EntityId(1))]);
        assert!(bus.pending().is_empty());
    }

    #[test]
    fn test_flush_preserves_publish_order_across_kinds() {
        let mut bus = EventBus::new();
        let order = Rc::new(RefCell::new(Vec::new()));
        for kind in [EventKind::Died, EventKind::Spawned] {
            let sink = order.clone();
            bus.subscribe(kind, move |e, _| {
                sink.borrow_mut().push(e.seq);
                Ok(())
            });
        }

        bus.begin_tick(7);
        bus.publish(spawned(1));
        bus.publish(died(2));
        bus.publish(spawned(3));
        let delivered = bus.flush();

        assert_eq!(*order.borrow(), vec![0, 1, 2]);
        assert!(delivered.windows(2).all(|w| w[0] < w[1]));
        assert!(delivered.iter().all(|e| e.tick == 7));
    }

    #[test]
    fn test_handler_publish_is_deferred_to_next_tick() {
        let mut bus = EventBus::new();
        bus.subscribe(EventKind::Died, |e, deferred| {
            if let Some(entity) = e.data.subject() {
                deferred.publish(GameEventData::LeveledUp { entity, level: 2 });
            }
            Ok(())
        });
        let levels = Rc::new(RefCell::new(Vec::new()));
        let sink = levels.clone();
        bus.subscribe(EventKind::LeveledUp, move |e, _| {
            sink.borrow_mut().push(e.tick);
            Ok(())
        });

        bus.begin_tick(10);
        bus.publish(died(4));
        let first = bus.flush();
        assert_eq!(first.len(), 1);
        assert!(levels.borrow().is_empty(), "deferred event must not arrive in the same flush");

        bus.begin_tick(11);
        let second = bus.flush();
        assert_eq!(second.len(), 1);
        assert_eq!(second[0].kind(), EventKind::LeveledUp);
        assert_eq!(*levels.borrow(), vec![11]);
        assert_eq!(bus.stats().deferred, 1);
    }

    #[test]
    fn test_failing_handler_does_not_stop_delivery() {
        let mut bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));
        bus.subscribe(EventKind::Died, |_, _| anyhow::bail!("boom"));
        let sink = count.clone();
        bus.subscribe(EventKind::Died, move |_, _| {
            *sink.borrow_mut() += 1;
            Ok(())
        });

        bus.begin_tick(1);
        bus.publish(died(1));
        bus.publish(died(2));
        bus.flush();

        assert_eq!(*count.borrow(), 2);
        assert_eq!(bus.stats().handler_failures, 2);
    }

    #[test]
    fn test_unsubscribe() {
        let mut bus = EventBus::new();
        let count = Rc::new(RefCell::new(0));
        let sink = count.clone();
        let id = bus.subscribe(EventKind::Died, move |_, _| {
            *sink.borrow_mut() += 1;
            Ok(())
        });
        assert_eq!(bus.subscriber_count(EventKind::Died), 1);

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.subscriber_count(EventKind::Died), 0);

        bus.begin_tick(1);
        bus.publish(died(1));
        bus.flush();
        assert_eq!(*count.borrow(), 0);
    }

    #[test]
    fn test_unsubscribe_releases_handler() {
        let mut bus = EventBus::new();
        let shared = Rc::new(RefCell::new(0));
        let sink = shared.clone();
        let keep = bus.subscribe(EventKind::Died, |_, _| Ok(()));
        let id = bus.subscribe(EventKind::Died, move |_, _| {
            *sink.borrow_mut() += 1;
            Ok(())
        });
        assert_eq!(Rc::strong_count(&shared), 2);

        assert!(bus.unsubscribe(id));
        assert_eq!(Rc::strong_count(&shared), 1, "removed handler must be dropped");
        assert_eq!(bus.subscriber_count(EventKind::Died), 1);
        assert!(bus.unsubscribe(keep));
    }

    #[test]
    fn test_event_ordering() {
        let a = GameEvent { tick: 3, seq: 5, data: died(1) };
        let b = GameEvent { tick: 3, seq: 6, data: died(0) };
        let c = GameEvent { tick: 4, seq: 0, data: died(0) };
        assert!(a < b);
        assert!(b < c);
    }
}
