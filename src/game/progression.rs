//! Progression
//!
//! Experience and leveling for the player, driven entirely by bus events.
//! The tracker only observes `Died` and `Hit`; level-ups go out through the
//! deferred sink, so they are delivered in the next tick and never reach
//! back into the collision or FSM work of the tick being flushed.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{anyhow, Context};
use serde::{Serialize, Deserialize};

use crate::game::entity::EntityId;
use crate::game::events::{EventBus, EventKind, GameEventData, SubscriptionId};

/// Attribute points granted per level.
pub const ATTRIBUTE_POINTS_PER_LEVEL: u32 = 5;

/// Skill points granted per level.
pub const SKILL_POINTS_PER_LEVEL: u32 = 1;

/// Experience needed to advance into `level`: `floor(100 * level^1.5)`.
///
/// Evaluated as `isqrt(10_000 * level^3)`, which is exact in integers.
pub fn xp_for_level(level: u32) -> u32 {
    let n = level as u64;
    let value = isqrt(10_000u64.saturating_mul(n.saturating_mul(n).saturating_mul(n)));
    value.min(u32::MAX as u64) as u32
}

/// Floor square root.
fn isqrt(value: u64) -> u64 {
    if value < 2 {
        return value;
    }
    let mut x = value;
    let mut y = x / 2 + x % 2;
    while y < x {
        x = y;
        y = (x + value / x) / 2;
    }
    x
}

/// Player progression record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    /// Current level, starting at 1
    pub level: u32,
    /// Experience toward the next level
    pub xp: u32,
    /// Experience the next level costs
    pub xp_to_next: u32,
    /// Experience earned in total
    pub total_xp: u64,
    /// Enemies killed
    pub kills: u32,
    /// Damage dealt to enemies
    pub damage_dealt: u64,
    /// Damage received
    pub damage_taken: u64,
    /// Hits absorbed by a shield
    pub hits_blocked: u32,
    /// Unspent attribute points
    pub attribute_points: u32,
    /// Unspent skill points
    pub skill_points: u32,
}

impl Default for Progress {
    fn default() -> Self {
        Self::new()
    }
}

impl Progress {
    /// Level 1 with no experience.
    pub fn new() -> Self {
        Self {
            level: 1,
            xp: 0,
            xp_to_next: xp_for_level(2),
            total_xp: 0,
            kills: 0,
            damage_dealt: 0,
            damage_taken: 0,
            hits_blocked: 0,
            attribute_points: 0,
            skill_points: 0,
        }
    }

    /// Add experience. Returns every level reached, in order.
    pub fn add_xp(&mut self, amount: u32) -> Vec<u32> {
        self.total_xp += amount as u64;
        self.xp = self.xp.saturating_add(amount);

        let mut reached = Vec::new();
        while self.xp >= self.xp_to_next {
            self.xp -= self.xp_to_next;
            self.level += 1;
            self.xp_to_next = xp_for_level(self.level + 1);
            self.attribute_points += ATTRIBUTE_POINTS_PER_LEVEL;
            self.skill_points += SKILL_POINTS_PER_LEVEL;
            reached.push(self.level);
        }
        reached
    }
}

/// Bus subscriber keeping one player's [`Progress`].
pub struct ProgressionTracker {
    player: EntityId,
    progress: Rc<RefCell<Progress>>,
    subscriptions: Vec<SubscriptionId>,
}

impl ProgressionTracker {
    /// Subscribe to `Died` and `Hit` on `bus` on behalf of `player`.
    pub fn attach(bus: &mut EventBus, player: EntityId) -> Self {
        let progress = Rc::new(RefCell::new(Progress::new()));

        let on_died = {
            let progress = Rc::clone(&progress);
            bus.subscribe(EventKind::Died, move |event, out| {
                let GameEventData::Died { entity, killer, xp_reward } = event.data else {
                    return Ok(());
                };
                if killer != Some(player) || entity == player {
                    return Ok(());
                }
                let mut progress = progress
                    .try_borrow_mut()
                    .map_err(|_| anyhow!("progress for {} is borrowed", player))?;
                progress.kills += 1;
                for level in progress.add_xp(xp_reward) {
                    out.publish(GameEventData::LeveledUp { entity: player, level });
                }
                Ok(())
            })
        };

        let on_hit = {
            let progress = Rc::clone(&progress);
            bus.subscribe(EventKind::Hit, move |event, _| {
                let GameEventData::Hit { attacker, target, damage, blocked, .. } = event.data else {
                    return Ok(());
                };
                if attacker != player && target != player {
                    return Ok(());
                }
                let damage = u64::try_from(damage).context("negative damage in hit event")?;
                let mut progress = progress
                    .try_borrow_mut()
                    .map_err(|_| anyhow!("progress for {} is borrowed", player))?;
                if attacker == player {
                    progress.damage_dealt += damage;
                }
                if target == player {
                    progress.damage_taken += damage;
                    if blocked {
                        progress.hits_blocked += 1;
                    }
                }
                Ok(())
            })
        };

        Self {
            player,
            progress,
            subscriptions: vec![on_died, on_hit],
        }
    }

    /// Tracked player.
    pub fn player(&self) -> EntityId {
        self.player
    }

    /// Snapshot of the current record.
    pub fn progress(&self) -> Progress {
        self.progress.borrow().clone()
    }

    /// Remove the subscriptions.
    pub fn detach(self, bus: &mut EventBus) {
        for id in self.subscriptions {
            bus.unsubscribe(id);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
