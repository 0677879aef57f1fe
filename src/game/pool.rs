//! Object Pools
//!
//! Fixed-capacity slot pools for short-lived objects (particles,
//! projectiles). Slots are allocated once at level load and recycled;
//! nothing is allocated per spawn.
//!
//! Every slot carries a generation counter. A [`PoolHandle`] records the
//! generation it was issued with, so a handle kept past its release is
//! detected as stale and ignored instead of touching the slot's new owner.

use serde::{Serialize, Deserialize};
use thiserror::Error;

use crate::core::vec2::FixedVec2;
use crate::game::entity::EntityId;

/// Which pool a handle belongs to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PoolKind {
    /// Cosmetic impact particles
    Particle,
    /// Projectiles fired by ranged attackers
    Projectile,
}

/// Generation-checked reference to a pooled slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PoolHandle {
    index: u32,
    generation: u32,
}

impl PoolHandle {
    /// Slot index.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation the handle was issued with.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

/// Returned by `acquire` when every slot is in use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{kind:?} pool exhausted ({capacity} slots in use)")]
pub struct PoolExhausted {
    /// Pool that ran out
    pub kind: PoolKind,
    /// Its fixed capacity
    pub capacity: usize,
}

/// Pool counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolStats {
    /// Fixed number of slots
    pub capacity: usize,
    /// Slots currently in use
    pub active: usize,
    /// Successful acquisitions since creation
    pub acquired: u64,
    /// Acquisitions refused because the pool was full
    pub exhausted: u64,
    /// Releases ignored because the handle was stale
    pub stale_releases: u64,
}

#[derive(Clone, Debug)]
struct Slot<T> {
    value: T,
    active: bool,
    generation: u32,
}

/// Fixed-capacity pool of reusable `T` slots.
#[derive(Clone, Debug)]
pub struct Pool<T> {
    kind: PoolKind,
    slots: Vec<Slot<T>>,
    /// Free slot indices; popped from the back.
    free: Vec<u32>,
    stats: PoolStats,
}

impl<T: Default> Pool<T> {
    /// Create a pool with `capacity` preallocated slots.
    pub fn new(kind: PoolKind, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Slot {
                value: T::default(),
                active: false,
                generation: 0,
            })
            .collect();
        // Reversed so the lowest index is handed out first
        let free = (0..capacity as u32).rev().collect();
        Self {
            kind,
            slots,
            free,
            stats: PoolStats {
                capacity,
                ..PoolStats::default()
            },
        }
    }

    /// Acquire a slot reset to `T::default()`.
    pub fn acquire(&mut self) -> Result<PoolHandle, PoolExhausted> {
        self.acquire_with(|_| {})
    }

    /// Acquire a slot and initialize it in place.
    pub fn acquire_with(&mut self, init: impl FnOnce(&mut T)) -> Result<PoolHandle, PoolExhausted> {
        let Some(index) = self.free.pop() else {
            self.stats.exhausted += 1;
            return Err(PoolExhausted {
                kind: self.kind,
                capacity: self.slots.len(),
            });
        };

        let slot = &mut self.slots[index as usize];
        slot.generation = slot.generation.wrapping_add(1);
        slot.active = true;
        slot.value = T::default();
        init(&mut slot.value);

        self.stats.active += 1;
        self.stats.acquired += 1;
        Ok(PoolHandle {
            index,
            generation: slot.generation,
        })
    }
}

impl<T> Pool<T> {
    /// Pool kind.
    pub fn kind(&self) -> PoolKind {
        self.kind
    }

    /// Release a slot back to the pool.
    ///
    /// Returns `false` and changes nothing if the handle is stale or was
    /// already released.
    pub fn release(&mut self, handle: PoolHandle) -> bool {
        if !self.is_live(handle) {
            self.stats.stale_releases += 1;
            return false;
        }
        let slot = &mut self.slots[handle.index as usize];
        slot.active = false;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index);
        self.stats.active -= 1;
        true
    }

    /// True if the handle refers to an active slot of the same generation.
    pub fn is_live(&self, handle: PoolHandle) -> bool {
        self.slots
            .get(handle.index as usize)
            .is_some_and(|slot| slot.active && slot.generation == handle.generation)
    }

    /// Borrow a live slot.
    pub fn get(&self, handle: PoolHandle) -> Option<&T> {
        if self.is_live(handle) {
            self.slots.get(handle.index as usize).map(|slot| &slot.value)
        } else {
            None
        }
    }

    /// Mutably borrow a live slot.
    pub fn get_mut(&mut self, handle: PoolHandle) -> Option<&mut T> {
        if self.is_live(handle) {
            self.slots.get_mut(handle.index as usize).map(|slot| &mut slot.value)
        } else {
            None
        }
    }

    /// Iterate active slots in index order.
    pub fn iter_active(&self) -> impl Iterator<Item = (PoolHandle, &T)> {
        self.slots.iter().enumerate().filter(|(_, s)| s.active).map(|(i, s)| {
            (
                PoolHandle {
                    index: i as u32,
                    generation: s.generation,
                },
                &s.value,
            )
        })
    }

    /// Mutably iterate active slots in index order.
    pub fn iter_active_mut(&mut self) -> impl Iterator<Item = (PoolHandle, &mut T)> {
        self.slots.iter_mut().enumerate().filter(|(_, s)| s.active).map(|(i, s)| {
            (
                PoolHandle {
                    index: i as u32,
                    generation: s.generation,
                },
                &mut s.value,
            )
        })
    }

    /// Release every active slot. Returns how many were released.
    pub fn release_all(&mut self) -> usize {
        let handles: Vec<PoolHandle> = self.iter_active().map(|(h, _)| h).collect();
        handles.into_iter().filter(|h| self.release(*h)).count()
    }

    /// Number of slots in use.
    pub fn active_count(&self) -> usize {
        self.stats.active
    }

    /// Fixed number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// True if no slot is free.
    pub fn is_exhausted(&self) -> bool {
        self.free.is_empty()
    }

    /// Counters.
    pub fn stats(&self) -> PoolStats {
        self.stats
    }
}

// =============================================================================
// POOLED PAYLOADS
// =============================================================================

/// A cosmetic particle. Not an entity: it never collides.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Particle {
    /// Current position
    pub position: FixedVec2,
    /// Velocity per tick
    pub velocity: FixedVec2,
    /// Ticks left to live
    pub ttl: u32,
}

/// Bookkeeping for a live projectile entity.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ProjectileSlot {
    /// Entity carrying the projectile's body
    pub entity: EntityId,
    /// Ticks left before it expires
    pub ttl: u32,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_capacity_ten_exhausts_on_eleventh() {
        let mut pool: Pool<Particle> = Pool::new(PoolKind::Particle, 10);
        let handles: Vec<_> = (0..10).map(|_| pool.acquire().unwrap()).collect();
        assert_eq!(pool.active_count(), 10);
        assert!(pool.is_exhausted());

        let err = pool.acquire().unwrap_err();
        assert_eq!(err, PoolExhausted { kind: PoolKind::Particle, capacity: 10 });
        assert_eq!(pool.active_count(), 10, "exhaustion must not change occupancy");
        assert_eq!(pool.stats().exhausted, 1);

        // All ten handles still valid
        assert!(handles.iter().all(|h| pool.is_live(*h)));
    }

    #[test]
    fn test_release_then_acquire_changes_generation() {
        let mut pool: Pool<ProjectileSlot> = Pool::new(PoolKind::Projectile, 1);
        let first = pool.acquire().unwrap();
        assert!(pool.release(first));

        let second = pool.acquire().unwrap();
        assert_eq!(first.index(), second.index());
        assert_ne!(first.generation(), second.generation());
        assert!(!pool.is_live(first));
        assert!(pool.is_live(second));
    }

    #[test]
    fn test_stale_release_is_noop() {
        let mut pool: Pool<Particle> = Pool::new(PoolKind::Particle, 2);
        let old = pool.acquire().unwrap();
        pool.release(old);
        let current = pool
            .acquire_with(|p| p.ttl = 9)
            .unwrap();

        assert!(!pool.release(old), "stale handle must not release");
        assert!(!pool.release(old), "double release must not release");
        assert_eq!(pool.stats().stale_releases, 2);
        assert_eq!(pool.get(current).map(|p| p.ttl), Some(9));
        assert!(pool.get(old).is_none());
        assert_eq!(pool.active_count(), 1);
    }

    #[test]
    fn test_acquire_resets_slot() {
        let mut pool: Pool<Particle> = Pool::new(PoolKind::Particle, 1);
        let h = pool.acquire_with(|p| p.ttl = 30).unwrap();
        pool.release(h);
        let h = pool.acquire().unwrap();
        assert_eq!(pool.get(h).map(|p| p.ttl), Some(0));
    }

    #[test]
    fn test_iter_active_and_release_all() {
        let mut pool: Pool<Particle> = Pool::new(PoolKind::Particle, 4);
        let a = pool.acquire_with(|p| p.ttl = 1).unwrap();
        let _b = pool.acquire_with(|p| p.ttl = 2).unwrap();
        let _c = pool.acquire_with(|p| p.ttl = 3).unwrap();
        pool.release(a);

        let ttls: Vec<u32> = pool.iter_active().map(|(_, p)| p.ttl).collect();
        assert_eq!(ttls, vec![2, 3]);

        for (_, p) in pool.iter_active_mut() {
            p.ttl += 10;
        }
        let ttls: Vec<u32> = pool.iter_active().map(|(_, p)| p.ttl).collect();
        assert_eq!(ttls, vec![12, 13]);

        assert_eq!(pool.release_all(), 2);
        assert_eq!(pool.active_count(), 0);
        assert!(!pool.is_exhausted());
    }

    proptest! {
        #[test]
        fn prop_active_never_exceeds_capacity(capacity in 1usize..32, ops in prop::collection::vec(any::<bool>(), 0..200)) {
            let mut pool: Pool<Particle> = Pool::new(PoolKind::Particle, capacity);
            let mut live: Vec<PoolHandle> = Vec::new();

            for acquire in ops {
                if acquire {
                    match pool.acquire() {
                        Ok(h) => live.push(h),
                        Err(_) => prop_assert_eq!(live.len(), capacity),
                    }
                } else if let Some(h) = live.pop() {
                    prop_assert!(pool.release(h));
                    prop_assert!(!pool.is_live(h));
                }
                prop_assert!(pool.active_count() <= capacity);
                prop_assert_eq!(pool.active_count(), live.len());
            }
        }
    }
}
