//! Spatial Index
//!
//! Region quadtree over the level extent, answering "which entities touch
//! region R" without scanning every entity.
//!
//! ```text
//!  ┌───────────────┬───────────────┐
//!  │ TL            │ TR   ┌──┬──┐  │   each node: region, depth, items,
//!  │               │      ├──┼──┤  │   up to four lazily created children
//!  │          ┌────┼────┐ └──┴──┘  │
//!  ├──────────┼────┼────┼──────────┤   a box crossing a split line (the
//!  │ BL       └────┼────┘          │   one in the middle) is a straddler
//!  │               │ BR            │   and stays with the parent
//!  └───────────────┴───────────────┘
//! ```
//!
//! Each entry lives in exactly one node: the deepest node whose region
//! fully contains its box. A node splits once it holds more than
//! `capacity` entries and is shallower than `max_depth`; children are
//! released again as soon as their whole subtree is empty.
//!
//! Boxes that leave the root region are not dropped. They stay in the
//! root's straddler list and are returned only by queries that touch
//! their real box.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Serialize, Deserialize};
use tracing::warn;

use crate::core::aabb::Aabb;
use crate::core::vec2::FixedVec2;
use crate::game::entity::EntityId;

/// Index of the root node. The root is never freed.
const ROOT: usize = 0;

// =============================================================================
// CONFIGURATION
// =============================================================================

/// How moving entities are brought up to date each tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebuildPolicy {
    /// Drop every dynamic entry and reinsert from scratch
    Rebuild,
    /// Relocate only entries whose node no longer fits
    Incremental,
    /// Rebuild while the dynamic count is at or below the threshold
    #[default]
    Auto,
}

/// Quadtree tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuadtreeConfig {
    /// Entries a leaf holds before it splits
    pub capacity: usize,
    /// Depth below which no node splits (root is depth 0)
    pub max_depth: u8,
    /// Refresh strategy
    pub policy: RebuildPolicy,
    /// Dynamic entity count at which `Auto` switches to incremental updates
    pub rebuild_threshold: usize,
}

impl Default for QuadtreeConfig {
    fn default() -> Self {
        Self {
            capacity: 8,
            max_depth: 6,
            policy: RebuildPolicy::Auto,
            rebuild_threshold: 64,
        }
    }
}

impl QuadtreeConfig {
    /// True if a tick with `dynamic` moving entries should rebuild them.
    pub fn prefers_rebuild(&self, dynamic: usize) -> bool {
        match self.policy {
            RebuildPolicy::Rebuild => true,
            RebuildPolicy::Incremental => false,
            RebuildPolicy::Auto => dynamic <= self.rebuild_threshold,
        }
    }
}

// =============================================================================
// NODES + PLACEMENTS
// =============================================================================

#[derive(Clone, Debug)]
struct Node {
    bounds: Aabb,
    depth: u8,
    parent: Option<usize>,
    children: Option<[usize; 4]>,
    /// Entries placed at this node
    items: Vec<EntityId>,
    /// Entries in this node and all of its descendants
    count: usize,
}

impl Node {
    fn leaf(bounds: Aabb, depth: u8, parent: Option<usize>) -> Self {
        Self {
            bounds,
            depth,
            parent,
            children: None,
            items: Vec::new(),
            count: 0,
        }
    }
}

#[derive(Clone, Copy, Debug)]
struct Placement {
    node: usize,
    /// Box as given by the caller
    bounds: Aabb,
    is_static: bool,
    outside: bool,
}

/// Structural counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuadtreeStats {
    /// Live nodes, root included
    pub nodes: usize,
    /// Deepest live node
    pub depth: u8,
    /// Entries indexed
    pub entries: usize,
    /// Entries outside the root region
    pub outside: usize,
    /// Entries inserted as static geometry
    pub statics: usize,
}

// =============================================================================
// QUADTREE
// =============================================================================

/// Region quadtree keyed by [`EntityId`].
#[derive(Clone, Debug)]
pub struct Quadtree {
    config: QuadtreeConfig,
    nodes: Vec<Node>,
    free: Vec<usize>,
    placements: BTreeMap<EntityId, Placement>,
}

impl Quadtree {
    /// Empty tree over `bounds`.
    pub fn new(bounds: Aabb, config: QuadtreeConfig) -> Self {
        Self {
            config,
            nodes: vec![Node::leaf(bounds, 0, None)],
            free: Vec::new(),
            placements: BTreeMap::new(),
        }
    }

    /// Root region.
    pub fn bounds(&self) -> Aabb {
        self.nodes[ROOT].bounds
    }

    /// Tuning in effect.
    pub fn config(&self) -> &QuadtreeConfig {
        &self.config
    }

    /// Number of indexed entries.
    pub fn len(&self) -> usize {
        self.placements.len()
    }

    /// True if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.placements.is_empty()
    }

    /// True if `id` is indexed.
    pub fn contains(&self, id: EntityId) -> bool {
        self.placements.contains_key(&id)
    }

    /// Box `id` was last indexed with.
    pub fn bounds_of(&self, id: EntityId) -> Option<Aabb> {
        self.placements.get(&id).map(|p| p.bounds)
    }

    /// Every indexed id, ascending.
    pub fn ids(&self) -> impl Iterator<Item = EntityId> + '_ {
        self.placements.keys().copied()
    }

    /// Index a moving entity. Re-inserting an indexed id moves it.
    pub fn insert(&mut self, id: EntityId, bounds: Aabb) {
        let was_outside = self.placements.get(&id).is_some_and(|p| p.outside);
        self.remove(id);
        self.place(id, bounds, false, was_outside);
    }

    /// Index static geometry. Statics survive [`Quadtree::rebuild_dynamic`].
    pub fn insert_static(&mut self, id: EntityId, bounds: Aabb) {
        self.remove(id);
        self.place(id, bounds, true, false);
    }

    /// Remove an entry. Returns `false` if it was not indexed.
    pub fn remove(&mut self, id: EntityId) -> bool {
        let Some(placement) = self.placements.remove(&id) else {
            return false;
        };
        self.detach(placement.node, id);
        self.prune(placement.node);
        true
    }

    /// Bring an entry's box up to date.
    ///
    /// Only relocates when the current node no longer is the deepest node
    /// containing the box. Returns `true` if the entry changed node.
    pub fn update(&mut self, id: EntityId, bounds: Aabb) -> bool {
        let Some(current) = self.placements.get(&id).copied() else {
            self.place(id, bounds, false, false);
            return true;
        };

        let root = self.bounds();
        let inside = root.contains(&bounds);
        let stays = if inside && !current.outside {
            let node = &self.nodes[current.node];
            node.bounds.contains(&bounds)
                && !node
                    .children
                    .is_some_and(|cs| cs.iter().any(|&c| self.nodes[c].bounds.contains(&bounds)))
        } else {
            !inside && current.outside
        };

        if stays {
            if let Some(entry) = self.placements.get_mut(&id) {
                entry.bounds = bounds;
            }
            return false;
        }

        self.placements.remove(&id);
        self.detach(current.node, id);
        self.prune(current.node);
        self.place(id, bounds, current.is_static, current.outside);
        true
    }

    /// Replace every dynamic entry with `entries`, keeping static geometry.
    pub fn rebuild_dynamic<I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (EntityId, Aabb)>,
    {
        let was_outside: BTreeSet<EntityId> = self
            .placements
            .iter()
            .filter(|(_, p)| p.outside && !p.is_static)
            .map(|(id, _)| *id)
            .collect();

        self.placements.retain(|_, p| p.is_static);
        self.recount(ROOT);

        for (id, bounds) in entries {
            self.remove(id);
            self.place(id, bounds, false, was_outside.contains(&id));
        }
    }

    /// Drop every entry and node.
    pub fn clear(&mut self) {
        let bounds = self.bounds();
        self.nodes.clear();
        self.nodes.push(Node::leaf(bounds, 0, None));
        self.free.clear();
        self.placements.clear();
    }

    /// Every entry whose box touches `region` (edges inclusive).
    ///
    /// Descends only into children whose region touches `region`. Root
    /// straddlers, including out-of-bounds entries, are always checked
    /// against their real box.
    pub fn query(&self, region: &Aabb) -> BTreeSet<EntityId> {
        let mut found = BTreeSet::new();
        let mut stack = vec![ROOT];

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            for id in &node.items {
                let Some(p) = self.placements.get(id) else { continue };
                if p.bounds.touches(region) {
                    found.insert(*id);
                }
            }
            if let Some(children) = node.children {
                stack.extend(
                    children
                        .iter()
                        .copied()
                        .filter(|&c| self.nodes[c].bounds.touches(region)),
                );
            }
        }
        found
    }

    /// Every entry whose box contains `point`.
    pub fn query_point(&self, point: FixedVec2) -> BTreeSet<EntityId> {
        self.query(&Aabb::new(point, point))
    }

    /// Structural counters.
    pub fn stats(&self) -> QuadtreeStats {
        let mut stats = QuadtreeStats {
            entries: self.placements.len(),
            outside: self.placements.values().filter(|p| p.outside).count(),
            statics: self.placements.values().filter(|p| p.is_static).count(),
            ..QuadtreeStats::default()
        };
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            stats.nodes += 1;
            stats.depth = stats.depth.max(node.depth);
            if let Some(children) = node.children {
                stack.extend(children);
            }
        }
        stats
    }

    // =========================================================================
    // INTERNALS
    // =========================================================================

    fn place(&mut self, id: EntityId, bounds: Aabb, is_static: bool, was_outside: bool) {
        let root = self.bounds();
        let outside = !root.contains(&bounds);

        let node = if outside {
            if !was_outside {
                warn!(entity = id.0, ?bounds, "entity outside level bounds, kept at root");
            }
            ROOT
        } else {
            self.descend(&bounds)
        };

        self.placements.insert(id, Placement { node, bounds, is_static, outside });
        self.attach(node, id);
        self.split_if_needed(node);
    }

    /// Deepest existing node that fully contains `bounds`.
    fn descend(&self, bounds: &Aabb) -> usize {
        let mut index = ROOT;
        while let Some(children) = self.nodes[index].children {
            match children.iter().copied().find(|&c| self.nodes[c].bounds.contains(bounds)) {
                Some(child) => index = child,
                None => break,
            }
        }
        index
    }

    fn attach(&mut self, node: usize, id: EntityId) {
        self.nodes[node].items.push(id);
        let mut cursor = Some(node);
        while let Some(index) = cursor {
            self.nodes[index].count += 1;
            cursor = self.nodes[index].parent;
        }
    }

    fn detach(&mut self, node: usize, id: EntityId) {
        self.nodes[node].items.retain(|&item| item != id);
        let mut cursor = Some(node);
        while let Some(index) = cursor {
            self.nodes[index].count -= 1;
            cursor = self.nodes[index].parent;
        }
    }

    fn alloc(&mut self, bounds: Aabb, depth: u8, parent: usize) -> usize {
        let node = Node::leaf(bounds, depth, Some(parent));
        match self.free.pop() {
            Some(index) => {
                self.nodes[index] = node;
                index
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn split_if_needed(&mut self, index: usize) {
        let node = &self.nodes[index];
        if node.children.is_some()
            || node.items.len() <= self.config.capacity
            || node.depth >= self.config.max_depth
        {
            return;
        }
        let quadrants = node.bounds.quadrants();
        let depth = node.depth + 1;

        let children = quadrants.map(|q| self.alloc(q, depth, index));
        self.nodes[index].children = Some(children);

        let items = std::mem::take(&mut self.nodes[index].items);
        let mut kept = Vec::with_capacity(items.len());
        for id in items {
            let target = match self.placements.get(&id) {
                Some(p) if !p.outside => children
                    .iter()
                    .copied()
                    .find(|&c| self.nodes[c].bounds.contains(&p.bounds)),
                _ => None,
            };
            match target {
                Some(child) => {
                    self.nodes[child].items.push(id);
                    self.nodes[child].count += 1;
                    if let Some(p) = self.placements.get_mut(&id) {
                        p.node = child;
                    }
                }
                None => kept.push(id),
            }
        }
        self.nodes[index].items = kept;

        // Nothing fit a quadrant: all straddlers, splitting buys nothing
        if children.iter().all(|&c| self.nodes[c].count == 0) {
            self.release_children(index);
            return;
        }
        for child in children {
            self.split_if_needed(child);
        }
    }

    fn release_children(&mut self, index: usize) {
        if let Some(children) = self.nodes[index].children.take() {
            for child in children {
                self.release_children(child);
                self.nodes[child].items.clear();
                self.nodes[child].count = 0;
                self.free.push(child);
            }
        }
    }

    /// Release empty subtrees from `start` up to the root.
    fn prune(&mut self, start: usize) {
        let mut cursor = Some(start);
        while let Some(index) = cursor {
            if let Some(children) = self.nodes[index].children {
                if children.iter().all(|&c| self.nodes[c].count == 0) {
                    self.release_children(index);
                }
            }
            cursor = self.nodes[index].parent;
        }
    }

    /// Drop items no longer indexed, fix counts and release empty subtrees.
    fn recount(&mut self, index: usize) -> usize {
        let placements = &self.placements;
        self.nodes[index].items.retain(|id| placements.contains_key(id));

        let mut count = self.nodes[index].items.len();
        if let Some(children) = self.nodes[index].children {
            let below: usize = children.iter().map(|&c| self.recount(c)).sum();
            if below == 0 {
                self.release_children(index);
            }
            count += below;
        }
        self.nodes[index].count = count;
        count
    }

    /// Structural invariants, checked by tests after every mutation.
    #[cfg(test)]
    pub(crate) fn check_invariants(&self) -> Result<(), String> {
        let mut seen = BTreeSet::new();
        let mut stack = vec![ROOT];
        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            let mut below = 0;
            if let Some(children) = node.children {
                for c in children {
                    if self.nodes[c].parent != Some(index) {
                        return Err(format!("node {} has wrong parent", c));
                    }
                    below += self.nodes[c].count;
                }
                if below == 0 {
                    return Err(format!("node {} keeps an empty subtree", index));
                }
                stack.extend(children);
            }
            if node.count != node.items.len() + below {
                return Err(format!("node {} count {} != {}", index, node.count, node.items.len() + below));
            }
            for id in &node.items {
                if !seen.insert(*id) {
                    return Err(format!("{} placed twice", id));
                }
                let p = self.placements.get(id).ok_or(format!("{} has no placement", id))?;
                if p.node != index {
                    return Err(format!("{} placement points at {} not {}", id, p.node, index));
                }
                if p.outside {
                    if index != ROOT {
                        return Err(format!("outside entry {} below root", id));
                    }
                    continue;
                }
                if !node.bounds.contains(&p.bounds) {
                    return Err(format!("{} not contained by its node", id));
                }
                if let Some(children) = node.children {
                    if children.iter().any(|&c| self.nodes[c].bounds.contains(&p.bounds)) {
                        return Err(format!("{} fits a child of node {}", id, index));
                    }
                }
            }
        }
        if seen.len() != self.placements.len() {
            return Err(format!("{} placements but {} reachable", self.placements.len(), seen.len()));
        }
        Ok(())
    }
}

// =============================================================================
// TESTS
// =============================================================================
