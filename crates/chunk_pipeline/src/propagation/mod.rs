//! Incremental multi-source minimum-distance propagation.
//!
//! Every node has a level: 0 at a source, +1 per hop, clamped to a ceiling
//! that means "unreached". Changes are fed in as edges from a virtual source
//! ([`LevelPropagator::update`]) and resolved lazily by
//! [`LevelPropagator::run_updates`] in level order.
//!
//! ```text
//!   decrease at N                     increase at N
//!   ─────────────                     ─────────────
//!   set N = computed                  set N = ceiling
//!   push computed+1 to neighbours     re-queue N at its re-min'd level
//!   (one edge each, cheap)            neighbours whose level came from N
//!                                     re-min over all their edges
//! ```
//!
//! A decrease to `ceiling - 1` or above is not pushed further: a neighbour
//! would receive `ceiling`, which is already the default.
//!
//! The engine holds only the work queue. Node levels, sources and topology
//! live behind [`LevelGraph`], so one engine drives both the 2-D chunk fields
//! and the 3-D section field.

pub mod distance_field;

use std::collections::VecDeque;

use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

pub use distance_field::{
  ChunkDistanceField, ChunkNeighborhood, DistanceField, LevelChange, Neighborhood,
  SectionDistanceField, SectionNeighborhood,
};

/// Neighbour list, inline up to the 26 of a 3-D neighbourhood.
pub type Neighbors = SmallVec<[u64; 26]>;

/// Storage and topology the propagator works against.
pub trait LevelGraph {
  /// Stored level of `node`; the ceiling if the node holds none.
  fn level(&self, node: u64) -> u8;

  fn set_level(&mut self, node: u64, level: u8);

  /// Level `node` receives directly from the virtual source.
  fn level_from_source(&self, node: u64) -> u8;

  fn neighbors(&self, node: u64) -> Neighbors;
}

/// Where an edge starts: a real node, or the virtual source (`None`).
type Origin = Option<u64>;

// =============================================================================
// LeveledQueue
// =============================================================================

/// One FIFO set per level plus a cursor on the lowest non-empty one.
struct LeveledQueue {
  buckets: Vec<Bucket>,
  first: usize,
}

#[derive(Default)]
struct Bucket {
  order: VecDeque<u64>,
  members: FxHashSet<u64>,
}

impl LeveledQueue {
  fn new(level_count: usize) -> Self {
    Self {
      buckets: (0..level_count).map(|_| Bucket::default()).collect(),
      first: level_count,
    }
  }

  #[inline]
  fn is_empty(&self) -> bool {
    self.first >= self.buckets.len()
  }

  fn enqueue(&mut self, node: u64, level: u8) {
    let level = level as usize;
    let bucket = &mut self.buckets[level];
    if bucket.members.insert(node) {
      bucket.order.push_back(node);
    }
    self.first = self.first.min(level);
  }

  /// Remove `node` from `level`. If that empties the cursor's bucket, rescan
  /// upward, stopping at `max_level`.
  fn dequeue(&mut self, node: u64, level: u8, max_level: u8) {
    let level = level as usize;
    let bucket = &mut self.buckets[level];
    bucket.members.remove(&node);
    if bucket.members.is_empty() {
      bucket.order.clear();
      if self.first == level {
        self.advance_first(max_level as usize);
      }
    }
  }

  fn advance_first(&mut self, max_level: usize) {
    let old = self.first;
    self.first = max_level;
    for level in old + 1..max_level {
      if !self.buckets[level].members.is_empty() {
        self.first = level;
        break;
      }
    }
  }

  fn pop_first(&mut self) -> Option<u64> {
    if self.is_empty() {
      return None;
    }
    let level = self.first;
    let bucket = &mut self.buckets[level];
    let mut popped = None;
    // `order` may hold stale entries for nodes dequeued earlier.
    while let Some(node) = bucket.order.pop_front() {
      if bucket.members.remove(&node) {
        popped = Some(node);
        break;
      }
    }
    if bucket.members.is_empty() {
      bucket.order.clear();
      let count = self.buckets.len();
      self.advance_first(count);
    }
    popped
  }
}

// =============================================================================
// LevelPropagator
// =============================================================================

/// Queue state of one propagation field.
pub struct LevelPropagator {
  level_count: u8,
  queue: LeveledQueue,
  /// Pending target level per queued node.
  computed: FxHashMap<u64, u8>,
}

impl LevelPropagator {
  /// `level_count` levels: `0..level_count - 1` are real, the last is the ceiling.
  pub fn new(level_count: u8) -> Self {
    assert!(
      (2..254).contains(&level_count),
      "level count {level_count} out of range"
    );
    Self {
      level_count,
      queue: LeveledQueue::new(level_count as usize),
      computed: FxHashMap::default(),
    }
  }

  #[inline]
  pub fn level_count(&self) -> u8 {
    self.level_count
  }

  /// Level meaning "unreached".
  #[inline]
  pub fn ceiling(&self) -> u8 {
    self.level_count - 1
  }

  #[inline]
  pub fn has_work(&self) -> bool {
    !self.queue.is_empty()
  }

  /// Nodes waiting to be revisited.
  #[inline]
  pub fn queued_count(&self) -> usize {
    self.computed.len()
  }

  #[inline]
  fn priority(&self, level: u8, computed: u8) -> u8 {
    level.min(computed).min(self.ceiling())
  }

  /// Feed a new source level for `node`. `only_decreasing` promises the
  /// level did not go up, which lets the change skip a full re-min.
  pub fn update<G: LevelGraph>(
    &mut self,
    graph: &G,
    node: u64,
    level_from_source: u8,
    only_decreasing: bool,
  ) {
    self.check_edge(graph, None, node, level_from_source, only_decreasing);
  }

  /// Re-min `node` over all of its edges.
  pub fn check_node<G: LevelGraph>(&mut self, graph: &G, node: u64) {
    let ceiling = self.ceiling();
    self.check_edge(graph, Some(node), node, ceiling, false);
  }

  /// Drop any pending work for `node`.
  pub fn remove_from_queue<G: LevelGraph>(&mut self, graph: &G, node: u64) {
    if let Some(computed) = self.computed.remove(&node) {
      let priority = self.priority(graph.level(node), computed);
      self.queue.dequeue(node, priority, self.level_count);
    }
  }

  /// Process up to `budget` queued nodes. Returns the unused budget.
  pub fn run_updates<G: LevelGraph>(&mut self, graph: &mut G, mut budget: usize) -> usize {
    let ceiling = self.ceiling();
    while budget > 0 {
      let Some(node) = self.queue.pop_first() else {
        break;
      };
      budget -= 1;

      let level = graph.level(node).min(ceiling);
      let Some(computed) = self.computed.remove(&node) else {
        continue;
      };

      if computed < level {
        graph.set_level(node, computed);
        self.check_neighbors_after_update(graph, node, computed, true);
      } else if computed > level {
        graph.set_level(node, ceiling);
        if computed != ceiling {
          self.queue.enqueue(node, self.priority(ceiling, computed));
          self.computed.insert(node, computed);
        }
        self.check_neighbors_after_update(graph, node, level, false);
      }
    }
    budget
  }

  fn check_edge<G: LevelGraph>(
    &mut self,
    graph: &G,
    from: Origin,
    to: u64,
    new_level_from: u8,
    only_decreasing: bool,
  ) {
    let level_to = graph.level(to);
    let computed_to = self.computed.get(&to).copied();
    self.check_edge_with(graph, from, to, new_level_from, level_to, computed_to, only_decreasing);
  }

  #[allow(clippy::too_many_arguments)]
  fn check_edge_with<G: LevelGraph>(
    &mut self,
    graph: &G,
    from: Origin,
    to: u64,
    new_level_from: u8,
    level_to: u8,
    computed_to: Option<u8>,
    only_decreasing: bool,
  ) {
    let ceiling = self.ceiling();
    let new_level_from = new_level_from.min(ceiling);
    let level_to = level_to.min(ceiling);
    let queued = computed_to.is_some();
    let computed_to = computed_to.unwrap_or(level_to);

    let new_computed = if only_decreasing {
      computed_to.min(new_level_from)
    } else {
      self.computed_level(graph, to, from, new_level_from).min(ceiling)
    };

    let old_priority = self.priority(level_to, computed_to);
    if level_to != new_computed {
      let new_priority = self.priority(level_to, new_computed);
      if queued && old_priority != new_priority {
        self.queue.dequeue(to, old_priority, new_priority);
      }
      self.queue.enqueue(to, new_priority);
      self.computed.insert(to, new_computed);
    } else if queued {
      self.queue.dequeue(to, old_priority, self.level_count);
      self.computed.remove(&to);
    }
  }

  fn check_neighbor<G: LevelGraph>(
    &mut self,
    graph: &G,
    from: u64,
    to: u64,
    level: u8,
    only_decreasing: bool,
  ) {
    let ceiling = self.ceiling();
    let computed = self.computed.get(&to).copied();
    let new_level = level.saturating_add(1).min(ceiling);

    if only_decreasing {
      self.check_edge_with(graph, Some(from), to, new_level, graph.level(to), computed, true);
      return;
    }

    // Only a neighbour whose level may have come through `from` needs a re-min.
    let (level_to, stored) = match computed {
      None => {
        let stored = graph.level(to).min(ceiling);
        (stored, stored)
      }
      Some(computed) => (computed, graph.level(to)),
    };
    if new_level == level_to {
      self.check_edge_with(graph, Some(from), to, ceiling, stored, computed, false);
    }
  }

  fn check_neighbors_after_update<G: LevelGraph>(
    &mut self,
    graph: &G,
    node: u64,
    level: u8,
    only_decreasing: bool,
  ) {
    if only_decreasing && level >= self.ceiling().saturating_sub(1) {
      return;
    }
    for neighbor in graph.neighbors(node) {
      self.check_neighbor(graph, node, neighbor, level, only_decreasing);
    }
  }

  /// Minimum over every edge into `node` except the one from `known_parent`,
  /// which contributes `known_level` instead.
  fn computed_level<G: LevelGraph>(
    &self,
    graph: &G,
    node: u64,
    known_parent: Origin,
    known_level: u8,
  ) -> u8 {
    let mut best = known_level;
    if known_parent.is_some() {
      best = best.min(graph.level_from_source(node));
      if best == 0 {
        return 0;
      }
    }
    for neighbor in graph.neighbors(node) {
      if Some(neighbor) == known_parent {
        continue;
      }
      best = best.min(graph.level(neighbor).saturating_add(1));
      if best == 0 {
        return 0;
      }
    }
    best
  }
}
