//! Sparse distance fields over chunk (2-D) and section (3-D) grids.

use std::marker::PhantomData;

use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use super::{LevelGraph, LevelPropagator, Neighbors};
use crate::types::{ChunkPos, SectionPos};

/// Grid topology: key packing and neighbour enumeration.
pub trait Neighborhood {
  type Pos: Copy;

  fn pack(pos: Self::Pos) -> u64;
  fn unpack(key: u64) -> Self::Pos;
  fn neighbors(key: u64) -> Neighbors;
}

/// 8-neighbourhood over [`ChunkPos`].
pub struct ChunkNeighborhood;

impl Neighborhood for ChunkNeighborhood {
  type Pos = ChunkPos;

  #[inline]
  fn pack(pos: ChunkPos) -> u64 {
    pos.pack()
  }

  #[inline]
  fn unpack(key: u64) -> ChunkPos {
    ChunkPos::unpack(key)
  }

  fn neighbors(key: u64) -> Neighbors {
    let pos = ChunkPos::unpack(key);
    let mut out = SmallVec::new();
    for dz in -1..=1 {
      for dx in -1..=1 {
        if dx != 0 || dz != 0 {
          out.push(pos.offset(dx, dz).pack());
        }
      }
    }
    out
  }
}

/// 26-neighbourhood over [`SectionPos`].
pub struct SectionNeighborhood;

impl Neighborhood for SectionNeighborhood {
  type Pos = SectionPos;

  #[inline]
  fn pack(pos: SectionPos) -> u64 {
    pos.pack()
  }

  #[inline]
  fn unpack(key: u64) -> SectionPos {
    SectionPos::unpack(key)
  }

  fn neighbors(key: u64) -> Neighbors {
    let pos = SectionPos::unpack(key);
    let mut out = SmallVec::new();
    for dy in -1..=1 {
      for dz in -1..=1 {
        for dx in -1..=1 {
          if dx != 0 || dy != 0 || dz != 0 {
            out.push(pos.offset(dx, dy, dz).pack());
          }
        }
      }
    }
    out
  }
}

/// A node whose settled level differs from what it was before the last drain.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LevelChange<P> {
  pub pos: P,
  pub old: u8,
  pub new: u8,
}

struct FieldLevels<N> {
  ceiling: u8,
  levels: FxHashMap<u64, u8>,
  sources: FxHashMap<u64, u8>,
  changes: FxHashMap<u64, (u8, u8)>,
  _topology: PhantomData<N>,
}

impl<N: Neighborhood> LevelGraph for FieldLevels<N> {
  #[inline]
  fn level(&self, node: u64) -> u8 {
    self.levels.get(&node).copied().unwrap_or(self.ceiling)
  }

  fn set_level(&mut self, node: u64, level: u8) {
    let old = self.level(node);
    if level >= self.ceiling {
      self.levels.remove(&node);
    } else {
      self.levels.insert(node, level);
    }
    if old != level {
      self
        .changes
        .entry(node)
        .and_modify(|change| change.1 = level)
        .or_insert((old, level));
    }
  }

  #[inline]
  fn level_from_source(&self, node: u64) -> u8 {
    self.sources.get(&node).copied().unwrap_or(self.ceiling)
  }

  #[inline]
  fn neighbors(&self, node: u64) -> Neighbors {
    N::neighbors(node)
  }
}

/// Distance-to-nearest-source field. Absent nodes sit at the ceiling.
pub struct DistanceField<N: Neighborhood> {
  engine: LevelPropagator,
  graph: FieldLevels<N>,
}

pub type ChunkDistanceField = DistanceField<ChunkNeighborhood>;
pub type SectionDistanceField = DistanceField<SectionNeighborhood>;

impl<N: Neighborhood> DistanceField<N> {
  /// A field whose unreached level is `ceiling`.
  pub fn new(ceiling: u8) -> Self {
    Self {
      engine: LevelPropagator::new(ceiling + 1),
      graph: FieldLevels {
        ceiling,
        levels: FxHashMap::default(),
        sources: FxHashMap::default(),
        changes: FxHashMap::default(),
        _topology: PhantomData,
      },
    }
  }

  #[inline]
  pub fn ceiling(&self) -> u8 {
    self.graph.ceiling
  }

  /// Settled level of `pos` as of the last update run.
  #[inline]
  pub fn level(&self, pos: N::Pos) -> u8 {
    self.graph.level(N::pack(pos))
  }

  pub fn source_level(&self, pos: N::Pos) -> Option<u8> {
    self.graph.sources.get(&N::pack(pos)).copied()
  }

  /// Set the level `pos` receives directly. The ceiling clears the source.
  pub fn set_source_level(&mut self, pos: N::Pos, level: u8) {
    let key = N::pack(pos);
    let ceiling = self.graph.ceiling;
    let level = level.min(ceiling);
    let replaced = if level == ceiling {
      self.graph.sources.remove(&key)
    } else {
      self.graph.sources.insert(key, level)
    };
    let previous = replaced.unwrap_or(ceiling);
    self.engine.update(&self.graph, key, level, level <= previous);
  }

  pub fn clear_source(&mut self, pos: N::Pos) {
    let ceiling = self.graph.ceiling;
    self.set_source_level(pos, ceiling);
  }

  /// Force a full re-min of one node.
  pub fn check(&mut self, pos: N::Pos) {
    self.engine.check_node(&self.graph, N::pack(pos));
  }

  #[inline]
  pub fn has_work(&self) -> bool {
    self.engine.has_work()
  }

  #[inline]
  pub fn queued_count(&self) -> usize {
    self.engine.queued_count()
  }

  /// Process up to `budget` node revisits. Returns the unused budget.
  pub fn run_updates(&mut self, budget: usize) -> usize {
    self.engine.run_updates(&mut self.graph, budget)
  }

  /// Run slices of `slice` revisits until converged. Returns total revisits.
  pub fn run_until_converged(&mut self, slice: usize) -> usize {
    let slice = slice.max(1);
    let mut processed = 0;
    while self.has_work() {
      processed += slice - self.run_updates(slice);
    }
    processed
  }

  /// Nodes whose level changed since the previous drain.
  pub fn drain_changes(&mut self) -> Vec<LevelChange<N::Pos>> {
    self
      .graph
      .changes
      .drain()
      .filter(|(_, (old, new))| old != new)
      .map(|(key, (old, new))| LevelChange {
        pos: N::unpack(key),
        old,
        new,
      })
      .collect()
  }

  /// Nodes below the ceiling.
  #[inline]
  pub fn reached_count(&self) -> usize {
    self.graph.levels.len()
  }

  /// Every node below the ceiling with its level.
  pub fn iter_levels(&self) -> impl Iterator<Item = (N::Pos, u8)> + '_ {
    self
      .graph
      .levels
      .iter()
      .map(|(&key, &level)| (N::unpack(key), level))
  }
}

#[cfg(test)]
#[path = "distance_field_test.rs"]
mod distance_field_test;
