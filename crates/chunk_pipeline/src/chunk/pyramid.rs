//! Dependency pyramids: which neighbourhood must exist at which stage before a
//! chunk may advance.
//!
//! A [`ChunkStep`] knows its *direct* requirements (declared with
//! [`ChunkStepBuilder::require`]) and the *accumulated* requirements obtained by
//! stacking its parent step's pyramid on top of them. Accumulated dependencies
//! are indexed by chessboard distance from the centre chunk:
//!
//! ```text
//!   distance:    0         1          2       3 ..= 11
//!   Full:     [Spawn, InitLight, Carvers, Biomes, StructureStarts ...]
//! ```
//!
//! Reading the row for `Full`: the centre must be at `Spawn`, every chunk at
//! distance 1 at `InitializeLight`, and so on out to distance 11.

use std::sync::LazyLock;

use crate::types::ChunkStatus;

/// Required status per distance from the centre. Non-increasing by construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkDependencies {
  by_radius: Vec<ChunkStatus>,
}

impl ChunkDependencies {
  fn new(by_radius: Vec<ChunkStatus>) -> Self {
    debug_assert!(
      by_radius.windows(2).all(|w| w[0] >= w[1]),
      "dependencies must not increase with distance: {by_radius:?}"
    );
    Self { by_radius }
  }

  /// Status required at `distance`, or `None` outside the pyramid.
  #[inline]
  pub fn get(&self, distance: usize) -> Option<ChunkStatus> {
    self.by_radius.get(distance).copied()
  }

  /// Number of rings, including the centre.
  #[inline]
  pub fn size(&self) -> usize {
    self.by_radius.len()
  }

  /// Outermost ring index.
  #[inline]
  pub fn radius(&self) -> usize {
    self.by_radius.len().saturating_sub(1)
  }

  /// Largest distance at which `status` (or later) is still required.
  pub fn radius_of(&self, status: ChunkStatus) -> Option<usize> {
    self.by_radius.iter().rposition(|required| *required >= status)
  }

  pub fn iter(&self) -> impl Iterator<Item = ChunkStatus> + '_ {
    self.by_radius.iter().copied()
  }
}

/// One rung of a pyramid: what it takes to reach `target_status`.
#[derive(Clone, Debug)]
pub struct ChunkStep {
  pub target_status: ChunkStatus,
  pub direct_dependencies: ChunkDependencies,
  pub accumulated_dependencies: ChunkDependencies,
  /// Radius of neighbours whose blocks this step may write. -1 = none.
  pub block_state_write_radius: i32,
}

impl ChunkStep {
  /// Radius of the neighbourhood that must reach `status` before this step.
  pub fn accumulated_radius_of(&self, status: ChunkStatus) -> usize {
    if status == self.target_status {
      return 0;
    }
    self
      .accumulated_dependencies
      .radius_of(status)
      .unwrap_or_else(|| panic!("{status} is not a dependency of the {} step", self.target_status))
  }
}

/// Builder for a single [`ChunkStep`].
pub struct ChunkStepBuilder {
  status: ChunkStatus,
  parent: Option<ChunkDependencies>,
  parent_status: Option<ChunkStatus>,
  direct: Vec<ChunkStatus>,
  write_radius: i32,
}

impl ChunkStepBuilder {
  fn new(status: ChunkStatus, parent: Option<&ChunkStep>) -> Self {
    Self {
      status,
      parent: parent.map(|p| p.accumulated_dependencies.clone()),
      parent_status: parent.map(|p| p.target_status),
      direct: vec![status.parent()],
      write_radius: -1,
    }
  }

  /// Require every chunk within `radius` to be at `status` or later.
  pub fn require(mut self, status: ChunkStatus, radius: usize) -> Self {
    assert!(
      status < self.status,
      "{} cannot depend on {status}",
      self.status
    );
    let len = radius + 1;
    if len > self.direct.len() {
      self.direct.resize(len, status);
    }
    for required in self.direct.iter_mut().take(len) {
      *required = (*required).max(status);
    }
    self
  }

  pub fn write_radius(mut self, radius: i32) -> Self {
    self.write_radius = radius;
    self
  }

  fn build(self) -> ChunkStep {
    let direct = ChunkDependencies::new(self.direct);
    let accumulated = match (self.parent, self.parent_status) {
      (Some(parent), Some(parent_status)) => {
        let parent_radius = direct.radius_of(parent_status).unwrap_or(0);
        let size = (parent_radius + parent.size()).max(direct.size());
        let statuses = (0..size)
          .map(|i| {
            let from_direct = direct.get(i);
            let from_parent = i.checked_sub(parent_radius).and_then(|pi| parent.get(pi));
            match (from_direct, from_parent) {
              (Some(a), Some(b)) => a.max(b),
              (Some(a), None) | (None, Some(a)) => a,
              (None, None) => unreachable!("ring {i} outside both pyramids"),
            }
          })
          .collect();
        ChunkDependencies::new(statuses)
      }
      _ => direct.clone(),
    };

    ChunkStep {
      target_status: self.status,
      direct_dependencies: direct,
      accumulated_dependencies: accumulated,
      block_state_write_radius: self.write_radius,
    }
  }
}

/// A full set of steps, one per [`ChunkStatus`].
#[derive(Clone, Debug)]
pub struct ChunkPyramid {
  steps: Vec<ChunkStep>,
}

impl ChunkPyramid {
  pub fn builder() -> ChunkPyramidBuilder {
    ChunkPyramidBuilder { steps: Vec::with_capacity(ChunkStatus::COUNT) }
  }

  #[inline]
  pub fn step_to(&self, status: ChunkStatus) -> &ChunkStep {
    &self.steps[status.index()]
  }

  /// Radius of the `Empty` ring around a full chunk.
  pub fn radius_around_full_chunk(&self) -> usize {
    self.step_to(ChunkStatus::Full).accumulated_radius_of(ChunkStatus::Empty)
  }

  /// Pyramid used when chunks have to be generated.
  pub fn generation() -> &'static ChunkPyramid {
    &GENERATION_PYRAMID
  }

  /// Pyramid used when chunks already exist in storage.
  pub fn loading() -> &'static ChunkPyramid {
    &LOADING_PYRAMID
  }
}

pub struct ChunkPyramidBuilder {
  steps: Vec<ChunkStep>,
}

impl ChunkPyramidBuilder {
  /// Add the next step. Steps must be added in stage order.
  pub fn step(
    mut self,
    status: ChunkStatus,
    configure: impl FnOnce(ChunkStepBuilder) -> ChunkStepBuilder,
  ) -> Self {
    assert_eq!(status.index(), self.steps.len(), "steps must be added in order");
    let step = configure(ChunkStepBuilder::new(status, self.steps.last())).build();
    self.steps.push(step);
    self
  }

  pub fn build(self) -> ChunkPyramid {
    assert_eq!(self.steps.len(), ChunkStatus::COUNT, "pyramid is missing steps");
    ChunkPyramid { steps: self.steps }
  }
}

static GENERATION_PYRAMID: LazyLock<ChunkPyramid> = LazyLock::new(|| {
  use ChunkStatus::*;
  ChunkPyramid::builder()
    .step(Empty, |s| s)
    .step(StructureStarts, |s| s)
    .step(StructureReferences, |s| s.require(StructureStarts, 8))
    .step(Biomes, |s| s.require(StructureStarts, 8))
    .step(Noise, |s| {
      s.require(StructureStarts, 8).require(Biomes, 1).write_radius(0)
    })
    .step(Surface, |s| {
      s.require(StructureStarts, 8).require(Biomes, 1).write_radius(0)
    })
    .step(Carvers, |s| s.require(StructureStarts, 8).write_radius(0))
    .step(Features, |s| {
      s.require(StructureStarts, 8).require(Carvers, 1).write_radius(1)
    })
    .step(InitializeLight, |s| s)
    .step(Light, |s| s.require(InitializeLight, 1))
    .step(Spawn, |s| s.require(Biomes, 1))
    .step(Full, |s| s)
    .build()
});

static LOADING_PYRAMID: LazyLock<ChunkPyramid> = LazyLock::new(|| {
  use ChunkStatus::*;
  ChunkPyramid::builder()
    .step(Empty, |s| s)
    .step(StructureStarts, |s| s)
    .step(StructureReferences, |s| s)
    .step(Biomes, |s| s)
    .step(Noise, |s| s)
    .step(Surface, |s| s)
    .step(Carvers, |s| s)
    .step(Features, |s| s)
    .step(InitializeLight, |s| s.require(Features, 1))
    .step(Light, |s| s.require(InitializeLight, 1))
    .step(Spawn, |s| s)
    .step(Full, |s| s)
    .build()
});

#[cfg(test)]
#[path = "pyramid_test.rs"]
mod pyramid_test;
