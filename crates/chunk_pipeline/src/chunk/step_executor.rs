//! The seam between the pipeline and whatever actually builds chunk contents.
//!
//! The pipeline decides *when* a chunk may advance and which neighbours have
//! to exist; a [`StageExecutor`] decides *what* advancing means. Steps run on
//! the worker pool, so implementations must be thread-safe.

use std::sync::Arc;

use crate::chunk::cache::StaticCache2D;
use crate::chunk::pyramid::{ChunkPyramid, ChunkStep};
use crate::error::StageError;
use crate::types::ChunkData;

/// Neighbour chunks visible to a step, `None` where a cell holds no data.
pub type ChunkWindow = StaticCache2D<Option<Arc<ChunkData>>>;

/// Which pyramid a step is taken from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PyramidKind {
  Generation,
  Loading,
}

/// Applies one stage step to a chunk.
pub trait StageExecutor: Send + Sync + 'static {
  /// Dependencies used when chunks have to be generated.
  ///
  /// A custom pyramid must not reach further than the built-in one: level
  /// thresholds and the unload radius are derived from the built-in radii.
  fn generation_pyramid(&self) -> &ChunkPyramid {
    ChunkPyramid::generation()
  }

  /// Dependencies used when chunks are read back from storage.
  fn loading_pyramid(&self) -> &ChunkPyramid {
    ChunkPyramid::loading()
  }

  /// Produce `chunk` advanced to `step.target_status`.
  ///
  /// `window` covers the step's direct dependency radius. `chunk` is at the
  /// parent status of the step.
  fn apply(&self, step: &ChunkStep, window: &ChunkWindow, chunk: &ChunkData) -> Result<ChunkData, StageError>;
}

impl dyn StageExecutor {
  pub fn pyramid(&self, kind: PyramidKind) -> &ChunkPyramid {
    match kind {
      PyramidKind::Generation => self.generation_pyramid(),
      PyramidKind::Loading => self.loading_pyramid(),
    }
  }
}

/// Advances the status and appends the reached status to the payload.
///
/// The payload trail makes it easy to check which steps ran, and in which
/// order, after a chunk has been saved and loaded back.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassThroughExecutor;

impl StageExecutor for PassThroughExecutor {
  fn apply(&self, step: &ChunkStep, _window: &ChunkWindow, chunk: &ChunkData) -> Result<ChunkData, StageError> {
    let mut next = chunk.advanced_to(step.target_status);
    next.payload.push(step.target_status as u8);
    Ok(next)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::types::{ChunkPos, ChunkStatus};

  #[test]
  fn test_pass_through_records_trail() {
    let executor = PassThroughExecutor;
    let pyramid = executor.generation_pyramid();
    let window = ChunkWindow::create(ChunkPos::ZERO, 0, |_| None);

    let mut chunk = ChunkData::empty(ChunkPos::ZERO);
    for status in [ChunkStatus::StructureStarts, ChunkStatus::StructureReferences] {
      chunk = executor.apply(pyramid.step_to(status), &window, &chunk).unwrap();
    }

    assert_eq!(chunk.status, ChunkStatus::StructureReferences);
    assert_eq!(chunk.payload, vec![1, 2]);
  }

  #[test]
  fn test_pyramid_kind_selects_pyramid() {
    let executor: Arc<dyn StageExecutor> = Arc::new(PassThroughExecutor);
    let loading = executor.pyramid(PyramidKind::Loading);
    assert_eq!(
      loading.step_to(ChunkStatus::Features).accumulated_dependencies.size(),
      1
    );
  }
}
