//! Per-cell generation state and the machinery that advances it.
//!
//! - [`ChunkPyramid`]: which neighbourhood each stage depends on
//! - [`ChunkHolder`]: stage futures, levels and claims for one cell
//! - [`GenerationTask`]: drives a cell to a target status, layer by layer
//! - [`GenerationContext`]: executors and collaborators steps run against
//! - [`StageExecutor`]: the pluggable step implementation

pub mod cache;
mod context;
mod full_status;
mod generation_task;
mod holder;
pub mod pyramid;
mod step_executor;

pub use cache::StaticCache2D;
pub use context::{GeneratingChunkMap, GenerationContext};
pub use generation_task::{CancellationToken, GenerationTask};
pub use holder::{unloaded_future, ChunkFuture, ChunkHolder};
pub use pyramid::{ChunkDependencies, ChunkPyramid, ChunkStep, ChunkStepBuilder};
pub use step_executor::{ChunkWindow, PassThroughExecutor, PyramidKind, StageExecutor};
