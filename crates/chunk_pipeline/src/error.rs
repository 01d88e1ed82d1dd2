//! Error taxonomy.
//!
//! Stage failures and disallowed stages travel inside futures as
//! [`ChunkFailure`]; ticket misuse, storage and configuration problems are
//! ordinary `Result` errors. Invariant violations are not represented here:
//! they panic at the point of detection.

use thiserror::Error;

use crate::types::{ChunkPos, ChunkStatus};

/// Why a stage future did not produce a chunk.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ChunkFailure {
  /// The stage is above the cell's current ceiling, or the cell was demoted
  /// while the future was pending.
  #[error("chunk not loaded at the requested status")]
  Unloaded,

  /// The stage executor reported a failure.
  #[error(transparent)]
  Stage(#[from] StageError),
}

impl ChunkFailure {
  #[inline]
  pub fn is_unloaded(&self) -> bool {
    matches!(self, Self::Unloaded)
  }
}

/// A stage step could not be applied.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum StageError {
  #[error("{status} step failed for chunk {pos}: {reason}")]
  StepFailed {
    pos: ChunkPos,
    status: ChunkStatus,
    reason: String,
  },

  #[error("chunk {pos} has no data at parent status {parent}")]
  MissingParent { pos: ChunkPos, parent: ChunkStatus },
}

/// Rejected ticket operations. These are programmer errors.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TicketError {
  #[error("ticket type `{0}` can neither load nor simulate chunks")]
  CannotLoad(&'static str),

  #[error("ticket level {level} is above the maximum level {max}")]
  LevelOutOfRange { level: u8, max: u8 },
}

/// Persistence failures.
#[derive(Debug, Error)]
pub enum StorageError {
  #[error("I/O error for chunk {pos}: {source}")]
  Io {
    pos: ChunkPos,
    #[source]
    source: std::io::Error,
  },

  #[error("corrupt data for chunk {pos}: {reason}")]
  Corrupt { pos: ChunkPos, reason: String },
}

/// Configuration loading failures.
#[derive(Debug, Error)]
pub enum ConfigError {
  #[error("failed to read config {path}: {source}")]
  Read {
    path: String,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse config: {0}")]
  Parse(#[from] toml::de::Error),

  #[error("invalid config: {0}")]
  Invalid(String),
}

/// Errors surfaced by the orchestrator's fallible constructors.
#[derive(Debug, Error)]
pub enum PipelineError {
  #[error(transparent)]
  Config(#[from] ConfigError),

  #[error(transparent)]
  Ticket(#[from] TicketError),

  #[error("failed to build worker pool: {0}")]
  WorkerPool(#[from] rayon::ThreadPoolBuildError),
}
