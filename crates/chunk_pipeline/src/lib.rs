//! chunk_pipeline - Engine independent chunk streaming and generation pipeline
//!
//! This crate decides which chunks of an unbounded 2-D grid must be resident,
//! how far each must be generated, and in what order the work runs. Demand is
//! expressed as leveled tickets; levels spread outward one per ring, and each
//! chunk's level caps the generation stage it may reach.
//!
//! # Layers
//!
//! - **Propagation**: incremental multi-source distance fields over chunks
//!   and sections
//! - **Tickets**: ticket storage, the loading and simulation fields, and
//!   player-driven tickets with throttling
//! - **Chunk status pipeline**: per-chunk holders with one future per stage,
//!   generation tasks that walk dependency pyramids, and milestone futures
//! - **Dispatch**: level-ordered task queues with optional throttling
//! - **Orchestrator**: [`ChunkMap`] ticks everything on the owner thread
//!
//! Stage work itself, persistence, lighting and milestone consumers are
//! collaborators behind traits ([`StageExecutor`], [`ChunkStorage`],
//! [`LightEngine`], [`ChunkStatusListener`]).
//!
//! # Example
//!
//! ```ignore
//! use chunk_pipeline::{ChunkMap, ChunkPos, ChunkStatus, PipelineConfig};
//!
//! let mut map = ChunkMap::new(PipelineConfig::default())?;
//!
//! // Ask for a fully generated chunk and tick until it arrives
//! let future = map.request_stage(ChunkPos::new(4, -2), ChunkStatus::Full);
//! let chunk = map.run_until(&future, 1_000);
//!
//! println!("{}", map.stats());
//! ```

pub mod constants;
pub mod types;

// Re-export commonly used items
pub use constants::{
  effective_full_status, full_status, generation_status, is_loaded, level_by_full_status,
  level_by_generation_status, BLOCK_TICKING_LEVEL, ENTITY_TICKING_LEVEL, FULL_CHUNK_LEVEL, MAX_LEVEL,
};
pub use types::{ChunkData, ChunkPos, ChunkResult, ChunkStatus, FullChunkStatus, SectionPos};

// Errors and configuration
pub mod config;
pub mod error;
pub use config::PipelineConfig;
pub use error::{ChunkFailure, ConfigError, PipelineError, StageError, StorageError, TicketError};

// Single-assignment futures and the executors that complete them
pub mod completion;
pub mod threading;
pub use completion::Completion;
pub use threading::{ConsecutiveExecutor, Executor, InlineExecutor, Job, MainThreadExecutor, WorkerPool};

// Level propagation engine and distance fields
pub mod propagation;
pub use propagation::{ChunkDistanceField, LevelChange, LevelPropagator, SectionDistanceField};

// Tickets and the distance manager
pub mod tickets;
pub use tickets::{DistanceManager, PlayerId, Ticket, TicketType};

// Priority task dispatch
pub mod dispatch;
pub use dispatch::{ChunkTaskDispatcher, Throttle};

// Per-chunk status pipeline
pub mod chunk;
pub use chunk::{ChunkFuture, ChunkHolder, ChunkPyramid, PassThroughExecutor, StageExecutor};

// Collaborators
pub mod light;
pub mod listener;
pub mod storage;
pub use light::{ImmediateLight, LightEngine};
pub use listener::{ChunkStatusListener, NoopListener, RecordingListener};
pub use storage::{ChunkCodec, ChunkStorage, MemoryStorage};

// Orchestrator and introspection
pub mod chunk_map;
pub mod debug;
pub use chunk_map::{ChunkMap, ChunkMapBuilder};
pub use debug::{ChunkDebugInfo, PipelineStats};

// Engine-agnostic metrics (feature-gated)
pub mod metrics;
pub use metrics::{MetricsSnapshot, PipelineMetrics};
