//! Level constants and the mapping from levels to stages and milestones.
//!
//! # Level Layout
//!
//! ```text
//!  level:  0 ........ 31        32          33         34 ........ 44      45+
//!          │  entity   │  block    │   full    │  generation ring   │ unloaded
//!          │  ticking  │  ticking  │ (visible) │  (partial stages)  │
//!          └───────────┴───────────┴───────────┴────────────────────┴─────────
//! ```
//!
//! A level of `FULL_CHUNK_LEVEL + d` allows generation up to the status a
//! full chunk requires of its neighbours at distance `d`, so a single full
//! chunk drags an 11-ring generation pyramid along with it.

use crate::chunk::pyramid::ChunkPyramid;
use crate::types::{ChunkStatus, FullChunkStatus};

/// Highest level at which a chunk is accessible and fully generated.
pub const FULL_CHUNK_LEVEL: u8 = 33;

/// Highest level at which block ticks run.
pub const BLOCK_TICKING_LEVEL: u8 = 32;

/// Highest level at which entity ticks run.
pub const ENTITY_TICKING_LEVEL: u8 = 31;

/// Rings of partially generated chunks around a full chunk.
pub const RADIUS_AROUND_FULL_CHUNK: u8 = 11;

/// Highest level that keeps a chunk loaded. Anything above is unloaded.
pub const MAX_LEVEL: u8 = FULL_CHUNK_LEVEL + RADIUS_AROUND_FULL_CHUNK;

/// Number of priority buckets in a dispatcher queue.
pub const PRIORITY_LEVEL_COUNT: usize = MAX_LEVEL as usize + 2;

/// Level of the per-chunk tickets issued around players.
pub const PLAYER_TICKET_LEVEL: u8 = ENTITY_TICKING_LEVEL;

/// Radius (in chunks) within which players make chunks eligible for natural spawning.
pub const NATURAL_SPAWN_RADIUS: u8 = 8;

/// Default number of distinct chunks the player ticket throttler lets through at once.
pub const DEFAULT_TICKET_THROTTLE: usize = 4;

#[inline]
pub fn is_loaded(level: u8) -> bool {
  level <= MAX_LEVEL
}

/// Highest stage a chunk at `level` may reach, or `None` if unloaded.
pub fn generation_status(level: u8) -> Option<ChunkStatus> {
  if level <= FULL_CHUNK_LEVEL {
    return Some(ChunkStatus::Full);
  }
  let distance = (level - FULL_CHUNK_LEVEL) as usize;
  ChunkPyramid::generation()
    .step_to(ChunkStatus::Full)
    .accumulated_dependencies
    .get(distance)
}

/// Lowest level that still allows `status`.
pub fn level_by_generation_status(status: ChunkStatus) -> u8 {
  let radius = ChunkPyramid::generation()
    .step_to(ChunkStatus::Full)
    .accumulated_radius_of(status);
  FULL_CHUNK_LEVEL + radius as u8
}

/// Milestone implied by a loading level alone.
pub fn full_status(level: u8) -> FullChunkStatus {
  if level <= ENTITY_TICKING_LEVEL {
    FullChunkStatus::EntityTicking
  } else if level <= BLOCK_TICKING_LEVEL {
    FullChunkStatus::BlockTicking
  } else if level <= FULL_CHUNK_LEVEL {
    FullChunkStatus::Full
  } else {
    FullChunkStatus::Inaccessible
  }
}

/// Milestone for a chunk given both fields.
///
/// Loading decides visibility; the simulation field caps how much of that
/// visible chunk may tick.
pub fn effective_full_status(loading_level: u8, simulation_level: u8) -> FullChunkStatus {
  let cap = full_status(simulation_level).max(FullChunkStatus::Full);
  full_status(loading_level).min(cap)
}

/// Highest level with the given milestone.
pub fn level_by_full_status(status: FullChunkStatus) -> u8 {
  match status {
    FullChunkStatus::Inaccessible => MAX_LEVEL,
    FullChunkStatus::Full => FULL_CHUNK_LEVEL,
    FullChunkStatus::BlockTicking => BLOCK_TICKING_LEVEL,
    FullChunkStatus::EntityTicking => ENTITY_TICKING_LEVEL,
  }
}

#[cfg(test)]
#[path = "constants_test.rs"]
mod constants_test;
