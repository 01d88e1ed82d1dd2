//! Core value types shared by every pipeline stage.
//!
//! ```text
//!   ChunkPos (2-D, packed u64)          SectionPos (3-D, packed u64)
//!   ┌──────────────┬──────────────┐     ┌────────┬────────┬───────┐
//!   │   z (i32)    │   x (i32)    │     │ x (22) │ z (22) │ y (20)│
//!   └──────────────┴──────────────┘     └────────┴────────┴───────┘
//!    bit 63     32  31          0        63   42  41   20  19   0
//! ```
//!
//! Packed keys are what the propagation engine and the dispatcher queues store;
//! the structured forms are used everywhere else.

use std::fmt;
use std::sync::Arc;

use glam::{IVec2, IVec3};

use crate::error::ChunkFailure;

// =============================================================================
// ChunkPos - 2-D cell key
// =============================================================================

/// Position of a chunk column on the horizontal grid.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkPos {
  pub x: i32,
  pub z: i32,
}

impl ChunkPos {
  pub const ZERO: Self = Self::new(0, 0);

  #[inline]
  pub const fn new(x: i32, z: i32) -> Self {
    Self { x, z }
  }

  /// Pack into a single integer key (x in the low half, z in the high half).
  #[inline]
  pub const fn pack(self) -> u64 {
    (self.x as u32 as u64) | ((self.z as u32 as u64) << 32)
  }

  /// Inverse of [`ChunkPos::pack`].
  #[inline]
  pub const fn unpack(key: u64) -> Self {
    Self {
      x: key as u32 as i32,
      z: (key >> 32) as u32 as i32,
    }
  }

  #[inline]
  pub const fn offset(self, dx: i32, dz: i32) -> Self {
    Self::new(self.x + dx, self.z + dz)
  }

  /// Chessboard distance, the metric used by every dependency radius.
  #[inline]
  pub fn chebyshev_distance(self, other: Self) -> u32 {
    self.x.abs_diff(other.x).max(self.z.abs_diff(other.z))
  }

  /// All positions within `radius` (inclusive), row by row.
  pub fn square_around(self, radius: i32) -> impl Iterator<Item = ChunkPos> {
    (-radius..=radius).flat_map(move |dz| (-radius..=radius).map(move |dx| self.offset(dx, dz)))
  }
}

impl From<IVec2> for ChunkPos {
  #[inline]
  fn from(v: IVec2) -> Self {
    Self::new(v.x, v.y)
  }
}

impl From<ChunkPos> for IVec2 {
  #[inline]
  fn from(pos: ChunkPos) -> Self {
    IVec2::new(pos.x, pos.z)
  }
}

impl From<(i32, i32)> for ChunkPos {
  #[inline]
  fn from((x, z): (i32, i32)) -> Self {
    Self::new(x, z)
  }
}

impl fmt::Debug for ChunkPos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}, {}]", self.x, self.z)
  }
}

impl fmt::Display for ChunkPos {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{}, {}]", self.x, self.z)
  }
}

// =============================================================================
// SectionPos - 3-D cell key
// =============================================================================

/// Position of a 16³ section. `x`/`z` are chunk coordinates, `y` the section row.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct SectionPos {
  pub x: i32,
  pub y: i32,
  pub z: i32,
}

impl SectionPos {
  const X_BITS: u32 = 22;
  const Z_BITS: u32 = 22;
  const Y_BITS: u32 = 20;
  const Y_OFFSET: u32 = 0;
  const Z_OFFSET: u32 = Self::Y_BITS;
  const X_OFFSET: u32 = Self::Y_BITS + Self::Z_BITS;

  #[inline]
  pub const fn new(x: i32, y: i32, z: i32) -> Self {
    Self { x, y, z }
  }

  pub const fn pack(self) -> u64 {
    let x = (self.x as i64 as u64) & ((1 << Self::X_BITS) - 1);
    let y = (self.y as i64 as u64) & ((1 << Self::Y_BITS) - 1);
    let z = (self.z as i64 as u64) & ((1 << Self::Z_BITS) - 1);
    (x << Self::X_OFFSET) | (z << Self::Z_OFFSET) | (y << Self::Y_OFFSET)
  }

  pub const fn unpack(key: u64) -> Self {
    let key = key as i64;
    Self {
      x: (key >> Self::X_OFFSET) as i32,
      y: ((key << (64 - Self::Y_BITS)) >> (64 - Self::Y_BITS)) as i32,
      z: ((key << (64 - Self::X_OFFSET)) >> (64 - Self::Z_BITS)) as i32,
    }
  }

  #[inline]
  pub const fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
    Self::new(self.x + dx, self.y + dy, self.z + dz)
  }

  /// The chunk column containing this section.
  #[inline]
  pub const fn chunk(self) -> ChunkPos {
    ChunkPos::new(self.x, self.z)
  }

  #[inline]
  pub fn chebyshev_distance(self, other: Self) -> u32 {
    self
      .x
      .abs_diff(other.x)
      .max(self.y.abs_diff(other.y))
      .max(self.z.abs_diff(other.z))
  }
}

impl From<IVec3> for SectionPos {
  #[inline]
  fn from(v: IVec3) -> Self {
    Self::new(v.x, v.y, v.z)
  }
}

impl From<SectionPos> for IVec3 {
  #[inline]
  fn from(pos: SectionPos) -> Self {
    IVec3::new(pos.x, pos.y, pos.z)
  }
}

// =============================================================================
// ChunkStatus - ordered generation stages
// =============================================================================

/// One step of the ordered generation sequence.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChunkStatus {
  Empty = 0,
  StructureStarts,
  StructureReferences,
  Biomes,
  Noise,
  Surface,
  Carvers,
  Features,
  InitializeLight,
  Light,
  Spawn,
  Full,
}

impl ChunkStatus {
  /// Number of stages.
  pub const COUNT: usize = 12;

  /// Every stage, in order.
  pub const ALL: [ChunkStatus; Self::COUNT] = [
    Self::Empty,
    Self::StructureStarts,
    Self::StructureReferences,
    Self::Biomes,
    Self::Noise,
    Self::Surface,
    Self::Carvers,
    Self::Features,
    Self::InitializeLight,
    Self::Light,
    Self::Spawn,
    Self::Full,
  ];

  #[inline]
  pub const fn index(self) -> usize {
    self as usize
  }

  #[inline]
  pub fn from_index(index: usize) -> Option<Self> {
    Self::ALL.get(index).copied()
  }

  /// Immediate predecessor. `Empty` is its own parent.
  #[inline]
  pub fn parent(self) -> Self {
    match self {
      Self::Empty => Self::Empty,
      other => Self::ALL[other.index() - 1],
    }
  }

  #[inline]
  pub fn next(self) -> Option<Self> {
    Self::from_index(self.index() + 1)
  }

  #[inline]
  pub fn is_or_after(self, other: Self) -> bool {
    self >= other
  }

  pub const fn name(self) -> &'static str {
    match self {
      Self::Empty => "empty",
      Self::StructureStarts => "structure_starts",
      Self::StructureReferences => "structure_references",
      Self::Biomes => "biomes",
      Self::Noise => "noise",
      Self::Surface => "surface",
      Self::Carvers => "carvers",
      Self::Features => "features",
      Self::InitializeLight => "initialize_light",
      Self::Light => "light",
      Self::Spawn => "spawn",
      Self::Full => "full",
    }
  }

  pub fn from_name(name: &str) -> Option<Self> {
    Self::ALL.into_iter().find(|status| status.name() == name)
  }

  /// Encode an optional status in one byte (used by atomics).
  #[inline]
  pub(crate) const fn encode(status: Option<Self>) -> u8 {
    match status {
      Some(status) => status as u8,
      None => u8::MAX,
    }
  }

  #[inline]
  pub(crate) fn decode(raw: u8) -> Option<Self> {
    Self::from_index(raw as usize)
  }
}

impl fmt::Display for ChunkStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.name())
  }
}

// =============================================================================
// FullChunkStatus - externally visible milestones
// =============================================================================

/// Coarse readiness tier derived from levels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FullChunkStatus {
  /// Loaded for generation only; not visible.
  Inaccessible,
  /// Fully generated and visible.
  Full,
  /// Visible and receives block ticks.
  BlockTicking,
  /// Visible, block ticks and entity ticks.
  EntityTicking,
}

impl FullChunkStatus {
  #[inline]
  pub fn is_or_after(self, other: Self) -> bool {
    self >= other
  }
}

// =============================================================================
// ChunkData - opaque chunk contents
// =============================================================================

/// Chunk contents as seen by the pipeline.
///
/// What a stage writes into `payload` is the stage executor's business; the
/// pipeline only tracks the status the data has reached.
#[derive(Clone, PartialEq, Eq)]
pub struct ChunkData {
  pub pos: ChunkPos,
  pub status: ChunkStatus,
  pub payload: Vec<u8>,
}

impl ChunkData {
  /// A freshly created chunk with nothing generated yet.
  pub fn empty(pos: ChunkPos) -> Self {
    Self {
      pos,
      status: ChunkStatus::Empty,
      payload: Vec::new(),
    }
  }

  /// Copy of this chunk advanced to `status`.
  pub fn advanced_to(&self, status: ChunkStatus) -> Self {
    Self {
      pos: self.pos,
      status: status.max(self.status),
      payload: self.payload.clone(),
    }
  }
}

impl fmt::Debug for ChunkData {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChunkData")
      .field("pos", &self.pos)
      .field("status", &self.status)
      .field("payload_len", &self.payload.len())
      .finish()
  }
}

/// Outcome carried by every stage future.
pub type ChunkResult = Result<Arc<ChunkData>, ChunkFailure>;

#[cfg(test)]
#[path = "types_test.rs"]
mod types_test;
