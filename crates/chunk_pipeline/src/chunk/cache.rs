//! Fixed square window of values around a centre chunk.
//!
//! ```text
//!   radius 1:   (-1,-1) (0,-1) (1,-1)      index = (dz + r) * size + (dx + r)
//!               (-1, 0) (0, 0) (1, 0)      size  = 2r + 1
//!               (-1, 1) (0, 1) (1, 1)
//! ```
//!
//! Built once, read-only afterwards. Generation tasks keep their holder
//! window in one; stage executors see their neighbour chunks through one.

use std::fmt;

use crate::types::ChunkPos;

pub struct StaticCache2D<T> {
  center: ChunkPos,
  radius: i32,
  size: i32,
  cells: Vec<T>,
}

impl<T> StaticCache2D<T> {
  /// Fill every cell within `radius` of `center` with `factory(pos)`.
  pub fn create(center: ChunkPos, radius: usize, factory: impl FnMut(ChunkPos) -> T) -> Self {
    let radius = radius as i32;
    let cells: Vec<T> = center.square_around(radius).map(factory).collect();
    Self {
      center,
      radius,
      size: 2 * radius + 1,
      cells,
    }
  }

  #[inline]
  pub fn center(&self) -> ChunkPos {
    self.center
  }

  #[inline]
  pub fn radius(&self) -> usize {
    self.radius as usize
  }

  #[inline]
  pub fn contains(&self, pos: ChunkPos) -> bool {
    self.center.chebyshev_distance(pos) <= self.radius as u32
  }

  #[inline]
  fn index(&self, pos: ChunkPos) -> Option<usize> {
    if !self.contains(pos) {
      return None;
    }
    let dx = pos.x - self.center.x + self.radius;
    let dz = pos.z - self.center.z + self.radius;
    Some((dz * self.size + dx) as usize)
  }

  pub fn get(&self, pos: ChunkPos) -> Option<&T> {
    self.index(pos).map(|i| &self.cells[i])
  }

  /// The value at the centre.
  pub fn center_value(&self) -> &T {
    let index = self.cells.len() / 2;
    &self.cells[index]
  }

  pub fn len(&self) -> usize {
    self.cells.len()
  }

  pub fn is_empty(&self) -> bool {
    self.cells.is_empty()
  }

  /// Every cell with its position, row by row.
  pub fn iter(&self) -> impl Iterator<Item = (ChunkPos, &T)> {
    self.center.square_around(self.radius).zip(self.cells.iter())
  }

  pub fn values(&self) -> impl Iterator<Item = &T> {
    self.cells.iter()
  }
}

impl<T> fmt::Debug for StaticCache2D<T> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("StaticCache2D")
      .field("center", &self.center)
      .field("radius", &self.radius)
      .finish()
  }
}
