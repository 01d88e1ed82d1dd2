//! Level-bucketed queue of per-chunk task lists.
//!
//! ```text
//!   bucket:   0    1    2   ...  31   32   ...  45
//!             ·    ·    ·        [A]  [B,C]      ·
//!                                 ▲
//!                                top
//! ```
//!
//! Each bucket keeps chunks in first-submission order; each chunk keeps its
//! tasks in submission order. `top` is a lower bound on the first non-empty
//! bucket: it moves down on insert and only steps forward past buckets that
//! have emptied, never rescanning from zero.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use crate::constants::PRIORITY_LEVEL_COUNT;
use crate::types::ChunkPos;

/// All tasks queued for one chunk, popped together.
#[derive(Debug)]
pub struct TasksForChunk<T> {
  pub pos: ChunkPos,
  pub tasks: Vec<T>,
}

struct Bucket<T> {
  entries: FxHashMap<u64, (u64, Vec<T>)>,
  order: BTreeMap<u64, u64>,
}

impl<T> Bucket<T> {
  fn new() -> Self {
    Self {
      entries: FxHashMap::default(),
      order: BTreeMap::new(),
    }
  }

  #[inline]
  fn is_empty(&self) -> bool {
    self.entries.is_empty()
  }

  fn append(&mut self, key: u64, tasks: impl IntoIterator<Item = T>, next_seq: &mut u64) {
    let entry = self.entries.entry(key).or_insert_with(|| {
      let seq = *next_seq;
      *next_seq += 1;
      (seq, Vec::new())
    });
    if entry.1.is_empty() {
      self.order.insert(entry.0, key);
    }
    entry.1.extend(tasks);
  }

  fn remove(&mut self, key: u64) -> Option<Vec<T>> {
    let (seq, tasks) = self.entries.remove(&key)?;
    self.order.remove(&seq);
    Some(tasks)
  }

  fn pop_first(&mut self) -> Option<(u64, Vec<T>)> {
    let (_, key) = self.order.pop_first()?;
    let (_, tasks) = self.entries.remove(&key)?;
    Some((key, tasks))
  }

  fn task_count(&self) -> usize {
    self.entries.values().map(|(_, tasks)| tasks.len()).sum()
  }
}

/// Priority queue used by a chunk task dispatcher.
pub struct ChunkTaskPriorityQueue<T> {
  name: &'static str,
  buckets: Vec<Bucket<T>>,
  top: usize,
  next_seq: u64,
}

impl<T> ChunkTaskPriorityQueue<T> {
  pub const LEVEL_COUNT: usize = PRIORITY_LEVEL_COUNT;

  pub fn new(name: &'static str) -> Self {
    Self {
      name,
      buckets: (0..Self::LEVEL_COUNT).map(|_| Bucket::new()).collect(),
      top: Self::LEVEL_COUNT,
      next_seq: 0,
    }
  }

  #[inline]
  pub fn name(&self) -> &'static str {
    self.name
  }

  #[inline]
  fn bucket_index(level: u8) -> usize {
    (level as usize).min(Self::LEVEL_COUNT - 1)
  }

  #[inline]
  pub fn has_work(&self) -> bool {
    self.top < Self::LEVEL_COUNT
  }

  /// Cached lower bound on the first non-empty bucket.
  #[inline]
  pub fn top_index(&self) -> usize {
    self.top
  }

  /// First non-empty bucket, found by scanning.
  pub fn lowest_non_empty(&self) -> Option<usize> {
    self.buckets.iter().position(|bucket| !bucket.is_empty())
  }

  /// Total queued tasks across all chunks.
  pub fn len(&self) -> usize {
    self.buckets.iter().map(Bucket::task_count).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.lowest_non_empty().is_none()
  }

  pub fn submit(&mut self, task: T, pos: ChunkPos, level: u8) {
    let index = Self::bucket_index(level);
    self.buckets[index].append(pos.pack(), [task], &mut self.next_seq);
    self.top = self.top.min(index);
  }

  /// Move `pos`'s pending tasks from `old_level`'s bucket to `new_level`'s.
  pub fn resort(&mut self, old_level: u8, pos: ChunkPos, new_level: u8) {
    let old = old_level as usize;
    if old >= Self::LEVEL_COUNT {
      return;
    }
    let key = pos.pack();
    let tasks = self.buckets[old].remove(key);
    if old == self.top {
      self.skip_empty();
    }
    if let Some(tasks) = tasks.filter(|tasks| !tasks.is_empty()) {
      let index = Self::bucket_index(new_level);
      self.buckets[index].append(key, tasks, &mut self.next_seq);
      self.top = self.top.min(index);
    }
  }

  /// Forget `pos`. With `clear`, its queued tasks are dropped too.
  pub fn release(&mut self, pos: ChunkPos, clear: bool) {
    let key = pos.pack();
    for bucket in &mut self.buckets {
      let drop_entry = match bucket.entries.get_mut(&key) {
        Some((_, tasks)) => {
          if clear {
            tasks.clear();
          }
          tasks.is_empty()
        }
        None => false,
      };
      if drop_entry {
        bucket.remove(key);
      }
    }
    self.skip_empty();
  }

  /// Take every task of the first chunk in the lowest non-empty bucket.
  pub fn pop(&mut self) -> Option<TasksForChunk<T>> {
    self.skip_empty();
    if !self.has_work() {
      return None;
    }
    let popped = self.buckets[self.top].pop_first();
    self.skip_empty();
    popped.map(|(key, tasks)| TasksForChunk {
      pos: ChunkPos::unpack(key),
      tasks,
    })
  }

  fn skip_empty(&mut self) {
    while self.has_work() && self.buckets[self.top].is_empty() {
      self.top += 1;
    }
  }
}

#[cfg(test)]
#[path = "priority_queue_test.rs"]
mod priority_queue_test;
