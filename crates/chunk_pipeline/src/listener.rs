//! Milestone notifications.

use parking_lot::Mutex;

use crate::types::{ChunkPos, FullChunkStatus};

/// Told whenever a chunk's visible milestone changes. Runs on the main thread.
pub trait ChunkStatusListener: Send + Sync + 'static {
  fn on_full_status_change(&self, pos: ChunkPos, status: FullChunkStatus);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoopListener;

impl ChunkStatusListener for NoopListener {
  fn on_full_status_change(&self, _pos: ChunkPos, _status: FullChunkStatus) {}
}

/// Keeps every notification in arrival order.
#[derive(Default)]
pub struct RecordingListener {
  events: Mutex<Vec<(ChunkPos, FullChunkStatus)>>,
}

impl RecordingListener {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn events(&self) -> Vec<(ChunkPos, FullChunkStatus)> {
    self.events.lock().clone()
  }

  pub fn take(&self) -> Vec<(ChunkPos, FullChunkStatus)> {
    std::mem::take(&mut *self.events.lock())
  }

  /// Most recent status reported for `pos`.
  pub fn last_status(&self, pos: ChunkPos) -> Option<FullChunkStatus> {
    self
      .events
      .lock()
      .iter()
      .rev()
      .find(|(p, _)| *p == pos)
      .map(|(_, status)| *status)
  }
}

impl ChunkStatusListener for RecordingListener {
  fn on_full_status_change(&self, pos: ChunkPos, status: FullChunkStatus) {
    self.events.lock().push((pos, status));
  }
}
