//! Light engine seam.
//!
//! The pipeline tells the light engine when a chunk reaches a stage and asks it
//! when a chunk's lighting has settled. A chunk only becomes `Full`-visible
//! after both stage `Full` and light readiness.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::completion::Completion;
use crate::types::{ChunkPos, ChunkStatus};

pub trait LightEngine: Send + Sync + 'static {
  /// Called on the worker thread right after a step for `pos` succeeded.
  fn on_status_reached(&self, pos: ChunkPos, status: ChunkStatus);

  /// Completes once lighting for `pos` is ready to be shown.
  fn light_ready(&self, pos: ChunkPos) -> Arc<Completion<()>>;
}

/// Lighting that is always ready.
#[derive(Default)]
pub struct ImmediateLight {
  notifications: AtomicUsize,
}

impl ImmediateLight {
  pub fn new() -> Self {
    Self::default()
  }

  /// Status notifications received so far.
  pub fn notification_count(&self) -> usize {
    self.notifications.load(Ordering::Acquire)
  }
}

impl LightEngine for ImmediateLight {
  fn on_status_reached(&self, _pos: ChunkPos, _status: ChunkStatus) {
    self.notifications.fetch_add(1, Ordering::AcqRel);
  }

  fn light_ready(&self, _pos: ChunkPos) -> Arc<Completion<()>> {
    Arc::new(Completion::completed(()))
  }
}

/// Lighting that only becomes ready when released by hand.
///
/// Useful for holding chunks just below `Full` visibility.
#[derive(Default)]
pub struct GatedLight {
  gates: Mutex<FxHashMap<ChunkPos, Arc<Completion<()>>>>,
}

impl GatedLight {
  pub fn new() -> Self {
    Self::default()
  }

  fn gate(&self, pos: ChunkPos) -> Arc<Completion<()>> {
    Arc::clone(self.gates.lock().entry(pos).or_insert_with(|| Arc::new(Completion::new())))
  }

  /// Mark lighting for `pos` as ready.
  pub fn open(&self, pos: ChunkPos) {
    self.gate(pos).complete(());
  }
}

impl LightEngine for GatedLight {
  fn on_status_reached(&self, _pos: ChunkPos, _status: ChunkStatus) {}

  fn light_ready(&self, pos: ChunkPos) -> Arc<Completion<()>> {
    self.gate(pos)
  }
}
