//! GenerationTask - drives one cell to a target status, layer by layer.
//!
//! ```text
//!   Empty (load, small radius)
//!     │  every neighbour persisted far enough?  ── yes ──▶ loading pyramid
//!     │                                          no
//!     ▼
//!   Empty again (generation radius) ──▶ StructureStarts ──▶ ... ──▶ target
//! ```
//!
//! Each layer applies the step for one status to every cell within that
//! status' accumulated radius, then waits for all of them. A task never
//! blocks: [`GenerationTask::run_until_wait`] returns the future it is stuck
//! on and the context resubmits the task once it settles.
//!
//! On creation the task claims every cell in its worst-case window; the claim
//! is released exactly once, when the task finishes or notices cancellation.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use super::cache::StaticCache2D;
use super::context::GenerationContext;
use super::holder::{ChunkFuture, ChunkHolder};
use super::step_executor::PyramidKind;
use crate::types::{ChunkPos, ChunkStatus};

/// Cooperative cancellation flag shared between a task and whoever replaced it.
#[derive(Clone, Debug, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
  pub fn new() -> Self {
    Self::default()
  }

  #[inline]
  pub fn cancel(&self) {
    self.0.store(true, Ordering::Release);
  }

  #[inline]
  pub fn is_cancelled(&self) -> bool {
    self.0.load(Ordering::Acquire)
  }
}

struct TaskState {
  scheduled_status: Option<ChunkStatus>,
  needs_generation: bool,
  scheduled_layer: Vec<ChunkFuture>,
}

pub struct GenerationTask {
  pos: ChunkPos,
  target: ChunkStatus,
  ctx: Arc<GenerationContext>,
  cache: Arc<StaticCache2D<Arc<ChunkHolder>>>,
  cancel: CancellationToken,
  state: Mutex<TaskState>,
  released: AtomicBool,
}

impl GenerationTask {
  /// `cache` must already hold one claim per cell.
  pub(crate) fn new(
    pos: ChunkPos,
    target: ChunkStatus,
    ctx: Arc<GenerationContext>,
    cache: StaticCache2D<Arc<ChunkHolder>>,
  ) -> Self {
    Self {
      pos,
      target,
      ctx,
      cache: Arc::new(cache),
      cancel: CancellationToken::new(),
      state: Mutex::new(TaskState {
        scheduled_status: None,
        needs_generation: false,
        scheduled_layer: Vec::new(),
      }),
      released: AtomicBool::new(false),
    }
  }

  #[inline]
  pub fn pos(&self) -> ChunkPos {
    self.pos
  }

  #[inline]
  pub fn target(&self) -> ChunkStatus {
    self.target
  }

  pub fn center(&self) -> &Arc<ChunkHolder> {
    self.cache.center_value()
  }

  pub fn mark_for_cancellation(&self) {
    self.cancel.cancel();
  }

  pub fn is_cancelled(&self) -> bool {
    self.cancel.is_cancelled()
  }

  pub fn is_released(&self) -> bool {
    self.released.load(Ordering::Acquire)
  }

  /// Advance as far as possible without blocking.
  ///
  /// Returns the future the task is waiting on, or `None` once it has
  /// finished (reached its target or was cancelled) and released its claim.
  pub fn run_until_wait(self: &Arc<Self>) -> Option<ChunkFuture> {
    let mut state = self.state.lock();
    loop {
      if let Some(waiting) = self.wait_for_scheduled_layer(&mut state) {
        return Some(waiting);
      }
      if self.is_cancelled() || state.scheduled_status == Some(self.target) {
        drop(state);
        self.release_claim();
        return None;
      }
      self.schedule_next_layer(&mut state);
    }
  }

  fn wait_for_scheduled_layer(&self, state: &mut TaskState) -> Option<ChunkFuture> {
    while let Some(last) = state.scheduled_layer.last() {
      match last.get_now() {
        None => return Some(Arc::clone(last)),
        Some(result) => {
          state.scheduled_layer.pop();
          if result.is_err() {
            self.mark_for_cancellation();
          }
        }
      }
    }
    None
  }

  fn schedule_next_layer(self: &Arc<Self>, state: &mut TaskState) {
    let next = match state.scheduled_status {
      None => ChunkStatus::Empty,
      Some(ChunkStatus::Empty) if !state.needs_generation && !self.can_load_without_generation() => {
        state.needs_generation = true;
        ChunkStatus::Empty
      }
      Some(current) => match current.next() {
        Some(next) => next,
        None => unreachable!("task for {} scheduled past Full", self.pos),
      },
    };
    trace!(pos = %self.pos, status = %next, generate = state.needs_generation, "schedule layer");
    self.schedule_layer(state, next);
    state.scheduled_status = Some(next);
  }

  /// Whether storage alone can bring the window to the target.
  fn can_load_without_generation(&self) -> bool {
    if self.target == ChunkStatus::Empty {
      return true;
    }
    let center_persisted = self.center().persisted_status();
    if !center_persisted.is_some_and(|persisted| persisted >= self.target) {
      return false;
    }
    let dependencies = &self
      .ctx
      .stages()
      .loading_pyramid()
      .step_to(self.target)
      .accumulated_dependencies;
    self.pos.square_around(dependencies.radius() as i32).all(|pos| {
      let distance = self.pos.chebyshev_distance(pos) as usize;
      let (Some(required), Some(holder)) = (dependencies.get(distance), self.cache.get(pos)) else {
        return false;
      };
      holder.persisted_status().is_some_and(|persisted| persisted >= required)
    })
  }

  fn radius_for_layer(&self, status: ChunkStatus, needs_generation: bool) -> usize {
    let kind = if needs_generation {
      PyramidKind::Generation
    } else {
      PyramidKind::Loading
    };
    self
      .ctx
      .pyramid(kind)
      .step_to(self.target)
      .accumulated_radius_of(status)
  }

  fn schedule_layer(self: &Arc<Self>, state: &mut TaskState, status: ChunkStatus) {
    let radius = self.radius_for_layer(status, state.needs_generation);
    for pos in self.pos.square_around(radius as i32) {
      let Some(holder) = self.cache.get(pos) else {
        panic!("{pos} outside the claimed window of the task for {}", self.pos);
      };
      if self.is_cancelled() || !self.schedule_chunk_in_layer(state, status, holder) {
        return;
      }
    }
  }

  fn schedule_chunk_in_layer(&self, state: &mut TaskState, status: ChunkStatus, holder: &Arc<ChunkHolder>) -> bool {
    let generate = holder.persisted_status().is_some_and(|persisted| status > persisted);
    if generate && !state.needs_generation {
      panic!(
        "chunk {} needs {status} generated but the task for {} expected to load only",
        holder.pos(),
        self.pos
      );
    }
    let kind = if generate {
      PyramidKind::Generation
    } else {
      PyramidKind::Loading
    };
    let future = holder.apply_step(status, kind, &self.ctx, &self.cache);
    match future.get_now() {
      None => {
        state.scheduled_layer.push(future);
        true
      }
      Some(Ok(_)) => true,
      Some(Err(_)) => {
        self.mark_for_cancellation();
        false
      }
    }
  }

  fn release_claim(self: &Arc<Self>) {
    if self.released.swap(true, Ordering::AcqRel) {
      return;
    }
    self.center().remove_task(self);
    for holder in self.cache.values() {
      holder.decrease_generation_ref_count();
    }
    trace!(pos = %self.pos, target = %self.target, cancelled = self.is_cancelled(), "released claim");
  }
}

impl fmt::Debug for GenerationTask {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GenerationTask")
      .field("pos", &self.pos)
      .field("target", &self.target)
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}
