//! Single-flow task dispatcher over a [`ChunkTaskPriorityQueue`].
//!
//! ```text
//!   submit / on_level_change / release
//!                 │
//!                 ▼
//!        ┌─────────────────┐   pop (gate admits)   ┌────────────────┐
//!        │ mailbox (serial)│ ─────────────────────▶│ target executor│
//!        │  queue + gate   │ ◀──── all done: poll ──│  tasks of cell │
//!        └─────────────────┘                       └────────────────┘
//!          empty or gated: sleep until the next submit / release
//! ```
//!
//! Every queue mutation runs as a job on a [`ConsecutiveExecutor`], so the
//! queue never sees two writers. The tasks of one popped chunk run
//! concurrently on the target executor; the next chunk is popped only once
//! all of them have returned.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashSet;
use tracing::trace;

use super::priority_queue::{ChunkTaskPriorityQueue, TasksForChunk};
use crate::constants::DEFAULT_TICKET_THROTTLE;
use crate::threading::{ConsecutiveExecutor, Executor, Job};
use crate::types::ChunkPos;

// =============================================================================
// Execution gates
// =============================================================================

/// Admission policy deciding whether another chunk may start executing.
pub trait ExecutionGate: Send + 'static {
  fn admits(&self) -> bool;

  /// `pos` was popped and its tasks are about to run.
  fn on_execute(&mut self, pos: ChunkPos);

  /// `pos` was released by its owner.
  fn on_release(&mut self, pos: ChunkPos);

  /// Distinct chunks currently holding a slot.
  fn in_execution(&self) -> usize;
}

/// No admission limit.
#[derive(Clone, Copy, Debug, Default)]
pub struct Unthrottled;

impl ExecutionGate for Unthrottled {
  #[inline]
  fn admits(&self) -> bool {
    true
  }

  fn on_execute(&mut self, _pos: ChunkPos) {}

  fn on_release(&mut self, _pos: ChunkPos) {}

  #[inline]
  fn in_execution(&self) -> usize {
    0
  }
}

/// At most `limit` distinct chunks hold a slot; a slot is freed by `release`.
#[derive(Debug)]
pub struct Throttle {
  limit: usize,
  in_execution: FxHashSet<ChunkPos>,
}

impl Throttle {
  pub fn new(limit: usize) -> Self {
    Self {
      limit: limit.max(1),
      in_execution: FxHashSet::default(),
    }
  }

  #[inline]
  pub fn limit(&self) -> usize {
    self.limit
  }
}

impl Default for Throttle {
  fn default() -> Self {
    Self::new(DEFAULT_TICKET_THROTTLE)
  }
}

impl ExecutionGate for Throttle {
  #[inline]
  fn admits(&self) -> bool {
    self.in_execution.len() < self.limit
  }

  fn on_execute(&mut self, pos: ChunkPos) {
    self.in_execution.insert(pos);
  }

  fn on_release(&mut self, pos: ChunkPos) {
    self.in_execution.remove(&pos);
  }

  #[inline]
  fn in_execution(&self) -> usize {
    self.in_execution.len()
  }
}

// =============================================================================
// ChunkTaskDispatcher
// =============================================================================

struct DispatchState<G> {
  queue: ChunkTaskPriorityQueue<Job>,
  gate: G,
  sleeping: bool,
}

struct DispatcherInner<G> {
  name: &'static str,
  state: Mutex<DispatchState<G>>,
  mailbox: ConsecutiveExecutor,
  target: Arc<dyn Executor>,
  running: AtomicUsize,
}

/// Priority dispatcher feeding one target executor, one chunk at a time.
pub struct ChunkTaskDispatcher<G: ExecutionGate = Unthrottled> {
  inner: Arc<DispatcherInner<G>>,
}

impl<G: ExecutionGate> Clone for ChunkTaskDispatcher<G> {
  fn clone(&self) -> Self {
    Self {
      inner: Arc::clone(&self.inner),
    }
  }
}

impl ChunkTaskDispatcher<Unthrottled> {
  /// Unthrottled dispatcher running tasks on `target`, deciding on `mailbox_on`.
  pub fn new(
    name: &'static str,
    target: Arc<dyn Executor>,
    mailbox_on: Arc<dyn Executor>,
  ) -> Self {
    Self::with_gate(name, Unthrottled, target, mailbox_on)
  }
}

impl ChunkTaskDispatcher<Throttle> {
  /// Dispatcher that keeps at most `limit` distinct chunks in execution.
  pub fn throttled(
    name: &'static str,
    limit: usize,
    target: Arc<dyn Executor>,
    mailbox_on: Arc<dyn Executor>,
  ) -> Self {
    Self::with_gate(name, Throttle::new(limit), target, mailbox_on)
  }
}

impl<G: ExecutionGate> ChunkTaskDispatcher<G> {
  pub fn with_gate(
    name: &'static str,
    gate: G,
    target: Arc<dyn Executor>,
    mailbox_on: Arc<dyn Executor>,
  ) -> Self {
    Self {
      inner: Arc::new(DispatcherInner {
        name,
        state: Mutex::new(DispatchState {
          queue: ChunkTaskPriorityQueue::new(name),
          gate,
          sleeping: true,
        }),
        mailbox: ConsecutiveExecutor::new(name, mailbox_on),
        target,
        running: AtomicUsize::new(0),
      }),
    }
  }

  #[inline]
  pub fn name(&self) -> &'static str {
    self.inner.name
  }

  /// Queue `task` for `pos`. `level` is read on the mailbox, not here.
  pub fn submit(
    &self,
    task: impl FnOnce() + Send + 'static,
    pos: ChunkPos,
    level: impl FnOnce() -> u8 + Send + 'static,
  ) {
    let inner = Arc::clone(&self.inner);
    let task: Job = Box::new(task);
    self.inner.mailbox.execute(Box::new(move || {
      let level = level();
      let wake = {
        let mut state = inner.state.lock();
        state.queue.submit(task, pos, level);
        std::mem::replace(&mut state.sleeping, false)
      };
      if wake {
        inner.poll();
      }
    }));
  }

  /// Move `pos`'s queued tasks to the bucket for `new_level`, then report it.
  pub fn on_level_change(
    &self,
    pos: ChunkPos,
    old_level: impl FnOnce() -> u8 + Send + 'static,
    new_level: u8,
    set_queue_level: impl FnOnce(u8) + Send + 'static,
  ) {
    let inner = Arc::clone(&self.inner);
    self.inner.mailbox.execute(Box::new(move || {
      let old = old_level();
      inner.state.lock().queue.resort(old, pos, new_level);
      set_queue_level(new_level);
    }));
  }

  /// Free `pos`'s execution slot, optionally dropping its queued tasks.
  pub fn release(
    &self,
    pos: ChunkPos,
    on_released: impl FnOnce() + Send + 'static,
    clear_queued: bool,
  ) {
    let inner = Arc::clone(&self.inner);
    self.inner.mailbox.execute(Box::new(move || {
      let wake = {
        let mut state = inner.state.lock();
        state.queue.release(pos, clear_queued);
        state.gate.on_release(pos);
        std::mem::replace(&mut state.sleeping, false)
      };
      if wake {
        inner.poll();
      }
      on_released();
    }));
  }

  /// Tasks still waiting in the queue.
  pub fn queued_task_count(&self) -> usize {
    self.inner.state.lock().queue.len()
  }

  /// Chunks holding an execution slot (always 0 when unthrottled).
  pub fn in_execution_count(&self) -> usize {
    self.inner.state.lock().gate.in_execution()
  }

  /// Tasks handed to the target executor and not yet returned.
  pub fn running_task_count(&self) -> usize {
    self.inner.running.load(Ordering::Acquire)
  }

  pub fn is_sleeping(&self) -> bool {
    self.inner.state.lock().sleeping
  }
}

impl<G: ExecutionGate> DispatcherInner<G> {
  /// Pop the next chunk if the gate allows. Must run on the mailbox.
  fn poll(self: &Arc<Self>) {
    let popped = {
      let mut state = self.state.lock();
      let next = if state.gate.admits() {
        state.queue.pop()
      } else {
        None
      };
      match next {
        Some(batch) => {
          state.gate.on_execute(batch.pos);
          Some(batch)
        }
        None => {
          state.sleeping = true;
          None
        }
      }
    };
    if let Some(batch) = popped {
      self.schedule_for_execution(batch);
    }
  }

  fn schedule_poll(self: &Arc<Self>) {
    let this = Arc::clone(self);
    self.mailbox.execute(Box::new(move || this.poll()));
  }

  fn schedule_for_execution(self: &Arc<Self>, batch: TasksForChunk<Job>) {
    let count = batch.tasks.len();
    trace!(dispatcher = self.name, pos = %batch.pos, tasks = count, "executing");
    if count == 0 {
      self.schedule_poll();
      return;
    }

    let remaining = Arc::new(AtomicUsize::new(count));
    self.running.fetch_add(count, Ordering::AcqRel);
    for task in batch.tasks {
      let finished = TaskFinished {
        inner: Arc::clone(self),
        remaining: Arc::clone(&remaining),
      };
      self.target.execute(Box::new(move || {
        let _finished = finished;
        task();
      }));
    }
  }
}

/// Accounts for one task of a popped batch when dropped, so a panicking task
/// still frees its running slot and the last one re-polls the mailbox.
struct TaskFinished<G: ExecutionGate> {
  inner: Arc<DispatcherInner<G>>,
  remaining: Arc<AtomicUsize>,
}

impl<G: ExecutionGate> Drop for TaskFinished<G> {
  fn drop(&mut self) {
    self.inner.running.fetch_sub(1, Ordering::AcqRel);
    if self.remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
      self.inner.schedule_poll();
    }
  }
}

impl<G: ExecutionGate> fmt::Debug for ChunkTaskDispatcher<G> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let state = self.inner.state.lock();
    f.debug_struct("ChunkTaskDispatcher")
      .field("name", &self.inner.name)
      .field("queued", &state.queue.len())
      .field("in_execution", &state.gate.in_execution())
      .field("sleeping", &state.sleeping)
      .finish()
  }
}

#[cfg(test)]
#[path = "dispatcher_test.rs"]
mod dispatcher_test;
