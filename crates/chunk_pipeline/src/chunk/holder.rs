//! ChunkHolder - the per-cell record shared by the orchestrator, generation
//! tasks and stage steps.
//!
//! # State
//!
//! ```text
//!   futures[status]   lazily created stage futures, replaced only by CAS
//!   started_work      highest status whose step has been launched
//!   highest_allowed   ceiling derived from the loading level (None = unloaded)
//!   persisted         highest status present in the chunk data
//!   task              generation task centred on this cell, if any
//!   generation_refs   live tasks whose window covers this cell
//! ```
//!
//! A future slot goes `None -> pending -> done`. A pending future that falls
//! above the ceiling is failed with [`ChunkFailure::Unloaded`] and its slot
//! cleared, so a later request starts over. Successful and stage-failed
//! futures stay in their slot.
//!
//! All mutation happens through atomics and CAS so worker threads can complete
//! stages while the main thread moves the ceiling.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, LazyLock};

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;

use super::cache::StaticCache2D;
use super::context::{GeneratingChunkMap, GenerationContext};
use super::full_status::Milestones;
use super::generation_task::GenerationTask;
use super::step_executor::PyramidKind;
use crate::completion::Completion;
use crate::constants::generation_status;
use crate::error::ChunkFailure;
use crate::tickets::LOADING_CEILING;
use crate::types::{ChunkData, ChunkPos, ChunkResult, ChunkStatus};

/// Shared handle to a stage result.
pub type ChunkFuture = Arc<Completion<ChunkResult>>;

static UNLOADED: LazyLock<ChunkFuture> =
  LazyLock::new(|| Arc::new(Completion::completed(Err(ChunkFailure::Unloaded))));

/// The shared, already failed future handed out for disallowed stages.
pub fn unloaded_future() -> ChunkFuture {
  Arc::clone(&UNLOADED)
}

#[inline]
fn same<T>(a: &Option<Arc<T>>, b: &Option<Arc<T>>) -> bool {
  match (a, b) {
    (Some(a), Some(b)) => Arc::ptr_eq(a, b),
    (None, None) => true,
    _ => false,
  }
}

/// Replace `current` with `new` in `slot`. Returns whether the swap happened.
#[inline]
pub(crate) fn cas_option<T>(slot: &ArcSwapOption<T>, current: &Option<Arc<T>>, new: Option<Arc<T>>) -> bool {
  let previous = slot.compare_and_swap(current, new);
  same(&*previous, current)
}

pub struct ChunkHolder {
  pos: ChunkPos,
  futures: [ArcSwapOption<Completion<ChunkResult>>; ChunkStatus::COUNT],
  started_work: AtomicU8,
  highest_allowed: AtomicU8,
  persisted: AtomicU8,

  ticket_level: AtomicU8,
  queue_level: AtomicU8,
  simulation_level: AtomicU8,

  task: ArcSwapOption<GenerationTask>,
  generation_refs: AtomicUsize,
  generation_sync: Mutex<Arc<Completion<()>>>,
  pending_work: AtomicUsize,
  dirty: AtomicBool,

  pub(super) milestones: Mutex<Milestones>,
}

impl ChunkHolder {
  /// A holder that is not loaded yet. Levels are set by the orchestrator.
  pub fn new(pos: ChunkPos, simulation_level: u8) -> Self {
    let none = ChunkStatus::encode(None);
    Self {
      pos,
      futures: std::array::from_fn(|_| ArcSwapOption::empty()),
      started_work: AtomicU8::new(none),
      highest_allowed: AtomicU8::new(none),
      persisted: AtomicU8::new(none),
      ticket_level: AtomicU8::new(LOADING_CEILING),
      queue_level: AtomicU8::new(LOADING_CEILING),
      simulation_level: AtomicU8::new(simulation_level),
      task: ArcSwapOption::empty(),
      generation_refs: AtomicUsize::new(0),
      generation_sync: Mutex::new(Arc::new(Completion::completed(()))),
      pending_work: AtomicUsize::new(0),
      dirty: AtomicBool::new(false),
      milestones: Mutex::new(Milestones::new()),
    }
  }

  #[inline]
  pub fn pos(&self) -> ChunkPos {
    self.pos
  }

  // ===========================================================================
  // Levels
  // ===========================================================================

  #[inline]
  pub fn ticket_level(&self) -> u8 {
    self.ticket_level.load(Ordering::Acquire)
  }

  pub(crate) fn set_ticket_level(&self, level: u8) {
    self.ticket_level.store(level, Ordering::Release);
  }

  #[inline]
  pub fn simulation_level(&self) -> u8 {
    self.simulation_level.load(Ordering::Acquire)
  }

  pub(crate) fn set_simulation_level(&self, level: u8) {
    self.simulation_level.store(level, Ordering::Release);
  }

  /// Level the worldgen dispatcher currently files this cell's tasks under.
  #[inline]
  pub fn queue_level(&self) -> u8 {
    self.queue_level.load(Ordering::Acquire)
  }

  pub(crate) fn set_queue_level(&self, level: u8) {
    self.queue_level.store(level, Ordering::Release);
  }

  // ===========================================================================
  // Status bookkeeping
  // ===========================================================================

  #[inline]
  pub fn highest_allowed_status(&self) -> Option<ChunkStatus> {
    ChunkStatus::decode(self.highest_allowed.load(Ordering::Acquire))
  }

  #[inline]
  pub fn started_work(&self) -> Option<ChunkStatus> {
    ChunkStatus::decode(self.started_work.load(Ordering::Acquire))
  }

  /// Highest status the chunk data has reached, loaded or generated.
  #[inline]
  pub fn persisted_status(&self) -> Option<ChunkStatus> {
    ChunkStatus::decode(self.persisted.load(Ordering::Acquire))
  }

  pub(crate) fn update_persisted_status(&self, status: ChunkStatus) {
    let _ = self
      .persisted
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| match ChunkStatus::decode(raw) {
        Some(current) if current >= status => None,
        _ => Some(status as u8),
      });
  }

  #[inline]
  fn is_status_disallowed(&self, status: ChunkStatus) -> bool {
    self.highest_allowed_status().map_or(true, |highest| status > highest)
  }

  /// Data at exactly `status`, if that stage completed successfully.
  pub fn chunk_at(&self, status: ChunkStatus) -> Option<Arc<ChunkData>> {
    let future = self.futures[status.index()].load_full()?;
    future.get_now()?.ok()
  }

  /// Highest status with a successful future.
  pub fn latest_status(&self) -> Option<ChunkStatus> {
    ChunkStatus::ALL
      .into_iter()
      .rev()
      .find(|status| self.chunk_at(*status).is_some())
  }

  pub fn latest_chunk(&self) -> Option<Arc<ChunkData>> {
    ChunkStatus::ALL
      .into_iter()
      .rev()
      .find_map(|status| self.chunk_at(status))
  }

  /// Statuses whose future exists but has not settled.
  pub fn pending_futures(&self) -> Vec<ChunkStatus> {
    ChunkStatus::ALL
      .into_iter()
      .filter(|status| {
        self.futures[status.index()]
          .load_full()
          .is_some_and(|future| !future.is_done())
      })
      .collect()
  }

  // ===========================================================================
  // Stage futures
  // ===========================================================================

  /// Future for `status`, creating it if absent. Disallowed stages get the
  /// shared unloaded future.
  pub fn get_or_create_future(&self, status: ChunkStatus) -> ChunkFuture {
    if self.is_status_disallowed(status) {
      return unloaded_future();
    }
    let slot = &self.futures[status.index()];
    loop {
      if let Some(existing) = slot.load_full() {
        return existing;
      }
      let created: ChunkFuture = Arc::new(Completion::new());
      if cas_option(slot, &None, Some(Arc::clone(&created))) {
        // The ceiling may have dropped between the check and the swap.
        if self.is_status_disallowed(status) {
          self.fail_and_clear_pending_future(status, &created);
          return unloaded_future();
        }
        return created;
      }
    }
  }

  /// Ask for `status` and make sure some task is working towards it.
  pub fn schedule_to(&self, status: ChunkStatus, map: &GeneratingChunkMap<'_>) -> ChunkFuture {
    if self.is_status_disallowed(status) {
      return unloaded_future();
    }
    let future = self.get_or_create_future(status);
    if future.is_done() {
      return future;
    }
    let behind = self.task.load_full().map_or(true, |task| status > task.target());
    if behind {
      self.reschedule(map, Some(status));
    }
    future
  }

  /// Launch the step to `status` unless another task already did.
  pub(crate) fn apply_step(
    self: &Arc<Self>,
    status: ChunkStatus,
    kind: PyramidKind,
    ctx: &Arc<GenerationContext>,
    cache: &Arc<StaticCache2D<Arc<ChunkHolder>>>,
  ) -> ChunkFuture {
    if self.is_status_disallowed(status) {
      return unloaded_future();
    }
    if !self.acquire_status_bump(status) {
      return self.get_or_create_future(status);
    }
    let future = self.get_or_create_future(status);
    ctx.launch_step(Arc::clone(self), status, kind, Arc::clone(cache));
    future
  }

  /// Claim the right to run the step to `status`.
  ///
  /// Steps are launched strictly in order. Losing the race to an equal or
  /// later step is normal; finding the marker anywhere else is a bug.
  fn acquire_status_bump(&self, status: ChunkStatus) -> bool {
    let parent = match status {
      ChunkStatus::Empty => None,
      other => Some(other.parent()),
    };
    match self.started_work.compare_exchange(
      ChunkStatus::encode(parent),
      ChunkStatus::encode(Some(status)),
      Ordering::AcqRel,
      Ordering::Acquire,
    ) {
      Ok(_) => true,
      Err(previous) => match ChunkStatus::decode(previous) {
        Some(previous) if status <= previous => false,
        previous => panic!(
          "unexpected started work {previous:?} while starting {status} for chunk {}",
          self.pos
        ),
      },
    }
  }

  /// Settle the future for `status` with the outcome of its step.
  pub(crate) fn complete_future(&self, status: ChunkStatus, result: ChunkResult) {
    let slot = &self.futures[status.index()];
    loop {
      match slot.load_full() {
        None => {
          let done = Arc::new(Completion::completed(result.clone()));
          if cas_option(slot, &None, Some(done)) {
            return;
          }
        }
        Some(future) => {
          if future.complete(result.clone()) {
            return;
          }
          match future.get_now() {
            Some(Ok(_)) => panic!(
              "{status} future of chunk {} was already completed successfully",
              self.pos
            ),
            // Being failed and cleared right now; the slot empties shortly.
            Some(Err(ChunkFailure::Unloaded)) => std::thread::yield_now(),
            _ => return,
          }
        }
      }
    }
  }

  fn fail_and_clear_pending_future(&self, status: ChunkStatus, future: &ChunkFuture) {
    if future.complete(Err(ChunkFailure::Unloaded)) {
      let current = Some(Arc::clone(future));
      if !cas_option(&self.futures[status.index()], &current, None) {
        panic!("{status} future of chunk {} changed while failing it", self.pos);
      }
    }
  }

  /// Fail pending futures in `(from, to]`. `from = None` starts at `Empty`.
  fn fail_and_clear_pending_futures_between(&self, from: Option<ChunkStatus>, to: ChunkStatus) {
    let start = from.map_or(0, |status| status.index() + 1);
    for status in &ChunkStatus::ALL[start..=to.index()] {
      if let Some(future) = self.futures[status.index()].load_full() {
        self.fail_and_clear_pending_future(*status, &future);
      }
    }
  }

  /// Recompute the ceiling from the ticket level, failing work above it.
  pub(crate) fn update_highest_allowed_status(&self, map: &GeneratingChunkMap<'_>) {
    let old = self.highest_allowed_status();
    let new = generation_status(self.ticket_level());
    self.highest_allowed.store(ChunkStatus::encode(new), Ordering::Release);

    let Some(old) = old else { return };
    if new.map_or(true, |new| new < old) {
      self.fail_and_clear_pending_futures_between(new, old);
      if self.task.load().is_some() {
        self.reschedule(map, self.find_highest_status_with_pending_future(new));
      }
    }
  }

  fn find_highest_status_with_pending_future(&self, limit: Option<ChunkStatus>) -> Option<ChunkStatus> {
    let mut status = limit?;
    let started = self.started_work();
    loop {
      if started.is_some_and(|started| status <= started) {
        return None;
      }
      if self.futures[status.index()].load().is_some() {
        return Some(status);
      }
      if status == ChunkStatus::Empty {
        return None;
      }
      status = status.parent();
    }
  }

  // ===========================================================================
  // Generation task
  // ===========================================================================

  fn reschedule(&self, map: &GeneratingChunkMap<'_>, status: Option<ChunkStatus>) {
    let task = status.map(|status| map.schedule_generation_task(status, self.pos));
    if let Some(old) = self.task.swap(task) {
      old.mark_for_cancellation();
    }
  }

  /// Drop `task` if it is still the current one.
  pub(crate) fn remove_task(&self, task: &Arc<GenerationTask>) {
    cas_option(&self.task, &Some(Arc::clone(task)), None);
  }

  pub fn has_task(&self) -> bool {
    self.task.load().is_some()
  }

  pub fn task_target(&self) -> Option<ChunkStatus> {
    self.task.load_full().map(|task| task.target())
  }

  // ===========================================================================
  // Generation claims
  // ===========================================================================

  pub fn generation_ref_count(&self) -> usize {
    self.generation_refs.load(Ordering::Acquire)
  }

  pub(crate) fn increase_generation_ref_count(&self) {
    if self.generation_refs.fetch_add(1, Ordering::AcqRel) == 0 {
      *self.generation_sync.lock() = Arc::new(Completion::new());
    }
  }

  pub(crate) fn decrease_generation_ref_count(&self) {
    let sync = Arc::clone(&*self.generation_sync.lock());
    let previous = self
      .generation_refs
      .fetch_update(Ordering::AcqRel, Ordering::Acquire, |count| count.checked_sub(1));
    match previous {
      Ok(1) => {
        sync.complete(());
      }
      Ok(_) => {}
      Err(_) => panic!("more generation releases than claims for chunk {}", self.pos),
    }
  }

  /// Completes once no generation task claims this cell.
  pub fn generation_sync(&self) -> Arc<Completion<()>> {
    Arc::clone(&*self.generation_sync.lock())
  }

  // ===========================================================================
  // Steps and saving
  // ===========================================================================

  pub(crate) fn begin_work(&self) {
    self.pending_work.fetch_add(1, Ordering::AcqRel);
  }

  pub(crate) fn end_work(&self) {
    self.pending_work.fetch_sub(1, Ordering::AcqRel);
  }

  /// Steps launched on the worker pool and not finished yet.
  pub fn pending_work_count(&self) -> usize {
    self.pending_work.load(Ordering::Acquire)
  }

  pub(crate) fn mark_dirty(&self) {
    self.dirty.store(true, Ordering::Release);
  }

  /// Clear the dirty flag, returning whether it was set.
  pub(crate) fn take_dirty(&self) -> bool {
    self.dirty.swap(false, Ordering::AcqRel)
  }

  pub fn is_dirty(&self) -> bool {
    self.dirty.load(Ordering::Acquire)
  }

  /// Nothing refers to this cell any more; safe to save and drop.
  pub fn is_idle(&self) -> bool {
    self.generation_ref_count() == 0 && !self.has_task() && self.pending_work_count() == 0
  }
}

impl fmt::Debug for ChunkHolder {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChunkHolder")
      .field("pos", &self.pos)
      .field("ticket_level", &self.ticket_level())
      .field("highest_allowed", &self.highest_allowed_status())
      .field("started_work", &self.started_work())
      .field("persisted", &self.persisted_status())
      .field("refs", &self.generation_ref_count())
      .finish()
  }
}

#[cfg(test)]
#[path = "holder_test.rs"]
mod holder_test;
