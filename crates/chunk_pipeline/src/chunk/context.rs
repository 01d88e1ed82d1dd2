//! GenerationContext - the collaborators and executors generation work runs
//! against, plus the borrowed map view used to create tasks.
//!
//! ```text
//!   main thread                         worldgen dispatcher        worker pool
//!   ───────────                         ───────────────────        ───────────
//!   GeneratingChunkMap
//!     schedule_generation_task ──▶ pending_tasks
//!   run_generation_tasks ──────────────▶ submit(run_until_wait) ──▶ task.run_until_wait
//!                                          ▲                          │ apply_step
//!                                          └── waiting.on_complete ◀──┤ launch_step ──▶ stage / storage
//! ```

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use tracing::{error, trace};

use super::cache::StaticCache2D;
use super::generation_task::GenerationTask;
use super::holder::ChunkHolder;
use super::pyramid::ChunkPyramid;
use super::step_executor::{ChunkWindow, PyramidKind, StageExecutor};
use crate::dispatch::ChunkTaskDispatcher;
use crate::error::{StageError, StorageError};
use crate::light::LightEngine;
use crate::listener::ChunkStatusListener;
use crate::storage::{ChunkCodec, ChunkStorage};
use crate::threading::{Executor, MainThreadExecutor};
use crate::types::{ChunkData, ChunkPos, ChunkResult, ChunkStatus};

pub struct GenerationContext {
  stages: Arc<dyn StageExecutor>,
  storage: Arc<dyn ChunkStorage>,
  light: Arc<dyn LightEngine>,
  listener: Arc<dyn ChunkStatusListener>,
  worker: Arc<dyn Executor>,
  main: MainThreadExecutor,
  worldgen: ChunkTaskDispatcher,
  pending_tasks: Mutex<Vec<Arc<GenerationTask>>>,
}

impl GenerationContext {
  pub fn new(
    stages: Arc<dyn StageExecutor>,
    storage: Arc<dyn ChunkStorage>,
    light: Arc<dyn LightEngine>,
    listener: Arc<dyn ChunkStatusListener>,
    worker: Arc<dyn Executor>,
    main: MainThreadExecutor,
  ) -> Arc<Self> {
    let worldgen = ChunkTaskDispatcher::new("worldgen", Arc::clone(&worker), Arc::clone(&worker));
    Arc::new(Self {
      stages,
      storage,
      light,
      listener,
      worker,
      main,
      worldgen,
      pending_tasks: Mutex::new(Vec::new()),
    })
  }

  #[inline]
  pub fn stages(&self) -> &Arc<dyn StageExecutor> {
    &self.stages
  }

  pub fn pyramid(&self, kind: PyramidKind) -> &ChunkPyramid {
    self.stages.pyramid(kind)
  }

  #[inline]
  pub fn light(&self) -> &Arc<dyn LightEngine> {
    &self.light
  }

  #[inline]
  pub fn listener(&self) -> &Arc<dyn ChunkStatusListener> {
    &self.listener
  }

  #[inline]
  pub fn worker(&self) -> &Arc<dyn Executor> {
    &self.worker
  }

  #[inline]
  pub fn main(&self) -> &MainThreadExecutor {
    &self.main
  }

  #[inline]
  pub fn worldgen(&self) -> &ChunkTaskDispatcher {
    &self.worldgen
  }

  /// Tasks created since the last [`GenerationContext::run_generation_tasks`].
  pub fn pending_task_count(&self) -> usize {
    self.pending_tasks.lock().len()
  }

  // ===========================================================================
  // Task driving
  // ===========================================================================

  /// Hand every newly created task to the worldgen dispatcher.
  pub fn run_generation_tasks(self: &Arc<Self>) {
    let tasks = std::mem::take(&mut *self.pending_tasks.lock());
    for task in tasks {
      self.run_generation_task(task);
    }
  }

  fn run_generation_task(self: &Arc<Self>, task: Arc<GenerationTask>) {
    let ctx = Arc::clone(self);
    let center = Arc::clone(task.center());
    let pos = task.pos();
    self.worldgen.submit(
      move || {
        if let Some(waiting) = task.run_until_wait() {
          waiting.on_complete(move |_| ctx.run_generation_task(task));
        }
      },
      pos,
      move || center.queue_level(),
    );
  }

  // ===========================================================================
  // Steps
  // ===========================================================================

  /// Run the step to `status` for `holder` on the worker pool.
  pub(crate) fn launch_step(
    self: &Arc<Self>,
    holder: Arc<ChunkHolder>,
    status: ChunkStatus,
    kind: PyramidKind,
    cache: Arc<StaticCache2D<Arc<ChunkHolder>>>,
  ) {
    holder.begin_work();
    let ctx = Arc::clone(self);
    self.worker.execute(Box::new(move || {
      let result = ctx.run_step(&holder, status, kind, &cache);
      holder.complete_future(status, result);
      holder.end_work();
    }));
  }

  fn run_step(
    &self,
    holder: &ChunkHolder,
    status: ChunkStatus,
    kind: PyramidKind,
    cache: &StaticCache2D<Arc<ChunkHolder>>,
  ) -> ChunkResult {
    let pos = holder.pos();
    if status == ChunkStatus::Empty {
      let chunk = self.load_chunk(pos);
      holder.update_persisted_status(chunk.status);
      return Ok(Arc::new(chunk));
    }

    let parent = status.parent();
    let chunk = holder
      .chunk_at(parent)
      .ok_or(StageError::MissingParent { pos, parent })?;
    if chunk.status >= status {
      return Ok(chunk);
    }

    let step = self.pyramid(kind).step_to(status);
    let window = ChunkWindow::create(pos, step.direct_dependencies.radius(), |neighbor| {
      cache.get(neighbor).and_then(|holder| holder.latest_chunk())
    });
    let next = self.stages.apply(step, &window, &chunk)?;
    trace!(%pos, %status, "step applied");

    holder.update_persisted_status(next.status);
    self.light.on_status_reached(pos, next.status);
    holder.mark_dirty();
    Ok(Arc::new(next))
  }

  // ===========================================================================
  // Storage
  // ===========================================================================

  /// Stored chunk for `pos`, or a fresh one if there is none or it is unreadable.
  pub fn load_chunk(&self, pos: ChunkPos) -> ChunkData {
    let bytes = match self.storage.read(pos) {
      Ok(Some(bytes)) => bytes,
      Ok(None) => return ChunkData::empty(pos),
      Err(err) => {
        error!(%pos, %err, "failed to read chunk, starting fresh");
        return ChunkData::empty(pos);
      }
    };
    match ChunkCodec::decode(pos, &bytes) {
      Ok(chunk) => chunk,
      Err(err) => {
        error!(%pos, %err, "failed to decode chunk, starting fresh");
        ChunkData::empty(pos)
      }
    }
  }

  pub fn save_chunk(&self, chunk: &ChunkData) -> Result<(), StorageError> {
    self.storage.write(chunk.pos, ChunkCodec::encode(chunk))
  }
}

impl fmt::Debug for GenerationContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("GenerationContext")
      .field("worldgen", &self.worldgen)
      .field("pending_tasks", &self.pending_task_count())
      .finish()
  }
}

// =============================================================================
// GeneratingChunkMap
// =============================================================================

/// Main-thread view of the holder map used to create generation tasks.
pub struct GeneratingChunkMap<'a> {
  holders: &'a FxHashMap<ChunkPos, Arc<ChunkHolder>>,
  ctx: &'a Arc<GenerationContext>,
}

impl<'a> GeneratingChunkMap<'a> {
  pub fn new(holders: &'a FxHashMap<ChunkPos, Arc<ChunkHolder>>, ctx: &'a Arc<GenerationContext>) -> Self {
    Self { holders, ctx }
  }

  #[inline]
  pub fn ctx(&self) -> &Arc<GenerationContext> {
    self.ctx
  }

  #[inline]
  pub fn holder(&self, pos: ChunkPos) -> Option<&Arc<ChunkHolder>> {
    self.holders.get(&pos)
  }

  /// Claim the holder at `pos` for a generation task.
  ///
  /// Levels guarantee a holder exists everywhere a task may reach.
  fn acquire_generation(&self, pos: ChunkPos) -> Arc<ChunkHolder> {
    let Some(holder) = self.holders.get(&pos) else {
      panic!("no holder at {pos} to claim for generation");
    };
    holder.increase_generation_ref_count();
    Arc::clone(holder)
  }

  /// Create a task driving `pos` to `status`, claiming its worst-case window.
  pub(crate) fn schedule_generation_task(&self, status: ChunkStatus, pos: ChunkPos) -> Arc<GenerationTask> {
    let radius = self
      .ctx
      .stages()
      .generation_pyramid()
      .step_to(status)
      .accumulated_radius_of(ChunkStatus::Empty);
    let cache = StaticCache2D::create(pos, radius, |neighbor| self.acquire_generation(neighbor));
    let task = Arc::new(GenerationTask::new(pos, status, Arc::clone(self.ctx), cache));
    self.ctx.pending_tasks.lock().push(Arc::clone(&task));
    trace!(%pos, %status, radius, "generation task scheduled");
    task
  }
}
