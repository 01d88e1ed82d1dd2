//! ChunkMap - the orchestrator tying tickets, holders and generation together.
//!
//! # Tick
//!
//! ```text
//!   purge_expired ──▶ refresh request tickets ──▶ run_updates
//!                                                   │ distance fields converge
//!                                                   │ holders created / re-levelled
//!                                                   │ ceilings, milestones, task refiling
//!                                                   │ (milestones also follow simulation changes)
//!                                                   ▼
//!   periodic save ◀── promote_visible_map ◀── process_unloads
//! ```
//!
//! # Double-buffered map
//!
//! `updating` is mutated on the main thread as levels change. `visible` is an
//! immutable snapshot replaced at most once per tick, so readers on other
//! threads see a consistent set of holders without taking locks.
//!
//! A holder whose level rises above `MAX_LEVEL` is queued for unload. It is
//! only removed once nothing claims it: no generation task window, no task of
//! its own and no step or save in flight.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace, warn};
use web_time::Instant;

use crate::chunk::{
  unloaded_future, ChunkFuture, ChunkHolder, GeneratingChunkMap, GenerationContext, PassThroughExecutor,
  StageExecutor,
};
use crate::config::PipelineConfig;
use crate::constants::{is_loaded, level_by_generation_status};
use crate::error::{PipelineError, TicketError};
use crate::light::{ImmediateLight, LightEngine};
use crate::listener::{ChunkStatusListener, NoopListener};
use crate::metrics::PipelineMetrics;
use crate::storage::{ChunkStorage, MemoryStorage};
use crate::threading::{Executor, MainThreadExecutor, WorkerPool};
use crate::tickets::{DistanceManager, LevelUpdates, PlayerId, TicketType};
use crate::types::{ChunkPos, ChunkResult, ChunkStatus, SectionPos};

/// Holder map keyed by chunk position.
pub type HolderMap = FxHashMap<ChunkPos, Arc<ChunkHolder>>;

/// Rounds of update/drain before `run_updates` gives up for this tick.
const MAX_UPDATE_ROUNDS: usize = 32;

/// A `request_stage` whose future has not settled yet.
struct StageRequest {
  pos: ChunkPos,
  status: ChunkStatus,
  future: ChunkFuture,
}

pub struct ChunkMap {
  config: PipelineConfig,
  ctx: Arc<GenerationContext>,
  distance: DistanceManager,

  updating: HolderMap,
  visible: ArcSwap<HolderMap>,
  modified: bool,

  pending_unloads: FxHashSet<ChunkPos>,
  pending_requests: Vec<StageRequest>,
  tick_count: u64,
  metrics: Arc<PipelineMetrics>,
}

impl ChunkMap {
  /// Map with default collaborators and a worker pool sized from `config`.
  pub fn new(config: PipelineConfig) -> Result<Self, PipelineError> {
    Self::builder(config).build()
  }

  pub fn builder(config: PipelineConfig) -> ChunkMapBuilder {
    ChunkMapBuilder::new(config)
  }

  #[inline]
  pub fn config(&self) -> &PipelineConfig {
    &self.config
  }

  #[inline]
  pub fn context(&self) -> &Arc<GenerationContext> {
    &self.ctx
  }

  #[inline]
  pub fn distance_manager(&self) -> &DistanceManager {
    &self.distance
  }

  #[inline]
  pub fn metrics(&self) -> &Arc<PipelineMetrics> {
    &self.metrics
  }

  #[inline]
  pub fn tick_count(&self) -> u64 {
    self.tick_count
  }

  // ===========================================================================
  // Tick
  // ===========================================================================

  /// One main-thread tick.
  #[tracing::instrument(skip_all, name = "chunk_map::tick")]
  pub fn tick(&mut self) {
    let start = Instant::now();
    self.tick_count += 1;

    self.distance.purge_expired();
    self.refresh_request_tickets();
    self.run_updates();
    self.process_unloads();
    self.promote_visible_map();

    let interval = self.config.save_interval_ticks;
    if interval > 0 && self.tick_count % interval == 0 {
      self.save_pass();
    }

    self.metrics.record_tick(start.elapsed().as_micros() as u64);
  }

  /// Converge levels and apply them to holders, draining the main-thread
  /// queue between rounds. Returns whether any loading level changed.
  #[tracing::instrument(skip_all, name = "chunk_map::run_updates")]
  pub fn run_updates(&mut self) -> bool {
    let mut changed = false;
    let mut rounds = 0;
    loop {
      self.ctx.main().run_pending();
      let updates = self.distance.run_all_updates();
      let releases = self.distance.take_tickets_to_release();
      if updates.is_empty() && releases.is_empty() && self.ctx.main().queued() == 0 {
        break;
      }
      changed |= !updates.loading.is_empty();
      self.apply_level_updates(updates);
      self.schedule_ticket_releases(releases);

      rounds += 1;
      if rounds >= MAX_UPDATE_ROUNDS {
        debug!(rounds, "level updates still pending, continuing next tick");
        break;
      }
    }
    self.ctx.run_generation_tasks();
    changed
  }

  fn apply_level_updates(&mut self, updates: LevelUpdates) {
    let mut changed = Vec::with_capacity(updates.loading.len());
    for change in &updates.loading {
      if let Some(holder) = self.update_chunk_scheduling(change.pos, change.new) {
        changed.push(holder);
      }
    }

    // Holders whose milestone target may have moved: every loading change
    // plus simulation-only changes.
    let mut retargeted = changed.clone();
    let mut seen: FxHashSet<ChunkPos> = changed.iter().map(|holder| holder.pos()).collect();
    for change in &updates.simulation {
      if let Some(holder) = self.updating.get(&change.pos) {
        holder.set_simulation_level(change.new);
        if seen.insert(change.pos) {
          retargeted.push(Arc::clone(holder));
        }
      }
    }

    // Every holder exists before any ceiling moves, so new tasks can claim
    // their whole window.
    let map = GeneratingChunkMap::new(&self.updating, &self.ctx);
    for holder in &changed {
      holder.update_highest_allowed_status(&map);
    }
    for holder in &retargeted {
      holder.update_futures(&map);
    }
    // Ticking tiers read neighbour `Full` futures, so they go after every
    // holder has settled its own.
    for holder in &retargeted {
      holder.update_ticking_futures(&map);
    }
    for holder in &changed {
      holder.update_queue_level(&map);
    }
  }

  /// Record `level` for `pos`, creating the holder when the cell becomes loaded.
  fn update_chunk_scheduling(&mut self, pos: ChunkPos, level: u8) -> Option<Arc<ChunkHolder>> {
    let loaded = is_loaded(level);
    let holder = match self.updating.get(&pos) {
      Some(holder) => Arc::clone(holder),
      None if !loaded => return None,
      None => {
        let holder = Arc::new(ChunkHolder::new(pos, self.distance.simulation_level(pos)));
        self.updating.insert(pos, Arc::clone(&holder));
        self.modified = true;
        self.metrics.record_holder_created();
        trace!(%pos, level, "holder created");
        holder
      }
    };
    holder.set_ticket_level(level);
    if loaded {
      self.pending_unloads.remove(&pos);
    } else {
      self.pending_unloads.insert(pos);
    }
    Some(holder)
  }

  /// Free the throttle slot of each new player ticket once its chunk is
  /// visible, or straight away if the chunk never got a holder. Whether it
  /// ticks further is up to the simulation field.
  fn schedule_ticket_releases(&self, positions: Vec<ChunkPos>) {
    for pos in positions {
      let throttle = self.distance.ticket_throttle().clone();
      match self.updating.get(&pos) {
        Some(holder) => holder
          .full_chunk_future()
          .on_complete(move |_| throttle.release(pos, || {}, false)),
        None => throttle.release(pos, || {}, false),
      }
    }
  }

  // ===========================================================================
  // Unloading and saving
  // ===========================================================================

  #[tracing::instrument(skip_all, name = "chunk_map::process_unloads")]
  fn process_unloads(&mut self) {
    if self.pending_unloads.is_empty() {
      return;
    }
    let budget = self.config.max_unloads_per_tick;
    let candidates: Vec<ChunkPos> = self.pending_unloads.iter().copied().collect();
    let mut unloaded = 0;
    for pos in candidates {
      if unloaded >= budget {
        break;
      }
      let Some(holder) = self.updating.get(&pos).cloned() else {
        self.pending_unloads.remove(&pos);
        continue;
      };
      if is_loaded(holder.ticket_level()) {
        self.pending_unloads.remove(&pos);
        continue;
      }
      if !holder.is_idle() {
        continue;
      }
      if !self.save_holder(&holder) {
        continue;
      }

      self.pending_unloads.remove(&pos);
      self.updating.remove(&pos);
      self.modified = true;
      self.ctx.worldgen().release(pos, || {}, true);
      self.metrics.record_unload();
      unloaded += 1;
    }
    if unloaded > 0 {
      debug!(unloaded, remaining = self.pending_unloads.len(), "unloaded chunks");
    }
  }

  /// Write `holder`'s latest chunk if it changed. Returns `false` when the
  /// write failed and the data is still dirty.
  fn save_holder(&self, holder: &ChunkHolder) -> bool {
    if !holder.take_dirty() {
      return true;
    }
    let Some(chunk) = holder.latest_chunk() else {
      return true;
    };
    match self.ctx.save_chunk(&chunk) {
      Ok(()) => {
        self.metrics.record_save(true);
        true
      }
      Err(err) => {
        warn!(pos = %holder.pos(), %err, "failed to save chunk, keeping it loaded");
        self.metrics.record_save(false);
        holder.mark_dirty();
        false
      }
    }
  }

  /// Write every changed chunk on the worker pool. Failures stay dirty and
  /// are retried on the next pass.
  fn save_pass(&self) {
    let dirty: Vec<Arc<ChunkHolder>> = self
      .updating
      .values()
      .filter(|holder| holder.is_dirty())
      .cloned()
      .collect();
    if dirty.is_empty() {
      return;
    }
    trace!(chunks = dirty.len(), "save pass");

    for holder in &dirty {
      holder.begin_work();
    }
    let ctx = Arc::clone(&self.ctx);
    let metrics = Arc::clone(&self.metrics);
    self.ctx.worker().execute(Box::new(move || {
      for holder in dirty {
        if holder.take_dirty() {
          if let Some(chunk) = holder.latest_chunk() {
            let result = ctx.save_chunk(&chunk);
            metrics.record_save(result.is_ok());
            if let Err(err) = result {
              warn!(pos = %holder.pos(), %err, "failed to save chunk, retrying next pass");
              holder.mark_dirty();
            }
          }
        }
        holder.end_work();
      }
    }));
  }

  /// Synchronously write every changed chunk. Returns how many were written.
  pub fn save_all(&self) -> usize {
    let mut saved = 0;
    for holder in self.updating.values() {
      if holder.is_dirty() && self.save_holder(holder) {
        saved += 1;
      }
    }
    saved
  }

  // ===========================================================================
  // Visible map
  // ===========================================================================

  /// Publish the updating map if it changed since the last promotion.
  pub fn promote_visible_map(&mut self) -> bool {
    if !self.modified {
      return false;
    }
    self.visible.store(Arc::new(self.updating.clone()));
    self.modified = false;
    true
  }

  pub fn visible_holder(&self, pos: ChunkPos) -> Option<Arc<ChunkHolder>> {
    self.visible.load().get(&pos).cloned()
  }

  pub fn visible_snapshot(&self) -> Arc<HolderMap> {
    self.visible.load_full()
  }

  /// Main-thread view, including holders not yet promoted.
  pub fn updating_holder(&self, pos: ChunkPos) -> Option<&Arc<ChunkHolder>> {
    self.updating.get(&pos)
  }

  pub fn holders(&self) -> impl Iterator<Item = &Arc<ChunkHolder>> {
    self.updating.values()
  }

  pub fn holder_count(&self) -> usize {
    self.updating.len()
  }

  pub fn pending_unload_count(&self) -> usize {
    self.pending_unloads.len()
  }

  /// Requests whose futures have not settled.
  pub fn pending_request_count(&self) -> usize {
    self.pending_requests.len()
  }

  // ===========================================================================
  // Requests
  // ===========================================================================

  /// Future for `pos` reaching `status`.
  ///
  /// Holds a short-lived ticket at the level that allows `status`, refreshed
  /// every tick until the future settles.
  pub fn request_stage(&mut self, pos: ChunkPos, status: ChunkStatus) -> ChunkFuture {
    self.add_request_ticket(pos, level_by_generation_status(status));
    self.run_updates();

    let future = match self.updating.get(&pos) {
      Some(holder) => holder.schedule_to(status, &GeneratingChunkMap::new(&self.updating, &self.ctx)),
      None => unloaded_future(),
    };
    self.ctx.run_generation_tasks();
    if !future.is_done() {
      self.pending_requests.push(StageRequest {
        pos,
        status,
        future: Arc::clone(&future),
      });
    }
    future
  }

  fn refresh_request_tickets(&mut self) {
    self.pending_requests.retain(|request| !request.future.is_done());
    let wanted: Vec<(ChunkPos, u8)> = self
      .pending_requests
      .iter()
      .map(|request| (request.pos, level_by_generation_status(request.status)))
      .collect();
    for (pos, level) in wanted {
      self.add_request_ticket(pos, level);
    }
  }

  /// One request ticket per cell, at the lowest level any request needs.
  fn add_request_ticket(&mut self, pos: ChunkPos, level: u8) {
    let level = self
      .distance
      .tickets_at(pos)
      .iter()
      .filter(|ticket| ticket.ticket_type == TicketType::UNKNOWN)
      .map(|ticket| ticket.level)
      .fold(level, u8::min);
    if let Err(err) = self.distance.add_ticket(TicketType::UNKNOWN, pos, level) {
      warn!(%pos, %err, "request ticket rejected");
    }
  }

  /// Tick and drain executors until `future` settles or `max_ticks` pass.
  pub fn run_until(&mut self, future: &ChunkFuture, max_ticks: usize) -> Option<ChunkResult> {
    for _ in 0..max_ticks {
      if let Some(result) = future.get_now() {
        return Some(result);
      }
      self.tick();
      self.pump(Duration::from_millis(1));
    }
    future.get_now()
  }

  /// Tick until nothing is queued, running or waiting for a holder.
  pub fn run_until_idle(&mut self, max_ticks: usize) -> bool {
    for _ in 0..max_ticks {
      self.tick();
      self.pump(Duration::from_millis(1));
      if self.is_idle() {
        return true;
      }
    }
    false
  }

  /// Nothing is left to propagate, dispatch, generate, save or unload.
  pub fn is_idle(&self) -> bool {
    !self.distance.has_pending_updates()
      && self.pending_unloads.is_empty()
      && self.ctx.main().queued() == 0
      && self.distance.ticket_throttle().queued_task_count() == 0
      && self.ctx.pending_task_count() == 0
      && self.ctx.worldgen().queued_task_count() == 0
      && self.ctx.worldgen().running_task_count() == 0
      && self
        .updating
        .values()
        .all(|holder| !holder.has_task() && holder.pending_work_count() == 0)
  }

  /// Drain jobs queued for the calling thread, waiting up to `timeout` for
  /// main-thread work to arrive.
  pub fn pump(&self, timeout: Duration) {
    self.ctx.worker().run_pending();
    self.ctx.main().wait_and_run(timeout);
  }

  // ===========================================================================
  // Tickets and players
  // ===========================================================================

  pub fn add_ticket(&mut self, ticket_type: TicketType, pos: ChunkPos, level: u8) -> Result<(), TicketError> {
    self.distance.add_ticket(ticket_type, pos, level)
  }

  pub fn remove_ticket(&mut self, ticket_type: TicketType, pos: ChunkPos) -> bool {
    self.distance.remove_ticket(ticket_type, pos)
  }

  pub fn add_region_ticket(&mut self, ticket_type: TicketType, pos: ChunkPos, radius: u8) -> Result<(), TicketError> {
    self.distance.add_region_ticket(ticket_type, pos, radius)
  }

  pub fn remove_region_ticket(&mut self, ticket_type: TicketType, pos: ChunkPos, radius: u8) -> bool {
    self.distance.remove_region_ticket(ticket_type, pos, radius)
  }

  pub fn add_player(&mut self, section: SectionPos, player: PlayerId) {
    self.distance.add_player(section, player);
  }

  pub fn remove_player(&mut self, section: SectionPos, player: PlayerId) {
    self.distance.remove_player(section, player);
  }

  pub fn move_player(&mut self, from: SectionPos, to: SectionPos, player: PlayerId) {
    self.distance.move_player(from, to, player);
  }

  pub fn update_view_distance(&mut self, view_distance: u8) {
    self.config.view_distance = view_distance;
    self.distance.update_view_distance(view_distance);
  }

  pub fn update_simulation_distance(&mut self, simulation_distance: u8) {
    self.config.simulation_distance = simulation_distance;
    self.distance.update_simulation_distance(simulation_distance);
  }
}

impl fmt::Debug for ChunkMap {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("ChunkMap")
      .field("tick", &self.tick_count)
      .field("holders", &self.updating.len())
      .field("visible", &self.visible.load().len())
      .field("pending_unloads", &self.pending_unloads.len())
      .field("pending_requests", &self.pending_requests.len())
      .field("ctx", &self.ctx)
      .finish()
  }
}

// =============================================================================
// Builder
// =============================================================================

/// Wires a [`ChunkMap`] to its collaborators. Anything not set gets a default:
/// pass-through stages, in-memory storage, immediate light, no listener and a
/// rayon worker pool.
pub struct ChunkMapBuilder {
  config: PipelineConfig,
  stages: Option<Arc<dyn StageExecutor>>,
  storage: Option<Arc<dyn ChunkStorage>>,
  light: Option<Arc<dyn LightEngine>>,
  listener: Option<Arc<dyn ChunkStatusListener>>,
  worker: Option<Arc<dyn Executor>>,
  main: Option<MainThreadExecutor>,
}

impl ChunkMapBuilder {
  pub fn new(config: PipelineConfig) -> Self {
    Self {
      config,
      stages: None,
      storage: None,
      light: None,
      listener: None,
      worker: None,
      main: None,
    }
  }

  pub fn stage_executor(mut self, stages: Arc<dyn StageExecutor>) -> Self {
    self.stages = Some(stages);
    self
  }

  pub fn storage(mut self, storage: Arc<dyn ChunkStorage>) -> Self {
    self.storage = Some(storage);
    self
  }

  pub fn light(mut self, light: Arc<dyn LightEngine>) -> Self {
    self.light = Some(light);
    self
  }

  pub fn listener(mut self, listener: Arc<dyn ChunkStatusListener>) -> Self {
    self.listener = Some(listener);
    self
  }

  /// Executor for stage steps and storage I/O.
  pub fn worker(mut self, worker: Arc<dyn Executor>) -> Self {
    self.worker = Some(worker);
    self
  }

  /// Queue drained by whoever calls [`ChunkMap::tick`].
  pub fn main_executor(mut self, main: MainThreadExecutor) -> Self {
    self.main = Some(main);
    self
  }

  pub fn build(self) -> Result<ChunkMap, PipelineError> {
    self.config.validate()?;
    let worker: Arc<dyn Executor> = match self.worker {
      Some(worker) => worker,
      None => Arc::new(WorkerPool::new(self.config.worker_threads)?),
    };
    let main = self.main.unwrap_or_default();
    let ctx = GenerationContext::new(
      self.stages.unwrap_or_else(|| Arc::new(PassThroughExecutor)),
      self.storage.unwrap_or_else(|| Arc::new(MemoryStorage::new())),
      self.light.unwrap_or_else(|| Arc::new(ImmediateLight::new())),
      self.listener.unwrap_or_else(|| Arc::new(NoopListener)),
      worker,
      main.clone(),
    );
    let distance = DistanceManager::new(&self.config, Arc::new(main));
    debug!(
      view_distance = self.config.view_distance,
      simulation_distance = self.config.simulation_distance,
      "chunk map built"
    );
    Ok(ChunkMap {
      config: self.config,
      ctx,
      distance,
      updating: FxHashMap::default(),
      visible: ArcSwap::from_pointee(FxHashMap::default()),
      modified: false,
      pending_unloads: FxHashSet::default(),
      pending_requests: Vec::new(),
      tick_count: 0,
      metrics: Arc::new(PipelineMetrics::new()),
    })
  }
}

#[cfg(test)]
#[path = "chunk_map_test.rs"]
mod chunk_map_test;
