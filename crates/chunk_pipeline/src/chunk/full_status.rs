//! Milestone futures: `Full`, `BlockTicking` and `EntityTicking`.
//!
//! ```text
//!   Full          = stage Full ──▶ light ready ──▶ chunk
//!   BlockTicking  = own Full      + Full of every chunk within 1
//!   EntityTicking = own BlockTicking + Full of every chunk within 2
//! ```
//!
//! The target tier comes from both fields: the loading level decides how far
//! a chunk is visible, the simulation level caps how much of it may tick.
//!
//! Crossing into a tier creates its future; leaving a tier fails it with
//! `Unloaded` and puts the shared unloaded future in its place. Promotions
//! reach the [`ChunkStatusListener`](crate::listener::ChunkStatusListener) on
//! the main thread once the future succeeds, unless a later level change
//! cancelled them first. Demotions are reported immediately.
//!
//! Updates run in two passes over the changed holders. The first settles
//! demotions and the `Full` tier everywhere; the second promotes ticking
//! tiers, whose futures read the neighbours' `Full` futures.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::context::GeneratingChunkMap;
use super::generation_task::CancellationToken;
use super::holder::{unloaded_future, ChunkFuture, ChunkHolder};
use crate::completion::Completion;
use crate::constants::{effective_full_status, level_by_full_status, FULL_CHUNK_LEVEL};
use crate::error::ChunkFailure;
use crate::threading::Executor;
use crate::types::{ChunkStatus, FullChunkStatus};

const TIERS: [FullChunkStatus; 3] = [
  FullChunkStatus::Full,
  FullChunkStatus::BlockTicking,
  FullChunkStatus::EntityTicking,
];

#[inline]
fn tier_index(status: FullChunkStatus) -> Option<usize> {
  TIERS.iter().position(|tier| *tier == status)
}

/// Radius around a chunk that must be `Full` before it reaches `tier`.
#[inline]
fn neighbour_radius(tier: FullChunkStatus) -> i32 {
  (FULL_CHUNK_LEVEL - level_by_full_status(tier)) as i32
}

pub struct Milestones {
  futures: [ChunkFuture; 3],
  /// Highest tier whose future currently exists.
  applied: FullChunkStatus,
  pending_confirmation: CancellationToken,
}

impl Milestones {
  pub(super) fn new() -> Self {
    Self {
      futures: std::array::from_fn(|_| unloaded_future()),
      applied: FullChunkStatus::Inaccessible,
      pending_confirmation: CancellationToken::new(),
    }
  }
}

impl ChunkHolder {
  /// Milestone future for `status`. `Inaccessible` has none and is always unloaded.
  pub fn full_status_future(&self, status: FullChunkStatus) -> ChunkFuture {
    match tier_index(status) {
      Some(index) => Arc::clone(&self.milestones.lock().futures[index]),
      None => unloaded_future(),
    }
  }

  pub fn full_chunk_future(&self) -> ChunkFuture {
    self.full_status_future(FullChunkStatus::Full)
  }

  pub fn entity_ticking_future(&self) -> ChunkFuture {
    self.full_status_future(FullChunkStatus::EntityTicking)
  }

  /// Highest tier whose future has succeeded.
  pub fn full_status(&self) -> FullChunkStatus {
    let milestones = self.milestones.lock();
    TIERS
      .iter()
      .zip(milestones.futures.iter())
      .rev()
      .find(|(_, future)| matches!(future.get_now(), Some(Ok(_))))
      .map_or(FullChunkStatus::Inaccessible, |(tier, _)| *tier)
  }

  /// Tier the current loading and simulation levels allow.
  #[inline]
  pub fn target_full_status(&self) -> FullChunkStatus {
    effective_full_status(self.ticket_level(), self.simulation_level())
  }

  /// First pass after a level change: fail tiers above the target and
  /// create the `Full` milestone if the chunk just became visible.
  pub(crate) fn update_futures(self: &Arc<Self>, map: &GeneratingChunkMap<'_>) {
    let target = self.target_full_status();
    let mut milestones = self.milestones.lock();
    let old_status = milestones.applied;

    for (index, tier) in TIERS.into_iter().enumerate().rev() {
      if old_status >= tier && target < tier {
        milestones.futures[index].complete(Err(ChunkFailure::Unloaded));
        milestones.futures[index] = unloaded_future();
      }
    }
    let mut applied = old_status.min(target);
    if applied < FullChunkStatus::Full && target >= FullChunkStatus::Full {
      let future = self.prepare_accessible(map);
      milestones.futures[0] = Arc::clone(&future);
      self.schedule_promotion(&mut milestones, &future, FullChunkStatus::Full, map);
      applied = FullChunkStatus::Full;
    }

    let demoted = target < old_status;
    if demoted {
      milestones.pending_confirmation.cancel();
    }
    milestones.applied = applied;
    drop(milestones);

    if demoted {
      map.ctx().listener().on_full_status_change(self.pos(), target);
    }
  }

  /// Second pass: create ticking milestones up to the target. Each one waits
  /// on the tier below and on the `Full` futures of the surrounding chunks.
  pub(crate) fn update_ticking_futures(self: &Arc<Self>, map: &GeneratingChunkMap<'_>) {
    let target = self.target_full_status();
    let mut milestones = self.milestones.lock();
    for (index, tier) in TIERS.into_iter().enumerate().skip(1) {
      if milestones.applied >= tier || target < tier {
        continue;
      }
      let radius = neighbour_radius(tier);
      let neighbours: Vec<ChunkFuture> = self
        .pos()
        .square_around(radius)
        .filter(|pos| *pos != self.pos())
        .map(|pos| map.holder(pos).map_or_else(unloaded_future, |holder| holder.full_chunk_future()))
        .collect();
      let future = join_success(&milestones.futures[index - 1], neighbours);
      milestones.futures[index] = Arc::clone(&future);
      self.schedule_promotion(&mut milestones, &future, tier, map);
      milestones.applied = tier;
    }
  }

  /// Refile the cell's worldgen tasks under its current ticket level.
  pub(crate) fn update_queue_level(self: &Arc<Self>, map: &GeneratingChunkMap<'_>) {
    let old_level = Arc::clone(self);
    let new_level = Arc::clone(self);
    map.ctx().worldgen().on_level_change(
      self.pos(),
      move || old_level.queue_level(),
      self.ticket_level(),
      move |level| new_level.set_queue_level(level),
    );
  }

  /// Stage `Full`, then lighting.
  fn prepare_accessible(&self, map: &GeneratingChunkMap<'_>) -> ChunkFuture {
    let stage = self.schedule_to(ChunkStatus::Full, map);
    let milestone: ChunkFuture = Arc::new(Completion::new());
    let light = Arc::clone(map.ctx().light());
    let pos = self.pos();
    let out = Arc::clone(&milestone);
    stage.on_complete(move |result| match result {
      Ok(chunk) => {
        let chunk = Arc::clone(chunk);
        light.light_ready(pos).on_complete(move |_| {
          out.complete(Ok(chunk));
        });
      }
      Err(err) => {
        out.complete(Err(err.clone()));
      }
    });
    milestone
  }

  fn schedule_promotion(
    self: &Arc<Self>,
    milestones: &mut Milestones,
    future: &ChunkFuture,
    tier: FullChunkStatus,
    map: &GeneratingChunkMap<'_>,
  ) {
    milestones.pending_confirmation.cancel();
    let confirmation = CancellationToken::new();
    milestones.pending_confirmation = confirmation.clone();

    let holder = Arc::clone(self);
    let listener = Arc::clone(map.ctx().listener());
    let main = map.ctx().main().clone();
    future.on_complete(move |result| {
      if result.is_err() {
        return;
      }
      if tier == FullChunkStatus::Full {
        holder.mark_dirty();
      }
      main.execute(Box::new(move || {
        if !confirmation.is_cancelled() {
          listener.on_full_status_change(holder.pos(), tier);
        }
      }));
    });
  }
}

/// Succeeds with `own`'s chunk once `own` and every neighbour succeeded.
/// The first failure among them fails it.
fn join_success(own: &ChunkFuture, neighbours: Vec<ChunkFuture>) -> ChunkFuture {
  let out: ChunkFuture = Arc::new(Completion::new());
  let remaining = Arc::new(AtomicUsize::new(neighbours.len() + 1));
  for future in neighbours.iter().chain(std::iter::once(own)) {
    let out = Arc::clone(&out);
    let own = Arc::clone(own);
    let remaining = Arc::clone(&remaining);
    future.on_complete(move |result| match result {
      Ok(_) => {
        if remaining.fetch_sub(1, Ordering::AcqRel) == 1 {
          if let Some(result) = own.get_now() {
            out.complete(result);
          }
        }
      }
      Err(err) => {
        out.complete(Err(err.clone()));
      }
    });
  }
  out
}
