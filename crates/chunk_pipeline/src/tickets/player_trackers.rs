//! Distance-to-nearest-player trackers.
//!
//! ```text
//!   players ──▶ FixedPlayerDistanceTracker (radius 8)   natural spawn range
//!          └──▶ PlayerTicketTracker (radius = view)      PLAYER_LOADING tickets
//!                    │ gained / lost "has ticket"
//!                    ▼
//!              throttled dispatcher (main thread) ──▶ TicketRequest channel
//! ```
//!
//! The ticket tracker never touches ticket storage itself. Gaining a ticket is
//! queued on a throttled dispatcher whose task only sends a
//! [`TicketRequest::Add`]; the distance manager applies it on its next update
//! and re-checks that the chunk still qualifies. Bursts of player movement are
//! therefore coalesced and admitted a few chunks at a time.

use std::sync::Arc;

use crossbeam_channel::Sender;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::dispatch::{ChunkTaskDispatcher, Throttle};
use crate::propagation::{ChunkDistanceField, LevelChange};
use crate::threading::Executor;
use crate::types::ChunkPos;

/// Deferred ticket mutation produced by the player ticket throttler.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TicketRequest {
  Add(ChunkPos),
  Remove(ChunkPos),
}

// =============================================================================
// FixedPlayerDistanceTracker
// =============================================================================

/// Chessboard distance to the nearest chunk holding a player, up to a bound.
pub struct FixedPlayerDistanceTracker {
  field: ChunkDistanceField,
  max_distance: u8,
}

impl FixedPlayerDistanceTracker {
  pub fn new(max_distance: u8) -> Self {
    Self {
      field: ChunkDistanceField::new(max_distance + 1),
      max_distance,
    }
  }

  #[inline]
  pub fn max_distance(&self) -> u8 {
    self.max_distance
  }

  pub fn set_player_present(&mut self, pos: ChunkPos, present: bool) {
    if present {
      self.field.set_source_level(pos, 0);
    } else {
      self.field.clear_source(pos);
    }
  }

  /// Distance to the nearest player, or `max_distance + 1` if out of range.
  #[inline]
  pub fn level(&self, pos: ChunkPos) -> u8 {
    self.field.level(pos)
  }

  #[inline]
  pub fn in_range(&self, pos: ChunkPos) -> bool {
    self.level(pos) <= self.max_distance
  }

  /// Chunks within range of some player.
  #[inline]
  pub fn chunk_count(&self) -> usize {
    self.field.reached_count()
  }

  pub fn iter_levels(&self) -> impl Iterator<Item = (ChunkPos, u8)> + '_ {
    self.field.iter_levels()
  }

  #[inline]
  pub fn has_work(&self) -> bool {
    self.field.has_work()
  }

  /// Converge and return the net level changes.
  pub fn run_updates(&mut self, slice: usize) -> Vec<LevelChange<ChunkPos>> {
    self.field.run_until_converged(slice);
    self.field.drain_changes()
  }
}

// =============================================================================
// PlayerTicketTracker
// =============================================================================

/// Issues `PLAYER_LOADING` tickets for chunks within view distance of a player.
pub struct PlayerTicketTracker {
  distances: FixedPlayerDistanceTracker,
  view_distance: u8,
  queue_levels: Arc<Mutex<FxHashMap<ChunkPos, u8>>>,
  throttle: ChunkTaskDispatcher<Throttle>,
  requests: Sender<TicketRequest>,
}

impl PlayerTicketTracker {
  /// `main` runs both the throttle's decisions and its tasks.
  pub fn new(
    max_distance: u8,
    view_distance: u8,
    throttle_limit: usize,
    main: Arc<dyn Executor>,
    requests: Sender<TicketRequest>,
  ) -> Self {
    Self {
      distances: FixedPlayerDistanceTracker::new(max_distance),
      view_distance,
      queue_levels: Arc::new(Mutex::new(FxHashMap::default())),
      throttle: ChunkTaskDispatcher::throttled(
        "player_tickets",
        throttle_limit,
        Arc::clone(&main),
        main,
      ),
      requests,
    }
  }

  #[inline]
  pub fn view_distance(&self) -> u8 {
    self.view_distance
  }

  #[inline]
  pub fn throttle(&self) -> &ChunkTaskDispatcher<Throttle> {
    &self.throttle
  }

  #[inline]
  pub fn level(&self, pos: ChunkPos) -> u8 {
    self.distances.level(pos)
  }

  #[inline]
  fn have_ticket_for(level: u8, view_distance: u8) -> bool {
    level <= view_distance
  }

  /// Whether `pos` is currently within view distance of a player.
  pub fn has_ticket(&self, pos: ChunkPos) -> bool {
    Self::have_ticket_for(self.level(pos), self.view_distance)
  }

  pub fn set_player_present(&mut self, pos: ChunkPos, present: bool) {
    self.distances.set_player_present(pos, present);
  }

  /// Player distances still need to converge.
  #[inline]
  pub fn has_work(&self) -> bool {
    self.distances.has_work()
  }

  /// Converge distances and turn crossings of the view radius into requests.
  pub fn run_all_updates(&mut self, slice: usize) {
    for change in self.distances.run_updates(slice) {
      self.reprioritize(change.pos, change.new);
      let had = Self::have_ticket_for(change.old, self.view_distance);
      let has = Self::have_ticket_for(change.new, self.view_distance);
      self.on_ticket_change(change.pos, change.new, had, has);
    }
  }

  pub fn update_view_distance(&mut self, view_distance: u8) {
    let levels: Vec<_> = self.distances.iter_levels().collect();
    for (pos, level) in levels {
      let had = Self::have_ticket_for(level, self.view_distance);
      let has = Self::have_ticket_for(level, view_distance);
      self.on_ticket_change(pos, level, had, has);
    }
    self.view_distance = view_distance;
  }

  fn reprioritize(&self, pos: ChunkPos, level: u8) {
    let ceiling = self.distances.max_distance() + 1;
    let old_levels = Arc::clone(&self.queue_levels);
    let new_levels = Arc::clone(&self.queue_levels);
    self.throttle.on_level_change(
      pos,
      move || old_levels.lock().get(&pos).copied().unwrap_or(ceiling),
      level,
      move |level| {
        let mut levels = new_levels.lock();
        if level >= ceiling {
          levels.remove(&pos);
        } else {
          levels.insert(pos, level);
        }
      },
    );
  }

  fn on_ticket_change(&self, pos: ChunkPos, level: u8, had: bool, has: bool) {
    if had == has {
      return;
    }
    let requests = self.requests.clone();
    if has {
      self.queue_levels.lock().insert(pos, level);
      self.throttle.submit(
        move || {
          let _ = requests.send(TicketRequest::Add(pos));
        },
        pos,
        move || level,
      );
    } else {
      self.throttle.release(
        pos,
        move || {
          let _ = requests.send(TicketRequest::Remove(pos));
        },
        true,
      );
    }
  }
}

#[cfg(test)]
#[path = "player_trackers_test.rs"]
mod player_trackers_test;
