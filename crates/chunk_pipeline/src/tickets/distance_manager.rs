//! DistanceManager - tickets in, per-chunk loading and simulation levels out.
//!
//! # Fields
//!
//! ```text
//!   TicketStorage ──min loading level──▶ loading field     (ceiling 45)
//!                 ──min sim level──────▶ simulation field  (ceiling 34)
//!   players ─────▶ natural spawn tracker, player ticket tracker,
//!                  section proximity field
//! ```
//!
//! Ticket mutations only set source levels. Nothing propagates until
//! [`DistanceManager::run_all_updates`], which converges every field and
//! returns the net per-chunk changes for the orchestrator to apply.

use std::sync::Arc;

use crossbeam_channel::Receiver;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::{debug, trace};

use super::player_trackers::{FixedPlayerDistanceTracker, PlayerTicketTracker, TicketRequest};
use super::ticket::{Ticket, TicketStorage, TicketType};
use super::PlayerId;
use crate::config::{PipelineConfig, MAX_VIEW_DISTANCE};
use crate::constants::{
  ENTITY_TICKING_LEVEL, FULL_CHUNK_LEVEL, MAX_LEVEL, NATURAL_SPAWN_RADIUS, PLAYER_TICKET_LEVEL,
};
use crate::dispatch::{ChunkTaskDispatcher, Throttle};
use crate::error::TicketError;
use crate::propagation::{ChunkDistanceField, LevelChange, SectionDistanceField};
use crate::threading::Executor;
use crate::types::{ChunkPos, SectionPos};

/// Unreached level of the loading field.
pub const LOADING_CEILING: u8 = MAX_LEVEL + 1;

/// Unreached level of the simulation field.
pub const SIMULATION_CEILING: u8 = FULL_CHUNK_LEVEL + 1;

/// Net level changes from one [`DistanceManager::run_all_updates`].
#[derive(Debug, Default)]
pub struct LevelUpdates {
  pub loading: Vec<LevelChange<ChunkPos>>,
  pub simulation: Vec<LevelChange<ChunkPos>>,
}

impl LevelUpdates {
  #[inline]
  pub fn is_empty(&self) -> bool {
    self.loading.is_empty() && self.simulation.is_empty()
  }
}

/// Level of the simulation ticket placed on each player's chunk.
#[inline]
pub fn player_simulation_level(simulation_distance: u8) -> u8 {
  ENTITY_TICKING_LEVEL.saturating_sub(simulation_distance)
}

pub struct DistanceManager {
  tickets: TicketStorage,
  loading: ChunkDistanceField,
  simulation: ChunkDistanceField,

  natural_spawn: FixedPlayerDistanceTracker,
  player_tickets: PlayerTicketTracker,
  section_proximity: SectionDistanceField,
  players_per_chunk: FxHashMap<ChunkPos, FxHashSet<PlayerId>>,
  players_per_section: FxHashMap<SectionPos, FxHashSet<PlayerId>>,

  requests: Receiver<TicketRequest>,
  tickets_to_release: Vec<ChunkPos>,

  simulation_distance: u8,
  propagation_budget: usize,
}

impl DistanceManager {
  /// `main` is the executor the player ticket throttle runs on.
  pub fn new(config: &PipelineConfig, main: Arc<dyn Executor>) -> Self {
    let (sender, requests) = crossbeam_channel::unbounded();
    Self {
      tickets: TicketStorage::new(),
      loading: ChunkDistanceField::new(LOADING_CEILING),
      simulation: ChunkDistanceField::new(SIMULATION_CEILING),
      natural_spawn: FixedPlayerDistanceTracker::new(NATURAL_SPAWN_RADIUS),
      player_tickets: PlayerTicketTracker::new(
        MAX_VIEW_DISTANCE,
        config.view_distance,
        config.player_ticket_throttle,
        main,
        sender,
      ),
      section_proximity: SectionDistanceField::new(NATURAL_SPAWN_RADIUS + 1),
      players_per_chunk: FxHashMap::default(),
      players_per_section: FxHashMap::default(),
      requests,
      tickets_to_release: Vec::new(),
      simulation_distance: config.simulation_distance,
      propagation_budget: config.propagation_budget,
    }
  }

  // ===========================================================================
  // Tickets
  // ===========================================================================

  /// Add or replace the `ticket_type` ticket on `pos`.
  pub fn add_ticket(
    &mut self,
    ticket_type: TicketType,
    pos: ChunkPos,
    level: u8,
  ) -> Result<(), TicketError> {
    if !ticket_type.can_load() {
      return Err(TicketError::CannotLoad(ticket_type.name));
    }
    if level > MAX_LEVEL {
      return Err(TicketError::LevelOutOfRange {
        level,
        max: MAX_LEVEL,
      });
    }
    trace!(%pos, ticket = %ticket_type, level, "add ticket");
    self.tickets.insert(pos, Ticket::new(ticket_type, level));
    self.refresh_sources(pos);
    Ok(())
  }

  /// Remove the `ticket_type` ticket on `pos`. Returns whether one existed.
  pub fn remove_ticket(&mut self, ticket_type: TicketType, pos: ChunkPos) -> bool {
    self.remove_matching(ticket_type, pos, None)
  }

  /// Remove the `ticket_type` ticket on `pos` only if it sits at `level`.
  pub fn remove_ticket_at_level(&mut self, ticket_type: TicketType, pos: ChunkPos, level: u8) -> bool {
    self.remove_matching(ticket_type, pos, Some(level))
  }

  /// Ticket that makes every chunk within `radius` of `pos` fully loaded.
  pub fn add_region_ticket(
    &mut self,
    ticket_type: TicketType,
    pos: ChunkPos,
    radius: u8,
  ) -> Result<(), TicketError> {
    self.add_ticket(ticket_type, pos, FULL_CHUNK_LEVEL.saturating_sub(radius))
  }

  pub fn remove_region_ticket(&mut self, ticket_type: TicketType, pos: ChunkPos, radius: u8) -> bool {
    self.remove_ticket_at_level(ticket_type, pos, FULL_CHUNK_LEVEL.saturating_sub(radius))
  }

  fn remove_matching(&mut self, ticket_type: TicketType, pos: ChunkPos, level: Option<u8>) -> bool {
    let removed = self.tickets.remove(pos, ticket_type, level).is_some();
    if removed {
      trace!(%pos, ticket = %ticket_type, "remove ticket");
      self.refresh_sources(pos);
    }
    removed
  }

  /// Count timed tickets down by one tick and drop the expired ones.
  pub fn purge_expired(&mut self) {
    let affected = self.tickets.purge_expired();
    if !affected.is_empty() {
      debug!(chunks = affected.len(), "purged expired tickets");
    }
    for pos in affected {
      self.refresh_sources(pos);
    }
  }

  fn refresh_sources(&mut self, pos: ChunkPos) {
    let loading = self.tickets.loading_level(pos).unwrap_or(LOADING_CEILING);
    self.loading.set_source_level(pos, loading);
    let simulation = self.tickets.simulation_level(pos).unwrap_or(SIMULATION_CEILING);
    self.simulation.set_source_level(pos, simulation);
  }

  // ===========================================================================
  // Propagation
  // ===========================================================================

  /// Apply queued ticket requests, converge every field and return the net
  /// loading and simulation level changes.
  #[tracing::instrument(skip_all, name = "distance::run_all_updates")]
  pub fn run_all_updates(&mut self) -> LevelUpdates {
    self.apply_ticket_requests();

    let budget = self.propagation_budget;
    self.natural_spawn.run_updates(budget);
    self.player_tickets.run_all_updates(budget);
    self.section_proximity.run_until_converged(budget);
    self.section_proximity.drain_changes();

    self.loading.run_until_converged(budget);
    self.simulation.run_until_converged(budget);

    let updates = LevelUpdates {
      loading: self.loading.drain_changes(),
      simulation: self.simulation.drain_changes(),
    };
    if !updates.is_empty() {
      trace!(
        loading = updates.loading.len(),
        simulation = updates.simulation.len(),
        "level changes"
      );
    }
    updates
  }

  /// Whether anything would change on the next [`Self::run_all_updates`].
  pub fn has_pending_updates(&self) -> bool {
    !self.requests.is_empty()
      || self.natural_spawn.has_work()
      || self.player_tickets.has_work()
      || self.section_proximity.has_work()
      || self.loading.has_work()
      || self.simulation.has_work()
  }

  fn apply_ticket_requests(&mut self) {
    while let Ok(request) = self.requests.try_recv() {
      match request {
        TicketRequest::Add(pos) => {
          if self.player_tickets.has_ticket(pos) {
            self.tickets.insert(pos, Ticket::new(TicketType::PLAYER_LOADING, PLAYER_TICKET_LEVEL));
            self.refresh_sources(pos);
            self.tickets_to_release.push(pos);
          } else {
            self.player_tickets.throttle().release(pos, || {}, false);
          }
        }
        TicketRequest::Remove(pos) => {
          self.remove_ticket(TicketType::PLAYER_LOADING, pos);
        }
      }
    }
  }

  /// Chunks that just received a player ticket. Their throttle slot should be
  /// released once they are visible.
  pub fn take_tickets_to_release(&mut self) -> Vec<ChunkPos> {
    std::mem::take(&mut self.tickets_to_release)
  }

  #[inline]
  pub fn ticket_throttle(&self) -> &ChunkTaskDispatcher<Throttle> {
    self.player_tickets.throttle()
  }

  // ===========================================================================
  // Players
  // ===========================================================================

  pub fn add_player(&mut self, section: SectionPos, player: PlayerId) {
    let chunk = section.chunk();
    let chunk_players = self.players_per_chunk.entry(chunk).or_default();
    let first_in_chunk = chunk_players.is_empty();
    chunk_players.insert(player);
    if first_in_chunk {
      self.natural_spawn.set_player_present(chunk, true);
      self.player_tickets.set_player_present(chunk, true);
      self.tickets.insert(
        chunk,
        Ticket::new(
          TicketType::PLAYER_SIMULATION,
          player_simulation_level(self.simulation_distance),
        ),
      );
      self.refresh_sources(chunk);
    }

    let section_players = self.players_per_section.entry(section).or_default();
    if section_players.is_empty() {
      self.section_proximity.set_source_level(section, 0);
    }
    section_players.insert(player);
  }

  pub fn remove_player(&mut self, section: SectionPos, player: PlayerId) {
    let chunk = section.chunk();
    if let Some(chunk_players) = self.players_per_chunk.get_mut(&chunk) {
      chunk_players.remove(&player);
      if chunk_players.is_empty() {
        self.players_per_chunk.remove(&chunk);
        self.natural_spawn.set_player_present(chunk, false);
        self.player_tickets.set_player_present(chunk, false);
        self.tickets.remove(chunk, TicketType::PLAYER_SIMULATION, None);
        self.refresh_sources(chunk);
      }
    }

    if let Some(section_players) = self.players_per_section.get_mut(&section) {
      section_players.remove(&player);
      if section_players.is_empty() {
        self.players_per_section.remove(&section);
        self.section_proximity.clear_source(section);
      }
    }
  }

  pub fn move_player(&mut self, from: SectionPos, to: SectionPos, player: PlayerId) {
    if from != to {
      self.remove_player(from, player);
      self.add_player(to, player);
    }
  }

  pub fn update_view_distance(&mut self, view_distance: u8) {
    let view_distance = view_distance.min(MAX_VIEW_DISTANCE);
    debug!(view_distance, "view distance changed");
    self.player_tickets.update_view_distance(view_distance);
  }

  pub fn update_simulation_distance(&mut self, simulation_distance: u8) {
    if simulation_distance == self.simulation_distance {
      return;
    }
    debug!(simulation_distance, "simulation distance changed");
    self.simulation_distance = simulation_distance;
    let level = player_simulation_level(simulation_distance);
    let chunks: Vec<_> = self.players_per_chunk.keys().copied().collect();
    for chunk in chunks {
      self.tickets.insert(chunk, Ticket::new(TicketType::PLAYER_SIMULATION, level));
      self.refresh_sources(chunk);
    }
  }

  // ===========================================================================
  // Queries
  // ===========================================================================

  /// Converged loading level (as of the last update run).
  #[inline]
  pub fn loading_level(&self, pos: ChunkPos) -> u8 {
    self.loading.level(pos)
  }

  #[inline]
  pub fn simulation_level(&self, pos: ChunkPos) -> u8 {
    self.simulation.level(pos)
  }

  pub fn tickets_at(&self, pos: ChunkPos) -> &[Ticket] {
    self.tickets.get(pos)
  }

  #[inline]
  pub fn ticket_count(&self) -> usize {
    self.tickets.len()
  }

  pub fn has_tickets(&self, pos: ChunkPos) -> bool {
    self.tickets.contains(pos)
  }

  /// Whether any ticket asks for the world to stay active.
  pub fn has_keep_loaded_tickets(&self) -> bool {
    self.tickets.any(|t| t.ticket_type.keep_loaded)
  }

  pub fn has_player_in_spawn_range(&self, pos: ChunkPos) -> bool {
    self.natural_spawn.in_range(pos)
  }

  pub fn naturally_spawnable_chunk_count(&self) -> usize {
    self.natural_spawn.chunk_count()
  }

  /// Sections between `section` and the nearest section holding a player.
  pub fn section_distance_to_player(&self, section: SectionPos) -> u8 {
    self.section_proximity.level(section)
  }

  pub fn player_count(&self) -> usize {
    self.players_per_chunk.values().map(FxHashSet::len).sum()
  }

  #[inline]
  pub fn view_distance(&self) -> u8 {
    self.player_tickets.view_distance()
  }

  #[inline]
  pub fn simulation_distance(&self) -> u8 {
    self.simulation_distance
  }
}

#[cfg(test)]
#[path = "distance_manager_test.rs"]
mod distance_manager_test;
