//! Read-only introspection over a [`ChunkMap`].

use std::fmt;

use crate::chunk::ChunkHolder;
use crate::chunk_map::ChunkMap;
use crate::tickets::Ticket;
use crate::types::{ChunkPos, ChunkStatus, FullChunkStatus};

/// Everything the map knows about one cell.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChunkDebugInfo {
  pub pos: ChunkPos,
  pub loading_level: u8,
  pub simulation_level: u8,
  pub allowed_status: Option<ChunkStatus>,
  pub latest_status: Option<ChunkStatus>,
  pub full_status: FullChunkStatus,
  pub pending_futures: Vec<ChunkStatus>,
  pub ref_count: usize,
  pub has_task: bool,
  pub dirty: bool,
  pub tickets: Vec<Ticket>,
}

impl ChunkDebugInfo {
  fn from_holder(holder: &ChunkHolder, tickets: &[Ticket]) -> Self {
    Self {
      pos: holder.pos(),
      loading_level: holder.ticket_level(),
      simulation_level: holder.simulation_level(),
      allowed_status: holder.highest_allowed_status(),
      latest_status: holder.latest_status(),
      full_status: holder.full_status(),
      pending_futures: holder.pending_futures(),
      ref_count: holder.generation_ref_count(),
      has_task: holder.has_task(),
      dirty: holder.is_dirty(),
      tickets: tickets.to_vec(),
    }
  }
}

impl fmt::Display for ChunkDebugInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let status = |status: Option<ChunkStatus>| status.map_or("-", ChunkStatus::name);
    write!(
      f,
      "{} level={} sim={} allowed={} latest={} full={:?} refs={}",
      self.pos,
      self.loading_level,
      self.simulation_level,
      status(self.allowed_status),
      status(self.latest_status),
      self.full_status,
      self.ref_count,
    )?;
    if self.has_task {
      f.write_str(" task")?;
    }
    if !self.pending_futures.is_empty() {
      write!(f, " pending={:?}", self.pending_futures)?;
    }
    for ticket in &self.tickets {
      write!(f, " [{ticket}]")?;
    }
    Ok(())
  }
}

/// Aggregate counters for dashboards and the simulator's status line.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineStats {
  pub tick: u64,
  pub holders: usize,
  pub visible_holders: usize,
  pub full_chunks: usize,
  pub entity_ticking_chunks: usize,
  pub active_tasks: usize,
  pub claimed_holders: usize,
  pub dirty_holders: usize,
  pub pending_unloads: usize,
  pub pending_requests: usize,
  pub worldgen_queued: usize,
  pub worldgen_running: usize,
  pub ticket_throttle_queued: usize,
  pub ticket_throttle_in_execution: usize,
  pub tickets: usize,
  pub players: usize,
}

impl fmt::Display for PipelineStats {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(
      f,
      "tick {} | holders {} (visible {}, full {}, ticking {}) | tasks {} | worldgen {}+{} | throttle {}+{} | unloads {} | tickets {} | players {}",
      self.tick,
      self.holders,
      self.visible_holders,
      self.full_chunks,
      self.entity_ticking_chunks,
      self.active_tasks,
      self.worldgen_queued,
      self.worldgen_running,
      self.ticket_throttle_queued,
      self.ticket_throttle_in_execution,
      self.pending_unloads,
      self.tickets,
      self.players,
    )
  }
}

impl ChunkMap {
  pub fn debug_info(&self, pos: ChunkPos) -> Option<ChunkDebugInfo> {
    let holder = self.updating_holder(pos)?;
    Some(ChunkDebugInfo::from_holder(holder, self.distance_manager().tickets_at(pos)))
  }

  /// Info for every holder, sorted by position.
  pub fn debug_all(&self) -> Vec<ChunkDebugInfo> {
    let mut infos: Vec<_> = self
      .holders()
      .map(|holder| ChunkDebugInfo::from_holder(holder, self.distance_manager().tickets_at(holder.pos())))
      .collect();
    infos.sort_by_key(|info| info.pos);
    infos
  }

  pub fn stats(&self) -> PipelineStats {
    let mut stats = PipelineStats {
      tick: self.tick_count(),
      holders: self.holder_count(),
      visible_holders: self.visible_snapshot().len(),
      pending_unloads: self.pending_unload_count(),
      pending_requests: self.pending_request_count(),
      worldgen_queued: self.context().worldgen().queued_task_count(),
      worldgen_running: self.context().worldgen().running_task_count(),
      ticket_throttle_queued: self.distance_manager().ticket_throttle().queued_task_count(),
      ticket_throttle_in_execution: self.distance_manager().ticket_throttle().in_execution_count(),
      tickets: self.distance_manager().ticket_count(),
      players: self.distance_manager().player_count(),
      ..PipelineStats::default()
    };
    for holder in self.holders() {
      let full_status = holder.full_status();
      stats.full_chunks += usize::from(full_status >= FullChunkStatus::Full);
      stats.entity_ticking_chunks += usize::from(full_status == FullChunkStatus::EntityTicking);
      stats.active_tasks += usize::from(holder.has_task());
      stats.claimed_holders += usize::from(holder.generation_ref_count() > 0);
      stats.dirty_holders += usize::from(holder.is_dirty());
    }
    stats
  }
}

#[cfg(test)]
mod tests {
  use std::sync::Arc;

  use super::*;
  use crate::config::PipelineConfig;
  use crate::constants::MAX_LEVEL;
  use crate::threading::{Executor, MainThreadExecutor};
  use crate::tickets::TicketType;

  #[test]
  fn test_debug_info_reports_levels_and_tickets() {
    let worker = MainThreadExecutor::new();
    let mut map = ChunkMap::builder(PipelineConfig::SMALL)
      .worker(Arc::new(worker.clone()))
      .build()
      .unwrap();
    let pos = ChunkPos::new(2, 3);
    map.add_ticket(TicketType::FORCED, pos, MAX_LEVEL).unwrap();
    map.tick();

    let info = map.debug_info(pos).unwrap();
    assert_eq!(info.loading_level, MAX_LEVEL);
    assert_eq!(info.allowed_status, Some(ChunkStatus::StructureStarts));
    assert_eq!(info.latest_status, None);
    assert_eq!(info.full_status, FullChunkStatus::Inaccessible);
    assert_eq!(info.tickets.len(), 1);
    assert!(info.to_string().starts_with("[2, 3] level=44"));

    assert!(map.debug_info(ChunkPos::ZERO).is_none());
    assert_eq!(map.debug_all().len(), 1);

    let stats = map.stats();
    assert_eq!(stats.holders, 1);
    assert_eq!(stats.visible_holders, 1);
    assert_eq!(stats.tickets, 1);
    assert_eq!(stats.full_chunks, 0);
    worker.run_pending();
  }
}
