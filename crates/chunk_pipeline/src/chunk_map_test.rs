use super::*;
use crate::constants::{BLOCK_TICKING_LEVEL, ENTITY_TICKING_LEVEL, FULL_CHUNK_LEVEL, MAX_LEVEL};
use crate::error::{ChunkFailure, ConfigError};
use crate::light::GatedLight;
use crate::listener::RecordingListener;
use crate::types::FullChunkStatus;

struct Harness {
  map: ChunkMap,
  worker: MainThreadExecutor,
  storage: Arc<MemoryStorage>,
  listener: Arc<RecordingListener>,
}

impl Harness {
  fn new(config: PipelineConfig) -> Self {
    let worker = MainThreadExecutor::new();
    let storage = Arc::new(MemoryStorage::new());
    let listener = Arc::new(RecordingListener::new());
    let map = ChunkMap::builder(config)
      .worker(Arc::new(worker.clone()))
      .storage(storage.clone())
      .listener(listener.clone())
      .build()
      .unwrap();
    Self {
      map,
      worker,
      storage,
      listener,
    }
  }

  fn ticks(&mut self, count: usize) {
    for _ in 0..count {
      self.map.tick();
      self.worker.run_pending();
    }
  }
}

/// No periodic saves and room to unload a whole pyramid in one tick.
fn quiet_config() -> PipelineConfig {
  PipelineConfig {
    save_interval_ticks: 0,
    max_unloads_per_tick: 1024,
    ..PipelineConfig::SMALL
  }
}

#[test]
fn test_request_stage_reaches_full() {
  let mut h = Harness::new(quiet_config());
  let future = h.map.request_stage(ChunkPos::ZERO, ChunkStatus::Full);
  assert!(!future.is_done());

  let chunk = h.map.run_until(&future, 50).unwrap().unwrap();
  assert_eq!(chunk.status, ChunkStatus::Full);
  assert_eq!(chunk.pos, ChunkPos::ZERO);
}

#[test]
fn test_settled_request_expires_and_unloads() {
  let mut h = Harness::new(quiet_config());
  let future = h.map.request_stage(ChunkPos::ZERO, ChunkStatus::Full);
  h.map.run_until(&future, 50).unwrap().unwrap();

  assert!(h.map.run_until_idle(200));
  assert_eq!(h.map.holder_count(), 0);
  assert_eq!(
    h.storage.chunk(ChunkPos::ZERO).map(|chunk| chunk.status),
    Some(ChunkStatus::Full)
  );

  let events: Vec<_> = h
    .listener
    .events()
    .into_iter()
    .filter(|(pos, _)| *pos == ChunkPos::ZERO)
    .map(|(_, status)| status)
    .collect();
  assert_eq!(events, vec![FullChunkStatus::Full, FullChunkStatus::Inaccessible]);
}

#[test]
fn test_requests_on_one_chunk_share_the_lowest_ticket() {
  let mut h = Harness::new(quiet_config());
  let full = h.map.request_stage(ChunkPos::ZERO, ChunkStatus::Full);
  let biomes = h.map.request_stage(ChunkPos::ZERO, ChunkStatus::Biomes);

  let tickets = h.map.distance_manager().tickets_at(ChunkPos::ZERO);
  assert_eq!(tickets.len(), 1);
  assert_eq!(tickets[0].level, FULL_CHUNK_LEVEL);

  h.map.run_until(&full, 50).unwrap().unwrap();
  assert_eq!(biomes.get_now().unwrap().unwrap().status, ChunkStatus::Biomes);
}

#[test]
fn test_status_above_ceiling_is_unloaded() {
  let mut h = Harness::new(quiet_config());
  // Empty only needs the outermost level, so the cell gets a holder.
  let empty = h.map.request_stage(ChunkPos::new(5, 5), ChunkStatus::Empty);
  assert!(h.map.updating_holder(ChunkPos::new(5, 5)).is_some());
  h.map.run_until(&empty, 10).unwrap().unwrap();

  let holder = Arc::clone(h.map.updating_holder(ChunkPos::new(5, 5)).unwrap());
  assert_eq!(holder.highest_allowed_status(), Some(ChunkStatus::StructureStarts));
  let full = holder.get_or_create_future(ChunkStatus::Full);
  assert_eq!(full.get_now(), Some(Err(ChunkFailure::Unloaded)));
}

#[test]
fn test_visible_map_promotes_once() {
  let mut h = Harness::new(quiet_config());
  h.map.add_ticket(TicketType::FORCED, ChunkPos::ZERO, MAX_LEVEL).unwrap();

  assert!(h.map.run_updates());
  assert!(h.map.updating_holder(ChunkPos::ZERO).is_some());
  assert!(h.map.visible_holder(ChunkPos::ZERO).is_none());

  assert!(h.map.promote_visible_map());
  assert!(h.map.visible_holder(ChunkPos::ZERO).is_some());
  assert_eq!(h.map.visible_snapshot().len(), 1);
  assert!(!h.map.promote_visible_map());
}

#[test]
fn test_claimed_neighbour_survives_unload_until_released() {
  let mut h = Harness::new(quiet_config());
  h.map.add_ticket(TicketType::FORCED, ChunkPos::ZERO, FULL_CHUNK_LEVEL).unwrap();
  // Tick without pumping the worker: the Full task exists but has not run.
  h.map.tick();
  let edge = ChunkPos::new(11, 0);
  assert_eq!(h.map.updating_holder(edge).unwrap().ticket_level(), MAX_LEVEL);
  assert_eq!(h.map.updating_holder(edge).unwrap().generation_ref_count(), 1);

  assert!(h.map.remove_ticket(TicketType::FORCED, ChunkPos::ZERO));
  h.map.tick();
  assert_eq!(h.map.holder_count(), 23 * 23);
  assert_eq!(h.map.pending_unload_count(), 23 * 23);
  assert!(h.map.updating_holder(edge).is_some());

  // The cancelled task runs, sees the cancellation and drops its claims.
  h.worker.run_pending();
  assert_eq!(h.map.updating_holder(edge).unwrap().generation_ref_count(), 0);

  h.map.tick();
  assert_eq!(h.map.holder_count(), 0);
  assert_eq!(h.map.pending_unload_count(), 0);
}

#[test]
fn test_failed_save_keeps_holder_until_write_succeeds() {
  let mut h = Harness::new(quiet_config());
  let pos = ChunkPos::new(3, -2);
  h.map.add_ticket(TicketType::FORCED, pos, MAX_LEVEL).unwrap();
  let future = h.map.request_stage(pos, ChunkStatus::StructureStarts);
  h.map.run_until(&future, 20).unwrap().unwrap();
  assert!(h.map.updating_holder(pos).unwrap().is_dirty());

  h.storage.set_fail_writes(true);
  h.map.remove_ticket(TicketType::FORCED, pos);
  h.ticks(3);
  assert_eq!(h.map.holder_count(), 1);
  assert_eq!(h.map.pending_unload_count(), 1);
  assert!(h.storage.is_empty());

  h.storage.set_fail_writes(false);
  h.ticks(1);
  assert_eq!(h.map.holder_count(), 0);
  assert_eq!(
    h.storage.chunk(pos).map(|chunk| chunk.status),
    Some(ChunkStatus::StructureStarts)
  );
}

#[test]
fn test_periodic_save_pass_writes_dirty_chunks() {
  let mut h = Harness::new(PipelineConfig {
    save_interval_ticks: 1,
    ..quiet_config()
  });
  let pos = ChunkPos::new(-4, 7);
  h.map.add_ticket(TicketType::FORCED, pos, MAX_LEVEL).unwrap();
  let future = h.map.request_stage(pos, ChunkStatus::StructureStarts);
  h.map.run_until(&future, 20).unwrap().unwrap();

  h.ticks(2);
  let holder = h.map.updating_holder(pos).unwrap();
  assert!(!holder.is_dirty());
  assert_eq!(holder.pending_work_count(), 0);
  assert!(h.storage.contains(pos));
}

#[test]
fn test_save_all_flushes_dirty_chunks() {
  let mut h = Harness::new(quiet_config());
  let pos = ChunkPos::new(1, 1);
  h.map.add_ticket(TicketType::FORCED, pos, MAX_LEVEL).unwrap();
  let future = h.map.request_stage(pos, ChunkStatus::StructureStarts);
  h.map.run_until(&future, 20).unwrap().unwrap();

  assert_eq!(h.map.save_all(), 1);
  assert_eq!(h.map.save_all(), 0);
  assert!(h.storage.contains(pos));
}

#[test]
fn test_player_chunks_become_entity_ticking() {
  let mut h = Harness::new(quiet_config());
  h.map.add_player(SectionPos::new(0, 4, 0), 7);
  h.map.tick();

  let holder = Arc::clone(h.map.updating_holder(ChunkPos::ZERO).unwrap());
  let future = holder.entity_ticking_future();
  h.map.run_until(&future, 100).unwrap().unwrap();
  assert!(h.map.run_until_idle(500));

  assert_eq!(h.listener.last_status(ChunkPos::ZERO), Some(FullChunkStatus::EntityTicking));
  for pos in ChunkPos::ZERO.square_around(2) {
    let holder = h.map.updating_holder(pos).unwrap();
    assert_eq!(holder.full_status(), FullChunkStatus::EntityTicking, "{pos}");
  }
  assert_eq!(h.map.distance_manager().ticket_throttle().in_execution_count(), 0);
}

#[test]
fn test_builder_rejects_invalid_config() {
  let err = ChunkMap::builder(PipelineConfig {
    view_distance: 0,
    ..PipelineConfig::SMALL
  })
  .worker(Arc::new(MainThreadExecutor::new()))
  .build()
  .unwrap_err();
  assert!(matches!(err, PipelineError::Config(ConfigError::Invalid(_))));
}

#[test]
fn test_full_visibility_waits_for_light() {
  let worker = MainThreadExecutor::new();
  let light = Arc::new(GatedLight::new());
  let listener = Arc::new(RecordingListener::new());
  let mut map = ChunkMap::builder(quiet_config())
    .worker(Arc::new(worker.clone()))
    .light(light.clone())
    .listener(listener.clone())
    .build()
    .unwrap();
  map.add_ticket(TicketType::FORCED, ChunkPos::ZERO, FULL_CHUNK_LEVEL).unwrap();
  map.tick();

  let holder = Arc::clone(map.updating_holder(ChunkPos::ZERO).unwrap());
  let stage = holder.get_or_create_future(ChunkStatus::Full);
  map.run_until(&stage, 100).unwrap().unwrap();
  map.tick();
  assert_eq!(holder.full_status(), FullChunkStatus::Inaccessible);
  assert_eq!(listener.last_status(ChunkPos::ZERO), None);

  light.open(ChunkPos::ZERO);
  map.tick();
  assert_eq!(holder.full_status(), FullChunkStatus::Full);
  assert_eq!(listener.last_status(ChunkPos::ZERO), Some(FullChunkStatus::Full));
}

#[test]
fn test_loading_only_ticket_stops_at_full() {
  let mut h = Harness::new(quiet_config());
  h.map
    .add_ticket(TicketType::PLAYER_LOADING, ChunkPos::ZERO, ENTITY_TICKING_LEVEL)
    .unwrap();
  assert!(h.map.run_until_idle(500));

  let holder = Arc::clone(h.map.updating_holder(ChunkPos::ZERO).unwrap());
  assert_eq!(holder.ticket_level(), ENTITY_TICKING_LEVEL);
  assert_eq!(holder.simulation_level(), FULL_CHUNK_LEVEL + 1);
  assert_eq!(holder.target_full_status(), FullChunkStatus::Full);
  assert_eq!(holder.full_status(), FullChunkStatus::Full);
  assert_eq!(
    holder.entity_ticking_future().get_now(),
    Some(Err(ChunkFailure::Unloaded))
  );
  assert_eq!(h.listener.last_status(ChunkPos::ZERO), Some(FullChunkStatus::Full));

  // A simulation ticket alone lifts the cap.
  h.map
    .add_ticket(TicketType::PLAYER_SIMULATION, ChunkPos::ZERO, ENTITY_TICKING_LEVEL)
    .unwrap();
  assert!(h.map.run_until_idle(500));
  assert_eq!(holder.ticket_level(), ENTITY_TICKING_LEVEL);
  assert_eq!(holder.simulation_level(), ENTITY_TICKING_LEVEL);
  assert_eq!(holder.full_status(), FullChunkStatus::EntityTicking);
  assert_eq!(
    h.listener.last_status(ChunkPos::ZERO),
    Some(FullChunkStatus::EntityTicking)
  );
}

#[test]
fn test_simulation_distance_caps_edge_ticking() {
  let mut h = Harness::new(quiet_config());
  h.map.add_player(SectionPos::new(0, 4, 0), 1);
  assert!(h.map.run_until_idle(1_000));

  let edge = ChunkPos::new(2, 0);
  let holder = Arc::clone(h.map.updating_holder(edge).unwrap());
  assert_eq!(holder.full_status(), FullChunkStatus::EntityTicking);

  h.map.update_simulation_distance(1);
  assert!(h.map.run_until_idle(200));
  for pos in ChunkPos::ZERO.square_around(1) {
    let inner = h.map.updating_holder(pos).unwrap();
    assert_eq!(inner.full_status(), FullChunkStatus::EntityTicking, "{pos}");
  }
  assert_eq!(holder.ticket_level(), ENTITY_TICKING_LEVEL);
  assert_eq!(holder.simulation_level(), BLOCK_TICKING_LEVEL);
  assert_eq!(holder.full_status(), FullChunkStatus::BlockTicking);
  assert_eq!(h.listener.last_status(edge), Some(FullChunkStatus::BlockTicking));

  h.map.update_simulation_distance(2);
  assert!(h.map.run_until_idle(200));
  assert_eq!(holder.full_status(), FullChunkStatus::EntityTicking);
  assert_eq!(h.listener.last_status(edge), Some(FullChunkStatus::EntityTicking));
}

#[test]
fn test_block_ticking_waits_for_neighbours_to_be_full() {
  let worker = MainThreadExecutor::new();
  let light = Arc::new(GatedLight::new());
  let listener = Arc::new(RecordingListener::new());
  let mut map = ChunkMap::builder(quiet_config())
    .worker(Arc::new(worker.clone()))
    .light(light.clone())
    .listener(listener.clone())
    .build()
    .unwrap();
  let late = ChunkPos::new(1, 0);
  for pos in ChunkPos::ZERO.square_around(1).filter(|pos| *pos != late) {
    light.open(pos);
  }
  map.add_ticket(TicketType::FORCED, ChunkPos::ZERO, BLOCK_TICKING_LEVEL).unwrap();
  assert!(map.run_until_idle(500));

  let holder = Arc::clone(map.updating_holder(ChunkPos::ZERO).unwrap());
  assert_eq!(holder.target_full_status(), FullChunkStatus::BlockTicking);
  assert_eq!(holder.full_status(), FullChunkStatus::Full);
  assert!(!holder.full_status_future(FullChunkStatus::BlockTicking).is_done());
  assert_eq!(map.updating_holder(late).unwrap().full_status(), FullChunkStatus::Inaccessible);

  light.open(late);
  map.tick();
  assert_eq!(holder.full_status(), FullChunkStatus::BlockTicking);
  assert_eq!(listener.last_status(ChunkPos::ZERO), Some(FullChunkStatus::BlockTicking));
  assert_eq!(listener.last_status(late), Some(FullChunkStatus::Full));
}

#[test]
fn test_player_changes_count_as_pending_work() {
  let mut h = Harness::new(quiet_config());
  h.map.add_player(SectionPos::new(0, 4, 0), 1);
  assert!(!h.map.is_idle());
  assert!(h.map.run_until_idle(1_000));

  // Same chunk, another section.
  h.map.add_player(SectionPos::new(0, 9, 0), 2);
  assert!(!h.map.is_idle());
  assert!(h.map.run_until_idle(10));
  assert_eq!(
    h.map.distance_manager().section_distance_to_player(SectionPos::new(0, 9, 0)),
    0
  );
}
