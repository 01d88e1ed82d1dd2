//! End-to-end behaviour of the streaming pipeline through the public API.

use std::sync::Arc;
use std::time::Duration;

use chunk_pipeline::chunk::{ChunkStep, ChunkWindow};
use chunk_pipeline::tickets::LOADING_CEILING;
use chunk_pipeline::{
  ChunkData, ChunkFailure, ChunkMap, ChunkPos, ChunkPyramid, ChunkStatus, Completion, DistanceManager,
  InlineExecutor, PassThroughExecutor, PipelineConfig, StageError, StageExecutor, TicketType, FULL_CHUNK_LEVEL,
  MAX_LEVEL,
};

/// Pass-through stages that park the worker on one (cell, status) step until
/// the test opens the gate.
struct BlockAt {
  pos: ChunkPos,
  status: ChunkStatus,
  entered: Completion<()>,
  release: Completion<()>,
}

impl BlockAt {
  fn new(pos: ChunkPos, status: ChunkStatus) -> Self {
    Self {
      pos,
      status,
      entered: Completion::new(),
      release: Completion::new(),
    }
  }
}

impl StageExecutor for BlockAt {
  fn apply(&self, step: &ChunkStep, window: &ChunkWindow, chunk: &ChunkData) -> Result<ChunkData, StageError> {
    if step.target_status == self.status && chunk.pos == self.pos {
      self.entered.complete(());
      self.release.wait_timeout(Duration::from_secs(10));
    }
    PassThroughExecutor.apply(step, window, chunk)
  }
}

fn gated_map(gate: &Arc<BlockAt>) -> ChunkMap {
  ChunkMap::builder(PipelineConfig {
    save_interval_ticks: 0,
    max_unloads_per_tick: 1024,
    ..PipelineConfig::SMALL
  })
  .stage_executor(gate.clone())
  .build()
  .unwrap()
}

/// Tick until `done` settles.
fn tick_until(map: &mut ChunkMap, done: &Completion<()>, max_ticks: usize) -> bool {
  for _ in 0..max_ticks {
    if done.wait_timeout(Duration::from_millis(2)).is_some() {
      return true;
    }
    map.tick();
  }
  done.is_done()
}

fn settle_ticks(map: &mut ChunkMap, count: usize) {
  for _ in 0..count {
    map.tick();
    std::thread::sleep(Duration::from_millis(2));
  }
}

#[test]
fn test_ticket_levels_spread_one_per_ring() {
  let mut manager = DistanceManager::new(&PipelineConfig::SMALL, Arc::new(InlineExecutor));
  manager.add_ticket(TicketType::FORCED, ChunkPos::ZERO, 0).unwrap();
  manager.run_all_updates();

  assert_eq!(manager.loading_level(ChunkPos::ZERO), 0);
  for pos in ChunkPos::ZERO.square_around(1).filter(|pos| *pos != ChunkPos::ZERO) {
    assert_eq!(manager.loading_level(pos), 1, "{pos}");
  }
  assert_eq!(manager.loading_level(ChunkPos::new(5, 0)), 5);
  assert_eq!(manager.loading_level(ChunkPos::new(-3, 5)), 5);
  assert_eq!(manager.loading_level(ChunkPos::new(MAX_LEVEL as i32, 0)), MAX_LEVEL);
  assert_eq!(manager.loading_level(ChunkPos::new(0, 60)), LOADING_CEILING);
}

#[test]
fn test_full_request_generates_dependency_window() {
  let mut map = ChunkMap::new(PipelineConfig::SMALL).unwrap();
  let future = map.request_stage(ChunkPos::ZERO, ChunkStatus::Full);

  let chunk = map.run_until(&future, 2_000).unwrap().unwrap();
  assert_eq!(chunk.status, ChunkStatus::Full);
  // One trail entry per generated stage, Empty excluded.
  assert_eq!(chunk.payload, (1..=ChunkStatus::Full as u8).collect::<Vec<_>>());

  let dependencies = &ChunkPyramid::generation()
    .step_to(ChunkStatus::Full)
    .accumulated_dependencies;
  for distance in 1..dependencies.size() {
    let required = dependencies.get(distance).unwrap();
    let ring = ChunkPos::ZERO
      .square_around(distance as i32)
      .filter(|pos| pos.chebyshev_distance(ChunkPos::ZERO) as usize == distance);
    for pos in ring {
      let holder = map.updating_holder(pos).unwrap();
      assert!(
        holder.persisted_status() >= Some(required),
        "{pos} at {:?}, needs {required}",
        holder.persisted_status()
      );
    }
  }
}

#[test]
fn test_lowering_ceiling_fails_in_flight_stage() {
  let gate = Arc::new(BlockAt::new(ChunkPos::ZERO, ChunkStatus::Carvers));
  let mut map = gated_map(&gate);
  map.add_ticket(TicketType::FORCED, ChunkPos::ZERO, FULL_CHUNK_LEVEL).unwrap();
  map.tick();

  let holder = Arc::clone(map.updating_holder(ChunkPos::ZERO).unwrap());
  let carvers = holder.get_or_create_future(ChunkStatus::Carvers);
  let full = holder.get_or_create_future(ChunkStatus::Full);
  assert!(tick_until(&mut map, &gate.entered, 2_000), "carvers step never started");
  assert!(!carvers.is_done());

  // Biomes is the highest status level 36 allows.
  let biomes_level = FULL_CHUNK_LEVEL + 3;
  map.add_ticket(TicketType::FORCED, ChunkPos::ZERO, biomes_level).unwrap();
  map.tick();

  assert_eq!(holder.highest_allowed_status(), Some(ChunkStatus::Biomes));
  assert_eq!(carvers.get_now(), Some(Err(ChunkFailure::Unloaded)));
  assert_eq!(full.get_now(), Some(Err(ChunkFailure::Unloaded)));

  gate.release.complete(());
  assert!(map.run_until_idle(2_000));
  assert!(!holder.has_task());
  assert_eq!(holder.generation_ref_count(), 0);
  let radius = (MAX_LEVEL - biomes_level) as usize;
  assert_eq!(map.holder_count(), (2 * radius + 1) * (2 * radius + 1));
}

#[test]
fn test_claimed_cell_outlives_its_ticket() {
  // The blocked Noise step of `kept` stalls the Noise layer of the task for
  // ZERO, whose window still claims `edge`.
  let kept = ChunkPos::new(2, 0);
  let only_zero = ChunkPos::new(-2, 0);
  let edge = ChunkPos::new(-11, 0);
  let gate = Arc::new(BlockAt::new(kept, ChunkStatus::Noise));
  let mut map = gated_map(&gate);
  map.add_ticket(TicketType::FORCED, kept, FULL_CHUNK_LEVEL).unwrap();
  map.add_ticket(TicketType::FORCED, ChunkPos::ZERO, FULL_CHUNK_LEVEL).unwrap();
  assert!(tick_until(&mut map, &gate.entered, 2_000), "noise step never started");

  // Only the task for ZERO reaches `only_zero` at Noise.
  for _ in 0..2_000 {
    let started = map
      .updating_holder(only_zero)
      .and_then(|holder| holder.started_work());
    if started >= Some(ChunkStatus::Noise) {
      break;
    }
    settle_ticks(&mut map, 1);
  }
  settle_ticks(&mut map, 5);
  assert!(map.updating_holder(edge).unwrap().generation_ref_count() > 0);

  assert!(map.remove_ticket(TicketType::FORCED, ChunkPos::ZERO));
  settle_ticks(&mut map, 10);
  let holder = map.updating_holder(edge).unwrap();
  assert_eq!(holder.ticket_level(), LOADING_CEILING);
  assert!(holder.generation_ref_count() > 0);
  assert!(map.pending_unload_count() > 0);

  gate.release.complete(());
  assert!(map.run_until_idle(2_000));
  assert!(map.updating_holder(edge).is_none());
  assert!(map.updating_holder(kept).is_some());
}
