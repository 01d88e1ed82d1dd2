use super::*;

#[test]
fn test_max_level_matches_generation_pyramid() {
  assert_eq!(
    RADIUS_AROUND_FULL_CHUNK as usize,
    ChunkPyramid::generation().radius_around_full_chunk()
  );
  assert_eq!(MAX_LEVEL, 44);
}

#[test]
fn test_generation_status_by_level() {
  assert_eq!(generation_status(0), Some(ChunkStatus::Full));
  assert_eq!(generation_status(FULL_CHUNK_LEVEL), Some(ChunkStatus::Full));
  assert_eq!(generation_status(34), Some(ChunkStatus::InitializeLight));
  assert_eq!(generation_status(35), Some(ChunkStatus::Carvers));
  assert_eq!(generation_status(36), Some(ChunkStatus::Biomes));
  assert_eq!(generation_status(MAX_LEVEL), Some(ChunkStatus::StructureStarts));
  assert_eq!(generation_status(MAX_LEVEL + 1), None);
}

#[test]
fn test_generation_status_never_increases_with_level() {
  let mut previous = generation_status(0);
  for level in 1..=MAX_LEVEL + 2 {
    let current = generation_status(level);
    assert!(current <= previous, "level {level}: {current:?} > {previous:?}");
    previous = current;
  }
}

#[test]
fn test_level_by_generation_status_round_trips() {
  for status in [ChunkStatus::Full, ChunkStatus::Carvers, ChunkStatus::StructureStarts] {
    let level = level_by_generation_status(status);
    assert!(generation_status(level).unwrap() >= status);
  }
  assert_eq!(level_by_generation_status(ChunkStatus::Full), FULL_CHUNK_LEVEL);
}

#[test]
fn test_full_status_tiers() {
  assert_eq!(full_status(31), FullChunkStatus::EntityTicking);
  assert_eq!(full_status(32), FullChunkStatus::BlockTicking);
  assert_eq!(full_status(33), FullChunkStatus::Full);
  assert_eq!(full_status(34), FullChunkStatus::Inaccessible);
  for status in [
    FullChunkStatus::EntityTicking,
    FullChunkStatus::BlockTicking,
    FullChunkStatus::Full,
  ] {
    assert_eq!(full_status(level_by_full_status(status)), status);
  }
}

#[test]
fn test_simulation_caps_ticking() {
  // Loaded close to a player, but outside simulation range.
  assert_eq!(effective_full_status(31, MAX_LEVEL + 1), FullChunkStatus::Full);
  assert_eq!(effective_full_status(31, 32), FullChunkStatus::BlockTicking);
  assert_eq!(effective_full_status(31, 20), FullChunkStatus::EntityTicking);
  // Simulation alone never makes a chunk visible.
  assert_eq!(effective_full_status(40, 0), FullChunkStatus::Inaccessible);
}

#[test]
fn test_is_loaded_boundary() {
  assert!(is_loaded(MAX_LEVEL));
  assert!(!is_loaded(MAX_LEVEL + 1));
}
