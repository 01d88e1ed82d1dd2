use super::*;
use crate::types::ChunkStatus::*;

#[test]
fn test_generation_full_step_accumulates_parent_pyramids() {
  let full = ChunkPyramid::generation().step_to(Full);
  let expected = [
    Spawn,
    InitializeLight,
    Carvers,
    Biomes,
    StructureStarts,
    StructureStarts,
    StructureStarts,
    StructureStarts,
    StructureStarts,
    StructureStarts,
    StructureStarts,
    StructureStarts,
  ];
  let actual: Vec<_> = full.accumulated_dependencies.iter().collect();
  assert_eq!(actual, expected);
}

#[test]
fn test_radius_around_full_chunk() {
  assert_eq!(ChunkPyramid::generation().radius_around_full_chunk(), 11);
  assert_eq!(ChunkPyramid::loading().radius_around_full_chunk(), 2);
}

#[test]
fn test_direct_dependencies_include_parent() {
  let noise = ChunkPyramid::generation().step_to(Noise);
  assert_eq!(noise.direct_dependencies.get(0), Some(Biomes));
  assert_eq!(noise.direct_dependencies.get(1), Some(Biomes));
  assert_eq!(noise.direct_dependencies.get(8), Some(StructureStarts));
  assert_eq!(noise.direct_dependencies.size(), 9);
}

#[test]
fn test_accumulated_radius_of_target_is_zero() {
  let pyramid = ChunkPyramid::generation();
  for status in ChunkStatus::ALL {
    assert_eq!(pyramid.step_to(status).accumulated_radius_of(status), 0);
  }
}

#[test]
fn test_features_write_radius() {
  let features = ChunkPyramid::generation().step_to(Features);
  assert_eq!(features.block_state_write_radius, 1);
}

#[test]
fn test_terrain_steps_write_only_their_own_chunk() {
  let pyramid = ChunkPyramid::generation();
  for status in [Noise, Surface, Carvers] {
    assert_eq!(pyramid.step_to(status).block_state_write_radius, 0, "{status}");
  }
  for status in [StructureStarts, Biomes, Light, Full] {
    assert_eq!(pyramid.step_to(status).block_state_write_radius, -1, "{status}");
  }
  assert_eq!(ChunkPyramid::loading().step_to(Noise).block_state_write_radius, -1);
}

#[test]
fn test_early_steps_have_no_neighbourhood() {
  let pyramid = ChunkPyramid::generation();
  assert_eq!(pyramid.step_to(Empty).accumulated_dependencies.radius(), 0);
  assert_eq!(pyramid.step_to(StructureStarts).accumulated_radius_of(Empty), 0);
  assert_eq!(pyramid.step_to(StructureReferences).accumulated_radius_of(StructureStarts), 8);
}

#[test]
fn test_loading_pyramid_light_needs_features_ring() {
  let light = ChunkPyramid::loading().step_to(Light);
  let actual: Vec<_> = light.accumulated_dependencies.iter().collect();
  assert_eq!(actual, vec![InitializeLight, InitializeLight, Features]);
}

#[test]
#[should_panic(expected = "cannot depend on")]
fn test_require_later_status_panics() {
  ChunkPyramid::builder()
    .step(Empty, |s| s)
    .step(StructureStarts, |s| s.require(Biomes, 1));
}
