use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;

fn pos(x: i32) -> ChunkPos {
  ChunkPos::new(x, 0)
}

#[test]
fn test_pop_lowest_bucket_first() {
  let mut queue = ChunkTaskPriorityQueue::new("test");
  queue.submit("far", pos(1), 40);
  queue.submit("near", pos(2), 3);
  queue.submit("mid", pos(3), 20);

  let order: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|batch| batch.tasks[0]).collect();
  assert_eq!(order, vec!["near", "mid", "far"]);
  assert!(!queue.has_work());
}

#[test]
fn test_tasks_for_one_chunk_stay_together_in_order() {
  let mut queue = ChunkTaskPriorityQueue::new("test");
  queue.submit(1, pos(7), 5);
  queue.submit(2, pos(8), 5);
  queue.submit(3, pos(7), 5);

  let first = queue.pop().unwrap();
  assert_eq!(first.pos, pos(7));
  assert_eq!(first.tasks, vec![1, 3]);
  let second = queue.pop().unwrap();
  assert_eq!(second.tasks, vec![2]);
}

#[test]
fn test_resort_moves_tasks_between_buckets() {
  let mut queue = ChunkTaskPriorityQueue::new("test");
  queue.submit('a', pos(1), 10);
  queue.submit('b', pos(2), 12);

  queue.resort(12, pos(2), 2);
  assert_eq!(queue.top_index(), 2);
  assert_eq!(queue.pop().unwrap().tasks, vec!['b']);

  queue.resort(10, pos(1), 30);
  assert_eq!(queue.lowest_non_empty(), Some(30));
  assert_eq!(queue.pop().unwrap().tasks, vec!['a']);
}

#[test]
fn test_resort_from_out_of_range_level_is_ignored() {
  let mut queue = ChunkTaskPriorityQueue::new("test");
  queue.submit(1, pos(1), 4);
  queue.resort(200, pos(1), 0);
  assert_eq!(queue.lowest_non_empty(), Some(4));
}

#[test]
fn test_release_with_clear_drops_tasks() {
  let mut queue = ChunkTaskPriorityQueue::new("test");
  queue.submit(1, pos(1), 4);
  queue.submit(2, pos(2), 6);

  queue.release(pos(1), false);
  assert_eq!(queue.len(), 2);

  queue.release(pos(1), true);
  assert_eq!(queue.len(), 1);
  assert_eq!(queue.top_index(), 6);
}

#[test]
fn test_levels_above_range_land_in_last_bucket() {
  let mut queue = ChunkTaskPriorityQueue::new("test");
  queue.submit((), pos(0), u8::MAX);
  assert_eq!(
    queue.lowest_non_empty(),
    Some(ChunkTaskPriorityQueue::<()>::LEVEL_COUNT - 1)
  );
}

#[test]
fn test_top_never_exceeds_lowest_non_empty() {
  let mut rng = StdRng::seed_from_u64(7);
  let mut queue = ChunkTaskPriorityQueue::new("random");
  let mut levels = rustc_hash::FxHashMap::default();

  for _ in 0..2000 {
    let p = pos(rng.random_range(0..24));
    match rng.random_range(0..4) {
      0 | 1 => {
        let level = *levels.entry(p).or_insert_with(|| rng.random_range(0..46u8));
        queue.submit(0u32, p, level);
      }
      2 => {
        if let Some(old) = levels.get(&p).copied() {
          let new = rng.random_range(0..46u8);
          queue.resort(old, p, new);
          levels.insert(p, new);
        }
      }
      _ => {
        if rng.random_bool(0.5) {
          queue.release(p, true);
          levels.remove(&p);
        } else {
          let lowest = queue.lowest_non_empty();
          if let Some(batch) = queue.pop() {
            // Popped from the lowest bucket that had work.
            let level = levels.remove(&batch.pos).map(|l| l as usize);
            assert_eq!(level, lowest);
          }
        }
      }
    }
    match queue.lowest_non_empty() {
      Some(lowest) => assert!(queue.top_index() <= lowest),
      None => assert!(queue.pop().is_none()),
    }
  }
}
