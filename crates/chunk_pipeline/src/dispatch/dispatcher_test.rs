use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::*;
use crate::threading::{MainThreadExecutor, WorkerPool};

fn pos(x: i32) -> ChunkPos {
  ChunkPos::new(x, 0)
}

fn main_dispatcher(main: &MainThreadExecutor) -> ChunkTaskDispatcher {
  let exec: Arc<dyn Executor> = Arc::new(main.clone());
  ChunkTaskDispatcher::new("test", Arc::clone(&exec), exec)
}

#[test]
fn test_starts_asleep_and_runs_submitted_task() {
  let main = MainThreadExecutor::new();
  let dispatcher = main_dispatcher(&main);
  assert!(dispatcher.is_sleeping());

  let ran = Arc::new(Mutex::new(Vec::new()));
  let log = Arc::clone(&ran);
  dispatcher.submit(move || log.lock().push(1), pos(0), || 3);
  assert!(ran.lock().is_empty());

  main.run_pending();
  assert_eq!(*ran.lock(), vec![1]);
  assert!(dispatcher.is_sleeping());
  assert_eq!(dispatcher.running_task_count(), 0);
}

#[test]
fn test_lower_levels_run_first() {
  let main = MainThreadExecutor::new();
  let dispatcher = main_dispatcher(&main);
  let ran = Arc::new(Mutex::new(Vec::new()));

  // The first submission wakes the dispatcher and is popped on its own.
  let log = Arc::clone(&ran);
  dispatcher.submit(move || log.lock().push(("warmup", 0)), pos(100), || 0);

  let mut rng = StdRng::seed_from_u64(11);
  for i in 0..40 {
    let level = rng.random_range(0..45u8);
    let log = Arc::clone(&ran);
    dispatcher.submit(move || log.lock().push(("task", level)), pos(i), move || level);
  }
  main.run_pending();

  let ran = ran.lock();
  assert_eq!(ran.len(), 41);
  assert_eq!(ran[0].0, "warmup");
  let levels: Vec<u8> = ran[1..].iter().map(|(_, level)| *level).collect();
  let mut sorted = levels.clone();
  sorted.sort();
  assert_eq!(levels, sorted);
}

#[test]
fn test_panicking_task_does_not_stall_dispatch() {
  let main = MainThreadExecutor::new();
  let dispatcher = main_dispatcher(&main);
  let ran = Arc::new(Mutex::new(Vec::new()));

  dispatcher.submit(|| panic!("stage failed"), pos(0), || 0);
  let log = Arc::clone(&ran);
  dispatcher.submit(move || log.lock().push(1), pos(1), || 5);

  let outcome = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| main.run_pending()));
  assert!(outcome.is_err());
  assert_eq!(dispatcher.running_task_count(), 0);
  assert!(ran.lock().is_empty());

  main.run_pending();
  assert_eq!(*ran.lock(), vec![1]);
  assert_eq!(dispatcher.running_task_count(), 0);
  assert_eq!(dispatcher.queued_task_count(), 0);
  assert!(dispatcher.is_sleeping());
}

#[test]
fn test_same_chunk_tasks_keep_submission_order() {
  let main = MainThreadExecutor::new();
  let dispatcher = main_dispatcher(&main);
  let ran = Arc::new(Mutex::new(Vec::new()));

  for i in 0..5 {
    let log = Arc::clone(&ran);
    dispatcher.submit(move || log.lock().push(i), pos(3), || 10);
  }
  main.run_pending();
  assert_eq!(*ran.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_level_change_reorders_queued_chunk() {
  let main = MainThreadExecutor::new();
  let dispatcher = main_dispatcher(&main);
  let ran = Arc::new(Mutex::new(Vec::new()));
  let reported = Arc::new(Mutex::new(None));

  let log = Arc::clone(&ran);
  dispatcher.submit(move || log.lock().push("warmup"), pos(9), || 0);
  let log = Arc::clone(&ran);
  dispatcher.submit(move || log.lock().push("a"), pos(1), || 5);
  let log = Arc::clone(&ran);
  dispatcher.submit(move || log.lock().push("b"), pos(2), || 20);

  let sink = Arc::clone(&reported);
  dispatcher.on_level_change(pos(2), || 20, 1, move |level| *sink.lock() = Some(level));
  main.run_pending();

  assert_eq!(*ran.lock(), vec!["warmup", "b", "a"]);
  assert_eq!(*reported.lock(), Some(1));
}

#[test]
fn test_release_with_clear_drops_queued_tasks() {
  let main = MainThreadExecutor::new();
  let dispatcher = main_dispatcher(&main);
  let ran = Arc::new(Mutex::new(Vec::new()));
  let released = Arc::new(Mutex::new(false));

  let log = Arc::clone(&ran);
  dispatcher.submit(move || log.lock().push("warmup"), pos(0), || 0);
  let log = Arc::clone(&ran);
  dispatcher.submit(move || log.lock().push("dropped"), pos(1), || 4);
  let flag = Arc::clone(&released);
  dispatcher.release(pos(1), move || *flag.lock() = true, true);
  main.run_pending();

  assert_eq!(*ran.lock(), vec!["warmup"]);
  assert!(*released.lock());
  assert_eq!(dispatcher.queued_task_count(), 0);
}

#[test]
fn test_throttle_caps_chunks_in_execution() {
  let main = MainThreadExecutor::new();
  let exec: Arc<dyn Executor> = Arc::new(main.clone());
  let dispatcher = ChunkTaskDispatcher::throttled("throttled", 2, Arc::clone(&exec), exec);
  let ran = Arc::new(Mutex::new(Vec::new()));

  for i in 0..5 {
    let log = Arc::clone(&ran);
    dispatcher.submit(move || log.lock().push(i), pos(i), move || i as u8);
  }
  main.run_pending();
  assert_eq!(*ran.lock(), vec![0, 1]);
  assert_eq!(dispatcher.in_execution_count(), 2);
  assert_eq!(dispatcher.queued_task_count(), 3);
  assert!(dispatcher.is_sleeping());

  dispatcher.release(pos(0), || {}, false);
  main.run_pending();
  assert_eq!(*ran.lock(), vec![0, 1, 2]);
  assert_eq!(dispatcher.in_execution_count(), 2);

  dispatcher.release(pos(1), || {}, false);
  dispatcher.release(pos(2), || {}, false);
  main.run_pending();
  assert_eq!(*ran.lock(), vec![0, 1, 2, 3, 4]);
}

#[test]
fn test_throttle_bound_holds_on_worker_pool() {
  let pool = WorkerPool::new(4).unwrap();
  let main = MainThreadExecutor::new();
  let dispatcher = ChunkTaskDispatcher::throttled(
    "pool",
    3,
    Arc::new(pool),
    Arc::new(main.clone()),
  );
  let high_water = Arc::new(Mutex::new(0usize));
  let done = Arc::new(AtomicUsize::new(0));

  for i in 0..64 {
    let probe = dispatcher.clone();
    let high_water = Arc::clone(&high_water);
    let done = Arc::clone(&done);
    let releaser = dispatcher.clone();
    dispatcher.submit(
      move || {
        let current = probe.in_execution_count();
        let mut high = high_water.lock();
        *high = (*high).max(current);
        drop(high);
        done.fetch_add(1, Ordering::SeqCst);
        releaser.release(pos(i), || {}, false);
      },
      pos(i),
      move || (i % 7) as u8,
    );
  }

  for _ in 0..1000 {
    if done.load(Ordering::SeqCst) == 64 {
      break;
    }
    main.wait_and_run(Duration::from_millis(10));
  }
  main.run_pending();

  assert_eq!(done.load(Ordering::SeqCst), 64);
  assert!(*high_water.lock() <= 3);
}
