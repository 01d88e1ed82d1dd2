//! Executors the pipeline schedules work on.
//!
//! ```text
//!   MainThreadExecutor      jobs queued until the owner thread drains them
//!   WorkerPool              rayon pool, stage steps and storage I/O
//!   ConsecutiveExecutor     one-at-a-time mailbox on top of another executor
//!   InlineExecutor          runs the job on the calling thread
//! ```
//!
//! Everything submits boxed `FnOnce` jobs through [`Executor`], so dispatchers
//! and holders never care which thread actually runs their work.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam_channel::{Receiver, Sender};

/// A unit of work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Something that runs jobs, now or later, somewhere.
pub trait Executor: Send + Sync + 'static {
  fn execute(&self, job: Job);

  /// Run jobs queued for the calling thread. Returns how many ran.
  ///
  /// Executors that hand jobs to their own threads have nothing to drain.
  fn run_pending(&self) -> usize {
    0
  }
}

// =============================================================================
// WorkerPool
// =============================================================================

/// Bounded background pool backed by a dedicated rayon `ThreadPool`.
#[derive(Clone)]
pub struct WorkerPool {
  pool: Arc<rayon::ThreadPool>,
  in_flight: Arc<AtomicUsize>,
}

impl WorkerPool {
  /// Build a pool with `threads` workers (0 = rayon's default).
  pub fn new(threads: usize) -> Result<Self, rayon::ThreadPoolBuildError> {
    let pool = rayon::ThreadPoolBuilder::new()
      .num_threads(threads)
      .thread_name(|i| format!("chunk-worker-{i}"))
      .build()?;
    Ok(Self {
      pool: Arc::new(pool),
      in_flight: Arc::new(AtomicUsize::new(0)),
    })
  }

  pub fn num_threads(&self) -> usize {
    self.pool.current_num_threads()
  }

  /// Jobs queued or running.
  pub fn pending_count(&self) -> usize {
    self.in_flight.load(Ordering::Acquire)
  }
}

impl Executor for WorkerPool {
  fn execute(&self, job: Job) {
    let in_flight = Arc::clone(&self.in_flight);
    in_flight.fetch_add(1, Ordering::AcqRel);
    self.pool.spawn(move || {
      job();
      in_flight.fetch_sub(1, Ordering::AcqRel);
    });
  }
}

impl fmt::Debug for WorkerPool {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("WorkerPool")
      .field("threads", &self.num_threads())
      .field("pending", &self.pending_count())
      .finish()
  }
}

// =============================================================================
// MainThreadExecutor
// =============================================================================

/// Queue drained explicitly by the thread that owns the chunk map.
///
/// Also serves as a manually pumped worker in deterministic tests.
#[derive(Clone)]
pub struct MainThreadExecutor {
  sender: Sender<Job>,
  receiver: Receiver<Job>,
}

impl MainThreadExecutor {
  pub fn new() -> Self {
    let (sender, receiver) = crossbeam_channel::unbounded();
    Self { sender, receiver }
  }

  /// Jobs waiting to be drained.
  pub fn queued(&self) -> usize {
    self.receiver.len()
  }

  /// Block for up to `timeout` until a job arrives, then drain everything queued.
  pub fn wait_and_run(&self, timeout: Duration) -> usize {
    match self.receiver.recv_timeout(timeout) {
      Ok(job) => {
        job();
        1 + self.run_pending()
      }
      Err(_) => 0,
    }
  }
}

impl Default for MainThreadExecutor {
  fn default() -> Self {
    Self::new()
  }
}

impl Executor for MainThreadExecutor {
  fn execute(&self, job: Job) {
    // Both channel ends live in `self`, so the send cannot fail.
    let _ = self.sender.send(job);
  }

  fn run_pending(&self) -> usize {
    let mut ran = 0;
    while let Ok(job) = self.receiver.try_recv() {
      job();
      ran += 1;
    }
    ran
  }
}

// =============================================================================
// ConsecutiveExecutor
// =============================================================================

/// Runs its jobs one at a time, in submission order, on a target executor.
///
/// At most one drain job is scheduled on the target at any moment; jobs
/// submitted while a drain is running are picked up by that same drain.
#[derive(Clone)]
pub struct ConsecutiveExecutor {
  inner: Arc<ConsecutiveInner>,
}

struct ConsecutiveInner {
  name: &'static str,
  sender: Sender<Job>,
  receiver: Receiver<Job>,
  scheduled: AtomicBool,
  target: Arc<dyn Executor>,
}

impl ConsecutiveExecutor {
  pub fn new(name: &'static str, target: Arc<dyn Executor>) -> Self {
    let (sender, receiver) = crossbeam_channel::unbounded();
    Self {
      inner: Arc::new(ConsecutiveInner {
        name,
        sender,
        receiver,
        scheduled: AtomicBool::new(false),
        target,
      }),
    }
  }

  pub fn name(&self) -> &'static str {
    self.inner.name
  }

  /// Jobs waiting in the mailbox.
  pub fn queued(&self) -> usize {
    self.inner.receiver.len()
  }
}

impl ConsecutiveInner {
  fn schedule(self: &Arc<Self>) {
    if self
      .scheduled
      .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
      .is_ok()
    {
      let this = Arc::clone(self);
      self.target.execute(Box::new(move || this.drain()));
    }
  }

  fn drain(self: &Arc<Self>) {
    while let Ok(job) = self.receiver.try_recv() {
      job();
    }
    self.scheduled.store(false, Ordering::Release);
    // A job may have arrived between the last poll and the flag reset.
    if !self.receiver.is_empty() {
      self.schedule();
    }
  }
}

impl Executor for ConsecutiveExecutor {
  fn execute(&self, job: Job) {
    let _ = self.inner.sender.send(job);
    self.inner.schedule();
  }
}

// =============================================================================
// InlineExecutor
// =============================================================================

/// Runs every job immediately on the submitting thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineExecutor;

impl Executor for InlineExecutor {
  fn execute(&self, job: Job) {
    job();
  }
}

#[cfg(test)]
#[path = "threading_test.rs"]
mod threading_test;
