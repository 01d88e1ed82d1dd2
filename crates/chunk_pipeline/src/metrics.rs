//! Engine-agnostic metrics for the streaming pipeline.
//!
//! Feature-gated and runtime-toggled so recording costs nothing when disabled.
//!
//! # Usage
//!
//! ```ignore
//! use chunk_pipeline::metrics::{PipelineMetrics, COLLECT_METRICS};
//!
//! // Compile with --features metrics
//! // Runtime toggle:
//! COLLECT_METRICS.store(false, Ordering::Relaxed);
//!
//! let snapshot = chunk_map.metrics().snapshot();
//! println!("avg tick {:.1}us", snapshot.avg_tick_us);
//! ```

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;

/// Runtime toggle for metrics collection.
pub static COLLECT_METRICS: AtomicBool = AtomicBool::new(true);

/// Whether metrics are collected (both compile-time and runtime).
#[inline]
pub fn is_enabled() -> bool {
  #[cfg(feature = "metrics")]
  {
    COLLECT_METRICS.load(Ordering::Relaxed)
  }
  #[cfg(not(feature = "metrics"))]
  {
    false
  }
}

/// Fixed-capacity window over the most recent values.
#[derive(Debug, Clone)]
pub struct RollingWindow<T> {
  buffer: VecDeque<T>,
  capacity: usize,
}

impl<T> RollingWindow<T> {
  pub fn new(capacity: usize) -> Self {
    Self {
      buffer: VecDeque::with_capacity(capacity),
      capacity,
    }
  }

  /// Push a value, evicting the oldest at capacity.
  pub fn push(&mut self, value: T) {
    if self.buffer.len() >= self.capacity {
      self.buffer.pop_front();
    }
    self.buffer.push_back(value);
  }

  pub fn len(&self) -> usize {
    self.buffer.len()
  }

  pub fn is_empty(&self) -> bool {
    self.buffer.is_empty()
  }

  pub fn clear(&mut self) {
    self.buffer.clear();
  }

  /// Oldest to newest.
  pub fn iter(&self) -> impl Iterator<Item = &T> {
    self.buffer.iter()
  }

  pub fn last(&self) -> Option<&T> {
    self.buffer.back()
  }
}

impl<T: Copy + Default + std::ops::Add<Output = T>> RollingWindow<T> {
  pub fn sum(&self) -> T {
    self.buffer.iter().copied().fold(T::default(), |acc, x| acc + x)
  }
}

impl RollingWindow<u64> {
  pub fn average(&self) -> f64 {
    if self.buffer.is_empty() {
      0.0
    } else {
      self.sum() as f64 / self.buffer.len() as f64
    }
  }

  pub fn min_max(&self) -> Option<(u64, u64)> {
    let min = self.buffer.iter().min()?;
    let max = self.buffer.iter().max()?;
    Some((*min, *max))
  }
}

impl Default for RollingWindow<u64> {
  fn default() -> Self {
    Self::new(128) // ~6 seconds at 20 ticks per second
  }
}

// =============================================================================
// PipelineMetrics
// =============================================================================

/// Counters and timings shared between the chunk map and its save jobs.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
  tick_timings: Mutex<RollingWindow<u64>>,
  ticks: AtomicU64,
  holders_created: AtomicU64,
  holders_unloaded: AtomicU64,
  chunks_saved: AtomicU64,
  save_failures: AtomicU64,
}

/// Point-in-time copy of [`PipelineMetrics`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MetricsSnapshot {
  pub ticks: u64,
  pub last_tick_us: u64,
  pub avg_tick_us: f64,
  pub max_tick_us: u64,
  pub holders_created: u64,
  pub holders_unloaded: u64,
  pub chunks_saved: u64,
  pub save_failures: u64,
}

impl PipelineMetrics {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn record_tick(&self, timing_us: u64) {
    if is_enabled() {
      self.tick_timings.lock().push(timing_us);
      self.ticks.fetch_add(1, Ordering::Relaxed);
    }
  }

  pub fn record_holder_created(&self) {
    if is_enabled() {
      self.holders_created.fetch_add(1, Ordering::Relaxed);
    }
  }

  pub fn record_unload(&self) {
    if is_enabled() {
      self.holders_unloaded.fetch_add(1, Ordering::Relaxed);
    }
  }

  pub fn record_save(&self, ok: bool) {
    if !is_enabled() {
      return;
    }
    let counter = if ok { &self.chunks_saved } else { &self.save_failures };
    counter.fetch_add(1, Ordering::Relaxed);
  }

  pub fn snapshot(&self) -> MetricsSnapshot {
    let timings = self.tick_timings.lock();
    MetricsSnapshot {
      ticks: self.ticks.load(Ordering::Relaxed),
      last_tick_us: timings.last().copied().unwrap_or(0),
      avg_tick_us: timings.average(),
      max_tick_us: timings.min_max().map_or(0, |(_, max)| max),
      holders_created: self.holders_created.load(Ordering::Relaxed),
      holders_unloaded: self.holders_unloaded.load(Ordering::Relaxed),
      chunks_saved: self.chunks_saved.load(Ordering::Relaxed),
      save_failures: self.save_failures.load(Ordering::Relaxed),
    }
  }

  /// Clear timings. Counters are cumulative and survive.
  pub fn reset_timings(&self) {
    self.tick_timings.lock().clear();
  }
}
