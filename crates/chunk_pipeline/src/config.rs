//! PipelineConfig - tunables for the streaming pipeline, loadable from TOML.

use std::path::Path;

use serde::Deserialize;

use crate::constants::{DEFAULT_TICKET_THROTTLE, FULL_CHUNK_LEVEL};
use crate::error::ConfigError;

/// Largest view distance the player ticket tracker supports.
pub const MAX_VIEW_DISTANCE: u8 = 32;

/// Configuration for the chunk map and its distance manager.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
  /// Radius (in chunks) around each player that gets loading tickets.
  pub view_distance: u8,

  /// Radius (in chunks) around each player that may tick entities.
  pub simulation_distance: u8,

  /// Worker pool size. 0 lets rayon pick.
  pub worker_threads: usize,

  /// Distinct chunks the player ticket throttler admits at once.
  pub player_ticket_throttle: usize,

  /// Node revisits per propagation slice before yielding to the next slice.
  pub propagation_budget: usize,

  /// Ticks between periodic save passes. 0 disables periodic saving.
  pub save_interval_ticks: u64,

  /// Upper bound on holders removed per tick.
  pub max_unloads_per_tick: usize,
}

impl PipelineConfig {
  pub const DEFAULT: Self = Self {
    view_distance: 10,
    simulation_distance: 10,
    worker_threads: 0,
    player_ticket_throttle: DEFAULT_TICKET_THROTTLE,
    propagation_budget: 4096,
    save_interval_ticks: 100,
    max_unloads_per_tick: 256,
  };

  /// Small radii and a tiny pool, for tests and quick simulations.
  pub const SMALL: Self = Self {
    view_distance: 2,
    simulation_distance: 2,
    worker_threads: 2,
    player_ticket_throttle: DEFAULT_TICKET_THROTTLE,
    propagation_budget: 512,
    save_interval_ticks: 20,
    max_unloads_per_tick: 64,
  };

  /// Load configuration from a TOML file.
  pub fn load(path: &Path) -> Result<Self, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
      path: path.display().to_string(),
      source,
    })?;
    Self::from_toml_str(&content)
  }

  /// Parse and validate configuration from TOML text. Missing keys take defaults.
  pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
    let config: PipelineConfig = toml::from_str(content)?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.view_distance == 0 || self.view_distance > MAX_VIEW_DISTANCE {
      return Err(ConfigError::Invalid(format!(
        "view_distance must be in 1..={MAX_VIEW_DISTANCE}, got {}",
        self.view_distance
      )));
    }
    if self.simulation_distance > FULL_CHUNK_LEVEL {
      return Err(ConfigError::Invalid(format!(
        "simulation_distance must be at most {FULL_CHUNK_LEVEL}, got {}",
        self.simulation_distance
      )));
    }
    if self.player_ticket_throttle == 0 {
      return Err(ConfigError::Invalid("player_ticket_throttle must be positive".into()));
    }
    if self.propagation_budget == 0 {
      return Err(ConfigError::Invalid("propagation_budget must be positive".into()));
    }
    Ok(())
  }
}

impl Default for PipelineConfig {
  fn default() -> Self {
    Self::DEFAULT
  }
}
