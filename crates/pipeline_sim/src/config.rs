//! Simulation scenario parsing.

use anyhow::{Context, Result};
use chunk_pipeline::{ChunkPos, PipelineConfig, SectionPos};
use serde::Deserialize;
use std::path::Path;

/// Root configuration for a simulation run.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct SimConfig {
	/// Ticks to simulate.
	pub ticks: u64,
	/// Milliseconds each tick waits for main-thread work.
	pub tick_ms: u64,
	/// Print stats every N ticks (0 = only at the end).
	pub report_every: u64,
	/// Pipeline tunables, same keys as a standalone pipeline TOML.
	pub pipeline: PipelineConfig,
	/// Players walking across the grid.
	pub players: Vec<PlayerConfig>,
	/// Static tickets held for the whole run.
	pub forced: Vec<ForcedTicket>,
}

impl Default for SimConfig {
	fn default() -> Self {
		Self {
			ticks: 200,
			tick_ms: 5,
			report_every: 20,
			pipeline: PipelineConfig::SMALL,
			players: vec![PlayerConfig::default()],
			forced: Vec::new(),
		}
	}
}

/// A player that moves one section step every `move_every` ticks.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
	/// Starting chunk [x, z].
	pub start: [i32; 2],
	/// Section y coordinate.
	pub y: i32,
	/// Chunks moved per step [dx, dz].
	pub velocity: [i32; 2],
	/// Ticks between steps (0 = stand still).
	pub move_every: u64,
}

impl Default for PlayerConfig {
	fn default() -> Self {
		Self {
			start: [0, 0],
			y: 4,
			velocity: [1, 0],
			move_every: 10,
		}
	}
}

impl PlayerConfig {
	pub fn start_section(&self) -> SectionPos {
		SectionPos::new(self.start[0], self.y, self.start[1])
	}

	/// Section after `steps` moves.
	pub fn section_after(&self, steps: u64) -> SectionPos {
		let steps = steps as i32;
		SectionPos::new(
			self.start[0] + self.velocity[0] * steps,
			self.y,
			self.start[1] + self.velocity[1] * steps,
		)
	}
}

/// A ticket pinned for the whole run.
#[derive(Debug, Clone, Deserialize)]
pub struct ForcedTicket {
	/// Chunk [x, z].
	pub pos: [i32; 2],
	/// Ticket level (33 keeps a full chunk).
	pub level: u8,
}

impl ForcedTicket {
	pub fn chunk(&self) -> ChunkPos {
		ChunkPos::new(self.pos[0], self.pos[1])
	}
}

impl SimConfig {
	pub fn load(path: &Path) -> Result<Self> {
		let content = std::fs::read_to_string(path)
			.with_context(|| format!("Failed to read config: {}", path.display()))?;
		let config: SimConfig = toml::from_str(&content)
			.with_context(|| format!("Failed to parse config: {}", path.display()))?;
		config
			.pipeline
			.validate()
			.context("Invalid [pipeline] section")?;
		Ok(config)
	}
}
