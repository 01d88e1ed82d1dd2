//! Headless chunk streaming simulation.
//!
//! Drives a `ChunkMap` with scripted players and pinned tickets, printing
//! pipeline stats as chunks stream in and out:
//!
//! ```text
//! RUST_LOG=chunk_pipeline=debug pipeline_sim --config sim.toml --ticks 400
//! ```

mod config;

use anyhow::{Context, Result};
use chunk_pipeline::{ChunkMap, ChunkPos, TicketType};
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use config::SimConfig;

/// Headless driver for the chunk streaming pipeline.
#[derive(Parser, Debug)]
#[command(name = "pipeline_sim")]
#[command(about = "Streams chunks around scripted players and reports pipeline stats")]
struct Args {
	/// Path to a scenario TOML file (default: one player walking east).
	#[arg(short, long)]
	config: Option<PathBuf>,

	/// Override the number of ticks to simulate.
	#[arg(short, long)]
	ticks: Option<u64>,

	/// Override the view distance.
	#[arg(long)]
	view_distance: Option<u8>,

	/// Print per-chunk debug info for these chunks at the end ("x,z").
	#[arg(long, value_parser = parse_chunk)]
	inspect: Vec<ChunkPos>,
}

fn parse_chunk(text: &str) -> Result<ChunkPos, String> {
	let (x, z) = text
		.split_once(',')
		.ok_or_else(|| format!("expected x,z, got {text:?}"))?;
	let x = x.trim().parse().map_err(|err| format!("bad x: {err}"))?;
	let z = z.trim().parse().map_err(|err| format!("bad z: {err}"))?;
	Ok(ChunkPos::new(x, z))
}

fn main() -> Result<()> {
	env_logger::init();
	let args = Args::parse();

	let mut config = match &args.config {
		Some(path) => {
			println!("Loading scenario from: {}", path.display());
			SimConfig::load(path)?
		}
		None => SimConfig::default(),
	};
	if let Some(ticks) = args.ticks {
		config.ticks = ticks;
	}
	if let Some(view_distance) = args.view_distance {
		config.pipeline.view_distance = view_distance;
	}

	println!(
		"Simulating {} ticks, {} players, view distance {}, simulation distance {}",
		config.ticks,
		config.players.len(),
		config.pipeline.view_distance,
		config.pipeline.simulation_distance
	);

	let mut map = ChunkMap::new(config.pipeline.clone()).context("Failed to build chunk map")?;

	for ticket in &config.forced {
		map.add_ticket(TicketType::FORCED, ticket.chunk(), ticket.level)
			.with_context(|| format!("Rejected forced ticket at {}", ticket.chunk()))?;
	}
	for (id, player) in config.players.iter().enumerate() {
		map.add_player(player.start_section(), id as u64);
	}

	let tick_timeout = Duration::from_millis(config.tick_ms);
	for tick in 1..=config.ticks {
		for (id, player) in config.players.iter().enumerate() {
			if player.move_every == 0 || tick % player.move_every != 0 {
				continue;
			}
			let step = tick / player.move_every;
			let from = player.section_after(step - 1);
			let to = player.section_after(step);
			log::debug!("player {id} moves {from:?} -> {to:?}");
			map.move_player(from, to, id as u64);
		}

		map.tick();
		map.pump(tick_timeout);

		if config.report_every > 0 && tick % config.report_every == 0 {
			println!("{}", map.stats());
		}
	}

	// Let in-flight work settle before the final flush.
	if !map.run_until_idle(1_000) {
		log::warn!("pipeline still busy after settle ticks");
	}
	let saved = map.save_all();

	println!("\nFinal: {}", map.stats());
	println!("Flushed {saved} dirty chunks");
	let metrics = map.metrics().snapshot();
	if metrics.ticks > 0 {
		println!(
			"Tick time avg {:.1}us, max {}us | created {} unloaded {} saved {} failed {}",
			metrics.avg_tick_us,
			metrics.max_tick_us,
			metrics.holders_created,
			metrics.holders_unloaded,
			metrics.chunks_saved,
			metrics.save_failures
		);
	}

	for pos in &args.inspect {
		match map.debug_info(*pos) {
			Some(info) => println!("{info}"),
			None => println!("{pos} not loaded"),
		}
	}

	Ok(())
}
