use std::path::PathBuf;

use clap::{ArgAction, Parser};

/// Keep a pool of application workers alive.
#[derive(Debug, Parser)]
#[command(name = "poolmind", version)]
pub struct Cli {
	/// Application start script
	pub script: Option<PathBuf>,

	/// Arguments passed to every worker after the script
	#[arg(last = true)]
	pub args: Vec<String>,

	/// Number of workers (defaults to the number of CPUs)
	#[arg(short = 'n', long = "workers", value_name = "N")]
	pub workers: Option<usize>,

	/// Verbosity: -v info, -vv debug, -vvv trace
	#[arg(short = 'v', action = ArgAction::Count)]
	pub verbose: u8,

	/// Milliseconds a worker has to come online
	#[arg(long = "tStart", visible_alias = "start-timeout", value_name = "MS")]
	pub start_timeout: Option<u64>,

	/// Milliseconds a worker has to exit after SIGTERM
	#[arg(long = "tStop", visible_alias = "stop-timeout", value_name = "MS")]
	pub stop_timeout: Option<u64>,

	/// Milliseconds after which a worker is rotated
	#[arg(long = "tMaxAge", visible_alias = "max-age", value_name = "MS")]
	pub max_age: Option<u64>,

	/// Run the script through this command, e.g. "node"
	#[arg(short = 'x', long, value_name = "CMD")]
	pub interpreter: Option<String>,

	/// TOML config file
	#[arg(short = 'c', long, value_name = "FILE")]
	pub config: Option<PathBuf>,

	/// Consecutive failed starts before giving up (0 = never)
	#[arg(long, value_name = "N")]
	pub max_start_failures: Option<u32>,
}
