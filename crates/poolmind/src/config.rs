use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use nakime::{PoolConfig, RestartPolicy, Timeouts};
use serde::Deserialize;

use crate::cli::Cli;

// ── poolmind.toml ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
	pub script: Option<PathBuf>,
	#[serde(default)]
	pub args: Vec<String>,
	pub interpreter: Option<String>,
	pub workers: Option<usize>,
	#[serde(default)]
	pub timeouts: Timeouts,
	#[serde(default)]
	pub restart: RestartPolicy,
	#[serde(default)]
	pub env: BTreeMap<String, String>,
}

pub fn load_file(path: &Path) -> Result<FileConfig, String> {
	let content = std::fs::read_to_string(path)
		.map_err(|e| format!("failed to read {}: {}", path.display(), e))?;
	toml::from_str(&content).map_err(|e| format!("failed to parse {}: {}", path.display(), e))
}

// ── resolution: defaults < file < flags ──────────────────────────────────────

pub fn resolve(cli: Cli) -> Result<PoolConfig, String> {
	let file = match &cli.config {
		Some(path) => load_file(path)?,
		None => FileConfig::default(),
	};

	let script = cli.script.or(file.script).unwrap_or_default();
	let mut config = PoolConfig::new(script);

	config.args = if cli.args.is_empty() { file.args } else { cli.args };
	config.interpreter = cli.interpreter.or(file.interpreter);
	if let Some(workers) = cli.workers.or(file.workers) {
		config.workers = workers;
	}

	config.timeouts = file.timeouts;
	if let Some(ms) = cli.start_timeout {
		config.timeouts.start = ms;
	}
	if let Some(ms) = cli.stop_timeout {
		config.timeouts.stop = ms;
	}
	if let Some(ms) = cli.max_age {
		config.timeouts.max_age = ms;
	}

	config.restart = file.restart;
	if let Some(n) = cli.max_start_failures {
		config.restart.max_failures = n;
	}

	config.env = file.env;
	config.verbosity = cli.verbose;
	Ok(config)
}
