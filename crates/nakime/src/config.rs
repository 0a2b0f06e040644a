use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::policy::RestartPolicy;

pub const DEFAULT_START_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_STOP_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_MAX_AGE_MS: u64 = 1_800_000;

/// Per-worker timeouts, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Timeouts {
	/// How long a spawned worker has to come online.
	#[serde(default = "default_start")]
	pub start: u64,
	/// How long a worker has to exit after SIGTERM before it is killed.
	#[serde(default = "default_stop")]
	pub stop: u64,
	/// Age at which a running worker is rotated.
	#[serde(default = "default_max_age", alias = "max_age")]
	pub max_age: u64,
}

impl Default for Timeouts {
	fn default() -> Self {
		Self {
			start: default_start(),
			stop: default_stop(),
			max_age: default_max_age(),
		}
	}
}

fn default_start() -> u64 { DEFAULT_START_TIMEOUT_MS }
fn default_stop() -> u64 { DEFAULT_STOP_TIMEOUT_MS }
fn default_max_age() -> u64 { DEFAULT_MAX_AGE_MS }

impl Timeouts {
	pub fn start_timeout(&self) -> Duration {
		Duration::from_millis(self.start)
	}

	pub fn stop_timeout(&self) -> Duration {
		Duration::from_millis(self.stop)
	}

	pub fn max_age_timeout(&self) -> Duration {
		Duration::from_millis(self.max_age)
	}
}

/// Resolved pool configuration. Built once, never mutated by the supervisor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PoolConfig {
	pub script: PathBuf,
	pub args: Vec<String>,
	#[serde(skip_serializing_if = "Option::is_none")]
	pub interpreter: Option<String>,
	pub workers: usize,
	pub timeouts: Timeouts,
	pub restart: RestartPolicy,
	#[serde(skip_serializing_if = "BTreeMap::is_empty")]
	pub env: BTreeMap<String, String>,
	pub verbosity: u8,
}

impl PoolConfig {
	pub fn new(script: impl Into<PathBuf>) -> Self {
		Self {
			script: script.into(),
			args: Vec::new(),
			interpreter: None,
			workers: default_workers(),
			timeouts: Timeouts::default(),
			restart: RestartPolicy::default(),
			env: BTreeMap::new(),
			verbosity: 0,
		}
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.script.as_os_str().is_empty() {
			return Err(ConfigError::MissingScript);
		}
		if !self.script.is_file() {
			return Err(ConfigError::ScriptNotFound(self.script.clone()));
		}
		self.slot_count()?;
		if self.timeouts.start == 0 {
			return Err(ConfigError::ZeroTimeout("start"));
		}
		if self.timeouts.stop == 0 {
			return Err(ConfigError::ZeroTimeout("stop"));
		}
		if self.timeouts.max_age == 0 {
			return Err(ConfigError::ZeroTimeout("maxAge"));
		}
		Ok(())
	}

	/// Number of worker slots as a slot id range bound.
	pub fn slot_count(&self) -> Result<u32, ConfigError> {
		match u32::try_from(self.workers) {
			Ok(0) => Err(ConfigError::NoWorkers),
			Ok(n) => Ok(n),
			Err(_) => Err(ConfigError::TooManyWorkers(self.workers)),
		}
	}

	/// JSON form used for diagnostics, with timeouts nested under `timeouts`.
	pub fn to_json(&self) -> String {
		serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string())
	}
}

/// One worker per available CPU.
pub fn default_workers() -> usize {
	std::thread::available_parallelism()
		.map(|n| n.get())
		.unwrap_or(1)
}
