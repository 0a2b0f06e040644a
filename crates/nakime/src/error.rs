use std::path::PathBuf;

use thiserror::Error;

use crate::types::SlotId;

/// Startup errors. Any of these aborts before a worker is spawned.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
	#[error("app start script must be specified")]
	MissingScript,
	#[error("cannot find application start script: {}", .0.display())]
	ScriptNotFound(PathBuf),
	#[error("worker count must be at least 1")]
	NoWorkers,
	#[error("worker count {0} is out of range")]
	TooManyWorkers(usize),
	#[error("{0} timeout must be greater than zero")]
	ZeroTimeout(&'static str),
}

/// Errors that end [`Supervisor::run`](crate::Supervisor::run) with a failure.
///
/// A worker dying is never one of these; crashes are absorbed into restarts.
#[derive(Debug, Error)]
pub enum SupervisorError {
	#[error("worker slot {slot} failed to start {failures} times in a row")]
	Unstable { slot: SlotId, failures: u32 },
	#[error("failed to install signal handlers: {0}")]
	Signals(#[from] std::io::Error),
}
