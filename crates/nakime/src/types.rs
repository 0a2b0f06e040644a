use std::fmt;
use std::time::Duration;

use serde::Serialize;

/// Stable position in the pool. Survives restarts; the pid occupying it does not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct SlotId(pub u32);

impl fmt::Display for SlotId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerState {
	Starting,
	Running,
	Restarting,
	Stopping,
	Closed,
}

impl WorkerState {
	pub fn is_running(&self) -> bool {
		matches!(self, WorkerState::Running)
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PendingAction {
	None,
	Terminate,
	Kill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
	Running,
	ShuttingDown,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
	pub slot: SlotId,
	pub pid: Option<u32>,
	pub state: WorkerState,
	pub restarts: u32,
	pub uptime: Option<Duration>,
}
