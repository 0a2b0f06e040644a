use std::fmt;
use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;
use serde::Serialize;
use tokio::sync::oneshot;

use crate::types::{SlotId, WorkerStatus};

/// How a worker process ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum WorkerExit {
	Code(i32),
	Signal(i32),
	Unknown,
}

impl From<ExitStatus> for WorkerExit {
	fn from(status: ExitStatus) -> Self {
		if let Some(code) = status.code() {
			WorkerExit::Code(code)
		} else if let Some(sig) = status.signal() {
			WorkerExit::Signal(sig)
		} else {
			WorkerExit::Unknown
		}
	}
}

impl fmt::Display for WorkerExit {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			WorkerExit::Code(code) => write!(f, "Exit Code: {}", code),
			WorkerExit::Signal(sig) => match Signal::try_from(*sig) {
				Ok(signal) => write!(f, "Exit Signal: {}", signal.as_str()),
				Err(_) => write!(f, "Exit Signal: {}", sig),
			},
			WorkerExit::Unknown => write!(f, "Exit Status: unknown"),
		}
	}
}

/// Everything the pool reports about itself. Each event is logged once and
/// broadcast to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PoolEvent {
	Online { slot: SlotId, pid: u32 },
	AllOnline { count: usize },
	ReachedMaxAge { slot: SlotId, pid: u32 },
	Exited { slot: SlotId, pid: u32, exit: WorkerExit },
	Restarting { slot: SlotId, pid: u32 },
	StartFailed { slot: SlotId, pid: Option<u32>, reason: String },
	ForceKilled { slot: SlotId, pid: u32 },
	Closed { slot: SlotId, pid: Option<u32> },
	Unstable { slot: SlotId, failures: u32 },
	ShutdownStarted { workers: usize },
	ShutdownComplete,
}

impl PoolEvent {
	pub(crate) fn log(&self) {
		match self {
			PoolEvent::Online { slot, pid } => {
				tracing::debug!(%slot, "worker {} online", pid)
			}
			PoolEvent::AllOnline { count } => tracing::info!("{} workers online", count),
			PoolEvent::ReachedMaxAge { slot, pid } => {
				tracing::info!(%slot, "worker {} has reached the end of its life", pid)
			}
			PoolEvent::Exited { slot, pid, exit } => {
				tracing::debug!(%slot, "worker {} {}", pid, exit)
			}
			PoolEvent::Restarting { slot, pid } => {
				tracing::info!(%slot, "worker {} exited.  Restarting....", pid)
			}
			PoolEvent::StartFailed { slot, pid: Some(pid), reason } => {
				tracing::warn!(%slot, "worker {} failed to start: {}", pid, reason)
			}
			PoolEvent::StartFailed { slot, pid: None, reason } => {
				tracing::warn!(%slot, "worker failed to start: {}", reason)
			}
			PoolEvent::ForceKilled { slot, pid } => {
				tracing::warn!(%slot, "worker {} did not stop in time, sending SIGKILL", pid)
			}
			PoolEvent::Closed { slot, pid } => tracing::debug!(%slot, ?pid, "worker slot closed"),
			PoolEvent::Unstable { slot, failures } => {
				tracing::error!(%slot, "worker failed {} times in a row, giving up", failures)
			}
			PoolEvent::ShutdownStarted { workers } => {
				tracing::info!("shutting down {} workers", workers)
			}
			PoolEvent::ShutdownComplete => tracing::info!("all workers stopped"),
		}
	}
}

/// Transition requests. The supervisor loop is the only consumer, and the
/// only code that mutates worker records.
#[derive(Debug)]
pub(crate) enum Request {
	Online { slot: SlotId, epoch: u64, pid: u32 },
	Exited { pid: u32, exit: WorkerExit },
	StartTimeout { slot: SlotId, epoch: u64 },
	Rotate { slot: SlotId, epoch: u64 },
	Respawn { slot: SlotId, epoch: u64 },
	StopTimeout { slot: SlotId, pid: u32 },
	Shutdown,
	Status(oneshot::Sender<Vec<WorkerStatus>>),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn exit_code_display() {
		assert_eq!(WorkerExit::Code(3).to_string(), "Exit Code: 3");
		assert_eq!(WorkerExit::Signal(9).to_string(), "Exit Signal: SIGKILL");
		assert_eq!(WorkerExit::Signal(15).to_string(), "Exit Signal: SIGTERM");
	}

	#[test]
	fn exit_from_status() {
		assert_eq!(WorkerExit::from(ExitStatus::from_raw(3 << 8)), WorkerExit::Code(3));
		assert_eq!(WorkerExit::from(ExitStatus::from_raw(9)), WorkerExit::Signal(9));
	}
}
