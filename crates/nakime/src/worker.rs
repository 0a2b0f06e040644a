use std::time::Instant;

use crate::process::WorkerHandle;
use crate::scheduler::SlotTimers;
use crate::types::{PendingAction, SlotId, WorkerState, WorkerStatus};

/// In-memory state for one slot. Owned and mutated only by the supervisor.
#[derive(Debug)]
pub(crate) struct WorkerRecord {
	pub slot: SlotId,
	pub pid: Option<u32>,
	pub state: WorkerState,
	pub started_at: Option<Instant>,
	pub restart_count: u32,
	pub pending: PendingAction,
	/// Bumped on every launch; timers and online reports from an earlier
	/// process carry an older epoch and are discarded.
	pub epoch: u64,
	/// Consecutive rapid failures, see [`RestartPolicy`](crate::RestartPolicy).
	pub failures: u32,
	/// The current process is being replaced because it aged out.
	pub rotating: bool,
	/// The current process missed its start deadline.
	pub failed_start: bool,
	pub handle: Option<WorkerHandle>,
	pub timers: SlotTimers,
}

impl WorkerRecord {
	pub fn new(slot: SlotId) -> Self {
		Self {
			slot,
			pid: None,
			state: WorkerState::Starting,
			started_at: None,
			restart_count: 0,
			pending: PendingAction::None,
			epoch: 0,
			failures: 0,
			rotating: false,
			failed_start: false,
			handle: None,
			timers: SlotTimers::default(),
		}
	}

	/// Clears everything tied to the previous process ahead of a new launch.
	pub fn reset_for_launch(&mut self) -> u64 {
		self.timers.cancel_all();
		self.epoch += 1;
		self.state = WorkerState::Starting;
		self.pid = None;
		self.handle = None;
		self.started_at = None;
		self.pending = PendingAction::None;
		self.rotating = false;
		self.failed_start = false;
		self.epoch
	}

	pub fn status(&self) -> WorkerStatus {
		WorkerStatus {
			slot: self.slot,
			pid: self.pid,
			state: self.state,
			restarts: self.restart_count,
			uptime: match self.state {
				WorkerState::Running => self.started_at.map(|t| t.elapsed()),
				_ => None,
			},
		}
	}
}
