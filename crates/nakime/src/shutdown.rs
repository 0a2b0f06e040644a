//! Shutdown coordinator: drains the pool with SIGTERM, escalating to SIGKILL
//! per worker after the stop timeout, or for everyone on a second request.

use crate::event::{PoolEvent, Request};
use crate::scheduler::TimerKind;
use crate::supervisor::Supervisor;
use crate::types::{PendingAction, Phase, SlotId, WorkerState};

impl Supervisor {
	pub(crate) fn on_shutdown_request(&mut self) {
		match self.phase {
			Phase::Running => self.begin_shutdown(),
			Phase::ShuttingDown => self.force_stop(),
		}
	}

	/// Moves every slot to Stopping. Slots with no process (waiting on a
	/// respawn delay) close immediately.
	pub(crate) fn begin_shutdown(&mut self) {
		if self.phase == Phase::ShuttingDown {
			return;
		}
		self.phase = Phase::ShuttingDown;
		self.emit(PoolEvent::ShutdownStarted {
			workers: self.pool.len(),
		});

		let stop = self.config.timeouts.stop_timeout();
		let mut idle = Vec::new();
		for (slot, record) in self.pool.iter_mut() {
			record.timers.cancel_all();
			let (Some(pid), Some(handle)) = (record.pid, record.handle.as_ref()) else {
				record.state = WorkerState::Closed;
				idle.push(*slot);
				continue;
			};

			if record.pending != PendingAction::Kill {
				handle.terminate();
				record.pending = PendingAction::Terminate;
			}
			record.state = WorkerState::Stopping;
			record.timers.arm(
				TimerKind::Stop,
				stop,
				&self.router,
				Request::StopTimeout { slot: *slot, pid },
			);
		}

		for slot in idle {
			self.pool.remove(&slot);
			self.emit(PoolEvent::Closed { slot, pid: None });
		}
	}

	/// Stop timer fired. Only escalates if `pid` still owns the slot and has
	/// not already been killed.
	pub(crate) fn on_stop_timeout(&mut self, slot: SlotId, pid: u32) {
		let Some(record) = self.pool.get_mut(&slot) else {
			return;
		};
		if record.pid != Some(pid) || record.pending != PendingAction::Terminate {
			return;
		}
		let Some(handle) = record.handle.as_ref() else {
			return;
		};

		handle.kill();
		record.pending = PendingAction::Kill;
		self.emit(PoolEvent::ForceKilled { slot, pid });
	}

	fn force_stop(&mut self) {
		let mut killed = Vec::new();
		for (slot, record) in self.pool.iter_mut() {
			if record.pending == PendingAction::Kill {
				continue;
			}
			if let (Some(pid), Some(handle)) = (record.pid, record.handle.as_ref()) {
				handle.kill();
				record.pending = PendingAction::Kill;
				killed.push((*slot, pid));
			}
		}

		for (slot, pid) in killed {
			self.emit(PoolEvent::ForceKilled { slot, pid });
		}
	}
}
