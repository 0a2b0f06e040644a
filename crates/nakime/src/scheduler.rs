//! Per-slot timers: start timeout, max age, stop timeout and respawn delay.
//!
//! Each timer is a task that sleeps and then submits a request. Cancelling
//! aborts the task; a request that was already queued before the abort is
//! rejected by the supervisor because it carries a stale epoch or pid.

use std::time::Duration;

use tokio::task::AbortHandle;

use crate::event::Request;
use crate::router::EventRouter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerKind {
	Start,
	MaxAge,
	Stop,
	Respawn,
}

#[derive(Debug, Default)]
pub(crate) struct SlotTimers {
	start: Option<AbortHandle>,
	max_age: Option<AbortHandle>,
	stop: Option<AbortHandle>,
	respawn: Option<AbortHandle>,
}

impl SlotTimers {
	pub fn arm(&mut self, kind: TimerKind, after: Duration, router: &EventRouter, request: Request) {
		self.cancel(kind);
		let router = router.clone();
		let task = tokio::spawn(async move {
			tokio::time::sleep(after).await;
			router.submit(request);
		});
		*self.slot_mut(kind) = Some(task.abort_handle());
	}

	pub fn cancel(&mut self, kind: TimerKind) {
		if let Some(handle) = self.slot_mut(kind).take() {
			handle.abort();
		}
	}

	pub fn cancel_all(&mut self) {
		for kind in [TimerKind::Start, TimerKind::MaxAge, TimerKind::Stop, TimerKind::Respawn] {
			self.cancel(kind);
		}
	}

	#[cfg(test)]
	pub fn is_armed(&self, kind: TimerKind) -> bool {
		match kind {
			TimerKind::Start => self.start.is_some(),
			TimerKind::MaxAge => self.max_age.is_some(),
			TimerKind::Stop => self.stop.is_some(),
			TimerKind::Respawn => self.respawn.is_some(),
		}
	}

	fn slot_mut(&mut self, kind: TimerKind) -> &mut Option<AbortHandle> {
		match kind {
			TimerKind::Start => &mut self.start,
			TimerKind::MaxAge => &mut self.max_age,
			TimerKind::Stop => &mut self.stop,
			TimerKind::Respawn => &mut self.respawn,
		}
	}
}

impl Drop for SlotTimers {
	fn drop(&mut self) {
		self.cancel_all();
	}
}
