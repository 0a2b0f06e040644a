use std::collections::BTreeMap;
use std::io;
use std::time::Instant;

use tokio::sync::{broadcast, mpsc, oneshot};

use crate::config::PoolConfig;
use crate::error::{ConfigError, SupervisorError};
use crate::event::{PoolEvent, Request, WorkerExit};
use crate::process;
use crate::router::EventRouter;
use crate::scheduler::TimerKind;
use crate::types::*;
use crate::worker::WorkerRecord;

const EVENT_CAPACITY: usize = 1024;

/// Owns the worker pool and applies every state transition.
///
/// Crash reports, timers, signals and handle calls all arrive as requests on
/// one queue and are applied one at a time by [`Supervisor::run`], so two
/// transitions for the same slot can never interleave.
pub struct Supervisor {
	pub(crate) config: PoolConfig,
	pub(crate) pool: BTreeMap<SlotId, WorkerRecord>,
	pub(crate) phase: Phase,
	pub(crate) router: EventRouter,
	requests: mpsc::UnboundedReceiver<Request>,
	events: broadcast::Sender<PoolEvent>,
	handle_signals: bool,
	announced: bool,
	pub(crate) fatal: Option<SupervisorError>,
}

/// Cloneable control handle for a running [`Supervisor`].
#[derive(Debug, Clone)]
pub struct SupervisorHandle {
	router: EventRouter,
}

impl SupervisorHandle {
	/// Starts an orderly shutdown. Calling it again while workers are still
	/// stopping kills them outright.
	pub fn shutdown(&self) {
		self.router.submit(Request::Shutdown);
	}

	/// Snapshot of every slot, empty once the supervisor has finished.
	pub async fn status(&self) -> Vec<WorkerStatus> {
		let (tx, rx) = oneshot::channel();
		self.router.submit(Request::Status(tx));
		rx.await.unwrap_or_default()
	}
}

impl Supervisor {
	pub fn new(config: PoolConfig) -> Result<Self, ConfigError> {
		config.validate()?;
		let slots = config.slot_count()?;

		let (tx, requests) = mpsc::unbounded_channel();
		let (events, _) = broadcast::channel(EVENT_CAPACITY);
		let pool = (1..=slots)
			.map(SlotId)
			.map(|slot| (slot, WorkerRecord::new(slot)))
			.collect();

		Ok(Self {
			config,
			pool,
			phase: Phase::Running,
			router: EventRouter::new(tx),
			requests,
			events,
			handle_signals: false,
			announced: false,
			fatal: None,
		})
	}

	/// Shut the pool down on SIGINT, SIGTERM, SIGQUIT and SIGHUP.
	pub fn with_signal_handling(mut self, enabled: bool) -> Self {
		self.handle_signals = enabled;
		self
	}

	pub fn config(&self) -> &PoolConfig {
		&self.config
	}

	pub fn handle(&self) -> SupervisorHandle {
		SupervisorHandle {
			router: self.router.clone(),
		}
	}

	pub fn subscribe(&self) -> broadcast::Receiver<PoolEvent> {
		self.events.subscribe()
	}

	/// Starts every slot and supervises the pool until it has been drained.
	///
	/// Returns `Ok` after an orderly shutdown. Worker crashes never end the
	/// loop; only a slot that keeps failing to start does.
	pub async fn run(mut self) -> Result<(), SupervisorError> {
		let signals = if self.handle_signals {
			Some(self.router.watch_signals()?)
		} else {
			None
		};

		tracing::info!(
			"starting {} workers for {}",
			self.pool.len(),
			self.config.script.display()
		);
		let slots: Vec<SlotId> = self.pool.keys().copied().collect();
		for slot in slots {
			self.launch(slot);
		}

		while !self.is_drained() {
			match self.requests.recv().await {
				Some(request) => self.apply(request),
				None => break,
			}
		}

		if let Some(task) = signals {
			task.abort();
		}
		self.emit(PoolEvent::ShutdownComplete);

		match self.fatal.take() {
			Some(err) => Err(err),
			None => Ok(()),
		}
	}

	pub(crate) fn apply(&mut self, request: Request) {
		match request {
			Request::Online { slot, epoch, pid } => self.on_online(slot, epoch, pid),
			Request::Exited { pid, exit } => match self.slot_of(pid) {
				Some(slot) => self.on_exit(slot, pid, exit),
				None => tracing::trace!("dropping exit of worker {}, it owns no slot", pid),
			},
			Request::StartTimeout { slot, epoch } => self.on_start_timeout(slot, epoch),
			Request::Rotate { slot, epoch } => self.on_rotate(slot, epoch),
			Request::Respawn { slot, epoch } => self.on_respawn(slot, epoch),
			Request::StopTimeout { slot, pid } => self.on_stop_timeout(slot, pid),
			Request::Shutdown => self.on_shutdown_request(),
			Request::Status(reply) => {
				let _ = reply.send(self.status());
			}
		}
	}

	pub(crate) fn is_drained(&self) -> bool {
		self.phase == Phase::ShuttingDown && self.pool.is_empty()
	}

	pub(crate) fn status(&self) -> Vec<WorkerStatus> {
		self.pool.values().map(WorkerRecord::status).collect()
	}

	pub(crate) fn emit(&self, event: PoolEvent) {
		event.log();
		let _ = self.events.send(event);
	}

	fn slot_of(&self, pid: u32) -> Option<SlotId> {
		self.pool
			.values()
			.find(|record| record.pid == Some(pid))
			.map(|record| record.slot)
	}

	fn launch(&mut self, slot: SlotId) {
		if self.phase != Phase::Running {
			return;
		}
		let Some(record) = self.pool.get_mut(&slot) else {
			return;
		};
		let epoch = record.reset_for_launch();

		let spawned = process::spawn_worker(&self.config, slot, record.restart_count).and_then(
			|child| match child.id() {
				Some(pid) => Ok((pid, child)),
				None => Err(io::Error::new(
					io::ErrorKind::Other,
					"worker was reaped before it could be tracked",
				)),
			},
		);

		match spawned {
			Ok((pid, child)) => {
				record.pid = Some(pid);
				record.handle = Some(self.router.watch_worker(slot, epoch, pid, child));
				record.timers.arm(
					TimerKind::Start,
					self.config.timeouts.start_timeout(),
					&self.router,
					Request::StartTimeout { slot, epoch },
				);
				tracing::debug!(%slot, "spawned worker {}", pid);
			}
			Err(e) => {
				record.state = WorkerState::Restarting;
				self.emit(PoolEvent::StartFailed {
					slot,
					pid: None,
					reason: e.to_string(),
				});
				self.record_failure(slot);
			}
		}
	}

	fn on_online(&mut self, slot: SlotId, epoch: u64, pid: u32) {
		let Some(record) = self.pool.get_mut(&slot) else {
			return;
		};
		if record.epoch != epoch
			|| record.state != WorkerState::Starting
			|| record.pid != Some(pid)
		{
			return;
		}

		record.state = WorkerState::Running;
		record.started_at = Some(Instant::now());
		record.timers.cancel(TimerKind::Start);
		let after = self
			.config
			.restart
			.rotation_delay(self.config.timeouts.max_age_timeout());
		record.timers.arm(
			TimerKind::MaxAge,
			after,
			&self.router,
			Request::Rotate { slot, epoch },
		);

		self.emit(PoolEvent::Online { slot, pid });

		if !self.announced && self.pool.values().all(|r| r.state.is_running()) {
			self.announced = true;
			self.emit(PoolEvent::AllOnline {
				count: self.pool.len(),
			});
		}
	}

	fn on_exit(&mut self, slot: SlotId, pid: u32, exit: WorkerExit) {
		let min_uptime = self.config.restart.min_uptime();
		let shutting_down = self.phase == Phase::ShuttingDown;
		let Some(record) = self.pool.get_mut(&slot) else {
			return;
		};
		record.timers.cancel_all();
		record.handle = None;
		record.pid = None;

		if shutting_down || record.state == WorkerState::Stopping {
			record.state = WorkerState::Closed;
			self.pool.remove(&slot);
			self.emit(PoolEvent::Exited { slot, pid, exit });
			self.emit(PoolEvent::Closed {
				slot,
				pid: Some(pid),
			});
			return;
		}

		let rapid = !record.rotating
			&& (record.failed_start
				|| record.state == WorkerState::Starting
				|| record
					.started_at
					.map_or(true, |t| t.elapsed() < min_uptime));
		record.failures = if rapid { record.failures + 1 } else { 0 };
		record.state = WorkerState::Restarting;
		record.pending = PendingAction::None;
		record.restart_count += 1;
		let failures = record.failures;

		self.emit(PoolEvent::Exited { slot, pid, exit });
		self.emit(PoolEvent::Restarting { slot, pid });
		self.schedule_respawn(slot, failures);
	}

	fn on_start_timeout(&mut self, slot: SlotId, epoch: u64) {
		let start = self.config.timeouts.start;
		let Some(record) = self.pool.get_mut(&slot) else {
			return;
		};
		if record.epoch != epoch || record.state != WorkerState::Starting {
			return;
		}

		record.failed_start = true;
		record.state = WorkerState::Restarting;
		let pid = record.pid;
		let has_process = match record.handle.as_ref() {
			Some(handle) => {
				handle.kill();
				true
			}
			None => false,
		};
		if has_process {
			record.pending = PendingAction::Kill;
		}

		self.emit(PoolEvent::StartFailed {
			slot,
			pid,
			reason: format!("not online within {}ms", start),
		});
		// With a process, the failure is counted when its exit arrives.
		if !has_process {
			self.record_failure(slot);
		}
	}

	fn on_rotate(&mut self, slot: SlotId, epoch: u64) {
		if self.phase != Phase::Running {
			return;
		}
		let stop = self.config.timeouts.stop_timeout();
		let Some(record) = self.pool.get_mut(&slot) else {
			return;
		};
		if record.epoch != epoch || record.state != WorkerState::Running {
			return;
		}
		let (Some(pid), Some(handle)) = (record.pid, record.handle.as_ref()) else {
			return;
		};

		handle.terminate();
		record.state = WorkerState::Restarting;
		record.rotating = true;
		record.pending = PendingAction::Terminate;
		record.timers.cancel(TimerKind::MaxAge);
		record.timers.arm(
			TimerKind::Stop,
			stop,
			&self.router,
			Request::StopTimeout { slot, pid },
		);

		self.emit(PoolEvent::ReachedMaxAge { slot, pid });
	}

	fn on_respawn(&mut self, slot: SlotId, epoch: u64) {
		let Some(record) = self.pool.get(&slot) else {
			return;
		};
		if record.epoch == epoch && record.state == WorkerState::Restarting && record.pid.is_none() {
			self.launch(slot);
		}
	}

	fn record_failure(&mut self, slot: SlotId) {
		let failures = match self.pool.get_mut(&slot) {
			Some(record) => {
				record.failures += 1;
				record.failures
			}
			None => return,
		};
		self.schedule_respawn(slot, failures);
	}

	fn schedule_respawn(&mut self, slot: SlotId, failures: u32) {
		if failures == 0 {
			self.launch(slot);
			return;
		}

		if self.config.restart.exhausted(failures) {
			self.emit(PoolEvent::Unstable { slot, failures });
			if self.fatal.is_none() {
				self.fatal = Some(SupervisorError::Unstable { slot, failures });
			}
			self.begin_shutdown();
			return;
		}

		// Failed slots always go back through the queue, even with no delay.
		let delay = self.config.restart.delay_for(failures);
		let Some(record) = self.pool.get_mut(&slot) else {
			return;
		};
		let epoch = record.epoch;
		record.timers.arm(
			TimerKind::Respawn,
			delay,
			&self.router,
			Request::Respawn { slot, epoch },
		);
		tracing::debug!(%slot, "respawning in {:?}", delay);
	}
}
