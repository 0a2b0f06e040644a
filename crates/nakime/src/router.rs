//! Event router: turns child exits and the supervisor's own termination
//! signals into transition requests on the supervisor's queue.

use nix::sys::signal::Signal;
use tokio::process::Child;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::event::{Request, WorkerExit};
use crate::process::{self, WorkerHandle};
use crate::types::SlotId;

#[derive(Debug, Clone)]
pub(crate) struct EventRouter {
	tx: mpsc::UnboundedSender<Request>,
}

impl EventRouter {
	pub fn new(tx: mpsc::UnboundedSender<Request>) -> Self {
		Self { tx }
	}

	pub fn submit(&self, request: Request) {
		let _ = self.tx.send(request);
	}

	/// Takes ownership of a freshly spawned child. The watcher reports the
	/// worker online if it survived its spawn, forwards signals to its
	/// process group while it lives, and reports its exit keyed by pid once
	/// the rest of its group has been killed.
	pub fn watch_worker(&self, slot: SlotId, epoch: u64, pid: u32, child: Child) -> WorkerHandle {
		let (signal_tx, signal_rx) = mpsc::unbounded_channel();
		let router = self.clone();
		tokio::spawn(async move {
			watch(router, slot, epoch, pid, child, signal_rx).await;
		});
		WorkerHandle::new(signal_tx)
	}

	/// Submits a shutdown request for every SIGINT, SIGTERM, SIGQUIT or SIGHUP
	/// the supervisor receives.
	pub fn watch_signals(&self) -> std::io::Result<JoinHandle<()>> {
		let mut sigint = signal(SignalKind::interrupt())?;
		let mut sigterm = signal(SignalKind::terminate())?;
		let mut sigquit = signal(SignalKind::quit())?;
		let mut sighup = signal(SignalKind::hangup())?;

		let router = self.clone();
		Ok(tokio::spawn(async move {
			loop {
				let name = tokio::select! {
					_ = sigint.recv() => "SIGINT",
					_ = sigterm.recv() => "SIGTERM",
					_ = sigquit.recv() => "SIGQUIT",
					_ = sighup.recv() => "SIGHUP",
				};
				tracing::info!("received {}", name);
				router.submit(Request::Shutdown);
			}
		}))
	}
}

async fn watch(
	router: EventRouter,
	slot: SlotId,
	epoch: u64,
	pid: u32,
	mut child: Child,
	mut signals: mpsc::UnboundedReceiver<Signal>,
) {
	if let Ok(None) = child.try_wait() {
		router.submit(Request::Online { slot, epoch, pid });
	}

	let exit = loop {
		tokio::select! {
			status = child.wait() => {
				break match status {
					Ok(status) => WorkerExit::from(status),
					Err(e) => {
						tracing::debug!("failed to wait on worker {}: {}", pid, e);
						WorkerExit::Unknown
					}
				};
			}
			Some(sig) = signals.recv() => process::signal_group(pid, sig),
		}
	};

	// Anything the worker left running in its group goes down with it.
	process::signal_group(pid, Signal::SIGKILL);
	router.submit(Request::Exited { pid, exit });
}
