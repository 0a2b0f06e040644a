use std::path::{Path, PathBuf};
use std::process::Stdio;

use nix::errno::Errno;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

use crate::config::PoolConfig;
use crate::types::SlotId;

pub const SLOT_ENV: &str = "POOLMIND_SLOT";
pub const RESTARTS_ENV: &str = "POOLMIND_RESTARTS";

/// Launches one worker in its own process group.
pub(crate) fn spawn_worker(
	config: &PoolConfig,
	slot: SlotId,
	restarts: u32,
) -> std::io::Result<Child> {
	let script = command_path(&config.script);
	let mut cmd = match config.interpreter.as_deref().map(str::split_whitespace) {
		Some(mut parts) => match parts.next() {
			Some(program) => {
				let mut cmd = Command::new(program);
				cmd.args(parts).arg(&script);
				cmd
			}
			None => Command::new(&script),
		},
		None => Command::new(&script),
	};

	cmd.args(&config.args)
		.envs(&config.env)
		.env(SLOT_ENV, slot.to_string())
		.env(RESTARTS_ENV, restarts.to_string())
		.stdin(Stdio::null())
		.stdout(Stdio::inherit())
		.stderr(Stdio::inherit())
		.process_group(0)
		.kill_on_drop(true);

	cmd.spawn()
}

// A bare relative name would be looked up on PATH instead of in the cwd.
fn command_path(script: &Path) -> PathBuf {
	if script.is_relative() && script.parent().map_or(true, |p| p.as_os_str().is_empty()) {
		Path::new(".").join(script)
	} else {
		script.to_path_buf()
	}
}

/// Sends `signal` to the worker's process group. A group that is already
/// gone is not an error.
pub(crate) fn signal_group(pid: u32, signal: Signal) {
	match killpg(Pid::from_raw(pid as i32), signal) {
		Ok(()) | Err(Errno::ESRCH) => {}
		Err(e) => tracing::debug!("failed to send {} to worker {}: {}", signal, pid, e),
	}
}

/// Supervisor-side handle to a live worker. Signals are delivered by the
/// task that owns the child, so a worker that has already been reaped is
/// never signalled.
#[derive(Debug)]
pub(crate) struct WorkerHandle {
	signals: mpsc::UnboundedSender<Signal>,
}

impl WorkerHandle {
	pub fn new(signals: mpsc::UnboundedSender<Signal>) -> Self {
		Self { signals }
	}

	pub fn terminate(&self) {
		let _ = self.signals.send(Signal::SIGTERM);
	}

	pub fn kill(&self) {
		let _ = self.signals.send(Signal::SIGKILL);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn bare_script_names_resolve_to_cwd() {
		assert_eq!(command_path(Path::new("app.sh")), PathBuf::from("./app.sh"));
		assert_eq!(command_path(Path::new("bin/app.sh")), PathBuf::from("bin/app.sh"));
		assert_eq!(command_path(Path::new("/srv/app.sh")), PathBuf::from("/srv/app.sh"));
	}

	#[tokio::test]
	async fn handle_signals_are_ignored_after_exit() {
		let (tx, rx) = mpsc::unbounded_channel();
		let handle = WorkerHandle::new(tx);
		drop(rx);
		handle.terminate();
		handle.kill();
	}

	#[tokio::test]
	async fn spawn_passes_slot_environment() {
		let dir = std::env::temp_dir().join(format!("nakime-process-{}", std::process::id()));
		std::fs::create_dir_all(&dir).unwrap();
		let script = dir.join("env.sh");
		let out = dir.join("env.out");
		std::fs::write(
			&script,
			format!("echo \"$POOLMIND_SLOT $POOLMIND_RESTARTS $1\" > {}\n", out.display()),
		)
		.unwrap();

		let mut config = PoolConfig::new(&script);
		config.interpreter = Some("sh".into());
		config.args = vec!["extra".into()];

		let mut child = spawn_worker(&config, SlotId(3), 2).unwrap();
		let status = child.wait().await.unwrap();
		assert!(status.success());
		let written = std::fs::read_to_string(&out).unwrap();
		assert_eq!(written.trim(), "3 2 extra");

		let _ = std::fs::remove_dir_all(&dir);
	}
}
