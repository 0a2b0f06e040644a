use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tokio::sync::broadcast;

use nakime::{PoolConfig, PoolEvent, SlotId, Supervisor, SupervisorError, WorkerExit, WorkerState};

static TEST_COUNTER: AtomicU32 = AtomicU32::new(0);

const WAIT: Duration = Duration::from_secs(10);

fn temp_dir(name: &str) -> PathBuf {
	let n = TEST_COUNTER.fetch_add(1, Ordering::SeqCst);
	let dir = std::env::temp_dir().join(format!("nakime-test-{}-{}-{}", std::process::id(), n, name));
	let _ = std::fs::create_dir_all(&dir);
	dir
}

fn write_script(dir: &std::path::Path, body: &str) -> PathBuf {
	let path = dir.join("worker.sh");
	std::fs::write(&path, body).unwrap();
	path
}

fn pool_config(script: PathBuf, workers: usize) -> PoolConfig {
	let mut config = PoolConfig::new(script);
	config.workers = workers;
	config.interpreter = Some("sh".into());
	config.timeouts.stop = 2000;
	config.restart.backoff_first = 50;
	config
}

// Zombies count as dead: an orphan may sit unreaped if nothing above us reaps.
fn is_alive(pid: u32) -> bool {
	match std::fs::read_to_string(format!("/proc/{}/stat", pid)) {
		Ok(stat) => !stat
			.rsplit(')')
			.next()
			.map_or(false, |rest| rest.trim_start().starts_with('Z')),
		Err(_) => kill(Pid::from_raw(pid as i32), None).is_ok(),
	}
}

async fn wait_until_gone(pid: u32) -> bool {
	let deadline = tokio::time::Instant::now() + WAIT;
	while tokio::time::Instant::now() < deadline {
		if !is_alive(pid) {
			return true;
		}
		tokio::time::sleep(Duration::from_millis(50)).await;
	}
	false
}

async fn wait_for<F>(events: &mut broadcast::Receiver<PoolEvent>, mut pred: F) -> PoolEvent
where
	F: FnMut(&PoolEvent) -> bool,
{
	tokio::time::timeout(WAIT, async {
		loop {
			match events.recv().await {
				Ok(event) if pred(&event) => return event,
				Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
				Err(broadcast::error::RecvError::Closed) => panic!("supervisor went away"),
			}
		}
	})
	.await
	.expect("timed out waiting for pool event")
}

const SLEEPER: &str = "echo \"pid: $$\"\nexec sleep 60\n";

// --- Pool size ---

#[tokio::test]
async fn pool_reaches_configured_size() {
	let dir = temp_dir("size");
	let sup = Supervisor::new(pool_config(write_script(&dir, SLEEPER), 3)).unwrap();
	let handle = sup.handle();
	let mut events = sup.subscribe();
	let run = tokio::spawn(sup.run());

	wait_for(&mut events, |e| matches!(e, PoolEvent::AllOnline { count: 3 })).await;

	let status = handle.status().await;
	assert_eq!(status.len(), 3);
	assert!(status.iter().all(|s| s.state == WorkerState::Running));
	let pids: BTreeSet<u32> = status.iter().filter_map(|s| s.pid).collect();
	assert_eq!(pids.len(), 3);
	assert!(pids.iter().all(|pid| is_alive(*pid)));

	handle.shutdown();
	let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
	assert!(result.is_ok());
	assert!(pids.iter().all(|pid| !is_alive(*pid)));
	assert!(handle.status().await.is_empty());

	let _ = std::fs::remove_dir_all(&dir);
}

// --- Crash restarts ---

#[tokio::test]
async fn killed_worker_restarts_in_its_own_slot() {
	let dir = temp_dir("sigkill");
	let sup = Supervisor::new(pool_config(write_script(&dir, SLEEPER), 2)).unwrap();
	let handle = sup.handle();
	let mut events = sup.subscribe();
	let run = tokio::spawn(sup.run());

	wait_for(&mut events, |e| matches!(e, PoolEvent::AllOnline { .. })).await;
	let before = handle.status().await;
	let victim = before[0].pid.unwrap();
	let bystander = before[1].pid.unwrap();

	kill(Pid::from_raw(victim as i32), Signal::SIGKILL).unwrap();

	let restarting = wait_for(&mut events, |e| matches!(e, PoolEvent::Restarting { .. })).await;
	assert_eq!(
		restarting,
		PoolEvent::Restarting {
			slot: SlotId(1),
			pid: victim
		}
	);

	let mut extra_restarts = 0;
	let online = wait_for(&mut events, |e| {
		if matches!(e, PoolEvent::Restarting { .. }) {
			extra_restarts += 1;
		}
		matches!(e, PoolEvent::Online { slot: SlotId(1), .. })
	})
	.await;
	assert_eq!(extra_restarts, 0);
	let PoolEvent::Online { pid: replacement, .. } = online else {
		unreachable!()
	};
	assert_ne!(replacement, victim);

	let after = handle.status().await;
	assert_eq!(after.len(), 2);
	assert_eq!(after[0].pid, Some(replacement));
	assert_eq!(after[0].restarts, 1);
	assert_eq!(after[1].pid, Some(bystander));
	assert_eq!(after[1].restarts, 0);
	assert!(is_alive(replacement));
	assert!(is_alive(bystander));

	handle.shutdown();
	assert!(tokio::time::timeout(WAIT, run).await.unwrap().unwrap().is_ok());
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn worker_exit_code_is_reported_not_raised() {
	let dir = temp_dir("exit-code");
	let script = write_script(&dir, "sleep 0.2\nexit 3\n");
	let sup = Supervisor::new(pool_config(script, 1)).unwrap();
	let handle = sup.handle();
	let mut events = sup.subscribe();
	let run = tokio::spawn(sup.run());

	let online = wait_for(&mut events, |e| matches!(e, PoolEvent::Online { .. })).await;
	let PoolEvent::Online { pid, .. } = online else {
		unreachable!()
	};

	let exited = wait_for(&mut events, |e| matches!(e, PoolEvent::Exited { .. })).await;
	assert_eq!(
		exited,
		PoolEvent::Exited {
			slot: SlotId(1),
			pid,
			exit: WorkerExit::Code(3)
		}
	);
	let restarting = wait_for(&mut events, |e| matches!(e, PoolEvent::Restarting { .. })).await;
	assert_eq!(
		restarting,
		PoolEvent::Restarting {
			slot: SlotId(1),
			pid
		}
	);

	// The supervisor is still serving requests.
	assert!(!run.is_finished());
	assert_eq!(handle.status().await.len(), 1);

	handle.shutdown();
	assert!(tokio::time::timeout(WAIT, run).await.unwrap().unwrap().is_ok());
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn crashed_worker_takes_its_children_with_it() {
	let dir = temp_dir("grandchild");
	let marker = dir.join("child.pid");
	let body = format!("sleep 60 &\necho $! > '{}'\nwait\n", marker.display());
	let sup = Supervisor::new(pool_config(write_script(&dir, &body), 1)).unwrap();
	let handle = sup.handle();
	let mut events = sup.subscribe();
	let run = tokio::spawn(sup.run());

	wait_for(&mut events, |e| matches!(e, PoolEvent::AllOnline { .. })).await;
	let worker = handle.status().await[0].pid.unwrap();

	let deadline = tokio::time::Instant::now() + WAIT;
	let child = loop {
		let written = std::fs::read_to_string(&marker).unwrap_or_default();
		if let Ok(pid) = written.trim().parse::<u32>() {
			break pid;
		}
		assert!(tokio::time::Instant::now() < deadline, "worker never started its child");
		tokio::time::sleep(Duration::from_millis(20)).await;
	};
	assert!(is_alive(child));

	kill(Pid::from_raw(worker as i32), Signal::SIGKILL).unwrap();
	wait_for(&mut events, |e| matches!(e, PoolEvent::Restarting { pid, .. } if *pid == worker)).await;
	assert!(wait_until_gone(child).await, "child {} outlived worker {}", child, worker);

	handle.shutdown();
	assert!(tokio::time::timeout(WAIT, run).await.unwrap().unwrap().is_ok());
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Rotation ---

#[tokio::test]
async fn workers_rotate_after_max_age() {
	let dir = temp_dir("max-age");
	let mut config = pool_config(write_script(&dir, SLEEPER), 4);
	config.timeouts.max_age = 500;
	let sup = Supervisor::new(config).unwrap();
	let handle = sup.handle();
	let mut events = sup.subscribe();
	let run = tokio::spawn(sup.run());

	let mut aged = BTreeSet::new();
	let mut restarted = BTreeSet::new();
	wait_for(&mut events, |e| {
		match e {
			PoolEvent::ReachedMaxAge { pid, .. } => {
				aged.insert(*pid);
			}
			PoolEvent::Restarting { pid, .. } => {
				assert!(aged.contains(pid), "worker {} restarted without aging out", pid);
				restarted.insert(*pid);
			}
			_ => {}
		}
		restarted.len() == 4
	})
	.await;
	assert_eq!(aged, restarted);

	let status = handle.status().await;
	assert_eq!(status.len(), 4);
	assert!(status.iter().all(|s| s.restarts >= 1));

	handle.shutdown();
	assert!(tokio::time::timeout(WAIT, run).await.unwrap().unwrap().is_ok());
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Shutdown ---

#[tokio::test]
async fn shutdown_kills_workers_that_ignore_sigterm() {
	let dir = temp_dir("stubborn");
	let script = write_script(&dir, "trap '' TERM\nwhile :; do sleep 1; done\n");
	let mut config = pool_config(script, 2);
	config.timeouts.stop = 300;
	let sup = Supervisor::new(config).unwrap();
	let handle = sup.handle();
	let mut events = sup.subscribe();
	let run = tokio::spawn(sup.run());

	wait_for(&mut events, |e| matches!(e, PoolEvent::AllOnline { .. })).await;
	// Let the shell install its trap.
	tokio::time::sleep(Duration::from_millis(300)).await;
	let pids: Vec<u32> = handle.status().await.iter().filter_map(|s| s.pid).collect();

	handle.shutdown();
	wait_for(&mut events, |e| matches!(e, PoolEvent::ForceKilled { .. })).await;

	assert!(tokio::time::timeout(WAIT, run).await.unwrap().unwrap().is_ok());
	assert!(pids.iter().all(|pid| !is_alive(*pid)));
	let _ = std::fs::remove_dir_all(&dir);
}

// --- Start failures ---

#[tokio::test]
async fn slot_that_cannot_start_is_reported_unstable() {
	let dir = temp_dir("unstable");
	// Not executable and no interpreter: every spawn fails.
	let mut config = pool_config(write_script(&dir, SLEEPER), 1);
	config.interpreter = None;
	config.restart.max_failures = 3;
	config.restart.backoff_first = 10;
	let sup = Supervisor::new(config).unwrap();
	let mut events = sup.subscribe();
	let run = tokio::spawn(sup.run());

	let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
	match result {
		Err(SupervisorError::Unstable { slot, failures }) => {
			assert_eq!(slot, SlotId(1));
			assert_eq!(failures, 3);
		}
		other => panic!("expected Unstable, got {:?}", other),
	}

	let mut start_failures = 0;
	while let Ok(event) = events.try_recv() {
		if matches!(event, PoolEvent::StartFailed { .. }) {
			start_failures += 1;
		}
	}
	assert_eq!(start_failures, 3);
	let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn crash_loop_backs_off_and_gives_up() {
	let dir = temp_dir("crash-loop");
	let mut config = pool_config(write_script(&dir, "exit 1\n"), 1);
	config.restart.max_failures = 4;
	config.restart.backoff_first = 10;
	let sup = Supervisor::new(config).unwrap();
	let run = tokio::spawn(sup.run());

	let result = tokio::time::timeout(WAIT, run).await.unwrap().unwrap();
	assert!(matches!(result, Err(SupervisorError::Unstable { failures: 4, .. })));
	let _ = std::fs::remove_dir_all(&dir);
}
