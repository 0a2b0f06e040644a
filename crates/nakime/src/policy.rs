//! Restart guard for workers that cannot stay up.
//!
//! A rapid failure is an exit before the worker came online, or after less
//! than `min_uptime` of running. Consecutive rapid failures on one slot delay
//! the next spawn exponentially:
//!
//! ```text
//! delay(n) = backoff_first × 2^(n-1), capped at backoff_max
//! ```
//!
//! Once `max_failures` is reached the slot is reported unstable and the pool
//! is drained. `max_failures = 0` retries forever.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestartPolicy {
	#[serde(default = "default_max_failures")]
	pub max_failures: u32,
	#[serde(default = "default_backoff_first")]
	pub backoff_first: u64,
	#[serde(default = "default_backoff_max")]
	pub backoff_max: u64,
	#[serde(default = "default_min_uptime")]
	pub min_uptime: u64,
	/// Upper bound of the random delay added to each worker's max age, so a
	/// pool started at once does not rotate at once.
	#[serde(default)]
	pub rotation_jitter: u64,
}

impl Default for RestartPolicy {
	fn default() -> Self {
		Self {
			max_failures: default_max_failures(),
			backoff_first: default_backoff_first(),
			backoff_max: default_backoff_max(),
			min_uptime: default_min_uptime(),
			rotation_jitter: 0,
		}
	}
}

fn default_max_failures() -> u32 { 10 }
fn default_backoff_first() -> u64 { 100 }
fn default_backoff_max() -> u64 { 30_000 }
fn default_min_uptime() -> u64 { 1000 }

impl RestartPolicy {
	pub fn min_uptime(&self) -> Duration {
		Duration::from_millis(self.min_uptime)
	}

	/// Delay before respawning after `failures` consecutive rapid failures.
	pub fn delay_for(&self, failures: u32) -> Duration {
		if failures == 0 {
			return Duration::ZERO;
		}
		let exp = (failures - 1).min(31);
		let ms = self.backoff_first.saturating_mul(1u64 << exp);
		Duration::from_millis(ms.min(self.backoff_max))
	}

	pub fn exhausted(&self, failures: u32) -> bool {
		self.max_failures != 0 && failures >= self.max_failures
	}

	/// Time until a freshly started worker is rotated.
	pub fn rotation_delay(&self, max_age: Duration) -> Duration {
		if self.rotation_jitter == 0 {
			return max_age;
		}
		let extra = rand::thread_rng().gen_range(0..=self.rotation_jitter);
		max_age + Duration::from_millis(extra)
	}
}
