use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Ceiling for every "wait for termination" the handler performs.
pub const DEFAULT_TERMINATION_TIMEOUT: Duration = Duration::from_secs(5);

/// How long an idle worker thread lingers before being reclaimed.
pub const DEFAULT_THREAD_KEEP_ALIVE: Duration = Duration::from_secs(60);

pub const DEFAULT_MAX_BLOCKING_THREADS: usize = 512;

/// Tunables for a [`TaskHandler`](crate::TaskHandler).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
	/// Bounded wait used by `flush` and executor replacement. Expiry is not an error, the handler
	/// just stops waiting.
	pub termination_timeout: Duration,

	pub thread_keep_alive: Duration,

	/// Upper bound on worker threads per category pool.
	pub max_blocking_threads: usize,

	/// Worker threads are named `{prefix}-{category}`.
	pub thread_name_prefix: String,
}

impl Default for Config {
	fn default() -> Self {
		Self {
			termination_timeout: DEFAULT_TERMINATION_TIMEOUT,
			thread_keep_alive: DEFAULT_THREAD_KEEP_ALIVE,
			max_blocking_threads: DEFAULT_MAX_BLOCKING_THREADS,
			thread_name_prefix: "task-handler".to_string(),
		}
	}
}

impl Config {
	#[must_use]
	pub fn with_termination_timeout(mut self, timeout: Duration) -> Self {
		self.termination_timeout = timeout;
		self
	}

	#[must_use]
	pub fn with_thread_keep_alive(mut self, keep_alive: Duration) -> Self {
		self.thread_keep_alive = keep_alive;
		self
	}

	#[must_use]
	pub fn with_max_blocking_threads(mut self, max: usize) -> Self {
		self.max_blocking_threads = max;
		self
	}

	#[must_use]
	pub fn with_thread_name_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.thread_name_prefix = prefix.into();
		self
	}
}
