use std::{fmt, sync::Arc, thread, time::Duration};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, instrument, trace, warn};

use super::{config::Config, error::Error, queue::CategoryQueue, task::WorkHandle};

/// Counts jobs that were handed to an executor and not yet released by it.
#[derive(Debug, Default)]
pub(crate) struct InFlight {
	count: Mutex<usize>,
	drained: Condvar,
}

impl InFlight {
	pub fn enter(self: &Arc<Self>) -> InFlightGuard {
		*self.count.lock() += 1;

		InFlightGuard(Arc::clone(self))
	}

	pub fn count(&self) -> usize {
		*self.count.lock()
	}

	/// Returns `true` if nothing is in flight anymore, `false` if we gave up after `timeout`.
	pub fn wait_idle(&self, timeout: Duration) -> bool {
		let mut count = self.count.lock();

		if self
			.drained
			.wait_while_for(&mut count, |count| *count > 0, timeout)
			.timed_out()
		{
			trace!(?timeout, "Timed out waiting for in flight jobs");
		}

		*count == 0
	}
}

#[derive(Debug)]
pub(crate) struct InFlightGuard(Arc<InFlight>);

impl Drop for InFlightGuard {
	fn drop(&mut self) {
		let mut count = self.0.count.lock();
		*count -= 1;

		if *count == 0 {
			self.0.drained.notify_all();
		}
	}
}

/// The worker pool of one category.
///
/// Backed by a dedicated tokio runtime whose blocking pool gives us cached concurrency: a thread
/// is spawned whenever no idle one is available and reclaimed after the configured keep alive.
/// The executor keeps a handle to every job it was given, so shutting it down cancels them.
pub(crate) struct Executor {
	label: String,
	generation: u64,
	runtime: Mutex<Option<Runtime>>,
	spawned: Mutex<CategoryQueue>,
	in_flight: Arc<InFlight>,
}

impl fmt::Debug for Executor {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Executor")
			.field("label", &self.label)
			.field("generation", &self.generation)
			.field("is_shutdown", &self.is_shutdown())
			.field("in_flight", &self.in_flight.count())
			.finish()
	}
}

impl Executor {
	pub fn build(label: impl Into<String>, generation: u64, config: &Config) -> Result<Self, Error> {
		let label = label.into();

		let runtime = Builder::new_multi_thread()
			.worker_threads(1)
			.max_blocking_threads(config.max_blocking_threads.max(1))
			.thread_keep_alive(config.thread_keep_alive)
			.thread_name(format!("{}-{label}", config.thread_name_prefix))
			.build()
			.map_err(|source| Error::ExecutorBuild {
				category: label.clone(),
				source,
			})?;

		trace!(%label, generation, "Built executor");

		Ok(Self {
			label,
			generation,
			runtime: Mutex::new(Some(runtime)),
			spawned: Mutex::new(CategoryQueue::default()),
			in_flight: Arc::new(InFlight::default()),
		})
	}

	pub const fn generation(&self) -> u64 {
		self.generation
	}

	pub fn in_flight(&self) -> InFlightGuard {
		self.in_flight.enter()
	}

	pub fn in_flight_count(&self) -> usize {
		self.in_flight.count()
	}

	pub fn is_shutdown(&self) -> bool {
		self.runtime.lock().is_none()
	}

	/// Hands `job`, tracked by `handle`, to a worker thread. After a shutdown the job is dropped
	/// right away and `false` is returned.
	pub fn spawn(&self, handle: WorkHandle, job: impl FnOnce() + Send + 'static) -> bool {
		if let Some(runtime) = self.runtime.lock().as_ref() {
			self.spawned.lock().push(handle);
			// The join handle is not needed, jobs report back through their worktable
			drop(runtime.spawn_blocking(job));
			true
		} else {
			false
		}
	}

	/// Stops accepting jobs and cancels every job it was given: queued ones never start their
	/// compute phase, running ones get their interrupter raised. Threads are not killed, running
	/// jobs return whenever they notice.
	#[instrument(skip(self), fields(label = %self.label, generation = self.generation))]
	pub fn shutdown(&self) {
		let Some(runtime) = self.runtime.lock().take() else {
			trace!("Executor was already shutdown");
			return;
		};

		// No more pushes once the runtime is gone, spawn checks it under the same lock
		let signaled = self.spawned.lock().take().cancel_all();

		debug!(
			signaled,
			in_flight = self.in_flight.count(),
			"Shutting down executor"
		);

		runtime.shutdown_background();
	}

	/// Blocks until every job handed to this executor was released, up to `timeout`.
	pub fn wait_idle(&self, timeout: Duration) -> bool {
		self.in_flight.wait_idle(timeout)
	}

	/// Releases an executor that was swapped out without being shut down: it keeps serving the
	/// jobs it already has and shuts down once they are done. After `grace` it shuts down anyway,
	/// cancelling whatever is left.
	pub fn retire(self: Arc<Self>, grace: Duration) {
		let label = format!("{}-retire", self.label);

		let spawned = thread::Builder::new().name(label).spawn({
			let this = Arc::clone(&self);
			move || {
				if !this.wait_idle(grace) {
					warn!(
						label = %this.label,
						generation = this.generation,
						in_flight = this.in_flight.count(),
						"Retired executor still busy after grace period, shutting it down anyway"
					);
				}
				this.shutdown();
			}
		});

		if let Err(e) = spawned {
			warn!(label = %self.label, ?e, "Failed to spawn retiring thread, shutting executor down now");
			self.shutdown();
		}
	}
}

impl Drop for Executor {
	fn drop(&mut self) {
		if let Some(runtime) = self.runtime.get_mut().take() {
			runtime.shutdown_background();
		}
	}
}
