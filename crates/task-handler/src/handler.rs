use std::{
	fmt,
	marker::PhantomData,
	sync::{
		atomic::{AtomicU64, Ordering},
		Arc,
	},
	time::Duration,
};

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use tracing::{debug, debug_span, error, instrument, trace, warn};

use super::{
	category::{Category, TaskKind},
	config::Config,
	context::ControllingContext,
	error::{Error, RunError},
	executor::Executor,
	queue::CategoryQueue,
	task::{Task, TaskId, WorkHandle, Worktable},
	worker::Job,
};

/// Everything the handler keeps for one category.
struct Slot {
	label: String,
	executor: ArcSwap<Executor>,
	queue: Mutex<CategoryQueue>,
	/// Serializes flushes and executor replacements of this category.
	flush_lock: Mutex<()>,
	generations: AtomicU64,
}

impl Slot {
	fn new<C: Category>(category: C, config: &Config) -> Result<Self, Error> {
		let label = format!("{category:?}").to_lowercase();

		Ok(Self {
			executor: ArcSwap::from_pointee(Executor::build(label.clone(), 0, config)?),
			label,
			queue: Mutex::new(CategoryQueue::default()),
			flush_lock: Mutex::new(()),
			generations: AtomicU64::new(0),
		})
	}
}

/// Per-category background task scheduler.
///
/// Each category owns a cached worker pool and the list of handles submitted since its last
/// [`flush`](Self::flush). Pre-run and post-run phases are marshalled to the
/// [`ControllingContext`] given at construction.
///
/// The handler is `Send + Sync`: submissions only take a short bookkeeping lock, flushes of the
/// same category are serialized, and executors are published through an atomic swap so a
/// submitter always finds one.
///
/// `flush`, `replace_executor` and `shutdown` may block for the configured termination timeout.
/// Don't call them from inside an async runtime, and don't expect post-runs to drain when calling
/// them from the controlling context itself.
pub struct TaskHandler<C: Category = TaskKind> {
	context: Arc<dyn ControllingContext>,
	config: Config,
	slots: Box<[Slot]>,
	_category: PhantomData<fn(C)>,
}

impl<C: Category> fmt::Debug for TaskHandler<C> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		let mut debug = f.debug_struct("TaskHandler");
		debug.field("config", &self.config);

		for slot in self.slots.iter() {
			debug.field(&slot.label, &slot.executor.load_full());
		}

		debug.finish_non_exhaustive()
	}
}

impl<C: Category> TaskHandler<C> {
	pub fn new(context: impl ControllingContext + 'static) -> Result<Self, Error> {
		Self::with_config(context, Config::default())
	}

	/// Builds an executor for every category up front.
	pub fn with_config(
		context: impl ControllingContext + 'static,
		config: Config,
	) -> Result<Self, Error> {
		if C::ALL.is_empty() {
			return Err(Error::NoCategories);
		}

		let slots = C::ALL
			.iter()
			.enumerate()
			.map(|(expected, category)| {
				if category.slot() == expected {
					Slot::new(*category, &config)
				} else {
					Err(Error::CategorySlot {
						category: format!("{category:?}"),
						slot: category.slot(),
						expected,
					})
				}
			})
			.collect::<Result<Vec<_>, _>>()?
			.into_boxed_slice();

		debug!(categories = slots.len(), "Task handler ready");

		Ok(Self {
			context: Arc::new(context),
			config,
			slots,
			_category: PhantomData,
		})
	}

	#[must_use]
	pub const fn config(&self) -> &Config {
		&self.config
	}

	/// Queues `task` on the executor of `category`.
	///
	/// Never blocks on the task and never fails: if the executor was shut down, the returned
	/// handle is already cancelled. There is no ordering between tasks, of the same category or not.
	///
	/// # Panics
	///
	/// Panics if `category` maps to a slot outside of [`Category::ALL`].
	pub fn submit<T, E>(&self, category: C, task: Task<T, E>) -> WorkHandle
	where
		T: Send + 'static,
		E: RunError,
	{
		let slot = self.slot(category);
		let task_id = TaskId::new_v4();

		let worktable = Arc::new(Worktable::new(task_id));
		let handle = WorkHandle::new(Arc::clone(&worktable));

		slot.queue.lock().push(handle.clone());

		let executor = slot.executor.load();

		let job = Job::new(
			task,
			worktable,
			Arc::clone(&self.context),
			debug_span!("task", category = %slot.label, %task_id),
			executor.in_flight(),
		);

		if executor.spawn(handle.clone(), move || job.run()) {
			trace!(category = %slot.label, %task_id, generation = executor.generation(), "Task submitted");
		} else {
			warn!(category = %slot.label, %task_id, "Executor is shutdown, task canceled on submission");
		}

		handle
	}

	/// Cancels every handle tracked for `category` and forgets them.
	///
	/// - `wait_for_running_before_cancelling` first blocks until the current executor has no work in
	///   flight, up to the termination timeout.
	/// - Tracked handles are then always cancelled: pending ones never run their compute phase,
	///   running ones get their interrupter raised.
	/// - `force_replace_executor` shuts the executor down and installs a fresh one, waiting up to
	///   the termination timeout for the old one to drain if `wait_for_replacement_to_finish` is set.
	/// - Without `force_replace_executor`, `wait_for_replacement_to_finish` waits for the current
	///   executor to drain instead.
	///
	/// Timeouts are not errors, the flush just stops waiting.
	///
	/// # Panics
	///
	/// Panics if `category` maps to a slot outside of [`Category::ALL`].
	#[instrument(skip(self))]
	pub fn flush(
		&self,
		category: C,
		force_replace_executor: bool,
		wait_for_replacement_to_finish: bool,
		wait_for_running_before_cancelling: bool,
	) {
		let slot = self.slot(category);
		let _flushing = slot.flush_lock.lock();

		let timeout = self.config.termination_timeout;

		if wait_for_running_before_cancelling {
			let executor = slot.executor.load_full();
			if !executor.wait_idle(timeout) {
				warn!(
					?timeout,
					in_flight = executor.in_flight_count(),
					"Gave up waiting for running tasks before cancelling"
				);
			}
		}

		let tracked = slot.queue.lock().take();
		let signaled = tracked.cancel_all();

		debug!(tracked = tracked.len(), signaled, "Canceled tracked tasks");

		if force_replace_executor {
			self.swap_executor(slot, true, wait_for_replacement_to_finish);
		} else if wait_for_replacement_to_finish {
			let executor = slot.executor.load_full();
			if !executor.wait_idle(timeout) {
				warn!(
					?timeout,
					in_flight = executor.in_flight_count(),
					"Gave up waiting for the executor to finish"
				);
			}
		}
	}

	/// [`flush`](Self::flush) every category, one after the other.
	pub fn flush_all(
		&self,
		force_replace_executor: bool,
		wait_for_replacement_to_finish: bool,
		wait_for_running_before_cancelling: bool,
	) {
		for category in C::ALL {
			self.flush(
				*category,
				force_replace_executor,
				wait_for_replacement_to_finish,
				wait_for_running_before_cancelling,
			);
		}
	}

	/// Installs a fresh executor for `category`.
	///
	/// With `flush_old` the old executor stops right away and cancels every job it was given: queued
	/// ones never compute and end cancelled, running ones get their interrupter raised. Without it,
	/// the old executor keeps serving the jobs it already has and is released once they are done. `wait_on_old` blocks up to the termination
	/// timeout for the old executor to drain.
	///
	/// Tracked handles are left alone, use [`flush`](Self::flush) to cancel them.
	///
	/// # Panics
	///
	/// Panics if `category` maps to a slot outside of [`Category::ALL`].
	#[instrument(skip(self))]
	pub fn replace_executor(&self, category: C, flush_old: bool, wait_on_old: bool) {
		let slot = self.slot(category);
		let _flushing = slot.flush_lock.lock();

		self.swap_executor(slot, flush_old, wait_on_old);
	}

	/// Number of handles tracked for `category` since its last flush.
	///
	/// # Panics
	///
	/// Panics if `category` maps to a slot outside of [`Category::ALL`].
	#[must_use]
	pub fn tracked(&self, category: C) -> usize {
		self.slot(category).queue.lock().len()
	}

	/// How many times the executor of `category` was replaced.
	///
	/// # Panics
	///
	/// Panics if `category` maps to a slot outside of [`Category::ALL`].
	#[must_use]
	pub fn generation(&self, category: C) -> u64 {
		self.slot(category).executor.load().generation()
	}

	/// Cancels everything and stops every executor. Later submissions come back cancelled.
	///
	/// With `wait` set, blocks up to the termination timeout per category for running work to
	/// return.
	#[instrument(skip(self))]
	pub fn shutdown(&self, wait: bool) {
		for slot in self.slots.iter() {
			let _flushing = slot.flush_lock.lock();

			let signaled = slot.queue.lock().take().cancel_all();

			let executor = slot.executor.load_full();
			executor.shutdown();

			if wait && !executor.wait_idle(self.config.termination_timeout) {
				warn!(
					category = %slot.label,
					in_flight = executor.in_flight_count(),
					"Gave up waiting for running tasks on shutdown"
				);
			}

			debug!(category = %slot.label, signaled, "Category shutdown");
		}
	}

	fn slot(&self, category: C) -> &Slot {
		&self.slots[category.slot()]
	}

	/// Callers must hold the slot's flush lock.
	fn swap_executor(&self, slot: &Slot, flush_old: bool, wait_on_old: bool) {
		let generation = slot.generations.fetch_add(1, Ordering::Relaxed) + 1;

		let fresh = match Executor::build(slot.label.clone(), generation, &self.config) {
			Ok(executor) => executor,
			Err(e) => {
				error!(%e, "Failed to build a replacement executor, keeping the current one;");
				return;
			}
		};

		let old = slot.executor.swap(Arc::new(fresh));

		debug!(
			category = %slot.label,
			old_generation = old.generation(),
			generation,
			in_flight = old.in_flight_count(),
			"Replaced executor"
		);

		if flush_old {
			old.shutdown();
		}

		if wait_on_old && !old.wait_idle(self.config.termination_timeout) {
			warn!(
				category = %slot.label,
				timeout = ?self.config.termination_timeout,
				in_flight = old.in_flight_count(),
				"Gave up waiting for the old executor to finish"
			);
		}

		if !flush_old {
			old.retire(self.retire_grace());
		}
	}

	fn retire_grace(&self) -> Duration {
		self.config
			.termination_timeout
			.max(self.config.thread_keep_alive)
	}
}
