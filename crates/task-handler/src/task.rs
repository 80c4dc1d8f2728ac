use std::{
	fmt,
	sync::{
		atomic::{AtomicBool, Ordering},
		Arc,
	},
	time::Duration,
};

use parking_lot::{Condvar, Mutex};
use tracing::trace;
use uuid::Uuid;

use super::error::RunError;

/// A unique identifier for a task using the [`uuid`](https://docs.rs/uuid) crate.
pub type TaskId = Uuid;

/// Hook run on the controlling context before the compute phase.
pub type PreRun = Box<dyn FnOnce() + Send + 'static>;

/// The blocking phase, run on a worker thread of the task's category.
pub type Compute<T, E> = Box<dyn FnOnce(&Interrupter) -> Result<T, E> + Send + 'static>;

/// Hook run on the controlling context with the compute output.
pub type PostRun<T> = Box<dyn FnOnce(T) + Send + 'static>;

/// One unit of schedulable work: an optional pre-run hook, a compute phase and an optional
/// post-run hook, always executed in that order.
///
/// A task is moved into [`TaskHandler::submit`](crate::TaskHandler::submit), so the same instance
/// can never be scheduled twice.
pub struct Task<T, E> {
	pre_run: Option<PreRun>,
	compute: Compute<T, E>,
	post_run: Option<PostRun<T>>,
}

/// The phases of a [`Task`], taken apart so each one can be driven on its own.
pub struct TaskParts<T, E> {
	pub pre_run: Option<PreRun>,
	pub compute: Compute<T, E>,
	pub post_run: Option<PostRun<T>>,
}

impl<T: Send + 'static, E: RunError> Task<T, E> {
	pub fn new(compute: impl FnOnce(&Interrupter) -> Result<T, E> + Send + 'static) -> Self {
		Self {
			pre_run: None,
			compute: Box::new(compute),
			post_run: None,
		}
	}

	#[must_use]
	pub fn with_pre_run(mut self, pre_run: impl FnOnce() + Send + 'static) -> Self {
		self.pre_run = Some(Box::new(pre_run));
		self
	}

	#[must_use]
	pub fn with_post_run(mut self, post_run: impl FnOnce(T) + Send + 'static) -> Self {
		self.post_run = Some(Box::new(post_run));
		self
	}

	#[must_use]
	pub fn into_parts(self) -> TaskParts<T, E> {
		let Self {
			pre_run,
			compute,
			post_run,
		} = self;

		TaskParts {
			pre_run,
			compute,
			post_run,
		}
	}
}

impl<T, E> fmt::Debug for Task<T, E> {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("Task")
			.field("has_pre_run", &self.pre_run.is_some())
			.field("has_post_run", &self.post_run.is_some())
			.finish_non_exhaustive()
	}
}

/// Hook style alternative to building a [`Task`] out of closures.
///
/// The three methods run on different threads but never concurrently, so implementors only need
/// to be `Send`.
pub trait Callable: Send + 'static {
	type Output: Send + 'static;
	type Error: RunError;

	fn pre_run(&mut self) {}

	fn call(&mut self, interrupter: &Interrupter) -> Result<Self::Output, Self::Error>;

	fn post_run(&mut self, _output: Self::Output) {}

	fn into_task(self) -> Task<Self::Output, Self::Error>
	where
		Self: Sized,
	{
		let this = Arc::new(Mutex::new(self));

		Task::new({
			let this = Arc::clone(&this);
			move |interrupter| this.lock().call(interrupter)
		})
		.with_pre_run({
			let this = Arc::clone(&this);
			move || this.lock().pre_run()
		})
		.with_post_run(move |output| this.lock().post_run(output))
	}
}

/// Lets a compute phase find out whether its handle was cancelled, so it can stop at a safe point.
///
/// Nothing forces the compute phase to look at it, cancellation of running work is advisory.
#[derive(Debug, Clone)]
pub struct Interrupter {
	interrupted: Arc<AtomicBool>,
}

impl Interrupter {
	pub(crate) const fn new(interrupted: Arc<AtomicBool>) -> Self {
		Self { interrupted }
	}

	/// An interrupter that is never raised, for driving a compute phase outside the handler.
	#[must_use]
	pub fn detached() -> Self {
		Self::new(Arc::new(AtomicBool::new(false)))
	}

	#[must_use]
	pub fn is_interrupted(&self) -> bool {
		self.interrupted.load(Ordering::Acquire)
	}
}

/// Returns early with [`Interrupted`](crate::Interrupted), converted into the compute error type,
/// when the task was cancelled.
#[macro_export]
macro_rules! check_interruption {
	($interrupter:ident) => {
		let interrupter: &$crate::Interrupter = $interrupter;

		if interrupter.is_interrupted() {
			::tracing::trace!("Task was canceled by the user");
			return Err(::core::convert::From::from($crate::Interrupted));
		}
	};
}

/// Where a submitted task is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleState {
	/// Waiting for a worker.
	Pending,
	/// A worker picked it up, its pre-run or compute phase is underway.
	Running,
	/// The compute phase returned, successfully or not.
	Completed,
	/// Cancelled before it could complete.
	Canceled,
}

impl HandleState {
	#[must_use]
	pub const fn is_finished(self) -> bool {
		matches!(self, Self::Completed | Self::Canceled)
	}
}

#[derive(Debug)]
struct WorktableState {
	state: HandleState,
	released: bool,
}

/// Shared bookkeeping between a [`WorkHandle`] and the worker running its task.
#[derive(Debug)]
pub(crate) struct Worktable {
	id: TaskId,
	interrupted: Arc<AtomicBool>,
	inner: Mutex<WorktableState>,
	changed: Condvar,
}

impl Worktable {
	pub fn new(id: TaskId) -> Self {
		Self {
			id,
			interrupted: Arc::new(AtomicBool::new(false)),
			inner: Mutex::new(WorktableState {
				state: HandleState::Pending,
				released: false,
			}),
			changed: Condvar::new(),
		}
	}

	pub const fn id(&self) -> TaskId {
		self.id
	}

	pub fn interrupter(&self) -> Interrupter {
		Interrupter::new(Arc::clone(&self.interrupted))
	}

	pub fn state(&self) -> HandleState {
		self.inner.lock().state
	}

	pub fn is_canceled(&self) -> bool {
		self.state() == HandleState::Canceled
	}

	/// `Pending -> Running`, fails if the task was cancelled first.
	pub fn set_started(&self) -> bool {
		self.transition(HandleState::Pending, HandleState::Running)
	}

	/// `Running -> Completed`, fails if the task was cancelled meanwhile.
	pub fn set_completed(&self) -> bool {
		self.transition(HandleState::Running, HandleState::Completed)
	}

	/// Returns `true` if the task was still unfinished and got the cancellation signal.
	pub fn cancel(&self) -> bool {
		let mut inner = self.inner.lock();

		match inner.state {
			HandleState::Pending | HandleState::Running => {
				trace!(task_id = %self.id, was = ?inner.state, "Canceling task");
				inner.state = HandleState::Canceled;
				self.interrupted.store(true, Ordering::Release);
				self.changed.notify_all();
				true
			}
			HandleState::Completed | HandleState::Canceled => false,
		}
	}

	/// The worker side let go of the task. A task released without ever starting ends cancelled.
	pub fn set_released(&self) {
		let mut inner = self.inner.lock();

		if inner.state == HandleState::Pending {
			trace!(task_id = %self.id, "Task dropped before starting");
			inner.state = HandleState::Canceled;
		}
		inner.released = true;

		self.changed.notify_all();
	}

	pub fn wait_released(&self, timeout: Duration) -> bool {
		let mut inner = self.inner.lock();

		if self
			.changed
			.wait_while_for(&mut inner, |inner| !inner.released, timeout)
			.timed_out()
		{
			trace!(task_id = %self.id, ?timeout, "Gave up waiting for task release");
		}

		inner.released
	}

	fn transition(&self, from: HandleState, to: HandleState) -> bool {
		let mut inner = self.inner.lock();

		if inner.state == from {
			inner.state = to;
			self.changed.notify_all();
			true
		} else {
			false
		}
	}
}

/// A cancellable reference to one submitted task, returned by
/// [`TaskHandler::submit`](crate::TaskHandler::submit).
///
/// Clones refer to the same task. The handler keeps one clone in the category queue until the
/// next flush.
#[derive(Debug, Clone)]
pub struct WorkHandle {
	worktable: Arc<Worktable>,
}

impl WorkHandle {
	pub(crate) const fn new(worktable: Arc<Worktable>) -> Self {
		Self { worktable }
	}

	#[must_use]
	pub fn task_id(&self) -> TaskId {
		self.worktable.id()
	}

	#[must_use]
	pub fn state(&self) -> HandleState {
		self.worktable.state()
	}

	#[must_use]
	pub fn is_finished(&self) -> bool {
		self.state().is_finished()
	}

	#[must_use]
	pub fn is_canceled(&self) -> bool {
		self.worktable.is_canceled()
	}

	/// Best-effort cancellation.
	///
	/// A pending task will never run its compute phase. A running one gets its [`Interrupter`]
	/// raised and its post-run skipped if the worker notices in time. Returns whether the signal
	/// reached an unfinished task.
	pub fn cancel(&self) -> bool {
		self.worktable.cancel()
	}

	/// Blocks until the worker side is done with this task, up to `timeout`.
	///
	/// A cancelled task may still be running its compute phase, this is the way to know it
	/// actually returned. Post-run is not covered, it happens later on the controlling context.
	#[must_use]
	pub fn wait(&self, timeout: Duration) -> bool {
		self.worktable.wait_released(timeout)
	}
}

#[cfg(test)]
mod tests {
	use std::{convert::Infallible, sync::mpsc};

	use crate::Interrupted;

	use super::*;

	#[test]
	fn parts_can_be_driven_independently() {
		let (tx, rx) = mpsc::channel();

		let task = Task::new(|_: &Interrupter| Ok::<_, Infallible>(21 * 2))
			.with_pre_run({
				let tx = tx.clone();
				move || tx.send("pre".to_string()).unwrap()
			})
			.with_post_run(move |out| tx.send(format!("post {out}")).unwrap());

		let TaskParts {
			pre_run,
			compute,
			post_run,
		} = task.into_parts();

		pre_run.unwrap()();
		let out = compute(&Interrupter::detached()).unwrap();
		post_run.unwrap()(out);

		assert_eq!(rx.try_iter().collect::<Vec<_>>(), ["pre", "post 42"]);
	}

	#[test]
	fn hooks_are_optional() {
		let parts = Task::new(|_: &Interrupter| Ok::<_, Infallible>(())).into_parts();

		assert!(parts.pre_run.is_none());
		assert!(parts.post_run.is_none());
	}

	struct Counter {
		calls: Vec<&'static str>,
		report: mpsc::Sender<Vec<&'static str>>,
	}

	impl Callable for Counter {
		type Output = usize;
		type Error = Interrupted;

		fn pre_run(&mut self) {
			self.calls.push("pre");
		}

		fn call(&mut self, interrupter: &Interrupter) -> Result<usize, Interrupted> {
			check_interruption!(interrupter);
			self.calls.push("call");
			Ok(self.calls.len())
		}

		fn post_run(&mut self, output: usize) {
			assert_eq!(output, 2);
			self.calls.push("post");
			self.report.send(self.calls.clone()).unwrap();
		}
	}

	#[test]
	fn callable_into_task_shares_state_between_phases() {
		let (tx, rx) = mpsc::channel();

		let parts = Counter {
			calls: vec![],
			report: tx,
		}
		.into_task()
		.into_parts();

		parts.pre_run.unwrap()();
		let out = (parts.compute)(&Interrupter::detached()).unwrap();
		parts.post_run.unwrap()(out);

		assert_eq!(rx.try_recv().unwrap(), ["pre", "call", "post"]);
	}

	#[test]
	fn check_interruption_returns_early() {
		fn compute(interrupter: &Interrupter) -> Result<(), Interrupted> {
			check_interruption!(interrupter);
			Ok(())
		}

		let worktable = Worktable::new(TaskId::new_v4());
		let interrupter = worktable.interrupter();

		assert_eq!(compute(&interrupter), Ok(()));
		worktable.cancel();
		assert_eq!(compute(&interrupter), Err(Interrupted));
	}

	#[test]
	fn cancel_pending_prevents_start() {
		let worktable = Worktable::new(TaskId::new_v4());

		assert!(worktable.cancel());
		assert!(!worktable.set_started());
		assert_eq!(worktable.state(), HandleState::Canceled);
		assert!(!worktable.cancel());
	}

	#[test]
	fn cancel_running_raises_interrupter_and_blocks_completion() {
		let worktable = Worktable::new(TaskId::new_v4());
		let interrupter = worktable.interrupter();

		assert!(worktable.set_started());
		assert!(!interrupter.is_interrupted());

		assert!(worktable.cancel());
		assert!(interrupter.is_interrupted());
		assert!(!worktable.set_completed());
		assert_eq!(worktable.state(), HandleState::Canceled);
	}

	#[test]
	fn completed_tasks_ignore_cancel() {
		let worktable = Worktable::new(TaskId::new_v4());

		assert!(worktable.set_started());
		assert!(worktable.set_completed());
		assert!(!worktable.cancel());
		assert_eq!(worktable.state(), HandleState::Completed);
	}

	#[test]
	fn released_before_start_ends_canceled() {
		let worktable = Arc::new(Worktable::new(TaskId::new_v4()));
		let handle = WorkHandle::new(Arc::clone(&worktable));

		assert!(!handle.wait(Duration::from_millis(10)));

		worktable.set_released();

		assert!(handle.wait(Duration::from_millis(10)));
		assert!(handle.is_canceled());
		assert!(handle.is_finished());
	}
}
