use std::{
	panic::{catch_unwind, AssertUnwindSafe},
	sync::Arc,
};

use tokio::sync::oneshot;
use tracing::{debug, error, trace, warn, Span};

use super::{
	context::{panic_message, ControllingContext},
	error::RunError,
	executor::InFlightGuard,
	task::{PreRun, Task, TaskParts, Worktable},
};

/// What happened to a pre-run posted to the controlling context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PreRunOutcome {
	Ran,
	/// The task got cancelled while the action was queued.
	Skipped,
	Panicked,
}

/// Marks the worktable as released however the job ends, even when it's dropped without running.
#[derive(Debug)]
struct ReleaseOnDrop(Arc<Worktable>);

impl Drop for ReleaseOnDrop {
	fn drop(&mut self) {
		self.0.set_released();
	}
}

/// A submitted task on its way through a category executor.
pub(crate) struct Job<T, E> {
	task: Task<T, E>,
	worktable: Arc<Worktable>,
	context: Arc<dyn ControllingContext>,
	span: Span,
	release: ReleaseOnDrop,
	in_flight: InFlightGuard,
}

impl<T: Send + 'static, E: RunError> Job<T, E> {
	pub fn new(
		task: Task<T, E>,
		worktable: Arc<Worktable>,
		context: Arc<dyn ControllingContext>,
		span: Span,
		in_flight: InFlightGuard,
	) -> Self {
		Self {
			task,
			release: ReleaseOnDrop(Arc::clone(&worktable)),
			worktable,
			context,
			span,
			in_flight,
		}
	}

	/// Runs on a worker thread: pre-run on the controlling context and wait for it, compute here,
	/// then hand the output to post-run on the controlling context.
	pub fn run(self) {
		let Self {
			task,
			worktable,
			context,
			span,
			release: _release,
			in_flight: _in_flight,
		} = self;

		let _entered = span.enter();

		if !worktable.set_started() {
			trace!("Task was canceled before a worker picked it up");
			return;
		}

		let TaskParts {
			pre_run,
			compute,
			post_run,
		} = task.into_parts();

		if let Some(pre_run) = pre_run {
			match run_pre(context.as_ref(), &worktable, pre_run, &span) {
				Some(PreRunOutcome::Ran) => {}
				Some(PreRunOutcome::Skipped) => {
					trace!("Task was canceled before its pre-run");
					return;
				}
				Some(PreRunOutcome::Panicked) => {
					// Already logged on the controlling context
					worktable.set_completed();
					return;
				}
				None => {
					warn!("Controlling context dropped the pre-run, giving up on the task");
					worktable.set_completed();
					return;
				}
			}
		}

		if worktable.is_canceled() {
			trace!("Task was canceled before its compute phase");
			return;
		}

		let interrupter = worktable.interrupter();

		let output = match catch_unwind(AssertUnwindSafe(|| compute(&interrupter))) {
			Ok(Ok(output)) => output,
			Ok(Err(e)) => {
				if worktable.is_canceled() {
					debug!(%e, "Canceled task returned an error");
				} else {
					error!(%e, "Task failed;");
					worktable.set_completed();
				}
				return;
			}
			Err(payload) => {
				error!(
					panic = panic_message(payload.as_ref()),
					"Task panicked during its compute phase;"
				);
				worktable.set_completed();
				return;
			}
		};

		if !worktable.set_completed() {
			trace!("Task was canceled during its compute phase, skipping post-run");
			return;
		}

		if let Some(post_run) = post_run {
			let span = span.clone();

			context.post(Box::new(move || {
				let _entered = span.enter();

				if let Err(payload) = catch_unwind(AssertUnwindSafe(|| post_run(output))) {
					error!(
						panic = panic_message(payload.as_ref()),
						"Task panicked during its post-run;"
					);
				}
			}));
		}

		trace!("Task done on worker");
	}
}

/// Posts `pre_run` and blocks the worker until the controlling context got to it.
///
/// `None` means the action was dropped without running, usually because the context was shut
/// down.
fn run_pre(
	context: &dyn ControllingContext,
	worktable: &Arc<Worktable>,
	pre_run: PreRun,
	span: &Span,
) -> Option<PreRunOutcome> {
	let (outcome_tx, outcome_rx) = oneshot::channel();

	context.post(Box::new({
		let worktable = Arc::clone(worktable);
		let span = span.clone();

		move || {
			let _entered = span.enter();

			let outcome = if worktable.is_canceled() {
				PreRunOutcome::Skipped
			} else if let Err(payload) = catch_unwind(AssertUnwindSafe(pre_run)) {
				error!(
					panic = panic_message(payload.as_ref()),
					"Task panicked during its pre-run;"
				);
				PreRunOutcome::Panicked
			} else {
				PreRunOutcome::Ran
			};

			if outcome_tx.send(outcome).is_err() {
				warn!("Worker stopped waiting for the pre-run outcome");
			}
		}
	}));

	outcome_rx.blocking_recv().ok()
}
