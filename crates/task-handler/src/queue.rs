use std::mem;

use super::task::WorkHandle;

/// Handles of submitted tasks, oldest first.
///
/// The handler keeps one per category until the next flush, each executor keeps one to cancel on
/// shutdown. Pure bookkeeping, owning no threads. Finished handles are pruned whenever the backing vector is
/// about to grow, so a category that is never flushed doesn't accumulate them forever.
#[derive(Debug, Default)]
pub(crate) struct CategoryQueue {
	handles: Vec<WorkHandle>,
}

impl CategoryQueue {
	pub fn push(&mut self, handle: WorkHandle) {
		if self.handles.len() == self.handles.capacity() {
			self.handles.retain(|handle| !handle.is_finished());
		}

		self.handles.push(handle);
	}

	pub fn len(&self) -> usize {
		self.handles.len()
	}

	/// Swaps in an empty queue, handing back the old one.
	pub fn take(&mut self) -> Self {
		mem::take(self)
	}

	/// Cancels every unfinished handle, returning how many got the signal.
	pub fn cancel_all(&self) -> usize {
		self.handles
			.iter()
			.filter(|handle| !handle.is_finished())
			.map(WorkHandle::cancel)
			.filter(|signaled| *signaled)
			.count()
	}
}
