use std::{
	any::Any,
	panic::{catch_unwind, AssertUnwindSafe},
	sync::Arc,
	thread::{self, JoinHandle, ThreadId},
};

use async_channel as chan;
use parking_lot::Mutex;
use tracing::{error, trace, warn};

use super::error::Error;

/// A unit of work marshalled to the controlling context.
pub type Action = Box<dyn FnOnce() + Send + 'static>;

/// The single serialized execution context where pre-run and post-run phases happen.
///
/// Implementations must eventually run every posted action, one at a time, in posting order, on
/// the same thread.
pub trait ControllingContext: Send + Sync {
	fn post(&self, action: Action);
}

impl<T: ControllingContext + ?Sized> ControllingContext for Arc<T> {
	fn post(&self, action: Action) {
		(**self).post(action);
	}
}

/// Runs every action right away on the posting thread.
///
/// Handy for tests, where there is no real event loop to marshal to.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl ControllingContext for Inline {
	fn post(&self, action: Action) {
		action();
	}
}

/// A dedicated thread draining a queue of actions, the closest thing to a UI main loop we have.
///
/// Panicking actions are logged and the loop keeps going. Dropping the loop closes its queue, runs
/// whatever was already posted and joins the thread.
#[derive(Debug)]
pub struct EventLoop {
	name: String,
	actions_tx: chan::Sender<Action>,
	thread_id: ThreadId,
	handle: Mutex<Option<JoinHandle<()>>>,
}

impl EventLoop {
	pub fn spawn(name: impl Into<String>) -> Result<Self, Error> {
		let name = name.into();

		let (actions_tx, actions_rx) = chan::unbounded::<Action>();

		let handle = thread::Builder::new()
			.name(name.clone())
			.spawn(move || {
				trace!("Controlling context starting...");

				while let Ok(action) = actions_rx.recv_blocking() {
					if let Err(payload) = catch_unwind(AssertUnwindSafe(action)) {
						error!(
							panic = panic_message(payload.as_ref()),
							"Action panicked on the controlling context;"
						);
					}
				}

				trace!("Controlling context queue closed, exiting");
			})
			.map_err(|source| Error::EventLoopSpawn {
				name: name.clone(),
				source,
			})?;

		Ok(Self {
			name,
			actions_tx,
			thread_id: handle.thread().id(),
			handle: Mutex::new(Some(handle)),
		})
	}

	/// Whether the caller is running on this loop's thread.
	#[must_use]
	pub fn is_current(&self) -> bool {
		thread::current().id() == self.thread_id
	}

	/// Stops accepting actions, lets the already posted ones run and waits for the thread to exit.
	///
	/// Calling it from inside an action only closes the queue, as the loop can't join itself.
	pub fn shutdown(&self) {
		self.actions_tx.close();

		if self.is_current() {
			trace!(name = %self.name, "Controlling context shutdown requested from itself, not joining");
			return;
		}

		if let Some(handle) = self.handle.lock().take() {
			if let Err(payload) = handle.join() {
				error!(
					name = %self.name,
					panic = panic_message(payload.as_ref()),
					"Controlling context thread critically failed;"
				);
			}
		}
	}
}

impl ControllingContext for EventLoop {
	fn post(&self, action: Action) {
		if self.actions_tx.try_send(action).is_err() {
			warn!(name = %self.name, "Controlling context is closed, dropping action");
		}
	}
}

impl Drop for EventLoop {
	fn drop(&mut self) {
		self.shutdown();
	}
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
	payload
		.downcast_ref::<&'static str>()
		.copied()
		.or_else(|| payload.downcast_ref::<String>().map(String::as_str))
		.unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
	use std::{sync::mpsc, time::Duration};

	use super::*;

	const TIMEOUT: Duration = Duration::from_secs(5);

	#[test]
	fn inline_runs_on_the_posting_thread() {
		let (tx, rx) = mpsc::channel();

		Inline.post(Box::new(move || tx.send(thread::current().id()).unwrap()));

		assert_eq!(rx.try_recv().unwrap(), thread::current().id());
	}

	#[test]
	fn event_loop_runs_actions_in_order_on_one_thread() {
		let event_loop = EventLoop::spawn("test-loop").unwrap();
		let (tx, rx) = mpsc::channel();

		for i in 0..32 {
			let tx = tx.clone();
			event_loop.post(Box::new(move || {
				tx.send((i, thread::current().id())).unwrap();
			}));
		}

		let received = (0..32)
			.map(|_| rx.recv_timeout(TIMEOUT).unwrap())
			.collect::<Vec<_>>();

		assert!(received.iter().map(|(i, _)| *i).eq(0..32));
		assert!(received
			.iter()
			.all(|(_, thread_id)| *thread_id == event_loop.thread_id));
		assert_ne!(received[0].1, thread::current().id());
	}

	#[test]
	fn event_loop_survives_panicking_actions() {
		let event_loop = EventLoop::spawn("test-loop").unwrap();
		let (tx, rx) = mpsc::channel();

		event_loop.post(Box::new(|| panic!("boom")));
		event_loop.post(Box::new(move || tx.send(()).unwrap()));

		rx.recv_timeout(TIMEOUT).unwrap();
	}

	#[test]
	fn shutdown_drains_posted_actions_and_rejects_new_ones() {
		let event_loop = EventLoop::spawn("test-loop").unwrap();
		let (tx, rx) = mpsc::channel();

		for i in 0..8 {
			let tx = tx.clone();
			event_loop.post(Box::new(move || tx.send(i).unwrap()));
		}

		event_loop.shutdown();

		assert_eq!(rx.try_iter().count(), 8);

		let (late_tx, late_rx) = mpsc::channel::<()>();
		event_loop.post(Box::new(move || late_tx.send(()).unwrap()));
		assert!(late_rx.recv_timeout(Duration::from_millis(100)).is_err());
	}

	#[test]
	fn panic_message_extraction() {
		let static_str: Box<dyn Any + Send> = Box::new("static");
		let owned: Box<dyn Any + Send> = Box::new(String::from("owned"));
		let other: Box<dyn Any + Send> = Box::new(42_u8);

		assert_eq!(panic_message(static_str.as_ref()), "static");
		assert_eq!(panic_message(owned.as_ref()), "owned");
		assert_eq!(panic_message(other.as_ref()), "<non-string panic payload>");
	}
}
