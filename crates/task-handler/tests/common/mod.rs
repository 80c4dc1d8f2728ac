#![allow(dead_code)]

use task_handler::{ControllingContext, EventLoop, Interrupted, Interrupter, Task};

use std::{
	sync::{
		atomic::{AtomicUsize, Ordering},
		mpsc, Arc,
	},
	thread::{self, ThreadId},
	time::Duration,
};

use async_channel as chan;
use parking_lot::Mutex;

pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Keeps the controlling context busy until opened, so nothing posted after it can run.
#[derive(Debug)]
pub struct Gate {
	open_tx: chan::Sender<()>,
}

impl Gate {
	pub fn close(context: &impl ControllingContext) -> Self {
		let (open_tx, open_rx) = chan::bounded::<()>(1);
		let (closed_tx, closed_rx) = mpsc::channel();

		context.post(Box::new(move || {
			closed_tx.send(()).unwrap();
			// Returns an error once the sender is dropped, that's our signal
			open_rx.recv_blocking().ok();
		}));

		closed_rx.recv_timeout(TIMEOUT).unwrap();

		Self { open_tx }
	}

	pub fn open(self) {
		drop(self.open_tx);
	}
}

/// Blocks until everything posted to `context` so far has run.
pub fn drain(context: &impl ControllingContext) {
	let (tx, rx) = mpsc::channel();
	context.post(Box::new(move || tx.send(()).unwrap()));
	rx.recv_timeout(TIMEOUT).unwrap();
}

pub fn event_loop() -> Arc<EventLoop> {
	Arc::new(EventLoop::spawn("controlling-context").unwrap())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
	Pre,
	Compute,
	Post,
}

/// Shared log of which phase of which task ran, and on which thread.
#[derive(Debug, Clone, Default)]
pub struct Recorder {
	marks: Arc<Mutex<Vec<(&'static str, Phase, ThreadId)>>>,
	computes: Arc<AtomicUsize>,
}

impl Recorder {
	pub fn mark(&self, task: &'static str, phase: Phase) {
		if phase == Phase::Compute {
			self.computes.fetch_add(1, Ordering::SeqCst);
		}

		self.marks
			.lock()
			.push((task, phase, thread::current().id()));
	}

	pub fn computes(&self) -> usize {
		self.computes.load(Ordering::SeqCst)
	}

	pub fn phases_of(&self, task: &'static str) -> Vec<Phase> {
		self.marks
			.lock()
			.iter()
			.filter(|(name, ..)| *name == task)
			.map(|(_, phase, _)| *phase)
			.collect()
	}

	pub fn threads_of(&self, task: &'static str, phase: Phase) -> Vec<ThreadId> {
		self.marks
			.lock()
			.iter()
			.filter(|(name, p, _)| *name == task && *p == phase)
			.map(|(.., thread_id)| *thread_id)
			.collect()
	}

	pub fn order_of(&self, phase: Phase) -> Vec<&'static str> {
		self.marks
			.lock()
			.iter()
			.filter(|(_, p, _)| *p == phase)
			.map(|(name, ..)| *name)
			.collect()
	}
}

/// A task recording its three phases, computing after `delay`, and reporting its name when its
/// post-run is done.
pub fn recorded_task(
	name: &'static str,
	recorder: &Recorder,
	delay: Duration,
	done_tx: mpsc::Sender<&'static str>,
) -> Task<&'static str, Interrupted> {
	Task::new({
		let recorder = recorder.clone();
		move |_: &Interrupter| {
			recorder.mark(name, Phase::Compute);
			thread::sleep(delay);
			Ok(name)
		}
	})
	.with_pre_run({
		let recorder = recorder.clone();
		move || recorder.mark(name, Phase::Pre)
	})
	.with_post_run({
		let recorder = recorder.clone();
		move |out| {
			recorder.mark(name, Phase::Post);
			done_tx.send(out).unwrap();
		}
	})
}

/// A compute phase looping until interrupted, reporting when it started and when it noticed.
pub fn interruptible_task(
	started_tx: mpsc::Sender<()>,
	stopped_tx: mpsc::Sender<()>,
) -> Task<(), Interrupted> {
	Task::new(move |interrupter: &Interrupter| {
		started_tx.send(()).unwrap();

		loop {
			if interrupter.is_interrupted() {
				stopped_tx.send(()).unwrap();
				return Err(Interrupted);
			}
			thread::sleep(Duration::from_millis(5));
		}
	})
}
