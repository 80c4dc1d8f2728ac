//!
//! # Task Handler
//!
//! A small per-category background scheduler. Every category of work gets its own cached worker
//! pool and its own list of outstanding handles, so a whole category can be cancelled and reset
//! without touching the others. Each task runs in three phases:
//! - a pre-run hook, posted to the controlling context;
//! - a blocking compute phase, run on a worker thread of the category's pool;
//! - a post-run hook receiving the compute output, posted back to the controlling context.
//!
//! Cancellation is cooperative. A task that didn't start its compute phase yet will never start it,
//! a running one only gets its [`Interrupter`] raised. Worker threads are never killed.
//!
//! Failures never reach the caller: errors and panics from any phase are logged and the task is
//! considered finished.
//!
//! ## Basic example
//!
//! ```
//! use std::{sync::mpsc, time::Duration};
//!
//! use task_handler::{EventLoop, Interrupted, Task, TaskHandler, TaskKind};
//!
//! let context = EventLoop::spawn("main").unwrap();
//! let handler = TaskHandler::<TaskKind>::new(context).unwrap();
//!
//! let (tx, rx) = mpsc::channel();
//!
//! handler.submit(
//! 	TaskKind::Barcode,
//! 	Task::new(|_interrupter| Ok::<_, Interrupted>("1234".len()))
//! 		.with_post_run(move |len| tx.send(len).unwrap()),
//! );
//!
//! assert_eq!(rx.recv_timeout(Duration::from_secs(5)).unwrap(), 4);
//!
//! handler.flush(TaskKind::Barcode, true, true, false);
//! assert_eq!(handler.tracked(TaskKind::Barcode), 0);
//! ```

#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod category;
mod config;
mod context;
mod error;
mod executor;
mod handler;
mod queue;
mod task;
mod worker;

pub use category::{Category, TaskKind};
pub use config::Config;
pub use context::{Action, ControllingContext, EventLoop, Inline};
pub use error::{Error, Interrupted, RunError};
pub use handler::TaskHandler;
pub use task::{
	Callable, Compute, HandleState, Interrupter, PostRun, PreRun, Task, TaskId, TaskParts,
	WorkHandle,
};
