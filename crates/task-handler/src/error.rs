use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
	#[error("failed to build executor for category <{category}>: {source}")]
	ExecutorBuild {
		category: String,
		#[source]
		source: io::Error,
	},
	#[error("category <{category}> claims slot {slot}, but it is listed at position {expected}")]
	CategorySlot {
		category: String,
		slot: usize,
		expected: usize,
	},
	#[error("category enumeration is empty")]
	NoCategories,
	#[error("failed to spawn controlling context thread <name='{name}'>: {source}")]
	EventLoopSpawn {
		name: String,
		#[source]
		source: io::Error,
	},
}

/// Returned by compute phases that stopped early after noticing a cancellation request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("task was interrupted")]
pub struct Interrupted;

/// The error type any compute phase can fail with.
pub trait RunError: std::error::Error + Send + 'static {}

impl<T: std::error::Error + Send + 'static> RunError for T {}
