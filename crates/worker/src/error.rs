//! Dispatcher error taxonomy.

use thiserror::Error;

/// Why a background execution did not produce a response.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DispatchError {
	/// `initialize()` has not succeeded; the worker context is not available.
	#[error("background dispatcher is not initialized")]
	NotInitialized,
	/// The worker context failed to start.
	#[error("background worker failed to start: {0}")]
	InitFailed(String),
	/// The bounded request channel is full.
	#[error("background dispatcher is saturated ({capacity} requests queued)")]
	Saturated {
		/// Configured channel capacity.
		capacity: usize,
	},
	/// The execution was cancelled by its token or by `abort(id)`.
	#[error("background execution aborted")]
	Aborted,
	/// The dispatcher was torn down while the execution was outstanding.
	#[error("background dispatcher terminated")]
	Terminated,
	/// The worker dropped the reply without answering (worker panic).
	#[error("background worker disconnected before replying")]
	Disconnected,
	/// The worker thread died after a successful start.
	#[error("background worker crashed: {0}")]
	Crashed(String),
	/// The worker thread could not be spawned.
	#[error("failed to spawn background worker thread: {0}")]
	Spawn(String),
}

impl DispatchError {
	/// True when the worker context is not available at all, so callers may
	/// run the request somewhere else instead.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::NotInitialized | Self::InitFailed(_) | Self::Crashed(_) | Self::Spawn(_))
	}

	/// True when the execution was cancelled rather than failed.
	pub fn is_cancellation(&self) -> bool {
		matches!(self, Self::Aborted)
	}
}
