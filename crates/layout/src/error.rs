//! Layout error taxonomy.

use quire_worker::DispatchError;
use thiserror::Error;

/// Failure of a layout executor or of the plumbing around it.
///
/// None of these ever reach the edit path; the coordinator logs them and
/// leaves the version tracker stale.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LayoutError {
	/// The executor observed its cancellation ticket. Not a failure.
	#[error("layout cancelled")]
	Cancelled,
	/// The executor failed for a reason of its own.
	#[error("layout executor failed: {0}")]
	Executor(String),
	/// The executor panicked.
	#[error("layout executor panicked: {0}")]
	Panicked(String),
	/// The background dispatcher could not run the request.
	#[error(transparent)]
	Dispatch(#[from] DispatchError),
	/// No async runtime was available for deferred tiers.
	#[error("layout runtime unavailable: {0}")]
	Runtime(String),
}

impl LayoutError {
	pub fn executor(msg: impl Into<String>) -> Self {
		Self::Executor(msg.into())
	}

	/// True for cancellation in any of its forms.
	pub fn is_cancellation(&self) -> bool {
		match self {
			Self::Cancelled => true,
			Self::Dispatch(err) => err.is_cancellation(),
			Self::Executor(_) | Self::Panicked(_) | Self::Runtime(_) => false,
		}
	}

	/// True when the background context is unavailable and the request may
	/// run in-process instead.
	pub fn is_unavailable(&self) -> bool {
		matches!(self, Self::Dispatch(err) if err.is_unavailable())
	}
}

impl From<std::io::Error> for LayoutError {
	fn from(err: std::io::Error) -> Self {
		Self::Runtime(err.to_string())
	}
}
