//! Layout requests, results, and cancellation tickets.

use tokio_util::sync::CancellationToken;

use crate::Tier;

/// How much of the document a request covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LayoutScope {
	/// The paragraph under edit.
	Paragraph,
	/// Pages intersecting the viewport.
	Viewport,
	/// Pages immediately around the viewport.
	Adjacent,
	/// The whole document.
	#[default]
	Full,
}

impl LayoutScope {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Paragraph => "paragraph",
			Self::Viewport => "viewport",
			Self::Adjacent => "adjacent",
			Self::Full => "full",
		}
	}
}

/// Caller-supplied shape of a scheduled layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScheduleOptions {
	pub scope: LayoutScope,
	pub paragraph_index: Option<usize>,
}

impl ScheduleOptions {
	pub fn scope(scope: LayoutScope) -> Self {
		Self {
			scope,
			paragraph_index: None,
		}
	}

	pub fn paragraph(index: usize) -> Self {
		Self {
			scope: LayoutScope::Paragraph,
			paragraph_index: Some(index),
		}
	}
}

/// Cancellation generation attached to one dispatch.
///
/// Generations increase monotonically per coordinator and are never reused.
#[derive(Debug, Clone)]
pub struct CancelTicket {
	generation: u64,
	token: CancellationToken,
}

impl CancelTicket {
	pub(crate) fn new(generation: u64, token: CancellationToken) -> Self {
		Self { generation, token }
	}

	pub const fn generation(&self) -> u64 {
		self.generation
	}

	pub fn is_cancelled(&self) -> bool {
		self.token.is_cancelled()
	}

	pub(crate) fn cancel(&self) {
		self.token.cancel();
	}

	/// Resolves once the ticket is invalidated.
	pub async fn cancelled(&self) {
		self.token.cancelled().await;
	}

	pub fn token(&self) -> &CancellationToken {
		&self.token
	}
}

/// One unit of scheduled layout work.
///
/// Requests are plain values: two requests for the same tier are
/// interchangeable for coalescing, and only the most recent one survives.
#[derive(Debug, Clone)]
pub struct LayoutRequest {
	pub version: u64,
	pub priority: Tier,
	pub scope: LayoutScope,
	pub paragraph_index: Option<usize>,
	/// Attached when the request is dispatched, never at creation.
	pub cancellation: Option<CancelTicket>,
}

impl LayoutRequest {
	pub fn new(version: u64, priority: Tier, options: ScheduleOptions) -> Self {
		Self {
			version,
			priority,
			scope: options.scope,
			paragraph_index: options.paragraph_index,
			cancellation: None,
		}
	}

	/// True once the attached ticket has been invalidated.
	pub fn is_cancelled(&self) -> bool {
		self.cancellation.as_ref().is_some_and(CancelTicket::is_cancelled)
	}

	pub fn generation(&self) -> Option<u64> {
		self.cancellation.as_ref().map(CancelTicket::generation)
	}

	/// Copy of the request without its ticket, for crossing into a worker context.
	pub fn detached(&self) -> Self {
		Self {
			cancellation: None,
			..self.clone()
		}
	}
}

/// How an executor's run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LayoutOutcome<L> {
	/// Layout computed successfully.
	Completed(L),
	/// The executor noticed cancellation and stopped.
	Aborted,
	/// Neither completed nor aborted; handled as a failed completion.
	Incomplete,
}

/// Executor output for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayoutResult<L> {
	pub version: u64,
	pub outcome: LayoutOutcome<L>,
}

impl<L> LayoutResult<L> {
	pub fn completed(version: u64, layout: L) -> Self {
		Self {
			version,
			outcome: LayoutOutcome::Completed(layout),
		}
	}

	pub fn aborted(version: u64) -> Self {
		Self {
			version,
			outcome: LayoutOutcome::Aborted,
		}
	}

	pub fn incomplete(version: u64) -> Self {
		Self {
			version,
			outcome: LayoutOutcome::Incomplete,
		}
	}

	pub fn is_completed(&self) -> bool {
		matches!(self.outcome, LayoutOutcome::Completed(_))
	}

	pub fn is_aborted(&self) -> bool {
		matches!(self.outcome, LayoutOutcome::Aborted)
	}

	pub fn into_layout(self) -> Option<L> {
		match self.outcome {
			LayoutOutcome::Completed(layout) => Some(layout),
			LayoutOutcome::Aborted | LayoutOutcome::Incomplete => None,
		}
	}
}
