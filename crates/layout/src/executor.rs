//! Seams to the layout engine.
//!
//! The coordinator never computes layout itself. It calls one of three
//! executors depending on [`Lane`](crate::Lane) and hands completed layouts to
//! a [`LayoutSink`].

use std::sync::Arc;

use async_trait::async_trait;
use quire_worker::BackgroundDispatcher;

use crate::{LayoutError, LayoutRequest, LayoutResult};

/// Cursor-critical executor. Must return within a few milliseconds.
pub trait SyncLayoutExecutor<L>: Send + Sync {
	fn execute(&self, request: &LayoutRequest) -> Result<LayoutResult<L>, LayoutError>;
}

impl<L, F> SyncLayoutExecutor<L> for F
where
	F: Fn(&LayoutRequest) -> Result<LayoutResult<L>, LayoutError> + Send + Sync,
{
	fn execute(&self, request: &LayoutRequest) -> Result<LayoutResult<L>, LayoutError> {
		self(request)
	}
}

/// Deferred executor. May poll `request.cancellation` to stop early.
#[async_trait]
pub trait AsyncLayoutExecutor<L>: Send + Sync {
	async fn execute(&self, request: LayoutRequest) -> Result<LayoutResult<L>, LayoutError>;
}

/// Receives successfully completed layouts of deferred tiers.
///
/// `apply` runs under the coordinator's state lock, so a layout is never
/// applied after its ticket was cancelled. It must not call back into the
/// coordinator.
pub trait LayoutSink<L>: Send + Sync {
	fn apply(&self, request: &LayoutRequest, layout: L);
}

/// Executor set handed to a coordinator.
pub struct LayoutExecutors<L> {
	/// P0.
	pub immediate: Arc<dyn SyncLayoutExecutor<L>>,
	/// P1, and P2/P3 when the background lane is unavailable.
	pub interactive: Arc<dyn AsyncLayoutExecutor<L>>,
	/// P2/P3. `None` runs them in-process.
	pub background: Option<Arc<dyn AsyncLayoutExecutor<L>>>,
}

impl<L> Clone for LayoutExecutors<L> {
	fn clone(&self) -> Self {
		Self {
			immediate: Arc::clone(&self.immediate),
			interactive: Arc::clone(&self.interactive),
			background: self.background.clone(),
		}
	}
}

/// Background dispatcher specialised to layout requests.
///
/// Requests cross into the worker detached from their ticket. The worker gets
/// a child of the ticket's token instead, so a superseded layout can stop
/// early and free the thread for the next one.
pub type LayoutDispatcher<L> = BackgroundDispatcher<LayoutRequest, Result<LayoutResult<L>, LayoutError>>;

/// Adapts a [`LayoutDispatcher`] to the async executor seam.
pub struct DispatchedExecutor<L> {
	dispatcher: Arc<LayoutDispatcher<L>>,
}

impl<L> DispatchedExecutor<L> {
	pub fn new(dispatcher: Arc<LayoutDispatcher<L>>) -> Self {
		Self { dispatcher }
	}
}

#[async_trait]
impl<L> AsyncLayoutExecutor<L> for DispatchedExecutor<L>
where
	L: Send + 'static,
{
	async fn execute(&self, request: LayoutRequest) -> Result<LayoutResult<L>, LayoutError> {
		let token = request.cancellation.as_ref().map(|ticket| ticket.token().clone());
		self.dispatcher.execute(request.detached(), token.as_ref()).await?
	}
}
