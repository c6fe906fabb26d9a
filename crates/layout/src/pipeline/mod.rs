//! Edit-driven façade over the coordinator.
//!
//! [`LayoutPipeline`] translates document edits into tiered layout requests
//! and folds completed layouts into the render surface through a
//! [`RenderPatch`]. It owns the coordinator, the optional background
//! dispatcher, and the cached current layout, and tears all three down on
//! [`LayoutPipeline::destroy`].

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use quire_worker::{BackgroundWorker, DispatcherConfig};
use tokio::runtime::Handle;

use crate::{
	AsyncLayoutExecutor, DispatchedExecutor, LayoutCoordinator, LayoutDispatcher, LayoutError, LayoutExecutors, LayoutRequest, LayoutResult, LayoutSink,
	LayoutScope, MetricsSnapshot, QueueStats, ScheduleOptions, SyncLayoutExecutor, Tier, VersionTracker,
};

mod render;

pub use render::{PatchStats, RenderPatch};
use render::{RenderSink, RenderState};

/// One edit reported by the edit source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EditEvent {
	/// False for edits that left the document untouched; those are ignored.
	pub doc_changed: bool,
	/// Paragraph under the cursor, when known. Enables the P0 pass.
	pub paragraph_index: Option<usize>,
}

impl EditEvent {
	/// A mutating edit inside `index`.
	pub fn in_paragraph(index: usize) -> Self {
		Self {
			doc_changed: true,
			paragraph_index: Some(index),
		}
	}

	/// A mutating edit with no known paragraph.
	pub fn changed() -> Self {
		Self {
			doc_changed: true,
			paragraph_index: None,
		}
	}
}

/// Worker run behind the background lane.
pub type LayoutWorker<L> = Box<dyn BackgroundWorker<LayoutRequest, Result<LayoutResult<L>, LayoutError>>>;

#[derive(Debug, Clone, Default)]
pub struct PipelineConfig {
	pub dispatcher: DispatcherConfig,
}

/// Collaborators a pipeline is assembled from.
pub struct PipelineParts<L> {
	pub immediate: Arc<dyn SyncLayoutExecutor<L>>,
	pub interactive: Arc<dyn AsyncLayoutExecutor<L>>,
	/// `None` runs P2/P3 in-process.
	pub background_worker: Option<LayoutWorker<L>>,
	pub patcher: Box<dyn RenderPatch<L>>,
	pub config: PipelineConfig,
}

pub struct LayoutPipeline<L> {
	coordinator: LayoutCoordinator<L>,
	dispatcher: Option<Arc<LayoutDispatcher<L>>>,
	versions: Arc<VersionTracker>,
	render: Arc<Mutex<RenderState<L>>>,
	destroyed: AtomicBool,
}

impl<L> LayoutPipeline<L>
where
	L: Send + 'static,
{
	/// Builds a pipeline on the current (or global worker) runtime.
	pub fn new(parts: PipelineParts<L>) -> Result<Self, LayoutError> {
		let runtime = quire_worker::runtime_handle()?;
		Ok(Self::with_runtime(parts, runtime))
	}

	/// Builds a pipeline whose deferred work runs on `runtime`.
	///
	/// Starting the background worker blocks the calling thread for up to
	/// `config.dispatcher.startup_timeout`. A worker that fails to start is
	/// logged and left in place; the coordinator then runs P2/P3 in-process.
	pub fn with_runtime(parts: PipelineParts<L>, runtime: Handle) -> Self {
		let PipelineParts {
			immediate,
			interactive,
			background_worker,
			patcher,
			config,
		} = parts;

		let dispatcher = background_worker.map(|worker| Arc::new(LayoutDispatcher::new(worker, config.dispatcher)));
		if let Some(dispatcher) = &dispatcher
			&& let Err(err) = dispatcher.initialize()
		{
			tracing::warn!(error = %err, "background layout worker unavailable; P2/P3 will run in-process");
		}
		let background = dispatcher
			.as_ref()
			.map(|dispatcher| Arc::new(DispatchedExecutor::new(Arc::clone(dispatcher))) as Arc<dyn AsyncLayoutExecutor<L>>);

		let versions = Arc::new(VersionTracker::new());
		let render = Arc::new(Mutex::new(RenderState::new(patcher)));
		let sink = Arc::new(RenderSink {
			state: Arc::clone(&render),
		});
		let executors = LayoutExecutors {
			immediate,
			interactive,
			background,
		};

		Self {
			coordinator: LayoutCoordinator::with_runtime(executors, Arc::clone(&versions), Some(sink as Arc<dyn LayoutSink<L>>), runtime),
			dispatcher,
			versions,
			render,
			destroyed: AtomicBool::new(false),
		}
	}

	/// Reacts to one edit. Non-mutating edits and edits after destroy are ignored.
	pub fn on_edit(&self, event: EditEvent) {
		if !event.doc_changed || self.is_destroyed() {
			return;
		}
		self.versions.on_edit();
		let version = self.versions.current_version();
		self.coordinator.interrupt_below(Tier::P1);

		if let Some(index) = event.paragraph_index {
			self.coordinator.schedule_layout(version, Tier::P0, ScheduleOptions::paragraph(index));
		}
		for (tier, scope) in [
			(Tier::P1, LayoutScope::Viewport),
			(Tier::P2, LayoutScope::Adjacent),
			(Tier::P3, LayoutScope::Full),
		] {
			let options = ScheduleOptions {
				scope,
				paragraph_index: event.paragraph_index,
			};
			self.coordinator.schedule_layout(version, tier, options);
		}
		tracing::trace!(version, paragraph = ?event.paragraph_index, "layout.pipeline.edit");
	}

	/// Cancels everything and recomputes the whole document at P1 urgency.
	pub fn force_full_layout(&self) {
		if self.is_destroyed() {
			return;
		}
		self.versions.on_edit();
		let version = self.versions.current_version();
		self.coordinator.interrupt_below(Tier::P0);
		self.coordinator.schedule_layout(version, Tier::P1, ScheduleOptions::scope(LayoutScope::Full));
		tracing::debug!(version, "layout.pipeline.force_full");
	}
}

impl<L> LayoutPipeline<L> {
	pub fn current_version(&self) -> u64 {
		self.versions.current_version()
	}

	pub fn completed_version(&self) -> u64 {
		self.versions.completed_version()
	}

	pub fn is_layout_stale(&self) -> bool {
		self.versions.is_layout_stale()
	}

	pub fn has_pending_layouts(&self) -> bool {
		self.coordinator.has_pending_layouts()
	}

	/// Runs `f` against the current layout under the render lock.
	///
	/// `f` must not call back into the pipeline.
	pub fn with_layout<R>(&self, f: impl FnOnce(Option<&L>) -> R) -> R {
		f(self.render.lock().current())
	}

	/// Version of the layout currently on the render surface.
	pub fn rendered_version(&self) -> Option<u64> {
		self.render.lock().applied_version()
	}

	pub fn queue_stats(&self) -> QueueStats {
		self.coordinator.queue_stats()
	}

	pub fn metrics(&self) -> MetricsSnapshot {
		self.coordinator.metrics()
	}

	/// Executions outstanding in the background dispatcher.
	pub fn background_pending(&self) -> usize {
		self.dispatcher.as_ref().map_or(0, |dispatcher| dispatcher.pending_count())
	}

	pub fn is_destroyed(&self) -> bool {
		self.destroyed.load(Ordering::Acquire)
	}

	/// Tears down the coordinator, the background worker, and the cached
	/// layout. Safe to call more than once.
	pub fn destroy(&self) {
		if self.destroyed.swap(true, Ordering::AcqRel) {
			return;
		}
		self.coordinator.destroy();
		if let Some(dispatcher) = &self.dispatcher {
			dispatcher.terminate();
		}
		self.render.lock().discard();
		tracing::debug!(version = self.versions.current_version(), "layout.pipeline.destroy");
	}
}

impl<L: Clone> LayoutPipeline<L> {
	pub fn current_layout(&self) -> Option<L> {
		self.with_layout(|layout| layout.cloned())
	}
}

impl<L> Drop for LayoutPipeline<L> {
	fn drop(&mut self) {
		self.destroy();
	}
}
