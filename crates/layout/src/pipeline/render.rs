use std::sync::Arc;

use parking_lot::Mutex;

use crate::{LayoutRequest, LayoutSink};

/// Counters reported by a [`RenderPatch`] run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PatchStats {
	/// Render nodes that were rewritten.
	pub patched: usize,
	/// Render nodes carried over unchanged.
	pub reused: usize,
}

/// Applies a newly computed layout to the render surface.
///
/// Opaque to the pipeline: the returned stats are logged, never inspected.
pub trait RenderPatch<L>: Send {
	fn patch(&mut self, previous: Option<&L>, next: &L) -> PatchStats;
}

impl<L, F> RenderPatch<L> for F
where
	F: FnMut(Option<&L>, &L) -> PatchStats + Send,
{
	fn patch(&mut self, previous: Option<&L>, next: &L) -> PatchStats {
		self(previous, next)
	}
}

pub(super) struct RenderState<L> {
	patcher: Box<dyn RenderPatch<L>>,
	current: Option<L>,
	/// Version of `current`.
	applied_version: u64,
	discarded: bool,
}

impl<L> RenderState<L> {
	pub(super) fn new(patcher: Box<dyn RenderPatch<L>>) -> Self {
		Self {
			patcher,
			current: None,
			applied_version: 0,
			discarded: false,
		}
	}

	pub(super) fn current(&self) -> Option<&L> {
		self.current.as_ref()
	}

	pub(super) fn applied_version(&self) -> Option<u64> {
		self.current.as_ref().map(|_| self.applied_version)
	}

	/// Drops the cached layout and refuses every later application.
	pub(super) fn discard(&mut self) {
		self.current = None;
		self.discarded = true;
	}

	pub(super) fn apply(&mut self, request: &LayoutRequest, layout: L) {
		if self.discarded {
			tracing::trace!(version = request.version, "layout.render.discarded");
			return;
		}
		if self.current.is_some() && request.version < self.applied_version {
			tracing::trace!(
				tier = request.priority.as_str(),
				version = request.version,
				applied = self.applied_version,
				"layout.render.stale"
			);
			return;
		}

		let stats = self.patcher.patch(self.current.as_ref(), &layout);
		self.current = Some(layout);
		self.applied_version = request.version;
		tracing::debug!(
			tier = request.priority.as_str(),
			version = request.version,
			patched = stats.patched,
			reused = stats.reused,
			"layout.render.patch"
		);
	}
}

/// Sink handed to the coordinator; funnels every completion through one lock.
pub(super) struct RenderSink<L> {
	pub(super) state: Arc<Mutex<RenderState<L>>>,
}

impl<L: Send> LayoutSink<L> for RenderSink<L> {
	fn apply(&self, request: &LayoutRequest, layout: L) {
		self.state.lock().apply(request, layout);
	}
}
