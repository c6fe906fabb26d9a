//! Document version counter and completed-layout watermark.

use std::sync::atomic::{AtomicU64, Ordering};

/// Tracks the document version and the highest version whose layout has
/// been applied.
///
/// Tiers race and complete in any order, so the watermark is the only
/// authoritative freshness signal. Consumers must not infer freshness from
/// completion order.
#[derive(Debug, Default)]
pub struct VersionTracker {
	document: AtomicU64,
	completed: AtomicU64,
}

impl VersionTracker {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records one document mutation. Never call this for read-only operations.
	pub fn on_edit(&self) {
		let version = self.document.fetch_add(1, Ordering::AcqRel) + 1;
		tracing::trace!(version, "layout.version.edit");
	}

	pub fn current_version(&self) -> u64 {
		self.document.load(Ordering::Acquire)
	}

	pub fn completed_version(&self) -> u64 {
		self.completed.load(Ordering::Acquire)
	}

	/// Advances the watermark to `version` unless it is already higher.
	pub fn on_layout_complete(&self, version: u64) {
		let previous = self.completed.fetch_max(version, Ordering::AcqRel);
		if version < previous {
			tracing::trace!(version, watermark = previous, "layout.version.late_completion");
		}
	}

	pub fn is_layout_stale(&self) -> bool {
		self.completed_version() < self.current_version()
	}
}
