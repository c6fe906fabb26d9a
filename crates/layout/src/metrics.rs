use std::sync::atomic::{AtomicU64, Ordering};

/// Running counters for one coordinator.
#[derive(Debug, Default)]
pub struct CoordinatorMetrics {
	scheduled: AtomicU64,
	coalesced: AtomicU64,
	immediate: AtomicU64,
	dispatched: AtomicU64,
	completed: AtomicU64,
	aborted: AtomicU64,
	failed: AtomicU64,
	fallbacks: AtomicU64,
}

/// Point-in-time copy of [`CoordinatorMetrics`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
	/// `schedule_layout` calls accepted.
	pub scheduled: u64,
	/// Pending requests replaced before their debounce fired.
	pub coalesced: u64,
	/// P0 executions.
	pub immediate: u64,
	/// Deferred executions started.
	pub dispatched: u64,
	/// Executions whose result was applied.
	pub completed: u64,
	/// Executions settled as cancelled.
	pub aborted: u64,
	/// Executions that failed, panicked, or returned an incomplete result.
	pub failed: u64,
	/// Background requests rerouted in-process.
	pub fallbacks: u64,
}

impl CoordinatorMetrics {
	pub(crate) fn record_scheduled(&self) {
		self.scheduled.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_coalesced(&self) {
		self.coalesced.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_immediate(&self) {
		self.immediate.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_dispatched(&self) {
		self.dispatched.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_completed(&self) {
		self.completed.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_aborted(&self) {
		self.aborted.fetch_add(1, Ordering::Relaxed);
	}

	pub(crate) fn record_failed(&self) {
		self.failed.fetch_add(1, Ordering::Relaxed);
	}

	/// Records one fallback; returns true for the first one.
	pub(crate) fn record_fallback(&self) -> bool {
		self.fallbacks.fetch_add(1, Ordering::Relaxed) == 0
	}

	pub fn snapshot(&self) -> MetricsSnapshot {
		MetricsSnapshot {
			scheduled: self.scheduled.load(Ordering::Relaxed),
			coalesced: self.coalesced.load(Ordering::Relaxed),
			immediate: self.immediate.load(Ordering::Relaxed),
			dispatched: self.dispatched.load(Ordering::Relaxed),
			completed: self.completed.load(Ordering::Relaxed),
			aborted: self.aborted.load(Ordering::Relaxed),
			failed: self.failed.load(Ordering::Relaxed),
			fallbacks: self.fallbacks.load(Ordering::Relaxed),
		}
	}
}
