use tokio::task::JoinHandle;

use crate::{CancelTicket, LayoutRequest, PerTier, PriorityScheduler};

/// Debounce timer for one tier. `seq` identifies the arming so a timer that
/// was replaced while already firing can tell it is stale.
pub(super) struct ArmedTimer {
	pub(super) seq: u64,
	pub(super) handle: JoinHandle<()>,
}

/// Coordinator-side state of one deferred tier.
#[derive(Default)]
pub(super) struct TierState {
	pub(super) timer: Option<ArmedTimer>,
	/// Latest request awaiting its debounce; last write wins.
	pub(super) latest: Option<LayoutRequest>,
	/// Ticket of the dispatch currently executing for this tier.
	pub(super) running: Option<CancelTicket>,
}

impl TierState {
	pub(super) fn disarm(&mut self) {
		if let Some(timer) = self.timer.take() {
			timer.handle.abort();
		}
	}

	/// Disarms, drops the pending request, and cancels the running dispatch.
	/// Returns whether a running dispatch was cancelled.
	pub(super) fn reset(&mut self) -> bool {
		self.disarm();
		self.latest = None;
		match self.running.take() {
			Some(ticket) => {
				ticket.cancel();
				true
			}
			None => false,
		}
	}

	pub(super) fn is_busy(&self) -> bool {
		self.timer.is_some() || self.running.is_some()
	}
}

#[derive(Default)]
pub(super) struct CoordState {
	pub(super) scheduler: PriorityScheduler,
	pub(super) tiers: PerTier<TierState>,
	pub(super) next_generation: u64,
	pub(super) next_timer: u64,
	pub(super) destroyed: bool,
}
