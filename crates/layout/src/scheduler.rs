//! Per-tier bookkeeping of pending and running layout work.
//!
//! The scheduler owns no timers and runs nothing. It is the authoritative
//! record of what each tier is currently executing, kept as one pending slot
//! and one running slot per tier. A new request overwrites the pending slot;
//! there is never a queue behind it.

use crate::{LayoutRequest, PerTier, Tier};

#[derive(Debug, Default)]
struct Slot {
	pending: Option<LayoutRequest>,
	running: Option<LayoutRequest>,
}

/// Read-only snapshot of one tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TierStats {
	pub pending: bool,
	pub running: bool,
	pub pending_version: Option<u64>,
	pub running_version: Option<u64>,
}

/// Read-only snapshot of every tier.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct QueueStats {
	pub tiers: PerTier<TierStats>,
}

impl QueueStats {
	pub fn is_idle(&self) -> bool {
		self.tiers.iter().all(|(_, s)| !s.pending && !s.running)
	}

	pub fn running_count(&self) -> usize {
		self.tiers.iter().filter(|(_, s)| s.running).count()
	}
}

/// Single-slot-per-tier scheduler. Every operation is infallible and
/// idempotent in empty states.
#[derive(Debug, Default)]
pub struct PriorityScheduler {
	slots: PerTier<Slot>,
}

impl PriorityScheduler {
	pub fn new() -> Self {
		Self::default()
	}

	/// Records `request` as its tier's pending task, replacing any previous one.
	pub fn enqueue(&mut self, request: LayoutRequest) {
		let slot = &mut self.slots[request.priority];
		if let Some(replaced) = slot.pending.replace(request) {
			tracing::trace!(tier = replaced.priority.as_str(), replaced_version = replaced.version, "layout.scheduler.coalesce");
		}
	}

	/// Promotes the most urgent pending task to its tier's running slot.
	pub fn dequeue(&mut self) -> Option<LayoutRequest> {
		let (tier, slot) = self.slots.iter_mut().find(|(_, slot)| slot.pending.is_some())?;
		let request = slot.pending.take()?;
		slot.running = Some(request.clone());
		tracing::trace!(tier = tier.as_str(), version = request.version, "layout.scheduler.dequeue");
		Some(request)
	}

	/// Clears the running slot that `finished` occupied.
	///
	/// The slot is only cleared while it still holds the same dispatch
	/// generation, so a late settlement never releases a newer dispatch.
	/// Returns whether a slot was cleared.
	pub fn complete_current_task(&mut self, finished: &LayoutRequest) -> bool {
		let slot = &mut self.slots[finished.priority];
		match &slot.running {
			Some(running) if running.generation() == finished.generation() => {
				slot.running = None;
				true
			}
			_ => false,
		}
	}

	/// Clears pending and running slots of every tier at or below `threshold`.
	///
	/// Bookkeeping only: in-flight work is cancelled through its ticket by the
	/// coordinator.
	pub fn abort_below(&mut self, threshold: Tier) {
		for (tier, slot) in self.slots.iter_mut() {
			if tier.is_at_or_below(threshold) {
				slot.pending = None;
				slot.running = None;
			}
		}
	}

	pub fn has_pending(&self) -> bool {
		self.slots.iter().any(|(_, slot)| slot.pending.is_some() || slot.running.is_some())
	}

	pub fn is_running(&self, tier: Tier) -> bool {
		self.slots[tier].running.is_some()
	}

	pub fn queue_stats(&self) -> QueueStats {
		let mut stats = QueueStats::default();
		for (tier, slot) in self.slots.iter() {
			stats.tiers[tier] = TierStats {
				pending: slot.pending.is_some(),
				running: slot.running.is_some(),
				pending_version: slot.pending.as_ref().map(|r| r.version),
				running_version: slot.running.as_ref().map(|r| r.version),
			};
		}
		stats
	}

	pub fn clear(&mut self) {
		self.slots = PerTier::default();
	}
}
