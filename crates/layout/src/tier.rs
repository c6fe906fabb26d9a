//! Priority tiers and their fixed scheduling policy.

use std::ops::{Index, IndexMut};
use std::time::Duration;

/// Debounce before a viewport relayout: one paint frame.
pub const P1_DEBOUNCE: Duration = Duration::from_millis(16);
/// Debounce before relaying adjacent pages; absorbs a typing burst.
pub const P2_DEBOUNCE: Duration = Duration::from_millis(50);
/// Debounce before a whole-document relayout.
pub const P3_DEBOUNCE: Duration = Duration::from_millis(150);

/// Layout urgency, most urgent first.
///
/// The derived ordering is the urgency ordering: `P0 < P1 < P2 < P3`, so a
/// tier that compares greater is less urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
	/// Cursor-critical; executed synchronously inside the scheduling call.
	P0,
	/// Near-viewport.
	P1,
	/// Adjacent pages.
	P2,
	/// Whole document.
	P3,
}

/// Where a tier's work executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Lane {
	/// Direct call on the scheduling thread.
	Immediate,
	/// Async task on the main runtime.
	InProcess,
	/// Out-of-line worker, reached through the background dispatcher.
	Background,
}

impl Tier {
	pub const ALL: [Tier; 4] = [Tier::P0, Tier::P1, Tier::P2, Tier::P3];

	pub const fn rank(self) -> usize {
		match self {
			Self::P0 => 0,
			Self::P1 => 1,
			Self::P2 => 2,
			Self::P3 => 3,
		}
	}

	pub const fn debounce(self) -> Duration {
		match self {
			Self::P0 => Duration::ZERO,
			Self::P1 => P1_DEBOUNCE,
			Self::P2 => P2_DEBOUNCE,
			Self::P3 => P3_DEBOUNCE,
		}
	}

	pub const fn lane(self) -> Lane {
		match self {
			Self::P0 => Lane::Immediate,
			Self::P1 => Lane::InProcess,
			Self::P2 | Self::P3 => Lane::Background,
		}
	}

	/// True when `self` is as urgent as `threshold` or less urgent.
	pub const fn is_at_or_below(self, threshold: Tier) -> bool {
		self.rank() >= threshold.rank()
	}

	pub const fn as_str(self) -> &'static str {
		match self {
			Self::P0 => "p0",
			Self::P1 => "p1",
			Self::P2 => "p2",
			Self::P3 => "p3",
		}
	}
}

/// One value per tier, indexed by [`Tier`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PerTier<T>([T; 4]);

impl<T> PerTier<T> {
	pub fn from_fn(mut f: impl FnMut(Tier) -> T) -> Self {
		Self(Tier::ALL.map(&mut f))
	}

	pub fn iter(&self) -> impl Iterator<Item = (Tier, &T)> {
		Tier::ALL.into_iter().zip(self.0.iter())
	}

	pub fn iter_mut(&mut self) -> impl Iterator<Item = (Tier, &mut T)> {
		Tier::ALL.into_iter().zip(self.0.iter_mut())
	}
}

impl<T> Index<Tier> for PerTier<T> {
	type Output = T;

	fn index(&self, tier: Tier) -> &T {
		&self.0[tier.rank()]
	}
}

impl<T> IndexMut<Tier> for PerTier<T> {
	fn index_mut(&mut self, tier: Tier) -> &mut T {
		&mut self.0[tier.rank()]
	}
}
