//! Debouncing, cancelling layout coordinator.
//!
//! Turns a stream of `schedule_layout(version, tier, options)` calls into at
//! most one execution per tier per debounce window:
//!
//! - `P0` runs inline before `schedule_layout` returns.
//! - `P1`..`P3` wait out their tier's fixed debounce. A newer request for the
//!   same tier overwrites the pending one and restarts the timer.
//! - Each dispatch gets a fresh [`CancelTicket`]; invalidating it settles the
//!   dispatch as aborted, whatever the executor is doing.
//! - A tier runs one dispatch at a time. If its timer fires while the previous
//!   dispatch is still running, that dispatch is cancelled and the pending
//!   request re-debounces until the slot is free.
//!
//! Completions feed the [`VersionTracker`] watermark and the [`LayoutSink`].
//! Nothing here ever fails the caller: errors are logged and the tier's slot
//! is released.

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use quire_worker::{TaskClass, join_error_panic_message, panic_payload_message, spawn_on};
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;

use crate::{
	CancelTicket, CoordinatorMetrics, Lane, LayoutError, LayoutExecutors, LayoutOutcome, LayoutRequest, LayoutResult, LayoutSink,
	MetricsSnapshot, QueueStats, ScheduleOptions, Tier, VersionTracker,
};

mod state;

use state::{ArmedTimer, CoordState};

/// Orchestrates scheduling, coalescing, cancellation, and execution of layout work.
///
/// Dropping the coordinator destroys it.
pub struct LayoutCoordinator<L> {
	inner: Arc<Inner<L>>,
}

struct Inner<L> {
	executors: LayoutExecutors<L>,
	versions: Arc<VersionTracker>,
	sink: Option<Arc<dyn LayoutSink<L>>>,
	runtime: Handle,
	/// Parent of every dispatch ticket; cancelled on destroy.
	root: CancellationToken,
	metrics: CoordinatorMetrics,
	state: Mutex<CoordState>,
}

impl<L> LayoutCoordinator<L>
where
	L: Send + 'static,
{
	/// Creates a coordinator on the current (or global worker) runtime.
	pub fn new(executors: LayoutExecutors<L>, versions: Arc<VersionTracker>, sink: Option<Arc<dyn LayoutSink<L>>>) -> Result<Self, LayoutError> {
		let runtime = quire_worker::runtime_handle()?;
		Ok(Self::with_runtime(executors, versions, sink, runtime))
	}

	/// Creates a coordinator whose timers and deferred tiers run on `runtime`.
	pub fn with_runtime(
		executors: LayoutExecutors<L>,
		versions: Arc<VersionTracker>,
		sink: Option<Arc<dyn LayoutSink<L>>>,
		runtime: Handle,
	) -> Self {
		Self {
			inner: Arc::new(Inner {
				executors,
				versions,
				sink,
				runtime,
				root: CancellationToken::new(),
				metrics: CoordinatorMetrics::default(),
				state: Mutex::new(CoordState::default()),
			}),
		}
	}

	/// Schedules layout of `version` at `tier` urgency.
	///
	/// `P0` executes synchronously; deferred tiers coalesce to the last call
	/// within their debounce window. A no-op after [`Self::destroy`].
	pub fn schedule_layout(&self, version: u64, tier: Tier, options: ScheduleOptions) {
		let request = LayoutRequest::new(version, tier, options);
		if tier == Tier::P0 {
			self.inner.run_immediate(request);
		} else {
			self.inner.defer(request);
		}
	}
}

impl<L> LayoutCoordinator<L> {
	/// Cancels every tier at or below `threshold`: armed timers, pending
	/// requests, and in-flight dispatches. More urgent tiers are untouched.
	pub fn interrupt_below(&self, threshold: Tier) {
		self.inner.interrupt_below(threshold);
	}

	/// True while any tier has an armed timer, a pending request, or a running dispatch.
	pub fn has_pending_layouts(&self) -> bool {
		let state = self.inner.state.lock();
		state.scheduler.has_pending() || state.tiers.iter().any(|(_, slot)| slot.is_busy())
	}

	pub fn queue_stats(&self) -> QueueStats {
		self.inner.state.lock().scheduler.queue_stats()
	}

	pub fn metrics(&self) -> MetricsSnapshot {
		self.inner.metrics.snapshot()
	}

	pub fn versions(&self) -> &Arc<VersionTracker> {
		&self.inner.versions
	}

	pub fn is_destroyed(&self) -> bool {
		self.inner.root.is_cancelled()
	}

	/// Cancels all outstanding work and stops accepting new work. Idempotent.
	pub fn destroy(&self) {
		self.inner.destroy();
	}
}

impl<L> Drop for LayoutCoordinator<L> {
	fn drop(&mut self) {
		self.inner.destroy();
	}
}

const fn task_class(tier: Tier) -> TaskClass {
	match tier.lane() {
		Lane::Immediate | Lane::InProcess => TaskClass::Interactive,
		Lane::Background => TaskClass::Background,
	}
}

impl<L> Inner<L> {
	fn interrupt_below(&self, threshold: Tier) {
		let mut state = self.state.lock();
		let mut cancelled = 0usize;
		for (tier, slot) in state.tiers.iter_mut() {
			if tier.is_at_or_below(threshold) && slot.reset() {
				cancelled += 1;
			}
		}
		state.scheduler.abort_below(threshold);
		tracing::debug!(threshold = threshold.as_str(), cancelled, "layout.interrupt");
	}

	fn destroy(&self) {
		let mut state = self.state.lock();
		if state.destroyed {
			return;
		}
		state.destroyed = true;
		self.root.cancel();
		for (_, slot) in state.tiers.iter_mut() {
			slot.reset();
		}
		state.scheduler.clear();
		tracing::debug!("layout.coordinator.destroy");
	}

	fn note_aborted(&self, request: &LayoutRequest, reason: &'static str) {
		self.metrics.record_aborted();
		tracing::debug!(tier = request.priority.as_str(), version = request.version, reason, "layout.aborted");
	}

	fn note_failed(&self, request: &LayoutRequest, error: &LayoutError) {
		self.metrics.record_failed();
		tracing::warn!(tier = request.priority.as_str(), version = request.version, error = %error, "layout failed");
	}
}

impl<L> Inner<L>
where
	L: Send + 'static,
{
	fn run_immediate(&self, request: LayoutRequest) {
		if self.root.is_cancelled() {
			tracing::trace!(version = request.version, "layout.schedule.destroyed");
			return;
		}
		self.metrics.record_scheduled();
		self.metrics.record_immediate();

		let executor = &self.executors.immediate;
		let outcome = std::panic::catch_unwind(AssertUnwindSafe(|| executor.execute(&request)))
			.unwrap_or_else(|payload| Err(LayoutError::Panicked(panic_payload_message(payload.as_ref()))));

		match outcome {
			Ok(LayoutResult {
				outcome: LayoutOutcome::Completed(_),
				..
			}) => {
				self.versions.on_layout_complete(request.version);
				self.metrics.record_completed();
				tracing::trace!(version = request.version, scope = request.scope.as_str(), "layout.p0.complete");
			}
			Ok(LayoutResult {
				outcome: LayoutOutcome::Aborted,
				..
			}) => self.note_aborted(&request, "executor aborted"),
			Ok(LayoutResult {
				outcome: LayoutOutcome::Incomplete,
				..
			}) => self.note_failed(&request, &LayoutError::executor("result neither completed nor aborted")),
			Err(err) if err.is_cancellation() => self.note_aborted(&request, "executor cancelled"),
			Err(err) => self.note_failed(&request, &err),
		}
	}

	fn defer(self: &Arc<Self>, request: LayoutRequest) {
		let tier = request.priority;
		let version = request.version;
		let mut state = self.state.lock();
		if state.destroyed {
			tracing::trace!(tier = tier.as_str(), version, "layout.schedule.destroyed");
			return;
		}
		self.metrics.record_scheduled();

		let slot = &mut state.tiers[tier];
		slot.disarm();
		if slot.latest.replace(request).is_some() {
			self.metrics.record_coalesced();
		}
		self.arm(&mut state, tier);
		tracing::trace!(tier = tier.as_str(), version, debounce_ms = tier.debounce().as_millis() as u64, "layout.schedule");
	}

	fn arm(self: &Arc<Self>, state: &mut CoordState, tier: Tier) {
		state.next_timer += 1;
		let seq = state.next_timer;
		let weak: Weak<Self> = Arc::downgrade(self);
		let handle = spawn_on(&self.runtime, TaskClass::Interactive, async move {
			tokio::time::sleep(tier.debounce()).await;
			if let Some(inner) = weak.upgrade() {
				inner.fire(tier, seq);
			}
		});
		state.tiers[tier].timer = Some(ArmedTimer { seq, handle });
	}

	fn fire(self: &Arc<Self>, tier: Tier, seq: u64) {
		let (request, ticket) = {
			let mut state = self.state.lock();
			if state.destroyed {
				return;
			}
			let slot = &mut state.tiers[tier];
			if slot.timer.as_ref().map(|timer| timer.seq) != Some(seq) {
				return;
			}
			slot.timer = None;
			let Some(mut request) = slot.latest.take() else {
				return;
			};

			if let Some(running) = &slot.running {
				running.cancel();
				tracing::debug!(
					tier = tier.as_str(),
					generation = running.generation(),
					version = request.version,
					"layout.dispatch.displace"
				);
				slot.latest = Some(request);
				self.arm(&mut state, tier);
				return;
			}

			state.next_generation += 1;
			let ticket = CancelTicket::new(state.next_generation, self.root.child_token());
			request.cancellation = Some(ticket.clone());
			state.tiers[tier].running = Some(ticket.clone());
			state.scheduler.enqueue(request.clone());
			state.scheduler.dequeue();
			(request, ticket)
		};

		self.metrics.record_dispatched();
		tracing::debug!(
			tier = tier.as_str(),
			version = request.version,
			generation = ticket.generation(),
			scope = request.scope.as_str(),
			"layout.dispatch"
		);
		let inner = Arc::clone(self);
		spawn_on(&self.runtime, task_class(tier), inner.run_deferred(request, ticket));
	}

	async fn run_deferred(self: Arc<Self>, request: LayoutRequest, ticket: CancelTicket) {
		let tier = request.priority;
		let mut task = spawn_on(&self.runtime, task_class(tier), Arc::clone(&self).execute_on_lane(request.clone()));

		let outcome = tokio::select! {
			biased;
			_ = ticket.cancelled() => {
				task.abort();
				Err(LayoutError::Cancelled)
			}
			joined = &mut task => match joined {
				Ok(outcome) => outcome,
				Err(err) => Err(join_error_panic_message(err).map_or(LayoutError::Cancelled, LayoutError::Panicked)),
			},
		};

		self.settle(&request, &ticket, outcome);
	}

	async fn execute_on_lane(self: Arc<Self>, request: LayoutRequest) -> Result<LayoutResult<L>, LayoutError> {
		if request.priority.lane() != Lane::Background {
			return self.executors.interactive.execute(request).await;
		}

		let Some(background) = &self.executors.background else {
			self.note_fallback(&request, "no background executor");
			return self.executors.interactive.execute(request).await;
		};
		match background.execute(request.clone()).await {
			Err(err) if err.is_unavailable() => {
				self.note_fallback(&request, "background unavailable");
				self.executors.interactive.execute(request).await
			}
			outcome => outcome,
		}
	}

	fn note_fallback(&self, request: &LayoutRequest, reason: &'static str) {
		if self.metrics.record_fallback() {
			tracing::warn!(tier = request.priority.as_str(), reason, "background layout unavailable; running in-process");
		} else {
			tracing::trace!(tier = request.priority.as_str(), reason, "layout.fallback");
		}
	}

	/// Records the outcome of one dispatch and frees its tier slot.
	///
	/// Held under the state lock throughout: every ticket is cancelled under
	/// that lock too, so a cancelled dispatch can never reach the sink.
	fn settle(&self, request: &LayoutRequest, ticket: &CancelTicket, outcome: Result<LayoutResult<L>, LayoutError>) {
		let tier = request.priority;
		let mut state = self.state.lock();
		match outcome {
			_ if ticket.is_cancelled() => self.note_aborted(request, "ticket invalidated"),
			Ok(result) => match result.outcome {
				LayoutOutcome::Completed(layout) => {
					if let Some(sink) = &self.sink {
						sink.apply(request, layout);
					}
					self.versions.on_layout_complete(request.version);
					self.metrics.record_completed();
					tracing::debug!(tier = tier.as_str(), version = request.version, "layout.complete");
				}
				LayoutOutcome::Aborted => self.note_aborted(request, "executor aborted"),
				LayoutOutcome::Incomplete => self.note_failed(request, &LayoutError::executor("result neither completed nor aborted")),
			},
			Err(err) if err.is_cancellation() => self.note_aborted(request, "executor cancelled"),
			Err(err) => self.note_failed(request, &err),
		}

		state.scheduler.complete_current_task(request);
		let slot = &mut state.tiers[tier];
		if slot.running.as_ref().map(CancelTicket::generation) == Some(ticket.generation()) {
			slot.running = None;
		}
	}
}

#[cfg(test)]
mod tests;
