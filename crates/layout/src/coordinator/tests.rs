use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use quire_worker::{BackgroundWorker, DispatcherConfig};
use tokio_util::sync::CancellationToken;

use super::*;
use crate::{AsyncLayoutExecutor, DispatchedExecutor, LayoutDispatcher, LayoutScope, SyncLayoutExecutor};

#[derive(Debug, Clone, Copy)]
enum Behavior {
	Complete,
	Abort,
	Incomplete,
	Fail,
	Panic,
	Hang,
	Slow(Duration),
}

fn respond(request: &LayoutRequest, behavior: Behavior) -> Result<LayoutResult<u64>, LayoutError> {
	match behavior {
		Behavior::Complete | Behavior::Slow(_) | Behavior::Hang => Ok(LayoutResult::completed(request.version, request.version * 100)),
		Behavior::Abort => Ok(LayoutResult::aborted(request.version)),
		Behavior::Incomplete => Ok(LayoutResult::incomplete(request.version)),
		Behavior::Fail => Err(LayoutError::executor("engine exploded")),
		Behavior::Panic => panic!("engine panicked at version {}", request.version),
	}
}

struct ImmediateMock {
	calls: Mutex<Vec<LayoutRequest>>,
	behavior: Mutex<Behavior>,
}

impl SyncLayoutExecutor<u64> for ImmediateMock {
	fn execute(&self, request: &LayoutRequest) -> Result<LayoutResult<u64>, LayoutError> {
		self.calls.lock().push(request.clone());
		let behavior = *self.behavior.lock();
		respond(request, behavior)
	}
}

struct DeferredMock {
	calls: Mutex<Vec<LayoutRequest>>,
	behavior: Mutex<Behavior>,
}

impl DeferredMock {
	fn versions(&self) -> Vec<u64> {
		self.calls.lock().iter().map(|r| r.version).collect()
	}

	fn tiers(&self) -> Vec<Tier> {
		self.calls.lock().iter().map(|r| r.priority).collect()
	}

	fn set(&self, behavior: Behavior) {
		*self.behavior.lock() = behavior;
	}
}

#[async_trait]
impl AsyncLayoutExecutor<u64> for DeferredMock {
	async fn execute(&self, request: LayoutRequest) -> Result<LayoutResult<u64>, LayoutError> {
		self.calls.lock().push(request.clone());
		let behavior = *self.behavior.lock();
		match behavior {
			Behavior::Hang => std::future::pending().await,
			Behavior::Slow(delay) => tokio::time::sleep(delay).await,
			_ => {}
		}
		respond(&request, behavior)
	}
}

#[derive(Default)]
struct RecordingSink {
	applied: Mutex<Vec<(Tier, u64, u64)>>,
}

impl LayoutSink<u64> for RecordingSink {
	fn apply(&self, request: &LayoutRequest, layout: u64) {
		self.applied.lock().push((request.priority, request.version, layout));
	}
}

struct Harness {
	coordinator: LayoutCoordinator<u64>,
	versions: Arc<VersionTracker>,
	immediate: Arc<ImmediateMock>,
	interactive: Arc<DeferredMock>,
	background: Arc<DeferredMock>,
	sink: Arc<RecordingSink>,
}

fn mock(behavior: Behavior) -> DeferredMock {
	DeferredMock {
		calls: Mutex::new(Vec::new()),
		behavior: Mutex::new(behavior),
	}
}

fn build(background: Option<Arc<dyn AsyncLayoutExecutor<u64>>>) -> Harness {
	let versions = Arc::new(VersionTracker::new());
	let immediate = Arc::new(ImmediateMock {
		calls: Mutex::new(Vec::new()),
		behavior: Mutex::new(Behavior::Complete),
	});
	let interactive = Arc::new(mock(Behavior::Complete));
	let recorded_background = Arc::new(mock(Behavior::Complete));
	let sink = Arc::new(RecordingSink::default());
	let executors = LayoutExecutors {
		immediate: immediate.clone(),
		interactive: interactive.clone(),
		background: Some(background.unwrap_or_else(|| recorded_background.clone() as Arc<dyn AsyncLayoutExecutor<u64>>)),
	};
	let coordinator = LayoutCoordinator::new(executors, Arc::clone(&versions), Some(sink.clone() as Arc<dyn LayoutSink<u64>>)).unwrap();
	Harness {
		coordinator,
		versions,
		immediate,
		interactive,
		background: recorded_background,
		sink,
	}
}

fn harness() -> Harness {
	build(None)
}

fn harness_without_background() -> Harness {
	let versions = Arc::new(VersionTracker::new());
	let immediate = Arc::new(ImmediateMock {
		calls: Mutex::new(Vec::new()),
		behavior: Mutex::new(Behavior::Complete),
	});
	let interactive = Arc::new(mock(Behavior::Complete));
	let sink = Arc::new(RecordingSink::default());
	let executors = LayoutExecutors {
		immediate: immediate.clone(),
		interactive: interactive.clone(),
		background: None,
	};
	let coordinator = LayoutCoordinator::new(executors, Arc::clone(&versions), Some(sink.clone() as Arc<dyn LayoutSink<u64>>)).unwrap();
	Harness {
		coordinator,
		versions,
		immediate,
		interactive,
		background: Arc::new(mock(Behavior::Complete)),
		sink,
	}
}

async fn sleep_ms(ms: u64) {
	tokio::time::sleep(Duration::from_millis(ms)).await;
}

fn viewport() -> ScheduleOptions {
	ScheduleOptions::scope(LayoutScope::Viewport)
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn p1_burst_coalesces_to_last_version() {
	let h = harness();
	h.coordinator.schedule_layout(1, Tier::P1, viewport());
	sleep_ms(2).await;
	h.coordinator.schedule_layout(2, Tier::P1, viewport());
	sleep_ms(2).await;
	h.coordinator.schedule_layout(3, Tier::P1, viewport());

	sleep_ms(10).await;
	assert!(h.interactive.versions().is_empty(), "debounce window has not elapsed yet");

	sleep_ms(20).await;
	assert_eq!(h.interactive.versions(), vec![3]);
	assert_eq!(h.interactive.calls.lock()[0].scope, LayoutScope::Viewport);
	assert_eq!(h.versions.completed_version(), 3);
	assert_eq!(*h.sink.applied.lock(), vec![(Tier::P1, 3, 300)]);

	let metrics = h.coordinator.metrics();
	assert_eq!(metrics.scheduled, 3);
	assert_eq!(metrics.coalesced, 2);
	assert_eq!(metrics.dispatched, 1);
	assert_eq!(metrics.completed, 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn every_deferred_tier_runs_once_per_window() {
	for tier in [Tier::P1, Tier::P2, Tier::P3] {
		let h = harness();
		for version in 1..=3 {
			h.coordinator.schedule_layout(version, tier, ScheduleOptions::default());
			sleep_ms(1).await;
		}
		sleep_ms(tier.debounce().as_millis() as u64 + 20).await;

		let executor = if tier == Tier::P1 { &h.interactive } else { &h.background };
		assert_eq!(executor.versions(), vec![3], "{tier:?}");
		assert_eq!(executor.tiers(), vec![tier]);
	}
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn p1_and_p2_fire_independently() {
	let h = harness();
	h.coordinator.schedule_layout(1, Tier::P1, viewport());
	h.coordinator.schedule_layout(2, Tier::P2, ScheduleOptions::scope(LayoutScope::Adjacent));

	sleep_ms(20).await;
	assert_eq!(h.interactive.versions(), vec![1]);
	assert!(h.background.versions().is_empty());

	sleep_ms(40).await;
	assert_eq!(h.interactive.versions(), vec![1]);
	assert_eq!(h.background.versions(), vec![2]);
	assert_eq!(h.versions.completed_version(), 2);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn p0_runs_before_schedule_returns() {
	let h = harness();
	h.coordinator.schedule_layout(1, Tier::P3, ScheduleOptions::default());
	h.versions.on_edit();
	h.coordinator.schedule_layout(1, Tier::P0, ScheduleOptions::paragraph(4));

	let calls = h.immediate.calls.lock().clone();
	assert_eq!(calls.len(), 1);
	assert_eq!(calls[0].paragraph_index, Some(4));
	assert_eq!(calls[0].scope, LayoutScope::Paragraph);
	assert!(calls[0].cancellation.is_none());
	assert_eq!(h.versions.completed_version(), 1);
	assert!(!h.versions.is_layout_stale());
	assert!(h.sink.applied.lock().is_empty(), "P0 results are not sunk");
	assert!(h.coordinator.has_pending_layouts(), "P3 is still debouncing");
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn p0_failures_are_swallowed() {
	let h = harness();
	h.versions.on_edit();
	for behavior in [Behavior::Fail, Behavior::Panic, Behavior::Incomplete, Behavior::Abort] {
		*h.immediate.behavior.lock() = behavior;
		h.coordinator.schedule_layout(1, Tier::P0, ScheduleOptions::paragraph(0));
	}
	assert_eq!(h.versions.completed_version(), 0);
	let metrics = h.coordinator.metrics();
	assert_eq!(metrics.failed, 3);
	assert_eq!(metrics.aborted, 1);

	*h.immediate.behavior.lock() = Behavior::Complete;
	h.coordinator.schedule_layout(1, Tier::P0, ScheduleOptions::paragraph(0));
	assert_eq!(h.versions.completed_version(), 1);
	assert_eq!(h.immediate.calls.lock().len(), 5);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn interrupt_spares_p0_and_drops_lower_tiers() {
	let h = harness();
	h.coordinator.schedule_layout(1, Tier::P0, ScheduleOptions::paragraph(2));
	h.coordinator.schedule_layout(1, Tier::P1, viewport());
	h.coordinator.schedule_layout(1, Tier::P2, ScheduleOptions::scope(LayoutScope::Adjacent));
	h.coordinator.interrupt_below(Tier::P1);

	assert_eq!(h.immediate.calls.lock().len(), 1);
	assert!(!h.coordinator.has_pending_layouts());

	sleep_ms(200).await;
	assert!(h.interactive.versions().is_empty());
	assert!(h.background.versions().is_empty());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn aborted_result_leaves_watermark_stale() {
	let h = harness();
	h.interactive.set(Behavior::Abort);
	h.versions.on_edit();
	h.coordinator.schedule_layout(1, Tier::P1, viewport());

	sleep_ms(30).await;
	assert_eq!(h.interactive.versions(), vec![1]);
	assert_eq!(h.versions.completed_version(), 0);
	assert!(h.versions.is_layout_stale());
	assert!(h.sink.applied.lock().is_empty());
	assert!(!h.coordinator.has_pending_layouts());
	assert_eq!(h.coordinator.metrics().aborted, 1);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn failures_release_the_running_slot() {
	for behavior in [Behavior::Fail, Behavior::Incomplete, Behavior::Panic] {
		let h = harness();
		h.interactive.set(behavior);
		h.coordinator.schedule_layout(1, Tier::P1, viewport());
		sleep_ms(30).await;

		assert_eq!(h.interactive.versions(), vec![1], "{behavior:?}");
		assert!(!h.coordinator.has_pending_layouts(), "{behavior:?} left the tier running");
		assert!(h.coordinator.queue_stats().is_idle());
		assert_eq!(h.coordinator.metrics().failed, 1, "{behavior:?}");
		assert_eq!(h.versions.completed_version(), 0);

		// The tier accepts new work afterwards.
		h.interactive.set(Behavior::Complete);
		h.coordinator.schedule_layout(2, Tier::P1, viewport());
		sleep_ms(30).await;
		assert_eq!(h.versions.completed_version(), 2, "{behavior:?}");
	}
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn interrupt_cancels_in_flight_dispatch() {
	let h = harness();
	h.interactive.set(Behavior::Hang);
	h.coordinator.schedule_layout(1, Tier::P1, viewport());
	sleep_ms(20).await;

	assert_eq!(h.interactive.versions(), vec![1]);
	let stats = h.coordinator.queue_stats();
	assert!(stats.tiers[Tier::P1].running);
	assert_eq!(stats.tiers[Tier::P1].running_version, Some(1));
	let ticket = h.interactive.calls.lock()[0].cancellation.clone().unwrap();
	assert!(!ticket.is_cancelled());

	h.coordinator.interrupt_below(Tier::P1);
	assert!(ticket.is_cancelled());
	assert!(!h.coordinator.has_pending_layouts());

	sleep_ms(1).await;
	assert_eq!(h.coordinator.metrics().aborted, 1);
	assert_eq!(h.versions.completed_version(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn running_tier_is_displaced_not_doubled() {
	let h = harness();
	h.interactive.set(Behavior::Slow(Duration::from_millis(40)));
	h.coordinator.schedule_layout(1, Tier::P1, viewport());
	sleep_ms(20).await;
	assert_eq!(h.interactive.versions(), vec![1]);

	// Fires at 36ms while version 1 is still running until 56ms.
	h.coordinator.schedule_layout(2, Tier::P1, viewport());
	sleep_ms(20).await;
	assert_eq!(h.interactive.versions(), vec![1], "second request must wait for the slot");

	sleep_ms(80).await;
	assert_eq!(h.interactive.versions(), vec![1, 2]);
	assert_eq!(*h.sink.applied.lock(), vec![(Tier::P1, 2, 200)]);

	let metrics = h.coordinator.metrics();
	assert_eq!(metrics.aborted, 1);
	assert_eq!(metrics.completed, 1);
	assert!(!h.coordinator.has_pending_layouts());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn dispatches_carry_fresh_generations() {
	let h = harness();
	h.coordinator.schedule_layout(1, Tier::P1, viewport());
	sleep_ms(20).await;
	h.coordinator.schedule_layout(2, Tier::P1, viewport());
	sleep_ms(20).await;

	let generations: Vec<_> = h.interactive.calls.lock().iter().map(|r| r.generation().unwrap()).collect();
	assert_eq!(generations.len(), 2);
	assert!(generations[0] < generations[1]);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn p2_and_p3_use_the_background_lane() {
	let h = harness();
	h.coordinator.schedule_layout(1, Tier::P2, ScheduleOptions::scope(LayoutScope::Adjacent));
	h.coordinator.schedule_layout(1, Tier::P3, ScheduleOptions::default());
	sleep_ms(200).await;

	assert_eq!(h.background.tiers(), vec![Tier::P2, Tier::P3]);
	assert!(h.interactive.versions().is_empty());
	assert_eq!(h.coordinator.metrics().fallbacks, 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn missing_background_runs_in_process() {
	let h = harness_without_background();
	h.coordinator.schedule_layout(1, Tier::P2, ScheduleOptions::scope(LayoutScope::Adjacent));
	h.coordinator.schedule_layout(1, Tier::P3, ScheduleOptions::default());
	sleep_ms(200).await;

	assert_eq!(h.interactive.tiers(), vec![Tier::P2, Tier::P3]);
	assert_eq!(h.coordinator.metrics().fallbacks, 2);
	assert_eq!(h.versions.completed_version(), 1);
}

struct EchoWorker;

impl BackgroundWorker<LayoutRequest, Result<LayoutResult<u64>, LayoutError>> for EchoWorker {
	fn handle(&mut self, request: LayoutRequest, _cancel: &CancellationToken) -> Result<LayoutResult<u64>, LayoutError> {
		Ok(LayoutResult::completed(request.version, request.version))
	}
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn uninitialized_dispatcher_degrades_to_in_process() {
	let dispatcher: Arc<LayoutDispatcher<u64>> = Arc::new(LayoutDispatcher::new(EchoWorker, DispatcherConfig::default()));
	let h = build(Some(Arc::new(DispatchedExecutor::new(Arc::clone(&dispatcher)))));

	h.coordinator.schedule_layout(4, Tier::P3, ScheduleOptions::default());
	sleep_ms(200).await;

	assert_eq!(h.interactive.tiers(), vec![Tier::P3]);
	assert_eq!(h.coordinator.metrics().fallbacks, 1);
	assert_eq!(h.versions.completed_version(), 4);
	assert_eq!(dispatcher.pending_count(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn destroy_is_idempotent_and_final() {
	let h = harness();
	h.coordinator.schedule_layout(1, Tier::P1, viewport());
	h.coordinator.destroy();
	h.coordinator.destroy();
	assert!(h.coordinator.is_destroyed());

	h.coordinator.schedule_layout(2, Tier::P0, ScheduleOptions::paragraph(0));
	h.coordinator.schedule_layout(2, Tier::P1, viewport());
	sleep_ms(100).await;

	assert!(h.immediate.calls.lock().is_empty());
	assert!(h.interactive.versions().is_empty());
	assert!(!h.coordinator.has_pending_layouts());
	assert_eq!(h.coordinator.metrics().scheduled, 1);
	assert_eq!(h.versions.current_version(), 0);
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn destroy_cancels_in_flight_dispatch() {
	let h = harness();
	h.background.set(Behavior::Hang);
	h.coordinator.schedule_layout(1, Tier::P2, ScheduleOptions::default());
	sleep_ms(60).await;
	assert_eq!(h.background.versions(), vec![1]);

	h.coordinator.destroy();
	sleep_ms(1).await;
	assert_eq!(h.coordinator.metrics().aborted, 1);
	assert!(!h.coordinator.has_pending_layouts());
}

#[tokio::test(flavor = "current_thread", start_paused = true)]
async fn pending_includes_armed_timers() {
	let h = harness();
	h.coordinator.schedule_layout(1, Tier::P3, ScheduleOptions::default());
	assert!(h.coordinator.has_pending_layouts());
	assert!(h.coordinator.queue_stats().is_idle(), "debouncing work is not scheduler work yet");

	sleep_ms(200).await;
	assert!(!h.coordinator.has_pending_layouts());
	assert_eq!(h.versions.completed_version(), 1);
}

/// Notes whether each applied layout's ticket was already cancelled.
#[derive(Default)]
struct TicketSink {
	applied: Mutex<Vec<(u64, bool)>>,
}

impl LayoutSink<u64> for TicketSink {
	fn apply(&self, request: &LayoutRequest, _layout: u64) {
		self.applied.lock().push((request.version, request.is_cancelled()));
	}
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn interrupted_dispatch_never_reaches_the_sink() {
	let sink = Arc::new(TicketSink::default());
	let interactive = Arc::new(mock(Behavior::Slow(Duration::from_millis(1))));
	let executors = LayoutExecutors {
		immediate: Arc::new(ImmediateMock {
			calls: Mutex::new(Vec::new()),
			behavior: Mutex::new(Behavior::Complete),
		}),
		interactive: interactive.clone(),
		background: None,
	};
	let versions = Arc::new(VersionTracker::new());
	let coordinator = LayoutCoordinator::new(executors, Arc::clone(&versions), Some(sink.clone() as Arc<dyn LayoutSink<u64>>)).unwrap();

	// Interrupts land right around the moment each dispatch settles.
	for version in 1..=40u64 {
		coordinator.schedule_layout(version, Tier::P1, viewport());
		tokio::time::sleep(Duration::from_millis(15 + version % 5)).await;
		coordinator.interrupt_below(Tier::P1);
	}
	coordinator.schedule_layout(41, Tier::P1, viewport());
	tokio::time::sleep(Duration::from_millis(100)).await;

	let applied = sink.applied.lock().clone();
	assert!(applied.iter().all(|&(_, cancelled)| !cancelled), "{applied:?}");
	assert_eq!(applied.last(), Some(&(41, false)));
	let metrics = coordinator.metrics();
	assert_eq!(metrics.completed as usize, applied.len());
	assert_eq!(metrics.completed + metrics.aborted, metrics.dispatched);
	assert_eq!(versions.completed_version(), 41);
}
