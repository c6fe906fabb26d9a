//! Priority-tiered layout coordination.
//!
//! Every edit fans out into four urgency tiers:
//!
//! * `P0` lays out the edited paragraph synchronously, before the edit returns.
//! * `P1` relays the viewport after one paint frame.
//! * `P2` and `P3` relay adjacent pages and the whole document on the
//!   background lane.
//!
//! [`LayoutCoordinator`] debounces and coalesces the deferred tiers, cancels
//! them through per-dispatch [`CancelTicket`]s, and records completions in a
//! [`VersionTracker`] watermark. [`LayoutPipeline`] wires it to an edit source
//! and a render surface.

mod coordinator;
mod error;
mod executor;
mod metrics;
mod pipeline;
mod request;
mod scheduler;
mod tier;
mod version;

pub use coordinator::LayoutCoordinator;
pub use error::LayoutError;
pub use executor::{AsyncLayoutExecutor, DispatchedExecutor, LayoutDispatcher, LayoutExecutors, LayoutSink, SyncLayoutExecutor};
pub use metrics::{CoordinatorMetrics, MetricsSnapshot};
pub use pipeline::{EditEvent, LayoutPipeline, LayoutWorker, PatchStats, PipelineConfig, PipelineParts, RenderPatch};
pub use request::{CancelTicket, LayoutOutcome, LayoutRequest, LayoutResult, LayoutScope, ScheduleOptions};
pub use scheduler::{PriorityScheduler, QueueStats, TierStats};
pub use tier::{Lane, P1_DEBOUNCE, P2_DEBOUNCE, P3_DEBOUNCE, PerTier, Tier};
pub use version::VersionTracker;
