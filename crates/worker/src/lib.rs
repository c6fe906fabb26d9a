//! Worker runtime primitives shared by the layout pipeline.
//!
//! * [`TaskClass`] tags spawned work for observability.
//! * [`runtime_handle`], [`spawn_on`], [`spawn_named_thread`] route task and
//!   thread creation through one place.
//! * [`BackgroundDispatcher`] runs requests on a dedicated worker thread with
//!   message-passing semantics, per-request abort, and bulk termination.

mod class;
pub mod dispatcher;
mod error;
mod panic;
#[cfg(test)]
mod panic_tests;
mod spawn;

pub use class::TaskClass;
pub use dispatcher::{BackgroundDispatcher, BackgroundWorker, DispatcherConfig, PendingExecution, RequestId};
pub use error::DispatchError;
pub use panic::{join_error_panic_message, panic_payload_message};
pub use spawn::{runtime_handle, spawn_named_thread, spawn_on};
