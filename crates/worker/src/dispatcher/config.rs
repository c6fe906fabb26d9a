use std::time::Duration;

/// Plumbing knobs for the background worker context.
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
	/// Bound on requests queued for the worker thread.
	pub capacity: usize,
	/// Name given to the dedicated worker thread.
	pub thread_name: String,
	/// How long `initialize()` waits for the worker's startup handshake.
	pub startup_timeout: Duration,
}

impl Default for DispatcherConfig {
	fn default() -> Self {
		Self {
			capacity: 16,
			thread_name: "quire-layout-worker".to_owned(),
			startup_timeout: Duration::from_secs(2),
		}
	}
}
