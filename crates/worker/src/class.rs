/// Execution classes used to tag spawned work for scheduling and observability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskClass {
	/// Latency-sensitive work on the main runtime (debounce timers, viewport layout).
	Interactive,
	/// Deferrable async work awaiting an out-of-line result.
	Background,
	/// Work pinned to a dedicated OS thread.
	Dedicated,
}

impl TaskClass {
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Interactive => "interactive",
			Self::Background => "background",
			Self::Dedicated => "dedicated",
		}
	}
}
