use std::future::Future;
use std::sync::OnceLock;

use tokio::runtime::{Handle, Runtime};
use tokio::task::JoinHandle;

use crate::TaskClass;

static GLOBAL_RT: OnceLock<Runtime> = OnceLock::new();

/// Resolves the runtime that worker tasks are spawned onto.
///
/// Prefers the runtime the caller is already running inside. Outside of any
/// runtime a small shared multi-thread runtime is built on first use.
pub fn runtime_handle() -> std::io::Result<Handle> {
	if let Ok(handle) = Handle::try_current() {
		return Ok(handle);
	}
	if let Some(runtime) = GLOBAL_RT.get() {
		return Ok(runtime.handle().clone());
	}

	let runtime = tokio::runtime::Builder::new_multi_thread()
		.enable_all()
		.worker_threads(2)
		.thread_name("quire-worker-global")
		.build()?;
	// A concurrent initializer may win the race; its runtime is equally good.
	let _ = GLOBAL_RT.set(runtime);
	GLOBAL_RT
		.get()
		.map(|runtime| runtime.handle().clone())
		.ok_or_else(|| std::io::Error::other("global worker runtime unavailable"))
}

/// Spawns an async task on `handle`, tagged with `class`.
pub fn spawn_on<F>(handle: &Handle, class: TaskClass, fut: F) -> JoinHandle<F::Output>
where
	F: Future + Send + 'static,
	F::Output: Send + 'static,
{
	tracing::trace!(worker_class = class.as_str(), "worker.spawn");
	handle.spawn(fut)
}

/// Spawns a dedicated named OS thread, tagged with `class`.
pub fn spawn_named_thread<F, R>(class: TaskClass, name: impl Into<String>, f: F) -> std::io::Result<std::thread::JoinHandle<R>>
where
	F: FnOnce() -> R + Send + 'static,
	R: Send + 'static,
{
	let name = name.into();
	tracing::trace!(worker_class = class.as_str(), thread = %name, "worker.spawn_named_thread");
	std::thread::Builder::new().name(name).spawn(f)
}
