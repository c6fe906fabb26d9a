//! Out-of-line request/response execution.
//!
//! A [`BackgroundDispatcher`] owns one dedicated worker thread and talks to it
//! exclusively through messages: each request travels with a [`RequestId`] and
//! its own reply port and cancellation token. Nothing mutable is shared across
//! the boundary; the caller side tracks outstanding executions so they can be
//! aborted one at a time or force-settled wholesale by
//! [`BackgroundDispatcher::terminate`].
//!
//! A worker that panics is gone for good: the dispatcher notices on the next
//! call and reports itself uninitialized from then on, so callers can route
//! work elsewhere.

use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::mpsc::RecvTimeoutError;

use parking_lot::Mutex;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::{DispatchError, TaskClass, panic_payload_message, spawn_named_thread};

mod config;

pub use config::DispatcherConfig;

/// Work executed on the dispatcher's dedicated thread.
pub trait BackgroundWorker<Req, Resp>: Send + 'static {
	/// Runs once on the worker thread before any request is handled.
	fn start(&mut self) -> Result<(), String> {
		Ok(())
	}

	/// Handles one request. Blocking is expected here.
	///
	/// `cancel` fires when the caller gives up on the request. Long-running
	/// work should poll it and return early; the response is discarded anyway.
	fn handle(&mut self, request: Req, cancel: &CancellationToken) -> Resp;
}

impl<Req, Resp, W> BackgroundWorker<Req, Resp> for Box<W>
where
	W: BackgroundWorker<Req, Resp> + ?Sized,
{
	fn start(&mut self) -> Result<(), String> {
		(**self).start()
	}

	fn handle(&mut self, request: Req, cancel: &CancellationToken) -> Resp {
		(**self).handle(request, cancel)
	}
}

/// Identifier of one dispatched execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId(pub u64);

impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "req-{}", self.0)
	}
}

struct WorkerMsg<Req, Resp> {
	id: RequestId,
	request: Req,
	cancel: CancellationToken,
	reply: oneshot::Sender<Resp>,
}

/// Set once by the worker thread when it dies; holds the panic message.
type Crash = Arc<OnceLock<String>>;

struct Connection<Req, Resp> {
	tx: mpsc::Sender<WorkerMsg<Req, Resp>>,
	crash: Crash,
	// Dropping the handle detaches the thread; it exits once `tx` is gone.
	_thread: std::thread::JoinHandle<()>,
}

enum Lifecycle<Req, Resp> {
	Idle(Box<dyn BackgroundWorker<Req, Resp>>),
	/// `initialize` is waiting for the startup handshake.
	Starting,
	Ready(Connection<Req, Resp>),
	Failed(DispatchError),
	Terminated,
}

impl<Req, Resp> Lifecycle<Req, Resp> {
	/// Demotes `Ready` to `Failed` once the worker thread has died.
	fn reap(&mut self) {
		let crashed = match self {
			Self::Ready(conn) => conn.crash.get().cloned(),
			Self::Idle(_) | Self::Starting | Self::Failed(_) | Self::Terminated => None,
		};
		if let Some(msg) = crashed {
			tracing::warn!(panic = %msg, "background worker is gone; dispatcher unavailable");
			*self = Self::Failed(DispatchError::Crashed(msg));
		}
	}
}

type Inflight = Arc<Mutex<HashMap<RequestId, CancellationToken>>>;

/// Uniform request/response contract over a dedicated worker thread.
pub struct BackgroundDispatcher<Req, Resp> {
	config: DispatcherConfig,
	lifecycle: Mutex<Lifecycle<Req, Resp>>,
	inflight: Inflight,
	pending: Arc<AtomicUsize>,
	next_id: AtomicU64,
	shutdown: CancellationToken,
}

impl<Req, Resp> BackgroundDispatcher<Req, Resp> {
	/// Creates a dispatcher around `worker`. Nothing runs until [`Self::initialize`].
	pub fn new(worker: impl BackgroundWorker<Req, Resp>, config: DispatcherConfig) -> Self {
		Self {
			config,
			lifecycle: Mutex::new(Lifecycle::Idle(Box::new(worker))),
			inflight: Arc::default(),
			pending: Arc::default(),
			next_id: AtomicU64::new(0),
			shutdown: CancellationToken::new(),
		}
	}
}

impl<Req, Resp> BackgroundDispatcher<Req, Resp>
where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	/// Starts the worker thread and waits for its startup handshake.
	///
	/// Blocks the calling thread for up to `startup_timeout`. The lifecycle
	/// lock is not held meanwhile: concurrent callers see the dispatcher as
	/// not initialized until the handshake lands.
	///
	/// Idempotent: once ready, later calls return `Ok(())`. A failed start is
	/// remembered and returned again; the dispatcher then keeps reporting
	/// [`DispatchError::NotInitialized`] from [`Self::execute`].
	pub fn initialize(&self) -> Result<(), DispatchError> {
		let worker = {
			let mut lifecycle = self.lifecycle.lock();
			lifecycle.reap();
			match std::mem::replace(&mut *lifecycle, Lifecycle::Starting) {
				Lifecycle::Idle(worker) => worker,
				Lifecycle::Starting => return Err(DispatchError::NotInitialized),
				Lifecycle::Ready(conn) => {
					*lifecycle = Lifecycle::Ready(conn);
					return Ok(());
				}
				Lifecycle::Failed(err) => {
					*lifecycle = Lifecycle::Failed(err.clone());
					return Err(err);
				}
				Lifecycle::Terminated => {
					*lifecycle = Lifecycle::Terminated;
					return Err(DispatchError::Terminated);
				}
			}
		};

		let started = self.start_worker(worker);
		let mut lifecycle = self.lifecycle.lock();
		if matches!(&*lifecycle, Lifecycle::Terminated) {
			// Terminated mid-handshake; dropping the connection lets the thread exit.
			tracing::debug!(thread = %self.config.thread_name, "worker.initialize.terminated");
			return Err(DispatchError::Terminated);
		}
		match started {
			Ok(conn) => {
				tracing::debug!(thread = %self.config.thread_name, capacity = self.config.capacity, "worker.initialize");
				*lifecycle = Lifecycle::Ready(conn);
				Ok(())
			}
			Err(err) => {
				tracing::warn!(thread = %self.config.thread_name, error = %err, "background worker failed to initialize");
				*lifecycle = Lifecycle::Failed(err.clone());
				Err(err)
			}
		}
	}

	fn start_worker(&self, worker: Box<dyn BackgroundWorker<Req, Resp>>) -> Result<Connection<Req, Resp>, DispatchError> {
		let (tx, rx) = mpsc::channel(self.config.capacity.max(1));
		let (ready_tx, ready_rx) = std::sync::mpsc::sync_channel(1);
		let crash = Crash::default();
		let worker_crash = Arc::clone(&crash);
		let thread = spawn_named_thread(TaskClass::Dedicated, self.config.thread_name.clone(), move || {
			run_worker(worker, rx, ready_tx, &worker_crash)
		})
		.map_err(|e| DispatchError::Spawn(e.to_string()))?;

		match ready_rx.recv_timeout(self.config.startup_timeout) {
			Ok(Ok(())) => Ok(Connection {
				tx,
				crash,
				_thread: thread,
			}),
			Ok(Err(msg)) => Err(DispatchError::InitFailed(msg)),
			Err(RecvTimeoutError::Timeout) => Err(DispatchError::InitFailed(format!(
				"worker did not start within {:?}",
				self.config.startup_timeout
			))),
			Err(RecvTimeoutError::Disconnected) => Err(DispatchError::InitFailed("worker exited during startup".to_owned())),
		}
	}
}

impl<Req, Resp> BackgroundDispatcher<Req, Resp> {
	/// Returns true while the worker thread is up and accepting requests.
	pub fn is_initialized(&self) -> bool {
		let mut lifecycle = self.lifecycle.lock();
		lifecycle.reap();
		matches!(&*lifecycle, Lifecycle::Ready(_))
	}

	/// Number of executions dispatched but not yet settled.
	pub fn pending_count(&self) -> usize {
		self.pending.load(Ordering::Acquire)
	}

	/// Queues `request` for the worker and returns a handle to its eventual response.
	///
	/// Fails fast, without reaching the worker, when `cancel` is already cancelled.
	/// The worker sees a child of `cancel`, which [`Self::abort`] also fires.
	pub fn submit(&self, request: Req, cancel: Option<&CancellationToken>) -> Result<PendingExecution<Resp>, DispatchError> {
		let tx = {
			let mut lifecycle = self.lifecycle.lock();
			lifecycle.reap();
			match &*lifecycle {
				Lifecycle::Ready(conn) => conn.tx.clone(),
				Lifecycle::Idle(_) | Lifecycle::Starting | Lifecycle::Failed(_) => return Err(DispatchError::NotInitialized),
				Lifecycle::Terminated => return Err(DispatchError::Terminated),
			}
		};
		if cancel.is_some_and(CancellationToken::is_cancelled) {
			tracing::trace!("worker.dispatch.precancelled");
			return Err(DispatchError::Aborted);
		}

		let id = RequestId(self.next_id.fetch_add(1, Ordering::Relaxed));
		let token = cancel.map_or_else(CancellationToken::new, CancellationToken::child_token);
		let guard = PendingGuard::register(id, token.clone(), &self.inflight, &self.pending);
		let (reply, response) = oneshot::channel();

		let msg = WorkerMsg {
			id,
			request,
			cancel: token.clone(),
			reply,
		};
		match tx.try_send(msg) {
			Ok(()) => {}
			Err(TrySendError::Full(_)) => {
				return Err(DispatchError::Saturated {
					capacity: self.config.capacity,
				});
			}
			Err(TrySendError::Closed(_)) => {
				return Err(if self.shutdown.is_cancelled() {
					DispatchError::Terminated
				} else {
					DispatchError::Disconnected
				});
			}
		}

		tracing::trace!(request_id = %id, pending = self.pending_count(), "worker.dispatch");
		Ok(PendingExecution {
			id,
			response,
			token,
			shutdown: self.shutdown.clone(),
			guard,
		})
	}

	/// Dispatches `request` and waits for its response.
	pub async fn execute(&self, request: Req, cancel: Option<&CancellationToken>) -> Result<Resp, DispatchError> {
		self.submit(request, cancel)?.wait().await
	}

	/// Aborts one outstanding execution. Returns false if `id` already settled.
	pub fn abort(&self, id: RequestId) -> bool {
		match self.inflight.lock().get(&id) {
			Some(token) => {
				token.cancel();
				tracing::debug!(request_id = %id, "worker.abort");
				true
			}
			None => false,
		}
	}

	/// Tears down the worker context.
	///
	/// Every outstanding execution settles with [`DispatchError::Terminated`]
	/// and has its worker-side token cancelled. A request the worker is
	/// currently handling keeps the detached thread busy until it returns,
	/// but its response is discarded.
	pub fn terminate(&self) {
		let previous = std::mem::replace(&mut *self.lifecycle.lock(), Lifecycle::Terminated);
		self.shutdown.cancel();
		for token in self.inflight.lock().values() {
			token.cancel();
		}
		match previous {
			Lifecycle::Ready(conn) => {
				tracing::debug!(pending = self.pending_count(), "worker.terminate");
				drop(conn);
			}
			Lifecycle::Idle(_) | Lifecycle::Starting | Lifecycle::Failed(_) | Lifecycle::Terminated => {
				tracing::trace!("worker.terminate.inactive");
			}
		}
	}
}

impl<Req, Resp> Drop for BackgroundDispatcher<Req, Resp> {
	fn drop(&mut self) {
		self.shutdown.cancel();
	}
}

fn run_worker<Req, Resp>(
	mut worker: Box<dyn BackgroundWorker<Req, Resp>>,
	mut rx: mpsc::Receiver<WorkerMsg<Req, Resp>>,
	ready: std::sync::mpsc::SyncSender<Result<(), String>>,
	crash: &OnceLock<String>,
) where
	Req: Send + 'static,
	Resp: Send + 'static,
{
	let started = std::panic::catch_unwind(AssertUnwindSafe(|| worker.start()))
		.unwrap_or_else(|payload| Err(format!("start panicked: {}", panic_payload_message(payload.as_ref()))));
	let ok = started.is_ok();
	let _ = ready.send(started);
	if !ok {
		return;
	}

	while let Some(WorkerMsg { id, request, cancel, reply }) = rx.blocking_recv() {
		if reply.is_closed() || cancel.is_cancelled() {
			tracing::trace!(request_id = %id, "worker.skip_abandoned");
			continue;
		}
		match std::panic::catch_unwind(AssertUnwindSafe(|| worker.handle(request, &cancel))) {
			Ok(response) => {
				if reply.send(response).is_err() {
					tracing::trace!(request_id = %id, "worker.reply_dropped");
				}
			}
			Err(payload) => {
				let msg = panic_payload_message(payload.as_ref());
				tracing::error!(request_id = %id, panic = %msg, "background worker panicked");
				// Published before `reply` drops, so the caller that sees
				// `Disconnected` also sees the dispatcher as unavailable.
				let _ = crash.set(msg);
				return;
			}
		}
	}
	tracing::debug!("worker.exit");
}

struct PendingGuard {
	id: RequestId,
	inflight: Inflight,
	pending: Arc<AtomicUsize>,
}

impl PendingGuard {
	fn register(id: RequestId, token: CancellationToken, inflight: &Inflight, pending: &Arc<AtomicUsize>) -> Self {
		inflight.lock().insert(id, token);
		pending.fetch_add(1, Ordering::AcqRel);
		Self {
			id,
			inflight: Arc::clone(inflight),
			pending: Arc::clone(pending),
		}
	}
}

impl Drop for PendingGuard {
	fn drop(&mut self) {
		// Tells the worker to stop if the execution was abandoned mid-flight.
		if let Some(token) = self.inflight.lock().remove(&self.id) {
			token.cancel();
		}
		self.pending.fetch_sub(1, Ordering::AcqRel);
	}
}

/// One dispatched execution awaiting its response.
///
/// Dropping it unsettled counts as settlement and cancels the worker-side
/// token: the worker skips the request if it has not started yet.
pub struct PendingExecution<Resp> {
	id: RequestId,
	response: oneshot::Receiver<Resp>,
	token: CancellationToken,
	shutdown: CancellationToken,
	guard: PendingGuard,
}

impl<Resp> PendingExecution<Resp> {
	pub fn id(&self) -> RequestId {
		self.id
	}

	/// Waits for the response, an abort, or dispatcher teardown, whichever comes first.
	pub async fn wait(self) -> Result<Resp, DispatchError> {
		let Self {
			id,
			response,
			token,
			shutdown,
			guard,
		} = self;

		let outcome = tokio::select! {
			biased;
			_ = shutdown.cancelled() => Err(DispatchError::Terminated),
			_ = token.cancelled() => Err(DispatchError::Aborted),
			reply = response => reply.map_err(|_| {
				if shutdown.is_cancelled() {
					DispatchError::Terminated
				} else {
					DispatchError::Disconnected
				}
			}),
		};
		drop(guard);
		if let Err(err) = &outcome {
			tracing::trace!(request_id = %id, error = %err, "worker.settle");
		}
		outcome
	}
}
