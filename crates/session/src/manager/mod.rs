//! Session manager: lifecycle state machine and request entry point.
//!
//! # Purpose
//!
//! - Own the analysis-server process lifecycle: spawn for a launch target, detect readiness, detect crashes, restart.
//! - Expose the single `make_request` API used by feature providers.
//! - Publish server-pushed and lifecycle events on one [`EventBus`].
//!
//! # Mental model
//!
//! - [`SessionManager`] is constructed once and cloned into every consumer. It holds at most one *current* session.
//! - Each session is a [`SessionHandle`] plus an I/O actor task (`session::io`) that owns the request queue, the pending table and the process pipes.
//! - The actor reports back through [`SessionObserver`]; the manager checks the [`SessionId`] on every callback and ignores sessions that are no longer current.
//!
//! # Key types
//!
//! | Type | Meaning | Constraints | Constructed / mutated in |
//! |---|---|---|---|
//! | [`SessionManager`] | Public API, cheap to clone | Lifecycle transitions serialise on one async lock | [`SessionManager::new`], [`SessionManager::with_collaborators`] |
//! | [`SessionState`] | Manager-level lifecycle state | Published on a `watch` channel | `Shared::set_state` |
//! | [`SessionId`] | Session generation | Strictly increasing per spawn | [`SessionManager::start`] |
//! | [`SessionHandle`] | Handle to one session's actor | Installed as current before its actor runs | `SessionHandle::new` |
//! | [`AutoStartOutcome`] | Result of workspace discovery | Multiple targets never start anything implicitly | [`SessionManager::auto_start`] |
//!
//! # Invariants
//!
//! - Must reject every pending request when a session ends, whatever the cause.
//! - Must not let two sessions be current at once; restart stops before it starts.
//! - Must drop callbacks from sessions that are no longer current.
//! - Must tolerate responses with no pending entry.
//! - Must keep decoding after a malformed line.
//! - Must deliver each event to every matching subscriber, in registration order.
//! - Must write high-priority requests before queued normal ones.
//!
//! # Data flow
//!
//! - A provider calls [`SessionManager::make_request`]; the payload is serialised and handed to the current [`SessionHandle`].
//! - The handle allocates a sequence number and sends the request to the actor, which registers it in the [`crate::Correlator`] and enqueues it in the [`crate::RequestQueue`].
//! - Once ready, the actor drains the queue in priority order and writes one JSON line per request to stdin.
//! - Stdout lines are decoded by [`omni_protocol::PacketCodec`]:
//!   - Responses resolve the matching pending entry; unknown sequence numbers are logged and dropped.
//!   - Events become [`ServerEvent`]s and reach the manager through [`SessionObserver::on_event`], which forwards current-generation events to the [`EventBus`].
//!   - Malformed lines are reported as [`ServerEvent::MalformedPacket`] and decoding continues.
//! - Stderr lines are published as [`ServerEvent::StderrLine`].
//!
//! # Lifecycle
//!
//! - `Stopped` → [`SessionManager::start`] → `Starting`; `BeforeServerStart` is emitted before the spawn.
//! - `Starting` → readiness event → `Started`; `ServerStart` is emitted.
//! - `Starting` → spawn failure, early exit or startup timeout → `Error`; `ServerError` is emitted and `start` fails.
//! - `Started` → unexpected exit → `Stopped`; `ServerError` then `ServerStop` are emitted.
//! - any → [`SessionManager::stop`] → `Stopped`; `ServerStop` is emitted unless already stopped.
//!
//! # Concurrency and ordering
//!
//! - `start`, `restart` and `auto_start` hold the transition lock for their whole duration; `stop` does not, so it can interrupt a start that is spawning or waiting for readiness.
//! - A stop that lands while the launcher is still spawning bumps the stop epoch; the start notices after the spawn, kills the new process and fails with [`Error::SessionStopped`].
//! - Observer callbacks run on the session's actor task and must not block; event handlers run there too.
//!
//! # Failure modes and recovery
//!
//! - Spawn failure: state `Error`, `ServerError(Spawn)`; recover with `restart`.
//! - Crash: pending requests fail with [`Error::SessionStopped`]; recover with `restart`.
//! - Startup timeout: the process is killed; recover with `restart`.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tokio::sync::watch;

use crate::config::ServerConfig;
use crate::events::{EventBus, EventKind, ServerEvent, Subscription};
use crate::launcher::{LocalLauncher, ProcessLauncher};
use crate::request::RequestOptions;
use crate::session::{SessionFailure, SessionHandle, SessionId, SessionObserver, SessionState};
use crate::target::{FsTargetResolver, LaunchTarget, TargetResolver};
use crate::{Error, JsonValue, Result};

#[cfg(test)]
mod invariants;

/// What [`SessionManager::auto_start`] did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AutoStartOutcome {
	/// A session was started for this target.
	Started(LaunchTarget),
	/// Several candidates and none preferred; `MultipleLaunchTargets` was emitted.
	MultipleTargets(Vec<LaunchTarget>),
	/// The workspace holds nothing to launch.
	NoTargets,
}

struct Shared {
	config: ServerConfig,
	launcher: Arc<dyn ProcessLauncher>,
	resolver: Arc<dyn TargetResolver>,
	events: EventBus,
	state: watch::Sender<SessionState>,
	current: Mutex<Option<SessionHandle>>,
	last_target: Mutex<Option<LaunchTarget>>,
	next_session: AtomicU64,
	/// Bumped by every `stop`, under the `current` lock.
	stop_epoch: AtomicU64,
	transition: tokio::sync::Mutex<()>,
}

impl Shared {
	fn set_state(&self, state: SessionState) {
		let prev = self.state.send_replace(state);
		if prev != state {
			tracing::debug!(from = %prev, to = %state, "session state changed");
		}
	}

	fn current(&self) -> Option<SessionHandle> {
		self.current.lock().clone()
	}

	fn is_current(&self, id: SessionId) -> bool {
		self.current.lock().as_ref().is_some_and(|handle| handle.id() == id)
	}

	/// Removes the current session if it is `id`.
	fn take_if_current(&self, id: SessionId) -> Option<SessionHandle> {
		let mut current = self.current.lock();
		if current.as_ref().is_some_and(|handle| handle.id() == id) {
			current.take()
		} else {
			None
		}
	}
}

impl SessionObserver for Shared {
	fn on_ready(&self, id: SessionId) {
		let Some(target) = self
			.current
			.lock()
			.as_ref()
			.filter(|handle| handle.id() == id)
			.map(|handle| handle.target().clone())
		else {
			tracing::debug!(session = %id, "ignoring readiness of stale session");
			return;
		};
		self.set_state(SessionState::Started);
		self.events.emit(&ServerEvent::ServerStart(target));
	}

	fn on_event(&self, id: SessionId, event: ServerEvent) {
		if !self.is_current(id) {
			tracing::trace!(session = %id, kind = %event.kind(), "dropping event from stale session");
			return;
		}
		self.events.emit(&event);
	}

	fn on_exit(&self, id: SessionId, failure: SessionFailure) {
		if self.take_if_current(id).is_none() {
			tracing::debug!(session = %id, %failure, "ignoring exit of stale session");
			return;
		}
		match failure {
			SessionFailure::Crashed { .. } => {
				self.set_state(SessionState::Stopped);
				self.events.emit(&ServerEvent::ServerError(failure));
				self.events.emit(&ServerEvent::ServerStop);
			}
			_ => {
				self.set_state(SessionState::Error);
				self.events.emit(&ServerEvent::ServerError(failure));
			}
		}
	}
}

/// Entry point for feature providers and the editor surface.
///
/// Cloning is cheap; all clones share one session.
#[derive(Clone)]
pub struct SessionManager {
	shared: Arc<Shared>,
}

impl std::fmt::Debug for SessionManager {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("SessionManager")
			.field("state", &self.state())
			.field("current", &self.shared.current())
			.finish_non_exhaustive()
	}
}

impl SessionManager {
	/// Creates a manager that spawns local processes and scans the file system.
	pub fn new(config: ServerConfig) -> Self {
		let resolver = FsTargetResolver::new(config.target_search_depth);
		Self::with_collaborators(config, Arc::new(LocalLauncher), Arc::new(resolver))
	}

	/// Creates a manager with explicit launcher and resolver.
	pub fn with_collaborators(
		config: ServerConfig,
		launcher: Arc<dyn ProcessLauncher>,
		resolver: Arc<dyn TargetResolver>,
	) -> Self {
		let (state, _) = watch::channel(SessionState::Stopped);
		Self {
			shared: Arc::new(Shared {
				config,
				launcher,
				resolver,
				events: EventBus::new(),
				state,
				current: Mutex::new(None),
				last_target: Mutex::new(None),
				next_session: AtomicU64::new(1),
				stop_epoch: AtomicU64::new(0),
				transition: tokio::sync::Mutex::new(()),
			}),
		}
	}

	/// Active configuration.
	pub fn config(&self) -> &ServerConfig {
		&self.shared.config
	}

	/// The event bus shared by wire and lifecycle events.
	pub fn events(&self) -> &EventBus {
		&self.shared.events
	}

	/// Shorthand for `self.events().subscribe(kind, handler)`.
	pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
	where
		F: Fn(&ServerEvent) + Send + Sync + 'static,
	{
		self.shared.events.subscribe(kind, handler)
	}

	/// Current lifecycle state.
	pub fn state(&self) -> SessionState {
		*self.shared.state.borrow()
	}

	/// Subscribe to lifecycle state changes.
	pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
		self.shared.state.subscribe()
	}

	/// Returns `true` when a session is ready for requests.
	pub fn is_running(&self) -> bool {
		self.state() == SessionState::Started
	}

	/// Target of the current or most recent session.
	pub fn current_target(&self) -> Option<LaunchTarget> {
		self.shared.last_target.lock().clone()
	}

	/// Generation of the current session, if any.
	pub fn session_id(&self) -> Option<SessionId> {
		self.shared.current().map(|handle| handle.id())
	}

	/// OS process id of the current session's server, if known.
	pub fn server_pid(&self) -> Option<u32> {
		self.shared.current().and_then(|handle| handle.pid())
	}

	/// Sends `command` with serialised `payload` and decodes the response body.
	///
	/// Requests submitted while the session is starting wait for readiness.
	///
	/// # Errors
	///
	/// - [`Error::Encoding`] when `payload` cannot be serialised; nothing is sent.
	/// - [`Error::RequestFailed`] when the server answers `Success: false`.
	/// - [`Error::Cancelled`] / [`Error::RequestTimeout`] when the caller gives up.
	/// - [`Error::SessionStopped`] when no session is running or it ends first.
	/// - [`Error::Deserialize`] when the body does not match `R`.
	pub async fn make_request<P, R>(&self, command: &str, payload: &P, options: RequestOptions) -> Result<R>
	where
		P: Serialize + ?Sized,
		R: DeserializeOwned,
	{
		let arguments = serde_json::to_value(payload).map_err(|source| Error::Encoding {
			command: command.to_owned(),
			source,
		})?;
		let body = self.request_value(command, arguments, options).await?;
		serde_json::from_value(body).map_err(|source| Error::Deserialize {
			command: command.to_owned(),
			source,
		})
	}

	/// Untyped form of [`make_request`](Self::make_request).
	pub async fn request_value(&self, command: &str, arguments: JsonValue, options: RequestOptions) -> Result<JsonValue> {
		let handle = self.shared.current().ok_or(Error::SessionStopped)?;
		handle
			.request(command.to_owned(), arguments, options, self.shared.config.request_timeout())
			.await
	}

	/// Spawns a session for `target` and waits for readiness.
	///
	/// # Errors
	///
	/// - [`Error::AlreadyRunning`] when a session is current.
	/// - [`Error::SpawnFailure`] when the process cannot be launched.
	/// - [`Error::StartFailed`] when it exits or times out before readiness.
	/// - [`Error::SessionStopped`] when [`stop`](Self::stop) interrupts the start.
	pub async fn start(&self, target: LaunchTarget) -> Result<()> {
		let _transition = self.shared.transition.lock().await;
		self.start_locked(target).await
	}

	async fn start_locked(&self, target: LaunchTarget) -> Result<()> {
		let shared = &self.shared;
		if shared.current.lock().is_some() {
			return Err(Error::AlreadyRunning);
		}

		*shared.last_target.lock() = Some(target.clone());
		shared.set_state(SessionState::Starting);
		shared.events.emit(&ServerEvent::BeforeServerStart(target.clone()));

		let spec = shared.config.launch_spec(&target, std::process::id());
		tracing::info!(target = %target, program = %spec.program, "starting server");
		let epoch = shared.stop_epoch.load(Ordering::Acquire);

		let process = match shared.launcher.spawn(&spec).await {
			Ok(process) => process,
			Err(error) => {
				let failure = SessionFailure::Spawn {
					program: spec.program.clone(),
					reason: match &error {
						Error::SpawnFailure { reason, .. } => reason.clone(),
						other => other.to_string(),
					},
				};
				tracing::error!(%failure, "server spawn failed");
				shared.set_state(SessionState::Error);
				shared.events.emit(&ServerEvent::ServerError(failure));
				return Err(error);
			}
		};

		let id = SessionId(shared.next_session.fetch_add(1, Ordering::Relaxed));
		let observer: Weak<Shared> = Arc::downgrade(&self.shared);
		let (handle, io) = SessionHandle::new(id, target, process, observer, shared.config.stop_timeout());
		let installed = {
			let mut current = shared.current.lock();
			let stopped = shared.stop_epoch.load(Ordering::Acquire) != epoch;
			if !stopped {
				*current = Some(handle.clone());
			}
			!stopped
		};
		tokio::spawn(io.run());
		if !installed {
			tracing::info!(session = %id, "stop requested during spawn; killing server");
			handle.shutdown().await;
			return Err(Error::SessionStopped);
		}

		let ready = match shared.config.startup_timeout_duration() {
			Some(limit) => match tokio::time::timeout(limit, handle.wait_ready()).await {
				Ok(ready) => ready,
				Err(_) => {
					let failure = SessionFailure::StartupTimeout(limit);
					if shared.take_if_current(id).is_none() {
						// An exit or stop already claimed the session; report its outcome.
						return Err(handle.wait_ready().await.err().unwrap_or(Error::SessionStopped));
					}
					tracing::error!(session = %id, %failure, "server startup timed out");
					handle.shutdown().await;
					shared.set_state(SessionState::Error);
					shared.events.emit(&ServerEvent::ServerError(failure.clone()));
					return Err(Error::StartFailed(failure));
				}
			},
			None => handle.wait_ready().await,
		};

		if ready.is_ok() {
			tracing::info!(session = %id, pid = ?handle.pid(), "server started");
		}
		ready
	}

	/// Stops the current session, rejecting all of its pending requests.
	///
	/// Idempotent: a no-op when already stopped.
	pub async fn stop(&self) {
		let shared = &self.shared;
		let current = {
			let mut current = shared.current.lock();
			shared.stop_epoch.fetch_add(1, Ordering::AcqRel);
			current.take()
		};
		match current {
			Some(handle) => {
				tracing::info!(session = %handle.id(), "stopping server");
				handle.shutdown().await;
			}
			None if self.state() == SessionState::Stopped => return,
			None => {}
		}
		shared.set_state(SessionState::Stopped);
		shared.events.emit(&ServerEvent::ServerStop);
	}

	/// Stops the current session, then starts one for `target`, or for the
	/// previous target when `None`.
	///
	/// The old session is fully torn down before the new process is spawned.
	///
	/// # Errors
	///
	/// [`Error::NoLaunchTarget`] when no target is given and none was used
	/// before; otherwise as [`start`](Self::start).
	pub async fn restart(&self, target: Option<LaunchTarget>) -> Result<()> {
		let _transition = self.shared.transition.lock().await;
		let target = target
			.or_else(|| self.current_target())
			.ok_or(Error::NoLaunchTarget)?;
		self.stop().await;
		self.start_locked(target).await
	}

	/// Discovers targets under the configured workspace and starts one when the
	/// choice is unambiguous.
	///
	/// With several candidates, `last_target` wins if it is among them;
	/// otherwise `MultipleLaunchTargets` is emitted and nothing starts.
	pub async fn auto_start(&self, last_target: Option<&Path>) -> Result<AutoStartOutcome> {
		let root = &self.shared.config.workspace_root;
		let mut targets = self.shared.resolver.resolve(root).await?;
		tracing::debug!(root = %root.display(), count = targets.len(), "auto-start candidates");

		let chosen = match targets.len() {
			0 => {
				tracing::info!(root = %root.display(), "no launch targets found");
				return Ok(AutoStartOutcome::NoTargets);
			}
			1 => targets.pop(),
			_ => last_target.and_then(|last| targets.iter().find(|t| t.path == last).cloned()),
		};

		match chosen {
			Some(target) => {
				self.restart(Some(target.clone())).await?;
				Ok(AutoStartOutcome::Started(target))
			}
			None => {
				self.shared
					.events
					.emit(&ServerEvent::MultipleLaunchTargets(targets.clone()));
				Ok(AutoStartOutcome::MultipleTargets(targets))
			}
		}
	}
}
