//! One lifetime of the server process.
//!
//! A session is split into a cloneable [`SessionHandle`] and an I/O actor
//! ([`io::SessionIo`]) that owns the request queue, the pending table and the
//! process pipes. The handle talks to the actor over an unbounded channel.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;

use omni_protocol::{JsonValue, decode_stream};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;

use crate::correlator::{Correlator, ReplySender, SequenceCounter};
use crate::events::ServerEvent;
use crate::launcher::{ExitInfo, SpawnedProcess};
use crate::queue::RequestQueue;
use crate::request::{Request, RequestOptions};
use crate::target::LaunchTarget;
use crate::{Error, Result};

pub(crate) mod io;

use io::SessionIo;

/// Generation number of a session. Every spawn gets a new, larger id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}", self.0)
	}
}

/// Lifecycle state of the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
	/// No process is running.
	#[default]
	Stopped,
	/// Process spawned, readiness not yet signalled.
	Starting,
	/// Ready for requests.
	Started,
	/// The last start failed; waiting for a restart.
	Error,
}

impl fmt::Display for SessionState {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Stopped => "stopped",
			Self::Starting => "starting",
			Self::Started => "started",
			Self::Error => "error",
		})
	}
}

/// Why a session failed. Published as [`ServerEvent::ServerError`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionFailure {
	/// The process could not be launched.
	#[error("failed to spawn {program}: {reason}")]
	Spawn {
		/// Executable that failed.
		program: String,
		/// Launcher error.
		reason: String,
	},
	/// The process ended before signalling readiness.
	#[error("server exited before becoming ready ({status})")]
	ExitedBeforeReady {
		/// How the process ended.
		status: ExitInfo,
	},
	/// The process ended while serving requests.
	#[error("server exited unexpectedly ({status})")]
	Crashed {
		/// How the process ended.
		status: ExitInfo,
	},
	/// Readiness was not signalled in time.
	#[error("server did not become ready within {0:?}")]
	StartupTimeout(Duration),
}

/// Messages from handles to the I/O actor.
pub(crate) enum SessionCommand {
	/// Register and enqueue a request.
	Request { request: Request, reply: ReplySender },
	/// Drop the pending entry for `seq`; the caller has already given up.
	Cancel { seq: u64 },
	/// Kill the process, reject everything and acknowledge.
	Shutdown { done: oneshot::Sender<()> },
}

/// Callbacks from the I/O actor to whoever owns the session.
///
/// Invoked synchronously on the actor task; implementations must not block.
pub(crate) trait SessionObserver: Send + Sync {
	/// The readiness event arrived for the first time.
	fn on_ready(&self, id: SessionId);

	/// A wire event or stderr line was decoded.
	fn on_event(&self, id: SessionId, event: ServerEvent);

	/// The process went away without being asked to.
	fn on_exit(&self, id: SessionId, failure: SessionFailure);
}

/// State shared between a handle and its actor.
#[derive(Debug)]
pub(crate) struct SessionStatus {
	state: watch::Sender<SessionState>,
	failure: OnceLock<SessionFailure>,
}

impl SessionStatus {
	fn set_state(&self, state: SessionState) {
		self.state.send_replace(state);
	}

	fn fail(&self, failure: SessionFailure, state: SessionState) {
		let _ = self.failure.set(failure);
		self.set_state(state);
	}
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub(crate) struct SessionHandle {
	id: SessionId,
	target: LaunchTarget,
	pid: Option<u32>,
	commands: mpsc::UnboundedSender<SessionCommand>,
	seq: SequenceCounter,
	status: Arc<SessionStatus>,
}

impl fmt::Debug for SessionHandle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SessionHandle")
			.field("id", &self.id)
			.field("target", &self.target)
			.field("pid", &self.pid)
			.field("state", &self.state())
			.finish_non_exhaustive()
	}
}

impl SessionHandle {
	/// Wraps a spawned process. The returned actor must be spawned by the caller.
	pub(crate) fn new(
		id: SessionId,
		target: LaunchTarget,
		process: SpawnedProcess,
		observer: Weak<dyn SessionObserver>,
		stop_timeout: Duration,
	) -> (Self, SessionIo) {
		let (commands_tx, commands_rx) = mpsc::unbounded_channel();
		let (state, _) = watch::channel(SessionState::Starting);
		let status = Arc::new(SessionStatus {
			state,
			failure: OnceLock::new(),
		});

		let SpawnedProcess {
			pid,
			stdin,
			stdout,
			stderr,
			child,
		} = process;

		let io = SessionIo {
			id,
			commands: commands_rx,
			queue: RequestQueue::new(),
			correlator: Correlator::new(),
			stdin,
			stdout: decode_stream(stdout),
			stderr: stderr.map(|reader| BufReader::new(reader).lines()),
			child,
			status: Arc::clone(&status),
			observer,
			stop_timeout,
			ready: false,
		};

		let handle = Self {
			id,
			target,
			pid,
			commands: commands_tx,
			seq: SequenceCounter::new(),
			status,
		};
		(handle, io)
	}

	pub(crate) fn id(&self) -> SessionId {
		self.id
	}

	pub(crate) fn target(&self) -> &LaunchTarget {
		&self.target
	}

	pub(crate) fn pid(&self) -> Option<u32> {
		self.pid
	}

	pub(crate) fn state(&self) -> SessionState {
		*self.status.state.borrow()
	}

	pub(crate) fn failure(&self) -> Option<SessionFailure> {
		self.status.failure.get().cloned()
	}

	/// Waits until the session is `Started`.
	///
	/// Fails with [`Error::StartFailed`] when the process dies first, or with
	/// [`Error::SessionStopped`] when it is shut down before becoming ready.
	pub(crate) async fn wait_ready(&self) -> Result<()> {
		let mut state_rx = self.status.state.subscribe();
		loop {
			let state = *state_rx.borrow_and_update();
			match state {
				SessionState::Started => return Ok(()),
				SessionState::Error | SessionState::Stopped => {
					return Err(self.failure().map_or(Error::SessionStopped, Error::StartFailed));
				}
				SessionState::Starting => {
					if state_rx.changed().await.is_err() {
						return Err(Error::SessionStopped);
					}
				}
			}
		}
	}

	/// Submits a request and waits for its outcome.
	///
	/// `default_timeout` applies when `options.timeout` is unset; a zero duration
	/// disables the timeout.
	pub(crate) async fn request(
		&self,
		command: String,
		arguments: JsonValue,
		options: RequestOptions,
		default_timeout: Option<Duration>,
	) -> Result<JsonValue> {
		let seq = self.seq.next();
		let (reply, rx) = oneshot::channel();
		let request = Request::new(seq, command.clone(), arguments, options.priority);

		self.commands
			.send(SessionCommand::Request { request, reply })
			.map_err(|_| Error::SessionStopped)?;

		let timeout = options
			.timeout
			.or(default_timeout)
			.filter(|t| !t.is_zero());

		tokio::select! {
			biased;
			outcome = rx => outcome.map_err(|_| Error::SessionStopped)?,
			_ = cancelled(options.cancel.as_ref()) => {
				self.abandon(seq);
				tracing::debug!(session = %self.id, seq, command = %command, "request cancelled");
				Err(Error::Cancelled { command })
			}
			_ = expired(timeout) => {
				self.abandon(seq);
				tracing::warn!(session = %self.id, seq, command = %command, "request timed out");
				Err(Error::RequestTimeout { command })
			}
		}
	}

	fn abandon(&self, seq: u64) {
		let _ = self.commands.send(SessionCommand::Cancel { seq });
	}

	/// Stops the actor and waits until the process is gone and every pending
	/// request has been rejected. Returns immediately if the actor already exited.
	pub(crate) fn shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
		let (done, rx) = oneshot::channel();
		let sent = self.commands.send(SessionCommand::Shutdown { done }).is_ok();
		async move {
			if sent {
				let _ = rx.await;
			}
		}
	}
}

async fn cancelled(token: Option<&CancellationToken>) {
	match token {
		Some(token) => token.cancelled().await,
		None => std::future::pending().await,
	}
}

async fn expired(timeout: Option<Duration>) {
	match timeout {
		Some(timeout) => tokio::time::sleep(timeout).await,
		None => std::future::pending().await,
	}
}
