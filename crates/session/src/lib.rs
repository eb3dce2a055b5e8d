//! Session core for an OmniSharp analysis server.
//!
//! This crate sits between editor-facing feature providers and the external
//! server process. It serialises requests onto the process's stdin, correlates
//! responses by sequence id, republishes server-pushed events on a typed bus and
//! owns the process lifecycle (start, readiness, crash detection, restart).
//!
//! # Mental model
//!
//! - [`SessionManager`] is the single entry point. Construct it once and hand clones
//!   to every consumer; there is no global "current server".
//! - Each spawned process is one session with its own I/O task. The task owns the
//!   [`RequestQueue`], the [`Correlator`] pending table and the process pipes, so no
//!   locking is needed on the hot path.
//! - [`EventBus`] fans out [`ServerEvent`]s synchronously, in registration order, from
//!   the task that decoded the packet.
//!
//! # Key types
//!
//! | Type | Meaning |
//! |---|---|
//! | [`SessionManager`] | Lifecycle state machine and `make_request` API |
//! | [`SessionState`] | `Stopped` → `Starting` → `Started`, plus `Error` |
//! | [`RequestQueue`] | Two-class (high/normal) FIFO of requests not yet written |
//! | [`Correlator`] | Pending-request table keyed by sequence id |
//! | [`EventBus`] / [`Subscription`] | Typed multi-subscriber event dispatch |
//! | [`ProcessLauncher`] | Spawns the server; [`LocalLauncher`] uses `tokio::process` |
//! | [`TargetResolver`] | Discovers solutions/folders; [`FsTargetResolver`] walks the workspace |
//!
//! # Failure modes
//!
//! - Malformed output lines and orphan responses are logged and dropped.
//! - `Success: false` responses reject only the matching request.
//! - Process exit rejects every pending request with [`Error::SessionStopped`].

#![warn(missing_docs)]

use std::io;

pub use omni_protocol::JsonValue;

pub mod config;
pub mod correlator;
pub mod events;
pub mod launcher;
pub mod manager;
pub mod queue;
pub mod request;
pub mod session;
pub mod target;

#[cfg(test)]
mod testing;

pub use config::{ConfigError, ServerConfig};
pub use correlator::{Correlator, Resolution, SequenceCounter};
pub use events::{EventBus, EventKind, ServerEvent, Subscription};
pub use launcher::{ChildProcess, ExitInfo, LaunchSpec, LocalLauncher, ProcessLauncher, SpawnedProcess};
pub use manager::{AutoStartOutcome, SessionManager};
pub use queue::RequestQueue;
pub use request::{Priority, Request, RequestOptions};
pub use session::{SessionFailure, SessionId, SessionState};
pub use target::{FsTargetResolver, LaunchTarget, TargetKind, TargetResolver};

/// A convenient type alias for `Result` with `E` = [`enum@crate::Error`].
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Possible errors.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum Error {
	/// Request arguments could not be serialised. Nothing was sent.
	#[error("failed to encode arguments for {command}: {source}")]
	Encoding {
		/// Request command.
		command: String,
		/// Serialiser failure.
		#[source]
		source: serde_json::Error,
	},
	/// A successful response body did not match the expected type.
	#[error("failed to decode response for {command}: {source}")]
	Deserialize {
		/// Request command.
		command: String,
		/// Deserialiser failure.
		#[source]
		source: serde_json::Error,
	},
	/// The server replied with `Success: false`.
	#[error("{command} failed: {message}")]
	RequestFailed {
		/// Request command.
		command: String,
		/// Server-provided message.
		message: String,
	},
	/// The caller cancelled before a response arrived.
	#[error("{command} was cancelled")]
	Cancelled {
		/// Request command.
		command: String,
	},
	/// No response arrived within the request timeout.
	#[error("{command} timed out")]
	RequestTimeout {
		/// Request command.
		command: String,
	},
	/// The session was torn down (stop, restart or crash), or none is running.
	#[error("session stopped")]
	SessionStopped,
	/// The server process could not be launched.
	#[error("failed to spawn {program}: {reason}")]
	SpawnFailure {
		/// Executable that failed to launch.
		program: String,
		/// Launch failure.
		reason: String,
	},
	/// The process launched but never became ready.
	#[error("server failed to start: {0}")]
	StartFailed(SessionFailure),
	/// Restart was requested without any known target.
	#[error("no launch target")]
	NoLaunchTarget,
	/// `start` was called while a session is current.
	#[error("a session is already running")]
	AlreadyRunning,
	/// Input/output errors from the process pipes or workspace scan.
	#[error("{0}")]
	Io(#[from] io::Error),
	/// Configuration could not be loaded.
	#[error(transparent)]
	Config(#[from] ConfigError),
}
