//! Spawning the analysis server process.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::path::PathBuf;
use std::pin::Pin;
use std::process::{ExitStatus, Stdio};

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::process::{Child, Command};

use crate::{Error, Result};

/// Readable process pipe.
pub type BoxedReader = Pin<Box<dyn AsyncRead + Send>>;
/// Writable process pipe.
pub type BoxedWriter = Pin<Box<dyn AsyncWrite + Send>>;

/// Everything needed to start one server process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchSpec {
	/// Resolved executable path.
	pub program: String,
	/// Full argument list.
	pub args: Vec<String>,
	/// Working directory.
	pub cwd: PathBuf,
	/// Extra environment variables.
	pub env: HashMap<String, String>,
}

/// How a process ended.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExitInfo {
	/// Exit code, when the process exited normally.
	pub code: Option<i32>,
	/// Terminating signal on unix.
	pub signal: Option<i32>,
}

impl ExitInfo {
	/// Returns `true` for a zero exit code.
	pub fn success(&self) -> bool {
		self.code == Some(0)
	}
}

impl From<ExitStatus> for ExitInfo {
	fn from(status: ExitStatus) -> Self {
		#[cfg(unix)]
		let signal = std::os::unix::process::ExitStatusExt::signal(&status);
		#[cfg(not(unix))]
		let signal = None;
		Self {
			code: status.code(),
			signal,
		}
	}
}

impl fmt::Display for ExitInfo {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match (self.code, self.signal) {
			(Some(code), _) => write!(f, "exit code {code}"),
			(None, Some(signal)) => write!(f, "signal {signal}"),
			(None, None) => f.write_str("unknown exit status"),
		}
	}
}

/// Handle on a running server process.
#[async_trait]
pub trait ChildProcess: Send {
	/// Requests termination without waiting for it.
	fn start_kill(&mut self) -> io::Result<()>;

	/// Waits for the process to exit.
	async fn wait(&mut self) -> io::Result<ExitInfo>;
}

#[async_trait]
impl ChildProcess for Child {
	fn start_kill(&mut self) -> io::Result<()> {
		Child::start_kill(self)
	}

	async fn wait(&mut self) -> io::Result<ExitInfo> {
		Child::wait(self).await.map(ExitInfo::from)
	}
}

/// A freshly spawned process with its pipes detached.
pub struct SpawnedProcess {
	/// OS process id, if known.
	pub pid: Option<u32>,
	/// Request channel.
	pub stdin: BoxedWriter,
	/// Packet channel.
	pub stdout: BoxedReader,
	/// Diagnostic text, when captured.
	pub stderr: Option<BoxedReader>,
	/// Lifecycle handle.
	pub child: Box<dyn ChildProcess>,
}

impl fmt::Debug for SpawnedProcess {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.debug_struct("SpawnedProcess")
			.field("pid", &self.pid)
			.field("stderr", &self.stderr.is_some())
			.finish_non_exhaustive()
	}
}

/// Starts server processes.
///
/// The session core never resolves executables itself; the launcher is handed a
/// complete [`LaunchSpec`].
#[async_trait]
pub trait ProcessLauncher: Send + Sync + 'static {
	/// Spawns the process described by `spec`.
	///
	/// # Errors
	///
	/// Returns [`Error::SpawnFailure`] when the process cannot be started or
	/// its pipes cannot be captured.
	async fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess>;
}

/// Launcher backed by [`tokio::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalLauncher;

#[async_trait]
impl ProcessLauncher for LocalLauncher {
	async fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
		let spawn_err = |reason: String| Error::SpawnFailure {
			program: spec.program.clone(),
			reason,
		};

		let mut cmd = Command::new(&spec.program);
		cmd.args(&spec.args)
			.envs(&spec.env)
			.current_dir(&spec.cwd)
			.stdin(Stdio::piped())
			.stdout(Stdio::piped())
			.stderr(Stdio::piped())
			.kill_on_drop(true);

		// Keep terminal signals aimed at the host away from the server.
		#[cfg(unix)]
		cmd.process_group(0);

		let mut child = cmd.spawn().map_err(|e| spawn_err(e.to_string()))?;

		let stdin = child
			.stdin
			.take()
			.ok_or_else(|| spawn_err("failed to capture stdin".into()))?;
		let stdout = child
			.stdout
			.take()
			.ok_or_else(|| spawn_err("failed to capture stdout".into()))?;
		let stderr = child.stderr.take();

		tracing::debug!(program = %spec.program, pid = ?child.id(), "spawned server process");

		Ok(SpawnedProcess {
			pid: child.id(),
			stdin: Box::pin(stdin),
			stdout: Box::pin(stdout),
			stderr: stderr.map(|s| Box::pin(s) as BoxedReader),
			child: Box::new(child),
		})
	}
}
