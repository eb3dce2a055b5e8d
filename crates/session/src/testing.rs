//! In-memory server process for tests.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use omni_protocol::{EventPacket, JsonValue, Packet, RequestPacket, ResponsePacket};
use parking_lot::Mutex;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines};
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::events::ServerEvent;
use crate::launcher::{ChildProcess, ExitInfo, LaunchSpec, ProcessLauncher, SpawnedProcess};
use crate::session::{SessionFailure, SessionId, SessionObserver};
use crate::target::{LaunchTarget, TargetResolver};
use crate::{Error, Result};

const PIPE_CAPACITY: usize = 64 * 1024;

/// Server side of a fake process.
pub(crate) struct FakeServer {
	pub(crate) spec: LaunchSpec,
	requests: Lines<BufReader<DuplexStream>>,
	stdout: Option<DuplexStream>,
	stderr: Option<DuplexStream>,
	exit: Option<oneshot::Sender<ExitInfo>>,
	killed: CancellationToken,
}

impl FakeServer {
	/// Reads the next request line the client wrote.
	pub(crate) async fn next_request(&mut self) -> RequestPacket {
		let line = self
			.requests
			.next_line()
			.await
			.expect("read client stdin")
			.expect("client stdin closed");
		let value: JsonValue = serde_json::from_str(&line).expect("request is JSON");
		assert_eq!(value["Type"], "request", "unexpected frame: {line}");
		serde_json::from_value(value).expect("request shape")
	}

	pub(crate) async fn send(&mut self, packet: Packet) {
		let line = packet.to_line().expect("encode packet");
		self.write_raw(&line).await;
	}

	pub(crate) async fn write_raw(&mut self, bytes: &[u8]) {
		let stdout = self.stdout.as_mut().expect("stdout already closed");
		stdout.write_all(bytes).await.expect("write client stdout");
		stdout.flush().await.expect("flush client stdout");
	}

	pub(crate) async fn respond(&mut self, seq: u64, body: JsonValue) {
		self.send(Packet::Response(ResponsePacket {
			request_seq: seq,
			command: String::new(),
			success: true,
			body: Some(body),
			message: None,
		}))
		.await;
	}

	pub(crate) async fn fail(&mut self, seq: u64, message: &str) {
		self.send(Packet::Response(ResponsePacket {
			request_seq: seq,
			command: String::new(),
			success: false,
			body: None,
			message: Some(message.into()),
		}))
		.await;
	}

	pub(crate) async fn event(&mut self, event: &str, body: JsonValue) {
		self.send(Packet::Event(EventPacket {
			event: event.into(),
			body,
		}))
		.await;
	}

	/// Sends the readiness event.
	pub(crate) async fn ready(&mut self) {
		self.event("started", JsonValue::Null).await;
	}

	pub(crate) async fn stderr_line(&mut self, line: &str) {
		let stderr = self.stderr.as_mut().expect("stderr already closed");
		stderr.write_all(format!("{line}\n").as_bytes()).await.expect("write stderr");
		stderr.flush().await.expect("flush stderr");
	}

	/// Closes stdout and stderr and reports `code` as the exit status.
	pub(crate) fn exit(&mut self, code: i32) {
		self.stdout = None;
		self.stderr = None;
		if let Some(exit) = self.exit.take() {
			let _ = exit.send(ExitInfo {
				code: Some(code),
				signal: None,
			});
		}
	}

	pub(crate) fn is_killed(&self) -> bool {
		self.killed.is_cancelled()
	}
}

struct FakeChild {
	exit: Option<oneshot::Receiver<ExitInfo>>,
	killed: CancellationToken,
}

#[async_trait]
impl ChildProcess for FakeChild {
	fn start_kill(&mut self) -> std::io::Result<()> {
		self.killed.cancel();
		Ok(())
	}

	async fn wait(&mut self) -> std::io::Result<ExitInfo> {
		let killed = self.killed.clone();
		let Some(exit) = self.exit.as_mut() else {
			return Ok(ExitInfo::default());
		};
		let status = tokio::select! {
			status = exit => status.unwrap_or_default(),
			_ = killed.cancelled() => ExitInfo { code: None, signal: Some(9) },
		};
		self.exit = None;
		Ok(status)
	}
}

/// Launcher handing out [`FakeServer`]s over a channel.
pub(crate) struct FakeLauncher {
	servers: mpsc::UnboundedSender<FakeServer>,
	fail_with: Mutex<Option<String>>,
	gate: Mutex<Option<oneshot::Receiver<()>>>,
	spawned: Mutex<Vec<LaunchSpec>>,
}

impl FakeLauncher {
	pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeServer>) {
		let (servers, rx) = mpsc::unbounded_channel();
		let launcher = Arc::new(Self {
			servers,
			fail_with: Mutex::new(None),
			gate: Mutex::new(None),
			spawned: Mutex::new(Vec::new()),
		});
		(launcher, rx)
	}

	/// Makes the next spawn fail with `reason`.
	pub(crate) fn fail_next(&self, reason: &str) {
		*self.fail_with.lock() = Some(reason.into());
	}

	/// Blocks the next spawn inside the launcher until the returned sender fires.
	pub(crate) fn hold_next(&self) -> oneshot::Sender<()> {
		let (release, gate) = oneshot::channel();
		*self.gate.lock() = Some(gate);
		release
	}

	pub(crate) fn spawned(&self) -> Vec<LaunchSpec> {
		self.spawned.lock().clone()
	}
}

#[async_trait]
impl ProcessLauncher for FakeLauncher {
	async fn spawn(&self, spec: &LaunchSpec) -> Result<SpawnedProcess> {
		let gate = self.gate.lock().take();
		if let Some(gate) = gate {
			let _ = gate.await;
		}
		if let Some(reason) = self.fail_with.lock().take() {
			return Err(Error::SpawnFailure {
				program: spec.program.clone(),
				reason,
			});
		}
		self.spawned.lock().push(spec.clone());
		let (server, process) = fake_process(spec.clone());
		let _ = self.servers.send(server);
		Ok(process)
	}
}

/// Builds a connected server/process pair without a launcher.
pub(crate) fn fake_process(spec: LaunchSpec) -> (FakeServer, SpawnedProcess) {
	let (client_stdin, server_stdin) = tokio::io::duplex(PIPE_CAPACITY);
	let (server_stdout, client_stdout) = tokio::io::duplex(PIPE_CAPACITY);
	let (server_stderr, client_stderr) = tokio::io::duplex(PIPE_CAPACITY);
	let (exit_tx, exit_rx) = oneshot::channel();
	let killed = CancellationToken::new();

	let server = FakeServer {
		spec,
		requests: BufReader::new(server_stdin).lines(),
		stdout: Some(server_stdout),
		stderr: Some(server_stderr),
		exit: Some(exit_tx),
		killed: killed.clone(),
	};
	let process = SpawnedProcess {
		pid: Some(4242),
		stdin: Box::pin(client_stdin),
		stdout: Box::pin(client_stdout),
		stderr: Some(Box::pin(client_stderr)),
		child: Box::new(FakeChild {
			exit: Some(exit_rx),
			killed,
		}),
	};
	(server, process)
}

/// Resolver returning a fixed list.
pub(crate) struct StaticResolver(pub(crate) Vec<LaunchTarget>);

#[async_trait]
impl TargetResolver for StaticResolver {
	async fn resolve(&self, _workspace_root: &Path) -> Result<Vec<LaunchTarget>> {
		Ok(self.0.clone())
	}
}

/// What a [`RecordingObserver`] saw.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Observed {
	Ready(SessionId),
	Event(SessionId, ServerEvent),
	Exit(SessionId, SessionFailure),
}

/// Observer that records every callback.
#[derive(Default)]
pub(crate) struct RecordingObserver {
	pub(crate) seen: Mutex<Vec<Observed>>,
}

impl RecordingObserver {
	pub(crate) fn take(&self) -> Vec<Observed> {
		std::mem::take(&mut *self.seen.lock())
	}
}

impl SessionObserver for RecordingObserver {
	fn on_ready(&self, id: SessionId) {
		self.seen.lock().push(Observed::Ready(id));
	}

	fn on_event(&self, id: SessionId, event: ServerEvent) {
		self.seen.lock().push(Observed::Event(id, event));
	}

	fn on_exit(&self, id: SessionId, failure: SessionFailure) {
		self.seen.lock().push(Observed::Exit(id, failure));
	}
}
