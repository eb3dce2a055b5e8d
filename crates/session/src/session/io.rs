use std::io;
use std::ops::ControlFlow;
use std::sync::{Arc, Weak};
use std::time::Duration;

use futures::StreamExt;
use omni_protocol::{Frame, Packet, PacketCodec, encode_request};
use tokio::io::{AsyncWriteExt, BufReader, Lines};
use tokio::sync::{mpsc, oneshot};
use tokio_util::codec::FramedRead;

use super::{SessionCommand, SessionFailure, SessionId, SessionObserver, SessionState, SessionStatus};
use crate::correlator::{Correlator, PendingRequest, Resolution};
use crate::events::{READY_EVENT, ServerEvent};
use crate::launcher::{BoxedReader, BoxedWriter, ChildProcess, ExitInfo};
use crate::queue::RequestQueue;
use crate::request::Request;
use crate::Error;

/// Why the actor loop ended.
enum Exit {
	/// A handle asked for shutdown.
	Requested(oneshot::Sender<()>),
	/// Every handle was dropped.
	Abandoned,
	/// Stdout reached EOF.
	Closed,
	/// Reading stdout or writing stdin failed.
	Failed,
}

/// Owns the process pipes, the request queue and the pending table.
pub(crate) struct SessionIo {
	pub(super) id: SessionId,
	pub(super) commands: mpsc::UnboundedReceiver<SessionCommand>,
	pub(super) queue: RequestQueue,
	pub(super) correlator: Correlator,
	pub(super) stdin: BoxedWriter,
	pub(super) stdout: FramedRead<BoxedReader, PacketCodec>,
	pub(super) stderr: Option<Lines<BufReader<BoxedReader>>>,
	pub(super) child: Box<dyn ChildProcess>,
	pub(super) status: Arc<SessionStatus>,
	pub(super) observer: Weak<dyn SessionObserver>,
	pub(super) stop_timeout: Duration,
	pub(super) ready: bool,
}

impl SessionIo {
	/// Runs until shutdown or process exit.
	pub(crate) async fn run(mut self) {
		tracing::debug!(session = %self.id, "session io started");

		let exit = loop {
			let step = tokio::select! {
				biased;
				cmd = self.commands.recv() => match cmd {
					Some(cmd) => self.apply(cmd),
					None => ControlFlow::Break(Exit::Abandoned),
				},
				frame = self.stdout.next() => self.on_frame(frame),
				line = next_line(&mut self.stderr) => {
					self.on_stderr(line);
					ControlFlow::Continue(())
				}
			};

			if let ControlFlow::Break(exit) = step {
				break exit;
			}
			if let ControlFlow::Break(exit) = self.flush().await {
				break exit;
			}
		};

		self.finish(exit).await;
	}

	fn apply(&mut self, cmd: SessionCommand) -> ControlFlow<Exit> {
		match cmd {
			SessionCommand::Request { request, reply } => {
				self.correlator
					.register(request.id, PendingRequest::new(request.command.clone(), reply));
				self.queue.push(request);
			}
			SessionCommand::Cancel { seq } => {
				if self.correlator.cancel(seq).is_some() {
					tracing::trace!(session = %self.id, seq, "pending entry removed");
				}
			}
			SessionCommand::Shutdown { done } => return ControlFlow::Break(Exit::Requested(done)),
		}
		ControlFlow::Continue(())
	}

	/// Writes queued requests in priority order while the session is ready.
	///
	/// Commands that arrived during the previous write are applied before each
	/// pop, so a high-priority submission overtakes the normal backlog.
	async fn flush(&mut self) -> ControlFlow<Exit> {
		while self.ready {
			while let Ok(cmd) = self.commands.try_recv() {
				self.apply(cmd)?;
			}
			let Some(request) = self.queue.pop() else {
				break;
			};
			if let Err(error) = self.write(&request).await {
				tracing::error!(session = %self.id, seq = request.id, %error, "write to server failed");
				return ControlFlow::Break(Exit::Failed);
			}
		}
		ControlFlow::Continue(())
	}

	async fn write(&mut self, request: &Request) -> io::Result<()> {
		let line = match encode_request(&request.to_packet()) {
			Ok(line) => line,
			Err(source) => {
				self.correlator.reject(
					request.id,
					Error::Encoding {
						command: request.command.clone(),
						source,
					},
				);
				return Ok(());
			}
		};

		if !self.correlator.contains(request.id) {
			tracing::debug!(session = %self.id, seq = request.id, "sending request whose caller gave up");
		}

		self.stdin.write_all(&line).await?;
		self.stdin.flush().await?;

		tracing::debug!(
			session = %self.id,
			seq = request.id,
			command = %request.command,
			priority = ?request.priority,
			queued_ms = u64::try_from(request.submitted_at.elapsed().as_millis()).unwrap_or(u64::MAX),
			"request sent"
		);
		Ok(())
	}

	fn on_frame(&mut self, frame: Option<io::Result<Frame>>) -> ControlFlow<Exit> {
		match frame {
			None => return ControlFlow::Break(Exit::Closed),
			Some(Err(error)) => {
				tracing::error!(session = %self.id, %error, "error reading from server");
				return ControlFlow::Break(Exit::Failed);
			}
			Some(Ok(Frame::Packet(Packet::Response(response)))) => {
				let seq = response.request_seq;
				match self.correlator.resolve(response) {
					Resolution::Delivered => {
						tracing::trace!(session = %self.id, seq, "response delivered");
					}
					Resolution::Orphaned => {
						tracing::debug!(session = %self.id, seq, "dropping orphan response");
					}
					Resolution::CallerGone => {
						tracing::debug!(session = %self.id, seq, "response for abandoned caller");
					}
				}
			}
			Some(Ok(Frame::Packet(Packet::Event(packet)))) => {
				if packet.event == READY_EVENT {
					self.on_ready();
				} else {
					let event = ServerEvent::from_packet(packet);
					if let ServerEvent::Log(log) = &event {
						tracing::debug!(
							target: "omnisharp",
							session = %self.id,
							level = %log.log_level,
							name = %log.name,
							"{}",
							log.message
						);
					}
					self.notify(event);
				}
			}
			Some(Ok(Frame::Malformed(bad))) => {
				tracing::warn!(session = %self.id, error = %bad.error, line = %bad.line, "malformed packet");
				self.notify(ServerEvent::MalformedPacket(bad));
			}
		}
		ControlFlow::Continue(())
	}

	fn on_ready(&mut self) {
		if self.ready {
			tracing::debug!(session = %self.id, "duplicate readiness signal ignored");
			return;
		}
		self.ready = true;
		tracing::info!(session = %self.id, queued = self.queue.len(), "server ready");
		if let Some(observer) = self.observer.upgrade() {
			observer.on_ready(self.id);
		}
		self.status.set_state(SessionState::Started);
	}

	fn on_stderr(&mut self, line: Option<String>) {
		match line {
			Some(line) => {
				tracing::debug!(target: "omnisharp::stderr", session = %self.id, "{line}");
				self.notify(ServerEvent::StderrLine(line));
			}
			None => self.stderr = None,
		}
	}

	fn notify(&self, event: ServerEvent) {
		if let Some(observer) = self.observer.upgrade() {
			observer.on_event(self.id, event);
		}
	}

	async fn finish(mut self, exit: Exit) {
		let rejected = self.correlator.reject_all();
		let unsent = self.queue.drain().count();

		self.commands.close();
		let mut waiters = Vec::new();
		while let Ok(cmd) = self.commands.try_recv() {
			match cmd {
				SessionCommand::Request { reply, .. } => {
					let _ = reply.send(Err(Error::SessionStopped));
				}
				SessionCommand::Shutdown { done } => waiters.push(done),
				SessionCommand::Cancel { .. } => {}
			}
		}

		match exit {
			Exit::Requested(done) => {
				waiters.push(done);
				let status = self.reap(true).await;
				self.status.set_state(SessionState::Stopped);
				tracing::info!(session = %self.id, rejected, unsent, %status, "session stopped");
			}
			Exit::Abandoned => {
				let status = self.reap(true).await;
				self.status.set_state(SessionState::Stopped);
				tracing::debug!(session = %self.id, %status, "session abandoned");
			}
			Exit::Closed | Exit::Failed => {
				let status = self.reap(false).await;
				self.drain_stderr().await;
				let (failure, state) = if self.ready {
					(SessionFailure::Crashed { status }, SessionState::Stopped)
				} else {
					(SessionFailure::ExitedBeforeReady { status }, SessionState::Error)
				};
				tracing::warn!(session = %self.id, rejected, unsent, %failure, "server exited");
				if let Some(observer) = self.observer.upgrade() {
					observer.on_exit(self.id, failure.clone());
				}
				self.status.fail(failure, state);
			}
		}

		for done in waiters {
			let _ = done.send(());
		}
	}

	/// Publishes stderr lines still buffered after the process went away.
	async fn drain_stderr(&mut self) {
		let deadline = tokio::time::Instant::now() + self.stop_timeout;
		while self.stderr.is_some() {
			match tokio::time::timeout_at(deadline, next_line(&mut self.stderr)).await {
				Ok(line) => self.on_stderr(line),
				Err(_) => {
					tracing::debug!(session = %self.id, "stderr still open after exit");
					break;
				}
			}
		}
	}

	/// Waits for the process to exit, killing it first when asked to or when it
	/// outlives the grace period.
	async fn reap(&mut self, kill: bool) -> ExitInfo {
		if kill && let Err(error) = self.child.start_kill() {
			tracing::debug!(session = %self.id, %error, "kill failed");
		}
		match tokio::time::timeout(self.stop_timeout, self.child.wait()).await {
			Ok(Ok(status)) => status,
			Ok(Err(error)) => {
				tracing::warn!(session = %self.id, %error, "failed to wait for server");
				ExitInfo::default()
			}
			Err(_) => {
				tracing::warn!(session = %self.id, "server did not exit in time; killing");
				let _ = self.child.start_kill();
				ExitInfo::default()
			}
		}
	}
}

/// Next stderr line; pending forever once stderr is gone.
async fn next_line(stderr: &mut Option<Lines<BufReader<BoxedReader>>>) -> Option<String> {
	let Some(lines) = stderr else {
		return std::future::pending().await;
	};
	match lines.next_line().await {
		Ok(line) => line,
		Err(error) => {
			tracing::debug!(%error, "stderr read failed");
			None
		}
	}
}
