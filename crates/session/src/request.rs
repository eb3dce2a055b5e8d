//! Outbound request descriptors.

use std::time::Duration;

use omni_protocol::{JsonValue, RequestPacket};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Dispatch class of a request.
///
/// Every queued [`Priority::High`] request is written before any queued
/// [`Priority::Normal`] one. Within a class, submission order is kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Priority {
	/// Regular feature requests.
	#[default]
	Normal,
	/// Requests that jump ahead of the normal backlog (buffer updates, file open).
	High,
}

/// Per-call options for [`crate::SessionManager::make_request`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
	/// Dispatch class.
	pub priority: Priority,
	/// Cancels the request when triggered.
	pub cancel: Option<CancellationToken>,
	/// Overrides the configured request timeout. `Some(Duration::ZERO)` disables it.
	pub timeout: Option<Duration>,
}

impl RequestOptions {
	/// Options for a high-priority request.
	pub fn high() -> Self {
		Self {
			priority: Priority::High,
			..Self::default()
		}
	}

	/// Sets the dispatch class.
	pub fn priority(mut self, priority: Priority) -> Self {
		self.priority = priority;
		self
	}

	/// Attaches a cancellation token.
	pub fn cancel_on(mut self, token: CancellationToken) -> Self {
		self.cancel = Some(token);
		self
	}

	/// Overrides the request timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = Some(timeout);
		self
	}
}

/// A request accepted by a session but not necessarily written yet.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
	/// Sequence id, allocated at submission.
	pub id: u64,
	/// Endpoint name.
	pub command: String,
	/// Serialised arguments.
	pub arguments: JsonValue,
	/// Dispatch class.
	pub priority: Priority,
	/// When the caller submitted the request.
	pub submitted_at: Instant,
}

impl Request {
	/// Creates a request stamped with the current time.
	pub fn new(id: u64, command: impl Into<String>, arguments: JsonValue, priority: Priority) -> Self {
		Self {
			id,
			command: command.into(),
			arguments,
			priority,
			submitted_at: Instant::now(),
		}
	}

	/// Wire form of this request.
	pub fn to_packet(&self) -> RequestPacket {
		RequestPacket {
			seq: self.id,
			command: self.command.clone(),
			arguments: self.arguments.clone(),
		}
	}
}
