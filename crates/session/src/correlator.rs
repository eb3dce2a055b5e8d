//! Pending-request table keyed by sequence id.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use omni_protocol::{JsonValue, ResponsePacket};
use tokio::sync::oneshot;
use tokio::time::Instant;

use crate::{Error, Result};

/// Allocates sequence ids for one session.
///
/// Ids start at 1 and increase by one per request. Clones share the counter.
#[derive(Debug, Clone)]
pub struct SequenceCounter(Arc<AtomicU64>);

impl SequenceCounter {
	/// Creates a counter whose first id is 1.
	pub fn new() -> Self {
		Self(Arc::new(AtomicU64::new(1)))
	}

	/// Returns the next id.
	pub fn next(&self) -> u64 {
		self.0.fetch_add(1, Ordering::Relaxed)
	}
}

impl Default for SequenceCounter {
	fn default() -> Self {
		Self::new()
	}
}

/// Completion channel for an in-flight request.
pub type ReplySender = oneshot::Sender<Result<JsonValue>>;

/// A request written to the process and awaiting its response.
#[derive(Debug)]
pub struct PendingRequest {
	/// Endpoint name, used for error messages.
	pub command: String,
	/// Caller's completion channel.
	pub reply: ReplySender,
	/// When the request was written.
	pub written_at: Instant,
}

impl PendingRequest {
	/// Creates a pending entry stamped with the current time.
	pub fn new(command: impl Into<String>, reply: ReplySender) -> Self {
		Self {
			command: command.into(),
			reply,
			written_at: Instant::now(),
		}
	}
}

/// What happened to a response handed to [`Correlator::resolve`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
	/// The matching caller received the outcome.
	Delivered,
	/// No pending request had this sequence id.
	Orphaned,
	/// The request was pending but its caller had already gone away.
	CallerGone,
}

/// Matches responses to the requests that caused them.
///
/// Each sequence id completes at most once: resolving, cancelling or rejecting
/// removes the entry, so a later response for the same id is an orphan.
#[derive(Debug, Default)]
pub struct Correlator {
	pending: HashMap<u64, PendingRequest>,
}

impl Correlator {
	/// Creates an empty table.
	pub fn new() -> Self {
		Self::default()
	}

	/// Records a written request.
	pub fn register(&mut self, seq: u64, pending: PendingRequest) {
		let prev = self.pending.insert(seq, pending);
		debug_assert!(prev.is_none(), "duplicate pending request seq {seq}");
	}

	/// Completes the request matching `response.request_seq`.
	///
	/// `Success: true` delivers the body (`null` when absent); `Success: false`
	/// delivers [`Error::RequestFailed`] with the server's message.
	pub fn resolve(&mut self, response: ResponsePacket) -> Resolution {
		let Some(pending) = self.pending.remove(&response.request_seq) else {
			return Resolution::Orphaned;
		};

		let outcome = if response.success {
			Ok(response.body.unwrap_or(JsonValue::Null))
		} else {
			Err(Error::RequestFailed {
				command: pending.command,
				message: response
					.message
					.unwrap_or_else(|| String::from("request failed")),
			})
		};

		match pending.reply.send(outcome) {
			Ok(()) => Resolution::Delivered,
			Err(_) => Resolution::CallerGone,
		}
	}

	/// Removes `seq` without notifying the caller.
	///
	/// Returns the entry when it was still pending.
	pub fn cancel(&mut self, seq: u64) -> Option<PendingRequest> {
		self.pending.remove(&seq)
	}

	/// Completes `seq` with `error`. Returns `false` when it was not pending.
	pub fn reject(&mut self, seq: u64, error: Error) -> bool {
		match self.pending.remove(&seq) {
			Some(pending) => {
				let _ = pending.reply.send(Err(error));
				true
			}
			None => false,
		}
	}

	/// Rejects every pending request with [`Error::SessionStopped`].
	///
	/// Returns how many were rejected; the table is empty afterwards.
	pub fn reject_all(&mut self) -> usize {
		let count = self.pending.len();
		for (_, pending) in self.pending.drain() {
			let _ = pending.reply.send(Err(Error::SessionStopped));
		}
		count
	}

	/// Number of requests awaiting a response.
	pub fn len(&self) -> usize {
		self.pending.len()
	}

	/// Returns `true` when nothing is pending.
	pub fn is_empty(&self) -> bool {
		self.pending.is_empty()
	}

	/// Returns `true` when `seq` is awaiting a response.
	pub fn contains(&self, seq: u64) -> bool {
		self.pending.contains_key(&seq)
	}
}

#[cfg(test)]
mod tests;
