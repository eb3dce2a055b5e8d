//! Two-class FIFO of requests waiting to be written.

use std::collections::VecDeque;

use crate::request::{Priority, Request};

/// Requests accepted by a session but not yet written to the process.
///
/// High-priority requests always drain first; each class is FIFO.
#[derive(Debug, Default)]
pub struct RequestQueue {
	high: VecDeque<Request>,
	normal: VecDeque<Request>,
}

impl RequestQueue {
	/// Creates an empty queue.
	pub fn new() -> Self {
		Self::default()
	}

	/// Enqueues `request` at the back of its class.
	pub fn push(&mut self, request: Request) {
		match request.priority {
			Priority::High => self.high.push_back(request),
			Priority::Normal => self.normal.push_back(request),
		}
	}

	/// Removes the next request to dispatch.
	pub fn pop(&mut self) -> Option<Request> {
		self.high.pop_front().or_else(|| self.normal.pop_front())
	}

	/// Number of queued requests.
	pub fn len(&self) -> usize {
		self.high.len() + self.normal.len()
	}

	/// Returns `true` when nothing is queued.
	pub fn is_empty(&self) -> bool {
		self.high.is_empty() && self.normal.is_empty()
	}

	/// Removes every queued request, in dispatch order.
	pub fn drain(&mut self) -> impl Iterator<Item = Request> + '_ {
		self.high.drain(..).chain(self.normal.drain(..))
	}
}
