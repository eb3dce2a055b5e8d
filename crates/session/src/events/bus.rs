use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::{EventKind, ServerEvent};

type Handler = Arc<dyn Fn(&ServerEvent) + Send + Sync>;

struct Entry {
	id: u64,
	/// `None` receives every event.
	kind: Option<EventKind>,
	handler: Handler,
}

#[derive(Default)]
struct Inner {
	entries: RwLock<Vec<Entry>>,
	next_id: AtomicU64,
}

/// Multi-subscriber dispatch of [`ServerEvent`]s.
///
/// Delivery is synchronous, on the emitting task, in registration order. Handlers
/// run against a snapshot of the subscriber list, so a handler may subscribe or
/// dispose without deadlocking; changes take effect from the next event.
/// A panicking handler is logged and does not stop delivery to the others.
#[derive(Clone, Default)]
pub struct EventBus {
	inner: Arc<Inner>,
}

impl std::fmt::Debug for EventBus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("EventBus")
			.field("subscribers", &self.subscriber_count())
			.finish()
	}
}

impl EventBus {
	/// Creates a bus with no subscribers.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers `handler` for events of `kind`.
	pub fn subscribe<F>(&self, kind: EventKind, handler: F) -> Subscription
	where
		F: Fn(&ServerEvent) + Send + Sync + 'static,
	{
		self.insert(Some(kind), Arc::new(handler))
	}

	/// Registers `handler` for every event.
	pub fn subscribe_all<F>(&self, handler: F) -> Subscription
	where
		F: Fn(&ServerEvent) + Send + Sync + 'static,
	{
		self.insert(None, Arc::new(handler))
	}

	fn insert(&self, kind: Option<EventKind>, handler: Handler) -> Subscription {
		let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
		self.inner.entries.write().push(Entry { id, kind, handler });
		Subscription {
			id,
			bus: Arc::downgrade(&self.inner),
		}
	}

	/// Delivers `event` to every matching subscriber.
	pub fn emit(&self, event: &ServerEvent) {
		let kind = event.kind();
		let handlers: Vec<Handler> = self
			.inner
			.entries
			.read()
			.iter()
			.filter(|entry| entry.kind.is_none_or(|k| k == kind))
			.map(|entry| Arc::clone(&entry.handler))
			.collect();

		for handler in handlers {
			if catch_unwind(AssertUnwindSafe(|| handler(event))).is_err() {
				tracing::error!(event = %kind, "event handler panicked");
			}
		}
	}

	/// Number of registered handlers.
	pub fn subscriber_count(&self) -> usize {
		self.inner.entries.read().len()
	}
}

/// Registration handle returned by [`EventBus::subscribe`].
///
/// The handler stays registered until [`dispose`](Self::dispose) is called;
/// dropping the handle does not remove it.
#[must_use = "keep the subscription to be able to dispose it"]
#[derive(Debug)]
pub struct Subscription {
	id: u64,
	bus: Weak<Inner>,
}

impl Subscription {
	/// Removes the handler. Returns `false` if the bus is gone.
	pub fn dispose(self) -> bool {
		let Some(inner) = self.bus.upgrade() else {
			return false;
		};
		let mut entries = inner.entries.write();
		let before = entries.len();
		entries.retain(|entry| entry.id != self.id);
		entries.len() != before
	}
}
