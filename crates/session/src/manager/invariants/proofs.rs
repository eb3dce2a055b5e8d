//! Machine-checkable invariant proofs for the session manager.

use std::sync::Arc;

use futures::poll;
use parking_lot::Mutex;
use serde_json::json;
use tokio::sync::mpsc;

use super::super::SessionManager;
use crate::events::{BackgroundWorkPhase, BackgroundWorkStatus};
use crate::session::SessionObserver;
use crate::testing::{FakeLauncher, FakeServer, StaticResolver};
use crate::{
	Error, EventBus, EventKind, ExitInfo, JsonValue, LaunchTarget, Priority, RequestOptions, ServerConfig,
	ServerEvent, SessionFailure, SessionId, SessionState,
};

fn make_manager() -> (SessionManager, mpsc::UnboundedReceiver<FakeServer>) {
	let (launcher, servers) = FakeLauncher::new();
	let manager = SessionManager::with_collaborators(
		ServerConfig::new("OmniSharp", "/repo"),
		launcher,
		Arc::new(StaticResolver(Vec::new())),
	);
	(manager, servers)
}

fn target(path: &str) -> LaunchTarget {
	LaunchTarget::from_path(path)
}

async fn start_ready(
	manager: &SessionManager,
	servers: &mut mpsc::UnboundedReceiver<FakeServer>,
	path: &str,
) -> FakeServer {
	let start = {
		let manager = manager.clone();
		let target = target(path);
		tokio::spawn(async move { manager.start(target).await })
	};
	let mut server = servers.recv().await.unwrap();
	server.ready().await;
	start.await.unwrap().unwrap();
	server
}

fn call(
	manager: &SessionManager,
	command: &str,
	options: RequestOptions,
) -> tokio::task::JoinHandle<crate::Result<JsonValue>> {
	let manager = manager.clone();
	let command = command.to_owned();
	tokio::spawn(async move { manager.request_value(&command, json!({}), options).await })
}

/// Stopping rejects requests already written and requests still queued.
#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_stop_rejects_every_pending_request() {
	let (manager, mut servers) = make_manager();
	let start = {
		let manager = manager.clone();
		tokio::spawn(async move { manager.start(target("/repo/App.sln")).await })
	};
	let _server = servers.recv().await.unwrap();

	// Not ready yet: all five stay queued.
	let calls: Vec<_> = (0..5)
		.map(|i| call(&manager, &format!("/cmd{i}"), RequestOptions::default()))
		.collect();
	tokio::task::yield_now().await;

	manager.stop().await;
	for call in calls {
		let err = call.await.unwrap().unwrap_err();
		assert!(matches!(err, Error::SessionStopped), "{err:?}");
	}
	assert!(matches!(start.await.unwrap(), Err(Error::SessionStopped)));
	assert_eq!(manager.state(), SessionState::Stopped);
}

/// The old process is killed and reaped before the launcher is asked for a new one.
#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_restart_kills_old_process_before_spawning() {
	let (manager, mut servers) = make_manager();
	let mut first = start_ready(&manager, &mut servers, "/repo/App.sln").await;

	let pending: Vec<_> = (0..3)
		.map(|_| call(&manager, "/findusages", RequestOptions::default()))
		.collect();
	for _ in 0..3 {
		first.next_request().await;
	}

	let restart = {
		let manager = manager.clone();
		tokio::spawn(async move { manager.restart(None).await })
	};
	let mut second = servers.recv().await.unwrap();
	assert!(first.is_killed());
	assert_eq!(manager.session_id(), Some(SessionId(2)));
	for call in pending {
		let err = call.await.unwrap().unwrap_err();
		assert!(matches!(err, Error::SessionStopped), "{err:?}");
	}

	second.ready().await;
	restart.await.unwrap().unwrap();
	assert!(manager.is_running());

	// Sequence numbers restart with the new session.
	let next = call(&manager, "/findusages", RequestOptions::default());
	let req = second.next_request().await;
	assert_eq!(req.seq, 1);
	second.respond(req.seq, json!({"QuickFixes": []})).await;
	assert_eq!(next.await.unwrap().unwrap(), json!({"QuickFixes": []}));
}

/// Readiness, events and exits of a replaced session do not touch the current one.
#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_stale_session_callbacks_are_ignored() {
	let (manager, mut servers) = make_manager();
	let _first = start_ready(&manager, &mut servers, "/repo/App.sln").await;
	manager.stop().await;
	let _second = start_ready(&manager, &mut servers, "/repo/App.sln").await;

	let seen = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&seen);
	let _sub = manager.events().subscribe_all(move |event| sink.lock().push(event.kind()));

	let stale = SessionId(1);
	let shared = &manager.shared;
	shared.on_ready(stale);
	shared.on_event(stale, ServerEvent::StderrLine("late".into()));
	shared.on_exit(
		stale,
		SessionFailure::Crashed {
			status: ExitInfo::default(),
		},
	);

	assert!(seen.lock().is_empty());
	assert_eq!(manager.session_id(), Some(SessionId(2)));
	assert_eq!(manager.state(), SessionState::Started);
}

/// A response nobody waits for is dropped and the session keeps serving.
#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_orphan_response_is_dropped() {
	let (manager, mut servers) = make_manager();
	let mut server = start_ready(&manager, &mut servers, "/repo/App.sln").await;

	server.respond(999, json!({"Stale": true})).await;

	let pending = call(&manager, "/checkalivestatus", RequestOptions::default());
	let req = server.next_request().await;
	server.respond(req.seq, json!(true)).await;
	assert_eq!(pending.await.unwrap().unwrap(), json!(true));
	assert!(manager.is_running());
}

/// Responses arriving in reverse order still reach their own callers.
#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_responses_resolve_in_any_order() {
	let (manager, mut servers) = make_manager();
	let mut server = start_ready(&manager, &mut servers, "/repo/App.sln").await;

	let calls: Vec<_> = ["/a", "/b", "/c"]
		.into_iter()
		.map(|command| call(&manager, command, RequestOptions::default()))
		.collect();
	let mut requests = Vec::new();
	for _ in 0..3 {
		requests.push(server.next_request().await);
	}
	for req in requests.iter().rev() {
		server.respond(req.seq, json!({"Command": req.command})).await;
	}

	let mut bodies = Vec::new();
	for call in calls {
		bodies.push(call.await.unwrap().unwrap());
	}
	assert_eq!(
		bodies,
		vec![json!({"Command": "/a"}), json!({"Command": "/b"}), json!({"Command": "/c"})]
	);
}

/// A non-JSON line between two responses is reported and both responses are delivered.
#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_malformed_line_between_responses() {
	let (manager, mut servers) = make_manager();
	let mut server = start_ready(&manager, &mut servers, "/repo/App.sln").await;

	let malformed = Arc::new(Mutex::new(Vec::new()));
	let sink = Arc::clone(&malformed);
	let _sub = manager.subscribe(EventKind::MalformedPacket, move |event| {
		if let ServerEvent::MalformedPacket(bad) = event {
			sink.lock().push(bad.line.clone());
		}
	});

	let first = call(&manager, "/first", RequestOptions::default());
	let second = call(&manager, "/second", RequestOptions::default());
	let a = server.next_request().await;
	let b = server.next_request().await;

	server.respond(a.seq, json!(a.command)).await;
	server.write_raw(b"Restoring packages...\n").await;
	server.respond(b.seq, json!(b.command)).await;

	assert_eq!(first.await.unwrap().unwrap(), json!("/first"));
	assert_eq!(second.await.unwrap().unwrap(), json!("/second"));
	assert_eq!(*malformed.lock(), vec!["Restoring packages...".to_owned()]);
	assert!(manager.is_running());
}

/// Typed and catch-all handlers interleave strictly by registration.
#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_event_fan_out_follows_registration_order() {
	let bus = EventBus::new();
	let order = Arc::new(Mutex::new(Vec::new()));

	let mut subs = Vec::new();
	for (i, kind) in [
		Some(EventKind::BackgroundWork),
		None,
		Some(EventKind::Diagnostics),
		Some(EventKind::BackgroundWork),
	]
	.into_iter()
	.enumerate()
	{
		let sink = Arc::clone(&order);
		let handler = move |_: &ServerEvent| sink.lock().push(i);
		subs.push(match kind {
			Some(kind) => bus.subscribe(kind, handler),
			None => bus.subscribe_all(handler),
		});
	}

	bus.emit(&ServerEvent::BackgroundWork(BackgroundWorkStatus {
		status: BackgroundWorkPhase::Progress,
		number_projects: 1,
		number_files_total: 10,
		number_files_remaining: 4,
	}));
	assert_eq!(*order.lock(), vec![0, 1, 3]);
}

/// A high-priority request submitted after a normal backlog is written first.
#[cfg_attr(test, tokio::test)]
pub(crate) async fn test_high_priority_overtakes_queued_normal() {
	let (manager, mut servers) = make_manager();
	let start = {
		let manager = manager.clone();
		tokio::spawn(async move { manager.start(target("/repo/App.sln")).await })
	};
	let mut server = servers.recv().await.unwrap();

	let mut normal_a = Box::pin(manager.request_value("/codecheck", json!({}), RequestOptions::default()));
	let mut normal_b = Box::pin(manager.request_value("/codecheck", json!({}), RequestOptions::default()));
	let mut high = Box::pin(manager.request_value(
		"/autocomplete",
		json!({}),
		RequestOptions::default().priority(Priority::High),
	));
	assert!(poll!(&mut normal_a).is_pending());
	assert!(poll!(&mut normal_b).is_pending());
	assert!(poll!(&mut high).is_pending());

	server.ready().await;
	start.await.unwrap().unwrap();

	let order: Vec<String> = [
		server.next_request().await,
		server.next_request().await,
		server.next_request().await,
	]
	.into_iter()
	.map(|req| req.command)
	.collect();
	assert_eq!(order, ["/autocomplete", "/codecheck", "/codecheck"]);
}
