use proptest::prelude::*;
use serde_json::json;

use super::*;

fn ok_response(seq: u64, body: JsonValue) -> ResponsePacket {
	ResponsePacket {
		request_seq: seq,
		command: String::from("/test"),
		success: true,
		body: Some(body),
		message: None,
	}
}

fn pending(command: &str) -> (PendingRequest, oneshot::Receiver<Result<JsonValue>>) {
	let (tx, rx) = oneshot::channel();
	(PendingRequest::new(command, tx), rx)
}

#[test]
fn sequence_counter_starts_at_one_and_is_shared() {
	let counter = SequenceCounter::new();
	let clone = counter.clone();
	assert_eq!(counter.next(), 1);
	assert_eq!(clone.next(), 2);
	assert_eq!(counter.next(), 3);
}

#[test]
fn success_delivers_body() {
	let mut correlator = Correlator::new();
	let (entry, mut rx) = pending("/findusages");
	correlator.register(1, entry);

	let resolution = correlator.resolve(ok_response(1, json!({"QuickFixes": []})));

	assert_eq!(resolution, Resolution::Delivered);
	assert_eq!(rx.try_recv().unwrap().unwrap(), json!({"QuickFixes": []}));
	assert!(correlator.is_empty());
}

#[test]
fn missing_body_resolves_to_null() {
	let mut correlator = Correlator::new();
	let (entry, mut rx) = pending("/updatebuffer");
	correlator.register(7, entry);

	let mut response = ok_response(7, JsonValue::Null);
	response.body = None;
	correlator.resolve(response);

	assert_eq!(rx.try_recv().unwrap().unwrap(), JsonValue::Null);
}

#[test]
fn failure_rejects_with_server_message() {
	let mut correlator = Correlator::new();
	let (entry, mut rx) = pending("/rename");
	correlator.register(2, entry);

	correlator.resolve(ResponsePacket {
		request_seq: 2,
		command: String::from("/rename"),
		success: false,
		body: None,
		message: Some(String::from("no symbol")),
	});

	match rx.try_recv().unwrap() {
		Err(Error::RequestFailed { command, message }) => {
			assert_eq!(command, "/rename");
			assert_eq!(message, "no symbol");
		}
		other => panic!("expected RequestFailed, got {other:?}"),
	}
}

#[test]
fn unknown_seq_is_orphaned() {
	let mut correlator = Correlator::new();
	let (entry, mut rx) = pending("/a");
	correlator.register(1, entry);

	assert_eq!(correlator.resolve(ok_response(99, JsonValue::Null)), Resolution::Orphaned);
	assert!(correlator.contains(1));
	assert!(rx.try_recv().is_err());
}

#[test]
fn second_response_for_same_seq_is_orphaned() {
	let mut correlator = Correlator::new();
	let (entry, _rx) = pending("/a");
	correlator.register(1, entry);

	assert_eq!(correlator.resolve(ok_response(1, json!(1))), Resolution::Delivered);
	assert_eq!(correlator.resolve(ok_response(1, json!(2))), Resolution::Orphaned);
}

#[test]
fn dropped_caller_is_reported() {
	let mut correlator = Correlator::new();
	let (entry, rx) = pending("/a");
	correlator.register(1, entry);
	drop(rx);

	assert_eq!(correlator.resolve(ok_response(1, json!(1))), Resolution::CallerGone);
	assert!(correlator.is_empty());
}

#[test]
fn cancel_removes_without_completing() {
	let mut correlator = Correlator::new();
	let (entry, mut rx) = pending("/a");
	correlator.register(4, entry);

	let removed = correlator.cancel(4).expect("pending");
	assert_eq!(removed.command, "/a");
	assert!(correlator.cancel(4).is_none());
	assert_eq!(correlator.resolve(ok_response(4, json!(1))), Resolution::Orphaned);
	drop(removed);
	assert!(matches!(rx.try_recv(), Err(oneshot::error::TryRecvError::Closed)));
}

#[test]
fn reject_completes_one_request() {
	let mut correlator = Correlator::new();
	let (a, mut rx_a) = pending("/a");
	let (b, mut rx_b) = pending("/b");
	correlator.register(1, a);
	correlator.register(2, b);

	assert!(correlator.reject(1, Error::RequestTimeout { command: String::from("/a") }));
	assert!(!correlator.reject(1, Error::SessionStopped));

	assert!(matches!(rx_a.try_recv().unwrap(), Err(Error::RequestTimeout { .. })));
	assert!(rx_b.try_recv().is_err());
	assert_eq!(correlator.len(), 1);
}

#[test]
fn reject_all_empties_table() {
	let mut correlator = Correlator::new();
	let mut receivers = Vec::new();
	for seq in 1..=3 {
		let (entry, rx) = pending("/a");
		correlator.register(seq, entry);
		receivers.push(rx);
	}

	assert_eq!(correlator.reject_all(), 3);
	assert!(correlator.is_empty());
	for mut rx in receivers {
		assert!(matches!(rx.try_recv().unwrap(), Err(Error::SessionStopped)));
	}
	assert_eq!(correlator.reject_all(), 0);
}

proptest! {
	#[test]
	fn any_response_order_delivers_each_body_to_its_caller(
		order in Just((1u64..=16).collect::<Vec<_>>()).prop_shuffle()
	) {
		let mut correlator = Correlator::new();
		let mut receivers = Vec::new();
		for seq in 1u64..=16 {
			let (entry, rx) = pending("/a");
			correlator.register(seq, entry);
			receivers.push((seq, rx));
		}

		for seq in &order {
			prop_assert_eq!(correlator.resolve(ok_response(*seq, json!(seq))), Resolution::Delivered);
		}

		prop_assert!(correlator.is_empty());
		for (seq, mut rx) in receivers {
			prop_assert_eq!(rx.try_recv().unwrap().unwrap(), json!(seq));
		}
	}
}
