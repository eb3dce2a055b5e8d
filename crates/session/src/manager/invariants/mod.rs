//! Machine-checkable invariant catalog and proof entrypoints for session manager behavior.
#![allow(dead_code)]

pub(crate) mod catalog;

#[allow(unused_imports)]
pub(crate) use catalog::{
	EVENTS_FAN_OUT_IN_REGISTRATION_ORDER, HIGH_PRIORITY_IS_WRITTEN_BEFORE_NORMAL_BACKLOG,
	MALFORMED_LINES_DO_NOT_END_THE_SESSION, ORPHAN_RESPONSES_ARE_DROPPED,
	RESPONSES_CORRELATE_BY_SEQUENCE_NOT_ARRIVAL, RESTART_STOPS_BEFORE_IT_STARTS,
	STALE_SESSION_CALLBACKS_ARE_DROPPED, STOP_REJECTS_EVERY_PENDING_REQUEST,
};

mod proofs;

#[allow(unused_imports)]
pub(crate) use proofs::{
	test_event_fan_out_follows_registration_order, test_high_priority_overtakes_queued_normal,
	test_malformed_line_between_responses, test_orphan_response_is_dropped,
	test_responses_resolve_in_any_order, test_restart_kills_old_process_before_spawning,
	test_stale_session_callbacks_are_ignored, test_stop_rejects_every_pending_request,
};
