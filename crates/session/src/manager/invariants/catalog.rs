//! Invariant catalog for [`crate::manager::SessionManager`].
#![allow(dead_code)]

/// Must reject every pending and queued request when a session ends.
///
/// - Enforced in: `SessionIo::finish`, [`crate::Correlator::reject_all`]
/// - Tested by: [`crate::manager::invariants::test_stop_rejects_every_pending_request`]
/// - Failure symptom: Callers hang forever after a stop, crash or restart.
pub(crate) const STOP_REJECTS_EVERY_PENDING_REQUEST: () = ();

/// Restart must finish tearing the old session down before spawning a new one.
///
/// - Enforced in: [`crate::manager::SessionManager::restart`]
/// - Tested by: [`crate::manager::invariants::test_restart_kills_old_process_before_spawning`]
/// - Failure symptom: Two server processes share one workspace and responses cross sessions.
pub(crate) const RESTART_STOPS_BEFORE_IT_STARTS: () = ();

/// Observer callbacks from a session that is no longer current must be ignored.
///
/// - Enforced in: `Shared::on_ready`, `Shared::on_event`, `Shared::on_exit`
/// - Tested by: [`crate::manager::invariants::test_stale_session_callbacks_are_ignored`]
/// - Failure symptom: A late exit of an old process tears down the new session.
pub(crate) const STALE_SESSION_CALLBACKS_ARE_DROPPED: () = ();

/// A response whose sequence number has no pending entry must be dropped.
///
/// - Enforced in: [`crate::Correlator::resolve`]
/// - Tested by: [`crate::manager::invariants::test_orphan_response_is_dropped`]
/// - Failure symptom: Late responses for cancelled requests kill the session.
pub(crate) const ORPHAN_RESPONSES_ARE_DROPPED: () = ();

/// Responses must resolve the request with the same sequence number, whatever the arrival order.
///
/// - Enforced in: [`crate::Correlator::resolve`]
/// - Tested by: [`crate::manager::invariants::test_responses_resolve_in_any_order`]
/// - Failure symptom: A caller receives another request's body.
pub(crate) const RESPONSES_CORRELATE_BY_SEQUENCE_NOT_ARRIVAL: () = ();

/// An undecodable stdout line must be reported and skipped.
///
/// - Enforced in: [`omni_protocol::PacketCodec`], `SessionIo::on_frame`
/// - Tested by: [`crate::manager::invariants::test_malformed_line_between_responses`]
/// - Failure symptom: One stray log line on stdout ends the session.
pub(crate) const MALFORMED_LINES_DO_NOT_END_THE_SESSION: () = ();

/// Handlers must run once per event, in registration order.
///
/// - Enforced in: [`crate::EventBus::emit`]
/// - Tested by: [`crate::manager::invariants::test_event_fan_out_follows_registration_order`]
/// - Failure symptom: Diagnostics consumers observe events in a different order than the status bar.
pub(crate) const EVENTS_FAN_OUT_IN_REGISTRATION_ORDER: () = ();

/// High-priority requests must be written before any queued normal request.
///
/// - Enforced in: [`crate::RequestQueue::pop`], `SessionIo::flush`
/// - Tested by: [`crate::manager::invariants::test_high_priority_overtakes_queued_normal`]
/// - Failure symptom: Completion requests wait behind a startup burst of code checks.
pub(crate) const HIGH_PRIORITY_IS_WRITTEN_BEFORE_NORMAL_BACKLOG: () = ();
