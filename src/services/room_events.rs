use std::time::SystemTime;

use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::{
    dao::models::SessionEntity,
    dto::sse::{
        EndReason, LeaderboardRowDto, LeaderboardUpdateEvent, ParticipantJoinedEvent, ServerEvent,
        SessionEndedEvent, SessionPausedEvent, SessionResumedEvent, SessionStartedEvent,
        TimerTickEvent,
    },
    state::{
        SharedState,
        clock::{epoch_millis, remaining_secs},
        leaderboard::LeaderboardRow,
    },
};

pub const EVENT_SESSION_STARTED: &str = "session:started";
pub const EVENT_SESSION_PAUSED: &str = "session:paused";
pub const EVENT_SESSION_RESUMED: &str = "session:resumed";
pub const EVENT_SESSION_ENDED: &str = "session:ended";
pub const EVENT_SESSION_RECOVERED: &str = "session:recovered";
pub const EVENT_SESSION_EXPIRED: &str = "session:expired";
pub const EVENT_SESSION_IDLE: &str = "session:idle";
pub const EVENT_TIMER_TICK: &str = "timer:tick";
pub const EVENT_PARTICIPANT_JOINED: &str = "participant:joined";
pub const EVENT_LEADERBOARD_UPDATE: &str = "leaderboard:update";
pub const EVENT_ANSWER_ACK: &str = "answer:ack";
pub const EVENT_ANSWER_REJECTED: &str = "answer:rejected";
pub const EVENT_ERROR: &str = "error";
pub const EVENT_STREAM_READY: &str = "stream:ready";

/// Announce a freshly armed countdown.
pub fn broadcast_session_started(state: &SharedState, session: &SessionEntity, now: SystemTime) {
    let (Some(started_at), Some(ends_at)) = (session.started_at, session.ends_at) else {
        warn!(session_id = %session.id, "started session is missing its deadline");
        return;
    };
    let payload = SessionStartedEvent {
        session_id: session.id,
        started_at: epoch_millis(started_at),
        ends_at: epoch_millis(ends_at),
        remaining: remaining_secs(ends_at, now),
    };
    send_room_event(state, session.id, EVENT_SESSION_STARTED, &payload);
}

/// Announce a frozen countdown.
pub fn broadcast_session_paused(state: &SharedState, session_id: Uuid, remaining: u64) {
    let payload = SessionPausedEvent {
        session_id,
        remaining,
    };
    send_room_event(state, session_id, EVENT_SESSION_PAUSED, &payload);
}

/// Announce a resumed countdown with its new deadline.
pub fn broadcast_session_resumed(
    state: &SharedState,
    session_id: Uuid,
    ends_at: SystemTime,
    now: SystemTime,
) {
    let payload = SessionResumedEvent {
        session_id,
        remaining: remaining_secs(ends_at, now),
        ends_at: epoch_millis(ends_at),
    };
    send_room_event(state, session_id, EVENT_SESSION_RESUMED, &payload);
}

pub fn broadcast_session_ended(
    state: &SharedState,
    session_id: Uuid,
    reason: EndReason,
    ended_at: SystemTime,
) {
    let payload = SessionEndedEvent {
        session_id,
        reason,
        ended_at: epoch_millis(ended_at),
    };
    send_room_event(state, session_id, EVENT_SESSION_ENDED, &payload);
}

/// One countdown step; `remaining` is in whole seconds.
pub fn broadcast_timer_tick(state: &SharedState, session_id: Uuid, remaining: u64) {
    let payload = TimerTickEvent {
        session_id,
        remaining,
    };
    send_room_event(state, session_id, EVENT_TIMER_TICK, &payload);
}

pub fn broadcast_participant_joined(
    state: &SharedState,
    session: &SessionEntity,
    student_id: &str,
    name: &str,
) {
    let payload = ParticipantJoinedEvent {
        session_id: session.id,
        student_id: student_id.to_string(),
        name: name.to_string(),
        count: session.participants.len(),
    };
    send_room_event(state, session.id, EVENT_PARTICIPANT_JOINED, &payload);
}

/// Publish the ranked rows of a session.
pub fn broadcast_leaderboard(state: &SharedState, session_id: Uuid, rows: Vec<LeaderboardRow>) {
    let payload = LeaderboardUpdateEvent {
        session_id,
        rows: rows.into_iter().map(LeaderboardRowDto::from).collect(),
    };
    send_room_event(state, session_id, EVENT_LEADERBOARD_UPDATE, &payload);
}

fn send_room_event<T>(state: &SharedState, session_id: Uuid, event: &str, payload: &T)
where
    T: Serialize,
{
    match ServerEvent::json(event, payload) {
        Ok(message) => state.rooms().broadcast(session_id, message),
        Err(err) => {
            warn!(session_id = %session_id, event, error = %err, "failed to serialize room event")
        }
    }
}
