use rand::Rng;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{ParticipantEntity, SessionEntity, SessionPatch},
    error::ServiceError,
    services::{room_events, timer_service},
    state::{
        SharedState,
        clock::{epoch_millis, remaining_secs},
        state_machine::SessionStatus,
    },
};

/// Characters used in join codes; `0/O` and `1/I` are left out.
const JOIN_CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// What a reconnecting client needs to resync with a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recovery {
    /// A countdown is running; `ends_at` is epoch milliseconds.
    Running { ends_at: u64, remaining: u64 },
    /// The countdown is frozen with `remaining` seconds left.
    Paused { remaining: u64 },
    /// The session is over or its deadline passed.
    Expired,
    /// No countdown: the session is ready, or unknown when `status` is `None`.
    Idle { status: Option<SessionStatus> },
}

/// Open a session for `quiz_id` with a join code unique among live sessions.
pub async fn create(
    state: &SharedState,
    quiz_id: &str,
    teacher_id: &str,
) -> Result<SessionEntity, ServiceError> {
    let store = state.require_store().await?;
    if store.get_quiz(quiz_id.to_string()).await?.is_none() {
        return Err(ServiceError::NotFound(format!("quiz `{quiz_id}` not found")));
    }

    let config = state.config();
    let _guard = state.lock_join_codes().await;
    let join_code = allocate_join_code(
        state,
        config.join_code_length(),
        config.join_code_attempts(),
    )
    .await?;
    let join_code = match join_code {
        Some(code) => code,
        None => {
            warn!(
                length = config.join_code_length(),
                "join code space crowded; using fallback length"
            );
            allocate_join_code(
                state,
                config.join_code_fallback_length(),
                config.join_code_attempts(),
            )
            .await?
            .ok_or(ServiceError::DuplicateJoinCode)?
        }
    };

    let session = SessionEntity::new(
        quiz_id.to_string(),
        teacher_id.to_string(),
        join_code,
        state.clock().now(),
    );
    store.save_session(session.clone()).await?;

    info!(session_id = %session.id, join_code = %session.join_code, quiz_id, "session created");
    Ok(session)
}

async fn allocate_join_code(
    state: &SharedState,
    length: usize,
    attempts: u32,
) -> Result<Option<String>, ServiceError> {
    let store = state.require_store().await?;
    for _ in 0..attempts {
        let candidate = random_code(length);
        if store.get_session_by_join_code(candidate.clone()).await?.is_none() {
            return Ok(Some(candidate));
        }
        debug!(join_code = %candidate, "join code already taken");
    }
    Ok(None)
}

fn random_code(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length)
        .map(|_| char::from(JOIN_CODE_ALPHABET[rng.random_range(0..JOIN_CODE_ALPHABET.len())]))
        .collect()
}

/// Load a session by id.
pub async fn get(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    let store = state.require_store().await?;
    store
        .get_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))
}

/// Every session that has not ended.
pub async fn list_active(state: &SharedState) -> Result<Vec<SessionEntity>, ServiceError> {
    let store = state.require_store().await?;
    Ok(store.list_active_sessions().await?)
}

/// Add a student to a session. Joining twice is a no-op that returns the session.
pub async fn join(
    state: &SharedState,
    session_id: Uuid,
    student_id: &str,
    name: &str,
) -> Result<SessionEntity, ServiceError> {
    let _gate = state.lock_session(session_id).await;
    let session = get(state, session_id).await?;
    let now = state.clock().now();

    let past_deadline = session.status == SessionStatus::Running
        && session.ends_at.is_some_and(|ends_at| ends_at <= now);
    if session.status.is_ended() || past_deadline {
        return Err(ServiceError::Expired(format!("session `{session_id}` is over")));
    }

    if session.has_participant(student_id) {
        debug!(session_id = %session_id, student_id, "student already joined");
        return Ok(session);
    }

    let mut participants = session.participants;
    participants.push(ParticipantEntity {
        student_id: student_id.to_string(),
        name: name.to_string(),
        joined_at: now,
    });
    let store = state.require_store().await?;
    let session = store
        .update_session(
            session_id,
            SessionPatch {
                participants: Some(participants),
                updated_at: Some(now),
                ..SessionPatch::default()
            },
        )
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))?;

    info!(session_id = %session_id, student_id, count = session.participants.len(), "student joined");
    room_events::broadcast_participant_joined(state, &session, student_id, name);
    Ok(session)
}

/// Join through the code shown to the class.
pub async fn join_by_code(
    state: &SharedState,
    join_code: &str,
    student_id: &str,
    name: &str,
) -> Result<SessionEntity, ServiceError> {
    let code = join_code.trim().to_ascii_uppercase();
    let store = state.require_store().await?;
    let session = store
        .get_session_by_join_code(code.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("join code `{code}` not found")))?;
    join(state, session.id, student_id, name).await
}

/// Compute the resync reply for a reconnecting client.
///
/// A running session without a countdown in this process (restart) is re-armed
/// from its persisted deadline.
pub async fn recover(state: &SharedState, session_id: Uuid) -> Result<Recovery, ServiceError> {
    let _gate = state.lock_session(session_id).await;
    let store = state.require_store().await?;
    let Some(session) = store.get_session(session_id).await? else {
        return Ok(Recovery::Idle { status: None });
    };
    let now = state.clock().now();

    let recovery = match session.status {
        SessionStatus::Ended => Recovery::Expired,
        SessionStatus::Ready => Recovery::Idle {
            status: Some(SessionStatus::Ready),
        },
        SessionStatus::Paused => Recovery::Paused {
            remaining: session
                .paused_remaining_ms
                .map(|ms| ms.div_ceil(1_000))
                .unwrap_or_default(),
        },
        SessionStatus::Running => {
            let Some(ends_at) = session.ends_at else {
                warn!(session_id = %session_id, "running session has no deadline");
                return Ok(Recovery::Idle {
                    status: Some(SessionStatus::Running),
                });
            };
            if !state.timers().is_armed(session_id) {
                info!(session_id = %session_id, "re-arming countdown after reconnect");
                timer_service::schedule(state, session_id, ends_at);
            }
            match remaining_secs(ends_at, now) {
                0 => Recovery::Expired,
                remaining => Recovery::Running {
                    ends_at: epoch_millis(ends_at),
                    remaining,
                },
            }
        }
    };
    Ok(recovery)
}
