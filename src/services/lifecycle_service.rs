use std::time::{Duration, SystemTime};

use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, SessionPatch},
    dto::sse::EndReason,
    error::ServiceError,
    services::{room_events, timer_service},
    state::{
        SharedState,
        clock::{ceil_secs, remaining},
        state_machine::{Plan, SessionEvent},
        transitions::run_transition,
    },
};

/// Longest countdown a launch may ask for.
pub const MAX_DURATION_SECS: i64 = 24 * 60 * 60;
/// How far a scheduled `start_at` may sit from now, either way.
const MAX_START_OFFSET: Duration = Duration::from_secs(24 * 60 * 60);

/// Launch a ready session and arm its countdown.
///
/// The duration falls back to the quiz's suggestion, then to the configured
/// default. A non-positive duration starts the session with `ends_at = now`,
/// which the countdown expires on its first tick.
pub async fn start(
    state: &SharedState,
    session_id: Uuid,
    duration_secs: Option<i64>,
    start_at: Option<SystemTime>,
) -> Result<SessionEntity, ServiceError> {
    run_transition(state, session_id, SessionEvent::Start, |plan, session| async move {
        let duration = match duration_secs {
            Some(duration) => duration,
            None => quiz_duration(state, &session).await?,
        };

        let now = state.clock().now();
        let (started_at, ends_at) = launch_window(now, start_at, duration)?;

        let patch = SessionPatch {
            status: Some(plan.to),
            started_at: Some(started_at),
            paused_remaining_ms: Some(None),
            updated_at: Some(now),
            ..SessionPatch::default()
        };
        let session = timer_service::arm(state, session_id, ends_at, patch).await?;

        info!(session_id = %session_id, duration, "session started");
        room_events::broadcast_session_started(state, &session, now);
        Ok(session)
    })
    .await
}

/// Freeze the countdown, keeping the time left for [`resume`].
pub async fn pause(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    run_transition(state, session_id, SessionEvent::Pause, |plan, session| async move {
        let now = state.clock().now();
        let left = session
            .ends_at
            .map(|ends_at| remaining(ends_at, now))
            .unwrap_or_default();

        let store = state.require_store().await?;
        let session = store
            .update_session(
                session_id,
                SessionPatch {
                    status: Some(plan.to),
                    paused_remaining_ms: Some(Some(left.as_millis() as u64)),
                    updated_at: Some(now),
                    ..SessionPatch::default()
                },
            )
            .await?
            .ok_or_else(|| not_found(session_id))?;
        timer_service::disarm(state, session_id);

        info!(session_id = %session_id, remaining_ms = left.as_millis() as u64, "session paused");
        room_events::broadcast_session_paused(state, session_id, ceil_secs(left));
        Ok(session)
    })
    .await
}

/// Restart a paused countdown from the time it had left.
pub async fn resume(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    run_transition(state, session_id, SessionEvent::Resume, |plan, session| async move {
        let left = match session.paused_remaining_ms {
            Some(ms) => Duration::from_millis(ms),
            None => session
                .ends_at
                .map(|ends_at| remaining(ends_at, session.updated_at))
                .unwrap_or_default(),
        };
        let now = state.clock().now();
        let ends_at = now + left;

        let patch = SessionPatch {
            status: Some(plan.to),
            paused_remaining_ms: Some(None),
            updated_at: Some(now),
            ..SessionPatch::default()
        };
        let session = timer_service::arm(state, session_id, ends_at, patch).await?;

        info!(session_id = %session_id, remaining_ms = left.as_millis() as u64, "session resumed");
        room_events::broadcast_session_resumed(state, session_id, ends_at, now);
        Ok(session)
    })
    .await
}

/// End a running or paused session on the teacher's request.
pub async fn stop(state: &SharedState, session_id: Uuid) -> Result<SessionEntity, ServiceError> {
    run_transition(state, session_id, SessionEvent::Stop, |plan, _session| async move {
        finish(state, plan, EndReason::Stopped, None).await
    })
    .await
}

/// End a running session whose deadline passed.
///
/// `generation` identifies the tick loop asking for the expiry; a loop that
/// was replaced or disarmed in the meantime gets
/// [`ServiceError::InvalidTransition`] and nothing changes.
pub async fn expire(
    state: &SharedState,
    session_id: Uuid,
    generation: Option<u64>,
) -> Result<SessionEntity, ServiceError> {
    run_transition(state, session_id, SessionEvent::Expire, |plan, session| async move {
        let superseded = generation
            .is_some_and(|generation| state.timers().if_current(session_id, generation, || ()).is_none());
        if superseded {
            return Err(ServiceError::InvalidTransition(
                "countdown was superseded".into(),
            ));
        }

        let now = state.clock().now();
        if session.ends_at.is_some_and(|ends_at| ends_at > now) {
            return Err(ServiceError::InvalidTransition(
                "deadline not reached yet".into(),
            ));
        }

        finish(state, plan, EndReason::Expired, generation).await
    })
    .await
}

/// Write the ended status, stop the countdown and close the room.
///
/// The store write happens first: if it fails, the countdown stays armed so
/// the expiry can be retried.
async fn finish(
    state: &SharedState,
    plan: Plan,
    reason: EndReason,
    generation: Option<u64>,
) -> Result<SessionEntity, ServiceError> {
    let session_id = plan.session_id;
    let ended_at = state.clock().now();
    let store = state.require_store().await?;
    let session = store
        .update_session(
            session_id,
            SessionPatch {
                status: Some(plan.to),
                ended_at: Some(ended_at),
                updated_at: Some(ended_at),
                ..SessionPatch::default()
            },
        )
        .await?
        .ok_or_else(|| not_found(session_id))?;

    match generation {
        Some(generation) => {
            state.timers().release(session_id, generation);
        }
        None => {
            timer_service::disarm(state, session_id);
        }
    }

    info!(session_id = %session_id, reason = ?reason, "session ended");
    room_events::broadcast_session_ended(state, session_id, reason, ended_at);

    if !state.leaderboards().is_tracked(session_id) {
        match store.get_attempts_by_quiz(session.quiz_id.clone()).await {
            Ok(attempts) => state.leaderboards().rebuild(session_id, attempts.iter()),
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "failed to rebuild final leaderboard")
            }
        }
    }
    room_events::broadcast_leaderboard(state, session_id, state.leaderboards().snapshot(session_id));

    state.leaderboards().discard(session_id);
    state.rooms().close(session_id);
    state.forget_session_gates(session_id);
    Ok(session)
}

/// Resolve `(started_at, ends_at)` of a launch, refusing values out of range.
fn launch_window(
    now: SystemTime,
    start_at: Option<SystemTime>,
    duration: i64,
) -> Result<(SystemTime, SystemTime), ServiceError> {
    if duration > MAX_DURATION_SECS {
        return Err(ServiceError::InvalidInput(format!(
            "duration must not exceed {MAX_DURATION_SECS} seconds"
        )));
    }

    let started_at = start_at.unwrap_or(now);
    let offset = started_at
        .duration_since(now)
        .or_else(|_| now.duration_since(started_at))
        .unwrap_or_default();
    if offset > MAX_START_OFFSET {
        return Err(ServiceError::InvalidInput(
            "start time must be within a day of now".into(),
        ));
    }

    if duration <= 0 {
        return Ok((started_at, now));
    }
    let ends_at = started_at
        .checked_add(Duration::from_secs(duration.unsigned_abs()))
        .ok_or_else(|| ServiceError::InvalidInput("deadline out of range".into()))?;
    Ok((started_at, ends_at))
}

async fn quiz_duration(state: &SharedState, session: &SessionEntity) -> Result<i64, ServiceError> {
    let store = state.require_store().await?;
    let quiz_duration = store
        .get_quiz(session.quiz_id.clone())
        .await?
        .and_then(|quiz| quiz.duration_secs);
    Ok(i64::from(
        quiz_duration.unwrap_or_else(|| state.config().default_duration_secs()),
    ))
}

fn not_found(session_id: Uuid) -> ServiceError {
    ServiceError::NotFound(format!("session `{session_id}` not found"))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::{MemorySessionStore, SessionStore},
        services::room_events::{
            EVENT_LEADERBOARD_UPDATE, EVENT_SESSION_ENDED, EVENT_SESSION_PAUSED,
            EVENT_SESSION_STARTED,
        },
        state::{AppState, clock::remaining_secs, state_machine::SessionStatus},
    };

    async fn ready_session(state: &SharedState) -> (Arc<MemorySessionStore>, SessionEntity) {
        let store = Arc::new(MemorySessionStore::new());
        state.install_store(store.clone()).await;
        let session = SessionEntity::new(
            "demo".into(),
            "teacher".into(),
            "ABC234".into(),
            state.clock().now(),
        );
        SessionStore::save_session(store.as_ref(), session.clone())
            .await
            .unwrap();
        (store, session)
    }

    #[tokio::test(start_paused = true)]
    async fn start_persists_deadline_and_announces_it() {
        let state = AppState::new(AppConfig::default());
        let (_store, session) = ready_session(&state).await;
        let mut room = state.rooms().subscribe(session.id);

        let started = start(&state, session.id, Some(60), None).await.unwrap();

        assert_eq!(started.status, SessionStatus::Running);
        let ends_at = started.ends_at.unwrap();
        assert_eq!(remaining_secs(ends_at, state.clock().now()), 60);
        assert!(state.timers().is_armed(session.id));
        assert_eq!(room.recv().await.unwrap().event, EVENT_SESSION_STARTED);
    }

    #[tokio::test(start_paused = true)]
    async fn start_uses_configured_default_duration() {
        let state = AppState::new(AppConfig::default().with_quizzes(Vec::new()));
        let (_store, session) = ready_session(&state).await;

        let started = start(&state, session.id, None, None).await.unwrap();

        let ends_at = started.ends_at.unwrap();
        assert_eq!(
            remaining_secs(ends_at, state.clock().now()),
            u64::from(state.config().default_duration_secs())
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_on_ready_session_changes_nothing() {
        let state = AppState::new(AppConfig::default());
        let (store, session) = ready_session(&state).await;
        let mut room = state.rooms().subscribe(session.id);

        let err = pause(&state, session.id).await.unwrap_err();

        assert!(matches!(err, ServiceError::InvalidTransition(_)));
        let stored = SessionStore::get_session(store.as_ref(), session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Ready);
        assert!(!state.timers().is_armed(session.id));
        assert!(room.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn out_of_range_launch_leaves_session_ready() {
        let state = AppState::new(AppConfig::default());
        let (store, session) = ready_session(&state).await;
        let far_start = state.clock().now() + Duration::from_secs(2 * 24 * 60 * 60);

        for (duration, start_at) in [
            (Some(i64::MAX), None),
            (Some(1_000_000_000_000), None),
            (Some(60), Some(far_start)),
        ] {
            let err = start(&state, session.id, duration, start_at).await.unwrap_err();
            assert!(matches!(err, ServiceError::InvalidInput(_)), "{err:?}");
        }

        let stored = SessionStore::get_session(store.as_ref(), session.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.status, SessionStatus::Ready);
        assert!(!state.timers().is_armed(session.id));
    }

    #[tokio::test(start_paused = true)]
    async fn longest_allowed_launch_is_accepted() {
        let state = AppState::new(AppConfig::default());
        let (_store, session) = ready_session(&state).await;

        let started = start(&state, session.id, Some(MAX_DURATION_SECS), None)
            .await
            .unwrap();

        assert_eq!(
            remaining_secs(started.ends_at.unwrap(), state.clock().now()),
            MAX_DURATION_SECS as u64
        );
    }

    #[tokio::test(start_paused = true)]
    async fn pause_freezes_remaining_time() {
        let state = AppState::new(AppConfig::default());
        let (_store, session) = ready_session(&state).await;
        start(&state, session.id, Some(60), None).await.unwrap();
        let mut room = state.rooms().subscribe(session.id);

        tokio::time::sleep(Duration::from_millis(19_500)).await;
        let paused = pause(&state, session.id).await.unwrap();

        assert_eq!(paused.status, SessionStatus::Paused);
        assert_eq!(paused.paused_remaining_ms, Some(40_500));
        assert_eq!(paused.updated_at, state.clock().now());
        assert!(!state.timers().is_armed(session.id));
        let event = loop {
            let event = room.recv().await.unwrap();
            if event.event == EVENT_SESSION_PAUSED {
                break event;
            }
        };
        assert_eq!(event.data["remaining"], 41);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_ends_session_and_publishes_final_board() {
        let state = AppState::new(AppConfig::default());
        let (_store, session) = ready_session(&state).await;
        start(&state, session.id, Some(60), None).await.unwrap();
        let mut room = state.rooms().subscribe(session.id);

        let ended = stop(&state, session.id).await.unwrap();

        assert_eq!(ended.status, SessionStatus::Ended);
        assert!(ended.ended_at.is_some());
        assert!(!state.timers().is_armed(session.id));

        let mut names = Vec::new();
        while let Ok(event) = room.recv().await {
            names.push(event.event);
        }
        assert_eq!(names, [EVENT_SESSION_ENDED, EVENT_LEADERBOARD_UPDATE]);

        let again = stop(&state, session.id).await.unwrap_err();
        assert!(matches!(again, ServiceError::InvalidTransition(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn expire_before_deadline_is_refused() {
        let state = AppState::new(AppConfig::default());
        let (_store, session) = ready_session(&state).await;
        start(&state, session.id, Some(60), None).await.unwrap();

        let err = expire(&state, session.id, None).await.unwrap_err();

        assert!(matches!(err, ServiceError::InvalidTransition(_)));
        assert!(state.timers().is_armed(session.id));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_end_write_keeps_countdown_armed() {
        let state = AppState::new(AppConfig::default());
        let (store, session) = ready_session(&state).await;
        start(&state, session.id, Some(60), None).await.unwrap();

        store.set_offline(true);
        assert!(stop(&state, session.id).await.is_err());
        assert!(state.timers().is_armed(session.id));

        store.set_offline(false);
        assert!(stop(&state, session.id).await.is_ok());
    }
}
