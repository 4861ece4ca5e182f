use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::{
        models::{AttemptEntity, SessionEntity, StudentAnswerEntity},
        session_store::SessionStore,
    },
    error::ServiceError,
    services::room_events,
    state::{
        SharedState,
        clock::{epoch_millis, from_epoch_millis},
        leaderboard::LeaderboardRow,
        state_machine::SessionStatus,
    },
};

/// One `student:answer` as received by the gateway.
#[derive(Debug, Clone)]
pub struct AnswerSubmission {
    pub session_id: Uuid,
    pub student_id: String,
    pub question_id: String,
    pub answer: String,
    /// Client send time, epoch milliseconds.
    pub client_ts: Option<u64>,
}

/// Trim, collapse inner whitespace and lowercase.
pub fn normalize_answer(answer: &str) -> String {
    answer
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Record an answer of a running session and publish the updated leaderboard.
///
/// Re-answering a question replaces the previous answer. Returns the student's
/// new leaderboard row.
pub async fn submit_answer(
    state: &SharedState,
    submission: AnswerSubmission,
) -> Result<LeaderboardRow, ServiceError> {
    let AnswerSubmission {
        session_id,
        student_id,
        question_id,
        answer,
        client_ts,
    } = submission;

    // Held until the attempt is written so a concurrent stop or expiry is
    // either seen here or runs after the answer is on the board.
    let _session_gate = state.lock_session(session_id).await;
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    let now = state.clock().now();
    ensure_not_expired(&session, now)?;
    if !session.status.accepts_answers() {
        return Err(ServiceError::NotAcceptingAnswers(format!(
            "session `{session_id}` is {}",
            session.status.as_str()
        )));
    }
    if !session.has_participant(&student_id) {
        return Err(ServiceError::InvalidInput(format!(
            "student `{student_id}` has not joined session `{session_id}`"
        )));
    }

    let quiz = store
        .get_quiz(session.quiz_id.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("quiz `{}` not found", session.quiz_id)))?;
    let question = quiz.question(&question_id).ok_or_else(|| {
        ServiceError::NotFound(format!("question `{question_id}` not found"))
    })?;

    let normalized = normalize_answer(&answer);
    let is_correct = normalized == normalize_answer(&question.answer);
    let latency_ms = client_ts
        .map(from_epoch_millis)
        .filter(|sent_at| *sent_at <= now)
        .map(|sent_at| epoch_millis(now) - epoch_millis(sent_at));

    let _gate = state.lock_attempt(session_id, &student_id).await;
    let mut attempt = match find_attempt(&store, &session, &student_id).await? {
        Some(attempt) => attempt,
        None => AttemptEntity::new(session.quiz_id.clone(), session_id, student_id.clone(), now),
    };
    if attempt.is_submitted() {
        return Err(ServiceError::InvalidInput("attempt already submitted".into()));
    }

    attempt.record(
        StudentAnswerEntity {
            question_id: question_id.clone(),
            answer: normalized,
            is_correct,
            answered_at: now,
            latency_ms,
        },
        quiz.questions.len(),
    );
    store.save_attempt(attempt.clone()).await?;
    debug!(
        session_id = %session_id,
        student_id = %student_id,
        question_id = %question_id,
        is_correct,
        "answer recorded"
    );

    ensure_leaderboard(state, &store, &session).await;
    let row = state
        .leaderboards()
        .record_answers(session_id, &student_id, &attempt.answers);
    room_events::broadcast_leaderboard(state, session_id, state.leaderboards().snapshot(session_id));
    Ok(row)
}

/// Turn in the student's attempt. Submitting twice returns the stored attempt.
pub async fn submit_attempt(
    state: &SharedState,
    session_id: Uuid,
    student_id: &str,
) -> Result<AttemptEntity, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    let now = state.clock().now();
    ensure_not_expired(&session, now)?;

    let quiz = store
        .get_quiz(session.quiz_id.clone())
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("quiz `{}` not found", session.quiz_id)))?;

    let _gate = state.lock_attempt(session_id, student_id).await;
    let mut attempt = match find_attempt(&store, &session, student_id).await? {
        Some(attempt) if attempt.is_submitted() => return Ok(attempt),
        Some(attempt) => attempt,
        None => AttemptEntity::new(session.quiz_id.clone(), session_id, student_id.to_string(), now),
    };

    attempt.submitted_at = Some(now);
    attempt.rescore(quiz.questions.len());
    store.save_attempt(attempt.clone()).await?;

    info!(
        session_id = %session_id,
        student_id,
        score = attempt.score,
        percent = attempt.percent,
        "attempt submitted"
    );
    Ok(attempt)
}

/// Ranked rows of a session, rebuilt from stored attempts when not in memory.
pub async fn leaderboard(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Vec<LeaderboardRow>, ServiceError> {
    let store = state.require_store().await?;
    load_session(&store, session_id).await?;

    if state.leaderboards().is_tracked(session_id) {
        return Ok(state.leaderboards().snapshot(session_id));
    }

    // Rebuild under the gate so a concurrent end cannot leave a stray board behind.
    let _gate = state.lock_session(session_id).await;
    let session = load_session(&store, session_id).await?;
    if state.leaderboards().is_tracked(session_id) {
        return Ok(state.leaderboards().snapshot(session_id));
    }
    let attempts = store.get_attempts_by_quiz(session.quiz_id.clone()).await?;
    state.leaderboards().rebuild(session_id, attempts.iter());
    let rows = state.leaderboards().snapshot(session_id);
    if session.status.is_ended() {
        state.leaderboards().discard(session_id);
    }
    Ok(rows)
}

/// Every attempt recorded in the session.
pub async fn list_session_attempts(
    state: &SharedState,
    session_id: Uuid,
) -> Result<Vec<AttemptEntity>, ServiceError> {
    let store = state.require_store().await?;
    let session = load_session(&store, session_id).await?;
    let attempts = store.get_attempts_by_quiz(session.quiz_id).await?;
    Ok(attempts
        .into_iter()
        .filter(|attempt| attempt.session_id == session_id)
        .collect())
}

async fn load_session(
    store: &Arc<dyn SessionStore>,
    session_id: Uuid,
) -> Result<SessionEntity, ServiceError> {
    store
        .get_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))
}

fn ensure_not_expired(session: &SessionEntity, now: std::time::SystemTime) -> Result<(), ServiceError> {
    let past_deadline = session.status == SessionStatus::Running
        && session.ends_at.is_some_and(|ends_at| ends_at <= now);
    if session.status.is_ended() || past_deadline {
        return Err(ServiceError::Expired(format!("session `{}` is over", session.id)));
    }
    Ok(())
}

async fn find_attempt(
    store: &Arc<dyn SessionStore>,
    session: &SessionEntity,
    student_id: &str,
) -> Result<Option<AttemptEntity>, ServiceError> {
    let attempts = store
        .get_attempts_by_student(session.quiz_id.clone(), student_id.to_string())
        .await?;
    Ok(attempts
        .into_iter()
        .find(|attempt| attempt.session_id == session.id))
}

/// Load the session's board from storage after a restart so rankings keep their order.
///
/// Callers hold the session gate; ended sessions never get a board back.
async fn ensure_leaderboard(state: &SharedState, store: &Arc<dyn SessionStore>, session: &SessionEntity) {
    if state.leaderboards().is_tracked(session.id) || session.status.is_ended() {
        return;
    }
    match store.get_attempts_by_quiz(session.quiz_id.clone()).await {
        Ok(attempts) => state.leaderboards().rebuild(session.id, attempts.iter()),
        Err(err) => {
            warn!(session_id = %session.id, error = %err, "failed to rebuild leaderboard")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{
        config::AppConfig,
        dao::session_store::MemorySessionStore,
        services::{lifecycle_service, session_service},
        state::AppState,
    };

    async fn running_session(state: &SharedState) -> SessionEntity {
        let store = Arc::new(MemorySessionStore::new());
        for quiz in state.config().quizzes() {
            SessionStore::save_quiz(store.as_ref(), quiz.clone())
                .await
                .unwrap();
        }
        state.install_store(store).await;
        let session = session_service::create(state, "demo", "t").await.unwrap();
        session_service::join(state, session.id, "s1", "Ada")
            .await
            .unwrap();
        lifecycle_service::start(state, session.id, Some(60), None)
            .await
            .unwrap()
    }

    fn submission(session_id: Uuid, question_id: &str, answer: &str) -> AnswerSubmission {
        AnswerSubmission {
            session_id,
            student_id: "s1".into(),
            question_id: question_id.into(),
            answer: answer.into(),
            client_ts: None,
        }
    }

    #[test]
    fn normalisation_ignores_case_and_spacing() {
        assert_eq!(normalize_answer("  New   York "), "new york");
        assert_eq!(normalize_answer("H2O"), normalize_answer("h2o"));
    }

    #[tokio::test(start_paused = true)]
    async fn answers_update_the_leaderboard() {
        let state = AppState::new(AppConfig::default());
        let session = running_session(&state).await;

        let row = submit_answer(&state, submission(session.id, "q1", " 42 ")).await.unwrap();
        assert_eq!((row.correct, row.total), (1, 1));

        let row = submit_answer(&state, submission(session.id, "q2", "London")).await.unwrap();
        assert_eq!((row.correct, row.total, row.percent), (1, 2, 50.0));

        let row = submit_answer(&state, submission(session.id, "q2", "paris")).await.unwrap();
        assert_eq!((row.correct, row.total, row.percent), (2, 2, 100.0));

        let attempts = list_session_attempts(&state, session.id).await.unwrap();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].answers.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn paused_session_rejects_answers() {
        let state = AppState::new(AppConfig::default());
        let session = running_session(&state).await;
        lifecycle_service::pause(&state, session.id).await.unwrap();

        let err = submit_answer(&state, submission(session.id, "q1", "42"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotAcceptingAnswers(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn answers_after_deadline_are_expired() {
        let state = AppState::new(AppConfig::default());
        let session = running_session(&state).await;
        tokio::time::sleep(Duration::from_secs(61)).await;

        let err = submit_answer(&state, submission(session.id, "q1", "42"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::Expired(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn answer_waiting_on_a_stop_is_expired() {
        let state = AppState::new(AppConfig::default());
        let session_id = running_session(&state).await.id;

        let held = state.lock_session(session_id).await;
        let stopper = {
            let state = state.clone();
            tokio::spawn(async move { lifecycle_service::stop(&state, session_id).await })
        };
        tokio::task::yield_now().await;
        let answer = {
            let state = state.clone();
            tokio::spawn(async move { submit_answer(&state, submission(session_id, "q1", "42")).await })
        };
        tokio::task::yield_now().await;
        drop(held);

        stopper.await.unwrap().unwrap();
        let err = answer.await.unwrap().unwrap_err();
        assert!(matches!(err, ServiceError::Expired(_)), "{err:?}");
        assert!(list_session_attempts(&state, session_id).await.unwrap().is_empty());
        assert!(!state.leaderboards().is_tracked(session_id));
    }

    #[tokio::test(start_paused = true)]
    async fn ended_leaderboard_read_leaves_no_board() {
        let state = AppState::new(AppConfig::default());
        let session = running_session(&state).await;
        submit_answer(&state, submission(session.id, "q1", "42")).await.unwrap();
        lifecycle_service::stop(&state, session.id).await.unwrap();

        let rows = leaderboard(&state, session.id).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert!(!state.leaderboards().is_tracked(session.id));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_question_and_stranger_are_refused() {
        let state = AppState::new(AppConfig::default());
        let session = running_session(&state).await;

        let err = submit_answer(&state, submission(session.id, "q9", "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));

        let mut stranger = submission(session.id, "q1", "42");
        stranger.student_id = "s9".into();
        let err = submit_answer(&state, stranger).await.unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn submitted_attempt_is_frozen() {
        let state = AppState::new(AppConfig::default());
        let session = running_session(&state).await;
        submit_answer(&state, submission(session.id, "q1", "42")).await.unwrap();

        let attempt = submit_attempt(&state, session.id, "s1").await.unwrap();
        assert!(attempt.is_submitted());
        assert_eq!(attempt.score, 1);
        assert_eq!(attempt.percent, 33.3);

        let again = submit_attempt(&state, session.id, "s1").await.unwrap();
        assert_eq!(again.submitted_at, attempt.submitted_at);

        let err = submit_answer(&state, submission(session.id, "q2", "paris"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InvalidInput(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn leaderboard_is_rebuilt_from_attempts() {
        let state = AppState::new(AppConfig::default());
        let session = running_session(&state).await;
        submit_answer(&state, submission(session.id, "q1", "42")).await.unwrap();
        state.leaderboards().discard(session.id);

        let rows = leaderboard(&state, session.id).await.unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].student_id, "s1");
        assert_eq!(rows[0].percent, 100.0);
    }
}
