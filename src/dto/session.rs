use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;
use validator::Validate;

use crate::{
    dao::models::{AttemptEntity, ParticipantEntity, SessionEntity, StudentAnswerEntity},
    dto::{
        format_system_time,
        validation::{validate_join_code, validate_not_blank},
    },
    state::{
        clock::{epoch_millis, remaining_secs},
        state_machine::SessionStatus,
    },
};

/// Payload used to open a live session for a quiz.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionRequest {
    #[validate(length(min = 1, max = 128), custom(function = validate_not_blank))]
    pub quiz_id: String,
    #[validate(length(min = 1, max = 128), custom(function = validate_not_blank))]
    pub teacher_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSessionResponse {
    pub session_id: Uuid,
    pub join_code: String,
}

/// Options of a launch; every field is optional.
#[derive(Debug, Default, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    /// Countdown length in seconds, falls back to the quiz then the server default.
    #[serde(default)]
    #[validate(range(max = 86_400))]
    pub duration_sec: Option<i64>,
    /// Scheduled launch time, epoch milliseconds. Defaults to now.
    #[serde(default)]
    pub start_at: Option<u64>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LaunchResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    pub started_at: Option<String>,
    pub ends_at: Option<String>,
    pub started_at_ms: Option<u64>,
    pub ends_at_ms: Option<u64>,
}

impl From<&SessionEntity> for LaunchResponse {
    fn from(session: &SessionEntity) -> Self {
        Self {
            session_id: session.id,
            status: session.status,
            started_at: session.started_at.map(format_system_time),
            ends_at: session.ends_at.map(format_system_time),
            started_at_ms: session.started_at.map(epoch_millis),
            ends_at_ms: session.ends_at.map(epoch_millis),
        }
    }
}

/// Status reply of pause, resume and end.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TransitionResponse {
    pub session_id: Uuid,
    pub status: SessionStatus,
    /// Seconds left; frozen while paused, absent once ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remaining: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ends_at_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<String>,
}

impl TransitionResponse {
    /// Describe `session` as seen at `now`.
    pub fn new(session: &SessionEntity, now: std::time::SystemTime) -> Self {
        let running = session.status == SessionStatus::Running;
        Self {
            session_id: session.id,
            status: session.status,
            remaining: remaining_of(session, now),
            ends_at: session.ends_at.filter(|_| running).map(format_system_time),
            ends_at_ms: session.ends_at.filter(|_| running).map(epoch_millis),
            ended_at: session.ended_at.map(format_system_time),
        }
    }
}

/// Join request made with the code shown to the class.
#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    #[validate(custom(function = validate_join_code))]
    pub join_code: String,
    #[validate(length(min = 1, max = 64), custom(function = validate_not_blank))]
    pub student_id: String,
    #[validate(length(min = 1, max = 64), custom(function = validate_not_blank))]
    pub name: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantView {
    pub student_id: String,
    pub name: String,
    pub joined_at: String,
}

impl From<&ParticipantEntity> for ParticipantView {
    fn from(participant: &ParticipantEntity) -> Self {
        Self {
            student_id: participant.student_id.clone(),
            name: participant.name.clone(),
            joined_at: format_system_time(participant.joined_at),
        }
    }
}

/// Full view of a session.
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: Uuid,
    pub quiz_id: String,
    pub join_code: String,
    pub teacher_id: String,
    pub status: SessionStatus,
    pub created_at: String,
    pub started_at: Option<String>,
    pub ends_at: Option<String>,
    pub ends_at_ms: Option<u64>,
    pub ended_at: Option<String>,
    /// Seconds left: live while running, frozen while paused.
    pub remaining: Option<u64>,
    pub participants: Vec<ParticipantView>,
}

impl SessionView {
    /// Describe `session` as seen at `now`.
    pub fn new(session: &SessionEntity, now: std::time::SystemTime) -> Self {
        Self {
            session_id: session.id,
            quiz_id: session.quiz_id.clone(),
            join_code: session.join_code.clone(),
            teacher_id: session.teacher_id.clone(),
            status: session.status,
            created_at: format_system_time(session.created_at),
            started_at: session.started_at.map(format_system_time),
            ends_at: session.ends_at.map(format_system_time),
            ends_at_ms: session.ends_at.map(epoch_millis),
            ended_at: session.ended_at.map(format_system_time),
            remaining: remaining_of(session, now),
            participants: session.participants.iter().map(Into::into).collect(),
        }
    }
}

/// Seconds left for a running or paused session.
fn remaining_of(session: &SessionEntity, now: std::time::SystemTime) -> Option<u64> {
    match session.status {
        SessionStatus::Running => session.ends_at.map(|ends_at| remaining_secs(ends_at, now)),
        SessionStatus::Paused => session
            .paused_remaining_ms
            .map(|ms| ms.div_ceil(1_000)),
        SessionStatus::Ready | SessionStatus::Ended => None,
    }
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitAttemptRequest {
    #[validate(length(min = 1, max = 64), custom(function = validate_not_blank))]
    pub student_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnswerView {
    pub question_id: String,
    pub answer: String,
    pub is_correct: bool,
    pub answered_at: String,
    pub latency_ms: Option<u64>,
}

impl From<&StudentAnswerEntity> for AnswerView {
    fn from(answer: &StudentAnswerEntity) -> Self {
        Self {
            question_id: answer.question_id.clone(),
            answer: answer.answer.clone(),
            is_correct: answer.is_correct,
            answered_at: format_system_time(answer.answered_at),
            latency_ms: answer.latency_ms,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AttemptView {
    pub attempt_id: Uuid,
    pub quiz_id: String,
    pub session_id: Uuid,
    pub student_id: String,
    pub score: u32,
    pub percent: f64,
    pub answers: Vec<AnswerView>,
    pub started_at: String,
    pub submitted_at: Option<String>,
}

impl From<&AttemptEntity> for AttemptView {
    fn from(attempt: &AttemptEntity) -> Self {
        Self {
            attempt_id: attempt.id,
            quiz_id: attempt.quiz_id.clone(),
            session_id: attempt.session_id,
            student_id: attempt.student_id.clone(),
            score: attempt.score,
            percent: attempt.percent,
            answers: attempt.answers.iter().map(Into::into).collect(),
            started_at: format_system_time(attempt.started_at),
            submitted_at: attempt.submitted_at.map(format_system_time),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn launch_duration_is_capped_at_a_day() {
        let request: LaunchRequest =
            serde_json::from_str(r#"{"durationSec": 1000000000000}"#).unwrap();
        assert!(request.validate().is_err());

        let request: LaunchRequest = serde_json::from_str(r#"{"durationSec": 0}"#).unwrap();
        assert!(request.validate().is_ok());
        assert!(LaunchRequest::default().validate().is_ok());
    }

    #[test]
    fn paused_view_reports_frozen_remaining() {
        let now = SystemTime::now();
        let mut session = SessionEntity::new("quiz".into(), "t".into(), "ABC123".into(), now);
        session.status = SessionStatus::Paused;
        session.ends_at = Some(now - Duration::from_secs(5));
        session.paused_remaining_ms = Some(40_200);

        let view = SessionView::new(&session, now);
        assert_eq!(view.remaining, Some(41));

        let reply = TransitionResponse::new(&session, now);
        assert!(reply.ends_at.is_none());
    }

    #[test]
    fn running_view_counts_down_from_ends_at() {
        let now = SystemTime::now();
        let mut session = SessionEntity::new("quiz".into(), "t".into(), "ABC123".into(), now);
        session.status = SessionStatus::Running;
        session.ends_at = Some(now + Duration::from_millis(69_400));

        let view = SessionView::new(&session, now);
        assert_eq!(view.remaining, Some(70));
        assert_eq!(view.ends_at_ms, session.ends_at.map(epoch_millis));
    }

    #[test]
    fn join_request_checks_code_format() {
        let request = JoinRequest {
            join_code: "AB-12".into(),
            student_id: "s1".into(),
            name: "Ada".into(),
        };
        assert!(request.validate().is_err());
    }
}
