use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;
use validator::{Validate, ValidationErrors};

use crate::dto::validation::validate_not_blank;

/// Inbound event names.
pub const STUDENT_JOIN: &str = "student:join";
pub const STUDENT_ANSWER: &str = "student:answer";
pub const TEACHER_START: &str = "teacher:session:start";
pub const TEACHER_PAUSE: &str = "teacher:session:pause";
pub const TEACHER_RESUME: &str = "teacher:session:resume";
pub const TEACHER_STOP: &str = "teacher:session:stop";
pub const TEACHER_RECONNECT: &str = "teacher:session:reconnect";

#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

/// Failure to turn a text frame into a [`ClientMessage`].
#[derive(Debug, Error)]
pub enum ClientMessageError {
    /// Not JSON, or a payload with the wrong shape.
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    /// Well-formed payload that fails validation.
    #[error("invalid payload: {0}")]
    Invalid(#[from] ValidationErrors),
}

/// Messages accepted from realtime clients, framed as `{"event": ..., "data": ...}`.
#[derive(Debug)]
pub enum ClientMessage {
    StudentJoin(StudentJoinPayload),
    StudentAnswer(StudentAnswerPayload),
    TeacherStart(TeacherStartPayload),
    TeacherPause(SessionRefPayload),
    TeacherResume(SessionRefPayload),
    TeacherStop(SessionRefPayload),
    TeacherReconnect(SessionRefPayload),
    /// Event name nobody handles; ignored by the gateway.
    Unknown(String),
}

impl ClientMessage {
    /// Parse and validate a text frame.
    pub fn from_json_str(text: &str) -> Result<Self, ClientMessageError> {
        let Envelope { event, data } = serde_json::from_str(text)?;
        let message = match event.as_str() {
            STUDENT_JOIN => ClientMessage::StudentJoin(payload(data)?),
            STUDENT_ANSWER => ClientMessage::StudentAnswer(payload(data)?),
            TEACHER_START => ClientMessage::TeacherStart(payload(data)?),
            TEACHER_PAUSE => ClientMessage::TeacherPause(payload(data)?),
            TEACHER_RESUME => ClientMessage::TeacherResume(payload(data)?),
            TEACHER_STOP => ClientMessage::TeacherStop(payload(data)?),
            TEACHER_RECONNECT => ClientMessage::TeacherReconnect(payload(data)?),
            _ => ClientMessage::Unknown(event),
        };
        Ok(message)
    }

    /// Session the message is about, if any.
    pub fn session_id(&self) -> Option<Uuid> {
        match self {
            ClientMessage::StudentJoin(payload) => Some(payload.session_id),
            ClientMessage::StudentAnswer(payload) => Some(payload.session_id),
            ClientMessage::TeacherStart(payload) => Some(payload.session_id),
            ClientMessage::TeacherPause(payload)
            | ClientMessage::TeacherResume(payload)
            | ClientMessage::TeacherStop(payload)
            | ClientMessage::TeacherReconnect(payload) => Some(payload.session_id),
            ClientMessage::Unknown(_) => None,
        }
    }
}

fn payload<T>(data: Value) -> Result<T, ClientMessageError>
where
    T: DeserializeOwned + Validate,
{
    let payload: T = serde_json::from_value(data)?;
    payload.validate()?;
    Ok(payload)
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StudentJoinPayload {
    pub session_id: Uuid,
    #[validate(length(min = 1, max = 64), custom(function = validate_not_blank))]
    pub student_id: String,
    #[validate(length(min = 1, max = 64), custom(function = validate_not_blank))]
    pub name: String,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct StudentAnswerPayload {
    pub session_id: Uuid,
    #[validate(length(min = 1, max = 64), custom(function = validate_not_blank))]
    pub student_id: String,
    #[validate(length(min = 1, max = 128))]
    pub question_id: String,
    #[validate(length(max = 1024))]
    pub answer: String,
    /// Client send time, epoch milliseconds.
    #[serde(default)]
    pub ts: Option<u64>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct TeacherStartPayload {
    pub session_id: Uuid,
    /// Countdown length; zero or negative ends the session right away.
    #[serde(default)]
    #[validate(range(max = 86_400))]
    pub duration_sec: Option<i64>,
}

#[derive(Debug, Deserialize, ToSchema, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SessionRefPayload {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// `answer:ack`, sent to the submitting socket only.
pub struct AnswerAck {
    pub question_id: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// `answer:rejected`, sent to the submitting socket only.
pub struct AnswerRejected {
    pub question_id: String,
    /// Machine-readable reason, e.g. `expired` or `not_accepting_answers`.
    pub code: String,
    pub message: String,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// `error`, sent to the offending socket only.
pub struct ErrorEvent {
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_student_answer() {
        let session_id = Uuid::new_v4();
        let text = format!(
            r#"{{"event":"student:answer","data":{{"sessionId":"{session_id}","studentId":"s1","questionId":"q1","answer":"42","ts":1700000000000}}}}"#
        );
        let ClientMessage::StudentAnswer(answer) = ClientMessage::from_json_str(&text).unwrap() else {
            panic!("expected a student answer");
        };
        assert_eq!(answer.session_id, session_id);
        assert_eq!(answer.ts, Some(1_700_000_000_000));
    }

    #[test]
    fn start_duration_is_optional() {
        let text = format!(
            r#"{{"event":"teacher:session:start","data":{{"sessionId":"{}"}}}}"#,
            Uuid::nil()
        );
        let message = ClientMessage::from_json_str(&text).unwrap();
        assert!(matches!(
            message,
            ClientMessage::TeacherStart(TeacherStartPayload {
                duration_sec: None,
                ..
            })
        ));
        assert_eq!(message.session_id(), Some(Uuid::nil()));
    }

    #[test]
    fn start_duration_longer_than_a_day_is_invalid() {
        let text = format!(
            r#"{{"event":"teacher:session:start","data":{{"sessionId":"{}","durationSec":9223372036854775807}}}}"#,
            Uuid::nil()
        );
        assert!(matches!(
            ClientMessage::from_json_str(&text),
            Err(ClientMessageError::Invalid(_))
        ));
    }

    #[test]
    fn unknown_events_are_kept_by_name() {
        let message = ClientMessage::from_json_str(r#"{"event":"student:wave"}"#).unwrap();
        assert!(matches!(message, ClientMessage::Unknown(name) if name == "student:wave"));
    }

    #[test]
    fn blank_student_id_is_invalid() {
        let text = format!(
            r#"{{"event":"student:join","data":{{"sessionId":"{}","studentId":"  ","name":"Ada"}}}}"#,
            Uuid::nil()
        );
        assert!(matches!(
            ClientMessage::from_json_str(&text),
            Err(ClientMessageError::Invalid(_))
        ));
    }

    #[test]
    fn missing_session_id_is_malformed() {
        let err = ClientMessage::from_json_str(r#"{"event":"teacher:session:pause","data":{}}"#)
            .unwrap_err();
        assert!(matches!(err, ClientMessageError::Malformed(_)));
    }
}
