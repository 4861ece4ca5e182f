use mongodb::bson::{Bson, DateTime, Document, doc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::MongoDaoError;
use crate::{
    dao::models::{
        AttemptEntity, ParticipantEntity, QuestionEntity, QuizEntity, SessionEntity, SessionPatch,
        StudentAnswerEntity,
    },
    state::state_machine::SessionStatus,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoParticipantDocument {
    student_id: String,
    name: String,
    joined_at: DateTime,
}

impl From<ParticipantEntity> for MongoParticipantDocument {
    fn from(value: ParticipantEntity) -> Self {
        Self {
            student_id: value.student_id,
            name: value.name,
            joined_at: DateTime::from_system_time(value.joined_at),
        }
    }
}

impl From<MongoParticipantDocument> for ParticipantEntity {
    fn from(value: MongoParticipantDocument) -> Self {
        Self {
            student_id: value.student_id,
            name: value.name,
            joined_at: value.joined_at.to_system_time(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoSessionDocument {
    #[serde(rename = "_id")]
    id: String,
    quiz_id: String,
    join_code: String,
    teacher_id: String,
    status: SessionStatus,
    created_at: DateTime,
    updated_at: DateTime,
    started_at: Option<DateTime>,
    ends_at: Option<DateTime>,
    paused_remaining_ms: Option<i64>,
    ended_at: Option<DateTime>,
    #[serde(default)]
    participants: Vec<MongoParticipantDocument>,
}

impl From<SessionEntity> for MongoSessionDocument {
    fn from(value: SessionEntity) -> Self {
        Self {
            id: value.id.to_string(),
            quiz_id: value.quiz_id,
            join_code: value.join_code,
            teacher_id: value.teacher_id,
            status: value.status,
            created_at: DateTime::from_system_time(value.created_at),
            updated_at: DateTime::from_system_time(value.updated_at),
            started_at: value.started_at.map(DateTime::from_system_time),
            ends_at: value.ends_at.map(DateTime::from_system_time),
            paused_remaining_ms: value.paused_remaining_ms.map(millis_to_i64),
            ended_at: value.ended_at.map(DateTime::from_system_time),
            participants: value.participants.into_iter().map(Into::into).collect(),
        }
    }
}

impl TryFrom<MongoSessionDocument> for SessionEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoSessionDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&value.id)?,
            quiz_id: value.quiz_id,
            join_code: value.join_code,
            teacher_id: value.teacher_id,
            status: value.status,
            created_at: value.created_at.to_system_time(),
            updated_at: value.updated_at.to_system_time(),
            started_at: value.started_at.map(DateTime::to_system_time),
            ends_at: value.ends_at.map(DateTime::to_system_time),
            paused_remaining_ms: value.paused_remaining_ms.map(millis_to_u64),
            ended_at: value.ended_at.map(DateTime::to_system_time),
            participants: value.participants.into_iter().map(Into::into).collect(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoQuizDocument {
    #[serde(rename = "_id")]
    id: String,
    title: String,
    questions: Vec<QuestionEntity>,
    duration_secs: Option<i64>,
}

impl From<QuizEntity> for MongoQuizDocument {
    fn from(value: QuizEntity) -> Self {
        Self {
            id: value.id,
            title: value.title,
            questions: value.questions,
            duration_secs: value.duration_secs.map(i64::from),
        }
    }
}

impl From<MongoQuizDocument> for QuizEntity {
    fn from(value: MongoQuizDocument) -> Self {
        Self {
            id: value.id,
            title: value.title,
            questions: value.questions,
            duration_secs: value
                .duration_secs
                .map(|secs| u32::try_from(secs.max(0)).unwrap_or(u32::MAX)),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAnswerDocument {
    question_id: String,
    answer: String,
    is_correct: bool,
    answered_at: DateTime,
    latency_ms: Option<i64>,
}

impl From<StudentAnswerEntity> for MongoAnswerDocument {
    fn from(value: StudentAnswerEntity) -> Self {
        Self {
            question_id: value.question_id,
            answer: value.answer,
            is_correct: value.is_correct,
            answered_at: DateTime::from_system_time(value.answered_at),
            latency_ms: value.latency_ms.map(millis_to_i64),
        }
    }
}

impl From<MongoAnswerDocument> for StudentAnswerEntity {
    fn from(value: MongoAnswerDocument) -> Self {
        Self {
            question_id: value.question_id,
            answer: value.answer,
            is_correct: value.is_correct,
            answered_at: value.answered_at.to_system_time(),
            latency_ms: value.latency_ms.map(millis_to_u64),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MongoAttemptDocument {
    #[serde(rename = "_id")]
    id: String,
    quiz_id: String,
    session_id: String,
    student_id: String,
    answers: Vec<MongoAnswerDocument>,
    score: i64,
    percent: f64,
    started_at: DateTime,
    submitted_at: Option<DateTime>,
}

impl From<AttemptEntity> for MongoAttemptDocument {
    fn from(value: AttemptEntity) -> Self {
        Self {
            id: value.id.to_string(),
            quiz_id: value.quiz_id,
            session_id: value.session_id.to_string(),
            student_id: value.student_id,
            answers: value.answers.into_iter().map(Into::into).collect(),
            score: i64::from(value.score),
            percent: value.percent,
            started_at: DateTime::from_system_time(value.started_at),
            submitted_at: value.submitted_at.map(DateTime::from_system_time),
        }
    }
}

impl TryFrom<MongoAttemptDocument> for AttemptEntity {
    type Error = MongoDaoError;

    fn try_from(value: MongoAttemptDocument) -> Result<Self, Self::Error> {
        Ok(Self {
            id: parse_id(&value.id)?,
            quiz_id: value.quiz_id,
            session_id: parse_id(&value.session_id)?,
            student_id: value.student_id,
            answers: value.answers.into_iter().map(Into::into).collect(),
            score: u32::try_from(value.score.max(0)).unwrap_or(u32::MAX),
            percent: value.percent,
            started_at: value.started_at.to_system_time(),
            submitted_at: value.submitted_at.map(DateTime::to_system_time),
        })
    }
}

/// Translate a patch into a `$set` update document.
pub fn patch_update(patch: SessionPatch, now: std::time::SystemTime) -> Document {
    let updated_at = patch.updated_at.unwrap_or(now);
    let mut set = doc! { "updated_at": DateTime::from_system_time(updated_at) };
    if let Some(status) = patch.status {
        set.insert("status", status.as_str());
    }
    if let Some(started_at) = patch.started_at {
        set.insert("started_at", DateTime::from_system_time(started_at));
    }
    if let Some(ends_at) = patch.ends_at {
        set.insert("ends_at", DateTime::from_system_time(ends_at));
    }
    if let Some(paused_remaining_ms) = patch.paused_remaining_ms {
        set.insert(
            "paused_remaining_ms",
            paused_remaining_ms.map(millis_to_i64).map_or(Bson::Null, Bson::Int64),
        );
    }
    if let Some(ended_at) = patch.ended_at {
        set.insert("ended_at", DateTime::from_system_time(ended_at));
    }
    if let Some(participants) = patch.participants {
        let participants: Vec<Bson> = participants
            .into_iter()
            .map(|participant| {
                Bson::Document(doc! {
                    "student_id": participant.student_id,
                    "name": participant.name,
                    "joined_at": DateTime::from_system_time(participant.joined_at),
                })
            })
            .collect();
        set.insert("participants", participants);
    }
    doc! { "$set": set }
}

pub fn doc_id(id: impl ToString) -> Document {
    doc! {"_id": id.to_string()}
}

fn parse_id(raw: &str) -> Result<Uuid, MongoDaoError> {
    Uuid::parse_str(raw).map_err(|_| MongoDaoError::MalformedDocument {
        id: raw.to_owned(),
        reason: "identifier is not a UUID",
    })
}

fn millis_to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn millis_to_u64(value: i64) -> u64 {
    u64::try_from(value).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    #[test]
    fn patch_only_sets_given_fields() {
        let update = patch_update(
            SessionPatch {
                status: Some(SessionStatus::Paused),
                paused_remaining_ms: Some(Some(4_000)),
                ..SessionPatch::default()
            },
            SystemTime::now(),
        );
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get_str("status").unwrap(), "paused");
        assert_eq!(set.get_i64("paused_remaining_ms").unwrap(), 4_000);
        assert!(!set.contains_key("ends_at"));
        assert!(set.contains_key("updated_at"));
    }

    #[test]
    fn clearing_remaining_time_writes_null() {
        let update = patch_update(
            SessionPatch {
                paused_remaining_ms: Some(None),
                ..SessionPatch::default()
            },
            SystemTime::now(),
        );
        let set = update.get_document("$set").unwrap();
        assert_eq!(set.get("paused_remaining_ms"), Some(&Bson::Null));
    }

    #[test]
    fn session_document_keeps_identity() {
        let now = SystemTime::UNIX_EPOCH + Duration::from_millis(1_700_000_000_000);
        let mut session = SessionEntity::new("quiz".into(), "teacher".into(), "ABC123".into(), now);
        session.paused_remaining_ms = Some(12_000);

        let document = MongoSessionDocument::from(session.clone());
        let restored = SessionEntity::try_from(document).unwrap();
        assert_eq!(restored, session);
    }
}
