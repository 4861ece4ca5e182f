use serde::{Deserialize, Serialize};
use std::time::SystemTime;
use uuid::Uuid;

use crate::state::state_machine::SessionStatus;

/// Quiz definition consumed by live sessions. Authoring happens elsewhere.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuizEntity {
    /// Stable identifier for the quiz.
    pub id: String,
    /// Human readable quiz title.
    pub title: String,
    /// Ordered questions of the quiz.
    pub questions: Vec<QuestionEntity>,
    /// Suggested countdown when a launch does not specify one.
    #[serde(default)]
    pub duration_secs: Option<u32>,
}

impl QuizEntity {
    /// Look up a question by identifier.
    pub fn question(&self, question_id: &str) -> Option<&QuestionEntity> {
        self.questions.iter().find(|question| question.id == question_id)
    }
}

/// Single question with its canonical answer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QuestionEntity {
    /// Identifier unique within the quiz.
    pub id: String,
    /// Question text shown to students.
    pub prompt: String,
    /// Canonical answer compared against student submissions.
    pub answer: String,
    /// Optional multiple-choice options.
    #[serde(default)]
    pub choices: Vec<String>,
}

/// Student attached to a session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ParticipantEntity {
    /// Identifier unique within the session.
    pub student_id: String,
    /// Display name chosen by the student.
    pub name: String,
    /// When the student first joined.
    pub joined_at: SystemTime,
}

/// Persisted live session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SessionEntity {
    /// Primary key of the session.
    pub id: Uuid,
    /// Quiz being taken.
    pub quiz_id: String,
    /// Short code students type to join.
    pub join_code: String,
    /// Teacher owning the session.
    pub teacher_id: String,
    /// Current lifecycle status.
    pub status: SessionStatus,
    /// Creation timestamp.
    pub created_at: SystemTime,
    /// Last time the session was written.
    pub updated_at: SystemTime,
    /// When the countdown was launched.
    pub started_at: Option<SystemTime>,
    /// Absolute deadline of the countdown.
    pub ends_at: Option<SystemTime>,
    /// Time left when the session was paused, in milliseconds.
    pub paused_remaining_ms: Option<u64>,
    /// When the session reached the ended status.
    pub ended_at: Option<SystemTime>,
    /// Participants in join order, unique by student id.
    pub participants: Vec<ParticipantEntity>,
}

impl SessionEntity {
    /// Build a fresh session in the ready status.
    pub fn new(quiz_id: String, teacher_id: String, join_code: String, now: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            join_code,
            teacher_id,
            status: SessionStatus::Ready,
            created_at: now,
            updated_at: now,
            started_at: None,
            ends_at: None,
            paused_remaining_ms: None,
            ended_at: None,
            participants: Vec::new(),
        }
    }

    /// Whether `student_id` already joined.
    pub fn has_participant(&self, student_id: &str) -> bool {
        self.participants
            .iter()
            .any(|participant| participant.student_id == student_id)
    }

    /// Apply a partial update in place, stamping `updated_at` with the patch
    /// time or `now` when the patch carries none.
    pub fn apply(&mut self, patch: SessionPatch, now: SystemTime) {
        self.updated_at = patch.updated_at.unwrap_or(now);
        if let Some(status) = patch.status {
            self.status = status;
        }
        if let Some(started_at) = patch.started_at {
            self.started_at = Some(started_at);
        }
        if let Some(ends_at) = patch.ends_at {
            self.ends_at = Some(ends_at);
        }
        if let Some(paused_remaining_ms) = patch.paused_remaining_ms {
            self.paused_remaining_ms = paused_remaining_ms;
        }
        if let Some(ended_at) = patch.ended_at {
            self.ended_at = Some(ended_at);
        }
        if let Some(participants) = patch.participants {
            self.participants = participants;
        }
    }
}

/// Partial update of a session; `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionPatch {
    /// New lifecycle status.
    pub status: Option<SessionStatus>,
    /// Launch timestamp.
    pub started_at: Option<SystemTime>,
    /// New absolute deadline.
    pub ends_at: Option<SystemTime>,
    /// Remaining time to store (`Some(None)` clears it).
    pub paused_remaining_ms: Option<Option<u64>>,
    /// End timestamp.
    pub ended_at: Option<SystemTime>,
    /// Full replacement of the participant list.
    pub participants: Option<Vec<ParticipantEntity>>,
    /// Time of the write on the service clock; stores fall back to their own.
    pub updated_at: Option<SystemTime>,
}

/// One answer recorded inside an attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StudentAnswerEntity {
    /// Question answered.
    pub question_id: String,
    /// Normalised answer text.
    pub answer: String,
    /// Whether the answer matched the canonical answer at write time.
    pub is_correct: bool,
    /// Server receive time.
    pub answered_at: SystemTime,
    /// Delay between the client timestamp and the server receive time.
    pub latency_ms: Option<u64>,
}

/// A student's attempt at a quiz within one session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptEntity {
    /// Primary key of the attempt.
    pub id: Uuid,
    /// Quiz attempted.
    pub quiz_id: String,
    /// Session the attempt belongs to.
    pub session_id: Uuid,
    /// Student owning the attempt.
    pub student_id: String,
    /// Answers in the order questions were first answered.
    pub answers: Vec<StudentAnswerEntity>,
    /// Number of correct answers.
    pub score: u32,
    /// Score relative to the quiz question count, 0-100.
    pub percent: f64,
    /// When the first answer arrived.
    pub started_at: SystemTime,
    /// Set once the attempt is turned in; the attempt is frozen afterwards.
    pub submitted_at: Option<SystemTime>,
}

impl AttemptEntity {
    /// Start an empty attempt.
    pub fn new(quiz_id: String, session_id: Uuid, student_id: String, now: SystemTime) -> Self {
        Self {
            id: Uuid::new_v4(),
            quiz_id,
            session_id,
            student_id,
            answers: Vec::new(),
            score: 0,
            percent: 0.0,
            started_at: now,
            submitted_at: None,
        }
    }

    /// Whether the attempt has been turned in.
    pub fn is_submitted(&self) -> bool {
        self.submitted_at.is_some()
    }

    /// Insert or replace the answer for its question, keeping first-answer order.
    pub fn record(&mut self, answer: StudentAnswerEntity, question_count: usize) {
        match self
            .answers
            .iter_mut()
            .find(|existing| existing.question_id == answer.question_id)
        {
            Some(existing) => *existing = answer,
            None => self.answers.push(answer),
        }
        self.rescore(question_count);
    }

    /// Recompute `score` and `percent` from the recorded answers.
    pub fn rescore(&mut self, question_count: usize) {
        self.score = self.answers.iter().filter(|answer| answer.is_correct).count() as u32;
        self.percent = percentage(self.score, question_count as u32);
    }
}

/// `100 * part / whole` rounded to one decimal, zero when `whole` is zero.
pub fn percentage(part: u32, whole: u32) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (1000.0 * f64::from(part) / f64::from(whole)).round() / 10.0
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    fn answer(question_id: &str, is_correct: bool) -> StudentAnswerEntity {
        StudentAnswerEntity {
            question_id: question_id.into(),
            answer: "x".into(),
            is_correct,
            answered_at: SystemTime::now(),
            latency_ms: None,
        }
    }

    #[test]
    fn percentage_guards_zero_total() {
        assert_eq!(percentage(0, 0), 0.0);
        assert_eq!(percentage(2, 3), 66.7);
        assert_eq!(percentage(3, 3), 100.0);
    }

    #[test]
    fn record_replaces_answer_for_same_question() {
        let mut attempt = AttemptEntity::new("quiz".into(), Uuid::new_v4(), "s1".into(), SystemTime::now());
        attempt.record(answer("q1", false), 4);
        attempt.record(answer("q2", true), 4);
        attempt.record(answer("q1", true), 4);

        assert_eq!(attempt.answers.len(), 2);
        assert_eq!(attempt.answers[0].question_id, "q1");
        assert!(attempt.answers[0].is_correct);
        assert_eq!(attempt.score, 2);
        assert_eq!(attempt.percent, 50.0);
    }

    #[test]
    fn apply_patch_touches_only_given_fields() {
        let now = SystemTime::now();
        let mut session = SessionEntity::new("quiz".into(), "teacher".into(), "ABC123".into(), now);
        session.paused_remaining_ms = Some(5_000);

        session.apply(
            SessionPatch {
                status: Some(SessionStatus::Running),
                paused_remaining_ms: Some(None),
                ..SessionPatch::default()
            },
            now,
        );

        assert_eq!(session.status, SessionStatus::Running);
        assert_eq!(session.paused_remaining_ms, None);
        assert_eq!(session.join_code, "ABC123");
        assert!(session.ends_at.is_none());
        assert_eq!(session.updated_at, now);
    }

    #[test]
    fn patch_time_wins_over_store_time() {
        let created = SystemTime::now();
        let written = created + Duration::from_secs(90);
        let mut session = SessionEntity::new("quiz".into(), "teacher".into(), "ABC123".into(), created);

        session.apply(
            SessionPatch {
                status: Some(SessionStatus::Paused),
                updated_at: Some(written),
                ..SessionPatch::default()
            },
            created + Duration::from_secs(3_600),
        );

        assert_eq!(session.updated_at, written);
    }
}
