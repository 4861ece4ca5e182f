use dashmap::DashMap;
use indexmap::IndexMap;
use uuid::Uuid;

use crate::dao::models::{AttemptEntity, StudentAnswerEntity, percentage};

/// Aggregated correctness of one student in one session.
#[derive(Debug, Clone, PartialEq)]
pub struct LeaderboardRow {
    /// Student the row belongs to.
    pub student_id: String,
    /// Number of correct answers.
    pub correct: u32,
    /// Number of answers submitted.
    pub total: u32,
    /// `100 * correct / total`, one decimal, 0 when nothing was answered.
    pub percent: f64,
}

impl LeaderboardRow {
    fn from_answers(student_id: &str, answers: &[StudentAnswerEntity]) -> Self {
        let correct = answers.iter().filter(|answer| answer.is_correct).count() as u32;
        let total = answers.len() as u32;
        Self {
            student_id: student_id.to_string(),
            correct,
            total,
            percent: percentage(correct, total),
        }
    }
}

/// In-memory per-session leaderboards.
///
/// Rows are kept in first-insertion order; overwriting a student's row keeps
/// its position, which is the tie-break order of [`snapshot`](Self::snapshot).
/// Nothing here is persisted: every board can be rebuilt from attempts.
#[derive(Default)]
pub struct LeaderboardAggregator {
    boards: DashMap<Uuid, IndexMap<String, LeaderboardRow>>,
}

impl LeaderboardAggregator {
    /// Create an aggregator with no tracked sessions.
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the student's row with the tally of `answers`.
    pub fn record_answers(
        &self,
        session_id: Uuid,
        student_id: &str,
        answers: &[StudentAnswerEntity],
    ) -> LeaderboardRow {
        let row = LeaderboardRow::from_answers(student_id, answers);
        self.boards
            .entry(session_id)
            .or_default()
            .insert(student_id.to_string(), row.clone());
        row
    }

    /// Rows sorted by descending percent; ties keep insertion order.
    pub fn snapshot(&self, session_id: Uuid) -> Vec<LeaderboardRow> {
        let mut rows: Vec<LeaderboardRow> = self
            .boards
            .get(&session_id)
            .map(|board| board.values().cloned().collect())
            .unwrap_or_default();
        rows.sort_by(|a, b| b.percent.total_cmp(&a.percent));
        rows
    }

    /// Rebuild a session's board from persisted attempts, ordered by attempt start.
    pub fn rebuild<'a>(&self, session_id: Uuid, attempts: impl IntoIterator<Item = &'a AttemptEntity>) {
        let mut attempts: Vec<&AttemptEntity> = attempts
            .into_iter()
            .filter(|attempt| attempt.session_id == session_id)
            .collect();
        attempts.sort_by_key(|attempt| attempt.started_at);

        let board = attempts
            .into_iter()
            .map(|attempt| {
                (
                    attempt.student_id.clone(),
                    LeaderboardRow::from_answers(&attempt.student_id, &attempt.answers),
                )
            })
            .collect::<IndexMap<_, _>>();
        self.boards.insert(session_id, board);
    }

    /// Whether a board exists in memory for the session.
    pub fn is_tracked(&self, session_id: Uuid) -> bool {
        self.boards.contains_key(&session_id)
    }

    /// Drop the board of a session that no longer needs live reads.
    pub fn discard(&self, session_id: Uuid) {
        self.boards.remove(&session_id);
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, SystemTime};

    use super::*;

    fn answers(pattern: &[bool]) -> Vec<StudentAnswerEntity> {
        pattern
            .iter()
            .enumerate()
            .map(|(index, is_correct)| StudentAnswerEntity {
                question_id: format!("q{index}"),
                answer: "a".into(),
                is_correct: *is_correct,
                answered_at: SystemTime::now(),
                latency_ms: None,
            })
            .collect()
    }

    #[test]
    fn rows_are_sorted_by_percent_descending() {
        let board = LeaderboardAggregator::new();
        let session = Uuid::new_v4();
        board.record_answers(session, "low", &answers(&[false, false, true]));
        board.record_answers(session, "high", &answers(&[true, true, true]));

        let rows = board.snapshot(session);
        assert_eq!(rows[0].student_id, "high");
        assert_eq!(rows[0].percent, 100.0);
        assert_eq!(rows[1].student_id, "low");
        assert_eq!(rows[1].percent, 33.3);
    }

    #[test]
    fn ties_keep_first_insertion_order() {
        let board = LeaderboardAggregator::new();
        let session = Uuid::new_v4();
        board.record_answers(session, "first", &answers(&[true, true, false]));
        board.record_answers(session, "second", &answers(&[true, false, true]));
        board.record_answers(session, "first", &answers(&[true, false, true]));

        let rows = board.snapshot(session);
        assert_eq!(
            rows.iter().map(|row| row.student_id.as_str()).collect::<Vec<_>>(),
            ["first", "second"]
        );
        assert!(rows.iter().all(|row| row.percent == 66.7));
    }

    #[test]
    fn recording_twice_overwrites_the_row() {
        let board = LeaderboardAggregator::new();
        let session = Uuid::new_v4();
        board.record_answers(session, "s1", &answers(&[true]));
        board.record_answers(session, "s1", &answers(&[true, false]));

        let rows = board.snapshot(session);
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].correct, rows[0].total), (1, 2));
        assert!(rows[0].correct <= rows[0].total);
        assert!((0.0..=100.0).contains(&rows[0].percent));
    }

    #[test]
    fn empty_answers_give_zero_percent() {
        let board = LeaderboardAggregator::new();
        let session = Uuid::new_v4();
        let row = board.record_answers(session, "s1", &[]);
        assert_eq!(row.percent, 0.0);
        assert_eq!(row.total, 0);
    }

    #[test]
    fn rebuild_uses_only_attempts_of_the_session() {
        let board = LeaderboardAggregator::new();
        let session = Uuid::new_v4();
        let base = SystemTime::now();

        let mut late = AttemptEntity::new("quiz".into(), session, "late".into(), base + Duration::from_secs(5));
        late.answers = answers(&[true]);
        let mut early = AttemptEntity::new("quiz".into(), session, "early".into(), base);
        early.answers = answers(&[true]);
        let mut other = AttemptEntity::new("quiz".into(), Uuid::new_v4(), "other".into(), base);
        other.answers = answers(&[true]);

        board.rebuild(session, [&late, &early, &other]);

        let rows = board.snapshot(session);
        assert_eq!(
            rows.iter().map(|row| row.student_id.as_str()).collect::<Vec<_>>(),
            ["early", "late"]
        );
    }

    #[test]
    fn discard_forgets_the_session() {
        let board = LeaderboardAggregator::new();
        let session = Uuid::new_v4();
        board.record_answers(session, "s1", &answers(&[true]));
        assert!(board.is_tracked(session));
        board.discard(session);
        assert!(!board.is_tracked(session));
        assert!(board.snapshot(session).is_empty());
    }
}
