use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::state::{leaderboard::LeaderboardRow, state_machine::SessionStatus};

#[derive(Clone, Debug, Serialize)]
/// Named event fanned out to a session room; WebSocket frames carry it as-is.
pub struct ServerEvent {
    pub event: String,
    pub data: Value,
}

impl ServerEvent {
    /// Convenience wrapper that serialises `payload` into the data field.
    pub fn json<E, T>(event: E, payload: &T) -> serde_json::Result<Self>
    where
        E: Into<String>,
        T: Serialize,
    {
        Ok(Self {
            event: event.into(),
            data: serde_json::to_value(payload)?,
        })
    }

    /// Render the event as the JSON text of a WebSocket frame.
    pub fn to_frame(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// First event written to a session SSE stream.
pub struct StreamHandshake {
    pub session_id: Uuid,
    /// Whether the backend is running without a storage backend connection.
    pub degraded: bool,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// `session:started`, sent once the countdown is armed.
pub struct SessionStartedEvent {
    pub session_id: Uuid,
    /// Launch time, epoch milliseconds.
    pub started_at: u64,
    /// Absolute deadline, epoch milliseconds.
    pub ends_at: u64,
    pub remaining: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// `session:paused`; also the recovery reply for a paused session.
pub struct SessionPausedEvent {
    pub session_id: Uuid,
    /// Seconds frozen at pause time.
    pub remaining: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionResumedEvent {
    pub session_id: Uuid,
    pub remaining: u64,
    /// Fresh deadline, epoch milliseconds.
    pub ends_at: u64,
}

#[derive(Debug, Clone, Copy, Serialize, ToSchema)]
#[serde(rename_all = "lowercase")]
/// Why a session reached the ended status.
pub enum EndReason {
    /// The teacher stopped it.
    Stopped,
    /// The countdown reached zero.
    Expired,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SessionEndedEvent {
    pub session_id: Uuid,
    pub reason: EndReason,
    pub ended_at: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Recovery reply for a running session.
pub struct SessionRecoveredEvent {
    pub session_id: Uuid,
    pub remaining: u64,
    pub ends_at: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Recovery reply for a session that is over.
pub struct SessionExpiredEvent {
    pub session_id: Uuid,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// Recovery reply when no countdown exists for the session.
pub struct SessionIdleEvent {
    pub session_id: Uuid,
    /// `None` when the session is unknown.
    pub status: Option<SessionStatus>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct TimerTickEvent {
    pub session_id: Uuid,
    pub remaining: u64,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ParticipantJoinedEvent {
    pub session_id: Uuid,
    pub student_id: String,
    pub name: String,
    /// Participant count after the join.
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
/// One ranked row of a session leaderboard.
pub struct LeaderboardRowDto {
    pub student_id: String,
    pub correct: u32,
    pub total: u32,
    pub percent: f64,
}

impl From<LeaderboardRow> for LeaderboardRowDto {
    fn from(row: LeaderboardRow) -> Self {
        Self {
            student_id: row.student_id,
            correct: row.correct,
            total: row.total,
            percent: row.percent,
        }
    }
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardUpdateEvent {
    pub session_id: Uuid,
    pub rows: Vec<LeaderboardRowDto>,
}
