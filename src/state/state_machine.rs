use serde::{Deserialize, Serialize};
use thiserror::Error;
use utoipa::ToSchema;
use uuid::Uuid;

/// Lifecycle status of a live quiz session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no timer armed yet.
    Ready,
    /// Timer armed, answers accepted.
    Running,
    /// Timer disarmed with the remaining time frozen; answers rejected.
    Paused,
    /// Terminal status; answers and transitions rejected.
    Ended,
}

impl SessionStatus {
    /// Stable lowercase name, identical to the serialized form.
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Ready => "ready",
            SessionStatus::Running => "running",
            SessionStatus::Paused => "paused",
            SessionStatus::Ended => "ended",
        }
    }

    /// Whether the status is terminal.
    pub fn is_ended(&self) -> bool {
        matches!(self, SessionStatus::Ended)
    }

    /// Whether students may currently submit answers.
    pub fn accepts_answers(&self) -> bool {
        matches!(self, SessionStatus::Running)
    }
}

/// Commands and internal triggers that move a session through its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// Teacher launches the session.
    Start,
    /// Teacher freezes the countdown.
    Pause,
    /// Teacher resumes a paused countdown.
    Resume,
    /// Teacher ends the session early.
    Stop,
    /// The countdown reached zero.
    Expire,
}

/// Error returned when an event cannot be applied from the current status.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid transition: {event:?} cannot be applied while {from:?}")]
pub struct InvalidTransition {
    /// Status the session was in when the event was received.
    pub from: SessionStatus,
    /// Event that cannot be applied from this status.
    pub event: SessionEvent,
}

/// Unique identifier for a planned transition.
pub type PlanId = Uuid;

/// A validated transition for one session that has not been committed yet.
#[derive(Debug, Clone)]
pub struct Plan {
    /// Unique identifier for this plan.
    pub id: PlanId,
    /// Session the plan applies to.
    pub session_id: Uuid,
    /// Status the session is currently in.
    pub from: SessionStatus,
    /// Status the session will move to once the side effects succeed.
    pub to: SessionStatus,
    /// Event that triggered this transition.
    pub event: SessionEvent,
}

/// Validate `event` against the session's current status and produce a plan.
pub fn plan(session_id: Uuid, from: SessionStatus, event: SessionEvent) -> Result<Plan, InvalidTransition> {
    let to = next_status(from, event)?;
    Ok(Plan {
        id: Uuid::new_v4(),
        session_id,
        from,
        to,
        event,
    })
}

/// Compute the status reached by applying `event` from `from`.
///
/// Status only moves forward and `Ended` absorbs every event.
pub fn next_status(
    from: SessionStatus,
    event: SessionEvent,
) -> Result<SessionStatus, InvalidTransition> {
    let next = match (from, event) {
        (SessionStatus::Ready, SessionEvent::Start) => SessionStatus::Running,
        (SessionStatus::Running, SessionEvent::Pause) => SessionStatus::Paused,
        (SessionStatus::Paused, SessionEvent::Resume) => SessionStatus::Running,
        (SessionStatus::Running | SessionStatus::Paused, SessionEvent::Stop) => {
            SessionStatus::Ended
        }
        (SessionStatus::Running, SessionEvent::Expire) => SessionStatus::Ended,
        (from, event) => return Err(InvalidTransition { from, event }),
    };

    Ok(next)
}
