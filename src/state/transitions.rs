use std::future::Future;

use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    dao::models::SessionEntity,
    error::ServiceError,
    state::{
        SharedState,
        state_machine::{Plan, SessionEvent, plan},
    },
};

/// Run one lifecycle transition of a session.
///
/// Holds the session gate for the whole call, loads the session, validates
/// `event` against its status and hands the plan to `work`, which performs the
/// side effects. Illegal events fail with [`ServiceError::InvalidTransition`]
/// before `work` runs, so nothing is armed, written or broadcast for them.
pub async fn run_transition<F, Fut, T>(
    state: &SharedState,
    session_id: Uuid,
    event: SessionEvent,
    work: F,
) -> Result<T, ServiceError>
where
    F: FnOnce(Plan, SessionEntity) -> Fut,
    Fut: Future<Output = Result<T, ServiceError>>,
{
    let gate = state.lock_session(session_id).await;
    let store = state.require_store().await?;
    let session = store
        .get_session(session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))?;

    let plan = plan(session_id, session.status, event).inspect_err(|err| {
        debug!(session_id = %session_id, error = %err, "rejected lifecycle event");
    })?;
    let (plan_id, plan_event, from, to) = (plan.id, plan.event, plan.from, plan.to);

    let work_future = work(plan, session);
    let outcome = match state.transition_timeout() {
        Some(limit) => match timeout(limit, work_future).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    session_id = %session_id,
                    event = ?event,
                    plan_id = %plan_id,
                    "transition timed out"
                );
                Err(ServiceError::Timeout)
            }
        },
        None => work_future.await,
    };
    if outcome.is_ok() {
        debug!(
            session_id = %session_id,
            event = ?plan_event,
            plan_id = %plan_id,
            from = from.as_str(),
            to = to.as_str(),
            "transition applied"
        );
    }

    drop(gate);
    outcome
}
