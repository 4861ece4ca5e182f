//! Countdown engine: arms one tick loop per running session and expires it at `ends_at`.

use std::{
    sync::{Arc, Weak},
    time::{Duration, SystemTime},
};

use tokio::{
    sync::oneshot,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    dao::models::{SessionEntity, SessionPatch},
    error::ServiceError,
    services::{lifecycle_service, room_events},
    state::{
        AppState, SharedState,
        clock::{remaining, remaining_secs},
        state_machine::SessionStatus,
    },
};

/// Persist `ends_at` together with `patch`, then (re)start the session's tick loop.
///
/// Any loop already armed for the session is cancelled first.
pub async fn arm(
    state: &SharedState,
    session_id: Uuid,
    ends_at: SystemTime,
    mut patch: SessionPatch,
) -> Result<SessionEntity, ServiceError> {
    patch.ends_at = Some(ends_at);
    let store = state.require_store().await?;
    let session = store
        .update_session(session_id, patch)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("session `{session_id}` not found")))?;

    schedule(state, session_id, ends_at);
    Ok(session)
}

/// Stop the session's tick loop. The persisted deadline is left untouched.
pub fn disarm(state: &SharedState, session_id: Uuid) -> bool {
    let disarmed = state.timers().disarm(session_id);
    if disarmed {
        debug!(session_id = %session_id, "countdown disarmed");
    }
    disarmed
}

/// Whole seconds left for an armed session, `None` when nothing is armed.
pub fn snapshot_remaining(state: &SharedState, session_id: Uuid) -> Option<u64> {
    state
        .timers()
        .ends_at(session_id)
        .map(|ends_at| remaining_secs(ends_at, state.clock().now()))
}

/// Spawn a tick loop for an already persisted deadline and register it.
///
/// Returns the generation of the new loop.
pub fn schedule(state: &SharedState, session_id: Uuid, ends_at: SystemTime) -> u64 {
    let generation = state.timers().next_generation();
    let period = state.config().tick_interval();
    let weak = Arc::downgrade(state);
    let (armed_tx, armed_rx) = oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        // Wait for the registry slot so the first tick sees itself as current.
        if armed_rx.await.is_err() {
            return;
        }
        run_countdown(weak, session_id, generation, ends_at, period).await;
    });

    state
        .timers()
        .install(session_id, generation, ends_at, task.abort_handle());
    let _ = armed_tx.send(());
    debug!(session_id = %session_id, generation, "countdown armed");
    generation
}

/// Re-arm every session persisted as running that has no loop in this process.
///
/// Deadlines that already passed expire on the first tick.
pub async fn restore_timers(state: &SharedState) -> Result<usize, ServiceError> {
    let store = state.require_store().await?;
    let sessions = store.list_active_sessions().await?;

    let mut restored = 0;
    for session in sessions {
        if session.status != SessionStatus::Running {
            continue;
        }
        let Some(ends_at) = session.ends_at else {
            warn!(session_id = %session.id, "running session has no deadline; skipping");
            continue;
        };
        if state.timers().is_armed(session.id) {
            continue;
        }
        schedule(state, session.id, ends_at);
        restored += 1;
    }

    if restored > 0 {
        info!(restored, "restored countdowns of running sessions");
    }
    Ok(restored)
}

async fn run_countdown(
    state: Weak<AppState>,
    session_id: Uuid,
    generation: u64,
    ends_at: SystemTime,
    period: Duration,
) {
    let first_delay = {
        let Some(state) = state.upgrade() else {
            return;
        };
        first_tick_delay(remaining(ends_at, state.clock().now()), period)
    };

    let mut ticker = interval_at(Instant::now() + first_delay, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let Some(state) = state.upgrade() else {
            break;
        };

        let left = remaining_secs(ends_at, state.clock().now());
        if left == 0 {
            match lifecycle_service::expire(&state, session_id, Some(generation)).await {
                Ok(_) => break,
                Err(ServiceError::InvalidTransition(reason)) => {
                    debug!(session_id = %session_id, reason = %reason, "countdown no longer applies");
                    state.timers().release(session_id, generation);
                    break;
                }
                Err(ServiceError::NotFound(_)) => {
                    warn!(session_id = %session_id, "session vanished while its countdown ran");
                    state.timers().release(session_id, generation);
                    break;
                }
                Err(err) => {
                    warn!(session_id = %session_id, error = %err, "failed to expire session; retrying");
                    continue;
                }
            }
        }

        let ticked = state.timers().if_current(session_id, generation, || {
            room_events::broadcast_timer_tick(&state, session_id, left)
        });
        if ticked.is_none() {
            break;
        }
    }
}

/// Delay before the first tick so that later ticks land on whole seconds before `ends_at`.
fn first_tick_delay(remaining: Duration, period: Duration) -> Duration {
    if remaining.is_zero() || period.is_zero() {
        return Duration::ZERO;
    }
    let offset = remaining.as_nanos() % period.as_nanos();
    if offset == 0 {
        period
    } else {
        Duration::from_nanos(offset as u64)
    }
}
