use std::{future::Future, sync::Arc, time::Duration};

use tokio::time::sleep;
use tracing::{info, warn};

use crate::{
    dao::{session_store::SessionStore, storage::StorageError},
    services::timer_service,
    state::SharedState,
};

const INITIAL_DELAY: Duration = Duration::from_millis(1_000);
const MAX_DELAY: Duration = Duration::from_secs(10);
const HEALTH_POLL_INTERVAL: Duration = Duration::from_secs(5);
const MAX_RECONNECT_ATTEMPTS: u32 = 3;

/// Connect to the storage backend and keep the shared state in degraded mode while it is unavailable.
///
/// Each successful connection seeds the configured quizzes and re-arms the
/// countdowns of sessions persisted as running.
pub async fn run<F, Fut>(state: SharedState, mut connect: F)
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<Arc<dyn SessionStore>, StorageError>> + Send,
{
    let mut delay = INITIAL_DELAY;

    loop {
        match connect().await {
            Ok(store) => {
                if let Err(err) = seed_quizzes(&state, store.as_ref()).await {
                    warn!(error = %err, "failed to seed quizzes; retrying connection");
                    sleep(delay).await;
                    delay = (delay * 2).min(MAX_DELAY);
                    continue;
                }

                state.install_store(store.clone()).await;
                info!("storage connection established; leaving degraded mode");
                delay = INITIAL_DELAY;

                if let Err(err) = timer_service::restore_timers(&state).await {
                    warn!(error = %err, "failed to restore countdowns of running sessions");
                }

                supervise(&state, store.as_ref()).await;

                state.clear_store().await;
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
            Err(err) => {
                warn!(error = %err, "storage connection attempt failed");
                sleep(delay).await;
                delay = (delay * 2).min(MAX_DELAY);
            }
        }
    }
}

/// Poll the store until reconnecting after a failed health check is exhausted.
async fn supervise(state: &SharedState, store: &dyn SessionStore) {
    loop {
        match store.health_check().await {
            Ok(()) => {
                if state.is_degraded() {
                    info!("storage healthy again; leaving degraded mode");
                    state.update_degraded(false);
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
            Err(_) => {
                let mut attempt = 0;
                let mut reconnect_delay = INITIAL_DELAY;
                let mut reconnected = false;

                while attempt < MAX_RECONNECT_ATTEMPTS {
                    match store.try_reconnect().await {
                        Ok(()) => {
                            info!("storage reconnection succeeded after health check failure");
                            reconnected = true;
                            break;
                        }
                        Err(reconnect_err) => {
                            if attempt == 0 {
                                warn!(
                                    attempt, error = %reconnect_err,
                                    "storage reconnect first attempt failed; entering in degraded mode"
                                );
                                state.update_degraded(true);
                            } else {
                                warn!(attempt, error = %reconnect_err, "storage reconnect attempt failed");
                            }
                            attempt += 1;
                            sleep(reconnect_delay).await;
                            reconnect_delay = (reconnect_delay * 2).min(MAX_DELAY);
                        }
                    }
                }

                if !reconnected {
                    warn!("exhausted storage reconnect attempts; staying in degraded mode");
                    return;
                }
                state.update_degraded(false);
                if let Err(err) = timer_service::restore_timers(state).await {
                    warn!(error = %err, "failed to restore countdowns after reconnect");
                }
                sleep(HEALTH_POLL_INTERVAL).await;
            }
        }
    }
}

async fn seed_quizzes(state: &SharedState, store: &dyn SessionStore) -> Result<(), StorageError> {
    let config = state.config();
    for quiz in config.quizzes() {
        store.save_quiz(quiz.clone()).await?;
    }
    if !config.quizzes().is_empty() {
        info!(count = config.quizzes().len(), "seeded configured quizzes");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{config::AppConfig, dao::session_store::MemorySessionStore, state::AppState};

    #[tokio::test(start_paused = true)]
    async fn connection_seeds_quizzes_and_leaves_degraded_mode() {
        let state = AppState::new(AppConfig::default());
        let store = Arc::new(MemorySessionStore::new());
        let handle = {
            let store = store.clone();
            tokio::spawn(run(state.clone(), move || {
                let store = store.clone();
                async move { Ok::<Arc<dyn SessionStore>, StorageError>(store) }
            }))
        };

        sleep(Duration::from_millis(10)).await;
        assert!(!state.is_degraded());
        let quiz = SessionStore::get_quiz(store.as_ref(), "demo".into())
            .await
            .unwrap();
        assert!(quiz.is_some());

        store.set_offline(true);
        sleep(HEALTH_POLL_INTERVAL + Duration::from_secs(1)).await;
        assert!(state.is_degraded());

        handle.abort();
    }
}
