use std::sync::Arc;

use classroom_live_back::{
    config::AppConfig,
    dao::session_store::{MemorySessionStore, SessionStore},
    state::{AppState, SharedState, clock::Clock},
};

/// Application state backed by a fresh memory store seeded with the configured quizzes.
pub async fn live_state(config: AppConfig) -> (SharedState, Arc<MemorySessionStore>) {
    let store = Arc::new(MemorySessionStore::new());
    let state = attach(config, store.clone(), Clock::new()).await;
    (state, store)
}

/// Application state over an existing store, as after a process restart.
///
/// Pass a clone of the previous state's clock so both agree on virtual time.
pub async fn attach(config: AppConfig, store: Arc<MemorySessionStore>, clock: Clock) -> SharedState {
    let state = AppState::with_clock(config, clock);
    for quiz in state.config().quizzes() {
        SessionStore::save_quiz(store.as_ref(), quiz.clone())
            .await
            .expect("seed quiz");
    }
    state.install_store(store).await;
    state
}
