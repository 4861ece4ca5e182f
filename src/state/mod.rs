pub mod clock;
pub mod gates;
pub mod leaderboard;
pub mod rooms;
pub mod state_machine;
pub mod timer;
pub mod transitions;

use std::{sync::Arc, time::Duration};

use dashmap::DashSet;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock, watch};
use uuid::Uuid;

use crate::{config::AppConfig, dao::session_store::SessionStore, error::ServiceError};

use self::{
    clock::Clock, gates::GateMap, leaderboard::LeaderboardAggregator, rooms::RoomHub,
    timer::TimerRegistry,
};

pub type SharedState = Arc<AppState>;

/// Central application state: storage handle, live timers, leaderboards and rooms.
///
/// Built once per process and shared behind an [`Arc`]; nothing in here is
/// load-bearing across restarts, everything can be rebuilt from the store.
pub struct AppState {
    store: RwLock<Option<Arc<dyn SessionStore>>>,
    config: Arc<AppConfig>,
    clock: Clock,
    rooms: RoomHub,
    timers: TimerRegistry,
    leaderboards: LeaderboardAggregator,
    connections: DashSet<Uuid>,
    session_gates: GateMap<Uuid>,
    attempt_gates: GateMap<(Uuid, String)>,
    join_code_gate: Mutex<()>,
    degraded: watch::Sender<bool>,
    transition_timeout: Option<Duration>,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    ///
    /// The application starts in degraded mode until a storage backend is installed.
    pub fn new(config: AppConfig) -> SharedState {
        Self::with_clock(config, Clock::new())
    }

    /// Same as [`AppState::new`] but reading time from `clock`.
    ///
    /// Two states sharing a clone of one clock agree on the current time, even
    /// under a paused tokio runtime.
    pub fn with_clock(config: AppConfig, clock: Clock) -> SharedState {
        let (degraded_tx, _rx) = watch::channel(true);
        Arc::new(Self {
            store: RwLock::new(None),
            rooms: RoomHub::new(config.room_capacity()),
            transition_timeout: config.transition_timeout(),
            config: Arc::new(config),
            clock,
            timers: TimerRegistry::new(),
            leaderboards: LeaderboardAggregator::new(),
            connections: DashSet::new(),
            session_gates: GateMap::new(),
            attempt_gates: GateMap::new(),
            join_code_gate: Mutex::new(()),
            degraded: degraded_tx,
        })
    }

    /// Obtain a handle to the current session store, if one is installed.
    pub async fn store(&self) -> Option<Arc<dyn SessionStore>> {
        let guard = self.store.read().await;
        guard.as_ref().cloned()
    }

    /// Current store, failing with [`ServiceError::Degraded`] while none is usable.
    pub async fn require_store(&self) -> Result<Arc<dyn SessionStore>, ServiceError> {
        if self.is_degraded() {
            return Err(ServiceError::Degraded);
        }
        self.store().await.ok_or(ServiceError::Degraded)
    }

    /// Install a new session store implementation and leave degraded mode.
    pub async fn install_store(&self, store: Arc<dyn SessionStore>) {
        {
            let mut guard = self.store.write().await;
            *guard = Some(store);
        }
        self.update_degraded(false);
    }

    /// Remove the current session store and enter degraded mode.
    pub async fn clear_store(&self) {
        {
            let mut guard = self.store.write().await;
            guard.take();
        }
        self.update_degraded(true);
    }

    /// Current degraded flag.
    pub fn is_degraded(&self) -> bool {
        *self.degraded.borrow()
    }

    /// Subscribe to degraded mode updates.
    pub fn degraded_watcher(&self) -> watch::Receiver<bool> {
        self.degraded.subscribe()
    }

    /// Update and broadcast the degraded flag when the value changes.
    pub fn update_degraded(&self, value: bool) {
        self.degraded.send_if_modified(|current| {
            if *current == value {
                return false;
            }
            *current = value;
            true
        });
    }

    /// Immutable runtime configuration.
    pub fn config(&self) -> Arc<AppConfig> {
        self.config.clone()
    }

    /// Time source for every deadline computation.
    pub fn clock(&self) -> &Clock {
        &self.clock
    }

    /// Per-session broadcast rooms.
    pub fn rooms(&self) -> &RoomHub {
        &self.rooms
    }

    /// Armed countdowns.
    pub fn timers(&self) -> &TimerRegistry {
        &self.timers
    }

    /// In-memory leaderboards.
    pub fn leaderboards(&self) -> &LeaderboardAggregator {
        &self.leaderboards
    }

    /// Ids of the connected realtime clients.
    pub fn connections(&self) -> &DashSet<Uuid> {
        &self.connections
    }

    /// Serialise lifecycle work and joins for one session.
    pub async fn lock_session(&self, session_id: Uuid) -> OwnedMutexGuard<()> {
        self.session_gates.acquire(&session_id).await
    }

    /// Serialise attempt writes of one student in one session.
    pub async fn lock_attempt(&self, session_id: Uuid, student_id: &str) -> OwnedMutexGuard<()> {
        self.attempt_gates
            .acquire(&(session_id, student_id.to_string()))
            .await
    }

    /// Serialise join code allocation so two sessions never draw the same free code.
    pub async fn lock_join_codes(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.join_code_gate.lock().await
    }

    /// Drop the gates of a session that reached its terminal status.
    pub fn forget_session_gates(&self, session_id: Uuid) {
        self.session_gates.retain(|id| *id != session_id);
        self.attempt_gates.retain(|(id, _)| *id != session_id);
    }

    /// Bound applied to the work of one transition.
    pub fn transition_timeout(&self) -> Option<Duration> {
        self.transition_timeout
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::session_store::MemorySessionStore;

    #[tokio::test]
    async fn starts_degraded_until_a_store_is_installed() {
        let state = AppState::new(AppConfig::default());
        assert!(state.is_degraded());
        assert!(matches!(
            state.require_store().await,
            Err(ServiceError::Degraded)
        ));

        state.install_store(Arc::new(MemorySessionStore::new())).await;
        assert!(!state.is_degraded());
        assert!(state.require_store().await.is_ok());

        state.clear_store().await;
        assert!(state.is_degraded());
    }

    #[tokio::test]
    async fn degraded_flag_blocks_installed_store() {
        let state = AppState::new(AppConfig::default());
        state.install_store(Arc::new(MemorySessionStore::new())).await;
        let mut watcher = state.degraded_watcher();

        state.update_degraded(true);
        assert!(watcher.has_changed().unwrap());
        assert!(*watcher.borrow_and_update());
        assert!(state.require_store().await.is_err());
    }
}
