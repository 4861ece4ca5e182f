//! Process-local session store used for development runs and tests.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::SystemTime,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use thiserror::Error;
use uuid::Uuid;

use crate::dao::{
    models::{AttemptEntity, QuizEntity, SessionEntity, SessionPatch},
    session_store::SessionStore,
    storage::{StorageError, StorageResult},
};

/// Failure reported while the memory store is switched offline.
#[derive(Debug, Error)]
#[error("memory store is offline")]
pub struct MemoryStoreOffline;

/// Session store keeping everything in dashmaps; cloning shares the same data.
#[derive(Clone, Default)]
pub struct MemorySessionStore {
    inner: Arc<MemoryInner>,
}

#[derive(Default)]
struct MemoryInner {
    sessions: DashMap<Uuid, SessionEntity>,
    quizzes: DashMap<String, QuizEntity>,
    attempts: DashMap<Uuid, AttemptEntity>,
    offline: AtomicBool,
}

impl MemorySessionStore {
    /// Create an empty, online store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an outage: every operation fails until switched back online.
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    fn ensure_online(&self, operation: &str) -> StorageResult<()> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(StorageError::unavailable(
                format!("{operation} failed"),
                MemoryStoreOffline,
            ));
        }
        Ok(())
    }

    fn get_session(&self, id: Uuid) -> StorageResult<Option<SessionEntity>> {
        self.ensure_online("get session")?;
        Ok(self.inner.sessions.get(&id).map(|entry| entry.clone()))
    }

    fn update_session(&self, id: Uuid, patch: SessionPatch) -> StorageResult<Option<SessionEntity>> {
        self.ensure_online("update session")?;
        Ok(self.inner.sessions.get_mut(&id).map(|mut entry| {
            entry.apply(patch, SystemTime::now());
            entry.clone()
        }))
    }

    fn get_session_by_join_code(&self, code: &str) -> StorageResult<Option<SessionEntity>> {
        self.ensure_online("find session by join code")?;
        Ok(self
            .inner
            .sessions
            .iter()
            .find(|entry| entry.join_code == code && !entry.status.is_ended())
            .map(|entry| entry.clone()))
    }

    fn list_active_sessions(&self) -> StorageResult<Vec<SessionEntity>> {
        self.ensure_online("list active sessions")?;
        let mut sessions: Vec<SessionEntity> = self
            .inner
            .sessions
            .iter()
            .filter(|entry| !entry.status.is_ended())
            .map(|entry| entry.clone())
            .collect();
        sessions.sort_by_key(|session| session.created_at);
        Ok(sessions)
    }

    fn attempts_where(&self, keep: impl Fn(&AttemptEntity) -> bool) -> Vec<AttemptEntity> {
        let mut attempts: Vec<AttemptEntity> = self
            .inner
            .attempts
            .iter()
            .filter(|entry| keep(entry.value()))
            .map(|entry| entry.clone())
            .collect();
        attempts.sort_by_key(|attempt| attempt.started_at);
        attempts
    }
}

impl SessionStore for MemorySessionStore {
    fn get_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.get_session(id) })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online("save session")?;
            store.inner.sessions.insert(session.id, session);
            Ok(())
        })
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(id, patch) })
    }

    fn get_session_by_join_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.get_session_by_join_code(&code) })
    }

    fn list_active_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_sessions() })
    }

    fn get_quiz(&self, id: String) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online("get quiz")?;
            Ok(store.inner.quizzes.get(&id).map(|entry| entry.clone()))
        })
    }

    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online("save quiz")?;
            store.inner.quizzes.insert(quiz.id.clone(), quiz);
            Ok(())
        })
    }

    fn save_attempt(&self, attempt: AttemptEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online("save attempt")?;
            store.inner.attempts.insert(attempt.id, attempt);
            Ok(())
        })
    }

    fn get_attempts_by_student(
        &self,
        quiz_id: String,
        student_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<AttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online("get attempts by student")?;
            Ok(store.attempts_where(|attempt| {
                attempt.quiz_id == quiz_id && attempt.student_id == student_id
            }))
        })
    }

    fn get_attempts_by_quiz(
        &self,
        quiz_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<AttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store.ensure_online("get attempts by quiz")?;
            Ok(store.attempts_where(|attempt| attempt.quiz_id == quiz_id))
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online("health check") })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_online("reconnect") })
    }
}
