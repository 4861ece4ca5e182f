#[cfg(feature = "couch-store")]
pub mod couchdb;
pub mod memory;
#[cfg(feature = "mongo-store")]
pub mod mongodb;

use crate::dao::models::{AttemptEntity, QuizEntity, SessionEntity, SessionPatch};
use crate::dao::storage::StorageResult;
use futures::future::BoxFuture;
use uuid::Uuid;

pub use memory::MemorySessionStore;

/// Abstraction over the persistence layer for quizzes, sessions and attempts.
pub trait SessionStore: Send + Sync {
    fn get_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>>;
    /// Apply `patch` and return the updated session, `None` when it does not exist.
    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Find the non-ended session holding `code`.
    fn get_session_by_join_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>>;
    /// Every session whose status is not `ended`.
    fn list_active_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>>;
    fn get_quiz(&self, id: String) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>>;
    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn save_attempt(&self, attempt: AttemptEntity) -> BoxFuture<'static, StorageResult<()>>;
    fn get_attempts_by_student(
        &self,
        quiz_id: String,
        student_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<AttemptEntity>>>;
    fn get_attempts_by_quiz(
        &self,
        quiz_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<AttemptEntity>>>;
    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>>;
    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>>;
}
