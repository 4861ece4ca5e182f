use std::{sync::Arc, time::SystemTime};

use futures::{TryStreamExt, future::BoxFuture};
use mongodb::{
    Client, Collection, Database, IndexModel,
    bson::doc,
    options::{IndexOptions, ReturnDocument},
};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{
    config::MongoConfig,
    connection::establish_connection,
    error::{MongoDaoError, MongoResult},
    models::{
        MongoAttemptDocument, MongoQuizDocument, MongoSessionDocument, doc_id, patch_update,
    },
};
use crate::{
    dao::{
        models::{AttemptEntity, QuizEntity, SessionEntity, SessionPatch},
        session_store::SessionStore,
        storage::StorageResult,
    },
    state::state_machine::SessionStatus,
};

const SESSION_COLLECTION_NAME: &str = "sessions";
const QUIZ_COLLECTION_NAME: &str = "quizzes";
const ATTEMPT_COLLECTION_NAME: &str = "attempts";

/// Session store backed by a MongoDB database.
#[derive(Clone)]
pub struct MongoSessionStore {
    inner: Arc<MongoInner>,
}

struct MongoInner {
    state: RwLock<MongoState>,
    config: MongoConfig,
}

struct MongoState {
    #[allow(dead_code)]
    client: Client,
    database: Database,
}

impl MongoInner {
    async fn ping(&self) -> MongoResult<()> {
        let database = self.state.read().await.database.clone();
        database
            .run_command(doc! { "ping": 1 })
            .await
            .map_err(|source| MongoDaoError::HealthPing { source })?;
        Ok(())
    }

    async fn reconnect(&self) -> MongoResult<()> {
        let (client, database) =
            establish_connection(&self.config.options, &self.config.database_name).await?;
        let mut guard = self.state.write().await;
        guard.client = client;
        guard.database = database;
        Ok(())
    }
}

impl MongoSessionStore {
    /// Establish a connection to MongoDB and ensure indexes are present.
    pub async fn connect(config: MongoConfig) -> MongoResult<Self> {
        let (client, database) =
            establish_connection(&config.options, &config.database_name).await?;

        let store = Self {
            inner: Arc::new(MongoInner {
                state: RwLock::new(MongoState { client, database }),
                config,
            }),
        };
        store.ensure_indexes().await?;
        Ok(store)
    }

    async fn ensure_indexes(&self) -> MongoResult<()> {
        let sessions = self.sessions().await;
        for (name, keys) in [
            ("session_join_code_idx", doc! {"join_code": 1, "status": 1}),
            ("session_status_idx", doc! {"status": 1}),
        ] {
            let index = IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(Some(name.to_owned())).build())
                .build();
            sessions
                .create_index(index)
                .await
                .map_err(|source| MongoDaoError::EnsureIndex {
                    collection: SESSION_COLLECTION_NAME,
                    index: name,
                    source,
                })?;
        }

        let attempts = self.attempts().await;
        let index = IndexModel::builder()
            .keys(doc! {"quiz_id": 1, "student_id": 1})
            .options(
                IndexOptions::builder()
                    .name(Some("attempt_quiz_student_idx".to_owned()))
                    .build(),
            )
            .build();
        attempts
            .create_index(index)
            .await
            .map_err(|source| MongoDaoError::EnsureIndex {
                collection: ATTEMPT_COLLECTION_NAME,
                index: "quiz_id,student_id",
                source,
            })?;

        Ok(())
    }

    async fn database(&self) -> Database {
        self.inner.state.read().await.database.clone()
    }

    async fn sessions(&self) -> Collection<MongoSessionDocument> {
        self.database().await.collection(SESSION_COLLECTION_NAME)
    }

    async fn quizzes(&self) -> Collection<MongoQuizDocument> {
        self.database().await.collection(QUIZ_COLLECTION_NAME)
    }

    async fn attempts(&self) -> Collection<MongoAttemptDocument> {
        self.database().await.collection(ATTEMPT_COLLECTION_NAME)
    }

    async fn get_session(&self, id: Uuid) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one(doc_id(id))
            .await
            .map_err(|source| MongoDaoError::LoadSession { id, source })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn save_session(&self, session: SessionEntity) -> MongoResult<()> {
        let id = session.id;
        let document = MongoSessionDocument::from(session);
        self.sessions()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveSession { id, source })?;
        Ok(())
    }

    async fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> MongoResult<Option<SessionEntity>> {
        let document = self
            .sessions()
            .await
            .find_one_and_update(doc_id(id), patch_update(patch, SystemTime::now()))
            .return_document(ReturnDocument::After)
            .await
            .map_err(|source| MongoDaoError::UpdateSession { id, source })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn get_session_by_join_code(&self, code: String) -> MongoResult<Option<SessionEntity>> {
        let filter = doc! {
            "join_code": code.clone(),
            "status": { "$ne": SessionStatus::Ended.as_str() },
        };
        let document = self
            .sessions()
            .await
            .find_one(filter)
            .await
            .map_err(|source| MongoDaoError::LoadJoinCode { code, source })?;
        document.map(SessionEntity::try_from).transpose()
    }

    async fn list_active_sessions(&self) -> MongoResult<Vec<SessionEntity>> {
        let cursor = self
            .sessions()
            .await
            .find(doc! { "status": { "$ne": SessionStatus::Ended.as_str() } })
            .sort(doc! { "created_at": 1 })
            .await
            .map_err(|source| MongoDaoError::ListSessions { source })?;
        let documents: Vec<MongoSessionDocument> = cursor
            .try_collect()
            .await
            .map_err(|source| MongoDaoError::ListSessions { source })?;
        documents.into_iter().map(SessionEntity::try_from).collect()
    }

    async fn get_quiz(&self, id: String) -> MongoResult<Option<QuizEntity>> {
        let document = self
            .quizzes()
            .await
            .find_one(doc_id(&id))
            .await
            .map_err(|source| MongoDaoError::LoadQuiz { id, source })?;
        Ok(document.map(Into::into))
    }

    async fn save_quiz(&self, quiz: QuizEntity) -> MongoResult<()> {
        let id = quiz.id.clone();
        let document = MongoQuizDocument::from(quiz);
        self.quizzes()
            .await
            .replace_one(doc_id(&id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveQuiz { id, source })?;
        Ok(())
    }

    async fn save_attempt(&self, attempt: AttemptEntity) -> MongoResult<()> {
        let id = attempt.id;
        let document = MongoAttemptDocument::from(attempt);
        self.attempts()
            .await
            .replace_one(doc_id(id), &document)
            .upsert(true)
            .await
            .map_err(|source| MongoDaoError::SaveAttempt { id, source })?;
        Ok(())
    }

    async fn find_attempts(
        &self,
        quiz_id: String,
        student_id: Option<String>,
    ) -> MongoResult<Vec<AttemptEntity>> {
        let mut filter = doc! { "quiz_id": quiz_id.clone() };
        if let Some(student_id) = student_id {
            filter.insert("student_id", student_id);
        }
        let cursor = match self
            .attempts()
            .await
            .find(filter)
            .sort(doc! { "started_at": 1 })
            .await
        {
            Ok(cursor) => cursor,
            Err(source) => return Err(MongoDaoError::LoadAttempts { quiz_id, source }),
        };
        let documents: Vec<MongoAttemptDocument> = match cursor.try_collect().await {
            Ok(documents) => documents,
            Err(source) => return Err(MongoDaoError::LoadAttempts { quiz_id, source }),
        };
        documents.into_iter().map(AttemptEntity::try_from).collect()
    }
}

impl SessionStore for MongoSessionStore {
    fn get_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.get_session(id).await.map_err(Into::into) })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_session(session).await.map_err(Into::into) })
    }

    fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.update_session(id, patch).await.map_err(Into::into) })
    }

    fn get_session_by_join_code(
        &self,
        code: String,
    ) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.get_session_by_join_code(code).await.map_err(Into::into) })
    }

    fn list_active_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.list_active_sessions().await.map_err(Into::into) })
    }

    fn get_quiz(&self, id: String) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.get_quiz(id).await.map_err(Into::into) })
    }

    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_quiz(quiz).await.map_err(Into::into) })
    }

    fn save_attempt(&self, attempt: AttemptEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.save_attempt(attempt).await.map_err(Into::into) })
    }

    fn get_attempts_by_student(
        &self,
        quiz_id: String,
        student_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<AttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .find_attempts(quiz_id, Some(student_id))
                .await
                .map_err(Into::into)
        })
    }

    fn get_attempts_by_quiz(
        &self,
        quiz_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<AttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move { store.find_attempts(quiz_id, None).await.map_err(Into::into) })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.ping().await.map_err(Into::into) })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.inner.reconnect().await.map_err(Into::into) })
    }
}
