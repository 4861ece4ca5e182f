use std::{sync::Arc, time::SystemTime};

use futures::future::BoxFuture;
use reqwest::{Client, Method, RequestBuilder, StatusCode};
use serde::{Serialize, de::DeserializeOwned};
use serde_json::from_value;
use uuid::Uuid;

use super::{
    config::CouchConfig,
    error::{CouchDaoError, CouchResult},
    models::{
        ATTEMPT_PREFIX, AllDocsResponse, CouchAttemptDocument, CouchDocument, CouchQuizDocument,
        CouchSessionDocument, END_SUFFIX, SESSION_PREFIX, attempt_doc_id, quiz_doc_id,
        session_doc_id,
    },
};
use crate::dao::{
    models::{AttemptEntity, QuizEntity, SessionEntity, SessionPatch},
    session_store::SessionStore,
    storage::StorageResult,
};

/// Session store backed by a CouchDB database over its HTTP API.
#[derive(Clone)]
pub struct CouchSessionStore {
    client: Client,
    base_url: Arc<str>,
    database: Arc<str>,
    auth: Option<(Arc<str>, Arc<str>)>,
}

impl CouchSessionStore {
    /// Build the HTTP client and create the database when missing.
    pub async fn connect(config: CouchConfig) -> CouchResult<Self> {
        let client = Client::builder()
            .build()
            .map_err(|source| CouchDaoError::ClientBuilder { source })?;

        let store = Self {
            client,
            base_url: Arc::from(config.base_url.trim_end_matches('/')),
            database: Arc::from(config.database),
            auth: config
                .username
                .zip(config.password)
                .map(|(user, pass)| (Arc::from(user), Arc::from(pass))),
        };

        store.ensure_database().await?;
        Ok(store)
    }

    fn authorize(&self, builder: RequestBuilder) -> RequestBuilder {
        match self.auth {
            Some((ref user, ref pass)) => builder.basic_auth(user.as_ref(), Some(pass.as_ref())),
            None => builder,
        }
    }

    fn database_url(&self) -> String {
        format!("{}/{}", self.base_url, self.database)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let url = format!("{}/{}", self.database_url(), path);
        self.authorize(self.client.request(method, url))
    }

    async fn ensure_database(&self) -> CouchResult<()> {
        let database = self.database.to_string();
        let url = self.database_url();

        let response = self
            .authorize(self.client.get(&url))
            .send()
            .await
            .map_err(|source| CouchDaoError::DatabaseQuery {
                database: database.clone(),
                source,
            })?;

        match response.status() {
            StatusCode::OK => Ok(()),
            StatusCode::NOT_FOUND => {
                let create = self
                    .authorize(self.client.put(&url))
                    .send()
                    .await
                    .map_err(|source| CouchDaoError::DatabaseCreate {
                        database: database.clone(),
                        source,
                    })?;
                if create.status().is_success() {
                    Ok(())
                } else {
                    Err(CouchDaoError::DatabaseStatus {
                        database,
                        status: create.status(),
                    })
                }
            }
            other => Err(CouchDaoError::DatabaseStatus {
                database,
                status: other,
            }),
        }
    }

    async fn get_document<T>(&self, doc_id: &str) -> CouchResult<Option<T>>
    where
        T: DeserializeOwned,
    {
        let response = self
            .request(Method::GET, doc_id)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                response.json::<T>().await.map(Some).map_err(|source| {
                    CouchDaoError::DecodeResponse {
                        path: doc_id.to_string(),
                        source,
                    }
                })
            }
            other => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status: other,
            }),
        }
    }

    async fn put_document<T>(&self, doc_id: &str, document: &T) -> CouchResult<()>
    where
        T: ?Sized + Serialize,
    {
        let response = self
            .request(Method::PUT, doc_id)
            .json(document)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: doc_id.to_string(),
                source,
            })?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => Err(CouchDaoError::Conflict {
                path: doc_id.to_string(),
            }),
            status => Err(CouchDaoError::RequestStatus {
                path: doc_id.to_string(),
                status,
            }),
        }
    }

    /// Insert or overwrite a document, carrying over the current revision.
    async fn upsert<T>(&self, mut document: CouchDocument<T>) -> CouchResult<()>
    where
        T: Serialize + DeserializeOwned,
    {
        if let Some(existing) = self.get_document::<CouchDocument<T>>(&document.id).await? {
            document.rev = existing.rev;
        }
        self.put_document(&document.id, &document).await
    }

    async fn list_documents<T>(&self, prefix: &str) -> CouchResult<Vec<T>>
    where
        T: DeserializeOwned,
    {
        const ALL_DOCS: &str = "_all_docs";
        let query = [
            ("include_docs", "true".to_string()),
            ("startkey", format!("\"{prefix}\"")),
            ("endkey", format!("\"{prefix}{END_SUFFIX}\"")),
        ];

        let response = self
            .request(Method::GET, ALL_DOCS)
            .query(&query)
            .send()
            .await
            .map_err(|source| CouchDaoError::RequestSend {
                path: ALL_DOCS.to_string(),
                source,
            })?;

        if !response.status().is_success() {
            return Err(CouchDaoError::RequestStatus {
                path: ALL_DOCS.to_string(),
                status: response.status(),
            });
        }

        let payload = response.json::<AllDocsResponse>().await.map_err(|source| {
            CouchDaoError::DecodeResponse {
                path: ALL_DOCS.to_string(),
                source,
            }
        })?;

        payload
            .rows
            .into_iter()
            .filter_map(|row| row.doc)
            .map(|doc| {
                from_value(doc).map_err(|source| CouchDaoError::DeserializeValue {
                    path: ALL_DOCS.to_string(),
                    source,
                })
            })
            .collect()
    }

    async fn sessions(&self) -> CouchResult<Vec<SessionEntity>> {
        let documents = self
            .list_documents::<CouchSessionDocument>(SESSION_PREFIX)
            .await?;
        Ok(documents.into_iter().map(|doc| doc.body).collect())
    }

    async fn attempts_where(
        &self,
        keep: impl Fn(&AttemptEntity) -> bool,
    ) -> CouchResult<Vec<AttemptEntity>> {
        let mut attempts: Vec<AttemptEntity> = self
            .list_documents::<CouchAttemptDocument>(ATTEMPT_PREFIX)
            .await?
            .into_iter()
            .map(|doc| doc.body)
            .filter(|attempt| keep(attempt))
            .collect();
        attempts.sort_by_key(|attempt| attempt.started_at);
        Ok(attempts)
    }

    async fn update_session(
        &self,
        id: Uuid,
        patch: SessionPatch,
    ) -> CouchResult<Option<SessionEntity>> {
        let doc_id = session_doc_id(id);
        let Some(mut document) = self.get_document::<CouchSessionDocument>(&doc_id).await? else {
            return Ok(None);
        };
        document.body.apply(patch, SystemTime::now());
        self.put_document(&doc_id, &document).await?;
        Ok(Some(document.body))
    }
}

impl SessionStore for CouchSessionStore {
    fn get_session(&self, id: Uuid) -> BoxFuture<'static, StorageResult<Option<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store
                .get_document::<CouchSessionDocument>(&session_doc_id(id))
                .await?;
            Ok(document.map(|doc| doc.body))
        })
    }

    fn save_session(&self, session: SessionEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = CouchDocument::new(session_doc_id(session.id), session);
            store.upsert(document).await.map_err(Into::into)
        })
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
        Box::pin(async move {
            let sessions = store.sessions().await?;
            Ok(sessions
                .into_iter()
                .find(|session| session.join_code == code && !session.status.is_ended()))
        })
    }

    fn list_active_sessions(&self) -> BoxFuture<'static, StorageResult<Vec<SessionEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let mut sessions: Vec<SessionEntity> = store
                .sessions()
                .await?
                .into_iter()
                .filter(|session| !session.status.is_ended())
                .collect();
            sessions.sort_by_key(|session| session.created_at);
            Ok(sessions)
        })
    }

    fn get_quiz(&self, id: String) -> BoxFuture<'static, StorageResult<Option<QuizEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            let document = store
                .get_document::<CouchQuizDocument>(&quiz_doc_id(&id))
                .await?;
            Ok(document.map(|doc| doc.body))
        })
    }

    fn save_quiz(&self, quiz: QuizEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = CouchDocument::new(quiz_doc_id(&quiz.id), quiz);
            store.upsert(document).await.map_err(Into::into)
        })
    }

    fn save_attempt(&self, attempt: AttemptEntity) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let document = CouchDocument::new(attempt_doc_id(attempt.id), attempt);
            store.upsert(document).await.map_err(Into::into)
        })
    }

    fn get_attempts_by_student(
        &self,
        quiz_id: String,
        student_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<AttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .attempts_where(|attempt| {
                    attempt.quiz_id == quiz_id && attempt.student_id == student_id
                })
                .await
                .map_err(Into::into)
        })
    }

    fn get_attempts_by_quiz(
        &self,
        quiz_id: String,
    ) -> BoxFuture<'static, StorageResult<Vec<AttemptEntity>>> {
        let store = self.clone();
        Box::pin(async move {
            store
                .attempts_where(|attempt| attempt.quiz_id == quiz_id)
                .await
                .map_err(Into::into)
        })
    }

    fn health_check(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move {
            let url = store.database_url();
            let response = store
                .authorize(store.client.get(&url))
                .send()
                .await
                .map_err(|source| CouchDaoError::RequestSend {
                    path: url.clone(),
                    source,
                })?;

            if response.status().is_success() {
                Ok(())
            } else {
                Err(CouchDaoError::RequestStatus {
                    path: url,
                    status: response.status(),
                }
                .into())
            }
        })
    }

    fn try_reconnect(&self) -> BoxFuture<'static, StorageResult<()>> {
        let store = self.clone();
        Box::pin(async move { store.ensure_database().await.map_err(Into::into) })
    }
}
