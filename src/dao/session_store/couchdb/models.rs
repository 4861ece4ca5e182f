use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::dao::models::{AttemptEntity, QuizEntity, SessionEntity};

pub const SESSION_PREFIX: &str = "session::";
pub const QUIZ_PREFIX: &str = "quiz::";
pub const ATTEMPT_PREFIX: &str = "attempt::";
pub const END_SUFFIX: &str = "\u{ffff}";

#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    #[allow(dead_code)]
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Stored document: CouchDB metadata next to the flattened entity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchDocument<T> {
    #[serde(rename = "_id")]
    pub id: String,
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    #[serde(flatten)]
    pub body: T,
}

impl<T> CouchDocument<T> {
    pub fn new(id: String, body: T) -> Self {
        Self { id, rev: None, body }
    }
}

pub type CouchSessionDocument = CouchDocument<SessionEntity>;
pub type CouchQuizDocument = CouchDocument<QuizEntity>;
pub type CouchAttemptDocument = CouchDocument<AttemptEntity>;

pub fn session_doc_id(id: Uuid) -> String {
    format!("{SESSION_PREFIX}{id}")
}

pub fn quiz_doc_id(id: &str) -> String {
    format!("{QUIZ_PREFIX}{id}")
}

pub fn attempt_doc_id(id: Uuid) -> String {
    format!("{ATTEMPT_PREFIX}{id}")
}
