//! Application-level configuration loading, including the fixture quizzes seeded into storage.

use std::{env, fs, io::ErrorKind, path::PathBuf, time::Duration};

use serde::Deserialize;
use tracing::{info, warn};

use crate::dao::models::{QuestionEntity, QuizEntity};

/// Default location on disk where the server looks for the JSON configuration.
const DEFAULT_CONFIG_PATH: &str = "config/app.json";
/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
const CONFIG_PATH_ENV: &str = "CLASSROOM_LIVE_CONFIG_PATH";
/// Environment variable selecting the storage backend.
const STORE_BACKEND_ENV: &str = "STORE_BACKEND";

const DEFAULT_TICK_INTERVAL_MS: u64 = 1_000;
const DEFAULT_JOIN_CODE_LENGTH: usize = 6;
const DEFAULT_JOIN_CODE_FALLBACK_LENGTH: usize = 8;
const DEFAULT_JOIN_CODE_ATTEMPTS: u32 = 10;
const DEFAULT_TRANSITION_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_ROOM_CAPACITY: usize = 64;
const DEFAULT_DURATION_SECS: u32 = 300;

#[derive(Debug, Clone)]
/// Immutable runtime configuration shared across the application.
pub struct AppConfig {
    tick_interval: Duration,
    join_code_length: usize,
    join_code_fallback_length: usize,
    join_code_attempts: u32,
    transition_timeout: Option<Duration>,
    room_capacity: usize,
    default_duration_secs: u32,
    quizzes: Vec<QuizEntity>,
}

impl AppConfig {
    /// Load the application configuration from disk, falling back to built-in defaults.
    pub fn load() -> Self {
        let path = resolve_config_path();
        match fs::read_to_string(&path) {
            Ok(contents) => match serde_json::from_str::<RawConfig>(&contents) {
                Ok(raw) => {
                    let app_config: Self = raw.into();
                    info!(
                        path = %path.display(),
                        quizzes = app_config.quizzes.len(),
                        "loaded configuration"
                    );
                    app_config
                }
                Err(err) => {
                    warn!(
                        path = %path.display(),
                        error = %err,
                        "failed to parse config; falling back to defaults"
                    );
                    Self::default()
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {
                info!(
                    path = %path.display(),
                    "config file not found; using built-in defaults"
                );
                Self::default()
            }
            Err(err) => {
                warn!(
                    path = %path.display(),
                    error = %err,
                    "failed to read config; falling back to defaults"
                );
                Self::default()
            }
        }
    }

    /// Period between two `timer:tick` broadcasts.
    pub fn tick_interval(&self) -> Duration {
        self.tick_interval
    }

    /// Length of freshly generated join codes.
    pub fn join_code_length(&self) -> usize {
        self.join_code_length
    }

    /// Longer length used once the regular length keeps colliding.
    pub fn join_code_fallback_length(&self) -> usize {
        self.join_code_fallback_length
    }

    /// Candidates tried per length before giving up on it.
    pub fn join_code_attempts(&self) -> u32 {
        self.join_code_attempts
    }

    /// Upper bound for the work of one lifecycle transition, `None` when unbounded.
    pub fn transition_timeout(&self) -> Option<Duration> {
        self.transition_timeout
    }

    /// Events buffered per session room before slow subscribers lag.
    pub fn room_capacity(&self) -> usize {
        self.room_capacity
    }

    /// Countdown used when neither the launch request nor the quiz specifies one.
    pub fn default_duration_secs(&self) -> u32 {
        self.default_duration_secs
    }

    /// Quizzes seeded into the store whenever it (re)connects.
    pub fn quizzes(&self) -> &[QuizEntity] {
        &self.quizzes
    }

    /// Replace the tick period.
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval.max(Duration::from_millis(1));
        self
    }

    /// Replace the transition timeout.
    pub fn with_transition_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.transition_timeout = timeout;
        self
    }

    /// Replace the fixture quizzes.
    pub fn with_quizzes(mut self, quizzes: Vec<QuizEntity>) -> Self {
        self.quizzes = quizzes;
        self
    }

    /// Replace the join code lengths and attempts per length.
    pub fn with_join_codes(mut self, length: usize, fallback_length: usize, attempts: u32) -> Self {
        self.join_code_length = length.max(1);
        self.join_code_fallback_length = fallback_length.max(self.join_code_length);
        self.join_code_attempts = attempts.max(1);
        self
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_millis(DEFAULT_TICK_INTERVAL_MS),
            join_code_length: DEFAULT_JOIN_CODE_LENGTH,
            join_code_fallback_length: DEFAULT_JOIN_CODE_FALLBACK_LENGTH,
            join_code_attempts: DEFAULT_JOIN_CODE_ATTEMPTS,
            transition_timeout: Some(Duration::from_millis(DEFAULT_TRANSITION_TIMEOUT_MS)),
            room_capacity: DEFAULT_ROOM_CAPACITY,
            default_duration_secs: DEFAULT_DURATION_SECS,
            quizzes: default_quizzes(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
/// JSON representation of the configuration file located at [`DEFAULT_CONFIG_PATH`].
struct RawConfig {
    tick_interval_ms: Option<u64>,
    join_code_length: Option<usize>,
    join_code_fallback_length: Option<usize>,
    join_code_attempts: Option<u32>,
    /// `0` disables the timeout.
    transition_timeout_ms: Option<u64>,
    room_capacity: Option<usize>,
    default_duration_secs: Option<u32>,
    quizzes: Option<Vec<QuizEntity>>,
}

impl From<RawConfig> for AppConfig {
    fn from(value: RawConfig) -> Self {
        let defaults = Self::default();
        let transition_timeout = match value.transition_timeout_ms {
            Some(0) => None,
            Some(ms) => Some(Duration::from_millis(ms)),
            None => defaults.transition_timeout,
        };

        Self {
            transition_timeout,
            room_capacity: value.room_capacity.unwrap_or(defaults.room_capacity).max(1),
            default_duration_secs: value
                .default_duration_secs
                .unwrap_or(defaults.default_duration_secs),
            quizzes: value.quizzes.unwrap_or_else(|| defaults.quizzes.clone()),
            ..defaults.clone()
        }
        .with_tick_interval(
            value
                .tick_interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.tick_interval),
        )
        .with_join_codes(
            value.join_code_length.unwrap_or(defaults.join_code_length),
            value
                .join_code_fallback_length
                .unwrap_or(defaults.join_code_fallback_length),
            value.join_code_attempts.unwrap_or(defaults.join_code_attempts),
        )
    }
}

/// Storage backend selected at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    /// Process-local maps; data is lost on restart.
    Memory,
    /// MongoDB through the official driver.
    Mongo,
    /// CouchDB through its HTTP API.
    Couch,
}

impl StoreBackend {
    /// Read [`STORE_BACKEND_ENV`], defaulting to MongoDB.
    pub fn from_env() -> Self {
        match env::var(STORE_BACKEND_ENV) {
            Ok(value) => Self::parse(&value).unwrap_or_else(|| {
                warn!(value = %value, "unknown storage backend; using mongo");
                StoreBackend::Mongo
            }),
            Err(_) => StoreBackend::Mongo,
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "memory" => Some(StoreBackend::Memory),
            "mongo" | "mongodb" => Some(StoreBackend::Mongo),
            "couch" | "couchdb" => Some(StoreBackend::Couch),
            _ => None,
        }
    }
}

/// Resolve the configuration path taking the environment override into account.
fn resolve_config_path() -> PathBuf {
    env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .filter(|path| !path.as_os_str().is_empty())
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

/// Demo quiz shipped with the binary so a fresh install can run a session.
fn default_quizzes() -> Vec<QuizEntity> {
    let question = |id: &str, prompt: &str, answer: &str| QuestionEntity {
        id: id.into(),
        prompt: prompt.into(),
        answer: answer.into(),
        choices: Vec::new(),
    };

    vec![QuizEntity {
        id: "demo".into(),
        title: "Warm-up".into(),
        questions: vec![
            question("q1", "What is 7 x 6?", "42"),
            question("q2", "Capital of France?", "Paris"),
            question("q3", "Chemical symbol for water?", "H2O"),
        ],
        duration_secs: Some(120),
    }]
}
