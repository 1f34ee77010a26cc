use thiserror::Error;

#[derive(Debug, Error)]
pub enum InfraError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Invalid config: {0}")]
    InvalidConfig(String),
    #[error("Credential error: {0}")]
    Credential(String),
    #[error("Calendar error: {0}")]
    Calendar(String),
    #[error("Invalid date range. You provided {token}")]
    InvalidRange { token: String },
    #[error("issue tracker unavailable: {0}")]
    TrackerUnavailable(String),
    #[error("issue tracker rejected the request: http {status}; body={body}")]
    TrackerRejected { status: u16, body: String },
    #[error("another reconciliation run for user {0} is still in progress")]
    RunInProgress(String),
    #[error("lock poisoned: {0}")]
    LockPoisoned(String),
}

impl InfraError {
    pub fn lock_poisoned(what: &str, error: impl std::fmt::Display) -> Self {
        Self::LockPoisoned(format!("{what} lock poisoned: {error}"))
    }
}
