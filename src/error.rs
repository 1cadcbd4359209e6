use thiserror::Error;

/// Failure taxonomy surfaced at the command boundary: remote inference,
/// document store, or input validation. Nothing here is retried
/// automatically except versioned-update conflicts, which callers resolve
/// with their own bounded retry loop.
#[derive(Debug, Error)]
pub enum Error {
    #[error("inference request failed: {0}")]
    Inference(String),

    #[error("store error: {0}")]
    Store(String),

    #[error("{0}")]
    Validation(String),

    #[error("document not found: {collection}/{id}")]
    NotFound { collection: String, id: String },

    #[error("gave up after {0} conflicting update attempts")]
    Conflict(usize),
}

impl Error {
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }
}

impl From<sqlx::Error> for Error {
    fn from(err: sqlx::Error) -> Self {
        Error::Store(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Store(format!("malformed document: {err}"))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::Inference(err.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
