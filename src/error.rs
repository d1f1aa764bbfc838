//! Error taxonomy for the turn pipeline.
//!
//! Retrieval and generation failures abort only the current turn: the
//! user's already-appended message is preserved and no assistant message
//! is appended. Persistence failures are reported but never roll back a
//! completed, user-visible turn. Missing authorization for state
//! operations is a silent no-op, not an error.

use thiserror::Error;

/// Embedding or vector index failure.
#[derive(Debug, Error)]
pub enum RetrievalError {
    #[error("embedding service: {0}")]
    Embedding(String),

    #[error("vector index: {0}")]
    Index(String),

    #[error("retrieval deadline exceeded: {0}")]
    Timeout(&'static str),
}

/// Upstream model failure, timeout, or malformed stream.
#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("model upstream: {0}")]
    Upstream(String),

    #[error("malformed stream: {0}")]
    MalformedStream(String),

    #[error("generation deadline exceeded")]
    Timeout,

    #[error("consumer disconnected before completion")]
    Disconnected,
}

/// Chat persistence store failure. Best-effort: reported, never rolled back.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("chat store unavailable: {0}")]
    Unavailable(String),

    #[error("persistence deadline exceeded")]
    Timeout,
}

/// Credential verification failure (login glue only).
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,

    #[error("authentication failed: {0}")]
    Unknown(String),
}

/// Turn-level error surface for [`ChatEngine`](crate::engine::ChatEngine).
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Retrieval(#[from] RetrievalError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<reqwest::Error> for GenerationError {
    fn from(err: reqwest::Error) -> Self {
        GenerationError::Upstream(err.to_string())
    }
}
