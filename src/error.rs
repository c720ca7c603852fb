use thiserror::Error;

/// Closed set of error kinds. Doc comments record the status class an
/// eventual transport layer would map each kind to; this crate defines no
/// transport and has no `IntoResponse` impl.
#[derive(Error, Debug)]
pub enum AppError {
    /// 404 — space, collection, or object absent.
    #[error("not found: {0}")]
    NotFound(String),

    /// 400/409 — already exists, or an indexing job is already running.
    #[error("conflict: {0}")]
    Conflict(String),

    /// 400/413/422 — validation failure; field detail lives in the message.
    #[error("invalid: {0}")]
    Invalid(String),

    /// Reserved; the core has no authentication model of its own.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// 500 — ObjectStore/VectorStore/Embedder/Chatter/Reranker failed.
    #[error("upstream failure: {0}")]
    Upstream(String),

    /// 500 — dimension probe failed, or collection schema mismatch.
    #[error("fatal: {0}")]
    Fatal(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type AppResult<T> = Result<T, AppError>;

impl AppError {
    /// Per §7: collection setup, dimension probe, and final insert failures
    /// are fatal to an indexing job and must terminate the worker cleanly.
    pub fn is_job_fatal(&self) -> bool {
        matches!(self, AppError::Fatal(_) | AppError::Upstream(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_fatal_classification() {
        assert!(AppError::Fatal("dim mismatch".into()).is_job_fatal());
        assert!(AppError::Upstream("vector store down".into()).is_job_fatal());
        assert!(!AppError::NotFound("x".into()).is_job_fatal());
    }
}
