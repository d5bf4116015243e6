//! Error taxonomy shared by every service in the crate

use crate::store::StoreError;

/// Caller-facing failure of a whole request.
///
/// Per-item failures inside a batch (a single file grant, a single purge
/// delete) never surface here; they are recorded in the batch result.
#[derive(thiserror::Error, Debug)]
pub enum NotaryError {
    #[error("bad request: {0}")]
    Validation(String),
    #[error("{0}")]
    NotFound(String),
    #[error("server misconfigured: {0}")]
    Misconfigured(String),
    #[error("{0}")]
    Upstream(String),
    #[error("store failure: {0}")]
    Store(#[from] StoreError),
}

impl NotaryError {
    /// HTTP-class status an outer transport should answer with.
    pub fn status(&self) -> u16 {
        match self {
            NotaryError::Validation(_) => 400,
            NotaryError::NotFound(_) => 404,
            NotaryError::Misconfigured(_) => 500,
            NotaryError::Upstream(_) => 502,
            NotaryError::Store(StoreError::NotFound(_)) => 404,
            NotaryError::Store(StoreError::VersionConflict { .. })
            | NotaryError::Store(StoreError::AlreadyExists(_)) => 409,
            NotaryError::Store(_) => 500,
        }
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        NotaryError::Validation(msg.into())
    }

    pub fn misconfigured(msg: impl Into<String>) -> Self {
        NotaryError::Misconfigured(msg.into())
    }
}
