use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ChatError {
    #[error("{0}")]
    InvalidArgument(String),
    #[error("{0}")]
    Conflict(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Forbidden(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("store unavailable")]
    Unavailable(#[from] StoreError),
}

impl ChatError {
    /// Stable machine-readable name of the failure kind.
    pub fn kind(&self) -> &'static str {
        match self {
            ChatError::InvalidArgument(_) => "invalid_argument",
            ChatError::Conflict(_) => "conflict",
            ChatError::NotFound(_) => "not_found",
            ChatError::Forbidden(_) => "forbidden",
            ChatError::PreconditionFailed(_) => "precondition_failed",
            ChatError::Unavailable(_) => "unavailable",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_errors_become_unavailable() {
        let err: ChatError = StoreError::Timeout.into();
        assert_eq!(err.kind(), "unavailable");
        assert_eq!(err.to_string(), "store unavailable");
    }
}
