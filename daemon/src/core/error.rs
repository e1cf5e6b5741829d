use thiserror::Error;
use uuid::Uuid;
use weft_common::{
    batch::BatchError, crypto::Hash, data::DataError, group::GroupError, message::MessageError,
};

use crate::plugins::PluginError;

// Central error of the coordination core. API surfaces expose the stable
// code string, logs carry the cause chain.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown data reference {0}")]
    InvalidRef(Uuid),

    #[error("Author '{0}' is not a local identity")]
    Unauthorized(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("{0} not found")]
    NotFound(&'static str),

    #[error("Row already exists with a different id")]
    IdMismatch,

    #[error("Remote unavailable: {0}")]
    RemoteUnavailable(String),

    #[error("Remote rejected the request: {0}")]
    RemoteRejected(String),

    #[error("Integrity violation: {0}")]
    IntegrityViolation(String),

    #[error("Cancelled")]
    Cancelled,

    #[error("No commit point is active")]
    NoCommitPoint,

    #[error("A commit point is already active")]
    CommitPointActive,

    #[error("Group {0} is not known locally")]
    GroupNotFound(Hash),

    #[error("Batch {0} is not sealed")]
    BatchNotSealed(Uuid),

    #[error("No operation handler registered for {0}")]
    NoHandler(String),

    #[error(transparent)]
    Message(#[from] MessageError),

    #[error(transparent)]
    Data(#[from] DataError),

    #[error(transparent)]
    Group(#[from] GroupError),

    #[error(transparent)]
    Batch(#[from] BatchError),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sled::Error),
}

impl CoreError {
    // Stable numeric code exposed on API surfaces, keep existing values
    pub fn code(&self) -> u16 {
        match self {
            CoreError::InvalidInput(_) => 10100,
            CoreError::InvalidRef(_) => 10101,
            CoreError::Unauthorized(_) => 10110,
            CoreError::Conflict(_) => 10120,
            CoreError::NotFound(_) => 10130,
            CoreError::IdMismatch => 10131,
            CoreError::RemoteUnavailable(_) => 10200,
            CoreError::RemoteRejected(_) => 10201,
            CoreError::IntegrityViolation(_) => 10300,
            CoreError::Cancelled => 10400,
            CoreError::NoCommitPoint | CoreError::CommitPointActive => 10500,
            CoreError::GroupNotFound(_) => 10132,
            CoreError::BatchNotSealed(_) => 10133,
            CoreError::NoHandler(_) => 10134,
            CoreError::Message(_) | CoreError::Data(_) | CoreError::Group(_)
            | CoreError::Batch(_) => 10102,
            CoreError::Serde(_) => 10501,
            CoreError::Database(_) => 10502,
        }
    }

    pub fn code_string(&self) -> String {
        format!("WF{:05}", self.code())
    }

    // Whether a retry can reasonably change the outcome
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::RemoteUnavailable(_) | CoreError::Database(_)
        )
    }
}

impl From<PluginError> for CoreError {
    fn from(err: PluginError) -> Self {
        match err {
            PluginError::Unavailable(msg) => CoreError::RemoteUnavailable(msg),
            PluginError::Rejected(msg) => CoreError::RemoteRejected(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_string_format() {
        let err = CoreError::Unauthorized("org/mallory".to_owned());
        assert_eq!(err.code_string(), "WF10110");
    }

    #[test]
    fn test_plugin_error_classification() {
        let retryable: CoreError = PluginError::Unavailable("timeout".into()).into();
        assert!(retryable.is_retryable());
        let fatal: CoreError = PluginError::Rejected("bad payload".into()).into();
        assert!(!fatal.is_retryable());
    }
}
