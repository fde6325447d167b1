//! Error taxonomy surfaced by engine operations.

/// Every engine operation fails with one of these kinds plus a
/// human-readable message. A storage failure during the primary write
/// of a transition surfaces here; storage failures during side effects
/// are logged by the notification sink and never reach a caller.
#[derive(thiserror::Error, Debug)]
pub enum EngineError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not authorized: {0}")]
    Authorization(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("storage failure: {0}")]
    Storage(String),
}

impl From<sled::Error> for EngineError {
    fn from(err: sled::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

impl From<minicbor::decode::Error> for EngineError {
    fn from(err: minicbor::decode::Error) -> Self {
        EngineError::Storage(format!("record decode failed: {err}"))
    }
}

impl From<minicbor::encode::Error<std::convert::Infallible>> for EngineError {
    fn from(err: minicbor::encode::Error<std::convert::Infallible>) -> Self {
        EngineError::Storage(format!("record encode failed: {err}"))
    }
}
