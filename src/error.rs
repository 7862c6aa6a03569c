use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteErrorCode {
    Timeout,
    Io,
    EmptyBatch,
    ShuttingDown,
}

impl WriteErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            WriteErrorCode::Timeout => "timeout",
            WriteErrorCode::Io => "io",
            WriteErrorCode::EmptyBatch => "empty_batch",
            WriteErrorCode::ShuttingDown => "shutting_down",
        }
    }
}

/// Errors surfaced by the write path. Cloneable so a group leader can copy
/// one terminal status into every writer it completed on behalf of.
#[derive(Debug, Clone, Error)]
pub enum WriteError {
    #[error("write timed out waiting for admission")]
    Timeout,
    #[error("io error: {0}")]
    Io(Arc<std::io::Error>),
    #[error("write batch is empty")]
    EmptyBatch,
    #[error("write pipeline is shutting down")]
    ShuttingDown,
}

impl WriteError {
    pub fn code(&self) -> WriteErrorCode {
        match self {
            WriteError::Timeout => WriteErrorCode::Timeout,
            WriteError::Io(_) => WriteErrorCode::Io,
            WriteError::EmptyBatch => WriteErrorCode::EmptyBatch,
            WriteError::ShuttingDown => WriteErrorCode::ShuttingDown,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }
}

impl From<std::io::Error> for WriteError {
    fn from(err: std::io::Error) -> Self {
        WriteError::Io(Arc::new(err))
    }
}

#[cfg(test)]
mod tests {
    use super::{WriteError, WriteErrorCode};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(WriteErrorCode::Timeout.as_str(), "timeout");
        assert_eq!(WriteErrorCode::EmptyBatch.as_str(), "empty_batch");
        assert_eq!(WriteErrorCode::ShuttingDown.as_str(), "shutting_down");
    }

    #[test]
    fn error_code_str_matches_variant_mapping() {
        let err = WriteError::from(std::io::Error::other("disk gone"));
        assert_eq!(err.code(), WriteErrorCode::Io);
        assert_eq!(err.code_str(), "io");
    }
}
