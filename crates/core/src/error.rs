use std::io;
use std::time::Duration;

use crate::diagnostics::Diagnostics;
use crate::registry::RegistryError;

/// Errors that can occur while resolving or running queries
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Located configuration or validation problems
    #[error("{0}")]
    Diagnostics(Diagnostics),

    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// The backend call failed or reported a terminal failure
    #[error("Backend error: {0}")]
    Backend(anyhow::Error),

    #[error("{operation} timed out after {elapsed:?}")]
    Timeout { operation: String, elapsed: Duration },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Query `{0}` is not found")]
    QueryNotFound(String),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Coarse error classes used to decide how a failure propagates
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Configuration,
    Validation,
    Backend,
    Timeout,
    Cancellation,
}

impl Error {
    pub fn backend(message: impl std::fmt::Display) -> Self {
        Error::Backend(anyhow::anyhow!("{message}"))
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Diagnostics(_) => ErrorKind::Validation,
            Error::Registry(_) | Error::QueryNotFound(_) => ErrorKind::Configuration,
            Error::Backend(_) | Error::IoError(_) | Error::SerializationError(_) => {
                ErrorKind::Backend
            }
            Error::Timeout { .. } => ErrorKind::Timeout,
            Error::Cancelled => ErrorKind::Cancellation,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

impl From<Diagnostics> for Error {
    fn from(diags: Diagnostics) -> Self {
        Error::Diagnostics(diags)
    }
}

/// Result type alias for query-runner operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::Diagnostic;

    #[test]
    fn test_error_kind_mapping() {
        let diags: Diagnostics = vec![Diagnostic::error("Invalid sql", "sql is empty")].into();
        assert_eq!(Error::from(diags).kind(), ErrorKind::Validation);
        assert_eq!(Error::backend("boom").kind(), ErrorKind::Backend);
        assert_eq!(Error::Cancelled.kind(), ErrorKind::Cancellation);
        assert_eq!(
            Error::Timeout {
                operation: "redshift query".into(),
                elapsed: Duration::from_secs(1)
            }
            .kind(),
            ErrorKind::Timeout
        );
        assert_eq!(
            Error::QueryNotFound("missing".into()).kind(),
            ErrorKind::Configuration
        );
    }

    #[test]
    fn test_backend_error_keeps_message() {
        let err = Error::backend("query failed: relation does not exist");
        assert_eq!(
            err.to_string(),
            "Backend error: query failed: relation does not exist"
        );
    }
}
