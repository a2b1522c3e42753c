//! Error types for Dirauth

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Schema mismatch: builder is locked to {expected}, got {actual}")]
    SchemaMismatch { expected: String, actual: String },

    // Connection Errors
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("No directory server available")]
    NoServerAvailable,

    #[error("Operation timed out: {0}")]
    Timeout(String),

    // Identity Errors
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Group not found: {0}")]
    GroupNotFound(String),

    // Mapping Errors
    #[error(transparent)]
    Conversion(#[from] ConversionError),

    #[error("Entry {entry} is missing required attribute {attribute}")]
    MissingRequiredAttribute { entry: String, attribute: String },

    // Directory Errors
    #[error("Directory operation failed: {0}")]
    Directory(String),

    #[error("Directory session has been closed")]
    Disposed,

    #[error("Operation was cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    pub fn code(&self) -> &'static str {
        match self {
            Error::Configuration(_) => "ConfigurationError",
            Error::SchemaMismatch { .. } => "SchemaMismatch",
            Error::Connection(_) => "ConnectionError",
            Error::NoServerAvailable => "NoServerAvailable",
            Error::Timeout(_) => "Timeout",
            Error::AuthenticationFailed(_) => "AuthenticationFailed",
            Error::UserNotFound(_) => "UserNotFound",
            Error::GroupNotFound(_) => "GroupNotFound",
            Error::Conversion(e) => e.code(),
            Error::MissingRequiredAttribute { .. } => "MissingRequiredAttribute",
            Error::Directory(_) => "DirectoryError",
            Error::Disposed => "ObjectDisposed",
            Error::Cancelled => "Cancelled",
            Error::Io(_) => "InternalError",
            Error::Other(_) => "InternalError",
        }
    }

    /// Whether trying another server could help.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Connection(_) | Error::Timeout(_) | Error::Io(_)
        )
    }
}

/// Failure converting a single directory attribute value
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConversionError {
    #[error("Invalid security identifier: {0}")]
    InvalidSid(String),

    #[error("Cannot convert {value:?} to {target}")]
    InconvertibleNumber { value: String, target: String },

    #[error("Converter {converter} cannot produce {target}")]
    InvalidTargetType { converter: String, target: String },

    #[error("Target type {0} has no parse support")]
    MissingParseSupport(String),
}

impl ConversionError {
    pub fn code(&self) -> &'static str {
        match self {
            ConversionError::InvalidSid(_) => "InvalidSid",
            ConversionError::InconvertibleNumber { .. } => "InconvertibleNumber",
            ConversionError::InvalidTargetType { .. } => "InvalidTargetType",
            ConversionError::MissingParseSupport(_) => "MissingParseSupport",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(Error::NoServerAvailable.code(), "NoServerAvailable");
        assert_eq!(
            Error::from(ConversionError::InvalidSid("short".into())).code(),
            "InvalidSid"
        );
        assert_eq!(Error::Disposed.code(), "ObjectDisposed");
    }

    #[test]
    fn test_retryable() {
        assert!(Error::Connection("refused".into()).is_retryable());
        assert!(Error::Timeout("bind".into()).is_retryable());
        assert!(!Error::AuthenticationFailed("bad password".into()).is_retryable());
        assert!(!Error::UserNotFound("jdoe".into()).is_retryable());
    }
}
