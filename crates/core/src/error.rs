//! Error types for oc-core
//!
//! Provides a unified error type that can be converted to appropriate exit codes.

use thiserror::Error;

/// Result type alias for oc-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for osscmd operations
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file or credential error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid `oss://bucket/key` path
    #[error("Invalid path: {0}")]
    InvalidPath(String),

    /// Invalid positional argument or option value
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Transport-level failure: DNS, connect, reset, body read
    #[error("Connection error: {0}")]
    Connection(String),

    /// The service rejected the request signature or credentials
    #[error("Unauthorized ({code}): {body}")]
    Unauthorized { code: u16, body: String },

    /// Non-2xx response the caller did not expect
    #[error("Unexpected status {code}: {body}")]
    Status { code: u16, body: String },

    /// Object or bucket does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// Multipart upload could not be initiated
    #[error("Multipart initiation failed: {0}")]
    Init(String),

    /// Multipart completion was rejected
    #[error("Multipart completion failed with status {code}: {body}")]
    Completion { code: u16, body: String },

    /// Malformed XML response body
    #[error("Parse error: {0}")]
    Parse(String),

    /// Local file open/read/write/stat failure
    #[error("Local IO error: {0}")]
    LocalIo(#[from] std::io::Error),

    /// A work item exhausted its retry budget
    #[error("{item} failed after {attempts} attempt(s): {source}")]
    ItemFailed {
        item: String,
        attempts: u32,
        #[source]
        source: Box<Error>,
    },

    /// TOML parsing error
    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    /// TOML serialization error
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    /// General error
    #[error("{0}")]
    General(String),
}

impl Error {
    /// Classify a non-success HTTP response.
    pub fn from_status(code: u16, body: impl Into<String>) -> Self {
        let body = body.into();
        match code {
            401 | 403 => Error::Unauthorized { code, body },
            404 => Error::NotFound(body),
            _ => Error::Status { code, body },
        }
    }

    /// Whether this error came from the network rather than from the service's answer
    pub fn is_connection(&self) -> bool {
        match self {
            Error::Connection(_) => true,
            Error::ItemFailed { source, .. } => source.is_connection(),
            _ => false,
        }
    }

    /// Get the appropriate exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::InvalidPath(_) | Error::InvalidArgument(_) | Error::Config(_) => 2,
            Error::Connection(_) => 3,
            Error::Unauthorized { .. } => 4,
            Error::NotFound(_) => 5,
            Error::ItemFailed { source, .. } => source.exit_code(),
            _ => 1,
        }
    }
}
