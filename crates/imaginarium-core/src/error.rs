//! Error types for the imaginarium client

use thiserror::Error;

/// The main error type for imaginarium operations
#[derive(Debug, Error)]
pub enum ImaginariumError {
    /// The API key was blank. Raised locally before any network call.
    #[error("API key is missing: {0}")]
    MissingApiKey(String),

    /// A remote call (submission, status, catalog or download) failed.
    #[error("Service error: {0}")]
    ServiceError(String),

    /// Downloaded bytes could not be decoded as an image.
    #[error("Decode error: {0}")]
    DecodeError(String),

    /// Writing an asset or its sidecar failed.
    #[error("Persistence error: {0}")]
    PersistenceError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    TomlParseError(String),

    #[error("TOML serialization error: {0}")]
    TomlSerError(String),
}

/// Result type alias for imaginarium operations
pub type Result<T> = std::result::Result<T, ImaginariumError>;

impl From<toml::de::Error> for ImaginariumError {
    fn from(err: toml::de::Error) -> Self {
        ImaginariumError::TomlParseError(err.to_string())
    }
}

impl From<toml::ser::Error> for ImaginariumError {
    fn from(err: toml::ser::Error) -> Self {
        ImaginariumError::TomlSerError(err.to_string())
    }
}
