//! Error types for the Confide gateway

use thiserror::Error;

use crate::services::ServiceError;

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// A dynamic setting was given a value outside its allowed range
    #[error("invalid setting: {0}")]
    InvalidSetting(String),

    /// The user already has an active block record
    #[error("user {0} is already blocked")]
    AlreadyBlocked(i64),

    /// Block list persistence error
    #[error("block store error: {0}")]
    Store(String),

    /// Classified failure of an external AI service
    #[error(transparent)]
    Service(#[from] ServiceError),

    /// Audio decoding or encoding error
    #[error("audio error: {0}")]
    Audio(String),

    /// Message transport error
    #[error("channel error: {0}")]
    Channel(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),

    /// CSV error
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
}
