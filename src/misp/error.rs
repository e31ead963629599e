use thiserror::Error;

use super::models::AttributeResponse;

#[derive(Error, Debug)]
pub enum MispApiError {
    #[error("Failed to create HTTP client: {0}")]
    HttpClientCreationError(reqwest::Error),

    #[error("HTTP request error: {0}")]
    RequestError(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    AuthenticationError(String),

    #[error("JSON parsing error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("MISP API error (status {status}): {body}")]
    ApiError { status: u16, body: String },

    #[error("Event with ID '{0}' not found")]
    EventNotFound(String),

    /// MISP refused the attributes as duplicates. The decoded reply, raw bytes
    /// included, is kept for inspection.
    #[error("Attribute already exists")]
    AttributeAlreadyExists(Box<AttributeResponse>),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}
