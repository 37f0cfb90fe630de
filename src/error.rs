//! use pkiaas::error::PkiError;

use thiserror::Error;

/// Result type used throughout the crate.
pub type Result<T> = std::result::Result<T, PkiError>;

/// Represents errors that can occur while issuing, storing or revoking certificates.
///
/// Backend failures are split into [`PkiError::BackendUnavailable`] (the store could
/// not be reached) and [`PkiError::BackendQueryFailed`] (the store answered with an
/// error). Neither is retried by this crate.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PkiError {
    /// A resource identifier did not have the `account:kind:id` shape.
    #[error("Malformed resource identifier '{0}'")]
    MalformedIdentifier(String),

    /// The resource carries no annotation with the requested name.
    #[error("Failed to find annotation '{key}' on resource '{resource}'")]
    AnnotationNotFound { resource: String, key: String },

    /// The addressed resource does not exist in the backend.
    #[error("Resource '{0}' not found")]
    ResourceNotFound(String),

    /// The backend could not be reached.
    #[error("Backend unavailable: {0}")]
    BackendUnavailable(String),

    /// The backend was reached but rejected or failed the request.
    #[error("Backend query failed: {0}")]
    BackendQueryFailed(String),

    /// The backend endpoint did not present the expected certificate chain.
    #[error("Invalid endpoint '{endpoint}': {reason}")]
    InvalidEndpoint { endpoint: String, reason: String },

    /// A certificate is marked revoked but its revocation facts are missing or unparsable.
    #[error("Revocation data of certificate '{serial}' is corrupt: {reason}")]
    RevocationDataCorrupt { serial: String, reason: String },

    /// An expiration annotation could not be decoded.
    #[error("Expiration data is corrupt: {0}")]
    ExpirationDataCorrupt(String),

    /// Error due to invalid input.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Error during data encoding.
    #[error("Failed to encode data: {0}")]
    EncodingError(String),

    /// Error during data decoding.
    #[error("Failed to decode data: {0}")]
    DecodingError(String),

    /// Error during key generation.
    #[error("Key generation error: {0}")]
    KeyGenerationError(String),

    /// Error related to certificate operations.
    #[error("Certificate error: {0}")]
    CertificateError(String),

    /// Configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<der::Error> for PkiError {
    /// Converts a `der::Error` into a `PkiError`.
    fn from(err: der::Error) -> Self {
        PkiError::DecodingError(err.to_string())
    }
}

impl From<rsa::Error> for PkiError {
    fn from(err: rsa::Error) -> Self {
        PkiError::KeyGenerationError(err.to_string())
    }
}

impl From<pkcs8::Error> for PkiError {
    fn from(err: pkcs8::Error) -> Self {
        PkiError::DecodingError(err.to_string())
    }
}

impl From<serde_json::Error> for PkiError {
    fn from(err: serde_json::Error) -> Self {
        PkiError::DecodingError(err.to_string())
    }
}

impl From<reqwest::Error> for PkiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_connect() || err.is_timeout() {
            PkiError::BackendUnavailable(err.to_string())
        } else {
            PkiError::BackendQueryFailed(err.to_string())
        }
    }
}

impl From<config::ConfigError> for PkiError {
    fn from(err: config::ConfigError) -> Self {
        PkiError::Config(err.to_string())
    }
}
