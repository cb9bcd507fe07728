//! Error types for prody-ai.

use std::time::Duration;

use thiserror::Error;

use crate::llm::ProviderId;

/// Result type alias using prody-ai's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur inside the AI layer.
///
/// None of these ever reach the app through the repository façade: they are
/// absorbed and turned into static content there.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider response could not be turned into text
    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    /// Network-level failure talking to a provider
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Provider budget exhausted for the current window
    #[error("Rate limited: {provider}")]
    RateLimited { provider: ProviderId },

    /// Every provider in the chain was skipped or failed
    #[error("All providers exhausted")]
    AllProvidersExhausted,

    /// Cache snapshot could not be read or written
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a persistence error.
    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence(message.into())
    }

    /// Create a rate limited error.
    pub fn rate_limited(provider: ProviderId) -> Self {
        Self::RateLimited { provider }
    }
}

/// Failure to extract text from a provider's wire response.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    /// Body is not the JSON structure the contract pins.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// A required field is absent or empty.
    #[error("missing field: {0}")]
    MissingField(String),

    /// Upstream error envelope (auth, quota, safety block).
    #[error("provider error {code}: {message}")]
    ProviderError { code: String, message: String },

    /// The exchange never produced a body.
    #[error("transport error: {0}")]
    TransportError(String),
}

impl ParseError {
    pub fn missing(field_path: impl Into<String>) -> Self {
        Self::MissingField(field_path.into())
    }

    pub fn provider(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::ProviderError {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Network-level failures. All of these are transient.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the per-attempt timeout
    #[error("timed out after {}ms", .0.as_millis())]
    Timeout(Duration),

    /// DNS failure, refused connection, no route
    #[error("unreachable: {0}")]
    Unreachable(String),

    /// Connection dropped mid-exchange
    #[error("interrupted: {0}")]
    Interrupted(String),
}

/// Failure to split multi-section AI output into feature fields.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SectionError {
    #[error("missing section: {0}")]
    MissingSection(&'static str),

    #[error("empty section: {0}")]
    EmptySection(&'static str),

    #[error("empty response")]
    Empty,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::rate_limited(ProviderId::Gemini);
        assert_eq!(err.to_string(), "Rate limited: gemini");

        let err: Error = ParseError::missing("candidates[0]").into();
        assert_eq!(err.to_string(), "Parse error: missing field: candidates[0]");

        let err: Error = TransportError::Timeout(Duration::from_millis(1500)).into();
        assert_eq!(err.to_string(), "Transport error: timed out after 1500ms");
    }

    #[test]
    fn test_provider_error_constructor() {
        let err = ParseError::provider("401", "API key not valid");
        assert_eq!(
            err,
            ParseError::ProviderError {
                code: "401".to_string(),
                message: "API key not valid".to_string(),
            }
        );
    }
}
