//! Shared types for provider requests, outcomes, and contracts.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, ParseError, TransportError};

/// Text-generation provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderId {
    Gemini,
    OpenRouter,
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Gemini => write!(f, "gemini"),
            Self::OpenRouter => write!(f, "openrouter"),
        }
    }
}

/// Pinned request/response contract for one provider.
///
/// Bumping `contract_version` means adding a new fixture directory under
/// `fixtures/<provider>/<version>/` before touching the parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderContract {
    pub provider: ProviderId,
    pub model_id: String,
    pub contract_version: String,
    pub endpoint: String,
}

impl ProviderContract {
    pub const GEMINI_MODEL: &'static str = "gemini-2.0-flash";
    pub const GEMINI_VERSION: &'static str = "v1beta-2025-01";
    pub const GEMINI_BASE_URL: &'static str = "https://generativelanguage.googleapis.com";

    pub const OPENROUTER_MODEL: &'static str = "meta-llama/llama-3.3-70b-instruct:free";
    pub const OPENROUTER_VERSION: &'static str = "v1-2025-01";
    pub const OPENROUTER_BASE_URL: &'static str = "https://openrouter.ai";

    pub fn gemini() -> Self {
        Self::gemini_with(Self::GEMINI_MODEL, Self::GEMINI_BASE_URL)
    }

    pub fn gemini_with(model_id: &str, base_url: &str) -> Self {
        Self {
            provider: ProviderId::Gemini,
            model_id: model_id.to_string(),
            contract_version: Self::GEMINI_VERSION.to_string(),
            endpoint: format!(
                "{}/v1beta/models/{}:generateContent",
                base_url.trim_end_matches('/'),
                model_id
            ),
        }
    }

    pub fn openrouter() -> Self {
        Self::openrouter_with(Self::OPENROUTER_MODEL, Self::OPENROUTER_BASE_URL)
    }

    pub fn openrouter_with(model_id: &str, base_url: &str) -> Self {
        Self {
            provider: ProviderId::OpenRouter,
            model_id: model_id.to_string(),
            contract_version: Self::OPENROUTER_VERSION.to_string(),
            endpoint: format!("{}/api/v1/chat/completions", base_url.trim_end_matches('/')),
        }
    }

    /// Default contract for a provider.
    pub fn for_provider(provider: ProviderId) -> Self {
        match provider {
            ProviderId::Gemini => Self::gemini(),
            ProviderId::OpenRouter => Self::openrouter(),
        }
    }
}

/// Feature the app is asking for. Drives cache keys, TTLs and section markers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureKind {
    Wisdom,
    Explanation,
    Insight,
    Pattern,
    Vocabulary,
    MessageHelper,
}

impl FeatureKind {
    pub const ALL: [FeatureKind; 6] = [
        Self::Wisdom,
        Self::Explanation,
        Self::Insight,
        Self::Pattern,
        Self::Vocabulary,
        Self::MessageHelper,
    ];

    /// TTL for AI-generated content of this kind.
    pub fn ai_ttl(&self) -> Duration {
        const HOUR: u64 = 60 * 60;
        const DAY: u64 = 24 * HOUR;
        Duration::from_secs(match self {
            Self::Wisdom => DAY,
            Self::Explanation => 7 * DAY,
            Self::Insight => 30 * DAY,
            Self::Pattern => 7 * DAY,
            Self::Vocabulary => 30 * DAY,
            Self::MessageHelper => 6 * HOUR,
        })
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Wisdom => "wisdom",
            Self::Explanation => "explanation",
            Self::Insight => "insight",
            Self::Pattern => "pattern",
            Self::Vocabulary => "vocabulary",
            Self::MessageHelper => "message_helper",
        }
    }
}

impl std::fmt::Display for FeatureKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a piece of content came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentOrigin {
    Ai,
    Static,
}

impl ContentOrigin {
    pub fn is_ai(&self) -> bool {
        matches!(self, Self::Ai)
    }
}

/// A single generation request. Not persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AiRequest {
    pub prompt: String,
    pub persona: String,
    pub feature: FeatureKind,
    /// Overrides the configured retry count for transient failures.
    pub max_retries: Option<u32>,
}

impl AiRequest {
    pub fn new(feature: FeatureKind, persona: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            persona: persona.into(),
            feature,
            max_retries: None,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Result of one attempt against one provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderOutcome {
    Success(String),
    ParseFailure(ParseError),
    TransportFailure(TransportError),
    ProviderRejected(u16),
}

impl ProviderOutcome {
    /// Transient outcomes are retried against the same provider.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransportFailure(_))
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    /// The generated text, or the failure as an [`Error`].
    pub fn into_text(self) -> Result<String, Error> {
        match self {
            Self::Success(text) => Ok(text),
            Self::ParseFailure(err) => Err(Error::Parse(err)),
            Self::TransportFailure(err) => Err(Error::Transport(err)),
            Self::ProviderRejected(status) => Err(Error::Parse(ParseError::provider(
                status.to_string(),
                "request rejected",
            ))),
        }
    }

    /// Short label for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Success(_) => "success",
            Self::ParseFailure(_) => "parse_failure",
            Self::TransportFailure(_) => "transport_failure",
            Self::ProviderRejected(_) => "provider_rejected",
        }
    }
}

impl From<Result<String, ParseError>> for ProviderOutcome {
    fn from(result: Result<String, ParseError>) -> Self {
        match result {
            Ok(text) => Self::Success(text),
            Err(ParseError::TransportError(cause)) => {
                Self::TransportFailure(TransportError::Interrupted(cause))
            }
            Err(err) => Self::ParseFailure(err),
        }
    }
}
