//! Contract parsers turning a provider's raw response body into text.
//!
//! Parsing never panics: every deviation from the pinned contract becomes a
//! [`ParseError`]. Upstream error envelopes (bad key, exhausted quota, safety
//! blocks) are reported as [`ParseError::ProviderError`] rather than being
//! folded into a generic malformed-body failure.

use serde::Deserialize;
use serde_json::Value;

use crate::error::{ParseError, TransportError};

use super::transport::HttpResponse;
use super::types::ProviderId;

/// Parse a raw response body against the provider's contract.
pub fn parse(provider: ProviderId, raw_body: &str) -> Result<String, ParseError> {
    let value: Value =
        serde_json::from_str(raw_body).map_err(|e| ParseError::Malformed(e.to_string()))?;

    if let Some(err) = error_envelope(&value) {
        return Err(err);
    }

    match provider {
        ProviderId::Gemini => parse_gemini(value),
        ProviderId::OpenRouter => parse_openrouter(value),
    }
}

/// Parse a full exchange, lifting a transport failure into the parse taxonomy.
pub fn parse_exchange(
    provider: ProviderId,
    exchange: Result<&HttpResponse, &TransportError>,
) -> Result<String, ParseError> {
    match exchange {
        Ok(response) => parse(provider, &response.body),
        Err(err) => Err(ParseError::TransportError(err.to_string())),
    }
}

/// Error envelope shared by both providers: `{"error": {"code", "message", "status"}}`.
#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    code: Option<Value>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

fn error_envelope(value: &Value) -> Option<ParseError> {
    if !value.get("error").is_some_and(Value::is_object) {
        return None;
    }
    let envelope: ErrorEnvelope = match serde_json::from_value(value.clone()) {
        Ok(envelope) => envelope,
        Err(e) => return Some(ParseError::Malformed(e.to_string())),
    };

    let code = match envelope.error.code {
        Some(Value::String(s)) => s,
        Some(Value::Number(n)) => n.to_string(),
        _ => envelope
            .error
            .status
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
    };
    let message = envelope
        .error
        .message
        .or(envelope.error.status)
        .unwrap_or_default();

    Some(ParseError::ProviderError { code, message })
}

// Gemini generateContent contract
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    prompt_feedback: Option<GeminiPromptFeedback>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiCandidate {
    content: Option<GeminiContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeminiContent {
    #[serde(default)]
    parts: Vec<GeminiPart>,
}

#[derive(Debug, Deserialize)]
struct GeminiPart {
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiPromptFeedback {
    block_reason: Option<String>,
}

fn parse_gemini(value: Value) -> Result<String, ParseError> {
    let response: GeminiResponse =
        serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let blocked = response
        .prompt_feedback
        .and_then(|feedback| feedback.block_reason);

    let candidates = match response.candidates {
        Some(candidates) => candidates,
        None => {
            return Err(match blocked {
                Some(reason) => ParseError::provider("blocked", reason),
                None => ParseError::missing("candidates"),
            })
        }
    };

    let Some(candidate) = candidates.into_iter().next() else {
        return Err(match blocked {
            Some(reason) => ParseError::provider("blocked", reason),
            None => ParseError::missing("candidates[0]"),
        });
    };

    let Some(content) = candidate.content else {
        return Err(match candidate.finish_reason.as_deref() {
            Some(reason @ ("SAFETY" | "RECITATION" | "BLOCKLIST")) => {
                ParseError::provider("blocked", reason)
            }
            _ => ParseError::missing("candidates[0].content"),
        });
    };

    if content.parts.is_empty() {
        return Err(ParseError::missing("candidates[0].content.parts"));
    }

    let text = content
        .parts
        .into_iter()
        .filter_map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");

    non_blank(text, "candidates[0].content.parts[].text")
}

// OpenRouter chat completions contract (OpenAI-compatible)
#[derive(Debug, Deserialize)]
struct OpenRouterResponse {
    choices: Option<Vec<OpenRouterChoice>>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterChoice {
    message: Option<OpenRouterMessage>,
}

#[derive(Debug, Deserialize)]
struct OpenRouterMessage {
    content: Option<String>,
}

fn parse_openrouter(value: Value) -> Result<String, ParseError> {
    let response: OpenRouterResponse =
        serde_json::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;

    let choices = response.choices.ok_or_else(|| ParseError::missing("choices"))?;
    let choice = choices
        .into_iter()
        .next()
        .ok_or_else(|| ParseError::missing("choices[0]"))?;
    let message = choice
        .message
        .ok_or_else(|| ParseError::missing("choices[0].message"))?;
    let content = message
        .content
        .ok_or_else(|| ParseError::missing("choices[0].message.content"))?;

    non_blank(content, "choices[0].message.content")
}

fn non_blank(text: String, field_path: &str) -> Result<String, ParseError> {
    if text.trim().is_empty() {
        Err(ParseError::missing(field_path))
    } else {
        Ok(text)
    }
}
