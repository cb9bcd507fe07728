//! Provider client trait and the Gemini / OpenRouter implementations.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use crate::error::{ParseError, TransportError};
use crate::persona::Persona;

use super::parser;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use super::types::{ProviderContract, ProviderId, ProviderOutcome};

/// One external text-generation provider.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn id(&self) -> ProviderId;

    fn contract(&self) -> &ProviderContract;

    /// False when no credential is present. Unconfigured providers are never
    /// called.
    fn is_configured(&self) -> bool;

    /// Run one attempt. Must return within `timeout` (the transport enforces
    /// it; the orchestrator also bounds the whole call).
    async fn generate(&self, prompt: &str, persona: &Persona, timeout: Duration) -> ProviderOutcome;
}

/// Configuration for provider clients.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// API key; `None` or blank means unconfigured
    pub api_key: Option<String>,
    /// Base URL override
    pub base_url: Option<String>,
    /// Model override
    pub model: Option<String>,
    pub temperature: f64,
    pub max_output_tokens: u32,
}

impl ClientConfig {
    pub fn new(api_key: Option<String>) -> Self {
        Self {
            api_key,
            base_url: None,
            model: None,
            temperature: 0.7,
            max_output_tokens: 512,
        }
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature.clamp(0.0, 2.0);
        self
    }

    pub fn with_max_output_tokens(mut self, max_output_tokens: u32) -> Self {
        self.max_output_tokens = max_output_tokens;
        self
    }

    fn credential(&self) -> Option<&str> {
        self.api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
    }
}

/// Map a finished exchange onto an outcome. Parsing is always delegated to
/// the contract parser.
fn outcome_from_exchange(
    provider: ProviderId,
    exchange: Result<HttpResponse, TransportError>,
) -> ProviderOutcome {
    match exchange {
        Err(err) => ProviderOutcome::TransportFailure(err),
        Ok(response) if response.is_success() => parser::parse(provider, &response.body).into(),
        Ok(response) => match parser::parse(provider, &response.body) {
            Err(err @ ParseError::ProviderError { .. }) => ProviderOutcome::ParseFailure(err),
            _ => ProviderOutcome::ProviderRejected(response.status),
        },
    }
}

fn unconfigured(provider: ProviderId) -> ProviderOutcome {
    ProviderOutcome::ParseFailure(ParseError::provider(
        "unconfigured",
        format!("no credential for {}", provider),
    ))
}

/// Google Gemini client (primary).
pub struct GeminiClient {
    config: ClientConfig,
    contract: ProviderContract,
    transport: Arc<dyn HttpTransport>,
}

impl GeminiClient {
    pub fn new(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let contract = ProviderContract::gemini_with(
            config
                .model
                .as_deref()
                .unwrap_or(ProviderContract::GEMINI_MODEL),
            config
                .base_url
                .as_deref()
                .unwrap_or(ProviderContract::GEMINI_BASE_URL),
        );
        Self {
            config,
            contract,
            transport,
        }
    }

    fn request_body(&self, prompt: &str, persona: &Persona) -> serde_json::Value {
        json!({
            "systemInstruction": {
                "parts": [{ "text": persona.system_instruction() }]
            },
            "contents": [{
                "role": "user",
                "parts": [{ "text": prompt }]
            }],
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_output_tokens
            }
        })
    }
}

#[async_trait]
impl ProviderClient for GeminiClient {
    fn id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn contract(&self) -> &ProviderContract {
        &self.contract
    }

    fn is_configured(&self) -> bool {
        self.config.credential().is_some()
    }

    async fn generate(&self, prompt: &str, persona: &Persona, timeout: Duration) -> ProviderOutcome {
        let Some(key) = self.config.credential() else {
            return unconfigured(self.id());
        };

        let request = HttpRequest::post(
            &self.contract.endpoint,
            self.request_body(prompt, persona),
            timeout,
        )
        .with_header("x-goog-api-key", key);

        let exchange = self.transport.post(request).await;
        if let Ok(response) = &exchange {
            debug!(provider = %self.id(), status = response.status, "provider responded");
        }
        outcome_from_exchange(self.id(), exchange)
    }
}

/// OpenRouter client (secondary, OpenAI-compatible chat completions).
pub struct OpenRouterClient {
    config: ClientConfig,
    contract: ProviderContract,
    transport: Arc<dyn HttpTransport>,
}

impl OpenRouterClient {
    const APP_TITLE: &'static str = "Prody";

    pub fn new(config: ClientConfig, transport: Arc<dyn HttpTransport>) -> Self {
        let contract = ProviderContract::openrouter_with(
            config
                .model
                .as_deref()
                .unwrap_or(ProviderContract::OPENROUTER_MODEL),
            config
                .base_url
                .as_deref()
                .unwrap_or(ProviderContract::OPENROUTER_BASE_URL),
        );
        Self {
            config,
            contract,
            transport,
        }
    }

    fn request_body(&self, prompt: &str, persona: &Persona) -> serde_json::Value {
        json!({
            "model": self.contract.model_id,
            "messages": [
                { "role": "system", "content": persona.system_instruction() },
                { "role": "user", "content": prompt }
            ],
            "temperature": self.config.temperature,
            "max_tokens": self.config.max_output_tokens
        })
    }
}

#[async_trait]
impl ProviderClient for OpenRouterClient {
    fn id(&self) -> ProviderId {
        ProviderId::OpenRouter
    }

    fn contract(&self) -> &ProviderContract {
        &self.contract
    }

    fn is_configured(&self) -> bool {
        self.config.credential().is_some()
    }

    async fn generate(&self, prompt: &str, persona: &Persona, timeout: Duration) -> ProviderOutcome {
        let Some(key) = self.config.credential() else {
            return unconfigured(self.id());
        };

        let request = HttpRequest::post(
            &self.contract.endpoint,
            self.request_body(prompt, persona),
            timeout,
        )
        .with_header("Authorization", format!("Bearer {}", key))
        .with_header("X-Title", Self::APP_TITLE);

        let exchange = self.transport.post(request).await;
        if let Ok(response) = &exchange {
            debug!(provider = %self.id(), status = response.status, "provider responded");
        }
        outcome_from_exchange(self.id(), exchange)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::ScriptedTransport;
    use crate::persona::PersonaTable;
    use pretty_assertions::assert_eq;

    const GEMINI_SUCCESS: &str = include_str!("../../fixtures/gemini/v1beta-2025-01/success.json");
    const GEMINI_AUTH: &str = include_str!("../../fixtures/gemini/v1beta-2025-01/auth_failure.json");
    const OPENROUTER_SUCCESS: &str =
        include_str!("../../fixtures/openrouter/v1-2025-01/success.json");

    fn persona() -> Persona {
        PersonaTable::bundled().unwrap().get("gentle_guide").clone()
    }

    #[test]
    fn test_client_config_builder() {
        let config = ClientConfig::new(Some("test-key".to_string()))
            .with_base_url("https://custom.api.com")
            .with_model("gemini-1.5-flash")
            .with_temperature(5.0)
            .with_max_output_tokens(256);

        assert_eq!(config.base_url, Some("https://custom.api.com".to_string()));
        assert_eq!(config.model, Some("gemini-1.5-flash".to_string()));
        assert_eq!(config.temperature, 2.0);
        assert_eq!(config.max_output_tokens, 256);
    }

    #[test]
    fn test_blank_credential_is_unconfigured() {
        let transport = Arc::new(ScriptedTransport::new());
        let missing = GeminiClient::new(ClientConfig::new(None), transport.clone());
        let blank = OpenRouterClient::new(ClientConfig::new(Some("  ".to_string())), transport.clone());
        let present = GeminiClient::new(ClientConfig::new(Some("k".to_string())), transport);

        assert!(!missing.is_configured());
        assert!(!blank.is_configured());
        assert!(present.is_configured());
    }

    #[tokio::test]
    async fn test_gemini_request_shape_and_success() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(HttpResponse::new(200, GEMINI_SUCCESS));
        let client = GeminiClient::new(ClientConfig::new(Some("g-key".to_string())), transport.clone());

        let outcome = client
            .generate("Explain this quote", &persona(), Duration::from_secs(5))
            .await;
        assert!(outcome.is_success());

        let requests = transport.requests();
        assert_eq!(requests.len(), 1);
        let request = &requests[0];
        assert_eq!(request.url, client.contract().endpoint);
        assert_eq!(request.header("x-goog-api-key"), Some("g-key"));
        assert_eq!(request.timeout, Duration::from_secs(5));
        assert_eq!(
            request.body["contents"][0]["parts"][0]["text"],
            "Explain this quote"
        );
        assert!(request.body["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .starts_with("You are a calm"));
    }

    #[tokio::test]
    async fn test_openrouter_request_shape() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(HttpResponse::new(200, OPENROUTER_SUCCESS));
        let client = OpenRouterClient::new(
            ClientConfig::new(Some("or-key".to_string())).with_model("some/model"),
            transport.clone(),
        );

        let outcome = client.generate("hi", &persona(), Duration::from_secs(5)).await;
        assert_eq!(
            outcome,
            ProviderOutcome::Success("Notice what lifted you today, and write it down.".to_string())
        );

        let requests = transport.requests();
        let request = &requests[0];
        assert_eq!(request.header("authorization"), Some("Bearer or-key"));
        assert_eq!(request.body["model"], "some/model");
        assert_eq!(request.body["messages"][0]["role"], "system");
        assert_eq!(request.body["messages"][1]["content"], "hi");
    }

    #[tokio::test]
    async fn test_error_envelope_on_non_success_status() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(HttpResponse::new(400, GEMINI_AUTH));
        let client = GeminiClient::new(ClientConfig::new(Some("bad".to_string())), transport);

        let outcome = client.generate("x", &persona(), Duration::from_secs(1)).await;
        assert!(matches!(
            outcome,
            ProviderOutcome::ParseFailure(ParseError::ProviderError { ref code, .. }) if code == "400"
        ));
    }

    #[tokio::test]
    async fn test_non_success_without_envelope_is_rejected() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(HttpResponse::new(503, "<html>unavailable</html>"));
        let client = OpenRouterClient::new(ClientConfig::new(Some("k".to_string())), transport);

        let outcome = client.generate("x", &persona(), Duration::from_secs(1)).await;
        assert_eq!(outcome, ProviderOutcome::ProviderRejected(503));
    }

    #[tokio::test]
    async fn test_transport_failure_passes_through() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_failure(TransportError::Unreachable("no route".to_string()));
        let client = GeminiClient::new(ClientConfig::new(Some("k".to_string())), transport);

        let outcome = client.generate("x", &persona(), Duration::from_secs(1)).await;
        assert_eq!(
            outcome,
            ProviderOutcome::TransportFailure(TransportError::Unreachable("no route".to_string()))
        );
    }

    #[tokio::test]
    async fn test_unconfigured_client_makes_no_request() {
        let transport = Arc::new(ScriptedTransport::new());
        let client = GeminiClient::new(ClientConfig::new(None), transport.clone());

        let outcome = client.generate("x", &persona(), Duration::from_secs(1)).await;
        assert!(matches!(outcome, ProviderOutcome::ParseFailure(_)));
        assert!(transport.requests().is_empty());
    }
}
