//! Configuration for the AI layer.
//!
//! Loaded from environment variables ([`AiConfig::from_env`]) or a JSON file
//! ([`AiConfig::from_file`]). A provider with no API key is left
//! unconfigured; that is a routing decision, not an error.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::llm::{
    BackoffPolicy, CacheConfig, ClientConfig, Clock, GeminiClient, HttpTransport,
    OpenRouterClient, ProviderClient, ProviderContract, ProviderId, ProviderLimits, RateLimiter,
};

/// Upper bound on `max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 10;

/// Upper bound on `request_timeout_ms` and `deadline_ms`.
pub const MAX_TIMEOUT_MS: u64 = 120_000;

/// Settings for one provider, in priority order within [`AiConfig::providers`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub id: ProviderId,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub hourly_limit: Option<u32>,
    #[serde(default)]
    pub daily_limit: Option<u32>,
}

impl ProviderSettings {
    /// Gemini with free-tier budgets.
    pub fn gemini(api_key: Option<String>) -> Self {
        Self {
            id: ProviderId::Gemini,
            api_key,
            model: None,
            base_url: None,
            hourly_limit: Some(60),
            daily_limit: Some(1_500),
        }
    }

    /// OpenRouter with free-model budgets.
    pub fn openrouter(api_key: Option<String>) -> Self {
        Self {
            id: ProviderId::OpenRouter,
            api_key,
            model: None,
            base_url: None,
            hourly_limit: Some(20),
            daily_limit: Some(50),
        }
    }

    pub fn limits(&self) -> ProviderLimits {
        ProviderLimits {
            hourly: self.hourly_limit,
            daily: self.daily_limit,
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.api_key.clone());
        if let Some(model) = &self.model {
            config = config.with_model(model);
        }
        if let Some(url) = &self.base_url {
            config = config.with_base_url(url);
        }
        config
    }

    /// Build the client for this provider.
    pub fn build_client(&self, transport: Arc<dyn HttpTransport>) -> Arc<dyn ProviderClient> {
        match self.id {
            ProviderId::Gemini => Arc::new(GeminiClient::new(self.client_config(), transport)),
            ProviderId::OpenRouter => {
                Arc::new(OpenRouterClient::new(self.client_config(), transport))
            }
        }
    }

    pub fn contract(&self) -> ProviderContract {
        ProviderContract::for_provider(self.id)
    }
}

/// Backoff between same-provider retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackoffSettings {
    pub base_ms: u64,
    pub max_ms: u64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            base_ms: 250,
            max_ms: 2_000,
        }
    }
}

impl BackoffSettings {
    pub fn policy(&self) -> BackoffPolicy {
        BackoffPolicy::new(
            Duration::from_millis(self.base_ms),
            Duration::from_millis(self.max_ms),
        )
    }
}

/// Response cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Snapshot location; `None` keeps the cache in memory only.
    pub path: Option<PathBuf>,
    pub max_entries: usize,
    pub flush_debounce_ms: u64,
    /// TTL for static fallback content.
    pub static_ttl_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            path: None,
            max_entries: crate::llm::DEFAULT_MAX_ENTRIES,
            flush_debounce_ms: 2_000,
            static_ttl_secs: 30 * 60,
        }
    }
}

impl CacheSettings {
    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.max_entries,
            flush_debounce: Duration::from_millis(self.flush_debounce_ms),
        }
    }

    pub fn static_ttl(&self) -> Duration {
        Duration::from_secs(self.static_ttl_secs)
    }
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AiConfig {
    /// User-controlled AI toggle. When false every feature serves static content.
    pub enabled: bool,
    /// Providers in priority order.
    pub providers: Vec<ProviderSettings>,
    /// Bound on a single provider attempt.
    pub request_timeout_ms: u64,
    /// Bound on one whole generation, across providers and retries.
    pub deadline_ms: u64,
    /// Extra attempts after the first on transient failures.
    pub max_retries: u32,
    pub backoff: BackoffSettings,
    pub cache: CacheSettings,
}

impl Default for AiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            providers: vec![ProviderSettings::gemini(None), ProviderSettings::openrouter(None)],
            request_timeout_ms: 15_000,
            deadline_ms: 45_000,
            max_retries: 2,
            backoff: BackoffSettings::default(),
            cache: CacheSettings::default(),
        }
    }
}

impl AiConfig {
    /// Create configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let key = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        Self {
            enabled: lookup("PRODY_AI_ENABLED")
                .map(|s| s != "0" && s.to_lowercase() != "false")
                .unwrap_or(defaults.enabled),
            providers: vec![
                ProviderSettings::gemini(key("GEMINI_API_KEY")),
                ProviderSettings::openrouter(key("OPENROUTER_API_KEY")),
            ],
            request_timeout_ms: lookup("PRODY_AI_TIMEOUT_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.request_timeout_ms),
            deadline_ms: lookup("PRODY_AI_DEADLINE_MS")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.deadline_ms),
            max_retries: lookup("PRODY_AI_MAX_RETRIES")
                .and_then(|s| s.parse().ok())
                .unwrap_or(defaults.max_retries),
            backoff: defaults.backoff,
            cache: CacheSettings {
                path: lookup("PRODY_AI_CACHE_PATH").map(PathBuf::from),
                ..defaults.cache
            },
        }
    }

    /// Load from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 || self.request_timeout_ms > MAX_TIMEOUT_MS {
            return Err(Error::config(format!(
                "request_timeout_ms must be between 1 and {MAX_TIMEOUT_MS}"
            )));
        }
        if self.deadline_ms < self.request_timeout_ms || self.deadline_ms > MAX_TIMEOUT_MS {
            return Err(Error::config(format!(
                "deadline_ms must be between request_timeout_ms and {MAX_TIMEOUT_MS}"
            )));
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(Error::config(format!(
                "max_retries must be at most {MAX_RETRIES_LIMIT}"
            )));
        }
        if self.providers.is_empty() {
            return Err(Error::config("at least one provider is required"));
        }
        for (i, provider) in self.providers.iter().enumerate() {
            if self.providers[..i].iter().any(|p| p.id == provider.id) {
                return Err(Error::config(format!("provider {} listed twice", provider.id)));
            }
        }
        if self.backoff.max_ms < self.backoff.base_ms {
            return Err(Error::config("backoff.max_ms must be at least backoff.base_ms"));
        }
        if self.cache.max_entries == 0 {
            return Err(Error::config("cache.max_entries must be greater than zero"));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn deadline(&self) -> Duration {
        Duration::from_millis(self.deadline_ms)
    }

    /// Clients for every provider, in priority order.
    pub fn build_clients(&self, transport: Arc<dyn HttpTransport>) -> Vec<Arc<dyn ProviderClient>> {
        self.providers
            .iter()
            .map(|p| p.build_client(transport.clone()))
            .collect()
    }

    /// Rate limiter carrying each provider's budget.
    pub fn build_rate_limiter(&self, clock: Arc<dyn Clock>) -> RateLimiter {
        self.providers
            .iter()
            .fold(RateLimiter::new(clock), |limiter, p| {
                limiter.with_limits(p.id, p.limits())
            })
    }

    /// Whether any provider has a credential.
    pub fn has_credentials(&self) -> bool {
        self.providers.iter().any(|p| {
            p.api_key
                .as_deref()
                .is_some_and(|k| !k.trim().is_empty())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{ScriptedTransport, SystemClock};
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = AiConfig::default();
        assert!(config.enabled);
        assert_eq!(config.max_retries, 2);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.cache.static_ttl(), Duration::from_secs(1800));
        assert_eq!(
            config.providers.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![ProviderId::Gemini, ProviderId::OpenRouter]
        );
        assert!(!config.has_credentials());
        config.validate().unwrap();
    }

    #[test]
    fn test_from_lookup() {
        let config = AiConfig::from_lookup(env(&[
            ("PRODY_AI_ENABLED", "false"),
            ("GEMINI_API_KEY", "g-123"),
            ("OPENROUTER_API_KEY", "   "),
            ("PRODY_AI_TIMEOUT_MS", "8000"),
            ("PRODY_AI_MAX_RETRIES", "4"),
            ("PRODY_AI_DEADLINE_MS", "30000"),
            ("PRODY_AI_CACHE_PATH", "/tmp/prody/cache.json"),
        ]));

        assert!(!config.enabled);
        assert_eq!(config.providers[0].api_key.as_deref(), Some("g-123"));
        assert_eq!(config.providers[1].api_key, None);
        assert_eq!(config.request_timeout(), Duration::from_secs(8));
        assert_eq!(config.max_retries, 4);
        assert_eq!(config.deadline(), Duration::from_secs(30));
        assert_eq!(
            config.cache.path,
            Some(PathBuf::from("/tmp/prody/cache.json"))
        );
    }

    #[test]
    fn test_unparseable_env_values_fall_back_to_defaults() {
        let config = AiConfig::from_lookup(env(&[
            ("PRODY_AI_TIMEOUT_MS", "soon"),
            ("PRODY_AI_MAX_RETRIES", "-1"),
        ]));
        assert!(config.enabled);
        assert_eq!(config.request_timeout_ms, 15_000);
        assert_eq!(config.max_retries, 2);
    }

    #[test]
    fn test_from_file_with_partial_fields() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("ai.json");
        std::fs::write(
            &path,
            r#"{
                "max_retries": 1,
                "providers": [
                    {"id": "open_router", "api_key": "k", "hourly_limit": 5}
                ],
                "cache": {"static_ttl_secs": 60}
            }"#,
        )
        .unwrap();

        let config = AiConfig::from_file(&path).unwrap();
        assert_eq!(config.max_retries, 1);
        assert_eq!(config.providers.len(), 1);
        assert_eq!(config.providers[0].id, ProviderId::OpenRouter);
        assert_eq!(config.providers[0].daily_limit, None);
        assert_eq!(config.cache.static_ttl_secs, 60);
        assert_eq!(config.cache.max_entries, 500);
        assert_eq!(config.request_timeout_ms, 15_000);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_timeout = AiConfig {
            request_timeout_ms: 0,
            ..AiConfig::default()
        };
        assert!(matches!(zero_timeout.validate(), Err(Error::Config(_))));

        let no_providers = AiConfig {
            providers: Vec::new(),
            ..AiConfig::default()
        };
        assert!(matches!(no_providers.validate(), Err(Error::Config(_))));

        let duplicate = AiConfig {
            providers: vec![ProviderSettings::gemini(None), ProviderSettings::gemini(None)],
            ..AiConfig::default()
        };
        assert!(matches!(duplicate.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_caps_retries_and_timeouts() {
        let runaway = AiConfig::from_lookup(env(&[("PRODY_AI_MAX_RETRIES", "4000000000")]));
        assert_eq!(runaway.max_retries, 4_000_000_000);
        assert!(matches!(runaway.validate(), Err(Error::Config(_))));

        let slow = AiConfig {
            request_timeout_ms: MAX_TIMEOUT_MS + 1,
            deadline_ms: MAX_TIMEOUT_MS + 1,
            ..AiConfig::default()
        };
        assert!(matches!(slow.validate(), Err(Error::Config(_))));

        let deadline_below_attempt = AiConfig {
            request_timeout_ms: 20_000,
            deadline_ms: 10_000,
            ..AiConfig::default()
        };
        assert!(matches!(deadline_below_attempt.validate(), Err(Error::Config(_))));

        let at_limits = AiConfig {
            max_retries: MAX_RETRIES_LIMIT,
            request_timeout_ms: MAX_TIMEOUT_MS,
            deadline_ms: MAX_TIMEOUT_MS,
            ..AiConfig::default()
        };
        at_limits.validate().unwrap();
        assert_eq!(at_limits.deadline(), Duration::from_secs(120));
    }

    #[test]
    fn test_missing_file_is_config_error() {
        assert!(matches!(
            AiConfig::from_file("/nonexistent/prody/ai.json"),
            Err(Error::Config(_))
        ));
    }

    #[tokio::test]
    async fn test_builders_follow_provider_order_and_limits() {
        let config = AiConfig {
            providers: vec![
                ProviderSettings::openrouter(Some("k".to_string())),
                ProviderSettings::gemini(None),
            ],
            ..AiConfig::default()
        };

        let clients = config.build_clients(Arc::new(ScriptedTransport::new()));
        assert_eq!(clients[0].id(), ProviderId::OpenRouter);
        assert!(clients[0].is_configured());
        assert!(!clients[1].is_configured());

        let limiter = config.build_rate_limiter(Arc::new(SystemClock));
        assert_eq!(limiter.remaining(ProviderId::OpenRouter).await, Some(20));
        assert_eq!(limiter.remaining(ProviderId::Gemini).await, Some(60));
    }
}
