//! Provider plumbing: clients, parsing, rate limits, caching and fallback.
//!
//! ## Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prody_ai::llm::{
//!     ClientConfig, FallbackOrchestrator, GeminiClient, OpenRouterClient, RateLimiter,
//!     ReqwestTransport,
//! };
//!
//! let transport = Arc::new(ReqwestTransport::new(Duration::from_secs(5))?);
//! let providers: Vec<Arc<dyn ProviderClient>> = vec![
//!     Arc::new(GeminiClient::new(ClientConfig::new(gemini_key), transport.clone())),
//!     Arc::new(OpenRouterClient::new(ClientConfig::new(openrouter_key), transport)),
//! ];
//! let orchestrator = FallbackOrchestrator::new(providers, Arc::new(RateLimiter::unlimited()));
//!
//! let text = orchestrator.generate("Offer one line of encouragement.", &persona, 2).await;
//! ```

mod cache;
mod client;
mod clock;
mod mock;
mod orchestrator;
mod parser;
mod rate_limiter;
mod sanitize;
mod transport;
mod types;

pub use cache::{
    CacheConfig, CacheEntry, CacheKey, CacheStats, CachedText, ResponseCache, DEFAULT_MAX_ENTRIES,
};
pub use client::{ClientConfig, GeminiClient, OpenRouterClient, ProviderClient};
pub use clock::{Clock, ManualClock, SystemClock};
pub use mock::{ScriptedProvider, ScriptedTransport, Step};
pub use orchestrator::{BackoffPolicy, FallbackOrchestrator, DEFAULT_ATTEMPT_TIMEOUT, DEFAULT_DEADLINE};
pub use parser::{parse, parse_exchange};
pub use rate_limiter::{ProviderLimits, RateLimiter, RateWindow, WindowKind};
pub use sanitize::{Sanitizer, DEFAULT_DISCLAIMERS};
pub use transport::{HttpRequest, HttpResponse, HttpTransport, ReqwestTransport};
pub use types::{
    AiRequest, ContentOrigin, FeatureKind, ProviderContract, ProviderId, ProviderOutcome,
};
