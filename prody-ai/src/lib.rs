//! # prody-ai
//!
//! Resilient AI text generation for the Prody journaling app.
//!
//! ## Core Components
//!
//! - **Parser**: pinned response contracts for each provider
//! - **Provider clients**: Gemini (primary) and OpenRouter (secondary) over an
//!   injected HTTP transport
//! - **Rate limiter**: hourly and daily budgets per provider
//! - **Response cache**: TTL entries with a persisted JSON snapshot
//! - **Fallback orchestrator**: retries, provider fallback, disclaimer stripping
//! - **AI repository**: the façade the app calls; always returns a record,
//!   substituting static content when AI is unavailable
//!
//! ## Example
//!
//! ```rust,ignore
//! use prody_ai::{AiConfig, AiRepository, Quote};
//!
//! let repo = AiRepository::open(&AiConfig::from_env()).await?;
//!
//! let quote = Quote::new("q-17", "Well begun is half done.").with_author("Aristotle");
//! let explanation = repo.get_quote_explanation(&quote).await;
//! if !explanation.is_ai_generated {
//!     // Bundled fallback text; AI will be retried after a short TTL.
//! }
//!
//! repo.shutdown().await?;
//! ```

pub mod config;
pub mod error;
pub mod features;
pub mod llm;
pub mod persona;
pub mod repository;
pub mod sections;
pub mod static_content;

// Re-exports for convenience
pub use config::{AiConfig, BackoffSettings, CacheSettings, ProviderSettings};
pub use error::{Error, ParseError, Result, SectionError, TransportError};
pub use features::{
    DailyWisdom, FeaturePrompt, FeatureRecord, JournalEntry, JournalInsight, MessageHelp, Quote,
    QuoteExplanation, VocabularyContext, WeeklyPatterns,
};
pub use llm::{
    AiRequest, BackoffPolicy, CacheKey, ContentOrigin, FallbackOrchestrator, FeatureKind,
    ProviderClient, ProviderId, ProviderOutcome, RateLimiter, ResponseCache, Sanitizer,
};
pub use persona::{Persona, PersonaTable};
pub use repository::AiRepository;
pub use sections::{parse_sections, render_sections, SectionLayout, Sections};
pub use static_content::StaticContent;
