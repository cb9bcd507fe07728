//! The façade the app calls: one method per feature.
//!
//! Every method returns a complete record and never an error. Per call:
//!
//! 1. the cache key is built from the feature, persona and input fingerprint
//! 2. with AI disabled, static content is served and nothing is cached
//! 3. a live cache entry is returned with the origin it was stored with
//! 4. otherwise the orchestrator is asked; a reply with all of the feature's
//!    sections is cached for the feature's TTL
//! 5. no reply, or a reply missing sections, falls back to static content,
//!    cached for the shorter static TTL so AI is retried once it expires
//!
//! Dropping a call's future cancels it; the cache is only written with a
//! complete result.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::NaiveDate;
use tracing::{debug, info, instrument, warn};

use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::features::{
    DailyWisdom, FeaturePrompt, FeatureRecord, JournalEntry, JournalInsight, MessageHelp, Quote,
    QuoteExplanation, VocabularyContext, WeeklyPatterns,
};
use crate::llm::{
    CacheKey, CacheStats, Clock, ContentOrigin, FallbackOrchestrator, HttpTransport,
    ReqwestTransport, ResponseCache, SystemClock,
};
use crate::persona::PersonaTable;
use crate::sections::{parse_sections, render_sections};
use crate::static_content::StaticContent;

/// Default TTL for static fallback content.
pub const DEFAULT_STATIC_TTL: Duration = Duration::from_secs(30 * 60);

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// AI features with caching, fallback and static substitution.
pub struct AiRepository {
    orchestrator: FallbackOrchestrator,
    cache: ResponseCache,
    personas: PersonaTable,
    static_content: StaticContent,
    enabled: AtomicBool,
    persona: RwLock<String>,
    max_retries: u32,
    static_ttl: Duration,
}

impl AiRepository {
    pub fn new(
        orchestrator: FallbackOrchestrator,
        cache: ResponseCache,
        personas: PersonaTable,
        static_content: StaticContent,
    ) -> Self {
        let persona = personas.default_id().to_string();
        Self {
            orchestrator,
            cache,
            personas,
            static_content,
            enabled: AtomicBool::new(true),
            persona: RwLock::new(persona),
            max_retries: 2,
            static_ttl: DEFAULT_STATIC_TTL,
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_static_ttl(mut self, ttl: Duration) -> Self {
        self.static_ttl = ttl;
        self
    }

    /// Production wiring: reqwest transport, system clock, bundled tables.
    pub async fn open(config: &AiConfig) -> Result<Self> {
        let transport = Arc::new(ReqwestTransport::new(CONNECT_TIMEOUT)?);
        Self::from_config(config, transport, Arc::new(SystemClock)).await
    }

    /// Build every component from `config`, opening the persisted cache if a
    /// path is set.
    pub async fn from_config(
        config: &AiConfig,
        transport: Arc<dyn HttpTransport>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        config.validate()?;

        let limiter = Arc::new(config.build_rate_limiter(clock.clone()));
        let orchestrator = FallbackOrchestrator::new(config.build_clients(transport), limiter)
            .with_backoff(config.backoff.policy())
            .with_attempt_timeout(config.request_timeout())
            .with_deadline(config.deadline());

        let cache_config = config.cache.cache_config();
        let cache = match &config.cache.path {
            Some(path) => ResponseCache::open_with_clock(path.clone(), cache_config, clock).await,
            None => ResponseCache::in_memory_with_clock(cache_config, clock),
        };

        if !config.has_credentials() {
            info!("no provider credentials configured, features will serve static content");
        }

        let repository = Self::new(
            orchestrator,
            cache,
            PersonaTable::bundled()?,
            StaticContent::bundled()?,
        )
        .with_max_retries(config.max_retries)
        .with_static_ttl(config.cache.static_ttl());
        repository.set_ai_enabled(config.enabled);
        Ok(repository)
    }

    /// User-controlled AI toggle. Takes effect on the next call.
    pub fn set_ai_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        info!(enabled, "AI features toggled");
    }

    pub fn is_ai_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Switch persona. Unknown ids are rejected and the current persona kept.
    pub fn set_persona(&self, id: &str) -> Result<()> {
        if !self.personas.contains(id) {
            return Err(Error::config(format!("unknown persona '{id}'")));
        }
        *self.persona.write().unwrap_or_else(|p| p.into_inner()) = id.to_string();
        Ok(())
    }

    pub fn persona(&self) -> String {
        self.persona
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .clone()
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    pub fn cache(&self) -> &ResponseCache {
        &self.cache
    }

    /// Flush the cache and stop its background task.
    pub async fn shutdown(&self) -> Result<()> {
        self.cache.shutdown().await
    }

    pub async fn get_daily_wisdom(&self, date: NaiveDate) -> DailyWisdom {
        self.resolve(FeaturePrompt::daily_wisdom(date)).await
    }

    pub async fn get_quote_explanation(&self, quote: &Quote) -> QuoteExplanation {
        self.resolve(FeaturePrompt::quote_explanation(quote)).await
    }

    pub async fn analyze_journal_entry(&self, entry: &JournalEntry) -> JournalInsight {
        self.resolve(FeaturePrompt::journal_insight(entry)).await
    }

    pub async fn get_weekly_patterns(
        &self,
        week_start: NaiveDate,
        entries: &[JournalEntry],
    ) -> WeeklyPatterns {
        self.resolve(FeaturePrompt::weekly_patterns(week_start, entries))
            .await
    }

    pub async fn get_vocabulary_context(
        &self,
        word: &str,
        definition: Option<&str>,
    ) -> VocabularyContext {
        self.resolve(FeaturePrompt::vocabulary_context(word, definition))
            .await
    }

    pub async fn get_message_helper(&self, topic: &str) -> MessageHelp {
        self.resolve(FeaturePrompt::message_helper(topic)).await
    }

    /// Resolve any feature call. The feature methods above are shorthands
    /// for this; call it directly to set a per-call retry override with
    /// [`FeaturePrompt::with_max_retries`].
    #[instrument(skip(self, request), fields(feature = %R::KIND))]
    pub async fn resolve<R: FeatureRecord>(&self, request: FeaturePrompt) -> R {
        let persona = self.personas.get(&self.persona());
        let key = request.cache_key(&persona.id);
        let layout = R::KIND.layout();

        if request.kind != R::KIND {
            warn!(requested = %request.kind, "prompt is for another feature, serving static content");
            return self.static_record(&key, false).await;
        }

        if !self.is_ai_enabled() {
            debug!(key = %key, "AI disabled, serving static content");
            return self.static_record(&key, false).await;
        }

        if let Some(hit) = self.cache.get(&key).await {
            match parse_sections(&hit.value, &layout) {
                Ok(sections) => {
                    debug!(key = %key, origin = ?hit.origin, "cache hit");
                    return R::from_sections(&sections, hit.origin);
                }
                Err(e) => warn!(key = %key, error = %e, "cached value unreadable, regenerating"),
            }
        }

        let reply = self
            .orchestrator
            .generate_request(&request.to_request(&persona.id), persona, self.max_retries)
            .await;

        match reply.map(|text| parse_sections(&text, &layout)) {
            Some(Ok(sections)) => {
                self.cache
                    .put(
                        key,
                        render_sections(sections.iter()),
                        R::KIND.ai_ttl(),
                        ContentOrigin::Ai,
                    )
                    .await;
                R::from_sections(&sections, ContentOrigin::Ai)
            }
            Some(Err(e)) => {
                warn!(error = %e, "AI reply missing sections, serving static content");
                self.static_record(&key, true).await
            }
            None => {
                info!("no provider answered, serving static content");
                self.static_record(&key, true).await
            }
        }
    }

    async fn static_record<R: FeatureRecord>(&self, key: &CacheKey, cache: bool) -> R {
        let sections = self.static_content.select(R::KIND, key.fingerprint());
        if cache {
            self.cache
                .put(
                    key.clone(),
                    render_sections(sections.iter()),
                    self.static_ttl,
                    ContentOrigin::Static,
                )
                .await;
        }
        R::from_sections(sections, ContentOrigin::Static)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use crate::llm::{
        CacheConfig, ManualClock, ProviderClient, ProviderId, ProviderLimits, ProviderOutcome,
        RateLimiter, ScriptedProvider, Step,
    };
    use chrono::{TimeZone, Utc};
    use pretty_assertions::assert_eq;

    const EXPLANATION: &str =
        "MEANING: Small steps compound into lasting change.\nACTION: Write one sentence about today before bed.";

    struct Harness {
        repo: AiRepository,
        clock: Arc<ManualClock>,
    }

    fn harness(providers: Vec<Arc<ScriptedProvider>>) -> Harness {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 15, 7, 30, 0).unwrap(),
        ));
        let limiter = RateLimiter::new(clock.clone());
        let providers = providers
            .into_iter()
            .map(|p| p as Arc<dyn ProviderClient>)
            .collect();
        let orchestrator = FallbackOrchestrator::new(providers, Arc::new(limiter))
            .with_attempt_timeout(Duration::from_secs(5));
        let cache = ResponseCache::in_memory_with_clock(CacheConfig::default(), clock.clone());
        let repo = AiRepository::new(
            orchestrator,
            cache,
            PersonaTable::bundled().unwrap(),
            StaticContent::bundled().unwrap(),
        )
        .with_max_retries(1);
        Harness { repo, clock }
    }

    fn quote() -> Quote {
        Quote::new("q-1", "Well begun is half done.").with_author("Aristotle")
    }

    fn unreachable() -> ProviderOutcome {
        ProviderOutcome::TransportFailure(TransportError::Unreachable("offline".to_string()))
    }

    #[tokio::test]
    async fn test_ai_result_is_cached_and_short_circuits() {
        let gemini = Arc::new(ScriptedProvider::succeeding(ProviderId::Gemini, EXPLANATION));
        let h = harness(vec![gemini.clone()]);

        let first = h.repo.get_quote_explanation(&quote()).await;
        assert!(first.is_ai_generated);
        assert_eq!(first.meaning, "Small steps compound into lasting change.");
        assert_eq!(first.action, "Write one sentence about today before bed.");

        let second = h.repo.get_quote_explanation(&quote()).await;
        assert_eq!(second, first);
        assert_eq!(gemini.calls(), 1);
        assert_eq!(h.repo.cache_stats().await.hits, 1);
    }

    #[tokio::test]
    async fn test_cached_value_is_canonical_sections() {
        let gemini = Arc::new(ScriptedProvider::succeeding(
            ProviderId::Gemini,
            "Sure! Here you go.\n**Meaning:** Start now.\n**Action:** Open your journal.",
        ));
        let h = harness(vec![gemini]);

        h.repo.get_quote_explanation(&quote()).await;
        let key = FeaturePrompt::quote_explanation(&quote()).cache_key("gentle_guide");
        let cached = h.repo.cache().get(&key).await.unwrap();
        assert_eq!(cached.value, "MEANING: Start now.\nACTION: Open your journal.");
        assert_eq!(cached.origin, ContentOrigin::Ai);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_serves_static_with_short_ttl() {
        let gemini = Arc::new(
            ScriptedProvider::new(ProviderId::Gemini)
                .then(unreachable())
                .then(unreachable())
                .always(ProviderOutcome::Success(EXPLANATION.to_string())),
        );
        let h = harness(vec![gemini.clone()]);

        let fallback = h.repo.get_quote_explanation(&quote()).await;
        assert!(!fallback.is_ai_generated);
        assert!(!fallback.meaning.is_empty());
        assert_eq!(gemini.calls(), 2);

        // Static entry is served from cache until its TTL lapses.
        let again = h.repo.get_quote_explanation(&quote()).await;
        assert_eq!(again, fallback);
        assert_eq!(gemini.calls(), 2);

        h.clock.advance(chrono::Duration::minutes(31));
        let recovered = h.repo.get_quote_explanation(&quote()).await;
        assert!(recovered.is_ai_generated);
        assert_eq!(gemini.calls(), 3);
    }

    #[tokio::test]
    async fn test_disabled_serves_static_without_caching() {
        let gemini = Arc::new(ScriptedProvider::succeeding(ProviderId::Gemini, EXPLANATION));
        let h = harness(vec![gemini.clone()]);
        h.repo.set_ai_enabled(false);

        let record = h.repo.get_quote_explanation(&quote()).await;
        assert!(!record.is_ai_generated);
        assert_eq!(gemini.calls(), 0);
        assert!(h.repo.cache().is_empty().await);

        h.repo.set_ai_enabled(true);
        assert!(h.repo.get_quote_explanation(&quote()).await.is_ai_generated);
        assert_eq!(gemini.calls(), 1);
    }

    #[tokio::test]
    async fn test_disabled_ignores_cached_ai_content() {
        let gemini = Arc::new(ScriptedProvider::succeeding(ProviderId::Gemini, EXPLANATION));
        let h = harness(vec![gemini]);

        assert!(h.repo.get_quote_explanation(&quote()).await.is_ai_generated);
        h.repo.set_ai_enabled(false);
        assert!(!h.repo.get_quote_explanation(&quote()).await.is_ai_generated);
    }

    #[tokio::test]
    async fn test_reply_missing_sections_falls_back_to_static() {
        let gemini = Arc::new(ScriptedProvider::succeeding(
            ProviderId::Gemini,
            "MEANING: Only half an answer.",
        ));
        let h = harness(vec![gemini]);

        let record = h.repo.get_quote_explanation(&quote()).await;
        assert!(!record.is_ai_generated);
        assert_ne!(record.meaning, "Only half an answer.");

        let key = FeaturePrompt::quote_explanation(&quote()).cache_key("gentle_guide");
        let cached = h.repo.cache().get(&key).await.unwrap();
        assert_eq!(cached.origin, ContentOrigin::Static);
    }

    #[tokio::test]
    async fn test_bare_wisdom_is_accepted() {
        let gemini = Arc::new(ScriptedProvider::succeeding(
            ProviderId::Gemini,
            "As an AI, I think every page you write is a small act of courage.",
        ));
        let h = harness(vec![gemini]);

        let wisdom = h
            .repo
            .get_daily_wisdom(NaiveDate::from_ymd_opt(2026, 10, 15).unwrap())
            .await;
        assert!(wisdom.is_ai_generated);
        assert_eq!(
            wisdom.text,
            "I think every page you write is a small act of courage."
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelled_call_writes_nothing() {
        let gemini = Arc::new(ScriptedProvider::new(ProviderId::Gemini).always_step(Step::Hang));
        let h = harness(vec![gemini.clone()]);

        let q = quote();
        let call = h.repo.get_quote_explanation(&q);
        assert!(tokio::time::timeout(Duration::from_secs(1), call).await.is_err());

        assert_eq!(gemini.calls(), 1);
        assert!(h.repo.cache().is_empty().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_call_retry_override() {
        let gemini = Arc::new(
            ScriptedProvider::new(ProviderId::Gemini)
                .then(unreachable())
                .always(ProviderOutcome::Success(EXPLANATION.to_string())),
        );
        let h = harness(vec![gemini.clone()]);
        let q = quote();

        // The harness default of one retry would recover; zero does not.
        let record: QuoteExplanation = h
            .repo
            .resolve(FeaturePrompt::quote_explanation(&q).with_max_retries(0))
            .await;
        assert!(!record.is_ai_generated);
        assert_eq!(gemini.calls(), 1);
    }

    #[tokio::test]
    async fn test_mismatched_prompt_serves_static_without_calling() {
        let gemini = Arc::new(ScriptedProvider::succeeding(ProviderId::Gemini, EXPLANATION));
        let h = harness(vec![gemini.clone()]);

        let record: QuoteExplanation = h.repo.resolve(FeaturePrompt::message_helper("exams")).await;
        assert!(!record.is_ai_generated);
        assert!(!record.meaning.is_empty());
        assert_eq!(gemini.calls(), 0);
        assert!(h.repo.cache().is_empty().await);
    }

    #[tokio::test]
    async fn test_persona_is_part_of_the_key() {
        let gemini = Arc::new(ScriptedProvider::succeeding(ProviderId::Gemini, EXPLANATION));
        let h = harness(vec![gemini.clone()]);

        h.repo.get_quote_explanation(&quote()).await;
        h.repo.set_persona("stoic_mentor").unwrap();
        h.repo.get_quote_explanation(&quote()).await;
        assert_eq!(gemini.calls(), 2);

        assert!(h.repo.set_persona("nobody").is_err());
        assert_eq!(h.repo.persona(), "stoic_mentor");
    }

    #[tokio::test]
    async fn test_rate_limited_chain_degrades_to_static() {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 10, 15, 7, 30, 0).unwrap(),
        ));
        let gemini = Arc::new(ScriptedProvider::succeeding(ProviderId::Gemini, EXPLANATION));
        let limiter = RateLimiter::new(clock.clone())
            .with_limits(ProviderId::Gemini, ProviderLimits::new(1, 1));
        let orchestrator = FallbackOrchestrator::new(
            vec![gemini.clone() as Arc<dyn ProviderClient>],
            Arc::new(limiter),
        );
        let repo = AiRepository::new(
            orchestrator,
            ResponseCache::in_memory_with_clock(CacheConfig::default(), clock),
            PersonaTable::bundled().unwrap(),
            StaticContent::bundled().unwrap(),
        );

        assert!(repo.get_quote_explanation(&quote()).await.is_ai_generated);
        let other = Quote::new("q-2", "Know thyself.");
        assert!(!repo.get_quote_explanation(&other).await.is_ai_generated);
        assert_eq!(gemini.calls(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_features_resolve_independently() {
        let gemini = Arc::new(ScriptedProvider::succeeding(
            ProviderId::Gemini,
            "EMOTION: Calm\nTHEMES: rest, family\nINSIGHT: You made space for what matters.",
        ));
        let h = harness(vec![gemini]);
        let entry = JournalEntry::new("Spent the afternoon with my sister.");

        let (insight, vocab, helper) = tokio::join!(
            h.repo.analyze_journal_entry(&entry),
            h.repo.get_vocabulary_context("serene", None),
            h.repo.get_message_helper("graduation"),
        );

        assert!(insight.is_ai_generated);
        assert_eq!(insight.themes, vec!["rest", "family"]);
        // The insight reply lacks the other features' sections.
        assert!(!vocab.is_ai_generated);
        assert!(!helper.is_ai_generated);
        assert_eq!(helper.prompts.len(), 3);
    }

    #[tokio::test]
    async fn test_from_config_without_credentials_is_static_only() {
        let transport = Arc::new(crate::llm::ScriptedTransport::new());
        let repo = AiRepository::from_config(
            &AiConfig::default(),
            transport.clone(),
            Arc::new(SystemClock),
        )
        .await
        .unwrap();

        let entry = JournalEntry::new("A quiet day.");
        let insight = repo.analyze_journal_entry(&entry).await;
        assert!(!insight.is_ai_generated);
        assert!(transport.requests().is_empty());
        repo.shutdown().await.unwrap();
    }
}
