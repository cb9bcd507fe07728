//! Fallback orchestrator: one prompt, many providers, best effort.
//!
//! Providers are tried in their fixed priority order. For each one:
//!
//! - unconfigured: skipped, no budget consumed
//! - rate budget exhausted: skipped, no network attempt
//! - `Success`: sanitized and returned, ending the chain
//! - `TransportFailure` (including a per-attempt timeout): retried on the same
//!   provider up to `max_retries` more times with bounded exponential backoff;
//!   every attempt takes its own rate budget
//! - `ParseFailure` / `ProviderRejected`: next provider, no retry
//!
//! The whole run is bounded by a deadline on top of the per-attempt timeout.
//! When the chain is exhausted the result is `None`; substituting static
//! content is the caller's job. Dropping the returned future cancels the
//! in-flight provider call and any further attempts.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, instrument, warn};

use crate::error::{Error, ParseError, Result, TransportError};
use crate::persona::Persona;

use super::client::ProviderClient;
use super::rate_limiter::RateLimiter;
use super::sanitize::Sanitizer;
use super::types::{AiRequest, ProviderId, ProviderOutcome};

/// Default bound on a single provider attempt.
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(15);

/// Default bound on a whole chain run.
pub const DEFAULT_DEADLINE: Duration = Duration::from_secs(45);

/// Bounded exponential backoff between same-provider retries.
///
/// `delay(n) = min(base * 2^(n-1), max)` for the n-th retry (n >= 1).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub max: Duration,
}

impl BackoffPolicy {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max: max.max(base),
        }
    }

    /// No waiting between retries.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    pub fn delay(&self, retry: u32) -> Duration {
        if retry == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(retry - 1);
        self.base.saturating_mul(factor).min(self.max)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::new(Duration::from_millis(250), Duration::from_secs(2))
    }
}

/// Drives one prompt through the provider chain.
pub struct FallbackOrchestrator {
    providers: Vec<Arc<dyn ProviderClient>>,
    limiter: Arc<RateLimiter>,
    sanitizer: Sanitizer,
    backoff: BackoffPolicy,
    attempt_timeout: Duration,
    deadline: Duration,
}

impl FallbackOrchestrator {
    /// Orchestrator over `providers`, in priority order.
    pub fn new(providers: Vec<Arc<dyn ProviderClient>>, limiter: Arc<RateLimiter>) -> Self {
        Self {
            providers,
            limiter,
            sanitizer: Sanitizer::default(),
            backoff: BackoffPolicy::default(),
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            deadline: DEFAULT_DEADLINE,
        }
    }

    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Bound on a whole `generate` call, across every provider and retry.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.sanitizer = sanitizer;
        self
    }

    /// Provider ids in priority order.
    pub fn provider_ids(&self) -> Vec<ProviderId> {
        self.providers.iter().map(|p| p.id()).collect()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    /// Sanitized text from the first provider that succeeds, or `None`.
    pub async fn generate(&self, prompt: &str, persona: &Persona, max_retries: u32) -> Option<String> {
        self.try_generate(prompt, persona, max_retries).await.ok()
    }

    /// Run `request`, using its retry override when set.
    pub async fn generate_request(
        &self,
        request: &AiRequest,
        persona: &Persona,
        default_retries: u32,
    ) -> Option<String> {
        let max_retries = request.max_retries.unwrap_or(default_retries);
        self.generate(&request.prompt, persona, max_retries).await
    }

    /// Like [`generate`](Self::generate), but reports exhaustion as
    /// [`Error::AllProvidersExhausted`].
    #[instrument(skip(self, prompt, persona), fields(persona = %persona.id, prompt_len = prompt.len()))]
    pub async fn try_generate(&self, prompt: &str, persona: &Persona, max_retries: u32) -> Result<String> {
        let chain = async {
            for provider in &self.providers {
                match self.run_provider(provider.as_ref(), prompt, persona, max_retries).await {
                    Ok(text) => return Ok(text),
                    Err(err) => debug!(provider = %provider.id(), error = %err, "moving to next provider"),
                }
            }
            warn!(providers = self.providers.len(), "all providers exhausted");
            Err(Error::AllProvidersExhausted)
        };

        match tokio::time::timeout(self.deadline, chain).await {
            Ok(result) => result,
            Err(_) => {
                warn!(deadline_ms = self.deadline.as_millis() as u64, "provider chain hit its deadline");
                Err(Error::AllProvidersExhausted)
            }
        }
    }

    async fn run_provider(
        &self,
        provider: &dyn ProviderClient,
        prompt: &str,
        persona: &Persona,
        max_retries: u32,
    ) -> Result<String> {
        let id = provider.id();
        if !provider.is_configured() {
            return Err(Error::config(format!("{id} has no credentials")));
        }

        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if !self.limiter.try_acquire(id).await {
                debug!(provider = %id, attempt, "rate limited");
                return Err(Error::rate_limited(id));
            }

            let outcome = self.attempt(provider, prompt, persona).await;
            debug!(provider = %id, attempt, outcome = outcome.kind(), "attempt finished");

            let transient = outcome.is_transient();
            let err = match outcome.into_text() {
                Ok(text) => {
                    let clean = self.sanitizer.sanitize(&text);
                    if clean.is_empty() {
                        let err = Error::Parse(ParseError::missing("text"));
                        warn!(provider = %id, error = %err, "response empty after sanitizing");
                        return Err(err);
                    }
                    info!(provider = %id, attempt, "generation succeeded");
                    return Ok(clean);
                }
                Err(err) => err,
            };

            if !transient {
                warn!(provider = %id, error = %err, "provider response unusable");
                return Err(err);
            }
            if attempt > max_retries {
                warn!(provider = %id, attempts = attempt, error = %err, "transient failures exhausted retries");
                return Err(err);
            }
            let delay = self.backoff.delay(attempt);
            debug!(provider = %id, attempt, error = %err, delay_ms = delay.as_millis() as u64, "retrying");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
    }

    async fn attempt(&self, provider: &dyn ProviderClient, prompt: &str, persona: &Persona) -> ProviderOutcome {
        let call = provider.generate(prompt, persona, self.attempt_timeout);
        match tokio::time::timeout(self.attempt_timeout, call).await {
            Ok(outcome) => outcome,
            Err(_) => ProviderOutcome::TransportFailure(TransportError::Timeout(self.attempt_timeout)),
        }
    }
}
