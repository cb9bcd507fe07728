//! Scripted provider and transport for tests and offline demos.
//!
//! - [`ScriptedTransport`]: replays queued HTTP exchanges and records requests
//! - [`ScriptedProvider`]: replays queued [`ProviderOutcome`]s, can hang or delay

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use crate::error::TransportError;
use crate::persona::Persona;

use super::client::ProviderClient;
use super::transport::{HttpRequest, HttpResponse, HttpTransport};
use super::types::{ProviderContract, ProviderId, ProviderOutcome};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Transport that replays queued exchanges in order.
///
/// When the queue is empty every call fails as unreachable.
#[derive(Debug, Default)]
pub struct ScriptedTransport {
    exchanges: Mutex<VecDeque<Result<HttpResponse, TransportError>>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: HttpResponse) {
        lock(&self.exchanges).push_back(Ok(response));
    }

    pub fn push_failure(&self, err: TransportError) {
        lock(&self.exchanges).push_back(Err(err));
    }

    /// Requests seen so far, in order.
    pub fn requests(&self) -> Vec<HttpRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        lock(&self.requests).push(request);
        lock(&self.exchanges)
            .pop_front()
            .unwrap_or_else(|| Err(TransportError::Unreachable("no scripted exchange".to_string())))
    }
}

/// One scripted step of a [`ScriptedProvider`].
#[derive(Debug, Clone)]
pub enum Step {
    Respond(ProviderOutcome),
    /// Respond after sleeping (uses tokio time, so paused clocks apply).
    Delay(Duration, ProviderOutcome),
    /// Never respond.
    Hang,
}

/// Provider that replays scripted outcomes.
#[derive(Debug)]
pub struct ScriptedProvider {
    id: ProviderId,
    contract: ProviderContract,
    configured: bool,
    steps: Mutex<VecDeque<Step>>,
    fallback: Step,
    calls: AtomicUsize,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedProvider {
    /// A configured provider that fails as unreachable once its script runs out.
    pub fn new(id: ProviderId) -> Self {
        Self {
            id,
            contract: ProviderContract::for_provider(id),
            configured: true,
            steps: Mutex::new(VecDeque::new()),
            fallback: Step::Respond(ProviderOutcome::TransportFailure(
                TransportError::Unreachable("script exhausted".to_string()),
            )),
            calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn unconfigured(id: ProviderId) -> Self {
        Self {
            configured: false,
            ..Self::new(id)
        }
    }

    /// Queue an outcome.
    pub fn then(self, outcome: ProviderOutcome) -> Self {
        self.then_step(Step::Respond(outcome))
    }

    pub fn then_step(self, step: Step) -> Self {
        lock(&self.steps).push_back(step);
        self
    }

    /// Outcome returned on every call once the queue is drained.
    pub fn always(mut self, outcome: ProviderOutcome) -> Self {
        self.fallback = Step::Respond(outcome);
        self
    }

    pub fn always_step(mut self, step: Step) -> Self {
        self.fallback = step;
        self
    }

    pub fn succeeding(id: ProviderId, text: impl Into<String>) -> Self {
        Self::new(id).always(ProviderOutcome::Success(text.into()))
    }

    /// Number of `generate` calls made.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn id(&self) -> ProviderId {
        self.id
    }

    fn contract(&self) -> &ProviderContract {
        &self.contract
    }

    fn is_configured(&self) -> bool {
        self.configured
    }

    async fn generate(&self, prompt: &str, _persona: &Persona, _timeout: Duration) -> ProviderOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(prompt.to_string());

        let step = lock(&self.steps)
            .pop_front()
            .unwrap_or_else(|| self.fallback.clone());

        match step {
            Step::Respond(outcome) => outcome,
            Step::Delay(delay, outcome) => {
                tokio::time::sleep(delay).await;
                outcome
            }
            Step::Hang => std::future::pending().await,
        }
    }
}
