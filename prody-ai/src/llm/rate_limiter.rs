//! Per-provider call budgets over hourly and daily wall-clock windows.
//!
//! Windows are aligned to UTC boundaries (top of the hour, midnight) and
//! rolled over lazily on each call; there is no background timer. The check
//! and the increment happen under one lock, so concurrent callers can never
//! push a window past its limit.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::types::ProviderId;

/// Window granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowKind {
    Hourly,
    Daily,
}

impl WindowKind {
    fn length_secs(&self) -> i64 {
        match self {
            Self::Hourly => 60 * 60,
            Self::Daily => 24 * 60 * 60,
        }
    }

    /// Start of the window containing `now`.
    pub fn window_start(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let secs = now.timestamp();
        let start = secs - secs.rem_euclid(self.length_secs());
        DateTime::from_timestamp(start, 0).unwrap_or(now)
    }
}

/// Call count for one provider in one window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateWindow {
    pub provider: ProviderId,
    pub kind: WindowKind,
    pub window_start: DateTime<Utc>,
    pub count: u32,
    pub limit: u32,
}

impl RateWindow {
    fn new(provider: ProviderId, kind: WindowKind, limit: u32, now: DateTime<Utc>) -> Self {
        Self {
            provider,
            kind,
            window_start: kind.window_start(now),
            count: 0,
            limit,
        }
    }

    fn roll(&mut self, now: DateTime<Utc>) {
        let start = self.kind.window_start(now);
        if start != self.window_start {
            self.window_start = start;
            self.count = 0;
        }
    }

    fn is_exhausted(&self) -> bool {
        self.count >= self.limit
    }

    fn remaining(&self) -> u32 {
        self.limit.saturating_sub(self.count)
    }
}

/// Budget for one provider. `None` means unlimited for that window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderLimits {
    pub hourly: Option<u32>,
    pub daily: Option<u32>,
}

impl ProviderLimits {
    pub fn new(hourly: u32, daily: u32) -> Self {
        Self {
            hourly: Some(hourly),
            daily: Some(daily),
        }
    }
}

#[derive(Debug, Default)]
struct ProviderWindows {
    hourly: Option<RateWindow>,
    daily: Option<RateWindow>,
}

impl ProviderWindows {
    fn windows_mut(&mut self) -> impl Iterator<Item = &mut RateWindow> {
        self.hourly.iter_mut().chain(self.daily.iter_mut())
    }

    fn windows(&self) -> impl Iterator<Item = &RateWindow> {
        self.hourly.iter().chain(self.daily.iter())
    }
}

/// Rate limiter shared by all concurrent requests.
pub struct RateLimiter {
    clock: Arc<dyn Clock>,
    windows: Mutex<HashMap<ProviderId, ProviderWindows>>,
}

impl RateLimiter {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Limiter on the system clock with no budgets set.
    pub fn unlimited() -> Self {
        Self::new(Arc::new(SystemClock))
    }

    /// Set the budget for a provider. Providers without limits are unlimited.
    pub fn with_limits(mut self, provider: ProviderId, limits: ProviderLimits) -> Self {
        let now = self.clock.now();
        let windows = ProviderWindows {
            hourly: limits
                .hourly
                .map(|limit| RateWindow::new(provider, WindowKind::Hourly, limit, now)),
            daily: limits
                .daily
                .map(|limit| RateWindow::new(provider, WindowKind::Daily, limit, now)),
        };
        self.windows.get_mut().insert(provider, windows);
        self
    }

    /// Take one call from the provider's budget.
    ///
    /// Returns false, without counting the call, when either window is
    /// already exhausted.
    pub async fn try_acquire(&self, provider: ProviderId) -> bool {
        let now = self.clock.now();
        let mut windows = self.windows.lock().await;
        let Some(entry) = windows.get_mut(&provider) else {
            return true;
        };

        for window in entry.windows_mut() {
            window.roll(now);
        }

        if let Some(window) = entry.windows().find(|w| w.is_exhausted()) {
            debug!(
                provider = %provider,
                window = ?window.kind,
                limit = window.limit,
                "rate budget exhausted"
            );
            return false;
        }

        for window in entry.windows_mut() {
            window.count += 1;
        }
        true
    }

    /// Calls left before the tighter window is exhausted. `None` if unlimited.
    pub async fn remaining(&self, provider: ProviderId) -> Option<u32> {
        let now = self.clock.now();
        let mut windows = self.windows.lock().await;
        let entry = windows.get_mut(&provider)?;
        for window in entry.windows_mut() {
            window.roll(now);
        }
        entry.windows().map(RateWindow::remaining).min()
    }

    /// Current windows for every limited provider.
    pub async fn snapshot(&self) -> Vec<RateWindow> {
        let now = self.clock.now();
        let mut windows = self.windows.lock().await;
        let mut out: Vec<RateWindow> = windows
            .values_mut()
            .flat_map(|entry| {
                for window in entry.windows_mut() {
                    window.roll(now);
                }
                entry.windows().cloned().collect::<Vec<_>>()
            })
            .collect();
        out.sort_by_key(|w| (w.provider, w.kind == WindowKind::Daily));
        out
    }
}
