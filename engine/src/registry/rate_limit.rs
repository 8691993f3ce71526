//! Fixed-window rate limiting
//!
//! A counter per provider, reset wholesale once the window has elapsed. This
//! is coarse on purpose: near a window boundary it can admit up to twice the
//! configured rate. The backend remains the final admission authority.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Configured request budget for a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub requests_per_window: u32,
    pub window_length_ms: u64,
}

impl RateLimit {
    pub fn new(requests_per_window: u32, window_length_ms: u64) -> Self {
        Self {
            requests_per_window,
            window_length_ms,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::milliseconds(self.window_length_ms.min(i64::MAX as u64) as i64)
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::new(60, 60_000)
    }
}

/// Counter state for one provider
///
/// The window opens on the first usage recorded after a reset, so an idle
/// provider never carries a half-spent window.
#[derive(Debug, Clone)]
pub struct FixedWindowLimiter {
    limit: RateLimit,
    count: u32,
    window_start: Option<DateTime<Utc>>,
}

impl FixedWindowLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            count: 0,
            window_start: None,
        }
    }

    pub fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Adopt a new budget. The running window is kept.
    pub fn set_limit(&mut self, limit: RateLimit) {
        self.limit = limit;
    }

    fn expired(&self, now: DateTime<Utc>) -> bool {
        match self.window_start {
            Some(start) => now - start >= self.limit.window(),
            None => true,
        }
    }

    /// Drop the counter if the window has elapsed
    fn roll(&mut self, now: DateTime<Utc>) {
        if self.window_start.is_some() && self.expired(now) {
            self.count = 0;
            self.window_start = None;
        }
    }

    /// Count one request against the current window
    pub fn record(&mut self, now: DateTime<Utc>) {
        self.roll(now);
        if self.window_start.is_none() {
            self.window_start = Some(now);
        }
        self.count = self.count.saturating_add(1);
    }

    /// Requests counted in the window that is live at `now`
    pub fn usage(&self, now: DateTime<Utc>) -> u32 {
        if self.expired(now) {
            0
        } else {
            self.count
        }
    }

    /// True iff the live window has already used its whole budget
    pub fn is_limited(&self, now: DateTime<Utc>) -> bool {
        self.usage(now) >= self.limit.requests_per_window
    }

    pub fn window_start(&self) -> Option<DateTime<Utc>> {
        self.window_start
    }
}
