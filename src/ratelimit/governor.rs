use std::collections::VecDeque;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use time::OffsetDateTime;
use tracing::debug;

use crate::config::{RateLimitConfig, RouteQuota};

/// Outcome of one admission check, plus the metadata the transport renders
/// as `X-RateLimit-*` headers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: usize,
    pub remaining: usize,
    /// Unix timestamp (seconds) of `now + window`.
    pub reset_at: i64,
    pub retry_after_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct WindowKey {
    client: String,
    route: String,
}

#[derive(Debug, Default)]
struct RateWindow {
    hits: VecDeque<Instant>,
}

impl RateWindow {
    fn purge(&mut self, now: Instant, window: Duration) {
        let Some(cutoff) = now.checked_sub(window) else {
            return;
        };
        while self.hits.front().is_some_and(|t| *t < cutoff) {
            self.hits.pop_front();
        }
    }

    fn is_idle(&self, now: Instant, window: Duration) -> bool {
        match self.hits.back() {
            Some(last) => now.saturating_duration_since(*last) > window,
            None => true,
        }
    }
}

/// Per-client, per-route sliding-window admission control.
///
/// Windows live in a sharded map; a check holds the write guard of its own
/// entry for the whole purge/compare/append step, so two racing requests for
/// the same key never both take the last slot while unrelated keys proceed
/// on other shards.
pub struct RateGovernor {
    config: RateLimitConfig,
    windows: DashMap<WindowKey, RateWindow>,
}

impl RateGovernor {
    pub fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            windows: DashMap::new(),
        }
    }

    pub fn quota_for(&self, route: &str) -> RouteQuota {
        self.config
            .routes
            .get(route)
            .copied()
            .unwrap_or(self.config.default)
    }

    pub fn admit(&self, client_id: &str, route: &str) -> RateDecision {
        self.check(client_id, route, None)
    }

    /// Same as [`admit`](Self::admit) with an explicit clock reading.
    pub fn admit_at(&self, client_id: &str, route: &str, now: Instant) -> RateDecision {
        self.check(client_id, route, Some(now))
    }

    fn check(&self, client_id: &str, route: &str, at: Option<Instant>) -> RateDecision {
        let quota = self.quota_for(route);
        let window = quota.window();
        let key = WindowKey {
            client: client_id.to_string(),
            route: route.to_string(),
        };

        let mut entry = self.windows.entry(key).or_default();
        // read the clock under the entry guard so hits stay ordered
        let now = at.unwrap_or_else(Instant::now);
        let state = entry.value_mut();
        state.purge(now, window);

        let reset_at = OffsetDateTime::now_utc().unix_timestamp() + quota.window_secs as i64;
        let used = state.hits.len();
        if used >= quota.requests {
            debug!(client = %client_id, route, used, limit = quota.requests, "admission rejected");
            return RateDecision {
                allowed: false,
                limit: quota.requests,
                remaining: 0,
                reset_at,
                retry_after_secs: quota.window_secs,
            };
        }

        state.hits.push_back(now);
        RateDecision {
            allowed: true,
            limit: quota.requests,
            remaining: quota.requests - state.hits.len(),
            reset_at,
            retry_after_secs: quota.window_secs,
        }
    }

    /// Drops windows whose newest hit is older than their route window.
    pub fn evict_idle(&self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows.retain(|key, state| {
            let window = self.quota_for(&key.route).window();
            !state.is_idle(now, window)
        });
        before.saturating_sub(self.windows.len())
    }

    #[cfg(test)]
    pub fn tracked_windows(&self) -> usize {
        self.windows.len()
    }
}
