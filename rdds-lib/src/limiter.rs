//! Per-client request rate limiting shared by both listeners.
//!
//! ```text
//! request ──> RateLimiter::is_rate_limited(protocol, ip)
//!                 |
//!                 +-- DashMap<(Protocol, IpAddr), VecDeque<Instant>>
//!                 |       sliding log of accepted requests
//!                 v
//!             true  -> reject before any pool checkout
//!             false -> request recorded, carry on
//! ```
//!
//! Each key is locked independently by its map shard, so concurrent checks
//! for different clients never contend on one global lock. Rejected requests
//! are not recorded: a client that keeps hammering regains access as soon as
//! its oldest accepted request leaves the window.

use crate::config::RateLimitConfig;
use crate::types::Protocol;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::net::IpAddr;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Sliding-window limiter keyed by service and remote address.
#[derive(Debug)]
pub struct RateLimiter {
    enabled: bool,
    limit: usize,
    period: Duration,
    windows: DashMap<(Protocol, IpAddr), VecDeque<Instant>>,
}

impl RateLimiter {
    pub fn new(limit: u32, period: Duration) -> Self {
        Self {
            enabled: true,
            limit: limit as usize,
            period,
            windows: DashMap::new(),
        }
    }

    pub fn from_config(config: &RateLimitConfig) -> Self {
        Self {
            enabled: config.enabled,
            ..Self::new(config.limit, config.period)
        }
    }

    /// A limiter that admits everything.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::new(0, Duration::ZERO)
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Record a request and report whether it exceeds the quota.
    pub fn is_rate_limited(&self, protocol: Protocol, addr: IpAddr) -> bool {
        self.check_at(protocol, addr, Instant::now())
    }

    fn check_at(&self, protocol: Protocol, addr: IpAddr, now: Instant) -> bool {
        if !self.enabled {
            return false;
        }

        let mut window = self.windows.entry((protocol, addr)).or_default();
        while let Some(&oldest) = window.front() {
            if now.saturating_duration_since(oldest) >= self.period {
                window.pop_front();
            } else {
                break;
            }
        }

        if window.len() >= self.limit {
            warn!(%protocol, remote = %addr, limit = self.limit, "rate limit exceeded");
            return true;
        }

        window.push_back(now);
        false
    }

    /// Drop windows with no request inside the current period.
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, window| {
            window
                .back()
                .is_some_and(|&newest| now.saturating_duration_since(newest) < self.period)
        });
        before.saturating_sub(self.windows.len())
    }

    /// Number of clients currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows.len()
    }

    /// Purge expired windows once per period until the limiter is dropped.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        if !self.enabled || self.period.is_zero() {
            return None;
        }

        let limiter: Weak<Self> = Arc::downgrade(self);
        let period = self.period;
        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(limiter) = limiter.upgrade() else {
                    break;
                };
                let removed = limiter.purge_expired();
                if removed > 0 {
                    debug!(removed, remaining = limiter.tracked_keys(), "purged idle rate-limit windows");
                }
            }
        }))
    }
}
