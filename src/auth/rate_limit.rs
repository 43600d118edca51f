//! Fixed-window request limiter keyed by caller identity.
//!
//! Each identity owns a window that starts at its first request. Requests
//! inside the window are counted; once the window elapses the next request
//! starts a fresh one. Admission and counting happen under the same map entry
//! lock, so concurrent requests for one identity never over-admit.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tracing::debug;

/// Default window length.
pub const DEFAULT_RATE_WINDOW: Duration = Duration::from_secs(60);

/// Default number of requests admitted per window.
pub const DEFAULT_RATE_MAX: u32 = 20;

#[derive(Debug, Clone, Copy)]
struct RateWindow {
    started: Instant,
    count: u32,
}

/// Per-identity fixed-window counter.
#[derive(Debug)]
pub struct RateLimiter {
    windows: DashMap<String, RateWindow>,
    window: Duration,
    max_requests: u32,
}

impl RateLimiter {
    /// Create a limiter admitting `max_requests` per `window` per identity.
    pub fn new(window: Duration, max_requests: u32) -> Self {
        Self {
            windows: DashMap::new(),
            window,
            max_requests,
        }
    }

    /// Record one request for `identity` and report whether it is admitted.
    pub fn admit(&self, identity: &str) -> bool {
        self.admit_at(identity, Instant::now())
    }

    /// [`admit`](Self::admit) with an explicit clock reading.
    pub fn admit_at(&self, identity: &str, now: Instant) -> bool {
        let mut entry = self
            .windows
            .entry(identity.to_string())
            .or_insert(RateWindow {
                started: now,
                count: 0,
            });

        if now.saturating_duration_since(entry.started) >= self.window {
            entry.started = now;
            entry.count = 0;
        }

        entry.count = entry.count.saturating_add(1);
        let admitted = entry.count <= self.max_requests;
        if !admitted {
            debug!(identity, count = entry.count, "Rate limit exceeded");
        }
        admitted
    }

    /// Time until `identity`'s current window ends, rounded up to whole seconds.
    ///
    /// Returns `None` for identities with no active window.
    pub fn retry_after(&self, identity: &str) -> Option<Duration> {
        self.retry_after_at(identity, Instant::now())
    }

    /// [`retry_after`](Self::retry_after) with an explicit clock reading.
    pub fn retry_after_at(&self, identity: &str, now: Instant) -> Option<Duration> {
        let entry = self.windows.get(identity)?;
        let elapsed = now.saturating_duration_since(entry.started);
        let remaining = self.window.checked_sub(elapsed)?;
        let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
        Some(Duration::from_secs(secs.max(1)))
    }

    /// Drop windows that started more than `idle` ago.
    ///
    /// Returns the number of removed identities.
    pub fn evict_idle(&self, idle: Duration) -> usize {
        self.evict_idle_at(idle, Instant::now())
    }

    /// [`evict_idle`](Self::evict_idle) with an explicit clock reading.
    pub fn evict_idle_at(&self, idle: Duration, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, window| now.saturating_duration_since(window.started) < idle);
        before.saturating_sub(self.windows.len())
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }

    /// Window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Requests admitted per window.
    pub fn max_requests(&self) -> u32 {
        self.max_requests
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_RATE_WINDOW, DEFAULT_RATE_MAX)
    }
}

/// Periodically evict identities idle for two full windows.
pub fn spawn_eviction(limiter: Arc<RateLimiter>) -> tokio::task::JoinHandle<()> {
    let period = limiter.window().max(Duration::from_secs(1));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.tick().await;
        loop {
            ticker.tick().await;
            let removed = limiter.evict_idle(limiter.window() * 2);
            if removed > 0 {
                debug!(removed, tracked = limiter.tracked(), "Evicted idle rate windows");
            }
        }
    })
}
