//! Sliding-window admission control keyed by client network identity.
//!
//! The pipeline only sees the narrow [`RateLimiter`] interface, so the
//! in-process [`SlidingWindowLimiter`] can be replaced with a limiter backed
//! by a shared store when several instances serve the same clients.

use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;

/// Default window length.
pub const DEFAULT_WINDOW: Duration = Duration::from_secs(60);

/// Default number of requests admitted per window.
pub const DEFAULT_CAPACITY: u32 = 5;

/// Tracked keys above which idle windows are swept.
const SWEEP_THRESHOLD: usize = 10_000;

/// Admit/deny decision per client key.
#[async_trait]
pub trait RateLimiter: Send + Sync {
    /// Records a request from `client_key` and returns whether it is allowed.
    async fn admit(&self, client_key: &str) -> bool;
}

/// In-process sliding-window limiter.
///
/// Each key keeps the instants of its admitted requests inside the window,
/// oldest first. A request is admitted while fewer than `capacity` instants
/// remain after pruning. Rejected requests are not recorded.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    window: Duration,
    capacity: usize,
    windows: Mutex<HashMap<String, VecDeque<Instant>>>,
}

impl Default for SlidingWindowLimiter {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW, DEFAULT_CAPACITY)
    }
}

impl SlidingWindowLimiter {
    /// Creates a limiter admitting `capacity` requests per `window` and key.
    #[must_use]
    pub fn new(window: Duration, capacity: u32) -> Self {
        Self {
            window,
            capacity: usize::try_from(capacity).unwrap_or(usize::MAX),
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admission decision at an explicit instant.
    pub fn admit_at(&self, client_key: &str, now: Instant) -> bool {
        let mut windows = self.windows.lock().unwrap_or_else(PoisonError::into_inner);

        if windows.len() > SWEEP_THRESHOLD {
            let window = self.window;
            windows.retain(|_, stamps| {
                prune(stamps, now, window);
                !stamps.is_empty()
            });
        }

        let stamps = windows.entry(client_key.to_string()).or_default();
        prune(stamps, now, self.window);

        if stamps.len() >= self.capacity {
            return false;
        }
        stamps.push_back(now);
        true
    }

    /// Number of keys currently tracked.
    pub fn tracked_keys(&self) -> usize {
        self.windows
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

fn prune(stamps: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = stamps.front() {
        if now.saturating_duration_since(*oldest) < window {
            break;
        }
        stamps.pop_front();
    }
}

#[async_trait]
impl RateLimiter for SlidingWindowLimiter {
    async fn admit(&self, client_key: &str) -> bool {
        self.admit_at(client_key, Instant::now())
    }
}
