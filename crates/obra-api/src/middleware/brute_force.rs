//! # Login Brute-Force Guard
//!
//! In-memory login-attempt counter keyed by client address. Every attempt
//! is counted before its password is verified and stays counted inside a
//! sliding window; reaching `max_attempts` locks the key for `lockout`.
//! While locked, the login handler answers 429 without checking
//! credentials. A successful login clears the key.
//!
//! Single-process only: a restart forgets all counters.

use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::http::HeaderMap;
use parking_lot::Mutex;

/// Table size past which stale keys are pruned on the next attempt.
const PRUNE_THRESHOLD: usize = 10_000;

/// Longest window or lockout the throttle accepts.
pub const MAX_PERIOD: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// Throttle configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoginThrottleConfig {
    /// Attempts inside `window` that trigger a lockout.
    pub max_attempts: u32,
    /// How long an attempt is remembered.
    pub window: Duration,
    /// How long a key stays locked.
    pub lockout: Duration,
}

impl Default for LoginThrottleConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            window: Duration::from_secs(15 * 60),
            lockout: Duration::from_secs(15 * 60),
        }
    }
}

impl LoginThrottleConfig {
    /// The configuration with both periods capped at [`MAX_PERIOD`] and
    /// `max_attempts` at least one.
    pub fn clamped(self) -> Self {
        Self {
            max_attempts: self.max_attempts.max(1),
            window: self.window.min(MAX_PERIOD),
            lockout: self.lockout.min(MAX_PERIOD),
        }
    }
}

/// `now + period`, saturating at the furthest instant the clock can hold.
fn deadline(now: Instant, period: Duration) -> Instant {
    now.checked_add(period)
        .or_else(|| now.checked_add(MAX_PERIOD))
        .unwrap_or(now)
}

#[derive(Debug, Default)]
struct Attempts {
    failures: VecDeque<Instant>,
    locked_until: Option<Instant>,
}

impl Attempts {
    fn forget_before(&mut self, cutoff: Option<Instant>) {
        if let Some(cutoff) = cutoff {
            while self.failures.front().is_some_and(|t| *t < cutoff) {
                self.failures.pop_front();
            }
        }
    }

    fn is_stale(&self, now: Instant) -> bool {
        self.failures.is_empty() && self.locked_until.map_or(true, |until| until <= now)
    }
}

/// Shared failed-login table.
#[derive(Debug, Clone)]
pub struct LoginThrottle {
    config: LoginThrottleConfig,
    attempts: Arc<Mutex<HashMap<String, Attempts>>>,
}

impl LoginThrottle {
    /// Create an empty throttle. Durations are capped at [`MAX_PERIOD`] and
    /// at least one attempt is always allowed.
    pub fn new(config: LoginThrottleConfig) -> Self {
        Self {
            config: config.clamped(),
            attempts: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// The active configuration.
    pub fn config(&self) -> LoginThrottleConfig {
        self.config
    }

    /// Reserve a login attempt for `key` before its credentials are checked.
    ///
    /// The attempt counts as a failure until [`record_success`] clears the
    /// key, so concurrent guesses cannot all pass the limit while a password
    /// is being verified. Returns the attempts left after this one; the
    /// attempt that leaves none locks the key. `Err(retry_after)` while
    /// locked.
    ///
    /// [`record_success`]: Self::record_success
    pub fn begin_attempt(&self, key: &str) -> Result<u32, Duration> {
        self.begin_attempt_at(key, Instant::now())
    }

    /// [`begin_attempt`](Self::begin_attempt) at an explicit instant.
    pub fn begin_attempt_at(&self, key: &str, now: Instant) -> Result<u32, Duration> {
        let mut table = self.attempts.lock();
        if table.len() > PRUNE_THRESHOLD {
            let window = self.config.window;
            table.retain(|_, entry| {
                entry.forget_before(now.checked_sub(window));
                !entry.is_stale(now)
            });
            tracing::debug!(remaining = table.len(), "pruned login throttle table");
        }

        let entry = table.entry(key.to_string()).or_default();
        match entry.locked_until {
            Some(until) if until > now => return Err(until - now),
            Some(_) => entry.locked_until = None,
            None => {}
        }

        entry.forget_before(now.checked_sub(self.config.window));
        entry.failures.push_back(now);
        let used = u32::try_from(entry.failures.len()).unwrap_or(u32::MAX);
        if used >= self.config.max_attempts {
            entry.failures.clear();
            entry.locked_until = Some(deadline(now, self.config.lockout));
            return Ok(0);
        }
        Ok(self.config.max_attempts - used)
    }

    /// Forget every failure recorded for `key`.
    pub fn record_success(&self, key: &str) {
        self.attempts.lock().remove(key);
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.attempts.lock().len()
    }

    /// Whether no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The key a login attempt is counted under.
///
/// The first `X-Forwarded-For` hop when proxy headers are trusted, else the
/// socket address, else `"unknown"`.
pub fn client_key(headers: &HeaderMap, peer: Option<SocketAddr>, trust_proxy_headers: bool) -> String {
    if trust_proxy_headers {
        let forwarded = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .filter(|v| !v.is_empty());
        if let Some(hop) = forwarded {
            return hop.to_string();
        }
    }
    peer.map(|addr| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

/// Whole seconds a client must wait, rounded up and at least one.
pub fn retry_after_secs(remaining: Duration) -> u64 {
    let secs = remaining.as_secs() + u64::from(remaining.subsec_nanos() > 0);
    secs.max(1)
}
