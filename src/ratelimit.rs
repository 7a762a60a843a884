use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Opaque requester key used for admission control.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity(String);

impl Identity {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<i64> for Identity {
    fn from(user_id: i64) -> Self {
        Self(format!("user:{}", user_id))
    }
}

impl From<IpAddr> for Identity {
    fn from(addr: IpAddr) -> Self {
        Self(format!("ip:{}", addr))
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sliding-window admission control keyed by [`Identity`].
///
/// Each identity keeps the timestamps of its accepted requests inside the
/// trailing window. Prune, count and append happen under one lock, so two
/// concurrent calls for the same identity can never both take the last slot.
/// The critical section never awaits, which keeps cross-identity contention
/// to a few map operations.
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    windows: Mutex<HashMap<Identity, VecDeque<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            windows: Mutex::new(HashMap::new()),
        }
    }

    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    /// Admit or reject a request from `identity` at `now`.
    pub fn admit(&self, identity: &Identity, now: Instant) -> bool {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let entries = windows.entry(identity.clone()).or_default();
        prune(entries, now, self.window);

        if entries.len() >= self.max_requests {
            return false;
        }

        entries.push_back(now);
        true
    }

    /// Drop identities with no activity inside the window.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut windows = match self.windows.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let before = windows.len();
        windows.retain(|_, entries| {
            prune(entries, now, self.window);
            !entries.is_empty()
        });
        before - windows.len()
    }

    /// Number of identities currently tracked.
    pub fn tracked(&self) -> usize {
        match self.windows.lock() {
            Ok(guard) => guard.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new(5, Duration::from_secs(60))
    }
}

// Entries are appended in call order, so the oldest is always at the front.
fn prune(entries: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = entries.front() {
        if now.saturating_duration_since(*oldest) >= window {
            entries.pop_front();
        } else {
            break;
        }
    }
}
