//! Process-wide probe state: the server status flag and the concurrency counters.
//!
//! Owned explicitly and handed to the ops tools, so every test can build its
//! own isolated instance.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerStatus {
    #[default]
    Active,
    Inactive,
}

impl ServerStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ServerStatus::Active => "active",
            ServerStatus::Inactive => "inactive",
        }
    }
}

/// Counter values as seen by one `concurrent_test` call before it releases.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConcurrencySnapshot {
    pub active_requests: u64,
    pub max_concurrent: u64,
}

#[derive(Debug, Default)]
pub struct ProbeState {
    status: Mutex<ServerStatus>,
    active_requests: AtomicU64,
    max_concurrent: AtomicU64,
}

impl ProbeState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn status(&self) -> ServerStatus {
        match self.status.lock() {
            Ok(guard) => *guard,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Stores the new status and returns it.
    pub fn set_status(&self, status: ServerStatus) -> ServerStatus {
        match self.status.lock() {
            Ok(mut guard) => *guard = status,
            Err(poisoned) => *poisoned.into_inner() = status,
        }
        status
    }

    pub fn active_requests(&self) -> u64 {
        self.active_requests.load(Ordering::SeqCst)
    }

    pub fn max_concurrent(&self) -> u64 {
        self.max_concurrent.load(Ordering::SeqCst)
    }

    /// Registers one in-flight probe call. The returned guard decrements the
    /// counter on drop, so cancelled calls release their slot as well.
    pub fn enter(&self) -> ConcurrencyGuard<'_> {
        let active = self.active_requests.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_concurrent.fetch_max(active, Ordering::SeqCst);
        ConcurrencyGuard { state: self }
    }
}

#[must_use = "dropping the guard releases the concurrency slot immediately"]
#[derive(Debug)]
pub struct ConcurrencyGuard<'a> {
    state: &'a ProbeState,
}

impl ConcurrencyGuard<'_> {
    pub fn snapshot(&self) -> ConcurrencySnapshot {
        ConcurrencySnapshot {
            active_requests: self.state.active_requests(),
            max_concurrent: self.state.max_concurrent(),
        }
    }
}

impl Drop for ConcurrencyGuard<'_> {
    fn drop(&mut self) {
        // Only guards decrement, and each guard was preceded by an increment.
        let _ = self
            .state
            .active_requests
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |current| {
                current.checked_sub(1)
            });
    }
}
