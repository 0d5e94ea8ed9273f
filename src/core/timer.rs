//! Persisted Elapsed-Time Timer
//!
//! One primitive shared by every restart-surviving countdown in the client
//! (mining session, daily gift cooldown, box-round cooldown). Only the start
//! timestamp (and optionally an extended length) is persisted; the remaining
//! time is always derived from "now".
//!
//! ```text
//!   start(now) ──► persisted startedAt
//!                       │
//!   reconcile(now) ─────┤ elapsed = now - startedAt
//!                       ├── elapsed <  length ──► Running { remaining }
//!                       └── elapsed >= length ──► clear keys, on_expire(..), Idle
//! ```

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::core::clock::{duration_ms, Timestamp};
use crate::storage::{read_or_absent, remove_or_log, write_or_log, KeyValueStore};

/// Derived timer state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerState {
    /// No persisted start.
    Idle,
    /// Counting down.
    Running {
        /// Persisted start timestamp.
        started_at: Timestamp,
        /// Effective length of this run (ms).
        length_ms: i64,
        /// Time left (ms), always > 0.
        remaining_ms: i64,
    },
}

impl TimerState {
    /// Remaining milliseconds, zero when idle.
    pub fn remaining_ms(&self) -> i64 {
        match self {
            TimerState::Idle => 0,
            TimerState::Running { remaining_ms, .. } => *remaining_ms,
        }
    }

    /// Check if the timer is running.
    pub fn is_running(&self) -> bool {
        matches!(self, TimerState::Running { .. })
    }
}

/// Details of a run that expired while nobody was watching.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Expiry {
    /// Persisted start timestamp.
    pub started_at: Timestamp,
    /// Effective length of the run (ms).
    pub length_ms: i64,
    /// Wall-clock time since start (ms).
    pub elapsed_ms: i64,
}

impl Expiry {
    /// Elapsed time clamped to the run length.
    pub fn credited_ms(&self) -> i64 {
        self.elapsed_ms.min(self.length_ms)
    }
}

/// A countdown persisted as a start timestamp.
#[derive(Clone)]
pub struct PersistedTimer {
    store: Arc<dyn KeyValueStore>,
    start_key: &'static str,
    length_key: Option<&'static str>,
    duration: Duration,
}

impl std::fmt::Debug for PersistedTimer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PersistedTimer")
            .field("start_key", &self.start_key)
            .field("length_key", &self.length_key)
            .field("duration", &self.duration)
            .finish()
    }
}

impl PersistedTimer {
    /// Create a timer with a fixed duration.
    pub fn new(store: Arc<dyn KeyValueStore>, start_key: &'static str, duration: Duration) -> Self {
        Self {
            store,
            start_key,
            length_key: None,
            duration,
        }
    }

    /// Allow runs to be extended past the fixed duration; the extended
    /// length is persisted under `key`.
    pub fn with_length_key(mut self, key: &'static str) -> Self {
        self.length_key = Some(key);
        self
    }

    /// Fixed duration of a run.
    pub fn duration(&self) -> Duration {
        self.duration
    }

    /// Start a run of the fixed duration at `now`.
    pub async fn start(&self, now: Timestamp) -> TimerState {
        self.start_with_length(now, duration_ms(self.duration)).await
    }

    /// Start a run of `length_ms` at `now`.
    pub async fn start_with_length(&self, now: Timestamp, length_ms: i64) -> TimerState {
        write_or_log(self.store.as_ref(), self.start_key, now.to_string()).await;
        self.persist_length(length_ms).await;
        debug!("Timer {} started at {} for {} ms", self.start_key, now, length_ms);

        TimerState::Running {
            started_at: now,
            length_ms,
            remaining_ms: length_ms,
        }
    }

    /// Change the length of the current run.
    pub async fn extend(&self, started_at: Timestamp, length_ms: i64, now: Timestamp) -> TimerState {
        self.persist_length(length_ms).await;
        let remaining_ms = length_ms - (now - started_at).max(0);
        TimerState::Running {
            started_at,
            length_ms,
            remaining_ms,
        }
    }

    /// Rebuild state from storage.
    ///
    /// If the persisted run has expired, the keys are cleared and `on_expire`
    /// is called exactly once before returning [`TimerState::Idle`].
    pub async fn reconcile<F>(&self, now: Timestamp, on_expire: F) -> TimerState
    where
        F: FnOnce(Expiry),
    {
        let Some(raw) = read_or_absent(self.store.as_ref(), self.start_key).await else {
            return TimerState::Idle;
        };

        let started_at = match raw.trim().parse::<Timestamp>() {
            Ok(ts) => ts,
            Err(e) => {
                warn!("Discarding unreadable {} value {:?}: {}", self.start_key, raw, e);
                self.clear().await;
                return TimerState::Idle;
            }
        };

        let length_ms = self.load_length().await;
        // A start in the future (clock moved backwards) counts as just started
        let elapsed_ms = (now - started_at).max(0);

        if elapsed_ms >= length_ms {
            self.clear().await;
            debug!("Timer {} expired {} ms ago", self.start_key, elapsed_ms - length_ms);
            on_expire(Expiry {
                started_at,
                length_ms,
                elapsed_ms,
            });
            TimerState::Idle
        } else {
            TimerState::Running {
                started_at,
                length_ms,
                remaining_ms: length_ms - elapsed_ms,
            }
        }
    }

    /// Remove the persisted run.
    pub async fn clear(&self) {
        match self.length_key {
            Some(length_key) => remove_or_log(self.store.as_ref(), &[self.start_key, length_key]).await,
            None => remove_or_log(self.store.as_ref(), &[self.start_key]).await,
        }
    }

    async fn persist_length(&self, length_ms: i64) {
        let Some(length_key) = self.length_key else {
            return;
        };
        if length_ms == duration_ms(self.duration) {
            remove_or_log(self.store.as_ref(), &[length_key]).await;
        } else {
            write_or_log(self.store.as_ref(), length_key, length_ms.to_string()).await;
        }
    }

    async fn load_length(&self) -> i64 {
        let fixed = duration_ms(self.duration);
        let Some(length_key) = self.length_key else {
            return fixed;
        };
        match read_or_absent(self.store.as_ref(), length_key).await {
            Some(raw) => raw.trim().parse::<i64>().unwrap_or_else(|e| {
                warn!("Ignoring unreadable {} value {:?}: {}", length_key, raw, e);
                fixed
            }),
            None => fixed,
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;

    const KEY: &str = "timerStart";
    const LENGTH_KEY: &str = "timerLength";

    fn timer(store: &Arc<MemoryStore>) -> PersistedTimer {
        PersistedTimer::new(store.clone(), KEY, Duration::from_secs(60))
    }

    #[tokio::test]
    async fn test_idle_without_persisted_start() {
        let store = Arc::new(MemoryStore::new());
        let state = timer(&store).reconcile(0, |_| panic!("no expiry")).await;
        assert_eq!(state, TimerState::Idle);
    }

    #[tokio::test]
    async fn test_start_then_reconcile_zero_elapsed() {
        let store = Arc::new(MemoryStore::new());
        let t = timer(&store);
        t.start(1_000).await;

        let state = t.reconcile(1_000, |_| panic!("no expiry")).await;
        assert_eq!(state.remaining_ms(), 60_000);
    }

    #[tokio::test]
    async fn test_reconcile_is_idempotent() {
        let store = Arc::new(MemoryStore::new());
        let t = timer(&store);
        t.start(0).await;

        let a = t.reconcile(15_000, |_| {}).await;
        let b = t.reconcile(15_000, |_| {}).await;
        assert_eq!(a, b);
        assert_eq!(a.remaining_ms(), 45_000);
    }

    #[tokio::test]
    async fn test_expiry_clears_and_calls_back_once() {
        let store = Arc::new(MemoryStore::new());
        let t = timer(&store);
        t.start(0).await;

        let mut seen = None;
        let state = t.reconcile(90_000, |e| seen = Some(e)).await;

        assert_eq!(state, TimerState::Idle);
        let expiry = seen.unwrap();
        assert_eq!(expiry.elapsed_ms, 90_000);
        assert_eq!(expiry.credited_ms(), 60_000);
        assert_eq!(store.peek(KEY).await, None);

        // Second reconcile sees nothing left to expire
        let state = t.reconcile(90_000, |_| panic!("already expired")).await;
        assert_eq!(state, TimerState::Idle);
    }

    #[tokio::test]
    async fn test_expiry_boundary_is_inclusive() {
        let store = Arc::new(MemoryStore::new());
        let t = timer(&store);
        t.start(0).await;

        assert!(t.reconcile(59_999, |_| {}).await.is_running());
        assert!(!t.reconcile(60_000, |_| {}).await.is_running());
    }

    #[tokio::test]
    async fn test_extended_length_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let t = timer(&store).with_length_key(LENGTH_KEY);
        t.start(0).await;
        t.extend(0, 120_000, 10_000).await;

        // Fresh timer instance, as after a process restart
        let restarted = timer(&store).with_length_key(LENGTH_KEY);
        let state = restarted.reconcile(70_000, |_| {}).await;
        assert_eq!(state.remaining_ms(), 50_000);

        restarted.reconcile(120_000, |_| {}).await;
        assert_eq!(store.peek(LENGTH_KEY).await, None);
    }

    #[tokio::test]
    async fn test_garbage_start_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store.set(KEY, "not-a-number".into()).await.unwrap();

        let state = timer(&store).reconcile(0, |_| panic!("no expiry")).await;
        assert_eq!(state, TimerState::Idle);
        assert_eq!(store.peek(KEY).await, None);
    }

    #[tokio::test]
    async fn test_read_failure_is_idle() {
        let store = Arc::new(MemoryStore::new());
        let t = timer(&store);
        t.start(0).await;
        store.fail_reads(true);

        assert_eq!(t.reconcile(1_000, |_| {}).await, TimerState::Idle);
    }
}
