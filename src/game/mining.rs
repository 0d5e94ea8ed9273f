//! Mining Session
//!
//! A timed session earning coins linearly. The session survives restarts as
//! a persisted start timestamp (plus the boosted length, if any):
//!
//! ```text
//!   Idle ──start()/add_boost()──► Active ──tick() x N──► Idle (settled)
//!                                   │
//!   restart ──reconcile_on_load()───┴── expired while closed ──► Idle (settled)
//! ```
//!
//! Earnings of finished sessions are settled into `totalEarned`; earnings of
//! the running session accrue in memory and are only settled (and rounded)
//! when the session ends.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::clock::{duration_ms, Clock};
use crate::core::timer::{PersistedTimer, TimerState};
use crate::storage::{keys, read_or_absent, write_or_log, KeyValueStore};

/// Length of an unboosted session (3 minutes).
pub const MINING_DURATION: Duration = Duration::from_secs(180);

/// Remaining time can never be boosted past this (2 hours).
pub const MAX_TIME_BOOST: Duration = Duration::from_secs(2 * 60 * 60);

/// Decimal places kept when persisting earnings.
pub const EARNINGS_DECIMALS: i32 = 6;

/// Tick period.
pub const TICK: Duration = Duration::from_secs(1);

/// Mining errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MiningError {
    /// A session is already running.
    #[error("mining session already active")]
    AlreadyActive,
}

/// Mining parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct MiningConfig {
    /// Unboosted session length.
    pub duration: Duration,
    /// Cap on remaining time after a boost.
    pub max_boost: Duration,
    /// Coins earned per second of mining.
    pub earn_rate_per_sec: f64,
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            duration: MINING_DURATION,
            max_boost: MAX_TIME_BOOST,
            // One coin per full session
            earn_rate_per_sec: 1.0 / MINING_DURATION.as_secs_f64(),
        }
    }
}

/// Mining session reconciler.
pub struct MiningSession {
    config: MiningConfig,
    timer: PersistedTimer,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    state: TimerState,
    /// Earnings of finished sessions.
    settled: f64,
    /// Earnings of the running session.
    accrued: f64,
}

impl MiningSession {
    /// Create an idle session. Call [`Self::reconcile_on_load`] to pick up
    /// persisted state.
    pub fn new(config: MiningConfig, store: Arc<dyn KeyValueStore>, clock: Arc<dyn Clock>) -> Self {
        let timer = PersistedTimer::new(store.clone(), keys::MINING_SESSION_START, config.duration)
            .with_length_key(keys::MINING_SESSION_LENGTH);
        Self {
            config,
            timer,
            store,
            clock,
            state: TimerState::Idle,
            settled: 0.0,
            accrued: 0.0,
        }
    }

    /// Current state.
    pub fn state(&self) -> TimerState {
        self.state
    }

    /// Check if a session is running.
    pub fn is_active(&self) -> bool {
        self.state.is_running()
    }

    /// Remaining time of the running session (ms), zero when idle.
    pub fn remaining_ms(&self) -> i64 {
        self.state.remaining_ms()
    }

    /// Settled plus running earnings.
    pub fn total_earned(&self) -> f64 {
        self.settled + self.accrued
    }

    /// Start a session. Only valid while idle.
    #[instrument(skip(self))]
    pub async fn start(&mut self) -> Result<TimerState, MiningError> {
        if self.is_active() {
            return Err(MiningError::AlreadyActive);
        }
        self.accrued = 0.0;
        self.state = self.timer.start(self.clock.now_ms()).await;
        info!("Mining session started ({} ms)", self.state.remaining_ms());
        Ok(self.state)
    }

    /// Rebuild state from storage after a (re)start.
    ///
    /// A session that ran out while the app was closed is settled with its
    /// full length; a running one resumes with the time it earned while
    /// closed credited.
    #[instrument(skip(self))]
    pub async fn reconcile_on_load(&mut self) -> TimerState {
        let now = self.clock.now_ms();
        self.settled = self.load_settled().await;
        self.accrued = 0.0;

        let mut expired = None;
        self.state = self.timer.reconcile(now, |expiry| expired = Some(expiry)).await;

        if let Some(expiry) = expired {
            let earned = self.earnings_for(expiry.credited_ms());
            self.settled += earned;
            self.persist_settled().await;
            info!("Mining session expired while closed, settled {:.6} coins", earned);
        } else if let TimerState::Running { length_ms, remaining_ms, .. } = self.state {
            self.accrued = self.earnings_for(length_ms - remaining_ms);
            debug!("Mining session resumed with {} ms left", remaining_ms);
        }

        self.state
    }

    /// Advance the running session by one tick.
    pub async fn tick(&mut self) -> TimerState {
        let TimerState::Running { started_at, length_ms, remaining_ms } = self.state else {
            return self.state;
        };

        let step = duration_ms(TICK);
        let remaining_ms = remaining_ms - step;
        self.accrued += self.earnings_for(step);

        if remaining_ms <= 0 {
            self.settle().await;
        } else {
            self.state = TimerState::Running {
                started_at,
                length_ms,
                remaining_ms,
            };
        }
        self.state
    }

    /// Add mining time. Starts a session when idle. The remaining time is
    /// capped at `max_boost`.
    #[instrument(skip(self))]
    pub async fn add_boost(&mut self, amount: Duration) -> TimerState {
        let now = self.clock.now_ms();
        let cap = duration_ms(self.config.max_boost);
        let amount = duration_ms(amount);

        self.state = match self.state {
            TimerState::Running { started_at, remaining_ms, .. } => {
                let boosted = (remaining_ms + amount).min(cap);
                let elapsed = (now - started_at).max(0);
                self.timer.extend(started_at, elapsed + boosted, now).await
            }
            TimerState::Idle => {
                self.accrued = 0.0;
                self.timer.start_with_length(now, amount.min(cap)).await
            }
        };
        info!("Mining boosted, {} ms left", self.state.remaining_ms());
        self.state
    }

    fn earnings_for(&self, ms: i64) -> f64 {
        ms as f64 / 1000.0 * self.config.earn_rate_per_sec
    }

    async fn settle(&mut self) {
        self.settled += self.accrued;
        info!("Mining session finished, earned {:.6} coins", self.accrued);
        self.accrued = 0.0;
        self.state = TimerState::Idle;
        self.persist_settled().await;
        self.timer.clear().await;
    }

    async fn load_settled(&self) -> f64 {
        let Some(raw) = read_or_absent(self.store.as_ref(), keys::MINING_TOTAL_EARNED).await else {
            return 0.0;
        };
        match raw.trim().parse::<f64>() {
            Ok(value) if value.is_finite() && value >= 0.0 => value,
            _ => {
                warn!("Discarding unreadable earnings {:?}", raw);
                0.0
            }
        }
    }

    async fn persist_settled(&self) {
        let value = round_to(self.settled, EARNINGS_DECIMALS);
        write_or_log(self.store.as_ref(), keys::MINING_TOTAL_EARNED, value.to_string()).await;
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

// =============================================================================
// TESTS
// =============================================================================
