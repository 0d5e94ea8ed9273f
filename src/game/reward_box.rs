//! Reward Box Round
//!
//! A round of face-down boxes. The player may open a limited number of them;
//! each open draws a random coin reward which is credited only when claimed.
//! Opening the last allowed box starts a cooldown, after which the round
//! resets.
//!
//! ```text
//!   Playable ──open (opened == max_opens)──► Cooldown ──elapsed──► Playable (fresh boxes)
//! ```

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::clock::Clock;
use crate::core::rng::RewardRng;
use crate::core::timer::{PersistedTimer, TimerState};
use crate::game::wallet::Wallet;
use crate::storage::{keys, read_or_absent, remove_or_log, write_or_log, KeyValueStore};

/// Smallest reward a box or gift can hold.
pub const REWARD_MIN: u32 = 10;

/// Largest reward a box or gift can hold.
pub const REWARD_MAX: u32 = 200;

/// Box round errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoxError {
    /// No box with this index.
    #[error("box {index} out of range (round has {len})")]
    OutOfRange { index: usize, len: usize },

    /// The box was already opened this round.
    #[error("box {0} already opened")]
    AlreadyOpened(usize),

    /// All allowed opens of this round are used.
    #[error("round exhausted")]
    RoundExhausted,

    /// The box has not been opened.
    #[error("box {0} not opened")]
    NotOpened(usize),

    /// The box reward was already claimed.
    #[error("box {0} already claimed")]
    AlreadyClaimed(usize),
}

/// Round parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoxRoundConfig {
    /// Boxes per round.
    pub box_count: usize,
    /// Opens allowed per round.
    pub max_opens: usize,
    /// Wait between rounds.
    pub cooldown: Duration,
}

impl Default for BoxRoundConfig {
    fn default() -> Self {
        Self {
            box_count: 4,
            max_opens: 3,
            cooldown: Duration::from_secs(30 * 60),
        }
    }
}

/// One box. Persisted as part of the box list.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardBox {
    /// Reward drawn at open time; zero while closed.
    pub value: u32,
    /// Box was opened this round.
    pub opened: bool,
    /// Reward was credited.
    #[serde(default)]
    pub claimed: bool,
}

/// Round-level state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundPhase {
    /// Boxes can be opened.
    Playable,
    /// All opens used but no cooldown recorded.
    Exhausted,
    /// Waiting for the next round.
    Cooldown { remaining_ms: i64 },
}

/// Reward box round state machine.
pub struct BoxRound {
    config: BoxRoundConfig,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    timer: PersistedTimer,
    rng: RewardRng,
    boxes: Vec<RewardBox>,
    cooldown: TimerState,
}

impl BoxRound {
    /// Restore the round from storage and reconcile its cooldown.
    pub async fn load(
        config: BoxRoundConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        rng: RewardRng,
    ) -> Self {
        let timer = PersistedTimer::new(store.clone(), keys::BOX_COOLDOWN_START, config.cooldown);
        let boxes = load_boxes(store.as_ref(), config.box_count).await;
        let mut round = Self {
            config,
            store,
            clock,
            timer,
            rng,
            boxes,
            cooldown: TimerState::Idle,
        };
        round.reconcile_cooldown().await;
        round
    }

    /// Boxes of the current round.
    pub fn boxes(&self) -> &[RewardBox] {
        &self.boxes
    }

    /// Boxes opened this round.
    pub fn opened_count(&self) -> usize {
        self.boxes.iter().filter(|b| b.opened).count()
    }

    /// Current phase.
    pub fn phase(&self) -> RoundPhase {
        match self.cooldown {
            TimerState::Running { remaining_ms, .. } => RoundPhase::Cooldown { remaining_ms },
            TimerState::Idle if self.opened_count() >= self.config.max_opens => RoundPhase::Exhausted,
            TimerState::Idle => RoundPhase::Playable,
        }
    }

    /// Open a box and draw its reward.
    ///
    /// Rejected opens leave state and storage untouched.
    #[instrument(skip(self))]
    pub async fn open_box(&mut self, index: usize) -> Result<u32, BoxError> {
        if self.phase() != RoundPhase::Playable {
            return Err(BoxError::RoundExhausted);
        }
        let len = self.boxes.len();
        let target = self.boxes.get_mut(index).ok_or(BoxError::OutOfRange { index, len })?;
        if target.opened {
            return Err(BoxError::AlreadyOpened(index));
        }

        let value = self.rng.next_int_range(REWARD_MIN, REWARD_MAX);
        target.value = value;
        target.opened = true;
        self.persist_boxes().await;
        info!("Opened box {} for {} coins", index, value);

        if self.opened_count() >= self.config.max_opens {
            self.start_cooldown().await;
        }
        Ok(value)
    }

    /// Credit an opened box's reward. Returns the new balance.
    #[instrument(skip(self, wallet))]
    pub async fn claim(&mut self, index: usize, wallet: &Wallet) -> Result<u64, BoxError> {
        let len = self.boxes.len();
        let target = self.boxes.get_mut(index).ok_or(BoxError::OutOfRange { index, len })?;
        if !target.opened {
            return Err(BoxError::NotOpened(index));
        }
        if target.claimed {
            return Err(BoxError::AlreadyClaimed(index));
        }

        target.claimed = true;
        let value = target.value;
        self.persist_boxes().await;
        Ok(wallet.credit(u64::from(value)).await)
    }

    /// Reset the round if its cooldown has elapsed.
    pub async fn reconcile_cooldown(&mut self) -> RoundPhase {
        let mut expired = false;
        self.cooldown = self.timer.reconcile(self.clock.now_ms(), |_| expired = true).await;

        if expired {
            self.boxes = vec![RewardBox::default(); self.config.box_count];
            remove_or_log(self.store.as_ref(), &[keys::BOX_LIST]).await;
            info!("Box round cooldown over, new round");
        } else if self.phase() == RoundPhase::Exhausted {
            // Cooldown start was lost (failed write); start it now
            warn!("Exhausted box round without cooldown, starting one");
            self.start_cooldown().await;
        }
        self.phase()
    }

    async fn start_cooldown(&mut self) {
        self.cooldown = self.timer.start(self.clock.now_ms()).await;
        info!("Box round exhausted, cooldown {:?}", self.config.cooldown);
    }

    async fn persist_boxes(&self) {
        match serde_json::to_string(&self.boxes) {
            Ok(json) => {
                write_or_log(self.store.as_ref(), keys::BOX_LIST, json).await;
            }
            Err(e) => warn!("Failed to encode box list: {}", e),
        }
    }
}

async fn load_boxes(store: &dyn KeyValueStore, box_count: usize) -> Vec<RewardBox> {
    let fresh = || vec![RewardBox::default(); box_count];
    let Some(raw) = read_or_absent(store, keys::BOX_LIST).await else {
        return fresh();
    };
    match serde_json::from_str::<Vec<RewardBox>>(&raw) {
        Ok(boxes) if boxes.len() == box_count => {
            debug!("Restored box round");
            boxes
        }
        Ok(boxes) => {
            warn!("Discarding box list of {} boxes (expected {})", boxes.len(), box_count);
            fresh()
        }
        Err(e) => {
            warn!("Discarding unreadable box list: {}", e);
            fresh()
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::storage::MemoryStore;

    fn four_opens() -> BoxRoundConfig {
        BoxRoundConfig {
            max_opens: 4,
            ..Default::default()
        }
    }

    async fn round(
        config: BoxRoundConfig,
        store: &Arc<MemoryStore>,
        clock: &Arc<ManualClock>,
    ) -> BoxRound {
        BoxRound::load(config, store.clone(), clock.clone(), RewardRng::new(7)).await
    }

    fn setup() -> (Arc<MemoryStore>, Arc<ManualClock>) {
        (Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(1_000_000)))
    }

    #[tokio::test]
    async fn test_open_draws_reward_in_range() {
        let (store, clock) = setup();
        let mut r = round(BoxRoundConfig::default(), &store, &clock).await;

        let value = r.open_box(2).await.unwrap();
        assert!((REWARD_MIN..=REWARD_MAX).contains(&value));
        assert_eq!(r.boxes()[2], RewardBox { value, opened: true, claimed: false });
        assert_eq!(r.open_box(2).await, Err(BoxError::AlreadyOpened(2)));
        assert_eq!(r.open_box(9).await, Err(BoxError::OutOfRange { index: 9, len: 4 }));
    }

    #[tokio::test]
    async fn test_exhaustion_starts_cooldown_and_blocks_opens() {
        let (store, clock) = setup();
        let mut r = round(four_opens(), &store, &clock).await;

        for index in 0..4 {
            r.open_box(index).await.unwrap();
        }
        assert!(matches!(r.phase(), RoundPhase::Cooldown { .. }));
        assert_eq!(store.peek(keys::BOX_COOLDOWN_START).await, Some("1000000".into()));

        let boxes = r.boxes().to_vec();
        let writes = store.write_count();
        assert_eq!(r.open_box(0).await, Err(BoxError::RoundExhausted));
        assert_eq!(r.boxes(), boxes.as_slice());
        assert_eq!(store.write_count(), writes);
    }

    #[tokio::test]
    async fn test_round_survives_restart() {
        let (store, clock) = setup();
        let mut r = round(BoxRoundConfig::default(), &store, &clock).await;
        let value = r.open_box(1).await.unwrap();

        let restored = round(BoxRoundConfig::default(), &store, &clock).await;
        assert_eq!(restored.opened_count(), 1);
        assert_eq!(restored.boxes()[1].value, value);
        assert_eq!(restored.phase(), RoundPhase::Playable);
    }

    #[tokio::test]
    async fn test_cooldown_expiry_resets_round() {
        let (store, clock) = setup();
        let config = BoxRoundConfig::default();
        let mut r = round(config.clone(), &store, &clock).await;
        for index in 0..3 {
            r.open_box(index).await.unwrap();
        }

        clock.advance(config.cooldown - Duration::from_millis(1));
        assert_eq!(r.reconcile_cooldown().await, RoundPhase::Cooldown { remaining_ms: 1 });

        clock.advance(Duration::from_millis(1));
        let mut restarted = round(config, &store, &clock).await;
        assert_eq!(restarted.phase(), RoundPhase::Playable);
        assert_eq!(restarted.opened_count(), 0);
        assert_eq!(store.peek(keys::BOX_LIST).await, None);
        assert!(restarted.open_box(0).await.is_ok());
    }

    #[tokio::test]
    async fn test_claim_credits_wallet_once() {
        let (store, clock) = setup();
        let wallet = Wallet::load(store.clone()).await;
        let mut r = round(BoxRoundConfig::default(), &store, &clock).await;

        assert_eq!(r.claim(0, &wallet).await, Err(BoxError::NotOpened(0)));
        let value = r.open_box(0).await.unwrap();
        assert_eq!(wallet.balance().await, 0);

        assert_eq!(r.claim(0, &wallet).await, Ok(u64::from(value)));
        assert_eq!(r.claim(0, &wallet).await, Err(BoxError::AlreadyClaimed(0)));
        assert_eq!(wallet.balance().await, u64::from(value));
    }

    #[tokio::test]
    async fn test_unclaimed_open_counts_against_limit() {
        let (store, clock) = setup();
        let mut r = round(BoxRoundConfig::default(), &store, &clock).await;
        for index in 0..3 {
            r.open_box(index).await.unwrap();
        }
        assert_eq!(r.open_box(3).await, Err(BoxError::RoundExhausted));
    }

    #[tokio::test]
    async fn test_lost_cooldown_is_restarted() {
        let (store, clock) = setup();
        let opened = vec![RewardBox { value: 10, opened: true, claimed: false }; 3]
            .into_iter()
            .chain(std::iter::once(RewardBox::default()))
            .collect::<Vec<_>>();
        store.set(keys::BOX_LIST, serde_json::to_string(&opened).unwrap()).await.unwrap();

        let r = round(BoxRoundConfig::default(), &store, &clock).await;
        assert!(matches!(r.phase(), RoundPhase::Cooldown { .. }));
        assert!(store.peek(keys::BOX_COOLDOWN_START).await.is_some());
    }

    #[tokio::test]
    async fn test_legacy_and_garbage_lists() {
        let (store, clock) = setup();
        store.set(
            keys::BOX_LIST,
            r#"[{"value":12,"opened":true},{"value":0,"opened":false},{"value":0,"opened":false},{"value":0,"opened":false}]"#.into(),
        ).await.unwrap();
        let r = round(BoxRoundConfig::default(), &store, &clock).await;
        assert_eq!(r.boxes()[0], RewardBox { value: 12, opened: true, claimed: false });

        store.set(keys::BOX_LIST, "[1,2".into()).await.unwrap();
        let r = round(BoxRoundConfig::default(), &store, &clock).await;
        assert_eq!(r.opened_count(), 0);
    }
}
