//! Daily Mystery Gift
//!
//! One gift per cooldown: opening reveals a random coin reward, claiming
//! credits it and starts a 24 hour cooldown.

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::{info, instrument};

use crate::core::clock::Clock;
use crate::core::rng::RewardRng;
use crate::core::timer::{PersistedTimer, TimerState};
use crate::game::reward_box::{REWARD_MAX, REWARD_MIN};
use crate::game::wallet::Wallet;
use crate::storage::{keys, KeyValueStore};

/// Wait between two gifts (24 hours).
pub const GIFT_COOLDOWN: Duration = Duration::from_secs(24 * 60 * 60);

/// Gift errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GiftError {
    /// The previous gift's cooldown is still running.
    #[error("gift cooling down for {remaining_ms} ms")]
    CoolingDown { remaining_ms: i64 },

    /// Claim without an opened gift.
    #[error("no gift opened")]
    NothingToClaim,
}

/// Daily gift state machine.
pub struct DailyGift {
    clock: Arc<dyn Clock>,
    timer: PersistedTimer,
    rng: RewardRng,
    /// Revealed, unclaimed reward.
    pending: Option<u32>,
    cooldown: TimerState,
}

impl DailyGift {
    /// Restore the gift cooldown from storage.
    pub async fn load(
        cooldown: Duration,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        rng: RewardRng,
    ) -> Self {
        let mut gift = Self {
            clock,
            timer: PersistedTimer::new(store, keys::GIFT_COOLDOWN_START, cooldown),
            rng,
            pending: None,
            cooldown: TimerState::Idle,
        };
        gift.reconcile().await;
        gift
    }

    /// Cooldown state.
    pub fn cooldown(&self) -> TimerState {
        self.cooldown
    }

    /// Revealed, unclaimed reward.
    pub fn pending(&self) -> Option<u32> {
        self.pending
    }

    /// Reveal the gift. Opening again before claiming shows the same reward.
    pub fn open(&mut self) -> Result<u32, GiftError> {
        if let TimerState::Running { remaining_ms, .. } = self.cooldown {
            return Err(GiftError::CoolingDown { remaining_ms });
        }
        let value = *self.pending.get_or_insert_with(|| self.rng.next_int_range(REWARD_MIN, REWARD_MAX));
        Ok(value)
    }

    /// Credit the revealed reward and start the cooldown. Returns the new
    /// balance.
    #[instrument(skip(self, wallet))]
    pub async fn claim(&mut self, wallet: &Wallet) -> Result<u64, GiftError> {
        let value = self.pending.take().ok_or(GiftError::NothingToClaim)?;
        let balance = wallet.credit(u64::from(value)).await;
        self.cooldown = self.timer.start(self.clock.now_ms()).await;
        info!("Claimed daily gift of {} coins", value);
        Ok(balance)
    }

    /// Re-derive the cooldown from the persisted start.
    pub async fn reconcile(&mut self) -> TimerState {
        self.cooldown = self.timer.reconcile(self.clock.now_ms(), |_| {
            info!("Daily gift available again");
        }).await;
        self.cooldown
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::storage::MemoryStore;

    async fn gift(store: &Arc<MemoryStore>, clock: &Arc<ManualClock>) -> DailyGift {
        DailyGift::load(GIFT_COOLDOWN, store.clone(), clock.clone(), RewardRng::new(99)).await
    }

    #[tokio::test]
    async fn test_open_claim_cooldown_cycle() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(5_000));
        let wallet = Wallet::load(store.clone()).await;
        let mut g = gift(&store, &clock).await;

        assert_eq!(g.claim(&wallet).await, Err(GiftError::NothingToClaim));

        let value = g.open().unwrap();
        assert_eq!(g.open(), Ok(value));
        assert_eq!(g.claim(&wallet).await, Ok(u64::from(value)));
        assert_eq!(store.peek(keys::GIFT_COOLDOWN_START).await, Some("5000".into()));

        assert!(matches!(g.open(), Err(GiftError::CoolingDown { .. })));

        clock.advance(GIFT_COOLDOWN);
        assert_eq!(g.reconcile().await, TimerState::Idle);
        assert!(g.open().is_ok());
    }

    #[tokio::test]
    async fn test_cooldown_survives_restart() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let wallet = Wallet::load(store.clone()).await;
        let mut g = gift(&store, &clock).await;
        g.open().unwrap();
        g.claim(&wallet).await.unwrap();

        clock.advance(Duration::from_secs(60 * 60));
        let restarted = gift(&store, &clock).await;
        assert_eq!(restarted.cooldown().remaining_ms(), 23 * 60 * 60 * 1000);
    }
}
