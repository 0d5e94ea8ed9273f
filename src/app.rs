//! Mining App Facade
//!
//! Wires the components together the way the screens use them. Each UI
//! intent is one method here. The 1 Hz tickers driving the mining countdown
//! and the box-round cooldown are owned by the app and cancelled on
//! [`MiningApp::shutdown`] or drop.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument};

use crate::ads::mediation::{DeclineReason, MediationEngine, MediationOutcome};
use crate::config::model::AdType;
use crate::core::clock::Clock;
use crate::core::rng::RewardRng;
use crate::core::ticker::{TickControl, Ticker};
use crate::core::timer::TimerState;
use crate::game::boost::TimeBoost;
use crate::game::gift::{DailyGift, GiftError, GIFT_COOLDOWN};
use crate::game::mining::{MiningConfig, MiningError, MiningSession, TICK};
use crate::game::reward_box::{BoxError, BoxRound, BoxRoundConfig, RewardBox, RoundPhase};
use crate::game::wallet::{Wallet, WalletError};
use crate::storage::KeyValueStore;

/// Time boost errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BoostError {
    /// The rewarded ad was not shown to completion.
    #[error("ad not completed: {0:?}")]
    AdNotCompleted(Option<DeclineReason>),

    /// Not enough coins.
    #[error(transparent)]
    Wallet(#[from] WalletError),
}

/// Game parameters.
#[derive(Debug, Clone)]
pub struct GameConfig {
    /// Mining session parameters.
    pub mining: MiningConfig,
    /// Box round parameters.
    pub boxes: BoxRoundConfig,
    /// Daily gift cooldown.
    pub gift_cooldown: Duration,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            mining: MiningConfig::default(),
            boxes: BoxRoundConfig::default(),
            gift_cooldown: GIFT_COOLDOWN,
        }
    }
}

/// Mining screen view.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningSnapshot {
    /// A session is running.
    pub active: bool,
    /// Time left (ms).
    pub remaining_ms: i64,
    /// Settled plus running earnings.
    pub total_earned: f64,
}

/// The client core.
pub struct MiningApp {
    ads: Arc<MediationEngine>,
    wallet: Wallet,
    mining: Arc<Mutex<MiningSession>>,
    boxes: Arc<Mutex<BoxRound>>,
    gift: Mutex<DailyGift>,
    mining_ticker: Mutex<Option<Ticker>>,
    box_ticker: Mutex<Option<Ticker>>,
}

impl MiningApp {
    /// Restore all persisted state. Tickers start with [`Self::resume`] or
    /// the first intent that needs one.
    pub async fn load(
        config: GameConfig,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ads: Arc<MediationEngine>,
    ) -> Self {
        let wallet = Wallet::load(store.clone()).await;
        let mut mining = MiningSession::new(config.mining, store.clone(), clock.clone());
        mining.reconcile_on_load().await;
        let boxes = BoxRound::load(config.boxes, store.clone(), clock.clone(), RewardRng::from_entropy()).await;
        let gift = DailyGift::load(config.gift_cooldown, store, clock, RewardRng::from_entropy()).await;

        Self {
            ads,
            wallet,
            mining: Arc::new(Mutex::new(mining)),
            boxes: Arc::new(Mutex::new(boxes)),
            gift: Mutex::new(gift),
            mining_ticker: Mutex::new(None),
            box_ticker: Mutex::new(None),
        }
    }

    /// Ad mediation engine.
    pub fn ads(&self) -> &Arc<MediationEngine> {
        &self.ads
    }

    /// Reconcile every timer against the wall clock (app start or return
    /// from background) and start the tickers that are needed.
    #[instrument(skip(self))]
    pub async fn resume(&self) {
        let mining = self.mining.lock().await.reconcile_on_load().await;
        if mining.is_running() {
            self.ensure_mining_ticker().await;
        }

        let phase = self.boxes.lock().await.reconcile_cooldown().await;
        if matches!(phase, RoundPhase::Cooldown { .. }) {
            self.ensure_box_ticker().await;
        }

        self.gift.lock().await.reconcile().await;
        info!("Resumed (mining {:?}, boxes {:?})", mining, phase);
    }

    /// Stop the tickers (screen torn down or app backgrounded).
    pub async fn shutdown(&self) {
        if let Some(mut ticker) = self.mining_ticker.lock().await.take() {
            ticker.cancel();
        }
        if let Some(mut ticker) = self.box_ticker.lock().await.take() {
            ticker.cancel();
        }
        debug!("App tickers stopped");
    }

    // =========================================================================
    // Mining
    // =========================================================================

    /// Start a mining session.
    pub async fn start_mining(&self) -> Result<TimerState, MiningError> {
        let state = self.mining.lock().await.start().await?;
        self.ensure_mining_ticker().await;
        Ok(state)
    }

    /// Mining screen state.
    pub async fn mining_snapshot(&self) -> MiningSnapshot {
        let mining = self.mining.lock().await;
        MiningSnapshot {
            active: mining.is_active(),
            remaining_ms: mining.remaining_ms(),
            total_earned: mining.total_earned(),
        }
    }

    /// Buy a time boost with a rewarded ad or with coins.
    #[instrument(skip(self))]
    pub async fn apply_time_boost(&self, boost: TimeBoost) -> Result<TimerState, BoostError> {
        match boost.price() {
            None => {
                let outcome = self.ads.show(AdType::Rewarded).await;
                if !outcome.success {
                    return Err(BoostError::AdNotCompleted(outcome.reason));
                }
            }
            Some(price) => {
                self.wallet.spend(price).await?;
            }
        }

        let state = self.mining.lock().await.add_boost(boost.duration()).await;
        self.ensure_mining_ticker().await;
        Ok(state)
    }

    // =========================================================================
    // Ads
    // =========================================================================

    /// Show an interstitial at a natural break.
    pub async fn show_interstitial(&self) -> MediationOutcome {
        self.ads.show(AdType::Interstitial).await
    }

    // =========================================================================
    // Rewards
    // =========================================================================

    /// Coin balance.
    pub async fn balance(&self) -> u64 {
        self.wallet.balance().await
    }

    /// Boxes of the current round.
    pub async fn boxes(&self) -> Vec<RewardBox> {
        self.boxes.lock().await.boxes().to_vec()
    }

    /// Open a reward box.
    pub async fn open_box(&self, index: usize) -> Result<u32, BoxError> {
        let (value, phase) = {
            let mut boxes = self.boxes.lock().await;
            let value = boxes.open_box(index).await?;
            (value, boxes.phase())
        };
        if matches!(phase, RoundPhase::Cooldown { .. }) {
            self.ensure_box_ticker().await;
        }
        Ok(value)
    }

    /// Claim an opened box. Returns the new balance.
    pub async fn claim_box(&self, index: usize) -> Result<u64, BoxError> {
        self.boxes.lock().await.claim(index, &self.wallet).await
    }

    /// Reveal the daily gift.
    pub async fn open_gift(&self) -> Result<u32, GiftError> {
        self.gift.lock().await.open()
    }

    /// Claim the daily gift. Returns the new balance.
    pub async fn claim_gift(&self) -> Result<u64, GiftError> {
        self.gift.lock().await.claim(&self.wallet).await
    }

    /// Daily gift cooldown, re-derived from the wall clock.
    pub async fn gift_cooldown(&self) -> TimerState {
        self.gift.lock().await.reconcile().await
    }

    async fn ensure_mining_ticker(&self) {
        let mut slot = self.mining_ticker.lock().await;
        if slot.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        let mining = self.mining.clone();
        *slot = Some(Ticker::spawn("mining", TICK, move || {
            let mining = mining.clone();
            async move {
                if mining.lock().await.tick().await.is_running() {
                    TickControl::Continue
                } else {
                    TickControl::Stop
                }
            }
        }));
    }

    async fn ensure_box_ticker(&self) {
        let mut slot = self.box_ticker.lock().await;
        if slot.as_ref().map_or(false, |t| !t.is_finished()) {
            return;
        }
        let boxes = self.boxes.clone();
        *slot = Some(Ticker::spawn("box-cooldown", TICK, move || {
            let boxes = boxes.clone();
            async move {
                match boxes.lock().await.reconcile_cooldown().await {
                    RoundPhase::Cooldown { .. } => TickControl::Continue,
                    _ => TickControl::Stop,
                }
            }
        }));
    }
}

// =============================================================================
// TESTS
// =============================================================================
