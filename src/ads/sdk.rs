//! Ad SDK Surface
//!
//! The shape every third-party ad SDK is wrapped into. Only the adapters in
//! [`crate::ads::adapter`] depend on these types directly.
//!
//! SDK listeners are modelled as a broadcast channel per ad instance: a
//! receiver obtained with [`SdkAd::subscribe`] is the listener, dropping it
//! unsubscribes.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::config::model::NetworkId;

/// Reward granted by a completed rewarded ad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardPayload {
    /// Reward amount.
    pub amount: u32,
    /// Reward currency.
    #[serde(rename = "type")]
    pub kind: String,
}

impl RewardPayload {
    /// Reward in coins.
    pub fn coins(amount: u32) -> Self {
        Self {
            amount,
            kind: "coins".into(),
        }
    }
}

impl Default for RewardPayload {
    /// Granted when the SDK confirms completion without a payload.
    fn default() -> Self {
        Self::coins(1)
    }
}

/// Lifecycle events emitted by an SDK ad instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AdEvent {
    /// Payload fetched; the ad can be shown.
    Loaded,
    /// Payload fetch failed.
    Error(String),
    /// The user earned the reward (rewarded ads only).
    EarnedReward(Option<RewardPayload>),
    /// The ad was dismissed.
    Closed,
}

/// SDK errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SdkError {
    /// SDK initialization failed.
    #[error("init failed: {0}")]
    Init(String),

    /// Ad instance could not be created.
    #[error("create failed: {0}")]
    Create(String),

    /// Show was called without a loaded payload.
    #[error("ad not loaded")]
    NotLoaded,

    /// Show failed inside the SDK.
    #[error("show failed: {0}")]
    Show(String),
}

/// One ad network SDK.
#[async_trait]
pub trait AdSdk: Send + Sync {
    /// Network this SDK serves.
    fn network(&self) -> NetworkId;

    /// Initialize the SDK. Called once before any ad is created.
    async fn init(&self) -> Result<(), SdkError>;

    /// Create an interstitial ad instance.
    fn create_interstitial(&self, unit_id: &str) -> Result<Arc<dyn SdkAd>, SdkError>;

    /// Create a rewarded ad instance.
    fn create_rewarded(&self, unit_id: &str) -> Result<Arc<dyn SdkAd>, SdkError>;
}

/// One SDK ad instance.
pub trait SdkAd: Send + Sync {
    /// Start fetching a payload; completion is reported as
    /// [`AdEvent::Loaded`] or [`AdEvent::Error`].
    fn load(&self);

    /// True iff a payload is loaded and not yet shown.
    fn is_loaded(&self) -> bool;

    /// Listen to lifecycle events.
    fn subscribe(&self) -> broadcast::Receiver<AdEvent>;

    /// Present the loaded payload.
    fn show(&self) -> Result<(), SdkError>;
}
