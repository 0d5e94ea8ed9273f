//! Mining Time Boosts
//!
//! Extra mining time bought with a completed rewarded ad or with coins.
//! The mining session caps the resulting remaining time.

use std::time::Duration;

use serde::Serialize;

/// A time boost offer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum TimeBoost {
    /// Paid by watching a rewarded ad to completion.
    WatchAd { minutes: u32 },
    /// Paid with coins.
    SpendCoins { coins: u64, minutes: u32 },
}

impl TimeBoost {
    /// +30 minutes for a rewarded ad.
    pub const WATCH_AD: TimeBoost = TimeBoost::WatchAd { minutes: 30 };
    /// +60 minutes for 50 coins.
    pub const ONE_HOUR: TimeBoost = TimeBoost::SpendCoins { coins: 50, minutes: 60 };
    /// +120 minutes for 90 coins.
    pub const TWO_HOURS: TimeBoost = TimeBoost::SpendCoins { coins: 90, minutes: 120 };

    /// Offers shown to the player.
    pub fn catalogue() -> [TimeBoost; 3] {
        [Self::WATCH_AD, Self::ONE_HOUR, Self::TWO_HOURS]
    }

    /// Time added.
    pub fn duration(&self) -> Duration {
        let minutes = match self {
            TimeBoost::WatchAd { minutes } | TimeBoost::SpendCoins { minutes, .. } => *minutes,
        };
        Duration::from_secs(u64::from(minutes) * 60)
    }

    /// Coin price, if the boost is bought with coins.
    pub fn price(&self) -> Option<u64> {
        match self {
            TimeBoost::WatchAd { .. } => None,
            TimeBoost::SpendCoins { coins, .. } => Some(*coins),
        }
    }
}
