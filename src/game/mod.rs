//! Game Logic Module
//!
//! The restart-surviving game state of the mining client.
//!
//! ## Module Structure
//!
//! - `mining`: Timed mining session with boosts
//! - `reward_box`: Box round with limited opens and cooldown
//! - `gift`: Daily mystery gift
//! - `wallet`: Super-coin balance
//! - `boost`: Time boost offers

pub mod boost;
pub mod gift;
pub mod mining;
pub mod reward_box;
pub mod wallet;

// Re-export key types
pub use boost::TimeBoost;
pub use gift::{DailyGift, GiftError, GIFT_COOLDOWN};
pub use mining::{MiningConfig, MiningError, MiningSession, MAX_TIME_BOOST, MINING_DURATION};
pub use reward_box::{BoxError, BoxRound, BoxRoundConfig, RewardBox, RoundPhase};
pub use wallet::{Wallet, WalletError};
