//! Storage keys owned by the core.

/// Last successfully fetched ad-network config (JSON).
pub const AD_CONFIG: &str = "adConfig";

/// Mining session start timestamp (ms).
pub const MINING_SESSION_START: &str = "sessionStart";

/// Effective mining session length (ms); absent means the fixed duration.
pub const MINING_SESSION_LENGTH: &str = "sessionLength";

/// Settled mining earnings.
pub const MINING_TOTAL_EARNED: &str = "totalEarned";

/// Daily mystery gift cooldown start timestamp (ms).
pub const GIFT_COOLDOWN_START: &str = "mysteryBoxCooldownStart";

/// Reward box round cooldown start timestamp (ms).
pub const BOX_COOLDOWN_START: &str = "giftOpenStart";

/// Reward box list (JSON).
pub const BOX_LIST: &str = "boxList";

/// Super-coin balance.
pub const SUPER_COIN_BALANCE: &str = "masterCoin";
