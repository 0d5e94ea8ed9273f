//! Super-Coin Wallet
//!
//! Balance credited by box and gift claims and spent on time boosts.
//! Persisted under [`keys::SUPER_COIN_BALANCE`] after every change.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::storage::{keys, read_or_absent, write_or_log, KeyValueStore};

/// Wallet errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum WalletError {
    /// Balance lower than the price.
    #[error("insufficient funds: need {needed}, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },
}

/// Persisted coin balance.
pub struct Wallet {
    store: Arc<dyn KeyValueStore>,
    balance: Mutex<u64>,
}

impl Wallet {
    /// Load the balance; an absent or unreadable value is zero.
    pub async fn load(store: Arc<dyn KeyValueStore>) -> Self {
        let balance = match read_or_absent(store.as_ref(), keys::SUPER_COIN_BALANCE).await {
            Some(raw) => parse_balance(&raw).unwrap_or_else(|| {
                warn!("Discarding unreadable coin balance {:?}", raw);
                0
            }),
            None => 0,
        };
        debug!("Wallet loaded with {} coins", balance);
        Self {
            store,
            balance: Mutex::new(balance),
        }
    }

    /// Current balance.
    pub async fn balance(&self) -> u64 {
        *self.balance.lock().await
    }

    /// Add coins. Returns the new balance.
    pub async fn credit(&self, amount: u64) -> u64 {
        let mut balance = self.balance.lock().await;
        *balance = balance.saturating_add(amount);
        self.persist(*balance).await;
        *balance
    }

    /// Remove coins if the balance covers them. Returns the new balance.
    pub async fn spend(&self, amount: u64) -> Result<u64, WalletError> {
        let mut balance = self.balance.lock().await;
        if *balance < amount {
            return Err(WalletError::InsufficientFunds {
                needed: amount,
                available: *balance,
            });
        }
        *balance -= amount;
        self.persist(*balance).await;
        Ok(*balance)
    }

    async fn persist(&self, balance: u64) {
        write_or_log(self.store.as_ref(), keys::SUPER_COIN_BALANCE, balance.to_string()).await;
    }
}

/// Balances written by older clients may be floats.
fn parse_balance(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    if let Ok(value) = raw.parse::<u64>() {
        return Some(value);
    }
    let value = raw.parse::<f64>().ok()?;
    (value.is_finite() && value >= 0.0).then(|| value.floor() as u64)
}
