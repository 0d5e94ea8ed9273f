//! Frequency Caps
//!
//! Per-process show history. A show is allowed unless the last successful
//! show of the same type was less than `minInterval` ago, or the session
//! already reached `maxPerSession` shows of that type. A zero limit is
//! disabled; a missing rule allows everything.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::model::{AdType, FrequencyRule};
use crate::core::clock::Timestamp;

/// Why a show was refused by the frequency cap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrequencyBlock {
    /// Too soon after the previous show.
    TooSoon { wait_ms: i64 },
    /// Session limit reached.
    SessionLimit { shown: u32 },
}

/// Show history of this process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdSessionState {
    /// Successful shows per ad type.
    pub counts: BTreeMap<AdType, u32>,
    /// Time of the last successful show per ad type.
    pub last_shown: BTreeMap<AdType, Timestamp>,
}

impl AdSessionState {
    /// Create an empty history.
    pub fn new() -> Self {
        Self::default()
    }

    /// Check a show against a rule.
    pub fn check(
        &self,
        ad_type: AdType,
        rule: Option<&FrequencyRule>,
        now: Timestamp,
    ) -> Result<(), FrequencyBlock> {
        let Some(rule) = rule else {
            return Ok(());
        };

        if rule.min_interval_ms > 0 {
            if let Some(&last) = self.last_shown.get(&ad_type) {
                let min_interval = i64::try_from(rule.min_interval_ms).unwrap_or(i64::MAX);
                let since = now - last;
                if since < min_interval {
                    return Err(FrequencyBlock::TooSoon { wait_ms: min_interval - since });
                }
            }
        }

        let shown = self.count(ad_type);
        if rule.max_per_session > 0 && shown >= rule.max_per_session {
            return Err(FrequencyBlock::SessionLimit { shown });
        }

        Ok(())
    }

    /// Check if a show is allowed.
    pub fn can_show(&self, ad_type: AdType, rule: Option<&FrequencyRule>, now: Timestamp) -> bool {
        self.check(ad_type, rule, now).is_ok()
    }

    /// Record a successful show.
    pub fn record(&mut self, ad_type: AdType, now: Timestamp) {
        *self.counts.entry(ad_type).or_insert(0) += 1;
        self.last_shown.insert(ad_type, now);
    }

    /// Successful shows of an ad type.
    pub fn count(&self, ad_type: AdType) -> u32 {
        self.counts.get(&ad_type).copied().unwrap_or(0)
    }
}

// =============================================================================
// TESTS
// =============================================================================
