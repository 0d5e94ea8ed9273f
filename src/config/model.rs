//! Ad Network Configuration Model
//!
//! Shape of the backend's ad config document. Field names follow the
//! backend's camelCase JSON; durations are milliseconds on the wire.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Deserializer, Serialize};
use tracing::warn;

use crate::core::hash::{fingerprint_json, Fingerprint, AD_CONFIG_DOMAIN};

/// Priority assigned to networks that do not specify one (or specify 0).
pub const DEFAULT_PRIORITY: u32 = 999;

/// Default config refresh interval (5 minutes).
pub const DEFAULT_REFRESH_INTERVAL_MS: u64 = 300_000;

/// Supported ad networks.
///
/// Declaration order is the tie-break order for equal priorities.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkId {
    /// Google Mobile Ads.
    Google,
    /// Meta Audience Network.
    Facebook,
    /// AppLovin MAX.
    AppLovin,
}

impl NetworkId {
    /// All networks in declaration order.
    pub const ALL: [NetworkId; 3] = [NetworkId::Google, NetworkId::Facebook, NetworkId::AppLovin];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkId::Google => "google",
            NetworkId::Facebook => "facebook",
            NetworkId::AppLovin => "applovin",
        }
    }
}

impl fmt::Display for NetworkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unknown network identifier.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown ad network: {0}")]
pub struct UnknownNetwork(pub String);

impl FromStr for NetworkId {
    type Err = UnknownNetwork;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        NetworkId::ALL
            .into_iter()
            .find(|id| id.as_str() == s)
            .ok_or_else(|| UnknownNetwork(s.to_string()))
    }
}

/// Ad formats subject to mediation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AdType {
    /// Full-screen ad without reward.
    Interstitial,
    /// Ad that grants a reward on completion.
    Rewarded,
}

impl AdType {
    /// Both ad types.
    pub const ALL: [AdType; 2] = [AdType::Interstitial, AdType::Rewarded];

    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            AdType::Interstitial => "interstitial",
            AdType::Rewarded => "rewarded",
        }
    }
}

impl fmt::Display for AdType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Banner placements.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BannerIds {
    /// Small banner unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub small: Option<String>,
    /// Large banner unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub large: Option<String>,
}

/// Per-network settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkEntry {
    /// Network participates in mediation.
    #[serde(default)]
    pub enabled: bool,
    /// Lower is tried first. Missing or 0 means [`DEFAULT_PRIORITY`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<u32>,
    /// Interstitial ad unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interstitial_id: Option<String>,
    /// Rewarded ad unit.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rewarded_id: Option<String>,
    /// Banner ad units.
    #[serde(default)]
    pub banner_ids: BannerIds,
    /// SDK key (AppLovin).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sdk_key: Option<String>,
}

impl NetworkEntry {
    /// Priority used for ordering.
    pub fn effective_priority(&self) -> u32 {
        match self.priority {
            Some(p) if p != 0 => p,
            _ => DEFAULT_PRIORITY,
        }
    }

    /// Ad unit for an ad type.
    pub fn unit_id(&self, ad_type: AdType) -> Option<&str> {
        match ad_type {
            AdType::Interstitial => self.interstitial_id.as_deref(),
            AdType::Rewarded => self.rewarded_id.as_deref(),
        }
    }
}

/// Frequency cap for one ad type.
///
/// Zero disables the respective limit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FrequencyRule {
    /// Minimum time between two shows (ms).
    #[serde(default, rename = "minInterval")]
    pub min_interval_ms: u64,
    /// Maximum shows per process lifetime.
    #[serde(default)]
    pub max_per_session: u32,
}

/// Complete ad network configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdNetworkConfig {
    /// Network the backend considers primary.
    #[serde(default = "default_active_network", deserialize_with = "lenient_active_network")]
    pub active_network: NetworkId,
    /// Whether other networks may be tried after the first fails.
    #[serde(default = "default_true")]
    pub fallback_enabled: bool,
    /// Config refresh interval (ms).
    #[serde(default = "default_refresh_interval", rename = "refreshInterval")]
    pub refresh_interval_ms: u64,
    /// Per-network settings. Networks this client has no adapter for are
    /// dropped while decoding.
    #[serde(default, deserialize_with = "known_networks")]
    pub networks: BTreeMap<NetworkId, NetworkEntry>,
    /// Frequency caps per ad type.
    #[serde(default)]
    pub ad_frequency: BTreeMap<AdType, FrequencyRule>,
}

fn default_active_network() -> NetworkId {
    NetworkId::Google
}

fn lenient_active_network<'de, D>(deserializer: D) -> Result<NetworkId, D::Error>
where
    D: Deserializer<'de>,
{
    let name = String::deserialize(deserializer)?;
    Ok(name.parse().unwrap_or_else(|e: UnknownNetwork| {
        warn!("{}, using {} as active network", e, default_active_network());
        default_active_network()
    }))
}

fn known_networks<'de, D>(deserializer: D) -> Result<BTreeMap<NetworkId, NetworkEntry>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = BTreeMap::<String, NetworkEntry>::deserialize(deserializer)?;
    let mut networks = BTreeMap::new();
    for (name, entry) in raw {
        match name.parse::<NetworkId>() {
            Ok(id) => {
                networks.insert(id, entry);
            }
            Err(e) => warn!("Skipping {} in ad config", e),
        }
    }
    Ok(networks)
}

fn default_true() -> bool {
    true
}

fn default_refresh_interval() -> u64 {
    DEFAULT_REFRESH_INTERVAL_MS
}

impl AdNetworkConfig {
    /// Built-in config used when neither the backend nor the persisted copy
    /// is available: only Google enabled (with Google's public test units),
    /// conservative caps.
    pub fn builtin_default() -> Self {
        let mut networks = BTreeMap::new();
        networks.insert(NetworkId::Google, NetworkEntry {
            enabled: true,
            priority: Some(1),
            interstitial_id: Some("ca-app-pub-3940256099942544/1033173712".into()),
            rewarded_id: Some("ca-app-pub-3940256099942544/5224354917".into()),
            banner_ids: BannerIds {
                small: Some("ca-app-pub-3940256099942544/6300978111".into()),
                large: Some("ca-app-pub-3940256099942544/6300978111".into()),
            },
            sdk_key: None,
        });
        networks.insert(NetworkId::Facebook, NetworkEntry {
            enabled: false,
            priority: Some(2),
            ..Default::default()
        });
        networks.insert(NetworkId::AppLovin, NetworkEntry {
            enabled: false,
            priority: Some(3),
            ..Default::default()
        });

        let mut ad_frequency = BTreeMap::new();
        ad_frequency.insert(AdType::Interstitial, FrequencyRule {
            min_interval_ms: 60_000,
            max_per_session: 5,
        });
        ad_frequency.insert(AdType::Rewarded, FrequencyRule {
            min_interval_ms: 30_000,
            max_per_session: 10,
        });

        Self {
            active_network: NetworkId::Google,
            fallback_enabled: true,
            refresh_interval_ms: DEFAULT_REFRESH_INTERVAL_MS,
            networks,
            ad_frequency,
        }
    }

    /// Enabled networks, ascending by priority.
    ///
    /// Ties keep map order, i.e. [`NetworkId`] declaration order.
    pub fn priority_order(&self) -> Vec<NetworkId> {
        let mut enabled: Vec<(NetworkId, u32)> = self.networks.iter()
            .filter(|(_, entry)| entry.enabled)
            .map(|(id, entry)| (*id, entry.effective_priority()))
            .collect();
        // Stable sort keeps map order among equal priorities
        enabled.sort_by_key(|(_, priority)| *priority);
        enabled.into_iter().map(|(id, _)| id).collect()
    }

    /// Frequency rule for an ad type, if any.
    pub fn frequency_rule(&self, ad_type: AdType) -> Option<&FrequencyRule> {
        self.ad_frequency.get(&ad_type)
    }

    /// Settings for a network, if present.
    pub fn network(&self, id: NetworkId) -> Option<&NetworkEntry> {
        self.networks.get(&id)
    }

    /// Refresh interval as a duration (never zero).
    pub fn refresh_interval(&self) -> Duration {
        let ms = if self.refresh_interval_ms == 0 {
            DEFAULT_REFRESH_INTERVAL_MS
        } else {
            self.refresh_interval_ms
        };
        Duration::from_millis(ms)
    }

    /// Content fingerprint.
    pub fn fingerprint(&self) -> Fingerprint {
        fingerprint_json(AD_CONFIG_DOMAIN, self)
    }
}

impl Default for AdNetworkConfig {
    fn default() -> Self {
        Self::builtin_default()
    }
}

// =============================================================================
// TESTS
// =============================================================================
