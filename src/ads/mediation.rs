//! Ad Mediation Engine
//!
//! Decides whether an ad may be shown and which network shows it:
//!
//! 1. frequency cap for the ad type (refused without touching any adapter)
//! 2. enabled networks in priority order, strictly one after another
//! 3. first network whose adapter is ready and completes the show wins
//!
//! Cap check and show run under one gate, so two near-simultaneous requests
//! for the same engine are serialized and the second sees the first's show.
//!
//! A background refresh loop re-fetches the config every `refreshInterval`
//! and rebuilds all adapters when it changed.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, warn};

use crate::ads::adapter::{AdAdapter, AdapterFactory, ShowOutcome};
use crate::ads::frequency::AdSessionState;
use crate::ads::sdk::RewardPayload;
use crate::config::client::{ConfigOrigin, RemoteConfigClient};
use crate::config::model::{AdNetworkConfig, AdType, NetworkId};
use crate::core::clock::{duration_ms, Clock, Timestamp};
use crate::core::hash::short_hex;
use crate::core::ticker::{TickControl, Ticker};

/// Why mediation showed nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeclineReason {
    /// Frequency cap refused the show.
    FrequencyLimit,
    /// No network managed to show an ad (or none is enabled).
    AllNetworksFailed,
}

impl DeclineReason {
    /// Wire name of the reason.
    pub fn as_str(&self) -> &'static str {
        match self {
            DeclineReason::FrequencyLimit => "frequency_limit",
            DeclineReason::AllNetworksFailed => "all_networks_failed",
        }
    }
}

/// Result of a mediated show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MediationOutcome {
    /// An ad was shown (and completed, for rewarded ads).
    pub success: bool,
    /// Network that showed the ad.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkId>,
    /// Reward earned (rewarded ads).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward: Option<RewardPayload>,
    /// Why nothing was shown.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DeclineReason>,
}

impl MediationOutcome {
    fn shown(network: NetworkId, reward: Option<RewardPayload>) -> Self {
        Self {
            success: true,
            network: Some(network),
            reward,
            reason: None,
        }
    }

    fn declined(reason: DeclineReason) -> Self {
        Self {
            success: false,
            network: None,
            reward: None,
            reason: Some(reason),
        }
    }
}

/// Debug snapshot of the mediation state.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdStatus {
    /// Where the current config came from.
    pub config_origin: Option<ConfigOrigin>,
    /// Short fingerprint of the current config.
    pub config_fingerprint: Option<String>,
    /// Enabled networks by ascending priority.
    pub priority_order: Vec<NetworkId>,
    /// Ready networks per ad type.
    pub ready: BTreeMap<AdType, Vec<NetworkId>>,
    /// Successful shows per ad type.
    pub counts: BTreeMap<AdType, u32>,
    /// Last successful show per ad type.
    pub last_shown: BTreeMap<AdType, Timestamp>,
}

type AdapterMap = BTreeMap<(NetworkId, AdType), Arc<dyn AdAdapter>>;

#[derive(Default)]
struct EngineState {
    /// `None` until the first config is installed.
    config: Option<AdNetworkConfig>,
    adapters: AdapterMap,
    session: AdSessionState,
}

/// Mediation engine. One per process.
pub struct MediationEngine {
    config_client: Arc<RemoteConfigClient>,
    factory: Arc<dyn AdapterFactory>,
    clock: Arc<dyn Clock>,
    state: RwLock<EngineState>,
    /// Serializes cap check + show.
    show_gate: Mutex<()>,
    /// Serializes config installs.
    install_gate: Mutex<()>,
}

impl MediationEngine {
    /// Create an engine. No config is fetched until [`Self::initialize`] or
    /// the first show.
    pub fn new(
        config_client: Arc<RemoteConfigClient>,
        factory: Arc<dyn AdapterFactory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config_client,
            factory,
            clock,
            state: RwLock::new(EngineState::default()),
            show_gate: Mutex::new(()),
            install_gate: Mutex::new(()),
        }
    }

    /// Fetch the config and build (and start loading) all adapters.
    #[instrument(skip(self))]
    pub async fn initialize(&self) {
        let config = self.config_client.fetch_config().await;
        self.install(config).await;
    }

    /// Check if the frequency cap allows a show right now.
    pub async fn can_show(&self, ad_type: AdType) -> bool {
        let state = self.state.read().await;
        let rule = state.config.as_ref().and_then(|c| c.frequency_rule(ad_type));
        state.session.can_show(ad_type, rule, self.clock.now_ms())
    }

    /// Check if any enabled network has an ad of this type ready.
    pub async fn is_ready(&self, ad_type: AdType) -> bool {
        let state = self.state.read().await;
        let Some(config) = &state.config else {
            return false;
        };
        config.priority_order().into_iter().any(|network| {
            state.adapters
                .get(&(network, ad_type))
                .map_or(false, |adapter| adapter.is_ready())
        })
    }

    /// Show an ad of this type on the first network that can.
    #[instrument(skip(self))]
    pub async fn show(&self, ad_type: AdType) -> MediationOutcome {
        let _gate = self.show_gate.lock().await;

        if self.state.read().await.config.is_none() {
            self.initialize().await;
        }

        let (candidates, fallback_enabled) = {
            let state = self.state.read().await;
            let Some(config) = &state.config else {
                return MediationOutcome::declined(DeclineReason::AllNetworksFailed);
            };

            let rule = config.frequency_rule(ad_type);
            if let Err(block) = state.session.check(ad_type, rule, self.clock.now_ms()) {
                debug!("{} ad refused by frequency cap: {:?}", ad_type, block);
                return MediationOutcome::declined(DeclineReason::FrequencyLimit);
            }

            let candidates: Vec<(NetworkId, Option<Arc<dyn AdAdapter>>)> = config
                .priority_order()
                .into_iter()
                .map(|network| (network, state.adapters.get(&(network, ad_type)).cloned()))
                .collect();
            (candidates, config.fallback_enabled)
        };

        for (attempt, (network, adapter)) in candidates.into_iter().enumerate() {
            if attempt > 0 && !fallback_enabled {
                debug!("Fallback disabled; not trying {}", network);
                break;
            }

            let Some(adapter) = adapter else {
                debug!("{} has no {} adapter", network, ad_type);
                continue;
            };
            if !adapter.is_ready() {
                debug!("{} {} ad not ready, trying next network", network, ad_type);
                adapter.load();
                continue;
            }

            match adapter.show().await {
                ShowOutcome::Shown { reward } => {
                    let now = self.clock.now_ms();
                    let mut state = self.state.write().await;
                    state.session.record(ad_type, now);
                    info!(
                        "{} ad shown on {} ({} this session)",
                        ad_type,
                        network,
                        state.session.count(ad_type)
                    );
                    return MediationOutcome::shown(network, reward);
                }
                ShowOutcome::Failed(failure) => {
                    warn!("{} {} ad failed: {:?}, trying next network", network, ad_type, failure);
                }
            }
        }

        warn!("No network could show a {} ad", ad_type);
        MediationOutcome::declined(DeclineReason::AllNetworksFailed)
    }

    /// Re-fetch the config (cache permitting) and rebuild adapters if it
    /// changed. Returns whether a rebuild happened.
    #[instrument(skip(self))]
    pub async fn refresh_if_changed(&self) -> bool {
        let fetched = self.config_client.fetch_config().await;
        let changed = self.state.read().await.config.as_ref() != Some(&fetched);
        if changed {
            info!("Ad config changed, rebuilding adapters");
            self.install(fetched).await;
        } else {
            debug!("Ad config unchanged");
        }
        changed
    }

    /// Bypass the config cache, re-fetch and rebuild all adapters.
    #[instrument(skip(self))]
    pub async fn refresh_config(&self) -> AdNetworkConfig {
        let config = self.config_client.refresh_config().await;
        self.install(config.clone()).await;
        config
    }

    /// Period of the background refresh loop.
    pub async fn refresh_interval(&self) -> Duration {
        self.state.read().await.config
            .as_ref()
            .map(AdNetworkConfig::refresh_interval)
            .unwrap_or_else(|| AdNetworkConfig::builtin_default().refresh_interval())
    }

    /// Start the background refresh loop. Dropping the returned guard stops it.
    pub async fn spawn_refresh_loop(self: &Arc<Self>) -> Ticker {
        let engine = Arc::clone(self);
        let period = self.refresh_interval().await;
        let current = Arc::new(AtomicU64::new(duration_ms(period) as u64));

        Ticker::spawn("ad-config-refresh", period, move || {
            let engine = engine.clone();
            let current = current.clone();
            async move {
                engine.refresh_if_changed().await;
                let next = engine.refresh_interval().await;
                let next_ms = duration_ms(next) as u64;
                if current.swap(next_ms, Ordering::SeqCst) != next_ms {
                    TickControl::Reschedule(next)
                } else {
                    TickControl::Continue
                }
            }
        })
    }

    /// Snapshot for debug views.
    pub async fn status(&self) -> AdStatus {
        let origin = self.config_client.last_origin().await;
        let state = self.state.read().await;
        let priority_order = state.config
            .as_ref()
            .map(AdNetworkConfig::priority_order)
            .unwrap_or_default();

        let mut ready = BTreeMap::new();
        for ad_type in AdType::ALL {
            let networks: Vec<NetworkId> = priority_order.iter()
                .copied()
                .filter(|network| {
                    state.adapters
                        .get(&(*network, ad_type))
                        .map_or(false, |adapter| adapter.is_ready())
                })
                .collect();
            ready.insert(ad_type, networks);
        }

        AdStatus {
            config_origin: origin,
            config_fingerprint: state.config.as_ref().map(|c| short_hex(&c.fingerprint())),
            priority_order,
            ready,
            counts: state.session.counts.clone(),
            last_shown: state.session.last_shown.clone(),
        }
    }

    /// Stop all adapters' load retries.
    pub async fn shutdown(&self) {
        for adapter in self.state.read().await.adapters.values() {
            adapter.shutdown();
        }
        info!("Ad mediation shut down");
    }

    /// Replace the config and all adapters.
    async fn install(&self, config: AdNetworkConfig) {
        let _install = self.install_gate.lock().await;

        let mut adapters = AdapterMap::new();
        for network in config.priority_order() {
            let Some(entry) = config.network(network) else {
                continue;
            };
            self.factory.prepare(network).await;
            for ad_type in AdType::ALL {
                if let Some(adapter) = self.factory.build(network, ad_type, entry) {
                    adapter.load();
                    adapters.insert((network, ad_type), adapter);
                }
            }
        }

        info!(
            "Installed ad config {} with {} adapters",
            short_hex(&config.fingerprint()),
            adapters.len()
        );

        let previous = {
            let mut state = self.state.write().await;
            state.config = Some(config);
            std::mem::replace(&mut state.adapters, adapters)
        };
        for adapter in previous.values() {
            adapter.shutdown();
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
