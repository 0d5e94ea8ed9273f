//! Network Adapters
//!
//! Uniform capability set over the vendor SDKs. One adapter owns one ad
//! slot (a network plus an ad type) and keeps it filled:
//!
//! - `load` is idempotent and retries failed loads after a backoff
//! - `show` consumes the loaded payload and reloads once the ad closes
//! - `shutdown` stops pending retries and future loads
//!
//! Rewarded shows succeed only if the SDK reports the reward before the ad
//! closes.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::sync::broadcast::error::RecvError;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use crate::ads::sdk::{AdEvent, AdSdk, RewardPayload, SdkAd};
use crate::config::model::{AdType, NetworkEntry, NetworkId};

/// Delay before retrying a failed load.
pub const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_secs(5);

/// Why an adapter could not show an ad.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ShowFailure {
    /// No payload was loaded.
    NotLoaded,
    /// Rewarded ad closed before the reward was earned.
    NotCompleted,
    /// The SDK rejected the show.
    Error(String),
}

/// Result of one adapter show.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowOutcome {
    /// Ad was presented. Rewarded ads always carry a reward.
    Shown { reward: Option<RewardPayload> },
    /// Ad was not presented, or not completed.
    Failed(ShowFailure),
}

impl ShowOutcome {
    /// Check if the show counts as a success.
    pub fn is_success(&self) -> bool {
        matches!(self, ShowOutcome::Shown { .. })
    }
}

/// One ad slot on one network.
#[async_trait]
pub trait AdAdapter: Send + Sync {
    /// Network of this slot.
    fn network(&self) -> NetworkId;

    /// Ad type of this slot.
    fn ad_type(&self) -> AdType;

    /// Start loading if nothing is loaded or loading. Idempotent.
    fn load(&self);

    /// True iff a payload is loaded and not yet shown.
    fn is_ready(&self) -> bool;

    /// Present the loaded ad and wait for its outcome.
    async fn show(&self) -> ShowOutcome;

    /// Stop load retries. An ad already on screen is not affected.
    fn shutdown(&self);
}

enum LoadAttempt {
    Loaded,
    Failed(String),
    Cancelled,
}

struct AdapterInner {
    network: NetworkId,
    ad_type: AdType,
    unit_id: String,
    sdk: Arc<dyn AdSdk>,
    retry_backoff: Duration,
    /// Instance holding the current (loading or loaded) payload.
    slot: Mutex<Option<Arc<dyn SdkAd>>>,
    loading: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
}

impl AdapterInner {
    fn slot(&self) -> MutexGuard<'_, Option<Arc<dyn SdkAd>>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn is_shut_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    fn create_ad(&self) -> Result<Arc<dyn SdkAd>, String> {
        let created = match self.ad_type {
            AdType::Interstitial => self.sdk.create_interstitial(&self.unit_id),
            AdType::Rewarded => self.sdk.create_rewarded(&self.unit_id),
        };
        created.map_err(|e| e.to_string())
    }

    async fn load_once(&self, shutdown: &mut watch::Receiver<bool>) -> LoadAttempt {
        let ad = match self.create_ad() {
            Ok(ad) => ad,
            Err(reason) => return LoadAttempt::Failed(reason),
        };

        // Subscribe before load so a synchronous completion is not missed
        let mut events = ad.subscribe();
        *self.slot() = Some(ad.clone());
        ad.load();

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(AdEvent::Loaded) => return LoadAttempt::Loaded,
                    Ok(AdEvent::Error(reason)) => return LoadAttempt::Failed(reason),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => {
                        return LoadAttempt::Failed("event stream closed".into());
                    }
                },
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return LoadAttempt::Cancelled;
                    }
                }
            }
        }
    }

    async fn run_load(self: Arc<Self>) {
        let mut shutdown = self.shutdown_tx.subscribe();

        loop {
            if self.is_shut_down() {
                break;
            }

            match self.load_once(&mut shutdown).await {
                LoadAttempt::Loaded => {
                    debug!("{} {} ad loaded ({})", self.network, self.ad_type, self.unit_id);
                    break;
                }
                LoadAttempt::Cancelled => break,
                LoadAttempt::Failed(reason) => {
                    warn!(
                        "{} {} ad failed to load ({}), retrying in {:?}",
                        self.network, self.ad_type, reason, self.retry_backoff
                    );
                    tokio::select! {
                        _ = sleep(self.retry_backoff) => {}
                        _ = shutdown.changed() => break,
                    }
                }
            }
        }

        self.loading.store(false, Ordering::SeqCst);
    }
}

/// Adapter over an [`AdSdk`].
#[derive(Clone)]
pub struct NetworkAdapter {
    inner: Arc<AdapterInner>,
}

impl NetworkAdapter {
    /// Create an adapter for one ad unit. Nothing is loaded until `load`.
    pub fn new(
        sdk: Arc<dyn AdSdk>,
        ad_type: AdType,
        unit_id: impl Into<String>,
        retry_backoff: Duration,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            inner: Arc::new(AdapterInner {
                network: sdk.network(),
                ad_type,
                unit_id: unit_id.into(),
                sdk,
                retry_backoff,
                slot: Mutex::new(None),
                loading: AtomicBool::new(false),
                shutdown_tx,
            }),
        }
    }

    /// Reload once the shown ad reports closed (or goes away).
    fn reload_after_close(&self, mut events: broadcast::Receiver<AdEvent>) {
        let adapter = self.clone();
        tokio::spawn(async move {
            loop {
                match events.recv().await {
                    Ok(AdEvent::Closed) | Err(RecvError::Closed) => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                }
            }
            adapter.load();
        });
    }
}

#[async_trait]
impl AdAdapter for NetworkAdapter {
    fn network(&self) -> NetworkId {
        self.inner.network
    }

    fn ad_type(&self) -> AdType {
        self.inner.ad_type
    }

    fn load(&self) {
        if self.inner.is_shut_down() || self.is_ready() {
            return;
        }
        if self.inner.loading.swap(true, Ordering::SeqCst) {
            return;
        }
        tokio::spawn(self.inner.clone().run_load());
    }

    fn is_ready(&self) -> bool {
        self.inner.slot().as_ref().map_or(false, |ad| ad.is_loaded())
    }

    async fn show(&self) -> ShowOutcome {
        let inner = &self.inner;
        let ad = {
            let mut slot = inner.slot();
            let loaded = slot.as_ref().map_or(false, |ad| ad.is_loaded());
            if loaded { slot.take() } else { None }
        };

        let Some(ad) = ad else {
            debug!("{} {} ad not ready", inner.network, inner.ad_type);
            self.load();
            return ShowOutcome::Failed(ShowFailure::NotLoaded);
        };

        let mut events = ad.subscribe();
        if let Err(e) = ad.show() {
            warn!("{} {} ad failed to show: {}", inner.network, inner.ad_type, e);
            self.load();
            return ShowOutcome::Failed(ShowFailure::Error(e.to_string()));
        }
        drop(ad);

        match inner.ad_type {
            AdType::Interstitial => {
                self.reload_after_close(events);
                ShowOutcome::Shown { reward: None }
            }
            AdType::Rewarded => loop {
                match events.recv().await {
                    Ok(AdEvent::EarnedReward(payload)) => {
                        let reward = payload.unwrap_or_default();
                        info!(
                            "{} rewarded ad completed ({} {})",
                            inner.network, reward.amount, reward.kind
                        );
                        self.reload_after_close(events);
                        return ShowOutcome::Shown { reward: Some(reward) };
                    }
                    Ok(AdEvent::Closed) | Err(RecvError::Closed) => {
                        debug!("{} rewarded ad closed before completion", inner.network);
                        self.load();
                        return ShowOutcome::Failed(ShowFailure::NotCompleted);
                    }
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                }
            },
        }
    }

    fn shutdown(&self) {
        // send() is dropped when no load is running; the flag must stick
        self.inner.shutdown_tx.send_replace(true);
        debug!("{} {} adapter shut down", self.inner.network, self.inner.ad_type);
    }
}

/// Builds adapters for the networks a config enables.
#[async_trait]
pub trait AdapterFactory: Send + Sync {
    /// Prepare a network before its adapters are built (SDK init).
    async fn prepare(&self, network: NetworkId);

    /// Adapter for one slot, or `None` if the network has no SDK or no unit
    /// for this ad type.
    fn build(
        &self,
        network: NetworkId,
        ad_type: AdType,
        entry: &NetworkEntry,
    ) -> Option<Arc<dyn AdAdapter>>;
}

/// Factory over a registry of SDKs.
pub struct SdkAdapterFactory {
    sdks: Vec<Arc<dyn AdSdk>>,
    retry_backoff: Duration,
    initialized: tokio::sync::Mutex<BTreeSet<NetworkId>>,
}

impl SdkAdapterFactory {
    /// Create a factory with the default retry backoff.
    pub fn new() -> Self {
        Self::with_retry_backoff(DEFAULT_RETRY_BACKOFF)
    }

    /// Create a factory with a custom retry backoff.
    pub fn with_retry_backoff(retry_backoff: Duration) -> Self {
        Self {
            sdks: Vec::new(),
            retry_backoff,
            initialized: tokio::sync::Mutex::new(BTreeSet::new()),
        }
    }

    /// Register an SDK. A later registration for the same network wins.
    pub fn register(mut self, sdk: Arc<dyn AdSdk>) -> Self {
        self.sdks.retain(|existing| existing.network() != sdk.network());
        self.sdks.push(sdk);
        self
    }

    fn sdk(&self, network: NetworkId) -> Option<&Arc<dyn AdSdk>> {
        self.sdks.iter().find(|sdk| sdk.network() == network)
    }
}

impl Default for SdkAdapterFactory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AdapterFactory for SdkAdapterFactory {
    async fn prepare(&self, network: NetworkId) {
        let Some(sdk) = self.sdk(network) else {
            return;
        };
        let mut initialized = self.initialized.lock().await;
        if initialized.contains(&network) {
            return;
        }
        match sdk.init().await {
            Ok(()) => {
                info!("{} SDK initialized", network);
                initialized.insert(network);
            }
            // Not recorded; the next config rebuild retries init
            Err(e) => warn!("{} SDK failed to initialize: {}", network, e),
        }
    }

    fn build(
        &self,
        network: NetworkId,
        ad_type: AdType,
        entry: &NetworkEntry,
    ) -> Option<Arc<dyn AdAdapter>> {
        let Some(sdk) = self.sdk(network) else {
            warn!("No SDK registered for {}", network);
            return None;
        };
        let Some(unit_id) = entry.unit_id(ad_type) else {
            debug!("{} has no {} ad unit", network, ad_type);
            return None;
        };
        Some(Arc::new(NetworkAdapter::new(
            sdk.clone(),
            ad_type,
            unit_id,
            self.retry_backoff,
        )))
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ads::simulated::{ShowScript, SimulatedSdk};

    fn adapter(sdk: &Arc<SimulatedSdk>, ad_type: AdType) -> NetworkAdapter {
        NetworkAdapter::new(sdk.clone(), ad_type, "unit-1", DEFAULT_RETRY_BACKOFF)
    }

    /// Let spawned load tasks run.
    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_load_is_idempotent() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::Google));
        let adapter = adapter(&sdk, AdType::Interstitial);

        adapter.load();
        adapter.load();
        settle().await;
        adapter.load();
        settle().await;

        assert!(adapter.is_ready());
        assert_eq!(sdk.loads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_load_retries_after_backoff() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::Facebook).fail_loads(2));
        let adapter = adapter(&sdk, AdType::Interstitial);

        adapter.load();
        settle().await;
        assert!(!adapter.is_ready());
        assert_eq!(sdk.loads(), 1);

        tokio::time::sleep(Duration::from_millis(4_900)).await;
        assert_eq!(sdk.loads(), 1);

        tokio::time::sleep(Duration::from_millis(200)).await;
        settle().await;
        assert_eq!(sdk.loads(), 2);

        tokio::time::sleep(DEFAULT_RETRY_BACKOFF).await;
        settle().await;
        assert_eq!(sdk.loads(), 3);
        assert!(adapter.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_retries() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::AppLovin).never_loads());
        let adapter = adapter(&sdk, AdType::Rewarded);

        adapter.load();
        settle().await;
        adapter.shutdown();

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(sdk.loads(), 1);

        adapter.load();
        settle().await;
        assert_eq!(sdk.loads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_of_idle_loaded_adapter_blocks_reload() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::Google));
        let adapter = adapter(&sdk, AdType::Interstitial);
        adapter.load();
        settle().await;
        assert!(adapter.is_ready());

        adapter.shutdown();
        assert!(adapter.inner.is_shut_down());

        assert_eq!(adapter.show().await, ShowOutcome::Shown { reward: None });
        settle().await;
        tokio::time::sleep(Duration::from_secs(30)).await;

        assert_eq!(sdk.loads(), 1);
        assert!(!adapter.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_show_without_load_reports_not_loaded_and_loads() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::Google));
        let adapter = adapter(&sdk, AdType::Interstitial);

        assert_eq!(adapter.show().await, ShowOutcome::Failed(ShowFailure::NotLoaded));
        settle().await;
        assert!(adapter.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_interstitial_show_consumes_and_reloads() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::Google));
        let adapter = adapter(&sdk, AdType::Interstitial);
        adapter.load();
        settle().await;

        assert_eq!(adapter.show().await, ShowOutcome::Shown { reward: None });
        assert_eq!(sdk.shows(), 1);

        settle().await;
        assert!(adapter.is_ready());
        assert_eq!(sdk.creates(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewarded_completion_grants_reward() {
        let payload = RewardPayload::coins(5);
        let sdk = Arc::new(
            SimulatedSdk::new(NetworkId::Google).on_show(ShowScript::Complete(Some(payload.clone()))),
        );
        let adapter = adapter(&sdk, AdType::Rewarded);
        adapter.load();
        settle().await;

        assert_eq!(adapter.show().await, ShowOutcome::Shown { reward: Some(payload) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewarded_without_payload_gets_default_reward() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::Facebook));
        let adapter = adapter(&sdk, AdType::Rewarded);
        adapter.load();
        settle().await;

        let outcome = adapter.show().await;
        assert_eq!(outcome, ShowOutcome::Shown { reward: Some(RewardPayload::coins(1)) });
    }

    #[tokio::test(start_paused = true)]
    async fn test_rewarded_dismissed_early_is_not_completed() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::AppLovin).on_show(ShowScript::Dismiss));
        let adapter = adapter(&sdk, AdType::Rewarded);
        adapter.load();
        settle().await;

        assert_eq!(adapter.show().await, ShowOutcome::Failed(ShowFailure::NotCompleted));
        settle().await;
        assert!(adapter.is_ready());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sdk_show_error_is_failure() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::Google).on_show(ShowScript::Fail));
        let adapter = adapter(&sdk, AdType::Interstitial);
        adapter.load();
        settle().await;

        assert!(matches!(adapter.show().await, ShowOutcome::Failed(ShowFailure::Error(_))));
    }

    #[tokio::test]
    async fn test_factory_skips_missing_units_and_sdks() {
        let factory = SdkAdapterFactory::new()
            .register(Arc::new(SimulatedSdk::new(NetworkId::Google)));

        let entry = NetworkEntry {
            enabled: true,
            interstitial_id: Some("unit".into()),
            ..Default::default()
        };
        assert!(factory.build(NetworkId::Google, AdType::Interstitial, &entry).is_some());
        assert!(factory.build(NetworkId::Google, AdType::Rewarded, &entry).is_none());
        assert!(factory.build(NetworkId::Facebook, AdType::Interstitial, &entry).is_none());
    }

    #[tokio::test]
    async fn test_factory_prepares_registered_sdk() {
        let sdk = Arc::new(SimulatedSdk::new(NetworkId::Google));
        let factory = SdkAdapterFactory::new().register(sdk.clone());

        factory.prepare(NetworkId::Google).await;
        factory.prepare(NetworkId::Google).await;
        factory.prepare(NetworkId::Facebook).await;
        assert!(sdk.is_initialized());
    }
}
