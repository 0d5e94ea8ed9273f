//! Remote Config Client
//!
//! Fetches the ad network config from the backend and never fails the
//! caller. Resolution order:
//!
//! 1. in-memory copy, if fetched less than `ttl` ago
//! 2. backend (`GET`, `{status: "success", data: <config>}`), persisted on success
//! 3. last persisted copy
//! 4. [`AdNetworkConfig::builtin_default`]
//!
//! Every fetch captures a generation number; a response that lands after a
//! `refresh_config`/`clear_cache` started is returned to its caller but never
//! written over newer cache state.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::model::{AdNetworkConfig, NetworkEntry, NetworkId};
use crate::core::clock::{duration_ms, Clock, Timestamp};
use crate::core::hash::short_hex;
use crate::storage::{keys, read_or_absent, remove_or_log, write_or_log, KeyValueStore};

/// Default in-memory cache lifetime (5 minutes).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// Config fetch errors. Never surfaced past [`RemoteConfigClient`].
#[derive(Debug, Error)]
pub enum ConfigFetchError {
    /// Transport failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response body was not a success envelope.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Response body could not be decoded.
    #[error("decode error: {0}")]
    Decode(#[from] serde_json::Error),
}

/// Where the config returned by the last fetch came from.
///
/// Anything other than `Fresh`/`Cached` means the client is running in
/// degraded mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigOrigin {
    /// Fetched from the backend by this call.
    Fresh,
    /// Served from the in-memory cache.
    Cached,
    /// Backend unavailable; last persisted copy.
    Persisted,
    /// Backend and persisted copy unavailable; built-in default.
    Default,
}

impl ConfigOrigin {
    /// Check if the config was obtained without falling back.
    pub fn is_degraded(&self) -> bool {
        matches!(self, ConfigOrigin::Persisted | ConfigOrigin::Default)
    }
}

/// Backend response envelope.
#[derive(Debug, Deserialize)]
struct ConfigEnvelope {
    status: String,
    #[serde(default)]
    data: Option<AdNetworkConfig>,
}

/// Decode a backend response body.
pub fn decode_envelope(body: &str) -> Result<AdNetworkConfig, ConfigFetchError> {
    let envelope: ConfigEnvelope = serde_json::from_str(body)?;
    if envelope.status != "success" {
        return Err(ConfigFetchError::InvalidResponse(format!("status {:?}", envelope.status)));
    }
    envelope.data
        .ok_or_else(|| ConfigFetchError::InvalidResponse("missing data".into()))
}

/// Origin of ad configs.
#[async_trait]
pub trait ConfigSource: Send + Sync {
    /// Fetch the current config.
    async fn fetch(&self) -> Result<AdNetworkConfig, ConfigFetchError>;
}

/// Backend config endpoint over HTTP.
#[derive(Debug, Clone)]
pub struct HttpConfigSource {
    client: reqwest::Client,
    url: String,
}

impl HttpConfigSource {
    /// Create a source for `url` with a request timeout.
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, ConfigFetchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()?;
        Ok(Self { client, url: url.into() })
    }

    /// Endpoint URL.
    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ConfigSource for HttpConfigSource {
    async fn fetch(&self) -> Result<AdNetworkConfig, ConfigFetchError> {
        let body = self.client
            .get(&self.url)
            .send()
            .await?
            .error_for_status()?
            .text()
            .await?;
        decode_envelope(&body)
    }
}

#[derive(Debug, Default)]
struct CacheState {
    /// Config most recently handed out, from any tier.
    current: Option<AdNetworkConfig>,
    /// When `current` was fetched from the backend; `None` if it came from
    /// a fallback tier (so the next call retries the backend).
    fetched_at: Option<Timestamp>,
    last_origin: Option<ConfigOrigin>,
}

/// Ad config client with TTL cache and offline fallback.
pub struct RemoteConfigClient {
    source: Arc<dyn ConfigSource>,
    store: Arc<dyn KeyValueStore>,
    clock: Arc<dyn Clock>,
    ttl: Duration,
    state: RwLock<CacheState>,
    generation: AtomicU64,
}

impl RemoteConfigClient {
    /// Create a client.
    pub fn new(
        source: Arc<dyn ConfigSource>,
        store: Arc<dyn KeyValueStore>,
        clock: Arc<dyn Clock>,
        ttl: Duration,
    ) -> Self {
        Self {
            source,
            store,
            clock,
            ttl,
            state: RwLock::new(CacheState::default()),
            generation: AtomicU64::new(0),
        }
    }

    /// Get the config, from cache if still fresh.
    #[instrument(skip(self))]
    pub async fn fetch_config(&self) -> AdNetworkConfig {
        let now = self.clock.now_ms();
        {
            let mut state = self.state.write().await;
            if let (Some(config), Some(fetched_at)) = (&state.current, state.fetched_at) {
                if now - fetched_at < duration_ms(self.ttl) {
                    debug!("Using cached ad config");
                    let config = config.clone();
                    state.last_origin = Some(ConfigOrigin::Cached);
                    return config;
                }
            }
        }

        let generation = self.generation.load(Ordering::SeqCst);
        debug!("Fetching ad config from backend");

        match self.source.fetch().await {
            Ok(config) => {
                self.adopt_fresh(config.clone(), generation).await;
                config
            }
            Err(e) => {
                warn!("Ad config fetch failed: {}", e);
                self.fallback(generation).await
            }
        }
    }

    /// Drop the in-memory cache and fetch again.
    pub async fn refresh_config(&self) -> AdNetworkConfig {
        self.generation.fetch_add(1, Ordering::SeqCst);
        self.state.write().await.fetched_at = None;
        self.fetch_config().await
    }

    /// Drop the in-memory cache and the persisted copy.
    pub async fn clear_cache(&self) {
        self.generation.fetch_add(1, Ordering::SeqCst);
        {
            let mut state = self.state.write().await;
            state.current = None;
            state.fetched_at = None;
        }
        remove_or_log(self.store.as_ref(), &[keys::AD_CONFIG]).await;
    }

    /// Enabled networks by ascending priority.
    ///
    /// Before any config has been obtained this is `[google]`.
    pub async fn get_network_priority_order(&self) -> Vec<NetworkId> {
        match &self.state.read().await.current {
            Some(config) => config.priority_order(),
            None => vec![NetworkId::Google],
        }
    }

    /// Settings of one network.
    ///
    /// Before any config has been obtained this reads the built-in default.
    pub async fn network_config(&self, id: NetworkId) -> Option<NetworkEntry> {
        match &self.state.read().await.current {
            Some(config) => config.network(id).cloned(),
            None => AdNetworkConfig::builtin_default().network(id).cloned(),
        }
    }

    /// Check if a network is enabled.
    pub async fn is_network_enabled(&self, id: NetworkId) -> bool {
        self.network_config(id).await.map_or(false, |entry| entry.enabled)
    }

    /// Network the backend marks as primary.
    pub async fn active_network(&self) -> NetworkId {
        self.state.read().await.current
            .as_ref()
            .map_or(NetworkId::Google, |config| config.active_network)
    }

    /// Origin of the config returned by the last fetch.
    pub async fn last_origin(&self) -> Option<ConfigOrigin> {
        self.state.read().await.last_origin
    }

    async fn adopt_fresh(&self, config: AdNetworkConfig, generation: u64) {
        // Held across the write so a concurrent clear_cache removes the
        // persisted copy after it, never before
        let mut state = self.state.write().await;
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Discarding ad config response superseded by a newer request");
            return;
        }

        match serde_json::to_string(&config) {
            Ok(json) => {
                write_or_log(self.store.as_ref(), keys::AD_CONFIG, json).await;
            }
            Err(e) => warn!("Failed to encode ad config for persistence: {}", e),
        }

        info!("Ad config fetched (fingerprint {})", short_hex(&config.fingerprint()));
        state.current = Some(config);
        state.fetched_at = Some(self.clock.now_ms());
        state.last_origin = Some(ConfigOrigin::Fresh);
    }

    async fn fallback(&self, generation: u64) -> AdNetworkConfig {
        let (config, origin) = match self.load_persisted().await {
            Some(config) => {
                warn!("Using persisted ad config as fallback");
                (config, ConfigOrigin::Persisted)
            }
            None => {
                warn!("No persisted ad config; using built-in default");
                (AdNetworkConfig::builtin_default(), ConfigOrigin::Default)
            }
        };

        let mut state = self.state.write().await;
        if self.generation.load(Ordering::SeqCst) == generation {
            state.current = Some(config.clone());
            state.fetched_at = None;
        }
        state.last_origin = Some(origin);
        config
    }

    async fn load_persisted(&self) -> Option<AdNetworkConfig> {
        let raw = read_or_absent(self.store.as_ref(), keys::AD_CONFIG).await?;
        match serde_json::from_str(&raw) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("Persisted ad config is unreadable: {}", e);
                None
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::model::AdType;
    use crate::core::clock::ManualClock;
    use crate::storage::MemoryStore;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tokio::sync::Notify;

    /// Source returning scripted results in order, repeating the last one.
    struct ScriptedSource {
        results: Mutex<Vec<Result<AdNetworkConfig, String>>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(results: Vec<Result<AdNetworkConfig, String>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ConfigSource for ScriptedSource {
        async fn fetch(&self) -> Result<AdNetworkConfig, ConfigFetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let mut results = self.results.lock().unwrap();
            let next = if results.len() > 1 { results.remove(0) } else { results[0].clone() };
            next.map_err(ConfigFetchError::InvalidResponse)
        }
    }

    /// First fetch blocks until released and answers `first`; later
    /// fetches answer `later` at once.
    struct GatedSource {
        release: Notify,
        calls: AtomicUsize,
        first: AdNetworkConfig,
        later: AdNetworkConfig,
    }

    impl GatedSource {
        fn new(first: AdNetworkConfig, later: AdNetworkConfig) -> Arc<Self> {
            Arc::new(Self {
                release: Notify::new(),
                calls: AtomicUsize::new(0),
                first,
                later,
            })
        }

        async fn wait_for_calls(&self, n: usize) {
            while self.calls.load(Ordering::SeqCst) < n {
                tokio::task::yield_now().await;
            }
        }
    }

    #[async_trait]
    impl ConfigSource for GatedSource {
        async fn fetch(&self) -> Result<AdNetworkConfig, ConfigFetchError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                self.release.notified().await;
                return Ok(self.first.clone());
            }
            Ok(self.later.clone())
        }
    }

    fn backend_config() -> AdNetworkConfig {
        let mut config = AdNetworkConfig::builtin_default();
        config.networks.get_mut(&NetworkId::Facebook).unwrap().enabled = true;
        config.active_network = NetworkId::Facebook;
        config
    }

    fn client(
        source: Arc<ScriptedSource>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    ) -> RemoteConfigClient {
        RemoteConfigClient::new(source, store, clock, DEFAULT_CACHE_TTL)
    }

    #[tokio::test]
    async fn test_fresh_fetch_is_cached_and_persisted() {
        let source = ScriptedSource::new(vec![Ok(backend_config())]);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let client = client(source.clone(), store.clone(), clock.clone());

        let config = client.fetch_config().await;
        assert_eq!(config, backend_config());
        assert_eq!(client.last_origin().await, Some(ConfigOrigin::Fresh));
        assert!(store.peek(keys::AD_CONFIG).await.is_some());

        clock.advance(Duration::from_secs(60));
        client.fetch_config().await;
        assert_eq!(source.calls(), 1);
        assert_eq!(client.last_origin().await, Some(ConfigOrigin::Cached));
    }

    #[tokio::test]
    async fn test_ttl_expiry_refetches() {
        let source = ScriptedSource::new(vec![Ok(backend_config())]);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));
        let client = client(source.clone(), store, clock.clone());

        client.fetch_config().await;
        clock.advance(DEFAULT_CACHE_TTL);
        client.fetch_config().await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_refresh_bypasses_cache() {
        let source = ScriptedSource::new(vec![Ok(backend_config())]);
        let client = client(
            source.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
        );

        client.fetch_config().await;
        client.refresh_config().await;
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_persisted_copy() {
        let source = ScriptedSource::new(vec![Ok(backend_config()), Err("down".into())]);
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(0));

        client(source.clone(), store.clone(), clock.clone()).fetch_config().await;

        // New process: empty memory cache, backend down
        let restarted = client(source, store, clock);
        let config = restarted.fetch_config().await;
        assert_eq!(config, backend_config());
        assert_eq!(restarted.last_origin().await, Some(ConfigOrigin::Persisted));
        assert!(restarted.last_origin().await.unwrap().is_degraded());
    }

    #[tokio::test]
    async fn test_failure_without_persisted_copy_uses_default() {
        let source = ScriptedSource::new(vec![Err("down".into())]);
        let store = Arc::new(MemoryStore::new());
        let client = client(source, store.clone(), Arc::new(ManualClock::new(0)));

        let config = client.fetch_config().await;
        assert_eq!(config, AdNetworkConfig::builtin_default());
        assert_eq!(client.last_origin().await, Some(ConfigOrigin::Default));
        assert_eq!(client.get_network_priority_order().await, vec![NetworkId::Google]);
    }

    #[tokio::test]
    async fn test_unreadable_store_uses_default() {
        let source = ScriptedSource::new(vec![Err("down".into())]);
        let store = Arc::new(MemoryStore::new());
        store.set(keys::AD_CONFIG, "{not json".into()).await.unwrap();
        let client = client(source, store.clone(), Arc::new(ManualClock::new(0)));

        assert_eq!(client.fetch_config().await, AdNetworkConfig::builtin_default());

        store.fail_reads(true);
        assert_eq!(client.fetch_config().await, AdNetworkConfig::builtin_default());
    }

    #[tokio::test]
    async fn test_fallback_retries_backend_next_call() {
        let source = ScriptedSource::new(vec![Err("down".into()), Ok(backend_config())]);
        let client = client(
            source.clone(),
            Arc::new(MemoryStore::new()),
            Arc::new(ManualClock::new(0)),
        );

        client.fetch_config().await;
        let config = client.fetch_config().await;
        assert_eq!(config, backend_config());
        assert_eq!(source.calls(), 2);
    }

    #[tokio::test]
    async fn test_introspection() {
        let source = ScriptedSource::new(vec![Ok(backend_config())]);
        let client = client(source, Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)));

        // Before any fetch
        assert_eq!(client.get_network_priority_order().await, vec![NetworkId::Google]);
        assert_eq!(client.active_network().await, NetworkId::Google);
        assert!(!client.is_network_enabled(NetworkId::Facebook).await);

        client.fetch_config().await;
        assert_eq!(client.active_network().await, NetworkId::Facebook);
        assert!(client.is_network_enabled(NetworkId::Facebook).await);
        assert_eq!(
            client.get_network_priority_order().await,
            vec![NetworkId::Google, NetworkId::Facebook],
        );
        let google = client.network_config(NetworkId::Google).await.unwrap();
        assert!(google.unit_id(AdType::Interstitial).is_some());
    }

    #[tokio::test]
    async fn test_no_enabled_network_gives_empty_order() {
        let mut config = backend_config();
        for entry in config.networks.values_mut() {
            entry.enabled = false;
        }
        let source = ScriptedSource::new(vec![Ok(config)]);
        let client = client(source, Arc::new(MemoryStore::new()), Arc::new(ManualClock::new(0)));

        client.fetch_config().await;
        assert!(client.get_network_priority_order().await.is_empty());
    }

    #[tokio::test]
    async fn test_clear_cache_removes_persisted_copy() {
        let source = ScriptedSource::new(vec![Ok(backend_config())]);
        let store = Arc::new(MemoryStore::new());
        let client = client(source.clone(), store.clone(), Arc::new(ManualClock::new(0)));

        client.fetch_config().await;
        client.clear_cache().await;
        assert_eq!(store.peek(keys::AD_CONFIG).await, None);

        client.fetch_config().await;
        assert_eq!(source.calls(), 2);
    }

    #[test]
    fn test_decode_envelope() {
        let ok = r#"{"status": "success", "data": {"activeNetwork": "google"}}"#;
        assert!(decode_envelope(ok).is_ok());

        let failed = r#"{"status": "error", "message": "nope"}"#;
        assert!(matches!(decode_envelope(failed), Err(ConfigFetchError::InvalidResponse(_))));

        let missing = r#"{"status": "success"}"#;
        assert!(matches!(decode_envelope(missing), Err(ConfigFetchError::InvalidResponse(_))));

        assert!(matches!(decode_envelope("<html>"), Err(ConfigFetchError::Decode(_))));
    }

    #[tokio::test]
    async fn test_clear_cache_discards_in_flight_response() {
        let source = GatedSource::new(backend_config(), AdNetworkConfig::builtin_default());
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(RemoteConfigClient::new(
            source.clone(),
            store.clone(),
            Arc::new(ManualClock::new(0)),
            DEFAULT_CACHE_TTL,
        ));

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.fetch_config().await }
        });
        source.wait_for_calls(1).await;

        client.clear_cache().await;
        source.release.notify_one();
        pending.await.unwrap();

        assert!(store.peek(keys::AD_CONFIG).await.is_none());
        assert_eq!(client.fetch_config().await, AdNetworkConfig::builtin_default());
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refresh_wins_over_older_in_flight_fetch() {
        let mut newer = backend_config();
        newer.refresh_interval_ms = 60_000;
        let source = GatedSource::new(backend_config(), newer.clone());
        let store = Arc::new(MemoryStore::new());
        let client = Arc::new(RemoteConfigClient::new(
            source.clone(),
            store.clone(),
            Arc::new(ManualClock::new(0)),
            DEFAULT_CACHE_TTL,
        ));

        let pending = tokio::spawn({
            let client = client.clone();
            async move { client.fetch_config().await }
        });
        source.wait_for_calls(1).await;

        assert_eq!(client.refresh_config().await, newer);
        source.release.notify_one();
        pending.await.unwrap();

        assert_eq!(client.fetch_config().await, newer);
        assert_eq!(client.last_origin().await, Some(ConfigOrigin::Cached));
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);

        let persisted: AdNetworkConfig =
            serde_json::from_str(&store.peek(keys::AD_CONFIG).await.unwrap()).unwrap();
        assert_eq!(persisted, newer);
    }
}
