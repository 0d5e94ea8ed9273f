//! MTC Client Core Demo
//!
//! Runs the client core against an in-memory store, simulated ad SDKs and a
//! manual clock: a mediated ad round, a mining session across two restarts
//! and a reward box round.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mtc_core::{
    ads::{SdkAdapterFactory, ShowScript, SimulatedSdk},
    app::{GameConfig, MiningApp},
    config::{
        client::decode_envelope, AdNetworkConfig, AdType, ConfigFetchError, ConfigSource,
        HttpConfigSource, NetworkId, RemoteConfigClient,
    },
    core::clock::{Clock, ManualClock, SystemClock},
    game::TimeBoost,
    ClientSettings, MediationEngine, MemoryStore, VERSION,
};

/// Backend response served when no endpoint is configured.
const DEMO_CONFIG: &str = r#"{
    "status": "success",
    "data": {
        "activeNetwork": "google",
        "fallbackEnabled": true,
        "refreshInterval": 300000,
        "networks": {
            "google": {"enabled": true, "priority": 1, "interstitialId": "g-inter", "rewardedId": "g-reward"},
            "facebook": {"enabled": true, "priority": 2, "interstitialId": "fb-inter", "rewardedId": "fb-reward"},
            "applovin": {"enabled": true, "priority": 3, "interstitialId": "al-inter", "rewardedId": "al-reward", "sdkKey": "demo"}
        },
        "adFrequency": {
            "interstitial": {"minInterval": 60000, "maxPerSession": 5},
            "rewarded": {"minInterval": 30000, "maxPerSession": 10}
        }
    }
}"#;

struct DemoSource;

#[async_trait]
impl ConfigSource for DemoSource {
    async fn fetch(&self) -> Result<AdNetworkConfig, ConfigFetchError> {
        decode_envelope(DEMO_CONFIG)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let settings = ClientSettings::from_env();
    info!("MTC Client Core v{}", VERSION);
    info!("Config TTL: {:?}, ad retry: {:?}", settings.config_ttl, settings.ad_retry_backoff);

    let source: Arc<dyn ConfigSource> = if std::env::var("MTC_AD_CONFIG_URL").is_ok() {
        info!("Fetching ad config from {}", settings.ad_config_url);
        Arc::new(HttpConfigSource::new(settings.ad_config_url.clone(), settings.http_timeout)?)
    } else {
        Arc::new(DemoSource)
    };

    let store = Arc::new(MemoryStore::new());
    let clock = Arc::new(ManualClock::new(SystemClock.now_ms()));

    let client = Arc::new(RemoteConfigClient::new(source, store.clone(), clock.clone(), settings.config_ttl));
    let factory = SdkAdapterFactory::with_retry_backoff(settings.ad_retry_backoff)
        .register(Arc::new(SimulatedSdk::new(NetworkId::Google).never_loads()))
        .register(Arc::new(SimulatedSdk::new(NetworkId::Facebook)))
        .register(Arc::new(SimulatedSdk::new(NetworkId::AppLovin).on_show(ShowScript::Dismiss)));
    let ads = Arc::new(MediationEngine::new(client, Arc::new(factory), clock.clone()));

    demo_ads(&ads).await?;
    demo_mining(&store, &clock, &ads).await;

    ads.shutdown().await;
    Ok(())
}

/// Mediated shows with an unfillable first network.
async fn demo_ads(ads: &Arc<MediationEngine>) -> anyhow::Result<()> {
    info!("=== Ad Mediation ===");
    ads.initialize().await;
    // Let the adapters load
    tokio::time::sleep(Duration::from_millis(50)).await;

    for ad_type in AdType::ALL {
        let outcome = ads.show(ad_type).await;
        info!("{} -> {}", ad_type, serde_json::to_string(&outcome)?);
    }

    let again = ads.show(AdType::Interstitial).await;
    info!("interstitial again -> {}", serde_json::to_string(&again)?);

    info!("Status: {}", serde_json::to_string_pretty(&ads.status().await)?);
    Ok(())
}

/// Mining session across restarts, boxes and boosts.
async fn demo_mining(store: &Arc<MemoryStore>, clock: &Arc<ManualClock>, ads: &Arc<MediationEngine>) {
    info!("=== Mining ===");
    let app = MiningApp::load(GameConfig::default(), store.clone(), clock.clone(), ads.clone()).await;
    if let Err(e) = app.start_mining().await {
        info!("Could not start mining: {}", e);
    }
    app.shutdown().await;
    drop(app);

    clock.advance(Duration::from_secs(60));
    let app = MiningApp::load(GameConfig::default(), store.clone(), clock.clone(), ads.clone()).await;
    app.resume().await;
    info!("After restart: {:?}", app.mining_snapshot().await);
    app.shutdown().await;
    drop(app);

    clock.advance(Duration::from_secs(200));
    let app = MiningApp::load(GameConfig::default(), store.clone(), clock.clone(), ads.clone()).await;
    app.resume().await;
    info!("After expiry: {:?}", app.mining_snapshot().await);

    info!("=== Rewards ===");
    for index in 0..4 {
        match app.open_box(index).await {
            Ok(value) => {
                let balance = app.claim_box(index).await.unwrap_or_default();
                info!("Box {}: {} coins (balance {})", index, value, balance);
            }
            Err(e) => info!("Box {}: {}", index, e),
        }
    }
    if let Ok(value) = app.open_gift().await {
        info!("Daily gift: {} coins", value);
        let _ = app.claim_gift().await;
    }

    match app.apply_time_boost(TimeBoost::ONE_HOUR).await {
        Ok(state) => info!("Boosted: {} ms left", state.remaining_ms()),
        Err(e) => info!("Boost refused: {}", e),
    }
    info!("Balance: {}, mining: {:?}", app.balance().await, app.mining_snapshot().await);
    app.shutdown().await;
}
