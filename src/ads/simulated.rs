//! Simulated Ad SDK
//!
//! In-process stand-in for a vendor SDK, driven by a scripted behaviour.
//! Used by the demo binary and the adapter/mediation tests.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::broadcast;

use crate::ads::sdk::{AdEvent, AdSdk, RewardPayload, SdkAd, SdkError};
use crate::config::model::NetworkId;

/// What a simulated ad does when shown.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowScript {
    /// Reward (rewarded ads only) then close.
    Complete(Option<RewardPayload>),
    /// Close without a reward.
    Dismiss,
    /// `show` returns an error.
    Fail,
}

#[derive(Debug)]
struct Script {
    /// Loads that fail before loads start succeeding; `u32::MAX` never loads.
    failing_loads: u32,
    on_show: ShowScript,
}

#[derive(Debug, Default)]
struct Counters {
    creates: AtomicU32,
    loads: AtomicU32,
    shows: AtomicU32,
}

/// Scripted SDK for one network.
#[derive(Debug)]
pub struct SimulatedSdk {
    network: NetworkId,
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
    initialized: AtomicBool,
}

impl SimulatedSdk {
    /// SDK whose ads load and complete.
    pub fn new(network: NetworkId) -> Self {
        Self {
            network,
            script: Arc::new(Mutex::new(Script {
                failing_loads: 0,
                on_show: ShowScript::Complete(None),
            })),
            counters: Arc::new(Counters::default()),
            initialized: AtomicBool::new(false),
        }
    }

    /// The next `count` loads fail.
    pub fn fail_loads(self, count: u32) -> Self {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).failing_loads = count;
        self
    }

    /// No load ever succeeds.
    pub fn never_loads(self) -> Self {
        self.fail_loads(u32::MAX)
    }

    /// Behaviour of subsequent shows.
    pub fn on_show(self, script: ShowScript) -> Self {
        self.set_show_script(script);
        self
    }

    /// Change the behaviour of subsequent shows.
    pub fn set_show_script(&self, script: ShowScript) {
        self.script.lock().unwrap_or_else(|e| e.into_inner()).on_show = script;
    }

    /// Ad instances created.
    pub fn creates(&self) -> u32 {
        self.counters.creates.load(Ordering::SeqCst)
    }

    /// Load calls across all instances.
    pub fn loads(&self) -> u32 {
        self.counters.loads.load(Ordering::SeqCst)
    }

    /// Show calls across all instances.
    pub fn shows(&self) -> u32 {
        self.counters.shows.load(Ordering::SeqCst)
    }

    /// Check if `init` has completed.
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    fn create(&self, unit_id: &str, rewarded: bool) -> Result<Arc<dyn SdkAd>, SdkError> {
        if unit_id.is_empty() {
            return Err(SdkError::Create("empty ad unit".into()));
        }
        self.counters.creates.fetch_add(1, Ordering::SeqCst);
        let (events, _) = broadcast::channel(16);
        Ok(Arc::new(SimulatedAd {
            rewarded,
            script: self.script.clone(),
            counters: self.counters.clone(),
            loaded: AtomicBool::new(false),
            events,
        }))
    }
}

#[async_trait]
impl AdSdk for SimulatedSdk {
    fn network(&self) -> NetworkId {
        self.network
    }

    async fn init(&self) -> Result<(), SdkError> {
        self.initialized.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn create_interstitial(&self, unit_id: &str) -> Result<Arc<dyn SdkAd>, SdkError> {
        self.create(unit_id, false)
    }

    fn create_rewarded(&self, unit_id: &str) -> Result<Arc<dyn SdkAd>, SdkError> {
        self.create(unit_id, true)
    }
}

struct SimulatedAd {
    rewarded: bool,
    script: Arc<Mutex<Script>>,
    counters: Arc<Counters>,
    loaded: AtomicBool,
    events: broadcast::Sender<AdEvent>,
}

impl SdkAd for SimulatedAd {
    fn load(&self) {
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        let fails = {
            let mut script = self.script.lock().unwrap_or_else(|e| e.into_inner());
            match script.failing_loads {
                0 => false,
                u32::MAX => true,
                _ => {
                    script.failing_loads -= 1;
                    true
                }
            }
        };

        if fails {
            let _ = self.events.send(AdEvent::Error("no fill".into()));
        } else {
            self.loaded.store(true, Ordering::SeqCst);
            let _ = self.events.send(AdEvent::Loaded);
        }
    }

    fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    fn subscribe(&self) -> broadcast::Receiver<AdEvent> {
        self.events.subscribe()
    }

    fn show(&self) -> Result<(), SdkError> {
        if !self.loaded.swap(false, Ordering::SeqCst) {
            return Err(SdkError::NotLoaded);
        }
        self.counters.shows.fetch_add(1, Ordering::SeqCst);

        let on_show = self.script.lock().unwrap_or_else(|e| e.into_inner()).on_show.clone();
        match on_show {
            ShowScript::Complete(reward) => {
                if self.rewarded {
                    let _ = self.events.send(AdEvent::EarnedReward(reward));
                }
                let _ = self.events.send(AdEvent::Closed);
                Ok(())
            }
            ShowScript::Dismiss => {
                let _ = self.events.send(AdEvent::Closed);
                Ok(())
            }
            ShowScript::Fail => Err(SdkError::Show("presentation failed".into())),
        }
    }
}
