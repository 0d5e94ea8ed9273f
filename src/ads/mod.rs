//! Ad Mediation
//!
//! - `sdk`: the vendor SDK surface the adapters wrap
//! - `adapter`: one load/show slot per network and ad type
//! - `frequency`: per-session frequency caps
//! - `mediation`: priority-ordered fallback across networks
//! - `simulated`: scripted in-process SDK

pub mod adapter;
pub mod frequency;
pub mod mediation;
pub mod sdk;
pub mod simulated;

pub use adapter::{
    AdAdapter, AdapterFactory, NetworkAdapter, SdkAdapterFactory, ShowFailure, ShowOutcome,
    DEFAULT_RETRY_BACKOFF,
};
pub use frequency::{AdSessionState, FrequencyBlock};
pub use mediation::{AdStatus, DeclineReason, MediationEngine, MediationOutcome};
pub use sdk::{AdEvent, AdSdk, RewardPayload, SdkAd, SdkError};
pub use simulated::{ShowScript, SimulatedSdk};
