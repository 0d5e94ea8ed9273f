//! Ad Network Configuration
//!
//! The backend decides which ad networks run, in which order, with which ad
//! units and frequency caps.
//!
//! - `model`: config document types and priority ordering
//! - `client`: cached fetch with offline fallback chain

pub mod client;
pub mod model;

pub use client::{
    ConfigFetchError, ConfigOrigin, ConfigSource, HttpConfigSource, RemoteConfigClient,
    DEFAULT_CACHE_TTL,
};
pub use model::{AdNetworkConfig, AdType, BannerIds, FrequencyRule, NetworkEntry, NetworkId};
