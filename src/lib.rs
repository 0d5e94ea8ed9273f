//! # MTC Mining Client Core
//!
//! Ad mediation and restart-surviving session timers for the MTC mining
//! client.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                    MTC CLIENT CORE                           │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Primitives                                │
//! │  ├── clock.rs    - Wall clock and manual test clock          │
//! │  ├── rng.rs      - Xorshift128+ reward RNG                   │
//! │  ├── hash.rs     - Config fingerprints                       │
//! │  ├── timer.rs    - Persisted elapsed-time timer              │
//! │  └── ticker.rs   - Cancellable 1 Hz tick loop                │
//! │                                                              │
//! │  storage/        - Durable key-value store contract          │
//! │  config/         - Ad network config, cache and fallback     │
//! │                                                              │
//! │  ads/            - Ad mediation                              │
//! │  ├── sdk.rs      - Vendor SDK surface                        │
//! │  ├── adapter.rs  - Per-network load/show slots               │
//! │  ├── frequency.rs- Frequency caps                            │
//! │  └── mediation.rs- Priority fallback across networks         │
//! │                                                              │
//! │  game/           - Mining, boxes, gift, wallet, boosts       │
//! │  app.rs          - UI intents                                │
//! │  settings.rs     - Environment overrides                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Failure Policy
//!
//! Nothing in this crate panics or fails on infrastructure errors:
//! - config fetch failures fall back to the persisted copy, then a default
//! - ad load failures are retried; show failures are structured outcomes
//! - storage failures are logged and read as "absent"
//!
//! Only player-intent rejections (exhausted round, too few coins) are
//! returned as `Err`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod ads;
pub mod app;
pub mod config;
pub mod core;
pub mod game;
pub mod settings;
pub mod storage;

// Re-export commonly used types
pub use ads::{MediationEngine, MediationOutcome};
pub use app::{GameConfig, MiningApp};
pub use config::{AdNetworkConfig, AdType, NetworkId, RemoteConfigClient};
pub use crate::core::clock::{Clock, SystemClock};
pub use settings::ClientSettings;
pub use storage::{KeyValueStore, MemoryStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
