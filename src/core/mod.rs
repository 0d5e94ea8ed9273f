//! Core primitives.
//!
//! Time, randomness, fingerprints and the restart-surviving timer that the
//! game and ad components are built on.

pub mod clock;
pub mod hash;
pub mod rng;
pub mod ticker;
pub mod timer;

// Re-export core types
pub use clock::{Clock, ManualClock, SystemClock, Timestamp};
pub use rng::RewardRng;
pub use ticker::{TickControl, Ticker};
pub use timer::{Expiry, PersistedTimer, TimerState};
