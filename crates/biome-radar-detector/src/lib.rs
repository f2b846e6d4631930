//! biome-radar-detector: the stateful side of biome detection.
//!
//! [`BiomeDetector`] polls the log source on a timer, feeds each tracked
//! account's fresh signals through the transition table and publishes the
//! resulting events on an [`EventBus`]. Waiters use scoped, cancellable
//! waits on the same bus.

pub mod bus;
pub mod detector;
pub mod resolver;

pub use bus::{BusEvent, EventBus, ListenerId, PendingWait, WaitError};
pub use detector::{BiomeDetector, CycleOutcome, DetectorConfig};
pub use resolver::{AccountLookup, AccountResolver, LookupError};
