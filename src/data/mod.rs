//! Data model moved through the acquisition pipeline.
//!
//! - [`Hit`]: one timestamped detection
//! - [`StatsUpdate`]: per-channel counters snapshot
//! - [`Spill`]: the transport unit bundling hits, stats and run metadata

pub mod hit;
pub mod spill;
pub mod stats;

pub use hit::{Hit, HitFlags};
pub use spill::{Detector, Payload, RunInfo, Spill};
pub use stats::{StatsKind, StatsUpdate};
