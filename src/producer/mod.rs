//! Producer contract implemented by every hardware driver.
//!
//! A producer wraps one instrument module (a digitizer, an MCA, a replayed
//! recording) behind a uniform lifecycle:
//!
//! ```text
//! boot() ──▶ daq_start(queue) ──▶ [polling task pushes Spills] ──▶ daq_stop() ──▶ shutdown()
//! ```
//!
//! Methods take `&self`; drivers keep their mutable state behind locks so that
//! a producer can be shared as `Arc<dyn Producer>` between the session
//! controller and the registry.
//!
//! # Contract
//!
//! - Every channel's hits must be non-decreasing in timestamp across the spills
//!   the producer emits.
//! - `daq_stop()` must make the polling task push a final spill carrying a
//!   [`StatsKind::Stop`] snapshot for every channel it read, then terminate.
//!   The builder holds back other channels while an open channel has no
//!   buffered events, so a channel that never reports `Stop` stalls merging
//!   until the run ends.
//! - Once `daq_stop()` has returned the producer must not enqueue anything
//!   else.
//!
//! [`StatsKind::Stop`]: crate::data::StatsKind::Stop

pub mod codec;
pub mod mock;
pub mod registry;
pub mod replay;
pub mod status;
mod task;

pub use codec::{ListModeCodec, SpillDecoder};
pub use mock::{MockProducer, MockProducerConfig, MockProducerFactory};
pub use registry::{ProducerFactory, ProducerRegistry};
pub use replay::ReplayProducer;
pub use status::ProducerStatus;

use crate::error::DaqResult;
use crate::queue::SpillQueue;
use async_trait::async_trait;
use std::sync::Arc;

/// Uniform lifecycle and acquisition surface of a hardware driver.
#[async_trait]
pub trait Producer: Send + Sync {
    /// Unique producer id (from configuration).
    fn id(&self) -> &str;

    /// Current status flags.
    fn status(&self) -> ProducerStatus;

    /// Bring the hardware online.
    ///
    /// On success the status becomes `LOADED | BOOTED | CAN_RUN` (plus any
    /// optional capabilities). On failure it stays `LOADED | CAN_BOOT`.
    async fn boot(&self) -> DaqResult<()>;

    /// Take the hardware offline, stopping acquisition first if needed.
    ///
    /// Always leaves the producer in `LOADED | CAN_BOOT`. Idempotent.
    async fn shutdown(&self) -> DaqResult<()>;

    /// Start the polling task feeding `queue`.
    ///
    /// Returns `false` when the producer is not runnable or already running.
    async fn daq_start(&self, queue: SpillQueue) -> bool;

    /// Ask the polling task to emit its final `Stop` spill and wait for it.
    ///
    /// Returns `false` when nothing was running.
    async fn daq_stop(&self) -> bool;

    /// Whether the polling task is alive.
    fn daq_running(&self) -> bool;

    /// Read the complete settings tree from the device.
    async fn read_settings_bulk(&self) -> DaqResult<serde_json::Value>;

    /// Write a complete settings tree to the device.
    async fn write_settings_bulk(&self, settings: serde_json::Value) -> DaqResult<()>;

    /// Decoder for this producer's raw payloads, if it emits any.
    fn decoder(&self) -> Option<Arc<dyn SpillDecoder>> {
        None
    }

    /// Channels this producer reads out.
    ///
    /// The builder waits for data on a declared detector channel only while a
    /// started producer owns it. Empty when unknown.
    fn channels(&self) -> Vec<i16> {
        Vec::new()
    }
}
