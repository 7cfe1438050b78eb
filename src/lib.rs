//! # Spectro DAQ Core Library
//!
//! Acquisition core for list-mode nuclear spectroscopy. Several producers
//! (digitizers, simulators, replays) deliver spills of timestamped hits that
//! are ordered per channel only; this crate merges them into one globally
//! time-ordered stream and brackets every run with boundary metadata.
//!
//! ## Crate Structure
//!
//! - **`data`**: Core records: `Hit`, `StatsUpdate`, `Spill`, `RunInfo`, `Detector`.
//! - **`queue`**: `BlockingQueue`, the unbounded many-producer queue feeding the builder.
//! - **`producer`**: The `Producer` trait, status flags, raw decoders, the driver
//!   registry and the built-in mock and replay producers.
//! - **`builder`**: `SpillBuilder`, the k-way merge and drain worker.
//! - **`session`**: `SessionController`, which boots producers and runs acquisitions.
//! - **`sink`**: The `Sink` trait for merged output plus in-memory and logging sinks.
//! - **`config`**: Figment-based configuration (TOML + environment).
//! - **`logging`**: `tracing-subscriber` initialisation.
//! - **`error`**: The crate-wide `DaqError` enum.

pub mod builder;
pub mod config;
pub mod data;
pub mod error;
pub mod logging;
pub mod producer;
pub mod queue;
pub mod session;
pub mod sink;

pub use builder::{BuilderReport, SpillBuilder};
pub use config::DaqConfig;
pub use data::{Detector, Hit, HitFlags, Payload, RunInfo, Spill, StatsKind, StatsUpdate};
pub use error::{DaqError, DaqResult};
pub use producer::{Producer, ProducerRegistry, ProducerStatus};
pub use queue::{BlockingQueue, SpillQueue};
pub use session::{RunResult, SessionController, SessionState, StopReason};
pub use sink::{MemorySink, Sink, SummarySink};
pub use tokio_util::sync::CancellationToken;
