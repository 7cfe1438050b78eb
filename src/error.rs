//! Custom error types for the acquisition controller.
//!
//! This module defines [`DaqError`], the single error type returned by the
//! library. Using the `thiserror` crate, it covers configuration problems,
//! producer lifecycle failures and decoding errors.
//!
//! ## Error Hierarchy
//!
//! - **`Config`**: Wraps `figment` extraction errors (missing file fields, bad
//!   types, environment overrides that do not parse).
//! - **`Configuration`**: Semantic validation failures on a configuration that
//!   parsed fine (e.g. duplicate producer ids).
//! - **`Boot`**, **`NoProducerBooted`**: Producer bring-up failures. A single
//!   `Boot` error is absorbed by the session controller; only the aggregate
//!   `NoProducerBooted` reaches the caller.
//! - **`NoRunnableProducer`**, **`NoProducerStarted`**, **`SessionBusy`**:
//!   Reasons a run could not be started at all.
//! - **`UnknownDriver`**, **`Driver`**: Registry lookups and factory failures.
//! - **`Decode`**: Raw device buffers that could not be turned into hits.
//!
//! Everything that can happen to a single producer during a run is logged
//! and absorbed; the run only fails when no producer takes part at all.

use thiserror::Error;

/// Convenience alias for results using the library error type.
pub type DaqResult<T> = std::result::Result<T, DaqError>;

/// Errors produced by the acquisition controller.
#[derive(Error, Debug)]
pub enum DaqError {
    /// Configuration could not be loaded or parsed
    #[error("Configuration error: {0}")]
    Config(#[from] Box<figment::Error>),

    /// Configuration parsed but is semantically invalid
    #[error("Configuration validation error: {0}")]
    Configuration(String),

    /// I/O failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A producer failed to boot
    #[error("Producer '{producer}' failed to boot: {reason}")]
    Boot {
        /// Producer id
        producer: String,
        /// Driver-reported reason
        reason: String,
    },

    /// Boot was attempted but no producer came online
    #[error("No producer booted")]
    NoProducerBooted,

    /// No producer reports the CanRun capability
    #[error("No producer is ready to run")]
    NoRunnableProducer,

    /// Every runnable producer refused to start acquisition
    #[error("No producer accepted the start request")]
    NoProducerStarted,

    /// A run is already in progress on this controller
    #[error("Session already running")]
    SessionBusy,

    /// No factory is registered for a driver type
    #[error("Unknown driver type '{0}'")]
    UnknownDriver(String),

    /// A driver factory rejected its configuration or failed to build
    #[error("Driver '{driver}' error: {reason}")]
    Driver {
        /// Driver type
        driver: String,
        /// Factory-reported reason
        reason: String,
    },

    /// A raw device buffer could not be decoded
    #[error("Decode error: {0}")]
    Decode(String),

    /// Settings tree exchange failed
    #[error("Settings error: {0}")]
    Settings(String),

    /// A background task panicked or was aborted
    #[error("Task join error: {0}")]
    Join(String),
}

impl From<figment::Error> for DaqError {
    fn from(err: figment::Error) -> Self {
        DaqError::Config(Box::new(err))
    }
}

impl From<tokio::task::JoinError> for DaqError {
    fn from(err: tokio::task::JoinError) -> Self {
        DaqError::Join(err.to_string())
    }
}

impl DaqError {
    /// Whether the controller can keep going after this error.
    ///
    /// Per-producer failures are recoverable (the run proceeds with the
    /// remaining producers); configuration and aggregate failures are not.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            DaqError::Boot { .. }
                | DaqError::Decode(_)
                | DaqError::Settings(_)
                | DaqError::SessionBusy
        )
    }
}
