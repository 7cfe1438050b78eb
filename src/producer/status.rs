//! Producer status flags.
//!
//! Status is a bitset rather than an enum because capabilities stack: a booted
//! digitizer is `LOADED | BOOTED | CAN_RUN` and may additionally offer
//! `CAN_OSCILLOSCOPE`. The aggregate status of a whole setup is the bitwise OR
//! of its producers.
//!
//! ```text
//!  LOADED|CAN_BOOT ──boot ok──▶ LOADED|BOOTED|CAN_RUN[|CAN_OSCILLOSCOPE]
//!        ▲   │                                   │
//!        │   └──boot failed (unchanged)          │
//!        └────────────── shutdown ───────────────┘
//! ```

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

bitflags! {
    /// Bitset of producer lifecycle and capability flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct ProducerStatus: u8 {
        /// Driver is loaded and configured.
        const LOADED = 1 << 0;
        /// Hardware can be booted.
        const CAN_BOOT = 1 << 1;
        /// Hardware is online.
        const BOOTED = 1 << 2;
        /// Acquisition can be started.
        const CAN_RUN = 1 << 3;
        /// Oscilloscope traces can be read.
        const CAN_OSCILLOSCOPE = 1 << 4;
        /// Device-specific commands can be executed.
        const CAN_EXECUTE = 1 << 5;
    }
}

impl ProducerStatus {
    /// State of a freshly constructed producer.
    pub const fn initial() -> Self {
        Self::LOADED.union(Self::CAN_BOOT)
    }

    /// State after a successful boot.
    pub const fn booted() -> Self {
        Self::LOADED.union(Self::BOOTED).union(Self::CAN_RUN)
    }

    /// Shorthand for `contains(CAN_RUN)`.
    pub const fn can_run(self) -> bool {
        self.contains(Self::CAN_RUN)
    }

    /// Shorthand for `contains(BOOTED)`.
    pub const fn is_booted(self) -> bool {
        self.contains(Self::BOOTED)
    }
}

impl Default for ProducerStatus {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for ProducerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_empty() {
            return f.write_str("(none)");
        }
        bitflags::parser::to_writer(self, f)
    }
}
