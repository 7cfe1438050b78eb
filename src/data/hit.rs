//! Single detection records.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

bitflags! {
    /// Per-hit qualifier bits reported by the digitizer.
    ///
    /// Bits without a named flag are kept as the device reported them.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    #[serde(transparent)]
    pub struct HitFlags: u8 {
        /// Pulse pile-up was detected for this hit.
        const PILEUP = 1 << 0;
        /// The ADC range overflowed.
        const OVERFLOW = 1 << 1;
        /// Hit was produced by a retrigger inside the shaping window.
        const RETRIGGER = 1 << 2;
        /// An external veto input was active.
        const VETO = 1 << 3;
    }
}

/// One timestamped detection from one channel.
///
/// `timestamp` is in device ticks and is only comparable between channels that
/// share a clock. Ordering is by `(timestamp, channel)` so that simultaneous
/// hits always merge the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Hit {
    /// Detector channel the hit was recorded on
    pub channel: i16,
    /// Monotonic device clock value
    pub timestamp: u64,
    /// Uncalibrated pulse height
    pub energy: u16,
    /// Qualifier bits
    pub flags: HitFlags,
}

impl Hit {
    /// Create an unflagged hit.
    pub const fn new(channel: i16, timestamp: u64, energy: u16) -> Self {
        Self {
            channel,
            timestamp,
            energy,
            flags: HitFlags::empty(),
        }
    }

    /// Attach qualifier bits.
    pub const fn with_flags(mut self, flags: HitFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Merge key used by the builder.
    pub const fn order_key(&self) -> (u64, i16) {
        (self.timestamp, self.channel)
    }
}

impl PartialOrd for Hit {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Hit {
    fn cmp(&self, other: &Self) -> Ordering {
        self.order_key()
            .cmp(&other.order_key())
            .then_with(|| self.energy.cmp(&other.energy))
            .then_with(|| self.flags.bits().cmp(&other.flags.bits()))
    }
}

impl fmt::Display for Hit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "ch{}@{} E={}",
            self.channel, self.timestamp, self.energy
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hit_ordering_by_timestamp_then_channel() {
        let a = Hit::new(3, 10, 100);
        let b = Hit::new(1, 10, 50);
        let c = Hit::new(0, 11, 0);

        let mut hits = vec![c, a, b];
        hits.sort();
        assert_eq!(hits, vec![b, a, c]);
    }

    #[test]
    fn test_flags() {
        let mut flags = HitFlags::PILEUP | HitFlags::VETO;
        assert!(flags.contains(HitFlags::PILEUP));
        assert!(!flags.contains(HitFlags::OVERFLOW));

        flags.insert(HitFlags::OVERFLOW);
        assert!(flags.contains(HitFlags::OVERFLOW | HitFlags::VETO));
        assert_eq!(HitFlags::from_bits_retain(flags.bits()), flags);
        assert!(HitFlags::empty().is_empty());

        // Undocumented device bits survive a round trip through the raw value
        let vendor = HitFlags::from_bits_retain(0x80 | HitFlags::VETO.bits());
        assert!(vendor.contains(HitFlags::VETO));
        assert_eq!(vendor.bits(), 0x88);
    }
}
