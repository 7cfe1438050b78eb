//! Decoding of raw device buffers into hits.
//!
//! Producers may hand the builder undecoded buffers ([`Payload::Raw`]) so that
//! the polling task spends its time on hardware I/O only. The builder looks up
//! the [`SpillDecoder`] registered for the spill's source and decodes before
//! merging.
//!
//! [`ListModeCodec`] is the fixed-size record format used by the mock producer
//! and by list-mode dumps:
//!
//! ```text
//! offset  size  field
//!   0      2    channel    (i16, little endian)
//!   2      8    timestamp  (u64, little endian)
//!  10      2    energy     (u16, little endian)
//!  12      1    flags      (u8)
//! ```
//!
//! [`Payload::Raw`]: crate::data::Payload::Raw

use crate::data::{Hit, HitFlags};
use crate::error::{DaqError, DaqResult};
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// Turns a device-native buffer into hits.
///
/// Implementations must preserve the per-channel order in which the device
/// recorded the hits.
pub trait SpillDecoder: Send + Sync {
    /// Short format name for logging.
    fn format(&self) -> &'static str;

    /// Decode one buffer.
    fn decode(&self, raw: &[u8]) -> DaqResult<Vec<Hit>>;
}

/// Fixed-record little-endian list-mode format.
#[derive(Debug, Clone, Copy, Default)]
pub struct ListModeCodec;

impl ListModeCodec {
    /// Bytes per encoded hit.
    pub const RECORD_SIZE: usize = 13;

    /// Encode hits in record order.
    pub fn encode(hits: &[Hit]) -> Bytes {
        let mut buf = BytesMut::with_capacity(hits.len() * Self::RECORD_SIZE);
        for hit in hits {
            buf.put_i16_le(hit.channel);
            buf.put_u64_le(hit.timestamp);
            buf.put_u16_le(hit.energy);
            buf.put_u8(hit.flags.bits());
        }
        buf.freeze()
    }
}

impl SpillDecoder for ListModeCodec {
    fn format(&self) -> &'static str {
        "list_mode_v1"
    }

    fn decode(&self, raw: &[u8]) -> DaqResult<Vec<Hit>> {
        if raw.len() % Self::RECORD_SIZE != 0 {
            return Err(DaqError::Decode(format!(
                "buffer of {} bytes is not a whole number of {}-byte records",
                raw.len(),
                Self::RECORD_SIZE
            )));
        }

        let mut buf = raw;
        let mut hits = Vec::with_capacity(raw.len() / Self::RECORD_SIZE);
        while buf.has_remaining() {
            let channel = buf.get_i16_le();
            let timestamp = buf.get_u64_le();
            let energy = buf.get_u16_le();
            let flags = HitFlags::from_bits_retain(buf.get_u8());
            hits.push(Hit {
                channel,
                timestamp,
                energy,
                flags,
            });
        }
        Ok(hits)
    }
}
