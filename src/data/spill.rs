//! The unit of transport through the acquisition pipeline.
//!
//! A [`Spill`] is created by a producer (or by the session controller for run
//! boundaries), moved through exactly one queue and consumed once by the
//! builder. Ownership moves with the value; nothing holds a reference to a spill
//! once it has been enqueued.

use super::hit::Hit;
use super::stats::StatsUpdate;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Opaque description of a detector attached to the acquisition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Detector {
    /// Detector name (e.g., "HPGe-1")
    pub name: String,
    /// Detector type (e.g., "HPGe", "LaBr3")
    #[serde(default)]
    pub kind: String,
    /// Channel the detector is wired to, if fixed
    #[serde(default)]
    pub channel: Option<i16>,
}

impl Detector {
    /// Create a detector descriptor.
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: kind.into(),
            channel: None,
        }
    }

    /// Bind the detector to a channel.
    pub fn on_channel(mut self, channel: i16) -> Self {
        self.channel = Some(channel);
        self
    }
}

/// Run-scoped metadata carried by the first and last spill of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunInfo {
    /// Unique run identifier
    pub run_id: Uuid,
    /// Wall-clock start of the run
    pub time_start: DateTime<Utc>,
    /// Wall-clock end of the run; set only on the closing boundary
    pub time_stop: Option<DateTime<Utc>>,
    /// Events delivered during the run; stamped on the closing boundary
    pub total_events: u64,
    /// Detectors in use
    pub detectors: Vec<Detector>,
    /// Settings tree snapshot
    pub settings: serde_json::Value,
}

impl RunInfo {
    /// Opening metadata for a new run.
    pub fn new(run_id: Uuid, detectors: Vec<Detector>, settings: serde_json::Value) -> Self {
        Self {
            run_id,
            time_start: Utc::now(),
            time_stop: None,
            total_events: 0,
            detectors,
            settings,
        }
    }

    /// Closing metadata: same run, final settings, stop time set to now.
    pub fn closing(&self, settings: serde_json::Value) -> Self {
        Self {
            run_id: self.run_id,
            time_start: self.time_start,
            time_stop: Some(Utc::now()),
            total_events: self.total_events,
            detectors: self.detectors.clone(),
            settings,
        }
    }

    /// True on the end-of-run marker.
    pub fn is_closing(&self) -> bool {
        self.time_stop.is_some()
    }
}

/// Event data of a spill, before or after device-specific decoding.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    /// Device-native buffer, not yet decoded
    Raw(Bytes),
    /// Decoded hits
    Events(Vec<Hit>),
}

impl Default for Payload {
    fn default() -> Self {
        Payload::Events(Vec::new())
    }
}

/// A bundle of events, per-channel statistics and optional run metadata.
///
/// Within one spill events need not be ordered across channels, but every
/// channel's hits must be non-decreasing in timestamp across the succession of
/// spills it appears in. The builder relies on this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Spill {
    /// Id of the producer that emitted the spill
    pub source: Option<String>,
    /// Raw or decoded event data
    pub payload: Payload,
    /// Latest statistics per channel
    pub stats: BTreeMap<i16, StatsUpdate>,
    /// Run boundary metadata
    pub run: Option<RunInfo>,
    /// Detector list, forwarded to the sink as-is
    pub detectors: Option<Vec<Detector>>,
}

impl Spill {
    /// Spill carrying decoded events.
    pub fn events(source: impl Into<String>, hits: Vec<Hit>) -> Self {
        Self {
            source: Some(source.into()),
            payload: Payload::Events(hits),
            ..Default::default()
        }
    }

    /// Spill carrying an undecoded device buffer.
    pub fn raw(source: impl Into<String>, data: Bytes) -> Self {
        Self {
            source: Some(source.into()),
            payload: Payload::Raw(data),
            ..Default::default()
        }
    }

    /// Run boundary marker with no events.
    pub fn boundary(run: RunInfo) -> Self {
        let detectors = run.detectors.clone();
        Self {
            run: Some(run),
            detectors: Some(detectors),
            ..Default::default()
        }
    }

    /// Attach a statistics snapshot, replacing any earlier one for its channel.
    pub fn with_stats(mut self, stats: StatsUpdate) -> Self {
        self.stats.insert(stats.channel, stats);
        self
    }

    /// Decoded hits, empty while the payload is still raw.
    pub fn hits(&self) -> &[Hit] {
        match &self.payload {
            Payload::Events(hits) => hits,
            Payload::Raw(_) => &[],
        }
    }

    /// Number of decoded hits.
    pub fn event_count(&self) -> usize {
        self.hits().len()
    }

    /// True when the payload has not been decoded yet.
    pub fn is_raw(&self) -> bool {
        matches!(self.payload, Payload::Raw(_))
    }

    /// Move the decoded hits out, leaving an empty event list.
    pub fn take_events(&mut self) -> Vec<Hit> {
        match std::mem::take(&mut self.payload) {
            Payload::Events(hits) => hits,
            raw @ Payload::Raw(_) => {
                self.payload = raw;
                Vec::new()
            }
        }
    }

    /// True when the spill has neither events nor metadata.
    pub fn is_empty(&self) -> bool {
        let no_payload = match &self.payload {
            Payload::Events(hits) => hits.is_empty(),
            Payload::Raw(data) => data.is_empty(),
        };
        no_payload && self.stats.is_empty() && self.run.is_none() && self.detectors.is_none()
    }
}
