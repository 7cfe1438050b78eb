//! Periodic per-channel statistics snapshots.
//!
//! Producers attach a [`StatsUpdate`] for every channel they read out with each
//! spill. The merge builder only looks at [`StatsKind`] to learn whether a
//! channel may still deliver events; the counters are forwarded untouched to the
//! sink, which typically subtracts consecutive snapshots to get per-spill
//! live time and trigger counts.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::ops::{Add, Sub};

/// Counter key for the number of triggers seen by the channel.
pub const TRIGGER_COUNT: &str = "trigger_count";
/// Counter key for accumulated live time in seconds.
pub const LIVE_TIME: &str = "live_time";
/// Counter key for accumulated real time in seconds.
pub const REAL_TIME: &str = "real_time";
/// Counter key for dead time fraction.
pub const DEAD_TIME: &str = "dead_time";

/// Position of a snapshot within a channel's run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StatsKind {
    /// First snapshot after acquisition started
    Start,
    /// Intermediate snapshot
    Running,
    /// Final snapshot; the channel produces no further events this run
    Stop,
}

/// Statistics snapshot for one channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsUpdate {
    /// Channel the snapshot describes
    pub channel: i16,
    /// Start / running / stop marker
    pub kind: StatsKind,
    /// Wall-clock time the snapshot was taken
    pub lab_time: DateTime<Utc>,
    /// Sequence number of the spill this snapshot was read with
    pub spill_number: u64,
    /// Named device counters
    pub counters: BTreeMap<String, f64>,
    /// Instantaneous event rate in counts per second
    pub event_rate: f64,
}

impl StatsUpdate {
    /// Snapshot with no counters, stamped now.
    pub fn new(channel: i16, kind: StatsKind) -> Self {
        Self {
            channel,
            kind,
            lab_time: Utc::now(),
            spill_number: 0,
            counters: BTreeMap::new(),
            event_rate: 0.0,
        }
    }

    /// Set the spill sequence number.
    pub fn with_spill_number(mut self, spill_number: u64) -> Self {
        self.spill_number = spill_number;
        self
    }

    /// Set a named counter.
    pub fn with_counter(mut self, name: impl Into<String>, value: f64) -> Self {
        self.counters.insert(name.into(), value);
        self
    }

    /// Set the event rate.
    pub fn with_event_rate(mut self, event_rate: f64) -> Self {
        self.event_rate = event_rate;
        self
    }

    /// True for the final snapshot of a channel.
    pub fn is_stop(&self) -> bool {
        self.kind == StatsKind::Stop
    }

    /// Look up a counter.
    pub fn counter(&self, name: &str) -> Option<f64> {
        self.counters.get(name).copied()
    }

    /// Live time over real time, when the device reports both.
    pub fn live_fraction(&self) -> Option<f64> {
        let live = self.counter(LIVE_TIME)?;
        let real = self.counter(REAL_TIME)?;
        (real > 0.0).then(|| live / real)
    }

    fn combine(&self, rhs: &StatsUpdate, sign: f64) -> StatsUpdate {
        let mut counters = self.counters.clone();
        for (name, value) in &rhs.counters {
            *counters.entry(name.clone()).or_insert(0.0) += sign * value;
        }
        StatsUpdate {
            channel: self.channel,
            kind: self.kind,
            lab_time: self.lab_time,
            spill_number: self.spill_number,
            counters,
            event_rate: self.event_rate + sign * rhs.event_rate,
        }
    }
}

impl Sub for &StatsUpdate {
    type Output = StatsUpdate;

    fn sub(self, rhs: &StatsUpdate) -> StatsUpdate {
        self.combine(rhs, -1.0)
    }
}

impl Add for &StatsUpdate {
    type Output = StatsUpdate;

    fn add(self, rhs: &StatsUpdate) -> StatsUpdate {
        self.combine(rhs, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delta_between_snapshots() {
        let earlier = StatsUpdate::new(2, StatsKind::Running)
            .with_spill_number(4)
            .with_counter(TRIGGER_COUNT, 100.0)
            .with_counter(LIVE_TIME, 1.5);
        let later = StatsUpdate::new(2, StatsKind::Running)
            .with_spill_number(5)
            .with_counter(TRIGGER_COUNT, 160.0)
            .with_counter(LIVE_TIME, 2.0)
            .with_counter(REAL_TIME, 2.5);

        let delta = &later - &earlier;
        assert_eq!(delta.spill_number, 5);
        assert_eq!(delta.counter(TRIGGER_COUNT), Some(60.0));
        assert_eq!(delta.counter(LIVE_TIME), Some(0.5));
        // Keys missing on one side count as zero
        assert_eq!(delta.counter(REAL_TIME), Some(2.5));

        let restored = &delta + &earlier;
        assert_eq!(restored.counter(TRIGGER_COUNT), Some(160.0));
    }

    #[test]
    fn test_live_fraction() {
        let stats = StatsUpdate::new(0, StatsKind::Stop)
            .with_counter(LIVE_TIME, 9.0)
            .with_counter(REAL_TIME, 10.0);
        assert_eq!(stats.live_fraction(), Some(0.9));
        assert!(stats.is_stop());

        assert_eq!(StatsUpdate::new(0, StatsKind::Start).live_fraction(), None);
    }
}
