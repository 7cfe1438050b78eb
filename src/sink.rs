//! Consumers of merged spills.
//!
//! The builder hands every merged spill to a [`Sink`]. Sinks are called from
//! the builder task only, one call at a time, but are shared with the
//! controller (which calls `close_acquisition`) so all methods take `&self`.

use crate::data::{Hit, Spill};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use tracing::{debug, info};

/// Destination for merged, time-ordered spills.
pub trait Sink: Send + Sync {
    /// Accept one merged spill.
    fn add_spill(&self, spill: Spill);

    /// Called exactly once after the last spill of a run.
    fn flush(&self);

    /// Called by the controller after the builder has finished.
    fn close_acquisition(&self) {}
}

/// Sink that keeps every spill in memory.
#[derive(Debug, Default)]
pub struct MemorySink {
    spills: Mutex<Vec<Spill>>,
    flushes: AtomicUsize,
    closes: AtomicUsize,
}

impl MemorySink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything received so far.
    pub fn spills(&self) -> Vec<Spill> {
        self.spills.lock().clone()
    }

    /// Take the received spills, leaving the sink empty.
    pub fn take_spills(&self) -> Vec<Spill> {
        std::mem::take(&mut *self.spills.lock())
    }

    /// All delivered hits in delivery order.
    pub fn hits(&self) -> Vec<Hit> {
        self.spills
            .lock()
            .iter()
            .flat_map(|spill| spill.hits().iter().copied())
            .collect()
    }

    /// Number of `flush` calls.
    pub fn flush_count(&self) -> usize {
        self.flushes.load(Ordering::SeqCst)
    }

    /// Number of `close_acquisition` calls.
    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

impl Sink for MemorySink {
    fn add_spill(&self, spill: Spill) {
        self.spills.lock().push(spill);
    }

    fn flush(&self) {
        self.flushes.fetch_add(1, Ordering::SeqCst);
    }

    fn close_acquisition(&self) {
        self.closes.fetch_add(1, Ordering::SeqCst);
    }
}

/// Sink that logs what passes through and keeps per-channel counts.
#[derive(Debug, Default)]
pub struct SummarySink {
    channel_counts: Mutex<BTreeMap<i16, u64>>,
    spills: AtomicU64,
}

impl SummarySink {
    /// Create an empty summary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Events received per channel.
    pub fn channel_counts(&self) -> BTreeMap<i16, u64> {
        self.channel_counts.lock().clone()
    }

    /// Events received over all channels.
    pub fn total_events(&self) -> u64 {
        self.channel_counts.lock().values().sum()
    }

    /// Spills received.
    pub fn spill_count(&self) -> u64 {
        self.spills.load(Ordering::Relaxed)
    }
}

impl Sink for SummarySink {
    fn add_spill(&self, spill: Spill) {
        self.spills.fetch_add(1, Ordering::Relaxed);

        if let Some(run) = &spill.run {
            if run.is_closing() {
                info!(run_id = %run.run_id, total_events = run.total_events, "run closed");
            } else {
                info!(
                    run_id = %run.run_id,
                    detectors = run.detectors.len(),
                    "run opened"
                );
            }
        }

        let hits = spill.hits();
        {
            let mut counts = self.channel_counts.lock();
            for hit in hits {
                *counts.entry(hit.channel).or_default() += 1;
            }
        }

        debug!(
            events = hits.len(),
            first = hits.first().map(|h| h.timestamp),
            last = hits.last().map(|h| h.timestamp),
            stats = spill.stats.len(),
            "spill received"
        );
    }

    fn flush(&self) {
        let counts = self.channel_counts.lock();
        for (channel, count) in counts.iter() {
            info!(channel, events = count, "channel total");
        }
        info!(
            spills = self.spills.load(Ordering::Relaxed),
            events = counts.values().sum::<u64>(),
            "acquisition flushed"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{RunInfo, StatsKind, StatsUpdate};

    #[test]
    fn test_memory_sink_collects() {
        let sink = MemorySink::new();
        sink.add_spill(Spill::events("a", vec![Hit::new(0, 1, 5), Hit::new(1, 2, 6)]));
        sink.add_spill(Spill::default().with_stats(StatsUpdate::new(0, StatsKind::Stop)));
        sink.flush();
        sink.close_acquisition();

        assert_eq!(sink.spills().len(), 2);
        assert_eq!(sink.hits().len(), 2);
        assert_eq!(sink.flush_count(), 1);
        assert_eq!(sink.close_count(), 1);

        assert_eq!(sink.take_spills().len(), 2);
        assert!(sink.spills().is_empty());
    }

    #[test]
    fn test_summary_sink_counts_channels() {
        let sink = SummarySink::new();
        sink.add_spill(Spill::boundary(RunInfo::new(
            uuid::Uuid::new_v4(),
            vec![],
            serde_json::Value::Null,
        )));
        sink.add_spill(Spill::events(
            "a",
            vec![Hit::new(0, 1, 5), Hit::new(1, 2, 6), Hit::new(0, 3, 7)],
        ));
        sink.flush();

        assert_eq!(sink.spill_count(), 2);
        assert_eq!(sink.total_events(), 3);
        assert_eq!(sink.channel_counts().get(&0), Some(&2));
        assert_eq!(sink.channel_counts().get(&1), Some(&1));
    }
}
