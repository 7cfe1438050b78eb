//! Producer that replays pre-recorded spills.
//!
//! Useful for re-running the merge on data captured earlier and for driving
//! the pipeline with exact, hand-written event sequences in tests. One spill
//! is pushed per poll interval; once the recording is exhausted the producer
//! idles until `daq_stop()`, then reports `Stop` for every channel it has
//! emitted.

use super::status::ProducerStatus;
use super::task::PollingSlot;
use super::Producer;
use crate::data::{Spill, StatsKind, StatsUpdate};
use crate::error::DaqResult;
use crate::queue::SpillQueue;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeSet;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Replays a fixed list of spills.
pub struct ReplayProducer {
    id: String,
    recording: Vec<Spill>,
    channels: Vec<i16>,
    interval: Duration,
    settings: RwLock<serde_json::Value>,
    status: Mutex<ProducerStatus>,
    polling: PollingSlot,
}

impl ReplayProducer {
    /// Replay `recording`, one spill every `interval`.
    pub fn new(id: impl Into<String>, recording: Vec<Spill>, interval: Duration) -> Self {
        let channels = recorded_channels(&recording).into_iter().collect();
        Self {
            id: id.into(),
            recording,
            channels,
            interval,
            settings: RwLock::new(serde_json::Value::Object(Default::default())),
            status: Mutex::new(ProducerStatus::initial()),
            polling: PollingSlot::default(),
        }
    }

    /// Number of recorded spills.
    pub fn len(&self) -> usize {
        self.recording.len()
    }

    /// True when the recording holds no spills.
    pub fn is_empty(&self) -> bool {
        self.recording.is_empty()
    }
}

#[async_trait]
impl Producer for ReplayProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> ProducerStatus {
        *self.status.lock()
    }

    async fn boot(&self) -> DaqResult<()> {
        *self.status.lock() = ProducerStatus::booted();
        debug!(producer = %self.id, spills = self.recording.len(), "replay producer booted");
        Ok(())
    }

    async fn shutdown(&self) -> DaqResult<()> {
        self.polling.stop().await;
        *self.status.lock() = ProducerStatus::initial();
        Ok(())
    }

    async fn daq_start(&self, queue: SpillQueue) -> bool {
        if !self.status().can_run() {
            warn!(producer = %self.id, "daq_start refused: not booted");
            return false;
        }
        let id = self.id.clone();
        let recording = self.recording.clone();
        let interval = self.interval;
        let started = self
            .polling
            .start(move |stop_rx| replay(id, recording, interval, queue, stop_rx));
        if started {
            info!(producer = %self.id, "replay started");
        }
        started
    }

    async fn daq_stop(&self) -> bool {
        self.polling.stop().await
    }

    fn daq_running(&self) -> bool {
        self.polling.is_running()
    }

    async fn read_settings_bulk(&self) -> DaqResult<serde_json::Value> {
        Ok(self.settings.read().clone())
    }

    async fn write_settings_bulk(&self, settings: serde_json::Value) -> DaqResult<()> {
        *self.settings.write() = settings;
        Ok(())
    }

    fn channels(&self) -> Vec<i16> {
        self.channels.clone()
    }
}

fn recorded_channels(recording: &[Spill]) -> BTreeSet<i16> {
    recording
        .iter()
        .flat_map(|spill| {
            spill
                .hits()
                .iter()
                .map(|hit| hit.channel)
                .chain(spill.stats.keys().copied())
        })
        .collect()
}

async fn replay(
    id: String,
    recording: Vec<Spill>,
    interval: Duration,
    queue: SpillQueue,
    mut stop_rx: watch::Receiver<bool>,
) {
    let mut seen = BTreeSet::new();
    let mut spill_number = 0u64;
    let mut pending = recording.into_iter().peekable();

    loop {
        if pending.peek().is_none() {
            // Recording exhausted; idle until the stop request
            let _ = stop_rx.changed().await;
            break;
        }
        tokio::select! {
            _ = tokio::time::sleep(interval) => {
                if let Some(mut spill) = pending.next() {
                    seen.extend(spill.hits().iter().map(|hit| hit.channel));
                    seen.extend(spill.stats.keys().copied());
                    spill.source = Some(id.clone());
                    spill_number += 1;
                    queue.enqueue(spill);
                }
            }
            _ = stop_rx.changed() => break,
        }
    }

    let stop = seen.into_iter().fold(Spill::events(id, Vec::new()), |spill, channel| {
        spill.with_stats(StatsUpdate::new(channel, StatsKind::Stop).with_spill_number(spill_number))
    });
    queue.enqueue(stop);
}
