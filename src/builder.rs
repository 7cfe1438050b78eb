//! Merge/drain builder: turns per-producer spills into one time-ordered stream.
//!
//! Producers only guarantee that each channel's hits are non-decreasing in
//! time. The builder buffers hits per channel ("lanes") and performs a k-way
//! merge over the lane fronts, keyed on `(timestamp, channel)`:
//!
//! ```text
//!  SpillQueue ──► decode ──► lanes[ch 0]: 12 15 31 ─┐
//!                            lanes[ch 1]: 14 40    ─┼─► min-heap ──► output spill ──► Sink
//!                            lanes[ch 2]: (empty)  ─┘   of fronts
//! ```
//!
//! A hit can only be emitted once every channel that may still produce data
//! has something buffered: an empty open lane could later deliver a hit older
//! than anything currently held. A lane is open until its channel reports
//! [`StatsKind::Stop`]. Lanes are created by the first hit or statistics for a
//! channel, and up front for the channels passed to
//! [`SpillBuilder::with_channels`]. Channels the builder has never heard of do
//! not block.
//!
//! Statistics, run metadata and detector lists travel with the spill that
//! carried them and are released ("drained") only once every hit of that spill
//! has been emitted. A spill never drains ahead of an older pending spill from
//! the same source or touching the same channels, so a channel's `Stop` always
//! follows its last hits. Run boundaries drain strictly in arrival order
//! relative to the spills before them, so the closing boundary is always the
//! last spill the sink receives.
//!
//! [`StatsKind::Stop`]: crate::data::StatsKind::Stop

use crate::data::{Hit, Payload, Spill};
use crate::producer::SpillDecoder;
use crate::queue::SpillQueue;
use crate::sink::Sink;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tracing::{debug, info, instrument, trace, warn};

/// Counters returned when the builder finishes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuilderReport {
    /// Spills taken from the queue
    pub spills_in: u64,
    /// Spills handed to the sink
    pub spills_out: u64,
    /// Hits handed to the sink
    pub events_out: u64,
    /// Raw spills that could not be decoded
    pub decode_errors: u64,
}

/// Heap entry for the front hit of one lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct LaneFront {
    timestamp: u64,
    channel: i16,
}

impl PartialOrd for LaneFront {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LaneFront {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the oldest hit on top
        other
            .timestamp
            .cmp(&self.timestamp)
            .then_with(|| other.channel.cmp(&self.channel))
    }
}

/// Buffered hits of one channel, each tagged with its in-flight spill.
#[derive(Debug)]
struct Lane {
    hits: VecDeque<(Hit, u64)>,
    open: bool,
}

impl Lane {
    fn new(open: bool) -> Self {
        Self {
            hits: VecDeque::new(),
            open,
        }
    }

    fn is_starved(&self) -> bool {
        self.open && self.hits.is_empty()
    }
}

/// A received spill whose hits are not all emitted yet.
#[derive(Debug)]
struct InFlight {
    spill: Spill,
    remaining: usize,
    channels: BTreeSet<i16>,
}

impl InFlight {
    fn is_held_by(&self, sources: &HashSet<String>, channels: &BTreeSet<i16>) -> bool {
        self.spill
            .source
            .as_ref()
            .is_some_and(|source| sources.contains(source))
            || !self.channels.is_disjoint(channels)
    }
}

/// Merges spills from a [`SpillQueue`] into a [`Sink`].
///
/// Owned by exactly one task; see [`SpillBuilder::run`].
pub struct SpillBuilder {
    sink: Arc<dyn Sink>,
    decoders: HashMap<String, Arc<dyn SpillDecoder>>,
    in_flight: BTreeMap<u64, InFlight>,
    next_seq: u64,
    lanes: BTreeMap<i16, Lane>,
    fronts: BinaryHeap<LaneFront>,
    output: Vec<Hit>,
    closed: bool,
    report: BuilderReport,
}

impl SpillBuilder {
    /// Create a builder delivering into `sink`.
    pub fn new(sink: Arc<dyn Sink>) -> Self {
        Self {
            sink,
            decoders: HashMap::new(),
            in_flight: BTreeMap::new(),
            next_seq: 0,
            lanes: BTreeMap::new(),
            fronts: BinaryHeap::new(),
            output: Vec::new(),
            closed: false,
            report: BuilderReport::default(),
        }
    }

    /// Decode raw spills whose `source` is `source` with `decoder`.
    pub fn with_decoder(mut self, source: impl Into<String>, decoder: Arc<dyn SpillDecoder>) -> Self {
        self.decoders.insert(source.into(), decoder);
        self
    }

    /// Hold the merge for `channels` until each has delivered data or `Stop`.
    pub fn with_channels(mut self, channels: impl IntoIterator<Item = i16>) -> Self {
        for channel in channels {
            self.lanes.entry(channel).or_insert_with(|| Lane::new(true));
        }
        self
    }

    /// Consume the queue until it is stopped, then flush the sink.
    #[instrument(skip_all, name = "spill_builder")]
    pub async fn run(mut self, queue: SpillQueue) -> BuilderReport {
        debug!(decoders = self.decoders.len(), "builder started");
        while let Some(spill) = queue.dequeue().await {
            self.push(spill);
        }
        self.finish()
    }

    /// Feed one spill, emitting whatever can be emitted in order.
    pub fn push(&mut self, mut spill: Spill) {
        self.report.spills_in += 1;
        let seq = self.next_seq;
        self.next_seq += 1;

        let hits = self.decode(&mut spill);

        let remaining = hits.len();
        let mut channels: BTreeSet<i16> = spill.stats.keys().copied().collect();
        for hit in hits {
            channels.insert(hit.channel);
            let lane = self
                .lanes
                .entry(hit.channel)
                .or_insert_with(|| Lane::new(true));
            if lane.hits.is_empty() {
                self.fronts.push(LaneFront {
                    timestamp: hit.timestamp,
                    channel: hit.channel,
                });
            }
            lane.hits.push_back((hit, seq));
        }

        // Statistics describe the channel after this spill's hits
        for (channel, stats) in &spill.stats {
            self.lanes
                .entry(*channel)
                .or_insert_with(|| Lane::new(true))
                .open = !stats.is_stop();
        }

        trace!(seq, remaining, source = ?spill.source, "spill in flight");
        self.in_flight.insert(
            seq,
            InFlight {
                spill,
                remaining,
                channels,
            },
        );

        self.merge();
        self.drain();
    }

    /// Treat input as closed: emit everything still buffered, flush the sink
    /// and return the counters.
    pub fn finish(mut self) -> BuilderReport {
        self.closed = true;
        self.merge();
        self.drain();

        if !self.in_flight.is_empty() {
            warn!(spills = self.in_flight.len(), "spills left in flight after close");
        }
        if !self.output.is_empty() {
            self.deliver(Spill::default());
        }

        self.sink.flush();
        info!(
            spills_in = self.report.spills_in,
            spills_out = self.report.spills_out,
            events_out = self.report.events_out,
            decode_errors = self.report.decode_errors,
            "builder finished"
        );
        self.report
    }

    /// Counters so far.
    pub fn report(&self) -> BuilderReport {
        self.report
    }

    /// Hits buffered but not yet emitted.
    pub fn buffered_events(&self) -> usize {
        self.lanes.values().map(|lane| lane.hits.len()).sum()
    }

    /// Spills received but not yet drained.
    pub fn in_flight(&self) -> usize {
        self.in_flight.len()
    }

    fn decode(&mut self, spill: &mut Spill) -> Vec<Hit> {
        let data = match std::mem::take(&mut spill.payload) {
            Payload::Events(hits) => return hits,
            Payload::Raw(data) => data,
        };

        let source = spill.source.as_deref().unwrap_or_default();
        let Some(decoder) = self.decoders.get(source) else {
            warn!(source, bytes = data.len(), "no decoder for raw spill; hits dropped");
            self.report.decode_errors += 1;
            return Vec::new();
        };

        match decoder.decode(&data) {
            Ok(hits) => hits,
            Err(e) => {
                warn!(source, format = decoder.format(), error = %e, "raw spill decode failed; hits dropped");
                self.report.decode_errors += 1;
                Vec::new()
            }
        }
    }

    fn merge(&mut self) {
        loop {
            if !self.closed && self.lanes.values().any(Lane::is_starved) {
                break;
            }
            let Some(front) = self.fronts.pop() else {
                break;
            };
            let Some(lane) = self.lanes.get_mut(&front.channel) else {
                continue;
            };
            let Some((hit, seq)) = lane.hits.pop_front() else {
                continue;
            };
            if let Some((next, _)) = lane.hits.front() {
                self.fronts.push(LaneFront {
                    timestamp: next.timestamp,
                    channel: front.channel,
                });
            }
            if let Some(entry) = self.in_flight.get_mut(&seq) {
                entry.remaining -= 1;
            }
            self.output.push(hit);
        }
    }

    fn drain(&mut self) {
        let seqs: Vec<u64> = self.in_flight.keys().copied().collect();
        let mut oldest = true;
        let mut held_sources = HashSet::new();
        let mut held_channels = BTreeSet::new();

        for seq in seqs {
            let Some(entry) = self.in_flight.get(&seq) else {
                continue;
            };
            let ready = entry.remaining == 0
                && if entry.spill.run.is_some() {
                    oldest
                } else {
                    !entry.is_held_by(&held_sources, &held_channels)
                };
            if !ready {
                if let Some(source) = &entry.spill.source {
                    held_sources.insert(source.clone());
                }
                held_channels.extend(entry.channels.iter().copied());
                oldest = false;
                continue;
            }
            if let Some(entry) = self.in_flight.remove(&seq) {
                self.deliver(entry.spill);
            }
        }
    }

    /// Move the accumulated hits plus `origin`'s metadata to the sink.
    fn deliver(&mut self, origin: Spill) {
        let hits = std::mem::take(&mut self.output);
        let events = hits.len() as u64;

        let mut run = origin.run;
        if let Some(run) = run.as_mut().filter(|run| run.is_closing()) {
            run.total_events = self.report.events_out + events;
        }

        let spill = Spill {
            source: None,
            payload: Payload::Events(hits),
            stats: origin.stats,
            run,
            detectors: origin.detectors,
        };
        if spill.is_empty() {
            return;
        }

        self.report.spills_out += 1;
        self.report.events_out += events;
        trace!(events, stats = spill.stats.len(), boundary = spill.run.is_some(), "spill delivered");
        self.sink.add_spill(spill);
    }
}
