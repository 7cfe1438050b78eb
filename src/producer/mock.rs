//! Synthetic list-mode producer for testing without physical hardware.
//!
//! `MockProducer` behaves like a multi-channel digitizer: every spill interval
//! it reads out a batch of hits per channel, with timestamps drawn uniformly
//! inside the interval so each channel's clock only moves forward. Hits from
//! different channels are concatenated channel by channel, which is exactly the
//! "ordered per channel, unordered across channels" shape real digitizers
//! produce.
//!
//! # Configuration
//!
//! ```toml
//! [[producers]]
//! id = "sim_a"
//! type = "mock"
//! [producers.config]
//! channels = [0, 1, 2, 3]
//! event_rate_hz = 2000.0
//! spill_interval_ms = 100
//! raw_output = true
//! ```

use super::codec::{ListModeCodec, SpillDecoder};
use super::registry::ProducerFactory;
use super::status::ProducerStatus;
use super::task::PollingSlot;
use super::Producer;
use crate::data::{Hit, HitFlags, Spill, StatsKind, StatsUpdate};
use crate::data::stats::{DEAD_TIME, LIVE_TIME, REAL_TIME, TRIGGER_COUNT};
use crate::error::{DaqError, DaqResult};
use crate::queue::SpillQueue;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Device clock frequency of the simulated digitizer (100 MHz).
pub const TICKS_PER_SECOND: u64 = 100_000_000;

/// Fraction of real time the simulated channels are live.
const LIVE_FRACTION: f64 = 0.98;

/// Configuration for [`MockProducer`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MockProducerConfig {
    /// Channels to simulate (default: [0, 1])
    #[serde(default = "default_channels")]
    pub channels: Vec<i16>,

    /// Mean event rate per channel in Hz (default: 1000)
    #[serde(default = "default_event_rate")]
    pub event_rate_hz: f64,

    /// Readout interval in milliseconds (default: 100)
    #[serde(default = "default_spill_interval")]
    pub spill_interval_ms: u64,

    /// Largest simulated pulse height (default: 16383, 14-bit ADC)
    #[serde(default = "default_energy_max")]
    pub energy_max: u16,

    /// RNG seed for reproducible runs (default: entropy)
    #[serde(default)]
    pub seed: Option<u64>,

    /// Stop by itself after this many data spills
    #[serde(default)]
    pub max_spills: Option<u64>,

    /// Emit undecoded list-mode buffers instead of hits
    #[serde(default)]
    pub raw_output: bool,

    /// Simulate a device that never comes online
    #[serde(default)]
    pub fail_boot: bool,

    /// Report oscilloscope capability once booted
    #[serde(default)]
    pub oscilloscope: bool,
}

fn default_channels() -> Vec<i16> {
    vec![0, 1]
}

fn default_event_rate() -> f64 {
    1000.0
}

fn default_spill_interval() -> u64 {
    100
}

fn default_energy_max() -> u16 {
    16383
}

impl Default for MockProducerConfig {
    fn default() -> Self {
        Self {
            channels: default_channels(),
            event_rate_hz: default_event_rate(),
            spill_interval_ms: default_spill_interval(),
            energy_max: default_energy_max(),
            seed: None,
            max_spills: None,
            raw_output: false,
            fail_boot: false,
            oscilloscope: false,
        }
    }
}

impl MockProducerConfig {
    /// Check the configuration is usable.
    pub fn validate(&self) -> Result<(), String> {
        if self.channels.is_empty() {
            return Err("at least one channel is required".into());
        }
        let mut sorted = self.channels.clone();
        sorted.sort_unstable();
        if sorted.windows(2).any(|w| w[0] == w[1]) {
            return Err("channels must be unique".into());
        }
        if !self.event_rate_hz.is_finite() || self.event_rate_hz <= 0.0 {
            return Err(format!(
                "event_rate_hz must be positive and finite, got {}",
                self.event_rate_hz
            ));
        }
        if self.spill_interval_ms == 0 {
            return Err("spill_interval_ms must be non-zero".into());
        }
        Ok(())
    }
}

// =============================================================================
// MockProducerFactory - ProducerFactory implementation
// =============================================================================

/// Factory for creating [`MockProducer`] instances.
pub struct MockProducerFactory;

impl ProducerFactory for MockProducerFactory {
    fn driver_type(&self) -> &'static str {
        "mock"
    }

    fn name(&self) -> &'static str {
        "Synthetic List-Mode Source"
    }

    fn validate(&self, config: &toml::Value) -> anyhow::Result<()> {
        let cfg: MockProducerConfig = config.clone().try_into()?;
        cfg.validate().map_err(anyhow::Error::msg)
    }

    fn build(&self, id: String, config: toml::Value) -> anyhow::Result<Arc<dyn Producer>> {
        let cfg: MockProducerConfig = config.try_into()?;
        Ok(Arc::new(MockProducer::with_config(id, cfg)))
    }
}

// =============================================================================
// MockProducer
// =============================================================================

/// Simulated multi-channel digitizer.
pub struct MockProducer {
    id: String,
    config: RwLock<MockProducerConfig>,
    status: Mutex<ProducerStatus>,
    polling: PollingSlot,
}

impl MockProducer {
    /// Create a producer with default configuration.
    pub fn new(id: impl Into<String>) -> Self {
        Self::with_config(id, MockProducerConfig::default())
    }

    /// Create a producer with the given configuration.
    pub fn with_config(id: impl Into<String>, config: MockProducerConfig) -> Self {
        Self {
            id: id.into(),
            config: RwLock::new(config),
            status: Mutex::new(ProducerStatus::initial()),
            polling: PollingSlot::default(),
        }
    }

    /// Snapshot of the current configuration.
    pub fn config(&self) -> MockProducerConfig {
        self.config.read().clone()
    }
}

#[async_trait]
impl Producer for MockProducer {
    fn id(&self) -> &str {
        &self.id
    }

    fn status(&self) -> ProducerStatus {
        *self.status.lock()
    }

    async fn boot(&self) -> DaqResult<()> {
        let config = self.config();
        if config.fail_boot {
            *self.status.lock() = ProducerStatus::initial();
            return Err(DaqError::Boot {
                producer: self.id.clone(),
                reason: "simulated device did not respond".into(),
            });
        }
        config.validate().map_err(|reason| DaqError::Boot {
            producer: self.id.clone(),
            reason,
        })?;

        let mut status = ProducerStatus::booted();
        if config.oscilloscope {
            status |= ProducerStatus::CAN_OSCILLOSCOPE;
        }
        *self.status.lock() = status;
        info!(producer = %self.id, channels = ?config.channels, "mock producer booted");
        Ok(())
    }

    async fn shutdown(&self) -> DaqResult<()> {
        self.polling.stop().await;
        *self.status.lock() = ProducerStatus::initial();
        debug!(producer = %self.id, "mock producer shut down");
        Ok(())
    }

    async fn daq_start(&self, queue: SpillQueue) -> bool {
        if !self.status().can_run() {
            warn!(producer = %self.id, status = %self.status(), "daq_start refused: not runnable");
            return false;
        }

        let acquisition = MockAcquisition::new(self.id.clone(), self.config());
        let started = self
            .polling
            .start(move |stop_rx| acquisition.run(queue, stop_rx));
        if started {
            info!(producer = %self.id, "mock acquisition started");
        } else {
            debug!(producer = %self.id, "daq_start ignored: already running");
        }
        started
    }

    async fn daq_stop(&self) -> bool {
        let stopped = self.polling.stop().await;
        if stopped {
            info!(producer = %self.id, "mock acquisition stopped");
        }
        stopped
    }

    fn daq_running(&self) -> bool {
        self.polling.is_running()
    }

    async fn read_settings_bulk(&self) -> DaqResult<serde_json::Value> {
        serde_json::to_value(self.config()).map_err(|e| DaqError::Settings(e.to_string()))
    }

    async fn write_settings_bulk(&self, settings: serde_json::Value) -> DaqResult<()> {
        let config: MockProducerConfig =
            serde_json::from_value(settings).map_err(|e| DaqError::Settings(e.to_string()))?;
        config.validate().map_err(DaqError::Settings)?;
        *self.config.write() = config;
        Ok(())
    }

    fn decoder(&self) -> Option<Arc<dyn SpillDecoder>> {
        if self.config.read().raw_output {
            Some(Arc::new(ListModeCodec))
        } else {
            None
        }
    }

    fn channels(&self) -> Vec<i16> {
        self.config.read().channels.clone()
    }
}

// =============================================================================
// Polling task
// =============================================================================

#[derive(Default)]
struct ChannelCounters {
    triggers: u64,
}

/// State owned by one polling task.
struct MockAcquisition {
    id: String,
    config: MockProducerConfig,
    rng: StdRng,
    channels: BTreeMap<i16, ChannelCounters>,
    spill_number: u64,
    started: Instant,
}

impl MockAcquisition {
    fn new(id: String, config: MockProducerConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        let channels = config
            .channels
            .iter()
            .map(|ch| (*ch, ChannelCounters::default()))
            .collect();
        Self {
            id,
            config,
            rng,
            channels,
            spill_number: 0,
            started: Instant::now(),
        }
    }

    async fn run(mut self, queue: SpillQueue, mut stop_rx: watch::Receiver<bool>) {
        let interval = Duration::from_millis(self.config.spill_interval_ms);
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let spill = self.read_spill();
                    queue.enqueue(spill);
                    if self
                        .config
                        .max_spills
                        .is_some_and(|max| self.spill_number >= max)
                    {
                        debug!(producer = %self.id, spills = self.spill_number, "spill limit reached");
                        break;
                    }
                }
                _ = stop_rx.changed() => break,
            }
        }

        queue.enqueue(self.stop_spill());
    }

    fn window_ticks(&self) -> u64 {
        self.config.spill_interval_ms * TICKS_PER_SECOND / 1000
    }

    fn read_spill(&mut self) -> Spill {
        let window = self.window_ticks();
        let window_start = self.spill_number * window;
        let interval_s = self.config.spill_interval_ms as f64 / 1000.0;
        let mean = self.config.event_rate_hz * interval_s;
        let kind = if self.spill_number == 0 {
            StatsKind::Start
        } else {
            StatsKind::Running
        };
        self.spill_number += 1;

        let mut hits = Vec::new();
        let mut rates = Vec::with_capacity(self.channels.len());
        let channel_ids: Vec<i16> = self.channels.keys().copied().collect();
        for channel in channel_ids {
            let count = self.rng.gen_range(0.0..=2.0 * mean).round() as usize;
            let mut offsets: Vec<u64> = (0..count)
                .map(|_| self.rng.gen_range(0..window.max(1)))
                .collect();
            offsets.sort_unstable();

            for offset in offsets {
                let mut flags = HitFlags::empty();
                if self.rng.gen_bool(0.01) {
                    flags.insert(HitFlags::PILEUP);
                }
                let energy = self.rng.gen_range(0..=self.config.energy_max);
                hits.push(Hit::new(channel, window_start + offset, energy).with_flags(flags));
            }

            if let Some(counters) = self.channels.get_mut(&channel) {
                counters.triggers += count as u64;
            }
            rates.push((channel, count as f64 / interval_s));
        }

        let mut spill = if self.config.raw_output {
            Spill::raw(self.id.clone(), ListModeCodec::encode(&hits))
        } else {
            Spill::events(self.id.clone(), hits)
        };
        for (channel, rate) in rates {
            spill = spill.with_stats(self.snapshot(channel, kind).with_event_rate(rate));
        }
        spill
    }

    fn stop_spill(&self) -> Spill {
        let empty = if self.config.raw_output {
            Spill::raw(self.id.clone(), bytes::Bytes::new())
        } else {
            Spill::events(self.id.clone(), Vec::new())
        };
        self.channels.keys().fold(empty, |spill, channel| {
            spill.with_stats(self.snapshot(*channel, StatsKind::Stop))
        })
    }

    fn snapshot(&self, channel: i16, kind: StatsKind) -> StatsUpdate {
        let real = self.started.elapsed().as_secs_f64();
        let triggers = self
            .channels
            .get(&channel)
            .map_or(0, |counters| counters.triggers);
        StatsUpdate::new(channel, kind)
            .with_spill_number(self.spill_number)
            .with_counter(TRIGGER_COUNT, triggers as f64)
            .with_counter(REAL_TIME, real)
            .with_counter(LIVE_TIME, real * LIVE_FRACTION)
            .with_counter(DEAD_TIME, real * (1.0 - LIVE_FRACTION))
    }
}
