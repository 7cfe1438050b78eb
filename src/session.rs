//! Acquisition session controller.
//!
//! The controller owns the set of producers for a setup and drives one run at
//! a time through a fixed sequence of states:
//!
//! ```text
//!  Idle ──► Starting ──► Running ──► Stopping ──► Draining ──► Idle
//!              │                         ▲
//!              └── nothing started ──────┼──► Idle (error)
//!                                        │
//!        cancel / timeout / all producers finished
//! ```
//!
//! During a run every producer pushes spills into one shared [`SpillQueue`];
//! a single builder task merges them into time order and hands them to the
//! [`Sink`]. The controller brackets the run with boundary spills carrying
//! [`RunInfo`], so the sink sees the opening boundary first and the closing
//! boundary last.
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = ProducerRegistry::with_builtin();
//! let controller = SessionController::from_config(&config, &registry)?;
//! controller.boot_all().await?;
//!
//! let cancel = CancellationToken::new();
//! let result = controller
//!     .run_timed(Some(Duration::from_secs(10)), &cancel, Arc::new(SummarySink::new()))
//!     .await?;
//! println!("{} events", result.report.events_out);
//! ```

use crate::builder::{BuilderReport, SpillBuilder};
use crate::config::{DaqConfig, SessionConfig};
use crate::data::{Detector, RunInfo, Spill};
use crate::error::{DaqError, DaqResult};
use crate::producer::{Producer, ProducerRegistry, ProducerStatus};
use crate::queue::SpillQueue;
use crate::sink::Sink;
use futures::future::join_all;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

/// Lifecycle state of the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum SessionState {
    /// No run in progress
    Idle,
    /// Opening boundary queued, producers being started
    Starting,
    /// Producers acquiring
    Running,
    /// Producers being stopped
    Stopping,
    /// Waiting for the builder to empty the queue
    Draining,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Draining => "draining",
        };
        f.write_str(name)
    }
}

/// Why a run left the `Running` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    /// The requested run length elapsed
    Timeout,
    /// The cancel token fired
    Cancelled,
    /// Every started producer ended its acquisition by itself
    ProducersFinished,
}

/// Outcome of [`SessionController::run_timed`].
#[derive(Debug, Clone)]
pub struct RunResult {
    /// Identifier stamped on both run boundaries
    pub run_id: Uuid,
    /// What ended the run
    pub stop_reason: StopReason,
    /// Producers that accepted `daq_start`
    pub started: Vec<String>,
    /// Time from entering `Running` to entering `Stopping`
    pub time_to_stop: Duration,
    /// Time from entering `Running` to returning
    pub elapsed: Duration,
    /// Builder counters
    pub report: BuilderReport,
}

/// Drives producers through boot, acquisition and shutdown.
pub struct SessionController {
    producers: Vec<Arc<dyn Producer>>,
    config: SessionConfig,
    detectors: Vec<Detector>,
    state_tx: watch::Sender<SessionState>,
}

/// Puts the controller back to `Idle` however a run ends.
struct IdleOnDrop<'a>(&'a watch::Sender<SessionState>);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.send_if_modified(|state| {
            if *state == SessionState::Idle {
                false
            } else {
                *state = SessionState::Idle;
                true
            }
        });
    }
}

impl SessionController {
    /// Create a controller for `producers`.
    pub fn new(producers: Vec<Arc<dyn Producer>>, config: SessionConfig) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Idle);
        Self {
            producers,
            config,
            detectors: Vec::new(),
            state_tx,
        }
    }

    /// Build every enabled producer from configuration.
    pub fn from_config(config: &DaqConfig, registry: &ProducerRegistry) -> DaqResult<Self> {
        config.validate()?;
        let producers = registry.create_all(&config.producers)?;
        Ok(Self::new(producers, config.session.clone()).with_detectors(config.detectors.clone()))
    }

    /// Detectors recorded in each run's boundary metadata.
    pub fn with_detectors(mut self, detectors: Vec<Detector>) -> Self {
        self.detectors = detectors;
        self
    }

    /// Managed producers.
    pub fn producers(&self) -> &[Arc<dyn Producer>] {
        &self.producers
    }

    /// Session timing in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    /// Watch state transitions.
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state_tx.subscribe()
    }

    /// Bitwise OR of every producer's status.
    pub fn aggregate_status(&self) -> ProducerStatus {
        self.producers.iter().map(|p| p.status()).collect()
    }

    /// Boot every producer; fails only if none of them came up.
    #[instrument(skip(self), fields(producers = self.producers.len()))]
    pub async fn boot_all(&self) -> DaqResult<ProducerStatus> {
        let mut booted = 0usize;
        for producer in &self.producers {
            match producer.boot().await {
                Ok(()) => {
                    booted += 1;
                    info!(producer = producer.id(), status = %producer.status(), "producer booted");
                }
                Err(e) => {
                    error!(producer = producer.id(), error = %e, "producer failed to boot");
                }
            }
        }

        if booted == 0 {
            return Err(DaqError::NoProducerBooted);
        }
        let status = self.aggregate_status();
        info!(booted, status = %status, "boot complete");
        Ok(status)
    }

    /// Shut every producer down, logging failures.
    #[instrument(skip(self))]
    pub async fn shutdown_all(&self) {
        for producer in &self.producers {
            if let Err(e) = producer.shutdown().await {
                warn!(producer = producer.id(), error = %e, "producer shutdown failed");
            }
        }
    }

    /// Settings of every producer as `{producer_id: tree}`.
    pub async fn settings_snapshot(&self) -> serde_json::Value {
        let mut snapshot = serde_json::Map::new();
        for producer in &self.producers {
            match producer.read_settings_bulk().await {
                Ok(tree) => {
                    snapshot.insert(producer.id().to_string(), tree);
                }
                Err(e) => {
                    warn!(producer = producer.id(), error = %e, "settings read failed; omitted from snapshot");
                }
            }
        }
        serde_json::Value::Object(snapshot)
    }

    /// Push the subtree for each producer id found in `settings`.
    ///
    /// Producers missing from `settings` are left untouched. All producers are
    /// attempted; the error names every one that refused its subtree.
    #[instrument(skip(self, settings))]
    pub async fn write_settings(&self, settings: &serde_json::Value) -> DaqResult<()> {
        let trees = settings
            .as_object()
            .ok_or_else(|| DaqError::Settings("settings must be an object keyed by producer id".into()))?;

        let mut failed = Vec::new();
        for producer in &self.producers {
            let Some(tree) = trees.get(producer.id()) else {
                continue;
            };
            match producer.write_settings_bulk(tree.clone()).await {
                Ok(()) => debug!(producer = producer.id(), "settings written"),
                Err(e) => {
                    warn!(producer = producer.id(), error = %e, "settings write failed");
                    failed.push(producer.id().to_string());
                }
            }
        }

        if failed.is_empty() {
            Ok(())
        } else {
            Err(DaqError::Settings(format!("rejected by: {}", failed.join(", "))))
        }
    }

    /// Run one acquisition into `sink`.
    ///
    /// The run ends when `timeout` elapses, `cancel` fires, or every started
    /// producer has finished by itself (checked once per poll interval). It is
    /// then stopped, the queue is drained through the builder, and the sink is
    /// closed.
    ///
    /// Fails without touching the sink if a run is already in progress, if no
    /// producer is runnable, or if none accepted `daq_start`.
    #[instrument(skip(self, cancel, sink), fields(run_id = tracing::field::Empty))]
    pub async fn run_timed(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        sink: Arc<dyn Sink>,
    ) -> DaqResult<RunResult> {
        self.begin()?;
        let _idle = IdleOnDrop(&self.state_tx);

        let runnable: Vec<_> = self
            .producers
            .iter()
            .filter(|p| p.status().can_run())
            .cloned()
            .collect();
        if runnable.is_empty() {
            warn!("no producer is runnable; boot first");
            return Err(DaqError::NoRunnableProducer);
        }

        let run_id = Uuid::new_v4();
        tracing::Span::current().record("run_id", tracing::field::display(run_id));

        let opening = RunInfo::new(run_id, self.detectors.clone(), self.settings_snapshot().await);
        let queue = SpillQueue::new();
        queue.enqueue(Spill::boundary(opening.clone()));

        let mut started = Vec::with_capacity(runnable.len());
        for producer in runnable {
            if producer.daq_start(queue.clone()).await {
                started.push(producer);
            } else {
                warn!(producer = producer.id(), "producer did not start");
            }
        }
        if started.is_empty() {
            queue.stop();
            error!("no producer accepted daq_start");
            return Err(DaqError::NoProducerStarted);
        }

        let builder = started
            .iter()
            .fold(SpillBuilder::new(sink.clone()), |builder, producer| {
                match producer.decoder() {
                    Some(decoder) => builder.with_decoder(producer.id(), decoder),
                    None => builder,
                }
            })
            .with_channels(self.awaited_channels(&started));
        let worker = tokio::spawn(builder.run(queue.clone()));

        let begin = Instant::now();
        self.transition(SessionState::Running);
        let started_ids: Vec<String> = started.iter().map(|p| p.id().to_string()).collect();
        info!(producers = ?started_ids, ?timeout, "acquisition running");

        let stop_reason = self.wait_for_stop(timeout, cancel, &started, &queue, begin).await;
        let time_to_stop = begin.elapsed();
        info!(?stop_reason, ?time_to_stop, "stopping acquisition");

        self.transition(SessionState::Stopping);
        let was_running = join_all(started.iter().map(|p| p.daq_stop())).await;
        debug!(?was_running, "producers stopped");

        self.transition(SessionState::Draining);
        queue.enqueue(Spill::boundary(opening.closing(self.settings_snapshot().await)));
        while !queue.is_empty() {
            tokio::time::sleep(self.config.drain_interval()).await;
        }
        queue.stop();

        let report = worker.await?;
        sink.close_acquisition();
        self.transition(SessionState::Idle);

        let elapsed = begin.elapsed();
        info!(
            events = report.events_out,
            spills = report.spills_out,
            decode_errors = report.decode_errors,
            ?elapsed,
            "acquisition finished"
        );

        Ok(RunResult {
            run_id,
            stop_reason,
            started: started_ids,
            time_to_stop,
            elapsed,
            report,
        })
    }

    /// Idle -> Starting, or `SessionBusy`.
    fn begin(&self) -> DaqResult<()> {
        let mut busy = false;
        self.state_tx.send_if_modified(|state| {
            if *state == SessionState::Idle {
                *state = SessionState::Starting;
                true
            } else {
                busy = true;
                false
            }
        });
        if busy {
            warn!(state = %self.state(), "run requested while busy");
            return Err(DaqError::SessionBusy);
        }
        debug!("session starting");
        Ok(())
    }

    /// Declared detector channels read out by a started producer.
    fn awaited_channels(&self, started: &[Arc<dyn Producer>]) -> BTreeSet<i16> {
        let live: BTreeSet<i16> = started.iter().flat_map(|p| p.channels()).collect();
        let mut awaited = BTreeSet::new();
        for detector in &self.detectors {
            let Some(channel) = detector.channel else {
                continue;
            };
            if live.contains(&channel) {
                awaited.insert(channel);
            } else {
                warn!(detector = %detector.name, channel, "no running producer reads this detector");
            }
        }
        awaited
    }

    fn transition(&self, to: SessionState) {
        let from = self.state_tx.send_replace(to);
        debug!(%from, %to, "session state");
    }

    async fn wait_for_stop(
        &self,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
        started: &[Arc<dyn Producer>],
        queue: &SpillQueue,
        begin: Instant,
    ) -> StopReason {
        let deadline = async {
            match timeout {
                Some(timeout) => tokio::time::sleep_until(begin + timeout).await,
                None => std::future::pending().await,
            }
        };
        tokio::pin!(deadline);

        let mut ticker = tokio::time::interval(self.config.poll_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately
        ticker.tick().await;

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return StopReason::Cancelled,
                _ = &mut deadline => return StopReason::Timeout,
                _ = ticker.tick() => {
                    let running = started.iter().filter(|p| p.daq_running()).count();
                    info!(
                        elapsed = ?begin.elapsed(),
                        running,
                        queued = queue.size(),
                        "acquisition progress"
                    );
                    if running == 0 {
                        return StopReason::ProducersFinished;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::producer::{MockProducer, MockProducerConfig};
    use crate::sink::MemorySink;
    use async_trait::async_trait;

    fn fast_config() -> SessionConfig {
        SessionConfig {
            poll_interval_ms: 20,
            drain_interval_ms: 5,
            timeout_secs: None,
        }
    }

    fn mock(id: &str, config: MockProducerConfig) -> Arc<dyn Producer> {
        Arc::new(MockProducer::with_config(id, config))
    }

    fn fast_mock(id: &str, channels: Vec<i16>) -> Arc<dyn Producer> {
        mock(
            id,
            MockProducerConfig {
                channels,
                spill_interval_ms: 10,
                event_rate_hz: 2000.0,
                seed: Some(7),
                ..Default::default()
            },
        )
    }

    /// Booted producer that always refuses to start.
    struct RefusingProducer;

    #[async_trait]
    impl Producer for RefusingProducer {
        fn id(&self) -> &str {
            "refusing"
        }
        fn status(&self) -> ProducerStatus {
            ProducerStatus::booted()
        }
        async fn boot(&self) -> DaqResult<()> {
            Ok(())
        }
        async fn shutdown(&self) -> DaqResult<()> {
            Ok(())
        }
        async fn daq_start(&self, _queue: SpillQueue) -> bool {
            false
        }
        async fn daq_stop(&self) -> bool {
            false
        }
        fn daq_running(&self) -> bool {
            false
        }
        async fn read_settings_bulk(&self) -> DaqResult<serde_json::Value> {
            Err(DaqError::Settings("unavailable".into()))
        }
        async fn write_settings_bulk(&self, _settings: serde_json::Value) -> DaqResult<()> {
            Err(DaqError::Settings("read-only".into()))
        }
    }

    #[tokio::test]
    async fn test_boot_all_tolerates_partial_failure() {
        let controller = SessionController::new(
            vec![
                fast_mock("good", vec![0]),
                mock(
                    "bad",
                    MockProducerConfig {
                        fail_boot: true,
                        ..Default::default()
                    },
                ),
            ],
            fast_config(),
        );

        let status = controller.boot_all().await.unwrap();
        assert!(status.contains(ProducerStatus::BOOTED));
        assert!(status.can_run());
        // The failed producer still reports CAN_BOOT
        assert!(status.contains(ProducerStatus::CAN_BOOT));
    }

    #[tokio::test]
    async fn test_boot_all_fails_when_nothing_boots() {
        let controller = SessionController::new(
            vec![mock(
                "bad",
                MockProducerConfig {
                    fail_boot: true,
                    ..Default::default()
                },
            )],
            fast_config(),
        );
        assert!(matches!(
            controller.boot_all().await,
            Err(DaqError::NoProducerBooted)
        ));
    }

    #[tokio::test]
    async fn test_run_requires_runnable_producer() {
        let controller = SessionController::new(vec![fast_mock("a", vec![0])], fast_config());
        let sink = Arc::new(MemorySink::new());

        let result = controller
            .run_timed(Some(Duration::from_millis(50)), &CancellationToken::new(), sink.clone())
            .await;
        assert!(matches!(result, Err(DaqError::NoRunnableProducer)));
        assert_eq!(controller.state(), SessionState::Idle);
        assert!(sink.spills().is_empty());
        assert_eq!(sink.flush_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_started_does_not_spawn_builder() {
        let controller = SessionController::new(vec![Arc::new(RefusingProducer)], fast_config());
        let sink = Arc::new(MemorySink::new());

        let result = controller
            .run_timed(Some(Duration::from_millis(50)), &CancellationToken::new(), sink.clone())
            .await;
        assert!(matches!(result, Err(DaqError::NoProducerStarted)));
        assert_eq!(controller.state(), SessionState::Idle);

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(sink.spills().is_empty());
        assert_eq!(sink.flush_count(), 0);
        assert_eq!(sink.close_count(), 0);
    }

    #[tokio::test]
    async fn test_second_run_is_rejected_while_busy() {
        let controller = Arc::new(SessionController::new(
            vec![fast_mock("a", vec![0])],
            fast_config(),
        ));
        controller.boot_all().await.unwrap();

        let cancel = CancellationToken::new();
        let first = {
            let controller = controller.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                controller
                    .run_timed(None, &cancel, Arc::new(MemorySink::new()))
                    .await
            })
        };

        let mut states = controller.subscribe();
        states
            .wait_for(|s| *s == SessionState::Running)
            .await
            .unwrap();

        let second = controller
            .run_timed(None, &cancel, Arc::new(MemorySink::new()))
            .await;
        assert!(matches!(second, Err(DaqError::SessionBusy)));
        // The rejected call must not disturb the running session
        assert_eq!(controller.state(), SessionState::Running);

        cancel.cancel();
        let result = first.await.unwrap().unwrap();
        assert_eq!(result.stop_reason, StopReason::Cancelled);
        assert_eq!(controller.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_producers_finishing_end_the_run() {
        let controller = SessionController::new(
            vec![mock(
                "finite",
                MockProducerConfig {
                    channels: vec![0, 1],
                    spill_interval_ms: 5,
                    max_spills: Some(4),
                    raw_output: true,
                    seed: Some(1),
                    ..Default::default()
                },
            )],
            fast_config(),
        );
        controller.boot_all().await.unwrap();
        let sink = Arc::new(MemorySink::new());

        let result = controller
            .run_timed(Some(Duration::from_secs(10)), &CancellationToken::new(), sink.clone())
            .await
            .unwrap();

        assert_eq!(result.stop_reason, StopReason::ProducersFinished);
        assert_eq!(result.started, vec!["finite".to_string()]);
        assert_eq!(result.report.decode_errors, 0);
        // boundary + 4 data spills + stop spill + boundary
        assert_eq!(result.report.spills_in, 7);

        let hits = sink.hits();
        assert_eq!(hits.len() as u64, result.report.events_out);
        assert!(hits.windows(2).all(|w| w[0].order_key() <= w[1].order_key()));
        assert_eq!(sink.flush_count(), 1);
        assert_eq!(sink.close_count(), 1);
    }

    #[test]
    fn test_only_started_channels_are_awaited() {
        let controller = SessionController::new(vec![], fast_config()).with_detectors(vec![
            Detector::new("HPGe-1", "HPGe").on_channel(0),
            Detector::new("HPGe-2", "HPGe").on_channel(1),
            Detector::new("LaBr3-1", "LaBr3").on_channel(4),
            Detector::new("Monitor", "BF3"),
        ]);
        let started = vec![fast_mock("a", vec![0, 1]), fast_mock("b", vec![2, 3])];

        let awaited: Vec<i16> = controller.awaited_channels(&started).into_iter().collect();
        assert_eq!(awaited, vec![0, 1]);
        assert!(controller.awaited_channels(&[]).is_empty());
    }

    #[tokio::test]
    async fn test_settings_snapshot_and_write_back() {
        let controller = SessionController::new(
            vec![fast_mock("a", vec![0, 1]), Arc::new(RefusingProducer)],
            fast_config(),
        );

        let snapshot = controller.settings_snapshot().await;
        let trees = snapshot.as_object().unwrap();
        assert_eq!(trees.len(), 1);
        assert_eq!(trees["a"]["channels"], serde_json::json!([0, 1]));

        let mut changed = snapshot.clone();
        changed["a"]["event_rate_hz"] = serde_json::json!(50.0);
        controller.write_settings(&changed).await.unwrap();
        assert_eq!(
            controller.settings_snapshot().await["a"]["event_rate_hz"],
            serde_json::json!(50.0)
        );

        let refused = serde_json::json!({"refusing": {}});
        assert!(matches!(
            controller.write_settings(&refused).await,
            Err(DaqError::Settings(_))
        ));
        assert!(controller
            .write_settings(&serde_json::json!([1, 2]))
            .await
            .is_err());
    }
}
