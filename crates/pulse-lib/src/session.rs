//! Session controller: sequences heart-rate display, timed HRV collection
//! and the remote readiness analysis around one [`HeartbeatMonitor`].

use crate::{
    clock::Clock,
    config::Config,
    io::history::HistoryStore,
    link::{AnalysisClient, AnalysisResult, TelemetryPublisher},
    metrics::{
        bpm::BpmReport,
        hrv::{finalize, HrvMetrics},
    },
    monitor::{HeartbeatMonitor, SignalState},
    queue::SampleConsumer,
    records::{now_timestamp, timestamp_from_analysis, HistoryRecord, HrvRecord, KubiosRecord},
};
use crossbeam_channel::{bounded, unbounded, Receiver, Sender};
use log::{info, warn};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionKind {
    Hrv,
    Readiness,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Mode {
    Idle,
    HeartRate,
    Measuring(SessionKind),
}

/// Discrete events delivered by the rotary encoder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Push,
    Back,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LiveReading {
    pub bpm: u16,
    pub signal: SignalState,
    /// Set when this tick crossed a reporting boundary.
    pub report: Option<BpmReport>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CollectionProgress {
    pub elapsed_ms: u64,
    pub duration_ms: u64,
    pub intervals: usize,
}

impl CollectionProgress {
    pub fn fraction(&self) -> f64 {
        if self.duration_ms == 0 {
            return 1.0;
        }
        (self.elapsed_ms as f64 / self.duration_ms as f64).min(1.0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionOutcome<T> {
    Completed(T),
    Cancelled,
    /// The collaborator gave no usable answer; the controller is back to idle.
    NoResult,
}

/// Stops an in-flight collection on its next poll. Clones share one controller.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Sender<()>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.try_send(());
    }
}

type ProgressObserver = Box<dyn FnMut(&CollectionProgress)>;

pub struct SessionController<C: Clock> {
    config: Config,
    clock: C,
    monitor: HeartbeatMonitor,
    telemetry: Box<dyn TelemetryPublisher>,
    analysis: Option<AnalysisClient>,
    history: Box<dyn HistoryStore>,
    mode: Mode,
    cancel_tx: Sender<()>,
    cancel_rx: Receiver<()>,
    input_tx: Sender<InputEvent>,
    input_rx: Receiver<InputEvent>,
    progress: Option<ProgressObserver>,
}

impl<C: Clock> SessionController<C> {
    pub fn new(
        config: Config,
        clock: C,
        consumer: SampleConsumer,
        telemetry: Box<dyn TelemetryPublisher>,
        history: Box<dyn HistoryStore>,
    ) -> Self {
        let monitor = HeartbeatMonitor::new(&config.monitor, consumer);
        let (cancel_tx, cancel_rx) = bounded(1);
        let (input_tx, input_rx) = unbounded();
        Self {
            config,
            clock,
            monitor,
            telemetry,
            analysis: None,
            history,
            mode: Mode::Idle,
            cancel_tx,
            cancel_rx,
            input_tx,
            input_rx,
            progress: None,
        }
    }

    pub fn with_analysis(mut self, client: AnalysisClient) -> Self {
        self.analysis = Some(client);
        self
    }

    pub fn on_progress(&mut self, observer: impl FnMut(&CollectionProgress) + 'static) {
        self.progress = Some(Box::new(observer));
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    pub fn monitor(&self) -> &HeartbeatMonitor {
        &self.monitor
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn clock_mut(&mut self) -> &mut C {
        &mut self.clock
    }

    pub fn history(&self) -> &dyn HistoryStore {
        self.history.as_ref()
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            tx: self.cancel_tx.clone(),
        }
    }

    /// Encoder events sent here are handled on the controller's next poll.
    pub fn input_sender(&self) -> Sender<InputEvent> {
        self.input_tx.clone()
    }

    fn drain_inputs(&mut self) {
        while let Ok(event) = self.input_rx.try_recv() {
            self.handle_input(event);
        }
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.config.session.poll_interval_ms)
    }

    pub fn start_heart_rate(&mut self) {
        let now = self.clock.now_ms();
        self.monitor.start(now);
        self.mode = Mode::HeartRate;
    }

    /// One heart-rate screen refresh: wait one poll interval, then pump.
    /// Queued input is handled first, so a push or back ends heart-rate mode.
    pub fn tick(&mut self) -> LiveReading {
        self.drain_inputs();
        let poll = self.poll_interval();
        self.clock.sleep(poll);
        let report = self.monitor.pump(self.clock.now_ms());
        // live mode has no collection to feed
        self.monitor.drain_intervals();
        LiveReading {
            bpm: self.monitor.bpm(),
            signal: self.monitor.signal_state(),
            report: report.bpm,
        }
    }

    pub fn stop(&mut self) {
        self.monitor.stop();
        self.mode = Mode::Idle;
    }

    /// Returns `true` when the event changed what the controller is doing.
    pub fn handle_input(&mut self, event: InputEvent) -> bool {
        match (self.mode, event) {
            (Mode::HeartRate, InputEvent::Push | InputEvent::Back) => {
                self.stop();
                true
            }
            (Mode::Measuring(_), InputEvent::Push | InputEvent::Back) => {
                self.cancel_handle().cancel();
                true
            }
            (Mode::Idle, _) => false,
        }
    }

    /// Timed interval collection. `None` when cancelled.
    fn collect(&mut self, kind: SessionKind) -> Option<Vec<u32>> {
        // events queued before the session started belong to the previous screen
        self.drain_inputs();
        while self.cancel_rx.try_recv().is_ok() {}
        let duration_ms = self.config.session.hrv_duration_ms;
        let poll = self.poll_interval();
        let started = self.clock.now_ms();
        self.mode = Mode::Measuring(kind);
        self.monitor.start(started);
        info!("{kind:?} collection started for {duration_ms} ms");

        let mut intervals = Vec::new();
        let cancelled = loop {
            self.drain_inputs();
            if self.cancel_rx.try_recv().is_ok() {
                break true;
            }
            let now = self.clock.now_ms();
            self.monitor.pump(now);
            intervals.extend(self.monitor.drain_intervals());
            let progress = CollectionProgress {
                elapsed_ms: now.saturating_sub(started).min(duration_ms),
                duration_ms,
                intervals: intervals.len(),
            };
            if let Some(observer) = self.progress.as_mut() {
                observer(&progress);
            }
            if now.saturating_sub(started) >= duration_ms {
                break false;
            }
            self.clock.sleep(poll);
        };

        self.monitor.stop();
        self.mode = Mode::Idle;
        if cancelled {
            info!("{kind:?} collection cancelled after {} intervals", intervals.len());
            None
        } else {
            info!("{kind:?} collection finished with {} intervals", intervals.len());
            Some(intervals)
        }
    }

    pub fn run_hrv(&mut self) -> SessionOutcome<HrvMetrics> {
        let Some(intervals) = self.collect(SessionKind::Hrv) else {
            return SessionOutcome::Cancelled;
        };
        let metrics = finalize(&intervals);
        info!(
            "hrv: mean hr {:.1} bpm, rmssd {:.1} ms, sdnn {:.1} ms over {} intervals",
            metrics.mean_hr_bpm, metrics.rmssd_ms, metrics.sdnn_ms, metrics.interval_count
        );
        self.publish_metrics(&metrics);
        let record = HistoryRecord::Hrv(HrvRecord::new(now_timestamp(), &metrics));
        self.append_history(record);
        SessionOutcome::Completed(metrics)
    }

    pub fn run_readiness(&mut self) -> SessionOutcome<AnalysisResult> {
        let Some(intervals) = self.collect(SessionKind::Readiness) else {
            return SessionOutcome::Cancelled;
        };
        if intervals.is_empty() {
            warn!("no intervals collected, skipping analysis");
            return SessionOutcome::NoResult;
        }
        let timeout = Duration::from_millis(self.config.session.analysis_timeout_ms);
        let Some(client) = self.analysis.as_mut() else {
            warn!("no analysis service configured");
            return SessionOutcome::NoResult;
        };
        let result = match client.request(&intervals, timeout) {
            Ok(result) => result,
            Err(err) => {
                warn!("readiness analysis failed: {err}");
                return SessionOutcome::NoResult;
            }
        };
        info!(
            "readiness {:.0}, stress index {:.1}",
            result.readiness, result.stress_index
        );
        let record = HistoryRecord::Kubios(KubiosRecord {
            time: timestamp_from_analysis(&result.create_timestamp),
            mean_hr_bpm: result.mean_hr_bpm,
            stress_index: result.stress_index,
            readiness: result.readiness,
            rmssd_ms: result.rmssd_ms,
            pns_index: result.pns_index,
            sns_index: result.sns_index,
        });
        self.append_history(record);
        SessionOutcome::Completed(result)
    }

    fn publish_metrics(&mut self, metrics: &HrvMetrics) {
        let topic = &self.config.link.telemetry_topic;
        let outcome = serde_json::to_vec(metrics)
            .map_err(Into::into)
            .and_then(|payload| self.telemetry.publish(topic, &payload));
        if let Err(err) = outcome {
            warn!("failed to publish metrics to {topic}: {err}");
        }
    }

    fn append_history(&mut self, record: HistoryRecord) {
        if let Err(err) = self.history.append(record) {
            warn!("failed to store history record: {err}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::LinkError,
        io::history::MemoryHistoryStore,
        link::{AnalysisData, AnalysisRequest, AnalysisResponse, LoopbackBroker},
        queue::sample_queue,
        source::{SyntheticPpg, VirtualTimer},
    };
    use std::cell::RefCell;
    use std::rc::Rc;
    use std::thread;

    #[derive(Clone, Default)]
    struct Recorder {
        messages: Rc<RefCell<Vec<(String, Vec<u8>)>>>,
    }

    impl TelemetryPublisher for Recorder {
        fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), LinkError> {
            self.messages
                .borrow_mut()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }
    }

    struct Failing;

    impl TelemetryPublisher for Failing {
        fn publish(&mut self, _topic: &str, _payload: &[u8]) -> Result<(), LinkError> {
            Err(LinkError::Disconnected)
        }
    }

    fn config(duration_ms: u64) -> Config {
        let mut config = Config::default();
        config.session.hrv_duration_ms = duration_ms;
        config.session.analysis_timeout_ms = 2_000;
        config
    }

    fn analysis_client(broker: &LoopbackBroker, cfg: &Config) -> AnalysisClient {
        let transport = broker.client(&cfg.link.response_topic);
        AnalysisClient::new(Box::new(transport), cfg.link.request_topic.clone())
    }

    fn controller(
        config: Config,
        bpm: f64,
        telemetry: Box<dyn TelemetryPublisher>,
    ) -> SessionController<VirtualTimer<SyntheticPpg>> {
        let (producer, consumer) = sample_queue(config.monitor.queue_capacity);
        let timer = VirtualTimer::new(
            SyntheticPpg::new(bpm),
            producer,
            config.monitor.sample_rate_hz,
        );
        SessionController::new(
            config,
            timer,
            consumer,
            telemetry,
            Box::new(MemoryHistoryStore::new()),
        )
    }

    #[test]
    fn hrv_session_publishes_and_stores() {
        let recorder = Recorder::default();
        let mut ctl = controller(config(20_000), 60.0, Box::new(recorder.clone()));
        let outcome = ctl.run_hrv();
        let SessionOutcome::Completed(metrics) = outcome else {
            panic!("expected completed session, got {outcome:?}");
        };
        assert!(metrics.interval_count >= 15, "{metrics:?}");
        assert!((metrics.mean_ppi_ms - 1000.0).abs() < 10.0);
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(ctl.clock().now_ms() >= 20_000);

        let messages = recorder.messages.borrow();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].0, "hrv/metrics");
        let published: HrvMetrics = serde_json::from_slice(&messages[0].1).unwrap();
        assert_eq!(published, metrics);

        let history = ctl.history().read_all();
        assert!(matches!(
            &history[..],
            [HistoryRecord::Hrv(r)] if r.count == metrics.interval_count
        ));
    }

    #[test]
    fn publish_failure_does_not_fail_session() {
        let mut ctl = controller(config(3_000), 72.0, Box::new(Failing));
        assert!(matches!(ctl.run_hrv(), SessionOutcome::Completed(_)));
        assert_eq!(ctl.history().read_all().len(), 1);
    }

    #[test]
    fn cancel_stops_collection_and_resets_monitor() {
        let mut ctl = controller(config(30_000), 72.0, Box::new(Recorder::default()));
        let handle = ctl.cancel_handle();
        let polls = Rc::new(RefCell::new(0u32));
        let seen = polls.clone();
        ctl.on_progress(move |progress| {
            *seen.borrow_mut() += 1;
            if progress.elapsed_ms >= 4_000 {
                handle.cancel();
            }
        });
        assert_eq!(ctl.run_hrv(), SessionOutcome::Cancelled);
        assert!(ctl.clock().now_ms() < 5_000);
        assert!(*polls.borrow() > 0);
        assert_eq!(ctl.mode(), Mode::Idle);
        assert_eq!(ctl.monitor().bpm(), 0);
        assert!(ctl.monitor().smoothed_history().is_empty());
        assert!(ctl.history().read_all().is_empty());
    }

    #[test]
    fn stale_cancel_does_not_abort_next_session() {
        let mut ctl = controller(config(2_000), 72.0, Box::new(Recorder::default()));
        ctl.cancel_handle().cancel();
        ctl.input_sender().send(InputEvent::Push).unwrap();
        assert!(matches!(ctl.run_hrv(), SessionOutcome::Completed(_)));
    }

    #[test]
    fn heart_rate_mode_reports_and_stops_on_push() {
        let mut ctl = controller(config(1_000), 90.0, Box::new(Recorder::default()));
        assert!(!ctl.handle_input(InputEvent::Push));
        ctl.start_heart_rate();
        assert_eq!(ctl.mode(), Mode::HeartRate);
        let mut reports = Vec::new();
        while ctl.clock().now_ms() < 11_000 {
            if let Some(report) = ctl.tick().report {
                reports.push(report);
            }
        }
        assert_eq!(reports.len(), 2);
        assert!((reports[1].bpm as i32 - 90).abs() <= 2, "{reports:?}");
        assert!(ctl.handle_input(InputEvent::Back));
        assert_eq!(ctl.mode(), Mode::Idle);
        assert_eq!(ctl.monitor().bpm(), 0);
    }

    #[test]
    fn queued_push_cancels_collection() {
        let mut ctl = controller(config(30_000), 72.0, Box::new(Recorder::default()));
        let input = ctl.input_sender();
        ctl.on_progress(move |progress| {
            if progress.elapsed_ms >= 3_000 {
                let _ = input.send(InputEvent::Push);
            }
        });
        assert_eq!(ctl.run_readiness(), SessionOutcome::Cancelled);
        assert!(ctl.clock().now_ms() < 4_000);
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(ctl.history().read_all().is_empty());
    }

    #[test]
    fn queued_back_leaves_heart_rate_mode() {
        let mut ctl = controller(config(1_000), 72.0, Box::new(Recorder::default()));
        ctl.start_heart_rate();
        ctl.tick();
        ctl.input_sender().send(InputEvent::Back).unwrap();
        ctl.tick();
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(!ctl.monitor().is_running());
    }

    #[test]
    fn readiness_without_client_is_no_result() {
        let mut ctl = controller(config(3_000), 72.0, Box::new(Recorder::default()));
        assert_eq!(ctl.run_readiness(), SessionOutcome::NoResult);
        assert_eq!(ctl.mode(), Mode::Idle);
    }

    #[test]
    fn readiness_times_out_to_no_result() {
        let mut cfg = config(4_000);
        cfg.session.analysis_timeout_ms = 30;
        let broker = LoopbackBroker::new();
        let client = analysis_client(&broker, &cfg);
        let mut ctl = controller(cfg, 72.0, Box::new(Recorder::default())).with_analysis(client);
        assert_eq!(ctl.run_readiness(), SessionOutcome::NoResult);
        assert_eq!(ctl.mode(), Mode::Idle);
        assert!(ctl.history().read_all().is_empty());
    }

    #[test]
    fn readiness_round_trip_stores_record() {
        let mut cfg = config(5_000);
        cfg.link.request_topic = "lab/readiness/req".into();
        cfg.link.response_topic = "lab/readiness/resp".into();
        let broker = LoopbackBroker::new();
        let requests = broker.subscribe(&cfg.link.request_topic);
        let response_topic = cfg.link.response_topic.clone();
        let service = broker.clone();
        let worker = thread::spawn(move || {
            let raw = requests.recv_timeout(Duration::from_secs(5)).unwrap();
            let request: AnalysisRequest = serde_json::from_slice(&raw).unwrap();
            assert_eq!(request.kind, "RRI");
            assert!(request.data.iter().all(|iv| (333..=1500).contains(iv)));
            let response = AnalysisResponse {
                id: request.id,
                data: AnalysisData {
                    analysis: AnalysisResult {
                        stress_index: 10.0,
                        readiness: 66.0,
                        mean_hr_bpm: 72.0,
                        rmssd_ms: 35.0,
                        pns_index: 0.2,
                        sns_index: 0.1,
                        create_timestamp: "2024-06-01T07:15:00+00:00".into(),
                    },
                },
            };
            service.publish(&response_topic, &serde_json::to_vec(&response).unwrap());
        });
        let client = analysis_client(&broker, &cfg);
        let mut ctl = controller(cfg, 72.0, Box::new(Recorder::default())).with_analysis(client);
        let outcome = ctl.run_readiness();
        worker.join().unwrap();
        let SessionOutcome::Completed(result) = outcome else {
            panic!("expected analysis result, got {outcome:?}");
        };
        assert_eq!(result.readiness, 66.0);
        let history = ctl.history().read_all();
        let [HistoryRecord::Kubios(record)] = &history[..] else {
            panic!("unexpected history {history:?}");
        };
        assert_eq!(record.time, "01-06-2024 07:15");
        assert_eq!(record.stress_index, 10.0);
    }
}
