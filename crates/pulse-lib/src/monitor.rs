use crate::{
    buffer::HistoryBuffer,
    config::MonitorConfig,
    detectors::ppg::PpgPipeline,
    metrics::bpm::{BpmEstimator, BpmReport},
    queue::SampleConsumer,
};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Accepted intervals waiting for the session controller to drain them.
const PENDING_CAPACITY: usize = 128;

/// Smoothed values shown in the waveform strip of the heart-rate screen.
pub const WAVEFORM_POINTS: usize = 120;

/// What the display should say about the signal right now.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalState {
    /// History buffer not yet full; thresholds are meaningless.
    WarmingUp,
    /// Warmed up, but the last report saw no plausible rate.
    NoSignal,
    Pulse,
}

/// Summary of one `pump` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub samples: usize,
    pub beats: usize,
    pub intervals: usize,
    pub bpm: Option<BpmReport>,
}

/// Consumer side of the pipeline: drains the sample queue and runs smoothing,
/// detection and BPM reporting synchronously inside `pump`.
pub struct HeartbeatMonitor {
    consumer: SampleConsumer,
    pipeline: PpgPipeline,
    bpm: BpmEstimator,
    pending: VecDeque<u32>,
    running: bool,
}

impl HeartbeatMonitor {
    pub fn new(cfg: &MonitorConfig, consumer: SampleConsumer) -> Self {
        Self {
            consumer,
            pipeline: PpgPipeline::new(cfg),
            bpm: BpmEstimator::new(cfg),
            pending: VecDeque::with_capacity(PENDING_CAPACITY),
            running: false,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Start a fresh measurement; anything queued before now is discarded.
    pub fn start(&mut self, now_ms: u64) {
        self.reset();
        let stale = self.consumer.clear();
        self.bpm.start(now_ms);
        self.running = true;
        info!("monitor started at {now_ms} ms ({stale} stale samples discarded)");
    }

    pub fn stop(&mut self) {
        if self.running {
            info!("monitor stopped");
        }
        self.running = false;
        self.reset();
    }

    /// Back to Armed with empty history, no last beat, BPM 0 and nothing pending.
    pub fn reset(&mut self) {
        self.pipeline.reset();
        self.bpm.reset();
        self.pending.clear();
    }

    pub fn pump(&mut self, now_ms: u64) -> PumpReport {
        let mut report = PumpReport::default();
        if !self.running {
            // keep the producer from evicting while nobody is measuring
            self.consumer.clear();
            return report;
        }
        for sample in self.consumer.drain() {
            report.samples += 1;
            let Some(beat) = self.pipeline.push(sample) else {
                continue;
            };
            report.beats += 1;
            if let Some(interval) = beat.interval_ms {
                report.intervals += 1;
                self.bpm.record(interval);
                if self.pending.len() == PENDING_CAPACITY {
                    warn!("pending intervals not drained, dropping oldest");
                    self.pending.pop_front();
                }
                self.pending.push_back(interval);
            }
        }
        report.bpm = self.bpm.tick(now_ms);
        report
    }

    /// Intervals accepted since the previous drain, in beat order.
    pub fn drain_intervals(&mut self) -> Vec<u32> {
        self.pending.drain(..).collect()
    }

    pub fn bpm(&self) -> u16 {
        self.bpm.bpm()
    }

    pub fn smoothed_history(&self) -> &HistoryBuffer {
        self.pipeline.detector().history()
    }

    /// The most recent smoothed values for display, oldest first.
    pub fn waveform(&self) -> Vec<f64> {
        self.smoothed_history().latest(WAVEFORM_POINTS)
    }

    pub fn signal_state(&self) -> SignalState {
        if !self.pipeline.detector().is_warm() {
            SignalState::WarmingUp
        } else if self.bpm() == 0 {
            SignalState::NoSignal
        } else {
            SignalState::Pulse
        }
    }
}
