use crate::config::MonitorConfig;
use log::info;
use serde::{Deserialize, Serialize};

/// Intervals kept between two reporting boundaries. At 180 BPM a 5 s window
/// holds 15, so this only bounds memory when `tick` is not being called.
const WINDOW_CAPACITY: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BpmReport {
    pub at_ms: u64,
    /// Reported value; 0 means no signal or an implausible rate.
    pub bpm: u16,
    /// Number of intervals the value was averaged over.
    pub intervals: usize,
}

/// Averages accepted intervals into a BPM value once per reporting cadence.
#[derive(Debug, Clone)]
pub struct BpmEstimator {
    window: Vec<u32>,
    cadence_ms: u64,
    min_bpm: u16,
    max_bpm: u16,
    last_boundary_ms: Option<u64>,
    latest: u16,
}

impl BpmEstimator {
    pub fn new(cfg: &MonitorConfig) -> Self {
        Self {
            window: Vec::with_capacity(WINDOW_CAPACITY),
            cadence_ms: cfg.bpm_cadence_ms,
            min_bpm: cfg.bpm_min,
            max_bpm: cfg.bpm_max,
            last_boundary_ms: None,
            latest: 0,
        }
    }

    /// Begin a new reporting period at `now_ms`, forgetting earlier state.
    pub fn start(&mut self, now_ms: u64) {
        self.reset();
        self.last_boundary_ms = Some(now_ms);
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.last_boundary_ms = None;
        self.latest = 0;
    }

    pub fn record(&mut self, interval_ms: u32) {
        if self.window.len() == WINDOW_CAPACITY {
            self.window.remove(0);
        }
        self.window.push(interval_ms);
    }

    /// Last accepted value; only changes at reporting boundaries.
    pub fn bpm(&self) -> u16 {
        self.latest
    }

    /// Close the current window if a boundary has been reached.
    pub fn tick(&mut self, now_ms: u64) -> Option<BpmReport> {
        let last = self.last_boundary_ms?;
        if now_ms.saturating_sub(last) < self.cadence_ms {
            return None;
        }
        let intervals = self.window.len();
        self.latest = self.estimate();
        self.window.clear();
        self.last_boundary_ms = Some(now_ms);
        info!("bpm {} from {} intervals", self.latest, intervals);
        Some(BpmReport {
            at_ms: now_ms,
            bpm: self.latest,
            intervals,
        })
    }

    fn estimate(&self) -> u16 {
        if self.window.is_empty() {
            return 0;
        }
        let mean = self.window.iter().map(|&v| v as f64).sum::<f64>() / self.window.len() as f64;
        if mean <= 0.0 {
            return 0;
        }
        let bpm = (60_000.0 / mean).round();
        if bpm >= self.min_bpm as f64 && bpm <= self.max_bpm as f64 {
            bpm as u16
        } else {
            0
        }
    }
}
