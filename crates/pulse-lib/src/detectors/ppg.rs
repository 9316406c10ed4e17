use crate::{
    buffer::HistoryBuffer,
    config::MonitorConfig,
    metrics::{
        bpm::{BpmEstimator, BpmReport},
        hrv::{finalize, HrvMetrics},
    },
    signal::{Sample, TimeSeries},
};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Moving average over the last `window` raw samples.
///
/// Until the window fills, the mean is taken over whatever is buffered, so the
/// output is defined from the very first sample.
#[derive(Debug, Clone)]
pub struct Smoother {
    window: VecDeque<u16>,
    size: usize,
    sum: u64,
}

impl Smoother {
    pub fn new(size: usize) -> Self {
        let size = size.max(1);
        Self {
            window: VecDeque::with_capacity(size),
            size,
            sum: 0,
        }
    }

    pub fn observe(&mut self, raw: u16) -> f64 {
        if self.window.len() == self.size {
            if let Some(old) = self.window.pop_front() {
                self.sum -= old as u64;
            }
        }
        self.window.push_back(raw);
        self.sum += raw as u64;
        self.sum as f64 / self.window.len() as f64
    }

    pub fn reset(&mut self) {
        self.window.clear();
        self.sum = 0;
    }
}

/// Hysteresis pair derived from the history range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Thresholds {
    pub on: f64,
    pub off: f64,
}

impl Thresholds {
    pub fn from_range(minimum: f64, maximum: f64, on_ratio: f64, off_ratio: f64) -> Self {
        let range = maximum - minimum;
        Self {
            on: minimum + on_ratio * range,
            off: minimum + off_ratio * range,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DetectorState {
    /// Waiting for the signal to rise above `on`.
    Armed,
    /// Waiting for the signal to fall below `off`.
    Triggered,
}

/// A rising crossing accepted by the detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beat {
    pub at_ms: u64,
    /// Delta to the previous beat, present only when it was physiologically plausible.
    pub interval_ms: Option<u32>,
}

/// Adaptive two-threshold beat detector over the smoothed stream.
#[derive(Debug, Clone)]
pub struct BeatDetector {
    history: HistoryBuffer,
    state: DetectorState,
    thresholds: Option<Thresholds>,
    last_beat_ms: Option<u64>,
    on_ratio: f64,
    off_ratio: f64,
    debounce_ms: u64,
    interval_min_ms: u32,
    interval_max_ms: u32,
}

impl BeatDetector {
    pub fn new(cfg: &MonitorConfig) -> Self {
        Self {
            history: HistoryBuffer::with_capacity(cfg.history_capacity),
            state: DetectorState::Armed,
            thresholds: None,
            last_beat_ms: None,
            on_ratio: cfg.threshold_on_ratio,
            off_ratio: cfg.threshold_off_ratio,
            debounce_ms: cfg.debounce_ms,
            interval_min_ms: cfg.interval_min_ms,
            interval_max_ms: cfg.interval_max_ms,
        }
    }

    pub fn state(&self) -> DetectorState {
        self.state
    }

    pub fn history(&self) -> &HistoryBuffer {
        &self.history
    }

    /// Thresholds from the last full-buffer update; `None` during warm-up.
    pub fn thresholds(&self) -> Option<Thresholds> {
        self.thresholds
    }

    pub fn last_beat_ms(&self) -> Option<u64> {
        self.last_beat_ms
    }

    pub fn is_warm(&self) -> bool {
        self.history.is_full()
    }

    pub fn reset(&mut self) {
        self.history.clear();
        self.state = DetectorState::Armed;
        self.thresholds = None;
        self.last_beat_ms = None;
    }

    /// Feed one smoothed value taken at `at_ms`.
    pub fn observe(&mut self, value: f64, at_ms: u64) -> Option<Beat> {
        self.history.push(value);
        if !self.history.is_full() {
            return None;
        }
        let (minimum, maximum) = self.history.min_max()?;
        let thresholds = Thresholds::from_range(minimum, maximum, self.on_ratio, self.off_ratio);
        self.thresholds = Some(thresholds);

        match self.state {
            DetectorState::Armed if value > thresholds.on => {
                let elapsed = self.last_beat_ms.map(|last| at_ms.saturating_sub(last));
                if matches!(elapsed, Some(dt) if dt < self.debounce_ms) {
                    return None;
                }
                self.state = DetectorState::Triggered;
                self.last_beat_ms = Some(at_ms);
                let interval_ms = elapsed
                    .map(|dt| u32::try_from(dt).unwrap_or(u32::MAX))
                    .filter(|dt| (self.interval_min_ms..=self.interval_max_ms).contains(dt));
                match (elapsed, interval_ms) {
                    (Some(dt), None) => debug!("beat at {at_ms} ms, discarded interval {dt} ms"),
                    (_, Some(dt)) => debug!("beat at {at_ms} ms, interval {dt} ms"),
                    (None, None) => debug!("first beat at {at_ms} ms"),
                }
                Some(Beat { at_ms, interval_ms })
            }
            DetectorState::Triggered if value < thresholds.off => {
                self.state = DetectorState::Armed;
                None
            }
            _ => None,
        }
    }
}

/// Smoother and detector chained together.
#[derive(Debug, Clone)]
pub struct PpgPipeline {
    smoother: Smoother,
    detector: BeatDetector,
}

impl PpgPipeline {
    pub fn new(cfg: &MonitorConfig) -> Self {
        Self {
            smoother: Smoother::new(cfg.smoothing_window),
            detector: BeatDetector::new(cfg),
        }
    }

    pub fn push(&mut self, sample: Sample) -> Option<Beat> {
        let smoothed = self.smoother.observe(sample.value);
        self.detector.observe(smoothed, sample.at_ms)
    }

    pub fn detector(&self) -> &BeatDetector {
        &self.detector
    }

    pub fn reset(&mut self) {
        self.smoother.reset();
        self.detector.reset();
    }
}

/// Result of running a whole recording through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingAnalysis {
    pub fs: f64,
    pub sample_count: usize,
    pub beats_ms: Vec<u64>,
    pub intervals_ms: Vec<u32>,
    pub bpm_reports: Vec<BpmReport>,
    pub hrv: HrvMetrics,
}

/// Run a recording through smoothing, detection and BPM reporting, with the
/// reporting cadence driven by sample timestamps.
pub fn analyze_recording(ts: &TimeSeries, cfg: &MonitorConfig) -> RecordingAnalysis {
    analyze_samples(ts.samples(), ts.fs, cfg)
}

/// Same as [`analyze_recording`] for samples that carry their own timestamps.
pub fn analyze_samples(
    samples: impl IntoIterator<Item = Sample>,
    fs: f64,
    cfg: &MonitorConfig,
) -> RecordingAnalysis {
    let mut pipeline = PpgPipeline::new(cfg);
    let mut bpm = BpmEstimator::new(cfg);
    let mut beats_ms = Vec::new();
    let mut intervals_ms = Vec::new();
    let mut bpm_reports = Vec::new();
    let mut sample_count = 0;

    for sample in samples {
        if sample_count == 0 {
            bpm.start(sample.at_ms);
        }
        sample_count += 1;
        if let Some(beat) = pipeline.push(sample) {
            beats_ms.push(beat.at_ms);
            if let Some(interval) = beat.interval_ms {
                intervals_ms.push(interval);
                bpm.record(interval);
            }
        }
        if let Some(report) = bpm.tick(sample.at_ms) {
            bpm_reports.push(report);
        }
    }

    let hrv = finalize(&intervals_ms);
    RecordingAnalysis {
        fs,
        sample_count,
        beats_ms,
        intervals_ms,
        bpm_reports,
        hrv,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::PI;

    fn cfg() -> MonitorConfig {
        MonitorConfig::default()
    }

    fn sine_series(fs: f64, freq_hz: f64, seconds: f64) -> TimeSeries {
        let n = (fs * seconds) as usize;
        let data = (0..n)
            .map(|i| {
                let t = i as f64 / fs;
                32_768.0 + 10_000.0 * (2.0 * PI * freq_hz * t).sin()
            })
            .collect();
        TimeSeries { fs, data }
    }

    #[test]
    fn smoother_uses_shrinking_divisor_until_full() {
        let mut smoother = Smoother::new(3);
        assert_eq!(smoother.observe(30), 30.0);
        assert_eq!(smoother.observe(60), 45.0);
        assert_eq!(smoother.observe(90), 60.0);
        assert_eq!(smoother.observe(120), 90.0);
        smoother.reset();
        assert_eq!(smoother.observe(7), 7.0);
    }

    #[test]
    fn thresholds_sit_inside_range() {
        let t = Thresholds::from_range(100.0, 200.0, 0.6, 0.4);
        assert_eq!(t, Thresholds { on: 160.0, off: 140.0 });
        for (lo, hi) in [(0.0, 1.0), (-5.0, 12.5), (1000.0, 1000.5)] {
            let t = Thresholds::from_range(lo, hi, 0.6, 0.4);
            assert!(t.off < t.on);
            assert!(lo <= t.off && t.on <= hi);
        }
    }

    #[test]
    fn stays_armed_during_warm_up() {
        let config = cfg();
        let mut detector = BeatDetector::new(&config);
        for i in 0..config.history_capacity - 1 {
            let value = if i % 2 == 0 { 0.0 } else { 50_000.0 };
            assert_eq!(detector.observe(value, i as u64 * 5), None);
            assert_eq!(detector.state(), DetectorState::Armed);
            assert_eq!(detector.thresholds(), None);
        }
        assert!(!detector.is_warm());
    }

    #[test]
    fn hysteresis_needs_fall_below_off() {
        let mut config = cfg();
        config.history_capacity = 4;
        config.debounce_ms = 0;
        let mut detector = BeatDetector::new(&config);
        for (i, v) in [0.0, 100.0, 0.0].into_iter().enumerate() {
            detector.observe(v, i as u64);
        }
        // full: [0, 100, 0, 90] -> on = 60, off = 40
        let beat = detector.observe(90.0, 1000).expect("rising edge");
        assert_eq!(beat.interval_ms, None);
        assert_eq!(detector.state(), DetectorState::Triggered);
        // lingering between thresholds produces nothing
        assert_eq!(detector.observe(50.0, 1400), None);
        assert_eq!(detector.observe(95.0, 1500), None);
        assert_eq!(detector.state(), DetectorState::Triggered);
        assert_eq!(detector.observe(10.0, 1600), None);
        assert_eq!(detector.state(), DetectorState::Armed);
        let beat = detector.observe(99.0, 1800).expect("second rising edge");
        assert_eq!(beat.interval_ms, Some(800));
    }

    #[test]
    fn debounce_blocks_close_crossings() {
        let mut config = cfg();
        config.history_capacity = 4;
        let mut detector = BeatDetector::new(&config);
        for (i, v) in [0.0, 100.0, 0.0].into_iter().enumerate() {
            detector.observe(v, i as u64);
        }
        assert!(detector.observe(90.0, 1000).is_some());
        assert_eq!(detector.observe(0.0, 1100), None);
        // 200 ms later: inside the refractory window, stays armed
        assert_eq!(detector.observe(90.0, 1200), None);
        assert_eq!(detector.state(), DetectorState::Armed);
        let beat = detector.observe(90.0, 1300).expect("debounce elapsed");
        assert_eq!(beat.at_ms, 1300);
        // 300 ms is below the plausible range: beat accepted, interval dropped
        assert_eq!(beat.interval_ms, None);
        assert_eq!(detector.last_beat_ms(), Some(1300));
    }

    #[test]
    fn implausible_interval_still_resets_last_beat() {
        let mut config = cfg();
        config.history_capacity = 4;
        let mut detector = BeatDetector::new(&config);
        for (i, v) in [0.0, 100.0, 0.0].into_iter().enumerate() {
            detector.observe(v, i as u64);
        }
        detector.observe(90.0, 1000);
        detector.observe(0.0, 1500);
        let slow = detector.observe(90.0, 3000).unwrap();
        assert_eq!(slow.interval_ms, None);
        detector.observe(0.0, 3300);
        let next = detector.observe(90.0, 3800).unwrap();
        assert_eq!(next.interval_ms, Some(800));
    }

    #[test]
    fn reset_clears_state() {
        let config = cfg();
        let mut pipeline = PpgPipeline::new(&config);
        for sample in sine_series(200.0, 1.2, 3.0).samples() {
            pipeline.push(sample);
        }
        assert!(pipeline.detector().last_beat_ms().is_some());
        pipeline.reset();
        let detector = pipeline.detector();
        assert_eq!(detector.state(), DetectorState::Armed);
        assert!(detector.history().is_empty());
        assert_eq!(detector.last_beat_ms(), None);
        assert_eq!(detector.thresholds(), None);
    }

    #[test]
    fn sine_at_72_bpm_reports_72() {
        let config = cfg();
        let warm_up_s = config.history_capacity as f64 / config.sample_rate_hz as f64;
        let ts = sine_series(200.0, 1.2, warm_up_s + 10.0);
        let result = analyze_recording(&ts, &config);

        assert!(result.intervals_ms.len() >= 8);
        for interval in &result.intervals_ms {
            assert!((333..=1500).contains(interval));
        }
        for pair in result.beats_ms.windows(2) {
            assert!(pair[1] - pair[0] >= config.debounce_ms);
        }
        let reported: Vec<u16> = result
            .bpm_reports
            .iter()
            .map(|r| r.bpm)
            .filter(|&bpm| bpm > 0)
            .collect();
        assert!(!reported.is_empty());
        let avg = reported.iter().map(|&b| b as f64).sum::<f64>() / reported.len() as f64;
        assert!((avg - 72.0).abs() <= 5.0, "average bpm {avg}");
        assert!((result.hrv.mean_hr_bpm - 72.0).abs() <= 5.0);
    }

    #[test]
    fn flat_signal_never_beats() {
        let ts = TimeSeries {
            fs: 200.0,
            data: vec![30_000.0; 2000],
        };
        let result = analyze_recording(&ts, &cfg());
        assert!(result.beats_ms.is_empty());
        assert_eq!(result.hrv.interval_count, 0);
        assert!(result.bpm_reports.iter().all(|r| r.bpm == 0));
    }
}
