use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest queue that survives a worst-case pump stall at the default rate.
pub const MIN_QUEUE_CAPACITY: usize = 30;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub monitor: MonitorConfig,
    pub session: SessionConfig,
    pub link: LinkConfig,
}

/// Parameters of the sampling, smoothing, detection and BPM stages.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct MonitorConfig {
    /// ADC sampling frequency (Hz).
    pub sample_rate_hz: u32,
    /// Moving-average length in raw samples.
    pub smoothing_window: usize,
    /// Number of smoothed values kept for adaptive thresholds and waveform display.
    pub history_capacity: usize,
    /// Capacity of the producer/consumer sample queue.
    pub queue_capacity: usize,
    /// Refractory period between accepted beats (ms).
    pub debounce_ms: u64,
    /// Shortest plausible inter-beat interval (ms).
    pub interval_min_ms: u32,
    /// Longest plausible inter-beat interval (ms).
    pub interval_max_ms: u32,
    /// Fraction of the history range where the rising threshold sits.
    pub threshold_on_ratio: f64,
    /// Fraction of the history range where the falling threshold sits.
    pub threshold_off_ratio: f64,
    /// BPM reporting cadence (ms).
    pub bpm_cadence_ms: u64,
    pub bpm_min: u16,
    pub bpm_max: u16,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_rate_hz: 200,
            smoothing_window: 5,
            history_capacity: 250,
            queue_capacity: 50,
            debounce_ms: 300,
            interval_min_ms: 333,
            interval_max_ms: 1500,
            threshold_on_ratio: 0.6,
            threshold_off_ratio: 0.4,
            bpm_cadence_ms: 5000,
            bpm_min: 40,
            bpm_max: 180,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sample_rate_hz == 0 {
            return Err(ConfigError::Zero {
                field: "sample_rate_hz",
            });
        }
        if self.smoothing_window == 0 {
            return Err(ConfigError::Zero {
                field: "smoothing_window",
            });
        }
        if self.history_capacity == 0 {
            return Err(ConfigError::Zero {
                field: "history_capacity",
            });
        }
        if self.bpm_cadence_ms == 0 {
            return Err(ConfigError::Zero {
                field: "bpm_cadence_ms",
            });
        }
        if self.queue_capacity < MIN_QUEUE_CAPACITY {
            return Err(ConfigError::QueueTooSmall {
                min: MIN_QUEUE_CAPACITY,
                actual: self.queue_capacity,
            });
        }
        if self.interval_min_ms > self.interval_max_ms {
            return Err(ConfigError::InvertedBounds {
                field: "interval",
                min: self.interval_min_ms as u64,
                max: self.interval_max_ms as u64,
            });
        }
        if self.bpm_min > self.bpm_max {
            return Err(ConfigError::InvertedBounds {
                field: "bpm",
                min: self.bpm_min as u64,
                max: self.bpm_max as u64,
            });
        }
        let (on, off) = (self.threshold_on_ratio, self.threshold_off_ratio);
        if !(0.0 < off && off < on && on < 1.0) {
            return Err(ConfigError::ThresholdRatios { on, off });
        }
        Ok(())
    }
}

/// Timed collection windows and collaborator timeouts.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    pub hrv_duration_ms: u64,
    pub poll_interval_ms: u64,
    pub analysis_timeout_ms: u64,
    pub history_path: PathBuf,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            hrv_duration_ms: 30_000,
            poll_interval_ms: 5,
            analysis_timeout_ms: 10_000,
            history_path: PathBuf::from("history.json"),
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.hrv_duration_ms == 0 {
            return Err(ConfigError::Zero {
                field: "hrv_duration_ms",
            });
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::Zero {
                field: "poll_interval_ms",
            });
        }
        if self.analysis_timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "analysis_timeout_ms",
            });
        }
        Ok(())
    }
}

/// Topic names used on the pub/sub link.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LinkConfig {
    pub telemetry_topic: String,
    pub request_topic: String,
    pub response_topic: String,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            telemetry_topic: "hrv/metrics".into(),
            request_topic: "kubios-request".into(),
            response_topic: "kubios-response".into(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.monitor.validate()?;
        self.session.validate()
    }

    pub fn from_toml_str(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents).context("parsing config")?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path.display()))?;
        Self::from_toml_str(&contents).with_context(|| format!("in config {}", path.display()))
    }
}
