use crate::signal::IntervalSeries;
use serde::{Deserialize, Serialize};

/// Time-domain HRV summary of one collection session.
///
/// Serialized with the upper-case keys the telemetry topic carries.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct HrvMetrics {
    pub mean_ppi_ms: f64,
    pub mean_hr_bpm: f64,
    pub rmssd_ms: f64,
    pub sdnn_ms: f64,
    pub interval_count: usize,
}

/// Compute HRV metrics over intervals in beat order. Total: an empty input
/// yields all zeros and a single interval yields zero RMSSD/SDNN.
pub fn finalize(intervals_ms: &[u32]) -> HrvMetrics {
    let rr: Vec<f64> = intervals_ms.iter().map(|&v| v as f64).collect();
    let mean_ppi_ms = mean(&rr);
    let mean_hr_bpm = if mean_ppi_ms > 0.0 {
        60_000.0 / mean_ppi_ms
    } else {
        0.0
    };
    HrvMetrics {
        mean_ppi_ms,
        mean_hr_bpm,
        rmssd_ms: rmssd(&rr),
        sdnn_ms: sdnn(&rr),
        interval_count: rr.len(),
    }
}

pub fn finalize_series(series: &IntervalSeries) -> HrvMetrics {
    finalize(&series.ms)
}

fn mean(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    data.iter().sum::<f64>() / data.len() as f64
}

/// Root mean square of successive differences.
pub fn rmssd(rr: &[f64]) -> f64 {
    if rr.len() < 2 {
        return 0.0;
    }
    let diffs: Vec<f64> = rr.windows(2).map(|w| (w[1] - w[0]).powi(2)).collect();
    mean(&diffs).sqrt()
}

/// Population standard deviation of the intervals.
pub fn sdnn(rr: &[f64]) -> f64 {
    if rr.is_empty() {
        return 0.0;
    }
    let avg = mean(rr);
    let deviations: Vec<f64> = rr.iter().map(|x| (x - avg).powi(2)).collect();
    mean(&deviations).sqrt()
}
