use serde::{Deserialize, Serialize};

/// One timestamped ADC reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sample {
    /// Monotonic timestamp in milliseconds
    pub at_ms: u64,
    /// Raw sensor value (16-bit ADC range)
    pub value: u16,
}

impl Sample {
    pub fn new(at_ms: u64, value: u16) -> Self {
        Self { at_ms, value }
    }
}

/// Uniformly sampled recording of raw sensor values.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeSeries {
    /// Uniform sampling frequency in Hz
    pub fs: f64,
    /// Samples
    pub data: Vec<f64>,
}

impl TimeSeries {
    pub fn len(&self) -> usize {
        self.data.len()
    }
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Timestamp each value as `index * 1000 / fs` and clamp it into the ADC range.
    pub fn samples(&self) -> impl Iterator<Item = Sample> + '_ {
        let fs = self.fs;
        self.data
            .iter()
            .enumerate()
            .map(move |(i, &v)| Sample::new(index_to_ms(i, fs), to_adc(v)))
    }
}

fn index_to_ms(index: usize, fs: f64) -> u64 {
    if fs <= 0.0 {
        return 0;
    }
    (index as f64 * 1000.0 / fs).round() as u64
}

/// Saturating conversion of an arbitrary reading into the 16-bit ADC range.
pub fn to_adc(value: f64) -> u16 {
    if value.is_nan() {
        return 0;
    }
    value.round().clamp(0.0, u16::MAX as f64) as u16
}

/// Inter-beat intervals in milliseconds, in beat order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IntervalSeries {
    pub ms: Vec<u32>,
}

impl IntervalSeries {
    pub fn len(&self) -> usize {
        self.ms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ms.is_empty()
    }
}
