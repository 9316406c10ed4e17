use crate::signal::{to_adc, Sample};
use anyhow::{Context, Result};
use csv::ReaderBuilder;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Read a `t_ms,value` CSV of timestamped sensor readings.
pub fn read_timed_samples(path: &Path) -> Result<Vec<Sample>> {
    let file = File::open(path).with_context(|| format!("opening {}", path.display()))?;
    parse_timed_samples(file).with_context(|| format!("in {}", path.display()))
}

pub fn parse_timed_samples<R: Read>(input: R) -> Result<Vec<Sample>> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .comment(Some(b'#'))
        .from_reader(input);
    let headers = reader.headers().context("reading header")?.clone();
    let t_idx = locate_column(&headers, "t_ms")?;
    let value_idx = locate_column(&headers, "value")?;

    let mut samples: Vec<Sample> = Vec::new();
    for (row, result) in reader.records().enumerate() {
        let record = result.with_context(|| format!("reading row {}", row + 1))?;
        let at_ms = record
            .get(t_idx)
            .unwrap_or_default()
            .parse::<u64>()
            .with_context(|| format!("row {}: t_ms is not whole milliseconds", row + 1))?;
        let value = record
            .get(value_idx)
            .unwrap_or_default()
            .parse::<f64>()
            .with_context(|| format!("row {}: value is not numeric", row + 1))?;
        if let Some(prev) = samples.last() {
            if at_ms < prev.at_ms {
                anyhow::bail!(
                    "row {}: timestamps go backwards ({} < {})",
                    row + 1,
                    at_ms,
                    prev.at_ms
                );
            }
        }
        samples.push(Sample::new(at_ms, to_adc(value)));
    }
    if samples.is_empty() {
        anyhow::bail!("no samples found");
    }
    Ok(samples)
}

/// Sampling rate implied by the median spacing of the timestamps.
pub fn infer_rate_hz(samples: &[Sample]) -> Option<f64> {
    let mut deltas: Vec<u64> = samples
        .windows(2)
        .map(|w| w[1].at_ms - w[0].at_ms)
        .filter(|&d| d > 0)
        .collect();
    if deltas.is_empty() {
        return None;
    }
    deltas.sort_unstable();
    Some(1000.0 / deltas[deltas.len() / 2] as f64)
}

fn locate_column(headers: &csv::StringRecord, requested: &str) -> Result<usize> {
    headers
        .iter()
        .position(|name| name.eq_ignore_ascii_case(requested))
        .ok_or_else(|| anyhow::anyhow!("missing {} column", requested))
}
