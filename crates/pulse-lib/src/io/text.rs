use crate::signal::IntervalSeries;
use anyhow::{Context, Result};
use std::path::Path;

fn data_lines(text: &str) -> impl Iterator<Item = (usize, &str)> {
    text.lines()
        .enumerate()
        .map(|(idx, line)| (idx + 1, line.trim()))
        .filter(|(_, line)| !line.is_empty() && !line.starts_with('#'))
}

/// Parse newline-delimited floating point series, ignoring blank/comment lines.
pub fn parse_f64_series(text: &str) -> Result<Vec<f64>> {
    let mut out = Vec::new();
    for (line_no, trimmed) in data_lines(text) {
        let val: f64 = trimmed
            .parse()
            .with_context(|| format!("line {line_no} is not f64: {trimmed}"))?;
        out.push(val);
    }
    if out.is_empty() {
        anyhow::bail!("no numeric samples found");
    }
    Ok(out)
}

/// Read a newline-delimited floating point series from disk.
pub fn read_f64_series(path: &Path) -> Result<Vec<f64>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_f64_series(&text)
}

/// Parse newline-delimited inter-beat intervals in milliseconds.
pub fn parse_interval_series(text: &str) -> Result<IntervalSeries> {
    let mut ms = Vec::new();
    for (line_no, trimmed) in data_lines(text) {
        let val: u32 = trimmed
            .parse()
            .with_context(|| format!("line {line_no} is not an interval in ms: {trimmed}"))?;
        ms.push(val);
    }
    if ms.is_empty() {
        anyhow::bail!("no intervals found");
    }
    Ok(IntervalSeries { ms })
}

pub fn read_interval_series(path: &Path) -> Result<IntervalSeries> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_interval_series(&text)
}
