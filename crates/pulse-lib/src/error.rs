use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("queue capacity must hold at least {min} samples, got {actual}")]
    QueueTooSmall { min: usize, actual: usize },
    #[error("{field} bounds are inverted: {min} > {max}")]
    InvertedBounds {
        field: &'static str,
        min: u64,
        max: u64,
    },
    #[error("threshold ratios must satisfy 0 < off ({off}) < on ({on}) < 1")]
    ThresholdRatios { on: f64, off: f64 },
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("no response within {0} ms")]
    Timeout(u64),
    #[error("link disconnected")]
    Disconnected,
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("transport error: {0}")]
    Transport(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("failed to write history file {path}: {source}")]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode history: {0}")]
    Encode(#[from] serde_json::Error),
}
