pub mod buffer;
pub mod clock;
pub mod config;
pub mod detectors;
pub mod error;
pub mod io;
pub mod link;
pub mod metrics;
pub mod monitor;
pub mod queue;
pub mod records;
pub mod session;
pub mod signal;
pub mod source;

pub use config::{Config, MonitorConfig};
pub use detectors::ppg::{analyze_recording, Beat, BeatDetector, PpgPipeline, Smoother};
pub use metrics::{bpm::BpmEstimator, hrv::HrvMetrics};
pub use monitor::HeartbeatMonitor;
pub use session::SessionController;
pub use signal::*;
