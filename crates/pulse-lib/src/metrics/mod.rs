pub mod bpm;
pub mod hrv;
