//! Stored session results and the display categories derived from them.

use crate::metrics::hrv::HrvMetrics;
use chrono::{DateTime, Local, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Format used for every timestamp shown in the history list.
pub const TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum HistoryRecord {
    Kubios(KubiosRecord),
    Hrv(HrvRecord),
}

impl HistoryRecord {
    pub fn time(&self) -> &str {
        match self {
            HistoryRecord::Kubios(r) => &r.time,
            HistoryRecord::Hrv(r) => &r.time,
        }
    }
}

/// Result of a cloud readiness analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KubiosRecord {
    pub time: String,
    pub mean_hr_bpm: f64,
    pub stress_index: f64,
    pub readiness: f64,
    pub rmssd_ms: f64,
    pub pns_index: f64,
    pub sns_index: f64,
}

/// Result of a locally computed HRV session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HrvRecord {
    pub time: String,
    pub mean_hr_bpm: f64,
    pub mean_ppi_ms: f64,
    pub rmssd_ms: f64,
    pub sdnn_ms: f64,
    pub count: usize,
}

impl HrvRecord {
    pub fn new(time: String, metrics: &HrvMetrics) -> Self {
        Self {
            time,
            mean_hr_bpm: metrics.mean_hr_bpm,
            mean_ppi_ms: metrics.mean_ppi_ms,
            rmssd_ms: metrics.rmssd_ms,
            sdnn_ms: metrics.sdnn_ms,
            count: metrics.interval_count,
        }
    }
}

pub fn format_timestamp<Tz>(dt: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    Tz::Offset: fmt::Display,
{
    dt.format(TIMESTAMP_FORMAT).to_string()
}

pub fn now_timestamp() -> String {
    format_timestamp(&Local::now())
}

/// Timestamp for a record built from an analysis response. Falls back to the
/// local clock when the response carries no parsable RFC 3339 time.
pub fn timestamp_from_analysis(create_timestamp: &str) -> String {
    match DateTime::parse_from_rfc3339(create_timestamp.trim()) {
        Ok(dt) => format_timestamp(&dt),
        Err(err) => {
            log::debug!("unparsable analysis timestamp {create_timestamp:?}: {err}");
            now_timestamp()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Level {
    Low,
    Norm,
    High,
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Level::Low => "Low",
            Level::Norm => "Norm",
            Level::High => "High",
        };
        f.write_str(label)
    }
}

fn classify(value: f64, low_below: f64, high_above: f64) -> Level {
    if value < low_below {
        Level::Low
    } else if value > high_above {
        Level::High
    } else {
        Level::Norm
    }
}

pub fn stress_level(stress_index: f64) -> Level {
    classify(stress_index, 7.0, 12.0)
}

pub fn rmssd_level(rmssd_ms: f64) -> Level {
    classify(rmssd_ms, 20.0, 50.0)
}

pub fn readiness_level(readiness: f64) -> Level {
    classify(readiness, 50.0, 70.0)
}

/// Shared by the PNS and SNS indices.
pub fn nervous_system_level(index: f64) -> Level {
    classify(index, -1.0, 1.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{FixedOffset, NaiveDate};

    #[test]
    fn formats_day_first() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 7)
            .unwrap()
            .and_hms_opt(9, 5, 0)
            .unwrap()
            .and_local_timezone(FixedOffset::east_opt(0).unwrap())
            .unwrap();
        assert_eq!(format_timestamp(&dt), "07-03-2024 09:05");
    }

    #[test]
    fn analysis_timestamp_keeps_its_own_offset() {
        assert_eq!(
            timestamp_from_analysis("2024-11-02T18:45:12.123+02:00"),
            "02-11-2024 18:45"
        );
    }

    #[test]
    fn analysis_timestamp_falls_back_to_now() {
        let stamp = timestamp_from_analysis("not a time");
        assert_eq!(stamp.len(), "dd-mm-yyyy hh:mm".len());
        assert_eq!(&stamp[2..3], "-");
    }

    #[test]
    fn levels_use_inclusive_normal_band() {
        assert_eq!(stress_level(6.9), Level::Low);
        assert_eq!(stress_level(7.0), Level::Norm);
        assert_eq!(stress_level(12.0), Level::Norm);
        assert_eq!(stress_level(12.5), Level::High);
        assert_eq!(rmssd_level(19.0), Level::Low);
        assert_eq!(rmssd_level(50.0), Level::Norm);
        assert_eq!(readiness_level(71.0), Level::High);
        assert_eq!(nervous_system_level(-1.0), Level::Norm);
        assert_eq!(nervous_system_level(-1.2), Level::Low);
        assert_eq!(nervous_system_level(1.01), Level::High);
        assert_eq!(Level::Norm.to_string(), "Norm");
    }

    #[test]
    fn records_are_tagged_by_kind() {
        let metrics = crate::metrics::hrv::finalize(&[800, 820, 810]);
        let record = HistoryRecord::Hrv(HrvRecord::new("01-01-2024 10:00".into(), &metrics));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["kind"], "hrv");
        assert_eq!(value["count"], 3);
        let back: HistoryRecord = serde_json::from_value(value).unwrap();
        assert_eq!(back, record);
        assert_eq!(back.time(), "01-01-2024 10:00");
    }
}
