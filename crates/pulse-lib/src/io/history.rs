use crate::error::HistoryError;
use crate::records::HistoryRecord;
use log::warn;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

pub trait HistoryStore {
    fn append(&mut self, record: HistoryRecord) -> Result<(), HistoryError>;
    fn read_all(&self) -> Vec<HistoryRecord>;
}

/// History kept as a single JSON array on disk.
#[derive(Debug, Clone)]
pub struct JsonHistoryStore {
    path: PathBuf,
}

impl JsonHistoryStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_error(&self, source: std::io::Error) -> HistoryError {
        HistoryError::Write {
            path: self.path.display().to_string(),
            source,
        }
    }
}

impl HistoryStore for JsonHistoryStore {
    fn append(&mut self, record: HistoryRecord) -> Result<(), HistoryError> {
        let mut records = self.read_all();
        records.push(record);
        let encoded = serde_json::to_vec_pretty(&records)?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| self.write_error(e))?;
        }
        fs::write(&self.path, encoded).map_err(|e| self.write_error(e))
    }

    /// A missing file is an empty history; an unreadable one is logged and
    /// treated the same way.
    fn read_all(&self) -> Vec<HistoryRecord> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => return Vec::new(),
            Err(err) => {
                warn!("failed to read history {}: {err}", self.path.display());
                return Vec::new();
            }
        };
        if bytes.iter().all(u8::is_ascii_whitespace) {
            return Vec::new();
        }
        serde_json::from_slice(&bytes).unwrap_or_else(|err| {
            warn!("ignoring corrupt history {}: {err}", self.path.display());
            Vec::new()
        })
    }
}

#[derive(Debug, Clone, Default)]
pub struct MemoryHistoryStore {
    records: Vec<HistoryRecord>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for MemoryHistoryStore {
    fn append(&mut self, record: HistoryRecord) -> Result<(), HistoryError> {
        self.records.push(record);
        Ok(())
    }

    fn read_all(&self) -> Vec<HistoryRecord> {
        self.records.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{HrvRecord, KubiosRecord};
    use tempfile::tempdir;

    fn hrv(time: &str) -> HistoryRecord {
        HistoryRecord::Hrv(HrvRecord {
            time: time.into(),
            mean_hr_bpm: 70.0,
            mean_ppi_ms: 857.0,
            rmssd_ms: 30.0,
            sdnn_ms: 25.0,
            count: 34,
        })
    }

    #[test]
    fn missing_file_is_empty() {
        let dir = tempdir().unwrap();
        let store = JsonHistoryStore::new(dir.path().join("none.json"));
        assert!(store.read_all().is_empty());
    }

    #[test]
    fn appends_preserve_order() {
        let dir = tempdir().unwrap();
        let mut store = JsonHistoryStore::new(dir.path().join("nested/history.json"));
        store.append(hrv("01-01-2024 10:00")).unwrap();
        store
            .append(HistoryRecord::Kubios(KubiosRecord {
                time: "01-01-2024 11:00".into(),
                mean_hr_bpm: 68.0,
                stress_index: 8.0,
                readiness: 72.0,
                rmssd_ms: 41.0,
                pns_index: 0.5,
                sns_index: -0.3,
            }))
            .unwrap();
        let records = JsonHistoryStore::new(store.path()).read_all();
        assert_eq!(records.len(), 2);
        assert_eq!(records[0], hrv("01-01-2024 10:00"));
        assert!(matches!(records[1], HistoryRecord::Kubios(_)));
    }

    #[test]
    fn corrupt_file_reads_empty_and_is_replaced() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("history.json");
        fs::write(&path, "{ not json").unwrap();
        let mut store = JsonHistoryStore::new(&path);
        assert!(store.read_all().is_empty());
        store.append(hrv("02-01-2024 09:00")).unwrap();
        assert_eq!(store.read_all().len(), 1);
    }

    #[test]
    fn memory_store_round_trip() {
        let mut store = MemoryHistoryStore::new();
        store.append(hrv("a")).unwrap();
        assert_eq!(store.read_all(), vec![hrv("a")]);
    }
}
