//! Raw phase records and the sinks that store them.

use crate::error::SinkError;
use radiometry::PhaseTag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tracing::info;

/// Housekeeping slot holding the LO reference frequency in GHz.
pub const HK_REFERENCE_GHZ: usize = 13;
/// Housekeeping slot holding the sky frequency in GHz.
pub const HK_SKY_GHZ: usize = 14;
/// Housekeeping slot holding the IF offset in GHz.
pub const HK_IF_GHZ: usize = 15;

/// Everything stored for one backend and one phase.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    /// Seconds since the Unix epoch.
    pub timestamp: i64,
    pub housekeeping: Vec<f32>,
    pub channel_data: Vec<f32>,
    /// Raw correlator words, for correlator backends only.
    pub test_data: Option<Vec<i32>>,
    pub tag: PhaseTag,
}

impl RawRecord {
    /// Named arrays as handed to container-style writers: `time`, `record`,
    /// `test_data` when present, and one entry per housekeeping channel.
    pub fn named_arrays(&self, channel_names: &[String]) -> BTreeMap<String, Vec<f64>> {
        let mut arrays = BTreeMap::new();
        arrays.insert("time".to_string(), vec![self.timestamp as f64]);
        arrays.insert(
            "record".to_string(),
            self.channel_data.iter().map(|&v| v as f64).collect(),
        );
        if let Some(words) = &self.test_data {
            arrays.insert(
                "test_data".to_string(),
                words.iter().map(|&w| w as f64).collect(),
            );
        }
        for (name, &value) in channel_names.iter().zip(&self.housekeeping) {
            arrays.insert(name.clone(), vec![value as f64]);
        }
        arrays
    }
}

/// Destination for acquired records.
pub trait RecordSink: Send {
    /// Starts a new output file. Later records go there.
    fn open_file(&mut self, path: &Path) -> Result<(), SinkError>;

    /// Appends the record of `backend` with the session-wide `index`.
    fn append(&mut self, backend: &str, index: u64, record: &RawRecord) -> Result<(), SinkError>;

    fn flush(&mut self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// A record as held by [`MemorySink`].
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub file: PathBuf,
    pub backend: String,
    pub index: u64,
    pub record: RawRecord,
}

#[derive(Debug, Default)]
struct MemoryStore {
    files: Vec<PathBuf>,
    records: Vec<StoredRecord>,
}

/// In-memory sink. Clones share the same storage, so a test can keep one
/// handle while the controller owns another.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    store: Arc<Mutex<MemoryStore>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryStore> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Files opened so far, in order.
    pub fn files(&self) -> Vec<PathBuf> {
        self.lock().files.clone()
    }

    pub fn records(&self) -> Vec<StoredRecord> {
        self.lock().records.clone()
    }

    pub fn records_for(&self, backend: &str) -> Vec<StoredRecord> {
        self.lock()
            .records
            .iter()
            .filter(|r| r.backend == backend)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl RecordSink for MemorySink {
    fn open_file(&mut self, path: &Path) -> Result<(), SinkError> {
        self.lock().files.push(path.to_path_buf());
        Ok(())
    }

    fn append(&mut self, backend: &str, index: u64, record: &RawRecord) -> Result<(), SinkError> {
        let mut store = self.lock();
        let file = store.files.last().cloned().ok_or(SinkError::NoOpenFile)?;
        store.records.push(StoredRecord {
            file,
            backend: backend.to_string(),
            index,
            record: record.clone(),
        });
        Ok(())
    }
}

#[derive(Serialize)]
struct JsonLine<'a> {
    backend: &'a str,
    index: u64,
    tag: PhaseTag,
    arrays: BTreeMap<String, Vec<f64>>,
}

/// Writes one JSON object of named arrays per record, one file per rotation.
pub struct JsonLinesSink {
    channel_names: Vec<String>,
    path: Option<PathBuf>,
    writer: Option<BufWriter<File>>,
}

impl JsonLinesSink {
    /// `channel_names` label the housekeeping values of every record.
    pub fn new(channel_names: Vec<String>) -> Self {
        Self {
            channel_names,
            path: None,
            writer: None,
        }
    }

    pub fn current_path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    fn io_error(&self, source: std::io::Error) -> SinkError {
        SinkError::Io {
            path: self.path.clone().unwrap_or_default(),
            source,
        }
    }
}

impl RecordSink for JsonLinesSink {
    fn open_file(&mut self, path: &Path) -> Result<(), SinkError> {
        self.flush()?;
        let io = |source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(io)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(io)?;
        info!("Writing records to {}", path.display());
        self.path = Some(path.to_path_buf());
        self.writer = Some(BufWriter::new(file));
        Ok(())
    }

    fn append(&mut self, backend: &str, index: u64, record: &RawRecord) -> Result<(), SinkError> {
        let line = serde_json::to_string(&JsonLine {
            backend,
            index,
            tag: record.tag,
            arrays: record.named_arrays(&self.channel_names),
        })?;
        let result = match self.writer.as_mut() {
            Some(writer) => writeln!(writer, "{line}"),
            None => return Err(SinkError::NoOpenFile),
        };
        result.map_err(|e| self.io_error(e))
    }

    fn flush(&mut self) -> Result<(), SinkError> {
        let result = match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => return Ok(()),
        };
        result.map_err(|e| self.io_error(e))
    }
}

impl Drop for JsonLinesSink {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            tracing::warn!("Failed to flush records: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(tag: PhaseTag) -> RawRecord {
        RawRecord {
            timestamp: 1_700_000_000,
            housekeeping: vec![21.0, 295.0],
            channel_data: vec![1.0, 2.0, 3.0],
            test_data: None,
            tag,
        }
    }

    #[test]
    fn test_named_arrays() {
        let names = vec!["cold_load_k".to_string(), "hot_load_k".to_string()];
        let mut r = record(PhaseTag::Cold);
        r.test_data = Some(vec![7, 8]);
        let arrays = r.named_arrays(&names);
        assert_eq!(arrays["time"], vec![1_700_000_000.0]);
        assert_eq!(arrays["record"], vec![1.0, 2.0, 3.0]);
        assert_eq!(arrays["test_data"], vec![7.0, 8.0]);
        assert_eq!(arrays["hot_load_k"], vec![295.0]);
        assert_eq!(arrays.len(), 5);
    }

    #[test]
    fn test_memory_sink_requires_open_file() {
        let mut sink = MemorySink::new();
        assert!(matches!(
            sink.append("CTS", 0, &record(PhaseTag::Hot)),
            Err(SinkError::NoOpenFile)
        ));
    }

    #[test]
    fn test_memory_sink_clones_share_storage() {
        let observer = MemorySink::new();
        let mut sink = observer.clone();
        sink.open_file(Path::new("a.jsonl")).unwrap();
        sink.append("CTS", 0, &record(PhaseTag::Cold)).unwrap();
        sink.open_file(Path::new("b.jsonl")).unwrap();
        sink.append("ACS", 1, &record(PhaseTag::Hot)).unwrap();

        assert_eq!(observer.len(), 2);
        assert_eq!(observer.files().len(), 2);
        let acs = observer.records_for("ACS");
        assert_eq!(acs[0].file, PathBuf::from("b.jsonl"));
        assert_eq!(acs[0].index, 1);
    }

    #[test]
    fn test_json_lines_sink_writes_per_file() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("run").join("a.jsonl");
        let second = dir.path().join("run").join("b.jsonl");

        let names = vec!["cold_load_k".to_string(), "hot_load_k".to_string()];
        let mut sink = JsonLinesSink::new(names);
        sink.open_file(&first).unwrap();
        sink.append("CTS", 0, &record(PhaseTag::Cold)).unwrap();
        sink.append("CTS", 1, &record(PhaseTag::Antenna0)).unwrap();
        sink.open_file(&second).unwrap();
        sink.append("CTS", 2, &record(PhaseTag::Hot)).unwrap();
        sink.flush().unwrap();

        let text = std::fs::read_to_string(&first).unwrap();
        let lines: Vec<serde_json::Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["index"], 1);
        assert_eq!(lines[1]["tag"], "Antenna0");
        assert_eq!(lines[1]["arrays"]["record"], serde_json::json!([1.0, 2.0, 3.0]));
        assert_eq!(lines[1]["arrays"]["hot_load_k"], serde_json::json!([295.0]));
        assert_eq!(lines[1]["arrays"]["time"], serde_json::json!([1_700_000_000.0]));
        assert!(lines[1]["arrays"].get("test_data").is_none());
        assert_eq!(std::fs::read_to_string(&second).unwrap().lines().count(), 1);
    }
}
