//! # Recorder Module
//!
//! Writes telemetry reports to JSONL files with rotation.
//!
//! This module handles:
//! - Formatting reports as JSONL (one JSON object per line)
//! - Timestamping each record (RFC 3339, UTC)
//! - Rotating to a new file after N records
//! - Retaining only the last M files
//!
//! Each line has the shape `{"timestamp": ..., "kind": ..., "data": ...}`.

use chrono::Utc;
use serde::Serialize;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::RecordingConfig;
use crate::error::Result;

const FILE_PREFIX: &str = "telemetry_";
const FILE_EXTENSION: &str = ".jsonl";

#[derive(Serialize)]
struct Envelope<'a, T: Serialize> {
    timestamp: String,
    kind: &'a str,
    data: &'a T,
}

/// Rotating JSONL writer for telemetry reports.
#[derive(Debug)]
pub struct JsonlRecorder {
    dir: PathBuf,
    max_records_per_file: usize,
    max_files_to_keep: usize,
    writer: Option<BufWriter<File>>,
    records_in_file: usize,
    next_index: u64,
}

impl JsonlRecorder {
    /// Creates a recorder writing into `dir`, creating it if needed.
    ///
    /// Numbering continues after the highest existing file in `dir`.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created or listed
    pub fn new<P: AsRef<Path>>(dir: P, max_records_per_file: usize, max_files_to_keep: usize) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        let next_index = list_files(&dir)?
            .last()
            .and_then(|(index, _)| index.checked_add(1))
            .unwrap_or(0);

        Ok(Self {
            dir,
            max_records_per_file: max_records_per_file.max(1),
            max_files_to_keep: max_files_to_keep.max(1),
            writer: None,
            records_in_file: 0,
            next_index,
        })
    }

    /// Creates a recorder from the `[recording]` configuration section.
    pub fn from_config(config: &RecordingConfig) -> Result<Self> {
        Self::new(&config.log_dir, config.max_records_per_file, config.max_files_to_keep)
    }

    /// Directory the recorder writes into.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Appends one record of the given kind.
    ///
    /// # Errors
    ///
    /// Returns error if serialization, rotation or the write fails
    pub fn record<T: Serialize>(&mut self, kind: &str, data: &T) -> Result<()> {
        let envelope = Envelope {
            timestamp: Utc::now().to_rfc3339(),
            kind,
            data,
        };
        let line = serde_json::to_string(&envelope)?;

        if self.writer.is_none() || self.records_in_file >= self.max_records_per_file {
            self.rotate()?;
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.write_all(line.as_bytes())?;
            writer.write_all(b"\n")?;
        }
        self.records_in_file += 1;
        Ok(())
    }

    /// Flushes buffered records to disk.
    pub fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.flush()?;
        }
        Ok(())
    }

    fn rotate(&mut self) -> Result<()> {
        if let Some(mut writer) = self.writer.take() {
            writer.flush()?;
        }

        let path = self.dir.join(file_name(self.next_index));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        debug!("Recording telemetry to {}", path.display());
        self.writer = Some(BufWriter::new(file));
        self.records_in_file = 0;
        self.next_index += 1;

        self.prune()
    }

    fn prune(&self) -> Result<()> {
        let files = list_files(&self.dir)?;
        let excess = files.len().saturating_sub(self.max_files_to_keep);
        for (_, path) in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => info!("Removed old telemetry file {}", path.display()),
                Err(e) => warn!("Failed to remove {}: {}", path.display(), e),
            }
        }
        Ok(())
    }
}

fn file_name(index: u64) -> String {
    format!("{FILE_PREFIX}{index:06}{FILE_EXTENSION}")
}

/// Recorder files in `dir`, sorted by index.
fn list_files(dir: &Path) -> Result<Vec<(u64, PathBuf)>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        let index = path
            .file_name()
            .and_then(|name| name.to_str())
            .and_then(|name| name.strip_prefix(FILE_PREFIX))
            .and_then(|name| name.strip_suffix(FILE_EXTENSION))
            .and_then(|index| index.parse::<u64>().ok());
        if let Some(index) = index {
            files.push((index, path));
        }
    }
    files.sort_unstable_by_key(|(index, _)| *index);
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::{TaskSlot, TaskStats};
    use serde_json::Value;
    use tempfile::tempdir;

    fn read_lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    fn stats(count: u32) -> TaskStats {
        TaskStats {
            slot: TaskSlot::Gear,
            last_start_us: Some(1_000),
            average_period_us: 100,
            average_execution_us: 20,
            invocation_count: count,
        }
    }

    #[test]
    fn test_record_writes_envelope() {
        let dir = tempdir().unwrap();
        let mut recorder = JsonlRecorder::new(dir.path(), 10, 3).unwrap();

        recorder.record("task", &stats(4)).unwrap();
        recorder.flush().unwrap();

        let lines = read_lines(&dir.path().join(file_name(0)));
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["kind"], "task");
        assert_eq!(lines[0]["data"]["slot"], "Gear");
        assert_eq!(lines[0]["data"]["invocation_count"], 4);
        let timestamp = lines[0]["timestamp"].as_str().unwrap();
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[test]
    fn test_rotation_after_max_records() {
        let dir = tempdir().unwrap();
        let mut recorder = JsonlRecorder::new(dir.path(), 2, 10).unwrap();

        for i in 0..5 {
            recorder.record("task", &stats(i)).unwrap();
        }
        recorder.flush().unwrap();

        let files = list_files(dir.path()).unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(read_lines(&files[0].1).len(), 2);
        assert_eq!(read_lines(&files[1].1).len(), 2);
        assert_eq!(read_lines(&files[2].1).len(), 1);
    }

    #[test]
    fn test_only_newest_files_kept() {
        let dir = tempdir().unwrap();
        let mut recorder = JsonlRecorder::new(dir.path(), 1, 2).unwrap();

        for i in 0..5 {
            recorder.record("task", &stats(i)).unwrap();
        }
        recorder.flush().unwrap();

        let indices: Vec<u64> = list_files(dir.path()).unwrap().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![3, 4]);
    }

    #[test]
    fn test_numbering_continues_after_restart() {
        let dir = tempdir().unwrap();
        {
            let mut recorder = JsonlRecorder::new(dir.path(), 10, 10).unwrap();
            recorder.record("task", &stats(1)).unwrap();
        }
        let mut recorder = JsonlRecorder::new(dir.path(), 10, 10).unwrap();
        recorder.record("task", &stats(2)).unwrap();
        recorder.flush().unwrap();

        let indices: Vec<u64> = list_files(dir.path()).unwrap().into_iter().map(|(i, _)| i).collect();
        assert_eq!(indices, vec![0, 1]);
    }

    #[test]
    fn test_unrelated_files_ignored() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), "keep me").unwrap();
        fs::write(dir.path().join("telemetry_abc.jsonl"), "").unwrap();

        let mut recorder = JsonlRecorder::new(dir.path(), 1, 1).unwrap();
        recorder.record("task", &stats(1)).unwrap();
        recorder.record("task", &stats(2)).unwrap();

        assert!(dir.path().join("notes.txt").exists());
        assert!(dir.path().join("telemetry_abc.jsonl").exists());
        assert_eq!(list_files(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_from_config_creates_directory() {
        let dir = tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        let config = RecordingConfig {
            enabled: true,
            log_dir: nested.to_string_lossy().into_owned(),
            max_records_per_file: 5,
            max_files_to_keep: 2,
        };

        let recorder = JsonlRecorder::from_config(&config).unwrap();
        assert!(nested.is_dir());
        assert_eq!(recorder.dir(), nested.as_path());
    }
}
