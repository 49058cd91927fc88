//! Execution Record Persistence
//!
//! Stores what each job looked like the last time it completed, enabling
//! skip decisions on later runs.
//!
//! Records are saved to `.ruleflow/{pipeline_stem}.records.json` after
//! each job completion, indexed by output path.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::graph::Job;

/// A content stand-in for one file: mtime in nanoseconds since the epoch
/// plus size in bytes. Cheap to take, sensitive to every write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub mtime_ns: i64,
    pub size: u64,
}

impl Fingerprint {
    /// Reads the fingerprint of a file or directory.
    pub fn of(path: &Path) -> io::Result<Fingerprint> {
        let meta = fs::metadata(path)?;
        let mtime_ns = match meta.modified()?.duration_since(UNIX_EPOCH) {
            Ok(after) => after.as_nanos() as i64,
            Err(before) => -(before.duration().as_nanos() as i64),
        };
        Ok(Fingerprint {
            mtime_ns,
            size: meta.len(),
        })
    }
}

/// Everything remembered about one completed job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub rule: String,
    pub outputs: BTreeMap<String, Fingerprint>,
    pub inputs: BTreeMap<String, Fingerprint>,
    pub command: String,
    pub params: BTreeMap<String, String>,
    pub completed_at: DateTime<Utc>,
}

impl ExecutionRecord {
    /// Captures fingerprints right after a job completes. Paths that
    /// cannot be stat'ed are left out rather than aborting the capture.
    pub fn capture(job: &Job) -> ExecutionRecord {
        let mut outputs = BTreeMap::new();
        for path in job.output_paths() {
            if let Ok(fp) = Fingerprint::of(Path::new(path)) {
                outputs.insert(path.to_string(), fp);
            }
        }
        let mut inputs = BTreeMap::new();
        for path in job.input_paths() {
            if let Ok(fp) = Fingerprint::of(Path::new(path)) {
                inputs.insert(path.to_string(), fp);
            }
        }
        ExecutionRecord {
            rule: job.id.rule.clone(),
            outputs,
            inputs,
            command: job.command.clone(),
            params: job.params.clone(),
            completed_at: Utc::now(),
        }
    }
}

/// The on-disk record store for one pipeline.
///
/// Each record is indexed under every output path it produced, so a
/// lookup by any output of a job finds the same record.
#[derive(Debug)]
pub struct RecordStore {
    path: PathBuf,
    records: BTreeMap<String, ExecutionRecord>,
}

impl RecordStore {
    /// Where the store for a pipeline lives, under the working directory.
    pub fn path_for(working_dir: &Path, pipeline_path: &Path) -> PathBuf {
        let stem = pipeline_path
            .file_stem()
            .and_then(|s| s.to_str())
            .unwrap_or("pipeline");
        working_dir.join(".ruleflow").join(format!("{stem}.records.json"))
    }

    /// An empty store that will save to `path`.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        RecordStore {
            path: path.into(),
            records: BTreeMap::new(),
        }
    }

    /// Loads a store from disk.
    pub fn load(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        let content = fs::read_to_string(&path)?;
        let records = serde_json::from_str(&content)?;
        debug!("Loaded execution records from {}", path.display());
        Ok(RecordStore { path, records })
    }

    /// Loads a store, falling back to an empty one.
    ///
    /// A missing file is the normal first run. Anything else that goes
    /// wrong is logged and treated as having no history, which at worst
    /// causes jobs to rerun.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(store) => store,
            Err(StoreError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                RecordStore::new(path)
            }
            Err(e) => {
                warn!(
                    "Ignoring unreadable record store {}: {}",
                    path.display(),
                    e
                );
                RecordStore::new(path)
            }
        }
    }

    /// The record covering `output_path`, if one exists.
    pub fn get(&self, output_path: &str) -> Option<&ExecutionRecord> {
        self.records.get(output_path)
    }

    /// Files a record under each of its output paths, replacing whatever
    /// was known about them.
    pub fn record(&mut self, record: ExecutionRecord) {
        for path in record.outputs.keys() {
            self.records.insert(path.clone(), record.clone());
        }
    }

    /// Saves the store to its path, creating the directory if needed.
    pub fn save(&self) -> Result<(), StoreError> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(&self.records)?;
        fs::write(&self.path, json)?;
        debug!("Saved {} execution records to {}", self.records.len(), self.path.display());
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
