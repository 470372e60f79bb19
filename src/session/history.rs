//! Append-only history of terminated sessions
//!
//! Records are kept in completion order. The store can optionally write
//! through to a JSON-lines file so the history table survives restarts.

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::Result;
use crate::session::state::SessionState;
use crate::session::SessionHandle;

/// How a session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Every configured epoch was reported
    Completed,
    /// The trainer crashed or finished early
    Failed,
    /// Stopped by the user
    Cancelled,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Outcome::Completed => "Completed",
            Outcome::Failed => "Failed",
            Outcome::Cancelled => "Cancelled",
        };
        f.write_str(s)
    }
}

/// Summary of one terminated session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Session the record belongs to
    pub handle: SessionHandle,

    /// Run name
    pub name: String,

    /// Training loss of the last accepted event
    pub final_loss: Option<f64>,

    /// Jaccard index of the last accepted event
    pub final_jaccard: Option<f64>,

    /// How the session ended
    pub outcome: Outcome,

    /// Last epoch reported before termination
    pub epochs_completed: u32,

    /// Epochs the run was configured for
    pub total_epochs: u32,

    /// Time the record was created
    pub finished_at: DateTime<Utc>,
}

impl HistoryRecord {
    /// Summarise a terminated session; `None` while it is still live
    pub fn from_state(handle: SessionHandle, state: &SessionState) -> Option<Self> {
        let outcome = state.status.outcome()?;
        Some(Self {
            handle,
            name: state.name.clone(),
            final_loss: state.latest.as_ref().map(|m| m.training_loss),
            final_jaccard: state.latest.as_ref().map(|m| m.jaccard_index),
            outcome,
            epochs_completed: state.current_epoch,
            total_epochs: state.total_epochs,
            finished_at: Utc::now(),
        })
    }
}

/// Append-only, insertion-ordered record store
#[derive(Debug, Default)]
pub struct HistoryStore {
    records: RwLock<Arc<Vec<HistoryRecord>>>,
    path: Option<PathBuf>,
}

impl HistoryStore {
    /// In-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store backed by a JSON-lines file, loading whatever it already holds
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let records = if path.exists() {
            load_records(&path)?
        } else {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            Vec::new()
        };

        debug!("Loaded {} history records from {}", records.len(), path.display());

        Ok(Self {
            records: RwLock::new(Arc::new(records)),
            path: Some(path),
        })
    }

    /// Backing file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Append a record.
    ///
    /// The record is kept in memory even when writing it to the backing file
    /// fails; the write error is returned to the caller.
    pub fn append(&self, record: HistoryRecord) -> Result<()> {
        let line = match &self.path {
            Some(_) => Some(serde_json::to_string(&record)?),
            None => None,
        };

        {
            let mut records = self.records.write();
            Arc::make_mut(&mut records).push(record);
        }

        if let (Some(path), Some(line)) = (&self.path, line) {
            let mut file = OpenOptions::new().create(true).append(true).open(path)?;
            writeln!(file, "{}", line)?;
        }

        Ok(())
    }

    /// Ordered view of the records at the time of the call
    pub fn list(&self) -> HistoryList {
        HistoryList {
            records: Arc::clone(&self.records.read()),
        }
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Whether the store holds no records
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

fn load_records(path: &Path) -> Result<Vec<HistoryRecord>> {
    let content = fs::read_to_string(path)?;
    let mut records = Vec::new();

    for (number, line) in content.lines().enumerate() {
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<HistoryRecord>(line) {
            Ok(record) => records.push(record),
            Err(e) => warn!(
                "Skipping corrupt history line {} in {}: {}",
                number + 1,
                path.display(),
                e
            ),
        }
    }

    Ok(records)
}

/// Frozen, restartable view of the history.
///
/// Appends made after the view was taken are not visible through it; take a
/// new list to see them.
#[derive(Debug, Clone)]
pub struct HistoryList {
    records: Arc<Vec<HistoryRecord>>,
}

impl HistoryList {
    /// Iterate in completion order; each call starts from the beginning
    pub fn iter(&self) -> std::slice::Iter<'_, HistoryRecord> {
        self.records.iter()
    }

    /// Number of records in the view
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the view is empty
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Most recent record
    pub fn last(&self) -> Option<&HistoryRecord> {
        self.records.last()
    }
}

impl<'a> IntoIterator for &'a HistoryList {
    type Item = &'a HistoryRecord;
    type IntoIter = std::slice::Iter<'a, HistoryRecord>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
