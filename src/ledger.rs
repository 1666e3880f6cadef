//! Run-scoped, append-only record of filesystem mutations.
//!
//! Every directory created, file placed, link created and source removed during a
//! run is appended here in order. Appends are serialized through a mutex so worker
//! threads can share one ledger. Nothing is ever removed or rewritten.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use tracing::debug;

/// What a ledger entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerKind {
    DirectoryCreated,
    FileMoved,
    HardlinkCreated,
    SymlinkCreated,
    SourceRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub kind: LedgerKind,
    pub path: PathBuf,
    /// Source path the mutation was derived from, when there is one.
    pub source: Option<PathBuf>,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct ProcessingLedger {
    entries: Mutex<Vec<LedgerEntry>>,
}

impl ProcessingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<LedgerEntry>> {
        // A panicking writer cannot leave a half-pushed entry behind.
        self.entries.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Append one mutation and return its sequence number.
    pub fn record(&self, kind: LedgerKind, path: &Path, source: Option<&Path>) -> u64 {
        let mut entries = self.lock();
        let seq = entries.len() as u64;
        entries.push(LedgerEntry {
            seq,
            kind,
            path: path.to_path_buf(),
            source: source.map(Path::to_path_buf),
            at: Utc::now(),
        });
        debug!(seq, ?kind, path = %path.display(), "ledger");
        seq
    }

    /// Snapshot of all entries in append order.
    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn count(&self, kind: LedgerKind) -> usize {
        self.lock().iter().filter(|e| e.kind == kind).count()
    }

    /// One JSON object per line, in append order.
    pub fn to_json_lines(&self) -> Result<String> {
        let mut out = String::new();
        for entry in self.lock().iter() {
            let line = serde_json::to_string(entry)
                .with_context(|| format!("serialize ledger entry {}", entry.seq))?;
            out.push_str(&line);
            out.push('\n');
        }
        Ok(out)
    }
}
