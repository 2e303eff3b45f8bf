//! Client-side durable cache for in-flight edits.
//!
//! Every local edit is backed up here before it is sent, so a crash, reload
//! or dead connection never loses typing. A backup flagged `pending_sync`
//! records a final frame whose delivery was never confirmed; the
//! reconciliation sweep resends those after the next successful
//! authentication and clears the flag once the server acknowledges.
//!
//! One file per (team, kind) under the cache directory, bincode-encoded.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::protocol::DocKind;

/// Cache errors.
#[derive(Debug)]
pub enum CacheError {
    Io(std::io::Error),
    Encoding(String),
}

impl std::fmt::Display for CacheError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "Cache I/O error: {e}"),
            Self::Encoding(e) => write!(f, "Cache encoding error: {e}"),
        }
    }
}

impl std::error::Error for CacheError {}

impl From<std::io::Error> for CacheError {
    fn from(e: std::io::Error) -> Self {
        CacheError::Io(e)
    }
}

/// One cached document state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupRecord {
    pub content: String,
    pub team_label: String,
    /// Seconds since the epoch at save time.
    pub saved_at: u64,
    /// True when this content still needs a confirmed final frame.
    pub pending_sync: bool,
}

/// Durable local backup store.
#[derive(Debug, Clone)]
pub struct LocalBackup {
    dir: PathBuf,
}

impl LocalBackup {
    /// Open (and create) the backup directory.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    /// Save the latest local content for a kind. Preserves an existing
    /// pending flag so an unsynced final is not silently unflagged by a
    /// later autosave.
    pub fn save(&self, kind: DocKind, content: &str, team_label: &str) -> Result<(), CacheError> {
        let pending = self
            .load(kind, team_label)
            .ok()
            .flatten()
            .map(|r| r.pending_sync)
            .unwrap_or(false);
        self.write_record(
            kind,
            team_label,
            &BackupRecord {
                content: content.to_string(),
                team_label: team_label.to_string(),
                saved_at: unix_now(),
                pending_sync: pending,
            },
        )
    }

    /// Flag the stored content as awaiting a confirmed final frame.
    pub fn mark_pending(&self, kind: DocKind, team_label: &str) -> Result<(), CacheError> {
        if let Some(mut record) = self.load(kind, team_label)? {
            record.pending_sync = true;
            self.write_record(kind, team_label, &record)?;
        }
        Ok(())
    }

    /// Clear the pending flag after the server acknowledged the content.
    pub fn clear_pending(&self, kind: DocKind, team_label: &str) -> Result<(), CacheError> {
        if let Some(mut record) = self.load(kind, team_label)? {
            record.pending_sync = false;
            self.write_record(kind, team_label, &record)?;
        }
        Ok(())
    }

    /// Load the backup for a kind, if any.
    pub fn load(&self, kind: DocKind, team_label: &str) -> Result<Option<BackupRecord>, CacheError> {
        let path = self.record_path(kind, team_label);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        let (record, _) = bincode::serde::decode_from_slice(&bytes, bincode::config::standard())
            .map_err(|e| CacheError::Encoding(e.to_string()))?;
        Ok(Some(record))
    }

    /// All kinds still awaiting a confirmed final frame for this team.
    pub fn pending(&self, team_label: &str) -> Vec<(DocKind, BackupRecord)> {
        DocKind::ALL
            .into_iter()
            .filter_map(|kind| match self.load(kind, team_label) {
                Ok(Some(record)) if record.pending_sync => Some((kind, record)),
                Ok(_) => None,
                Err(e) => {
                    log::warn!("failed to read {kind} backup for {team_label}: {e}");
                    None
                }
            })
            .collect()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn write_record(
        &self,
        kind: DocKind,
        team_label: &str,
        record: &BackupRecord,
    ) -> Result<(), CacheError> {
        let bytes = bincode::serde::encode_to_vec(record, bincode::config::standard())
            .map_err(|e| CacheError::Encoding(e.to_string()))?;
        fs::write(self.record_path(kind, team_label), bytes)?;
        Ok(())
    }

    fn record_path(&self, kind: DocKind, team_label: &str) -> PathBuf {
        self.dir
            .join(format!("{}_{}.bak", sanitize_label(team_label), kind.as_str()))
    }
}

/// Team labels are user input; keep file names boring.
fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
