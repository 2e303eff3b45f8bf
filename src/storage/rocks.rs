//! RocksDB-backed document store.
//!
//! Column families:
//! - `documents` — current value per document kind (LZ4 compressed)
//! - `history`   — append-only update log, keyed by global sequence number
//! - `metadata`  — per-kind counters and timestamps
//!
//! Writes are atomic batches (current value + history record + metadata move
//! together, matching the transactional write of the original system). The
//! history sequence is recovered from the last log key on open.

use rocksdb::{
    BlockBasedOptions, Cache, ColumnFamilyDescriptor, DBCompressionType, DBWithThreadMode,
    IteratorMode, Options, SingleThreaded, WriteBatch, WriteOptions,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

use crate::protocol::DocKind;

const CF_DOCUMENTS: &str = "documents";
const CF_HISTORY: &str = "history";
const CF_METADATA: &str = "metadata";

const COLUMN_FAMILIES: &[&str] = &[CF_DOCUMENTS, CF_HISTORY, CF_METADATA];

/// Starter HTML shown on first boot and after a reset.
pub const INITIAL_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head>
  <meta charset="UTF-8">
  <meta name="viewport" content="width=device-width, initial-scale=1.0">
  <link rel="stylesheet" href="style.css">
  <title>Shared Sandbox</title>
</head>
<body>
  <div class="board">
    <!-- Team 1 working area -->
    <section class="zone zone-1"><h2>Zone 1</h2></section>

    <!-- Team 2 working area -->
    <section class="zone zone-2"><h2>Zone 2</h2></section>

    <!-- Team 3 working area -->
    <section class="zone zone-3"><h2>Zone 3</h2></section>

    <!-- Team 4 working area -->
    <section class="zone zone-4"><h2>Zone 4</h2></section>
  </div>
</body>
</html>
"#;

/// Starter stylesheet shown on first boot and after a reset.
pub const INITIAL_CSS: &str = r#"body {
  display: flex;
  justify-content: center;
  align-items: center;
  height: 100vh;
  margin: 0;
  background-color: #f0f0f0;
}

.board {
  display: grid;
  grid-template-columns: repeat(2, 1fr);
  gap: 8px;
}

.zone {
  min-width: 240px;
  min-height: 160px;
  background: #ffffff;
  border-radius: 4px;
  padding: 12px;
}

.zone h2 {
  margin: 0;
  font: 600 14px/1.4 sans-serif;
  color: #444;
}
"#;

/// Store configuration.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Database directory path
    pub path: PathBuf,
    /// Block cache size in bytes
    pub block_cache_size: usize,
    /// Bloom filter bits per key
    pub bloom_filter_bits: i32,
    /// fsync on every write (off by default; RocksDB's own WAL covers crashes)
    pub sync_writes: bool,
    /// Max open files for RocksDB
    pub max_open_files: i32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("codepad_data"),
            block_cache_size: 64 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 256,
        }
    }
}

impl StoreConfig {
    /// Small-footprint config for tests (temp directory, tiny caches).
    pub fn for_testing(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 4 * 1024 * 1024,
            bloom_filter_bits: 10,
            sync_writes: false,
            max_open_files: 64,
        }
    }
}

/// Current value of one document kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub content: String,
    /// Team behind the last persisted update.
    pub team_label: String,
    /// Seconds since the epoch.
    pub updated_at: u64,
}

/// One immutable history entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    pub kind: DocKind,
    pub content: String,
    pub team_label: String,
    pub timestamp: u64,
}

/// Per-kind counters.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub update_count: u64,
    pub history_count: u64,
    pub created_at: u64,
    pub updated_at: u64,
}

/// Storage errors.
#[derive(Debug, Clone)]
pub enum StoreError {
    DatabaseError(String),
    NotFound(DocKind),
    SerializationError(String),
    DeserializationError(String),
    CompressionError(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::DatabaseError(e) => write!(f, "Database error: {e}"),
            StoreError::NotFound(kind) => write!(f, "Document not found: {kind}"),
            StoreError::SerializationError(e) => write!(f, "Serialization error: {e}"),
            StoreError::DeserializationError(e) => write!(f, "Deserialization error: {e}"),
            StoreError::CompressionError(e) => write!(f, "Compression error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl From<rocksdb::Error> for StoreError {
    fn from(e: rocksdb::Error) -> Self {
        StoreError::DatabaseError(e.to_string())
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, StoreError> {
    let raw = bincode::serde::encode_to_vec(value, bincode::config::standard())
        .map_err(|e| StoreError::SerializationError(e.to_string()))?;
    Ok(lz4_flex::compress_prepend_size(&raw))
}

fn decode<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, StoreError> {
    let raw = lz4_flex::decompress_size_prepended(bytes)
        .map_err(|e| StoreError::CompressionError(e.to_string()))?;
    let (value, _) = bincode::serde::decode_from_slice(&raw, bincode::config::standard())
        .map_err(|e| StoreError::DeserializationError(e.to_string()))?;
    Ok(value)
}

/// RocksDB-backed document store.
pub struct DocumentStore {
    /// Single-threaded mode — concurrency is serialized by the relay.
    db: DBWithThreadMode<SingleThreaded>,
    config: StoreConfig,
    /// Global history sequence, recovered from the last log key.
    sequence: AtomicU64,
}

impl DocumentStore {
    /// Open the store, creating the database and missing documents from the
    /// initial templates.
    pub fn open(config: StoreConfig) -> Result<Self, StoreError> {
        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);
        db_opts.set_max_open_files(config.max_open_files);
        db_opts.set_keep_log_file_num(5);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| ColumnFamilyDescriptor::new(*name, Self::cf_options(&config)))
            .collect();

        let db = DBWithThreadMode::<SingleThreaded>::open_cf_descriptors(
            &db_opts,
            &config.path,
            cf_descriptors,
        )?;

        let sequence = Self::recover_sequence(&db);
        let store = Self {
            db,
            config,
            sequence: AtomicU64::new(sequence),
        };
        store.seed_missing_documents()?;
        Ok(store)
    }

    fn cf_options(config: &StoreConfig) -> Options {
        let mut opts = Options::default();
        let mut block_opts = BlockBasedOptions::default();
        let cache = Cache::new_lru_cache(config.block_cache_size);
        block_opts.set_block_cache(&cache);
        block_opts.set_bloom_filter(config.bloom_filter_bits as f64, false);
        opts.set_block_based_table_factory(&block_opts);
        opts.set_compression_type(DBCompressionType::Lz4);
        opts
    }

    /// Recover the next history sequence from the last log key.
    fn recover_sequence(db: &DBWithThreadMode<SingleThreaded>) -> u64 {
        let cf = match db.cf_handle(CF_HISTORY) {
            Some(cf) => cf,
            None => return 0,
        };
        let mut iter = db.iterator_cf(&cf, IteratorMode::End);
        match iter.next() {
            Some(Ok((key, _))) if key.len() >= 8 => {
                let mut buf = [0u8; 8];
                buf.copy_from_slice(&key[..8]);
                u64::from_be_bytes(buf) + 1
            }
            _ => 0,
        }
    }

    /// First boot: persist the starter templates so clients always receive
    /// real content.
    fn seed_missing_documents(&self) -> Result<(), StoreError> {
        for (kind, initial) in [(DocKind::Html, INITIAL_HTML), (DocKind::Css, INITIAL_CSS)] {
            if self.get_document(kind)?.is_none() {
                self.persist_update(kind, initial, "system")?;
                log::info!("seeded initial {kind} template");
            }
        }
        Ok(())
    }

    // ─── Documents ────────────────────────────────────────────────────

    /// Current value for a kind, if persisted.
    pub fn get_document(&self, kind: DocKind) -> Result<Option<DocumentRecord>, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        match self.db.get_cf(&cf, kind.as_str().as_bytes())? {
            Some(bytes) => Ok(Some(decode(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn document_exists(&self, kind: DocKind) -> Result<bool, StoreError> {
        let cf = self.cf(CF_DOCUMENTS)?;
        Ok(self.db.get_cf(&cf, kind.as_str().as_bytes())?.is_some())
    }

    /// Persist one authoritative update: overwrite the current value, append
    /// an immutable history record and bump the counters, all in one atomic
    /// batch. Returns the history sequence assigned.
    pub fn persist_update(
        &self,
        kind: DocKind,
        content: &str,
        team_label: &str,
    ) -> Result<u64, StoreError> {
        let cf_docs = self.cf(CF_DOCUMENTS)?;
        let cf_history = self.cf(CF_HISTORY)?;
        let cf_meta = self.cf(CF_METADATA)?;

        let now = unix_now();
        let record = DocumentRecord {
            content: content.to_string(),
            team_label: team_label.to_string(),
            updated_at: now,
        };
        let history = HistoryRecord {
            kind,
            content: content.to_string(),
            team_label: team_label.to_string(),
            timestamp: now,
        };

        let mut meta = self.metadata(kind).unwrap_or_else(|_| DocumentMeta {
            created_at: now,
            ..DocumentMeta::default()
        });
        if meta.created_at == 0 {
            meta.created_at = now;
        }
        meta.update_count += 1;
        meta.history_count += 1;
        meta.updated_at = now;

        let seq = self.sequence.fetch_add(1, Ordering::SeqCst);

        let mut batch = WriteBatch::default();
        batch.put_cf(&cf_docs, kind.as_str().as_bytes(), encode(&record)?);
        batch.put_cf(&cf_history, seq.to_be_bytes(), encode(&history)?);
        batch.put_cf(&cf_meta, kind.as_str().as_bytes(), encode(&meta)?);

        let mut write_opts = WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        self.db.write_opt(batch, &write_opts)?;

        Ok(seq)
    }

    // ─── History ──────────────────────────────────────────────────────

    /// Most recent history records for a kind, newest first.
    pub fn history(&self, kind: DocKind, limit: usize) -> Result<Vec<HistoryRecord>, StoreError> {
        let cf = self.cf(CF_HISTORY)?;
        let mut records = Vec::new();
        if limit == 0 {
            return Ok(records);
        }

        for item in self.db.iterator_cf(&cf, IteratorMode::End) {
            let (_, value) = item.map_err(|e| StoreError::DatabaseError(e.to_string()))?;
            let record: HistoryRecord = decode(&value)?;
            if record.kind == kind {
                records.push(record);
                if records.len() >= limit {
                    break;
                }
            }
        }
        Ok(records)
    }

    /// Total history records across both kinds.
    pub fn history_len(&self) -> Result<u64, StoreError> {
        let mut total = 0;
        for kind in DocKind::ALL {
            if let Ok(meta) = self.metadata(kind) {
                total += meta.history_count;
            }
        }
        Ok(total)
    }

    // ─── Metadata ─────────────────────────────────────────────────────

    pub fn metadata(&self, kind: DocKind) -> Result<DocumentMeta, StoreError> {
        let cf = self.cf(CF_METADATA)?;
        match self.db.get_cf(&cf, kind.as_str().as_bytes())? {
            Some(bytes) => decode(&bytes),
            None => Err(StoreError::NotFound(kind)),
        }
    }

    // ─── Reset ────────────────────────────────────────────────────────

    /// Restore both documents to the starter templates, with admin-reset
    /// history records.
    pub fn reset_to_initial(&self) -> Result<(), StoreError> {
        for (kind, initial) in [(DocKind::Html, INITIAL_HTML), (DocKind::Css, INITIAL_CSS)] {
            self.persist_update(kind, initial, "admin_reset")?;
        }
        log::info!("documents reset to initial templates");
        Ok(())
    }

    /// Next history sequence number.
    pub fn history_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }

    pub fn path(&self) -> &Path {
        &self.config.path
    }

    fn cf(&self, name: &str) -> Result<&rocksdb::ColumnFamily, StoreError> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| StoreError::DatabaseError(format!("Column family '{name}' not found")))
    }
}

fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
