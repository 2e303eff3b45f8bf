//! Persistent storage for the shared documents.
//!
//! ```text
//! ┌──────────────┐   persist_update    ┌──────────────────────────────────┐
//! │ CollabServer │ ───────────────────►│ DocumentStore (RocksDB)          │
//! │ (relay)      │                     │                                  │
//! └──────┬───────┘                     │ CF "documents" — current value   │
//!        │ on startup                  │ CF "history"   — append-only log │
//!        ▼                             │ CF "metadata"  — per-kind stats  │
//!   initial templates                  └──────────────────────────────────┘
//! ```
//!
//! The store is a last-writer-wins key/value for the current document plus an
//! immutable history log. No merging happens here; all merge intelligence is
//! client-side.

pub mod rocks;

pub use rocks::{
    DocumentMeta, DocumentRecord, DocumentStore, HistoryRecord, StoreConfig, StoreError,
    INITIAL_CSS, INITIAL_HTML,
};
