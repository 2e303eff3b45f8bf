//! # codepad-collab — realtime collaborative HTML/CSS sandbox
//!
//! Multiple teams edit one shared HTML document and one shared CSS
//! stylesheet over WebSocket, see each other's cursors and edits live, and
//! converge on a single value without an OT or CRDT library. The scheme is
//! edit-session framing plus diff/patch three-way merge plus buffered replay
//! of remote updates that arrive mid-edit.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────┐      WireMessage      ┌──────────────┐
//! │ CollabClient │ ◄───────────────────► │ CollabServer │
//! │  (per team)  │     Binary Proto      │   (relay)    │
//! └──────┬───────┘                       └──────┬───────┘
//!        │                                      │
//!        ▼                                      ▼
//! ┌──────────────┐                       ┌──────────────┐
//! │SyncCoordinator│ × DocKind            │ DocumentStore│
//! │ session/buffer│                      │  (RocksDB)   │
//! │ clock/diff    │                      └──────────────┘
//! └──────────────┘
//! ```
//!
//! The server is a dumb relay plus last-writer-wins store; every merge
//! decision is made client-side in [`SyncCoordinator`]:
//!
//! - while idle, remote updates are folded in with a three-way merge against
//!   the last synced snapshot;
//! - while the local user is typing, remote final updates are buffered and
//!   replayed in version order once the quiet period ends;
//! - continuous (live-typing) frames are previewed immediately and never
//!   persisted.
//!
//! ## Modules
//!
//! - [`protocol`] — wire frames and the bincode codec
//! - [`diff`] — diff/patch/three-way-merge engine
//! - [`clock`] — stale/duplicate rejection
//! - [`session`] — edit-session state machine
//! - [`buffer`] — mid-edit capture and ordered replay
//! - [`coordinator`] — the per-kind synchronization façade
//! - [`broadcast`] — fan-out hub and team-label registry
//! - [`presence`] — cursor throttling and colors
//! - [`cache`] — client-side durable backup
//! - [`client`] / [`server`] — the WebSocket endpoints
//! - [`storage`] — RocksDB persistence

pub mod broadcast;
pub mod buffer;
pub mod cache;
pub mod client;
pub mod clock;
pub mod coordinator;
pub mod diff;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;

// Re-exports for convenience
pub use broadcast::{BroadcastHub, BroadcastStats, ConnectionRegistry, RegistryError};
pub use buffer::{DrainResult, RemoteUpdateBuffer};
pub use cache::{BackupRecord, CacheError, LocalBackup};
pub use client::{ClientConfig, CollabClient, CollabEvent, ConnectionState};
pub use clock::{RemoteAcceptance, VersionClock};
pub use coordinator::{SyncConfig, SyncCoordinator, SyncOutcome};
pub use diff::{diff, has_conflict, merge_three_way, DiffOp, MergePolicy, PatchSet};
pub use presence::{cursor_color, CursorPosition, CursorThrottle};
pub use protocol::{DocKind, ProtocolError, UpdateMessage, WireMessage};
pub use server::{CollabServer, ServerConfig, ServerStats};
pub use session::{EditSession, SessionState};
pub use storage::{
    DocumentMeta, DocumentRecord, DocumentStore, HistoryRecord, StoreConfig, StoreError,
};
