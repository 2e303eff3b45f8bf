//! Fan-out to N-1 connections and the team-label registry.
//!
//! All connections share one broadcast channel (one room for the whole
//! sandbox). Frames are encoded once and shipped as `Arc<Vec<u8>>` tagged
//! with the sender's connection id; each receiver drops frames carrying its
//! own id, so exclusion is a pointer comparison instead of a decode.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

use crate::protocol::{ProtocolError, WireMessage};

/// Connection id used as the broadcast sender tag. The nil id marks frames
/// originated by the server itself, which nobody filters out.
pub const SERVER_SENDER: Uuid = Uuid::nil();

/// A broadcast frame: who sent it, and the encoded bytes.
pub type BroadcastFrame = (Uuid, Arc<Vec<u8>>);

/// Statistics for monitoring broadcast health.
#[derive(Debug, Clone, Default)]
pub struct BroadcastStats {
    pub frames_sent: u64,
    pub subscribers: usize,
}

/// Shared fan-out channel for the sandbox room.
pub struct BroadcastHub {
    sender: broadcast::Sender<BroadcastFrame>,
    capacity: usize,
    frames_sent: AtomicU64,
}

impl BroadcastHub {
    /// `capacity` bounds how many frames a slow receiver may fall behind
    /// before it starts dropping.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            frames_sent: AtomicU64::new(0),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BroadcastFrame> {
        self.sender.subscribe()
    }

    /// Encode once and fan out. Returns the number of live receivers.
    pub fn broadcast(&self, sender: Uuid, msg: &WireMessage) -> Result<usize, ProtocolError> {
        let encoded = Arc::new(msg.encode()?);
        Ok(self.broadcast_raw(sender, encoded))
    }

    /// Fan out pre-encoded bytes (lock-free hot path).
    pub fn broadcast_raw(&self, sender: Uuid, encoded: Arc<Vec<u8>>) -> usize {
        let count = self.sender.send((sender, encoded)).unwrap_or(0);
        self.frames_sent.fetch_add(1, Ordering::Relaxed);
        count
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> BroadcastStats {
        BroadcastStats {
            frames_sent: self.frames_sent.load(Ordering::Relaxed),
            subscribers: self.sender.receiver_count(),
        }
    }
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// The label is in use by another active connection.
    LabelTaken(String),
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::LabelTaken(label) => write!(f, "Team label '{label}' is already in use"),
        }
    }
}

impl std::error::Error for RegistryError {}

/// Authenticated connections and their team labels.
///
/// Labels are the user-facing identity and must be unique among active
/// connections; connection ids are the internal key and die with the socket.
#[derive(Default)]
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<Uuid, String>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under a label. Fails without side effects if
    /// any active connection already holds the label.
    pub async fn register(&self, conn_id: Uuid, label: &str) -> Result<(), RegistryError> {
        let mut connections = self.connections.write().await;
        if connections.values().any(|existing| existing == label) {
            return Err(RegistryError::LabelTaken(label.to_string()));
        }
        connections.insert(conn_id, label.to_string());
        Ok(())
    }

    /// Remove a connection; returns its label if it was registered.
    pub async fn unregister(&self, conn_id: Uuid) -> Option<String> {
        self.connections.write().await.remove(&conn_id)
    }

    /// Label registered for a connection.
    pub async fn label_of(&self, conn_id: Uuid) -> Option<String> {
        self.connections.read().await.get(&conn_id).cloned()
    }

    pub async fn online_count(&self) -> usize {
        self.connections.read().await.len()
    }

    pub async fn labels(&self) -> Vec<String> {
        self.connections.read().await.values().cloned().collect()
    }
}
