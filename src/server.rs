//! WebSocket relay server for the shared sandbox.
//!
//! ```text
//! Client A ──┐                           ┌── DocumentStore (RocksDB)
//!            ├── CollabServer ── BroadcastHub
//! Client B ──┘        │                  └── in-memory current documents
//!                     └── ConnectionRegistry (unique team labels)
//! ```
//!
//! The server is deliberately dumb: persist non-continuous updates
//! last-writer-wins, fan everything out to the other connections, never
//! merge. All merge intelligence lives client-side, so the stored value may
//! transiently lag a merge that only exists in some clients until their next
//! final frame re-persists it.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::RwLock;
use tokio_tungstenite::tungstenite::Message;
use uuid::Uuid;

use crate::broadcast::{BroadcastHub, ConnectionRegistry, SERVER_SENDER};
use crate::protocol::{DocKind, UpdateMessage, WireMessage};
use crate::storage::{DocumentStore, StoreConfig, INITIAL_CSS, INITIAL_HTML};

/// Label attached to server-pushed initial content.
pub const SYSTEM_LABEL: &str = "system";
/// Label attached to reset content.
pub const ADMIN_LABEL: &str = "admin";

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind to
    pub bind_addr: String,
    /// Broadcast channel capacity per connection
    pub broadcast_capacity: usize,
    /// Connections silent this long are dropped
    pub inactivity_timeout: Duration,
    /// Persistence path (None = in-memory only)
    pub storage_path: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:9090".to_string(),
            broadcast_capacity: 256,
            inactivity_timeout: Duration::from_secs(2 * 60 * 60),
            storage_path: None,
        }
    }
}

/// Server statistics.
#[derive(Debug, Clone, Default)]
pub struct ServerStats {
    pub total_connections: u64,
    pub active_connections: u64,
    pub total_messages: u64,
    pub total_bytes: u64,
    pub persisted_updates: u64,
    pub auth_rejections: u64,
}

/// Shared server state handed to every connection task.
struct ServerState {
    config: ServerConfig,
    registry: ConnectionRegistry,
    hub: BroadcastHub,
    store: Option<DocumentStore>,
    /// Current documents, mirrored from the store so `InitializeCode` never
    /// waits on disk.
    current: RwLock<[String; 2]>,
    stats: RwLock<ServerStats>,
}

/// The sandbox relay server.
pub struct CollabServer {
    state: Arc<ServerState>,
}

impl CollabServer {
    /// Create a server. Opens (and seeds) the document store when a storage
    /// path is configured; the in-memory document cache starts from the
    /// persisted values or the initial templates.
    pub fn new(config: ServerConfig) -> Result<Self, crate::storage::StoreError> {
        let store = match &config.storage_path {
            Some(path) => Some(DocumentStore::open(StoreConfig {
                path: path.clone(),
                ..StoreConfig::default()
            })?),
            None => None,
        };

        let mut current = [INITIAL_HTML.to_string(), INITIAL_CSS.to_string()];
        if let Some(store) = &store {
            for kind in DocKind::ALL {
                if let Some(record) = store.get_document(kind)? {
                    current[kind.as_index()] = record.content;
                }
            }
            log::info!("documents recovered from storage");
        }

        let hub = BroadcastHub::new(config.broadcast_capacity);
        Ok(Self {
            state: Arc::new(ServerState {
                registry: ConnectionRegistry::new(),
                hub,
                store,
                current: RwLock::new(current),
                stats: RwLock::new(ServerStats::default()),
                config,
            }),
        })
    }

    /// In-memory server, no persistence.
    pub fn with_defaults() -> Self {
        Self::new(ServerConfig::default()).expect("in-memory server cannot fail to open")
    }

    /// Persistent server at the given path.
    pub fn with_storage(
        bind_addr: impl Into<String>,
        path: impl Into<PathBuf>,
    ) -> Result<Self, crate::storage::StoreError> {
        Self::new(ServerConfig {
            bind_addr: bind_addr.into(),
            storage_path: Some(path.into()),
            ..ServerConfig::default()
        })
    }

    /// Accept connections forever. Call from an async runtime.
    pub async fn run(&self) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let listener = TcpListener::bind(&self.state.config.bind_addr).await?;
        log::info!("sandbox server listening on {}", self.state.config.bind_addr);

        loop {
            let (stream, addr) = listener.accept().await?;
            log::debug!("new TCP connection from {addr}");
            let state = self.state.clone();
            tokio::spawn(async move {
                if let Err(e) = handle_connection(stream, addr, state).await {
                    log::error!("connection error from {addr}: {e}");
                }
            });
        }
    }

    /// Restore the starter templates and push them to every client.
    pub async fn reset_documents(&self) -> Result<(), crate::storage::StoreError> {
        if let Some(store) = &self.state.store {
            store.reset_to_initial()?;
        }
        {
            let mut current = self.state.current.write().await;
            current[DocKind::Html.as_index()] = INITIAL_HTML.to_string();
            current[DocKind::Css.as_index()] = INITIAL_CSS.to_string();
        }

        let _ = self.state.hub.broadcast(SERVER_SENDER, &WireMessage::CodeReset);
        for (kind, content) in [(DocKind::Html, INITIAL_HTML), (DocKind::Css, INITIAL_CSS)] {
            let frame = WireMessage::Updated(UpdateMessage::final_edit(
                kind,
                content,
                ADMIN_LABEL,
                0,
            ));
            let _ = self.state.hub.broadcast(SERVER_SENDER, &frame);
        }
        log::info!("documents reset and rebroadcast");
        Ok(())
    }

    pub async fn stats(&self) -> ServerStats {
        self.state.stats.read().await.clone()
    }

    pub async fn online_count(&self) -> usize {
        self.state.registry.online_count().await
    }

    pub fn bind_addr(&self) -> &str {
        &self.state.config.bind_addr
    }

    pub fn store(&self) -> Option<&DocumentStore> {
        self.state.store.as_ref()
    }
}

/// Handle one WebSocket connection to completion.
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    let (mut ws_sender, mut ws_receiver) = ws_stream.split();

    let conn_id = Uuid::new_v4();
    log::info!("WebSocket connection {conn_id} established from {addr}");

    {
        let mut s = state.stats.write().await;
        s.total_connections += 1;
        s.active_connections += 1;
    }

    let mut broadcast_rx = state.hub.subscribe();
    let mut team: Option<String> = None;
    let mut last_activity = tokio::time::Instant::now();

    loop {
        tokio::select! {
            // Incoming WebSocket frame.
            msg = ws_receiver.next() => {
                last_activity = tokio::time::Instant::now();
                match msg {
                    Some(Ok(Message::Binary(data))) => {
                        let bytes: Vec<u8> = data.into();
                        {
                            let mut s = state.stats.write().await;
                            s.total_messages += 1;
                            s.total_bytes += bytes.len() as u64;
                        }
                        let frame = match WireMessage::decode(&bytes) {
                            Ok(frame) => frame,
                            Err(e) => {
                                log::warn!("malformed frame from {addr}: {e}");
                                continue;
                            }
                        };
                        match handle_frame(frame, conn_id, &mut team, &state, &mut ws_sender).await {
                            Ok(()) => {}
                            Err(e) => {
                                log::error!("failed handling frame from {addr}: {e}");
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if ws_sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        log::info!("connection {conn_id} closed");
                        break;
                    }
                    Some(Err(e)) => {
                        log::error!("WebSocket error from {addr}: {e}");
                        break;
                    }
                    _ => {}
                }
            }

            // Outgoing broadcast frame.
            frame = broadcast_rx.recv() => {
                match frame {
                    Ok((sender, bytes)) => {
                        if sender == conn_id {
                            continue; // never echo a connection's own frames
                        }
                        if ws_sender
                            .send(Message::Binary(bytes.to_vec().into()))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        log::warn!("connection {conn_id} lagged by {n} broadcast frames");
                    }
                    Err(_) => break,
                }
            }

            // Inactivity cut-off.
            _ = tokio::time::sleep_until(last_activity + state.config.inactivity_timeout) => {
                log::warn!("disconnecting {conn_id} after inactivity");
                break;
            }
        }
    }

    // Cleanup: free the label and tell the room.
    if team.is_some() {
        if let Some(label) = state.registry.unregister(conn_id).await {
            let count = state.registry.online_count().await;
            let _ = state
                .hub
                .broadcast(SERVER_SENDER, &WireMessage::OnlineCount { count });
            let _ = state.hub.broadcast(
                SERVER_SENDER,
                &WireMessage::UserDisconnected { team_label: label.clone() },
            );
            log::info!("team {label} disconnected");
        }
    }
    {
        let mut s = state.stats.write().await;
        s.active_connections -= 1;
    }

    Ok(())
}

/// Dispatch one decoded client frame.
async fn handle_frame<S>(
    frame: WireMessage,
    conn_id: Uuid,
    team: &mut Option<String>,
    state: &Arc<ServerState>,
    ws_sender: &mut S,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    match frame {
        WireMessage::Auth { team_label } => {
            if team_label.trim().is_empty() {
                send(ws_sender, &WireMessage::AuthError {
                    message: "Team label must not be empty".to_string(),
                })
                .await?;
                return Ok(());
            }
            match state.registry.register(conn_id, &team_label).await {
                Ok(()) => {
                    *team = Some(team_label.clone());
                    send(ws_sender, &WireMessage::AuthSuccess {
                        team_label: team_label.clone(),
                    })
                    .await?;
                    let count = state.registry.online_count().await;
                    let _ = state
                        .hub
                        .broadcast(SERVER_SENDER, &WireMessage::OnlineCount { count });
                    log::info!("team {team_label} authenticated ({count} online)");
                }
                Err(e) => {
                    let mut s = state.stats.write().await;
                    s.auth_rejections += 1;
                    drop(s);
                    log::warn!("auth rejected for {team_label}: label in use");
                    send(ws_sender, &WireMessage::AuthError { message: e.to_string() }).await?;
                }
            }
        }

        WireMessage::InitializeCode => {
            if team.is_none() {
                return Ok(());
            }
            send(ws_sender, &WireMessage::CodeInitialized).await?;
            let current = state.current.read().await;
            for kind in DocKind::ALL {
                let frame = WireMessage::Updated(UpdateMessage::final_edit(
                    kind,
                    current[kind.as_index()].clone(),
                    SYSTEM_LABEL,
                    0,
                ));
                send(ws_sender, &frame).await?;
            }
            log::debug!("initial documents sent to {conn_id}");
        }

        WireMessage::Update(update) => {
            let Some(label) = team.as_deref() else {
                log::warn!("unauthenticated update from {conn_id} dropped");
                return Ok(());
            };
            if update.team_label != label {
                log::warn!(
                    "update from {conn_id} claims label {} but holds {label}, dropped",
                    update.team_label
                );
                return Ok(());
            }

            if update.continuous {
                // Live-typing preview: fan out, never persist, never ack.
                let _ = state
                    .hub
                    .broadcast(conn_id, &WireMessage::Updated(update.clone()));
                log::trace!(
                    "{} continuous update from {label} (v{})",
                    update.kind,
                    update.version
                );
                return Ok(());
            }

            if let Some(store) = &state.store {
                if let Err(e) = store.persist_update(update.kind, &update.content, label) {
                    // No ack and no broadcast: the client's retry loop takes
                    // it from here.
                    log::error!("failed to persist {} update from {label}: {e}", update.kind);
                    return Ok(());
                }
            }
            {
                let mut current = state.current.write().await;
                current[update.kind.as_index()] = update.content.clone();
            }
            {
                let mut s = state.stats.write().await;
                s.persisted_updates += 1;
            }

            send(ws_sender, &WireMessage::UpdateAck {
                kind: update.kind,
                version: update.version,
            })
            .await?;
            let _ = state
                .hub
                .broadcast(conn_id, &WireMessage::Updated(update.clone()));
            log::info!(
                "{} updated by {label} (v{}{})",
                update.kind,
                update.version,
                if update.is_final { ", final" } else { "" }
            );
        }

        WireMessage::CursorPosition { x, y, team_label } => {
            let Some(label) = team.as_deref() else {
                return Ok(());
            };
            if team_label != label {
                return Ok(());
            }
            let _ = state.hub.broadcast(
                conn_id,
                &WireMessage::CursorMoved { x, y, team_label },
            );
        }

        other => {
            log::debug!("unexpected client frame from {conn_id}: {other:?}");
        }
    }
    Ok(())
}

async fn send<S>(ws_sender: &mut S, frame: &WireMessage) -> Result<(), Box<dyn std::error::Error + Send + Sync>>
where
    S: SinkExt<Message> + Unpin,
    S::Error: std::error::Error + Send + Sync + 'static,
{
    let encoded = frame.encode()?;
    ws_sender.send(Message::Binary(encoded.into())).await?;
    Ok(())
}
