//! WebSocket client for the shared sandbox.
//!
//! Owns one [`SyncCoordinator`] per document kind and drives them from three
//! directions:
//!
//! - the application calls [`CollabClient::update_document`] on every local
//!   edit (and [`CollabClient::move_cursor`] on mouse moves),
//! - a reader task feeds remote frames in and emits [`CollabEvent`]s,
//! - a quiet-timer task per kind fires the session finalization.
//!
//! Final frames are delivery-critical: they are retried with exponential
//! backoff until the server's `UpdateAck` arrives, and on exhaustion the
//! content is flagged in the durable cache for the reconciliation sweep that
//! runs after the next successful authentication.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot, Mutex, Notify, RwLock};

use crate::cache::LocalBackup;
use crate::coordinator::{SyncConfig, SyncCoordinator, SyncOutcome};
use crate::presence::{CursorPosition, CursorThrottle};
use crate::protocol::{DocKind, ProtocolError, UpdateMessage, WireMessage};
use crate::server::{ADMIN_LABEL, SYSTEM_LABEL};

/// Client connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// WebSocket server URL (`ws://host:port`)
    pub server_url: String,
    /// Team label requested at authentication
    pub team_label: String,
    /// Idle time before a local edit session finalizes
    pub quiet_period: Duration,
    /// Final-frame delivery attempts before giving up
    pub retry_attempts: u32,
    /// Base delay for the retry backoff (doubles per attempt)
    pub retry_base_delay: Duration,
    /// How long to wait for an `UpdateAck` per attempt
    pub ack_timeout: Duration,
    /// Connection attempts before `connect` gives up
    pub reconnect_attempts: u32,
    /// Minimum interval between cursor frames
    pub cursor_interval: Duration,
    /// Durable cache directory (None = no local backup)
    pub backup_dir: Option<PathBuf>,
}

impl ClientConfig {
    pub fn new(server_url: impl Into<String>, team_label: impl Into<String>) -> Self {
        Self {
            server_url: server_url.into(),
            team_label: team_label.into(),
            quiet_period: Duration::from_secs(5),
            retry_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            ack_timeout: Duration::from_secs(2),
            reconnect_attempts: 5,
            cursor_interval: CursorThrottle::DEFAULT_INTERVAL,
            backup_dir: None,
        }
    }

    /// Fast timings for tests.
    pub fn for_testing(server_url: impl Into<String>, team_label: impl Into<String>) -> Self {
        Self {
            quiet_period: Duration::from_millis(100),
            retry_base_delay: Duration::from_millis(50),
            ack_timeout: Duration::from_millis(500),
            reconnect_attempts: 2,
            ..Self::new(server_url, team_label)
        }
    }
}

/// Events emitted to the application.
#[derive(Debug, Clone, PartialEq)]
pub enum CollabEvent {
    Connected,
    Disconnected,
    AuthAccepted { team_label: String },
    AuthRejected { message: String },
    /// Initialization handshake done; document content follows.
    Initialized,
    /// Surface this text in the editor widget.
    DocumentChanged { kind: DocKind, content: String },
    /// A remote change was folded into local text (not taken verbatim).
    MergeApplied { kind: DocKind, team_label: String },
    RemoteCursor { team_label: String, x: f32, y: f32 },
    OnlineCount(usize),
    UserDisconnected { team_label: String },
    /// A final frame could not be confirmed; content is cached locally and
    /// will be retried after the next authentication.
    SavedLocally { kind: DocKind },
    CodeReset,
}

struct ClientInner {
    config: ClientConfig,
    coordinators: [Mutex<SyncCoordinator>; 2],
    quiet_notify: [Notify; 2],
    backup: Option<LocalBackup>,
    outgoing: RwLock<Option<mpsc::Sender<Vec<u8>>>>,
    event_tx: mpsc::Sender<CollabEvent>,
    pending_acks: Mutex<HashMap<(DocKind, u64), oneshot::Sender<()>>>,
    cursor: Mutex<CursorThrottle>,
    cursor_flush_scheduled: AtomicBool,
    state: RwLock<ConnectionState>,
    timers_started: AtomicBool,
}

/// The sandbox client.
pub struct CollabClient {
    inner: Arc<ClientInner>,
    event_rx: Option<mpsc::Receiver<CollabEvent>>,
}

impl CollabClient {
    pub fn new(config: ClientConfig) -> Self {
        let (event_tx, event_rx) = mpsc::channel(256);

        let backup = config.backup_dir.as_ref().and_then(|dir| {
            LocalBackup::open(dir)
                .map_err(|e| log::warn!("local backup unavailable: {e}"))
                .ok()
        });

        let sync_config = SyncConfig {
            quiet_period: config.quiet_period,
            ..SyncConfig::default()
        };
        let coordinators = [
            Mutex::new(SyncCoordinator::new(
                DocKind::Html,
                &config.team_label,
                sync_config.clone(),
            )),
            Mutex::new(SyncCoordinator::new(
                DocKind::Css,
                &config.team_label,
                sync_config,
            )),
        ];

        let cursor = Mutex::new(CursorThrottle::new(config.cursor_interval));
        Self {
            inner: Arc::new(ClientInner {
                coordinators,
                quiet_notify: [Notify::new(), Notify::new()],
                backup,
                outgoing: RwLock::new(None),
                event_tx,
                pending_acks: Mutex::new(HashMap::new()),
                cursor,
                cursor_flush_scheduled: AtomicBool::new(false),
                state: RwLock::new(ConnectionState::Disconnected),
                timers_started: AtomicBool::new(false),
                config,
            }),
            event_rx: Some(event_rx),
        }
    }

    /// Take the event receiver (can only be called once).
    pub fn take_event_rx(&mut self) -> Option<mpsc::Receiver<CollabEvent>> {
        self.event_rx.take()
    }

    /// Connect and authenticate, with bounded reconnect attempts and
    /// exponential backoff between them.
    pub async fn connect(&self) -> Result<(), ProtocolError> {
        let inner = &self.inner;
        *inner.state.write().await = ConnectionState::Connecting;

        let mut delay = inner.config.retry_base_delay;
        for attempt in 0..inner.config.reconnect_attempts {
            match tokio_tungstenite::connect_async(&inner.config.server_url).await {
                Ok((ws_stream, _)) => {
                    inner.clone().start_io(ws_stream).await;
                    return Ok(());
                }
                Err(e) => {
                    log::warn!(
                        "connection attempt {} of {} failed: {e}",
                        attempt + 1,
                        inner.config.reconnect_attempts
                    );
                    if attempt + 1 < inner.config.reconnect_attempts {
                        tokio::time::sleep(delay).await;
                        delay *= 2;
                    }
                }
            }
        }

        *inner.state.write().await = ConnectionState::Disconnected;
        Err(ProtocolError::ConnectionClosed)
    }

    /// Local edit from the editor widget.
    pub async fn update_document(&self, kind: DocKind, content: &str) {
        self.inner.update_document(kind, content).await;
    }

    /// Local cursor move, throttled before hitting the wire.
    pub async fn move_cursor(&self, x: f32, y: f32) {
        self.inner.clone().move_cursor(x, y).await;
    }

    /// Currently displayed text for a kind.
    pub async fn document(&self, kind: DocKind) -> String {
        self.inner.coordinators[kind.as_index()]
            .lock()
            .await
            .displayed()
            .to_string()
    }

    /// Last server-consistent snapshot for a kind.
    pub async fn synced_snapshot(&self, kind: DocKind) -> String {
        self.inner.coordinators[kind.as_index()]
            .lock()
            .await
            .synced_snapshot()
            .to_string()
    }

    pub async fn is_editing(&self, kind: DocKind) -> bool {
        self.inner.coordinators[kind.as_index()]
            .lock()
            .await
            .is_editing()
    }

    pub async fn connection_state(&self) -> ConnectionState {
        *self.inner.state.read().await
    }

    pub fn team_label(&self) -> &str {
        &self.inner.config.team_label
    }

    pub fn server_url(&self) -> &str {
        &self.inner.config.server_url
    }
}

impl ClientInner {
    /// Wire a fresh WebSocket up: writer task, reader task, quiet timers,
    /// then authenticate.
    async fn start_io(
        self: Arc<Self>,
        ws_stream: tokio_tungstenite::WebSocketStream<
            tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
        >,
    ) {
        let (mut ws_writer, mut ws_reader) = ws_stream.split();

        let (out_tx, mut out_rx) = mpsc::channel::<Vec<u8>>(256);
        *self.outgoing.write().await = Some(out_tx);

        // Writer task: drain the outgoing channel into the socket.
        tokio::spawn(async move {
            while let Some(data) = out_rx.recv().await {
                if ws_writer
                    .send(tokio_tungstenite::tungstenite::Message::Binary(data.into()))
                    .await
                    .is_err()
                {
                    break;
                }
            }
        });

        // Quiet-period timers, once per process.
        if !self.timers_started.swap(true, Ordering::SeqCst) {
            for kind in DocKind::ALL {
                tokio::spawn(Self::quiet_timer(self.clone(), kind));
            }
        }

        *self.state.write().await = ConnectionState::Connected;
        let _ = self.event_tx.send(CollabEvent::Connected).await;

        let _ = self
            .send_frame(&WireMessage::Auth {
                team_label: self.config.team_label.clone(),
            })
            .await;

        // Reader task: decode frames until the socket dies.
        let inner = self.clone();
        tokio::spawn(async move {
            while let Some(msg) = ws_reader.next().await {
                match msg {
                    Ok(tokio_tungstenite::tungstenite::Message::Binary(data)) => {
                        let bytes: Vec<u8> = data.into();
                        match WireMessage::decode(&bytes) {
                            Ok(frame) => inner.clone().handle_frame(frame).await,
                            Err(e) => log::warn!("malformed frame from server: {e}"),
                        }
                    }
                    Ok(tokio_tungstenite::tungstenite::Message::Close(_)) | Err(_) => break,
                    _ => {}
                }
            }
            inner.handle_disconnect().await;
        });
    }

    async fn handle_frame(self: Arc<Self>, frame: WireMessage) {
        match frame {
            WireMessage::AuthSuccess { team_label } => {
                log::info!("authenticated as {team_label}");
                let _ = self
                    .event_tx
                    .send(CollabEvent::AuthAccepted { team_label })
                    .await;
                let _ = self.send_frame(&WireMessage::InitializeCode).await;
                tokio::spawn(self.clone().reconcile_pending());
            }
            WireMessage::AuthError { message } => {
                log::warn!("authentication rejected: {message}");
                let _ = self
                    .event_tx
                    .send(CollabEvent::AuthRejected { message })
                    .await;
            }
            WireMessage::CodeInitialized => {
                let _ = self.event_tx.send(CollabEvent::Initialized).await;
            }
            WireMessage::Updated(update) => self.handle_remote_update(update).await,
            WireMessage::UpdateAck { kind, version } => {
                if let Some(tx) = self.pending_acks.lock().await.remove(&(kind, version)) {
                    let _ = tx.send(());
                }
            }
            WireMessage::CodeReset => {
                log::info!("documents were reset by the server");
                let _ = self.event_tx.send(CollabEvent::CodeReset).await;
            }
            WireMessage::CursorMoved { x, y, team_label } => {
                let _ = self
                    .event_tx
                    .send(CollabEvent::RemoteCursor { team_label, x, y })
                    .await;
            }
            WireMessage::OnlineCount { count } => {
                let _ = self.event_tx.send(CollabEvent::OnlineCount(count)).await;
            }
            WireMessage::UserDisconnected { team_label } => {
                let _ = self
                    .event_tx
                    .send(CollabEvent::UserDisconnected { team_label })
                    .await;
            }
            other => log::debug!("unexpected server frame: {other:?}"),
        }
    }

    async fn handle_remote_update(self: &Arc<Self>, update: UpdateMessage) {
        let outcomes = {
            let mut coordinator = self.coordinators[update.kind.as_index()].lock().await;
            if update.team_label == SYSTEM_LABEL || update.team_label == ADMIN_LABEL {
                // Server-provided content replaces local state outright.
                coordinator.set_content(&update.content)
            } else {
                coordinator.on_remote_update(&update, Instant::now())
            }
        };
        self.dispatch_outcomes(outcomes).await;
    }

    async fn update_document(self: &Arc<Self>, kind: DocKind, content: &str) {
        if let Some(backup) = &self.backup {
            if let Err(e) = backup.save(kind, content, &self.config.team_label) {
                log::warn!("local backup failed: {e}");
            }
        }

        let outcomes = {
            let mut coordinator = self.coordinators[kind.as_index()].lock().await;
            coordinator.on_local_change(content, Instant::now())
        };
        self.quiet_notify[kind.as_index()].notify_one();
        self.dispatch_outcomes(outcomes).await;
    }

    /// One timer task per kind: sleeps until the quiet deadline, re-arming
    /// whenever a local edit moves it.
    async fn quiet_timer(inner: Arc<Self>, kind: DocKind) {
        loop {
            let deadline = {
                inner.coordinators[kind.as_index()]
                    .lock()
                    .await
                    .quiet_deadline()
            };
            match deadline {
                Some(deadline) => {
                    let sleep = tokio::time::sleep_until(tokio::time::Instant::from_std(deadline));
                    tokio::select! {
                        () = sleep => {
                            let outcomes = {
                                let mut coordinator =
                                    inner.coordinators[kind.as_index()].lock().await;
                                coordinator.on_quiet_elapsed(Instant::now())
                            };
                            inner.dispatch_outcomes(outcomes).await;
                        }
                        _ = inner.quiet_notify[kind.as_index()].notified() => {
                            // Deadline re-armed; recompute.
                        }
                    }
                }
                None => inner.quiet_notify[kind.as_index()].notified().await,
            }
        }
    }

    async fn dispatch_outcomes(self: &Arc<Self>, outcomes: Vec<SyncOutcome>) {
        for outcome in outcomes {
            match outcome {
                SyncOutcome::Broadcast(frame) => {
                    if frame.is_final {
                        tokio::spawn(self.clone().send_final_with_retry(frame));
                    } else if let Err(e) = self.send_frame(&WireMessage::Update(frame.clone())).await
                    {
                        // Continuous/session-start loss is recoverable; the
                        // final frame carries the authoritative content.
                        log::debug!("{}: update frame not sent: {e}", frame.kind);
                        if frame.persisted() {
                            self.flag_saved_locally(frame.kind).await;
                        }
                    }
                }
                SyncOutcome::Display { kind, content } => {
                    let _ = self
                        .event_tx
                        .send(CollabEvent::DocumentChanged { kind, content })
                        .await;
                }
                SyncOutcome::MergeNotice { kind, team_label } => {
                    let _ = self
                        .event_tx
                        .send(CollabEvent::MergeApplied { kind, team_label })
                        .await;
                }
            }
        }
    }

    /// Deliver a final frame: send, await the ack, retry with exponential
    /// backoff; on exhaustion flag the content for reconciliation.
    async fn send_final_with_retry(self: Arc<Self>, frame: UpdateMessage) {
        let kind = frame.kind;
        let key = (kind, frame.version);
        let (ack_tx, mut ack_rx) = oneshot::channel();
        self.pending_acks.lock().await.insert(key, ack_tx);

        let mut delay = self.config.retry_base_delay;
        for attempt in 0..self.config.retry_attempts {
            if let Err(e) = self.send_frame(&WireMessage::Update(frame.clone())).await {
                log::warn!("{kind}: final frame send failed (attempt {}): {e}", attempt + 1);
            } else if tokio::time::timeout(self.config.ack_timeout, &mut ack_rx)
                .await
                .map(|r| r.is_ok())
                .unwrap_or(false)
            {
                // Confirmed: the server persisted this content.
                self.pending_acks.lock().await.remove(&key);
                let mut coordinator = self.coordinators[kind.as_index()].lock().await;
                coordinator.confirm_synced(&frame.content);
                drop(coordinator);
                if let Some(backup) = &self.backup {
                    let _ = backup.clear_pending(kind, &self.config.team_label);
                }
                log::debug!("{kind}: final frame v{} acknowledged", frame.version);
                return;
            }
            if attempt + 1 < self.config.retry_attempts {
                tokio::time::sleep(delay).await;
                delay *= 2;
            }
        }

        self.pending_acks.lock().await.remove(&key);
        log::warn!(
            "{kind}: final frame v{} unconfirmed after {} attempts, saved locally",
            frame.version,
            self.config.retry_attempts
        );
        self.coordinators[kind.as_index()]
            .lock()
            .await
            .mark_pending_sync();
        self.flag_saved_locally(kind).await;
    }

    /// Resend cached content whose final frame was never confirmed.
    async fn reconcile_pending(self: Arc<Self>) {
        let Some(backup) = &self.backup else { return };
        let pending = backup.pending(&self.config.team_label);
        if pending.is_empty() {
            return;
        }
        log::info!("reconciling {} locally saved document(s)", pending.len());

        for (kind, record) in pending {
            let frame = {
                let mut coordinator = self.coordinators[kind.as_index()].lock().await;
                match coordinator.resync_frame() {
                    Some(frame) => frame,
                    None => coordinator.recover_pending(&record.content),
                }
            };
            tokio::spawn(self.clone().send_final_with_retry(frame));
        }
    }

    async fn move_cursor(self: Arc<Self>, x: f32, y: f32) {
        let position = CursorPosition::new(x, y);
        let send_now = self.cursor.lock().await.offer(position, Instant::now());
        match send_now {
            Some(position) => self.send_cursor(position).await,
            None => {
                if !self.cursor_flush_scheduled.swap(true, Ordering::SeqCst) {
                    let inner = self.clone();
                    tokio::spawn(async move {
                        tokio::time::sleep(inner.config.cursor_interval).await;
                        inner.cursor_flush_scheduled.store(false, Ordering::SeqCst);
                        let flushed = inner.cursor.lock().await.poll(Instant::now());
                        if let Some(position) = flushed {
                            inner.send_cursor(position).await;
                        }
                    });
                }
            }
        }
    }

    async fn send_cursor(&self, position: CursorPosition) {
        let frame = WireMessage::CursorPosition {
            x: position.x,
            y: position.y,
            team_label: self.config.team_label.clone(),
        };
        if let Err(e) = self.send_frame(&frame).await {
            log::trace!("cursor frame dropped: {e}");
        }
    }

    async fn send_frame(&self, frame: &WireMessage) -> Result<(), ProtocolError> {
        let encoded = frame.encode()?;
        let outgoing = self.outgoing.read().await;
        match outgoing.as_ref() {
            Some(tx) => tx
                .send(encoded)
                .await
                .map_err(|_| ProtocolError::ConnectionClosed),
            None => Err(ProtocolError::ConnectionClosed),
        }
    }

    /// Flag a kind as saved-locally-pending-sync and tell the user.
    async fn flag_saved_locally(&self, kind: DocKind) {
        if let Some(backup) = &self.backup {
            let _ = backup.mark_pending(kind, &self.config.team_label);
        }
        let _ = self.event_tx.send(CollabEvent::SavedLocally { kind }).await;
    }

    async fn handle_disconnect(&self) {
        *self.state.write().await = ConnectionState::Disconnected;
        *self.outgoing.write().await = None;

        // Mid-edit content must survive the outage: flag it for the
        // reconciliation sweep after the next authentication.
        for kind in DocKind::ALL {
            let mut coordinator = self.coordinators[kind.as_index()].lock().await;
            if coordinator.is_editing() || coordinator.is_dirty() {
                coordinator.mark_pending_sync();
                drop(coordinator);
                self.flag_saved_locally(kind).await;
            }
        }

        log::info!("connection to server lost");
        let _ = self.event_tx.send(CollabEvent::Disconnected).await;
    }
}
