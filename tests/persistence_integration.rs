//! Durability tests: updates written through the live server survive a
//! server restart, and history records attribute every write.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use codepad_collab::protocol::{DocKind, UpdateMessage, WireMessage};
use codepad_collab::server::{CollabServer, ServerConfig};
use codepad_collab::storage::{DocumentStore, StoreConfig, INITIAL_CSS, INITIAL_HTML};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(3);

async fn free_port() -> u16 {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

async fn start_server(
    storage: std::path::PathBuf,
) -> (Arc<CollabServer>, tokio::task::JoinHandle<()>, u16) {
    let port = free_port().await;
    let config = ServerConfig {
        bind_addr: format!("127.0.0.1:{port}"),
        broadcast_capacity: 64,
        inactivity_timeout: Duration::from_secs(60),
        storage_path: Some(storage),
    };
    let server = Arc::new(CollabServer::new(config).unwrap());
    let runner = server.clone();
    let handle = tokio::spawn(async move {
        let _ = runner.run().await;
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    (server, handle, port)
}

async fn send_frame(ws: &mut Ws, frame: &WireMessage) {
    ws.send(Message::Binary(frame.encode().unwrap().into()))
        .await
        .unwrap();
}

async fn recv_until(ws: &mut Ws, mut pred: impl FnMut(&WireMessage) -> bool) -> WireMessage {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Binary(data))) => {
                    let bytes: Vec<u8> = data.into();
                    if let Ok(frame) = WireMessage::decode(&bytes) {
                        if pred(&frame) {
                            return frame;
                        }
                    }
                }
                Some(Ok(_)) => {}
                other => panic!("connection ended while waiting: {other:?}"),
            }
        }
    })
    .await
    .expect("expected frame within timeout")
}

async fn authed_client(port: u16, label: &str) -> Ws {
    let (mut ws, _) = tokio_tungstenite::connect_async(format!("ws://127.0.0.1:{port}"))
        .await
        .unwrap();
    send_frame(&mut ws, &WireMessage::Auth { team_label: label.into() }).await;
    recv_until(&mut ws, |f| matches!(f, WireMessage::AuthSuccess { .. })).await;
    ws
}

/// Persist a final frame and wait for the ack.
async fn persist_final(ws: &mut Ws, kind: DocKind, content: &str, label: &str, version: u64) {
    let frame = UpdateMessage::final_edit(kind, content, label, version);
    send_frame(ws, &WireMessage::Update(frame)).await;
    recv_until(ws, |f| matches!(f, WireMessage::UpdateAck { .. })).await;
}

#[tokio::test]
async fn test_final_update_survives_server_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("db");

    let (server, handle, port) = start_server(db_path.clone()).await;
    let mut ws = authed_client(port, "team1").await;
    persist_final(&mut ws, DocKind::Html, "<p>durable</p>", "team1", 1).await;

    // Tear the first server down so the database lock is released.
    drop(ws);
    handle.abort();
    drop(server);
    tokio::time::sleep(Duration::from_millis(200)).await;

    let (server2, _handle2, port2) = start_server(db_path).await;
    assert_eq!(
        server2
            .store()
            .unwrap()
            .get_document(DocKind::Html)
            .unwrap()
            .unwrap()
            .content,
        "<p>durable</p>"
    );

    // A fresh client is initialized from the recovered value.
    let mut ws = authed_client(port2, "team2").await;
    send_frame(&mut ws, &WireMessage::InitializeCode).await;
    let frame = recv_until(&mut ws, |f| {
        matches!(f, WireMessage::Updated(u) if u.kind == DocKind::Html)
    })
    .await;
    match frame {
        WireMessage::Updated(u) => assert_eq!(u.content, "<p>durable</p>"),
        other => panic!("unexpected frame {other:?}"),
    }
}

#[tokio::test]
async fn test_history_attributes_every_write() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _handle, port) = start_server(dir.path().join("db")).await;

    let mut alice = authed_client(port, "alice").await;
    let mut bob = authed_client(port, "bob").await;

    persist_final(&mut alice, DocKind::Css, "a { color: red }", "alice", 1).await;
    persist_final(&mut bob, DocKind::Css, "a { color: blue }", "bob", 1).await;

    let history = server.store().unwrap().history(DocKind::Css, 2).unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].team_label, "bob");
    assert_eq!(history[0].content, "a { color: blue }");
    assert_eq!(history[1].team_label, "alice");

    let current = server
        .store()
        .unwrap()
        .get_document(DocKind::Css)
        .unwrap()
        .unwrap();
    assert_eq!(current.team_label, "bob");
}

#[tokio::test]
async fn test_reset_restores_templates_in_store_and_clients() {
    let dir = tempfile::tempdir().unwrap();
    let (server, _handle, port) = start_server(dir.path().join("db")).await;

    let mut ws = authed_client(port, "team1").await;
    persist_final(&mut ws, DocKind::Html, "<p>scribbles</p>", "team1", 1).await;
    persist_final(&mut ws, DocKind::Css, "* { outline: 1px solid red }", "team1", 1).await;

    server.reset_documents().await.unwrap();
    recv_until(&mut ws, |f| matches!(f, WireMessage::CodeReset)).await;

    let store = server.store().unwrap();
    assert_eq!(
        store.get_document(DocKind::Html).unwrap().unwrap().content,
        INITIAL_HTML
    );
    assert_eq!(
        store.get_document(DocKind::Css).unwrap().unwrap().content,
        INITIAL_CSS
    );
    assert_eq!(
        store.get_document(DocKind::Html).unwrap().unwrap().team_label,
        "admin_reset"
    );

    // Initialization now serves the templates again.
    send_frame(&mut ws, &WireMessage::InitializeCode).await;
    recv_until(&mut ws, |f| matches!(f, WireMessage::CodeInitialized)).await;
    let frame = recv_until(&mut ws, |f| {
        matches!(f, WireMessage::Updated(u) if u.kind == DocKind::Html && u.content == INITIAL_HTML)
    })
    .await;
    assert!(matches!(frame, WireMessage::Updated(_)));
}

#[tokio::test]
async fn test_store_reopen_preserves_history_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("db");

    let sequence = {
        let store = DocumentStore::open(StoreConfig::for_testing(&path)).unwrap();
        store.persist_update(DocKind::Html, "one", "t").unwrap();
        store.persist_update(DocKind::Html, "two", "t").unwrap();
        store.history_sequence()
    };

    let store = DocumentStore::open(StoreConfig::for_testing(&path)).unwrap();
    assert_eq!(store.history_sequence(), sequence);

    let history = store.history(DocKind::Html, 10).unwrap();
    assert_eq!(history[0].content, "two");
}
