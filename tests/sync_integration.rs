//! End-to-end sync engine tests
//!
//! Each test spins up real nodes (router + ephemeral-port listener) on
//! loopback and drives the engine tick by tick, so broadcast, feedback
//! suppression, and retry semantics are exercised over actual HTTP.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio_util::sync::CancellationToken;

use meshclip::clipboard::{Clipboard, MemoryClipboard};
use meshclip::files::FileStore;
use meshclip::history::HistoryStore;
use meshclip::server::{router, AppState};
use meshclip::sync::{ContentStore, PeerResolver, SyncEngine};

struct TestNode {
    addr: SocketAddr,
    state: Arc<AppState>,
    clipboard: Arc<MemoryClipboard>,
    _storage: tempfile::TempDir,
}

/// Start a full node (HTTP service over an in-memory clipboard) on an
/// ephemeral loopback port.
async fn spawn_node() -> TestNode {
    let storage = tempfile::TempDir::new().unwrap();
    let clipboard = Arc::new(MemoryClipboard::new());
    let state = Arc::new(AppState {
        clipboard: clipboard.clone(),
        history: HistoryStore::new(),
        files: FileStore::new(storage.path()),
        received: ContentStore::new(),
    });
    let app = router(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });

    TestNode {
        addr,
        state,
        clipboard,
        _storage: storage,
    }
}

fn test_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(2))
        .build()
        .unwrap()
}

/// Engine for a node, pushing to the given static peers on `port`
fn engine_for(
    clipboard: Arc<MemoryClipboard>,
    received: ContentStore,
    self_host: &str,
    peers: Vec<String>,
    port: u16,
) -> SyncEngine {
    let resolver = PeerResolver::new(peers, self_host, port, None);
    SyncEngine::new(
        clipboard,
        resolver,
        received,
        test_client(),
        Duration::from_millis(50),
    )
}

#[tokio::test]
async fn clipboard_change_propagates_to_peer() {
    let node_b = spawn_node().await;

    let clipboard_a = Arc::new(MemoryClipboard::with_text("hello"));
    let mut engine_a = engine_for(
        clipboard_a,
        ContentStore::new(),
        "node-a",
        vec!["127.0.0.1".into()],
        node_b.addr.port(),
    );

    engine_a.tick().await;

    assert_eq!(node_b.clipboard.get_text().await.unwrap(), "hello");
    let history = node_b.state.history.snapshot();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content, "hello");
    assert_eq!(history[0].from_host, "node-a");
    assert_eq!(engine_a.last_broadcasted(), Some("hello"));
}

#[tokio::test]
async fn received_content_is_not_echoed_back() {
    // A pushes to B, then B's own engine (pointed back at A) ticks.
    let node_a = spawn_node().await;
    let node_b = spawn_node().await;

    let clipboard_a = Arc::new(MemoryClipboard::with_text("hello"));
    let mut engine_a = engine_for(
        clipboard_a,
        ContentStore::new(),
        "node-a",
        vec!["127.0.0.1".into()],
        node_b.addr.port(),
    );
    engine_a.tick().await;
    assert_eq!(node_b.clipboard.get_text().await.unwrap(), "hello");

    // B's engine shares B's ContentStore, which recorded "hello" on ingest.
    let mut engine_b = engine_for(
        node_b.clipboard.clone(),
        node_b.state.received.clone(),
        "node-b",
        vec!["127.0.0.1".into()],
        node_a.addr.port(),
    );
    engine_b.tick().await;

    assert!(node_a.state.history.is_empty(), "feedback was not suppressed");
    assert_eq!(engine_b.last_broadcasted(), None);
}

#[tokio::test]
async fn successful_broadcast_is_not_repeated() {
    let node_b = spawn_node().await;

    let clipboard_a = Arc::new(MemoryClipboard::with_text("once"));
    let mut engine_a = engine_for(
        clipboard_a.clone(),
        ContentStore::new(),
        "node-a",
        vec!["127.0.0.1".into()],
        node_b.addr.port(),
    );

    engine_a.tick().await;
    engine_a.tick().await;
    assert_eq!(node_b.state.history.len(), 1);

    // A new value goes out again.
    clipboard_a.set_text("twice").await.unwrap();
    engine_a.tick().await;
    assert_eq!(node_b.state.history.len(), 2);
    assert_eq!(engine_a.last_broadcasted(), Some("twice"));
}

#[tokio::test]
async fn partial_failure_retries_same_content_next_tick() {
    let node_b = spawn_node().await;

    // 127.0.0.2 has nothing listening on B's port: one good peer, one dead.
    let clipboard_a = Arc::new(MemoryClipboard::with_text("retry me"));
    let mut engine_a = engine_for(
        clipboard_a,
        ContentStore::new(),
        "node-a",
        vec!["127.0.0.1".into(), "127.0.0.2".into()],
        node_b.addr.port(),
    );

    engine_a.tick().await;
    assert_eq!(node_b.state.history.len(), 1);
    assert_eq!(
        engine_a.last_broadcasted(),
        None,
        "partial failure must leave last_broadcasted unset"
    );

    // Next tick retries the full broadcast, so the good peer sees it again.
    engine_a.tick().await;
    assert_eq!(node_b.state.history.len(), 2);
    assert_eq!(node_b.state.history.snapshot()[0].content, "retry me");
}

#[tokio::test]
async fn failed_peer_does_not_block_remaining_peers() {
    let node_b = spawn_node().await;

    // The dead peer comes first in the list; B must still get the push.
    let clipboard_a = Arc::new(MemoryClipboard::with_text("delivered"));
    let mut engine_a = engine_for(
        clipboard_a,
        ContentStore::new(),
        "node-a",
        vec!["127.0.0.2".into(), "127.0.0.1".into()],
        node_b.addr.port(),
    );

    engine_a.tick().await;
    assert_eq!(node_b.clipboard.get_text().await.unwrap(), "delivered");
}

#[tokio::test]
async fn empty_clipboard_is_never_broadcast() {
    let node_b = spawn_node().await;

    let clipboard_a = Arc::new(MemoryClipboard::new());
    let mut engine_a = engine_for(
        clipboard_a,
        ContentStore::new(),
        "node-a",
        vec!["127.0.0.1".into()],
        node_b.addr.port(),
    );

    engine_a.tick().await;
    assert!(node_b.state.history.is_empty());
}

#[tokio::test]
async fn run_loop_stops_on_cancellation() {
    let node_b = spawn_node().await;

    let clipboard_a = Arc::new(MemoryClipboard::with_text("looped"));
    let engine_a = engine_for(
        clipboard_a,
        ContentStore::new(),
        "node-a",
        vec!["127.0.0.1".into()],
        node_b.addr.port(),
    );

    let cancel = CancellationToken::new();
    let handle = tokio::spawn(engine_a.run(cancel.clone()));

    // Let at least one tick happen, then cancel.
    tokio::time::sleep(Duration::from_millis(120)).await;
    cancel.cancel();
    tokio::time::timeout(Duration::from_secs(1), handle)
        .await
        .expect("engine did not stop within a tick interval")
        .unwrap();

    assert_eq!(node_b.clipboard.get_text().await.unwrap(), "looped");
}
