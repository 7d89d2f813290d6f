//! Clipboard sync engine
//!
//! A single background task polls the local clipboard on a fixed interval
//! and broadcasts changes to every peer's `/clipboard` endpoint. Two
//! last-value checks suppress feedback loops: content that just arrived
//! from the network (tracked by [`ContentStore`], fed by the ingest
//! handler) and content this node already broadcast are never sent.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::clipboard::Clipboard;
use crate::discovery;

/// Header naming the pushing node, recorded in peer history
pub const FROM_HOST_HEADER: &str = "X-From-Host";

/// Upper bound on one discovery round during peer resolution
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(5);

/// Last clipboard value accepted from the network
///
/// Shared between the ingest handler (writer) and the sync engine
/// (reader). Handles are cheap clones of the same slot.
#[derive(Clone, Default)]
pub struct ContentStore {
    inner: Arc<Mutex<Option<String>>>,
}

impl ContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remember a value received from a peer so it is not echoed back
    pub fn record(&self, value: &str) {
        *self.inner.lock().unwrap() = Some(value.to_owned());
    }

    /// The most recently recorded value, if any
    pub fn last(&self) -> Option<String> {
        self.inner.lock().unwrap().clone()
    }
}

/// Produces the peer base URLs to sync with, excluding this node
pub struct PeerResolver {
    static_peers: Vec<String>,
    self_host: String,
    port: u16,
    api_token: Option<String>,
}

impl PeerResolver {
    pub fn new(
        static_peers: Vec<String>,
        self_host: impl Into<String>,
        port: u16,
        api_token: Option<String>,
    ) -> Self {
        Self {
            static_peers,
            self_host: self_host.into(),
            port,
            api_token,
        }
    }

    pub fn self_host(&self) -> &str {
        &self.self_host
    }

    /// Current peer base URLs
    ///
    /// A configured static list wins and bypasses discovery entirely.
    /// Discovery failures yield an empty set; the next tick retries.
    pub async fn resolve(&self) -> Vec<String> {
        if !self.static_peers.is_empty() {
            return self
                .static_peers
                .iter()
                .map(|p| p.trim())
                .filter(|p| !p.is_empty() && *p != self.self_host)
                .map(|p| format!("http://{}:{}", p, self.port))
                .collect();
        }

        let lookup = discovery::self_and_peers(self.api_token.as_deref());
        match tokio::time::timeout(DISCOVERY_TIMEOUT, lookup).await {
            Ok(Ok((discovered_self, devices))) => {
                let self_host = if discovered_self.is_empty() {
                    self.self_host.as_str()
                } else {
                    discovered_self.as_str()
                };
                devices
                    .iter()
                    .filter(|d| d.hostname != self_host)
                    .filter_map(|d| discovery::base_url(d, self.port))
                    .collect()
            }
            Ok(Err(e)) => {
                warn!(error = %e, "peer discovery failed, skipping this tick");
                Vec::new()
            }
            Err(_) => {
                warn!("peer discovery timed out, skipping this tick");
                Vec::new()
            }
        }
    }
}

/// The clipboard broadcast loop
pub struct SyncEngine {
    clipboard: Arc<dyn Clipboard>,
    resolver: PeerResolver,
    received: ContentStore,
    client: reqwest::Client,
    interval: Duration,
    last_broadcasted: Option<String>,
}

impl SyncEngine {
    pub fn new(
        clipboard: Arc<dyn Clipboard>,
        resolver: PeerResolver,
        received: ContentStore,
        client: reqwest::Client,
        interval: Duration,
    ) -> Self {
        Self {
            clipboard,
            resolver,
            received,
            client,
            interval,
            last_broadcasted: None,
        }
    }

    /// Last value this node successfully broadcast to every peer
    pub fn last_broadcasted(&self) -> Option<&str> {
        self.last_broadcasted.as_deref()
    }

    /// Run the tick loop until the token is cancelled
    ///
    /// Cancellation is observed at the tick wait point; an in-flight
    /// broadcast finishes (or fails) naturally first.
    pub async fn run(mut self, cancel: CancellationToken) {
        info!(interval_ms = self.interval.as_millis() as u64, "sync engine started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // The first interval tick completes immediately; consume it so
        // polling starts one interval after startup.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("sync engine stopped");
                    return;
                }
                _ = ticker.tick() => {}
            }
            self.tick().await;
        }
    }

    /// One poll-compare-broadcast round
    pub async fn tick(&mut self) {
        let current = match self.clipboard.get_text().await {
            Ok(text) => text,
            Err(e) => {
                warn!(error = %e, "clipboard read failed");
                return;
            }
        };
        if current.is_empty() {
            return;
        }
        if self.received.last().as_deref() == Some(current.as_str()) {
            debug!("suppressing re-broadcast of network-received content");
            return;
        }
        if self.last_broadcasted.as_deref() == Some(current.as_str()) {
            return;
        }

        let peers = self.resolver.resolve().await;
        if peers.is_empty() {
            return;
        }

        if self.broadcast(&current, &peers).await {
            self.last_broadcasted = Some(current);
        }
    }

    /// Push content to every peer sequentially; true iff all succeeded
    ///
    /// A failed peer is logged and skipped; the remaining peers still get
    /// the push. Leaving `last_broadcasted` unset on partial failure makes
    /// the next tick retry the full broadcast.
    async fn broadcast(&self, content: &str, peers: &[String]) -> bool {
        let mut all_ok = true;
        for base in peers {
            let url = format!("{}/clipboard", base.trim_end_matches('/'));
            let result = self
                .client
                .post(&url)
                .header(CONTENT_TYPE, "text/plain; charset=utf-8")
                .header(FROM_HOST_HEADER, self.resolver.self_host())
                .body(content.to_owned())
                .send()
                .await;
            match result {
                Ok(resp) if resp.status().is_success() => {
                    debug!(peer = %url, "clipboard pushed");
                }
                Ok(resp) => {
                    warn!(peer = %url, status = %resp.status(), "peer rejected clipboard push");
                    all_ok = false;
                }
                Err(e) => {
                    warn!(peer = %url, error = %e, "clipboard push failed");
                    all_ok = false;
                }
            }
        }
        all_ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clipboard::MemoryClipboard;

    #[test]
    fn content_store_records_last_value() {
        let store = ContentStore::new();
        assert_eq!(store.last(), None);

        store.record("first");
        assert_eq!(store.last().as_deref(), Some("first"));

        store.record("second");
        assert_eq!(store.last().as_deref(), Some("second"));
    }

    #[test]
    fn content_store_handles_share_state() {
        let store = ContentStore::new();
        let handle = store.clone();
        handle.record("shared");
        assert_eq!(store.last().as_deref(), Some("shared"));
    }

    #[tokio::test]
    async fn static_peers_bypass_discovery_and_drop_self() {
        let resolver = PeerResolver::new(
            vec![
                " desktop ".to_string(),
                String::new(),
                "laptop".to_string(),
                "phone".to_string(),
            ],
            "laptop",
            8315,
            None,
        );

        let peers = resolver.resolve().await;
        assert_eq!(
            peers,
            vec![
                "http://desktop:8315".to_string(),
                "http://phone:8315".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn tick_skips_empty_clipboard() {
        let clipboard = Arc::new(MemoryClipboard::new());
        let resolver = PeerResolver::new(vec!["peer".into()], "self", 8315, None);
        let mut engine = SyncEngine::new(
            clipboard,
            resolver,
            ContentStore::new(),
            reqwest::Client::new(),
            Duration::from_millis(100),
        );

        engine.tick().await;
        assert_eq!(engine.last_broadcasted(), None);
    }

    #[tokio::test]
    async fn tick_does_not_mark_broadcast_on_unreachable_peer() {
        let clipboard = Arc::new(MemoryClipboard::with_text("content"));
        // Reserved TEST-NET-1 address, nothing listens there.
        let resolver = PeerResolver::new(vec!["192.0.2.1".into()], "self", 8315, None);
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(200))
            .build()
            .unwrap();
        let mut engine = SyncEngine::new(
            clipboard,
            resolver,
            ContentStore::new(),
            client,
            Duration::from_millis(100),
        );

        engine.tick().await;
        assert_eq!(engine.last_broadcasted(), None);
    }
}
