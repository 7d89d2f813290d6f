//! Command-line interface
//!
//! `meshclip serve` runs the peer-facing HTTP service (optionally with the
//! clipboard sync loop and/or daemonized); the remaining subcommands are
//! thin HTTP clients against a peer's service.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::clipboard::{Clipboard, SystemClipboard};
use crate::config::Config;
use crate::discovery;
use crate::files::FileStore;
use crate::history::{HistoryEntry, HistoryStore};
use crate::server::{self, AppState};
use crate::sync::{ContentStore, PeerResolver, SyncEngine, FROM_HOST_HEADER};

#[derive(Parser)]
#[command(name = "meshclip")]
#[command(about = "Clipboard and file sharing between machines on a private mesh network")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Path to the configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    #[command(about = "Run the peer-facing service")]
    Serve {
        /// Broadcast local clipboard changes to peers
        #[arg(long)]
        sync: bool,

        /// Run in the background, logging to a file
        #[arg(long)]
        daemon: bool,

        /// Listen port (overrides config)
        #[arg(long)]
        port: Option<u16>,

        /// Comma-separated peer hostnames or IPs (overrides discovery)
        #[arg(long)]
        peers: Option<String>,

        /// Clipboard poll interval in milliseconds (overrides config)
        #[arg(long)]
        sync_interval_ms: Option<u64>,

        /// Tailscale API token for discovery (or TAILSCALE_API_TOKEN)
        #[arg(long, env = "TAILSCALE_API_TOKEN", hide_env_values = true)]
        api_token: Option<String>,

        /// Log file for daemon mode
        #[arg(long)]
        log_file: Option<PathBuf>,
    },

    #[command(about = "Stop the background service")]
    Stop,

    #[command(about = "Show service status")]
    Status,

    #[command(about = "List devices on the tailnet")]
    List,

    #[command(about = "Push the local clipboard to a peer")]
    Push { peer: String },

    #[command(about = "Pull a peer's clipboard into the local clipboard")]
    Pull { peer: String },

    #[command(about = "Send a text message to a peer (lands on its clipboard)")]
    Message { peer: String, text: String },

    #[command(about = "Send a file to a peer")]
    File { peer: String, path: PathBuf },

    #[command(about = "Show a node's clipboard history")]
    History {
        /// Peer to query; defaults to this machine
        peer: Option<String>,

        #[arg(short, long, default_value = "10")]
        limit: usize,
    },

    #[command(about = "Configuration management")]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
pub enum ConfigAction {
    #[command(about = "Show current configuration")]
    Show,

    #[command(about = "Generate example configuration")]
    Init {
        #[arg(long)]
        force: bool,
    },

    #[command(about = "Validate configuration")]
    Validate,
}

impl Commands {
    /// Whether this invocation wants to daemonize (checked before the
    /// async runtime starts; forking after spawning threads is unsafe)
    pub fn wants_daemon(&self) -> bool {
        matches!(
            self,
            Commands::Serve { daemon: true, .. }
        )
    }

    pub fn daemon_log_file(&self) -> Option<PathBuf> {
        match self {
            Commands::Serve { log_file, .. } => log_file.clone(),
            _ => None,
        }
    }
}

pub struct CliHandler {
    config: Config,
    config_path: Option<PathBuf>,
}

impl CliHandler {
    pub fn new(config_path: Option<PathBuf>) -> Result<Self> {
        let config = Config::load_config(config_path.clone())?;
        Ok(Self {
            config,
            config_path,
        })
    }

    pub async fn handle_command(&self, command: Commands) -> Result<()> {
        match command {
            Commands::Serve {
                sync,
                daemon: _,
                port,
                peers,
                sync_interval_ms,
                api_token,
                log_file: _,
            } => {
                self.serve(sync, port, peers, sync_interval_ms, api_token)
                    .await
            }
            Commands::Stop => self.stop(),
            Commands::Status => self.status(),
            Commands::List => self.list().await,
            Commands::Push { peer } => self.push(&peer).await,
            Commands::Pull { peer } => self.pull(&peer).await,
            Commands::Message { peer, text } => self.message(&peer, &text).await,
            Commands::File { peer, path } => self.send_file(&peer, &path).await,
            Commands::History { peer, limit } => self.history(peer.as_deref(), limit).await,
            Commands::Config { action } => self.config_action(action),
        }
    }

    /// Run the HTTP service, optionally with the sync loop
    async fn serve(
        &self,
        sync_flag: bool,
        port: Option<u16>,
        peers: Option<String>,
        sync_interval_ms: Option<u64>,
        api_token: Option<String>,
    ) -> Result<()> {
        let cfg = &self.config;
        let port = port.unwrap_or(cfg.port);
        let self_host = cfg.hostname.clone();

        let clipboard: Arc<dyn Clipboard> = Arc::new(SystemClipboard::new());
        let received = ContentStore::new();
        let state = Arc::new(AppState {
            clipboard: Arc::clone(&clipboard),
            history: HistoryStore::new(),
            files: FileStore::new(cfg.storage.file_dir.clone()),
            received: received.clone(),
        });
        let app = server::router(state);

        let shutdown = CancellationToken::new();
        #[cfg(unix)]
        crate::daemon::setup_signal_handlers(shutdown.clone())?;

        if sync_flag || cfg.sync.enabled {
            let static_peers: Vec<String> = match &peers {
                Some(list) => list.split(',').map(str::to_owned).collect(),
                None => cfg.sync.peers.clone(),
            };
            let api_token = api_token.or_else(|| cfg.api_token());
            let resolver = PeerResolver::new(static_peers, self_host.clone(), port, api_token);
            let client = reqwest::Client::builder()
                .timeout(Duration::from_millis(cfg.sync.push_timeout_ms))
                .build()
                .context("Failed to build HTTP client")?;
            let interval =
                Duration::from_millis(sync_interval_ms.unwrap_or(cfg.sync.interval_ms));
            let engine = SyncEngine::new(
                Arc::clone(&clipboard),
                resolver,
                received,
                client,
                interval,
            );
            tokio::spawn(engine.run(shutdown.clone()));
            info!("clipboard auto-sync enabled (broadcast to peers on copy)");
        }

        let addr: SocketAddr = format!("{}:{}", cfg.bind_addr, port)
            .parse()
            .context("Invalid bind address")?;
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind {addr}"))?;
        info!(addr = %addr, host = %self_host, "meshclip listening");

        axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal(shutdown))
        .await
        .context("HTTP server error")?;

        info!("meshclip shut down");
        Ok(())
    }

    fn stop(&self) -> Result<()> {
        #[cfg(unix)]
        {
            crate::daemon::stop_daemon()
        }
        #[cfg(not(unix))]
        {
            anyhow::bail!("stop is only supported on unix")
        }
    }

    fn status(&self) -> Result<()> {
        println!(
            "meshclip v{} ({}, built {})",
            crate::VERSION,
            env!("TARGET"),
            env!("BUILD_DATE")
        );

        #[cfg(unix)]
        match crate::daemon::read_pidfile()? {
            Some(pid) if crate::daemon::is_process_running(pid) => {
                println!("service: running (PID {pid})");
            }
            Some(pid) => println!("service: not running (stale pidfile for PID {pid})"),
            None => println!("service: not running"),
        }

        println!("port: {}", self.config.port);
        println!("hostname: {}", self.config.hostname);
        println!(
            "sync: {}",
            if self.config.sync.enabled {
                "enabled"
            } else {
                "disabled"
            }
        );
        Ok(())
    }

    async fn list(&self) -> Result<()> {
        let devices = discovery::devices(self.config.api_token().as_deref()).await?;
        for device in &devices {
            if let Some(url) = discovery::base_url(device, self.config.port) {
                println!("{}\t{}", device.hostname, url);
            }
        }
        Ok(())
    }

    async fn push(&self, peer: &str) -> Result<()> {
        let text = SystemClipboard::new()
            .get_text()
            .await
            .context("Failed to read local clipboard")?;
        let resp = self
            .client()?
            .post(format!("{}/clipboard", self.base_url(peer)))
            .header(reqwest::header::CONTENT_TYPE, "text/plain; charset=utf-8")
            .header(FROM_HOST_HEADER, &self.config.hostname)
            .body(text)
            .send()
            .await
            .with_context(|| format!("Failed to reach {peer}"))?;
        expect_success(&resp)?;
        println!("clipboard pushed to {peer}");
        Ok(())
    }

    async fn pull(&self, peer: &str) -> Result<()> {
        let resp = self
            .client()?
            .get(format!("{}/clipboard", self.base_url(peer)))
            .send()
            .await
            .with_context(|| format!("Failed to reach {peer}"))?;
        expect_success(&resp)?;
        let text = resp.text().await?;
        SystemClipboard::new()
            .set_text(&text)
            .await
            .context("Failed to write local clipboard")?;
        println!("clipboard pulled from {peer} ({} bytes)", text.len());
        Ok(())
    }

    async fn message(&self, peer: &str, text: &str) -> Result<()> {
        let resp = self
            .client()?
            .post(format!("{}/message", self.base_url(peer)))
            .header(FROM_HOST_HEADER, &self.config.hostname)
            .json(&serde_json::json!({ "text": text }))
            .send()
            .await
            .with_context(|| format!("Failed to reach {peer}"))?;
        expect_success(&resp)?;
        println!("message sent to {peer}");
        Ok(())
    }

    async fn send_file(&self, peer: &str, path: &PathBuf) -> Result<()> {
        let bytes = tokio::fs::read(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file.bin".to_string());

        let part = reqwest::multipart::Part::bytes(bytes).file_name(name.clone());
        let form = reqwest::multipart::Form::new().part("file", part);
        let resp = self
            .client()?
            .post(format!("{}/files", self.base_url(peer)))
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Failed to reach {peer}"))?;
        expect_success(&resp)?;

        #[derive(serde::Deserialize)]
        struct FileResponse {
            file_id: String,
        }
        let body: FileResponse = resp.json().await?;
        println!("{name} sent to {peer}");
        println!("download: {}/files/{}", self.base_url(peer), body.file_id);
        Ok(())
    }

    async fn history(&self, peer: Option<&str>, limit: usize) -> Result<()> {
        let target = peer.unwrap_or("127.0.0.1");
        let resp = self
            .client()?
            .get(format!("{}/clipboard/history", self.base_url(target)))
            .send()
            .await
            .with_context(|| format!("Failed to reach {target}"))?;
        expect_success(&resp)?;

        let entries: Vec<HistoryEntry> = resp.json().await?;
        for entry in entries.iter().take(limit) {
            let preview: String = entry.content.chars().take(60).collect();
            println!(
                "{}  {:<16}  {}",
                entry.at.format("%Y-%m-%d %H:%M:%S"),
                entry.from_host,
                preview
            );
        }
        Ok(())
    }

    fn config_action(&self, action: ConfigAction) -> Result<()> {
        match action {
            ConfigAction::Show => {
                let toml = toml::to_string_pretty(&self.config)?;
                println!("{toml}");
                Ok(())
            }
            ConfigAction::Init { force } => {
                let path = Config::generate_example_config(force)?;
                println!("wrote {}", path.display());
                Ok(())
            }
            ConfigAction::Validate => {
                match &self.config_path {
                    Some(path) => Config::validate(path)?,
                    None => {
                        // No explicit path: loading in new() already validated.
                    }
                }
                println!("configuration is valid");
                Ok(())
            }
        }
    }

    fn base_url(&self, peer: &str) -> String {
        format!("http://{}:{}", peer, self.config.port)
    }

    fn client(&self) -> Result<reqwest::Client> {
        reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")
    }
}

/// Fail with the peer's status when a request was not accepted
fn expect_success(resp: &reqwest::Response) -> Result<()> {
    if !resp.status().is_success() {
        anyhow::bail!("{} replied {}", resp.url(), resp.status());
    }
    Ok(())
}

/// Resolves when either ctrl-c arrives or the shutdown token fires
async fn shutdown_signal(shutdown: CancellationToken) {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received ctrl-c, shutting down");
            shutdown.cancel();
        }
        _ = shutdown.cancelled() => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn serve_daemon_flag_detected() {
        let cli = Cli::parse_from(["meshclip", "serve", "--daemon", "--sync"]);
        assert!(cli.command.wants_daemon());

        let cli = Cli::parse_from(["meshclip", "serve"]);
        assert!(!cli.command.wants_daemon());

        let cli = Cli::parse_from(["meshclip", "status"]);
        assert!(!cli.command.wants_daemon());
    }

    #[test]
    fn peers_flag_parses() {
        let cli = Cli::parse_from(["meshclip", "serve", "--sync", "--peers", "desktop,phone"]);
        match cli.command {
            Commands::Serve { sync, peers, .. } => {
                assert!(sync);
                assert_eq!(peers.as_deref(), Some("desktop,phone"));
            }
            _ => panic!("expected serve"),
        }
    }
}
