//! # MeshClip
//!
//! Clipboard and file sharing between machines on a private mesh network.
//!
//! MeshClip exposes a small HTTP API on every node (clipboard push/pull,
//! bounded clipboard history, file drops, text messages) and an optional
//! background sync engine that polls the local clipboard and broadcasts
//! changes to the other devices on the tailnet.

pub mod clipboard;
pub mod cli;
pub mod config;
#[cfg(unix)]
pub mod daemon;
pub mod discovery;
pub mod files;
pub mod history;
pub mod server;
pub mod sync;

pub use config::Config;

/// Result type alias for MeshClip operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for MeshClip operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Clipboard operation error
    #[error("Clipboard error: {0}")]
    Clipboard(#[from] clipboard::ClipboardError),

    /// Peer discovery error
    #[error("Discovery error: {0}")]
    Discovery(#[from] discovery::DiscoveryError),

    /// File storage error
    #[error("Storage error: {0}")]
    Storage(#[from] files::StorageError),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default port for the peer-facing HTTP service
pub const DEFAULT_PORT: u16 = 8315;

/// Number of clipboard history entries kept per node
pub const HISTORY_CAPACITY: usize = 50;
