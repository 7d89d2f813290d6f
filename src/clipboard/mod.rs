//! Clipboard abstraction layer
//!
//! Provides a platform-agnostic async interface over the OS clipboard.
//! The system implementation goes through arboard; an in-memory
//! implementation is provided for tests and headless use.

use std::sync::Mutex;

use async_trait::async_trait;
use thiserror::Error;

/// Clipboard errors
#[derive(Debug, Error)]
pub enum ClipboardError {
    /// The OS clipboard could not be opened or accessed
    #[error("clipboard unavailable: {reason}\n{hint}")]
    Unavailable { reason: String, hint: String },

    /// Read failed
    #[error("failed to read clipboard: {reason}\n{hint}")]
    Read { reason: String, hint: String },

    /// Write failed
    #[error("failed to write clipboard: {reason}\n{hint}")]
    Write { reason: String, hint: String },

    /// The blocking clipboard task was cancelled or panicked
    #[error("clipboard task failed: {0}")]
    Task(String),
}

/// Async access to clipboard text
#[async_trait]
pub trait Clipboard: Send + Sync {
    /// Get current clipboard text. An empty clipboard yields an empty string.
    async fn get_text(&self) -> Result<String, ClipboardError>;

    /// Replace clipboard text
    async fn set_text(&self, text: &str) -> Result<(), ClipboardError>;
}

/// OS clipboard backed by arboard
///
/// arboard is a blocking API, so every call runs on the blocking thread
/// pool with a fresh clipboard handle. Cheap, and avoids holding an X11
/// connection across await points.
pub struct SystemClipboard;

impl SystemClipboard {
    pub fn new() -> Self {
        Self
    }
}

impl Default for SystemClipboard {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Clipboard for SystemClipboard {
    async fn get_text(&self) -> Result<String, ClipboardError> {
        tokio::task::spawn_blocking(|| {
            let mut cb = arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable {
                reason: e.to_string(),
                hint: install_hint(),
            })?;
            match cb.get_text() {
                Ok(text) => Ok(text),
                // An empty clipboard is "nothing to sync", not an error.
                Err(arboard::Error::ContentNotAvailable) => Ok(String::new()),
                Err(e) => Err(ClipboardError::Read {
                    reason: e.to_string(),
                    hint: install_hint(),
                }),
            }
        })
        .await
        .map_err(|e| ClipboardError::Task(e.to_string()))?
    }

    async fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        let text = text.to_owned();
        tokio::task::spawn_blocking(move || {
            let mut cb = arboard::Clipboard::new().map_err(|e| ClipboardError::Unavailable {
                reason: e.to_string(),
                hint: install_hint(),
            })?;
            cb.set_text(text).map_err(|e| ClipboardError::Write {
                reason: e.to_string(),
                hint: install_hint(),
            })
        })
        .await
        .map_err(|e| ClipboardError::Task(e.to_string()))?
    }
}

/// In-memory clipboard for tests and headless environments
#[derive(Default)]
pub struct MemoryClipboard {
    text: Mutex<String>,
}

impl MemoryClipboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Mutex::new(text.into()),
        }
    }
}

#[async_trait]
impl Clipboard for MemoryClipboard {
    async fn get_text(&self) -> Result<String, ClipboardError> {
        Ok(self.text.lock().unwrap().clone())
    }

    async fn set_text(&self, text: &str) -> Result<(), ClipboardError> {
        *self.text.lock().unwrap() = text.to_owned();
        Ok(())
    }
}

/// Platform-specific remediation hint for clipboard failures
fn install_hint() -> String {
    #[cfg(target_os = "linux")]
    {
        "Linux clipboard needs a display server and one of: xclip, xsel, \
         or wl-clipboard (Wayland). Install via your package manager, e.g. \
         `sudo apt install xclip` or `sudo dnf install wl-clipboard`."
            .to_string()
    }

    #[cfg(target_os = "macos")]
    {
        "macOS clipboard access usually works out of the box. If it fails, \
         grant the app accessibility permissions."
            .to_string()
    }

    #[cfg(target_os = "windows")]
    {
        "Windows clipboard uses the system API; run as the logged-in user \
         (not a service) if access fails."
            .to_string()
    }

    #[cfg(not(any(target_os = "linux", target_os = "macos", target_os = "windows")))]
    {
        "Install a clipboard utility for your OS (xclip, xsel, or wl-clipboard).".to_string()
    }
}
