//! # Tabrelay
//!
//! Drive browser tabs from a remote operator.
//!
//! Tabrelay keeps a persistent WebSocket open to a controller, executes the
//! commands it sends against Chrome tabs (list tabs, list links, click or
//! scroll to a link, go back, capture page content) and replies on the same
//! socket. Captured pages can also be pushed to an HTTP ingestion endpoint.
//!
//! ## Features
//!
//! - **Self-healing channel** - one pending reconnect at a time, keepalive pings
//! - **Pluggable host** - any [`TabHost`] works; [`Browser`] drives Chrome over CDP
//! - **Bounded captures** - text truncated by characters, link lists capped
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tabrelay::{Browser, CommandExecutor, ControlChannel, RelayConfig};
//!
//! #[tokio::main]
//! async fn main() -> tabrelay::Result<()> {
//!     // Attach to a Chrome started with --remote-debugging-port=9222
//!     let browser = Arc::new(Browser::connect("http://127.0.0.1:9222").await?);
//!
//!     let config = Arc::new(RelayConfig::default());
//!     let executor = Arc::new(CommandExecutor::new(browser, config.clone()));
//!
//!     let channel = ControlChannel::new(config, executor);
//!     channel.start();
//!
//!     tokio::signal::ctrl_c().await?;
//!     channel.stop();
//!     Ok(())
//! }
//! ```
//!
//! ## Configuration
//!
//! ```rust
//! use std::time::Duration;
//! use tabrelay::RelayConfig;
//!
//! let config = RelayConfig {
//!     socket_url: "ws://relay.internal:4587/ws".into(),
//!     include_html: true,
//!     reconnect_delay: Duration::from_secs(5),
//!     ..Default::default()
//! };
//! assert_eq!(config.max_links, 5000);
//! ```

use std::path::PathBuf;
use std::time::Duration;

pub mod browser;
pub mod cdp;
pub mod channel;
pub mod error;
pub mod executor;
pub mod host;
pub mod ingest;
pub mod probe;
pub mod protocol;
pub mod tabs;

// Re-exports
pub use browser::Browser;
pub use channel::{ChannelState, ControlChannel};
pub use error::{Error, Result};
pub use executor::{BackResult, CommandExecutor, IngestPayload};
pub use host::{Tab, TabHost, TabId};
pub use ingest::IngestionSender;
pub use probe::{LinkAction, LinkEntry, PageCapture, Probe};
pub use protocol::{Request, Response};

/// Default ingestion endpoint
pub const DEFAULT_INGEST_URL: &str = "http://localhost:4587/ingest";
/// Default control channel endpoint
pub const DEFAULT_SOCKET_URL: &str = "ws://localhost:4587/ws";
/// Default `source` label on ingestion payloads
pub const DEFAULT_SOURCE: &str = "chrome-page-sender";

/// Relay configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// HTTP endpoint receiving captured pages
    pub ingest_url: String,
    /// WebSocket endpoint of the controller
    pub socket_url: String,
    /// Include the serialized document in captures
    pub include_html: bool,
    /// Max characters of visible text (0 = unlimited)
    pub max_text_chars: usize,
    /// Max characters of serialized document when `include_html` is set (0 = unlimited)
    pub max_html_chars: usize,
    /// Max links returned by `list_links` (0 = unlimited)
    pub max_links: usize,
    /// Delay before a reconnect attempt
    pub reconnect_delay: Duration,
    /// Deadline for the WebSocket opening handshake
    pub handshake_timeout: Duration,
    /// Interval of the keepalive tick
    pub keepalive_interval: Duration,
    /// Value of `source` on ingestion payloads
    pub source: String,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            ingest_url: DEFAULT_INGEST_URL.to_string(),
            socket_url: DEFAULT_SOCKET_URL.to_string(),
            include_html: false,
            max_text_chars: 200_000,
            max_html_chars: 2_000_000,
            max_links: 5000,
            reconnect_delay: Duration::from_secs(3),
            handshake_timeout: Duration::from_secs(10),
            keepalive_interval: Duration::from_secs(60),
            source: DEFAULT_SOURCE.to_string(),
        }
    }
}

/// How to start a local Chrome
#[derive(Debug, Clone, Default)]
pub struct LaunchConfig {
    /// Path to Chrome/Chromium binary (None = search the usual locations)
    pub chrome_path: Option<PathBuf>,
    /// Headless mode
    pub headless: bool,
}
