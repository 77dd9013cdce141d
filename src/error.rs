//! Error types for tabrelay
//!
//! Variants that reach the operator over the control channel display exactly the
//! text sent in the `error` field of a response.

use thiserror::Error;

/// Result type for tabrelay operations
pub type Result<T> = std::result::Result<T, Error>;

/// Wire text for an index outside the qualifying link list
pub const INVALID_LINK_INDEX: &str = "Invalid link index.";

/// Wire text for an index that is absent or not numeric
pub const MISSING_LINK_INDEX: &str = "Missing link index.";

/// Error type for tabrelay
#[derive(Debug, Error)]
pub enum Error {
    /// No active tab, or the requested tab id does not exist
    #[error("No active tab found.")]
    NoActiveTab,

    /// The resolved tab is not an http/https page
    #[error("Unsupported tab URL; only http/https pages can be captured.")]
    UnsupportedUrl,

    /// The probe could not be injected or threw inside the page
    #[error("{0}")]
    ProbeExecutionFailed(String),

    /// Link index out of range, non-integer, or missing
    #[error("{0}")]
    InvalidLinkIndex(String),

    /// The probe ran but reported a logical failure
    #[error("{0}")]
    ProbeFailed(String),

    /// Back navigation was rejected by the browser
    #[error("{0}")]
    NavigationFailed(String),

    /// Inbound control message is not JSON or has an unknown `type`
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Ingestion POST failed or returned a non-2xx status
    #[error("Ingestion failed: {0}")]
    TransportFailure(String),

    /// Failed to launch Chrome
    #[error("Failed to launch Chrome: {0}")]
    Launch(String),

    /// Chrome not found
    #[error("Chrome not found")]
    ChromeNotFound,

    /// DevTools connection error
    #[error("DevTools connection error: {context}")]
    Connection {
        context: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// CDP protocol error
    #[error("CDP error in {method}: {message} (code {code})")]
    Cdp {
        method: String,
        code: i64,
        message: String,
    },

    /// JavaScript exception raised by an evaluated expression
    #[error("JavaScript error: {0}")]
    Script(String),

    /// Timeout
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(Box<tokio_tungstenite::tungstenite::Error>),

    /// HTTP error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(Box::new(err))
    }
}

impl Error {
    /// Create a connection error with context
    pub fn connection(context: impl Into<String>) -> Self {
        Self::Connection {
            context: context.into(),
            source: None,
        }
    }

    /// Create a connection error wrapping its cause
    pub fn connection_with(
        context: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            context: context.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a CDP error with full context
    pub fn cdp(method: impl Into<String>, code: i64, message: impl Into<String>) -> Self {
        Self::Cdp {
            method: method.into(),
            code,
            message: message.into(),
        }
    }

    /// The probe's "index out of range" failure
    pub fn invalid_link_index() -> Self {
        Self::InvalidLinkIndex(INVALID_LINK_INDEX.to_string())
    }

    /// The request carried no usable index
    pub fn missing_link_index() -> Self {
        Self::InvalidLinkIndex(MISSING_LINK_INDEX.to_string())
    }

    /// Map a probe-reported failure text onto the matching variant
    pub fn from_probe(message: impl Into<String>) -> Self {
        let message = message.into();
        if message == INVALID_LINK_INDEX {
            Self::InvalidLinkIndex(message)
        } else {
            Self::ProbeFailed(message)
        }
    }

    /// Check whether this error is a precondition failure of the tab resolver
    pub fn is_tab_precondition(&self) -> bool {
        matches!(self, Error::NoActiveTab | Error::UnsupportedUrl)
    }
}
