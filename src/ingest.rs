//! Ingestion Sender
//!
//! Posts captured pages to the external ingestion endpoint. Failures are logged
//! and reported as `false`; nothing here retries or propagates.

use crate::error::{Error, Result};
use crate::executor::{CommandExecutor, IngestPayload};
use crate::host::TabId;
use crate::RelayConfig;

/// HTTP client for the ingestion endpoint
#[derive(Debug, Clone)]
pub struct IngestionSender {
    client: reqwest::Client,
    url: String,
}

impl IngestionSender {
    /// Create a sender for the configured ingestion URL
    pub fn new(config: &RelayConfig) -> Self {
        Self::with_url(config.ingest_url.clone())
    }

    /// Create a sender for an explicit URL
    pub fn with_url(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    /// Get the endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// POST the payload as JSON; any non-2xx status is a [`Error::TransportFailure`]
    pub async fn try_post(&self, payload: &IngestPayload) -> Result<()> {
        let response = self
            .client
            .post(&self.url)
            .json(payload)
            .send()
            .await
            .map_err(|e| Error::TransportFailure(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TransportFailure(format!(
                "POST failed with status {}.",
                status.as_u16()
            )));
        }
        Ok(())
    }

    /// POST the payload, logging the outcome
    pub async fn post(&self, payload: &IngestPayload) -> bool {
        match self.try_post(payload).await {
            Ok(()) => {
                tracing::info!("Page sent successfully.");
                true
            }
            Err(e) => {
                tracing::error!("Failed to send page content: {}", e);
                false
            }
        }
    }

    /// Capture a tab (active tab when `tab_id` is `None`) and send it.
    ///
    /// Goes through the same tab checks as the control channel.
    pub async fn send_tab(&self, executor: &CommandExecutor, tab_id: Option<TabId>) -> bool {
        match executor.capture(tab_id).await {
            Ok(payload) => self.post(&payload).await,
            Err(e) if e.is_tab_precondition() => {
                tracing::warn!("Nothing to send: {}", e);
                false
            }
            Err(e) => {
                tracing::error!("{}", e);
                false
            }
        }
    }
}
