//! Command Executor
//!
//! One operation per remote command kind. Each resolves its tab, runs the matching
//! probe through the [`TabHost`] port and normalizes the outcome.

use std::sync::Arc;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};

use crate::error::{Error, Result};
use crate::host::{Tab, TabHost, TabId};
use crate::probe::{links_from_value, LinkAction, LinkEntry, PageCapture, Probe};
use crate::tabs::{eligible_tabs, resolve_tab};
use crate::RelayConfig;

/// Document posted to the ingestion endpoint and returned by `capture`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IngestPayload {
    #[serde(serialize_with = "iso8601_millis")]
    pub captured_at: DateTime<Utc>,
    pub source: String,
    pub page: PageCapture,
}

fn iso8601_millis<S: Serializer>(at: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&at.to_rfc3339_opts(SecondsFormat::Millis, true))
}

/// Result of a successful back navigation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BackResult {
    pub ok: bool,
}

/// Runs remote commands against a host browser
pub struct CommandExecutor {
    host: Arc<dyn TabHost>,
    config: Arc<RelayConfig>,
}

impl CommandExecutor {
    /// Create an executor over a host browser
    pub fn new(host: Arc<dyn TabHost>, config: Arc<RelayConfig>) -> Self {
        Self { host, config }
    }

    /// Every http/https tab across all windows
    pub async fn list_tabs(&self) -> Result<Vec<Tab>> {
        eligible_tabs(self.host.as_ref()).await
    }

    /// Clickable links of a tab, numbered in DOM order
    pub async fn list_links(&self, tab_id: Option<TabId>) -> Result<Vec<LinkEntry>> {
        let tab = resolve_tab(self.host.as_ref(), tab_id).await?;
        let probe = Probe::ExtractLinks {
            max_links: self.config.max_links,
        };
        let value = self.run(&tab, &probe, "Failed to extract links.").await?;
        links_from_value(value, self.config.max_links)
    }

    /// Click the link at `index`
    pub async fn click_link(&self, tab_id: Option<TabId>, index: i64) -> Result<LinkAction> {
        let tab = resolve_tab(self.host.as_ref(), tab_id).await?;
        let value = self
            .run(&tab, &Probe::ClickLink { index }, "Failed to click link.")
            .await?;
        LinkAction::from_value(value, "Click failed.")
    }

    /// Scroll the link at `index` into view
    pub async fn scroll_link(&self, tab_id: Option<TabId>, index: i64) -> Result<LinkAction> {
        let tab = resolve_tab(self.host.as_ref(), tab_id).await?;
        let value = self
            .run(&tab, &Probe::ScrollLink { index }, "Failed to scroll to link.")
            .await?;
        LinkAction::from_value(value, "Scroll failed.")
    }

    /// Navigate the tab back one history entry. Runs no probe.
    pub async fn go_back(&self, tab_id: Option<TabId>) -> Result<BackResult> {
        let tab = resolve_tab(self.host.as_ref(), tab_id).await?;
        self.host.go_back(&tab).await.map_err(|e| {
            tracing::warn!("Back navigation failed in tab {}: {}", tab.id, e);
            Error::NavigationFailed("Failed to navigate back.".into())
        })?;
        Ok(BackResult { ok: true })
    }

    /// Capture the page of a tab into an ingest payload
    pub async fn capture(&self, tab_id: Option<TabId>) -> Result<IngestPayload> {
        let tab = resolve_tab(self.host.as_ref(), tab_id).await?;
        let probe = Probe::CapturePage {
            include_html: self.config.include_html,
            max_chars: self.config.max_text_chars,
            max_html_chars: self.config.max_html_chars,
        };
        let value = self
            .run(&tab, &probe, "Failed to capture page content.")
            .await?;
        let page = PageCapture::from_raw(
            value,
            self.config.include_html,
            self.config.max_text_chars,
            self.config.max_html_chars,
        )?;

        Ok(IngestPayload {
            captured_at: Utc::now(),
            source: self.config.source.clone(),
            page,
        })
    }

    /// Execute a probe, hiding host-specific failure detail behind `failure`
    async fn run(&self, tab: &Tab, probe: &Probe, failure: &str) -> Result<serde_json::Value> {
        tracing::debug!("Running probe {} in tab {}", probe.name(), tab.id);
        self.host.execute(tab, probe).await.map_err(|e| {
            tracing::warn!("Probe {} failed in tab {}: {}", probe.name(), tab.id, e);
            Error::ProbeExecutionFailed(failure.to_string())
        })
    }
}
