//! Tab Resolver
//!
//! Every per-tab command goes through [`resolve_tab`] before touching the page, so
//! the "tab exists" and "tab is http/https" checks hold for every entry point.

use crate::error::{Error, Result};
use crate::host::{Tab, TabHost, TabId};
use crate::probe::is_http_url;

/// Resolve an optional explicit id to an eligible tab.
///
/// `None` selects the active tab of the current window.
pub async fn resolve_tab(host: &dyn TabHost, explicit_id: Option<TabId>) -> Result<Tab> {
    let tab = match explicit_id {
        Some(id) => host.get_tab(id).await?,
        None => host.active_tab().await?,
    };

    let tab = tab.ok_or(Error::NoActiveTab)?;
    if !is_http_url(&tab.url) {
        tracing::debug!("Tab {} rejected, unsupported URL {}", tab.id, tab.url);
        return Err(Error::UnsupportedUrl);
    }
    Ok(tab)
}

/// Tabs eligible for remote control, in host order
pub async fn eligible_tabs(host: &dyn TabHost) -> Result<Vec<Tab>> {
    Ok(host
        .query_tabs()
        .await?
        .into_iter()
        .filter(|tab| is_http_url(&tab.url))
        .collect())
}
