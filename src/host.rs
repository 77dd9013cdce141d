//! Host browser port
//!
//! The command executor never talks to a browser directly. It goes through
//! [`TabHost`], which the CDP-backed [`Browser`](crate::Browser) implements and
//! tests replace with an in-memory fake.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::probe::Probe;

/// Integer tab identifier exposed on the wire
pub type TabId = i64;

/// A browser tab as seen by the operator. Queried on demand, never cached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tab {
    pub id: TabId,
    pub title: String,
    pub url: String,
    #[serde(rename = "windowId")]
    pub window_id: i64,
    pub active: bool,
}

/// Access to the tabs of a host browser
#[async_trait]
pub trait TabHost: Send + Sync {
    /// All tabs, unfiltered, in host enumeration order
    async fn query_tabs(&self) -> Result<Vec<Tab>>;

    /// The active tab of the current window, if any
    async fn active_tab(&self) -> Result<Option<Tab>> {
        Ok(self.query_tabs().await?.into_iter().find(|tab| tab.active))
    }

    /// Look up a tab by id
    async fn get_tab(&self, id: TabId) -> Result<Option<Tab>> {
        Ok(self.query_tabs().await?.into_iter().find(|tab| tab.id == id))
    }

    /// Evaluate a probe inside the tab's document and return its JSON result
    async fn execute(&self, tab: &Tab, probe: &Probe) -> Result<Value>;

    /// Navigate the tab one entry back in its history
    async fn go_back(&self, tab: &Tab) -> Result<()>;
}
