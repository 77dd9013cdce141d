//! In-memory tab host shared by the integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};

use tabrelay::{CommandExecutor, Error, Probe, RelayConfig, Result, Tab, TabHost, TabId};

/// A tab with a scripted document
#[derive(Debug, Clone)]
pub struct FakeTab {
    pub id: TabId,
    pub window_id: i64,
    pub url: String,
    pub title: String,
    pub text: String,
    pub html: String,
    pub active: bool,
    /// `(href, text)` pairs in DOM order, unfiltered
    pub anchors: Vec<(String, String)>,
    /// Earlier URLs, oldest first
    pub history: Vec<String>,
}

impl FakeTab {
    pub fn new(id: TabId, url: &str) -> Self {
        Self {
            id,
            window_id: 1,
            url: url.to_string(),
            title: format!("Tab {id}"),
            text: String::new(),
            html: "<html><body></body></html>".to_string(),
            active: false,
            anchors: Vec::new(),
            history: Vec::new(),
        }
    }

    pub fn active(mut self) -> Self {
        self.active = true;
        self
    }

    pub fn title(mut self, title: &str) -> Self {
        self.title = title.to_string();
        self
    }

    pub fn text(mut self, text: &str) -> Self {
        self.text = text.to_string();
        self
    }

    pub fn anchor(mut self, href: &str, text: &str) -> Self {
        self.anchors.push((href.to_string(), text.to_string()));
        self
    }

    pub fn visited(mut self, url: &str) -> Self {
        self.history.push(url.to_string());
        self
    }

    fn tab(&self) -> Tab {
        Tab {
            id: self.id,
            title: self.title.clone(),
            url: self.url.clone(),
            window_id: self.window_id,
            active: self.active,
        }
    }

    fn qualifying(&self) -> Vec<&(String, String)> {
        self.anchors
            .iter()
            .filter(|(href, _)| href.starts_with("http://") || href.starts_with("https://"))
            .collect()
    }
}

/// Host whose tabs live in memory and whose probes are evaluated in Rust
#[derive(Default)]
pub struct FakeHost {
    tabs: Mutex<Vec<FakeTab>>,
    failing: AtomicBool,
    /// Delay applied to every probe
    latency: Mutex<Option<Duration>>,
    pub clicked: Mutex<Vec<String>>,
    pub scrolled: Mutex<Vec<String>>,
}

impl FakeHost {
    pub fn new(tabs: Vec<FakeTab>) -> Arc<Self> {
        Arc::new(Self {
            tabs: Mutex::new(tabs),
            ..Default::default()
        })
    }

    /// Make every probe fail as if injection were refused
    pub fn fail_probes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    pub fn url_of(&self, id: TabId) -> Option<String> {
        self.tabs
            .lock()
            .iter()
            .find(|tab| tab.id == id)
            .map(|tab| tab.url.clone())
    }

    fn find(&self, id: TabId) -> Result<FakeTab> {
        self.tabs
            .lock()
            .iter()
            .find(|tab| tab.id == id)
            .cloned()
            .ok_or(Error::NoActiveTab)
    }

    fn act(&self, tab: &FakeTab, index: i64, log: &Mutex<Vec<String>>) -> Value {
        let links = tab.qualifying();
        match usize::try_from(index).ok().and_then(|i| links.get(i)) {
            Some((href, _)) => {
                log.lock().push(href.clone());
                json!({ "ok": true, "href": href, "index": index })
            }
            None => json!({ "ok": false, "error": "Invalid link index." }),
        }
    }
}

#[async_trait]
impl TabHost for FakeHost {
    async fn query_tabs(&self) -> Result<Vec<Tab>> {
        Ok(self.tabs.lock().iter().map(FakeTab::tab).collect())
    }

    async fn execute(&self, tab: &Tab, probe: &Probe) -> Result<Value> {
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(Error::Script("Cannot access contents of the page".into()));
        }

        let page = self.find(tab.id)?;
        let value = match *probe {
            Probe::CapturePage { include_html, .. } => {
                let mut value = json!({ "title": page.title, "url": page.url, "text": page.text });
                if include_html {
                    value["html"] = json!(page.html);
                }
                value
            }
            Probe::ExtractLinks { .. } => Value::Array(
                page.anchors
                    .iter()
                    .map(|(href, text)| json!({ "href": href, "text": text }))
                    .collect(),
            ),
            Probe::ClickLink { index } => self.act(&page, index, &self.clicked),
            Probe::ScrollLink { index } => self.act(&page, index, &self.scrolled),
        };
        Ok(value)
    }

    async fn go_back(&self, tab: &Tab) -> Result<()> {
        let mut tabs = self.tabs.lock();
        let page = tabs
            .iter_mut()
            .find(|t| t.id == tab.id)
            .ok_or(Error::NoActiveTab)?;
        match page.history.pop() {
            Some(previous) => {
                page.url = previous;
                Ok(())
            }
            None => Err(Error::NavigationFailed("No previous history entry".into())),
        }
    }
}

/// Config for tests: short reconnect delay, keepalive out of the way
pub fn test_config() -> RelayConfig {
    RelayConfig {
        reconnect_delay: Duration::from_millis(100),
        keepalive_interval: Duration::from_secs(3600),
        ..Default::default()
    }
}

pub fn executor(host: Arc<FakeHost>, config: RelayConfig) -> Arc<CommandExecutor> {
    Arc::new(CommandExecutor::new(host, Arc::new(config)))
}

/// Two windows: an active article, a background docs page and a settings tab
pub fn browsing_session() -> Vec<FakeTab> {
    vec![
        FakeTab::new(1, "https://news.example/article")
            .title("Article")
            .text("Breaking news body")
            .active()
            .anchor("https://news.example/a", "  First story ")
            .anchor("javascript:void(0)", "Share")
            .anchor("https://news.example/b", "Second story")
            .anchor("mailto:desk@news.example", "Contact")
            .visited("https://news.example/"),
        FakeTab::new(2, "http://docs.example/guide").title("Guide"),
        FakeTab {
            window_id: 2,
            ..FakeTab::new(3, "chrome://settings/")
        },
    ]
}
