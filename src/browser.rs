//! Browser Host
//!
//! Connects to Chrome over CDP, either an already running instance with remote
//! debugging enabled or one launched locally, and exposes its page targets
//! through [`TabHost`].

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use parking_lot::Mutex;
use serde_json::Value;

use crate::cdp::types::DevToolsVersion;
use crate::cdp::{launch_chrome, Connection, Session, TargetInfo, Transport};
use crate::error::{Error, Result};
use crate::host::{Tab, TabHost, TabId};
use crate::probe::Probe;
use crate::LaunchConfig;

/// Window id reported when the browser cannot place a target in a window
pub const WINDOW_ID_NONE: i64 = -1;

/// Budget for reading one tab's visibility. A page blocked in a dialog never
/// answers, so it counts as hidden once this elapses.
pub const VISIBILITY_TIMEOUT: Duration = Duration::from_secs(2);

const VISIBILITY_CHECK: &str = r#"document.visibilityState === "visible""#;

/// Find a Chrome binary in the usual install locations
pub fn find_chrome() -> Result<PathBuf> {
    let candidates: &[&str] = if cfg!(target_os = "macos") {
        &[
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
        ]
    } else if cfg!(target_os = "linux") {
        &[
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
        ]
    } else if cfg!(target_os = "windows") {
        &[
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
        ]
    } else {
        &[]
    };

    candidates
        .iter()
        .map(Path::new)
        .find(|path| path.exists())
        .map(Path::to_path_buf)
        .ok_or(Error::ChromeNotFound)
}

fn launch_args(config: &LaunchConfig, user_data_dir: &Path) -> Vec<String> {
    let mut args = vec![
        "--no-first-run".to_string(),
        "--no-default-browser-check".to_string(),
        "--disable-default-apps".to_string(),
        "--disable-popup-blocking".to_string(),
        format!("--user-data-dir={}", user_data_dir.display()),
    ];
    if config.headless {
        args.push("--headless=new".into());
    }
    args
}

/// Stable integer ids for CDP target ids, assigned on first sight
#[derive(Debug, Default)]
struct TabIds {
    next: TabId,
    by_target: HashMap<String, TabId>,
    by_id: HashMap<TabId, String>,
}

impl TabIds {
    fn id_for(&mut self, target_id: &str) -> TabId {
        if let Some(id) = self.by_target.get(target_id) {
            return *id;
        }
        self.next += 1;
        self.by_target.insert(target_id.to_string(), self.next);
        self.by_id.insert(self.next, target_id.to_string());
        self.next
    }

    fn target_for(&self, id: TabId) -> Option<&str> {
        self.by_id.get(&id).map(String::as_str)
    }

    /// Forget targets that no longer exist
    fn retain(&mut self, live: &[TargetInfo]) {
        self.by_target
            .retain(|target_id, _| live.iter().any(|t| &t.target_id == target_id));
        let by_target = &self.by_target;
        self.by_id.retain(|_, target_id| by_target.contains_key(target_id));
    }
}

/// A Chrome instance driven over CDP
pub struct Browser {
    connection: Connection,
    tab_ids: Mutex<TabIds>,
    /// Temporary profile of a launched browser (removed on close)
    user_data_dir: Option<PathBuf>,
    visibility_timeout: Duration,
}

impl Browser {
    /// Connect to a running Chrome through its DevTools HTTP endpoint,
    /// e.g. `http://127.0.0.1:9222`
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let version_url = format!("{}/json/version", endpoint.trim_end_matches('/'));
        tracing::debug!("Fetching DevTools version from {}", version_url);

        let version: DevToolsVersion = reqwest::get(&version_url)
            .await
            .map_err(|e| Error::connection_with(format!("DevTools endpoint {endpoint}"), e))?
            .json()
            .await?;
        tracing::info!("Found browser: {}", version.browser);

        let transport = Transport::connect(&version.web_socket_debugger_url, None).await?;
        Ok(Self::from_transport(transport, None))
    }

    /// Launch a local Chrome with a throwaway profile
    pub async fn launch(config: &LaunchConfig) -> Result<Self> {
        let chrome_path = match &config.chrome_path {
            Some(path) => path.clone(),
            None => find_chrome()?,
        };
        let user_data_dir =
            std::env::temp_dir().join(format!("tabrelay-profile-{}", std::process::id()));
        let _ = std::fs::remove_dir_all(&user_data_dir);
        std::fs::create_dir_all(&user_data_dir)?;

        tracing::info!("Launching Chrome from {:?}", chrome_path);
        let (child, ws_url) = launch_chrome(&chrome_path, &launch_args(config, &user_data_dir)).await?;
        let transport = Transport::connect(&ws_url, Some(child)).await?;
        let browser = Self::from_transport(transport, Some(user_data_dir));

        let version = browser.connection.version().await?;
        tracing::info!("Connected to Chrome: {}", version.product);
        Ok(browser)
    }

    fn from_transport(transport: Transport, user_data_dir: Option<PathBuf>) -> Self {
        Self {
            connection: Connection::new(transport),
            tab_ids: Mutex::new(TabIds::default()),
            user_data_dir,
            visibility_timeout: VISIBILITY_TIMEOUT,
        }
    }

    /// Override how long a tab may take to report its visibility
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Get the browser version
    pub async fn version(&self) -> Result<String> {
        Ok(self.connection.version().await?.product)
    }

    /// Open a new tab at `url`
    pub async fn open_tab(&self, url: &str) -> Result<TabId> {
        let target_id = self.connection.create_target(url).await?;
        Ok(self.tab_ids.lock().id_for(&target_id))
    }

    /// Close the browser connection, and the browser itself if we launched it
    pub async fn close(&self) -> Result<()> {
        if self.user_data_dir.is_some() {
            self.connection.close().await?;
        }
        Ok(())
    }

    async fn page_targets(&self) -> Result<Vec<TargetInfo>> {
        let targets: Vec<TargetInfo> = self
            .connection
            .get_targets()
            .await?
            .into_iter()
            .filter(|t| t.r#type == "page")
            .collect();
        let mut ids = self.tab_ids.lock();
        ids.retain(&targets);
        for target in &targets {
            ids.id_for(&target.target_id);
        }
        drop(ids);
        Ok(targets)
    }

    /// Whether the target's document is visible, within the visibility budget
    async fn is_visible(&self, target_id: &str) -> bool {
        let session = match self.connection.attach_to_target(target_id).await {
            Ok(session) => session,
            Err(e) => {
                tracing::debug!("Attach to {} failed: {}", target_id, e);
                return false;
            }
        };
        let check = tokio::time::timeout(
            self.visibility_timeout,
            session.evaluate(VISIBILITY_CHECK, false),
        )
        .await;
        release(session).await;

        match check {
            Ok(Ok(value)) => value.as_bool().unwrap_or(false),
            Ok(Err(e)) => {
                tracing::debug!("Visibility check failed for {}: {}", target_id, e);
                false
            }
            Err(_) => {
                tracing::debug!(
                    "Visibility check for {} timed out after {:?}",
                    target_id,
                    self.visibility_timeout
                );
                false
            }
        }
    }

    async fn tab_from_target(&self, target: TargetInfo, active: bool) -> Tab {
        let window_id = self
            .connection
            .window_for_target(&target.target_id)
            .await
            .unwrap_or(WINDOW_ID_NONE);

        Tab {
            id: self.tab_ids.lock().id_for(&target.target_id),
            title: target.title,
            url: target.url,
            window_id,
            active,
        }
    }

    fn target_id(&self, tab: &Tab) -> Result<String> {
        self.tab_ids
            .lock()
            .target_for(tab.id)
            .map(String::from)
            .ok_or(Error::NoActiveTab)
    }

    async fn evaluate_in(&self, target_id: &str, probe: &Probe) -> Result<Value> {
        let session = self.connection.attach_to_target(target_id).await?;
        let result = session
            .evaluate(&probe.expression(), probe.is_user_action())
            .await;
        release(session).await;
        result
    }
}

/// Detach a per-call session; the call's own outcome wins over detach errors
async fn release(session: Session) {
    let target_id = session.target_id().to_string();
    if let Err(e) = session.detach().await {
        tracing::debug!("Detach from {} failed: {}", target_id, e);
    }
}

impl Drop for Browser {
    fn drop(&mut self) {
        // Chrome keeps writing its profile until it exits
        self.connection.kill_browser();
        if let Some(dir) = &self.user_data_dir {
            let _ = std::fs::remove_dir_all(dir);
        }
    }
}

#[async_trait]
impl TabHost for Browser {
    async fn query_tabs(&self) -> Result<Vec<Tab>> {
        let targets = self.page_targets().await?;
        let tabs = join_all(targets.into_iter().map(|target| async move {
            let active = self.is_visible(&target.target_id).await;
            self.tab_from_target(target, active).await
        }))
        .await;
        Ok(tabs)
    }

    async fn active_tab(&self) -> Result<Option<Tab>> {
        for target in self.page_targets().await? {
            if self.is_visible(&target.target_id).await {
                return Ok(Some(self.tab_from_target(target, true).await));
            }
        }
        Ok(None)
    }

    async fn get_tab(&self, id: TabId) -> Result<Option<Tab>> {
        let targets = self.page_targets().await?;
        let target_id = self.tab_ids.lock().target_for(id).map(String::from);
        let target = target_id.and_then(|tid| targets.into_iter().find(|t| t.target_id == tid));
        match target {
            Some(target) => {
                let active = self.is_visible(&target.target_id).await;
                Ok(Some(self.tab_from_target(target, active).await))
            }
            None => Ok(None),
        }
    }

    async fn execute(&self, tab: &Tab, probe: &Probe) -> Result<Value> {
        let target_id = self.target_id(tab)?;
        self.evaluate_in(&target_id, probe).await
    }

    async fn go_back(&self, tab: &Tab) -> Result<()> {
        let target_id = self.target_id(tab)?;
        let session = self.connection.attach_to_target(&target_id).await?;
        let result = session.go_back().await;
        release(session).await;
        result
    }
}
