//! Browser connection and per-tab sessions
//!
//! Browser-level commands on [`Connection`], per-tab commands on [`Session`].

use std::sync::Arc;

use super::transport::Transport;
use super::types::*;
use crate::error::{Error, Result};

/// Browser-level handle over one DevTools socket
pub struct Connection {
    transport: Arc<Transport>,
}

impl Connection {
    /// Wrap a connected transport
    pub fn new(transport: Transport) -> Self {
        Self {
            transport: Arc::new(transport),
        }
    }

    /// Product and user agent of the browser
    pub async fn version(&self) -> Result<BrowserGetVersionResult> {
        self.transport
            .send("Browser.getVersion", &BrowserGetVersion {})
            .await
    }

    /// Get all targets
    pub async fn get_targets(&self) -> Result<Vec<TargetInfo>> {
        let result: TargetGetTargetsResult = self
            .transport
            .send("Target.getTargets", &TargetGetTargets {})
            .await?;
        Ok(result.target_infos)
    }

    /// Create a new page target
    pub async fn create_target(&self, url: &str) -> Result<String> {
        let result: TargetCreateTargetResult = self
            .transport
            .send(
                "Target.createTarget",
                &TargetCreateTarget {
                    url: url.to_string(),
                },
            )
            .await?;
        Ok(result.target_id)
    }

    /// Window containing a target
    pub async fn window_for_target(&self, target_id: &str) -> Result<i64> {
        let result: BrowserGetWindowForTargetResult = self
            .transport
            .send(
                "Browser.getWindowForTarget",
                &BrowserGetWindowForTarget {
                    target_id: target_id.to_string(),
                },
            )
            .await?;
        Ok(result.window_id)
    }

    /// Attach to a target and get a flattened session
    pub async fn attach_to_target(&self, target_id: &str) -> Result<Session> {
        let result: TargetAttachToTargetResult = self
            .transport
            .send(
                "Target.attachToTarget",
                &TargetAttachToTarget {
                    target_id: target_id.to_string(),
                    flatten: Some(true),
                },
            )
            .await?;

        Ok(Session {
            transport: Arc::clone(&self.transport),
            session_id: result.session_id,
            target_id: target_id.to_string(),
        })
    }

    /// Ask Chrome to exit, then drop the socket
    pub async fn close(&self) -> Result<()> {
        let _ = self
            .transport
            .send::<_, serde_json::Value>("Browser.close", &BrowserClose {})
            .await;
        self.transport.close().await
    }

    /// Kill a browser we launched, without going through the socket
    pub fn kill_browser(&self) {
        self.transport.kill_child();
    }
}

/// A flattened session on one page target, alive for a single relay call
pub struct Session {
    transport: Arc<Transport>,
    session_id: String,
    target_id: String,
}

impl Session {
    /// CDP target id of the page
    pub fn target_id(&self) -> &str {
        &self.target_id
    }

    /// Send a command scoped to this target
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: serde::Serialize,
        R: serde::de::DeserializeOwned,
    {
        self.transport
            .send_to_session(&self.session_id, method, params)
            .await
    }

    /// Evaluate an expression by value. With `user_gesture` the page treats the
    /// call as a user action (activation-gated APIs, focus).
    ///
    /// A thrown exception becomes [`Error::Script`].
    pub async fn evaluate(&self, expression: &str, user_gesture: bool) -> Result<serde_json::Value> {
        let result: RuntimeEvaluateResult = self
            .send(
                "Runtime.evaluate",
                &RuntimeEvaluate {
                    expression: expression.to_string(),
                    return_by_value: Some(true),
                    await_promise: Some(false),
                    user_gesture: user_gesture.then_some(true),
                },
            )
            .await?;

        if let Some(exception) = result.exception_details {
            return Err(Error::Script(exception.message()));
        }
        Ok(result.result.value.unwrap_or(serde_json::Value::Null))
    }

    /// Go back one entry in the session's history.
    ///
    /// Fails with [`Error::NavigationFailed`] at the start of history.
    pub async fn go_back(&self) -> Result<()> {
        let history: PageGetNavigationHistoryResult = self
            .send("Page.getNavigationHistory", &PageGetNavigationHistory {})
            .await?;
        if history.current_index <= 0 {
            return Err(Error::NavigationFailed("No previous history entry".into()));
        }
        let entry = history
            .entries
            .get(history.current_index as usize - 1)
            .ok_or_else(|| Error::NavigationFailed("History entry out of range".into()))?;
        self.send::<_, serde_json::Value>(
            "Page.navigateToHistoryEntry",
            &PageNavigateToHistoryEntry { entry_id: entry.id },
        )
        .await?;
        Ok(())
    }

    /// Detach from the target
    pub async fn detach(self) -> Result<()> {
        self.transport
            .send::<_, serde_json::Value>(
                "Target.detachFromTarget",
                &TargetDetachFromTarget {
                    session_id: self.session_id.clone(),
                },
            )
            .await?;
        Ok(())
    }
}
