//! CDP Transport Layer
//!
//! One WebSocket to the browser endpoint. Commands carry an id; a reader task
//! routes each response to the caller waiting on that id. A socket that dies
//! (browser restart, oversized frame) is reopened on the next command.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::types::{CdpRequest, CdpResponse};
use crate::error::{Error, Result};

/// Upper bound on a single command round trip
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Largest DevTools message accepted, well above any bounded page capture
pub const MAX_MESSAGE_SIZE: usize = 256 << 20;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// A pending request waiting for a response
type PendingRequest = oneshot::Sender<Result<Value>>;
type PendingMap = Arc<parking_lot::Mutex<HashMap<u64, PendingRequest>>>;

/// One open socket: its write half, the task reading the other half and the
/// callers waiting on it
struct Link {
    writer: WsSink,
    reader: JoinHandle<()>,
    alive: Arc<AtomicBool>,
    pending: PendingMap,
}

impl Link {
    async fn open(ws_url: &str, max_message_size: usize) -> Result<Self> {
        let config = WebSocketConfig::default()
            .max_message_size(Some(max_message_size))
            .max_frame_size(Some(max_message_size));
        let (stream, _) = tokio_tungstenite::connect_async_with_config(ws_url, Some(config), false)
            .await
            .map_err(|e| Error::connection_with(format!("Failed to connect to {ws_url}"), e))?;
        tracing::debug!("DevTools WebSocket connected to {}", ws_url);

        let (writer, source) = stream.split();
        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(parking_lot::Mutex::new(HashMap::new()));
        let reader = tokio::spawn(reader_loop(source, Arc::clone(&pending), Arc::clone(&alive)));
        Ok(Self {
            writer,
            reader,
            alive,
            pending,
        })
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }
}

/// Route responses to their callers until the socket closes
async fn reader_loop(mut source: WsSource, pending: PendingMap, alive: Arc<AtomicBool>) {
    while let Some(frame) = source.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Close(_)) => {
                tracing::debug!("DevTools WebSocket closed by browser");
                break;
            }
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!("DevTools WebSocket read error: {}", e);
                break;
            }
        };

        let msg: CdpResponse = match serde_json::from_str(text.as_str()) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!("Failed to parse CDP message: {}", e);
                continue;
            }
        };

        // Events are not consumed by the relay
        let Some(id) = msg.id else {
            tracing::trace!("CDP event: {:?}", msg.method);
            continue;
        };

        let result = match msg.error {
            Some(error) => Err(Error::cdp(
                msg.method.as_deref().unwrap_or("unknown"),
                error.code,
                error.message,
            )),
            None => Ok(msg.result.unwrap_or_else(|| json!({}))),
        };

        match pending.lock().remove(&id) {
            Some(sender) => {
                let _ = sender.send(result);
            }
            None => tracing::trace!("Response for unknown id: {}", id),
        }
    }

    // Dead before the waiters fail, so a retry reopens the socket
    alive.store(false, Ordering::SeqCst);
    pending.lock().clear();
    tracing::debug!("CDP reader loop ended");
}

/// CDP Transport - sends commands and receives responses over WebSocket
pub struct Transport {
    ws_url: String,
    max_message_size: usize,
    /// Chrome child process, when we launched it
    child: parking_lot::Mutex<Option<Child>>,
    link: Mutex<Link>,
    closed: AtomicBool,
    next_id: AtomicU64,
}

impl Transport {
    /// Connect to a browser-level DevTools WebSocket URL
    pub async fn connect(ws_url: &str, child: Option<Child>) -> Result<Self> {
        Self::connect_with_limit(ws_url, child, MAX_MESSAGE_SIZE).await
    }

    /// Connect with an explicit cap on incoming message and frame size
    pub async fn connect_with_limit(
        ws_url: &str,
        child: Option<Child>,
        max_message_size: usize,
    ) -> Result<Self> {
        let link = Link::open(ws_url, max_message_size).await?;

        Ok(Self {
            ws_url: ws_url.to_string(),
            max_message_size,
            child: parking_lot::Mutex::new(child),
            link: Mutex::new(link),
            closed: AtomicBool::new(false),
            next_id: AtomicU64::new(1),
        })
    }

    /// Send a browser-level command and wait for the response
    pub async fn send<C, R>(&self, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.send_raw(method, params, None).await
    }

    /// Send a command to a flattened target session
    pub async fn send_to_session<C, R>(&self, session_id: &str, method: &str, params: &C) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        self.send_raw(method, params, Some(session_id)).await
    }

    async fn send_raw<C, R>(&self, method: &str, params: &C, session_id: Option<&str>) -> Result<R>
    where
        C: Serialize,
        R: DeserializeOwned,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(Error::connection("DevTools connection closed"));
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let data = serde_json::to_string(&CdpRequest {
            id,
            method,
            params: serde_json::to_value(params)?,
            session_id,
        })?;

        let (tx, rx) = oneshot::channel();
        let pending = {
            let mut link = self.link.lock().await;
            if !link.is_alive() {
                tracing::warn!("DevTools connection lost, reconnecting to {}", self.ws_url);
                link.reader.abort();
                *link = Link::open(&self.ws_url, self.max_message_size).await?;
            }

            link.pending.lock().insert(id, tx);
            if let Err(e) = link.writer.send(Message::Text(data.into())).await {
                link.pending.lock().remove(&id);
                return Err(Error::connection_with("DevTools write failed", e));
            }
            Arc::clone(&link.pending)
        };
        tracing::trace!("Sent CDP command: {} (id={}, session={:?})", method, id, session_id);

        let result = match tokio::time::timeout(COMMAND_TIMEOUT, rx).await {
            Ok(Ok(result)) => result.map_err(|e| match e {
                Error::Cdp { code, message, .. } => Error::cdp(method, code, message),
                other => other,
            })?,
            Ok(Err(_)) => return Err(Error::connection("Response channel closed")),
            Err(_) => {
                pending.lock().remove(&id);
                return Err(Error::Timeout(format!(
                    "{method} got no response within {COMMAND_TIMEOUT:?}"
                )));
            }
        };

        Ok(serde_json::from_value(result)?)
    }

    /// Close the socket and kill Chrome if we launched it
    pub async fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        {
            let mut link = self.link.lock().await;
            let _ = link.writer.send(Message::Close(None)).await;
            link.reader.abort();
        }

        let child = self.child.lock().take();
        if let Some(mut child) = child {
            let _ = child.kill().await;
        }
        Ok(())
    }

    /// Kill a launched Chrome and wait briefly for it to exit
    pub fn kill_child(&self) {
        let Some(mut child) = self.child.lock().take() else {
            return;
        };
        if let Err(e) = child.start_kill() {
            tracing::debug!("Failed to kill Chrome: {}", e);
            return;
        }
        for _ in 0..50 {
            if !matches!(child.try_wait(), Ok(None)) {
                return;
            }
            std::thread::sleep(Duration::from_millis(10));
        }
        tracing::warn!("Chrome did not exit after kill");
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.link.get_mut().reader.abort();
        self.kill_child();
    }
}

/// Launch Chrome and read its DevTools WebSocket URL from stderr
pub async fn launch_chrome(path: &std::path::Path, args: &[String]) -> Result<(Child, String)> {
    let mut child = Command::new(path)
        .args(args)
        .arg("--remote-debugging-port=0") // Let Chrome pick a free port
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| Error::Launch(e.to_string()))?;

    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| Error::Launch("No stderr from Chrome".into()))?;
    let mut lines = BufReader::new(stderr).lines();

    // Chrome prints: DevTools listening on ws://127.0.0.1:PORT/devtools/browser/GUID
    let ws_url = tokio::time::timeout(COMMAND_TIMEOUT, async {
        while let Ok(Some(line)) = lines.next_line().await {
            tracing::trace!("Chrome stderr: {}", line);
            if let Some(url) = devtools_url_from_line(&line) {
                return Some(url);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
    .ok_or_else(|| Error::Launch("Failed to get DevTools WebSocket URL from Chrome".into()))?;

    tracing::info!("Chrome DevTools URL: {}", ws_url);
    Ok((child, ws_url))
}

fn devtools_url_from_line(line: &str) -> Option<String> {
    if !line.contains("DevTools listening on") {
        return None;
    }
    line.find("ws://").map(|start| line[start..].trim().to_string())
}
