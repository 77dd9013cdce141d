//! Control Channel
//!
//! Owns the persistent WebSocket to the operator. The channel cycles through
//! `Disconnected -> Connecting -> Connected -> Disconnected`, reconnecting after a
//! fixed delay. At most one reconnect timer is ever pending.
//!
//! Inbound messages are handled concurrently: each one is dispatched on its own
//! task and its response goes back on the connection that delivered it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::executor::CommandExecutor;
use crate::protocol::{coerce_index, reply, Request, Response};
use crate::RelayConfig;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Connection state of the control channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Connected,
}

/// Persistent, self-reconnecting operator connection
pub struct ControlChannel {
    inner: Arc<Inner>,
}

struct Inner {
    config: Arc<RelayConfig>,
    executor: Arc<CommandExecutor>,
    state: Mutex<ChannelState>,
    running: AtomicBool,
    attempts: AtomicU64,
    /// Outbound queue of the live connection
    outbound: Mutex<Option<mpsc::UnboundedSender<Message>>>,
    connection: Mutex<Option<JoinHandle<()>>>,
    reconnect_timer: Mutex<Option<JoinHandle<()>>>,
    keepalive: Mutex<Option<JoinHandle<()>>>,
}

impl ControlChannel {
    /// Create a stopped channel
    pub fn new(config: Arc<RelayConfig>, executor: Arc<CommandExecutor>) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                executor,
                state: Mutex::new(ChannelState::Disconnected),
                running: AtomicBool::new(false),
                attempts: AtomicU64::new(0),
                outbound: Mutex::new(None),
                connection: Mutex::new(None),
                reconnect_timer: Mutex::new(None),
                keepalive: Mutex::new(None),
            }),
        }
    }

    /// Connect and start the keep-alive tick. Must be called inside a Tokio runtime.
    pub fn start(&self) {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return;
        }
        tracing::info!("Control channel starting ({})", self.inner.config.socket_url);

        let inner = Arc::clone(&self.inner);
        let period = self.inner.config.keepalive_interval;
        let handle = tokio::spawn(async move {
            let mut ticker =
                tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                inner.keepalive_tick();
            }
        });
        *self.inner.keepalive.lock() = Some(handle);

        self.inner.connect();
    }

    /// Tear down the connection, timers and keep-alive. No reconnect follows.
    pub fn stop(&self) {
        if !self.inner.running.swap(false, Ordering::SeqCst) {
            return;
        }
        for slot in [
            &self.inner.keepalive,
            &self.inner.reconnect_timer,
            &self.inner.connection,
        ] {
            if let Some(handle) = slot.lock().take() {
                handle.abort();
            }
        }
        self.inner.outbound.lock().take();
        *self.inner.state.lock() = ChannelState::Disconnected;
        tracing::info!("Control channel stopped");
    }

    /// Trigger a connection attempt; skipped while connecting or connected
    pub fn connect(&self) {
        self.inner.connect();
    }

    /// Schedule a reconnect after the configured delay.
    ///
    /// Returns `false` when a timer is already pending or the channel is stopped.
    pub fn schedule_reconnect(&self) -> bool {
        self.inner.schedule_reconnect()
    }

    /// Current connection state
    pub fn state(&self) -> ChannelState {
        *self.inner.state.lock()
    }

    /// Whether a reconnect timer is pending
    pub fn reconnect_pending(&self) -> bool {
        self.inner.reconnect_timer.lock().is_some()
    }

    /// Number of connection attempts made since creation
    pub fn connection_attempts(&self) -> u64 {
        self.inner.attempts.load(Ordering::SeqCst)
    }
}

impl Drop for ControlChannel {
    fn drop(&mut self) {
        self.stop();
    }
}

impl Inner {
    fn connect(self: &Arc<Self>) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        {
            let mut state = self.state.lock();
            if *state != ChannelState::Disconnected {
                tracing::trace!("Connection attempt skipped, state {:?}", *state);
                return;
            }
            *state = ChannelState::Connecting;
        }
        self.attempts.fetch_add(1, Ordering::SeqCst);

        // Spawn and store under the slot lock; stop() clears `running` before
        // taking the slot, so a handle is either aborted by it or never stored.
        let mut slot = self.connection.lock();
        if !self.running.load(Ordering::SeqCst) {
            *self.state.lock() = ChannelState::Disconnected;
            return;
        }
        let inner = Arc::clone(self);
        *slot = Some(tokio::spawn(async move { inner.run_connection().await }));
    }

    fn schedule_reconnect(self: &Arc<Self>) -> bool {
        let mut timer = self.reconnect_timer.lock();
        if timer.is_some() || !self.running.load(Ordering::SeqCst) {
            return false;
        }

        let inner = Arc::clone(self);
        let delay = self.config.reconnect_delay;
        tracing::debug!("Reconnecting in {:?}", delay);
        *timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reconnect_timer.lock().take();
            inner.connect();
        }));
        true
    }

    fn keepalive_tick(self: &Arc<Self>) {
        let outbound = self.outbound.lock().clone();
        match outbound {
            Some(tx) => {
                // A dead peer surfaces as a write error on the connection task
                let _ = tx.send(Message::Ping(Vec::new().into()));
            }
            None => self.connect(),
        }
    }

    async fn run_connection(self: Arc<Self>) {
        let deadline = self.config.handshake_timeout;
        let handshake = tokio_tungstenite::connect_async(self.config.socket_url.as_str());
        match tokio::time::timeout(deadline, handshake).await {
            Ok(Ok((ws, _))) => {
                *self.state.lock() = ChannelState::Connected;
                tracing::info!("WebSocket connected.");
                self.serve(ws).await;
                tracing::warn!("WebSocket disconnected.");
            }
            Ok(Err(e)) => {
                tracing::error!("Failed to open WebSocket: {}", e);
            }
            Err(_) => {
                tracing::error!("WebSocket handshake timed out after {:?}", deadline);
            }
        }

        self.outbound.lock().take();
        *self.state.lock() = ChannelState::Disconnected;
        self.schedule_reconnect();
    }

    async fn serve(self: &Arc<Self>, ws: WsStream) {
        let (mut sink, mut source) = ws.split();
        let (tx, mut rx) = mpsc::unbounded_channel::<Message>();
        *self.outbound.lock() = Some(tx.clone());

        let mut writer = tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                if let Err(e) = sink.send(message).await {
                    tracing::warn!("WebSocket write failed: {}", e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        loop {
            tokio::select! {
                frame = source.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        self.spawn_handler(text.as_str().to_owned(), tx.clone())
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::error!("WebSocket error: {}", e);
                        break;
                    }
                },
                _ = &mut writer => break,
            }
        }

        writer.abort();
    }

    fn spawn_handler(&self, text: String, tx: mpsc::UnboundedSender<Message>) {
        let executor = Arc::clone(&self.executor);
        tokio::spawn(async move {
            let Some(response) = handle_message(&executor, &text).await else {
                return;
            };
            match serde_json::to_string(&response) {
                Ok(json) => {
                    if tx.send(Message::Text(json.into())).is_err() {
                        tracing::debug!("Connection gone, dropping {}", response.kind());
                    }
                }
                Err(e) => tracing::error!("Failed to encode response: {}", e),
            }
        });
    }
}

/// Parse one inbound text frame and run it. Malformed input yields no response.
pub async fn handle_message(executor: &CommandExecutor, text: &str) -> Option<Response> {
    match Request::parse(text) {
        Ok(request) => {
            tracing::debug!("Received {}", request.kind());
            Some(dispatch(executor, request).await)
        }
        Err(e) => {
            tracing::error!("Invalid WebSocket message JSON: {}", e);
            None
        }
    }
}

/// Run a request and wrap its outcome in the matching response kind
pub async fn dispatch(executor: &CommandExecutor, request: Request) -> Response {
    match request {
        Request::ListTabs {} => Response::Tabs(reply(executor.list_tabs().await)),
        Request::ListLinks { tab_id } => Response::Links(reply(executor.list_links(tab_id).await)),
        Request::ClickLink { tab_id, index } => {
            let result = match coerce_index(index.as_ref()) {
                Ok(index) => executor.click_link(tab_id, index).await,
                Err(e) => Err(e),
            };
            Response::Click(reply(result))
        }
        Request::ScrollLink { tab_id, index } => {
            let result = match coerce_index(index.as_ref()) {
                Ok(index) => executor.scroll_link(tab_id, index).await,
                Err(e) => Err(e),
            };
            Response::Scroll(reply(result))
        }
        Request::GoBack { tab_id } => Response::Back(reply(executor.go_back(tab_id).await)),
        Request::Capture { tab_id } => Response::Capture(reply(executor.capture(tab_id).await)),
    }
}
