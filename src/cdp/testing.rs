//! In-process DevTools endpoint for unit tests

use std::sync::Arc;

use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

/// Maps a request to its `result`, or `None` to leave it unanswered
pub type Handler = Arc<dyn Fn(&Value) -> Option<Value> + Send + Sync>;

/// Fake browser endpoint accepting any number of sockets
pub struct FakeDevTools {
    pub ws_url: String,
    requests: Arc<Mutex<Vec<Value>>>,
}

impl FakeDevTools {
    pub async fn start(handler: impl Fn(&Value) -> Option<Value> + Send + Sync + 'static) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let ws_url = format!("ws://{}/devtools/browser/fake", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let handler: Handler = Arc::new(handler);

        let log = Arc::clone(&requests);
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let handler = Arc::clone(&handler);
                let log = Arc::clone(&log);
                tokio::spawn(async move {
                    let Ok(ws) = tokio_tungstenite::accept_async(stream).await else {
                        return;
                    };
                    let (mut sink, mut source) = ws.split();
                    while let Some(Ok(msg)) = source.next().await {
                        let Message::Text(text) = msg else { continue };
                        let request: Value = serde_json::from_str(text.as_str()).unwrap();
                        log.lock().push(request.clone());
                        if let Some(result) = handler(&request) {
                            let reply = json!({ "id": request["id"], "result": result });
                            if sink.send(Message::Text(reply.to_string().into())).await.is_err() {
                                return;
                            }
                        }
                    }
                });
            }
        });

        Self { ws_url, requests }
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<Value> {
        self.requests.lock().clone()
    }

    /// Received requests with the given method
    pub fn calls(&self, method: &str) -> Vec<Value> {
        self.requests()
            .into_iter()
            .filter(|r| r["method"] == method)
            .collect()
    }
}
