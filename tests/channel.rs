//! Control channel against a local operator socket

mod common;

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

use common::{browsing_session, executor, test_config, FakeHost};
use tabrelay::{ChannelState, ControlChannel, RelayConfig};

const WAIT: Duration = Duration::from_secs(5);

type Operator = WebSocketStream<TcpStream>;

async fn listen() -> (TcpListener, RelayConfig) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let config = RelayConfig {
        socket_url: format!("ws://127.0.0.1:{port}/ws"),
        ..test_config()
    };
    (listener, config)
}

async fn accept(listener: &TcpListener) -> Operator {
    let (stream, _) = tokio::time::timeout(WAIT, listener.accept())
        .await
        .expect("relay never connected")
        .unwrap();
    tokio_tungstenite::accept_async(stream).await.unwrap()
}

async fn request(operator: &mut Operator, message: Value) {
    operator
        .send(Message::Text(message.to_string().into()))
        .await
        .unwrap();
}

/// Next text frame from the relay, as JSON
async fn response(operator: &mut Operator) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, operator.next())
            .await
            .expect("no response from relay")
            .expect("relay closed the socket")
            .unwrap();
        if let Message::Text(text) = frame {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn start(host: Arc<FakeHost>) -> (ControlChannel, Operator, TcpListener) {
    let (listener, config) = listen().await;
    let channel = ControlChannel::new(
        Arc::new(config.clone()),
        executor(host, config),
    );
    channel.start();
    let operator = accept(&listener).await;
    (channel, operator, listener)
}

#[tokio::test]
async fn test_list_links_round_trip() {
    let (channel, mut operator, _listener) = start(FakeHost::new(browsing_session())).await;

    request(&mut operator, json!({ "type": "list_links" })).await;
    let reply = response(&mut operator).await;

    assert_eq!(reply["type"], "links_result");
    assert_eq!(reply["ok"], true);
    assert_eq!(
        reply["links"],
        json!([
            { "index": 0, "href": "https://news.example/a", "text": "First story" },
            { "index": 1, "href": "https://news.example/b", "text": "Second story" }
        ])
    );
    assert_eq!(channel.state(), ChannelState::Connected);
    channel.stop();
}

#[tokio::test]
async fn test_click_out_of_range_reports_error() {
    let (channel, mut operator, _listener) = start(FakeHost::new(browsing_session())).await;

    request(&mut operator, json!({ "type": "click_link", "index": 5 })).await;
    let reply = response(&mut operator).await;

    assert_eq!(
        reply,
        json!({ "type": "click_result", "ok": false, "error": "Invalid link index." })
    );
    channel.stop();
}

#[tokio::test]
async fn test_string_index_and_explicit_tab() {
    let host = FakeHost::new(browsing_session());
    let (channel, mut operator, _listener) = start(host.clone()).await;

    request(
        &mut operator,
        json!({ "type": "scroll_link", "tab_id": 1, "index": "1" }),
    )
    .await;
    let reply = response(&mut operator).await;

    assert_eq!(reply["type"], "scroll_result");
    assert_eq!(reply["result"]["href"], "https://news.example/b");
    assert_eq!(*host.scrolled.lock(), vec!["https://news.example/b".to_string()]);
    channel.stop();
}

#[tokio::test]
async fn test_malformed_message_is_dropped() {
    let (channel, mut operator, _listener) = start(FakeHost::new(browsing_session())).await;

    request(&mut operator, json!("not an object")).await;
    operator
        .send(Message::Text(String::from("{ definitely not json").into()))
        .await
        .unwrap();
    request(&mut operator, json!({ "type": "list_tabs" })).await;

    // The first reply is the one for list_tabs; the connection survived
    let reply = response(&mut operator).await;
    assert_eq!(reply["type"], "tabs_result");
    assert_eq!(reply["tabs"].as_array().map(Vec::len), Some(2));
    assert_eq!(reply["tabs"][0]["windowId"], 1);
    channel.stop();
}

#[tokio::test]
async fn test_slow_command_does_not_block_others() {
    let host = FakeHost::new(browsing_session());
    host.set_latency(Duration::from_millis(300));
    let (channel, mut operator, _listener) = start(host).await;

    request(&mut operator, json!({ "type": "capture" })).await;
    request(&mut operator, json!({ "type": "go_back", "tab_id": 2 })).await;

    // go_back runs no probe, so it overtakes the capture
    let first = response(&mut operator).await;
    assert_eq!(first["type"], "back_result");
    assert_eq!(first["error"], "Failed to navigate back.");

    let second = response(&mut operator).await;
    assert_eq!(second["type"], "capture_result");
    assert_eq!(second["payload"]["page"]["text"], "Breaking news body");
    channel.stop();
}

#[tokio::test]
async fn test_reconnects_after_server_close() {
    let (channel, mut operator, listener) = start(FakeHost::new(browsing_session())).await;
    assert_eq!(channel.connection_attempts(), 1);

    operator.close(None).await.unwrap();
    drop(operator);

    // A fresh connection arrives after the reconnect delay
    let mut operator = accept(&listener).await;
    assert!(channel.connection_attempts() >= 2);

    request(&mut operator, json!({ "type": "list_tabs" })).await;
    let reply = response(&mut operator).await;
    assert_eq!(reply["ok"], true);
    channel.stop();
}

#[tokio::test]
async fn test_retries_until_operator_appears() {
    // Reserve a port, then free it so the first attempts are refused
    let (listener, config) = listen().await;
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let channel = ControlChannel::new(
        Arc::new(config.clone()),
        executor(FakeHost::new(browsing_session()), config),
    );
    channel.start();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_ne!(channel.state(), ChannelState::Connected);
    assert!(channel.connection_attempts() >= 2);

    let listener = TcpListener::bind(addr).await.unwrap();
    let _operator = accept(&listener).await;
    channel.stop();
    assert_eq!(channel.state(), ChannelState::Disconnected);
}

#[tokio::test]
async fn test_silent_operator_handshake_times_out() {
    // Accepts TCP but never answers the WebSocket upgrade
    let (listener, mut config) = listen().await;
    config.handshake_timeout = Duration::from_millis(200);
    tokio::spawn(async move {
        let mut held = Vec::new();
        while let Ok((stream, _)) = listener.accept().await {
            held.push(stream);
        }
    });

    let channel = ControlChannel::new(
        Arc::new(config.clone()),
        executor(FakeHost::new(browsing_session()), config),
    );
    channel.start();
    assert_eq!(channel.state(), ChannelState::Connecting);

    tokio::time::timeout(WAIT, async {
        while channel.connection_attempts() < 2 {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .expect("handshake never gave up");
    assert_ne!(channel.state(), ChannelState::Connected);
    channel.stop();
}

#[tokio::test]
async fn test_keepalive_tick_retries_without_close_event() {
    let (listener, mut config) = listen().await;
    drop(listener);
    config.reconnect_delay = Duration::from_secs(60);
    config.keepalive_interval = Duration::from_millis(100);

    let channel = ControlChannel::new(
        Arc::new(config.clone()),
        executor(FakeHost::new(browsing_session()), config),
    );
    channel.start();
    tokio::time::sleep(Duration::from_millis(550)).await;

    // Only the tick can explain attempts beyond the first while the timer waits
    assert!(channel.reconnect_pending());
    assert!(channel.connection_attempts() >= 3);
    channel.stop();
}

#[tokio::test]
async fn test_keepalive_pings_operator() {
    let (listener, mut config) = listen().await;
    config.keepalive_interval = Duration::from_millis(100);
    let channel = ControlChannel::new(
        Arc::new(config.clone()),
        executor(FakeHost::new(browsing_session()), config),
    );
    channel.start();
    let mut operator = accept(&listener).await;

    let ping = tokio::time::timeout(WAIT, async {
        while let Some(frame) = operator.next().await {
            if let Ok(Message::Ping(payload)) = frame {
                return Some(payload);
            }
        }
        None
    })
    .await
    .expect("no keepalive ping");
    assert!(ping.is_some());
    assert_eq!(channel.state(), ChannelState::Connected);
    assert_eq!(channel.connection_attempts(), 1);
    channel.stop();
}
