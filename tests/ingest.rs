//! Ingestion sender against a mock endpoint

mod common;

use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{browsing_session, executor, test_config, FakeHost};
use tabrelay::{Error, IngestionSender, RelayConfig};

fn config_for(server: &MockServer) -> RelayConfig {
    RelayConfig {
        ingest_url: format!("{}/ingest", server.uri()),
        ..test_config()
    }
}

#[tokio::test]
async fn test_send_active_tab() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .and(header("content-type", "application/json"))
        .and(body_partial_json(json!({
            "source": "chrome-page-sender",
            "page": {
                "title": "Article",
                "url": "https://news.example/article",
                "text": "Breaking news body"
            }
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let sender = IngestionSender::new(&config);
    let exec = executor(FakeHost::new(browsing_session()), config);

    assert!(sender.send_tab(&exec, None).await);
}

#[tokio::test]
async fn test_server_error_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/ingest"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let config = config_for(&server);
    let sender = IngestionSender::new(&config);
    let exec = executor(FakeHost::new(browsing_session()), config);

    let payload = exec.capture(None).await.unwrap();
    match sender.try_post(&payload).await {
        Err(Error::TransportFailure(msg)) => assert_eq!(msg, "POST failed with status 500."),
        other => panic!("unexpected result: {other:?}"),
    }
    assert!(!sender.post(&payload).await);
}

#[tokio::test]
async fn test_unreachable_endpoint() {
    let sender = IngestionSender::with_url("http://127.0.0.1:9/ingest");
    assert_eq!(sender.url(), "http://127.0.0.1:9/ingest");
    let exec = executor(FakeHost::new(browsing_session()), test_config());

    assert!(!sender.send_tab(&exec, Some(2)).await);
}

#[tokio::test]
async fn test_unsupported_tab_sends_nothing() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = config_for(&server);
    let sender = IngestionSender::new(&config);
    let exec = executor(FakeHost::new(browsing_session()), config);

    assert!(!sender.send_tab(&exec, Some(3)).await);
    assert!(!sender.send_tab(&exec, Some(42)).await);
}
