//! Streamable HTTP client transport against a scripted mock peer.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use wiremock::matchers::{body_partial_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use conduit_mcp::client::{McpClient, RequestOptions, StreamableHttpTransport};
use conduit_mcp::protocol::{Implementation, PROTOCOL_VERSION};
use conduit_mcp::{ClientError, HttpClientConfig};

fn initialize_result_body(id: i64, version: &str) -> serde_json::Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "result": {
            "protocolVersion": version,
            "serverInfo": {"name": "mock", "version": "1"},
            "capabilities": {"tools": {"listChanged": false}}
        }
    })
}

async fn transport_for(server: &MockServer) -> Arc<StreamableHttpTransport> {
    Arc::new(
        StreamableHttpTransport::new(
            HttpClientConfig::new(format!("{}/mcp", server.uri()))
                .request_timeout(Duration::from_secs(5)),
        )
        .unwrap(),
    )
}

#[tokio::test]
async fn test_initialize_records_session_header() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "initialize"})))
        .respond_with(
            ResponseTemplate::new(200)
                .insert_header("mcp-session-id", "feedfacefeedfacefeedfacefeedface")
                .set_body_json(initialize_result_body(1, PROTOCOL_VERSION)),
        )
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "notifications/initialized"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(&mock)
        .await;

    let transport = transport_for(&mock).await;
    let client = McpClient::new(transport.clone());

    let result = client.initialize(Implementation::new("C", "1")).await.unwrap();
    assert_eq!(result.server_info.name, "mock");
    assert_eq!(transport.session_id().as_deref(), Some("feedfacefeedfacefeedfacefeedface"));
}

#[tokio::test]
async fn test_initialize_fails_on_version_mismatch() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(initialize_result_body(1, "2024-11-05")))
        .mount(&mock)
        .await;

    let transport = transport_for(&mock).await;
    let client = McpClient::new(transport);

    let err = client.initialize(Implementation::new("C", "1")).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    assert!(err.to_string().contains("2024-11-05"));
}

#[tokio::test]
async fn test_sse_reply_stream_resolves_request() {
    let mock = MockServer::start().await;

    let sse_body = concat!(
        "id: 1\n",
        "event: message\n",
        "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",",
        "\"params\":{\"level\":\"info\",\"data\":\"working\"}}\n",
        "\n",
        "id: 2\n",
        "event: message\n",
        "data: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":",
        "{\"content\":[{\"type\":\"text\",\"text\":\"done\"}]}}\n",
        "\n",
    );

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "tools/call"})))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .mount(&mock)
        .await;

    let transport = transport_for(&mock).await;
    let client = McpClient::new(transport.clone());

    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let opts = RequestOptions::new().with_notification_handler(Arc::new(move |notification| {
        sink.lock().unwrap().push(notification.method.clone());
    }));

    let result = client.call_tool_with_options("work", json!({}), opts).await.unwrap();
    match &result.content[0] {
        conduit_mcp::protocol::Content::Text { text } => assert_eq!(text, "done"),
        other => panic!("expected text content, got {other:?}"),
    }
    assert_eq!(seen.lock().unwrap().clone(), vec!["notifications/message"]);
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_sse_stream_without_response_is_an_error() {
    let mock = MockServer::start().await;

    // Only a notification, then the stream ends.
    let sse_body = concat!(
        "id: 1\n",
        "data: {\"jsonrpc\":\"2.0\",\"method\":\"notifications/message\",",
        "\"params\":{\"level\":\"info\",\"data\":\"x\"}}\n",
        "\n",
    );

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw(sse_body.as_bytes(), "text/event-stream"),
        )
        .mount(&mock)
        .await;

    let transport = transport_for(&mock).await;
    let client = McpClient::new(transport.clone());

    let err = client.call_tool("work", json!({})).await.unwrap_err();
    assert!(matches!(err, ClientError::Protocol(_)));
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_http_4xx_with_rpc_body_surfaces_the_rpc_error() {
    let mock = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/mcp"))
        .respond_with(ResponseTemplate::new(404).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "error": {"code": -32600, "message": "unknown session"}
        })))
        .mount(&mock)
        .await;

    let transport = transport_for(&mock).await;
    let client = McpClient::new(transport.clone());

    let err = client.ping().await.unwrap_err();
    match err {
        ClientError::Rpc { code, message, .. } => {
            assert_eq!(code, -32600);
            assert_eq!(message, "unknown session");
        }
        other => panic!("expected rpc error, got {other:?}"),
    }
    assert_eq!(transport.pending_requests(), 0);
}

#[tokio::test]
async fn test_caller_cancel_unblocks_one_request_and_spares_the_rest() {
    let mock = MockServer::start().await;

    // One tool that never answers in time, one that answers at once.
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"params": {"name": "slow"}})))
        .respond_with(
            ResponseTemplate::new(200)
                .set_delay(Duration::from_secs(30))
                .set_body_json(json!({"jsonrpc": "2.0", "id": 1, "result": {"content": []}})),
        )
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"params": {"name": "fast"}})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 2,
            "result": {"content": [{"type": "text", "text": "quick"}]}
        })))
        .mount(&mock)
        .await;
    Mock::given(method("POST"))
        .and(path("/mcp"))
        .and(body_partial_json(json!({"method": "notifications/cancelled"})))
        .respond_with(ResponseTemplate::new(202))
        .mount(&mock)
        .await;

    let transport = transport_for(&mock).await;
    let client = Arc::new(McpClient::new(transport.clone()));

    // First call takes id 1 and hangs on the delayed mock.
    let slow = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.call_tool("slow", json!({})).await })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.pending_requests(), 1);

    let started = Instant::now();
    client.cancel(1, Some("user abort".to_string())).await.unwrap();

    let result = slow.await.unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));
    // Cancel fired, not the 5s transport deadline.
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.pending_requests(), 0);

    // The transport still serves other calls.
    let result = client.call_tool("fast", json!({})).await.unwrap();
    match &result.content[0] {
        conduit_mcp::protocol::Content::Text { text } => assert_eq!(text, "quick"),
        other => panic!("expected text content, got {other:?}"),
    }

    // Cancelling a settled id is a no-op.
    client.cancel(1, None).await.unwrap();
}

#[tokio::test]
async fn test_close_is_idempotent_and_drains() {
    let mock = MockServer::start().await;
    let transport = transport_for(&mock).await;
    let client = McpClient::new(transport);

    client.close().await.unwrap();
    client.close().await.unwrap();

    let err = client.ping().await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}
