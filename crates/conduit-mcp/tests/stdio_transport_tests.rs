//! Stdio client transport: process supervision, timeouts, and close
//! semantics against real child processes.

#![cfg(unix)]

use std::time::{Duration, Instant};

use serde_json::json;

use conduit_mcp::client::{ClientTransport, ConnectionState, McpClient, RequestOptions, StdioTransport};
use conduit_mcp::protocol::{Content, Implementation, PROTOCOL_VERSION};
use conduit_mcp::{ClientError, StdioClientConfig};

#[tokio::test]
async fn test_first_send_auto_starts_and_replies() {
    // A one-shot shell server: read a frame, answer request id 1.
    let script = r#"read line; printf '{"jsonrpc":"2.0","id":1,"result":{"ok":true}}\n'"#;
    let transport = StdioTransport::new(
        StdioClientConfig::new("sh")
            .with_args(["-c", script])
            .with_timeout(Duration::from_secs(5)),
    );
    assert_eq!(transport.state(), ConnectionState::NotStarted);

    let value = transport.request("ping", None, RequestOptions::default()).await.unwrap();
    assert_eq!(value, json!({"ok": true}));

    transport.close().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_end_to_end_against_real_server_binary() {
    let transport = StdioTransport::new(
        StdioClientConfig::new(env!("CARGO_BIN_EXE_conduit-mcp"))
            .with_args(["--transport", "stdio"])
            .with_timeout(Duration::from_secs(10)),
    );
    let client = McpClient::new(transport.clone());

    let result = client.initialize(Implementation::new("C", "1")).await.unwrap();
    assert_eq!(result.protocol_version, PROTOCOL_VERSION);
    assert_eq!(result.server_info.name, "conduit-mcp");
    assert_eq!(transport.state(), ConnectionState::Initialized);

    let result = client.call_tool("echo", json!({"text": "hi"})).await.unwrap();
    match &result.content[0] {
        Content::Text { text } => assert_eq!(text, "Echo: hi"),
        other => panic!("expected text content, got {other:?}"),
    }

    // Counter state persists across calls within the single stdio session.
    let first = client.call_tool("counter", json!({"increment": 1})).await.unwrap();
    let second = client.call_tool("counter", json!({"increment": 2})).await.unwrap();
    match (&first.content[0], &second.content[0]) {
        (Content::Text { text: a }, Content::Text { text: b }) => {
            assert_eq!(a, "Counter current value: 1");
            assert_eq!(b, "Counter current value: 3");
        }
        other => panic!("expected text content, got {other:?}"),
    }

    client.close().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_unresponsive_server_times_out_without_leaking() {
    // `cat` echoes our own request back, which resolves nothing.
    let transport = StdioTransport::new(
        StdioClientConfig::new("cat").with_timeout(Duration::from_secs(30)),
    );

    let started = Instant::now();
    let err = transport
        .request(
            "ping",
            None,
            RequestOptions::new().with_timeout(Duration::from_millis(150)),
        )
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    // The per-call deadline fired, not the configured 30s one.
    assert!(started.elapsed() < Duration::from_secs(2));
    assert_eq!(transport.pending_requests(), 0);

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_child_exit_fails_fast_afterwards() {
    // `true` exits immediately; the transport observes EOF.
    let transport = StdioTransport::new(
        StdioClientConfig::new("true").with_timeout(Duration::from_millis(500)),
    );

    // The first call races the exit; any local error is acceptable.
    let err = transport.request("ping", None, RequestOptions::default()).await.unwrap_err();
    assert!(err.is_local());

    // Once the exit is observed the state machine pins Disconnected and
    // later calls fail fast instead of waiting out a timeout.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    let started = Instant::now();
    let err = transport.request("ping", None, RequestOptions::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
    assert!(started.elapsed() < Duration::from_millis(100));
}

#[tokio::test]
async fn test_spawn_failure_is_failed_state() {
    let transport = StdioTransport::new(StdioClientConfig::new("/nonexistent-mcp-server"));

    let err = transport.request("ping", None, RequestOptions::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
    assert_eq!(transport.state(), ConnectionState::Failed);

    // And it stays failed.
    let err = transport.request("ping", None, RequestOptions::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::Transport(_)));
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let transport = StdioTransport::new(
        StdioClientConfig::new("cat").with_timeout(Duration::from_secs(1)),
    );

    // Start the child, then close repeatedly.
    let _ = transport
        .request("ping", None, RequestOptions::new().with_timeout(Duration::from_millis(50)))
        .await;

    transport.close().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Disconnected);
    transport.close().await.unwrap();
    transport.close().await.unwrap();
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    // Closed transports refuse new work.
    let err = transport.request("ping", None, RequestOptions::default()).await.unwrap_err();
    assert!(matches!(err, ClientError::Closed));
}

#[tokio::test]
async fn test_caller_cancel_resolves_the_waiter() {
    // `cat` never answers, so the request stays pending until cancelled.
    let transport = StdioTransport::new(
        StdioClientConfig::new("cat").with_timeout(Duration::from_secs(30)),
    );

    let call = {
        let transport = transport.clone();
        tokio::spawn(async move {
            transport.request("ping", None, RequestOptions::default()).await
        })
    };
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.pending_requests(), 1);

    let started = Instant::now();
    transport.cancel(1, Some("user abort".to_string())).await.unwrap();

    let result = call.await.unwrap();
    assert!(matches!(result, Err(ClientError::Cancelled)));
    // Cancel fired, not the configured 30s deadline.
    assert!(started.elapsed() < Duration::from_secs(1));
    assert_eq!(transport.pending_requests(), 0);

    // Unknown ids are a no-op.
    transport.cancel(99, None).await.unwrap();

    transport.close().await.unwrap();
}

#[tokio::test]
async fn test_pending_requests_drain_on_close() {
    let transport = StdioTransport::new(
        StdioClientConfig::new("cat").with_timeout(Duration::from_secs(30)),
    );

    let background = {
        let transport = transport.clone();
        tokio::spawn(async move {
            transport.request("ping", None, RequestOptions::default()).await
        })
    };
    // Let the request get registered and written.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(transport.pending_requests(), 1);

    transport.close().await.unwrap();
    let result = background.await.unwrap();
    assert!(matches!(result, Err(ClientError::Closed)));
    assert_eq!(transport.pending_requests(), 0);
}
