//! MCP client: a typed facade over pluggable transports.
//!
//! Every transport shares the same correlation discipline: dispatch
//! allocates an id from the pending-request registry, registers a waiter,
//! hands the frame to the wire, and the transport's read path resolves
//! the waiter when the matching response arrives.

pub mod http;
pub mod pending;
pub mod sse;
pub mod sse_legacy;
pub mod stdio;

pub use http::StreamableHttpTransport;
pub use pending::PendingRequests;
pub use sse_legacy::SseClientTransport;
pub use stdio::{ConnectionState, StdioTransport};

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::error::{ClientError, ClientResult};
use crate::protocol::{
    CallToolParams, CallToolResult, GetPromptParams, GetPromptResult, Implementation,
    InitializeParams, InitializeResult, ListPromptsResult, ListResourcesResult, ListToolsResult,
    Message, Notification, Prompt, ReadResourceParams, ReadResourceResult, Resource, Tool,
    PROTOCOL_VERSION, methods,
};

/// Callback for server-initiated notifications.
pub type NotificationHandler = Arc<dyn Fn(Notification) + Send + Sync>;

/// Per-call options: an extra deadline (first-to-fire with the transport's
/// configured timeout) and a handler for notifications streamed on this
/// call's reply.
#[derive(Clone, Default)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub on_notification: Option<NotificationHandler>,
}

impl RequestOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_notification_handler(mut self, handler: NotificationHandler) -> Self {
        self.on_notification = Some(handler);
        self
    }
}

/// A client-side transport: dispatches frames and feeds replies back
/// through its pending-request registry.
#[async_trait::async_trait]
pub trait ClientTransport: Send + Sync {
    /// Send a request and await its result value.
    async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        opts: RequestOptions,
    ) -> ClientResult<Value>;

    /// Send a notification; no reply is awaited.
    async fn notify(&self, method: &str, params: Option<Value>) -> ClientResult<()>;

    /// Cancel one in-flight request from the caller's side. The pending
    /// entry is removed, its waiter resolves with
    /// [`ClientError::Cancelled`], and where the transport allows, a
    /// `notifications/cancelled` frame is sent to the peer. Cancelling an
    /// unknown or already-settled id is a no-op.
    async fn cancel(&self, id: i64, reason: Option<String>) -> ClientResult<()>;

    /// Install the session-wide notification handler.
    fn set_notification_handler(&self, handler: NotificationHandler);

    /// Shut the transport down. Idempotent; drains in-flight requests.
    async fn close(&self) -> ClientResult<()>;
}

/// Convert a correlated reply frame into a result value.
pub(crate) fn into_result(message: Message) -> ClientResult<Value> {
    match message {
        Message::Response(response) => Ok(response.result),
        Message::Error(err) => Err(ClientError::from(err.error)),
        other => Err(ClientError::protocol(format!(
            "unexpected frame in reply path: {:?}",
            other.method()
        ))),
    }
}

/// Compose the per-call and configured deadlines, first-to-fire.
pub(crate) fn effective_timeout(configured: Duration, requested: Option<Duration>) -> Duration {
    match requested {
        Some(requested) => requested.min(configured),
        None => configured,
    }
}

/// Typed MCP client over any [`ClientTransport`].
pub struct McpClient {
    transport: Arc<dyn ClientTransport>,
}

impl McpClient {
    #[must_use]
    pub fn new(transport: Arc<dyn ClientTransport>) -> Self {
        Self { transport }
    }

    #[must_use]
    pub fn transport(&self) -> &Arc<dyn ClientTransport> {
        &self.transport
    }

    /// Run the three-step handshake: initialize, verify the negotiated
    /// version, then acknowledge with `notifications/initialized`.
    pub async fn initialize(&self, client_info: Implementation) -> ClientResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: PROTOCOL_VERSION.to_string(),
            client_info,
            capabilities: serde_json::json!({}),
        };
        let value = self
            .transport
            .request(
                methods::INITIALIZE,
                Some(serde_json::to_value(params).map_err(crate::protocol::CodecError::from)?),
                RequestOptions::default(),
            )
            .await?;
        let result: InitializeResult =
            serde_json::from_value(value).map_err(crate::protocol::CodecError::from)?;

        // The server echoes its own version; a mismatch is ours to reject.
        if result.protocol_version != PROTOCOL_VERSION {
            return Err(ClientError::protocol(format!(
                "server speaks protocol {}, this client requires {}",
                result.protocol_version, PROTOCOL_VERSION
            )));
        }

        self.transport.notify(methods::INITIALIZED, None).await?;
        Ok(result)
    }

    pub async fn ping(&self) -> ClientResult<()> {
        self.transport.request(methods::PING, None, RequestOptions::default()).await?;
        Ok(())
    }

    pub async fn list_tools(&self) -> ClientResult<Vec<Tool>> {
        let value =
            self.transport.request(methods::TOOLS_LIST, None, RequestOptions::default()).await?;
        let result: ListToolsResult =
            serde_json::from_value(value).map_err(crate::protocol::CodecError::from)?;
        Ok(result.tools)
    }

    pub async fn call_tool(&self, name: &str, arguments: Value) -> ClientResult<CallToolResult> {
        self.call_tool_with_options(name, arguments, RequestOptions::default()).await
    }

    pub async fn call_tool_with_options(
        &self,
        name: &str,
        arguments: Value,
        opts: RequestOptions,
    ) -> ClientResult<CallToolResult> {
        let params = CallToolParams { name: name.to_string(), arguments };
        let value = self
            .transport
            .request(
                methods::TOOLS_CALL,
                Some(serde_json::to_value(params).map_err(crate::protocol::CodecError::from)?),
                opts,
            )
            .await?;
        serde_json::from_value(value).map_err(|err| crate::protocol::CodecError::from(err).into())
    }

    pub async fn list_prompts(&self) -> ClientResult<Vec<Prompt>> {
        let value =
            self.transport.request(methods::PROMPTS_LIST, None, RequestOptions::default()).await?;
        let result: ListPromptsResult =
            serde_json::from_value(value).map_err(crate::protocol::CodecError::from)?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(&self, name: &str, arguments: Value) -> ClientResult<GetPromptResult> {
        let params = GetPromptParams { name: name.to_string(), arguments };
        let value = self
            .transport
            .request(
                methods::PROMPTS_GET,
                Some(serde_json::to_value(params).map_err(crate::protocol::CodecError::from)?),
                RequestOptions::default(),
            )
            .await?;
        serde_json::from_value(value).map_err(|err| crate::protocol::CodecError::from(err).into())
    }

    pub async fn list_resources(&self) -> ClientResult<Vec<Resource>> {
        let value = self
            .transport
            .request(methods::RESOURCES_LIST, None, RequestOptions::default())
            .await?;
        let result: ListResourcesResult =
            serde_json::from_value(value).map_err(crate::protocol::CodecError::from)?;
        Ok(result.resources)
    }

    pub async fn read_resource(&self, uri: &str) -> ClientResult<ReadResourceResult> {
        let params = ReadResourceParams { uri: uri.to_string() };
        let value = self
            .transport
            .request(
                methods::RESOURCES_READ,
                Some(serde_json::to_value(params).map_err(crate::protocol::CodecError::from)?),
                RequestOptions::default(),
            )
            .await?;
        serde_json::from_value(value).map_err(|err| crate::protocol::CodecError::from(err).into())
    }

    /// Cancel an in-flight request by its id; the awaiting caller gets
    /// [`ClientError::Cancelled`] and the peer is told where possible.
    pub async fn cancel(&self, id: i64, reason: Option<String>) -> ClientResult<()> {
        self.transport.cancel(id, reason).await
    }

    /// Install the session-wide notification handler.
    pub fn set_notification_handler(&self, handler: NotificationHandler) {
        self.transport.set_notification_handler(handler);
    }

    pub async fn close(&self) -> ClientResult<()> {
        self.transport.close().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_timeout_first_to_fire() {
        let configured = Duration::from_secs(30);
        assert_eq!(effective_timeout(configured, None), configured);
        assert_eq!(
            effective_timeout(configured, Some(Duration::from_millis(100))),
            Duration::from_millis(100)
        );
        assert_eq!(effective_timeout(configured, Some(Duration::from_secs(60))), configured);
    }

    #[test]
    fn test_into_result() {
        use crate::protocol::{Response, RpcError, ErrorResponse, RequestId};
        use serde_json::json;

        let ok = into_result(Message::Response(Response::new(RequestId::Number(1), json!(7))));
        assert_eq!(ok.unwrap(), json!(7));

        let err = into_result(Message::Error(ErrorResponse::new(
            Some(RequestId::Number(1)),
            RpcError::method_not_found("x"),
        )));
        assert!(matches!(err, Err(ClientError::Rpc { code: -32601, .. })));
    }
}
