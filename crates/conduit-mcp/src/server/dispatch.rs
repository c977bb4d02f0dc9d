//! Method dispatch: routes decoded frames to the lifecycle manager and the
//! capability registries, and fences handler faults at the response
//! boundary. No handler failure, including a panic, propagates past this
//! module; each becomes a JSON-RPC error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{Value, json};

use crate::protocol::{
    CallToolParams, ErrorResponse, GetPromptParams, InitializeParams, InitializeResult,
    ListPromptsResult, ListResourcesResult, ListToolsResult, Message, Notification,
    PromptsCapability, ReadResourceParams, ReadResourceResult, Request, RequestId,
    ResourcesCapability, Response, RpcError, ServerCapabilities, ToolsCapability,
    PROTOCOL_VERSION, methods,
};
use crate::server::notify::{NotificationSender, RequestContext};
use crate::server::session::Session;

use super::ServerInner;

/// Dispatch one decoded frame. Requests produce exactly one reply frame;
/// notifications and stray replies produce none.
pub(crate) async fn dispatch_message(
    server: &ServerInner,
    session: &Arc<Session>,
    message: Message,
    notifier: NotificationSender,
) -> Option<Message> {
    match message {
        Message::Request(request) => Some(dispatch_request(server, session, request, notifier).await),
        Message::Notification(notification) => {
            handle_notification(session, &notification);
            None
        }
        Message::Response(_) | Message::Error(_) => {
            tracing::warn!("Ignoring unexpected reply frame from client");
            None
        }
    }
}

/// Dispatch a request, producing its reply frame.
pub(crate) async fn dispatch_request(
    server: &ServerInner,
    session: &Arc<Session>,
    request: Request,
    notifier: NotificationSender,
) -> Message {
    let Request { id, method, params, .. } = request;
    tracing::debug!(method = %method, request_id = %id, "Dispatching request");

    if method == methods::INITIALIZE {
        return match handle_initialize(server, session, params) {
            Ok(result) => respond(id, &result),
            Err(err) => fail(id, err),
        };
    }

    if let Err(err) = session.lifecycle().check_ready(&method) {
        return fail(id, err);
    }

    let ctx = RequestContext::new(Arc::clone(session), notifier);
    let params = params.unwrap_or(Value::Null);

    match method.as_str() {
        methods::PING => respond(id, &json!({})),
        methods::TOOLS_LIST => {
            respond(id, &ListToolsResult { tools: server.tools.list() })
        }
        methods::TOOLS_CALL => handle_tools_call(server, &ctx, id, params).await,
        methods::PROMPTS_LIST => {
            respond(id, &ListPromptsResult { prompts: server.prompts.list() })
        }
        methods::PROMPTS_GET => handle_prompts_get(server, &ctx, id, params).await,
        methods::RESOURCES_LIST => {
            respond(id, &ListResourcesResult { resources: server.resources.list() })
        }
        methods::RESOURCES_READ => handle_resources_read(server, &ctx, id, params).await,
        other => fail(id, RpcError::method_not_found(other)),
    }
}

fn handle_initialize(
    server: &ServerInner,
    session: &Arc<Session>,
    params: Option<Value>,
) -> Result<InitializeResult, RpcError> {
    session.lifecycle().begin_initialize()?;

    let params: InitializeParams = match params {
        Some(value) => {
            serde_json::from_value(value).map_err(|err| RpcError::invalid_params(err))?
        }
        None => return Err(RpcError::invalid_params("missing initialize params")),
    };

    if params.protocol_version == PROTOCOL_VERSION {
        tracing::info!(
            client = %params.client_info.name,
            version = %params.protocol_version,
            session_id = %session.id,
            "Initializing session"
        );
    } else {
        // Echo our version and let the client decide whether to proceed.
        tracing::warn!(
            requested = %params.protocol_version,
            supported = PROTOCOL_VERSION,
            "Client requested unsupported protocol version"
        );
    }

    Ok(InitializeResult {
        protocol_version: PROTOCOL_VERSION.to_string(),
        server_info: server.info.clone(),
        capabilities: ServerCapabilities {
            tools: Some(ToolsCapability { list_changed: Some(false) }),
            resources: Some(ResourcesCapability { list_changed: Some(false) }),
            prompts: Some(PromptsCapability { list_changed: Some(false) }),
        },
        instructions: server.instructions.clone(),
    })
}

async fn handle_tools_call(
    server: &ServerInner,
    ctx: &RequestContext,
    id: RequestId,
    params: Value,
) -> Message {
    let params: CallToolParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => return fail(id, RpcError::invalid_params(err)),
    };

    let Some(tool) = server.tools.get(&params.name) else {
        return fail(id, RpcError::invalid_params(format!("tool not found: {}", params.name)));
    };

    tracing::info!(tool = %params.name, "Executing tool");

    let outcome = AssertUnwindSafe(tool.call(ctx, params.arguments)).catch_unwind().await;
    match outcome {
        Ok(Ok(result)) => respond(id, &result),
        Ok(Err(err)) => {
            tracing::error!(tool = %params.name, error = %err, "Tool execution failed");
            fail(id, err.to_rpc_error())
        }
        Err(panic) => {
            let reason = panic_reason(&panic);
            tracing::error!(tool = %params.name, reason = %reason, "Tool handler panicked");
            fail(id, RpcError::internal(reason))
        }
    }
}

async fn handle_prompts_get(
    server: &ServerInner,
    ctx: &RequestContext,
    id: RequestId,
    params: Value,
) -> Message {
    let params: GetPromptParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => return fail(id, RpcError::invalid_params(err)),
    };

    let Some(prompt) = server.prompts.get(&params.name) else {
        return fail(id, RpcError::invalid_params(format!("prompt not found: {}", params.name)));
    };

    let outcome = AssertUnwindSafe(prompt.get(ctx, params.arguments)).catch_unwind().await;
    match outcome {
        Ok(Ok(result)) => respond(id, &result),
        Ok(Err(err)) => fail(id, err.to_rpc_error()),
        Err(panic) => fail(id, RpcError::internal(panic_reason(&panic))),
    }
}

async fn handle_resources_read(
    server: &ServerInner,
    ctx: &RequestContext,
    id: RequestId,
    params: Value,
) -> Message {
    let params: ReadResourceParams = match serde_json::from_value(params) {
        Ok(params) => params,
        Err(err) => return fail(id, RpcError::invalid_params(err)),
    };

    let Some(resource) = server.resources.get(&params.uri) else {
        return fail(id, RpcError::invalid_params(format!("resource not found: {}", params.uri)));
    };

    let outcome = AssertUnwindSafe(resource.read(ctx)).catch_unwind().await;
    match outcome {
        Ok(Ok(contents)) => respond(id, &ReadResourceResult { contents }),
        Ok(Err(err)) => fail(id, err.to_rpc_error()),
        Err(panic) => fail(id, RpcError::internal(panic_reason(&panic))),
    }
}

fn handle_notification(session: &Arc<Session>, notification: &Notification) {
    match notification.method.as_str() {
        methods::INITIALIZED => {
            if session.lifecycle().mark_initialized() {
                tracing::info!(session_id = %session.id, "Session initialized");
            }
        }
        methods::CANCELLED => {
            tracing::debug!(
                session_id = %session.id,
                params = ?notification.params,
                "Client cancelled a request"
            );
        }
        other => {
            tracing::debug!(method = %other, "Ignoring unknown notification");
        }
    }
}

fn respond<T: serde::Serialize>(id: RequestId, result: &T) -> Message {
    match serde_json::to_value(result) {
        Ok(value) => Message::Response(Response::new(id, value)),
        Err(err) => fail(id, RpcError::internal(format!("failed to encode result: {err}"))),
    }
}

fn fail(id: RequestId, error: RpcError) -> Message {
    Message::Error(ErrorResponse::new(Some(id), error))
}

fn panic_reason(panic: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::protocol::codes;
    use crate::server::McpServer;
    use crate::tools::{CounterTool, DelayedResponseTool, EchoTool};

    fn test_server() -> McpServer {
        let server = McpServer::new("test-server", "0.0.0", Config::default());
        server.register_tool(Arc::new(EchoTool));
        server.register_tool(Arc::new(CounterTool));
        server.register_tool(Arc::new(DelayedResponseTool));
        server
    }

    fn initialize_params() -> Value {
        json!({
            "protocolVersion": PROTOCOL_VERSION,
            "clientInfo": {"name": "test", "version": "1"}
        })
    }

    async fn handshake(server: &McpServer, session: &Arc<Session>) {
        let request = Request::new(1, methods::INITIALIZE, Some(initialize_params()));
        let reply = dispatch_request(
            server.inner(),
            session,
            request,
            NotificationSender::disabled(),
        )
        .await;
        assert!(matches!(reply, Message::Response(_)));
        handle_notification(session, &Notification::new(methods::INITIALIZED, None));
    }

    #[tokio::test]
    async fn test_initialize_echoes_server_version() {
        let server = test_server();
        let session = Arc::new(Session::new("s"));

        let request = Request::new(
            1,
            methods::INITIALIZE,
            Some(json!({
                "protocolVersion": "1999-01-01",
                "clientInfo": {"name": "old", "version": "0"}
            })),
        );
        let reply = dispatch_request(
            server.inner(),
            &session,
            request,
            NotificationSender::disabled(),
        )
        .await;

        match reply {
            Message::Response(response) => {
                assert_eq!(response.result["protocolVersion"], PROTOCOL_VERSION);
                assert_eq!(response.result["serverInfo"]["name"], "test-server");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_requests_rejected_before_handshake() {
        let server = test_server();
        let session = Arc::new(Session::new("s"));

        let request = Request::new(1, methods::TOOLS_LIST, None);
        let reply = dispatch_request(
            server.inner(),
            &session,
            request,
            NotificationSender::disabled(),
        )
        .await;

        match reply {
            Message::Error(err) => assert_eq!(err.error.code, codes::NOT_INITIALIZED),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_double_initialize_is_an_error() {
        let server = test_server();
        let session = Arc::new(Session::new("s"));
        handshake(&server, &session).await;

        let request = Request::new(9, methods::INITIALIZE, Some(initialize_params()));
        let reply = dispatch_request(
            server.inner(),
            &session,
            request,
            NotificationSender::disabled(),
        )
        .await;
        match reply {
            Message::Error(err) => {
                assert_eq!(err.error.code, codes::ALREADY_INITIALIZED);
                assert_eq!(err.error.message, "session already initialized");
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_method() {
        let server = test_server();
        let session = Arc::new(Session::new("s"));
        handshake(&server, &session).await;

        let request = Request::new(2, "tools/destroy", None);
        let reply = dispatch_request(
            server.inner(),
            &session,
            request,
            NotificationSender::disabled(),
        )
        .await;
        match reply {
            Message::Error(err) => {
                assert_eq!(err.error.code, codes::METHOD_NOT_FOUND);
                assert!(err.error.message.contains("tools/destroy"));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_tool_call_and_invalid_params() {
        let server = test_server();
        let session = Arc::new(Session::new("s"));
        handshake(&server, &session).await;

        let request = Request::new(
            2,
            methods::TOOLS_CALL,
            Some(json!({"name": "echo", "arguments": {"text": "hi"}})),
        );
        let reply = dispatch_request(
            server.inner(),
            &session,
            request,
            NotificationSender::disabled(),
        )
        .await;
        match reply {
            Message::Response(response) => {
                assert_eq!(response.result["content"][0]["text"], "Echo: hi");
            }
            other => panic!("expected response, got {other:?}"),
        }

        // Handler-level validation failure maps to invalid params.
        let request = Request::new(3, methods::TOOLS_CALL, Some(json!({"name": "echo"})));
        let reply = dispatch_request(
            server.inner(),
            &session,
            request,
            NotificationSender::disabled(),
        )
        .await;
        match reply {
            Message::Error(err) => assert_eq!(err.error.code, codes::INVALID_PARAMS),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_internal_error() {
        struct PanickyTool;

        #[async_trait::async_trait]
        impl crate::tools::ToolHandler for PanickyTool {
            fn name(&self) -> &str {
                "panicky"
            }
            fn description(&self) -> &str {
                "always panics"
            }
            fn input_schema(&self) -> Value {
                json!({"type": "object"})
            }
            async fn call(
                &self,
                _ctx: &RequestContext,
                _arguments: Value,
            ) -> crate::error::HandlerResult<crate::protocol::CallToolResult> {
                panic!("kaboom");
            }
        }

        let server = test_server();
        server.register_tool(Arc::new(PanickyTool));
        let session = Arc::new(Session::new("s"));
        handshake(&server, &session).await;

        let request = Request::new(4, methods::TOOLS_CALL, Some(json!({"name": "panicky"})));
        let reply = dispatch_request(
            server.inner(),
            &session,
            request,
            NotificationSender::disabled(),
        )
        .await;
        match reply {
            Message::Error(err) => {
                assert_eq!(err.error.code, codes::INTERNAL_ERROR);
                assert_eq!(err.error.data, Some(Value::String("kaboom".into())));
            }
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_notifications_produce_no_reply() {
        let server = test_server();
        let session = Arc::new(Session::new("s"));

        let reply = dispatch_message(
            server.inner(),
            &session,
            Message::Notification(Notification::new("notifications/unknown", None)),
            NotificationSender::disabled(),
        )
        .await;
        assert!(reply.is_none());
    }
}
