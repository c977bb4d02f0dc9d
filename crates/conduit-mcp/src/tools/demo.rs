//! Built-in demonstration handlers: an echo tool, a per-session counter,
//! a streaming delayed-response tool, and one sample resource and prompt.

use std::time::Duration;

use serde_json::{Value, json};

use super::{PromptHandler, ResourceHandler, ToolHandler};
use crate::error::{HandlerError, HandlerResult};
use crate::protocol::{
    CallToolResult, Content, GetPromptResult, LogLevel, Prompt, PromptArgument, PromptMessage,
    Resource, ResourceContents, Role,
};
use crate::server::RequestContext;

/// Echoes its input back.
pub struct EchoTool;

#[async_trait::async_trait]
impl ToolHandler for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the provided text back to the caller."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "text": {
                    "type": "string",
                    "description": "Text to echo"
                }
            },
            "required": ["text"]
        })
    }

    async fn call(&self, _ctx: &RequestContext, arguments: Value) -> HandlerResult<CallToolResult> {
        let text = arguments
            .get("text")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::invalid_params("missing 'text'"))?;
        Ok(CallToolResult::text(format!("Echo: {text}")))
    }
}

/// Accumulates an integer in the session data bag across calls.
pub struct CounterTool;

const COUNTER_KEY: &str = "counter";

#[async_trait::async_trait]
impl ToolHandler for CounterTool {
    fn name(&self) -> &str {
        "counter"
    }

    fn description(&self) -> &str {
        "Increment a per-session counter and report its current value."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "increment": {
                    "type": "integer",
                    "description": "Amount to add",
                    "default": 1
                }
            }
        })
    }

    async fn call(&self, ctx: &RequestContext, arguments: Value) -> HandlerResult<CallToolResult> {
        let increment = arguments.get("increment").and_then(Value::as_i64).unwrap_or(1);

        let value = ctx
            .session()
            .with_data(|data| {
                let current =
                    data.get(COUNTER_KEY).and_then(Value::as_i64).unwrap_or(0) + increment;
                data.insert(COUNTER_KEY.to_string(), json!(current));
                current
            })
            .await;

        Ok(CallToolResult::text(format!("Counter current value: {value}")))
    }
}

/// Sleeps through a configurable number of steps, emitting a notification
/// per step before the final result.
pub struct DelayedResponseTool;

#[async_trait::async_trait]
impl ToolHandler for DelayedResponseTool {
    fn name(&self) -> &str {
        "delayedResponse"
    }

    fn description(&self) -> &str {
        "Process in steps with a delay, streaming a progress message per step."
    }

    fn input_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "steps": {
                    "type": "integer",
                    "description": "Number of steps",
                    "default": 3
                },
                "delayMs": {
                    "type": "integer",
                    "description": "Delay per step in milliseconds",
                    "default": 500
                }
            }
        })
    }

    async fn call(&self, ctx: &RequestContext, arguments: Value) -> HandlerResult<CallToolResult> {
        let steps = arguments.get("steps").and_then(Value::as_u64).unwrap_or(3);
        let delay_ms = arguments.get("delayMs").and_then(Value::as_u64).unwrap_or(500);

        for step in 1..=steps {
            tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            ctx.send_log_message(LogLevel::Info, format!("Step {step} of {steps} complete"))
                .await;
        }

        Ok(CallToolResult::text(format!(
            "Processing complete! {steps} steps executed with {delay_ms}ms delays."
        )))
    }
}

/// A fixed text resource.
pub struct GreetingResource;

#[async_trait::async_trait]
impl ResourceHandler for GreetingResource {
    fn descriptor(&self) -> Resource {
        Resource {
            uri: "demo://greeting".to_string(),
            name: "greeting".to_string(),
            description: Some("A friendly greeting".to_string()),
            mime_type: Some("text/plain".to_string()),
        }
    }

    async fn read(&self, _ctx: &RequestContext) -> HandlerResult<Vec<ResourceContents>> {
        Ok(vec![ResourceContents {
            uri: "demo://greeting".to_string(),
            mime_type: Some("text/plain".to_string()),
            text: Some("Hello from conduit-mcp!".to_string()),
            blob: None,
        }])
    }
}

/// A one-argument prompt template.
pub struct GreetingPrompt;

#[async_trait::async_trait]
impl PromptHandler for GreetingPrompt {
    fn descriptor(&self) -> Prompt {
        Prompt {
            name: "greeting".to_string(),
            description: Some("Compose a greeting for someone".to_string()),
            arguments: vec![PromptArgument {
                name: "name".to_string(),
                description: Some("Who to greet".to_string()),
                required: true,
            }],
        }
    }

    async fn get(&self, _ctx: &RequestContext, arguments: Value) -> HandlerResult<GetPromptResult> {
        let name = arguments
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| HandlerError::invalid_params("missing 'name'"))?;

        Ok(GetPromptResult {
            description: Some("A greeting".to_string()),
            messages: vec![PromptMessage {
                role: Role::User,
                content: Content::text(format!("Please greet {name} warmly.")),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::server::{NotificationSender, Session};

    fn test_ctx() -> RequestContext {
        RequestContext::new(Arc::new(Session::new("test")), NotificationSender::disabled())
    }

    #[tokio::test]
    async fn test_echo() {
        let result = EchoTool.call(&test_ctx(), json!({"text": "hi"})).await.unwrap();
        assert_eq!(result.content, vec![Content::text("Echo: hi")]);
        assert!(!result.is_error);
    }

    #[tokio::test]
    async fn test_echo_requires_text() {
        let err = EchoTool.call(&test_ctx(), json!({})).await.unwrap_err();
        assert!(matches!(err, HandlerError::InvalidParams(_)));
    }

    #[tokio::test]
    async fn test_counter_accumulates_in_session() {
        let ctx = test_ctx();
        let first = CounterTool.call(&ctx, json!({"increment": 1})).await.unwrap();
        let second = CounterTool.call(&ctx, json!({"increment": 2})).await.unwrap();
        assert_eq!(first.content, vec![Content::text("Counter current value: 1")]);
        assert_eq!(second.content, vec![Content::text("Counter current value: 3")]);
    }

    #[tokio::test]
    async fn test_delayed_response_emits_step_notifications() {
        let (tx, mut rx) = tokio::sync::mpsc::channel(8);
        let ctx = RequestContext::new(
            Arc::new(Session::new("test")),
            NotificationSender::for_request(tx),
        );

        let result = DelayedResponseTool
            .call(&ctx, json!({"steps": 2, "delayMs": 1}))
            .await
            .unwrap();
        assert_eq!(
            result.content,
            vec![Content::text("Processing complete! 2 steps executed with 1ms delays.")]
        );

        let mut seen = 0;
        while let Ok(frame) = rx.try_recv() {
            assert_eq!(frame.method, "notifications/message");
            seen += 1;
        }
        assert_eq!(seen, 2);
    }

    #[tokio::test]
    async fn test_greeting_prompt() {
        let result = GreetingPrompt.get(&test_ctx(), json!({"name": "Ada"})).await.unwrap();
        assert_eq!(result.messages.len(), 1);
        assert!(matches!(
            &result.messages[0].content,
            Content::Text { text } if text.contains("Ada")
        ));
    }
}
