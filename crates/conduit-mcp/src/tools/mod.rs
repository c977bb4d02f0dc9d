//! Handler capabilities for the three capability domains.
//!
//! A handler is a single-invoke capability keyed by its name (or URI);
//! descriptors are derived from the handler itself, so registration takes
//! just the handler value.

mod demo;

pub use demo::{CounterTool, DelayedResponseTool, EchoTool, GreetingPrompt, GreetingResource};

use serde_json::Value;

use crate::error::HandlerResult;
use crate::protocol::{CallToolResult, GetPromptResult, Prompt, Resource, ResourceContents, Tool};
use crate::server::RequestContext;

/// A callable procedure advertised under `tools/list`.
#[async_trait::async_trait]
pub trait ToolHandler: Send + Sync {
    /// Tool name, unique within the registry.
    fn name(&self) -> &str;

    /// Human description for the client.
    fn description(&self) -> &str;

    /// JSON Schema of the input object.
    fn input_schema(&self) -> Value;

    /// Execute the tool. Emit intermediate notifications through the
    /// context; report tool-level failure via `CallToolResult::error`
    /// rather than `Err`.
    async fn call(&self, ctx: &RequestContext, arguments: Value) -> HandlerResult<CallToolResult>;

    /// Wire descriptor for `tools/list`.
    fn descriptor(&self) -> Tool {
        Tool {
            name: self.name().to_string(),
            description: self.description().to_string(),
            input_schema: self.input_schema(),
        }
    }
}

/// An addressable read-only blob advertised under `resources/list`.
#[async_trait::async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Wire descriptor; `uri` keys the registry.
    fn descriptor(&self) -> Resource;

    async fn read(&self, ctx: &RequestContext) -> HandlerResult<Vec<ResourceContents>>;
}

/// A parameterized message template advertised under `prompts/list`.
#[async_trait::async_trait]
pub trait PromptHandler: Send + Sync {
    /// Wire descriptor; `name` keys the registry.
    fn descriptor(&self) -> Prompt;

    async fn get(&self, ctx: &RequestContext, arguments: Value) -> HandlerResult<GetPromptResult>;
}
