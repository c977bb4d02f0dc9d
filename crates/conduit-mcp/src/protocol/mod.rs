//! Wire protocol: JSON-RPC 2.0 envelope and the MCP message vocabulary.
//!
//! The codec is transport-agnostic. Transports hand complete frames (one
//! JSON document) to [`decode_frame`] and serialize outgoing [`Message`]
//! values with `serde_json`.

mod codec;
mod types;

pub use codec::{
    CodecError, ErrorResponse, Message, Notification, Request, RequestId, Response, RpcError,
    decode_frame, decode_frames, JSONRPC_VERSION,
};
pub use types::{
    CallToolParams, CallToolResult, CancelledParams, Content, GetPromptParams, GetPromptResult,
    Implementation, InitializeParams, InitializeResult, ListPromptsResult, ListResourcesResult,
    ListToolsResult, LogLevel, LogMessageParams, ProgressParams, Prompt, PromptArgument,
    PromptMessage, PromptsCapability, ReadResourceParams, ReadResourceResult, Resource,
    ResourceContents, ResourcesCapability, Role, ServerCapabilities, Tool, ToolsCapability,
    codes, methods, PROTOCOL_VERSION,
};
