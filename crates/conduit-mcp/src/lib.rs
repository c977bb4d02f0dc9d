//! conduit-mcp
//!
//! A peer-to-peer RPC runtime implementing the Model Context Protocol: a
//! JSON-RPC 2.0 dialect with three capability domains (tools, resources,
//! prompts) and server-initiated notifications, over three transports
//! with different session and streaming semantics.
//!
//! # Features
//!
//! - **Streamable HTTP**: one endpoint multiplexing JSON-once and
//!   SSE-stream replies, with stateful session tracking
//! - **Legacy SSE**: dual-endpoint pairing for older clients
//! - **Stdio**: newline-delimited JSON over child-process pipes with
//!   exit supervision
//! - **Async-first**: built on Tokio; requests are handled concurrently
//!   per connection with cooperative cancellation
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use conduit_mcp::{Config, McpServer};
//! use conduit_mcp::tools::EchoTool;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let server = McpServer::new("my-server", "0.1.0", Config::default());
//!     server.register_tool(Arc::new(EchoTool));
//!     server.run_http().await
//! }
//! ```

pub mod client;
pub mod config;
pub mod error;
pub mod protocol;
pub mod server;
pub mod tools;

pub use client::{McpClient, SseClientTransport, StdioTransport, StreamableHttpTransport};
pub use config::{Config, HttpClientConfig, StdioClientConfig};
pub use error::{ClientError, HandlerError};
pub use server::McpServer;
