//! MCP server: capability registries, session management, and the three
//! transports (streamable HTTP, legacy SSE, stdio).

pub mod dispatch;
pub mod http;
pub mod lifecycle;
pub mod notify;
pub mod registry;
pub mod session;
pub mod sse_legacy;
pub mod stdio;

pub use lifecycle::{Lifecycle, LifecycleState};
pub use notify::{NotificationSender, RequestContext, broadcast};
pub use registry::{PromptRegistry, ResourceRegistry, ToolRegistry};
pub use session::{Session, SessionStore};

use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::protocol::{Implementation, Notification};
use crate::tools::{PromptHandler, ResourceHandler, ToolHandler};

/// Shared server state behind the `McpServer` handle.
pub struct ServerInner {
    pub(crate) info: Implementation,
    pub(crate) instructions: Option<String>,
    pub(crate) config: Config,
    pub(crate) tools: ToolRegistry,
    pub(crate) resources: ResourceRegistry,
    pub(crate) prompts: PromptRegistry,
    pub(crate) sessions: Arc<SessionStore>,
}

/// An MCP server. Cheap to clone; all clones share registries and the
/// session store.
#[derive(Clone)]
pub struct McpServer {
    inner: Arc<ServerInner>,
}

impl McpServer {
    /// Create a server with the given identity and configuration.
    #[must_use]
    pub fn new(name: impl Into<String>, version: impl Into<String>, config: Config) -> Self {
        let sessions = Arc::new(SessionStore::new(config.session_expiry));
        Self {
            inner: Arc::new(ServerInner {
                info: Implementation::new(name, version),
                instructions: None,
                config,
                tools: ToolRegistry::new(),
                resources: ResourceRegistry::new(),
                prompts: PromptRegistry::new(),
                sessions,
            }),
        }
    }

    /// Attach usage instructions reported from initialize.
    #[must_use]
    pub fn with_instructions(self, instructions: impl Into<String>) -> Self {
        // Only callable before the server is shared.
        let mut inner = Arc::try_unwrap(self.inner).unwrap_or_else(|_| {
            panic!("with_instructions must be called before the server is cloned")
        });
        inner.instructions = Some(instructions.into());
        Self { inner: Arc::new(inner) }
    }

    pub fn register_tool(&self, handler: Arc<dyn ToolHandler>) {
        self.inner.tools.register(handler);
    }

    pub fn register_resource(&self, handler: Arc<dyn ResourceHandler>) {
        self.inner.resources.register(handler);
    }

    pub fn register_prompt(&self, handler: Arc<dyn PromptHandler>) {
        self.inner.prompts.register(handler);
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.inner.sessions
    }

    pub(crate) fn inner(&self) -> &ServerInner {
        &self.inner
    }

    /// Push a notification to every active session; returns the number of
    /// sessions the frame could not be delivered to.
    pub async fn broadcast(&self, notification: &Notification) -> usize {
        notify::broadcast(&self.inner.sessions, notification).await
    }

    /// Build the axum router serving the streamable HTTP endpoint and the
    /// legacy SSE endpoint pair.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        http::router(self.clone())
    }

    /// Run the HTTP transports until ctrl-c.
    pub async fn run_http(self) -> anyhow::Result<()> {
        let addr: SocketAddr = self.inner.config.address.parse()?;
        Arc::clone(&self.inner.sessions).spawn_sweeper();

        tracing::info!(
            address = %addr,
            path = %self.inner.config.path,
            stateless = self.inner.config.stateless_mode,
            "Starting MCP server in HTTP mode"
        );

        let router = self.router();
        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, router).with_graceful_shutdown(shutdown_signal()).await?;

        tracing::info!("HTTP server shut down");
        Ok(())
    }

    /// Run the stdio transport until stdin closes.
    pub async fn run_stdio(self) -> anyhow::Result<()> {
        tracing::info!(tools = self.inner.tools.len(), "Starting MCP server in stdio mode");
        stdio::run(self).await
    }
}

impl std::fmt::Debug for McpServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("McpServer")
            .field("name", &self.inner.info.name)
            .field("tools", &self.inner.tools.len())
            .finish()
    }
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("Failed to install CTRL+C handler");
    tracing::info!("Received shutdown signal");
}
