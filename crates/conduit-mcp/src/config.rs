//! Configuration for servers and client transports.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Defaults shared across the runtime.
pub mod defaults {
    use std::time::Duration;

    /// Bind address for the HTTP server.
    pub const ADDRESS: &str = "127.0.0.1:3000";

    /// Path of the streamable HTTP endpoint.
    pub const PATH: &str = "/mcp";

    /// Idle window after which a session is swept.
    pub const SESSION_EXPIRY: Duration = Duration::from_secs(3600);

    /// Interval of the background expiry sweep.
    pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

    /// Capacity of a session's outbound notification channel.
    pub const NOTIFY_CHANNEL_CAPACITY: usize = 64;

    /// How long a producer blocks on a full notification channel before the
    /// frame is dropped and logged.
    pub const NOTIFY_SEND_TIMEOUT: Duration = Duration::from_secs(1);

    /// Default per-request deadline on the client side.
    pub const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    /// Grace period between stdin EOF and killing a stdio child.
    pub const CLOSE_GRACE: Duration = Duration::from_secs(2);
}

/// Server configuration. Every field has a usable default.
#[derive(Debug, Clone)]
pub struct Config {
    /// Bind address, host:port.
    pub address: String,

    /// Endpoint path for the streamable HTTP transport.
    pub path: String,

    /// When true, no sessions are allocated and every request is
    /// self-contained.
    pub stateless_mode: bool,

    /// Idle window before a session is swept.
    pub session_expiry: Duration,

    /// Whether a POST may be answered with an SSE stream.
    pub post_sse_enabled: bool,

    /// Whether the long-lived GET notification stream is served.
    pub get_sse_enabled: bool,

    /// Base URL used in legacy SSE endpoint announcements. When unset the
    /// announced endpoint is a relative URL the client resolves.
    pub base_url: Option<String>,
}

impl Config {
    #[must_use]
    pub fn new() -> Self {
        Self {
            address: defaults::ADDRESS.to_string(),
            path: defaults::PATH.to_string(),
            stateless_mode: false,
            session_expiry: defaults::SESSION_EXPIRY,
            post_sse_enabled: true,
            get_sse_enabled: false,
            base_url: None,
        }
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    #[must_use]
    pub const fn stateless(mut self, stateless: bool) -> Self {
        self.stateless_mode = stateless;
        self
    }

    #[must_use]
    pub const fn post_sse(mut self, enabled: bool) -> Self {
        self.post_sse_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn get_sse(mut self, enabled: bool) -> Self {
        self.get_sse_enabled = enabled;
        self
    }

    #[must_use]
    pub const fn session_expiry(mut self, window: Duration) -> Self {
        self.session_expiry = window;
        self
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

/// Reconnect schedule for the client's long-lived GET stream.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Base delay for the exponential backoff calculation.
    pub base: Duration,
    /// Cap on the delay between attempts.
    pub max_delay: Duration,
    /// Maximum number of attempts, `None` for unlimited.
    pub max_attempts: Option<u32>,
}

impl RetryPolicy {
    /// Delay before the given attempt, `None` once attempts are exhausted.
    /// Applies ±25% jitter derived from the attempt counter so reconnecting
    /// clients do not synchronize.
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if let Some(max) = self.max_attempts {
            if attempt >= max {
                return None;
            }
        }
        let base = self.base.as_millis() as u64;
        let capped = base.saturating_mul(2u64.saturating_pow(attempt)).min(self.max_delay.as_millis() as u64);
        let jitter_range = capped / 4;
        let jitter_offset = if jitter_range > 0 {
            let hash = u64::from(attempt)
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            hash % (jitter_range * 2)
        } else {
            0
        };
        let delay = capped.saturating_sub(jitter_range).saturating_add(jitter_offset);
        Some(Duration::from_millis(delay))
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            max_attempts: Some(10),
        }
    }
}

/// Configuration of the streamable HTTP client transport.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Full endpoint URL, e.g. `http://127.0.0.1:3000/mcp`.
    pub endpoint: String,

    /// Default per-request deadline. A per-call deadline composes with this
    /// first-to-fire.
    pub request_timeout: Duration,

    /// Reconnect schedule for the long-lived GET stream.
    pub retry: RetryPolicy,
}

impl HttpClientConfig {
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            request_timeout: defaults::REQUEST_TIMEOUT,
            retry: RetryPolicy::default(),
        }
    }

    #[must_use]
    pub const fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }
}

/// Configuration of the stdio child-process client transport.
#[derive(Debug, Clone)]
pub struct StdioClientConfig {
    /// Command to spawn.
    pub command: String,

    /// Arguments passed to the command.
    pub args: Vec<String>,

    /// Environment overrides layered on top of the parent environment.
    pub env: HashMap<String, String>,

    /// Working directory of the child; inherits the parent's when unset.
    pub working_dir: Option<PathBuf>,

    /// Global per-operation deadline; a per-call deadline composes with
    /// this first-to-fire.
    pub timeout: Duration,
}

impl StdioClientConfig {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            env: HashMap::new(),
            working_dir: None,
            timeout: defaults::REQUEST_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    #[must_use]
    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}
