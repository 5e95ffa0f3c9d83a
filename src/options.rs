//! Transport and session configuration.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// Where the tool-call adapter proxy listens by default.
pub const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8000";

/// OpenAI-compatible chat completions route on the proxy.
pub const DEFAULT_COMPLETION_PATH: &str = "/v1/chat/completions";

pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

const ENV_BASE_URL: &str = "ADAPTER_CONSOLE_URL";
const ENV_MODEL: &str = "ADAPTER_CONSOLE_MODEL";
const ENV_STREAM: &str = "ADAPTER_CONSOLE_STREAM";

/// HTTP transport configuration shared by the completion transport and the
/// proxy API client.
///
/// # Example
/// ```rust
/// use adapter_console::options::TransportOptions;
/// use std::time::Duration;
///
/// let options = TransportOptions::default()
///     .with_base_url("http://localhost:8000/".to_string())
///     .with_timeout(Duration::from_secs(30));
///
/// assert_eq!(options.completion_url(), "http://localhost:8000/v1/chat/completions");
/// ```
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Base URL of the proxy, without a trailing path
    pub base_url: String,

    /// Path of the chat completions endpoint
    pub completion_path: String,

    /// Request timeout, applied to the whole request including the streamed body
    pub timeout: Option<Duration>,

    /// Outbound HTTP proxy, e.g. for inspecting traffic
    pub proxy: Option<String>,

    /// Headers sent with every request (completion and management calls)
    pub extra_headers: Option<HashMap<String, String>>,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            completion_path: DEFAULT_COMPLETION_PATH.to_string(),
            timeout: None,
            proxy: None,
            extra_headers: None,
        }
    }
}

impl TransportOptions {
    /// Defaults, with the base URL taken from `ADAPTER_CONSOLE_URL` when set.
    pub fn from_env() -> Self {
        let options = Self::default();
        match std::env::var(ENV_BASE_URL) {
            Ok(url) if !url.trim().is_empty() => options.with_base_url(url),
            _ => options,
        }
    }

    /// Set the base URL. A trailing slash is dropped.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url.trim_end_matches('/').to_string();
        self
    }

    /// Set the completion endpoint path.
    pub fn with_completion_path(mut self, path: String) -> Self {
        self.completion_path = path;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Route requests through an outbound HTTP proxy.
    pub fn with_proxy(mut self, proxy: String) -> Self {
        self.proxy = Some(proxy);
        self
    }

    pub fn with_extra_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.extra_headers = Some(headers);
        self
    }

    /// Add one header; a repeated name replaces the earlier value.
    pub fn with_header(mut self, name: String, value: String) -> Self {
        self.extra_headers
            .get_or_insert_with(HashMap::new)
            .insert(name, value);
        self
    }

    /// Absolute URL for a path on the proxy.
    pub fn url(&self, path: &str) -> String {
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    pub fn completion_url(&self) -> String {
        self.url(&self.completion_path)
    }
}

/// How streamed `delta.tool_calls` fragments are folded into the message.
#[derive(Debug, Copy, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ToolCallMode {
    /// Append a fixed marker to the text for every delta carrying tool calls.
    #[default]
    Marker,

    /// Merge fragments per tool-call index into structured `tool_calls`.
    Structured,
}

/// Per-session request options.
///
/// # Example
/// ```rust
/// use adapter_console::options::{SessionOptions, ToolCallMode};
///
/// let options = SessionOptions::new("gpt-4o")
///     .with_stream(true)
///     .with_system_prompt("You are a coding agent.")
///     .with_tool_call_mode(ToolCallMode::Structured);
///
/// assert!(options.stream);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionOptions {
    /// Model identifier sent to the proxy
    pub model: String,

    /// Request a streamed (SSE) response
    pub stream: bool,

    /// Raw system prompt, used when no processed prompt is available
    pub system_prompt: Option<String>,

    /// System prompt as rewritten by the proxy's tool-definition parser
    pub processed_system_prompt: Option<String>,

    pub tool_call_mode: ToolCallMode,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self::new(DEFAULT_MODEL)
    }
}

impl SessionOptions {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            stream: false,
            system_prompt: None,
            processed_system_prompt: None,
            tool_call_mode: ToolCallMode::default(),
        }
    }

    /// Defaults overridden by `ADAPTER_CONSOLE_MODEL` and `ADAPTER_CONSOLE_STREAM`.
    pub fn from_env() -> Self {
        let mut options = Self::default();
        if let Ok(model) = std::env::var(ENV_MODEL) {
            if !model.trim().is_empty() {
                options.model = model;
            }
        }
        if let Ok(flag) = std::env::var(ENV_STREAM) {
            options.stream = parse_flag(&flag);
        }
        options
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_stream(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_processed_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.processed_system_prompt = Some(prompt.into());
        self
    }

    pub fn with_tool_call_mode(mut self, mode: ToolCallMode) -> Self {
        self.tool_call_mode = mode;
        self
    }
}

/// Environment flag semantics: anything except empty, `0` and `false` is on.
pub fn parse_flag(value: &str) -> bool {
    !matches!(value.trim().to_ascii_lowercase().as_str(), "" | "0" | "false" | "off" | "no")
}
