//! Client for the proxy's management endpoints: runtime configuration,
//! tool-definition parsing, model listing and the upstream probe.
//!
//! These are plain request/response calls; nothing here touches a session.

use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::client::ClientError;
use crate::http::{add_extra_headers, build_http_client, ensure_success};
use crate::options::{parse_flag, TransportOptions};

pub const CONFIG_PATH: &str = "/api/config";
pub const PARSE_TOOLS_PATH: &str = "/api/parse-tools";
pub const MODELS_PATH: &str = "/v1/models";
pub const PROBE_PATH: &str = "/api/test-upstream";

/// Runtime configuration of the proxy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ProxyConfig {
    /// Upstream OpenAI-compatible base URL the proxy forwards to
    #[serde(default)]
    pub target_base_url: String,

    #[serde(default)]
    pub message_dump_path: Option<String>,

    #[serde(default)]
    pub tool_dump_path: Option<String>,

    #[serde(default)]
    pub disable_strict_schemas: bool,

    #[serde(default)]
    pub force_tool_calling: bool,
}

/// Partial update; only the fields that are set are sent.
#[derive(Debug, Clone, Serialize, Default, PartialEq)]
pub struct ConfigUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_dump_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_dump_path: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub disable_strict_schemas: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub force_tool_calling: Option<bool>,
}

impl ConfigUpdate {
    /// Set one field by its wire name.
    pub fn set(&mut self, key: &str, value: &str) -> Result<(), ClientError> {
        match key {
            "target_base_url" => self.target_base_url = Some(value.to_string()),
            "message_dump_path" => self.message_dump_path = Some(value.to_string()),
            "tool_dump_path" => self.tool_dump_path = Some(value.to_string()),
            "disable_strict_schemas" => self.disable_strict_schemas = Some(parse_flag(value)),
            "force_tool_calling" => self.force_tool_calling = Some(parse_flag(value)),
            other => return Err(ClientError::Config(format!("unknown config key: {}", other))),
        }
        Ok(())
    }
}

/// Result of parsing tool definitions out of a system prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ToolDefinitions {
    /// OpenAI function tool schemas derived from the prompt
    #[serde(default)]
    pub schemas: Vec<Value>,

    /// The prompt with its tool section rewritten for native tool calling
    #[serde(default)]
    pub processed_system_prompt: String,
}

impl ToolDefinitions {
    /// Function names of the extracted schemas.
    pub fn tool_names(&self) -> Vec<&str> {
        self.schemas
            .iter()
            .filter_map(|s| s.pointer("/function/name").and_then(Value::as_str))
            .collect()
    }
}

#[derive(Debug, Serialize)]
struct ParseToolsRequest<'a> {
    system_prompt: &'a str,
    strict: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelList {
    #[serde(default)]
    pub data: Vec<ModelInfo>,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct ModelInfo {
    pub id: String,
    #[serde(default)]
    pub owned_by: Option<String>,
}

/// Reachability of the upstream as seen from the proxy.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct UpstreamProbe {
    pub ok: bool,
    #[serde(default)]
    pub status_code: Option<u16>,
    #[serde(default)]
    pub latency_ms: f64,
    #[serde(default)]
    pub error: Option<String>,
}

/// HTTP client for the proxy's management API.
#[derive(Debug, Clone)]
pub struct ProxyApi {
    client: Client,
    options: TransportOptions,
}

impl ProxyApi {
    pub fn new(options: TransportOptions) -> Result<Self, ClientError> {
        let client = build_http_client(&options)?;
        Ok(Self { client, options })
    }

    pub async fn config(&self) -> Result<ProxyConfig, ClientError> {
        self.get_json(CONFIG_PATH).await
    }

    pub async fn update_config(&self, update: &ConfigUpdate) -> Result<ProxyConfig, ClientError> {
        self.post_json(CONFIG_PATH, update).await
    }

    /// Parse tool definitions from `system_prompt`. `strict` of `None` lets the
    /// proxy apply its configured default.
    pub async fn parse_tools(
        &self,
        system_prompt: &str,
        strict: Option<bool>,
    ) -> Result<ToolDefinitions, ClientError> {
        self.post_json(
            PARSE_TOOLS_PATH,
            &ParseToolsRequest {
                system_prompt,
                strict,
            },
        )
        .await
    }

    pub async fn list_models(&self) -> Result<ModelList, ClientError> {
        self.get_json(MODELS_PATH).await
    }

    pub async fn probe_upstream(&self) -> Result<UpstreamProbe, ClientError> {
        self.get_json(PROBE_PATH).await
    }

    async fn get_json<R: DeserializeOwned>(&self, path: &str) -> Result<R, ClientError> {
        let url = self.options.url(path);
        debug!(%url, "GET");
        let req = add_extra_headers(self.client.get(&url), &self.options.extra_headers);
        let response = ensure_success(req.send().await?).await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }

    async fn post_json<B: Serialize + ?Sized, R: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<R, ClientError> {
        let url = self.options.url(path);
        debug!(%url, "POST");
        let req = add_extra_headers(self.client.post(&url), &self.options.extra_headers);
        let response = ensure_success(req.json(body).send().await?).await?;
        Ok(serde_json::from_slice(&response.bytes().await?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_update_serializes_only_set_fields() {
        let mut update = ConfigUpdate::default();
        update.set("target_base_url", "http://upstream/v1").unwrap();
        update.set("force_tool_calling", "true").unwrap();

        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"target_base_url": "http://upstream/v1", "force_tool_calling": true})
        );
    }

    #[test]
    fn test_config_update_unknown_key() {
        let mut update = ConfigUpdate::default();
        assert!(matches!(
            update.set("port", "8000"),
            Err(ClientError::Config(_))
        ));
    }

    #[test]
    fn test_tool_names() {
        let definitions: ToolDefinitions = serde_json::from_value(json!({
            "schemas": [
                {"type": "function", "function": {"name": "read_file", "parameters": {}}},
                {"type": "function", "function": {"name": "write_to_file", "parameters": {}}}
            ],
            "processed_system_prompt": "p"
        }))
        .unwrap();
        assert_eq!(definitions.tool_names(), vec!["read_file", "write_to_file"]);
    }

    #[test]
    fn test_probe_failure_shape() {
        let probe: UpstreamProbe = serde_json::from_value(json!({
            "ok": false,
            "error": "connection refused",
            "latency_ms": 2.5
        }))
        .unwrap();
        assert!(!probe.ok);
        assert_eq!(probe.status_code, None);
        assert_eq!(probe.error.as_deref(), Some("connection refused"));
    }
}
