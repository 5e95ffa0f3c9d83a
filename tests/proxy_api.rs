use adapter_console::options::TransportOptions;
use adapter_console::proxy_api::{ConfigUpdate, ProxyApi};
use adapter_console::ClientError;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn api_for(server: &MockServer) -> ProxyApi {
    ProxyApi::new(TransportOptions::default().with_base_url(server.uri())).unwrap()
}

#[tokio::test]
async fn test_fetch_and_update_config() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/config"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "target_base_url": "https://api.openai.com/v1",
            "message_dump_path": null,
            "tool_dump_path": "tools.json",
            "disable_strict_schemas": false,
            "force_tool_calling": false
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path("/api/config"))
        .and(body_json(json!({"force_tool_calling": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "target_base_url": "https://api.openai.com/v1",
            "tool_dump_path": "tools.json",
            "disable_strict_schemas": false,
            "force_tool_calling": true
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let api = api_for(&mock_server);

    let config = api.config().await.unwrap();
    assert_eq!(config.target_base_url, "https://api.openai.com/v1");
    assert_eq!(config.tool_dump_path.as_deref(), Some("tools.json"));
    assert!(!config.force_tool_calling);

    let mut update = ConfigUpdate::default();
    update.set("force_tool_calling", "on").unwrap();
    let config = api.update_config(&update).await.unwrap();
    assert!(config.force_tool_calling);
}

#[tokio::test]
async fn test_parse_tools() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/parse-tools"))
        .and(body_json(json!({"system_prompt": "TOOLS: read_file", "strict": null})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "schemas": [
                {"type": "function", "function": {"name": "read_file", "parameters": {"type": "object"}}}
            ],
            "processed_system_prompt": "Use the provided tools."
        })))
        .mount(&mock_server)
        .await;

    let definitions = api_for(&mock_server)
        .parse_tools("TOOLS: read_file", None)
        .await
        .unwrap();
    assert_eq!(definitions.tool_names(), vec!["read_file"]);
    assert_eq!(definitions.processed_system_prompt, "Use the provided tools.");
}

#[tokio::test]
async fn test_list_models_and_probe() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "object": "list",
            "data": [
                {"id": "gpt-4o", "object": "model", "owned_by": "openai"},
                {"id": "gpt-4o-mini", "object": "model"}
            ]
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/api/test-upstream"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "ok": true,
            "status_code": 200,
            "latency_ms": 41.7
        })))
        .mount(&mock_server)
        .await;

    let api = api_for(&mock_server);

    let models = api.list_models().await.unwrap();
    let ids: Vec<_> = models.data.iter().map(|m| m.id.as_str()).collect();
    assert_eq!(ids, vec!["gpt-4o", "gpt-4o-mini"]);
    assert_eq!(models.data[0].owned_by.as_deref(), Some("openai"));

    let probe = api.probe_upstream().await.unwrap();
    assert!(probe.ok);
    assert_eq!(probe.status_code, Some(200));
}

#[tokio::test]
async fn test_error_status_is_provider_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/models"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&mock_server)
        .await;

    let err = api_for(&mock_server).list_models().await.unwrap_err();
    match err {
        ClientError::ProviderError(message) => {
            assert_eq!(message, "HTTP 502 Bad Gateway: bad gateway");
        }
        other => panic!("unexpected error: {:?}", other),
    }
}
