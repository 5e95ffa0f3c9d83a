use adapter_console::http::HttpTransport;
use adapter_console::model::Role;
use adapter_console::options::{SessionOptions, ToolCallMode, TransportOptions};
use adapter_console::{ClientError, Completion, Message, Session};
use serde_json::json;
use wiremock::matchers::{body_partial_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn transport_for(server: &MockServer) -> HttpTransport {
    HttpTransport::new(
        TransportOptions::default()
            .with_base_url(server.uri())
            .with_header("X-Console".to_string(), "test".to_string()),
    )
    .unwrap()
}

fn texts(messages: &[Message]) -> Vec<String> {
    messages.iter().map(|m| m.text().into_owned()).collect()
}

#[tokio::test]
async fn test_non_streaming_completion() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("x-console", "test"))
        .and(body_partial_json(json!({
            "model": "gpt-4o",
            "stream": false,
            "messages": [
                {"role": "system", "content": "Be terse."},
                {"role": "user", "content": "Hello?"}
            ]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "chatcmpl-1",
            "object": "chat.completion",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Hi!", "refusal": null},
                "finish_reason": "stop"
            }]
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let options = SessionOptions::new("gpt-4o").with_system_prompt("Be terse.");
    let mut session = Session::new(transport_for(&mock_server), options);

    let completion = session.send(Role::User, "Hello?").await.unwrap();
    assert!(matches!(completion, Completion::Document(_)));

    let messages = session.messages().snapshot();
    assert_eq!(texts(&messages), vec!["Hello?", "Hi!"]);
    assert_eq!(messages[1].role(), Role::Assistant);
    assert!(messages[1].extra().contains_key("refusal"));
}

#[tokio::test]
async fn test_streaming_completion() {
    let mock_server = MockServer::start().await;

    let sse = concat!(
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"Hel\"}}]}\n\n",
        ": keep-alive\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"lo ü\"}}]}\n\n",
        "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"stop\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .and(header("accept", "text/event-stream"))
        .and(body_partial_json(json!({"stream": true})))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .expect(1)
        .mount(&mock_server)
        .await;

    let options = SessionOptions::new("gpt-4o").with_stream(true);
    let mut session = Session::new(transport_for(&mock_server), options);

    let completion = session.send(Role::User, "Hello?").await.unwrap();
    let Completion::Streamed(summary) = completion else {
        panic!("expected a streamed completion");
    };
    assert_eq!(summary.committed, 1);
    assert!(summary.done);
    assert!(!summary.implicit_finish);

    let messages = session.messages().snapshot();
    assert_eq!(texts(&messages), vec!["Hello?", "Hello ü"]);
}

#[tokio::test]
async fn test_streaming_tool_calls_structured() {
    let mock_server = MockServer::start().await;

    let sse = concat!(
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"read_file\",\"arguments\":\"\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"path\\\":\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"a.rs\\\"}\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let options = SessionOptions::new("gpt-4o")
        .with_stream(true)
        .with_tool_call_mode(ToolCallMode::Structured);
    let mut session = Session::new(transport_for(&mock_server), options);

    session.send(Role::User, "open a.rs").await.unwrap();

    let last = session.messages().last().cloned().unwrap();
    assert_eq!(last.role(), Role::Assistant);
    let calls = last.tool_calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].id, "call_1");
    assert_eq!(calls[0].function.name, "read_file");
    assert_eq!(calls[0].function.arguments, r#"{"path":"a.rs"}"#);
}

#[tokio::test]
async fn test_error_status_appends_nothing() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({
            "error": {"message": "upstream exploded", "type": "server_error"}
        })))
        .mount(&mock_server)
        .await;

    let mut session = Session::new(
        transport_for(&mock_server),
        SessionOptions::new("gpt-4o").with_stream(true),
    );

    let err = session.send(Role::User, "Hello?").await.unwrap_err();
    match err {
        ClientError::ProviderError(message) => {
            assert!(message.contains("500"));
            assert!(message.contains("upstream exploded"));
        }
        other => panic!("unexpected error: {:?}", other),
    }

    let messages = session.messages().snapshot();
    assert_eq!(texts(&messages), vec!["Hello?"]);
}

#[tokio::test]
async fn test_streaming_request_with_empty_body_is_unsupported() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&mock_server)
        .await;

    let mut session = Session::new(
        transport_for(&mock_server),
        SessionOptions::new("gpt-4o").with_stream(true),
    );

    let err = session.send(Role::User, "Hello?").await.unwrap_err();
    assert!(matches!(err, ClientError::UnsupportedStreaming));
    assert_eq!(session.messages().len(), 1);
}

#[tokio::test]
async fn test_upstream_error_relayed_in_stream() {
    let mock_server = MockServer::start().await;

    let sse = concat!(
        "data: {\"error\":{\"message\":\"upstream exploded\",\"type\":\"server_error\"}}\n\n",
        "data: [DONE]\n\n",
    );

    Mock::given(method("POST"))
        .and(path("/v1/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(sse, "text/event-stream"))
        .mount(&mock_server)
        .await;

    let mut session = Session::new(
        transport_for(&mock_server),
        SessionOptions::new("gpt-4o").with_stream(true),
    );

    let completion = session.send(Role::User, "Hello?").await.unwrap();
    let Completion::Streamed(summary) = completion else {
        panic!("expected a streamed completion");
    };
    assert_eq!(summary.committed, 0);
    assert_eq!(summary.errors.len(), 1);
    assert_eq!(summary.errors[0]["message"], "upstream exploded");
    assert_eq!(session.messages().len(), 1);
}
