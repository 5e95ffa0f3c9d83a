//! HTTP plumbing shared by the completion transport and the proxy API client.
//!
//! This module provides reusable HTTP client construction, header handling
//! and error decoding, plus the reqwest-backed [`CompletionTransport`].

use async_trait::async_trait;
use futures::{StreamExt, TryStreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;
use std::collections::HashMap;
use tracing::debug;

use crate::client::{ClientError, CompletionBody, CompletionTransport};
use crate::model::CompletionRequest;
use crate::options::TransportOptions;

/// reqwest client honouring the request timeout and outbound proxy.
///
/// An unparsable proxy URL is reported as [`ClientError::Config`].
pub fn build_http_client(options: &TransportOptions) -> Result<Client, ClientError> {
    let mut builder = Client::builder();

    if let Some(timeout) = options.timeout {
        builder = builder.timeout(timeout);
    }

    if let Some(proxy_url) = &options.proxy {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|e| ClientError::Config(format!("invalid proxy {}: {}", proxy_url, e)))?;
        builder = builder.proxy(proxy);
    }

    Ok(builder.build()?)
}

/// Attach the operator's extra headers (`-H Name: value`) to `request`.
pub fn add_extra_headers(
    request: RequestBuilder,
    headers: &Option<HashMap<String, String>>,
) -> RequestBuilder {
    headers
        .iter()
        .flatten()
        .fold(request, |request, (name, value)| request.header(name, value))
}

/// Turn a non-success response into an error, reading the body for detail.
pub(crate) async fn ensure_success(
    response: reqwest::Response,
) -> Result<reqwest::Response, ClientError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(handle_error_response(status, &body))
}

/// Decode an OpenAI-style error body when there is one.
pub(crate) fn handle_error_response(status: StatusCode, body: &str) -> ClientError {
    match serde_json::from_str::<ErrorResponse>(body) {
        Ok(ErrorResponse {
            error: ErrorBody::Detailed { message, kind },
        }) => match kind {
            Some(kind) => ClientError::ProviderError(format!("HTTP {} ({}): {}", status, kind, message)),
            None => ClientError::ProviderError(format!("HTTP {}: {}", status, message)),
        },
        Ok(ErrorResponse {
            error: ErrorBody::Plain(message),
        }) => ClientError::ProviderError(format!("HTTP {}: {}", status, message)),
        Err(_) if body.trim().is_empty() => ClientError::ProviderError(format!("HTTP {}", status)),
        Err(_) => ClientError::ProviderError(format!("HTTP {}: {}", status, body.trim())),
    }
}

/// Completion transport speaking HTTP to the adapter proxy.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
    options: TransportOptions,
}

impl HttpTransport {
    pub fn new(options: TransportOptions) -> Result<Self, ClientError> {
        let client = build_http_client(&options)?;
        Ok(Self { client, options })
    }

    pub fn options(&self) -> &TransportOptions {
        &self.options
    }
}

#[async_trait]
impl CompletionTransport for HttpTransport {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionBody, ClientError> {
        let url = self.options.completion_url();
        debug!(
            %url,
            model = request.model(),
            stream = request.stream(),
            messages = request.messages().len(),
            "posting completion request"
        );

        let mut req = self
            .client
            .post(&url)
            .header(CONTENT_TYPE, "application/json");
        if request.stream() {
            req = req.header(ACCEPT, "text/event-stream");
        }
        req = add_extra_headers(req, &self.options.extra_headers);

        let response = ensure_success(req.json(request).send().await?).await?;

        if response.status() == StatusCode::NO_CONTENT || response.content_length() == Some(0) {
            return Ok(CompletionBody::Empty);
        }

        if request.stream() {
            let bytes = response.bytes_stream().map_err(ClientError::from).boxed();
            Ok(CompletionBody::Stream(bytes))
        } else {
            Ok(CompletionBody::Document(response.bytes().await?))
        }
    }
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ErrorBody {
    Detailed {
        message: String,
        #[serde(rename = "type", default)]
        kind: Option<String>,
    },
    Plain(String),
}
