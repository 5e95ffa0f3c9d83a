//! Completion client, transport trait and error types.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::model::CompletionRequest;
use crate::options::ToolCallMode;
use crate::response::consume_document;
use crate::store::MessageStore;
use crate::stream::{StreamConsumer, StreamSummary};

/// Errors that can occur during client operations.
#[derive(Error, Debug)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Provider error: {0}")]
    ProviderError(String),

    #[error("Streaming is not supported for this response: no body to read")]
    UnsupportedStreaming,

    #[error("Stream cancelled")]
    StreamCancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Session closed")]
    SessionClosed,
}

/// Raw response bytes as they come off the wire.
pub type ByteStream = BoxStream<'static, Result<Bytes, ClientError>>;

/// Body of a successful completion response.
pub enum CompletionBody {
    /// Fully buffered body.
    Document(Bytes),
    /// Body still arriving.
    Stream(ByteStream),
    /// The response had no body at all.
    Empty,
}

impl std::fmt::Debug for CompletionBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CompletionBody::Document(bytes) => write!(f, "Document({} bytes)", bytes.len()),
            CompletionBody::Stream(_) => f.write_str("Stream(..)"),
            CompletionBody::Empty => f.write_str("Empty"),
        }
    }
}

/// Sends a completion request and hands back the response body.
///
/// Implementations report non-success statuses and network failures as
/// errors; they never retry.
///
/// # Example
/// ```rust,ignore
/// struct Canned(&'static str);
///
/// #[async_trait]
/// impl CompletionTransport for Canned {
///     async fn send(&self, _request: &CompletionRequest) -> Result<CompletionBody, ClientError> {
///         Ok(CompletionBody::Document(Bytes::from_static(self.0.as_bytes())))
///     }
/// }
/// ```
#[async_trait]
pub trait CompletionTransport: Send + Sync {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionBody, ClientError>;
}

#[async_trait]
impl<T: CompletionTransport + ?Sized> CompletionTransport for std::sync::Arc<T> {
    async fn send(&self, request: &CompletionRequest) -> Result<CompletionBody, ClientError> {
        (**self).send(request).await
    }
}

/// What a completed call produced.
#[derive(Debug, Clone)]
pub enum Completion {
    /// Non-streamed response; the decoded document is kept for inspection.
    Document(Value),
    /// Streamed response.
    Streamed(StreamSummary),
}

/// Routes a request to the streaming or non-streaming consumer.
#[derive(Debug)]
pub struct CompletionClient<T> {
    transport: T,
}

impl<T: CompletionTransport> CompletionClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Perform the request and fold the response into `store`.
    ///
    /// With `stream` set, assistant messages are committed at every finish
    /// boundary as they are observed. Otherwise the whole document is decoded
    /// before anything is appended.
    pub async fn complete(
        &self,
        request: &CompletionRequest,
        store: &mut MessageStore,
        mode: ToolCallMode,
    ) -> Result<Completion, ClientError> {
        let body = self.transport.send(request).await?;
        debug!(stream = request.stream(), body = ?body, "completion response received");

        if request.stream() {
            let bytes = match body {
                CompletionBody::Stream(bytes) => bytes,
                CompletionBody::Document(bytes) if !bytes.is_empty() => {
                    stream::once(async move { Ok::<_, ClientError>(bytes) }).boxed()
                }
                CompletionBody::Document(_) | CompletionBody::Empty => {
                    return Err(ClientError::UnsupportedStreaming)
                }
            };
            let summary = StreamConsumer::new(mode).consume(bytes, store).await?;
            Ok(Completion::Streamed(summary))
        } else {
            let bytes = match body {
                CompletionBody::Document(bytes) => bytes,
                CompletionBody::Stream(chunks) => collect_bytes(chunks).await?,
                CompletionBody::Empty => Bytes::new(),
            };
            consume_document(&bytes, store).map(Completion::Document)
        }
    }
}

async fn collect_bytes(chunks: ByteStream) -> Result<Bytes, ClientError> {
    let buffer = chunks
        .try_fold(Vec::new(), |mut buffer, chunk| async move {
            buffer.extend_from_slice(&chunk);
            Ok::<_, ClientError>(buffer)
        })
        .await?;
    Ok(Bytes::from(buffer))
}
