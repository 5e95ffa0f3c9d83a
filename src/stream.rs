//! Streaming completion consumer.
//!
//! Folds SSE frames into an accumulation state and commits one assistant
//! message to the store at every `finish_reason` boundary. If the stream
//! ends while text is still pending, that text is committed as well.
//!
//! Consumption suspends only while waiting for the next chunk of bytes; all
//! frames decoded from a chunk are applied synchronously.

use futures::{Stream, StreamExt};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::{debug, warn};

use bytes::Bytes;

use crate::client::ClientError;
use crate::model::{FinishReason, Message, ToolCall};
use crate::options::ToolCallMode;
use crate::sse::{SseFrame, SseStreamExt};
use crate::store::MessageStore;

/// Appended to the text for each delta that carried tool-call fragments when
/// running in [`ToolCallMode::Marker`].
pub const TOOL_CALL_MARKER: &str = "[tool_calls]";

/// Counters describing one consumed stream.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamSummary {
    /// Data frames received, including `[DONE]` and malformed ones.
    pub frames: usize,
    /// Frames dropped because their payload was not valid JSON.
    pub skipped: usize,
    /// Assistant messages appended to the store.
    pub committed: usize,
    /// Whether the `[DONE]` sentinel was seen.
    pub done: bool,
    /// Whether pending text was committed because the stream closed without a
    /// finish boundary.
    pub implicit_finish: bool,
    /// Finish reasons in the order they were observed.
    pub finish_reasons: Vec<FinishReason>,
    /// `error` objects relayed in-band, e.g. an upstream failure the proxy
    /// forwards as a data frame after already answering 200.
    pub errors: Vec<Value>,
}

/// Partial assistant output since the last finish boundary.
#[derive(Debug, Default)]
struct Accumulation {
    text: String,
    tool_call_markers: usize,
    tool_calls: BTreeMap<u32, ToolCall>,
}

impl Accumulation {
    fn is_empty(&self) -> bool {
        self.text.is_empty() && self.tool_calls.is_empty()
    }

    /// Turn the accumulated state into a message and start over.
    fn take_message(&mut self) -> Message {
        let Accumulation {
            text, tool_calls, ..
        } = std::mem::take(self);
        let tool_calls: Vec<ToolCall> = tool_calls.into_values().collect();
        if text.is_empty() && !tool_calls.is_empty() {
            Message::assistant_tool_calls(tool_calls)
        } else {
            Message::assistant(text).with_tool_calls(tool_calls)
        }
    }

    fn merge_tool_call(&mut self, position: usize, fragment: ToolCallDelta) {
        let index = fragment.index.unwrap_or(position as u32);
        let call = self.tool_calls.entry(index).or_default();

        if let Some(id) = fragment.id.filter(|id| !id.is_empty()) {
            call.id = id;
        }
        if let Some(kind) = fragment.kind {
            call.kind = kind;
        }
        if let Some(function) = fragment.function {
            if let Some(name) = function.name {
                call.function.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                call.function.arguments.push_str(&arguments);
            }
        }
    }
}

/// Stateful consumer for one streamed response.
#[derive(Debug)]
pub struct StreamConsumer {
    mode: ToolCallMode,
    pending: Accumulation,
    summary: StreamSummary,
}

impl StreamConsumer {
    pub fn new(mode: ToolCallMode) -> Self {
        Self {
            mode,
            pending: Accumulation::default(),
            summary: StreamSummary::default(),
        }
    }

    /// Drain `bytes` into `store`.
    ///
    /// A transport error ends consumption: messages committed at earlier
    /// boundaries stay, pending text is dropped and the error is returned.
    pub async fn consume<S>(
        mut self,
        bytes: S,
        store: &mut MessageStore,
    ) -> Result<StreamSummary, ClientError>
    where
        S: Stream<Item = Result<Bytes, ClientError>> + Send + 'static,
    {
        let frames = bytes.sse_frames();
        futures::pin_mut!(frames);

        while let Some(frame) = frames.next().await {
            match frame {
                Ok(frame) => self.apply(frame, store),
                Err(e) => {
                    warn!(
                        pending = self.pending.text.len(),
                        committed = self.summary.committed,
                        "stream failed: {}",
                        e
                    );
                    return Err(e);
                }
            }
        }

        Ok(self.finish(store))
    }

    /// Apply one frame. Never fails: a malformed payload is logged and skipped.
    pub fn apply(&mut self, frame: SseFrame, store: &mut MessageStore) {
        self.summary.frames += 1;

        let payload = match frame {
            SseFrame::Done => {
                self.summary.done = true;
                return;
            }
            SseFrame::Data(payload) => payload,
        };

        let chunk: StreamChunk = match serde_json::from_str(&payload) {
            Ok(chunk) => chunk,
            Err(e) => {
                self.summary.skipped += 1;
                warn!("skipping malformed stream frame: {} | payload: {}", e, payload);
                return;
            }
        };

        if let Some(error) = chunk.error.filter(|e| !e.is_null()) {
            warn!("error relayed in stream: {}", error);
            self.summary.errors.push(error);
        }

        for choice in chunk.choices.unwrap_or_default() {
            if let Some(delta) = choice.delta {
                if let Some(content) = delta.content {
                    self.pending.text.push_str(&content);
                }
                if let Some(calls) = delta.tool_calls.filter(|c| !c.is_empty()) {
                    self.apply_tool_calls(calls);
                }
            }

            if let Some(reason) = choice.finish_reason.filter(|r| !r.is_null()) {
                let reason = match reason {
                    Value::String(s) => FinishReason::from(s.as_str()),
                    other => FinishReason::Other(other.to_string()),
                };
                self.commit(store, reason);
            }
        }
    }

    /// Close the stream, committing any text that never saw a finish boundary.
    pub fn finish(mut self, store: &mut MessageStore) -> StreamSummary {
        if !self.pending.is_empty() {
            debug!("stream closed without finish_reason, committing pending text");
            self.summary.implicit_finish = true;
            self.commit_pending(store);
        }
        self.summary
    }

    fn apply_tool_calls(&mut self, calls: Vec<ToolCallDelta>) {
        match self.mode {
            ToolCallMode::Marker => {
                self.pending.tool_call_markers += 1;
                self.pending.text.push_str(TOOL_CALL_MARKER);
            }
            ToolCallMode::Structured => {
                for (position, call) in calls.into_iter().enumerate() {
                    self.pending.merge_tool_call(position, call);
                }
            }
        }
    }

    fn commit(&mut self, store: &mut MessageStore, reason: FinishReason) {
        debug!(?reason, "finish boundary");
        self.summary.finish_reasons.push(reason);
        self.commit_pending(store);
    }

    fn commit_pending(&mut self, store: &mut MessageStore) {
        let markers = self.pending.tool_call_markers;
        let message = self.pending.take_message();
        debug!(
            chars = message.text().chars().count(),
            tool_calls = message.tool_calls().len(),
            markers,
            "committing assistant message"
        );
        store.append(message);
        self.summary.committed += 1;
    }
}

// --- Stream frame types ---

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Option<Vec<StreamChoice>>,
    #[serde(default)]
    error: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: Option<Delta>,
    #[serde(default)]
    finish_reason: Option<Value>,
}

#[derive(Debug, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ToolCallDelta>>,
}

#[derive(Debug, Deserialize)]
struct ToolCallDelta {
    #[serde(default)]
    index: Option<u32>,
    #[serde(default)]
    id: Option<String>,
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    function: Option<FunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct FunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}
