//! Session controller: one conversation, its options and its transport.

use tracing::{debug, info};

use crate::client::{ClientError, Completion, CompletionClient, CompletionTransport};
use crate::model::{Content, Message, Role};
use crate::options::SessionOptions;
use crate::payload::build_request;
use crate::proxy_api::ToolDefinitions;
use crate::store::MessageStore;

/// An interactive conversation.
///
/// All state lives in this value and is mutated only through `&mut self`, so
/// a session is driven from a single task. Use
/// [`SessionHandle`](crate::actor::SessionHandle) to reset a session while a
/// completion is in flight.
#[derive(Debug)]
pub struct Session<T> {
    client: CompletionClient<T>,
    store: MessageStore,
    options: SessionOptions,
}

impl<T: CompletionTransport> Session<T> {
    pub fn new(transport: T, options: SessionOptions) -> Self {
        Self {
            client: CompletionClient::new(transport),
            store: MessageStore::new(),
            options,
        }
    }

    /// Append a message and run a completion over the whole history.
    ///
    /// On error the sent message stays in history but no assistant output is
    /// appended.
    pub async fn send(
        &mut self,
        role: Role,
        content: impl Into<Content>,
    ) -> Result<Completion, ClientError> {
        self.send_message(Message::new(role, content)).await
    }

    pub async fn send_message(&mut self, message: Message) -> Result<Completion, ClientError> {
        self.store.append(message);
        let request = build_request(self.store.snapshot(), &self.options);
        info!(
            model = request.model(),
            stream = request.stream(),
            messages = request.messages().len(),
            "sending completion"
        );

        self.client
            .complete(&request, &mut self.store, self.options.tool_call_mode)
            .await
    }

    /// Forget the conversation. Options are kept.
    pub fn reset(&mut self) {
        debug!(dropped = self.store.len(), "session reset");
        self.store.clear();
    }

    pub fn messages(&self) -> &MessageStore {
        &self.store
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn options_mut(&mut self) -> &mut SessionOptions {
        &mut self.options
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.options.model = model.into();
    }

    pub fn set_stream(&mut self, stream: bool) {
        self.options.stream = stream;
    }

    /// Replace the raw system prompt. Any processed prompt derived from the
    /// previous one is dropped.
    pub fn set_system_prompt(&mut self, prompt: Option<String>) {
        self.options.system_prompt = prompt;
        self.options.processed_system_prompt = None;
    }

    /// Use the prompt returned by the proxy's tool-definition parser.
    pub fn apply_tool_definitions(&mut self, definitions: &ToolDefinitions) {
        debug!(schemas = definitions.schemas.len(), "applying tool definitions");
        self.options.processed_system_prompt = Some(definitions.processed_system_prompt.clone());
    }
}
