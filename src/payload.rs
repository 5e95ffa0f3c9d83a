//! Builds the outbound completion request from history and session options.

use tracing::debug;

use crate::model::{CompletionRequest, Message, Role};
use crate::options::SessionOptions;

/// Build a completion request from a history snapshot.
///
/// When the snapshot has no `system` message, one is synthesized and placed
/// first. The processed prompt (tool definitions already rewritten by the
/// proxy) wins over the raw prompt; empty prompts count as absent. A system
/// message already present in history is left where it is, and any later
/// `system` entries are left out of the request so it carries exactly one.
///
/// # Example
/// ```
/// use adapter_console::model::{Message, Role};
/// use adapter_console::options::SessionOptions;
/// use adapter_console::payload::build_request;
///
/// let options = SessionOptions::new("gpt-4o").with_system_prompt("Be brief.");
/// let request = build_request(vec![Message::user("hi")], &options);
///
/// assert_eq!(request.messages()[0].role(), Role::System);
/// assert_eq!(request.messages().len(), 2);
/// ```
pub fn build_request(snapshot: Vec<Message>, options: &SessionOptions) -> CompletionRequest {
    let mut messages = Vec::with_capacity(snapshot.len() + 1);
    let mut has_system = false;

    for message in snapshot {
        if message.role() == Role::System {
            if has_system {
                debug!("dropping extra system message from request");
                continue;
            }
            has_system = true;
        }
        messages.push(message);
    }

    if !has_system {
        if let Some(prompt) = injected_prompt(options) {
            messages.insert(0, Message::system(prompt));
        }
    }

    CompletionRequest::new(options.model.clone(), messages, options.stream)
}

fn injected_prompt(options: &SessionOptions) -> Option<&str> {
    non_empty(&options.processed_system_prompt).or_else(|| non_empty(&options.system_prompt))
}

fn non_empty(prompt: &Option<String>) -> Option<&str> {
    prompt.as_deref().filter(|s| !s.is_empty())
}
