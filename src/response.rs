//! Non-streaming completion consumer.

use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::client::ClientError;
use crate::model::Message;
use crate::store::MessageStore;

/// Decode a complete response body and append every `choices[].message`.
///
/// All messages are decoded before the first one is appended, so a body that
/// fails to decode leaves the store untouched. The decoded document is
/// returned even when it carries no choices.
pub fn consume_document(body: &[u8], store: &mut MessageStore) -> Result<Value, ClientError> {
    let document: Value = serde_json::from_slice(body)?;
    let messages = choice_messages(&document)?;

    if messages.is_empty() {
        debug!("response carried no choice messages");
    }
    for message in messages {
        store.append(message);
    }

    Ok(document)
}

/// Messages of every choice that has one, in choice order.
pub fn choice_messages(document: &Value) -> Result<Vec<Message>, ClientError> {
    let Some(choices) = document.get("choices").and_then(Value::as_array) else {
        return Ok(Vec::new());
    };

    choices
        .iter()
        .filter_map(|choice| choice.get("message"))
        .filter(|message| !message.is_null())
        .map(|message| Message::deserialize(message).map_err(ClientError::from))
        .collect()
}
