//! Realtime wire envelopes.
//!
//! Frames travel as JSON text. Outbound chat messages are wrapped as
//! `{"type": "chat_message", "message": <payload>}`. Inbound frames come in
//! several shapes and are sorted into an [`InboundFrame`] by
//! [`decode_frame`].

use serde::Serialize;
use serde_json::Value;

/// Envelope `type` for a single chat message.
pub const CHAT_MESSAGE: &str = "chat_message";

/// Envelope `type` for a batch of past messages.
pub const MESSAGE_HISTORY: &str = "message_history";

/// Error type for envelope encode/decode operations.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The frame is not valid JSON.
    #[error("malformed frame: {0}")]
    Malformed(#[source] serde_json::Error),
    /// The payload could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[source] serde_json::Error),
}

/// A decoded inbound frame.
///
/// Variants are listed in the order [`decode_frame`] tries them.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundFrame {
    /// `{"type": "chat_message", "message": ...}`.
    ///
    /// Carries the inner message when it is an object, otherwise the whole
    /// envelope so sibling fields such as `sender_id` stay with the text.
    ChatMessage(Value),
    /// `{"type": "message_history", "messages": [...]}`, carrying the batch.
    History(Vec<Value>),
    /// Any object with a truthy `message` field, carried whole.
    Nested(Value),
    /// Anything else that parsed as JSON.
    Raw(Value),
}

#[derive(Serialize)]
struct OutboundEnvelope<'a, T: Serialize> {
    #[serde(rename = "type")]
    kind: &'static str,
    message: &'a T,
}

/// Wrap `payload` in a chat message envelope and serialize it.
///
/// # Errors
///
/// Returns [`CodecError::Serialization`] if `payload` cannot be serialized.
pub fn encode_chat_message<T: Serialize>(payload: &T) -> Result<String, CodecError> {
    serde_json::to_string(&OutboundEnvelope {
        kind: CHAT_MESSAGE,
        message: payload,
    })
    .map_err(CodecError::Serialization)
}

/// Decode one inbound text frame.
///
/// # Errors
///
/// Returns [`CodecError::Malformed`] if `text` is not valid JSON.
pub fn decode_frame(text: &str) -> Result<InboundFrame, CodecError> {
    let mut value: Value = serde_json::from_str(text).map_err(CodecError::Malformed)?;
    Ok(classify(&mut value).unwrap_or(InboundFrame::Raw(value)))
}

/// Sort a parsed frame into a known variant, or `None` for the raw fallback.
///
/// Takes the embedded message out of `value` when it matches.
fn classify(value: &mut Value) -> Option<InboundFrame> {
    let obj = value.as_object_mut()?;

    let kind = obj.get("type").and_then(Value::as_str);
    let is_chat = kind == Some(CHAT_MESSAGE) && obj.contains_key("message");
    let is_history = kind == Some(MESSAGE_HISTORY);

    if is_chat {
        // Server echoes put the text in `message` and the author fields beside it.
        if obj.get("message").is_some_and(Value::is_object) {
            return obj.remove("message").map(InboundFrame::ChatMessage);
        }
        return Some(InboundFrame::ChatMessage(std::mem::take(value)));
    }
    if is_history {
        let batch = match obj.remove("messages") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        };
        return Some(InboundFrame::History(batch));
    }

    if obj.get("message").is_some_and(is_truthy) {
        return Some(InboundFrame::Nested(std::mem::take(value)));
    }
    None
}

fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => false,
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::Bool(true) | Value::Array(_) | Value::Object(_) => true,
    }
}
