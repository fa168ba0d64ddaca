//! Normalized chat messages.
//!
//! Records reach the client in many shapes: live socket events, server
//! echoes, history rows whose `content` is a Python-literal dict, and
//! membership narration. [`ChatMessage::normalize`] folds all of them into
//! one [`ChatMessage`] or rejects the record.

use chrono::{DateTime, Local, NaiveDateTime, Utc};
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::literal;
use crate::room::RoomId;

type Record = Map<String, Value>;

/// Words that mark a sender-less message as membership narration.
const NARRATION_WORDS: [&str; 4] = ["added", "removed", "joined", "left"];

/// Identifies the participant who authored a message.
///
/// Servers send numeric ids; the textual form is kept so string ids work
/// too.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SenderId(String);

impl SenderId {
    /// Creates a sender id from its textual form.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the textual form.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the id as an integer, if it is one.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.0.parse().ok()
    }
}

impl std::fmt::Display for SenderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl Serialize for SenderId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self.as_i64() {
            Some(n) => serializer.serialize_i64(n),
            None => serializer.serialize_str(&self.0),
        }
    }
}

/// What a message represents in the feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Authored by a participant and delivered over the live socket.
    Chat,
    /// Synthesized narration such as "X added Y to the group".
    System,
    /// Loaded from the room's history rather than the live socket.
    History,
}

/// Where a raw record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// A live socket event.
    Live,
    /// A history snapshot (from the REST provider or a history frame).
    History,
}

/// A file attached to a message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Where the file can be downloaded.
    pub url: String,
    /// Original file name, when the server reports one.
    pub filename: Option<String>,
}

/// A normalized message, ready for display.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    /// Server id, or the client temp id for echoed sends.
    pub id: Option<String>,
    /// Author; `None` for system narration and some legacy rows.
    pub sender_id: Option<SenderId>,
    /// Author display name.
    pub sender_name: Option<String>,
    /// Author avatar URL.
    pub sender_avatar: Option<String>,
    /// Text body. Never blank.
    pub content: String,
    /// Authored time, or the time the record was received if it had none.
    pub timestamp: DateTime<Utc>,
    /// What this message represents.
    pub kind: MessageKind,
    /// Attached file, if any.
    pub attachment: Option<Attachment>,
    /// The record exactly as it arrived.
    pub raw: Value,
}

impl ChatMessage {
    /// Normalize a raw record.
    ///
    /// Returns `None` when the record is not an object, its body is
    /// malformed structured text, or it has no non-blank content.
    #[must_use]
    pub fn normalize(raw: Value, origin: Origin, received_at: DateTime<Utc>) -> Option<Self> {
        let record = raw.as_object()?;
        let (body, content) = resolve_body(record)?;
        if content.trim().is_empty() {
            return None;
        }

        let mut layers: Vec<&Record> = Vec::with_capacity(2);
        if let Some(ref body) = body {
            layers.push(body);
        }
        layers.push(record);

        let sender_id = lookup(&layers, &["sender_id", "senderId"])
            .and_then(as_text)
            .map(SenderId::new);
        let sender_name = lookup(
            &layers,
            &["sender_name", "senderName", "sender", "username", "full_name"],
        )
        .and_then(as_text);
        let sender_avatar = lookup(&layers, &["sender_avatar", "senderAvatar"]).and_then(as_text);
        let id = lookup(&layers, &["id"]).and_then(as_text);
        let timestamp = lookup(&layers, &["timestamp", "created_at", "createdAt"])
            .and_then(Value::as_str)
            .and_then(parse_timestamp)
            .unwrap_or(received_at);
        let attachment = lookup(&layers, &["file", "file_url"])
            .and_then(Value::as_str)
            .map(|url| Attachment {
                url: url.to_owned(),
                filename: lookup(&layers, &["filename"]).and_then(as_text),
            });

        let explicit_system =
            lookup(&layers, &["type", "kind"]).and_then(Value::as_str) == Some("system");
        let kind = if explicit_system || (sender_id.is_none() && is_narration(&content)) {
            MessageKind::System
        } else {
            match origin {
                Origin::Live => MessageKind::Chat,
                Origin::History => MessageKind::History,
            }
        };

        Some(Self {
            id,
            sender_id,
            sender_name,
            sender_avatar,
            content,
            timestamp,
            kind,
            attachment,
            raw,
        })
    }

    /// Format the timestamp in local time with a chrono format string.
    #[must_use]
    pub fn display_time(&self, format: &str) -> String {
        self.timestamp.with_timezone(&Local).format(format).to_string()
    }

    /// Whether this is synthesized narration.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.kind == MessageKind::System
    }
}

/// Result of interpreting a textual body.
enum Body {
    /// The text decoded to an object.
    Structured(Record),
    /// Ordinary text.
    Plain(String),
    /// Looked structured but did not decode.
    Malformed,
}

fn classify_text(text: &str) -> Body {
    match literal::decode(text) {
        Some(Value::Object(map)) => Body::Structured(map),
        _ if text.contains(['{', '}']) => Body::Malformed,
        _ => Body::Plain(text.to_owned()),
    }
}

/// Find the body object (if any) and the content text of a record.
fn resolve_body(record: &Record) -> Option<(Option<Record>, String)> {
    let content = record.get("content").filter(|v| is_present(v));
    let message = record.get("message").filter(|v| is_present(v));

    let (body, text) = match (content, message) {
        (Some(Value::String(text)), _) | (None, Some(Value::String(text))) => {
            match classify_text(text) {
                Body::Structured(map) => {
                    let inner = lookup(&[&map], &["content", "message"]).and_then(as_text);
                    (Some(map), inner)
                }
                Body::Plain(text) => (None, Some(text)),
                Body::Malformed => return None,
            }
        }
        (Some(Value::Object(inner)), _) | (None, Some(Value::Object(inner))) => {
            let text = lookup(&[inner], &["content", "message"]).and_then(as_text);
            (Some(inner.clone()), text)
        }
        _ => return None,
    };
    text.map(|text| (body, text))
}

/// First present value for any of `keys`, searching `layers` in order.
fn lookup<'a>(layers: &[&'a Record], keys: &[&str]) -> Option<&'a Value> {
    layers
        .iter()
        .flat_map(|layer| keys.iter().filter_map(|key| layer.get(*key)))
        .find(|value| is_present(value))
}

/// Nulls and blank strings count as absent.
fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.trim().is_empty(),
        _ => true,
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn parse_timestamp(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(text) {
        return Some(ts.with_timezone(&Utc));
    }
    // Offset-less timestamps are server time, which is UTC.
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Whether `content` reads like membership narration.
///
/// Callers only ask this for records without a sender id: a participant
/// writing "I left early" is still chat.
fn is_narration(content: &str) -> bool {
    !content.contains('{')
        && content
            .split(|c: char| !c.is_alphanumeric())
            .any(|word| NARRATION_WORDS.iter().any(|n| word.eq_ignore_ascii_case(n)))
}

/// Payload the client sends for a new chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutgoingMessage {
    /// Client temp id, replaced by the server id on echo.
    pub id: String,
    /// Text body.
    pub content: String,
    /// Group the message is addressed to, for group rooms.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_id: Option<String>,
    /// Author id.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_id: Option<SenderId>,
    /// Author display name.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    /// Author avatar URL.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_avatar: Option<String>,
    /// Compose time.
    pub timestamp: DateTime<Utc>,
}

impl OutgoingMessage {
    /// Create a message with a fresh `temp-` id stamped with the current time.
    #[must_use]
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            id: format!("temp-{}", Uuid::now_v7()),
            content: content.into(),
            group_id: None,
            sender_id: None,
            sender_name: None,
            sender_avatar: None,
            timestamp: Utc::now(),
        }
    }

    /// Attach the author identity.
    #[must_use]
    pub fn with_sender(mut self, id: SenderId, name: Option<String>) -> Self {
        self.sender_id = Some(id);
        self.sender_name = name;
        self
    }

    /// Attach the author avatar URL.
    #[must_use]
    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.sender_avatar = Some(avatar.into());
        self
    }

    /// Address the message to a group room.
    #[must_use]
    pub fn with_group(mut self, room: &RoomId) -> Self {
        self.group_id = Some(room.as_str().to_owned());
        self
    }
}
