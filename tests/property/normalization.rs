// Test-specific lint overrides: property tests use unwrap freely.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::missing_panics_doc)]

//! Property-based tests for frame decoding and message normalization.

use chrono::{TimeZone, Utc};
use livechat_proto::envelope::decode_frame;
use livechat_proto::literal;
use livechat_proto::message::{ChatMessage, MessageKind, Origin};
use proptest::prelude::*;
use serde_json::json;

/// Render `text` the way Python's `repr` renders a `str`.
fn python_repr(text: &str) -> String {
    let quote = if text.contains('\'') && !text.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::new();
    out.push(quote);
    for c in text.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            c if c == quote => {
                out.push('\\');
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out.push(quote);
    out
}

proptest! {
    #[test]
    fn decode_frame_never_panics(text in ".{0,200}") {
        let _ = decode_frame(&text);
    }

    #[test]
    fn python_repr_content_survives_decoding(text in "[a-zA-Z0-9 '\"\\\\.,!?\n]{1,60}") {
        let sample = format!("{{'content': {}, 'sender_avatar': None}}", python_repr(&text));
        let value = literal::decode(&sample).unwrap();
        prop_assert_eq!(value["content"].as_str().unwrap(), text.as_str());
        prop_assert!(value["sender_avatar"].is_null());
    }

    #[test]
    fn plain_text_content_is_kept_verbatim(text in "[a-zA-Z][a-zA-Z0-9 .,!?]{0,60}") {
        let received = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let msg = ChatMessage::normalize(
            json!({"content": text.clone(), "sender_id": 1}),
            Origin::Live,
            received,
        );
        // Bare words that happen to be valid JSON (e.g. "true") still read as text.
        let msg = msg.unwrap();
        prop_assert_eq!(msg.content, text);
        prop_assert_eq!(msg.kind, MessageKind::Chat);
    }
}
