//! Permissive decoder for structured strings embedded in message bodies.
//!
//! The history endpoint stores some message bodies as the Python `repr` of
//! a dict, e.g. `{'content': 'hi', 'sender_avatar': None}`. That is not
//! JSON, so [`decode`] first tries strict JSON and then retries after
//! converting the Python literal syntax with [`to_json`].

use std::iter::Peekable;
use std::str::Chars;

use serde_json::Value;

/// Decode a structured string, accepting JSON or Python literal syntax.
///
/// Returns `None` when neither form parses.
#[must_use]
pub fn decode(text: &str) -> Option<Value> {
    serde_json::from_str(text).ok().or_else(|| {
        let converted = to_json(text)?;
        serde_json::from_str(&converted).ok()
    })
}

/// Convert Python literal syntax into JSON text.
///
/// Single-quoted strings become double-quoted, and the bare words `None`,
/// `True` and `False` outside of strings become `null`, `true` and
/// `false`. Python-only escapes (`\xNN`, `\UNNNNNNNN`, `\a`, `\v`, `\0`)
/// are rewritten as JSON escapes. The result is not validated; callers
/// parse it afterwards. Returns `None` if a string literal is left
/// unterminated.
#[must_use]
pub fn to_json(text: &str) -> Option<String> {
    let mut out = String::with_capacity(text.len());
    let mut chars = text.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '\'' | '"' => read_string(c, &mut chars, &mut out)?,
            c if c.is_ascii_alphabetic() || c == '_' => {
                let mut word = String::from(c);
                while let Some(&next) = chars.peek() {
                    if next.is_ascii_alphanumeric() || next == '_' {
                        word.push(next);
                        chars.next();
                    } else {
                        break;
                    }
                }
                out.push_str(match word.as_str() {
                    "None" => "null",
                    "True" => "true",
                    "False" => "false",
                    other => other,
                });
            }
            other => out.push(other),
        }
    }

    Some(out)
}

/// Copy one string literal opened by `quote` into `out` as a JSON string.
fn read_string(quote: char, chars: &mut Peekable<Chars<'_>>, out: &mut String) -> Option<()> {
    out.push('"');
    loop {
        match chars.next()? {
            '\\' => match chars.next()? {
                // JSON has no `\'` escape.
                '\'' => out.push('\''),
                'x' => push_code_point(read_hex(chars, 2)?, out)?,
                'U' => push_code_point(read_hex(chars, 8)?, out)?,
                'a' => out.push_str("\\u0007"),
                'v' => out.push_str("\\u000b"),
                '0' => out.push_str("\\u0000"),
                escaped => {
                    out.push('\\');
                    out.push(escaped);
                }
            },
            c if c == quote => {
                out.push('"');
                return Some(());
            }
            '"' => out.push_str("\\\""),
            c => out.push(c),
        }
    }
}

fn read_hex(chars: &mut Peekable<Chars<'_>>, digits: usize) -> Option<u32> {
    (0..digits).try_fold(0, |acc, _| Some(acc * 16 + chars.next()?.to_digit(16)?))
}

/// Append one code point, escaping control characters the way JSON requires.
fn push_code_point(code: u32, out: &mut String) -> Option<()> {
    let c = char::from_u32(code)?;
    match c {
        '"' => out.push_str("\\\""),
        '\\' => out.push_str("\\\\"),
        c if c.is_control() => out.push_str(&format!("\\u{code:04x}")),
        c => out.push(c),
    }
    Some(())
}
