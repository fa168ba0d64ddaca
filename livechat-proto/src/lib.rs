//! Shared protocol definitions for the `LiveChat` wire format.
//!
//! Everything in this crate is pure: decoding inbound frames, encoding the
//! outbound envelope, and normalizing loosely-shaped message records into
//! [`message::ChatMessage`]. No I/O happens here.

pub mod envelope;
pub mod literal;
pub mod message;
pub mod room;
