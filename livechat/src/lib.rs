//! `LiveChat`: realtime chat room client library.
//!
//! [`channel::ChannelManager`] keeps one room's socket alive and exposes its
//! message feed; [`transport`] provides the WebSocket and loopback
//! connectors it runs on.

pub mod channel;
pub mod config;
pub mod history;
pub mod transport;
