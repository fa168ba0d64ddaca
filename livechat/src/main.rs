//! `LiveChat`: realtime chat room client.
//!
//! Joins one room, prints its feed to stdout and sends every line typed on
//! stdin. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/livechat/config.toml`).
//!
//! ```bash
//! cargo run --bin livechat -- --room 42 --token abc
//!
//! # Custom server, with history preloaded from disk
//! LIVECHAT_TOKEN=abc cargo run --bin livechat -- \
//!     --base-url wss://chat.example.com/ws/chat/ --room 42 \
//!     --history history-{room}.json
//! ```
//!
//! Type `/quit` (or close stdin) to leave.

use std::io::{self, Write};
use std::path::Path;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::watch;
use tracing_appender::non_blocking::WorkerGuard;

use livechat::channel::{ChannelManager, ConnectionState, SendStatus, Snapshot};
use livechat::config::{CliArgs, ClientConfig};
use livechat::history::JsonFileHistory;
use livechat::transport::ws::WsConnector;
use livechat_proto::message::{ChatMessage, SenderId};

#[tokio::main]
async fn main() -> io::Result<()> {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout carries the chat.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("livechat starting");

    let channel_config = config.to_channel_config().map_err(|e| {
        eprintln!("Error: {e}");
        io::Error::new(io::ErrorKind::InvalidInput, e)
    })?;
    let manager = ChannelManager::new(WsConnector::new(config.connect_timeout), channel_config);

    // Subscribe first so connection and history updates below are printed.
    let printer = tokio::spawn(print_feed(
        manager.subscribe_messages(),
        manager.subscribe_state(),
        config.timestamp_format.clone(),
        io::stdout(),
    ));

    let (room, token) = config.identity();
    if room.is_none() || token.is_none() {
        eprintln!("No room or token configured (--room, --token); staying offline.");
    }
    manager.set_identity(room, token);

    if let Some(path) = &config.history_file {
        let provider = JsonFileHistory::new(path);
        if !manager.load_history(&provider).await {
            eprintln!("No history loaded from {}", path.display());
        }
    }

    let result = read_input(&manager).await;

    manager.teardown();
    printer.abort();
    tracing::info!("livechat exiting");
    result
}

/// Initialize file-based logging.
///
/// Logs are written to a file (never stdout, which the chat feed owns).
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("livechat.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

/// Send stdin lines until `/quit` or end of input.
async fn read_input(manager: &ChannelManager<WsConnector>) -> io::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "/quit" {
            break;
        }
        match manager.send_text(line) {
            SendStatus::Sent => {}
            SendStatus::NotConnected => {
                eprintln!("Not sent: {}", manager.state());
            }
            SendStatus::Unencodable => eprintln!("Not sent: message could not be encoded"),
        }
    }
    Ok(())
}

/// Print the current feed and state, then every change as it happens.
async fn print_feed<W: Write>(
    mut messages: watch::Receiver<Snapshot>,
    mut state: watch::Receiver<ConnectionState>,
    timestamp_format: String,
    mut out: W,
) -> io::Result<()> {
    let mut shown = Snapshot::default();

    let current = *state.borrow_and_update();
    writeln!(out, "-- {current} --")?;
    let initial = messages.borrow_and_update().clone();
    show_feed(&mut out, &mut shown, initial, &timestamp_format)?;

    loop {
        tokio::select! {
            changed = messages.changed() => {
                if changed.is_err() {
                    break;
                }
                let next = messages.borrow_and_update().clone();
                show_feed(&mut out, &mut shown, next, &timestamp_format)?;
            }
            changed = state.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *state.borrow_and_update();
                writeln!(out, "-- {current} --")?;
            }
        }
    }
    Ok(())
}

/// Print what `next` adds over `shown`, or all of it when the feed was reloaded.
fn show_feed<W: Write>(
    out: &mut W,
    shown: &mut Snapshot,
    next: Snapshot,
    timestamp_format: &str,
) -> io::Result<()> {
    let appended = next.len() >= shown.len() && next[..shown.len()] == shown[..];
    let fresh = if appended {
        &next[shown.len()..]
    } else {
        writeln!(out, "-- feed reloaded --")?;
        &next[..]
    };
    for message in fresh {
        writeln!(out, "{}", render(message, timestamp_format))?;
    }
    *shown = next;
    Ok(())
}

/// Format one message as a terminal line.
fn render(message: &ChatMessage, timestamp_format: &str) -> String {
    let time = message.display_time(timestamp_format);
    let mut line = if message.is_system() {
        format!("[{time}] * {}", message.content)
    } else {
        let author = message
            .sender_name
            .as_deref()
            .or_else(|| message.sender_id.as_ref().map(SenderId::as_str))
            .unwrap_or("?");
        format!("[{time}] {author}: {}", message.content)
    };
    if let Some(attachment) = &message.attachment {
        let label = attachment.filename.as_deref().unwrap_or(&attachment.url);
        line.push_str(&format!(" [file: {label}]"));
    }
    line
}
