//! # courier
//!
//! Terminal client for a support conversation. New messages are printed as
//! they arrive; every input line is sent as a message, except for:
//!
//! - `/more` loads older messages
//! - `/attach <path>` adds a file to the next message
//! - `/files` lists the selected files, `/drop <n>` removes one
//! - `/quit` exits
//!
//! Without a realtime backend the engine keeps itself current by polling.

mod config;

use std::collections::HashSet;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use courier_http::HttpApi;
use courier_shared::{ChatMessage, MessageId};
use courier_sync::{ChatSync, LocalFile, LocalPushChannel, MemoryPreviews, StaticSession, SyncEvent};

use crate::config::CliConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr; stdout carries the conversation.
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("warn,courier_sync=info")),
        )
        .init();

    let config = CliConfig::from_env()?;
    info!(
        api = %config.api_url,
        user = %config.user.id,
        privileged = config.user.is_privileged,
        conversation = %config.target,
        "Starting courier v{}",
        env!("CARGO_PKG_VERSION")
    );

    let api = Arc::new(HttpApi::new(&config.api_url, config.api_token.clone())?);
    let sync = ChatSync::new(
        config.sync.clone(),
        api,
        Arc::new(LocalPushChannel::offline()),
        Arc::new(StaticSession::new(config.user.clone())),
        Arc::new(MemoryPreviews::new()),
    );

    let printer = tokio::spawn(print_updates(sync.clone()));
    sync.start(config.target.clone()).await;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                match line? {
                    Some(line) => {
                        if !handle_line(&sync, line.trim()).await {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    sync.shutdown().await;
    printer.abort();
    info!("Bye");
    Ok(())
}

/// Returns `false` when the user asked to quit.
async fn handle_line(sync: &ChatSync, line: &str) -> bool {
    match line.split_once(' ').unwrap_or((line, "")) {
        ("/quit", _) => return false,
        ("/more", _) => {
            if !sync.has_more_messages() {
                println!("-- no older messages");
            } else if let Err(e) = sync.load_more_messages().await {
                eprintln!("!! {e}");
            }
        }
        ("/attach", path) if !path.is_empty() => match LocalFile::from_path(path).await {
            Ok(file) => {
                println!("-- attached {} ({} bytes)", file.name(), file.size());
                sync.add_file(file);
            }
            Err(e) => eprintln!("!! {e}"),
        },
        ("/files", _) => {
            for (i, file) in sync.selected_files().iter().enumerate() {
                println!("-- [{i}] {} ({} bytes)", file.name, file.size);
            }
        }
        ("/drop", index) => match index.parse::<usize>().ok().and_then(|i| sync.remove_file(i)) {
            Some(file) => println!("-- removed {}", file.name()),
            None => eprintln!("!! no such file"),
        },
        _ => {
            // Sends may retry for several seconds; keep reading input.
            let sync = sync.clone();
            let text = line.to_string();
            tokio::spawn(async move { sync.send_message(&text, None).await });
        }
    }
    true
}

async fn print_updates(sync: ChatSync) {
    let mut events = sync.events();
    let mut printed: HashSet<MessageId> = HashSet::new();
    loop {
        match events.recv().await {
            Ok(SyncEvent::MessagesChanged) => {
                for message in sync.messages() {
                    if !message.is_provisional() && printed.insert(message.id.clone()) {
                        println!("{}", render(&message));
                    }
                }
            }
            Ok(SyncEvent::Error(e)) => {
                eprintln!("!! {e}");
                sync.clear_error();
            }
            Ok(SyncEvent::PollingChanged(polling)) => info!(polling, "Transport changed"),
            Ok(_) => {}
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "Missed UI events"),
            Err(RecvError::Closed) => break,
        }
    }
}

fn render(message: &ChatMessage) -> String {
    let sender = message
        .sender
        .as_ref()
        .map_or_else(|| message.sender_id.to_string(), |s| s.name.clone());
    let mut line = format!(
        "[{}] {}: {}",
        message.created_at.format("%H:%M"),
        sender,
        message.message
    );
    for attachment in &message.attachments {
        line.push_str(&format!(" <{}>", attachment.file_name));
    }
    if message.is_read() {
        line.push_str(" ✓");
    }
    line
}
