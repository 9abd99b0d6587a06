use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Result;
use time::format_description::FormatItem;
use time::macros::format_description;
use time::UtcOffset;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::EnvFilter;

use medichat::api::{ChatTransport, HttpTransport};
use medichat::chat::{ConversationManager, SystemClock};
use medichat::config::Config;
use medichat::connectivity::ConnectivityMonitor;
use medichat::storage::MessageStore;
use medichat::types::Message;

const MESSAGE_TIME_FORMAT: &[FormatItem<'static>] =
    format_description!("[hour repr:12 padding:zero]:[minute padding:zero] [period case:upper]");

fn print_message(message: &Message) {
    let mut at = message.created_at;
    if let Ok(offset) = UtcOffset::current_local_offset() {
        at = at.to_offset(offset);
    }
    let stamp = at.format(MESSAGE_TIME_FORMAT).unwrap_or_default();
    let who = if message.from_assistant {
        "assistant"
    } else {
        "you"
    };
    println!("[{stamp}] {who}: {}", message.content);
}

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional; plain environment variables win either way.
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("medichat=info")),
        )
        .init();

    let config = Config::from_env();
    let transport: Arc<dyn ChatTransport> = Arc::new(HttpTransport::new(&config)?);
    let store = MessageStore::new(config.data_dir.clone());
    let monitor = ConnectivityMonitor::spawn(Arc::clone(&transport), config.probe_interval);
    let manager = ConversationManager::new(
        transport,
        store,
        monitor.subscribe(),
        Arc::new(SystemClock),
        config,
    );
    manager.initialize().await;

    println!("medichat - type a message, or /delete <id>, /new, /dismiss, /offline, /online, /quit");

    // Presentation is just this: subscribe and echo whatever the manager
    // exposes.
    let mut updates = manager.subscribe();
    let printer = tokio::spawn(async move {
        let mut last = updates.borrow().clone();
        for message in &last.messages {
            print_message(message);
        }
        while updates.changed().await.is_ok() {
            let state = updates.borrow_and_update().clone();
            let known: HashSet<i64> = last.messages.iter().map(|message| message.id).collect();
            for message in state
                .messages
                .iter()
                .filter(|message| !known.contains(&message.id))
            {
                print_message(message);
            }
            if state.error != last.error {
                if let Some(notice) = &state.error {
                    eprintln!("! {} ({:?})", notice.text, notice.category);
                }
            }
            last = state;
        }
    });

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        match line {
            "" => {}
            "/quit" | "/exit" => break,
            "/new" => manager.clear_all_messages(),
            "/dismiss" => manager.clear_error(),
            "/offline" => monitor.set_network_online(false),
            "/online" => monitor.set_network_online(true),
            command if command.starts_with("/delete") => {
                match command.trim_start_matches("/delete").trim().parse::<i64>() {
                    Ok(id) => manager.remove_message(id).await,
                    Err(_) => eprintln!("usage: /delete <message id>"),
                }
            }
            text => manager.send_user_message(text).await,
        }
    }

    printer.abort();
    manager.shutdown();
    monitor.shutdown();
    Ok(())
}
