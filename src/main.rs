use ridewire_chat::analytics::LogAnalytics;
use ridewire_chat::bus::{EventBus, StoreEvent};
use ridewire_chat::config::ChatConfig;
use ridewire_chat::conversation::UserRole;
use ridewire_chat::orchestrator::ChatOrchestrator;
use ridewire_chat::storage::SqliteStorage;
use ridewire_chat::store::SharedStore;
use ridewire_chat::transport::WsTransport;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::info;

/// Interactive chat session against the configured backend, or the local
/// simulator when none is reachable. Type to send; Ctrl+C to quit.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    if let Err(e) = dotenvy::dotenv() {
        // It's not fatal if .env doesn't exist, but good to know
        info!("No .env file found or failed to load: {}", e);
    }

    // Initialize logging with default filter if RUST_LOG is not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ChatConfig::from_env();
    info!("Ridewire chat starting (endpoint: {})", config.endpoint);

    let home_dir = std::env::var("HOME").unwrap_or_else(|_| ".".into());
    let db_path = std::path::Path::new(&home_dir)
        .join(".ridewire")
        .join("chat.db");
    info!("Persisting conversation state at {}", db_path.display());
    let storage = Arc::new(SqliteStorage::new(&db_path).await?);

    let bus = Arc::new(EventBus::new());
    let store = SharedStore::new(bus.clone());
    let transport = Arc::new(WsTransport::new(
        config.endpoint.clone(),
        config.reconnection.clone(),
        config.heartbeat.clone(),
    ));
    let orchestrator = Arc::new(ChatOrchestrator::new(
        config,
        transport,
        store,
        storage,
        Arc::new(LogAnalytics),
    ));

    let credential = std::env::var("CHAT_CREDENTIAL").ok();
    orchestrator.initialize(credential).await;
    orchestrator.set_surface_open(true);

    let user_id = std::env::var("CHAT_USER_ID").unwrap_or_else(|_| "demo-user".into());
    if !orchestrator.try_resume_from_storage(&user_id).await {
        orchestrator
            .start_conversation(&user_id, UserRole::Rider, None)
            .await;
    }

    // Print conversation traffic as the store changes.
    let mut bus_rx = bus.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = bus_rx.recv().await {
            match event {
                StoreEvent::MessageAdded(msg) => {
                    println!("[{:?}] {}: {}", msg.kind, msg.sender.name, msg.content);
                    for reply in &msg.quick_replies {
                        println!("    ({})", reply.label);
                    }
                }
                StoreEvent::TypingChanged(typing) if typing.is_typing => {
                    if let Some(user) = &typing.typing_user {
                        println!("... {} is typing", user.name);
                    }
                }
                StoreEvent::ConnectionChanged(status) => {
                    info!("Connection: {:?}", status);
                }
                _ => {}
            }
        }
    });

    let reader_orchestrator = orchestrator.clone();
    let input = tokio::spawn(async move {
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            if let Err(e) = reader_orchestrator.send_message(&line, None).await {
                println!("!! {}", e);
            }
        }
    });

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down...");
        }
        _ = input => {
            info!("Input closed");
        }
        _ = printer => {
            info!("Event stream closed");
        }
    }

    orchestrator.disconnect().await;
    Ok(())
}
