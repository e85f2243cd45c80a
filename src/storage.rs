use crate::store::{PersistedState, SharedStore};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{sqlite::SqliteConnectOptions, ConnectOptions, Row, SqlitePool};
use std::{path::Path, str::FromStr};
use tracing::warn;

/// Fixed key the persisted conversation blob lives under.
const STORAGE_KEY: &str = "ridewire-chat-state";

/// Durable home for the persisted subset of store state. The store never
/// talks to this directly; the orchestrator (and simulator) cross the
/// serialize/deserialize boundary explicitly.
#[async_trait]
pub trait ConversationStorage: Send + Sync {
    async fn save(&self, state: &PersistedState) -> Result<()>;
    async fn load(&self) -> Result<Option<PersistedState>>;
    async fn clear(&self) -> Result<()>;
}

/// Mirror the durable subset of the store into storage. Persistence is
/// best-effort; failures are logged, never surfaced to the conversation.
pub async fn persist_snapshot(store: &SharedStore, storage: &dyn ConversationStorage) {
    if let Some(state) = store.persistable() {
        if let Err(e) = storage.save(&state).await {
            warn!("Failed to persist chat state: {:#}", e);
        }
    }
}

#[derive(Clone, Debug)]
pub struct SqliteStorage {
    pool: SqlitePool,
}

impl SqliteStorage {
    /// Create a new SqliteStorage instance.
    /// This will automatically create the database file if it doesn't exist.
    pub async fn new(db_path: impl AsRef<Path>) -> Result<Self> {
        let db_path = db_path.as_ref();

        // Ensure the parent directory exists
        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).context("Failed to create database directory")?;
            }
        }

        let db_url = format!("sqlite://{}", db_path.to_string_lossy());

        let options = SqliteConnectOptions::from_str(&db_url)?
            .create_if_missing(true)
            .log_statements(tracing::log::LevelFilter::Trace);

        let pool = SqlitePool::connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        let storage = Self { pool };
        storage.init().await?;
        Ok(storage)
    }

    /// An in-memory database, used by tests and throwaway sessions. Pinned
    /// to a single connection; every pooled connection would otherwise see
    /// its own empty `:memory:` database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .context("Failed to open in-memory SQLite database")?;
        let storage = Self { pool };
        storage.init().await?;
        Ok(storage)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chat_state (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at DATETIME NOT NULL DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to initialize storage schema")?;

        Ok(())
    }
}

#[async_trait]
impl ConversationStorage for SqliteStorage {
    async fn save(&self, state: &PersistedState) -> Result<()> {
        let blob = serde_json::to_string(state).context("Failed to serialize chat state")?;

        sqlx::query(
            r#"
            INSERT INTO chat_state (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET
                value = excluded.value,
                updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(STORAGE_KEY)
        .bind(blob)
        .execute(&self.pool)
        .await
        .context("Failed to save chat state")?;

        Ok(())
    }

    async fn load(&self) -> Result<Option<PersistedState>> {
        let row = sqlx::query("SELECT value FROM chat_state WHERE key = ?")
            .bind(STORAGE_KEY)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load chat state")?;

        let Some(row) = row else {
            return Ok(None);
        };

        let blob: String = row.try_get("value")?;
        let state =
            serde_json::from_str(&blob).context("Failed to deserialize persisted chat state")?;
        Ok(Some(state))
    }

    async fn clear(&self) -> Result<()> {
        sqlx::query("DELETE FROM chat_state WHERE key = ?")
            .bind(STORAGE_KEY)
            .execute(&self.pool)
            .await
            .context("Failed to clear chat state")?;

        Ok(())
    }
}

/// In-memory double for tests that only need the trait surface.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemoryStorage {
        state: Mutex<Option<PersistedState>>,
    }

    impl MemoryStorage {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn stored(&self) -> Option<PersistedState> {
            self.state.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ConversationStorage for MemoryStorage {
        async fn save(&self, state: &PersistedState) -> Result<()> {
            *self.state.lock().unwrap() = Some(state.clone());
            Ok(())
        }

        async fn load(&self) -> Result<Option<PersistedState>> {
            Ok(self.state.lock().unwrap().clone())
        }

        async fn clear(&self) -> Result<()> {
            *self.state.lock().unwrap() = None;
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::{Conversation, UserRole};
    use crate::message::{ChatMessage, MessageKind, Sender};
    use pretty_assertions::assert_eq;

    fn sample_state() -> PersistedState {
        let conversation = Conversation::new("c1", "u1", UserRole::Rider);
        let message = ChatMessage::new("c1", MessageKind::Bot, "Welcome!", Sender::bot());
        PersistedState {
            conversation,
            messages: vec![message],
        }
    }

    #[tokio::test]
    async fn save_load_clear_round_trip() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        assert_eq!(storage.load().await.expect("load"), None);

        let state = sample_state();
        storage.save(&state).await.expect("save");
        let loaded = storage.load().await.expect("load").expect("some state");
        assert_eq!(loaded, state);

        storage.clear().await.expect("clear");
        assert_eq!(storage.load().await.expect("load"), None);
    }

    #[tokio::test]
    async fn save_overwrites_previous_blob() {
        let storage = SqliteStorage::in_memory().await.expect("storage");
        let mut state = sample_state();
        storage.save(&state).await.expect("save");

        state
            .messages
            .push(ChatMessage::new("c1", MessageKind::Bot, "More", Sender::bot()));
        storage.save(&state).await.expect("save again");

        let loaded = storage.load().await.expect("load").expect("some state");
        assert_eq!(loaded.messages.len(), 2);
    }
}
