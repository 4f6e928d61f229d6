//! Message storage. Messages are append-only and never updated.

use std::sync::Arc;

use tokio_rusqlite::Connection;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::SessionId;
use crate::chat::core::message::ChatMessage;
use crate::chat::storage::session_store::StoreFuture;

/// Message store trait.
pub trait MessageStore: Send + Sync {
    /// Persist a message.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn append(&self, message: &ChatMessage) -> StoreFuture<'_, ChatResult<()>>;

    /// Full transcript of a session, ordered by timestamp.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_for_session(
        &self,
        session_id: SessionId,
    ) -> StoreFuture<'_, ChatResult<Vec<ChatMessage>>>;
}

/// `SQLite` implementation of message storage.
pub struct SqliteMessageStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteMessageStore {
    /// Initialize the store and create its table if needed.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>, config: &StorageConfig) -> ChatResult<Self> {
        let table = config.messages_table.clone();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    message_id TEXT NOT NULL UNIQUE,
                    session_id TEXT NOT NULL,
                    ts INTEGER NOT NULL,
                    sender TEXT NOT NULL,
                    doc TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_session_ts
                    ON {table_name} (session_id, ts);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

impl MessageStore for SqliteMessageStore {
    fn append(&self, message: &ChatMessage) -> StoreFuture<'_, ChatResult<()>> {
        let doc = serde_json::to_string(message).map_err(ChatError::from);
        let message_id = message.id.to_string();
        let session_id = message.session_id.to_string();
        let ts = message.timestamp.timestamp_millis();
        let sender = message.sender.to_string();
        Box::pin(async move {
            let doc = doc?;
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table} (message_id, session_id, ts, sender, doc)
                             VALUES (?1, ?2, ?3, ?4, ?5)"
                        ),
                        rusqlite::params![message_id, session_id, ts, sender, doc],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn list_for_session(
        &self,
        session_id: SessionId,
    ) -> StoreFuture<'_, ChatResult<Vec<ChatMessage>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let session = session_id.to_string();
            let docs = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT doc FROM {table}
                         WHERE session_id = ?1
                         ORDER BY ts, id"
                    ))?;
                    let docs = stmt
                        .query_map(rusqlite::params![session], |row| row.get::<_, String>(0))?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(docs)
                })
                .await?;

            let mut messages = Vec::with_capacity(docs.len());
            for doc in docs {
                let message: ChatMessage = serde_json::from_str(&doc)?;
                if message.session_id != session_id {
                    return Err(ChatError::CorruptRecord(format!(
                        "message {} filed under session {session_id}",
                        message.id
                    )));
                }
                messages.push(message);
            }
            Ok(messages)
        })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::*;
    use crate::chat::core::message::{NewMessage, SenderInfo, SenderRole};
    use crate::chat::storage::open_connection;

    async fn store() -> SqliteMessageStore {
        let config = StorageConfig::in_memory();
        let conn = open_connection(&config).await.unwrap();
        SqliteMessageStore::new(conn, &config).await.unwrap()
    }

    fn message(session_id: SessionId, content: &str, at: chrono::DateTime<Utc>) -> ChatMessage {
        ChatMessage::from_new(
            NewMessage {
                session_id,
                sender: SenderRole::Customer,
                sender_info: SenderInfo {
                    id: "c1".to_string(),
                    name: None,
                },
                content: content.to_string(),
                file_data: None,
            },
            at,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn transcript_is_ordered_by_timestamp() {
        let store = store().await;
        let session_id = SessionId::new();
        let now = Utc::now();
        let later = message(session_id, "second", now + Duration::seconds(2));
        let earlier = message(session_id, "first", now);
        store.append(&later).await.unwrap();
        store.append(&earlier).await.unwrap();
        store
            .append(&message(SessionId::new(), "elsewhere", now))
            .await
            .unwrap();

        let transcript = store.list_for_session(session_id).await.unwrap();
        let contents: Vec<&str> = transcript.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        let mut sorted = transcript.clone();
        sorted.sort_by_key(|m| m.timestamp);
        assert_eq!(sorted, transcript);
    }

    #[tokio::test]
    async fn equal_timestamps_keep_insertion_order() {
        let store = store().await;
        let session_id = SessionId::new();
        let now = Utc::now();
        for content in ["a", "b", "c"] {
            store.append(&message(session_id, content, now)).await.unwrap();
        }
        let transcript = store.list_for_session(session_id).await.unwrap();
        let contents: Vec<&str> = transcript.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected() {
        let store = store().await;
        let m = message(SessionId::new(), "hi", Utc::now());
        store.append(&m).await.unwrap();
        assert!(store.append(&m).await.is_err());
    }
}
