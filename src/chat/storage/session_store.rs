//! Session storage.
//!
//! Each session is one JSON document plus a few indexed columns used for
//! lookups. Every write replaces a single row, so each update is atomic per
//! session. Callers serialize read-modify-write cycles themselves; activity
//! updates go through [`SessionStore::touch`], which only rewrites
//! `lastActivity` and cannot clobber a concurrent full replace.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rusqlite::OptionalExtension;
use tokio_rusqlite::Connection;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::SessionId;
use crate::chat::core::session::{ChatSession, SessionStatus};

/// Boxed future type for session store operations.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Filter for session listings. Unset fields match everything.
#[derive(Clone, Debug, Default)]
pub struct SessionFilter {
    /// Inclusive lower bound on `created_at`.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive upper bound on `created_at`.
    pub to: Option<DateTime<Utc>>,
    /// Only sessions in this status.
    pub status: Option<SessionStatus>,
    /// Only sessions currently assigned to this agent.
    pub agent_id: Option<String>,
}

impl SessionFilter {
    /// Sessions created within `[from, to)`.
    #[must_use]
    pub const fn window(from: Option<DateTime<Utc>>, to: Option<DateTime<Utc>>) -> Self {
        Self {
            from,
            to,
            status: None,
            agent_id: None,
        }
    }
}

/// Session store trait.
pub trait SessionStore: Send + Sync {
    /// Persist a new session.
    ///
    /// # Errors
    /// Returns an error if storage access fails or the id already exists.
    fn insert(&self, session: &ChatSession) -> StoreFuture<'_, ChatResult<()>>;

    /// Load a session by id.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn get(&self, session_id: SessionId) -> StoreFuture<'_, ChatResult<Option<ChatSession>>>;

    /// Overwrite an existing session.
    ///
    /// # Errors
    /// Returns `NotFound` if the session does not exist, or a storage error.
    fn replace(&self, session: &ChatSession) -> StoreFuture<'_, ChatResult<()>>;

    /// Set `lastActivity` in place without rewriting the rest of the document.
    ///
    /// # Errors
    /// Returns `NotFound` if the session does not exist, or a storage error.
    fn touch(&self, session_id: SessionId, at: DateTime<Utc>) -> StoreFuture<'_, ChatResult<()>>;

    /// Most recently ended closed sessions of a customer, newest first.
    ///
    /// Anonymous and account customers never share history, even when their
    /// ids collide.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list_closed_for_customer(
        &self,
        customer_id: &str,
        is_anonymous: bool,
        limit: usize,
    ) -> StoreFuture<'_, ChatResult<Vec<ChatSession>>>;

    /// Sessions matching a filter, oldest first.
    ///
    /// # Errors
    /// Returns an error if storage access fails.
    fn list(&self, filter: SessionFilter) -> StoreFuture<'_, ChatResult<Vec<ChatSession>>>;
}

/// `SQLite` implementation of the session store.
pub struct SqliteSessionStore {
    conn: Arc<Connection>,
    table: String,
}

impl SqliteSessionStore {
    /// Initialize the store and create its table if needed.
    ///
    /// # Errors
    /// Returns an error if database operations fail.
    pub async fn new(conn: Arc<Connection>, config: &StorageConfig) -> ChatResult<Self> {
        let table = config.sessions_table.clone();
        let table_name = table.clone();

        conn.call(move |conn| {
            conn.execute_batch(&format!(
                "CREATE TABLE IF NOT EXISTS {table_name} (
                    session_id TEXT PRIMARY KEY,
                    customer_id TEXT NOT NULL,
                    status TEXT NOT NULL,
                    agent_id TEXT,
                    created_at INTEGER NOT NULL,
                    ended_at INTEGER,
                    doc TEXT NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_{table_name}_customer
                    ON {table_name} (customer_id, status, ended_at DESC);
                CREATE INDEX IF NOT EXISTS idx_{table_name}_created
                    ON {table_name} (created_at);"
            ))?;
            Ok(())
        })
        .await?;

        Ok(Self { conn, table })
    }
}

struct SessionRow {
    session_id: String,
    customer_id: String,
    status: String,
    agent_id: Option<String>,
    created_at: i64,
    ended_at: Option<i64>,
    doc: String,
}

impl SessionRow {
    fn encode(session: &ChatSession) -> ChatResult<Self> {
        Ok(Self {
            session_id: session.session_id.to_string(),
            customer_id: session.customer.id.clone(),
            status: session.status.to_string(),
            agent_id: session.agent_id().map(str::to_string),
            created_at: session.created_at.timestamp_millis(),
            ended_at: session.ended_at.map(|ts| ts.timestamp_millis()),
            doc: serde_json::to_string(session)?,
        })
    }
}

fn decode_docs(docs: Vec<String>) -> ChatResult<Vec<ChatSession>> {
    docs.iter()
        .map(|doc| serde_json::from_str(doc).map_err(ChatError::from))
        .collect()
}

impl SessionStore for SqliteSessionStore {
    fn insert(&self, session: &ChatSession) -> StoreFuture<'_, ChatResult<()>> {
        let row = SessionRow::encode(session);
        Box::pin(async move {
            let row = row?;
            let table = self.table.clone();
            self.conn
                .call(move |conn| {
                    conn.execute(
                        &format!(
                            "INSERT INTO {table}
                             (session_id, customer_id, status, agent_id, created_at, ended_at, doc)
                             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)"
                        ),
                        rusqlite::params![
                            row.session_id,
                            row.customer_id,
                            row.status,
                            row.agent_id,
                            row.created_at,
                            row.ended_at,
                            row.doc
                        ],
                    )?;
                    Ok(())
                })
                .await?;
            Ok(())
        })
    }

    fn get(&self, session_id: SessionId) -> StoreFuture<'_, ChatResult<Option<ChatSession>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let id = session_id.to_string();
            let doc = self
                .conn
                .call(move |conn| {
                    let doc = conn
                        .query_row(
                            &format!("SELECT doc FROM {table} WHERE session_id = ?1"),
                            rusqlite::params![id],
                            |row| row.get::<_, String>(0),
                        )
                        .optional()?;
                    Ok(doc)
                })
                .await?;

            match doc {
                Some(doc) => Ok(Some(serde_json::from_str(&doc)?)),
                None => Ok(None),
            }
        })
    }

    fn replace(&self, session: &ChatSession) -> StoreFuture<'_, ChatResult<()>> {
        let row = SessionRow::encode(session);
        let session_id = session.session_id;
        Box::pin(async move {
            let row = row?;
            let table = self.table.clone();
            let updated = self
                .conn
                .call(move |conn| {
                    let updated = conn.execute(
                        &format!(
                            "UPDATE {table}
                             SET customer_id = ?2, status = ?3, agent_id = ?4,
                                 created_at = ?5, ended_at = ?6, doc = ?7
                             WHERE session_id = ?1"
                        ),
                        rusqlite::params![
                            row.session_id,
                            row.customer_id,
                            row.status,
                            row.agent_id,
                            row.created_at,
                            row.ended_at,
                            row.doc
                        ],
                    )?;
                    Ok(updated)
                })
                .await?;

            if updated == 0 {
                return Err(ChatError::session_not_found(session_id));
            }
            Ok(())
        })
    }

    fn touch(&self, session_id: SessionId, at: DateTime<Utc>) -> StoreFuture<'_, ChatResult<()>> {
        let at = serde_json::to_string(&at);
        Box::pin(async move {
            let at = at?;
            let table = self.table.clone();
            let id = session_id.to_string();
            let updated = self
                .conn
                .call(move |conn| {
                    let updated = conn.execute(
                        &format!(
                            "UPDATE {table}
                             SET doc = json_set(doc, '$.lastActivity', json(?2))
                             WHERE session_id = ?1"
                        ),
                        rusqlite::params![id, at],
                    )?;
                    Ok(updated)
                })
                .await?;

            if updated == 0 {
                return Err(ChatError::session_not_found(session_id));
            }
            Ok(())
        })
    }

    fn list_closed_for_customer(
        &self,
        customer_id: &str,
        is_anonymous: bool,
        limit: usize,
    ) -> StoreFuture<'_, ChatResult<Vec<ChatSession>>> {
        let customer_id = customer_id.to_string();
        Box::pin(async move {
            let table = self.table.clone();
            let limit = i64::try_from(limit)
                .map_err(|_| ChatError::Validation("limit exceeds i64".to_string()))?;
            let closed = SessionStatus::Closed.to_string();
            let docs = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT doc FROM {table}
                         WHERE customer_id = ?1 AND status = ?2
                           AND json_extract(doc, '$.customer.isAnonymous') = ?3
                         ORDER BY ended_at DESC
                         LIMIT ?4"
                    ))?;
                    let docs = stmt
                        .query_map(
                            rusqlite::params![customer_id, closed, is_anonymous, limit],
                            |row| row.get::<_, String>(0),
                        )?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(docs)
                })
                .await?;

            decode_docs(docs)
        })
    }

    fn list(&self, filter: SessionFilter) -> StoreFuture<'_, ChatResult<Vec<ChatSession>>> {
        Box::pin(async move {
            let table = self.table.clone();
            let from = filter.from.map(|ts| ts.timestamp_millis());
            let to = filter.to.map(|ts| ts.timestamp_millis());
            let status = filter.status.map(|status| status.to_string());
            let agent_id = filter.agent_id;
            let docs = self
                .conn
                .call(move |conn| {
                    let mut stmt = conn.prepare(&format!(
                        "SELECT doc FROM {table}
                         WHERE (?1 IS NULL OR created_at >= ?1)
                           AND (?2 IS NULL OR created_at < ?2)
                           AND (?3 IS NULL OR status = ?3)
                           AND (?4 IS NULL OR agent_id = ?4)
                         ORDER BY created_at, session_id"
                    ))?;
                    let docs = stmt
                        .query_map(rusqlite::params![from, to, status, agent_id], |row| {
                            row.get::<_, String>(0)
                        })?
                        .collect::<Result<Vec<_>, rusqlite::Error>>()?;
                    Ok(docs)
                })
                .await?;

            decode_docs(docs)
        })
    }
}
