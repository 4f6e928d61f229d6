//! Persistence for sessions and messages.

pub mod message_store;
pub mod session_store;

use std::sync::Arc;

use tokio_rusqlite::Connection;

use crate::chat::core::config::StorageConfig;
use crate::chat::core::errors::ChatResult;

pub use message_store::{MessageStore, SqliteMessageStore};
pub use session_store::{SessionFilter, SessionStore, SqliteSessionStore, StoreFuture};

/// Open the shared `SQLite` connection used by both stores.
///
/// # Errors
/// Returns an error if the database cannot be opened.
pub async fn open_connection(config: &StorageConfig) -> ChatResult<Arc<Connection>> {
    let conn = Connection::open(&config.sqlite_path).await?;
    Ok(Arc::new(conn))
}
