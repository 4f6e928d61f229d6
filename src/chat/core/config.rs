//! Configuration for the chat server.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::chat::core::errors::{ChatError, ChatResult};

/// Default HTTP/WebSocket port.
pub const DEFAULT_PORT: u16 = 3000;

/// Top-level configuration for the chat server.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChatConfig {
    /// Listener settings.
    pub server: ServerConfig,
    /// Storage settings.
    pub storage: StorageConfig,
    /// Connection authentication settings.
    pub auth: AuthConfig,
    /// Customer history lookup settings.
    pub history: HistoryConfig,
}

impl ChatConfig {
    /// Build a configuration from defaults overlaid with `SUPPORT_CHAT_*`
    /// environment variables.
    ///
    /// # Errors
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> ChatResult<Self> {
        let mut config = Self::default();

        if let Ok(port) = std::env::var("SUPPORT_CHAT_PORT") {
            config.server.port = port.parse().map_err(|_| {
                ChatError::InvalidConfig(format!("SUPPORT_CHAT_PORT is not a port: {port}"))
            })?;
        }

        if let Ok(path) = std::env::var("SUPPORT_CHAT_DB") {
            config.storage.sqlite_path = PathBuf::from(path);
        }

        if let Ok(secret) = std::env::var("SUPPORT_CHAT_TOKEN_SECRET") {
            config.auth.token_secret = Some(secret);
        }

        if let Ok(flag) = std::env::var("SUPPORT_CHAT_ALLOW_ANONYMOUS_FALLBACK") {
            config.auth.allow_anonymous_fallback = parse_flag(&flag).ok_or_else(|| {
                ChatError::InvalidConfig(format!(
                    "SUPPORT_CHAT_ALLOW_ANONYMOUS_FALLBACK must be true or false, got {flag}"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate configuration invariants.
    ///
    /// # Errors
    /// Returns an error if any values are out of range or invalid.
    pub fn validate(&self) -> ChatResult<()> {
        if self.history.previous_sessions_limit == 0 {
            return Err(ChatError::InvalidConfig(
                "history.previous_sessions_limit must be > 0".to_string(),
            ));
        }

        for table in [&self.storage.sessions_table, &self.storage.messages_table] {
            if table.is_empty() || !table.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
            {
                return Err(ChatError::InvalidConfig(format!(
                    "table name must be [A-Za-z0-9_]+, got {table:?}"
                )));
            }
        }

        if self.storage.sessions_table == self.storage.messages_table {
            return Err(ChatError::InvalidConfig(
                "sessions_table and messages_table must differ".to_string(),
            ));
        }

        if let Some(secret) = &self.auth.token_secret
            && secret.len() < 16
        {
            return Err(ChatError::InvalidConfig(
                "auth.token_secret must be at least 16 bytes".to_string(),
            ));
        }

        Ok(())
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Port for both REST and WebSocket traffic.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: DEFAULT_PORT }
    }
}

/// Storage settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StorageConfig {
    /// `SQLite` database path (`:memory:` for an ephemeral store).
    pub sqlite_path: PathBuf,
    /// Table holding chat sessions.
    pub sessions_table: String,
    /// Table holding chat messages.
    pub messages_table: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            sqlite_path: PathBuf::from("support_chat.sqlite"),
            sessions_table: "chat_sessions".to_string(),
            messages_table: "chat_messages".to_string(),
        }
    }
}

impl StorageConfig {
    /// Storage pointing at a private in-memory database.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: PathBuf::from(":memory:"),
            ..Self::default()
        }
    }
}

/// Connection authentication settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AuthConfig {
    /// HS256 secret for bearer tokens. Without it no token verifies.
    pub token_secret: Option<String>,
    /// Treat connections with an unverifiable token as anonymous instead of
    /// rejecting them.
    pub allow_anonymous_fallback: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            token_secret: None,
            allow_anonymous_fallback: true,
        }
    }
}

/// Customer history lookup settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Number of most recent closed sessions inspected at session creation.
    pub previous_sessions_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            previous_sessions_limit: 10,
        }
    }
}
