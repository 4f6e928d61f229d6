//! Application state shared across all request handlers.

use std::sync::Arc;

use crate::chat::analytics::AnalyticsAggregator;
use crate::chat::auth::ConnectionGate;
use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::ChatResult;
use crate::chat::engine::{ChatBackends, SessionLifecycle};
use crate::chat::routing::{Broadcaster, EventRouter, RoomHub};

/// Shared application state.
pub struct AppState {
    /// Effective configuration.
    pub config: ChatConfig,
    /// Identity resolution for sockets and REST calls.
    pub gate: ConnectionGate,
    /// Live connections and rooms.
    pub hub: Arc<RoomHub>,
    /// Session state machine.
    pub lifecycle: Arc<SessionLifecycle>,
    /// Socket event dispatch.
    pub router: EventRouter,
    /// Reporting.
    pub analytics: AnalyticsAggregator,
}

impl AppState {
    /// Create state backed by the configured `SQLite` database.
    ///
    /// # Errors
    /// Returns an error if the configuration is invalid or storage cannot be
    /// initialized.
    pub async fn new(config: ChatConfig) -> ChatResult<Arc<Self>> {
        config.validate()?;
        let backends = ChatBackends::sqlite(&config).await?;
        Ok(Self::with_backends(config, backends))
    }

    /// Wire state around already-built storage backends.
    #[must_use]
    pub fn with_backends(config: ChatConfig, backends: ChatBackends) -> Arc<Self> {
        let hub = Arc::new(RoomHub::new());
        let analytics =
            AnalyticsAggregator::new(Arc::clone(&backends.sessions), Arc::clone(&backends.messages));
        let broadcaster: Arc<dyn Broadcaster> = hub.clone();
        let lifecycle = Arc::new(SessionLifecycle::new(
            backends,
            broadcaster,
            config.history.previous_sessions_limit,
        ));
        let router = EventRouter::new(Arc::clone(&lifecycle), Arc::clone(&hub));

        Arc::new(Self {
            gate: ConnectionGate::new(&config.auth),
            config,
            hub,
            lifecycle,
            router,
            analytics,
        })
    }
}
