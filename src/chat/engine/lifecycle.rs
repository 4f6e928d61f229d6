//! Session lifecycle orchestration.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info};

use crate::chat::core::config::ChatConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::SessionId;
use crate::chat::core::message::{ChatMessage, NewMessage};
use crate::chat::core::session::{
    AgentIdentity, ChatSession, Customer, CustomerHistory, CustomerIdentity,
    MANUAL_TRANSFER_REASON, Priority, SessionStatus,
};
use crate::chat::routing::events::ServerEvent;
use crate::chat::routing::hub::Broadcaster;
use crate::chat::routing::rooms::Room;
use crate::chat::storage::{
    MessageStore, SessionFilter, SessionStore, SqliteMessageStore, SqliteSessionStore,
    open_connection,
};

/// Storage dependencies for the lifecycle manager.
pub struct ChatBackends {
    /// Session store implementation.
    pub sessions: Arc<dyn SessionStore>,
    /// Message store implementation.
    pub messages: Arc<dyn MessageStore>,
}

impl ChatBackends {
    /// Build `SQLite` backends sharing one connection.
    ///
    /// # Errors
    /// Returns an error if the database cannot be opened or initialized.
    pub async fn sqlite(config: &ChatConfig) -> ChatResult<Self> {
        let conn = open_connection(&config.storage).await?;
        let sessions = Arc::new(SqliteSessionStore::new(Arc::clone(&conn), &config.storage).await?);
        let messages = Arc::new(SqliteMessageStore::new(conn, &config.storage).await?);
        Ok(Self { sessions, messages })
    }
}

/// Create / assign / transfer / close state machine over the stores.
///
/// Mutations of one session are serialized in-process; separate server
/// instances sharing a database can still interleave.
pub struct SessionLifecycle {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
    broadcaster: Arc<dyn Broadcaster>,
    history_limit: usize,
    locks: DashMap<SessionId, Arc<Mutex<()>>>,
}

impl SessionLifecycle {
    /// Create a lifecycle manager.
    #[must_use]
    pub fn new(
        backends: ChatBackends,
        broadcaster: Arc<dyn Broadcaster>,
        history_limit: usize,
    ) -> Self {
        Self {
            sessions: backends.sessions,
            messages: backends.messages,
            broadcaster,
            history_limit,
            locks: DashMap::new(),
        }
    }

    /// Session store backing this manager.
    #[must_use]
    pub fn sessions(&self) -> Arc<dyn SessionStore> {
        Arc::clone(&self.sessions)
    }

    /// Message store backing this manager.
    #[must_use]
    pub fn messages(&self) -> Arc<dyn MessageStore> {
        Arc::clone(&self.messages)
    }

    /// Open a pending session and announce it to staff.
    ///
    /// # Errors
    /// Returns a validation error for a malformed identity, or a storage
    /// error.
    pub async fn create(
        &self,
        identity: CustomerIdentity,
        priority: Priority,
    ) -> ChatResult<ChatSession> {
        let customer = Customer::from_identity(identity)?;
        let previous = self
            .sessions
            .list_closed_for_customer(
                &customer.id,
                customer.is_anonymous,
                self.history_limit,
            )
            .await?;
        let history = CustomerHistory::from_previous(&previous);

        let session = ChatSession::new(customer, priority, history.clone(), Utc::now());
        self.sessions.insert(&session).await?;

        info!(
            session = %session.session_id,
            anonymous = session.customer.is_anonymous,
            previous_chats = history.previous_chat_count,
            "Chat session created"
        );
        self.broadcaster.broadcast(
            &Room::Staff,
            &ServerEvent::NewChatSession {
                session: session.clone(),
                customer_history: history,
            },
        );
        Ok(session)
    }

    /// Load a session.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown sessions, or a storage error.
    pub async fn get(&self, session_id: SessionId) -> ChatResult<ChatSession> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))
    }

    /// Sessions matching a filter, oldest first.
    ///
    /// # Errors
    /// Returns a storage error.
    pub async fn list(&self, filter: SessionFilter) -> ChatResult<Vec<ChatSession>> {
        self.sessions.list(filter).await
    }

    /// Messages of a session in persisted order.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown sessions, or a storage error.
    pub async fn transcript(&self, session_id: SessionId) -> ChatResult<Vec<ChatMessage>> {
        self.get(session_id).await?;
        self.messages.list_for_session(session_id).await
    }

    /// Make `agent` the current agent.
    ///
    /// # Errors
    /// Returns `NotFound`, a validation error for closed sessions, or a
    /// storage error.
    pub async fn assign_agent(
        &self,
        session_id: SessionId,
        agent: AgentIdentity,
    ) -> ChatResult<ChatSession> {
        let (session, ()) = self
            .mutate(session_id, |session| session.assign(agent, Utc::now()))
            .await?;
        info!(session = %session_id, agent = session.agent_id(), "Agent assigned");
        self.announce_assignment(&session);
        Ok(session)
    }

    /// Hand a session to another agent.
    ///
    /// # Errors
    /// Returns `NotFound`, a validation error for closed sessions, or a
    /// storage error.
    pub async fn transfer(
        &self,
        session_id: SessionId,
        to: AgentIdentity,
    ) -> ChatResult<ChatSession> {
        let (session, transfer) = self
            .mutate(session_id, |session| {
                session.transfer(to, MANUAL_TRANSFER_REASON, Utc::now())
            })
            .await?;
        info!(
            session = %session_id,
            from = transfer.from_agent.as_deref(),
            to = %transfer.to_agent,
            "Session transferred"
        );
        self.broadcaster.broadcast(
            &Room::Staff,
            &ServerEvent::SessionTransferred {
                session_id,
                transfer,
            },
        );
        self.broadcaster
            .broadcast(&Room::Session(session_id), &ServerEvent::session_updated(&session));
        Ok(session)
    }

    /// Lazy assignment: the first agent reply on an unassigned session makes
    /// that agent current. Returns whether this call claimed the session.
    ///
    /// # Errors
    /// Returns `NotFound`, a validation error for closed sessions, or a
    /// storage error.
    pub async fn claim_for_agent(
        &self,
        session_id: SessionId,
        agent: AgentIdentity,
    ) -> ChatResult<(ChatSession, bool)> {
        let (session, claimed) = self
            .mutate(session_id, |session| session.claim(agent, Utc::now()))
            .await?;
        if claimed {
            info!(session = %session_id, agent = session.agent_id(), "Session claimed by first reply");
            self.announce_assignment(&session);
        }
        Ok((session, claimed))
    }

    /// Explicit status change along `pending -> active -> closed`.
    ///
    /// # Errors
    /// Returns `NotFound`, a validation error for a backwards move or an
    /// agentless activation, or a storage error.
    pub async fn update_status(
        &self,
        session_id: SessionId,
        status: SessionStatus,
        changed_by: &str,
    ) -> ChatResult<ChatSession> {
        if status == SessionStatus::Closed {
            let (session, _) = self.close(session_id, changed_by).await?;
            return Ok(session);
        }

        let (session, ()) = self
            .mutate(session_id, |session| {
                session.set_status(status, changed_by, Utc::now())
            })
            .await?;
        info!(session = %session_id, status = %session.status, "Session status updated");
        let event = ServerEvent::session_updated(&session);
        self.broadcaster.broadcast(&Room::Staff, &event);
        self.broadcaster.broadcast(&Room::Session(session_id), &event);
        Ok(session)
    }

    /// Close a session. Returns the session and whether this call closed it;
    /// closing a closed session changes nothing and broadcasts nothing.
    ///
    /// # Errors
    /// Returns `NotFound`, or a storage error.
    pub async fn close(
        &self,
        session_id: SessionId,
        closed_by: &str,
    ) -> ChatResult<(ChatSession, bool)> {
        let (session, closed) = self
            .mutate(session_id, |session| Ok(session.close(closed_by, Utc::now())))
            .await?;

        if !closed {
            debug!(session = %session_id, "Session already closed");
            return Ok((session, false));
        }

        info!(session = %session_id, closed_by, "Session closed");
        let event = ServerEvent::SessionClosed {
            session_id,
            closed_at: session.ended_at.unwrap_or_else(Utc::now),
            closed_by: closed_by.to_string(),
        };
        self.broadcaster.broadcast(&Room::Staff, &event);
        self.broadcaster.broadcast(&Room::Session(session_id), &event);
        Ok((session, true))
    }

    /// Store customer feedback, replacing any earlier feedback.
    ///
    /// # Errors
    /// Returns `NotFound`, a validation error for an out-of-range rating, or
    /// a storage error.
    pub async fn save_feedback(
        &self,
        session_id: SessionId,
        rating: u8,
        comments: Option<String>,
    ) -> ChatResult<ChatSession> {
        let (session, ()) = self
            .mutate(session_id, |session| {
                session.set_feedback(rating, comments, Utc::now())
            })
            .await?;
        info!(session = %session_id, rating, "Feedback saved");
        Ok(session)
    }

    /// Persist a message, bump `lastActivity` and fan it out.
    ///
    /// The message row and the activity update are two writes; a crash
    /// between them leaves `lastActivity` stale.
    ///
    /// # Errors
    /// Returns `NotFound`, a validation error for closed sessions or bad
    /// content, or a storage error.
    pub async fn save_message(&self, input: NewMessage) -> ChatResult<ChatMessage> {
        let session_id = input.session_id;
        let guard = self.lock(session_id).await;
        let result = self.save_message_locked(input).await;
        drop(guard);
        self.release_lock(session_id);

        let (session, message) = result?;
        debug!(
            session = %session_id,
            message = %message.id,
            sender = %message.sender,
            "Message saved"
        );

        let event = ServerEvent::NewMessage {
            message: message.clone(),
        };
        self.broadcaster.broadcast(&Room::Staff, &event);
        self.broadcaster.broadcast(&Room::Session(session_id), &event);
        if !session.customer.is_anonymous {
            self.broadcaster
                .broadcast(&Room::User(session.customer.id.clone()), &event);
        }
        Ok(message)
    }

    async fn save_message_locked(
        &self,
        input: NewMessage,
    ) -> ChatResult<(ChatSession, ChatMessage)> {
        let mut session = self.get(input.session_id).await?;
        if session.is_closed() {
            return Err(ChatError::Validation(format!(
                "session {} is closed",
                session.session_id
            )));
        }
        // Never behind the last stamp, even if the wall clock steps back.
        let stamp = Utc::now().max(session.last_activity);
        let message = ChatMessage::from_new(input, stamp)?;
        self.messages.append(&message).await?;
        self.sessions
            .touch(session.session_id, message.timestamp)
            .await?;
        session.touch(message.timestamp);
        Ok((session, message))
    }

    fn announce_assignment(&self, session: &ChatSession) {
        if let Some(agent) = &session.agent {
            self.broadcaster.broadcast(
                &Room::Staff,
                &ServerEvent::SessionAssigned {
                    session_id: session.session_id,
                    agent: agent.clone(),
                },
            );
        }
        self.broadcaster.broadcast(
            &Room::Session(session.session_id),
            &ServerEvent::session_updated(session),
        );
    }

    /// Load, mutate and write back one session under its lock.
    async fn mutate<T, F>(&self, session_id: SessionId, apply: F) -> ChatResult<(ChatSession, T)>
    where
        F: FnOnce(&mut ChatSession) -> ChatResult<T> + Send,
        T: Send,
    {
        let guard = self.lock(session_id).await;
        let result = async {
            let mut session = self.get(session_id).await?;
            let output = apply(&mut session)?;
            self.sessions.replace(&session).await?;
            Ok((session, output))
        }
        .await;
        drop(guard);
        self.release_lock(session_id);
        result
    }

    async fn lock(&self, session_id: SessionId) -> OwnedMutexGuard<()> {
        let lock = Arc::clone(self.locks.entry(session_id).or_default().value());
        lock.lock_owned().await
    }

    fn release_lock(&self, session_id: SessionId) {
        self.locks
            .remove_if(&session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
