//! Per-session authorization for joining rooms and sending messages.
//!
//! Decisions are re-evaluated against the stored session on every request;
//! nothing is cached from join time.

use std::sync::Arc;

use tracing::warn;

use crate::chat::core::actor::Actor;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::SessionId;
use crate::chat::core::message::SenderRole;
use crate::chat::core::session::ChatSession;
use crate::chat::storage::SessionStore;

/// Outcome of an authorized send.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SendAuthorization {
    /// The session's own customer is writing.
    Customer,
    /// A staff member is replying.
    Agent {
        /// The session has no agent yet, so this reply claims it.
        claims_session: bool,
    },
}

/// Decides whether an actor may join or write into a session.
#[derive(Clone)]
pub struct AuthorizationGuard {
    sessions: Arc<dyn SessionStore>,
}

impl AuthorizationGuard {
    /// Create a guard over a session store.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>) -> Self {
        Self { sessions }
    }

    async fn load(&self, session_id: SessionId) -> ChatResult<ChatSession> {
        self.sessions
            .get(session_id)
            .await?
            .ok_or_else(|| ChatError::session_not_found(session_id))
    }

    /// Load a session and check that `actor` may join its room.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown sessions and `Authorization` when the
    /// actor is neither staff nor the session's customer.
    pub async fn authorize_join(
        &self,
        actor: &Actor,
        session_id: SessionId,
    ) -> ChatResult<ChatSession> {
        let session = self.load(session_id).await?;
        Self::check_join(actor, &session)?;
        Ok(session)
    }

    /// Load a session and check that `actor` may send into it as `role`.
    ///
    /// # Errors
    /// Returns `NotFound` for unknown sessions and `Authorization` when the
    /// actor may not send as `role`.
    pub async fn authorize_send(
        &self,
        actor: &Actor,
        session_id: SessionId,
        role: SenderRole,
    ) -> ChatResult<(ChatSession, SendAuthorization)> {
        let session = self.load(session_id).await?;
        let decision = Self::check_send(actor, &session, role)?;
        Ok((session, decision))
    }

    /// Join rule: staff, or the session's own customer.
    ///
    /// # Errors
    /// Returns `Authorization` if the actor may not join.
    pub fn check_join(actor: &Actor, session: &ChatSession) -> ChatResult<()> {
        if actor.is_staff() || Self::is_session_customer(actor, session) {
            return Ok(());
        }
        warn!(
            session = %session.session_id,
            actor = actor.label(),
            "Denied session join"
        );
        Err(ChatError::Authorization(format!(
            "not a participant of session {}",
            session.session_id
        )))
    }

    /// Send rule for a claimed sender role.
    ///
    /// # Errors
    /// Returns `Authorization` if the actor may not send as `role`.
    pub fn check_send(
        actor: &Actor,
        session: &ChatSession,
        role: SenderRole,
    ) -> ChatResult<SendAuthorization> {
        let decision = match role {
            SenderRole::Customer if Self::is_session_customer(actor, session) => {
                Some(SendAuthorization::Customer)
            }
            SenderRole::Agent if actor.is_staff() => Some(SendAuthorization::Agent {
                claims_session: session.agent.is_none(),
            }),
            SenderRole::Customer | SenderRole::Agent => None,
        };

        decision.ok_or_else(|| {
            warn!(
                session = %session.session_id,
                actor = actor.label(),
                role = %role,
                "Denied message send"
            );
            ChatError::Authorization(format!(
                "cannot send as {role} in session {}",
                session.session_id
            ))
        })
    }

    /// Anonymous actors match anonymous sessions by correlation id only;
    /// authenticated customers match by account id.
    fn is_session_customer(actor: &Actor, session: &ChatSession) -> bool {
        match actor {
            Actor::Anonymous { id } => session.customer.is_anonymous && *id == session.customer.id,
            Actor::Customer { id, .. } => {
                !session.customer.is_anonymous && *id == session.customer.id
            }
            Actor::Staff { .. } => false,
        }
    }
}
