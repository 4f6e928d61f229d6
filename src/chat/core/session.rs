//! Chat session model and its status state machine.
//!
//! Every mutation goes through a method on [`ChatSession`] so the lifecycle
//! rules live in one place:
//! - `closed` is terminal; nothing but feedback changes afterwards.
//! - the current agent is overwritten only after the previous one was
//!   recorded in `transfer_history`.
//! - `ended_at` is written once.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::SessionId;

/// Reason recorded for transfers requested by staff.
pub const MANUAL_TRANSFER_REASON: &str = "Manual transfer";
/// Reason recorded when `assign` replaces a different current agent.
pub const REASSIGN_REASON: &str = "Reassigned";

static EMAIL_RE: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").ok());

/// Status of a chat session.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    /// Waiting for an agent.
    #[default]
    Pending,
    /// An agent is handling the session.
    Active,
    /// Conversation ended. Terminal.
    Closed,
}

impl SessionStatus {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Active => 1,
            Self::Closed => 2,
        }
    }

    /// Whether moving from `self` to `next` keeps the status monotonic.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        next.rank() >= self.rank()
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SessionStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "closed" => Ok(Self::Closed),
            _ => Err(value.to_string()),
        }
    }
}

/// Advisory priority label. Does not affect routing.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Low.
    Low,
    /// Normal.
    #[default]
    Normal,
    /// High.
    High,
    /// Urgent.
    Urgent,
}

/// Identity supplied when a session is requested.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerIdentity {
    /// Account id or anonymous correlation id.
    pub id: Option<String>,
    /// Display name.
    pub name: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// No durable account backs this identity.
    #[serde(default)]
    pub is_anonymous: bool,
}

/// Customer attached to a session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Customer {
    /// Account id or anonymous correlation id.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
    /// Contact email.
    pub email: Option<String>,
    /// No durable account backs this session.
    pub is_anonymous: bool,
}

impl Customer {
    /// Validate a requested identity into a session customer.
    ///
    /// Anonymous identities without an id get a generated one.
    ///
    /// # Errors
    /// Returns a validation error if the identity has neither an id nor the
    /// anonymous flag, or carries a malformed email.
    pub fn from_identity(identity: CustomerIdentity) -> ChatResult<Self> {
        let id = identity
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty());

        let id = match (id, identity.is_anonymous) {
            (Some(id), _) => id,
            (None, true) => format!("anon-{}", uuid::Uuid::new_v4()),
            (None, false) => {
                return Err(ChatError::Validation(
                    "customer identity needs an id or the anonymous flag".to_string(),
                ));
            }
        };

        let email = identity
            .email
            .map(|email| email.trim().to_string())
            .filter(|email| !email.is_empty());
        if let Some(email) = &email
            && !is_valid_email(email)
        {
            return Err(ChatError::Validation(format!("malformed email: {email}")));
        }

        Ok(Self {
            id,
            name: identity.name.filter(|name| !name.trim().is_empty()),
            email,
            is_anonymous: identity.is_anonymous,
        })
    }
}

fn is_valid_email(email: &str) -> bool {
    EMAIL_RE.as_ref().is_some_and(|re| re.is_match(email))
}

/// Agent identity used for assignment and transfer.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct AgentIdentity {
    /// Staff account id.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
}

/// Current agent of a session.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentAssignment {
    /// Staff account id.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
    /// When this agent became current.
    pub assigned_at: DateTime<Utc>,
}

/// One entry of a session's transfer history.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    /// Previous agent id, if there was one.
    pub from_agent: Option<String>,
    /// New agent id.
    pub to_agent: String,
    /// When the transfer happened.
    pub transferred_at: DateTime<Utc>,
    /// Why the session moved.
    pub reason: String,
}

/// Customer satisfaction feedback.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    /// Rating from 1 to 5.
    pub rating: u8,
    /// Free-form comments.
    pub comments: Option<String>,
    /// When the feedback was submitted.
    pub submitted_at: DateTime<Utc>,
}

/// Summary of a customer's earlier sessions, computed once at creation.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerHistory {
    /// No earlier closed session exists.
    pub is_first_chat: bool,
    /// Number of earlier closed sessions inspected.
    pub previous_chat_count: usize,
    /// When the most recent earlier session ended.
    pub last_chat_date: Option<DateTime<Utc>>,
    /// Distinct agents of earlier sessions, most recent first.
    pub previous_agents: Vec<String>,
}

impl CustomerHistory {
    /// Build the summary from earlier closed sessions, newest first.
    #[must_use]
    pub fn from_previous(previous: &[ChatSession]) -> Self {
        let mut previous_agents: Vec<String> = Vec::new();
        for session in previous {
            if let Some(agent) = &session.agent {
                let label = agent.name.clone().unwrap_or_else(|| agent.id.clone());
                if !previous_agents.contains(&label) {
                    previous_agents.push(label);
                }
            }
        }

        Self {
            is_first_chat: previous.is_empty(),
            previous_chat_count: previous.len(),
            last_chat_date: previous
                .first()
                .map(|session| session.ended_at.unwrap_or(session.created_at)),
            previous_agents,
        }
    }
}

/// One customer support conversation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    /// Session identifier.
    pub session_id: SessionId,
    /// Requesting customer.
    pub customer: Customer,
    /// Lifecycle status.
    pub status: SessionStatus,
    /// Advisory priority.
    pub priority: Priority,
    /// Current agent.
    pub agent: Option<AgentAssignment>,
    /// When the first agent was attached. Never changes afterwards.
    #[serde(default)]
    pub first_assigned_at: Option<DateTime<Utc>>,
    /// Append-only reassignment log.
    pub transfer_history: Vec<TransferRecord>,
    /// Latest feedback.
    pub feedback: Option<Feedback>,
    /// Updated on every persisted message.
    pub last_activity: DateTime<Utc>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Set once, on close.
    pub ended_at: Option<DateTime<Utc>>,
    /// Who closed the session.
    pub closed_by: Option<String>,
    /// Customer history at creation time.
    #[serde(flatten)]
    pub history: CustomerHistory,
}

impl ChatSession {
    /// Create a pending session.
    #[must_use]
    pub fn new(
        customer: Customer,
        priority: Priority,
        history: CustomerHistory,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            session_id: SessionId::new(),
            customer,
            status: SessionStatus::Pending,
            priority,
            agent: None,
            first_assigned_at: None,
            transfer_history: Vec::new(),
            feedback: None,
            last_activity: now,
            created_at: now,
            ended_at: None,
            closed_by: None,
            history,
        }
    }

    /// Whether the session reached its terminal state.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.status == SessionStatus::Closed
    }

    /// Id of the current agent.
    #[must_use]
    pub fn agent_id(&self) -> Option<&str> {
        self.agent.as_ref().map(|agent| agent.id.as_str())
    }

    fn ensure_open(&self, action: &str) -> ChatResult<()> {
        if self.is_closed() {
            return Err(ChatError::Validation(format!(
                "cannot {action}: session {} is closed",
                self.session_id
            )));
        }
        Ok(())
    }

    /// Make `agent` the current agent and activate the session.
    ///
    /// A different current agent is recorded as a transfer first.
    ///
    /// # Errors
    /// Returns a validation error if the session is closed.
    pub fn assign(&mut self, agent: AgentIdentity, now: DateTime<Utc>) -> ChatResult<()> {
        self.ensure_open("assign an agent")?;
        if let Some(current) = &self.agent
            && current.id != agent.id
        {
            let from_agent = Some(current.id.clone());
            self.push_transfer(from_agent, agent.id.clone(), REASSIGN_REASON, now);
        }
        self.agent = Some(AgentAssignment {
            id: agent.id,
            name: agent.name,
            assigned_at: now,
        });
        self.first_assigned_at.get_or_insert(now);
        self.status = SessionStatus::Active;
        Ok(())
    }

    /// Move the session to another agent and return the recorded entry.
    ///
    /// # Errors
    /// Returns a validation error if the session is closed.
    pub fn transfer(
        &mut self,
        to: AgentIdentity,
        reason: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<TransferRecord> {
        self.ensure_open("transfer")?;
        let from_agent = self.agent.as_ref().map(|agent| agent.id.clone());
        let record = self.push_transfer(from_agent, to.id.clone(), reason, now);
        self.agent = Some(AgentAssignment {
            id: to.id,
            name: to.name,
            assigned_at: record.transferred_at,
        });
        self.first_assigned_at.get_or_insert(record.transferred_at);
        self.status = SessionStatus::Active;
        Ok(record)
    }

    fn push_transfer(
        &mut self,
        from_agent: Option<String>,
        to_agent: String,
        reason: &str,
        now: DateTime<Utc>,
    ) -> TransferRecord {
        // Entries stay ordered even if the wall clock steps back.
        let transferred_at = self
            .transfer_history
            .last()
            .map_or(now, |last| last.transferred_at.max(now));
        let record = TransferRecord {
            from_agent,
            to_agent,
            transferred_at,
            reason: reason.to_string(),
        };
        self.transfer_history.push(record.clone());
        record
    }

    /// First agent reply on an unassigned session assigns that agent.
    ///
    /// Returns `true` if the session was claimed, `false` if it already had
    /// an agent.
    ///
    /// # Errors
    /// Returns a validation error if the session is closed.
    pub fn claim(&mut self, agent: AgentIdentity, now: DateTime<Utc>) -> ChatResult<bool> {
        self.ensure_open("reply")?;
        if self.agent.is_some() {
            return Ok(false);
        }
        self.assign(agent, now)?;
        Ok(true)
    }

    /// Close the session. Returns `false` if it was already closed.
    pub fn close(&mut self, closed_by: &str, now: DateTime<Utc>) -> bool {
        if self.is_closed() {
            return false;
        }
        self.status = SessionStatus::Closed;
        self.ended_at = Some(now);
        self.closed_by = Some(closed_by.to_string());
        true
    }

    /// Explicit status change.
    ///
    /// # Errors
    /// Returns a validation error for a backwards transition, or when asked
    /// to activate a session without an agent.
    pub fn set_status(
        &mut self,
        next: SessionStatus,
        changed_by: &str,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(ChatError::Validation(format!(
                "status cannot go from {} to {next}",
                self.status
            )));
        }
        match next {
            SessionStatus::Closed => {
                self.close(changed_by, now);
            }
            SessionStatus::Active if self.agent.is_none() => {
                return Err(ChatError::Validation(
                    "an active session needs an agent".to_string(),
                ));
            }
            SessionStatus::Active | SessionStatus::Pending => self.status = next,
        }
        Ok(())
    }

    /// Replace feedback. Last write wins.
    ///
    /// # Errors
    /// Returns a validation error if the rating is outside 1..=5.
    pub fn set_feedback(
        &mut self,
        rating: u8,
        comments: Option<String>,
        now: DateTime<Utc>,
    ) -> ChatResult<()> {
        if !(1..=5).contains(&rating) {
            return Err(ChatError::Validation(format!(
                "rating must be between 1 and 5, got {rating}"
            )));
        }
        self.feedback = Some(Feedback {
            rating,
            comments: comments.filter(|c| !c.trim().is_empty()),
            submitted_at: now,
        });
        Ok(())
    }

    /// Record message activity.
    pub fn touch(&mut self, at: DateTime<Utc>) {
        self.last_activity = self.last_activity.max(at);
    }
}
