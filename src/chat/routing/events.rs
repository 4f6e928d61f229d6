//! Wire events exchanged over the socket.
//!
//! Both directions use `{"event": "<name>", "data": {...}}` frames with
//! camelCase fields.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::chat::core::actor::StaffRole;
use crate::chat::core::ids::SessionId;
use crate::chat::core::message::{ChatMessage, FileData, SenderRole};
use crate::chat::core::session::{
    AgentAssignment, ChatSession, CustomerHistory, Priority, SessionStatus, TransferRecord,
};

/// Role and identity a client claims when sending.
///
/// Only `role` is trusted after authorization; the stored sender identity
/// comes from the connection's resolved actor.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SenderClaim {
    /// Claimed role.
    pub role: SenderRole,
    /// Claimed id.
    #[serde(default)]
    pub id: Option<String>,
    /// Display name to use when the token carries none.
    #[serde(default)]
    pub name: Option<String>,
}

/// Feedback submitted with `end_chat`.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct FeedbackInput {
    /// Rating from 1 to 5.
    pub rating: u8,
    /// Free-form comments.
    #[serde(default)]
    pub comments: Option<String>,
}

/// Client to server events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ClientEvent {
    /// Post a message into a session.
    SendMessage {
        /// Target session.
        session_id: SessionId,
        /// Claimed sender.
        sender: SenderClaim,
        /// Message body.
        #[serde(default)]
        content: Option<String>,
        /// Older clients send the body as `text`.
        #[serde(default)]
        text: Option<String>,
        /// Attachment metadata.
        #[serde(default)]
        file_data: Option<FileData>,
        /// Client clock at send time. The server stamps its own time.
        #[serde(default)]
        timestamp: Option<DateTime<Utc>>,
    },
    /// Typing indicator.
    Typing {
        /// Session being typed into.
        session_id: SessionId,
        /// Free-form label of the typer.
        #[serde(default)]
        from: Option<String>,
        /// Started or stopped typing.
        is_typing: bool,
    },
    /// Ask to join a session room.
    JoinSession {
        /// Session to join.
        session_id: SessionId,
    },
    /// Ask to join a user room.
    JoinUserRoom {
        /// Account whose room to join.
        user_id: String,
    },
    /// Ask to join the voice monitoring room.
    JoinVoiceMonitoring,
    /// Close a session, optionally leaving feedback.
    EndChat {
        /// Session to close.
        session_id: SessionId,
        /// Label recorded as the closer.
        #[serde(default)]
        closed_by: Option<String>,
        /// Feedback to record before closing.
        #[serde(default)]
        feedback: Option<FeedbackInput>,
    },
    /// Open a new session for the connected customer.
    StartChat {
        /// Display name when the token carries none.
        #[serde(default)]
        name: Option<String>,
        /// Contact email when the token carries none.
        #[serde(default)]
        email: Option<String>,
        /// Advisory priority.
        #[serde(default)]
        priority: Option<Priority>,
    },
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::SendMessage { .. } => "send_message",
            Self::Typing { .. } => "typing",
            Self::JoinSession { .. } => "join_session",
            Self::JoinUserRoom { .. } => "join_user_room",
            Self::JoinVoiceMonitoring => "join_voice_monitoring",
            Self::EndChat { .. } => "end_chat",
            Self::StartChat { .. } => "start_chat",
        }
    }
}

/// Server to client events.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(
    tag = "event",
    content = "data",
    rename_all = "snake_case",
    rename_all_fields = "camelCase"
)]
pub enum ServerEvent {
    /// A customer opened a session.
    NewChatSession {
        /// The new session.
        session: ChatSession,
        /// Customer's earlier sessions.
        customer_history: CustomerHistory,
    },
    /// Reply to `start_chat`.
    ChatStarted {
        /// The new session.
        session: ChatSession,
    },
    /// An agent was assigned.
    SessionAssigned {
        /// Affected session.
        session_id: SessionId,
        /// New current agent.
        agent: AgentAssignment,
    },
    /// A session moved to another agent.
    SessionTransferred {
        /// Affected session.
        session_id: SessionId,
        /// Recorded transfer.
        transfer: TransferRecord,
    },
    /// A session was closed.
    SessionClosed {
        /// Affected session.
        session_id: SessionId,
        /// Close time.
        closed_at: DateTime<Utc>,
        /// Who closed it.
        closed_by: String,
    },
    /// Status or agent of a session changed.
    SessionUpdated {
        /// Affected session.
        session_id: SessionId,
        /// Current status.
        status: SessionStatus,
        /// Current agent.
        agent: Option<AgentAssignment>,
    },
    /// A message was persisted.
    NewMessage {
        /// The message.
        message: ChatMessage,
    },
    /// A request from this connection failed.
    MessageError {
        /// Session the request targeted.
        session_id: Option<SessionId>,
        /// Client-facing reason.
        error: String,
    },
    /// Someone is typing in a session.
    UserTyping {
        /// Session being typed into.
        session_id: SessionId,
        /// Typer label.
        from: String,
        /// Started or stopped typing.
        is_typing: bool,
    },
    /// A customer is typing; sent to staff.
    CustomerTyping {
        /// Session being typed into.
        session_id: SessionId,
        /// Typer label.
        from: String,
        /// Started or stopped typing.
        is_typing: bool,
    },
    /// Reply to `join_session`.
    SessionJoined {
        /// Requested session.
        session_id: SessionId,
        /// Whether the join happened.
        success: bool,
        /// Reason for a refusal.
        error: Option<String>,
    },
    /// Reply to `join_voice_monitoring`.
    VoiceMonitoringJoined {
        /// Whether the join happened.
        success: bool,
        /// Staff role of the caller.
        role: Option<StaffRole>,
        /// Reason for a refusal.
        reason: Option<String>,
    },
}

impl ServerEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::NewChatSession { .. } => "new_chat_session",
            Self::ChatStarted { .. } => "chat_started",
            Self::SessionAssigned { .. } => "session_assigned",
            Self::SessionTransferred { .. } => "session_transferred",
            Self::SessionClosed { .. } => "session_closed",
            Self::SessionUpdated { .. } => "session_updated",
            Self::NewMessage { .. } => "new_message",
            Self::MessageError { .. } => "message_error",
            Self::UserTyping { .. } => "user_typing",
            Self::CustomerTyping { .. } => "customer_typing",
            Self::SessionJoined { .. } => "session_joined",
            Self::VoiceMonitoringJoined { .. } => "voice_monitoring_joined",
        }
    }

    /// `session_updated` snapshot of a session.
    #[must_use]
    pub fn session_updated(session: &ChatSession) -> Self {
        Self::SessionUpdated {
            session_id: session.session_id,
            status: session.status,
            agent: session.agent.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn send_message_accepts_text_alias_and_guest_role() {
        let session_id = SessionId::new();
        let frame = json!({
            "event": "send_message",
            "data": {
                "sessionId": session_id,
                "sender": { "role": "guest", "id": "x", "name": "Pat" },
                "text": "hello"
            }
        });
        let event: ClientEvent = serde_json::from_value(frame).unwrap();
        match event {
            ClientEvent::SendMessage {
                session_id: parsed,
                sender,
                content,
                text,
                ..
            } => {
                assert_eq!(parsed, session_id);
                assert_eq!(sender.role, SenderRole::Customer);
                assert_eq!(content, None);
                assert_eq!(text.as_deref(), Some("hello"));
            }
            other => panic!("unexpected event {}", other.name()),
        }
    }

    #[test]
    fn unit_event_needs_no_data() {
        let event: ClientEvent =
            serde_json::from_value(json!({ "event": "join_voice_monitoring" })).unwrap();
        assert!(matches!(event, ClientEvent::JoinVoiceMonitoring));
    }

    #[test]
    fn unknown_sender_role_is_rejected() {
        let frame = json!({
            "event": "send_message",
            "data": {
                "sessionId": SessionId::new(),
                "sender": { "role": "bot" },
                "content": "hi"
            }
        });
        assert!(serde_json::from_value::<ClientEvent>(frame).is_err());
    }

    #[test]
    fn server_events_use_snake_case_names_and_camel_case_fields() {
        let session_id = SessionId::new();
        let event = ServerEvent::SessionJoined {
            session_id,
            success: false,
            error: Some("denied".to_string()),
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["event"], "session_joined");
        assert_eq!(value["data"]["sessionId"], json!(session_id));
        assert_eq!(value["data"]["success"], false);
        assert_eq!(event.name(), "session_joined");
    }
}
