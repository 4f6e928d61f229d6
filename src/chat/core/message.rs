//! Chat message model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::{MessageId, SessionId};

/// Maximum accepted message length in characters.
pub const MAX_CONTENT_CHARS: usize = 5000;

/// Role a message was sent as.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    /// The session's customer. `guest` is accepted as an alias on the wire.
    #[serde(alias = "guest")]
    Customer,
    /// A staff member.
    Agent,
}

impl SenderRole {
    /// Stable string form for storage.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Customer => "customer",
            Self::Agent => "agent",
        }
    }
}

impl fmt::Display for SenderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SenderRole {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "customer" | "guest" => Ok(Self::Customer),
            "agent" => Ok(Self::Agent),
            _ => Err(value.to_string()),
        }
    }
}

/// Kind of message payload.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Plain text.
    #[default]
    Text,
    /// File attachment, optionally with a caption.
    File,
}

/// Attachment metadata. The file itself lives elsewhere.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileData {
    /// Original file name.
    pub name: String,
    /// Where the uploaded file can be fetched.
    pub url: String,
    /// Size in bytes.
    pub size: Option<u64>,
    /// MIME type.
    pub mime_type: Option<String>,
}

/// Identity of the actual sender.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct SenderInfo {
    /// Account or anonymous id.
    pub id: String,
    /// Display name.
    pub name: Option<String>,
}

/// Input for persisting a new message.
#[derive(Clone, Debug)]
pub struct NewMessage {
    /// Target session.
    pub session_id: SessionId,
    /// Role the message is sent as.
    pub sender: SenderRole,
    /// Resolved sender identity.
    pub sender_info: SenderInfo,
    /// Text body; may be empty for file messages.
    pub content: String,
    /// Optional attachment.
    pub file_data: Option<FileData>,
}

/// A persisted, immutable chat message.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Message identifier.
    pub id: MessageId,
    /// Owning session.
    pub session_id: SessionId,
    /// Role tag.
    pub sender: SenderRole,
    /// Actual sender.
    pub sender_info: SenderInfo,
    /// Text body.
    pub content: String,
    /// Payload kind.
    pub message_type: MessageType,
    /// Attachment, if any.
    pub file_data: Option<FileData>,
    /// Server-side persistence time.
    pub timestamp: DateTime<Utc>,
}

impl ChatMessage {
    /// Validate input and stamp it into a message.
    ///
    /// # Errors
    /// Returns a validation error for empty or oversized messages.
    pub fn from_new(input: NewMessage, timestamp: DateTime<Utc>) -> ChatResult<Self> {
        let content = input.content.trim().to_string();
        if content.is_empty() && input.file_data.is_none() {
            return Err(ChatError::Validation("message is empty".to_string()));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ChatError::Validation(format!(
                "message exceeds {MAX_CONTENT_CHARS} characters"
            )));
        }
        let message_type = if input.file_data.is_some() {
            MessageType::File
        } else {
            MessageType::Text
        };

        Ok(Self {
            id: MessageId::new(),
            session_id: input.session_id,
            sender: input.sender,
            sender_info: input.sender_info,
            content,
            message_type,
            file_data: input.file_data,
            timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(content: &str, file: Option<FileData>) -> NewMessage {
        NewMessage {
            session_id: SessionId::new(),
            sender: SenderRole::Customer,
            sender_info: SenderInfo {
                id: "c1".to_string(),
                name: None,
            },
            content: content.to_string(),
            file_data: file,
        }
    }

    #[test]
    fn guest_is_an_alias_for_customer() {
        let role: SenderRole = serde_json::from_str("\"guest\"").unwrap();
        assert_eq!(role, SenderRole::Customer);
        assert_eq!("guest".parse::<SenderRole>(), Ok(SenderRole::Customer));
    }

    #[test]
    fn empty_text_message_is_rejected() {
        assert!(ChatMessage::from_new(input("   ", None), Utc::now()).is_err());
    }

    #[test]
    fn file_message_may_be_captionless() {
        let file = FileData {
            name: "plan.pdf".to_string(),
            url: "/uploads/plan.pdf".to_string(),
            size: Some(1024),
            mime_type: Some("application/pdf".to_string()),
        };
        let message = ChatMessage::from_new(input("", Some(file)), Utc::now()).unwrap();
        assert_eq!(message.message_type, MessageType::File);
    }

    #[test]
    fn oversized_message_is_rejected() {
        let long = "x".repeat(MAX_CONTENT_CHARS + 1);
        assert!(ChatMessage::from_new(input(&long, None), Utc::now()).is_err());
    }
}
