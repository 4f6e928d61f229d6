//! Core chat types and identifiers.

pub mod actor;
pub mod config;
pub mod errors;
pub mod ids;
pub mod message;
pub mod session;

pub use actor::{Actor, StaffRole};
pub use config::{AuthConfig, ChatConfig, HistoryConfig, ServerConfig, StorageConfig};
pub use errors::{ChatError, ChatResult, ErrorKind};
pub use ids::{ConnectionId, MessageId, SessionId};
pub use message::{ChatMessage, FileData, MessageType, NewMessage, SenderInfo, SenderRole};
pub use session::{
    AgentAssignment, AgentIdentity, ChatSession, Customer, CustomerHistory, CustomerIdentity,
    Feedback, Priority, SessionStatus, TransferRecord,
};
