//! Room names. Every producer and consumer builds names through [`Room`].

use std::fmt;
use std::str::FromStr;

use crate::chat::core::ids::SessionId;

const USER_PREFIX: &str = "user:";
const SESSION_PREFIX: &str = "session:";

/// A named broadcast group.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Room {
    /// All connected staff.
    Staff,
    /// All anonymous connections.
    Anonymous,
    /// Staff allowed to monitor voice calls.
    VoiceMonitoring,
    /// Every connection of one authenticated account.
    User(String),
    /// Participants of one chat session.
    Session(SessionId),
}

impl fmt::Display for Room {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Staff => f.write_str("staff"),
            Self::Anonymous => f.write_str("anonymous"),
            Self::VoiceMonitoring => f.write_str("voice_monitoring"),
            Self::User(id) => write!(f, "{USER_PREFIX}{id}"),
            Self::Session(id) => write!(f, "{SESSION_PREFIX}{id}"),
        }
    }
}

impl FromStr for Room {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "staff" => return Ok(Self::Staff),
            "anonymous" => return Ok(Self::Anonymous),
            "voice_monitoring" => return Ok(Self::VoiceMonitoring),
            _ => {}
        }
        if let Some(id) = value.strip_prefix(USER_PREFIX)
            && !id.is_empty()
        {
            return Ok(Self::User(id.to_string()));
        }
        if let Some(id) = value.strip_prefix(SESSION_PREFIX) {
            return id
                .parse()
                .map(Self::Session)
                .map_err(|_| value.to_string());
        }
        Err(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_follow_the_wire_convention() {
        let session_id = SessionId::new();
        assert_eq!(Room::Staff.to_string(), "staff");
        assert_eq!(Room::VoiceMonitoring.to_string(), "voice_monitoring");
        assert_eq!(Room::User("42".to_string()).to_string(), "user:42");
        assert_eq!(Room::Session(session_id).to_string(), format!("session:{session_id}"));
    }

    #[test]
    fn names_parse_back() {
        let room = Room::Session(SessionId::new());
        assert_eq!(room.to_string().parse::<Room>(), Ok(room));
        assert_eq!("user:abc".parse::<Room>(), Ok(Room::User("abc".to_string())));
        assert!("user:".parse::<Room>().is_err());
        assert!("session:nope".parse::<Room>().is_err());
        assert!("lobby".parse::<Room>().is_err());
    }
}
