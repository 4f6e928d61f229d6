//! Pure metric computations over sessions and transcripts.

use chrono::{DateTime, Utc};

use crate::chat::core::message::{ChatMessage, SenderRole};
use crate::chat::core::session::ChatSession;

/// Scale factor turning a 1..=5 average rating into a percentage.
pub const SATISFACTION_SCALE: f64 = 20.0;

/// First agent reply to a customer.
#[derive(Clone, Debug, PartialEq)]
pub struct FirstResponse {
    /// Id of the agent who answered.
    pub responder: String,
    /// Seconds between the first customer message and the reply.
    pub seconds: f64,
}

fn seconds_between(start: DateTime<Utc>, end: DateTime<Utc>) -> f64 {
    #[allow(clippy::cast_precision_loss)]
    let millis = (end - start).num_milliseconds() as f64;
    millis / 1000.0
}

/// `endedAt - createdAt` of a closed session.
#[must_use]
pub fn session_duration(session: &ChatSession) -> Option<f64> {
    if !session.is_closed() {
        return None;
    }
    session
        .ended_at
        .map(|ended_at| seconds_between(session.created_at, ended_at))
        .filter(|seconds| *seconds >= 0.0)
}

/// Time a session waited for its first agent.
#[must_use]
pub fn wait_time(session: &ChatSession) -> Option<f64> {
    session
        .first_assigned_at
        .map(|assigned_at| seconds_between(session.created_at, assigned_at))
        .filter(|seconds| *seconds >= 0.0)
}

/// Time from the first customer message to the first agent message after it.
///
/// Only positive gaps count.
#[must_use]
pub fn first_response(messages: &[ChatMessage]) -> Option<FirstResponse> {
    let first_customer = messages
        .iter()
        .find(|message| message.sender == SenderRole::Customer)?;
    let reply = messages.iter().find(|message| {
        message.sender == SenderRole::Agent && message.timestamp > first_customer.timestamp
    })?;

    let seconds = seconds_between(first_customer.timestamp, reply.timestamp);
    (seconds > 0.0).then(|| FirstResponse {
        responder: reply.sender_info.id.clone(),
        seconds,
    })
}

/// Arithmetic mean, `None` for no samples.
#[must_use]
pub fn average(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    #[allow(clippy::cast_precision_loss)]
    let count = values.len() as f64;
    Some(values.iter().sum::<f64>() / count)
}

/// Average rating expressed as a percentage (`avg * 20`).
#[must_use]
pub fn satisfaction_rate(ratings: &[u8]) -> Option<f64> {
    let ratings: Vec<f64> = ratings.iter().map(|rating| f64::from(*rating)).collect();
    average(&ratings).map(|avg| avg * SATISFACTION_SCALE)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::chat::core::ids::SessionId;
    use crate::chat::core::message::{NewMessage, SenderInfo};
    use crate::chat::core::session::{AgentIdentity, Customer, CustomerHistory, Priority};

    fn message(role: SenderRole, who: &str, at: DateTime<Utc>) -> ChatMessage {
        ChatMessage::from_new(
            NewMessage {
                session_id: SessionId::new(),
                sender: role,
                sender_info: SenderInfo {
                    id: who.to_string(),
                    name: None,
                },
                content: "x".to_string(),
                file_data: None,
            },
            at,
        )
        .unwrap()
    }

    fn session(created_at: DateTime<Utc>) -> ChatSession {
        let customer = Customer {
            id: "c".to_string(),
            name: None,
            email: None,
            is_anonymous: false,
        };
        ChatSession::new(customer, Priority::Normal, CustomerHistory::default(), created_at)
    }

    #[test]
    fn first_response_skips_agent_greetings_before_the_customer() {
        let t0 = Utc::now();
        let messages = vec![
            message(SenderRole::Agent, "a1", t0),
            message(SenderRole::Customer, "c", t0 + Duration::seconds(10)),
            message(SenderRole::Agent, "a2", t0 + Duration::seconds(40)),
        ];
        let response = first_response(&messages).unwrap();
        assert_eq!(response.responder, "a2");
        assert!((response.seconds - 30.0).abs() < f64::EPSILON);
    }

    #[test]
    fn no_reply_means_no_first_response() {
        let t0 = Utc::now();
        let messages = vec![message(SenderRole::Customer, "c", t0)];
        assert!(first_response(&messages).is_none());
    }

    #[test]
    fn duration_only_for_closed_sessions() {
        let t0 = Utc::now() - Duration::minutes(5);
        let mut s = session(t0);
        assert!(session_duration(&s).is_none());
        s.close("agent", t0 + Duration::seconds(90));
        assert_eq!(session_duration(&s), Some(90.0));
    }

    #[test]
    fn wait_time_uses_first_assignment() {
        let t0 = Utc::now() - Duration::minutes(5);
        let mut s = session(t0);
        assert!(wait_time(&s).is_none());
        let agent = AgentIdentity {
            id: "a".to_string(),
            name: None,
        };
        s.assign(agent, t0 + Duration::seconds(12)).unwrap();
        assert_eq!(wait_time(&s), Some(12.0));
    }

    #[test]
    fn satisfaction_is_average_times_twenty() {
        assert_eq!(satisfaction_rate(&[5, 3]), Some(80.0));
        assert_eq!(satisfaction_rate(&[]), None);
    }
}
