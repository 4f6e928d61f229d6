//! Read-side reporting over stored sessions and transcripts.
//!
//! Numbers are best-effort: sessions are selected by creation time inside
//! the window and nothing is cached between calls.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::chat::analytics::metrics::{
    FirstResponse, average, first_response, satisfaction_rate, session_duration, wait_time,
};
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::session::{ChatSession, SessionStatus};
use crate::chat::storage::{MessageStore, SessionFilter, SessionStore};

/// Half-open reporting window `[from, to)` on session creation time.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct AnalyticsWindow {
    /// Inclusive start.
    pub from: Option<DateTime<Utc>>,
    /// Exclusive end.
    pub to: Option<DateTime<Utc>>,
}

impl AnalyticsWindow {
    fn validate(self) -> ChatResult<()> {
        if let (Some(from), Some(to)) = (self.from, self.to)
            && from >= to
        {
            return Err(ChatError::Validation(format!(
                "analytics window is empty: {from} is not before {to}"
            )));
        }
        Ok(())
    }
}

/// Session counts and averages over a window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionOverview {
    /// Sessions created in the window.
    pub total_sessions: usize,
    /// Of which still pending.
    pub pending_sessions: usize,
    /// Of which active.
    pub active_sessions: usize,
    /// Of which closed.
    pub closed_sessions: usize,
    /// Mean `endedAt - createdAt` of closed sessions, in seconds.
    pub average_duration_secs: Option<f64>,
    /// Mean wait for a first agent, in seconds.
    pub average_wait_secs: Option<f64>,
    /// Mean first response time, in seconds.
    pub average_first_response_secs: Option<f64>,
    /// Sessions with feedback.
    pub rated_sessions: usize,
    /// Average rating as a percentage.
    pub satisfaction_rate: Option<f64>,
}

/// Per-agent roll-up over a window.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentPerformance {
    /// Staff account id.
    pub agent_id: String,
    /// Last known display name.
    pub agent_name: Option<String>,
    /// Sessions currently owned by the agent.
    pub sessions_handled: usize,
    /// Of which closed.
    pub sessions_closed: usize,
    /// Sessions the agent handed to someone else.
    pub transfers_out: usize,
    /// Mean first response time of the agent's first replies, in seconds.
    pub average_first_response_secs: Option<f64>,
    /// Mean rating of the agent's sessions.
    pub average_rating: Option<f64>,
    /// Average rating as a percentage.
    pub satisfaction_rate: Option<f64>,
}

#[derive(Default)]
struct AgentTally {
    name: Option<String>,
    handled: usize,
    closed: usize,
    transfers_out: usize,
    first_responses: Vec<f64>,
    ratings: Vec<u8>,
}

/// Computes reports from the session and message stores.
#[derive(Clone)]
pub struct AnalyticsAggregator {
    sessions: Arc<dyn SessionStore>,
    messages: Arc<dyn MessageStore>,
}

impl AnalyticsAggregator {
    /// Create an aggregator over the given stores.
    #[must_use]
    pub fn new(sessions: Arc<dyn SessionStore>, messages: Arc<dyn MessageStore>) -> Self {
        Self { sessions, messages }
    }

    async fn load(
        &self,
        window: AnalyticsWindow,
    ) -> ChatResult<Vec<(ChatSession, Option<FirstResponse>)>> {
        window.validate()?;
        let sessions = self
            .sessions
            .list(SessionFilter::window(window.from, window.to))
            .await?;

        let mut loaded = Vec::with_capacity(sessions.len());
        for session in sessions {
            let transcript = self.messages.list_for_session(session.session_id).await?;
            let response = first_response(&transcript);
            loaded.push((session, response));
        }
        debug!(sessions = loaded.len(), "Analytics window loaded");
        Ok(loaded)
    }

    /// Overall counts and averages.
    ///
    /// # Errors
    /// Returns a validation error for an empty window, or a storage error.
    pub async fn overview(&self, window: AnalyticsWindow) -> ChatResult<SessionOverview> {
        let loaded = self.load(window).await?;

        let mut overview = SessionOverview {
            total_sessions: loaded.len(),
            ..SessionOverview::default()
        };
        let mut durations = Vec::new();
        let mut waits = Vec::new();
        let mut responses = Vec::new();
        let mut ratings = Vec::new();

        for (session, response) in &loaded {
            match session.status {
                SessionStatus::Pending => overview.pending_sessions += 1,
                SessionStatus::Active => overview.active_sessions += 1,
                SessionStatus::Closed => overview.closed_sessions += 1,
            }
            durations.extend(session_duration(session));
            waits.extend(wait_time(session));
            responses.extend(response.as_ref().map(|response| response.seconds));
            ratings.extend(session.feedback.as_ref().map(|feedback| feedback.rating));
        }

        overview.average_duration_secs = average(&durations);
        overview.average_wait_secs = average(&waits);
        overview.average_first_response_secs = average(&responses);
        overview.rated_sessions = ratings.len();
        overview.satisfaction_rate = satisfaction_rate(&ratings);
        Ok(overview)
    }

    /// Roll-ups per agent, ordered by agent id.
    ///
    /// # Errors
    /// Returns a validation error for an empty window, or a storage error.
    pub async fn agent_performance(
        &self,
        window: AnalyticsWindow,
    ) -> ChatResult<Vec<AgentPerformance>> {
        let loaded = self.load(window).await?;
        let mut tallies: BTreeMap<String, AgentTally> = BTreeMap::new();

        for (session, response) in &loaded {
            if let Some(agent) = &session.agent {
                let tally = tallies.entry(agent.id.clone()).or_default();
                if agent.name.is_some() {
                    tally.name.clone_from(&agent.name);
                }
                tally.handled += 1;
                if session.is_closed() {
                    tally.closed += 1;
                }
                tally
                    .ratings
                    .extend(session.feedback.as_ref().map(|feedback| feedback.rating));
            }

            for transfer in &session.transfer_history {
                if let Some(from_agent) = &transfer.from_agent {
                    tallies.entry(from_agent.clone()).or_default().transfers_out += 1;
                }
            }

            if let Some(response) = response {
                tallies
                    .entry(response.responder.clone())
                    .or_default()
                    .first_responses
                    .push(response.seconds);
            }
        }

        Ok(tallies
            .into_iter()
            .map(|(agent_id, tally)| {
                let ratings: Vec<f64> = tally.ratings.iter().map(|r| f64::from(*r)).collect();
                AgentPerformance {
                    agent_id,
                    agent_name: tally.name,
                    sessions_handled: tally.handled,
                    sessions_closed: tally.closed,
                    transfers_out: tally.transfers_out,
                    average_first_response_secs: average(&tally.first_responses),
                    average_rating: average(&ratings),
                    satisfaction_rate: satisfaction_rate(&tally.ratings),
                }
            })
            .collect())
    }
}
