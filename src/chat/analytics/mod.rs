//! Read-only reporting over chat sessions and messages.

pub mod aggregator;
pub mod metrics;

pub use aggregator::{AgentPerformance, AnalyticsAggregator, AnalyticsWindow, SessionOverview};
