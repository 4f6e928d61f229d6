//! Customer support chat: sessions, routing and reporting.

pub mod analytics;
pub mod auth;
pub mod core;
pub mod engine;
pub mod routing;
pub mod storage;
