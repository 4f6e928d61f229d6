//! Session lifecycle orchestration module.

pub mod lifecycle;

pub use lifecycle::{ChatBackends, SessionLifecycle};
