//! Connection authentication and session authorization.

pub mod gate;
pub mod guard;
pub mod token;

pub use gate::{ConnectionGate, Handshake};
pub use guard::{AuthorizationGuard, SendAuthorization};
pub use token::{TokenClaims, TokenVerifier};
