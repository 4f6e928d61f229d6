//! Identity resolution for new connections.

use chrono::Utc;
use tracing::{debug, warn};

use crate::chat::auth::token::{TokenClaims, TokenVerifier};
use crate::chat::core::actor::{Actor, StaffRole};
use crate::chat::core::config::AuthConfig;
use crate::chat::core::errors::{ChatError, ChatResult};
use crate::chat::core::ids::ConnectionId;
use crate::chat::routing::rooms::Room;

/// Credentials presented when a connection opens.
#[derive(Clone, Debug, Default)]
pub struct Handshake {
    /// Bearer token, if any.
    pub token: Option<String>,
    /// Client-held anonymous correlation id, stable across reconnects.
    pub anonymous_id: Option<String>,
}

/// Resolves the actor behind each new connection.
#[derive(Clone, Debug)]
pub struct ConnectionGate {
    verifier: Option<TokenVerifier>,
    allow_anonymous_fallback: bool,
}

impl ConnectionGate {
    /// Build a gate from auth settings.
    #[must_use]
    pub fn new(config: &AuthConfig) -> Self {
        Self {
            verifier: config.token_secret.as_deref().map(TokenVerifier::new),
            allow_anonymous_fallback: config.allow_anonymous_fallback,
        }
    }

    /// Resolve the actor for a connection.
    ///
    /// No token gives an anonymous actor. A token that fails verification
    /// gives an anonymous actor too when fallback is enabled.
    ///
    /// # Errors
    /// Returns `InvalidToken` for a bad token when fallback is disabled.
    pub fn resolve(&self, connection_id: ConnectionId, handshake: &Handshake) -> ChatResult<Actor> {
        let token = handshake
            .token
            .as_deref()
            .map(str::trim)
            .filter(|token| !token.is_empty());

        let Some(token) = token else {
            return Ok(anonymous(connection_id, handshake));
        };

        match self.verify(token) {
            Ok(claims) => {
                let actor = actor_from_claims(claims)?;
                debug!(connection = %connection_id, actor = actor.label(), "Resolved connection identity");
                Ok(actor)
            }
            Err(err) if self.allow_anonymous_fallback => {
                warn!(connection = %connection_id, %err, "Token rejected, continuing as anonymous");
                Ok(anonymous(connection_id, handshake))
            }
            Err(err) => Err(err),
        }
    }

    /// Resolve a bearer token that must verify, for the REST surface.
    ///
    /// # Errors
    /// Returns `InvalidToken` if the token does not verify.
    pub fn authenticate(&self, token: &str) -> ChatResult<Actor> {
        actor_from_claims(self.verify(token)?)
    }

    fn verify(&self, token: &str) -> ChatResult<TokenClaims> {
        self.verifier.as_ref().map_or_else(
            || Err(ChatError::InvalidToken("no token secret configured".to_string())),
            |verifier| verifier.verify(token, Utc::now()),
        )
    }

    /// The one coarse room every actor joins on connect.
    #[must_use]
    pub fn coarse_room(actor: &Actor) -> Room {
        match actor {
            Actor::Staff { .. } => Room::Staff,
            Actor::Customer { id, .. } => Room::User(id.clone()),
            Actor::Anonymous { .. } => Room::Anonymous,
        }
    }
}

fn anonymous(connection_id: ConnectionId, handshake: &Handshake) -> Actor {
    let id = handshake
        .anonymous_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| connection_id.to_string(), str::to_string);
    Actor::Anonymous { id }
}

fn actor_from_claims(claims: TokenClaims) -> ChatResult<Actor> {
    let id = claims
        .subject()
        .map(str::to_string)
        .ok_or_else(|| ChatError::InvalidToken("token carries no identity".to_string()))?;
    let role = claims
        .account_type
        .as_deref()
        .and_then(|account_type| account_type.parse::<StaffRole>().ok());

    Ok(match role {
        Some(role) => Actor::Staff {
            id,
            name: claims.name,
            role,
        },
        None => Actor::Customer {
            id,
            name: claims.name,
            email: claims.email,
        },
    })
}
