//! HS256 bearer tokens.
//!
//! Tokens are compact JWTs: `base64url(header).base64url(claims).base64url(mac)`
//! without padding, MAC'd with HMAC-SHA256 over the first two segments.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::chat::core::errors::{ChatError, ChatResult};

type HmacSha256 = Hmac<Sha256>;

const ALGORITHM: &str = "HS256";

#[derive(Debug, Serialize, Deserialize)]
struct Header {
    alg: String,
    #[serde(default)]
    typ: Option<String>,
}

/// Claims carried by a bearer token.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenClaims {
    /// Account id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Account id, as issued by older backends.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    /// Display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Contact email.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    /// Account type; staff roles unlock the staff surface.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_type: Option<String>,
    /// Expiry as seconds since the Unix epoch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
}

impl TokenClaims {
    /// Stable identity of the token holder, `id` first.
    #[must_use]
    pub fn subject(&self) -> Option<&str> {
        self.id
            .as_deref()
            .or(self.user_id.as_deref())
            .map(str::trim)
            .filter(|id| !id.is_empty())
    }
}

/// Signs and verifies HS256 tokens with a shared secret.
#[derive(Clone)]
pub struct TokenVerifier {
    key: Vec<u8>,
}

impl std::fmt::Debug for TokenVerifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenVerifier").finish_non_exhaustive()
    }
}

impl TokenVerifier {
    /// Create a verifier for `secret`.
    #[must_use]
    pub fn new(secret: &str) -> Self {
        Self {
            key: secret.as_bytes().to_vec(),
        }
    }

    fn mac(&self) -> ChatResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.key)
            .map_err(|err| ChatError::InvalidConfig(format!("token secret rejected: {err}")))
    }

    /// Sign `claims` into a token.
    ///
    /// # Errors
    /// Returns an error if the claims cannot be serialized.
    pub fn issue(&self, claims: &TokenClaims) -> ChatResult<String> {
        let header = Header {
            alg: ALGORITHM.to_string(),
            typ: Some("JWT".to_string()),
        };
        let signing_input = format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?)
        );
        let mut mac = self.mac()?;
        mac.update(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes());
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verify `token` and return its claims.
    ///
    /// # Errors
    /// Returns `InvalidToken` for malformed, forged, expired or
    /// identity-less tokens.
    pub fn verify(&self, token: &str, now: DateTime<Utc>) -> ChatResult<TokenClaims> {
        let token = token.trim();
        let token = token.strip_prefix("Bearer ").unwrap_or(token);
        let mut parts = token.split('.');
        let (Some(header_seg), Some(payload_seg), Some(signature_seg), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(invalid("expected three segments"));
        };

        let header: Header = serde_json::from_slice(&decode_segment(header_seg)?)
            .map_err(|_| invalid("unreadable header"))?;
        if header.alg != ALGORITHM {
            return Err(invalid("unsupported algorithm"));
        }

        let signature = decode_segment(signature_seg)?;
        let mut mac = self.mac()?;
        mac.update(header_seg.as_bytes());
        mac.update(b".");
        mac.update(payload_seg.as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| invalid("signature mismatch"))?;

        let claims: TokenClaims = serde_json::from_slice(&decode_segment(payload_seg)?)
            .map_err(|_| invalid("unreadable claims"))?;
        if let Some(exp) = claims.exp
            && exp <= now.timestamp()
        {
            return Err(invalid("token expired"));
        }
        if claims.subject().is_none() {
            return Err(invalid("token carries no identity"));
        }
        Ok(claims)
    }
}

fn decode_segment(segment: &str) -> ChatResult<Vec<u8>> {
    URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|_| invalid("segment is not base64url"))
}

fn invalid(reason: &str) -> ChatError {
    ChatError::InvalidToken(reason.to_string())
}
