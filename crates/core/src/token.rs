//! Session Token Service
//!
//! Issues and validates the short-lived HS256 tokens that authorize a
//! WebSocket upgrade. Nothing is stored server-side: a token is valid iff
//! its signature verifies against the process secret and it has not yet
//! expired.

use crate::error::AuthError;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};

/// Lifetime of an issued token.
pub const SESSION_TOKEN_TTL_SECONDS: i64 = 3600;

/// Prefix of the `Sec-WebSocket-Protocol` entry that carries the token.
pub const ACCESS_TOKEN_PROTOCOL_PREFIX: &str = "access_token.";

#[derive(Debug, Serialize, Deserialize)]
struct SessionClaims {
    iat: i64,
    exp: i64,
}

/// A freshly signed token and the unix time it stops being accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedToken {
    pub token: String,
    pub expires_at: i64,
}

#[derive(Debug, thiserror::Error)]
#[error("failed to sign session token: {0}")]
pub struct IssueError(#[from] jsonwebtoken::errors::Error);

/// Signs and verifies session tokens with a secret fixed for the process
/// lifetime.
#[derive(Clone)]
pub struct SessionTokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl SessionTokenService {
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked against an explicit clock in `validate_at`.
        validation.validate_exp = false;
        validation.leeway = 0;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Uses 32 random bytes as the secret. Tokens do not survive a restart.
    pub fn random() -> Self {
        let secret: [u8; 32] = rand::random();
        Self::new(&secret)
    }

    pub fn issue(&self) -> Result<IssuedToken, IssueError> {
        self.issue_at(now())
    }

    pub fn issue_at(&self, issued_at: i64) -> Result<IssuedToken, IssueError> {
        let claims = SessionClaims {
            iat: issued_at,
            exp: issued_at + SESSION_TOKEN_TTL_SECONDS,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(IssuedToken {
            token,
            expires_at: claims.exp,
        })
    }

    pub fn validate(&self, token: &str) -> bool {
        self.validate_at(token, now())
    }

    /// True iff the signature verifies and `now` is strictly before expiry.
    /// Malformed, unsigned, tampered and expired tokens all yield `false`.
    pub fn validate_at(&self, token: &str, now: i64) -> bool {
        match decode::<SessionClaims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => now < data.claims.exp,
            Err(_) => false,
        }
    }

    /// Picks the subprotocol entry to echo back for an upgrade request.
    ///
    /// `offered` holds the raw `Sec-WebSocket-Protocol` header values; each
    /// may list several comma-separated entries. The first entry starting
    /// with `access_token.` is the credential. The whole entry is returned
    /// so the handshake can select it verbatim.
    pub fn authorize_subprotocols<'a>(
        &self,
        offered: impl IntoIterator<Item = &'a str>,
    ) -> Result<String, AuthError> {
        self.authorize_subprotocols_at(offered, now())
    }

    pub fn authorize_subprotocols_at<'a>(
        &self,
        offered: impl IntoIterator<Item = &'a str>,
        now: i64,
    ) -> Result<String, AuthError> {
        let entry = offered
            .into_iter()
            .flat_map(|value| value.split(','))
            .map(str::trim)
            .find(|entry| entry.starts_with(ACCESS_TOKEN_PROTOCOL_PREFIX))
            .ok_or(AuthError::MissingToken)?;

        let token = &entry[ACCESS_TOKEN_PROTOCOL_PREFIX.len()..];
        if self.validate_at(token, now) {
            Ok(entry.to_string())
        } else {
            Err(AuthError::InvalidToken)
        }
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
