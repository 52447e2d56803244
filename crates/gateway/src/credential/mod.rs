// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Bearer credential verification and issuance.
//!
//! Two claim shapes share one signed envelope:
//! - user credentials `{ sid, user }` issued at login, long-lived;
//! - display credentials `{ vm, ut }` issued per connect, short-lived,
//!   carrying the upstream token so the proxy can resolve without a session.

use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

use crate::error::GatewayError;
use crate::state::epoch_ms;

/// Signed claim envelope. Exactly one of the two shapes is populated.
#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    exp: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    sid: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    vm: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    ut: Option<String>,
}

/// Typed result of verifying a bearer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BearerClaim {
    /// Long-lived user credential referencing a live session.
    User { session_id: String, user_id: String },
    /// Short-lived display credential embedding the upstream token.
    Display { vm_id: String, upstream_token: String },
}

/// HS256 signer/verifier for gateway bearers.
pub struct TokenVerifier {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Verify signature and expiry, then classify the claim shape.
    pub fn verify(&self, token: &str) -> Result<BearerClaim, GatewayError> {
        let validation = Validation::new(Algorithm::HS256);
        let data = match decode::<Claims>(token, &self.decoding, &validation) {
            Ok(data) => data,
            Err(e) => {
                if matches!(e.kind(), jsonwebtoken::errors::ErrorKind::ExpiredSignature) {
                    return Err(GatewayError::ExpiredToken { expired_at: self.expiry_of(token) });
                }
                return Err(GatewayError::InvalidToken);
            }
        };

        match data.claims {
            Claims { sid: Some(session_id), user: Some(user_id), .. } => {
                Ok(BearerClaim::User { session_id, user_id })
            }
            Claims { vm: Some(vm_id), ut: Some(upstream_token), .. } => {
                Ok(BearerClaim::Display { vm_id, upstream_token })
            }
            _ => Err(GatewayError::InvalidToken),
        }
    }

    /// Issue a user bearer for a session.
    pub fn issue_user(
        &self,
        session_id: &str,
        user_id: &str,
        ttl_secs: u64,
    ) -> Result<String, GatewayError> {
        self.sign(Claims {
            exp: now_secs() + ttl_secs,
            sid: Some(session_id.to_owned()),
            user: Some(user_id.to_owned()),
            vm: None,
            ut: None,
        })
    }

    /// Issue a display bearer for one VM.
    pub fn issue_display(
        &self,
        vm_id: &str,
        upstream_token: &str,
        ttl_secs: u64,
    ) -> Result<String, GatewayError> {
        self.sign(Claims {
            exp: now_secs() + ttl_secs,
            sid: None,
            user: None,
            vm: Some(vm_id.to_owned()),
            ut: Some(upstream_token.to_owned()),
        })
    }

    fn sign(&self, claims: Claims) -> Result<String, GatewayError> {
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|_| GatewayError::InvalidToken)
    }

    /// Recover the expiry timestamp of an expired-but-authentic token for
    /// observability. Falls back to 0 when even that fails.
    fn expiry_of(&self, token: &str) -> u64 {
        let mut relaxed = Validation::new(Algorithm::HS256);
        relaxed.validate_exp = false;
        decode::<Claims>(token, &self.decoding, &relaxed).map(|d| d.claims.exp).unwrap_or(0)
    }
}

fn now_secs() -> u64 {
    epoch_ms() / 1000
}

#[cfg(test)]
#[path = "verifier_tests.rs"]
mod tests;
