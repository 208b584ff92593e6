//! services/api/src/adapters/auth.rs
//!
//! Bearer credential validation. Tokens are HS256 JWTs whose claims carry the
//! user id and role; the forum never stores credentials itself.

use chrono::{DateTime, Duration, Utc};
use forum_core::domain::{Principal, Role};
use forum_core::ports::{PortError, PortResult};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize, Deserialize)]
struct Claims {
    sub: String,
    role: Role,
    exp: i64,
}

/// Resolves bearer tokens to a [`Principal`].
#[derive(Clone)]
pub struct JwtAuthenticator {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl JwtAuthenticator {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    /// Any malformed, expired or foreign token is `Unauthorized`.
    pub fn authenticate(&self, token: &str) -> PortResult<Principal> {
        let data = decode::<Claims>(token, &self.decoding, &self.validation).map_err(|_| PortError::Unauthorized)?;
        let user_id = data.claims.sub.parse::<u64>().map_err(|_| PortError::Unauthorized)?;
        if user_id == 0 || data.claims.role == Role::Guest {
            return Err(PortError::Unauthorized);
        }
        Ok(Principal {
            user_id,
            role: data.claims.role,
        })
    }

    /// Signs a token for `principal` that expires at `expires_at`.
    pub fn issue(&self, principal: Principal, expires_at: DateTime<Utc>) -> PortResult<String> {
        let claims = Claims {
            sub: principal.user_id.to_string(),
            role: principal.role,
            exp: expires_at.timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| PortError::Unexpected(format!("token signing failed: {e}")))
    }

    /// Signs a token valid for one hour from now.
    pub fn issue_for_an_hour(&self, principal: Principal) -> PortResult<String> {
        self.issue(principal, Utc::now() + Duration::hours(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_tokens_resolve_to_their_principal() {
        let auth = JwtAuthenticator::new("test-secret");
        let token = auth.issue_for_an_hour(Principal::moderator(42)).unwrap();
        assert_eq!(auth.authenticate(&token).unwrap(), Principal::moderator(42));
    }

    #[test]
    fn foreign_and_expired_tokens_are_rejected() {
        let ours = JwtAuthenticator::new("test-secret");
        let theirs = JwtAuthenticator::new("other-secret");
        let token = theirs.issue_for_an_hour(Principal::member(1)).unwrap();
        assert!(matches!(ours.authenticate(&token), Err(PortError::Unauthorized)));

        let stale = ours.issue(Principal::member(1), Utc::now() - Duration::hours(2)).unwrap();
        assert!(matches!(ours.authenticate(&stale), Err(PortError::Unauthorized)));
        assert!(matches!(ours.authenticate("not-a-jwt"), Err(PortError::Unauthorized)));
    }
}
