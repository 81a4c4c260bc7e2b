//! Session Tokens (C5).
//!
//! Bearer grants are JWT-compatible strings (§6) signed with a symmetric
//! process secret (HMAC-SHA256 via `jsonwebtoken`'s HS256). The secret is
//! read once at startup; its absence is fatal (see [`crate::config`]).

use std::collections::HashSet;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject — the ae_id.
    pub sub: String,
    pub iat: u64,
    pub exp: u64,
    pub roles: HashSet<String>,
    pub profile: String,
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SessionError {
    #[error("grant has expired")]
    Expired,
    #[error("grant signature is invalid")]
    BadSignature,
    #[error("grant is malformed")]
    Malformed,
}

pub struct SessionTokens {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl SessionTokens {
    pub fn new(secret: &str) -> Self {
        SessionTokens {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    /// Issue a bearer grant for `subject`, with the given roles and TTL.
    pub fn issue(
        &self,
        subject: &str,
        roles: HashSet<String>,
        profile: &str,
        ttl_secs: u64,
    ) -> anyhow::Result<String> {
        let now = SystemTime::now().duration_since(UNIX_EPOCH)?.as_secs();
        let claims = Claims {
            sub: subject.to_string(),
            iat: now,
            exp: now + ttl_secs,
            roles,
            profile: profile.to_string(),
        };
        let token = jsonwebtoken::encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Validate a bearer grant, distinguishing the three failure modes the
    /// spec requires (§4.5).
    pub fn validate(&self, grant: &str) -> Result<Claims, SessionError> {
        let mut validation = Validation::new(Algorithm::HS256);
        // jsonwebtoken validates `exp` for us, but we want Expired to be
        // distinguishable from other malformed-signature failures, so we
        // inspect the error kind below rather than leaving this default.
        validation.validate_exp = true;

        match jsonwebtoken::decode::<Claims>(grant, &self.decoding_key, &validation) {
            Ok(data) => Ok(data.claims),
            Err(e) => match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => Err(SessionError::Expired),
                jsonwebtoken::errors::ErrorKind::InvalidSignature => Err(SessionError::BadSignature),
                _ => Err(SessionError::Malformed),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roles(rs: &[&str]) -> HashSet<String> {
        rs.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn issue_then_validate_round_trips() {
        let tokens = SessionTokens::new("test-secret");
        let grant = tokens
            .issue("pub_ae", roles(&["producer"]), "default", 900)
            .unwrap();
        let claims = tokens.validate(&grant).unwrap();
        assert_eq!(claims.sub, "pub_ae");
        assert_eq!(claims.profile, "default");
        assert!(claims.roles.contains("producer"));
    }

    #[test]
    fn expired_grant_is_rejected() {
        let tokens = SessionTokens::new("test-secret");
        let grant = tokens.issue("pub_ae", roles(&[]), "default", 0).unwrap();
        std::thread::sleep(std::time::Duration::from_secs(1));
        assert_eq!(tokens.validate(&grant), Err(SessionError::Expired));
    }

    #[test]
    fn wrong_secret_is_bad_signature() {
        let issuer = SessionTokens::new("secret-a");
        let verifier = SessionTokens::new("secret-b");
        let grant = issuer.issue("pub_ae", roles(&[]), "default", 900).unwrap();
        assert_eq!(verifier.validate(&grant), Err(SessionError::BadSignature));
    }

    #[test]
    fn garbage_token_is_malformed() {
        let tokens = SessionTokens::new("test-secret");
        assert_eq!(tokens.validate("not-a-jwt"), Err(SessionError::Malformed));
    }
}
