// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Password hashing and bearer tokens.
//!
//! Access tokens are short-lived and stateless; refresh tokens are long-lived
//! and tracked server-side as a session row keyed by JTI. `logout-all` bumps
//! the user's `tokens_valid_from`, which invalidates every token and session
//! issued before it without touching individual rows.

use argon2::password_hash::{rand_core::OsRng, SaltString};
use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier};
use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{NvrError, Result};

pub fn hash_password(password: &str) -> Result<String> {
    if password.len() < 8 {
        return Err(NvrError::Validation("password must be at least 8 characters".into()));
    }
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| NvrError::Fatal(format!("password hashing failed: {e}")))
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(hash) else {
        return false;
    };
    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Owning user id.
    pub sub: String,
    /// Token id; for refresh tokens this matches the session row.
    pub jti: String,
    pub iat: i64,
    pub exp: i64,
    pub kind: TokenKind,
}

impl Claims {
    pub fn issued_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.iat, 0).unwrap_or_default()
    }
}

/// HS256 signer/verifier shared by the API.
#[derive(Clone)]
pub struct TokenSigner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    access_ttl: Duration,
    refresh_ttl: Duration,
}

impl TokenSigner {
    pub fn new(secret: &str, access_ttl_secs: u64, refresh_ttl_secs: u64) -> TokenSigner {
        let secret = if secret.is_empty() {
            // Ephemeral secret: fine for a single process, invalidates all
            // tokens on restart.
            let mut rng = rand::thread_rng();
            (0..48).map(|_| rng.gen_range(b'a'..=b'z') as char).collect()
        } else {
            secret.to_string()
        };
        TokenSigner {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            access_ttl: Duration::seconds(access_ttl_secs as i64),
            refresh_ttl: Duration::seconds(refresh_ttl_secs as i64),
        }
    }

    pub fn refresh_ttl(&self) -> Duration {
        self.refresh_ttl
    }

    pub fn mint(&self, user_id: &str, kind: TokenKind, now: DateTime<Utc>) -> Result<(String, Claims)> {
        let ttl = match kind {
            TokenKind::Access => self.access_ttl,
            TokenKind::Refresh => self.refresh_ttl,
        };
        let claims = Claims {
            sub: user_id.to_string(),
            jti: Uuid::new_v4().to_string(),
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            kind,
        };
        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| NvrError::Fatal(format!("token encoding failed: {e}")))?;
        Ok((token, claims))
    }

    /// Decode and verify signature + expiry. Kind and `tokens_valid_from`
    /// checks are the caller's job.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.required_spec_claims.clear();
        decode::<Claims>(token, &self.decoding, &validation)
            .map(|data| data.claims)
            .map_err(|_| NvrError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn password_round_trip() {
        let hash = hash_password("correct horse battery").unwrap();
        assert!(verify_password("correct horse battery", &hash));
        assert!(!verify_password("wrong", &hash));
    }

    #[test]
    fn short_password_rejected() {
        assert!(hash_password("short").is_err());
    }

    #[test]
    fn token_round_trip() {
        let signer = TokenSigner::new("test-secret", 900, 3600);
        let now = Utc::now();
        let (token, minted) = signer.mint("user-1", TokenKind::Access, now).unwrap();
        let claims = signer.verify(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert_eq!(claims.jti, minted.jti);
        assert_eq!(claims.kind, TokenKind::Access);
    }

    #[test]
    fn expired_token_rejected() {
        let signer = TokenSigner::new("test-secret", 900, 3600);
        let past = Utc::now() - Duration::hours(2);
        let (token, _) = signer.mint("user-1", TokenKind::Access, past).unwrap();
        assert!(signer.verify(&token).is_err());
    }

    #[test]
    fn tampered_token_rejected() {
        let signer = TokenSigner::new("test-secret", 900, 3600);
        let other = TokenSigner::new("other-secret", 900, 3600);
        let (token, _) = other.mint("user-1", TokenKind::Access, Utc::now()).unwrap();
        assert!(signer.verify(&token).is_err());
    }
}
