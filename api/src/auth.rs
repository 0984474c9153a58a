//! Password hashing and device tokens.

use crate::errors::{Error, Result};
use crate::model::{DeviceId, DeviceProfile};
use argon2::Argon2;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation};
use password_hash::rand_core::OsRng;
use password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use serde::{Deserialize, Serialize};

/// Tokens are valid for 24 hours.
pub const TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

/// Hash a plain password with argon2id.
pub fn hash_password(password: &str) -> Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| Error::PasswordHash(e.to_string()))
}

/// Verify a password against an argon2id hash. Unparseable hashes never match.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Claims {
    /// Profile ID.
    pub user_id: String,
    pub device_id: DeviceId,
    pub first_name: String,
    pub iat: i64,
    pub exp: i64,
}

/// Issues and verifies HS256 device tokens.
#[derive(Clone)]
pub struct TokenService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    ttl_secs: i64,
}

impl TokenService {
    pub fn new(secret: &str) -> Self {
        Self::with_ttl(secret, TOKEN_TTL_SECS)
    }

    pub fn with_ttl(secret: &str, ttl_secs: i64) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::default(),
            ttl_secs,
        }
    }

    pub fn issue(&self, profile: &DeviceProfile) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            user_id: profile.id.to_string(),
            device_id: profile.device_id,
            first_name: profile.first_name.clone(),
            iat: now,
            exp: now + self.ttl_secs,
        };
        Ok(jsonwebtoken::encode(
            &Header::default(),
            &claims,
            &self.encoding_key,
        )?)
    }

    /// Checks signature and expiry.
    pub fn verify(&self, token: &str) -> Result<Claims> {
        jsonwebtoken::decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => Error::ExpiredToken,
                _ => Error::InvalidToken,
            })
    }
}
