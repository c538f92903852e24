//! Identity resolution for incoming requests.
//!
//! Credential issuance and rotation live outside this crate. The server
//! only needs to turn a presented token into a user id, which is what
//! [`IdentityResolver`] does.
//!
//! ## Token Format
//!
//! [`TokenValidator`] tokens are composed of:
//! - 16 bytes: user id
//! - 8 bytes: timestamp (Unix millis, big-endian)
//! - 32 bytes: HMAC-SHA256 signature
//!
//! Total: 56 bytes, base64url-encoded (no padding) for transport.

use crate::error::{ServerError, ServerResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

const TOKEN_LEN: usize = 56;
const SIGNED_LEN: usize = 24;

/// Turns a presented credential into a user id.
pub trait IdentityResolver: Send + Sync {
    /// Resolves a token to the user it was issued for.
    fn resolve(&self, token: &str) -> ServerResult<Uuid>;

    /// Issues a token for a user.
    fn issue(&self, user_id: Uuid) -> ServerResult<String>;
}

/// Authentication configuration.
#[derive(Clone)]
pub struct AuthConfig {
    /// Secret key for HMAC. Wiped from memory on drop.
    pub secret: Zeroizing<Vec<u8>>,
    /// Token expiration duration.
    pub token_expiry: Duration,
}

impl AuthConfig {
    /// Creates a new auth configuration.
    pub fn new(secret: Vec<u8>) -> Self {
        Self {
            secret: Zeroizing::new(secret),
            token_expiry: Duration::from_secs(15 * 60),
        }
    }

    /// Sets the token expiration duration.
    pub fn with_expiry(mut self, expiry: Duration) -> Self {
        self.token_expiry = expiry;
        self
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("secret", &"<redacted>")
            .field("token_expiry", &self.token_expiry)
            .finish()
    }
}

/// HMAC-signed bearer tokens.
#[derive(Debug, Clone)]
pub struct TokenValidator {
    config: AuthConfig,
}

impl TokenValidator {
    /// Creates a new token validator.
    pub fn new(config: AuthConfig) -> Self {
        Self { config }
    }

    /// Creates a new token for a user.
    pub fn create_token(&self, user_id: Uuid) -> ServerResult<String> {
        self.create_token_at(user_id, now_millis())
    }

    fn create_token_at(&self, user_id: Uuid, timestamp: u64) -> ServerResult<String> {
        let mut token = Vec::with_capacity(TOKEN_LEN);
        token.extend_from_slice(user_id.as_bytes());
        token.extend_from_slice(&timestamp.to_be_bytes());
        let signature = self.mac(&token)?.finalize().into_bytes();
        token.extend_from_slice(&signature);
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Validates a token and returns the user it names.
    pub fn validate_token(&self, token: &str) -> ServerResult<Uuid> {
        let bytes = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|_| ServerError::Unauthenticated("malformed token".into()))?;
        if bytes.len() != TOKEN_LEN {
            return Err(ServerError::Unauthenticated("invalid token length".into()));
        }

        let (signed, signature) = bytes.split_at(SIGNED_LEN);
        self.mac(signed)?
            .verify_slice(signature)
            .map_err(|_| ServerError::Unauthenticated("invalid signature".into()))?;

        let (user_bytes, timestamp_bytes) = signed.split_at(16);
        let user_id = Uuid::from_slice(user_bytes)
            .map_err(|_| ServerError::Unauthenticated("malformed token".into()))?;
        let mut ts = [0u8; 8];
        ts.copy_from_slice(timestamp_bytes);
        let timestamp = u64::from_be_bytes(ts);

        let expiry_millis = u64::try_from(self.config.token_expiry.as_millis()).unwrap_or(u64::MAX);
        if now_millis() > timestamp.saturating_add(expiry_millis) {
            return Err(ServerError::Unauthenticated("token expired".into()));
        }

        Ok(user_id)
    }

    fn mac(&self, data: &[u8]) -> ServerResult<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| ServerError::Internal(format!("hmac key rejected: {e}")))?;
        mac.update(data);
        Ok(mac)
    }
}

impl IdentityResolver for TokenValidator {
    fn resolve(&self, token: &str) -> ServerResult<Uuid> {
        self.validate_token(token)
    }

    fn issue(&self, user_id: Uuid) -> ServerResult<String> {
        self.create_token(user_id)
    }
}

/// Accepts the user id itself as the token.
///
/// For deployments where an upstream gateway has already authenticated
/// the caller, and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedIdentity;

impl IdentityResolver for TrustedIdentity {
    fn resolve(&self, token: &str) -> ServerResult<Uuid> {
        Uuid::parse_str(token.trim())
            .map_err(|_| ServerError::Unauthenticated("token is not a user id".into()))
    }

    fn issue(&self, user_id: Uuid) -> ServerResult<String> {
        Ok(user_id.to_string())
    }
}

fn now_millis() -> u64 {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis();
    u64::try_from(millis).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validator() -> TokenValidator {
        TokenValidator::new(AuthConfig::new(b"test-secret-key-32-bytes-long!!".to_vec()))
    }

    #[test]
    fn create_and_validate_token() {
        let validator = validator();
        let user = Uuid::new_v4();

        let token = validator.create_token(user).unwrap();
        assert_eq!(validator.validate_token(&token).unwrap(), user);
        assert_eq!(validator.resolve(&token).unwrap(), user);
    }

    #[test]
    fn reject_tampered_token() {
        let validator = validator();
        let token = validator.create_token(Uuid::new_v4()).unwrap();

        let mut bytes = URL_SAFE_NO_PAD.decode(&token).unwrap();
        bytes[40] ^= 0xFF;
        let tampered = URL_SAFE_NO_PAD.encode(bytes);

        assert!(matches!(
            validator.validate_token(&tampered),
            Err(ServerError::Unauthenticated(_))
        ));
    }

    #[test]
    fn reject_token_from_other_secret() {
        let other = TokenValidator::new(AuthConfig::new(b"another-secret".to_vec()));
        let token = other.create_token(Uuid::new_v4()).unwrap();
        assert!(validator().validate_token(&token).is_err());
    }

    #[test]
    fn reject_expired_token() {
        let validator = validator();
        let issued = now_millis() - 16 * 60 * 1000;
        let token = validator.create_token_at(Uuid::new_v4(), issued).unwrap();
        assert!(validator.validate_token(&token).is_err());
    }

    #[test]
    fn reject_garbage() {
        let validator = validator();
        assert!(validator.validate_token("").is_err());
        assert!(validator.validate_token("not a token!").is_err());
        assert!(validator.validate_token("AAAA").is_err());
    }

    #[test]
    fn trusted_identity() {
        let user = Uuid::new_v4();
        let token = TrustedIdentity.issue(user).unwrap();
        assert_eq!(TrustedIdentity.resolve(&token).unwrap(), user);
        assert!(TrustedIdentity.resolve("someone").is_err());
    }

    #[test]
    fn debug_redacts_secret() {
        let rendered = format!("{:?}", AuthConfig::new(b"hunter2".to_vec()));
        assert!(!rendered.contains("hunter2"));
    }
}
