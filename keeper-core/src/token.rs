//! Bearer tokens.
//!
//! Identity issuance and validation sit behind two small traits so the sync
//! handler never depends on how tokens are minted. [`HmacTokens`] is the
//! built-in implementation:
//!
//! ```text
//! base64url(<user_id>:<expires_at>) "." base64url(HMAC-SHA256(secret, claims))
//! ```

use crate::error::TokenError;
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Server-side user identifier.
pub type UserId = i64;

/// Turns an authenticated user into an opaque bearer token.
pub trait TokenIssuer: Send + Sync {
    fn issue(&self, user_id: UserId) -> Result<String, TokenError>;
}

/// Resolves a bearer token back to the user it was issued for.
pub trait TokenValidator: Send + Sync {
    fn validate(&self, token: &str) -> Result<UserId, TokenError>;
}

/// HMAC-SHA256 signed tokens with a fixed lifetime.
#[derive(Clone)]
pub struct HmacTokens {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl std::fmt::Debug for HmacTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HmacTokens")
            .field("ttl_secs", &self.ttl_secs)
            .finish_non_exhaustive()
    }
}

impl HmacTokens {
    pub fn new(secret: &[u8], ttl_secs: i64) -> Self {
        Self {
            secret: secret.to_vec(),
            ttl_secs,
        }
    }

    /// Issue a token with an explicit expiry (unix seconds).
    pub fn issue_until(&self, user_id: UserId, expires_at: i64) -> Result<String, TokenError> {
        let claims = format!("{}:{}", user_id, expires_at);
        let signature = self.sign(claims.as_bytes())?;
        Ok(format!(
            "{}.{}",
            URL_SAFE_NO_PAD.encode(claims.as_bytes()),
            URL_SAFE_NO_PAD.encode(signature)
        ))
    }

    fn mac(&self) -> Result<HmacSha256, TokenError> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| TokenError::Malformed)
    }

    fn sign(&self, claims: &[u8]) -> Result<Vec<u8>, TokenError> {
        let mut mac = self.mac()?;
        mac.update(claims);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl TokenIssuer for HmacTokens {
    fn issue(&self, user_id: UserId) -> Result<String, TokenError> {
        self.issue_until(user_id, chrono::Utc::now().timestamp() + self.ttl_secs)
    }
}

impl TokenValidator for HmacTokens {
    fn validate(&self, token: &str) -> Result<UserId, TokenError> {
        let (claims_b64, sig_b64) = token.split_once('.').ok_or(TokenError::Malformed)?;
        let claims = URL_SAFE_NO_PAD
            .decode(claims_b64)
            .map_err(|_| TokenError::Malformed)?;
        let signature = URL_SAFE_NO_PAD
            .decode(sig_b64)
            .map_err(|_| TokenError::Malformed)?;

        // Constant-time comparison
        let mut mac = self.mac()?;
        mac.update(&claims);
        mac.verify_slice(&signature)
            .map_err(|_| TokenError::BadSignature)?;

        let claims = String::from_utf8(claims).map_err(|_| TokenError::Malformed)?;
        let (user_id, expires_at) = claims.split_once(':').ok_or(TokenError::Malformed)?;
        let user_id: UserId = user_id.parse().map_err(|_| TokenError::Malformed)?;
        let expires_at: i64 = expires_at.parse().map_err(|_| TokenError::Malformed)?;

        if chrono::Utc::now().timestamp() >= expires_at {
            return Err(TokenError::Expired);
        }

        Ok(user_id)
    }
}
