use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use chrono::{Duration, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, TokenData, Validation, decode, encode};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::JwtConfig;
use crate::error::{Error, Result};

/// Which of the two self-contained tokens a set of claims was minted as.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenKind {
    Access,
    Id,
}

/// Claims carried by access and ID tokens. Both kinds share one structure.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    pub client_id: String,
    pub scope: String,
    pub token_type: TokenKind,
    pub iss: String,
    pub aud: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
}

/// HS256 signing material derived from the configured secret.
#[derive(Clone)]
pub struct Keys {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl Keys {
    pub fn from_config(config: &JwtConfig) -> Result<Self> {
        let secret = config.signing_secret.resolve()?;
        Ok(Self::from_secret(secret.as_bytes()))
    }

    pub fn from_secret(secret: &[u8]) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
        }
    }

    /// Create a signed access token.
    pub fn sign_access_token(&self, config: &JwtConfig, client_id: &str, scope: &str) -> Result<String> {
        self.sign(config, client_id, scope, TokenKind::Access)
    }

    /// Create a signed ID token with the same claim layout as the access token.
    pub fn sign_id_token(&self, config: &JwtConfig, client_id: &str, scope: &str) -> Result<String> {
        self.sign(config, client_id, scope, TokenKind::Id)
    }

    fn sign(&self, config: &JwtConfig, client_id: &str, scope: &str, kind: TokenKind) -> Result<String> {
        let now = Utc::now();
        let exp = now + Duration::seconds(config.access_token_ttl_secs as i64);

        let claims = Claims {
            client_id: client_id.to_string(),
            scope: scope.to_string(),
            token_type: kind,
            iss: config.issuer.clone(),
            aud: config.audience.clone(),
            iat: now.timestamp(),
            exp: exp.timestamp(),
            jti: uuid::Uuid::new_v4().to_string(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|e| Error::Internal(anyhow::anyhow!("failed to sign token: {e}")))
    }

    /// Verify signature, issuer, audience and expiry. The `token_type` claim
    /// is not inspected, so ID tokens are accepted wherever access tokens are.
    pub fn verify_access_token(&self, config: &JwtConfig, token: &str) -> Result<TokenData<Claims>> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_issuer(&[&config.issuer]);
        validation.set_audience(&[&config.audience]);
        validation.leeway = 0;

        decode::<Claims>(token, &self.decoding, &validation).map_err(|_| Error::InvalidToken)
    }
}

/// Random URL-safe value with `bytes` bytes of entropy.
pub fn random_token(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

/// Generate a random refresh token and return (raw_token, sha256_hash).
pub fn generate_refresh_token() -> (String, String) {
    let raw = format!("refresh_{}", random_token(32));
    let hash = hash_token(&raw);
    (raw, hash)
}

/// Generate a random authorization code and return (raw_code, sha256_hash).
pub fn generate_authorization_code() -> (String, String) {
    let raw = format!("auth_code_{}", random_token(32));
    let hash = hash_token(&raw);
    (raw, hash)
}

/// SHA-256 hash a token string (for storage).
pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}
