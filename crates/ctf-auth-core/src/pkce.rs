//! Proof Key for Code Exchange (RFC 7636) helpers.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::error::Error;
use crate::jwt::random_token;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeMethod {
    #[serde(rename = "plain")]
    Plain,
    #[serde(rename = "S256")]
    S256,
}

impl ChallengeMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "plain",
            Self::S256 => "S256",
        }
    }
}

impl fmt::Display for ChallengeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChallengeMethod {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "plain" => Ok(Self::Plain),
            "S256" => Ok(Self::S256),
            other => Err(Error::InvalidRequest(format!(
                "unsupported code_challenge_method: {other}"
            ))),
        }
    }
}

/// S256 transform: base64url(sha256(verifier)), unpadded.
pub fn s256_challenge(verifier: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}

/// Check `verifier` against `challenge` using `method`.
///
/// The method is whatever the caller passes in; it is not reconciled with
/// the method the challenge was originally issued under.
pub fn verify(method: ChallengeMethod, verifier: &str, challenge: &str) -> bool {
    let computed = match method {
        ChallengeMethod::Plain => verifier.to_string(),
        ChallengeMethod::S256 => s256_challenge(verifier),
    };
    computed.as_bytes().ct_eq(challenge.as_bytes()).into()
}

/// Generate a (verifier, S256 challenge) pair.
pub fn generate_pkce() -> (String, String) {
    let verifier = random_token(32);
    let challenge = s256_challenge(&verifier);
    (verifier, challenge)
}
