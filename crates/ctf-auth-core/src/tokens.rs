//! Code exchange and refresh-token rotation.

use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;

use crate::clients;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::jwt::{self, Keys};
use crate::pkce::{self, ChallengeMethod};
use crate::progress::{self, Stage};
use crate::scopes;
use crate::store::{RefreshTokenRecord, Store};

#[derive(Debug, Clone, Deserialize)]
pub struct ExchangeRequest {
    pub client_id: String,
    pub client_secret: String,
    pub code: String,
    pub code_verifier: String,
    /// Method used to check the verifier. Falls back to the method the code
    /// was issued with when absent.
    #[serde(default)]
    pub code_challenge_method: Option<ChallengeMethod>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
    #[serde(default)]
    pub scope: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenGrant {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: u64,
    pub refresh_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id_token: Option<String>,
    pub scope: String,
}

/// Exchange an authorization code for tokens.
///
/// The code is consumed before the verifier is checked, so a failed PKCE
/// check still burns it. The verifier is checked with the method named in
/// the request, not the one recorded at issuance.
pub async fn exchange(
    store: &dyn Store,
    keys: &Keys,
    config: &Config,
    request: &ExchangeRequest,
) -> Result<TokenGrant> {
    let client = clients::find(store, &request.client_id).await?;
    let secret_hash = jwt::hash_token(&request.client_secret);
    if secret_hash.as_bytes().ct_eq(client.client_secret_hash.as_bytes()).unwrap_u8() == 0 {
        return Err(Error::InvalidClient);
    }

    if config.progress.enforce_stage_order {
        progress::check_access(store, &client.client_id, Stage::Capture).await?;
    }

    let code = store
        .consume_authorization_code(&jwt::hash_token(&request.code), Utc::now())
        .await?
        .ok_or(Error::InvalidGrant)?;
    if code.client_id != client.client_id {
        tracing::warn!(
            client_id = %client.client_id,
            code_owner = %code.client_id,
            "authorization code presented by a different client"
        );
        return Err(Error::InvalidGrant);
    }

    let method = request.code_challenge_method.unwrap_or(code.code_challenge_method);
    if method != code.code_challenge_method {
        tracing::warn!(
            client_id = %client.client_id,
            issued = %code.code_challenge_method,
            requested = %method,
            "PKCE method differs from issuance"
        );
    }
    if !pkce::verify(method, &request.code_verifier, &code.code_challenge) {
        return Err(Error::PkceMismatch);
    }

    let access_token = keys.sign_access_token(&config.jwt, &client.client_id, &code.scope)?;
    let id_token = keys.sign_id_token(&config.jwt, &client.client_id, &code.scope)?;
    let refresh_token = issue_refresh_token(store, config, &client.client_id, &code.scope).await?;

    progress::record(store, &client.client_id, Stage::Exchange).await?;
    tracing::info!(client_id = %client.client_id, scope = %code.scope, "authorization code exchanged");

    Ok(TokenGrant {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: config.jwt.access_token_ttl_secs,
        refresh_token,
        id_token: Some(id_token),
        scope: code.scope,
    })
}

/// Rotate a refresh token into a new pair.
///
/// A requested scope replaces the stored one as-is; it is not compared with
/// the original grant.
pub async fn refresh(
    store: &dyn Store,
    keys: &Keys,
    config: &Config,
    request: &RefreshRequest,
) -> Result<TokenGrant> {
    let token_hash = jwt::hash_token(&request.refresh_token);
    let now = Utc::now();

    // Client and scope never change after issuance, so a plain read is
    // enough to build the replacement; the rotation itself is the
    // check-and-set.
    let current = store
        .find_refresh_token(&token_hash)
        .await?
        .filter(|t| t.superseded_by.is_none() && t.expires_at > now)
        .ok_or(Error::InvalidGrant)?;

    if config.progress.enforce_stage_order {
        progress::check_access(store, &current.client_id, Stage::Introspection).await?;
    }

    let scope = match request.scope.as_deref().map(str::trim) {
        Some(requested) if !requested.is_empty() => requested.to_string(),
        _ => current.scope.clone(),
    };
    if scope != current.scope {
        tracing::warn!(
            client_id = %current.client_id,
            granted = %current.scope,
            requested = %scope,
            "refresh requested a different scope"
        );
    }

    let (raw, replacement_hash) = jwt::generate_refresh_token();
    let replacement = RefreshTokenRecord {
        client_id: current.client_id.clone(),
        scope: scope.clone(),
        issued_at: now,
        expires_at: now + Duration::seconds(config.jwt.refresh_token_ttl_secs as i64),
        superseded_by: None,
    };
    store
        .rotate_refresh_token(&token_hash, &replacement_hash, &replacement, now)
        .await?
        .ok_or(Error::InvalidGrant)?;

    let access_token = keys.sign_access_token(&config.jwt, &current.client_id, &scope)?;

    if scopes::has_scope(&scope, scopes::ADMIN_SECRETS) {
        progress::record(store, &current.client_id, Stage::Escalation).await?;
    }
    tracing::info!(client_id = %current.client_id, scope = %scope, "refresh token rotated");

    Ok(TokenGrant {
        access_token,
        token_type: "Bearer".to_string(),
        expires_in: config.jwt.access_token_ttl_secs,
        refresh_token: raw,
        id_token: None,
        scope,
    })
}

async fn issue_refresh_token(store: &dyn Store, config: &Config, client_id: &str, scope: &str) -> Result<String> {
    let (raw, hash) = jwt::generate_refresh_token();
    let now = Utc::now();
    let record = RefreshTokenRecord {
        client_id: client_id.to_string(),
        scope: scope.to_string(),
        issued_at: now,
        expires_at: now + Duration::seconds(config.jwt.refresh_token_ttl_secs as i64),
        superseded_by: None,
    };
    store.store_refresh_token(&hash, &record).await?;
    Ok(raw)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::authorize::{CodeRequest, issue_code};
    use crate::clients::{Registration, register};
    use crate::store::MemoryStore;

    fn config() -> Config {
        toml::from_str(
            r#"
            [jwt]
            signing_secret = "test-signing-secret-0123"
            "#,
        )
        .unwrap()
    }

    struct Fixture {
        store: MemoryStore,
        keys: Keys,
        config: Config,
        client_id: String,
        client_secret: String,
    }

    impl Fixture {
        async fn new() -> Self {
            let store = MemoryStore::new();
            let config = config();
            let keys = Keys::from_config(&config.jwt).unwrap();
            let registered = register(
                &store,
                Registration {
                    client_name: Some("t".to_string()),
                    logo_uri: None,
                    redirect_uris: Some(vec!["http://localhost/cb".to_string()]),
                },
            )
            .await
            .unwrap();
            Self {
                store,
                keys,
                config,
                client_id: registered.client.client_id,
                client_secret: registered.client_secret,
            }
        }

        async fn code(&self, challenge: &str, method: ChallengeMethod) -> String {
            issue_code(
                &self.store,
                &self.config.jwt,
                &CodeRequest {
                    client_id: self.client_id.clone(),
                    redirect_uri: "http://localhost/cb".to_string(),
                    code_challenge: challenge.to_string(),
                    code_challenge_method: method,
                    scope: scopes::USER_READ.to_string(),
                },
            )
            .await
            .unwrap()
        }

        fn exchange_request(&self, code: &str, verifier: &str, method: Option<ChallengeMethod>) -> ExchangeRequest {
            ExchangeRequest {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
                code: code.to_string(),
                code_verifier: verifier.to_string(),
                code_challenge_method: method,
            }
        }

        async fn grant(&self) -> TokenGrant {
            let (verifier, challenge) = pkce::generate_pkce();
            let code = self.code(&challenge, ChallengeMethod::S256).await;
            exchange(&self.store, &self.keys, &self.config, &self.exchange_request(&code, &verifier, None))
                .await
                .unwrap()
        }
    }

    #[tokio::test]
    async fn exchange_with_s256_verifier() {
        let f = Fixture::new().await;
        let grant = f.grant().await;

        assert_eq!(grant.scope, "USER_READ");
        assert_eq!(grant.token_type, "Bearer");
        assert!(grant.refresh_token.starts_with("refresh_"));
        let claims = f.keys.verify_access_token(&f.config.jwt, &grant.access_token).unwrap().claims;
        assert_eq!(claims.client_id, f.client_id);
        assert!(grant.id_token.is_some());
        assert!(f.store.progress(&f.client_id).await.unwrap().has_exchanged_code());
    }

    #[tokio::test]
    async fn second_exchange_fails() {
        let f = Fixture::new().await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = f.code(&challenge, ChallengeMethod::S256).await;
        let request = f.exchange_request(&code, &verifier, None);

        assert!(exchange(&f.store, &f.keys, &f.config, &request).await.is_ok());
        let second = exchange(&f.store, &f.keys, &f.config, &request).await;
        assert!(matches!(second, Err(Error::InvalidGrant)));
    }

    #[tokio::test]
    async fn plain_downgrade_against_s256_code_succeeds() {
        let f = Fixture::new().await;
        let code = f.code("test", ChallengeMethod::S256).await;
        let request = f.exchange_request(&code, "test", Some(ChallengeMethod::Plain));
        let grant = exchange(&f.store, &f.keys, &f.config, &request).await.unwrap();
        assert_eq!(grant.scope, "USER_READ");
    }

    #[tokio::test]
    async fn wrong_verifier_is_pkce_mismatch_and_burns_code() {
        let f = Fixture::new().await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = f.code(&challenge, ChallengeMethod::S256).await;

        let bad = f.exchange_request(&code, "wrong", None);
        assert!(matches!(
            exchange(&f.store, &f.keys, &f.config, &bad).await,
            Err(Error::PkceMismatch)
        ));
        let good = f.exchange_request(&code, &verifier, None);
        assert!(matches!(
            exchange(&f.store, &f.keys, &f.config, &good).await,
            Err(Error::InvalidGrant)
        ));
        assert!(!f.store.progress(&f.client_id).await.unwrap().has_exchanged_code());
    }

    #[tokio::test]
    async fn client_credentials_checked_before_code() {
        let f = Fixture::new().await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = f.code(&challenge, ChallengeMethod::S256).await;

        let mut request = f.exchange_request(&code, &verifier, None);
        request.client_secret = "secret_wrong".to_string();
        assert!(matches!(
            exchange(&f.store, &f.keys, &f.config, &request).await,
            Err(Error::InvalidClient)
        ));

        request.client_id = "oauth_client_missing".to_string();
        assert!(matches!(
            exchange(&f.store, &f.keys, &f.config, &request).await,
            Err(Error::UnknownClient)
        ));

        // Code is still live
        let request = f.exchange_request(&code, &verifier, None);
        assert!(exchange(&f.store, &f.keys, &f.config, &request).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_exchanges_have_one_winner() {
        let f = Arc::new(Fixture::new().await);
        let (verifier, challenge) = pkce::generate_pkce();
        let code = f.code(&challenge, ChallengeMethod::S256).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let f = f.clone();
            let request = f.exchange_request(&code, &verifier, None);
            handles.push(tokio::spawn(async move {
                exchange(&f.store, &f.keys, &f.config, &request).await.is_ok()
            }));
        }
        let mut winners = 0;
        for handle in handles {
            if handle.await.unwrap() {
                winners += 1;
            }
        }
        assert_eq!(winners, 1);
    }

    #[tokio::test]
    async fn refresh_escalates_scope_and_marks_stage_five() {
        let f = Fixture::new().await;
        let grant = f.grant().await;

        let refreshed = refresh(
            &f.store,
            &f.keys,
            &f.config,
            &RefreshRequest {
                refresh_token: grant.refresh_token,
                scope: Some("ADMIN_SECRETS".to_string()),
            },
        )
        .await
        .unwrap();

        assert_eq!(refreshed.scope, "ADMIN_SECRETS");
        let claims = f.keys.verify_access_token(&f.config.jwt, &refreshed.access_token).unwrap().claims;
        assert_eq!(claims.scope, "ADMIN_SECRETS");
        assert!(f.store.progress(&f.client_id).await.unwrap().has_elevated_token());
    }

    #[tokio::test]
    async fn refresh_token_is_single_use() {
        let f = Fixture::new().await;
        let grant = f.grant().await;
        let request = RefreshRequest {
            refresh_token: grant.refresh_token,
            scope: Some("ADMIN_SECRETS".to_string()),
        };

        let first = refresh(&f.store, &f.keys, &f.config, &request).await.unwrap();
        assert!(matches!(
            refresh(&f.store, &f.keys, &f.config, &request).await,
            Err(Error::InvalidGrant)
        ));

        // The rotated token carries the new scope forward
        let next = refresh(
            &f.store,
            &f.keys,
            &f.config,
            &RefreshRequest { refresh_token: first.refresh_token, scope: None },
        )
        .await
        .unwrap();
        assert_eq!(next.scope, "ADMIN_SECRETS");
    }

    #[tokio::test]
    async fn refresh_without_scope_keeps_grant_scope() {
        let f = Fixture::new().await;
        let grant = f.grant().await;
        let refreshed = refresh(
            &f.store,
            &f.keys,
            &f.config,
            &RefreshRequest { refresh_token: grant.refresh_token, scope: None },
        )
        .await
        .unwrap();
        assert_eq!(refreshed.scope, "USER_READ");
        assert!(!f.store.progress(&f.client_id).await.unwrap().has_elevated_token());
    }

    #[tokio::test]
    async fn unknown_refresh_token_rejected() {
        let f = Fixture::new().await;
        let result = refresh(
            &f.store,
            &f.keys,
            &f.config,
            &RefreshRequest { refresh_token: "refresh_nope".to_string(), scope: None },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidGrant)));
    }

    #[tokio::test]
    async fn expired_refresh_token_rejected() {
        let f = Fixture::new().await;
        let (raw, hash) = jwt::generate_refresh_token();
        let now = Utc::now();
        let expired = RefreshTokenRecord {
            client_id: f.client_id.clone(),
            scope: scopes::USER_READ.to_string(),
            issued_at: now - Duration::seconds(120),
            expires_at: now - Duration::seconds(1),
            superseded_by: None,
        };
        f.store.store_refresh_token(&hash, &expired).await.unwrap();

        let result = refresh(
            &f.store,
            &f.keys,
            &f.config,
            &RefreshRequest { refresh_token: raw, scope: Some(scopes::ADMIN_SECRETS.to_string()) },
        )
        .await;
        assert!(matches!(result, Err(Error::InvalidGrant)));
        assert!(!f.store.progress(&f.client_id).await.unwrap().has_elevated_token());
        let stored = f.store.find_refresh_token(&hash).await.unwrap().unwrap();
        assert!(stored.superseded_by.is_none());
    }

    #[tokio::test]
    async fn enforced_order_locks_exchange_until_capture() {
        let mut f = Fixture::new().await;
        f.config.progress.enforce_stage_order = true;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = f.code(&challenge, ChallengeMethod::S256).await;
        let request = f.exchange_request(&code, &verifier, None);

        match exchange(&f.store, &f.keys, &f.config, &request).await {
            Err(Error::StageLocked { required }) => assert_eq!(required, 2),
            other => panic!("expected StageLocked, got {other:?}"),
        }

        f.store.append_capture(&f.client_id, "cookie=abc", Some(Utc::now())).await.unwrap();
        assert!(exchange(&f.store, &f.keys, &f.config, &request).await.is_ok());
    }
}
