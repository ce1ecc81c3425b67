//! Dynamic client registration.

use chrono::Utc;
use rand::RngCore;
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::jwt;
use crate::progress::{self, Stage};
use crate::store::{Client, Store};

const MAX_NAME_LEN: usize = 256;
const MAX_ID_ATTEMPTS: usize = 3;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Registration {
    pub client_name: Option<String>,
    pub logo_uri: Option<String>,
    pub redirect_uris: Option<Vec<String>>,
}

/// A freshly stored client together with its plaintext secret, which is
/// returned exactly once.
#[derive(Debug, Clone)]
pub struct RegisteredClient {
    pub client: Client,
    pub client_secret: String,
}

/// Validate and store a new client. Marks stage 1 for it.
///
/// `logo_uri` is kept as an opaque string: nothing here resolves or fetches
/// it, and consumers of the stored value must treat it as untrusted.
pub async fn register(store: &dyn Store, registration: Registration) -> Result<RegisteredClient> {
    let name = registration
        .client_name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .ok_or_else(|| Error::InvalidRequest("client_name is required".to_string()))?;
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidRequest(format!(
            "client_name must be at most {MAX_NAME_LEN} characters"
        )));
    }

    let redirect_uris = registration
        .redirect_uris
        .filter(|uris| !uris.is_empty())
        .ok_or_else(|| Error::InvalidRequest("at least one redirect_uri required".to_string()))?;
    for uri in &redirect_uris {
        validate_redirect_uri(uri)?;
    }

    let client_secret = format!("secret_{}", random_hex(32));
    let mut client = Client {
        client_id: String::new(),
        client_name: name,
        logo_uri: registration.logo_uri,
        redirect_uris,
        client_secret_hash: jwt::hash_token(&client_secret),
        registered_at: Utc::now(),
    };

    for _ in 0..MAX_ID_ATTEMPTS {
        client.client_id = format!("oauth_client_{}", random_hex(8));
        if store.register_client(&client).await? {
            tracing::info!(
                client_id = %client.client_id,
                logo_uri = ?client.logo_uri,
                "client registered"
            );
            progress::completed(&client.client_id, Stage::Registration);
            return Ok(RegisteredClient { client, client_secret });
        }
        tracing::warn!(client_id = %client.client_id, "client_id collision, retrying");
    }

    Err(Error::Internal(anyhow::anyhow!(
        "could not allocate a unique client_id after {MAX_ID_ATTEMPTS} attempts"
    )))
}

/// A redirect URI must parse and name both a scheme and a host.
pub fn validate_redirect_uri(uri: &str) -> Result<()> {
    let parsed = url::Url::parse(uri)
        .map_err(|_| Error::InvalidRequest(format!("invalid redirect_uri: {uri}")))?;
    if parsed.host_str().is_none_or(str::is_empty) {
        return Err(Error::InvalidRequest(format!("redirect_uri must include a host: {uri}")));
    }
    Ok(())
}

/// Look up a client, failing with `UnknownClient` when absent.
pub async fn find(store: &dyn Store, client_id: &str) -> Result<Client> {
    store.find_client(client_id).await?.ok_or(Error::UnknownClient)
}

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::Stage;
    use crate::store::MemoryStore;

    fn registration(name: &str, uris: &[&str]) -> Registration {
        Registration {
            client_name: Some(name.to_string()),
            logo_uri: Some("http://169.254.169.254/latest/meta-data".to_string()),
            redirect_uris: Some(uris.iter().map(|u| u.to_string()).collect()),
        }
    }

    #[tokio::test]
    async fn register_stores_client_and_secret_hash() {
        let store = MemoryStore::new();
        let registered = register(&store, registration("t", &["http://localhost/cb"]))
            .await
            .unwrap();

        assert!(registered.client.client_id.starts_with("oauth_client_"));
        assert!(registered.client_secret.starts_with("secret_"));
        assert_eq!(
            registered.client.client_secret_hash,
            jwt::hash_token(&registered.client_secret)
        );

        let stored = find(&store, &registered.client.client_id).await.unwrap();
        assert_eq!(stored, registered.client);
        assert_eq!(
            stored.logo_uri.as_deref(),
            Some("http://169.254.169.254/latest/meta-data")
        );
    }

    #[tokio::test]
    async fn register_records_stage_one() {
        let store = MemoryStore::new();
        let registered = register(&store, registration("t", &["http://localhost/cb"]))
            .await
            .unwrap();
        let progress = store.progress(&registered.client.client_id).await.unwrap();
        assert!(progress.is_complete(Stage::Registration));
        assert_eq!(progress.current_stage(), 2);
    }

    #[tokio::test]
    async fn missing_name_rejected() {
        let store = MemoryStore::new();
        let mut reg = registration("t", &["http://localhost/cb"]);
        reg.client_name = None;
        assert!(matches!(register(&store, reg).await, Err(Error::InvalidRequest(_))));

        let reg = registration("   ", &["http://localhost/cb"]);
        assert!(matches!(register(&store, reg).await, Err(Error::InvalidRequest(_))));
    }

    #[tokio::test]
    async fn missing_or_empty_redirect_uris_rejected() {
        let store = MemoryStore::new();
        let mut reg = registration("t", &[]);
        assert!(matches!(register(&store, reg.clone()).await, Err(Error::InvalidRequest(_))));
        reg.redirect_uris = None;
        assert!(matches!(register(&store, reg).await, Err(Error::InvalidRequest(_))));
    }

    #[test]
    fn redirect_uri_needs_scheme_and_host() {
        assert!(validate_redirect_uri("http://localhost/cb").is_ok());
        assert!(validate_redirect_uri("https://app.example.com/callback?x=1").is_ok());
        assert!(validate_redirect_uri("not a uri").is_err());
        assert!(validate_redirect_uri("/relative/path").is_err());
        assert!(validate_redirect_uri("mailto:someone@example.com").is_err());
    }

    #[tokio::test]
    async fn unknown_client_lookup() {
        let store = MemoryStore::new();
        assert!(matches!(find(&store, "nope").await, Err(Error::UnknownClient)));
    }
}
