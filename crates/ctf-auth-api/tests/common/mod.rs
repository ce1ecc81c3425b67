//! Shared test infrastructure for ctf-auth integration tests.
//!
//! Each test binary shares one tokio runtime and one Axum server bound to
//! 127.0.0.1:0 over the in-memory store. Tests isolate themselves by
//! registering their own clients, so they can run in parallel.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::{Arc, OnceLock};

pub use reqwest::{Client, StatusCode};
pub use serde_json::{Value, json};

pub use ctf_auth_core::config::Config;
pub use ctf_auth_core::jwt::Keys;
pub use ctf_auth_core::pkce;
pub use ctf_auth_core::store::{MemoryStore, Store};

use ctf_auth_api::AppState;
use tokio::net::TcpListener;

static RT: OnceLock<tokio::runtime::Runtime> = OnceLock::new();
static SERVER: OnceLock<TestServer> = OnceLock::new();
static GATED_SERVER: OnceLock<TestServer> = OnceLock::new();

pub const REDIRECT_URI: &str = "http://localhost/cb";

pub fn runtime() -> &'static tokio::runtime::Runtime {
    RT.get_or_init(|| {
        tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .expect("failed to create tokio runtime")
    })
}

/// Server with stage ordering off.
pub fn server() -> &'static TestServer {
    SERVER.get_or_init(|| runtime().block_on(TestServer::spawn(test_config(false))))
}

/// Server with `progress.enforce_stage_order = true`.
pub fn gated_server() -> &'static TestServer {
    GATED_SERVER.get_or_init(|| runtime().block_on(TestServer::spawn(test_config(true))))
}

pub fn test_config(enforce_stage_order: bool) -> Config {
    let mut config: Config = toml::from_str(
        r#"
        [server]
        host = "127.0.0.1"
        port = 0

        [jwt]
        signing_secret = "integration-test-signing-secret"
        issuer = "oauth-ctf-test"
        "#,
    )
    .expect("test config must parse");
    config.progress.enforce_stage_order = enforce_stage_order;
    config
}

pub struct TestServer {
    pub addr: SocketAddr,
    pub store: Arc<MemoryStore>,
    pub keys: Keys,
    pub config: Arc<Config>,
}

/// A client registered through the HTTP API.
#[derive(Debug, Clone)]
pub struct Registered {
    pub client_id: String,
    pub client_secret: String,
}

/// Tokens returned by exchange or refresh.
#[derive(Debug, Clone)]
pub struct Tokens {
    pub access_token: String,
    pub refresh_token: String,
    pub scope: String,
}

impl TestServer {
    pub async fn spawn(config: Config) -> Self {
        let store = Arc::new(MemoryStore::new());
        let keys = Keys::from_config(&config.jwt).expect("failed to load keys");
        let state = AppState::new(config.clone(), store.clone(), keys.clone());
        let app = ctf_auth_api::app(state);

        let listener = TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind");
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            addr,
            store,
            keys,
            config: Arc::new(config),
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    /// Fresh client per test; redirects are left for the test to inspect.
    pub fn client(&self) -> Client {
        Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap()
    }

    pub async fn register(&self, client: &Client) -> Registered {
        let resp = client
            .post(self.url("/auth/register"))
            .json(&json!({
                "client_name": "t",
                "logo_uri": "http://169.254.169.254/latest/meta-data/",
                "redirect_uris": [REDIRECT_URI],
            }))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        Registered {
            client_id: body["client_id"].as_str().unwrap().to_string(),
            client_secret: body["client_secret"].as_str().unwrap().to_string(),
        }
    }

    /// Run `/oauth/authorize` and pull the code out of the redirect.
    pub async fn authorize(&self, client: &Client, client_id: &str, challenge: &str, method: &str) -> String {
        let resp = client
            .get(self.url("/oauth/authorize"))
            .query(&[
                ("client_id", client_id),
                ("redirect_uri", REDIRECT_URI),
                ("code_challenge", challenge),
                ("code_challenge_method", method),
                ("state", "xyz"),
            ])
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FOUND);
        let location = resp.headers().get("location").unwrap().to_str().unwrap();
        let redirect = url::Url::parse(location).unwrap();
        redirect
            .query_pairs()
            .find(|(k, _)| k == "code")
            .unwrap()
            .1
            .to_string()
    }

    pub async fn exchange_raw(&self, client: &Client, body: Value) -> reqwest::Response {
        client
            .post(self.url("/token/exchange"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    pub async fn refresh_raw(&self, client: &Client, refresh_token: &str, scope: Option<&str>) -> reqwest::Response {
        let mut body = json!({ "refresh_token": refresh_token });
        if let Some(scope) = scope {
            body["scope"] = json!(scope);
        }
        client
            .post(self.url("/token/refresh"))
            .json(&body)
            .send()
            .await
            .unwrap()
    }

    /// Register, authorize with S256 and exchange with the real verifier.
    pub async fn registered_with_tokens(&self, client: &Client) -> (Registered, Tokens) {
        let registered = self.register(client).await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = self.authorize(client, &registered.client_id, &challenge, "S256").await;
        let resp = self
            .exchange_raw(
                client,
                json!({
                    "client_id": registered.client_id,
                    "client_secret": registered.client_secret,
                    "code": code,
                    "code_verifier": verifier,
                    "code_challenge_method": "S256",
                }),
            )
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let tokens = tokens_from(resp.json().await.unwrap());
        (registered, tokens)
    }

    pub async fn progress(&self, client: &Client, client_id: &str) -> Value {
        let resp = client
            .get(self.url(&format!("/progress/{client_id}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        resp.json().await.unwrap()
    }

    pub async fn graphql(&self, client: &Client, query: &str, bearer: Option<&str>) -> reqwest::Response {
        let mut req = client.post(self.url("/graphql")).json(&json!({ "query": query }));
        if let Some(token) = bearer {
            req = req.bearer_auth(token);
        }
        req.send().await.unwrap()
    }
}

pub fn tokens_from(body: Value) -> Tokens {
    Tokens {
        access_token: body["access_token"].as_str().unwrap().to_string(),
        refresh_token: body["refresh_token"].as_str().unwrap().to_string(),
        scope: body["scope"].as_str().unwrap().to_string(),
    }
}

pub fn stages(progress: &Value) -> Vec<u64> {
    progress["stages_completed"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_u64().unwrap())
        .collect()
}

pub const INTROSPECTION_QUERY: &str = "{ __schema { queryType { name fields { name description } } } }";
