mod common;
use common::*;

fn exchange_body(reg: &Registered, code: &str, verifier: &str, method: Option<&str>) -> Value {
    let mut body = json!({
        "client_id": reg.client_id,
        "client_secret": reg.client_secret,
        "code": code,
        "code_verifier": verifier,
    });
    if let Some(method) = method {
        body["code_challenge_method"] = json!(method);
    }
    body
}

#[test]
fn exchange_issues_token_pair() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let reg = s.register(&client).await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = s.authorize(&client, &reg.client_id, &challenge, "S256").await;

        let resp = s.exchange_raw(&client, exchange_body(&reg, &code, &verifier, None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["token_type"], "Bearer");
        assert_eq!(body["scope"], "USER_READ");
        assert!(body["expires_in"].as_u64().unwrap() > 0);
        assert!(body["id_token"].is_string());

        let claims = s
            .keys
            .verify_access_token(&s.config.jwt, body["access_token"].as_str().unwrap())
            .unwrap()
            .claims;
        assert_eq!(claims.client_id, reg.client_id);
        assert_eq!(claims.scope, "USER_READ");
    });
}

#[test]
fn code_is_single_use() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let reg = s.register(&client).await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = s.authorize(&client, &reg.client_id, &challenge, "S256").await;

        let first = s.exchange_raw(&client, exchange_body(&reg, &code, &verifier, None)).await;
        assert_eq!(first.status(), StatusCode::OK);

        let second = s.exchange_raw(&client, exchange_body(&reg, &code, &verifier, None)).await;
        assert_eq!(second.status(), StatusCode::UNAUTHORIZED);
        let err: Value = second.json().await.unwrap();
        assert_eq!(err["error"], "invalid_grant");
    });
}

#[test]
fn concurrent_exchanges_have_one_winner() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let reg = s.register(&client).await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = s.authorize(&client, &reg.client_id, &challenge, "S256").await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            let url = s.url("/token/exchange");
            let body = exchange_body(&reg, &code, &verifier, None);
            handles.push(tokio::spawn(async move {
                client.post(url).json(&body).send().await.unwrap().status()
            }));
        }
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap() == StatusCode::OK {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
    });
}

#[test]
fn plain_method_downgrade_accepts_the_challenge() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let reg = s.register(&client).await;
        let (_verifier, challenge) = pkce::generate_pkce();
        let code = s.authorize(&client, &reg.client_id, &challenge, "S256").await;

        // Only the challenge leaked; presenting it as a plain verifier passes.
        let resp = s
            .exchange_raw(&client, exchange_body(&reg, &code, &challenge, Some("plain")))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let progress = s.progress(&client, &reg.client_id).await;
        assert!(stages(&progress).contains(&3));
    });
}

#[test]
fn wrong_verifier_burns_the_code() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let reg = s.register(&client).await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = s.authorize(&client, &reg.client_id, &challenge, "S256").await;

        let resp = s
            .exchange_raw(&client, exchange_body(&reg, &code, "not-the-verifier", None))
            .await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "pkce_mismatch");

        let retry = s.exchange_raw(&client, exchange_body(&reg, &code, &verifier, None)).await;
        assert_eq!(retry.status(), StatusCode::UNAUTHORIZED);
        let err: Value = retry.json().await.unwrap();
        assert_eq!(err["error"], "invalid_grant");
    });
}

#[test]
fn wrong_secret_leaves_code_usable() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let reg = s.register(&client).await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = s.authorize(&client, &reg.client_id, &challenge, "S256").await;

        let mut body = exchange_body(&reg, &code, &verifier, None);
        body["client_secret"] = json!("secret_wrong");
        let resp = s.exchange_raw(&client, body).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "invalid_client");

        let resp = s.exchange_raw(&client, exchange_body(&reg, &code, &verifier, None)).await;
        assert_eq!(resp.status(), StatusCode::OK);
    });
}

#[test]
fn code_is_bound_to_its_client() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let owner = s.register(&client).await;
        let other = s.register(&client).await;
        let (verifier, challenge) = pkce::generate_pkce();
        let code = s.authorize(&client, &owner.client_id, &challenge, "S256").await;

        let resp = s.exchange_raw(&client, exchange_body(&other, &code, &verifier, None)).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "invalid_grant");
    });
}

#[test]
fn exchange_rejects_malformed_body() {
    let s = server();
    runtime().block_on(async {
        let resp = s.exchange_raw(&s.client(), json!({ "client_id": "x" })).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    });
}

#[test]
fn refresh_rotates_and_keeps_scope() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (_reg, tokens) = s.registered_with_tokens(&client).await;

        let resp = s.refresh_raw(&client, &tokens.refresh_token, None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["scope"], "USER_READ");
        assert!(body.get("id_token").is_none());
        let next = tokens_from(body);
        assert_ne!(next.refresh_token, tokens.refresh_token);

        // Old token is spent, new one works
        let resp = s.refresh_raw(&client, &tokens.refresh_token, None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let resp = s.refresh_raw(&client, &next.refresh_token, Some("")).await;
        assert_eq!(resp.status(), StatusCode::OK);
    });
}

#[test]
fn concurrent_refreshes_have_one_winner() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (_reg, tokens) = s.registered_with_tokens(&client).await;

        let mut handles = Vec::new();
        for _ in 0..8 {
            let client = client.clone();
            let url = s.url("/token/refresh");
            let body = json!({ "refresh_token": tokens.refresh_token });
            handles.push(tokio::spawn(async move {
                client.post(url).json(&body).send().await.unwrap().status()
            }));
        }
        let mut ok = 0;
        for handle in handles {
            if handle.await.unwrap() == StatusCode::OK {
                ok += 1;
            }
        }
        assert_eq!(ok, 1);
    });
}

#[test]
fn refresh_accepts_requested_scope() {
    let s = server();
    runtime().block_on(async {
        let client = s.client();
        let (reg, tokens) = s.registered_with_tokens(&client).await;

        let resp = s
            .refresh_raw(&client, &tokens.refresh_token, Some("USER_READ ADMIN_SECRETS"))
            .await;
        assert_eq!(resp.status(), StatusCode::OK);
        let elevated = tokens_from(resp.json().await.unwrap());
        assert_eq!(elevated.scope, "USER_READ ADMIN_SECRETS");

        let claims = s
            .keys
            .verify_access_token(&s.config.jwt, &elevated.access_token)
            .unwrap()
            .claims;
        assert_eq!(claims.scope, "USER_READ ADMIN_SECRETS");

        let progress = s.progress(&client, &reg.client_id).await;
        assert!(stages(&progress).contains(&5));

        // The rotated token carries the elevated scope forward
        let resp = s.refresh_raw(&client, &elevated.refresh_token, None).await;
        let body: Value = resp.json().await.unwrap();
        assert_eq!(body["scope"], "USER_READ ADMIN_SECRETS");
    });
}

#[test]
fn refresh_unknown_token() {
    let s = server();
    runtime().block_on(async {
        let resp = s.refresh_raw(&s.client(), "no-such-token", None).await;
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
        let err: Value = resp.json().await.unwrap();
        assert_eq!(err["error"], "invalid_grant");
    });
}
