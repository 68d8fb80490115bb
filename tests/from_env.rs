//! `ApiClient::from_env` mutates process-wide environment variables, so it
//! gets its own test binary with a single test.

use std::{
    env,
    sync::{Arc, Mutex},
};

use axum::{
    extract::State,
    http::{header, HeaderMap},
    Json, Router,
};
use marketplace_http::{config, ApiClient, ApiRequest};
use serde_json::{json, Value as JsonValue};

async fn echo_authorization(
    State(seen): State<Arc<Mutex<Vec<Option<String>>>>>,
    headers: HeaderMap,
) -> Json<JsonValue> {
    let authorization = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .map(str::to_owned);
    seen.lock()
        .expect("hit log mutex must not be poisoned")
        .push(authorization);
    Json(json!({"ok": true}))
}

fn clear_env() {
    env::remove_var(config::API_URL_ENV);
    env::remove_var(config::ORIGIN_ENV);
    env::remove_var(config::TOKEN_FILE_ENV);
}

#[tokio::test]
async fn from_env_resolves_origin_and_wires_token_file() {
    clear_env();
    let err = ApiClient::from_env().expect_err("no backend url configured");
    assert!(err.contains(config::API_URL_ENV), "{err}");

    env::set_var(config::API_URL_ENV, "http://localhost:8080");
    env::set_var(config::ORIGIN_ENV, "https://shop.example.com");
    let api = ApiClient::from_env().expect("origin fallback must resolve");
    assert_eq!(api.base_url(), "https://shop.example.com");

    env::set_var(config::ORIGIN_ENV, "http://localhost:3000");
    let api = ApiClient::from_env().expect("local development must resolve");
    assert_eq!(api.base_url(), "http://localhost:8080");

    let seen = Arc::new(Mutex::new(Vec::new()));
    let app = Router::new()
        .fallback(echo_authorization)
        .with_state(seen.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("must bind test listener");
    let address = listener.local_addr().expect("must have local addr");
    let server = tokio::spawn(async move {
        axum::serve(listener, app)
            .await
            .expect("mock server must run");
    });

    let dir = tempfile::tempdir().unwrap();
    let token_file = dir.path().join("tokens.json");
    std::fs::write(&token_file, r#"{"accessToken":"from-file"}"#).unwrap();

    clear_env();
    env::set_var(config::API_URL_ENV, format!("http://{address}/"));
    env::set_var(config::TOKEN_FILE_ENV, &token_file);
    let api = ApiClient::from_env().expect("configured url must resolve");
    assert_eq!(api.base_url(), format!("http://{address}"));

    api.request(ApiRequest::get("/users/me")).await.unwrap();
    std::fs::write(&token_file, r#"{"accessToken":"rotated"}"#).unwrap();
    api.request(ApiRequest::get("/users/me")).await.unwrap();

    env::set_var(config::TOKEN_FILE_ENV, "  ");
    let anonymous = ApiClient::from_env().expect("blank token file is ignored");
    anonymous
        .request(ApiRequest::get("/offers"))
        .await
        .unwrap();

    assert_eq!(
        *seen.lock().unwrap(),
        vec![
            Some("Bearer from-file".to_owned()),
            Some("Bearer rotated".to_owned()),
            None,
        ]
    );

    clear_env();
    server.abort();
}
