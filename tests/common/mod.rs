#![allow(dead_code)]

use axum_test::TestServer;
use bytes::Bytes;
use request_pipeline::config::Config;
use request_pipeline::prelude::*;
use request_pipeline::server::{self, AppState};

pub fn test_config() -> Config {
    Config {
        listen_addr: "127.0.0.1:0".to_string(),
        log_level: "debug".to_string(),
        log_format: "text".to_string(),
        debug_mode: false,
        jwt_secret: "integration-jwt-secret".to_string(),
        jwt_algorithm: "HS256".to_string(),
        jwt_expire_minutes: 30,
        api_key_signing_secret: "integration-key-secret".to_string(),
        rate_limit_algorithm: "token_bucket".to_string(),
        rate_limit_capacity: 100,
        rate_limit_refill_rate: 10.0,
        rate_limit_limit: 100,
        rate_limit_window_seconds: 60,
        behind_proxy: false,
        cache_backend: "memory".to_string(),
        cache_default_ttl: 300,
        redis_url: None,
        cors_allowed_origins: vec!["https://app.example.com".to_string(), "*.trusted.io".to_string()],
    }
}

pub async fn create_test_state(config: &Config) -> AppState {
    server::build_state(config).await.unwrap()
}

pub async fn create_test_server(config: &Config) -> TestServer {
    TestServer::new(server::router(create_test_state(config).await)).unwrap()
}

/// Logs in through the API and returns the access token.
pub async fn login(server: &TestServer, username: &str, password: &str) -> String {
    let response = server
        .post("/auth/login")
        .json(&serde_json::json!({"username": username, "password": password}))
        .await;
    response.assert_status_ok();
    response.json::<serde_json::Value>()["access_token"]
        .as_str()
        .unwrap()
        .to_string()
}

pub fn request(method: &str, uri: &str) -> Request {
    http::Request::builder()
        .method(method)
        .uri(uri)
        .body(Bytes::new())
        .unwrap()
}

pub fn json_body(response: &Response) -> serde_json::Value {
    serde_json::from_slice(response.body()).unwrap()
}
