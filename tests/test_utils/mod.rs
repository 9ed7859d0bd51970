//! Test utilities for integration tests
use std::sync::{Arc, RwLock};

use axum::{Router, body::Body};

use chat_relay::api::AppState;
use chat_relay::api::app;
use chat_relay::core::AppConfig;
use chat_relay::relay::RelayMode;

/// Creates a test application router that relays to the Ollama
/// server at `ollama_url`, usually a `mockito` server.
pub fn test_app_with_server(mode: RelayMode, ollama_url: &str) -> Router {
    let app_config = AppConfig::new(ollama_url, "llama3", mode);
    let app_state = AppState::new(&app_config);
    app(Arc::new(RwLock::new(app_state)))
}

/// Creates a test application router. Nothing listens on the Ollama
/// URL so any call to the model fails.
pub fn test_app(mode: RelayMode) -> Router {
    test_app_with_server(mode, "http://127.0.0.1:1")
}

pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read body");
    String::from_utf8(bytes.to_vec()).expect("Body is not valid UTF-8")
}
