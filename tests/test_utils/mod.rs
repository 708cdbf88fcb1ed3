//! Test utilities for integration tests
use std::sync::Arc;

use axum::{Router, body::Body};

use concierge::api::AppState;
use concierge::api::app;
use concierge::core::AppConfig;

/// Creates a test application router from the given config.
pub fn test_app(config: AppConfig) -> Router {
    let app_state = AppState::new(config);
    app(Arc::new(app_state))
}

/// An [`AppConfig`] pointed at a mock upstream instead of the real
/// generative language API.
pub fn test_config(upstream_url: &str) -> AppConfig {
    AppConfig {
        gemini_api_key: Some("test-api-key".to_string()),
        gemini_api_hostname: upstream_url.to_string(),
        gemini_model: "gemini-2.5-flash".to_string(),
        system_instruction: "You are a helpful travel assistant.".to_string(),
    }
}

/// Collect an entire response body into a string.
pub async fn body_to_string(body: Body) -> String {
    let bytes = axum::body::to_bytes(body, usize::MAX)
        .await
        .expect("Failed to read response body");
    String::from_utf8(bytes.to_vec()).expect("Response body was not valid UTF-8")
}
