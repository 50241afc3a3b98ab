//! WireMock server utilities for durable store testing

#![allow(dead_code)]

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Mock store that accepts every increment batch and knows no counts.
pub async fn setup_mock_store() -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/view-counts/increments"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({})))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/view-counts"))
        .respond_with(
            ResponseTemplate::new(200).set_body_json(serde_json::json!({ "counts": {} })),
        )
        .mount(&mock_server)
        .await;

    mock_server
}

/// Mock store that answers every request with `status`.
pub async fn setup_failing_store(status: u16) -> MockServer {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(status).set_body_string("store unavailable"))
        .mount(&mock_server)
        .await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status).set_body_string("store unavailable"))
        .mount(&mock_server)
        .await;

    mock_server
}
