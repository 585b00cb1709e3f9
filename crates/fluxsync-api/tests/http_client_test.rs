// Integration tests for `HttpRetrieveClient` using wiremock.

use serde::Deserialize;
use serde_json::json;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use fluxsync_api::{Error, HttpRetrieveClient};

#[derive(Debug, Deserialize, PartialEq)]
struct Label {
    key: i64,
    name: String,
}

// ── Helpers ─────────────────────────────────────────────────────────

async fn setup() -> (MockServer, HttpRetrieveClient) {
    let server = MockServer::start().await;
    let client = HttpRetrieveClient::from_reqwest(&server.uri(), reqwest::Client::new()).unwrap();
    (server, client)
}

// ── Happy-path tests ────────────────────────────────────────────────

#[tokio::test]
async fn test_retrieve_posts_keys_and_returns_items() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/labels/retrieve"))
        .and(body_json(json!({ "keys": [1, 2] })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                { "key": 2, "name": "beta" },
                { "key": 1, "name": "alpha" },
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let items: Vec<Label> = client.retrieve("labels", &[1, 2]).await.unwrap();

    assert_eq!(items.len(), 2);
    assert_eq!(items[0].name, "beta");
    assert_eq!(items[1].key, 1);
}

#[tokio::test]
async fn test_retrieve_allows_missing_items() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/labels/retrieve"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "items": [] })))
        .mount(&server)
        .await;

    let items: Vec<Label> = client.retrieve("labels", &[404]).await.unwrap();
    assert!(items.is_empty());
}

// ── Error tests ─────────────────────────────────────────────────────

#[tokio::test]
async fn test_server_error_maps_to_status() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/labels/retrieve"))
        .respond_with(
            ResponseTemplate::new(503).set_body_json(json!({ "message": "warming up" })),
        )
        .mount(&server)
        .await;

    let err = client.retrieve::<i64, Label>("labels", &[1]).await.unwrap_err();
    match err {
        Error::Status { status, body } => {
            assert_eq!(status, 503);
            assert_eq!(body, "warming up");
        }
        other => panic!("expected Status, got {other:?}"),
    }
}

#[tokio::test]
async fn test_malformed_body_maps_to_deserialization() {
    let (server, client) = setup().await;

    Mock::given(method("POST"))
        .and(path("/api/v1/labels/retrieve"))
        .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
        .mount(&server)
        .await;

    let err = client.retrieve::<i64, Label>("labels", &[1]).await.unwrap_err();
    match err {
        Error::Deserialization { body, .. } => assert_eq!(body, "not json"),
        other => panic!("expected Deserialization, got {other:?}"),
    }
}
