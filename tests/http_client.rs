//! `HttpCommandClient` status mapping against a mock command endpoint.

use std::sync::Arc;
use std::time::Duration;

use labour_sync::{CommandSubmitter, HttpCommandClient, StaticToken, SubmitOutcome, TransportError};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn client(server: &MockServer, timeout: Duration) -> HttpCommandClient {
    let tokens = Arc::new(StaticToken(Some("t0ken".into())));
    HttpCommandClient::new(&server.uri(), tokens, timeout).unwrap()
}

fn envelope() -> serde_json::Value {
    json!({
        "type": "DeleteContraction",
        "payload": { "labour_id": "lab-1", "contraction_id": "c1" }
    })
}

#[tokio::test]
async fn posts_envelope_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/api/v1/commands"))
        .and(header("authorization", "Bearer t0ken"))
        .and(body_json(envelope()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "success": true })))
        .expect(1)
        .mount(&server)
        .await;

    let outcome = client(&server, Duration::from_secs(5)).submit_raw(&envelope()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::accepted());
}

#[tokio::test]
async fn empty_success_body_counts_as_accepted() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(&server)
        .await;

    let outcome = client(&server, Duration::from_secs(5)).submit_raw(&envelope()).await.unwrap();
    assert!(outcome.success);
}

#[tokio::test]
async fn client_errors_are_explicit_rejections() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(json!({ "success": false, "error": "contraction already ended" })),
        )
        .mount(&server)
        .await;

    let outcome = client(&server, Duration::from_secs(5)).submit_raw(&envelope()).await.unwrap();
    assert_eq!(outcome, SubmitOutcome::rejected("contraction already ended"));
}

#[tokio::test]
async fn plain_text_rejection_keeps_the_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(422).set_body_string("intensity out of range"))
        .mount(&server)
        .await;

    let outcome = client(&server, Duration::from_secs(5)).submit_raw(&envelope()).await.unwrap();
    assert_eq!(outcome.error.as_deref(), Some("intensity out of range"));
}

#[tokio::test]
async fn server_errors_are_transport_failures() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(503).set_body_string("maintenance"))
        .mount(&server)
        .await;

    let err = client(&server, Duration::from_secs(5)).submit_raw(&envelope()).await.unwrap_err();
    assert_eq!(err, TransportError::Server { status: 503, body: "maintenance".into() });
}

#[tokio::test]
async fn slow_endpoint_times_out() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
        .mount(&server)
        .await;

    let client = client(&server, Duration::from_millis(100));
    let err = client.submit_raw(&envelope()).await.unwrap_err();
    assert_eq!(err, TransportError::Timeout);
}

#[tokio::test]
async fn unreachable_host_is_a_connection_error() {
    let client = HttpCommandClient::new(
        "http://127.0.0.1:9",
        Arc::new(StaticToken(None)),
        Duration::from_secs(2),
    )
    .unwrap();

    let err = client.submit_raw(&envelope()).await.unwrap_err();
    assert!(matches!(err, TransportError::Connection(_) | TransportError::Timeout));
}
