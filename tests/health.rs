#![cfg(feature = "health")]
#![allow(
    clippy::unwrap_used,
    reason = "Do not need additional syntax for setting up tests"
)]

use assistant_link::error::{Kind, Status};
use assistant_link::health::HealthClient;
use httpmock::{Method::GET, MockServer};
use reqwest::StatusCode;
use serde_json::json;

#[tokio::test]
async fn check_should_succeed() -> anyhow::Result<()> {
    let server = MockServer::start();
    let client = HealthClient::new(&server.base_url())?;

    let mock = server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(StatusCode::OK).json_body(json!({ "status": "ok" }));
    });

    let response = client.check().await?;

    assert_eq!(response.status, "ok");
    mock.assert();

    Ok(())
}

#[tokio::test]
async fn ping_should_succeed() -> anyhow::Result<()> {
    let server = MockServer::start();
    let client = HealthClient::new(&server.base_url())?;

    let mock = server.mock(|when, then| {
        when.method(GET).path("/api/ping");
        then.status(StatusCode::OK).json_body(json!({
            "status": "ok",
            "message": "Flask backend running"
        }));
    });

    let response = client.ping().await?;

    assert_eq!(response.status, "ok");
    assert_eq!(response.message, "Flask backend running");
    mock.assert();

    Ok(())
}

#[tokio::test]
async fn is_alive_reports_healthy_backend() -> anyhow::Result<()> {
    let server = MockServer::start();
    let client = HealthClient::new(&server.base_url())?;

    server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(StatusCode::OK).json_body(json!({ "status": "ok" }));
    });

    assert!(client.is_alive().await);

    Ok(())
}

#[tokio::test]
async fn is_alive_is_false_for_degraded_backend() -> anyhow::Result<()> {
    let server = MockServer::start();
    let client = HealthClient::new(&server.base_url())?;

    server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(StatusCode::OK)
            .json_body(json!({ "status": "degraded" }));
    });

    assert!(!client.is_alive().await);

    Ok(())
}

#[tokio::test]
async fn server_error_should_map_to_status() -> anyhow::Result<()> {
    let server = MockServer::start();
    let client = HealthClient::new(&server.base_url())?;

    let mock = server.mock(|when, then| {
        when.method(GET).path("/health");
        then.status(StatusCode::SERVICE_UNAVAILABLE)
            .body("backend starting");
    });

    let err = client.check().await.unwrap_err();
    assert_eq!(err.kind(), Kind::Status);

    let status = err.downcast_ref::<Status>().unwrap();
    assert_eq!(status.status_code, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(status.path, "/health");
    assert_eq!(status.message, "backend starting");
    assert!(!client.is_alive().await);
    mock.assert_calls(2);

    Ok(())
}
