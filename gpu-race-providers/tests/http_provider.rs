// Integration tests for the REST provider against a local axum backend.
#![cfg(feature = "http")]

use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use gpu_race_common::CreateErrorKind;
use gpu_race_providers::http::HttpProvider;
use gpu_race_providers::{InstanceProvider, ProvisioningClient};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;

const TOKEN: &str = "test-token";

#[derive(Clone, Default)]
struct Backend {
    created: Arc<Mutex<Vec<Value>>>,
    deleted: Arc<Mutex<Vec<String>>>,
}

fn authorized(headers: &HeaderMap) -> bool {
    headers
        .get("authorization")
        .and_then(|h| h.to_str().ok())
        .map(|h| h == format!("Bearer {}", TOKEN))
        .unwrap_or(false)
}

async fn create(
    State(backend): State<Backend>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    backend.created.lock().unwrap().push(body.clone());
    match body["offer_id"].as_u64() {
        Some(13) => (
            StatusCode::BAD_REQUEST,
            Json(json!({"success": false, "detail": "Offer no longer available"})),
        ),
        Some(14) => (
            StatusCode::OK,
            Json(json!({"success": true, "instance_id": "inst-14"})),
        ),
        Some(id) => (StatusCode::OK, Json(json!({"success": true, "id": 9000 + id}))),
        None => (StatusCode::UNPROCESSABLE_ENTITY, Json(json!({"detail": "missing offer_id"}))),
    }
}

async fn list(headers: HeaderMap) -> impl IntoResponse {
    if !authorized(&headers) {
        return (StatusCode::UNAUTHORIZED, Json(json!({"error": "unauthorized"})));
    }
    (
        StatusCode::OK,
        Json(json!({
            "instances": [
                {"id": 9001, "actual_status": "loading", "ssh_host": "ssh1.host", "ssh_port": 40001},
                {"id": null, "actual_status": "running"},
                {"id": 9002, "actual_status": null, "ssh_host": null, "ssh_port": null}
            ]
        })),
    )
}

async fn remove(State(backend): State<Backend>, Path(id): Path<String>) -> StatusCode {
    if id == "404" {
        return StatusCode::NOT_FOUND;
    }
    if id == "500" {
        return StatusCode::INTERNAL_SERVER_ERROR;
    }
    backend.deleted.lock().unwrap().push(id);
    StatusCode::OK
}

async fn spawn_backend() -> (String, Backend) {
    let backend = Backend::default();
    let app = Router::new()
        .route("/instances", get(list).post(create))
        .route("/instances/{id}", delete(remove))
        .with_state(backend.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{}", addr), backend)
}

fn client_for(base_url: &str, token: &str) -> ProvisioningClient {
    let provider = HttpProvider::new(base_url.to_string(), token.to_string()).unwrap();
    ProvisioningClient::new(Arc::new(provider), Duration::from_secs(5))
}

#[tokio::test]
async fn create_sends_contract_body_and_parses_ids() {
    let (url, backend) = spawn_backend().await;
    let client = client_for(&url, TOKEN);

    let id = client.create_instance(7, 40.0, "race-abc-r1-7").await.unwrap();
    assert_eq!(id, "9007");
    let id = client.create_instance(14, 40.0, "race-abc-r1-14").await.unwrap();
    assert_eq!(id, "inst-14");

    let created = backend.created.lock().unwrap().clone();
    assert_eq!(
        created[0],
        json!({"offer_id": 7, "disk_size": 40.0, "label": "race-abc-r1-7"})
    );
}

#[tokio::test]
async fn create_errors_are_classified() {
    let (url, _backend) = spawn_backend().await;

    let err = client_for(&url, TOKEN)
        .create_instance(13, 40.0, "x")
        .await
        .unwrap_err();
    assert_eq!(err.kind, CreateErrorKind::Unavailable);
    assert!(err.message.contains("status=400"));

    let err = client_for(&url, "wrong")
        .create_instance(7, 40.0, "x")
        .await
        .unwrap_err();
    assert_eq!(err.kind, CreateErrorKind::Auth);
}

#[tokio::test]
async fn network_failure_is_classified() {
    // Nothing listens on port 9 locally.
    let err = client_for("http://127.0.0.1:9", TOKEN)
        .create_instance(7, 40.0, "x")
        .await
        .unwrap_err();
    assert!(
        matches!(err.kind, CreateErrorKind::Network | CreateErrorKind::Timeout),
        "unexpected kind {:?}: {}",
        err.kind,
        err.message
    );
}

#[tokio::test]
async fn list_parses_instances_and_skips_bad_rows() {
    let (url, _backend) = spawn_backend().await;
    let instances = client_for(&url, TOKEN).list_instances().await.unwrap();
    assert_eq!(instances.len(), 2);
    assert_eq!(instances[0].id, "9001");
    assert_eq!(instances[0].actual_status.as_deref(), Some("loading"));
    assert_eq!(instances[0].ssh_port, Some(40001));
    assert_eq!(instances[1].actual_status, None);

    assert!(client_for(&url, "wrong").list_instances().await.is_err());
}

#[tokio::test]
async fn delete_is_best_effort() {
    let (url, backend) = spawn_backend().await;
    let client = client_for(&url, TOKEN);

    assert!(client.delete_instance("9001").await);
    assert!(client.delete_instance("404").await);
    assert!(!client.delete_instance("500").await);
    assert_eq!(backend.deleted.lock().unwrap().clone(), vec!["9001".to_string()]);

    let provider = HttpProvider::new(url, TOKEN.to_string()).unwrap();
    assert!(!provider.delete_instance("404").await.unwrap());
    assert!(provider.delete_instance("500").await.is_err());
}
