// HTTP adapter tests. The engine runs against the mock marketplace with a
// fast config so races finish in milliseconds.

use axum_test::TestServer;
use gpu_race_orchestrator::routes::{create_router, AppState};
use gpu_race_orchestrator::{RaceConfig, RaceEngine};
use gpu_race_providers::mock::{MockProvider, OfferScript};
use gpu_race_providers::ProvisioningClient;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;

fn fast_config() -> RaceConfig {
    RaceConfig {
        poll_interval: Duration::from_millis(20),
        timeout: Duration::from_secs(5),
        create_delay: Duration::ZERO,
        request_timeout: Duration::from_secs(2),
        ..RaceConfig::default()
    }
}

fn test_server(script: OfferScript) -> (TestServer, Arc<AppState>, Arc<MockProvider>) {
    let mock = Arc::new(MockProvider::new().with_default_script(script));
    let config = fast_config();
    let client = ProvisioningClient::new(mock.clone(), config.request_timeout);
    let state = Arc::new(AppState {
        engine: RaceEngine::new(client, config),
    });
    let server = TestServer::new(create_router(state.clone())).unwrap();
    (server, state, mock)
}

fn offers_body(ids: &[u64]) -> Value {
    let offers: Vec<Value> = ids
        .iter()
        .map(|id| json!({"id": id, "gpu_name": "RTX 4090", "dph_total": 0.4}))
        .collect();
    json!({ "offers": offers })
}

#[tokio::test]
async fn test_health_and_idle_view() {
    let (server, _state, _mock) = test_server(OfferScript::default());

    let response = server.get("/health").await;
    assert_eq!(response.status_code(), 200);
    assert_eq!(response.text(), "OK");

    let response = server.get("/race").await;
    assert_eq!(response.status_code(), 200);
    let body: Value = response.json();
    assert_eq!(body["status"], "idle");
    assert_eq!(body["status_label"], "Aguardando");
    assert_eq!(body["max_rounds"], 3);
}

#[tokio::test]
async fn test_race_lifecycle() {
    let (server, state, mock) = test_server(OfferScript::statuses(&["created", "running"]));

    let response = server.post("/race").json(&json!({"offers": []})).await;
    assert_eq!(response.status_code(), 400);

    let response = server.post("/race").json(&offers_body(&[11, 12])).await;
    assert_eq!(response.status_code(), 202);
    let body: Value = response.json();
    assert_eq!(body["status"], "racing");
    assert_eq!(body["status_label"], "Provisionando");

    let response = server.post("/race").json(&offers_body(&[13])).await;
    assert_eq!(response.status_code(), 409);

    let race = state.engine.wait_until_settled().await;
    let winner_offer = race.winner.unwrap().offer_id;

    let body: Value = server.get("/race").await.json();
    assert_eq!(body["status"], "completed");
    assert_eq!(body["progress"], 100);
    assert_eq!(body["winner"]["offer_id"], winner_offer);
    assert_eq!(body["winner"]["phase_label"], "Pronta");

    let response = server.post("/race/complete").await;
    assert_eq!(response.status_code(), 200);
    let winner: Value = response.json();
    assert_eq!(winner["offer_id"], winner_offer);
    assert_eq!(winner["phase"], "running");

    let body: Value = server.post("/race/reset").await.json();
    assert_eq!(body["status"], "idle");

    // Loser deletes run in the background.
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(mock.live_instances().len(), 1);
}

#[tokio::test]
async fn test_cancel_is_idempotent() {
    let (server, _state, mock) = test_server(OfferScript::statuses(&["created"]));

    let response = server.post("/race/complete").await;
    assert_eq!(response.status_code(), 409);

    let response = server.post("/race").json(&offers_body(&[21, 22, 23])).await;
    assert_eq!(response.status_code(), 202);
    tokio::time::sleep(Duration::from_millis(50)).await;

    let body: Value = server.post("/race/cancel").await.json();
    assert_eq!(body["status"], "cancelled");
    let body: Value = server.post("/race/cancel").await.json();
    assert_eq!(body["status"], "cancelled");

    assert!(mock.live_instances().is_empty());
    assert_eq!(mock.deleted().len(), mock.create_calls().len());
}
