use crate::engine::{RaceEngine, RaceError};
use crate::progress::{candidate_view, race_view};
use axum::http::StatusCode;
use axum::{
    extract::State,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use gpu_race_common::Offer;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;

pub struct AppState {
    pub engine: RaceEngine,
}

#[derive(Deserialize, Debug)]
pub struct StartRaceRequest {
    #[serde(default)]
    pub offers: Vec<Offer>,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/race", get(get_race).post(start_race))
        .route("/race/cancel", post(cancel_race))
        .route("/race/complete", post(complete_race))
        .route("/race/reset", post(reset_race))
        .with_state(state)
}

async fn health() -> &'static str {
    "OK"
}

fn race_error(err: RaceError) -> Response {
    let status = match err {
        RaceError::NoOffers => StatusCode::BAD_REQUEST,
        RaceError::AlreadyRacing | RaceError::NotCompleted => StatusCode::CONFLICT,
    };
    (status, Json(json!({"error": err.to_string()}))).into_response()
}

async fn get_race(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(race_view(&state.engine.snapshot()))
}

async fn start_race(
    State(state): State<Arc<AppState>>,
    Json(req): Json<StartRaceRequest>,
) -> Response {
    match state.engine.start_race(req.offers).await {
        Ok(()) => (
            StatusCode::ACCEPTED,
            Json(race_view(&state.engine.snapshot())),
        )
            .into_response(),
        Err(e) => race_error(e),
    }
}

async fn cancel_race(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.cancel_race().await;
    Json(race_view(&state.engine.snapshot()))
}

async fn complete_race(State(state): State<Arc<AppState>>) -> Response {
    match state.engine.complete_race() {
        Ok(winner) => Json(candidate_view(&winner)).into_response(),
        Err(e) => race_error(e),
    }
}

async fn reset_race(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.engine.reset().await;
    Json(race_view(&state.engine.snapshot()))
}
