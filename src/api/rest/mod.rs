pub mod drivers;
pub mod grab_orders;
pub mod rides;
pub mod ws;

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::models::assignment::AssignmentRecord;
use crate::models::event::DeadLetter;
use crate::state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .merge(drivers::router())
        .merge(rides::router())
        .merge(grab_orders::router())
        .route("/assignments", get(list_assignments))
        .route("/dead-letters", get(list_dead_letters))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    drivers: usize,
    drivers_available: usize,
    grab_listings: usize,
    assignments: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let dispatcher = &state.dispatcher;
    Json(HealthResponse {
        status: "ok",
        drivers: dispatcher.directory.len(),
        drivers_available: dispatcher.directory.available_count(),
        grab_listings: dispatcher.marketplace.len(),
        assignments: dispatcher.ledger.success_count(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    state.refresh_gauges();
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

#[derive(Deserialize)]
pub struct AssignmentQuery {
    pub order_id: Option<Uuid>,
}

async fn list_assignments(
    State(state): State<Arc<AppState>>,
    Query(query): Query<AssignmentQuery>,
) -> Json<Vec<AssignmentRecord>> {
    let ledger = &state.dispatcher.ledger;
    let records = match query.order_id {
        Some(order_id) => ledger.attempts_for(order_id),
        None => ledger.all(),
    };
    Json(records)
}

async fn list_dead_letters(State(state): State<Arc<AppState>>) -> Json<Vec<DeadLetter>> {
    let mut letters: Vec<DeadLetter> = state
        .dead_letters
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    letters.sort_by_key(|letter| letter.dead_lettered_at);
    Json(letters)
}
