use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post, put};
use axum::Json;
use axum::Router;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::driver::{DriverRecord, DriverStatusUpdate};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/drivers", get(list_drivers))
        .route("/drivers/:id", get(get_driver))
        .route("/drivers/:id/status", put(update_driver_status))
        .route("/drivers/:id/release", post(release_driver))
}

async fn list_drivers(State(state): State<Arc<AppState>>) -> Json<Vec<DriverRecord>> {
    Json(state.dispatcher.directory.list())
}

async fn get_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverRecord>, DispatchError> {
    Ok(Json(state.dispatcher.directory.get(id)?))
}

async fn update_driver_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<DriverStatusUpdate>,
) -> Result<Json<DriverRecord>, DispatchError> {
    let driver = state.dispatcher.update_driver_status(id, &payload)?;
    Ok(Json(driver))
}

async fn release_driver(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<DriverRecord>, DispatchError> {
    let driver = state.dispatcher.release_driver(id)?;
    Ok(Json(driver))
}
