use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Serialize;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::assignment::AssignmentRecord;
use crate::models::event::{
    DispatchEvent, RideCancelled, RideRequested, TOPIC_RIDE_CANCELLED, TOPIC_RIDE_REQUESTED,
};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/rides", post(request_ride))
        .route("/rides/:id/cancel", post(cancel_ride))
        .route("/rides/:id/assignment", get(get_assignment))
}

#[derive(Serialize)]
pub struct Accepted {
    pub order_id: Uuid,
    pub status: &'static str,
}

async fn request_ride(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<RideRequested>,
) -> Result<(StatusCode, Json<Accepted>), DispatchError> {
    if !payload.pickup.is_valid() || !payload.dropoff.is_valid() {
        return Err(DispatchError::BadRequest(
            "pickup and dropoff must be valid coordinates".to_string(),
        ));
    }

    let order_id = payload.order_id;
    state
        .bus
        .publish(TOPIC_RIDE_REQUESTED, DispatchEvent::RideRequested(payload))?;

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            order_id,
            status: "searching",
        }),
    ))
}

async fn cancel_ride(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<(StatusCode, Json<Accepted>), DispatchError> {
    state.bus.publish(
        TOPIC_RIDE_CANCELLED,
        DispatchEvent::RideCancelled(RideCancelled { order_id: id }),
    )?;

    Ok((
        StatusCode::ACCEPTED,
        Json(Accepted {
            order_id: id,
            status: "cancelling",
        }),
    ))
}

async fn get_assignment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<AssignmentRecord>, DispatchError> {
    state
        .dispatcher
        .ledger
        .success_for(id)
        .map(Json)
        .ok_or_else(|| DispatchError::NotFound(format!("order {id} has no assignment")))
}
