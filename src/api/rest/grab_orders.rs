use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::engine::marketplace::{ClaimOutcome, GrabFilter};
use crate::error::DispatchError;
use crate::gateway;
use crate::geo::GeoPoint;
use crate::models::assignment::AssignmentRecord;
use crate::models::driver::VehicleType;
use crate::models::event::{DispatchEvent, DriverAssigned};
use crate::models::grab::GrabbableOrder;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/grab-orders", get(list_grab_orders))
        .route("/grab-orders/:id/claim", post(claim_grab_order))
}

#[derive(Debug, Deserialize)]
pub struct GrabQuery {
    pub vehicle_type: Option<VehicleType>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
    pub radius_km: Option<f64>,
}

impl GrabQuery {
    fn into_filter(self) -> Result<GrabFilter, DispatchError> {
        let near = match (self.lat, self.lng) {
            (Some(lat), Some(lng)) => {
                let point = GeoPoint::new(lat, lng);
                if !point.is_valid() {
                    return Err(DispatchError::BadRequest(format!(
                        "invalid coordinates ({lat}, {lng})"
                    )));
                }
                Some(point)
            }
            (None, None) => None,
            _ => {
                return Err(DispatchError::BadRequest(
                    "lat and lng must be given together".to_string(),
                ))
            }
        };

        if self.radius_km.is_some_and(|radius_km| radius_km <= 0.0) {
            return Err(DispatchError::BadRequest(
                "radius_km must be positive".to_string(),
            ));
        }

        Ok(GrabFilter {
            vehicle_type: self.vehicle_type,
            near,
            radius_km: self.radius_km,
        })
    }
}

async fn list_grab_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<GrabQuery>,
) -> Result<Json<Vec<GrabbableOrder>>, DispatchError> {
    let filter = query.into_filter()?;
    Ok(Json(
        state
            .dispatcher
            .marketplace
            .list_available(&filter, Utc::now()),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ClaimRequest {
    pub driver_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct ClaimResponse {
    pub assignment: AssignmentRecord,
    pub estimated_arrival_secs: u64,
}

async fn claim_grab_order(
    State(state): State<Arc<AppState>>,
    Path(order_id): Path<Uuid>,
    Json(payload): Json<ClaimRequest>,
) -> Result<Json<ClaimResponse>, DispatchError> {
    let outcome = state.dispatcher.claim_order(order_id, payload.driver_id);
    state
        .metrics
        .grab_claims_total
        .with_label_values(&[outcome.label()])
        .inc();

    match outcome {
        ClaimOutcome::Claimed {
            record,
            estimated_arrival_secs,
        } => {
            let assigned = DriverAssigned {
                order_id,
                driver_id: payload.driver_id,
                estimated_arrival_secs,
            };
            // The claim stands even if notification fails; the event is dead-lettered.
            let _ = gateway::emit(&state, DispatchEvent::DriverAssigned(assigned), None).await;

            Ok(Json(ClaimResponse {
                assignment: record,
                estimated_arrival_secs,
            }))
        }
        ClaimOutcome::Conflict(record) => Err(DispatchError::Conflict(rejection(&record))),
        ClaimOutcome::Expired(record) => Err(DispatchError::Expired(rejection(&record))),
        ClaimOutcome::Cancelled(record) => Err(DispatchError::Cancelled(rejection(&record))),
        ClaimOutcome::NotFound(record) => Err(DispatchError::NotFound(rejection(&record))),
        ClaimOutcome::Ineligible(record) => Err(DispatchError::Ineligible(rejection(&record))),
    }
}

fn rejection(record: &AssignmentRecord) -> String {
    match record.reason {
        Some(reason) => format!("claim on order {} rejected: {reason}", record.order_id),
        None => format!("claim on order {} rejected", record.order_id),
    }
}
