use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::driver::VehicleType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ServiceType {
    Normal,
    Express,
    Carpool,
}

/// A single ride to be matched. Built per incoming event and never persisted here.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchRequest {
    pub order_id: Uuid,
    pub requester_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    #[serde(default)]
    pub pickup_address: Option<String>,
    #[serde(default)]
    pub dropoff_address: Option<String>,
    pub vehicle_type: VehicleType,
    pub service_type: ServiceType,
    #[serde(default)]
    pub scheduled_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub preferred_driver_id: Option<Uuid>,
    #[serde(default)]
    pub estimated_fare: Option<f64>,
}
