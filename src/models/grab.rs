use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::driver::VehicleType;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum GrabStatus {
    PendingGrab,
    Assigned,
    Expired,
    Cancelled,
}

impl GrabStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, GrabStatus::PendingGrab)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrabbableOrder {
    pub order_id: Uuid,
    pub pickup: GeoPoint,
    pub dropoff: GeoPoint,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub vehicle_type: VehicleType,
    pub estimated_fare: f64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub status: GrabStatus,
    pub claimed_by: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
}

impl GrabbableOrder {
    /// Still claimable at `now`, independent of whether a sweep has run.
    pub fn is_open(&self, now: DateTime<Utc>) -> bool {
        self.status == GrabStatus::PendingGrab && self.expires_at > now
    }
}
