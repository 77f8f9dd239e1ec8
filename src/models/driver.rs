use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::assignment::FailureReason;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum VehicleType {
    Economy,
    Standard,
    Premium,
    Van,
}

impl VehicleType {
    /// Fare multiplier relative to economy.
    pub fn fare_multiplier(&self) -> f64 {
        match self {
            VehicleType::Economy => 1.0,
            VehicleType::Standard => 1.25,
            VehicleType::Premium => 1.8,
            VehicleType::Van => 1.5,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverRecord {
    pub id: Uuid,
    pub location: GeoPoint,
    /// Driver is online, i.e. has not signed off.
    pub online: bool,
    /// Online and not committed to an order. The only flag `try_claim` checks.
    pub available: bool,
    pub vehicle_type: VehicleType,
    pub rating: f64,
    pub current_passengers: u8,
    pub carpool_capacity: u8,
    pub active_order: Option<Uuid>,
    pub updated_at: DateTime<Utc>,
    /// Observation time of `location`. Heartbeats without a fix leave it alone.
    pub location_updated_at: DateTime<Utc>,
    pub version: u64,
}

impl DriverRecord {
    pub fn has_free_seat(&self) -> bool {
        self.current_passengers < self.carpool_capacity
    }

    /// Shared by auto-match and grab: why this driver cannot carry a ride of
    /// `vehicle_type`, regardless of availability.
    pub fn ineligibility(&self, vehicle_type: VehicleType) -> Option<FailureReason> {
        if self.vehicle_type != vehicle_type {
            return Some(FailureReason::VehicleMismatch);
        }
        if !self.has_free_seat() {
            return Some(FailureReason::NoFreeSeat);
        }
        None
    }

    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
        now.signed_duration_since(self.location_updated_at) > stale_after
    }
}

/// Partial update delivered by the fleet collaborator or a driver client.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DriverStatusUpdate {
    pub available: bool,
    #[serde(default)]
    pub location: Option<GeoPoint>,
    #[serde(default)]
    pub vehicle_type: Option<VehicleType>,
    #[serde(default)]
    pub rating: Option<f64>,
    #[serde(default)]
    pub current_passengers: Option<u8>,
    #[serde(default)]
    pub carpool_capacity: Option<u8>,
    /// Time the location was observed; defaults to receipt time.
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
}
