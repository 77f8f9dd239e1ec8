use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::GeoPoint;
use crate::models::assignment::FailureReason;
use crate::models::driver::{DriverStatusUpdate, VehicleType};
use crate::models::order::{MatchRequest, ServiceType};

pub const TOPIC_RIDE_REQUESTED: &str = "ride.requested";
pub const TOPIC_RIDE_CANCELLED: &str = "ride.cancelled";
pub const TOPIC_DRIVER_STATUS: &str = "driver.status";
pub const TOPIC_DRIVER_ASSIGNED: &str = "dispatch.driver_assigned";
pub const TOPIC_MATCH_FAILED: &str = "dispatch.match_failed";
pub const TOPIC_DEAD_LETTER: &str = "dispatch.dead_letter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideRequested {
    pub order_id: Uuid,
    pub passenger_id: Uuid,
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

impl From<RideRequested> for MatchRequest {
    fn from(event: RideRequested) -> Self {
        MatchRequest {
            order_id: event.order_id,
            requester_id: event.passenger_id,
            pickup: event.pickup,
            dropoff: event.dropoff,
            pickup_address: event.pickup_address,
            dropoff_address: event.dropoff_address,
            vehicle_type: event.vehicle_type,
            service_type: event.service_type,
            scheduled_at: event.scheduled_at,
            preferred_driver_id: event.preferred_driver_id,
            estimated_fare: event.estimated_fare,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RideCancelled {
    pub order_id: Uuid,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriverStatusChanged {
    pub driver_id: Uuid,
    #[serde(flatten)]
    pub update: DriverStatusUpdate,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DriverAssigned {
    pub order_id: Uuid,
    pub driver_id: Uuid,
    pub estimated_arrival_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchFailed {
    pub order_id: Uuid,
    pub reason: FailureReason,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetter {
    pub id: Uuid,
    /// The event that could not be delivered.
    pub event: Box<DispatchEvent>,
    /// The inbound event that produced it, when there was one.
    pub source: Option<Box<DispatchEvent>>,
    pub error: String,
    pub attempts: u32,
    pub dead_lettered_at: DateTime<Utc>,
}

/// Envelope carried on every bus topic.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DispatchEvent {
    RideRequested(RideRequested),
    RideCancelled(RideCancelled),
    DriverStatusChanged(DriverStatusChanged),
    DriverAssigned(DriverAssigned),
    MatchFailed(MatchFailed),
    DeadLettered(DeadLetter),
}

impl DispatchEvent {
    pub fn topic(&self) -> &'static str {
        match self {
            DispatchEvent::RideRequested(_) => TOPIC_RIDE_REQUESTED,
            DispatchEvent::RideCancelled(_) => TOPIC_RIDE_CANCELLED,
            DispatchEvent::DriverStatusChanged(_) => TOPIC_DRIVER_STATUS,
            DispatchEvent::DriverAssigned(_) => TOPIC_DRIVER_ASSIGNED,
            DispatchEvent::MatchFailed(_) => TOPIC_MATCH_FAILED,
            DispatchEvent::DeadLettered(_) => TOPIC_DEAD_LETTER,
        }
    }
}
