use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Strategy {
    Auto,
    Grab,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FailureReason {
    NoDriversAvailable,
    NoSuitableDrivers,
    OrderAlreadyClaimed,
    OrderCancelled,
    OrderExpired,
    OrderNotFound,
    DriverNotFound,
    DriverUnavailable,
    VehicleMismatch,
    NoFreeSeat,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::NoDriversAvailable => "NO_DRIVERS_AVAILABLE",
            FailureReason::NoSuitableDrivers => "NO_SUITABLE_DRIVERS",
            FailureReason::OrderAlreadyClaimed => "ORDER_ALREADY_CLAIMED",
            FailureReason::OrderCancelled => "ORDER_CANCELLED",
            FailureReason::OrderExpired => "ORDER_EXPIRED",
            FailureReason::OrderNotFound => "ORDER_NOT_FOUND",
            FailureReason::DriverNotFound => "DRIVER_NOT_FOUND",
            FailureReason::DriverUnavailable => "DRIVER_UNAVAILABLE",
            FailureReason::VehicleMismatch => "VEHICLE_MISMATCH",
            FailureReason::NoFreeSeat => "NO_FREE_SEAT",
        }
    }
}

impl std::fmt::Display for FailureReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub distance_km: f64,
    pub normalized_distance: f64,
    pub normalized_rating: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignmentRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub driver_id: Option<Uuid>,
    pub strategy: Strategy,
    pub outcome: Outcome,
    pub reason: Option<FailureReason>,
    pub score: Option<f64>,
    pub score_breakdown: Option<ScoreBreakdown>,
    pub matched_at: DateTime<Utc>,
}

impl AssignmentRecord {
    pub fn success(
        order_id: Uuid,
        driver_id: Uuid,
        strategy: Strategy,
        score: Option<(f64, ScoreBreakdown)>,
    ) -> Self {
        let (score, score_breakdown) = match score {
            Some((score, breakdown)) => (Some(score), Some(breakdown)),
            None => (None, None),
        };

        Self {
            id: Uuid::new_v4(),
            order_id,
            driver_id: Some(driver_id),
            strategy,
            outcome: Outcome::Success,
            reason: None,
            score,
            score_breakdown,
            matched_at: Utc::now(),
        }
    }

    pub fn failure(
        order_id: Uuid,
        driver_id: Option<Uuid>,
        strategy: Strategy,
        reason: FailureReason,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            driver_id,
            strategy,
            outcome: Outcome::Failure,
            reason: Some(reason),
            score: None,
            score_breakdown: None,
            matched_at: Utc::now(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }
}
