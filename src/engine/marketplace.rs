use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::engine::claims::ClaimState;
use crate::engine::directory::ClaimRejection;
use crate::engine::fare::estimate_fare;
use crate::engine::{eta_secs, Dispatcher};
use crate::error::DispatchError;
use crate::geo::{haversine_km, GeoPoint};
use crate::models::assignment::{AssignmentRecord, FailureReason, Strategy};
use crate::models::driver::VehicleType;
use crate::models::grab::{GrabStatus, GrabbableOrder};
use crate::models::order::MatchRequest;

const DRIVER_VERSION_RETRIES: usize = 3;

struct Listing {
    order: GrabbableOrder,
    request: MatchRequest,
}

/// Optional narrowing for `list_available`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GrabFilter {
    pub vehicle_type: Option<VehicleType>,
    pub near: Option<GeoPoint>,
    pub radius_km: Option<f64>,
}

/// An expired listing handed back by the sweep, with the request it came from.
#[derive(Debug, Clone)]
pub struct ExpiredListing {
    pub order: GrabbableOrder,
    pub request: MatchRequest,
}

/// Orders exposed to the driver pool for driver-initiated claiming.
#[derive(Default)]
pub struct GrabMarketplace {
    listings: DashMap<Uuid, Listing>,
}

impl GrabMarketplace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(
        &self,
        request: &MatchRequest,
        estimated_fare: f64,
        expires_at: DateTime<Utc>,
    ) -> Result<GrabbableOrder, DispatchError> {
        let now = Utc::now();
        let mut listing = self.listings.entry(request.order_id).or_insert_with(|| Listing {
            order: GrabbableOrder {
                order_id: request.order_id,
                pickup: request.pickup,
                dropoff: request.dropoff,
                pickup_address: request.pickup_address.clone(),
                dropoff_address: request.dropoff_address.clone(),
                vehicle_type: request.vehicle_type,
                estimated_fare,
                created_at: now,
                expires_at,
                status: GrabStatus::PendingGrab,
                claimed_by: None,
                updated_at: now,
            },
            request: request.clone(),
        });

        match listing.order.status {
            GrabStatus::PendingGrab => {
                if expires_at > listing.order.expires_at {
                    listing.order.expires_at = expires_at;
                    listing.order.updated_at = now;
                }
                Ok(listing.order.clone())
            }
            status => Err(DispatchError::Conflict(format!(
                "order {} is already {status:?}",
                request.order_id
            ))),
        }
    }

    pub fn get(&self, order_id: Uuid) -> Option<GrabbableOrder> {
        self.listings.get(&order_id).map(|entry| entry.order.clone())
    }

    /// Snapshot of claimable listings. Nearest first when `near` is given,
    /// otherwise oldest first; ties by order id.
    pub fn list_available(&self, filter: &GrabFilter, now: DateTime<Utc>) -> Vec<GrabbableOrder> {
        let mut open: Vec<(f64, GrabbableOrder)> = self
            .listings
            .iter()
            .filter(|entry| entry.order.is_open(now))
            .filter(|entry| {
                filter
                    .vehicle_type
                    .is_none_or(|vehicle_type| entry.order.vehicle_type == vehicle_type)
            })
            .filter_map(|entry| {
                let distance_km = filter
                    .near
                    .map(|near| haversine_km(&near, &entry.order.pickup))
                    .unwrap_or(0.0);
                let in_range = filter
                    .radius_km
                    .is_none_or(|radius_km| filter.near.is_none() || distance_km <= radius_km);
                in_range.then(|| (distance_km, entry.order.clone()))
            })
            .collect();

        open.sort_by(|(da, a), (db, b)| {
            da.total_cmp(db)
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.order_id.cmp(&b.order_id))
        });
        open.into_iter().map(|(_, order)| order).collect()
    }

    pub fn open_count(&self, now: DateTime<Utc>) -> usize {
        self.listings
            .iter()
            .filter(|entry| entry.order.is_open(now))
            .count()
    }

    pub fn len(&self) -> usize {
        self.listings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listings.is_empty()
    }

    /// Auto-match won the order while it was listed.
    pub(crate) fn mark_assigned(&self, order_id: Uuid, driver_id: Uuid, now: DateTime<Utc>) {
        if let Some(mut listing) = self.listings.get_mut(&order_id) {
            if listing.order.status == GrabStatus::PendingGrab {
                listing.order.status = GrabStatus::Assigned;
                listing.order.claimed_by = Some(driver_id);
                listing.order.updated_at = now;
            }
        }
    }

    pub(crate) fn cancel(&self, order_id: Uuid, now: DateTime<Utc>) -> Option<GrabStatus> {
        let mut listing = self.listings.get_mut(&order_id)?;
        let previous = listing.order.status;
        if matches!(previous, GrabStatus::PendingGrab | GrabStatus::Assigned) {
            listing.order.status = GrabStatus::Cancelled;
            listing.order.updated_at = now;
        }
        Some(previous)
    }

    /// PENDING_GRAB listings past their expiry become EXPIRED.
    pub fn expire_due(&self, now: DateTime<Utc>) -> Vec<ExpiredListing> {
        let mut expired = Vec::new();
        for mut entry in self.listings.iter_mut() {
            if entry.order.status == GrabStatus::PendingGrab && entry.order.expires_at <= now {
                entry.order.status = GrabStatus::Expired;
                entry.order.updated_at = now;
                expired.push(ExpiredListing {
                    order: entry.order.clone(),
                    request: entry.request.clone(),
                });
            }
        }
        expired
    }

    /// Drops terminal listings that have been terminal for longer than `retention`.
    pub fn purge_terminal(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.listings.len();
        self.listings.retain(|_, listing| {
            !(listing.order.status.is_terminal() && now - listing.order.updated_at > retention)
        });
        before.saturating_sub(self.listings.len())
    }
}

#[derive(Debug, Clone)]
pub enum ClaimOutcome {
    Claimed {
        record: AssignmentRecord,
        estimated_arrival_secs: u64,
    },
    Conflict(AssignmentRecord),
    Expired(AssignmentRecord),
    NotFound(AssignmentRecord),
    Cancelled(AssignmentRecord),
    Ineligible(AssignmentRecord),
}

impl ClaimOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            ClaimOutcome::Claimed { .. } => "claimed",
            ClaimOutcome::Conflict(_) => "conflict",
            ClaimOutcome::Expired(_) => "expired",
            ClaimOutcome::NotFound(_) => "not_found",
            ClaimOutcome::Cancelled(_) => "cancelled",
            ClaimOutcome::Ineligible(_) => "ineligible",
        }
    }

    pub fn record(&self) -> &AssignmentRecord {
        match self {
            ClaimOutcome::Claimed { record, .. }
            | ClaimOutcome::Conflict(record)
            | ClaimOutcome::Expired(record)
            | ClaimOutcome::NotFound(record)
            | ClaimOutcome::Cancelled(record)
            | ClaimOutcome::Ineligible(record) => record,
        }
    }
}

impl Dispatcher {
    /// List `request` in the grab pool with the configured lifetime.
    pub fn publish_for_grab(&self, request: &MatchRequest) -> Result<GrabbableOrder, DispatchError> {
        let expires_at = Utc::now() + self.marketplace_policy.grab_ttl;
        self.publish_for_grab_until(request, expires_at)
    }

    pub fn publish_for_grab_until(
        &self,
        request: &MatchRequest,
        expires_at: DateTime<Utc>,
    ) -> Result<GrabbableOrder, DispatchError> {
        // Held across the insert so a concurrent auto-match cannot commit in between.
        let _pending = match self.claims.begin(request.order_id) {
            Ok(pending) => pending,
            Err(ClaimState::Assigned { .. }) => {
                return Err(DispatchError::Conflict(format!(
                    "order {} is already assigned",
                    request.order_id
                )));
            }
            Err(ClaimState::Cancelled { .. }) => {
                return Err(DispatchError::Cancelled(format!(
                    "order {} was cancelled",
                    request.order_id
                )));
            }
        };

        let fare = estimate_fare(request, &self.marketplace_policy);
        let order = self.marketplace.publish(request, fare, expires_at)?;
        info!(
            order_id = %order.order_id,
            expires_at = %order.expires_at,
            fare = order.estimated_fare,
            "order listed for grab"
        );
        Ok(order)
    }

    /// Driver-initiated claim. Order claim, listing transition, driver CAS and
    /// ledger write happen while the order is exclusively held; any partial
    /// success is rolled back before returning.
    pub fn claim_order(&self, order_id: Uuid, driver_id: Uuid) -> ClaimOutcome {
        let now = Utc::now();
        let reject = |reason: FailureReason| {
            self.ledger.record_failure(AssignmentRecord::failure(
                order_id,
                Some(driver_id),
                Strategy::Grab,
                reason,
            ))
        };

        let pending = match self.claims.begin(order_id) {
            Ok(pending) => pending,
            Err(ClaimState::Assigned { .. }) => {
                return ClaimOutcome::Conflict(reject(FailureReason::OrderAlreadyClaimed));
            }
            Err(ClaimState::Cancelled { .. }) => {
                return ClaimOutcome::Cancelled(reject(FailureReason::OrderCancelled));
            }
        };

        let Some(mut listing) = self.marketplace.listings.get_mut(&order_id) else {
            return ClaimOutcome::NotFound(reject(FailureReason::OrderNotFound));
        };

        match listing.order.status {
            GrabStatus::PendingGrab if listing.order.expires_at > now => {}
            GrabStatus::PendingGrab | GrabStatus::Expired => {
                return ClaimOutcome::Expired(reject(FailureReason::OrderExpired));
            }
            GrabStatus::Assigned => {
                return ClaimOutcome::Conflict(reject(FailureReason::OrderAlreadyClaimed));
            }
            GrabStatus::Cancelled => {
                return ClaimOutcome::Cancelled(reject(FailureReason::OrderCancelled));
            }
        }

        let mut claimed_driver = None;
        for _ in 0..DRIVER_VERSION_RETRIES {
            let driver = match self.directory.get(driver_id) {
                Ok(driver) => driver,
                Err(_) => return ClaimOutcome::NotFound(reject(FailureReason::DriverNotFound)),
            };
            if let Some(reason) = driver.ineligibility(listing.order.vehicle_type) {
                return ClaimOutcome::Ineligible(reject(reason));
            }

            match self.directory.try_claim(driver_id, driver.version, order_id) {
                Ok(_) => {
                    claimed_driver = Some(driver);
                    break;
                }
                Err(ClaimRejection::VersionMismatch { .. }) => continue,
                Err(ClaimRejection::NotFound) => {
                    return ClaimOutcome::NotFound(reject(FailureReason::DriverNotFound));
                }
                Err(ClaimRejection::Unavailable) => {
                    return ClaimOutcome::Conflict(reject(FailureReason::DriverUnavailable));
                }
            }
        }
        let Some(driver) = claimed_driver else {
            return ClaimOutcome::Conflict(reject(FailureReason::DriverUnavailable));
        };

        let record = match self.ledger.record_success(AssignmentRecord::success(
            order_id,
            driver_id,
            Strategy::Grab,
            None,
        )) {
            Ok(record) => record,
            Err(err) => {
                self.directory.release_if_committed(driver_id, order_id);
                warn!(order_id = %order_id, driver_id = %driver_id, error = %err, "rolled back grab claim");
                return ClaimOutcome::Conflict(reject(FailureReason::OrderAlreadyClaimed));
            }
        };

        listing.order.status = GrabStatus::Assigned;
        listing.order.claimed_by = Some(driver_id);
        listing.order.updated_at = now;
        let pickup = listing.order.pickup;
        drop(listing);
        pending.commit(driver_id, Strategy::Grab);

        let distance_km = haversine_km(&driver.location, &pickup);
        debug!(order_id = %order_id, driver_id = %driver_id, distance_km, "grab claim won");
        info!(order_id = %order_id, driver_id = %driver_id, "order grabbed");

        ClaimOutcome::Claimed {
            record,
            estimated_arrival_secs: eta_secs(distance_km, self.matching_policy.avg_speed_kmh),
        }
    }
}
