pub mod claims;
pub mod directory;
pub mod fare;
pub mod ledger;
pub mod location_index;
pub mod marketplace;
pub mod matching;
pub mod scoring;
pub mod sweeper;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::{Config, GrabPolicy, MarketplacePolicy, MatchingPolicy};
use crate::engine::claims::{ClaimState, OrderClaims};
use crate::engine::directory::DriverDirectory;
use crate::engine::ledger::AssignmentLedger;
use crate::engine::location_index::DriverLocationIndex;
use crate::engine::marketplace::GrabMarketplace;
use crate::engine::matching::MatchOutcome;
use crate::error::DispatchError;
use crate::models::assignment::FailureReason;
use crate::models::driver::{DriverRecord, DriverStatusUpdate};
use crate::models::event::{DriverAssigned, MatchFailed};
use crate::models::grab::{GrabStatus, GrabbableOrder};
use crate::models::order::MatchRequest;

/// The matching core: owns every component both claim paths share.
pub struct Dispatcher {
    pub index: DriverLocationIndex,
    pub directory: DriverDirectory,
    pub claims: OrderClaims,
    pub ledger: AssignmentLedger,
    pub marketplace: GrabMarketplace,
    pub matching_policy: MatchingPolicy,
    pub marketplace_policy: MarketplacePolicy,
}

/// What became of one ride request.
#[derive(Debug, Clone)]
pub enum RideResolution {
    Assigned(DriverAssigned),
    Listed(GrabbableOrder),
    Failed(MatchFailed),
    /// Redelivery for an order that is already assigned or cancelled.
    Duplicate,
}

#[derive(Debug, Clone, Serialize)]
pub struct CancelReport {
    pub order_id: Uuid,
    pub released_driver: Option<Uuid>,
    pub listing_status: Option<GrabStatus>,
    pub already_cancelled: bool,
}

pub fn eta_secs(distance_km: f64, avg_speed_kmh: f64) -> u64 {
    if avg_speed_kmh <= 0.0 {
        return 0;
    }
    (distance_km.max(0.0) / avg_speed_kmh * 3600.0).round() as u64
}

impl Dispatcher {
    pub fn new(config: &Config) -> Self {
        Self::with_policies(
            config.index_cell_deg,
            config.matching.clone(),
            config.marketplace.clone(),
        )
    }

    pub fn with_policies(
        index_cell_deg: f64,
        matching_policy: MatchingPolicy,
        marketplace_policy: MarketplacePolicy,
    ) -> Self {
        Self {
            index: DriverLocationIndex::new(index_cell_deg),
            directory: DriverDirectory::new(),
            claims: OrderClaims::new(),
            ledger: AssignmentLedger::new(),
            marketplace: GrabMarketplace::new(),
            matching_policy,
            marketplace_policy,
        }
    }

    /// Online, offline and location updates. Offline drivers leave the
    /// spatial index but keep their directory record.
    pub fn update_driver_status(
        &self,
        driver_id: Uuid,
        update: &DriverStatusUpdate,
    ) -> Result<DriverRecord, DispatchError> {
        let record = self.directory.update_status(driver_id, update)?;
        if record.online {
            self.index.upsert(driver_id, record.location, record.location_updated_at);
        } else {
            self.index.remove(driver_id);
        }
        Ok(record)
    }

    /// Called by the order side once a trip ends or a claim is abandoned.
    pub fn release_driver(&self, driver_id: Uuid) -> Result<DriverRecord, DispatchError> {
        let record = self.directory.release(driver_id)?;
        info!(driver_id = %driver_id, available = record.available, "driver released");
        Ok(record)
    }

    /// Terminal cancellation: later match and claim attempts observe
    /// `Cancelled`, the listing moves to `Cancelled` and a held driver is
    /// released.
    pub fn cancel_order(&self, order_id: Uuid) -> CancelReport {
        let now = Utc::now();
        let mut released_driver = None;
        let mut listing_status = None;
        let mut ran = false;

        self.claims.cancel(order_id, |previous| {
            ran = true;
            if let Some(ClaimState::Assigned { driver_id, .. }) = previous {
                if self.directory.release_if_committed(driver_id, order_id) {
                    released_driver = Some(driver_id);
                }
            }
            listing_status = self.marketplace.cancel(order_id, now);
        });

        if ran {
            info!(order_id = %order_id, released_driver = ?released_driver, "order cancelled");
        }

        CancelReport {
            order_id,
            released_driver,
            listing_status,
            already_cancelled: !ran,
        }
    }

    /// Auto-match and/or grab listing per the configured grab policy.
    pub fn dispatch(&self, request: &MatchRequest) -> RideResolution {
        if self.marketplace_policy.grab_policy == GrabPolicy::Always {
            return self.list_or_fail(request, FailureReason::NoDriversAvailable);
        }

        match self.match_request(request) {
            MatchOutcome::Assigned {
                record,
                estimated_arrival_secs,
            } => match record.driver_id {
                Some(driver_id) => RideResolution::Assigned(DriverAssigned {
                    order_id: request.order_id,
                    driver_id,
                    estimated_arrival_secs,
                }),
                None => RideResolution::Duplicate,
            },
            MatchOutcome::Conflict(_) | MatchOutcome::Cancelled(_) => RideResolution::Duplicate,
            MatchOutcome::NoCandidates(_) => self.fallback(request, FailureReason::NoDriversAvailable),
            MatchOutcome::NoSuitableCandidates(_) => {
                self.fallback(request, FailureReason::NoSuitableDrivers)
            }
        }
    }

    /// Second auto-match attempt for a listing that expired. Never re-lists.
    pub fn rematch(&self, request: &MatchRequest) -> RideResolution {
        match self.match_request(request) {
            MatchOutcome::Assigned {
                record,
                estimated_arrival_secs,
            } => match record.driver_id {
                Some(driver_id) => RideResolution::Assigned(DriverAssigned {
                    order_id: request.order_id,
                    driver_id,
                    estimated_arrival_secs,
                }),
                None => RideResolution::Duplicate,
            },
            MatchOutcome::Conflict(_) | MatchOutcome::Cancelled(_) => RideResolution::Duplicate,
            MatchOutcome::NoCandidates(_) | MatchOutcome::NoSuitableCandidates(_) => {
                RideResolution::Failed(MatchFailed {
                    order_id: request.order_id,
                    reason: FailureReason::OrderExpired,
                })
            }
        }
    }

    fn fallback(&self, request: &MatchRequest, reason: FailureReason) -> RideResolution {
        match self.marketplace_policy.grab_policy {
            GrabPolicy::Never => RideResolution::Failed(MatchFailed {
                order_id: request.order_id,
                reason,
            }),
            GrabPolicy::Fallback | GrabPolicy::Always => self.list_or_fail(request, reason),
        }
    }

    fn list_or_fail(&self, request: &MatchRequest, reason: FailureReason) -> RideResolution {
        match self.publish_for_grab(request) {
            Ok(order) => RideResolution::Listed(order),
            Err(DispatchError::Conflict(_)) | Err(DispatchError::Cancelled(_)) => {
                RideResolution::Duplicate
            }
            Err(err) => {
                warn!(order_id = %request.order_id, error = %err, "failed to list order for grab");
                RideResolution::Failed(MatchFailed {
                    order_id: request.order_id,
                    reason,
                })
            }
        }
    }
}
