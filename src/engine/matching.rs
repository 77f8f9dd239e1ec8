use chrono::Utc;
use tracing::{debug, info, warn};

use crate::engine::claims::ClaimState;
use crate::engine::scoring::{rank, Candidate};
use crate::engine::{eta_secs, Dispatcher};
use crate::models::assignment::{AssignmentRecord, FailureReason, Strategy};
use crate::models::driver::DriverRecord;
use crate::models::order::MatchRequest;

#[derive(Debug, Clone)]
pub enum MatchOutcome {
    Assigned {
        record: AssignmentRecord,
        estimated_arrival_secs: u64,
    },
    /// The radius query found nobody.
    NoCandidates(AssignmentRecord),
    /// Drivers were nearby but none was eligible or every claim was lost.
    NoSuitableCandidates(AssignmentRecord),
    /// The order was already claimed, e.g. a redelivered event.
    Conflict(AssignmentRecord),
    Cancelled(AssignmentRecord),
}

impl MatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            MatchOutcome::Assigned { .. } => "assigned",
            MatchOutcome::NoCandidates(_) => "no_candidates",
            MatchOutcome::NoSuitableCandidates(_) => "no_suitable_candidates",
            MatchOutcome::Conflict(_) => "conflict",
            MatchOutcome::Cancelled(_) => "cancelled",
        }
    }

    pub fn record(&self) -> &AssignmentRecord {
        match self {
            MatchOutcome::Assigned { record, .. }
            | MatchOutcome::NoCandidates(record)
            | MatchOutcome::NoSuitableCandidates(record)
            | MatchOutcome::Conflict(record)
            | MatchOutcome::Cancelled(record) => record,
        }
    }
}

impl Dispatcher {
    /// Auto-assign one ride: radius query, filter, rank, then claim the best
    /// candidate that can still be claimed. Bounded: one index query and at
    /// most one CAS per ranked candidate.
    pub fn match_request(&self, request: &MatchRequest) -> MatchOutcome {
        let now = Utc::now();
        let order_id = request.order_id;
        let policy = &self.matching_policy;
        let failure = |reason: FailureReason| {
            self.ledger.record_failure(AssignmentRecord::failure(
                order_id,
                None,
                Strategy::Auto,
                reason,
            ))
        };

        if let Some(state) = self.claims.get(order_id) {
            return rejected_by_claim(state, failure);
        }

        let nearby = self
            .index
            .query_radius(&request.pickup, policy.max_radius_km, policy.fetch_limit());
        if nearby.is_empty() {
            info!(order_id = %order_id, radius_km = policy.max_radius_km, "no drivers in range");
            return MatchOutcome::NoCandidates(failure(FailureReason::NoDriversAvailable));
        }

        let mut candidates: Vec<Candidate> = nearby
            .iter()
            .filter_map(|(driver_id, distance_km)| {
                let driver = self.directory.get(*driver_id).ok()?;
                is_eligible(&driver, request, now, policy.stale_after).then(|| {
                    Candidate::new(
                        driver.id,
                        driver.version,
                        *distance_km,
                        driver.rating,
                        request.preferred_driver_id == Some(driver.id),
                        policy,
                    )
                })
            })
            .collect();
        rank(&mut candidates);
        candidates.truncate(policy.candidate_limit.max(1));

        if candidates.is_empty() {
            info!(order_id = %order_id, nearby = nearby.len(), "no suitable drivers");
            return MatchOutcome::NoSuitableCandidates(failure(FailureReason::NoSuitableDrivers));
        }

        let pending = match self.claims.begin(order_id) {
            Ok(pending) => pending,
            Err(state) => return rejected_by_claim(state, failure),
        };

        for candidate in &candidates {
            if let Err(rejection) =
                self.directory
                    .try_claim(candidate.driver_id, candidate.version, order_id)
            {
                debug!(
                    order_id = %order_id,
                    driver_id = %candidate.driver_id,
                    rejection = ?rejection,
                    "candidate lost, trying next"
                );
                continue;
            }

            let record = AssignmentRecord::success(
                order_id,
                candidate.driver_id,
                Strategy::Auto,
                Some((candidate.score, candidate.breakdown.clone())),
            );
            match self.ledger.record_success(record) {
                Ok(record) => {
                    self.marketplace.mark_assigned(order_id, candidate.driver_id, now);
                    pending.commit(candidate.driver_id, Strategy::Auto);
                    info!(
                        order_id = %order_id,
                        driver_id = %candidate.driver_id,
                        score = candidate.score,
                        distance_km = candidate.distance_km,
                        "order assigned"
                    );
                    return MatchOutcome::Assigned {
                        record,
                        estimated_arrival_secs: eta_secs(candidate.distance_km, policy.avg_speed_kmh),
                    };
                }
                Err(err) => {
                    self.directory.release_if_committed(candidate.driver_id, order_id);
                    warn!(order_id = %order_id, driver_id = %candidate.driver_id, error = %err, "rolled back auto claim");
                    return MatchOutcome::Conflict(failure(FailureReason::OrderAlreadyClaimed));
                }
            }
        }

        drop(pending);
        info!(order_id = %order_id, candidates = candidates.len(), "every candidate was claimed elsewhere");
        MatchOutcome::NoSuitableCandidates(failure(FailureReason::NoSuitableDrivers))
    }
}

fn rejected_by_claim<F>(state: ClaimState, failure: F) -> MatchOutcome
where
    F: Fn(FailureReason) -> AssignmentRecord,
{
    match state {
        ClaimState::Assigned { driver_id, .. } => {
            debug!(driver_id = %driver_id, "order already assigned");
            MatchOutcome::Conflict(failure(FailureReason::OrderAlreadyClaimed))
        }
        ClaimState::Cancelled { .. } => MatchOutcome::Cancelled(failure(FailureReason::OrderCancelled)),
    }
}

fn is_eligible(
    driver: &DriverRecord,
    request: &MatchRequest,
    now: chrono::DateTime<Utc>,
    stale_after: chrono::Duration,
) -> bool {
    driver.available
        && driver.ineligibility(request.vehicle_type).is_none()
        && !driver.is_stale(now, stale_after)
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::MatchOutcome;
    use crate::engine::test_support::{dispatcher, driver_online, north_of, ride, BERLIN};
    use crate::models::assignment::{AssignmentRecord, FailureReason, Strategy};
    use crate::models::driver::{DriverStatusUpdate, VehicleType};
    use crate::models::grab::GrabStatus;

    #[test]
    fn assigns_nearest_eligible_driver() {
        let dispatcher = dispatcher();
        driver_online(&dispatcher, Uuid::from_u128(1), north_of(BERLIN, 3.0), VehicleType::Economy, 4.5);
        driver_online(&dispatcher, Uuid::from_u128(2), north_of(BERLIN, 0.5), VehicleType::Economy, 4.5);
        driver_online(&dispatcher, Uuid::from_u128(3), north_of(BERLIN, 0.1), VehicleType::Premium, 5.0);

        let outcome = dispatcher.match_request(&ride(100, BERLIN, VehicleType::Economy));
        let MatchOutcome::Assigned { record, estimated_arrival_secs } = outcome else {
            panic!("expected an assignment");
        };
        assert_eq!(record.driver_id, Some(Uuid::from_u128(2)));
        assert_eq!(record.strategy, Strategy::Auto);
        assert!(record.score.is_some());
        assert_eq!(estimated_arrival_secs, 60);
        assert!(!dispatcher.directory.get(Uuid::from_u128(2)).unwrap().available);
    }

    #[test]
    fn empty_radius_reports_no_drivers_available() {
        let dispatcher = dispatcher();
        driver_online(&dispatcher, Uuid::from_u128(1), north_of(BERLIN, 25.0), VehicleType::Economy, 4.5);

        let outcome = dispatcher.match_request(&ride(100, BERLIN, VehicleType::Economy));
        assert!(matches!(outcome, MatchOutcome::NoCandidates(_)));
        assert_eq!(outcome.record().reason, Some(FailureReason::NoDriversAvailable));
    }

    #[test]
    fn filtered_candidates_report_no_suitable_drivers() {
        let dispatcher = dispatcher();
        driver_online(&dispatcher, Uuid::from_u128(1), north_of(BERLIN, 1.0), VehicleType::Premium, 4.5);

        let stale = Uuid::from_u128(2);
        dispatcher
            .update_driver_status(
                stale,
                &DriverStatusUpdate {
                    available: true,
                    location: Some(north_of(BERLIN, 0.5)),
                    vehicle_type: Some(VehicleType::Economy),
                    timestamp: Some(Utc::now() - Duration::minutes(10)),
                    ..Default::default()
                },
            )
            .unwrap();

        let full = Uuid::from_u128(3);
        dispatcher
            .update_driver_status(
                full,
                &DriverStatusUpdate {
                    available: true,
                    location: Some(north_of(BERLIN, 0.7)),
                    vehicle_type: Some(VehicleType::Economy),
                    current_passengers: Some(3),
                    carpool_capacity: Some(3),
                    ..Default::default()
                },
            )
            .unwrap();

        let outcome = dispatcher.match_request(&ride(100, BERLIN, VehicleType::Economy));
        assert!(matches!(outcome, MatchOutcome::NoSuitableCandidates(_)));
        assert_eq!(outcome.record().reason, Some(FailureReason::NoSuitableDrivers));
        assert!(dispatcher.directory.get(stale).unwrap().available);
    }

    #[test]
    fn heartbeat_without_location_does_not_refresh_a_stale_fix() {
        let dispatcher = dispatcher();
        let driver = Uuid::from_u128(1);
        dispatcher
            .update_driver_status(
                driver,
                &DriverStatusUpdate {
                    available: true,
                    location: Some(north_of(BERLIN, 0.5)),
                    vehicle_type: Some(VehicleType::Economy),
                    timestamp: Some(Utc::now() - Duration::hours(2)),
                    ..Default::default()
                },
            )
            .unwrap();
        dispatcher
            .update_driver_status(
                driver,
                &DriverStatusUpdate {
                    available: true,
                    ..Default::default()
                },
            )
            .unwrap();

        let outcome = dispatcher.match_request(&ride(100, BERLIN, VehicleType::Economy));
        assert!(matches!(outcome, MatchOutcome::NoSuitableCandidates(_)));
        assert!(dispatcher.directory.get(driver).unwrap().available);
    }

    #[test]
    fn refused_ledger_write_releases_the_claimed_driver() {
        let dispatcher = dispatcher();
        let driver = Uuid::from_u128(1);
        driver_online(&dispatcher, driver, BERLIN, VehicleType::Economy, 4.5);
        let request = ride(100, BERLIN, VehicleType::Economy);
        dispatcher
            .ledger
            .record_success(AssignmentRecord::success(
                request.order_id,
                Uuid::from_u128(9),
                Strategy::Grab,
                None,
            ))
            .unwrap();

        let outcome = dispatcher.match_request(&request);
        assert!(matches!(outcome, MatchOutcome::Conflict(_)));
        let after = dispatcher.directory.get(driver).unwrap();
        assert!(after.available);
        assert_eq!(after.active_order, None);
        assert!(dispatcher.claims.get(request.order_id).is_none());
    }

    #[test]
    fn redelivered_request_does_not_double_assign() {
        let dispatcher = dispatcher();
        driver_online(&dispatcher, Uuid::from_u128(1), BERLIN, VehicleType::Economy, 4.5);
        driver_online(&dispatcher, Uuid::from_u128(2), BERLIN, VehicleType::Economy, 4.5);
        let request = ride(100, BERLIN, VehicleType::Economy);

        assert!(matches!(dispatcher.match_request(&request), MatchOutcome::Assigned { .. }));
        let again = dispatcher.match_request(&request);
        assert!(matches!(again, MatchOutcome::Conflict(_)));

        let successes = dispatcher
            .ledger
            .attempts_for(request.order_id)
            .into_iter()
            .filter(|record| record.is_success())
            .count();
        assert_eq!(successes, 1);
        assert!(dispatcher.directory.get(Uuid::from_u128(2)).unwrap().available);
    }

    #[test]
    fn busy_driver_is_skipped_for_the_next_order() {
        let dispatcher = dispatcher();
        let nearest = Uuid::from_u128(1);
        let backup = Uuid::from_u128(2);
        driver_online(&dispatcher, nearest, north_of(BERLIN, 0.2), VehicleType::Economy, 4.5);
        driver_online(&dispatcher, backup, north_of(BERLIN, 2.0), VehicleType::Economy, 4.5);

        let first = dispatcher.match_request(&ride(100, BERLIN, VehicleType::Economy));
        let second = dispatcher.match_request(&ride(101, BERLIN, VehicleType::Economy));
        assert_eq!(first.record().driver_id, Some(nearest));
        assert_eq!(second.record().driver_id, Some(backup));

        let third = dispatcher.match_request(&ride(102, BERLIN, VehicleType::Economy));
        assert!(matches!(third, MatchOutcome::NoSuitableCandidates(_)));
    }

    #[test]
    fn preferred_driver_is_chosen_when_eligible() {
        let dispatcher = dispatcher();
        let preferred = Uuid::from_u128(9);
        driver_online(&dispatcher, Uuid::from_u128(1), north_of(BERLIN, 0.2), VehicleType::Economy, 5.0);
        driver_online(&dispatcher, preferred, north_of(BERLIN, 4.0), VehicleType::Economy, 3.0);

        let mut request = ride(100, BERLIN, VehicleType::Economy);
        request.preferred_driver_id = Some(preferred);
        let outcome = dispatcher.match_request(&request);
        assert_eq!(outcome.record().driver_id, Some(preferred));
    }

    #[test]
    fn auto_match_closes_an_open_grab_listing() {
        let dispatcher = dispatcher();
        let request = ride(100, BERLIN, VehicleType::Economy);
        dispatcher.publish_for_grab(&request).unwrap();
        driver_online(&dispatcher, Uuid::from_u128(1), BERLIN, VehicleType::Economy, 4.5);

        assert!(matches!(dispatcher.match_request(&request), MatchOutcome::Assigned { .. }));
        let listing = dispatcher.marketplace.get(request.order_id).unwrap();
        assert_eq!(listing.status, GrabStatus::Assigned);
        assert_eq!(listing.claimed_by, Some(Uuid::from_u128(1)));
    }

    #[test]
    fn cancelled_order_is_not_matched() {
        let dispatcher = dispatcher();
        driver_online(&dispatcher, Uuid::from_u128(1), BERLIN, VehicleType::Economy, 4.5);
        let request = ride(100, BERLIN, VehicleType::Economy);
        dispatcher.cancel_order(request.order_id);

        assert!(matches!(dispatcher.match_request(&request), MatchOutcome::Cancelled(_)));
        assert!(dispatcher.directory.get(Uuid::from_u128(1)).unwrap().available);
    }
}
