use std::sync::{Arc, Barrier};
use std::thread;

use chrono::Utc;
use ride_dispatch::config::Config;
use ride_dispatch::engine::marketplace::ClaimOutcome;
use ride_dispatch::engine::matching::MatchOutcome;
use ride_dispatch::engine::Dispatcher;
use ride_dispatch::geo::GeoPoint;
use ride_dispatch::models::driver::{DriverStatusUpdate, VehicleType};
use ride_dispatch::models::order::{MatchRequest, ServiceType};
use uuid::Uuid;

const BERLIN: GeoPoint = GeoPoint {
    lat: 52.52,
    lng: 13.405,
};
const KM_PER_DEG: f64 = 111.195;

fn north_of(km: f64) -> GeoPoint {
    GeoPoint::new(BERLIN.lat + km / KM_PER_DEG, BERLIN.lng)
}

fn online(dispatcher: &Dispatcher, driver_id: Uuid, location: GeoPoint) {
    dispatcher
        .update_driver_status(
            driver_id,
            &DriverStatusUpdate {
                available: true,
                location: Some(location),
                vehicle_type: Some(VehicleType::Economy),
                rating: Some(4.5),
                timestamp: Some(Utc::now()),
                ..Default::default()
            },
        )
        .unwrap();
}

fn ride(order_id: Uuid) -> MatchRequest {
    MatchRequest {
        order_id,
        requester_id: Uuid::new_v4(),
        pickup: BERLIN,
        dropoff: north_of(3.0),
        pickup_address: None,
        dropoff_address: None,
        vehicle_type: VehicleType::Economy,
        service_type: ServiceType::Normal,
        scheduled_at: None,
        preferred_driver_id: None,
        estimated_fare: None,
    }
}

#[test]
fn fifty_grabs_and_an_auto_match_yield_one_assignment() {
    for _ in 0..20 {
        let dispatcher = Arc::new(Dispatcher::new(&Config::default()));
        let order_id = Uuid::new_v4();
        let request = ride(order_id);
        dispatcher.publish_for_grab(&request).unwrap();

        let nearby = Uuid::new_v4();
        online(&dispatcher, nearby, north_of(0.5));
        let grabbers: Vec<Uuid> = (0..50).map(|_| Uuid::new_v4()).collect();
        for (i, driver_id) in grabbers.iter().enumerate() {
            online(&dispatcher, *driver_id, north_of(1.0 + i as f64 * 0.05));
        }

        let barrier = Barrier::new(grabbers.len() + 1);
        let (claims, matched) = thread::scope(|scope| {
            let claim_handles: Vec<_> = grabbers
                .iter()
                .map(|driver_id| {
                    let dispatcher = &dispatcher;
                    let barrier = &barrier;
                    scope.spawn(move || {
                        barrier.wait();
                        dispatcher.claim_order(order_id, *driver_id)
                    })
                })
                .collect();
            let match_handle = scope.spawn(|| {
                barrier.wait();
                dispatcher.match_request(&request)
            });

            let claims: Vec<ClaimOutcome> = claim_handles
                .into_iter()
                .map(|handle| handle.join().unwrap())
                .collect();
            (claims, match_handle.join().unwrap())
        });

        let claimed = claims
            .iter()
            .filter(|outcome| matches!(outcome, ClaimOutcome::Claimed { .. }))
            .count();
        let auto_assigned = matches!(matched, MatchOutcome::Assigned { .. }) as usize;
        assert_eq!(claimed + auto_assigned, 1);

        let winner = dispatcher.ledger.success_for(order_id).unwrap();
        let winner_id = winner.driver_id.unwrap();

        let committed: Vec<Uuid> = dispatcher
            .directory
            .list()
            .into_iter()
            .filter(|driver| driver.active_order == Some(order_id))
            .map(|driver| driver.id)
            .collect();
        assert_eq!(committed, vec![winner_id]);
        assert_eq!(
            dispatcher.directory.available_count(),
            grabbers.len(),
            "every loser must stay available"
        );

        for outcome in claims.iter().filter(|outcome| !matches!(outcome, ClaimOutcome::Claimed { .. })) {
            assert!(matches!(outcome, ClaimOutcome::Conflict(_)));
        }
    }
}

#[test]
fn concurrent_matches_never_share_a_driver() {
    for _ in 0..50 {
        let dispatcher = Arc::new(Dispatcher::new(&Config::default()));
        let nearest = Uuid::new_v4();
        let further = Uuid::new_v4();
        online(&dispatcher, nearest, north_of(0.2));
        online(&dispatcher, further, north_of(2.0));

        let first = ride(Uuid::new_v4());
        let second = ride(Uuid::new_v4());
        let barrier = Barrier::new(2);

        let (a, b) = thread::scope(|scope| {
            let a = scope.spawn(|| {
                barrier.wait();
                dispatcher.match_request(&first)
            });
            let b = scope.spawn(|| {
                barrier.wait();
                dispatcher.match_request(&second)
            });
            (a.join().unwrap(), b.join().unwrap())
        });

        let drivers: Vec<Uuid> = [a, b]
            .iter()
            .map(|outcome| match outcome {
                MatchOutcome::Assigned { record, .. } => record.driver_id.unwrap(),
                other => panic!("expected both rides to be assigned, got {}", other.label()),
            })
            .collect();
        assert_ne!(drivers[0], drivers[1]);
        assert!(drivers.contains(&nearest));
        assert!(drivers.contains(&further));
        assert_eq!(dispatcher.directory.available_count(), 0);
    }
}

#[test]
fn more_rides_than_drivers_assigns_each_driver_once() {
    let dispatcher = Arc::new(Dispatcher::new(&Config::default()));
    let drivers: Vec<Uuid> = (0..8).map(|_| Uuid::new_v4()).collect();
    for (i, driver_id) in drivers.iter().enumerate() {
        online(&dispatcher, *driver_id, north_of(0.1 + i as f64 * 0.1));
    }

    let rides: Vec<MatchRequest> = (0..24).map(|_| ride(Uuid::new_v4())).collect();
    let barrier = Barrier::new(rides.len());
    let outcomes: Vec<MatchOutcome> = thread::scope(|scope| {
        let handles: Vec<_> = rides
            .iter()
            .map(|request| {
                let dispatcher = &dispatcher;
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    dispatcher.match_request(request)
                })
            })
            .collect();
        handles.into_iter().map(|handle| handle.join().unwrap()).collect()
    });

    let mut assigned: Vec<Uuid> = outcomes
        .iter()
        .filter_map(|outcome| match outcome {
            MatchOutcome::Assigned { record, .. } => record.driver_id,
            _ => None,
        })
        .collect();
    assert_eq!(assigned.len(), drivers.len());
    assigned.sort();
    assigned.dedup();
    assert_eq!(assigned.len(), drivers.len());
    assert_eq!(dispatcher.ledger.success_count(), drivers.len());
}

#[test]
fn cancellation_racing_a_claim_leaves_driver_free() {
    for _ in 0..50 {
        let dispatcher = Arc::new(Dispatcher::new(&Config::default()));
        let order_id = Uuid::new_v4();
        dispatcher.publish_for_grab(&ride(order_id)).unwrap();
        let driver_id = Uuid::new_v4();
        online(&dispatcher, driver_id, north_of(0.5));

        let barrier = Barrier::new(2);
        let claim = thread::scope(|scope| {
            let claim = scope.spawn(|| {
                barrier.wait();
                dispatcher.claim_order(order_id, driver_id)
            });
            scope.spawn(|| {
                barrier.wait();
                dispatcher.cancel_order(order_id)
            });
            claim.join().unwrap()
        });

        assert!(matches!(
            claim,
            ClaimOutcome::Claimed { .. } | ClaimOutcome::Cancelled(_)
        ));
        let driver = dispatcher.directory.get(driver_id).unwrap();
        assert!(driver.available);
        assert_eq!(driver.active_order, None);
    }
}
