use chrono::Utc;
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::driver::{DriverRecord, DriverStatusUpdate};

const DEFAULT_RATING: f64 = 5.0;

/// Why a `try_claim` did not take effect. Nothing was modified in either case.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimRejection {
    NotFound,
    Unavailable,
    VersionMismatch { current: u64 },
}

/// Authoritative driver state. Each record is only mutated while its map
/// entry is exclusively held, which makes every operation here a single
/// atomic step per driver.
#[derive(Default)]
pub struct DriverDirectory {
    drivers: DashMap<Uuid, DriverRecord>,
}

impl DriverDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, driver_id: Uuid) -> Result<DriverRecord, DispatchError> {
        self.drivers
            .get(&driver_id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))
    }

    pub fn list(&self) -> Vec<DriverRecord> {
        let mut drivers: Vec<DriverRecord> = self
            .drivers
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        drivers.sort_by_key(|driver| driver.id);
        drivers
    }

    pub fn len(&self) -> usize {
        self.drivers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drivers.is_empty()
    }

    pub fn available_count(&self) -> usize {
        self.drivers.iter().filter(|entry| entry.available).count()
    }

    /// Compare-and-set on `(available, version)`: commits the driver to
    /// `order_id` and bumps the version, or fails without side effects.
    pub fn try_claim(
        &self,
        driver_id: Uuid,
        expected_version: u64,
        order_id: Uuid,
    ) -> Result<u64, ClaimRejection> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or(ClaimRejection::NotFound)?;

        if !driver.available {
            return Err(ClaimRejection::Unavailable);
        }
        if driver.version != expected_version {
            return Err(ClaimRejection::VersionMismatch {
                current: driver.version,
            });
        }

        driver.available = false;
        driver.active_order = Some(order_id);
        driver.version += 1;
        debug!(driver_id = %driver_id, order_id = %order_id, version = driver.version, "driver claimed");
        Ok(driver.version)
    }

    /// Undo a claim. Returns to `available` only if the driver is still online.
    pub fn release(&self, driver_id: Uuid) -> Result<DriverRecord, DispatchError> {
        let mut driver = self
            .drivers
            .get_mut(&driver_id)
            .ok_or_else(|| DispatchError::NotFound(format!("driver {driver_id} not found")))?;

        driver.active_order = None;
        driver.available = driver.online;
        driver.version += 1;
        debug!(driver_id = %driver_id, version = driver.version, "driver released");
        Ok(driver.clone())
    }

    /// Releases only if the driver is still committed to `order_id`, so a
    /// rollback never clobbers a newer claim.
    pub fn release_if_committed(&self, driver_id: Uuid, order_id: Uuid) -> bool {
        let Some(mut driver) = self.drivers.get_mut(&driver_id) else {
            return false;
        };
        if driver.active_order != Some(order_id) {
            return false;
        }

        driver.active_order = None;
        driver.available = driver.online;
        driver.version += 1;
        true
    }

    /// General online/offline/location entry point. Creates the record when a
    /// new driver comes online. A driver committed to an order stays
    /// unavailable until released.
    pub fn update_status(
        &self,
        driver_id: Uuid,
        update: &DriverStatusUpdate,
    ) -> Result<DriverRecord, DispatchError> {
        let now = Utc::now();
        let observed_at = update.timestamp.unwrap_or(now);

        if let Some(rating) = update.rating {
            if !rating.is_finite() {
                return Err(DispatchError::BadRequest("rating must be a number".to_string()));
            }
        }
        if let Some(location) = &update.location {
            if !location.is_valid() {
                return Err(DispatchError::BadRequest(format!(
                    "invalid coordinate ({}, {})",
                    location.lat, location.lng
                )));
            }
        }

        match self.drivers.entry(driver_id) {
            dashmap::mapref::entry::Entry::Occupied(mut occupied) => {
                let driver = occupied.get_mut();
                if let Some(location) = update.location {
                    if observed_at >= driver.location_updated_at {
                        driver.location = location;
                        driver.location_updated_at = observed_at;
                    } else {
                        debug!(driver_id = %driver_id, observed_at = %observed_at, "ignoring out-of-order location");
                    }
                }
                if let Some(vehicle_type) = update.vehicle_type {
                    driver.vehicle_type = vehicle_type;
                }
                if let Some(rating) = update.rating {
                    driver.rating = rating.clamp(0.0, 5.0);
                }
                if let Some(passengers) = update.current_passengers {
                    driver.current_passengers = passengers;
                }
                if let Some(capacity) = update.carpool_capacity {
                    driver.carpool_capacity = capacity;
                }

                driver.online = update.available;
                if update.available && driver.active_order.is_some() {
                    warn!(driver_id = %driver_id, "ignoring availability for committed driver");
                }
                driver.available = driver.online && driver.active_order.is_none();
                if observed_at > driver.updated_at {
                    driver.updated_at = observed_at;
                }
                driver.version += 1;
                Ok(driver.clone())
            }
            dashmap::mapref::entry::Entry::Vacant(vacant) => {
                let location = update.location.ok_or_else(|| {
                    DispatchError::BadRequest(format!("driver {driver_id} is new: location is required"))
                })?;
                let vehicle_type = update.vehicle_type.ok_or_else(|| {
                    DispatchError::BadRequest(format!(
                        "driver {driver_id} is new: vehicle_type is required"
                    ))
                })?;

                let driver = DriverRecord {
                    id: driver_id,
                    location,
                    online: update.available,
                    available: update.available,
                    vehicle_type,
                    rating: update.rating.unwrap_or(DEFAULT_RATING).clamp(0.0, 5.0),
                    current_passengers: update.current_passengers.unwrap_or(0),
                    carpool_capacity: update.carpool_capacity.unwrap_or(1).max(1),
                    active_order: None,
                    updated_at: observed_at,
                    location_updated_at: observed_at,
                    version: 1,
                };
                vacant.insert(driver.clone());
                Ok(driver)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use super::{ClaimRejection, DriverDirectory};
    use crate::geo::GeoPoint;
    use crate::models::driver::{DriverStatusUpdate, VehicleType};

    fn online(lat: f64, lng: f64) -> DriverStatusUpdate {
        DriverStatusUpdate {
            available: true,
            location: Some(GeoPoint::new(lat, lng)),
            vehicle_type: Some(VehicleType::Economy),
            rating: Some(4.5),
            ..Default::default()
        }
    }

    #[test]
    fn new_driver_requires_location_and_vehicle() {
        let directory = DriverDirectory::new();
        let driver = Uuid::from_u128(1);

        let missing = DriverStatusUpdate {
            available: true,
            ..Default::default()
        };
        assert!(directory.update_status(driver, &missing).is_err());

        let record = directory.update_status(driver, &online(52.5, 13.4)).unwrap();
        assert!(record.available);
        assert_eq!(record.version, 1);
        assert_eq!(record.carpool_capacity, 1);
    }

    #[test]
    fn try_claim_checks_version_and_availability() {
        let directory = DriverDirectory::new();
        let driver = Uuid::from_u128(1);
        let order = Uuid::from_u128(100);
        let record = directory.update_status(driver, &online(52.5, 13.4)).unwrap();

        assert_eq!(
            directory.try_claim(driver, record.version + 1, order),
            Err(ClaimRejection::VersionMismatch {
                current: record.version
            })
        );

        let new_version = directory.try_claim(driver, record.version, order).unwrap();
        assert_eq!(new_version, record.version + 1);

        let claimed = directory.get(driver).unwrap();
        assert!(!claimed.available);
        assert_eq!(claimed.active_order, Some(order));

        assert_eq!(
            directory.try_claim(driver, new_version, Uuid::from_u128(101)),
            Err(ClaimRejection::Unavailable)
        );
        assert_eq!(
            directory.try_claim(Uuid::from_u128(2), 1, order),
            Err(ClaimRejection::NotFound)
        );
    }

    #[test]
    fn failed_claim_has_no_side_effects() {
        let directory = DriverDirectory::new();
        let driver = Uuid::from_u128(1);
        let record = directory.update_status(driver, &online(52.5, 13.4)).unwrap();

        let _ = directory.try_claim(driver, record.version + 5, Uuid::from_u128(100));
        let after = directory.get(driver).unwrap();
        assert!(after.available);
        assert_eq!(after.version, record.version);
        assert!(after.active_order.is_none());
    }

    #[test]
    fn concurrent_claims_on_one_driver_have_one_winner() {
        let directory = DriverDirectory::new();
        let driver = Uuid::from_u128(1);
        let record = directory.update_status(driver, &online(52.5, 13.4)).unwrap();
        let winners = AtomicUsize::new(0);

        std::thread::scope(|scope| {
            for n in 0..32u128 {
                let directory = &directory;
                let winners = &winners;
                scope.spawn(move || {
                    if directory
                        .try_claim(driver, record.version, Uuid::from_u128(1000 + n))
                        .is_ok()
                    {
                        winners.fetch_add(1, Ordering::SeqCst);
                    }
                });
            }
        });

        assert_eq!(winners.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn committed_driver_stays_unavailable_until_released() {
        let directory = DriverDirectory::new();
        let driver = Uuid::from_u128(1);
        let order = Uuid::from_u128(100);
        let record = directory.update_status(driver, &online(52.5, 13.4)).unwrap();
        directory.try_claim(driver, record.version, order).unwrap();

        let refreshed = directory.update_status(driver, &online(52.6, 13.5)).unwrap();
        assert!(!refreshed.available);
        assert_eq!(refreshed.location, GeoPoint::new(52.6, 13.5));

        let released = directory.release(driver).unwrap();
        assert!(released.available);
        assert!(released.active_order.is_none());
    }

    #[test]
    fn offline_driver_is_not_made_available_by_release() {
        let directory = DriverDirectory::new();
        let driver = Uuid::from_u128(1);
        let order = Uuid::from_u128(100);
        let record = directory.update_status(driver, &online(52.5, 13.4)).unwrap();
        directory.try_claim(driver, record.version, order).unwrap();

        let offline = DriverStatusUpdate {
            available: false,
            ..Default::default()
        };
        directory.update_status(driver, &offline).unwrap();

        assert!(!directory.release_if_committed(driver, Uuid::from_u128(999)));
        assert!(directory.release_if_committed(driver, order));
        assert!(!directory.get(driver).unwrap().available);
    }

    #[test]
    fn late_location_does_not_overwrite_newer_fix() {
        let directory = DriverDirectory::new();
        let driver = Uuid::from_u128(1);
        let now = Utc::now();
        let mut fresh = online(52.60, 13.4);
        fresh.timestamp = Some(now);
        directory.update_status(driver, &fresh).unwrap();

        let mut late = online(52.52, 13.4);
        late.timestamp = Some(now - Duration::minutes(3));
        let record = directory.update_status(driver, &late).unwrap();

        assert_eq!(record.location, GeoPoint::new(52.60, 13.4));
        assert_eq!(record.location_updated_at, now);
    }

    #[test]
    fn heartbeat_keeps_location_timestamp() {
        let directory = DriverDirectory::new();
        let driver = Uuid::from_u128(1);
        let fixed_at = Utc::now() - Duration::hours(2);
        let mut first = online(52.5, 13.4);
        first.timestamp = Some(fixed_at);
        directory.update_status(driver, &first).unwrap();

        let heartbeat = DriverStatusUpdate {
            available: true,
            ..Default::default()
        };
        let record = directory.update_status(driver, &heartbeat).unwrap();
        assert_eq!(record.location_updated_at, fixed_at);
        assert!(record.updated_at > fixed_at);
    }
}
