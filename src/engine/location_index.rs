use std::collections::HashSet;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use uuid::Uuid;

use crate::geo::{bounding_span_deg, haversine_km, GeoPoint};

type Cell = (i64, i64);

#[derive(Debug, Clone, Copy)]
struct IndexedLocation {
    point: GeoPoint,
    cell: Cell,
    observed_at: DateTime<Utc>,
}

/// Grid-bucketed point index of driver positions.
///
/// Positions are kept per driver; each driver id is also filed under the grid
/// cell containing its point so radius queries only touch nearby cells.
/// Distances are always computed from the per-driver position, so a cell entry
/// that is briefly behind a concurrent move never yields a wrong result.
pub struct DriverLocationIndex {
    cell_deg: f64,
    positions: DashMap<Uuid, IndexedLocation>,
    cells: DashMap<Cell, HashSet<Uuid>>,
}

impl DriverLocationIndex {
    pub fn new(cell_deg: f64) -> Self {
        Self {
            cell_deg,
            positions: DashMap::new(),
            cells: DashMap::new(),
        }
    }

    fn cell_of(&self, point: &GeoPoint) -> Cell {
        (
            (point.lat / self.cell_deg).floor() as i64,
            (point.lng / self.cell_deg).floor() as i64,
        )
    }

    pub fn upsert(&self, driver_id: Uuid, point: GeoPoint, observed_at: DateTime<Utc>) {
        let cell = self.cell_of(&point);
        let location = IndexedLocation {
            point,
            cell,
            observed_at,
        };

        // The position entry stays locked while cell membership moves, so two
        // upserts for one driver cannot interleave their cell edits.
        let mut entry = self.positions.entry(driver_id).or_insert(location);
        let previous_cell = entry.cell;
        *entry = location;

        if previous_cell != cell {
            if let Some(mut members) = self.cells.get_mut(&previous_cell) {
                members.remove(&driver_id);
            }
            self.cells.remove_if(&previous_cell, |_, members| members.is_empty());
        }
        self.cells.entry(cell).or_default().insert(driver_id);
    }

    pub fn remove(&self, driver_id: Uuid) -> bool {
        let Some((_, location)) = self.positions.remove(&driver_id) else {
            return false;
        };

        if let Some(mut members) = self.cells.get_mut(&location.cell) {
            members.remove(&driver_id);
        }
        self.cells.remove_if(&location.cell, |_, members| members.is_empty());
        true
    }

    pub fn position(&self, driver_id: Uuid) -> Option<(GeoPoint, DateTime<Utc>)> {
        self.positions
            .get(&driver_id)
            .map(|entry| (entry.point, entry.observed_at))
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    /// Drivers within `radius_km` of `center`, nearest first, ties by driver id.
    pub fn query_radius(&self, center: &GeoPoint, radius_km: f64, limit: usize) -> Vec<(Uuid, f64)> {
        if limit == 0 || radius_km < 0.0 {
            return Vec::new();
        }

        let (lat_span, lng_span) = bounding_span_deg(center, radius_km);
        let (min_lat, max_lat) = (
            ((center.lat - lat_span) / self.cell_deg).floor() as i64,
            ((center.lat + lat_span) / self.cell_deg).floor() as i64,
        );
        let (min_lng, max_lng) = (
            ((center.lng - lng_span) / self.cell_deg).floor() as i64,
            ((center.lng + lng_span) / self.cell_deg).floor() as i64,
        );

        let cell_count = (max_lat - min_lat + 1).saturating_mul(max_lng - min_lng + 1);
        let candidate_ids: HashSet<Uuid> = if cell_count as usize > self.cells.len() {
            self.positions.iter().map(|entry| *entry.key()).collect()
        } else {
            let mut ids = HashSet::new();
            for lat_cell in min_lat..=max_lat {
                for lng_cell in min_lng..=max_lng {
                    if let Some(members) = self.cells.get(&(lat_cell, lng_cell)) {
                        ids.extend(members.iter().copied());
                    }
                }
            }
            ids
        };

        let mut hits: Vec<(Uuid, f64)> = candidate_ids
            .into_iter()
            .filter_map(|driver_id| {
                let point = self.positions.get(&driver_id)?.point;
                let distance_km = haversine_km(center, &point);
                (distance_km <= radius_km).then_some((driver_id, distance_km))
            })
            .collect();

        hits.sort_by(|a, b| a.1.total_cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        hits.truncate(limit);
        hits
    }
}
