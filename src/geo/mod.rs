use serde::{Deserialize, Serialize};

const EARTH_RADIUS_KM: f64 = 6_371.0;
const KM_PER_DEGREE_LAT: f64 = 111.195;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

pub fn haversine_km(a: &GeoPoint, b: &GeoPoint) -> f64 {
    let lat1 = a.lat.to_radians();
    let lat2 = b.lat.to_radians();
    let delta_lat = (b.lat - a.lat).to_radians();
    let delta_lng = (b.lng - a.lng).to_radians();

    let sin_lat = (delta_lat / 2.0).sin();
    let sin_lng = (delta_lng / 2.0).sin();

    let haversine = sin_lat * sin_lat + lat1.cos() * lat2.cos() * sin_lng * sin_lng;
    let central_angle = 2.0 * haversine.sqrt().min(1.0).asin();

    EARTH_RADIUS_KM * central_angle
}

/// Degree extents `(lat_span, lng_span)` of a box that fully contains the
/// circle of `radius_km` around `center`.
pub fn bounding_span_deg(center: &GeoPoint, radius_km: f64) -> (f64, f64) {
    // 1% slack: great-circle and parallel distances diverge away from the equator.
    let radius_km = radius_km * 1.01;
    let lat_span = radius_km / KM_PER_DEGREE_LAT;
    let cos_lat = center.lat.to_radians().cos().abs().max(0.01);
    let lng_span = (radius_km / (KM_PER_DEGREE_LAT * cos_lat)).min(180.0);
    (lat_span, lng_span)
}
