use crate::config::MarketplacePolicy;
use crate::geo::haversine_km;
use crate::models::order::MatchRequest;

/// Fare shown on a grab listing. Pricing is owned upstream; this straight-line
/// estimate only fills in when the ride event carried no fare.
pub fn estimate_fare(request: &MatchRequest, policy: &MarketplacePolicy) -> f64 {
    if let Some(fare) = request.estimated_fare.filter(|fare| fare.is_finite() && *fare >= 0.0) {
        return fare;
    }

    let distance_km = haversine_km(&request.pickup, &request.dropoff);
    let fare = (policy.base_fare + policy.per_km_fare * distance_km)
        * request.vehicle_type.fare_multiplier();
    (fare * 100.0).round() / 100.0
}
