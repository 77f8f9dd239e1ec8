use std::cmp::Ordering;

use uuid::Uuid;

use crate::config::MatchingPolicy;
use crate::models::assignment::ScoreBreakdown;

/// A driver that survived filtering, together with the directory version the
/// claim will be conditioned on.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub driver_id: Uuid,
    pub version: u64,
    pub distance_km: f64,
    pub rating: f64,
    pub score: f64,
    pub breakdown: ScoreBreakdown,
    pub preferred: bool,
}

impl Candidate {
    pub fn new(
        driver_id: Uuid,
        version: u64,
        distance_km: f64,
        rating: f64,
        preferred: bool,
        policy: &MatchingPolicy,
    ) -> Self {
        let (score, breakdown) = compute_score(distance_km, rating, policy);
        Self {
            driver_id,
            version,
            distance_km,
            rating,
            score,
            breakdown,
            preferred,
        }
    }
}

/// Lower is better.
pub fn compute_score(distance_km: f64, rating: f64, policy: &MatchingPolicy) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        distance_km,
        normalized_distance: normalized_distance(distance_km, policy.max_radius_km),
        normalized_rating: normalized_rating(rating),
    };

    let score = weighted_score(&breakdown, policy);
    (score, breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown, policy: &MatchingPolicy) -> f64 {
    (breakdown.normalized_distance * policy.distance_weight)
        - (breakdown.normalized_rating * policy.rating_weight)
}

fn normalized_distance(distance_km: f64, max_radius_km: f64) -> f64 {
    if max_radius_km <= 0.0 {
        return 1.0;
    }
    (distance_km.max(0.0) / max_radius_km).clamp(0.0, 1.0)
}

fn normalized_rating(rating: f64) -> f64 {
    (rating / 5.0).clamp(0.0, 1.0)
}

/// Preferred driver first, then ascending score, then driver id.
pub fn rank(candidates: &mut [Candidate]) {
    candidates.sort_by(compare);
}

fn compare(a: &Candidate, b: &Candidate) -> Ordering {
    b.preferred
        .cmp(&a.preferred)
        .then_with(|| a.score.total_cmp(&b.score))
        .then_with(|| a.driver_id.cmp(&b.driver_id))
}
