use std::env;
use std::str::FromStr;

use chrono::Duration;

use crate::error::DispatchError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub event_buffer_size: usize,
    pub index_cell_deg: f64,
    pub matching: MatchingPolicy,
    pub marketplace: MarketplacePolicy,
    pub gateway: GatewayPolicy,
}

/// Knobs for candidate search and ranking.
#[derive(Debug, Clone)]
pub struct MatchingPolicy {
    pub max_radius_km: f64,
    pub candidate_limit: usize,
    pub over_fetch_factor: usize,
    pub stale_after: Duration,
    pub distance_weight: f64,
    pub rating_weight: f64,
    pub avg_speed_kmh: f64,
}

impl Default for MatchingPolicy {
    fn default() -> Self {
        Self {
            max_radius_km: 10.0,
            candidate_limit: 10,
            over_fetch_factor: 3,
            stale_after: Duration::seconds(300),
            distance_weight: 1.0,
            rating_weight: 0.5,
            avg_speed_kmh: 30.0,
        }
    }
}

impl MatchingPolicy {
    pub fn fetch_limit(&self) -> usize {
        self.candidate_limit.saturating_mul(self.over_fetch_factor.max(1))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrabPolicy {
    /// Publish to the grab pool only after auto-match fails.
    Fallback,
    /// Skip auto-match and publish straight to the grab pool.
    Always,
    Never,
}

impl FromStr for GrabPolicy {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.to_ascii_lowercase().as_str() {
            "fallback" => Ok(GrabPolicy::Fallback),
            "always" => Ok(GrabPolicy::Always),
            "never" => Ok(GrabPolicy::Never),
            other => Err(format!("expected fallback/always/never, got {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketplacePolicy {
    pub grab_policy: GrabPolicy,
    pub grab_ttl: Duration,
    pub sweep_interval_ms: u64,
    pub retention: Duration,
    pub requeue_expired: bool,
    pub base_fare: f64,
    pub per_km_fare: f64,
}

impl Default for MarketplacePolicy {
    fn default() -> Self {
        Self {
            grab_policy: GrabPolicy::Fallback,
            grab_ttl: Duration::seconds(120),
            sweep_interval_ms: 1000,
            retention: Duration::seconds(3600),
            requeue_expired: false,
            base_fare: 3.0,
            per_km_fare: 1.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct GatewayPolicy {
    pub max_delivery_attempts: u32,
    pub retry_initial_ms: u64,
    pub scheduled_lead: Duration,
}

impl Default for GatewayPolicy {
    fn default() -> Self {
        Self {
            max_delivery_attempts: 5,
            retry_initial_ms: 50,
            scheduled_lead: Duration::seconds(600),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            http_port: 3000,
            log_level: "info".to_string(),
            event_buffer_size: 1024,
            index_cell_deg: 0.01,
            matching: MatchingPolicy::default(),
            marketplace: MarketplacePolicy::default(),
            gateway: GatewayPolicy::default(),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, DispatchError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, DispatchError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let matching = MatchingPolicy {
            max_radius_km: parse_or_default(&lookup, "MAX_RADIUS_KM", defaults.matching.max_radius_km)?,
            candidate_limit: parse_or_default(&lookup, "CANDIDATE_LIMIT", defaults.matching.candidate_limit)?,
            over_fetch_factor: parse_or_default(&lookup, "OVER_FETCH_FACTOR", defaults.matching.over_fetch_factor)?,
            stale_after: parse_secs(&lookup, "STALE_AFTER_SECS", defaults.matching.stale_after)?,
            distance_weight: parse_or_default(&lookup, "DISTANCE_WEIGHT", defaults.matching.distance_weight)?,
            rating_weight: parse_or_default(&lookup, "RATING_WEIGHT", defaults.matching.rating_weight)?,
            avg_speed_kmh: parse_or_default(&lookup, "AVG_SPEED_KMH", defaults.matching.avg_speed_kmh)?,
        };
        require_positive("MAX_RADIUS_KM", matching.max_radius_km)?;
        require_positive("AVG_SPEED_KMH", matching.avg_speed_kmh)?;
        require_nonzero("CANDIDATE_LIMIT", matching.candidate_limit)?;
        require_nonzero("OVER_FETCH_FACTOR", matching.over_fetch_factor)?;
        require_finite("DISTANCE_WEIGHT", matching.distance_weight)?;
        require_finite("RATING_WEIGHT", matching.rating_weight)?;

        let marketplace = MarketplacePolicy {
            grab_policy: parse_or_default(&lookup, "GRAB_POLICY", defaults.marketplace.grab_policy)?,
            grab_ttl: parse_secs(&lookup, "GRAB_TTL_SECS", defaults.marketplace.grab_ttl)?,
            sweep_interval_ms: parse_or_default(&lookup, "SWEEP_INTERVAL_MS", defaults.marketplace.sweep_interval_ms)?,
            retention: parse_secs(&lookup, "RETENTION_SECS", defaults.marketplace.retention)?,
            requeue_expired: parse_or_default(&lookup, "REQUEUE_EXPIRED", defaults.marketplace.requeue_expired)?,
            base_fare: parse_or_default(&lookup, "BASE_FARE", defaults.marketplace.base_fare)?,
            per_km_fare: parse_or_default(&lookup, "PER_KM_FARE", defaults.marketplace.per_km_fare)?,
        };
        require_nonzero("SWEEP_INTERVAL_MS", marketplace.sweep_interval_ms)?;
        require_finite("BASE_FARE", marketplace.base_fare)?;
        require_finite("PER_KM_FARE", marketplace.per_km_fare)?;

        let gateway = GatewayPolicy {
            max_delivery_attempts: parse_or_default(&lookup, "MAX_DELIVERY_ATTEMPTS", defaults.gateway.max_delivery_attempts)?,
            retry_initial_ms: parse_or_default(&lookup, "RETRY_INITIAL_MS", defaults.gateway.retry_initial_ms)?,
            scheduled_lead: parse_secs(&lookup, "SCHEDULED_LEAD_SECS", defaults.gateway.scheduled_lead)?,
        };
        require_nonzero("MAX_DELIVERY_ATTEMPTS", gateway.max_delivery_attempts)?;

        let index_cell_deg = parse_or_default(&lookup, "INDEX_CELL_DEG", defaults.index_cell_deg)?;
        require_positive("INDEX_CELL_DEG", index_cell_deg)?;

        let event_buffer_size = parse_or_default(&lookup, "EVENT_BUFFER_SIZE", defaults.event_buffer_size)?;
        require_nonzero("EVENT_BUFFER_SIZE", event_buffer_size)?;

        Ok(Self {
            http_port: parse_or_default(&lookup, "HTTP_PORT", defaults.http_port)?,
            log_level: lookup("LOG_LEVEL").unwrap_or(defaults.log_level),
            event_buffer_size,
            index_cell_deg,
            matching,
            marketplace,
            gateway,
        })
    }
}

/// Whole seconds, strictly positive and within chrono's range.
fn parse_secs<F>(lookup: &F, key: &str, default: Duration) -> Result<Duration, DispatchError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: i64 = parse_or_default(lookup, key, default.num_seconds())?;
    if secs <= 0 {
        return Err(DispatchError::Internal(format!("invalid {key}: must be > 0, got {secs}")));
    }
    Duration::try_seconds(secs)
        .ok_or_else(|| DispatchError::Internal(format!("invalid {key}: {secs} seconds is out of range")))
}

fn require_positive(key: &str, value: f64) -> Result<(), DispatchError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(DispatchError::Internal(format!("invalid {key}: must be > 0, got {value}")))
    }
}

fn require_finite(key: &str, value: f64) -> Result<(), DispatchError> {
    if value.is_finite() {
        Ok(())
    } else {
        Err(DispatchError::Internal(format!("invalid {key}: must be a finite number")))
    }
}

fn require_nonzero<T>(key: &str, value: T) -> Result<(), DispatchError>
where
    T: Default + PartialEq,
{
    if value == T::default() {
        Err(DispatchError::Internal(format!("invalid {key}: must be > 0")))
    } else {
        Ok(())
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> Result<T, DispatchError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(key) {
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|err| DispatchError::Internal(format!("invalid {key}: {err}"))),
        None => Ok(default),
    }
}
