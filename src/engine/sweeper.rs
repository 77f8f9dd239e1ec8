use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info};

use crate::engine::marketplace::ExpiredListing;
use crate::engine::{Dispatcher, RideResolution};
use crate::gateway::emit_resolution;
use crate::models::assignment::FailureReason;
use crate::models::event::MatchFailed;
use crate::state::AppState;

#[derive(Debug, Default)]
pub struct SweepReport {
    pub expired: Vec<ExpiredListing>,
    pub purged: usize,
    pub purged_claims: usize,
}

impl Dispatcher {
    /// Expire due listings, then drop terminal listings and settled claims
    /// past retention.
    pub fn sweep(&self, now: DateTime<Utc>) -> SweepReport {
        let retention = self.marketplace_policy.retention;
        let expired = self.marketplace.expire_due(now);
        let purged = self.marketplace.purge_terminal(now, retention);
        let purged_claims = self.claims.purge_older_than(now, retention);

        for listing in &expired {
            info!(order_id = %listing.order.order_id, "grab listing expired");
        }
        SweepReport {
            expired,
            purged,
            purged_claims,
        }
    }

    /// What to announce for a listing that expired unclaimed.
    pub fn resolve_expired(&self, listing: &ExpiredListing) -> RideResolution {
        if self.marketplace_policy.requeue_expired {
            return self.rematch(&listing.request);
        }
        RideResolution::Failed(MatchFailed {
            order_id: listing.order.order_id,
            reason: FailureReason::OrderExpired,
        })
    }
}

pub async fn sweep_once(state: &AppState) -> usize {
    let report = state.dispatcher.sweep(Utc::now());
    let expired = report.expired.len();

    for listing in &report.expired {
        let resolution = state.dispatcher.resolve_expired(listing);
        emit_resolution(state, resolution, None).await;
    }

    if expired > 0 || report.purged > 0 || report.purged_claims > 0 {
        debug!(
            expired,
            purged = report.purged,
            purged_claims = report.purged_claims,
            "expiry sweep finished"
        );
    }
    state.refresh_gauges();
    expired
}

pub async fn run_expiry_sweeper(state: Arc<AppState>) {
    let period = Duration::from_millis(state.config.marketplace.sweep_interval_ms.max(10));
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    info!(interval_ms = period.as_millis() as u64, "expiry sweeper started");
    loop {
        ticker.tick().await;
        sweep_once(&state).await;
    }
}
