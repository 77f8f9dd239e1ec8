use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::{Entry, VacantEntry};
use dashmap::DashMap;
use serde::Serialize;
use uuid::Uuid;

use crate::models::assignment::Strategy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClaimState {
    Assigned {
        driver_id: Uuid,
        strategy: Strategy,
        at: DateTime<Utc>,
    },
    Cancelled {
        at: DateTime<Utc>,
    },
}

impl ClaimState {
    pub fn at(&self) -> DateTime<Utc> {
        match self {
            ClaimState::Assigned { at, .. } | ClaimState::Cancelled { at } => *at,
        }
    }
}

/// Per-order claim registry shared by auto-match and grab.
///
/// `begin` hands out exclusive ownership of an unclaimed order id for the
/// length of one critical section; every other caller for that id blocks
/// until it ends and then sees the committed state. Dropping a
/// [`PendingClaim`] without committing leaves the order unclaimed.
///
/// Lock order: claims, then grab listings, then the driver directory, then
/// the ledger.
#[derive(Default)]
pub struct OrderClaims {
    claims: DashMap<Uuid, ClaimState>,
}

pub struct PendingClaim<'a> {
    entry: VacantEntry<'a, Uuid, ClaimState>,
}

impl PendingClaim<'_> {
    pub fn order_id(&self) -> Uuid {
        *self.entry.key()
    }

    pub fn commit(self, driver_id: Uuid, strategy: Strategy) {
        self.entry.insert(ClaimState::Assigned {
            driver_id,
            strategy,
            at: Utc::now(),
        });
    }
}

impl OrderClaims {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, order_id: Uuid) -> Option<ClaimState> {
        self.claims.get(&order_id).map(|entry| *entry.value())
    }

    pub fn begin(&self, order_id: Uuid) -> Result<PendingClaim<'_>, ClaimState> {
        match self.claims.entry(order_id) {
            Entry::Occupied(occupied) => Err(*occupied.get()),
            Entry::Vacant(entry) => Ok(PendingClaim { entry }),
        }
    }

    /// Marks the order cancelled and runs `on_cancel` with the previous state
    /// while the order is still held. Returns the previous state, or `None`
    /// if the order had not been claimed.
    pub fn cancel<F>(&self, order_id: Uuid, on_cancel: F) -> Option<ClaimState>
    where
        F: FnOnce(Option<ClaimState>),
    {
        let cancelled = ClaimState::Cancelled { at: Utc::now() };
        match self.claims.entry(order_id) {
            Entry::Occupied(mut occupied) => {
                let previous = *occupied.get();
                if matches!(previous, ClaimState::Cancelled { .. }) {
                    return Some(previous);
                }
                on_cancel(Some(previous));
                occupied.insert(cancelled);
                Some(previous)
            }
            Entry::Vacant(vacant) => {
                on_cancel(None);
                vacant.insert(cancelled);
                None
            }
        }
    }

    /// Forgets settled orders older than `retention`. A redelivery after that
    /// is still refused by the ledger's one-success-per-order rule.
    pub fn purge_older_than(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let before = self.claims.len();
        self.claims.retain(|_, state| now - state.at() <= retention);
        before.saturating_sub(self.claims.len())
    }

    pub fn len(&self) -> usize {
        self.claims.len()
    }

    pub fn is_empty(&self) -> bool {
        self.claims.is_empty()
    }
}
