use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use uuid::Uuid;

use crate::error::DispatchError;
use crate::models::assignment::AssignmentRecord;

/// Append-only record of every match attempt.
///
/// Attempts are grouped per order id. A second success for an order id is
/// refused, which backs up the claim registry's at-most-one guarantee.
#[derive(Default)]
pub struct AssignmentLedger {
    successes: DashMap<Uuid, AssignmentRecord>,
    attempts: DashMap<Uuid, Vec<AssignmentRecord>>,
}

impl AssignmentLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_success(&self, record: AssignmentRecord) -> Result<AssignmentRecord, DispatchError> {
        if !record.is_success() {
            return Err(DispatchError::Internal(
                "record_success called with a failure record".to_string(),
            ));
        }

        match self.successes.entry(record.order_id) {
            Entry::Occupied(existing) => Err(DispatchError::Conflict(format!(
                "order {} already assigned to {:?}",
                record.order_id,
                existing.get().driver_id
            ))),
            Entry::Vacant(vacant) => {
                vacant.insert(record.clone());
                self.attempts
                    .entry(record.order_id)
                    .or_default()
                    .push(record.clone());
                Ok(record)
            }
        }
    }

    pub fn record_failure(&self, record: AssignmentRecord) -> AssignmentRecord {
        self.attempts
            .entry(record.order_id)
            .or_default()
            .push(record.clone());
        record
    }

    pub fn success_for(&self, order_id: Uuid) -> Option<AssignmentRecord> {
        self.successes.get(&order_id).map(|entry| entry.value().clone())
    }

    pub fn attempts_for(&self, order_id: Uuid) -> Vec<AssignmentRecord> {
        self.attempts
            .get(&order_id)
            .map(|entry| entry.value().clone())
            .unwrap_or_default()
    }

    /// All records, oldest first.
    pub fn all(&self) -> Vec<AssignmentRecord> {
        let mut records: Vec<AssignmentRecord> = self
            .attempts
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.matched_at.cmp(&b.matched_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    pub fn success_count(&self) -> usize {
        self.successes.len()
    }
}
