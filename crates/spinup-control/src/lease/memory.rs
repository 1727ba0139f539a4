use std::{collections::HashMap, sync::Mutex};

use spinup_model::{ServerState, StateRecord};

use super::{AcquireError, LeaseDurations, LeaseStore, Lookup, StoreError, start_eligible};
use crate::clock::{SharedClock, whole_secs};

/// In-process lease store for tests and fakes. The mutex stands in for the
/// database's row-level atomicity; it is never held across an await.
pub struct MemoryLeaseStore {
    clock: SharedClock,
    durations: LeaseDurations,
    records: Mutex<HashMap<String, StateRecord>>,
}

impl MemoryLeaseStore {
    pub fn new(clock: SharedClock, durations: LeaseDurations) -> Self {
        Self {
            clock,
            durations,
            records: Mutex::new(HashMap::new()),
        }
    }

    /// Seed a record directly, e.g. one left behind by a crashed starter.
    pub fn insert(&self, record: StateRecord) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(record.id.clone(), record);
    }
}

#[async_trait::async_trait]
impl LeaseStore for MemoryLeaseStore {
    async fn get(&self, id: &str) -> Result<Lookup, StoreError> {
        let records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        Ok(match records.get(id) {
            Some(r) => Lookup::Found(r.clone()),
            None => Lookup::NotFound,
        })
    }

    async fn heartbeat(&self, id: &str, state: ServerState) -> Result<(), StoreError> {
        let lease_expiry = self.clock.now_unix() + whole_secs(self.durations.heartbeat_lease);
        self.insert(StateRecord {
            id: id.to_string(),
            state,
            lease_expiry,
        });
        Ok(())
    }

    async fn try_acquire_start(&self, id: &str) -> Result<(), AcquireError> {
        let now = self.clock.now_unix();
        let mut records = self.records.lock().unwrap_or_else(|e| e.into_inner());
        if !start_eligible(records.get(id), now) {
            return Err(AcquireError::LeaseConflict);
        }
        records.insert(
            id.to_string(),
            StateRecord {
                id: id.to_string(),
                state: ServerState::StartPending,
                lease_expiry: now + whole_secs(self.durations.start_lease),
            },
        );
        Ok(())
    }
}
