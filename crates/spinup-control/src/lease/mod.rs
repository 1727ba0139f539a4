//! Lease-guarded control state for the managed server.
//!
//! The store is the only place where start exclusion is decided. Callers
//! never cache a `StateRecord` as a source of truth; they read it, decide,
//! and let the conditional write in [`LeaseStore::try_acquire_start`] settle
//! any race.

use std::time::Duration;

use spinup_model::{ServerState, StateRecord, UnknownState};

mod db;
mod memory;

pub use db::DbLeaseStore;
pub use memory::MemoryLeaseStore;

pub const DEFAULT_START_LEASE: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_HEARTBEAT_LEASE: Duration = Duration::from_secs(4 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaseDurations {
    /// Granted by a successful start acquisition.
    pub start_lease: Duration,
    /// Granted by every heartbeat; must exceed the heartbeat interval.
    pub heartbeat_lease: Duration,
}

impl Default for LeaseDurations {
    fn default() -> Self {
        Self {
            start_lease: DEFAULT_START_LEASE,
            heartbeat_lease: DEFAULT_HEARTBEAT_LEASE,
        }
    }
}

/// Result of a point read. Absence is a normal answer, not an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Lookup {
    Found(StateRecord),
    NotFound,
}

impl Lookup {
    pub fn record(&self) -> Option<&StateRecord> {
        match self {
            Lookup::Found(r) => Some(r),
            Lookup::NotFound => None,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("lease store unavailable: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("stored record for {id} is unreadable: {reason}")]
    Corrupt { id: String, reason: UnknownState },
}

#[derive(Debug, thiserror::Error)]
pub enum AcquireError {
    #[error("another start is already in progress")]
    LeaseConflict,
    #[error(transparent)]
    Store(#[from] StoreError),
}

#[async_trait::async_trait]
pub trait LeaseStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Lookup, StoreError>;

    /// Unconditional upsert of `state` with a fresh heartbeat lease.
    async fn heartbeat(&self, id: &str, state: ServerState) -> Result<(), StoreError>;

    /// Atomically claim `startPending` if the record is absent, `stopped`,
    /// or its lease has lapsed. Anything else is a [`AcquireError::LeaseConflict`].
    async fn try_acquire_start(&self, id: &str) -> Result<(), AcquireError>;
}

/// The acquisition predicate, folded so that absence counts as `stopped`.
pub fn start_eligible(existing: Option<&StateRecord>, now_unix: i64) -> bool {
    match existing {
        None => true,
        Some(r) => r.state == ServerState::Stopped || r.lease_expiry <= now_unix,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(state: ServerState, lease_expiry: i64) -> StateRecord {
        StateRecord {
            id: "srv-1".to_string(),
            state,
            lease_expiry,
        }
    }

    #[test]
    fn absent_and_stopped_are_eligible() {
        assert!(start_eligible(None, 100));
        assert!(start_eligible(Some(&rec(ServerState::Stopped, 500)), 100));
    }

    #[test]
    fn fresh_claims_are_not_eligible() {
        for state in [
            ServerState::StartPending,
            ServerState::Running,
            ServerState::StopPending,
        ] {
            assert!(!start_eligible(Some(&rec(state, 101)), 100), "{state}");
        }
    }

    #[test]
    fn expiry_boundary_is_reclaimable() {
        assert!(start_eligible(Some(&rec(ServerState::Running, 100)), 100));
        assert!(start_eligible(Some(&rec(ServerState::StartPending, 40)), 100));
    }
}
