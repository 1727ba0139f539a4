use std::sync::Arc;

use sea_orm::{
    DatabaseConnection, EntityTrait, Set,
    sea_query::{Condition, Expr, OnConflict},
};
use spinup_db::entities::server_states;
use spinup_model::{ServerState, StateRecord};

use super::{AcquireError, LeaseDurations, LeaseStore, Lookup, StoreError};
use crate::clock::{SharedClock, whole_secs};

/// Lease store backed by the `server_states` table.
///
/// Both writes are single `INSERT .. ON CONFLICT (id) DO UPDATE` statements.
/// Start acquisition attaches the eligibility predicate to the conflict
/// action, so the check and the write are one statement at the database and
/// "rows affected = 0" is the conflict signal.
pub struct DbLeaseStore {
    db: Arc<DatabaseConnection>,
    clock: SharedClock,
    durations: LeaseDurations,
}

impl DbLeaseStore {
    pub fn new(db: Arc<DatabaseConnection>, clock: SharedClock, durations: LeaseDurations) -> Self {
        Self {
            db,
            clock,
            durations,
        }
    }

    fn row(&self, id: &str, state: ServerState, lease_expiry: i64) -> server_states::ActiveModel {
        server_states::ActiveModel {
            id: Set(id.to_string()),
            state: Set(state.as_str().to_string()),
            lease_expiry: Set(lease_expiry),
            updated_at: Set(self.clock.now().into()),
        }
    }
}

fn overwrite_all() -> OnConflict {
    OnConflict::column(server_states::Column::Id)
        .update_columns([
            server_states::Column::State,
            server_states::Column::LeaseExpiry,
            server_states::Column::UpdatedAt,
        ])
        .to_owned()
}

fn record_from_model(m: server_states::Model) -> Result<StateRecord, StoreError> {
    let state = m.state.parse::<ServerState>().map_err(|reason| StoreError::Corrupt {
        id: m.id.clone(),
        reason,
    })?;
    Ok(StateRecord {
        id: m.id,
        state,
        lease_expiry: m.lease_expiry,
    })
}

#[async_trait::async_trait]
impl LeaseStore for DbLeaseStore {
    async fn get(&self, id: &str) -> Result<Lookup, StoreError> {
        let row = server_states::Entity::find_by_id(id.to_string())
            .one(&*self.db)
            .await?;
        match row {
            Some(m) => Ok(Lookup::Found(record_from_model(m)?)),
            None => Ok(Lookup::NotFound),
        }
    }

    async fn heartbeat(&self, id: &str, state: ServerState) -> Result<(), StoreError> {
        let lease_expiry = self.clock.now_unix() + whole_secs(self.durations.heartbeat_lease);
        server_states::Entity::insert(self.row(id, state, lease_expiry))
            .on_conflict(overwrite_all())
            .exec_without_returning(&*self.db)
            .await?;
        Ok(())
    }

    async fn try_acquire_start(&self, id: &str) -> Result<(), AcquireError> {
        let now = self.clock.now_unix();
        let lease_expiry = now + whole_secs(self.durations.start_lease);

        // Qualified with the table name: inside ON CONFLICT the bare column
        // would be ambiguous with `excluded`.
        let eligible = Condition::any()
            .add(
                Expr::col((server_states::Entity, server_states::Column::State))
                    .eq(ServerState::Stopped.as_str()),
            )
            .add(Expr::col((server_states::Entity, server_states::Column::LeaseExpiry)).lte(now));

        let mut on_conflict = overwrite_all();
        on_conflict.action_cond_where(eligible);

        let affected = server_states::Entity::insert(self.row(
            id,
            ServerState::StartPending,
            lease_expiry,
        ))
        .on_conflict(on_conflict)
        .exec_without_returning(&*self.db)
        .await
        .map_err(StoreError::from)?;

        if affected == 0 {
            return Err(AcquireError::LeaseConflict);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::testing::sqlite_memory;

    async fn store(clock: &ManualClock) -> Arc<DbLeaseStore> {
        Arc::new(DbLeaseStore::new(
            sqlite_memory().await,
            Arc::new(clock.clone()),
            LeaseDurations::default(),
        ))
    }

    #[tokio::test]
    async fn srv1_scenario_win_conflict_reclaim() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let store = store(&clock).await;

        assert_eq!(store.get("srv-1").await.unwrap(), Lookup::NotFound);

        store.try_acquire_start("srv-1").await.unwrap();
        let rec = store.get("srv-1").await.unwrap();
        assert_eq!(rec.record().unwrap().state, ServerState::StartPending);

        assert!(matches!(
            store.try_acquire_start("srv-1").await,
            Err(AcquireError::LeaseConflict)
        ));

        clock.advance(Duration::from_secs(5 * 60));
        store.try_acquire_start("srv-1").await.unwrap();
        let rec = store.get("srv-1").await.unwrap();
        assert_eq!(
            rec.record().unwrap().lease_expiry,
            clock.now_unix() + 5 * 60
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_acquires_have_one_winner() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let store = store(&clock).await;

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(
                async move { store.try_acquire_start("srv-1").await },
            ));
        }

        let mut wins = 0;
        let mut conflicts = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(()) => wins += 1,
                Err(AcquireError::LeaseConflict) => conflicts += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!((wins, conflicts), (1, 7));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_acquires_on_stopped_record_have_one_winner() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let store = store(&clock).await;
        store.heartbeat("srv-1", ServerState::Stopped).await.unwrap();

        let mut tasks = Vec::new();
        for _ in 0..8 {
            let store = store.clone();
            tasks.push(tokio::spawn(
                async move { store.try_acquire_start("srv-1").await },
            ));
        }

        let mut wins = 0;
        for t in tasks {
            match t.await.unwrap() {
                Ok(()) => wins += 1,
                Err(AcquireError::LeaseConflict) => {}
                Err(e) => panic!("unexpected error: {e}"),
            }
        }
        assert_eq!(wins, 1);

        let rec = store.get("srv-1").await.unwrap();
        assert_eq!(rec.record().unwrap().state, ServerState::StartPending);
    }

    #[tokio::test]
    async fn heartbeat_marks_running_and_fresh() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let store = store(&clock).await;

        store.try_acquire_start("srv-1").await.unwrap();
        store.heartbeat("srv-1", ServerState::Running).await.unwrap();

        let rec = store.get("srv-1").await.unwrap();
        let rec = rec.record().unwrap();
        assert_eq!(rec.state, ServerState::Running);
        assert!(rec.lease_expiry > clock.now_unix());
    }

    #[tokio::test]
    async fn stopped_state_is_startable_before_expiry() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let store = store(&clock).await;

        store.heartbeat("srv-1", ServerState::Stopped).await.unwrap();
        store.try_acquire_start("srv-1").await.unwrap();
    }

    #[tokio::test]
    async fn unknown_stored_state_is_reported_as_corrupt() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let db = sqlite_memory().await;
        server_states::Entity::insert(server_states::ActiveModel {
            id: Set("srv-1".to_string()),
            state: Set("hibernating".to_string()),
            lease_expiry: Set(0),
            updated_at: Set(clock.now().into()),
        })
        .exec_without_returning(&*db)
        .await
        .unwrap();

        let store = DbLeaseStore::new(db, Arc::new(clock), LeaseDurations::default());
        assert!(matches!(
            store.get("srv-1").await,
            Err(StoreError::Corrupt { .. })
        ));
    }
}
