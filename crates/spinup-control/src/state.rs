use std::{sync::Arc, time::Duration};

use anyhow::Context;
use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;

use crate::handler::RequestHandler;

#[derive(Clone)]
pub struct AppState {
    pub handler: Arc<RequestHandler>,
    pub reply_delay: Duration,
}

/// Connect and apply migrations (idempotent). Shared by both binaries.
pub async fn init_db_and_migrate(database_url: &str) -> anyhow::Result<Arc<DatabaseConnection>> {
    let db = spinup_db::connect(database_url)
        .await
        .context("connect database")?;

    spinup_migration::Migrator::up(&db, None)
        .await
        .context("apply migrations")?;

    Ok(Arc::new(db))
}
