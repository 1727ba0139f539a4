//! Fakes shared by unit tests here and by `spinup-agent`'s tests.

use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, Ordering},
};

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use sea_orm_migration::MigratorTrait;
use spinup_model::InteractionRef;

use crate::{notify::NotificationSink, provider::ResourceProvider};

/// Fresh, migrated in-memory SQLite database.
///
/// One connection only: every pooled connection to `sqlite::memory:` would
/// otherwise see its own empty database.
pub async fn sqlite_memory() -> Arc<DatabaseConnection> {
    let mut opts = ConnectOptions::new("sqlite::memory:");
    opts.max_connections(1).min_connections(1).sqlx_logging(false);
    let db = Database::connect(opts).await.expect("connect sqlite");
    spinup_migration::Migrator::up(&db, None)
        .await
        .expect("migrate sqlite");
    Arc::new(db)
}

pub fn interaction() -> InteractionRef {
    InteractionRef {
        application_id: "app-1".to_string(),
        token: "tok-1".to_string(),
        user: Some("alice".to_string()),
        channel_id: Some("chan-1".to_string()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Posted {
    pub target: InteractionRef,
    pub text: String,
}

#[derive(Debug, Default)]
pub struct RecordingNotifier {
    posts: Mutex<Vec<Posted>>,
    fail: AtomicBool,
}

impl RecordingNotifier {
    pub fn failing() -> Self {
        let n = Self::default();
        n.fail.store(true, Ordering::SeqCst);
        n
    }

    pub fn posts(&self) -> Vec<Posted> {
        self.posts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.posts().into_iter().map(|p| p.text).collect()
    }
}

#[async_trait::async_trait]
impl NotificationSink for RecordingNotifier {
    async fn post(&self, target: &InteractionRef, text: &str) -> anyhow::Result<()> {
        self.posts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Posted {
                target: target.clone(),
                text: text.to_string(),
            });
        if self.fail.load(Ordering::SeqCst) {
            anyhow::bail!("webhook unavailable");
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct FakeProvider {
    endpoint: String,
    starts: Mutex<Vec<String>>,
    fail_start: AtomicBool,
    fail_describe: AtomicBool,
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new("203.0.113.7")
    }
}

impl FakeProvider {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            starts: Mutex::new(Vec::new()),
            fail_start: AtomicBool::new(false),
            fail_describe: AtomicBool::new(false),
        }
    }

    pub fn fail_start(self) -> Self {
        self.fail_start.store(true, Ordering::SeqCst);
        self
    }

    pub fn fail_describe(self) -> Self {
        self.fail_describe.store(true, Ordering::SeqCst);
        self
    }

    pub fn starts(&self) -> Vec<String> {
        self.starts.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait::async_trait]
impl ResourceProvider for FakeProvider {
    async fn start(&self, id: &str) -> anyhow::Result<()> {
        self.starts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(id.to_string());
        if self.fail_start.load(Ordering::SeqCst) {
            anyhow::bail!("power-on hook refused {id}");
        }
        Ok(())
    }

    async fn describe_endpoint(&self, _id: &str) -> anyhow::Result<String> {
        if self.fail_describe.load(Ordering::SeqCst) {
            anyhow::bail!("check-ip timed out");
        }
        Ok(self.endpoint.clone())
    }
}
