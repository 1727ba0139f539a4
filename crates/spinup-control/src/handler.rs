use std::sync::Arc;

use spinup_model::{Command, CommandKind, InteractionRef, ServerState};

use crate::{
    channel::CommandChannel,
    clock::SharedClock,
    lease::{AcquireError, LeaseStore, Lookup, StoreError},
    notify::NotificationSink,
    provider::ResourceProvider,
};

pub const STARTING_TEXT: &str = "Starting the server. The address will follow once it is up.";
pub const SHOW_IP_TEXT: &str = "Looking up the server address.";
pub const NOT_RUNNING_TEXT: &str = "The server is not running.";

/// Reply for a start request that found the server already claimed.
pub fn busy_text(state: ServerState) -> &'static str {
    match state {
        ServerState::StartPending => "The server is already starting. Please wait.",
        ServerState::Running => "The server is already running.",
        ServerState::StopPending => {
            "The server is shutting down. Try again once it has stopped."
        }
        ServerState::Stopped => NOT_RUNNING_TEXT,
    }
}

fn failure_text(e: &dyn std::fmt::Display) -> String {
    format!("Something went wrong: {e}")
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    /// A fresh claim was already held in this state.
    Busy(ServerState),
    /// Another caller won the conditional write between our read and write.
    LostRace,
    Failed(String),
    /// This caller owns the `startPending` lease.
    Starting,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShowIpOutcome {
    Queued,
    NotRunning,
    Failed(String),
}

/// Stateless entry point for chat triggers. Safe to call concurrently; the
/// lease store's conditional write is the only exclusion.
pub struct RequestHandler {
    resource_id: String,
    store: Arc<dyn LeaseStore>,
    channel: Arc<dyn CommandChannel>,
    provider: Arc<dyn ResourceProvider>,
    notifier: Arc<dyn NotificationSink>,
    clock: SharedClock,
}

impl RequestHandler {
    pub fn new(
        resource_id: impl Into<String>,
        store: Arc<dyn LeaseStore>,
        channel: Arc<dyn CommandChannel>,
        provider: Arc<dyn ResourceProvider>,
        notifier: Arc<dyn NotificationSink>,
        clock: SharedClock,
    ) -> Self {
        Self {
            resource_id: resource_id.into(),
            store,
            channel,
            provider,
            notifier,
            clock,
        }
    }

    pub fn resource_id(&self) -> &str {
        &self.resource_id
    }

    pub async fn lookup(&self) -> Result<Lookup, StoreError> {
        self.store.get(&self.resource_id).await
    }

    pub fn now_unix(&self) -> i64 {
        self.clock.now_unix()
    }

    pub async fn start(&self, origin: &InteractionRef) -> StartOutcome {
        let id = self.resource_id.as_str();
        let now = self.clock.now_unix();

        let lookup = match self.store.get(id).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(resource_id = %id, error = %e, "read lease failed");
                return self.fail(origin, failure_text(&e)).await;
            }
        };

        if let Some(rec) = lookup.record().filter(|r| r.is_claimed(now)) {
            tracing::info!(
                resource_id = %id,
                state = %rec.state,
                lease_expiry = rec.lease_expiry,
                "start requested while claimed"
            );
            self.reply(origin, busy_text(rec.state)).await;
            if rec.state != ServerState::StopPending {
                self.enqueue(CommandKind::ShowIp, origin).await;
            }
            return StartOutcome::Busy(rec.state);
        }

        match self.store.try_acquire_start(id).await {
            Ok(()) => {}
            Err(AcquireError::LeaseConflict) => {
                tracing::info!(resource_id = %id, "lost start race");
                self.reply(origin, busy_text(ServerState::StartPending)).await;
                return StartOutcome::LostRace;
            }
            Err(AcquireError::Store(e)) => {
                tracing::warn!(resource_id = %id, error = %e, "acquire start lease failed");
                return self.fail(origin, failure_text(&e)).await;
            }
        }

        tracing::info!(resource_id = %id, "start lease acquired");
        self.enqueue(CommandKind::StartServer, origin).await;
        self.reply(origin, STARTING_TEXT).await;

        // No rollback: the lease lapses on its own if the server never comes up.
        if let Err(e) = self.provider.start(id).await {
            tracing::warn!(resource_id = %id, error = %format!("{e:#}"), "start resource failed");
        }
        StartOutcome::Starting
    }

    pub async fn show_ip(&self, origin: &InteractionRef) -> ShowIpOutcome {
        let id = self.resource_id.as_str();
        let now = self.clock.now_unix();

        let lookup = match self.store.get(id).await {
            Ok(l) => l,
            Err(e) => {
                tracing::warn!(resource_id = %id, error = %e, "read lease failed");
                let text = failure_text(&e);
                self.reply(origin, &text).await;
                return ShowIpOutcome::Failed(text);
            }
        };

        let reachable = lookup
            .record()
            .is_some_and(|r| r.is_claimed(now) && r.state != ServerState::StopPending);
        if !reachable {
            self.reply(origin, NOT_RUNNING_TEXT).await;
            return ShowIpOutcome::NotRunning;
        }

        self.enqueue(CommandKind::ShowIp, origin).await;
        self.reply(origin, SHOW_IP_TEXT).await;
        ShowIpOutcome::Queued
    }

    async fn fail(&self, origin: &InteractionRef, text: String) -> StartOutcome {
        self.reply(origin, &text).await;
        StartOutcome::Failed(text)
    }

    async fn enqueue(&self, kind: CommandKind, origin: &InteractionRef) {
        let cmd = Command::new(kind, origin.clone());
        if let Err(e) = self.channel.send(&cmd).await {
            tracing::warn!(command = %cmd.kind, error = %e, "enqueue command failed");
        }
    }

    async fn reply(&self, origin: &InteractionRef, text: &str) {
        if let Err(e) = self.notifier.post(origin, text).await {
            tracing::warn!(error = %format!("{e:#}"), "reply failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use spinup_model::StateRecord;

    use super::*;
    use crate::{
        channel::{MemoryCommandQueue, ReceiveOptions},
        clock::{Clock, ManualClock},
        lease::{LeaseDurations, MemoryLeaseStore},
        testing::{FakeProvider, RecordingNotifier, interaction},
    };

    struct Harness {
        clock: ManualClock,
        store: Arc<MemoryLeaseStore>,
        queue: Arc<MemoryCommandQueue>,
        provider: Arc<FakeProvider>,
        notifier: Arc<RecordingNotifier>,
        handler: Arc<RequestHandler>,
    }

    fn harness_with(provider: FakeProvider) -> Harness {
        let clock = ManualClock::at_unix(1_700_000_000);
        let shared: SharedClock = Arc::new(clock.clone());
        let store = Arc::new(MemoryLeaseStore::new(shared.clone(), LeaseDurations::default()));
        let queue = Arc::new(MemoryCommandQueue::new(shared.clone()));
        let provider = Arc::new(provider);
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = Arc::new(RequestHandler::new(
            "srv-1",
            store.clone(),
            queue.clone(),
            provider.clone(),
            notifier.clone(),
            shared,
        ));
        Harness {
            clock,
            store,
            queue,
            provider,
            notifier,
            handler,
        }
    }

    fn harness() -> Harness {
        harness_with(FakeProvider::default())
    }

    async fn queued_kinds(q: &MemoryCommandQueue) -> Vec<CommandKind> {
        let opts = ReceiveOptions {
            max_messages: 10,
            wait: Duration::ZERO,
            visibility: Duration::from_secs(30),
        };
        q.receive(&opts)
            .await
            .unwrap()
            .iter()
            .map(|d| Command::decode(&d.body).unwrap().kind)
            .collect()
    }

    #[tokio::test]
    async fn running_server_gets_busy_reply_and_ip_lookup() {
        let h = harness();
        h.store.insert(StateRecord {
            id: "srv-1".to_string(),
            state: ServerState::Running,
            lease_expiry: h.clock.now_unix() + 200,
        });

        let outcome = h.handler.start(&interaction()).await;

        assert_eq!(outcome, StartOutcome::Busy(ServerState::Running));
        assert_eq!(h.notifier.texts(), [busy_text(ServerState::Running)]);
        assert_eq!(queued_kinds(&h.queue).await, [CommandKind::ShowIp]);
        assert!(h.provider.starts().is_empty());
    }

    #[tokio::test]
    async fn stopping_server_gets_busy_reply_only() {
        let h = harness();
        h.store.insert(StateRecord {
            id: "srv-1".to_string(),
            state: ServerState::StopPending,
            lease_expiry: h.clock.now_unix() + 200,
        });

        let outcome = h.handler.start(&interaction()).await;

        assert_eq!(outcome, StartOutcome::Busy(ServerState::StopPending));
        assert!(h.queue.is_empty());
        assert!(h.provider.starts().is_empty());
    }

    #[test]
    fn busy_texts_are_distinct() {
        let texts = [
            busy_text(ServerState::StartPending),
            busy_text(ServerState::Running),
            busy_text(ServerState::StopPending),
        ];
        assert_ne!(texts[0], texts[1]);
        assert_ne!(texts[1], texts[2]);
        assert_ne!(texts[0], texts[2]);
    }

    #[tokio::test]
    async fn absent_record_starts_the_server() {
        let h = harness();

        let outcome = h.handler.start(&interaction()).await;

        assert_eq!(outcome, StartOutcome::Starting);
        assert_eq!(h.notifier.texts(), [STARTING_TEXT]);
        assert_eq!(queued_kinds(&h.queue).await, [CommandKind::StartServer]);
        assert_eq!(h.provider.starts(), ["srv-1"]);

        let rec = h.store.get("srv-1").await.unwrap();
        assert_eq!(rec.record().unwrap().state, ServerState::StartPending);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_start_once() {
        let h = harness();

        let mut tasks = Vec::new();
        for _ in 0..12 {
            let handler = h.handler.clone();
            tasks.push(tokio::spawn(async move { handler.start(&interaction()).await }));
        }
        let mut starting = 0;
        for t in tasks {
            if t.await.unwrap() == StartOutcome::Starting {
                starting += 1;
            }
        }

        assert_eq!(starting, 1);
        assert_eq!(h.provider.starts().len(), 1);
        let kinds = queued_kinds(&h.queue).await;
        assert_eq!(
            kinds.iter().filter(|k| **k == CommandKind::StartServer).count(),
            1
        );
    }

    #[tokio::test]
    async fn stale_claim_is_reclaimed() {
        let h = harness();
        h.store.insert(StateRecord {
            id: "srv-1".to_string(),
            state: ServerState::StartPending,
            lease_expiry: h.clock.now_unix(),
        });

        assert_eq!(h.handler.start(&interaction()).await, StartOutcome::Starting);
    }

    #[tokio::test]
    async fn start_failure_keeps_the_lease() {
        let h = harness_with(FakeProvider::default().fail_start());

        assert_eq!(h.handler.start(&interaction()).await, StartOutcome::Starting);

        let rec = h.store.get("srv-1").await.unwrap();
        assert!(rec.record().unwrap().is_claimed(h.clock.now_unix()));
        assert_eq!(
            h.handler.start(&interaction()).await,
            StartOutcome::Busy(ServerState::StartPending)
        );
    }

    #[tokio::test]
    async fn reply_failure_does_not_abort_start() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let shared: SharedClock = Arc::new(clock);
        let provider = Arc::new(FakeProvider::default());
        let handler = RequestHandler::new(
            "srv-1",
            Arc::new(MemoryLeaseStore::new(shared.clone(), LeaseDurations::default())),
            Arc::new(MemoryCommandQueue::new(shared.clone())),
            provider.clone(),
            Arc::new(RecordingNotifier::failing()),
            shared,
        );

        assert_eq!(handler.start(&interaction()).await, StartOutcome::Starting);
        assert_eq!(provider.starts(), ["srv-1"]);
    }

    struct BrokenStore;

    #[async_trait::async_trait]
    impl LeaseStore for BrokenStore {
        async fn get(&self, _id: &str) -> Result<Lookup, StoreError> {
            Err(StoreError::Db(sea_orm::DbErr::Custom("connection reset".to_string())))
        }

        async fn heartbeat(&self, _id: &str, _state: ServerState) -> Result<(), StoreError> {
            Ok(())
        }

        async fn try_acquire_start(&self, _id: &str) -> Result<(), AcquireError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn store_error_is_reported_without_starting() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let shared: SharedClock = Arc::new(clock);
        let provider = Arc::new(FakeProvider::default());
        let notifier = Arc::new(RecordingNotifier::default());
        let handler = RequestHandler::new(
            "srv-1",
            Arc::new(BrokenStore),
            Arc::new(MemoryCommandQueue::new(shared.clone())),
            provider.clone(),
            notifier.clone(),
            shared,
        );

        let StartOutcome::Failed(text) = handler.start(&interaction()).await else {
            panic!("expected failure");
        };
        assert!(text.contains("connection reset"));
        assert_eq!(notifier.texts(), [text]);
        assert!(provider.starts().is_empty());

        assert!(matches!(
            handler.show_ip(&interaction()).await,
            ShowIpOutcome::Failed(_)
        ));
    }

    #[tokio::test]
    async fn show_ip_only_queues_for_live_server() {
        let h = harness();
        assert_eq!(h.handler.show_ip(&interaction()).await, ShowIpOutcome::NotRunning);
        assert!(h.queue.is_empty());

        h.store.insert(StateRecord {
            id: "srv-1".to_string(),
            state: ServerState::Running,
            lease_expiry: h.clock.now_unix() + 60,
        });
        assert_eq!(h.handler.show_ip(&interaction()).await, ShowIpOutcome::Queued);
        assert_eq!(queued_kinds(&h.queue).await, [CommandKind::ShowIp]);

        h.clock.advance(Duration::from_secs(60));
        assert_eq!(h.handler.show_ip(&interaction()).await, ShowIpOutcome::NotRunning);
    }
}
