use std::{path::PathBuf, sync::Arc, time::Duration};

use spinup_control::{
    channel::{CommandChannel, Delivery, ReceiveOptions},
    clock::SharedClock,
    config::Settings,
    lease::LeaseStore,
    notify::NotificationSink,
    provider::ResourceProvider,
};
use spinup_model::{Command, CommandKind, ServerState};
use tokio::sync::watch;
use tracing::{Instrument, info_span};

use crate::{
    followup::{FollowupMarker, write_marker},
    heartbeat::HeartbeatSchedule,
};

#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub heartbeat_interval: Duration,
    pub receive: ReceiveOptions,
    pub receive_backoff: Duration,
    pub followup_marker: Option<PathBuf>,
    pub webhook_api_base: String,
}

impl WorkerConfig {
    pub fn from_settings(s: &Settings) -> Self {
        Self {
            heartbeat_interval: s.heartbeat_interval,
            receive: s.receive,
            receive_backoff: s.receive_backoff,
            followup_marker: s.followup_marker.clone(),
            webhook_api_base: s.webhook_api_base.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// Body could not be decoded; acked so it never comes back.
    Poison,
    Notified(CommandKind),
    /// Posting failed; the message was acked anyway.
    NotifyFailed(CommandKind),
    Ignored(String),
}

pub struct Worker {
    resource_id: String,
    store: Arc<dyn LeaseStore>,
    channel: Arc<dyn CommandChannel>,
    provider: Arc<dyn ResourceProvider>,
    notifier: Arc<dyn NotificationSink>,
    clock: SharedClock,
    config: WorkerConfig,
    schedule: HeartbeatSchedule,
}

impl Worker {
    pub fn new(
        resource_id: impl Into<String>,
        store: Arc<dyn LeaseStore>,
        channel: Arc<dyn CommandChannel>,
        provider: Arc<dyn ResourceProvider>,
        notifier: Arc<dyn NotificationSink>,
        clock: SharedClock,
        config: WorkerConfig,
    ) -> Self {
        let schedule = HeartbeatSchedule::new(config.heartbeat_interval, clock.now());
        Self {
            resource_id: resource_id.into(),
            store,
            channel,
            provider,
            notifier,
            clock,
            config,
            schedule,
        }
    }

    /// Loop until `shutdown` flips to true. The flag is checked between
    /// iterations, so an in-flight long poll finishes first.
    pub async fn run(mut self, shutdown: watch::Receiver<bool>) {
        let span = info_span!("worker", resource_id = %self.resource_id);
        async move {
            tracing::info!("worker started");
            loop {
                let stop = *shutdown.borrow();
                if stop {
                    break;
                }
                self.tick().await;
            }
            tracing::info!("worker stopped");
        }
        .instrument(span)
        .await;
    }

    /// One iteration: heartbeat if due, then one receive and its batch.
    pub async fn tick(&mut self) {
        self.heartbeat_if_due().await;

        match self.channel.receive(&self.config.receive).await {
            Ok(batch) => {
                self.process_batch(&batch).await;
            }
            Err(e) => {
                tracing::warn!(error = %e, backoff = ?self.config.receive_backoff, "receive failed");
                tokio::time::sleep(self.config.receive_backoff).await;
            }
        }
    }

    async fn heartbeat_if_due(&mut self) {
        let now = self.clock.now();
        if !self.schedule.is_due(now) {
            return;
        }
        if let Err(e) = self.store.heartbeat(&self.resource_id, ServerState::Running).await {
            tracing::warn!(error = %e, "heartbeat failed");
        }
        self.schedule.mark_attempted(now);
        tracing::debug!(next_due = %self.schedule.next_due(), "next heartbeat");
    }

    pub async fn process_batch(&self, batch: &[Delivery]) -> Vec<MessageOutcome> {
        let mut out = Vec::with_capacity(batch.len());
        for d in batch {
            out.push(self.process(d).await);
        }
        out
    }

    async fn process(&self, d: &Delivery) -> MessageOutcome {
        if d.receive_count > 1 {
            tracing::info!(
                message_id = %d.message_id,
                receive_count = d.receive_count,
                "redelivered message"
            );
        }

        let cmd = match Command::decode(&d.body) {
            Ok(cmd) => cmd,
            Err(e) => {
                tracing::warn!(message_id = %d.message_id, error = %e, "dropping malformed message");
                self.ack(d).await;
                return MessageOutcome::Poison;
            }
        };

        let outcome = match &cmd.kind {
            CommandKind::StartServer | CommandKind::ShowIp => self.notify(&cmd).await,
            CommandKind::Other(kind) => {
                tracing::info!(message_id = %d.message_id, command = %kind, "unknown command type");
                MessageOutcome::Ignored(kind.clone())
            }
        };
        self.ack(d).await;
        outcome
    }

    async fn notify(&self, cmd: &Command) -> MessageOutcome {
        let text = match self.provider.describe_endpoint(&self.resource_id).await {
            Ok(ip) => endpoint_text(&cmd.kind, &ip),
            Err(e) => {
                tracing::warn!(error = %format!("{e:#}"), "describe endpoint failed");
                unknown_endpoint_text(&cmd.kind, &format!("{e:#}"))
            }
        };

        let outcome = match self.notifier.post(&cmd.data, &text).await {
            Ok(()) => MessageOutcome::Notified(cmd.kind.clone()),
            Err(e) => {
                tracing::warn!(command = %cmd.kind, error = %format!("{e:#}"), "notification failed");
                MessageOutcome::NotifyFailed(cmd.kind.clone())
            }
        };

        if cmd.kind == CommandKind::StartServer {
            self.leave_followup_marker(cmd).await;
        }
        outcome
    }

    async fn leave_followup_marker(&self, cmd: &Command) {
        let Some(path) = self.config.followup_marker.as_deref() else {
            return;
        };
        let marker = FollowupMarker::new(&cmd.data, &self.config.webhook_api_base, self.clock.now_unix());
        if let Err(e) = write_marker(path, &marker).await {
            tracing::warn!(path = %path.display(), error = %format!("{e:#}"), "write follow-up marker failed");
        }
    }

    async fn ack(&self, d: &Delivery) {
        if let Err(e) = self.channel.ack(d).await {
            tracing::warn!(message_id = %d.message_id, error = %e, "ack failed");
        }
    }
}

fn endpoint_text(kind: &CommandKind, ip: &str) -> String {
    match kind {
        CommandKind::StartServer => format!("The server is up. Address: {ip}"),
        _ => format!("Server address: {ip}"),
    }
}

fn unknown_endpoint_text(kind: &CommandKind, reason: &str) -> String {
    match kind {
        CommandKind::StartServer => {
            format!("The server is up, but its address could not be determined ({reason}).")
        }
        _ => format!("The server address could not be determined ({reason})."),
    }
}
