//! At-least-once command queue between the request handler and the worker.
//!
//! Semantics follow a visibility-timeout queue: a received message is hidden
//! for `visibility` and comes back unless acked with the receipt handle it
//! was delivered with.

use std::time::Duration;

use spinup_model::Command;

mod db;
mod memory;

pub use db::{DEFAULT_POLL_INTERVAL, DbCommandQueue};
pub use memory::MemoryCommandQueue;

/// Upper bound for a single long-poll.
pub const MAX_RECEIVE_WAIT: Duration = Duration::from_secs(20);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReceiveOptions {
    pub max_messages: usize,
    pub wait: Duration,
    pub visibility: Duration,
}

impl Default for ReceiveOptions {
    fn default() -> Self {
        Self {
            max_messages: 1,
            wait: MAX_RECEIVE_WAIT,
            visibility: Duration::from_secs(30),
        }
    }
}

/// One received message. `receipt_handle` is only valid for this delivery;
/// a redelivery carries a new one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub message_id: String,
    pub receipt_handle: String,
    pub body: String,
    pub receive_count: u32,
}

#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    #[error("command queue unavailable: {0}")]
    Db(#[from] sea_orm::DbErr),
    #[error("encode command: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait::async_trait]
pub trait CommandChannel: Send + Sync {
    /// Append a raw body. Exposed so malformed input can reach the queue the
    /// same way it would from a foreign producer.
    async fn send_body(&self, body: String) -> Result<(), ChannelError>;

    /// Long-poll for up to `opts.max_messages`. An empty batch is normal.
    async fn receive(&self, opts: &ReceiveOptions) -> Result<Vec<Delivery>, ChannelError>;

    /// Delete by receipt handle. Unknown or stale handles are not an error.
    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError>;

    async fn send(&self, command: &Command) -> Result<(), ChannelError> {
        self.send_body(command.encode()?).await
    }
}

fn clamp_options(opts: &ReceiveOptions) -> ReceiveOptions {
    ReceiveOptions {
        max_messages: opts.max_messages.clamp(1, 10),
        wait: opts.wait.min(MAX_RECEIVE_WAIT),
        visibility: opts.visibility,
    }
}
