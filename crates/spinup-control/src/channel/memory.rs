use std::sync::Mutex;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;

use super::{ChannelError, CommandChannel, Delivery, ReceiveOptions, clamp_options};
use crate::clock::{SharedClock, after};

#[derive(Debug)]
struct Stored {
    id: String,
    body: String,
    visible_at: DateTime<Utc>,
    receipt_handle: Option<String>,
    receive_count: u32,
}

/// In-process visibility-timeout queue. Visibility uses the injected clock;
/// the long-poll wait uses tokio time.
pub struct MemoryCommandQueue {
    clock: SharedClock,
    messages: Mutex<Vec<Stored>>,
    arrived: Notify,
}

impl MemoryCommandQueue {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            clock,
            messages: Mutex::new(Vec::new()),
            arrived: Notify::new(),
        }
    }

    /// Messages not yet acked, visible or not.
    pub fn len(&self) -> usize {
        self.messages.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn claim(&self, opts: &ReceiveOptions) -> Vec<Delivery> {
        let now = self.clock.now();
        let hidden_until = after(now, opts.visibility);
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());

        let mut out = Vec::new();
        for m in messages.iter_mut().filter(|m| m.visible_at <= now) {
            if out.len() >= opts.max_messages {
                break;
            }
            let receipt = uuid::Uuid::new_v4().to_string();
            m.visible_at = hidden_until;
            m.receipt_handle = Some(receipt.clone());
            m.receive_count += 1;
            out.push(Delivery {
                message_id: m.id.clone(),
                receipt_handle: receipt,
                body: m.body.clone(),
                receive_count: m.receive_count,
            });
        }
        out
    }
}

#[async_trait::async_trait]
impl CommandChannel for MemoryCommandQueue {
    async fn send_body(&self, body: String) -> Result<(), ChannelError> {
        self.messages
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Stored {
                id: uuid::Uuid::new_v4().to_string(),
                body,
                visible_at: self.clock.now(),
                receipt_handle: None,
                receive_count: 0,
            });
        self.arrived.notify_waiters();
        Ok(())
    }

    async fn receive(&self, opts: &ReceiveOptions) -> Result<Vec<Delivery>, ChannelError> {
        let opts = clamp_options(opts);
        let deadline = tokio::time::Instant::now() + opts.wait;
        loop {
            // Register before checking so a send between the check and the
            // wait still wakes us.
            let arrived = self.arrived.notified();
            let batch = self.claim(&opts);
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, arrived).await.is_err() {
                return Ok(self.claim(&opts));
            }
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let mut messages = self.messages.lock().unwrap_or_else(|e| e.into_inner());
        messages.retain(|m| m.receipt_handle.as_deref() != Some(delivery.receipt_handle.as_str()));
        Ok(())
    }
}
