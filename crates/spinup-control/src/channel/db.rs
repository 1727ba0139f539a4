use std::{sync::Arc, time::Duration};

use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
    sea_query::Expr,
};
use spinup_db::entities::command_messages;

use super::{ChannelError, CommandChannel, Delivery, ReceiveOptions, clamp_options};
use crate::clock::{SharedClock, whole_millis};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Visibility-timeout queue on the `command_messages` table.
///
/// A message is claimed by a conditional update keyed on its current
/// `visible_at_ms`; whoever moves it first owns the delivery, so concurrent
/// receivers never share one within a visibility window.
pub struct DbCommandQueue {
    db: Arc<DatabaseConnection>,
    clock: SharedClock,
    poll_interval: Duration,
}

impl DbCommandQueue {
    pub fn new(db: Arc<DatabaseConnection>, clock: SharedClock, poll_interval: Duration) -> Self {
        Self {
            db,
            clock,
            poll_interval: poll_interval.max(Duration::from_millis(10)),
        }
    }

    async fn claim_visible(&self, opts: &ReceiveOptions) -> Result<Vec<Delivery>, ChannelError> {
        let now_ms = self.clock.now().timestamp_millis();
        let hidden_until = now_ms.saturating_add(whole_millis(opts.visibility));

        let candidates = command_messages::Entity::find()
            .filter(command_messages::Column::VisibleAtMs.lte(now_ms))
            .order_by_asc(command_messages::Column::SentAtMs)
            .order_by_asc(command_messages::Column::Id)
            .limit(opts.max_messages as u64)
            .all(&*self.db)
            .await?;

        let mut out = Vec::with_capacity(candidates.len());
        for m in candidates {
            let receipt = uuid::Uuid::new_v4().to_string();
            let res = command_messages::Entity::update_many()
                .col_expr(command_messages::Column::VisibleAtMs, Expr::value(hidden_until))
                .col_expr(
                    command_messages::Column::ReceiptHandle,
                    Expr::value(Some(receipt.clone())),
                )
                .col_expr(
                    command_messages::Column::ReceiveCount,
                    Expr::col(command_messages::Column::ReceiveCount).add(1),
                )
                .filter(command_messages::Column::Id.eq(m.id))
                .filter(command_messages::Column::VisibleAtMs.eq(m.visible_at_ms))
                .exec(&*self.db)
                .await?;

            if res.rows_affected != 1 {
                // Another receiver got there first.
                continue;
            }

            out.push(Delivery {
                message_id: m.id.to_string(),
                receipt_handle: receipt,
                body: m.body,
                receive_count: u32::try_from(m.receive_count.saturating_add(1)).unwrap_or(0),
            });
        }
        Ok(out)
    }
}

#[async_trait::async_trait]
impl CommandChannel for DbCommandQueue {
    async fn send_body(&self, body: String) -> Result<(), ChannelError> {
        let now_ms = self.clock.now().timestamp_millis();
        command_messages::Entity::insert(command_messages::ActiveModel {
            id: Set(uuid::Uuid::new_v4()),
            body: Set(body),
            sent_at_ms: Set(now_ms),
            visible_at_ms: Set(now_ms),
            receipt_handle: Set(None),
            receive_count: Set(0),
        })
        .exec_without_returning(&*self.db)
        .await?;
        Ok(())
    }

    async fn receive(&self, opts: &ReceiveOptions) -> Result<Vec<Delivery>, ChannelError> {
        let opts = clamp_options(opts);
        let deadline = tokio::time::Instant::now() + opts.wait;
        loop {
            let batch = self.claim_visible(&opts).await?;
            if !batch.is_empty() {
                return Ok(batch);
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(batch);
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        }
    }

    async fn ack(&self, delivery: &Delivery) -> Result<(), ChannelError> {
        let res = command_messages::Entity::delete_many()
            .filter(command_messages::Column::ReceiptHandle.eq(delivery.receipt_handle.as_str()))
            .exec(&*self.db)
            .await?;
        if res.rows_affected == 0 {
            tracing::debug!(
                message_id = %delivery.message_id,
                "ack matched no message (already deleted or redelivered)"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use spinup_model::{Command, CommandKind};

    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{interaction, sqlite_memory};

    fn opts() -> ReceiveOptions {
        ReceiveOptions {
            max_messages: 1,
            wait: Duration::ZERO,
            visibility: Duration::from_secs(30),
        }
    }

    async fn queue(clock: &ManualClock) -> DbCommandQueue {
        DbCommandQueue::new(
            sqlite_memory().await,
            Arc::new(clock.clone()),
            DEFAULT_POLL_INTERVAL,
        )
    }

    #[tokio::test]
    async fn command_round_trips_through_queue() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let q = queue(&clock).await;
        let cmd = Command::new(CommandKind::StartServer, interaction());
        q.send(&cmd).await.unwrap();

        let batch = q.receive(&opts()).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(Command::decode(&batch[0].body).unwrap(), cmd);
        assert_eq!(batch[0].receive_count, 1);
    }

    #[tokio::test]
    async fn hidden_until_visibility_expires() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let q = queue(&clock).await;
        q.send_body("x".to_string()).await.unwrap();

        let first = q.receive(&opts()).await.unwrap().remove(0);
        clock.advance(Duration::from_secs(29));
        assert!(q.receive(&opts()).await.unwrap().is_empty());

        clock.advance(Duration::from_secs(1));
        let again = q.receive(&opts()).await.unwrap().remove(0);
        assert_eq!(again.message_id, first.message_id);
        assert_eq!(again.receive_count, 2);
    }

    #[tokio::test]
    async fn ack_is_idempotent_and_prevents_redelivery() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let q = queue(&clock).await;
        q.send_body("x".to_string()).await.unwrap();

        let d = q.receive(&opts()).await.unwrap().remove(0);
        q.ack(&d).await.unwrap();
        q.ack(&d).await.unwrap();

        clock.advance(Duration::from_secs(60));
        assert!(q.receive(&opts()).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn batch_is_oldest_first() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let q = queue(&clock).await;
        q.send_body("first".to_string()).await.unwrap();
        clock.advance(Duration::from_millis(5));
        q.send_body("second".to_string()).await.unwrap();

        let batch = q
            .receive(&ReceiveOptions {
                max_messages: 10,
                ..opts()
            })
            .await
            .unwrap();
        let bodies: Vec<_> = batch.iter().map(|d| d.body.as_str()).collect();
        assert_eq!(bodies, ["first", "second"]);
    }

    #[tokio::test]
    async fn empty_long_poll_returns_after_wait() {
        let clock = ManualClock::at_unix(1_700_000_000);
        let q = DbCommandQueue::new(
            sqlite_memory().await,
            Arc::new(clock),
            Duration::from_millis(50),
        );
        let started = tokio::time::Instant::now();
        let batch = q
            .receive(&ReceiveOptions {
                wait: Duration::from_millis(200),
                ..opts()
            })
            .await
            .unwrap();
        assert!(batch.is_empty());
        assert!(started.elapsed() >= Duration::from_millis(200));
    }
}
