use anyhow::{anyhow, Context, Result};
use redis::AsyncCommands;
use uuid::Uuid;

use crate::core::redis::RedisHandle;

use super::{lane_key, QueueMessage, LANE_RECOGNITION};

/// Pushes recognition jobs onto the high priority lane.
#[derive(Clone)]
pub(crate) struct TaskProducer {
    redis: RedisHandle,
}

impl TaskProducer {
    pub(crate) fn new(redis: RedisHandle) -> Self {
        Self { redis }
    }

    pub(crate) async fn enqueue(&self, task_id: Uuid) -> Result<()> {
        let mut manager =
            self.redis.manager().await.ok_or_else(|| anyhow!("Redis is not connected"))?;

        let message = QueueMessage { task_id, attempt: 0 };
        let payload = serde_json::to_string(&message).context("Failed to encode queue message")?;

        manager
            .lpush::<_, _, ()>(lane_key(LANE_RECOGNITION), payload)
            .await
            .context("Failed to enqueue recognition task")?;

        metrics::counter!("queue_enqueued_total", "lane" => LANE_RECOGNITION).increment(1);
        tracing::debug!(task_id = %task_id, "Recognition task enqueued");

        Ok(())
    }
}
