pub(crate) mod consumer;
pub(crate) mod producer;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// High priority lane for recognition jobs. Drained before the default lane.
pub(crate) const LANE_RECOGNITION: &str = "recognition";
pub(crate) const LANE_DEFAULT: &str = "default";

pub(crate) const DEAD_LETTER_KEY: &str = "queue:dead";

pub(crate) fn lane_key(lane: &str) -> String {
    format!("queue:{lane}")
}

/// Envelope pushed onto the redis lists. `attempt` counts completed handler
/// attempts, so a freshly enqueued message carries 0.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub(crate) struct QueueMessage {
    pub(crate) task_id: Uuid,
    pub(crate) attempt: u32,
}

#[derive(Debug, Error)]
pub(crate) enum HandlerError {
    #[error("{0}")]
    Retryable(String),
    #[error("{0}")]
    Fatal(String),
}

#[async_trait]
pub(crate) trait TaskHandler: Send + Sync {
    async fn handle(&self, task_id: Uuid) -> Result<(), HandlerError>;
}
