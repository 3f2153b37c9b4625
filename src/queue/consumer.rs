use std::sync::Arc;

use anyhow::Result;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use tokio::sync::watch;
use tokio::time::{sleep, Duration};

use crate::core::config::QueueSettings;
use crate::core::redis::RedisHandle;

use super::{
    lane_key, HandlerError, QueueMessage, TaskHandler, DEAD_LETTER_KEY, LANE_DEFAULT,
    LANE_RECOGNITION,
};

const POP_TIMEOUT_SECONDS: usize = 2;

/// Runs the consumer until a shutdown signal arrives. Spawns one polling loop
/// per configured worker; each loop drains the recognition lane before the
/// default lane.
pub(crate) async fn run(
    queue: QueueSettings,
    redis: RedisHandle,
    handler: Arc<dyn TaskHandler>,
) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut handles = Vec::with_capacity(queue.concurrency);
    for worker_id in 0..queue.concurrency {
        handles.push(tokio::spawn(worker_loop(
            worker_id,
            redis.clone(),
            handler.clone(),
            queue.max_retries,
            shutdown_rx.clone(),
        )));
    }

    tracing::info!(concurrency = queue.concurrency, "Queue consumer started");

    crate::core::shutdown::shutdown_signal().await;
    if shutdown_tx.send(true).is_err() {
        tracing::warn!("Failed to broadcast shutdown signal to queue workers");
    }

    for handle in handles {
        if let Err(err) = handle.await {
            tracing::error!(error = %err, "Queue worker join failed");
        }
    }

    Ok(())
}

async fn worker_loop(
    worker_id: usize,
    redis: RedisHandle,
    handler: Arc<dyn TaskHandler>,
    max_retries: u32,
    mut shutdown: watch::Receiver<bool>,
) {
    let recognition_key = lane_key(LANE_RECOGNITION);
    let default_key = lane_key(LANE_DEFAULT);

    loop {
        if *shutdown.borrow() {
            break;
        }

        let Some(mut manager) = redis.manager().await else {
            tracing::error!(worker_id, "Redis connection lost; retrying");
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = sleep(Duration::from_secs(2)) => {}
            }
            continue;
        };

        let popped = redis::cmd("BRPOP")
            .arg(&recognition_key)
            .arg(&default_key)
            .arg(POP_TIMEOUT_SECONDS)
            .query_async::<_, Option<(String, String)>>(&mut manager)
            .await;

        match popped {
            Ok(Some((queue_key, payload))) => {
                handle_delivery(&mut manager, handler.as_ref(), &queue_key, &payload, max_retries)
                    .await;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!(worker_id, error = %err, "Queue poll failed");
                tokio::select! {
                    _ = shutdown.changed() => break,
                    _ = sleep(Duration::from_secs(2)) => {}
                }
            }
        }
    }
}

/// Processes one popped payload: runs the handler, re-enqueues retryable
/// failures onto the lane the message came from, and dead-letters messages
/// that exhausted the retry ceiling or cannot be decoded.
pub(crate) async fn handle_delivery(
    manager: &mut ConnectionManager,
    handler: &dyn TaskHandler,
    queue_key: &str,
    payload: &str,
    max_retries: u32,
) {
    let message: QueueMessage = match serde_json::from_str(payload) {
        Ok(message) => message,
        Err(err) => {
            tracing::error!(error = %err, "Dropping malformed queue payload to dead letter list");
            dead_letter(manager, payload).await;
            return;
        }
    };

    match handler.handle(message.task_id).await {
        Ok(()) => {
            metrics::counter!("queue_processed_total", "status" => "success").increment(1);
        }
        Err(HandlerError::Fatal(reason)) => {
            tracing::error!(task_id = %message.task_id, reason, "Task failed permanently");
            metrics::counter!("queue_processed_total", "status" => "fatal").increment(1);
            dead_letter(manager, payload).await;
        }
        Err(HandlerError::Retryable(reason)) => {
            let attempt = message.attempt + 1;
            if attempt >= max_retries {
                tracing::error!(
                    task_id = %message.task_id,
                    attempt,
                    reason,
                    "Task exhausted retries"
                );
                metrics::counter!("queue_processed_total", "status" => "exhausted").increment(1);
                dead_letter(manager, payload).await;
                return;
            }

            tracing::warn!(task_id = %message.task_id, attempt, reason, "Retrying task");
            metrics::counter!("queue_processed_total", "status" => "retried").increment(1);

            let retry = QueueMessage { task_id: message.task_id, attempt };
            match serde_json::to_string(&retry) {
                Ok(retry_payload) => {
                    if let Err(err) =
                        manager.lpush::<_, _, ()>(queue_key, retry_payload).await
                    {
                        tracing::error!(
                            task_id = %message.task_id,
                            error = %err,
                            "Failed to re-enqueue task; moving to dead letter list"
                        );
                        dead_letter(manager, payload).await;
                    }
                }
                Err(err) => {
                    tracing::error!(task_id = %message.task_id, error = %err, "Failed to encode retry");
                    dead_letter(manager, payload).await;
                }
            }
        }
    }
}

async fn dead_letter(manager: &mut ConnectionManager, payload: &str) {
    if let Err(err) = manager.lpush::<_, _, ()>(DEAD_LETTER_KEY, payload).await {
        tracing::error!(error = %err, "Failed to push payload to dead letter list");
    }
    metrics::counter!("queue_dead_letter_total").increment(1);
}
