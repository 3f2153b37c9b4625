use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::models::{Task, TaskError};
use crate::queue::{HandlerError, TaskHandler};
use crate::repositories::tasks;
use crate::services::rasterize::{PageRasterizer, RasterizeError};
use crate::services::recognition::Recognizer;
use crate::services::storage::FileStorage;

const PDF_CONTENT_TYPE: &str = "application/pdf";

#[derive(Debug, Error)]
pub(crate) enum PipelineError {
    #[error("task {0} not found")]
    TaskNotFound(Uuid),
    #[error("failed to download document: {0}")]
    Download(anyhow::Error),
    #[error("failed to rasterize document: {0}")]
    Rasterize(#[from] RasterizeError),
    #[error("recognition failed: {0}")]
    Recognition(anyhow::Error),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("invalid task state: {0}")]
    InvalidTransition(#[from] TaskError),
}

/// Drives one recognition job from claim to terminal state.
pub(crate) struct RecognitionPipeline {
    db: PgPool,
    storage: Arc<dyn FileStorage>,
    recognizer: Arc<dyn Recognizer>,
    rasterizer: Arc<dyn PageRasterizer>,
}

impl RecognitionPipeline {
    pub(crate) fn new(
        db: PgPool,
        storage: Arc<dyn FileStorage>,
        recognizer: Arc<dyn Recognizer>,
        rasterizer: Arc<dyn PageRasterizer>,
    ) -> Self {
        Self { db, storage, recognizer, rasterizer }
    }

    pub(crate) async fn process_task(&self, task_id: Uuid) -> Result<(), PipelineError> {
        let timer = Instant::now();

        let mut task = tasks::find_by_id(&self.db, task_id)
            .await?
            .ok_or(PipelineError::TaskNotFound(task_id))?;

        if task.status.is_terminal() {
            tracing::info!(task_id = %task_id, status = ?task.status, "Skipping terminal task");
            metrics::counter!("recognition_jobs_total", "status" => "skipped").increment(1);
            return Ok(());
        }

        // Single-winner claim. Losing means another worker holds the task;
        // redelivery of this message must not disturb it.
        if !tasks::claim_processing(&self.db, task_id, primitive_now_utc()).await? {
            tracing::info!(task_id = %task_id, "Task already claimed by another worker");
            metrics::counter!("recognition_jobs_total", "status" => "lost_claim").increment(1);
            return Ok(());
        }
        task.mark_processing()?;

        let document = match self.storage.download(&task.file_key).await {
            Ok(bytes) => bytes,
            Err(err) => {
                let err = PipelineError::Download(err);
                self.fail_task(&mut task, &err.to_string()).await;
                return Err(err);
            }
        };

        let image = match self.normalize(&task, document).await {
            Ok(bytes) => bytes,
            Err(err) => {
                self.fail_task(&mut task, &err.to_string()).await;
                return Err(err);
            }
        };

        let result = match self.recognizer.recognize(&image, &task.schema.0).await {
            Ok(map) => map,
            Err(err) => {
                let err = PipelineError::Recognition(err);
                self.fail_task(&mut task, &err.to_string()).await;
                return Err(err);
            }
        };

        task.mark_completed(result)?;
        if !tasks::update(&self.db, &task).await? {
            // Deleted concurrently; nothing left to persist.
            tracing::warn!(task_id = %task_id, "Task deleted before result could be stored");
            return Ok(());
        }

        metrics::counter!("recognition_jobs_total", "status" => "success").increment(1);
        metrics::histogram!("recognition_duration_seconds").record(timer.elapsed().as_secs_f64());
        tracing::info!(task_id = %task_id, "Recognition succeeded");

        Ok(())
    }

    /// PDFs are rendered to a first-page PNG on a blocking thread; every other
    /// supported content type is already an image the model accepts.
    async fn normalize(&self, task: &Task, document: Vec<u8>) -> Result<Vec<u8>, PipelineError> {
        let is_pdf = task.content_type == PDF_CONTENT_TYPE
            || task.file_name.to_ascii_lowercase().ends_with(".pdf");
        if !is_pdf {
            return Ok(document);
        }

        let rasterizer = self.rasterizer.clone();
        tokio::task::spawn_blocking(move || rasterizer.first_page(&document))
            .await
            .map_err(|err| RasterizeError::Render(err.to_string()))?
            .map_err(PipelineError::Rasterize)
    }

    /// Records the failure on the task. A persistence error here is logged
    /// and swallowed so the original pipeline error stays the one reported.
    async fn fail_task(&self, task: &mut Task, message: &str) {
        metrics::counter!("recognition_jobs_total", "status" => "failed").increment(1);
        tracing::error!(task_id = %task.id, error = message, "Recognition failed");

        if let Err(err) = task.mark_failed(message) {
            tracing::error!(task_id = %task.id, error = %err, "Cannot mark task as failed");
            return;
        }
        match tasks::update(&self.db, task).await {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!(task_id = %task.id, "Task vanished while persisting failure");
            }
            Err(err) => {
                tracing::error!(task_id = %task.id, error = %err, "Failed to persist task failure");
            }
        }
    }
}

#[async_trait]
impl TaskHandler for RecognitionPipeline {
    async fn handle(&self, task_id: Uuid) -> Result<(), HandlerError> {
        match self.process_task(task_id).await {
            Ok(()) => Ok(()),
            Err(err @ PipelineError::TaskNotFound(_)) => Err(HandlerError::Fatal(err.to_string())),
            Err(err) => Err(HandlerError::Retryable(err.to_string())),
        }
    }
}
