use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sqlx::types::Json;
use sqlx::FromRow;
use thiserror::Error;
use time::PrimitiveDateTime;
use uuid::Uuid;

use crate::core::time::primitive_now_utc;
use crate::db::types::TaskStatus;

#[derive(Debug, Error)]
pub(crate) enum TaskError {
    #[error("schema cannot be empty")]
    EmptySchema,
    #[error("file key cannot be empty")]
    EmptyFileKey,
    #[error("invalid state transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: TaskStatus, to: TaskStatus },
}

/// One document-recognition work item. Mutated only through the transition
/// methods below; the repository is the sole arbiter of the durable state.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub(crate) struct Task {
    pub(crate) id: Uuid,
    pub(crate) status: TaskStatus,
    pub(crate) file_key: String,
    pub(crate) file_name: String,
    pub(crate) content_type: String,
    pub(crate) schema: Json<Vec<String>>,
    pub(crate) result: Option<Json<Map<String, Value>>>,
    pub(crate) error: Option<String>,
    pub(crate) created_at: PrimitiveDateTime,
    pub(crate) updated_at: PrimitiveDateTime,
    pub(crate) completed_at: Option<PrimitiveDateTime>,
}

impl Task {
    pub(crate) fn new(
        file_key: String,
        file_name: String,
        content_type: String,
        schema: Vec<String>,
    ) -> Result<Self, TaskError> {
        if file_key.is_empty() {
            return Err(TaskError::EmptyFileKey);
        }
        if schema.is_empty() {
            return Err(TaskError::EmptySchema);
        }

        let now = primitive_now_utc();

        Ok(Self {
            id: Uuid::new_v4(),
            status: TaskStatus::Pending,
            file_key,
            file_name,
            content_type,
            schema: Json(schema),
            result: None,
            error: None,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub(crate) fn mark_processing(&mut self) -> Result<(), TaskError> {
        if self.status != TaskStatus::Pending {
            return Err(TaskError::InvalidStateTransition {
                from: self.status,
                to: TaskStatus::Processing,
            });
        }
        self.status = TaskStatus::Processing;
        self.updated_at = primitive_now_utc();
        Ok(())
    }

    pub(crate) fn mark_completed(&mut self, result: Map<String, Value>) -> Result<(), TaskError> {
        if self.status != TaskStatus::Processing {
            return Err(TaskError::InvalidStateTransition {
                from: self.status,
                to: TaskStatus::Completed,
            });
        }
        let now = primitive_now_utc();
        self.status = TaskStatus::Completed;
        self.result = Some(Json(result));
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }

    pub(crate) fn mark_failed(&mut self, message: &str) -> Result<(), TaskError> {
        if !matches!(self.status, TaskStatus::Pending | TaskStatus::Processing) {
            return Err(TaskError::InvalidStateTransition {
                from: self.status,
                to: TaskStatus::Failed,
            });
        }
        let now = primitive_now_utc();
        self.status = TaskStatus::Failed;
        self.error = Some(message.to_string());
        self.updated_at = now;
        self.completed_at = Some(now);
        Ok(())
    }
}
