use axum::{
    extract::{Multipart, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::api::errors::ApiError;
use crate::api::pagination::Pagination;
use crate::api::validation::resolve_content_type;
use crate::core::state::AppState;
use crate::db::types::TaskStatus;
use crate::repositories::tasks;
use crate::schemas::{TaskListResponse, TaskResponse};
use crate::services::storage::{object_key, FileStorage};

#[cfg(test)]
mod tests;

pub(crate) fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_tasks).post(create_task))
        .route("/:id", get(get_task).delete(delete_task))
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListQuery {
    page: Option<i64>,
    page_size: Option<i64>,
    status: Option<String>,
}

async fn create_task(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<(StatusCode, Json<TaskResponse>), ApiError> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut file_name: Option<String> = None;
    let mut declared_type: Option<String> = None;
    let mut schema_raw: Option<String> = None;
    let max_bytes = state.settings().storage().max_upload_size_mb * 1024 * 1024;

    while let Some(mut field) = multipart
        .next_field()
        .await
        .map_err(|_| ApiError::BadRequest("Invalid multipart data".to_string()))?
    {
        let name = field.name().unwrap_or("").to_string();
        if name == "file" {
            file_name = field.file_name().map(|value| value.to_string());
            declared_type = field.content_type().map(|value| value.to_string());
            let mut bytes = Vec::new();
            while let Some(chunk) = field
                .chunk()
                .await
                .map_err(|_| ApiError::BadRequest("Failed to read file".to_string()))?
            {
                let next_size = bytes.len() as u64 + chunk.len() as u64;
                if next_size > max_bytes {
                    return Err(ApiError::BadRequest(format!(
                        "File size exceeds {}MB limit",
                        state.settings().storage().max_upload_size_mb
                    )));
                }
                bytes.extend_from_slice(&chunk);
            }
            file_bytes = Some(bytes);
        } else if name == "schema" {
            schema_raw = Some(
                field
                    .text()
                    .await
                    .map_err(|_| ApiError::BadRequest("Invalid schema field".to_string()))?,
            );
        }
    }

    let file_bytes =
        file_bytes.ok_or_else(|| ApiError::BadRequest("File is required".to_string()))?;
    if file_bytes.is_empty() {
        return Err(ApiError::BadRequest("File is empty".to_string()));
    }
    let file_name = file_name.unwrap_or_else(|| "document".to_string());

    let schema_raw =
        schema_raw.ok_or_else(|| ApiError::BadRequest("Schema is required".to_string()))?;
    let schema: Vec<String> = serde_json::from_str(&schema_raw).map_err(|_| {
        ApiError::BadRequest("Schema must be a JSON array of strings".to_string())
    })?;
    if schema.is_empty() {
        return Err(ApiError::BadRequest("Schema cannot be empty".to_string()));
    }

    let content_type = resolve_content_type(&file_name, declared_type.as_deref())?;

    let storage = state.storage().ok_or_else(|| {
        ApiError::ServiceUnavailable("S3 storage is not configured".to_string())
    })?;

    let file_key = object_key(&file_name);
    storage
        .upload(&file_key, &content_type, file_bytes)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to upload file"))?;

    let task = match crate::db::models::Task::new(
        file_key.clone(),
        file_name,
        content_type,
        schema,
    ) {
        Ok(task) => task,
        Err(err) => {
            cleanup_blob(storage, &file_key).await;
            return Err(ApiError::BadRequest(err.to_string()));
        }
    };

    if let Err(err) = tasks::create(state.db(), &task).await {
        cleanup_blob(storage, &file_key).await;
        return Err(ApiError::internal(err, "Failed to save task"));
    }

    // The task record survives an enqueue failure; it stays pending and can
    // be re-dispatched later.
    if let Err(err) = state.producer().enqueue(task.id).await {
        tracing::error!(task_id = %task.id, error = %err, "Failed to enqueue task");
    }

    tracing::info!(task_id = %task.id, file_name = %task.file_name, "Task created");

    Ok((StatusCode::CREATED, Json(TaskResponse::from(task))))
}

async fn get_task(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<Json<TaskResponse>, ApiError> {
    let task = tasks::find_by_id(state.db(), id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch task"))?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    Ok(Json(TaskResponse::from(task)))
}

async fn list_tasks(
    Query(query): Query<ListQuery>,
    State(state): State<AppState>,
) -> Result<Json<TaskListResponse>, ApiError> {
    let pagination = Pagination::new(query.page, query.page_size);

    // Unknown status values fall back to an unfiltered listing.
    let filter = tasks::TaskFilter {
        status: query.status.as_deref().and_then(TaskStatus::parse),
    };

    let (items, total) =
        tasks::list(state.db(), filter, pagination.limit(), pagination.offset())
            .await
            .map_err(|err| ApiError::internal(err, "Failed to list tasks"))?;

    Ok(Json(TaskListResponse {
        tasks: items.into_iter().map(TaskResponse::from).collect(),
        total,
        page: pagination.page,
        page_size: pagination.page_size,
        total_pages: pagination.total_pages(total),
    }))
}

async fn delete_task(
    Path(id): Path<Uuid>,
    State(state): State<AppState>,
) -> Result<StatusCode, ApiError> {
    let task = tasks::find_by_id(state.db(), id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to fetch task"))?
        .ok_or_else(|| ApiError::NotFound("Task not found".to_string()))?;

    // Blob removal is best effort; the record is deleted either way.
    match state.storage() {
        Some(storage) => cleanup_blob(storage, &task.file_key).await,
        None => {
            tracing::warn!(task_id = %id, "Storage not configured; skipping blob deletion");
        }
    }

    let deleted = tasks::delete(state.db(), id)
        .await
        .map_err(|err| ApiError::internal(err, "Failed to delete task"))?;
    if !deleted {
        return Err(ApiError::NotFound("Task not found".to_string()));
    }

    tracing::info!(task_id = %id, "Task deleted");

    Ok(StatusCode::NO_CONTENT)
}

async fn cleanup_blob(storage: &dyn FileStorage, key: &str) {
    if let Err(err) = storage.delete(key).await {
        tracing::warn!(file_key = key, error = %err, "Failed to delete file from storage");
    }
}
