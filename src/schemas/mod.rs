use std::collections::HashMap;

use serde::Serialize;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::core::time::format_primitive;
use crate::db::models::Task;
use crate::db::types::TaskStatus;

#[derive(Debug, Serialize)]
pub(crate) struct RootResponse {
    pub(crate) message: String,
    pub(crate) version: String,
}

#[derive(Debug, Serialize)]
pub(crate) struct HealthResponse {
    pub(crate) service: String,
    pub(crate) status: String,
    pub(crate) components: HashMap<String, String>,
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskResponse {
    pub(crate) id: Uuid,
    pub(crate) status: TaskStatus,
    pub(crate) file_name: String,
    pub(crate) content_type: String,
    pub(crate) schema: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) result: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub(crate) error: Option<String>,
    pub(crate) created_at: String,
    pub(crate) updated_at: String,
    pub(crate) completed_at: Option<String>,
}

impl From<Task> for TaskResponse {
    fn from(task: Task) -> Self {
        Self {
            id: task.id,
            status: task.status,
            file_name: task.file_name,
            content_type: task.content_type,
            schema: task.schema.0,
            result: task.result.map(|json| json.0),
            error: task.error,
            created_at: format_primitive(task.created_at),
            updated_at: format_primitive(task.updated_at),
            completed_at: task.completed_at.map(format_primitive),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct TaskListResponse {
    pub(crate) tasks: Vec<TaskResponse>,
    pub(crate) total: i64,
    pub(crate) page: i64,
    pub(crate) page_size: i64,
    pub(crate) total_pages: i64,
}
