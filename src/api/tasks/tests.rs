use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Method, Request, StatusCode},
};
use tower::ServiceExt;

use crate::api::router::router;
use crate::core::config::Settings;
use crate::db::models::Task;
use crate::repositories::tasks;
use crate::services::storage::FileStorage;
use crate::test_support;

const PNG_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake-image-payload";

async fn setup() -> (crate::core::state::AppState, axum::Router) {
    test_support::set_test_env();
    let settings = Settings::load().expect("settings");
    let state = test_support::build_state_with_db(settings).await;
    let app = router(state.clone());
    (state, app)
}

#[derive(Default)]
struct RecordingStorage {
    uploaded: Mutex<Vec<String>>,
    deleted: Mutex<Vec<String>>,
}

#[async_trait]
impl FileStorage for RecordingStorage {
    async fn upload(&self, key: &str, _content_type: &str, _bytes: Vec<u8>) -> anyhow::Result<()> {
        self.uploaded.lock().expect("lock").push(key.to_string());
        Ok(())
    }

    async fn download(&self, _key: &str) -> anyhow::Result<Vec<u8>> {
        Ok(Vec::new())
    }

    async fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.deleted.lock().expect("lock").push(key.to_string());
        Ok(())
    }

    async fn presigned_url(
        &self,
        _key: &str,
        _expires_in: std::time::Duration,
    ) -> anyhow::Result<String> {
        Ok("http://localhost/presigned".to_string())
    }
}

async fn setup_with_storage(
) -> (crate::core::state::AppState, axum::Router, Arc<RecordingStorage>) {
    test_support::set_test_env();
    let settings = Settings::load().expect("settings");
    let storage = Arc::new(RecordingStorage::default());
    let state = test_support::build_state_with_storage(settings, storage.clone()).await;
    let app = router(state.clone());
    (state, app, storage)
}

fn insertable_task() -> Task {
    Task::new(
        "2025/05/06/key/invoice.png".to_string(),
        "invoice.png".to_string(),
        "image/png".to_string(),
        vec!["invoice_number".to_string()],
    )
    .expect("task")
}

#[tokio::test]
async fn create_without_storage_returns_503() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let request = test_support::multipart_request(
        "/api/v1/tasks",
        Some(("invoice.png", "image/png", PNG_BYTES)),
        Some(r#"["invoice_number"]"#),
    );
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn create_uploads_blob_and_stores_pending_task() {
    let _guard = test_support::env_lock().await;
    let (state, app, storage) = setup_with_storage().await;

    let request = test_support::multipart_request(
        "/api/v1/tasks",
        Some(("invoice.png", "image/png", PNG_BYTES)),
        Some(r#"["invoice_number"]"#),
    );
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::CREATED);
    let body = test_support::read_json(response).await;
    assert_eq!(body["status"], "pending");

    let id: uuid::Uuid = body["id"].as_str().expect("id").parse().expect("uuid");
    let stored =
        tasks::find_by_id(state.db(), id).await.expect("find").expect("present");
    assert_eq!(storage.uploaded.lock().expect("lock").as_slice(), [stored.file_key.clone()]);
}

#[tokio::test]
async fn create_requires_schema() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let request = test_support::multipart_request(
        "/api/v1/tasks",
        Some(("invoice.png", "image/png", PNG_BYTES)),
        None,
    );
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = test_support::read_json(response).await;
    assert_eq!(body["detail"], "Schema is required");
}

#[tokio::test]
async fn create_rejects_malformed_schema() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let request = test_support::multipart_request(
        "/api/v1/tasks",
        Some(("invoice.png", "image/png", PNG_BYTES)),
        Some("not-a-json-array"),
    );
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = test_support::read_json(response).await;
    assert_eq!(body["detail"], "Schema must be a JSON array of strings");
}

#[tokio::test]
async fn create_rejects_empty_schema() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let request = test_support::multipart_request(
        "/api/v1/tasks",
        Some(("invoice.png", "image/png", PNG_BYTES)),
        Some("[]"),
    );
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = test_support::read_json(response).await;
    assert_eq!(body["detail"], "Schema cannot be empty");
}

#[tokio::test]
async fn create_rejects_unsupported_file_type() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let request = test_support::multipart_request(
        "/api/v1/tasks",
        Some(("binary.exe", "application/octet-stream", b"MZ")),
        Some(r#"["field"]"#),
    );
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = test_support::read_json(response).await;
    assert!(body["detail"].as_str().expect("detail").contains("Unsupported file type"));
}

#[tokio::test]
async fn create_requires_file() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let request =
        test_support::multipart_request("/api/v1/tasks", None, Some(r#"["field"]"#));
    let response = app.oneshot(request).await.expect("response");

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = test_support::read_json(response).await;
    assert_eq!(body["detail"], "File is required");
}

#[tokio::test]
async fn get_unknown_task_returns_404() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let uri = format!("/api/v1/tasks/{}", uuid::Uuid::new_v4());
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn get_returns_stored_task() {
    let _guard = test_support::env_lock().await;
    let (state, app) = setup().await;

    let task = insertable_task();
    tasks::create(state.db(), &task).await.expect("create");

    let response = app
        .oneshot(
            Request::builder()
                .uri(format!("/api/v1/tasks/{}", task.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["id"], task.id.to_string());
    assert_eq!(body["status"], "pending");
    assert_eq!(body["file_name"], "invoice.png");
    assert_eq!(body["schema"], serde_json::json!(["invoice_number"]));
    assert!(body.get("result").is_none());
}

#[tokio::test]
async fn list_paginates_and_filters_by_status() {
    let _guard = test_support::env_lock().await;
    let (state, app) = setup().await;

    let pending = insertable_task();
    tasks::create(state.db(), &pending).await.expect("create");

    let mut failed = insertable_task();
    failed.mark_failed("recognition failed").expect("transition");
    tasks::create(state.db(), &failed).await.expect("create");

    let response = app
        .clone()
        .oneshot(Request::builder().uri("/api/v1/tasks").body(Body::empty()).unwrap())
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::OK);
    let body = test_support::read_json(response).await;
    assert_eq!(body["total"], 2);
    assert_eq!(body["page"], 1);
    assert_eq!(body["page_size"], 20);
    assert_eq!(body["total_pages"], 1);
    assert_eq!(body["tasks"].as_array().expect("tasks").len(), 2);

    let response = app
        .clone()
        .oneshot(
            Request::builder().uri("/api/v1/tasks?status=failed").body(Body::empty()).unwrap(),
        )
        .await
        .expect("response");
    let body = test_support::read_json(response).await;
    assert_eq!(body["total"], 1);
    assert_eq!(body["tasks"][0]["id"], failed.id.to_string());
    assert_eq!(body["tasks"][0]["error"], "recognition failed");

    // Unknown status values are ignored rather than rejected.
    let response = app
        .oneshot(
            Request::builder().uri("/api/v1/tasks?status=bogus").body(Body::empty()).unwrap(),
        )
        .await
        .expect("response");
    let body = test_support::read_json(response).await;
    assert_eq!(body["total"], 2);
}

#[tokio::test]
async fn list_caps_page_size() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/tasks?page_size=1000")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");

    let body = test_support::read_json(response).await;
    assert_eq!(body["page_size"], 100);
}

#[tokio::test]
async fn delete_missing_task_returns_404() {
    let _guard = test_support::env_lock().await;
    let (_state, app) = setup().await;

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/v1/tasks/{}", uuid::Uuid::new_v4()))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn delete_removes_task_record() {
    let _guard = test_support::env_lock().await;
    let (state, app) = setup().await;

    let task = insertable_task();
    tasks::create(state.db(), &task).await.expect("create");

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/v1/tasks/{}", task.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let found = tasks::find_by_id(state.db(), task.id).await.expect("find");
    assert!(found.is_none());
}

#[tokio::test]
async fn delete_removes_blob_along_with_record() {
    let _guard = test_support::env_lock().await;
    let (state, app, storage) = setup_with_storage().await;

    let task = insertable_task();
    tasks::create(state.db(), &task).await.expect("create");

    let response = app
        .oneshot(
            Request::builder()
                .method(Method::DELETE)
                .uri(format!("/api/v1/tasks/{}", task.id))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .expect("response");

    assert_eq!(response.status(), StatusCode::NO_CONTENT);

    let found = tasks::find_by_id(state.db(), task.id).await.expect("find");
    assert!(found.is_none());
    assert_eq!(storage.deleted.lock().expect("lock").as_slice(), [task.file_key.clone()]);
}
