use sqlx::PgPool;
use time::PrimitiveDateTime;

use crate::db::models::Task;
use crate::db::types::TaskStatus;

/// Optional filters for the task listing endpoint.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct TaskFilter {
    pub(crate) status: Option<TaskStatus>,
}

pub(crate) async fn create(pool: &PgPool, task: &Task) -> Result<(), sqlx::Error> {
    sqlx::query(
        "INSERT INTO tasks
            (id, status, file_key, file_name, content_type, schema, result, error,
             created_at, updated_at, completed_at)
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)",
    )
    .bind(task.id)
    .bind(task.status)
    .bind(&task.file_key)
    .bind(&task.file_name)
    .bind(&task.content_type)
    .bind(&task.schema)
    .bind(&task.result)
    .bind(&task.error)
    .bind(task.created_at)
    .bind(task.updated_at)
    .bind(task.completed_at)
    .execute(pool)
    .await?;

    Ok(())
}

pub(crate) async fn find_by_id(
    pool: &PgPool,
    id: uuid::Uuid,
) -> Result<Option<Task>, sqlx::Error> {
    sqlx::query_as::<_, Task>(
        "SELECT id, status, file_key, file_name, content_type, schema, result, error,
                created_at, updated_at, completed_at
         FROM tasks
         WHERE id = $1",
    )
    .bind(id)
    .fetch_optional(pool)
    .await
}

/// Persists the mutable fields of a task. Returns false when no row matched.
pub(crate) async fn update(pool: &PgPool, task: &Task) -> Result<bool, sqlx::Error> {
    let updated = sqlx::query(
        "UPDATE tasks
         SET status = $2,
             result = $3,
             error = $4,
             updated_at = $5,
             completed_at = $6
         WHERE id = $1",
    )
    .bind(task.id)
    .bind(task.status)
    .bind(&task.result)
    .bind(&task.error)
    .bind(task.updated_at)
    .bind(task.completed_at)
    .execute(pool)
    .await?;

    Ok(updated.rows_affected() > 0)
}

/// Moves a pending task to processing. Returns false when the task is gone or
/// another worker already claimed it, in which case the caller must back off.
pub(crate) async fn claim_processing(
    pool: &PgPool,
    id: uuid::Uuid,
    now: PrimitiveDateTime,
) -> Result<bool, sqlx::Error> {
    let claimed = sqlx::query(
        "UPDATE tasks
         SET status = $2, updated_at = $3
         WHERE id = $1 AND status = $4",
    )
    .bind(id)
    .bind(TaskStatus::Processing)
    .bind(now)
    .bind(TaskStatus::Pending)
    .execute(pool)
    .await?;

    Ok(claimed.rows_affected() > 0)
}

pub(crate) async fn delete(pool: &PgPool, id: uuid::Uuid) -> Result<bool, sqlx::Error> {
    let deleted = sqlx::query("DELETE FROM tasks WHERE id = $1").bind(id).execute(pool).await?;
    Ok(deleted.rows_affected() > 0)
}

pub(crate) async fn list(
    pool: &PgPool,
    filter: TaskFilter,
    limit: i64,
    offset: i64,
) -> Result<(Vec<Task>, i64), sqlx::Error> {
    let tasks = match filter.status {
        Some(status) => {
            sqlx::query_as::<_, Task>(
                "SELECT id, status, file_key, file_name, content_type, schema, result, error,
                        created_at, updated_at, completed_at
                 FROM tasks
                 WHERE status = $1
                 ORDER BY created_at DESC
                 LIMIT $2 OFFSET $3",
            )
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
        None => {
            sqlx::query_as::<_, Task>(
                "SELECT id, status, file_key, file_name, content_type, schema, result, error,
                        created_at, updated_at, completed_at
                 FROM tasks
                 ORDER BY created_at DESC
                 LIMIT $1 OFFSET $2",
            )
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?
        }
    };

    let total = match filter.status {
        Some(status) => {
            sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks WHERE status = $1")
                .bind(status)
                .fetch_one(pool)
                .await?
        }
        None => sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM tasks").fetch_one(pool).await?,
    };

    Ok((tasks, total))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::time::primitive_now_utc;
    use crate::test_support;

    fn sample_task() -> Task {
        Task::new(
            "2025/03/04/key/report.png".to_string(),
            "report.png".to_string(),
            "image/png".to_string(),
            vec!["title".to_string()],
        )
        .expect("task")
    }

    #[tokio::test]
    async fn create_and_find_round_trip() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let pool = test_support::prepare_db().await;

        let task = sample_task();
        create(&pool, &task).await.expect("create");

        let found = find_by_id(&pool, task.id).await.expect("find").expect("present");
        assert_eq!(found.id, task.id);
        assert_eq!(found.status, TaskStatus::Pending);
        assert_eq!(found.schema.0, vec!["title".to_string()]);
        assert!(found.result.is_none());
    }

    #[tokio::test]
    async fn find_missing_returns_none() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let pool = test_support::prepare_db().await;

        let found = find_by_id(&pool, uuid::Uuid::new_v4()).await.expect("find");
        assert!(found.is_none());
    }

    #[tokio::test]
    async fn update_reports_missing_row() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let pool = test_support::prepare_db().await;

        let task = sample_task();
        assert!(!update(&pool, &task).await.expect("update"));

        create(&pool, &task).await.expect("create");
        let mut stored = find_by_id(&pool, task.id).await.expect("find").expect("present");
        stored.mark_processing().expect("transition");
        assert!(update(&pool, &stored).await.expect("update"));

        let found = find_by_id(&pool, task.id).await.expect("find").expect("present");
        assert_eq!(found.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn claim_processing_is_single_winner() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let pool = test_support::prepare_db().await;

        let task = sample_task();
        create(&pool, &task).await.expect("create");

        assert!(claim_processing(&pool, task.id, primitive_now_utc()).await.expect("claim"));
        // Second claim loses because the row is no longer pending.
        assert!(!claim_processing(&pool, task.id, primitive_now_utc()).await.expect("claim"));

        let found = find_by_id(&pool, task.id).await.expect("find").expect("present");
        assert_eq!(found.status, TaskStatus::Processing);
    }

    #[tokio::test]
    async fn delete_returns_whether_row_existed() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let pool = test_support::prepare_db().await;

        let task = sample_task();
        create(&pool, &task).await.expect("create");

        assert!(delete(&pool, task.id).await.expect("delete"));
        assert!(!delete(&pool, task.id).await.expect("delete"));
    }

    #[tokio::test]
    async fn list_filters_by_status_and_counts() {
        let _guard = test_support::env_lock().await;
        test_support::set_test_env();
        let pool = test_support::prepare_db().await;

        let pending = sample_task();
        create(&pool, &pending).await.expect("create");

        let mut failed = sample_task();
        failed.mark_failed("storage download failed").expect("transition");
        create(&pool, &failed).await.expect("create");

        let (all, total) = list(&pool, TaskFilter::default(), 20, 0).await.expect("list");
        assert_eq!(all.len(), 2);
        assert_eq!(total, 2);

        let filter = TaskFilter { status: Some(TaskStatus::Failed) };
        let (only_failed, failed_total) = list(&pool, filter, 20, 0).await.expect("list");
        assert_eq!(only_failed.len(), 1);
        assert_eq!(failed_total, 1);
        assert_eq!(only_failed[0].id, failed.id);
    }
}
