use sqlx::Row;

fn database_url() -> Option<String> {
    // Load .env so DB_* from .env are available (integration tests don't use app config)
    dotenvy::dotenv().ok();

    if let Ok(url) = std::env::var("DATABASE_URL") {
        if !url.trim().is_empty() {
            return Some(url);
        }
    }

    let host = std::env::var("DB_HOST").unwrap_or_else(|_| "localhost".into());
    let port = std::env::var("DB_PORT").unwrap_or_else(|_| "5432".into());
    let user = std::env::var("DB_USER").unwrap_or_else(|_| "docrecognizer".into());
    let password = std::env::var("DB_PASSWORD").unwrap_or_default();
    let db = std::env::var("DB_NAME").unwrap_or_else(|_| "docrecognizer".into());

    Some(format!("postgresql://{user}:{password}@{host}:{port}/{db}"))
}

#[tokio::test]
async fn migrations_apply_and_tables_exist() -> anyhow::Result<()> {
    let database_url = match database_url() {
        Some(url) => url,
        None => {
            anyhow::bail!("DATABASE_URL and DB_* are not set");
        }
    };

    let pool =
        sqlx::postgres::PgPoolOptions::new().max_connections(1).connect(&database_url).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new("migrations")).await?;
    migrator.run(&pool).await?;

    let row = sqlx::query("SELECT to_regclass('tasks')::text").fetch_one(&pool).await?;
    let regclass: Option<String> = row.try_get(0)?;
    assert!(regclass.is_some(), "expected table tasks to exist after migrations");

    let status_labels: Vec<String> = sqlx::query_scalar(
        "SELECT enumlabel::text FROM pg_enum
         JOIN pg_type ON pg_type.oid = pg_enum.enumtypid
         WHERE pg_type.typname = 'taskstatus'
         ORDER BY enumsortorder",
    )
    .fetch_all(&pool)
    .await?;
    assert_eq!(status_labels, ["pending", "processing", "completed", "failed"]);

    Ok(())
}
