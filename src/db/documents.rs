use sqlx::{Executor, Postgres};
use uuid::Uuid;

/// Sum of `file_size` over the tenant's active documents.
pub async fn active_storage_bytes<'c, E>(
    executor: E,
    organization_id: Uuid,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        SELECT COALESCE(SUM(file_size), 0)::BIGINT
        FROM documents
        WHERE organization_id = $1
          AND is_active = TRUE
        "#,
    )
    .bind(organization_id)
    .fetch_one(executor)
    .await
}
