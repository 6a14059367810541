use rust_decimal::Decimal;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::UsageEvent;
use crate::usage::NewUsageEvent;

// key: usage-events-db -> append-only, no update or delete path

/// Inserts the event. Returns `None` when an event with the same `request_id` already exists.
pub async fn insert_usage_event<'c, E>(
    executor: E,
    event: &NewUsageEvent,
    input_cost: Decimal,
    output_cost: Decimal,
) -> Result<Option<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        INSERT INTO usage_events (
            id,
            organization_id,
            user_id,
            request_id,
            feature,
            model,
            provider,
            input_tokens,
            output_tokens,
            cached_tokens,
            input_cost,
            output_cost,
            metadata
        ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
        ON CONFLICT (request_id) DO NOTHING
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(event.organization_id)
    .bind(event.user_id)
    .bind(event.request_id.as_deref())
    .bind(&event.feature)
    .bind(&event.model)
    .bind(&event.provider)
    .bind(event.input_tokens)
    .bind(event.output_tokens)
    .bind(event.cached_tokens)
    .bind(input_cost)
    .bind(output_cost)
    .bind(&event.metadata)
    .fetch_optional(executor)
    .await
}

/// Id of the tenant's event carrying `request_id`. `None` when the id is unused or belongs
/// to another tenant.
pub async fn find_event_id_by_request<'c, E>(
    executor: E,
    organization_id: Uuid,
    request_id: &str,
) -> Result<Option<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        "SELECT id FROM usage_events WHERE request_id = $1 AND organization_id = $2",
    )
    .bind(request_id)
    .bind(organization_id)
    .fetch_optional(executor)
    .await
}

pub async fn list_recent_events<'c, E>(
    executor: E,
    organization_id: Uuid,
    limit: i64,
) -> Result<Vec<UsageEvent>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UsageEvent>(
        r#"
        SELECT * FROM usage_events
        WHERE organization_id = $1
        ORDER BY created_at DESC
        LIMIT $2
        "#,
    )
    .bind(organization_id)
    .bind(limit)
    .fetch_all(executor)
    .await
}
