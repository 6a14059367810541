use chrono::NaiveDate;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::UsageLimits;

// key: usage-limits-db -> one row per tenant, counters written under row lock

/// Creates the tenant's limits row if it does not exist yet. Returns whether a row was inserted.
pub async fn ensure_usage_limits<'c, E>(
    executor: E,
    organization_id: Uuid,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query(
        r#"
        INSERT INTO usage_limits (id, organization_id)
        VALUES ($1, $2)
        ON CONFLICT (organization_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .execute(executor)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn find_usage_limits<'c, E>(
    executor: E,
    organization_id: Uuid,
) -> Result<Option<UsageLimits>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UsageLimits>("SELECT * FROM usage_limits WHERE organization_id = $1")
        .bind(organization_id)
        .fetch_optional(executor)
        .await
}

/// Reads the row and holds its lock until the surrounding transaction ends.
pub async fn lock_usage_limits<'c, E>(
    executor: E,
    organization_id: Uuid,
) -> Result<Option<UsageLimits>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UsageLimits>(
        "SELECT * FROM usage_limits WHERE organization_id = $1 FOR UPDATE",
    )
    .bind(organization_id)
    .fetch_optional(executor)
    .await
}

pub async fn set_storage_used<'c, E>(
    executor: E,
    usage_limits_id: Uuid,
    storage_used_bytes: i64,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        UPDATE usage_limits
        SET storage_used_bytes = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING storage_used_bytes
        "#,
    )
    .bind(usage_limits_id)
    .bind(storage_used_bytes)
    .fetch_one(executor)
    .await
}

pub async fn set_credit_used<'c, E>(
    executor: E,
    usage_limits_id: Uuid,
    credit_used_this_period: i64,
) -> Result<i64, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        UPDATE usage_limits
        SET credit_used_this_period = $2, updated_at = NOW()
        WHERE id = $1
        RETURNING credit_used_this_period
        "#,
    )
    .bind(usage_limits_id)
    .bind(credit_used_this_period)
    .fetch_one(executor)
    .await
}

pub async fn start_billing_cycle<'c, E>(
    executor: E,
    usage_limits_id: Uuid,
    cycle_start: NaiveDate,
    cycle_end: NaiveDate,
) -> Result<UsageLimits, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UsageLimits>(
        r#"
        UPDATE usage_limits
        SET
            credit_used_this_period = 0,
            billing_cycle_start = $2,
            billing_cycle_end = $3,
            alert_sent_at = NULL,
            updated_at = NOW()
        WHERE id = $1
        RETURNING *
        "#,
    )
    .bind(usage_limits_id)
    .bind(cycle_start)
    .bind(cycle_end)
    .fetch_one(executor)
    .await
}

/// Tenants whose cycle has ended on or before `today`, or that never had one.
pub async fn list_due_billing_cycles<'c, E>(
    executor: E,
    today: NaiveDate,
) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar(
        r#"
        SELECT organization_id
        FROM usage_limits
        WHERE billing_cycle_end IS NULL OR billing_cycle_end <= $1
        ORDER BY organization_id
        "#,
    )
    .bind(today)
    .fetch_all(executor)
    .await
}
