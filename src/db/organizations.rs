use serde_json::Value;
use sqlx::{Executor, Postgres, Row};
use uuid::Uuid;

use crate::models::{Organization, SubscriptionPlan};

// key: tenant-db -> lifecycle
pub async fn insert_organization<'c, E>(
    executor: E,
    name: &str,
    domain: Option<&str>,
    plan_type: &str,
    plan_id: Option<Uuid>,
    settings: &Value,
) -> Result<Organization, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Organization>(
        r#"
        INSERT INTO organizations (id, name, domain, plan_type, plan_id, settings)
        VALUES ($1, $2, $3, $4, $5, $6)
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(name)
    .bind(domain)
    .bind(plan_type)
    .bind(plan_id)
    .bind(settings)
    .fetch_one(executor)
    .await
}

pub async fn find_organization<'c, E>(
    executor: E,
    organization_id: Uuid,
) -> Result<Option<Organization>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, Organization>("SELECT * FROM organizations WHERE id = $1")
        .bind(organization_id)
        .fetch_optional(executor)
        .await
}

/// Child rows go with the tenant through `ON DELETE CASCADE`.
pub async fn delete_organization<'c, E>(
    executor: E,
    organization_id: Uuid,
) -> Result<bool, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let result = sqlx::query("DELETE FROM organizations WHERE id = $1")
        .bind(organization_id)
        .execute(executor)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn list_active_organization_ids<'c, E>(executor: E) -> Result<Vec<Uuid>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_scalar("SELECT id FROM organizations WHERE is_active = TRUE ORDER BY created_at")
        .fetch_all(executor)
        .await
}

pub async fn find_plan_by_name<'c, E>(
    executor: E,
    name: &str,
) -> Result<Option<SubscriptionPlan>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, SubscriptionPlan>(
        "SELECT * FROM subscription_plans WHERE name = $1 AND is_active = TRUE",
    )
    .bind(name)
    .fetch_optional(executor)
    .await
}

/// Tenant joined with its plan, if it has one.
pub async fn find_organization_with_plan<'c, E>(
    executor: E,
    organization_id: Uuid,
) -> Result<Option<(Organization, Option<SubscriptionPlan>)>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    let row = sqlx::query(
        r#"
        SELECT
            o.id,
            o.name,
            o.domain,
            o.plan_type,
            o.settings,
            o.is_active,
            o.plan_id,
            o.subscription_status,
            o.created_at,
            o.updated_at,
            p.id AS plan_row_id,
            p.name AS plan_name,
            p.display_name AS plan_display_name,
            p.monthly_price_cents,
            p.annual_price_cents,
            p.monthly_token_limit,
            p.max_users,
            p.max_documents,
            p.max_storage_mb,
            p.features AS plan_features,
            p.is_active AS plan_is_active,
            p.created_at AS plan_created_at
        FROM organizations o
        LEFT JOIN subscription_plans p ON p.id = o.plan_id
        WHERE o.id = $1
        "#,
    )
    .bind(organization_id)
    .fetch_optional(executor)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };

    let organization = Organization {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        domain: row.try_get("domain")?,
        plan_type: row.try_get("plan_type")?,
        settings: row.try_get("settings")?,
        is_active: row.try_get("is_active")?,
        plan_id: row.try_get("plan_id")?,
        subscription_status: row.try_get("subscription_status")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    };

    let plan_row_id: Option<Uuid> = row.try_get("plan_row_id")?;
    let plan = match plan_row_id {
        Some(id) => Some(SubscriptionPlan {
            id,
            name: row.try_get("plan_name")?,
            display_name: row.try_get("plan_display_name")?,
            monthly_price_cents: row.try_get("monthly_price_cents")?,
            annual_price_cents: row.try_get("annual_price_cents")?,
            monthly_token_limit: row.try_get("monthly_token_limit")?,
            max_users: row.try_get("max_users")?,
            max_documents: row.try_get("max_documents")?,
            max_storage_mb: row.try_get("max_storage_mb")?,
            features: row.try_get("plan_features")?,
            is_active: row.try_get("plan_is_active")?,
            created_at: row.try_get("plan_created_at")?,
        }),
        None => None,
    };

    Ok(Some((organization, plan)))
}
