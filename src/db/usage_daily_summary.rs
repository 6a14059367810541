use chrono::NaiveDate;
use rust_decimal::Decimal;
use sqlx::{Executor, Postgres};
use uuid::Uuid;

use crate::models::UsageDailySummary;

/// Adds one request to the tenant's rollup for `date`, including the per-feature and
/// per-model token breakdowns.
#[allow(clippy::too_many_arguments)]
pub async fn record_daily_usage<'c, E>(
    executor: E,
    organization_id: Uuid,
    date: NaiveDate,
    feature: &str,
    model: &str,
    input_tokens: i64,
    output_tokens: i64,
    cost: Decimal,
) -> Result<UsageDailySummary, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UsageDailySummary>(
        r#"
        INSERT INTO usage_daily_summary (
            id,
            organization_id,
            date,
            total_requests,
            total_input_tokens,
            total_output_tokens,
            total_tokens,
            total_cost,
            feature_breakdown,
            model_breakdown
        ) VALUES (
            $1, $2, $3, 1, $6, $7, $6 + $7, $8,
            jsonb_build_object($4::TEXT, $6 + $7),
            jsonb_build_object($5::TEXT, $6 + $7)
        )
        ON CONFLICT (organization_id, date)
        DO UPDATE SET
            total_requests = usage_daily_summary.total_requests + 1,
            total_input_tokens = usage_daily_summary.total_input_tokens + EXCLUDED.total_input_tokens,
            total_output_tokens = usage_daily_summary.total_output_tokens + EXCLUDED.total_output_tokens,
            total_tokens = usage_daily_summary.total_tokens + EXCLUDED.total_tokens,
            total_cost = usage_daily_summary.total_cost + EXCLUDED.total_cost,
            feature_breakdown = usage_daily_summary.feature_breakdown || jsonb_build_object(
                $4::TEXT,
                COALESCE((usage_daily_summary.feature_breakdown ->> $4::TEXT)::BIGINT, 0) + $6 + $7
            ),
            model_breakdown = usage_daily_summary.model_breakdown || jsonb_build_object(
                $5::TEXT,
                COALESCE((usage_daily_summary.model_breakdown ->> $5::TEXT)::BIGINT, 0) + $6 + $7
            ),
            updated_at = NOW()
        RETURNING *
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(organization_id)
    .bind(date)
    .bind(feature)
    .bind(model)
    .bind(input_tokens)
    .bind(output_tokens)
    .bind(cost)
    .fetch_one(executor)
    .await
}

pub async fn find_daily_summary<'c, E>(
    executor: E,
    organization_id: Uuid,
    date: NaiveDate,
) -> Result<Option<UsageDailySummary>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, UsageDailySummary>(
        "SELECT * FROM usage_daily_summary WHERE organization_id = $1 AND date = $2",
    )
    .bind(organization_id)
    .bind(date)
    .fetch_optional(executor)
    .await
}
