use chrono::NaiveDate;
use sqlx::{Executor, Postgres};

use crate::models::ModelPricing;

/// Latest price row for `provider`/`model` in effect on `on`.
pub async fn effective_pricing<'c, E>(
    executor: E,
    provider: &str,
    model: &str,
    on: NaiveDate,
) -> Result<Option<ModelPricing>, sqlx::Error>
where
    E: Executor<'c, Database = Postgres>,
{
    sqlx::query_as::<_, ModelPricing>(
        r#"
        SELECT * FROM model_pricing
        WHERE provider = $1
          AND model = $2
          AND effective_from <= $3
          AND (effective_to IS NULL OR effective_to > $3)
        ORDER BY effective_from DESC
        LIMIT 1
        "#,
    )
    .bind(provider)
    .bind(model)
    .bind(on)
    .fetch_optional(executor)
    .await
}
