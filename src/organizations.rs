use axum::extract::Path;
use axum::{
    routing::{get, post},
    Extension, Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::{organizations, usage_limits};
use crate::error::{AppError, AppResult};
use crate::models::{Organization, UsageLimits};
use crate::usage::month_bounds;

const UNIQUE_VIOLATION: &str = "23505";

#[derive(Debug, Deserialize)]
pub struct NewOrg {
    pub name: String,
    pub domain: Option<String>,
    pub plan_type: Option<String>,
    pub settings: Option<Value>,
}

#[derive(Debug, Serialize)]
pub struct OrgEnvelope {
    pub organization: Organization,
    pub usage_limits: Option<UsageLimits>,
}

pub fn routes() -> Router {
    Router::new()
        .route("/api/orgs", post(create_org))
        .route("/api/orgs/:id", get(get_org).delete(delete_org))
}

/// Creates the tenant together with its usage-limits row and first billing cycle.
pub async fn create_org(
    Extension(pool): Extension<PgPool>,
    Json(payload): Json<NewOrg>,
) -> AppResult<Json<OrgEnvelope>> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::BadRequest("Name required".into()));
    }
    let plan_type = payload
        .plan_type
        .as_deref()
        .map(str::trim)
        .filter(|plan| !plan.is_empty())
        .unwrap_or("free")
        .to_ascii_lowercase();
    let settings = payload.settings.unwrap_or_else(|| json!({}));

    let mut tx = pool.begin().await?;
    let plan = organizations::find_plan_by_name(&mut *tx, &plan_type).await?;
    let organization = match organizations::insert_organization(
        &mut *tx,
        name,
        payload.domain.as_deref(),
        &plan_type,
        plan.as_ref().map(|plan| plan.id),
        &settings,
    )
    .await
    {
        Ok(organization) => organization,
        Err(sqlx::Error::Database(error))
            if error.code().as_deref() == Some(UNIQUE_VIOLATION) =>
        {
            return Err(AppError::BadRequest(format!(
                "organization `{name}` already exists"
            )));
        }
        Err(error) => {
            tracing::error!(?error, "DB error creating org");
            return Err(error.into());
        }
    };

    usage_limits::ensure_usage_limits(&mut *tx, organization.id).await?;
    let limits = usage_limits::lock_usage_limits(&mut *tx, organization.id)
        .await?
        .ok_or(AppError::NotFound)?;
    let (cycle_start, cycle_end) = month_bounds(Utc::now().date_naive());
    let limits =
        usage_limits::start_billing_cycle(&mut *tx, limits.id, cycle_start, cycle_end).await?;
    tx.commit().await?;

    tracing::info!(
        organization_id = %organization.id,
        plan_type = %organization.plan_type,
        has_plan = plan.is_some(),
        "organization created"
    );
    Ok(Json(OrgEnvelope {
        organization,
        usage_limits: Some(limits),
    }))
}

pub async fn get_org(
    Extension(pool): Extension<PgPool>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<OrgEnvelope>> {
    let organization = organizations::find_organization(&pool, id)
        .await?
        .ok_or(AppError::NotFound)?;
    let usage_limits = usage_limits::find_usage_limits(&pool, id).await?;
    Ok(Json(OrgEnvelope {
        organization,
        usage_limits,
    }))
}

/// Deletes the tenant; every owned row goes with it.
pub async fn delete_org(
    Extension(pool): Extension<PgPool>,
    Path(id): Path<Uuid>,
) -> AppResult<()> {
    if !organizations::delete_organization(&pool, id).await? {
        return Err(AppError::NotFound);
    }
    tracing::info!(organization_id = %id, "organization deleted");
    Ok(())
}
