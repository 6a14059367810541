use axum::{
    extract::{Extension, Path, Query},
    Json,
};
use serde::Deserialize;
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::AppResult;
use crate::models::UsageEvent;

use super::{StorageLimitResult, StorageUsageSummary, TokenLimitResult, UsageService};

/// key: usage-api -> read-only quota endpoints
pub async fn storage_summary(
    Extension(pool): Extension<PgPool>,
    Path(organization_id): Path<Uuid>,
) -> AppResult<Json<StorageUsageSummary>> {
    let service = UsageService::new(pool);
    Ok(Json(service.storage_usage_summary(organization_id).await?))
}

pub async fn check_storage(
    Extension(pool): Extension<PgPool>,
    Path(organization_id): Path<Uuid>,
    Json(payload): Json<StorageCheckRequest>,
) -> AppResult<Json<StorageLimitResult>> {
    let service = UsageService::new(pool);
    let result = service
        .check_storage_limit(organization_id, payload.additional_bytes)
        .await?;
    Ok(Json(result))
}

pub async fn check_tokens(
    Extension(pool): Extension<PgPool>,
    Path(organization_id): Path<Uuid>,
    Json(payload): Json<TokenCheckRequest>,
) -> AppResult<Json<TokenLimitResult>> {
    let service = UsageService::new(pool);
    let result = service
        .check_token_limit(organization_id, payload.estimated_tokens)
        .await?;
    Ok(Json(result))
}

pub async fn list_events(
    Extension(pool): Extension<PgPool>,
    Path(organization_id): Path<Uuid>,
    Query(query): Query<EventsQuery>,
) -> AppResult<Json<Vec<UsageEvent>>> {
    let service = UsageService::new(pool);
    let events = service
        .recent_events(organization_id, query.limit.unwrap_or(50))
        .await?;
    Ok(Json(events))
}

#[derive(Debug, Deserialize)]
pub struct StorageCheckRequest {
    #[serde(default)]
    pub additional_bytes: i64,
}

#[derive(Debug, Deserialize)]
pub struct TokenCheckRequest {
    #[serde(default)]
    pub estimated_tokens: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct EventsQuery {
    pub limit: Option<i64>,
}
