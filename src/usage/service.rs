use async_trait::async_trait;
use chrono::{DateTime, Datelike, Duration, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::db::{
    documents, model_pricing, organizations, usage_daily_summary, usage_events, usage_limits,
};
use crate::error::{AppError, AppResult};
use crate::models::{UsageEvent, UsageLimits};

use super::events::validate_usage_event;
use super::models::{
    resolve_storage_limit, resolve_token_limit, NewUsageEvent, StorageLimitResult,
    StorageUsageSummary, TokenLimitResult,
};

const FOREIGN_KEY_VIOLATION: &str = "23503";

/// Where AI call sites report token consumption. Implementations never fail the caller.
#[async_trait]
pub trait TokenUsageSink: Send + Sync {
    async fn record_token_usage(&self, event: NewUsageEvent) -> Option<Uuid>;
}

/// key: usage-service -> storage and token metering per tenant
#[derive(Clone)]
pub struct UsageService {
    pool: PgPool,
}

impl UsageService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Read-only: takes no lock and changes nothing.
    pub async fn check_storage_limit(
        &self,
        organization_id: Uuid,
        additional_bytes: i64,
    ) -> AppResult<StorageLimitResult> {
        if additional_bytes < 0 {
            return Err(AppError::BadRequest(
                "additional bytes must be non-negative".into(),
            ));
        }

        let Some((organization, plan)) =
            organizations::find_organization_with_plan(&self.pool, organization_id).await?
        else {
            warn!(%organization_id, "organization not found for storage check");
            return Ok(StorageLimitResult::unknown_tenant());
        };

        let usage = usage_limits::find_usage_limits(&self.pool, organization_id).await?;
        let tier = if organization.plan_type.trim().is_empty() {
            "free"
        } else {
            organization.plan_type.as_str()
        };
        let limit_bytes = resolve_storage_limit(
            usage.as_ref().and_then(|usage| usage.storage_limit_bytes),
            plan.as_ref().and_then(|plan| plan.max_storage_mb),
            tier,
        );

        let current_bytes = match &usage {
            Some(usage) => usage.storage_used_bytes,
            None => documents::active_storage_bytes(&self.pool, organization_id).await?,
        };

        Ok(StorageLimitResult::evaluate(
            current_bytes,
            additional_bytes,
            limit_bytes,
            tier,
        ))
    }

    /// Adds `delta_bytes` (negative on delete) under the row lock. The counter never drops below 0.
    pub async fn update_storage_used(
        &self,
        organization_id: Uuid,
        delta_bytes: i64,
    ) -> AppResult<i64> {
        let mut tx = self.pool.begin().await?;
        let limits = lock_or_create_limits(&mut *tx, organization_id).await?;
        let new_value = limits.storage_used_bytes.saturating_add(delta_bytes).max(0);
        let stored = usage_limits::set_storage_used(&mut *tx, limits.id, new_value).await?;
        tx.commit().await?;

        debug!(%organization_id, delta_bytes, storage_used_bytes = stored, "updated storage usage");
        Ok(stored)
    }

    /// Repair path: recomputes the counter from active documents while holding the row lock.
    pub async fn recalculate_storage(&self, organization_id: Uuid) -> AppResult<i64> {
        let mut tx = self.pool.begin().await?;
        let limits = lock_or_create_limits(&mut *tx, organization_id).await?;
        let current = documents::active_storage_bytes(&mut *tx, organization_id).await?;
        let stored = usage_limits::set_storage_used(&mut *tx, limits.id, current).await?;
        tx.commit().await?;

        info!(
            %organization_id,
            previous = limits.storage_used_bytes,
            storage_used_bytes = stored,
            "recalculated storage usage"
        );
        Ok(stored)
    }

    pub async fn storage_usage_summary(
        &self,
        organization_id: Uuid,
    ) -> AppResult<StorageUsageSummary> {
        let check = self.check_storage_limit(organization_id, 0).await?;
        Ok(StorageUsageSummary::from_check(organization_id, &check))
    }

    /// Read-only. A tenant without a limits row has no token ceiling.
    pub async fn check_token_limit(
        &self,
        organization_id: Uuid,
        estimated_tokens: i64,
    ) -> AppResult<TokenLimitResult> {
        if estimated_tokens < 0 {
            return Err(AppError::BadRequest(
                "estimated tokens must be non-negative".into(),
            ));
        }

        let Some(usage) = usage_limits::find_usage_limits(&self.pool, organization_id).await?
        else {
            return Ok(TokenLimitResult::unlimited(0));
        };

        let plan_limit =
            organizations::find_organization_with_plan(&self.pool, organization_id)
                .await?
                .and_then(|(_, plan)| plan)
                .map(|plan| plan.monthly_token_limit);
        let monthly_limit = resolve_token_limit(usage.monthly_token_limit, plan_limit);

        Ok(TokenLimitResult::evaluate(
            usage.credit_used_this_period,
            estimated_tokens,
            monthly_limit,
        ))
    }

    pub async fn update_tokens_used(&self, organization_id: Uuid, tokens: i64) -> AppResult<i64> {
        let mut tx = self.pool.begin().await?;
        let limits = lock_or_create_limits(&mut *tx, organization_id).await?;
        let new_value = limits.credit_used_this_period.saturating_add(tokens);
        let stored = usage_limits::set_credit_used(&mut *tx, limits.id, new_value).await?;
        tx.commit().await?;
        Ok(stored)
    }

    /// Appends the event and bumps the tenant's credit counter in one transaction.
    ///
    /// Never fails the caller: any error is logged and reported as `None`. A repeated
    /// `request_id` returns the id of the event already recorded without counting it again.
    pub async fn log_token_usage(&self, event: NewUsageEvent) -> Option<Uuid> {
        match self.try_log_token_usage(&event).await {
            Ok(event_id) => {
                debug!(
                    organization_id = %event.organization_id,
                    feature = %event.feature,
                    input_tokens = event.input_tokens,
                    output_tokens = event.output_tokens,
                    "logged token usage"
                );
                Some(event_id)
            }
            Err(error) => {
                warn!(
                    ?error,
                    organization_id = %event.organization_id,
                    feature = %event.feature,
                    "failed to log token usage"
                );
                None
            }
        }
    }

    /// Fire-and-forget variant of [`log_token_usage`](Self::log_token_usage).
    pub fn spawn_log_token_usage(&self, event: NewUsageEvent) -> JoinHandle<Option<Uuid>> {
        let service = self.clone();
        tokio::spawn(async move { service.log_token_usage(event).await })
    }

    async fn try_log_token_usage(&self, event: &NewUsageEvent) -> AppResult<Uuid> {
        validate_usage_event(event).map_err(|error| AppError::BadRequest(error.to_string()))?;

        let today = Utc::now().date_naive();
        let (input_cost, output_cost) = match (event.input_cost, event.output_cost) {
            (Some(input_cost), Some(output_cost)) => (input_cost, output_cost),
            (input_cost, output_cost) => {
                let (priced_input, priced_output) = self.price_event(event, today).await?;
                (
                    input_cost.unwrap_or(priced_input),
                    output_cost.unwrap_or(priced_output),
                )
            }
        };

        let mut tx = self.pool.begin().await?;
        let inserted =
            usage_events::insert_usage_event(&mut *tx, event, input_cost, output_cost).await?;
        let Some(event_id) = inserted else {
            tx.rollback().await?;
            let request_id = event.request_id.as_deref().unwrap_or_default();
            let existing = usage_events::find_event_id_by_request(
                &self.pool,
                event.organization_id,
                request_id,
            )
            .await?
            .ok_or_else(|| {
                AppError::BadRequest(format!(
                    "request_id `{request_id}` already recorded for another organization"
                ))
            })?;
            debug!(%request_id, event_id = %existing, "token usage already recorded");
            return Ok(existing);
        };

        let limits = lock_or_create_limits(&mut *tx, event.organization_id).await?;
        let credit_used = limits
            .credit_used_this_period
            .saturating_add(event.total_tokens());
        usage_limits::set_credit_used(&mut *tx, limits.id, credit_used).await?;
        usage_daily_summary::record_daily_usage(
            &mut *tx,
            event.organization_id,
            today,
            &event.feature,
            &event.model,
            i64::from(event.input_tokens),
            i64::from(event.output_tokens),
            input_cost + output_cost,
        )
        .await?;
        tx.commit().await?;

        Ok(event_id)
    }

    /// Costs for `event` from the price row in effect on `on`; zero when the model is unpriced.
    pub async fn price_event(
        &self,
        event: &NewUsageEvent,
        on: NaiveDate,
    ) -> AppResult<(Decimal, Decimal)> {
        let pricing =
            model_pricing::effective_pricing(&self.pool, &event.provider, &event.model, on)
                .await?;
        Ok(match pricing {
            Some(pricing) => pricing.cost_for(
                i64::from(event.input_tokens),
                i64::from(event.output_tokens),
                i64::from(event.cached_tokens),
            ),
            None => {
                debug!(provider = %event.provider, model = %event.model, "no pricing on record");
                (Decimal::ZERO, Decimal::ZERO)
            }
        })
    }

    pub async fn recent_events(
        &self,
        organization_id: Uuid,
        limit: i64,
    ) -> AppResult<Vec<UsageEvent>> {
        let limit = limit.clamp(1, 500);
        Ok(usage_events::list_recent_events(&self.pool, organization_id, limit).await?)
    }

    /// Zeroes the credit counter and moves the cycle window to the month containing `now`.
    /// Returns `None` for a tenant without a limits row.
    pub async fn reset_billing_cycle(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<UsageLimits>> {
        self.start_cycle_if(organization_id, now, |_| true).await
    }

    /// Like [`reset_billing_cycle`](Self::reset_billing_cycle), but only when the current cycle
    /// has ended or was never set.
    pub async fn roll_billing_cycle(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
    ) -> AppResult<Option<UsageLimits>> {
        let today = now.date_naive();
        self.start_cycle_if(organization_id, now, |limits| {
            limits.billing_cycle_end.map_or(true, |end| end <= today)
        })
        .await
    }

    async fn start_cycle_if<F>(
        &self,
        organization_id: Uuid,
        now: DateTime<Utc>,
        due: F,
    ) -> AppResult<Option<UsageLimits>>
    where
        F: FnOnce(&UsageLimits) -> bool,
    {
        let mut tx = self.pool.begin().await?;
        let Some(limits) = usage_limits::lock_usage_limits(&mut *tx, organization_id).await? else {
            return Ok(None);
        };
        if !due(&limits) {
            return Ok(None);
        }

        let (cycle_start, cycle_end) = month_bounds(now.date_naive());
        let updated =
            usage_limits::start_billing_cycle(&mut *tx, limits.id, cycle_start, cycle_end).await?;
        tx.commit().await?;

        info!(
            %organization_id,
            %cycle_start,
            %cycle_end,
            credit_used = limits.credit_used_this_period,
            "started new billing cycle"
        );
        Ok(Some(updated))
    }
}

#[async_trait]
impl TokenUsageSink for UsageService {
    async fn record_token_usage(&self, event: NewUsageEvent) -> Option<Uuid> {
        self.log_token_usage(event).await
    }
}

/// Locks the tenant's limits row, creating it first if this is the tenant's first update.
async fn lock_or_create_limits(
    conn: &mut PgConnection,
    organization_id: Uuid,
) -> AppResult<UsageLimits> {
    if let Some(limits) = usage_limits::lock_usage_limits(&mut *conn, organization_id).await? {
        return Ok(limits);
    }

    match usage_limits::ensure_usage_limits(&mut *conn, organization_id).await {
        Ok(_) => {}
        Err(sqlx::Error::Database(error))
            if error.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) =>
        {
            return Err(AppError::NotFound);
        }
        Err(error) => return Err(error.into()),
    }

    usage_limits::lock_usage_limits(&mut *conn, organization_id)
        .await?
        .ok_or(AppError::NotFound)
}

/// First day of `date`'s month and first day of the following month.
pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = date - Duration::days(i64::from(date.day0()));
    let end = start + Months::new(1);
    (start, end)
}
