use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::FromRow;
use uuid::Uuid;

/// key: usage-models -> plans,limits,events
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct SubscriptionPlan {
    pub id: Uuid,
    pub name: String,
    pub display_name: String,
    pub monthly_price_cents: i32,
    pub annual_price_cents: Option<i32>,
    pub monthly_token_limit: i64,
    pub max_users: Option<i32>,
    pub max_documents: Option<i32>,
    pub max_storage_mb: Option<i32>,
    pub features: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
}

/// One row per tenant. Counters only move under `SELECT ... FOR UPDATE`.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageLimits {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub monthly_token_limit: Option<i64>,
    pub monthly_request_limit: Option<i32>,
    pub credit_balance: i64,
    pub credit_used_this_period: i64,
    pub storage_used_bytes: i64,
    pub storage_limit_bytes: Option<i64>,
    pub billing_cycle_start: Option<NaiveDate>,
    pub billing_cycle_end: Option<NaiveDate>,
    pub alert_threshold_percent: i32,
    pub alert_sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Append-only record of one billable AI call.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageEvent {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub feature: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cached_tokens: i32,
    pub input_cost: Decimal,
    pub output_cost: Decimal,
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn total_tokens(&self) -> i64 {
        i64::from(self.input_tokens) + i64::from(self.output_tokens)
    }

    pub fn total_cost(&self) -> Decimal {
        self.input_cost + self.output_cost
    }
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct UsageDailySummary {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub date: NaiveDate,
    pub total_requests: i32,
    pub total_input_tokens: i64,
    pub total_output_tokens: i64,
    pub total_tokens: i64,
    pub total_cost: Decimal,
    pub feature_breakdown: Value,
    pub model_breakdown: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct ModelPricing {
    pub id: Uuid,
    pub provider: String,
    pub model: String,
    pub input_price_per_million: Decimal,
    pub output_price_per_million: Decimal,
    pub cached_price_per_million: Decimal,
    pub effective_from: NaiveDate,
    pub effective_to: Option<NaiveDate>,
}

impl ModelPricing {
    /// Returns `(input_cost, output_cost)`. Cached tokens are billed at the cached rate and
    /// carved out of the input side.
    pub fn cost_for(
        &self,
        input_tokens: i64,
        output_tokens: i64,
        cached_tokens: i64,
    ) -> (Decimal, Decimal) {
        let million = Decimal::from(1_000_000);
        let cached = cached_tokens.clamp(0, input_tokens.max(0));
        let uncached = input_tokens.max(0) - cached;

        let input_cost = (Decimal::from(uncached) * self.input_price_per_million
            + Decimal::from(cached) * self.cached_price_per_million)
            / million;
        let output_cost =
            Decimal::from(output_tokens.max(0)) * self.output_price_per_million / million;
        (input_cost, output_cost)
    }

    pub fn is_effective_on(&self, date: NaiveDate) -> bool {
        if date < self.effective_from {
            return false;
        }
        match self.effective_to {
            Some(end) => date < end,
            None => true,
        }
    }
}
