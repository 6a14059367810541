use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

pub const BYTES_PER_MIB: i64 = 1024 * 1024;

/// Built-in storage ceilings used when neither the tenant nor its plan sets one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageTier {
    Free,
    Starter,
    Pro,
    Business,
}

impl StorageTier {
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "free" => Some(StorageTier::Free),
            "starter" => Some(StorageTier::Starter),
            "pro" => Some(StorageTier::Pro),
            "business" => Some(StorageTier::Business),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StorageTier::Free => "free",
            StorageTier::Starter => "starter",
            StorageTier::Pro => "pro",
            StorageTier::Business => "business",
        }
    }

    pub fn limit_bytes(&self) -> i64 {
        match self {
            StorageTier::Free => 100 * BYTES_PER_MIB,
            StorageTier::Starter => 1024 * BYTES_PER_MIB,
            StorageTier::Pro => 10 * 1024 * BYTES_PER_MIB,
            StorageTier::Business => 100 * 1024 * BYTES_PER_MIB,
        }
    }
}

/// Storage ceiling for a tenant: its own override, then its plan, then the tier table.
/// Zero or missing values fall through to the next source.
pub fn resolve_storage_limit(
    override_bytes: Option<i64>,
    plan_max_storage_mb: Option<i32>,
    plan_type: &str,
) -> i64 {
    if let Some(limit) = override_bytes.filter(|limit| *limit > 0) {
        return limit;
    }
    if let Some(mb) = plan_max_storage_mb.filter(|mb| *mb > 0) {
        return i64::from(mb) * BYTES_PER_MIB;
    }
    StorageTier::parse(plan_type)
        .unwrap_or(StorageTier::Free)
        .limit_bytes()
}

/// Monthly token ceiling: a positive tenant override wins over the plan. `None` is unlimited.
pub fn resolve_token_limit(override_limit: Option<i64>, plan_limit: Option<i64>) -> Option<i64> {
    override_limit.filter(|limit| *limit > 0).or(plan_limit)
}

pub fn percentage_of(used: i64, limit: i64) -> f64 {
    if limit <= 0 {
        return 0.0;
    }
    round2(used as f64 / limit as f64 * 100.0)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn bytes_to_mib(bytes: i64) -> f64 {
    round2(bytes as f64 / BYTES_PER_MIB as f64)
}

/// key: usage-storage-check -> structured allow/deny
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageLimitResult {
    pub allowed: bool,
    pub current_bytes: i64,
    pub limit_bytes: i64,
    pub remaining_bytes: i64,
    pub percentage_used: f64,
    pub tier: String,
}

impl StorageLimitResult {
    pub fn evaluate(current_bytes: i64, additional_bytes: i64, limit_bytes: i64, tier: &str) -> Self {
        Self {
            allowed: current_bytes.saturating_add(additional_bytes) <= limit_bytes,
            current_bytes,
            limit_bytes,
            remaining_bytes: limit_bytes.saturating_sub(current_bytes).max(0),
            percentage_used: percentage_of(current_bytes, limit_bytes),
            tier: tier.to_string(),
        }
    }

    pub fn unknown_tenant() -> Self {
        Self {
            allowed: false,
            current_bytes: 0,
            limit_bytes: 0,
            remaining_bytes: 0,
            percentage_used: 100.0,
            tier: "unknown".to_string(),
        }
    }
}

/// key: usage-token-check -> structured allow/deny
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TokenLimitResult {
    pub allowed: bool,
    pub tokens_used_this_period: i64,
    pub monthly_limit: Option<i64>,
    pub remaining_tokens: Option<i64>,
    pub percentage_used: f64,
}

impl TokenLimitResult {
    pub fn unlimited(tokens_used_this_period: i64) -> Self {
        Self {
            allowed: true,
            tokens_used_this_period,
            monthly_limit: None,
            remaining_tokens: None,
            percentage_used: 0.0,
        }
    }

    pub fn evaluate(tokens_used: i64, estimated_tokens: i64, monthly_limit: Option<i64>) -> Self {
        let Some(limit) = monthly_limit else {
            return Self::unlimited(tokens_used);
        };
        Self {
            allowed: tokens_used.saturating_add(estimated_tokens) <= limit,
            tokens_used_this_period: tokens_used,
            monthly_limit: Some(limit),
            remaining_tokens: Some(limit.saturating_sub(tokens_used).max(0)),
            percentage_used: percentage_of(tokens_used, limit),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StorageUsageSummary {
    pub organization_id: Uuid,
    pub storage_used_bytes: i64,
    pub storage_used_mb: f64,
    pub storage_limit_bytes: i64,
    pub storage_limit_mb: f64,
    pub remaining_bytes: i64,
    pub remaining_mb: f64,
    pub percentage_used: f64,
    pub tier: String,
}

impl StorageUsageSummary {
    pub fn from_check(organization_id: Uuid, check: &StorageLimitResult) -> Self {
        Self {
            organization_id,
            storage_used_bytes: check.current_bytes,
            storage_used_mb: bytes_to_mib(check.current_bytes),
            storage_limit_bytes: check.limit_bytes,
            storage_limit_mb: bytes_to_mib(check.limit_bytes),
            remaining_bytes: check.remaining_bytes,
            remaining_mb: bytes_to_mib(check.remaining_bytes),
            percentage_used: check.percentage_used,
            tier: check.tier.clone(),
        }
    }
}

/// One billable AI call to be appended to `usage_events`. Costs left as `None` are priced
/// from `model_pricing`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewUsageEvent {
    pub organization_id: Uuid,
    pub user_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub feature: String,
    pub model: String,
    pub provider: String,
    pub input_tokens: i32,
    pub output_tokens: i32,
    pub cached_tokens: i32,
    pub input_cost: Option<Decimal>,
    pub output_cost: Option<Decimal>,
    pub metadata: Value,
}

impl NewUsageEvent {
    pub fn new(
        organization_id: Uuid,
        feature: impl Into<String>,
        model: impl Into<String>,
        provider: impl Into<String>,
        input_tokens: i32,
        output_tokens: i32,
    ) -> Self {
        Self {
            organization_id,
            user_id: None,
            request_id: None,
            feature: feature.into(),
            model: model.into(),
            provider: provider.into(),
            input_tokens,
            output_tokens,
            cached_tokens: 0,
            input_cost: None,
            output_cost: None,
            metadata: json!({}),
        }
    }

    pub fn with_user(mut self, user_id: Uuid) -> Self {
        self.user_id = Some(user_id);
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_cached_tokens(mut self, cached_tokens: i32) -> Self {
        self.cached_tokens = cached_tokens;
        self
    }

    pub fn with_costs(mut self, input_cost: Decimal, output_cost: Decimal) -> Self {
        self.input_cost = Some(input_cost);
        self.output_cost = Some(output_cost);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn total_tokens(&self) -> i64 {
        i64::from(self.input_tokens) + i64::from(self.output_tokens)
    }
}
