pub mod api;
pub mod events;
pub mod models;
pub mod reconciliation;
pub mod service;

pub use api::{
    check_storage as usage_check_storage, check_tokens as usage_check_tokens,
    list_events as usage_list_events, storage_summary as usage_storage_summary,
    EventsQuery, StorageCheckRequest, TokenCheckRequest,
};
pub use events::{validate_usage_event, UsageEventValidationError};
pub use models::{
    resolve_storage_limit, resolve_token_limit, NewUsageEvent, StorageLimitResult, StorageTier,
    StorageUsageSummary, TokenLimitResult, BYTES_PER_MIB,
};
pub use reconciliation::{
    process_tick as run_usage_reconciliation_tick, spawn as spawn_usage_reconciliation,
    ReconciliationReport,
};
pub use service::{month_bounds, TokenUsageSink, UsageService};
