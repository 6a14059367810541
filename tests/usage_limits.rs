use chrono::{NaiveDate, TimeZone, Utc};
use rust_decimal::Decimal;
use serde_json::json;
use sqlx::PgPool;
use std::str::FromStr;
use tenant_core::db::{organizations, usage_daily_summary, usage_limits};
use tenant_core::models::Organization;
use tenant_core::usage::{
    run_usage_reconciliation_tick, NewUsageEvent, TokenUsageSink, UsageService, BYTES_PER_MIB,
};
use uuid::Uuid;

async fn create_org(pool: &PgPool, name: &str, plan_type: &str) -> Organization {
    let plan = organizations::find_plan_by_name(pool, plan_type)
        .await
        .unwrap();
    organizations::insert_organization(
        pool,
        name,
        None,
        plan_type,
        plan.map(|plan| plan.id),
        &json!({}),
    )
    .await
    .unwrap()
}

async fn insert_document(pool: &PgPool, organization_id: Uuid, size: i64, active: bool) {
    sqlx::query(
        r#"
        INSERT INTO documents (
            organization_id, filename, original_filename, file_type, file_size,
            storage_path, uploaded_by, is_active
        ) VALUES ($1, $2, $2, 'pdf', $3, $4, $5, $6)
        "#,
    )
    .bind(organization_id)
    .bind(format!("{}.pdf", Uuid::new_v4()))
    .bind(size)
    .bind(format!("gs://bucket/{organization_id}"))
    .bind(Uuid::new_v4())
    .bind(active)
    .execute(pool)
    .await
    .unwrap();
}

async fn count(pool: &PgPool, table: &str, organization_id: Uuid) -> i64 {
    sqlx::query_scalar(&format!(
        "SELECT COUNT(*) FROM {table} WHERE organization_id = $1"
    ))
    .bind(organization_id)
    .fetch_one(pool)
    .await
    .unwrap()
}

// key: usage-tests -> locked counters,no lost updates
#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_storage_updates_are_not_lost(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Concurrent Storage", "free").await;
    let service = UsageService::new(pool.clone());

    let tasks: Vec<_> = (0..20)
        .map(|_| {
            let service = service.clone();
            tokio::spawn(async move { service.update_storage_used(org.id, 1_000).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    let limits = usage_limits::find_usage_limits(&pool, org.id)
        .await
        .unwrap()
        .expect("limits row created lazily");
    assert_eq!(limits.storage_used_bytes, 20_000);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn storage_counter_never_goes_negative(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Shrinking Storage", "free").await;
    let service = UsageService::new(pool.clone());

    assert_eq!(service.update_storage_used(org.id, 500).await.unwrap(), 500);
    assert_eq!(service.update_storage_used(org.id, -2_000).await.unwrap(), 0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn storage_check_reads_documents_without_creating_limits(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Fresh Tenant", "free").await;
    insert_document(&pool, org.id, 60 * BYTES_PER_MIB, true).await;
    insert_document(&pool, org.id, 30 * BYTES_PER_MIB, false).await;
    let service = UsageService::new(pool.clone());

    let allowed = service
        .check_storage_limit(org.id, 40 * BYTES_PER_MIB)
        .await
        .unwrap();
    assert!(allowed.allowed);
    assert_eq!(allowed.current_bytes, 60 * BYTES_PER_MIB);
    assert_eq!(allowed.limit_bytes, 100 * BYTES_PER_MIB);
    assert_eq!(allowed.tier, "free");

    let denied = service
        .check_storage_limit(org.id, 40 * BYTES_PER_MIB + 1)
        .await
        .unwrap();
    assert!(!denied.allowed);

    assert!(usage_limits::find_usage_limits(&pool, org.id)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn storage_check_prefers_tenant_override(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Override Tenant", "pro").await;
    usage_limits::ensure_usage_limits(&pool, org.id).await.unwrap();
    sqlx::query("UPDATE usage_limits SET storage_limit_bytes = 2048 WHERE organization_id = $1")
        .bind(org.id)
        .execute(&pool)
        .await
        .unwrap();
    let service = UsageService::new(pool.clone());
    service.update_storage_used(org.id, 1024).await.unwrap();

    let summary = service.storage_usage_summary(org.id).await.unwrap();
    assert_eq!(summary.storage_limit_bytes, 2048);
    assert_eq!(summary.remaining_bytes, 1024);
    assert_eq!(summary.percentage_used, 50.0);
    assert_eq!(summary.tier, "pro");
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn storage_check_for_unknown_tenant_is_denied(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let service = UsageService::new(pool.clone());

    let result = service.check_storage_limit(Uuid::new_v4(), 1).await.unwrap();
    assert!(!result.allowed);
    assert_eq!(result.tier, "unknown");
    assert_eq!(result.percentage_used, 100.0);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn recalculate_storage_repairs_drifted_counter(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Drifted Tenant", "starter").await;
    let service = UsageService::new(pool.clone());
    service.update_storage_used(org.id, 9_999_999).await.unwrap();
    insert_document(&pool, org.id, 1_234, true).await;
    insert_document(&pool, org.id, 766, true).await;
    insert_document(&pool, org.id, 5_000, false).await;

    assert_eq!(service.recalculate_storage(org.id).await.unwrap(), 2_000);
    let check = service.check_storage_limit(org.id, 0).await.unwrap();
    assert_eq!(check.current_bytes, 2_000);
    assert_eq!(check.limit_bytes, 1024 * BYTES_PER_MIB);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn token_check_uses_plan_limit_and_does_not_mutate(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Token Tenant", "free").await;
    let service = UsageService::new(pool.clone());

    let no_row = service.check_token_limit(org.id, 1_000_000).await.unwrap();
    assert!(no_row.allowed);
    assert_eq!(no_row.monthly_limit, None);

    service.update_tokens_used(org.id, 9_000).await.unwrap();
    let denied = service.check_token_limit(org.id, 2_000).await.unwrap();
    assert!(!denied.allowed);
    assert_eq!(denied.monthly_limit, Some(10_000));
    assert_eq!(denied.remaining_tokens, Some(1_000));
    assert_eq!(denied.percentage_used, 90.0);

    let limits = usage_limits::find_usage_limits(&pool, org.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(limits.credit_used_this_period, 9_000);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn negative_estimates_are_rejected(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Negative Tenant", "free").await;
    let service = UsageService::new(pool.clone());

    assert!(service.check_token_limit(org.id, -1).await.is_err());
    assert!(service.check_storage_limit(org.id, -1).await.is_err());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn logged_usage_prices_event_and_rolls_up_daily(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Logging Tenant", "pro").await;
    let service = UsageService::new(pool.clone());

    let event = NewUsageEvent::new(org.id, "document_agent", "gpt-4o", "openai", 400_000, 100_000);
    let event_id = service
        .log_token_usage(event)
        .await
        .expect("event recorded");

    let (input_cost, output_cost): (Decimal, Decimal) =
        sqlx::query_as("SELECT input_cost, output_cost FROM usage_events WHERE id = $1")
            .bind(event_id)
            .fetch_one(&pool)
            .await
            .unwrap();
    assert_eq!(input_cost, Decimal::from_str("1.0").unwrap());
    assert_eq!(output_cost, Decimal::from_str("1.0").unwrap());

    let limits = usage_limits::find_usage_limits(&pool, org.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(limits.credit_used_this_period, 500_000);

    let summary =
        usage_daily_summary::find_daily_summary(&pool, org.id, Utc::now().date_naive())
            .await
            .unwrap()
            .unwrap();
    assert_eq!(summary.total_requests, 1);
    assert_eq!(summary.total_tokens, 500_000);
    assert_eq!(summary.feature_breakdown["document_agent"], json!(500_000));
    assert_eq!(summary.model_breakdown["gpt-4o"], json!(500_000));
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn duplicate_request_id_is_counted_once(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Retry Tenant", "free").await;
    let service = UsageService::new(pool.clone());
    let event = NewUsageEvent::new(org.id, "chat", "unpriced-model", "custom", 100, 50)
        .with_request_id("req-retry-1");

    let first = service.log_token_usage(event.clone()).await.unwrap();
    let second = service.log_token_usage(event).await.unwrap();
    assert_eq!(first, second);

    assert_eq!(count(&pool, "usage_events", org.id).await, 1);
    let limits = usage_limits::find_usage_limits(&pool, org.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(limits.credit_used_this_period, 150);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn request_id_of_another_tenant_is_not_reused(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let first = create_org(&pool, "First Tenant", "free").await;
    let second = create_org(&pool, "Second Tenant", "free").await;
    let service = UsageService::new(pool.clone());

    let first_event = service
        .log_token_usage(
            NewUsageEvent::new(first.id, "chat", "gpt-4o", "openai", 10, 10)
                .with_request_id("shared"),
        )
        .await;
    assert!(first_event.is_some());

    let second_event = service
        .log_token_usage(
            NewUsageEvent::new(second.id, "chat", "gpt-4o", "openai", 500, 500)
                .with_request_id("shared"),
        )
        .await;
    assert!(second_event.is_none());
    assert_ne!(second_event, first_event);

    assert_eq!(count(&pool, "usage_events", second.id).await, 0);
    assert!(usage_limits::find_usage_limits(&pool, second.id)
        .await
        .unwrap()
        .is_none());
    let first_limits = usage_limits::find_usage_limits(&pool, first.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first_limits.credit_used_this_period, 20);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn concurrent_token_logging_sums_exactly(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Busy Tenant", "business").await;
    let service = UsageService::new(pool.clone());

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let event = NewUsageEvent::new(org.id, "summarize", "gpt-4o-mini", "openai", 70, 30)
                .with_request_id(format!("req-{i}"));
            service.spawn_log_token_usage(event)
        })
        .collect();
    for task in tasks {
        assert!(task.await.unwrap().is_some());
    }

    let limits = usage_limits::find_usage_limits(&pool, org.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(limits.credit_used_this_period, 1_000);
    assert_eq!(count(&pool, "usage_events", org.id).await, 10);
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn logging_failures_are_swallowed(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Quiet Tenant", "free").await;
    let service = UsageService::new(pool.clone());

    let unknown_tenant = NewUsageEvent::new(Uuid::new_v4(), "chat", "gpt-4o", "openai", 10, 10);
    assert!(service.log_token_usage(unknown_tenant).await.is_none());

    let invalid = NewUsageEvent::new(org.id, "", "gpt-4o", "openai", 10, 10);
    let sink: &dyn TokenUsageSink = &service;
    assert!(sink.record_token_usage(invalid).await.is_none());

    assert_eq!(count(&pool, "usage_events", org.id).await, 0);
    assert!(usage_limits::find_usage_limits(&pool, org.id)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn usage_events_reject_updates(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Append Only", "free").await;
    let service = UsageService::new(pool.clone());
    let event_id = service
        .log_token_usage(NewUsageEvent::new(org.id, "chat", "gpt-4o", "openai", 1, 1))
        .await
        .unwrap();

    let result = sqlx::query("UPDATE usage_events SET input_tokens = 0 WHERE id = $1")
        .bind(event_id)
        .execute(&pool)
        .await;
    assert!(result.is_err());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn billing_cycle_reset_zeroes_credit(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Cycle Tenant", "starter").await;
    let service = UsageService::new(pool.clone());
    service.update_tokens_used(org.id, 4_200).await.unwrap();

    let january = Utc.with_ymd_and_hms(2025, 1, 15, 12, 0, 0).unwrap();
    let started = service
        .reset_billing_cycle(org.id, january)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(started.credit_used_this_period, 0);
    assert_eq!(
        started.billing_cycle_start,
        NaiveDate::from_ymd_opt(2025, 1, 1)
    );
    assert_eq!(started.billing_cycle_end, NaiveDate::from_ymd_opt(2025, 2, 1));

    service.update_tokens_used(org.id, 10).await.unwrap();
    let mid_cycle = Utc.with_ymd_and_hms(2025, 1, 31, 0, 0, 0).unwrap();
    assert!(service
        .roll_billing_cycle(org.id, mid_cycle)
        .await
        .unwrap()
        .is_none());

    let next_month = Utc.with_ymd_and_hms(2025, 2, 1, 0, 0, 0).unwrap();
    let rolled = service
        .roll_billing_cycle(org.id, next_month)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rolled.credit_used_this_period, 0);
    assert_eq!(rolled.billing_cycle_end, NaiveDate::from_ymd_opt(2025, 3, 1));

    assert!(service
        .reset_billing_cycle(Uuid::new_v4(), next_month)
        .await
        .unwrap()
        .is_none());
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn deleting_tenant_cascades_usage_rows(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Departing Tenant", "free").await;
    let service = UsageService::new(pool.clone());
    insert_document(&pool, org.id, 10, true).await;
    service.update_storage_used(org.id, 10).await.unwrap();
    service
        .log_token_usage(NewUsageEvent::new(org.id, "chat", "gpt-4o", "openai", 5, 5))
        .await
        .unwrap();

    assert!(organizations::delete_organization(&pool, org.id)
        .await
        .unwrap());

    for table in [
        "documents",
        "usage_limits",
        "usage_events",
        "usage_daily_summary",
    ] {
        assert_eq!(count(&pool, table, org.id).await, 0, "orphans in {table}");
    }
}

#[sqlx::test]
#[ignore = "requires DATABASE_URL with Postgres server"]
async fn reconciliation_tick_rolls_cycles_and_repairs_storage(pool: PgPool) {
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    let org = create_org(&pool, "Reconciled Tenant", "free").await;
    let service = UsageService::new(pool.clone());
    service.update_tokens_used(org.id, 77).await.unwrap();
    service.update_storage_used(org.id, 123_456).await.unwrap();
    insert_document(&pool, org.id, 42, true).await;

    let now = Utc.with_ymd_and_hms(2025, 6, 3, 8, 0, 0).unwrap();
    let report = run_usage_reconciliation_tick(&pool, now, true).await.unwrap();
    assert_eq!(report.cycles_started, 1);
    assert_eq!(report.storage_recalculated, 1);
    assert_eq!(report.failures, 0);

    let limits = usage_limits::find_usage_limits(&pool, org.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(limits.credit_used_this_period, 0);
    assert_eq!(limits.storage_used_bytes, 42);
    assert_eq!(limits.billing_cycle_end, NaiveDate::from_ymd_opt(2025, 7, 1));

    let again = run_usage_reconciliation_tick(&pool, now, false).await.unwrap();
    assert_eq!(again.cycles_started, 0);
}
