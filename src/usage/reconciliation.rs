use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::{self, Duration};
use tracing::{debug, info, warn};

use crate::config;
use crate::db::{organizations, usage_limits};

use super::service::UsageService;

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct ReconciliationReport {
    pub cycles_started: usize,
    pub storage_recalculated: usize,
    pub failures: usize,
}

/// key: usage-reconciliation -> periodic cycle roll and storage repair
///
/// Does nothing when `USAGE_RECONCILE_INTERVAL_SECS` is 0.
pub fn spawn(pool: PgPool) {
    let interval_secs = *config::USAGE_RECONCILE_INTERVAL_SECS;
    if interval_secs == 0 {
        debug!("usage reconciliation disabled");
        return;
    }
    let recompute_storage = *config::USAGE_RECONCILE_STORAGE;

    tokio::spawn(async move {
        let mut ticker = time::interval(Duration::from_secs(interval_secs));
        loop {
            ticker.tick().await;
            match process_tick(&pool, Utc::now(), recompute_storage).await {
                Ok(report) => debug!(?report, "usage reconciliation tick finished"),
                Err(err) => warn!(?err, "usage reconciliation tick failed"),
            }
        }
    });
}

/// key: usage-reconciliation -> tick handler
pub async fn process_tick(
    pool: &PgPool,
    now: DateTime<Utc>,
    recompute_storage: bool,
) -> Result<ReconciliationReport> {
    let service = UsageService::new(pool.clone());
    let mut report = ReconciliationReport::default();

    let due = usage_limits::list_due_billing_cycles(pool, now.date_naive()).await?;
    for organization_id in due {
        match service.roll_billing_cycle(organization_id, now).await {
            Ok(Some(_)) => report.cycles_started += 1,
            Ok(None) => {}
            Err(err) => {
                report.failures += 1;
                warn!(?err, %organization_id, "failed to start billing cycle");
            }
        }
    }

    if recompute_storage {
        for organization_id in organizations::list_active_organization_ids(pool).await? {
            match service.recalculate_storage(organization_id).await {
                Ok(_) => report.storage_recalculated += 1,
                Err(err) => {
                    report.failures += 1;
                    warn!(?err, %organization_id, "failed to recalculate storage");
                }
            }
        }
    }

    if report.cycles_started > 0 || report.failures > 0 {
        info!(
            cycles_started = report.cycles_started,
            storage_recalculated = report.storage_recalculated,
            failures = report.failures,
            "usage reconciliation pass complete"
        );
    }
    Ok(report)
}
