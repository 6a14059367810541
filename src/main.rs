use axum::{routing::get, Extension, Router};
use axum_prometheus::PrometheusMetricLayer;
use std::net::SocketAddr;

use tenant_core::routes::api_routes;
use tenant_core::{config, telemetry, usage, DB};

async fn root() -> &'static str {
    "Tenant Core API"
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init();

    let pool = DB.pool()?;
    if !DB.health_check().await {
        tracing::warn!("database not reachable at startup; requests will retry on demand");
    }

    if let Err(error) = DB.run_migrations().await {
        if *config::ALLOW_MIGRATION_FAILURE {
            tracing::warn!(
                ?error,
                "Database migrations failed but continuing due to ALLOW_MIGRATION_FAILURE"
            );
        } else {
            return Err(error.into());
        }
    }

    usage::spawn_usage_reconciliation(pool.clone());

    let (prometheus_layer, metrics_handle) = PrometheusMetricLayer::pair();
    let app = Router::new()
        .route("/", get(root))
        .route(
            "/metrics",
            get(move || async move { metrics_handle.render() }),
        )
        .merge(api_routes())
        .layer(prometheus_layer)
        .layer(Extension(pool));

    let addr: SocketAddr =
        format!("{}:{}", config::BIND_ADDRESS.as_str(), *config::BIND_PORT).parse()?;
    tracing::info!(%addr, "Listening for incoming connections");
    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await?;

    DB.close().await;
    Ok(())
}
