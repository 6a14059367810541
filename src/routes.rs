use axum::{
    routing::{get, post},
    Router,
};

use crate::{organizations, usage};

pub fn api_routes() -> Router {
    Router::new()
        .merge(organizations::routes())
        .route(
            "/api/orgs/:id/usage/storage",
            get(usage::usage_storage_summary),
        )
        .route(
            "/api/orgs/:id/usage/storage/check",
            post(usage::usage_check_storage),
        )
        .route(
            "/api/orgs/:id/usage/tokens/check",
            post(usage::usage_check_tokens),
        )
        .route("/api/orgs/:id/usage/events", get(usage::usage_list_events))
}
