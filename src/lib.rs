pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod organizations;
pub mod routes;
pub mod telemetry;
pub mod usage;

pub use db::{get_session, DatabaseManager, DB};
pub use error::{AppError, AppResult};
pub use usage::{NewUsageEvent, TokenUsageSink, UsageService};
