use once_cell::sync::Lazy;
use std::time::Duration;

/// Connection settings for the shared Postgres database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: Option<String>,
    pub user: String,
    pub password: String,
    pub host: String,
    pub port: u16,
    pub name: String,
    pub pool_size: u32,
    pub max_overflow: u32,
    pub pool_timeout: Duration,
    pub pool_recycle: Duration,
    pub echo: bool,
    pub enabled: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            user: "postgres".to_string(),
            password: String::new(),
            host: "localhost".to_string(),
            port: 5432,
            name: "doc_intelligence".to_string(),
            pool_size: 5,
            max_overflow: 10,
            pool_timeout: Duration::from_secs(30),
            pool_recycle: Duration::from_secs(1800),
            echo: false,
            enabled: true,
        }
    }
}

impl DatabaseConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary key lookup; unparsable values keep their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        let defaults = Self::default();

        Self {
            url: read("DATABASE_URL"),
            user: read("DATABASE_USER").unwrap_or(defaults.user),
            password: lookup("DATABASE_PASSWORD").unwrap_or(defaults.password),
            host: read("DATABASE_HOST").unwrap_or(defaults.host),
            port: read("DATABASE_PORT")
                .and_then(|value| value.parse::<u16>().ok())
                .unwrap_or(defaults.port),
            name: read("DATABASE_NAME").unwrap_or(defaults.name),
            pool_size: read("DB_POOL_SIZE")
                .and_then(|value| value.parse::<u32>().ok())
                .filter(|value| *value > 0)
                .unwrap_or(defaults.pool_size),
            max_overflow: read("DB_MAX_OVERFLOW")
                .and_then(|value| value.parse::<u32>().ok())
                .unwrap_or(defaults.max_overflow),
            pool_timeout: read("DB_POOL_TIMEOUT")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.pool_timeout),
            pool_recycle: read("DB_POOL_RECYCLE")
                .and_then(|value| value.parse::<u64>().ok())
                .filter(|value| *value > 0)
                .map(Duration::from_secs)
                .unwrap_or(defaults.pool_recycle),
            echo: read("DB_ECHO").map(|value| is_truthy(&value)).unwrap_or(false),
            enabled: read("DATABASE_ENABLED")
                .map(|value| is_truthy(&value))
                .unwrap_or(true),
        }
    }

    /// Explicit `DATABASE_URL`, with driver-suffixed schemes rewritten to `postgres://`.
    /// When unset, connections are built from the individual parts.
    pub fn explicit_url(&self) -> Option<String> {
        self.url.as_deref().map(normalize_scheme)
    }

    pub fn max_connections(&self) -> u32 {
        self.pool_size.saturating_add(self.max_overflow)
    }
}

fn normalize_scheme(url: &str) -> String {
    for prefix in ["postgresql+asyncpg://", "postgresql+psycopg://"] {
        if let Some(rest) = url.strip_prefix(prefix) {
            return format!("postgres://{rest}");
        }
    }
    url.to_string()
}

fn is_truthy(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes")
}

fn read_optional_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub static DATABASE_CONFIG: Lazy<DatabaseConfig> = Lazy::new(DatabaseConfig::from_env);

/// Address the HTTP server should bind to. Defaults to `0.0.0.0`.
pub static BIND_ADDRESS: Lazy<String> =
    Lazy::new(|| read_optional_env("BIND_ADDRESS").unwrap_or_else(|| "0.0.0.0".to_string()));

/// Port the HTTP server should listen on. Defaults to `3000`.
pub static BIND_PORT: Lazy<u16> = Lazy::new(|| {
    read_optional_env("BIND_PORT")
        .and_then(|value| value.parse::<u16>().ok())
        .unwrap_or(3000)
});

/// When set to a truthy value, allows the application to continue running even if database
/// migrations fail. Defaults to `false`.
pub static ALLOW_MIGRATION_FAILURE: Lazy<bool> = Lazy::new(|| {
    read_optional_env("ALLOW_MIGRATION_FAILURE")
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
});

/// key: usage-config -> reconciliation cadence, 0 disables the worker
pub static USAGE_RECONCILE_INTERVAL_SECS: Lazy<u64> = Lazy::new(|| {
    read_optional_env("USAGE_RECONCILE_INTERVAL_SECS")
        .and_then(|value| value.parse::<u64>().ok())
        .unwrap_or(0)
});

/// key: usage-config -> recompute storage counters from documents on each tick
pub static USAGE_RECONCILE_STORAGE: Lazy<bool> = Lazy::new(|| {
    read_optional_env("USAGE_RECONCILE_STORAGE")
        .map(|value| is_truthy(&value))
        .unwrap_or(false)
});
