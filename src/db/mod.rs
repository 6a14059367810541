//! Connection management and table access.
//!
//! [`DatabaseManager`] keeps one lazily-connected pool per execution context. A pool's
//! maintenance tasks belong to the runtime that created it, so a pool is never handed to a
//! different runtime: every current-thread runtime (one per test, one per worker thread that
//! builds its own) gets a pool of its own, while a multi-thread runtime shares one.

pub mod documents;
pub mod model_pricing;
pub mod organizations;
pub mod usage_daily_summary;
pub mod usage_events;
pub mod usage_limits;

use dashmap::DashMap;
use futures_util::future::BoxFuture;
use once_cell::sync::Lazy;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgConnection, PgPool, Postgres, Transaction};
use std::str::FromStr;
use std::thread::ThreadId;
use tokio::runtime::{Handle, RuntimeFlavor};
use tracing::{debug, info, warn};

use crate::config::{self, DatabaseConfig};
use crate::error::{AppError, AppResult};

/// key: connection-manager -> identity of the runtime a pool is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContextKey {
    Shared,
    Thread(ThreadId),
}

impl ContextKey {
    pub fn current() -> Self {
        match Handle::try_current().map(|handle| handle.runtime_flavor()) {
            Ok(RuntimeFlavor::CurrentThread) | Err(_) => {
                ContextKey::Thread(std::thread::current().id())
            }
            Ok(_) => ContextKey::Shared,
        }
    }
}

pub struct DatabaseManager {
    config: DatabaseConfig,
    pools: DashMap<ContextKey, PgPool>,
}

impl DatabaseManager {
    pub fn new(config: DatabaseConfig) -> Self {
        Self {
            config,
            pools: DashMap::new(),
        }
    }

    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Pool for the calling execution context, created on first use. No connection is opened
    /// until the pool is first queried.
    pub fn pool(&self) -> AppResult<PgPool> {
        if !self.config.enabled {
            return Err(AppError::Config("database access is disabled".into()));
        }

        let key = ContextKey::current();
        if let Some(pool) = self.pools.get(&key) {
            return Ok(pool.value().clone());
        }

        let options = self.connect_options()?;
        let pool = self
            .pools
            .entry(key)
            .or_insert_with(|| {
                debug!(
                    ?key,
                    max_connections = self.config.max_connections(),
                    "creating database pool"
                );
                self.pool_options().connect_lazy_with(options)
            })
            .value()
            .clone();
        Ok(pool)
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Begins a transaction. Dropping it without `commit` rolls back and releases the connection.
    pub async fn session(&self) -> AppResult<Transaction<'static, Postgres>> {
        let pool = self.pool()?;
        Ok(pool.begin().await?)
    }

    /// Runs `work` inside a transaction that commits on `Ok` and rolls back on `Err`.
    pub async fn transaction<T, F>(&self, work: F) -> AppResult<T>
    where
        F: for<'c> FnOnce(&'c mut PgConnection) -> BoxFuture<'c, AppResult<T>>,
        T: Send,
    {
        let mut tx = self.session().await?;
        match work(&mut *tx).await {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(error) => {
                if let Err(rollback_error) = tx.rollback().await {
                    warn!(?rollback_error, "rollback after failed transaction also failed");
                }
                Err(error)
            }
        }
    }

    pub async fn health_check(&self) -> bool {
        let Ok(pool) = self.pool() else {
            return false;
        };
        match sqlx::query_scalar::<_, i32>("SELECT 1").fetch_one(&pool).await {
            Ok(_) => true,
            Err(error) => {
                warn!(?error, "database health check failed");
                false
            }
        }
    }

    pub async fn run_migrations(&self) -> AppResult<()> {
        let pool = self.pool()?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("database migrations applied");
        Ok(())
    }

    /// Closes every pool this manager created and forgets them.
    pub async fn close(&self) {
        let keys: Vec<ContextKey> = self.pools.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, pool)) = self.pools.remove(&key) {
                pool.close().await;
            }
        }
        info!("database pools closed");
    }

    /// An explicit URL is parsed as given. Otherwise the parts are set one by one, so
    /// credentials never pass through URL syntax.
    fn connect_options(&self) -> AppResult<PgConnectOptions> {
        let mut options = match self.config.explicit_url() {
            Some(url) => PgConnectOptions::from_str(&url)?,
            None => {
                let options = PgConnectOptions::new()
                    .host(&self.config.host)
                    .port(self.config.port)
                    .username(&self.config.user)
                    .database(&self.config.name);
                if self.config.password.is_empty() {
                    options
                } else {
                    options.password(&self.config.password)
                }
            }
        };
        if !self.config.echo {
            options.disable_statement_logging();
        }
        Ok(options)
    }

    fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.config.max_connections())
            .min_connections(0)
            .acquire_timeout(self.config.pool_timeout)
            .max_lifetime(self.config.pool_recycle)
    }
}

/// Process-wide manager configured from the environment.
pub static DB: Lazy<DatabaseManager> =
    Lazy::new(|| DatabaseManager::new(config::DATABASE_CONFIG.clone()));

/// Opens a transaction on the process-wide manager for a request handler.
pub async fn get_session() -> AppResult<Transaction<'static, Postgres>> {
    DB.session().await
}
