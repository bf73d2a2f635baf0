//! Connection pool handling.
//!
//! Database-specific pools (MySqlPool, PgPool, SqlitePool) behind one enum,
//! so the rest of the engine dispatches per backend without AnyPool's type
//! limitations. The backend is chosen from the connection URL scheme.

use crate::config::PoolOptions;
use crate::dialect::{SqlDialect, parse_version};
use crate::error::{OrmError, OrmResult};
use sqlx::{
    MySqlPool, PgPool, SqlitePool, mysql::MySqlConnectOptions, mysql::MySqlPoolOptions,
    postgres::PgPoolOptions, sqlite::SqliteConnectOptions, sqlite::SqlitePoolOptions,
};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, error};
use url::Url;

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum DbPool {
    MySql(MySqlPool),
    Postgres(PgPool),
    SQLite(SqlitePool),
}

impl DbPool {
    /// Connect to the database named by `url`. Pool options given in the
    /// URL query string win over the ones passed in.
    pub async fn connect(url: &str, options: &PoolOptions) -> OrmResult<Self> {
        let parsed = Url::parse(url)
            .map_err(|e| OrmError::connection(format!("Invalid connection URL: {e}")))?;
        let (url_options, stripped) = PoolOptions::from_url(&parsed);
        let options = merge_options(options, &url_options);
        options.validate().map_err(OrmError::config)?;

        let is_sqlite = parsed.scheme() == "sqlite";
        let acquire_timeout = Duration::from_secs(options.acquire_timeout_or_default());
        let idle_timeout = Some(Duration::from_secs(options.idle_timeout_or_default()));
        let min = options.min_connections_or_default();
        let max = options.max_connections_or_default(is_sqlite);

        match parsed.scheme() {
            "mysql" | "mariadb" => {
                let connect = MySqlConnectOptions::from_str(stripped.as_str())
                    .map_err(|e| {
                        OrmError::connection(format!("Invalid MySQL connection string: {e}"))
                    })?
                    .charset("utf8mb4");
                let pool = MySqlPoolOptions::new()
                    .min_connections(min)
                    .max_connections(max)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(connect)
                    .await?;
                Ok(DbPool::MySql(pool))
            }
            "postgres" | "postgresql" => {
                let pool = PgPoolOptions::new()
                    .min_connections(min)
                    .max_connections(max)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect(stripped.as_str())
                    .await?;
                Ok(DbPool::Postgres(pool))
            }
            "sqlite" => {
                let connect = SqliteConnectOptions::from_str(stripped.as_str())
                    .map_err(|e| {
                        OrmError::connection(format!("Invalid SQLite connection string: {e}"))
                    })?
                    .create_if_missing(true);
                let pool = SqlitePoolOptions::new()
                    .min_connections(min)
                    .max_connections(max)
                    .acquire_timeout(acquire_timeout)
                    .idle_timeout(idle_timeout)
                    .connect_with(connect)
                    .await?;
                Ok(DbPool::SQLite(pool))
            }
            other => Err(OrmError::config(format!(
                "Unsupported database scheme '{other}'"
            ))),
        }
    }

    pub async fn close(&self) {
        match self {
            DbPool::MySql(pool) => pool.close().await,
            DbPool::Postgres(pool) => pool.close().await,
            DbPool::SQLite(pool) => pool.close().await,
        }
    }

    pub fn backend(&self) -> &'static str {
        match self {
            DbPool::MySql(_) => "mysql",
            DbPool::Postgres(_) => "postgresql",
            DbPool::SQLite(_) => "sqlite",
        }
    }

    /// Classify the backend into a dialect from the pool variant and the
    /// server's reported version. Detection failure never propagates; it
    /// degrades to [`SqlDialect::Failsafe`] after logging.
    pub(crate) async fn detect_dialect(&self) -> SqlDialect {
        let result = match self {
            DbPool::MySql(pool) => {
                sqlx::query_scalar::<_, String>("SELECT VERSION()")
                    .fetch_one(pool)
                    .await
                    .map(|version| {
                        let (major, minor) = parse_version(&version);
                        let dialect = SqlDialect::from_product("mysql", &version, major, minor);
                        (version, dialect)
                    })
            }
            DbPool::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SHOW server_version")
                    .fetch_one(pool)
                    .await
                    .map(|version| (version, SqlDialect::Postgres))
            }
            DbPool::SQLite(pool) => {
                sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                    .fetch_one(pool)
                    .await
                    .map(|version| (version, SqlDialect::Sqlite))
            }
        };
        match result {
            Ok((version, dialect)) => {
                debug!(backend = self.backend(), version = %version, ?dialect, "Detected SQL dialect");
                dialect
            }
            Err(e) => {
                error!(backend = self.backend(), error = %e, "Unable to determine SQL dialect");
                SqlDialect::Failsafe
            }
        }
    }
}

fn merge_options(base: &PoolOptions, overrides: &PoolOptions) -> PoolOptions {
    PoolOptions {
        max_connections: overrides.max_connections.or(base.max_connections),
        min_connections: overrides.min_connections.or(base.min_connections),
        idle_timeout_secs: overrides.idle_timeout_secs.or(base.idle_timeout_secs),
        acquire_timeout_secs: overrides.acquire_timeout_secs.or(base.acquire_timeout_secs),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sqlite_memory_connect_and_dialect() {
        let pool = DbPool::connect("sqlite::memory:", &PoolOptions::default())
            .await
            .unwrap();
        assert_eq!(pool.backend(), "sqlite");
        assert_eq!(pool.detect_dialect().await, SqlDialect::Sqlite);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_unsupported_scheme_rejected() {
        let err = DbPool::connect("oracle://localhost/xe", &PoolOptions::default())
            .await
            .expect_err("oracle is SQL-text only");
        assert!(err.is_config());
    }

    #[test]
    fn test_merge_prefers_url_options() {
        let base = PoolOptions {
            max_connections: Some(10),
            min_connections: Some(2),
            ..Default::default()
        };
        let overrides = PoolOptions {
            max_connections: Some(3),
            ..Default::default()
        };
        let merged = merge_options(&base, &overrides);
        assert_eq!(merged.max_connections, Some(3));
        assert_eq!(merged.min_connections, Some(2));
    }
}
