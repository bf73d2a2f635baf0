//! Engine configuration.
//!
//! [`OrmConfig`] collects the knobs the engine reads at startup: the naming
//! policy for column derivation, the property blacklist, strict-mode
//! behavior for unmatched result columns, and pool sizing. Pool options can
//! also be read from query parameters of the connection URL, for example
//! `sqlite::memory:?max_connections=1`.

use crate::naming::NamingPolicy;
use std::collections::HashSet;
use url::Url;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_MAX_CONNECTIONS_SQLITE: u32 = 1;
pub const DEFAULT_MIN_CONNECTIONS: u32 = 1;
pub const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 600;
pub const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 30;

/// Connection pool configuration options, optionally parsed from the
/// database URL's query string.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct PoolOptions {
    /// Maximum connections in pool (default: 10 for MySQL/PostgreSQL, 1 for SQLite)
    pub max_connections: Option<u32>,
    /// Minimum connections in pool (default: 1)
    pub min_connections: Option<u32>,
    /// Idle timeout in seconds (default: 600)
    pub idle_timeout_secs: Option<u64>,
    /// Connection acquire timeout in seconds (default: 30)
    pub acquire_timeout_secs: Option<u64>,
}

impl PoolOptions {
    /// Extract pool options from a connection URL's query parameters and
    /// return them together with the URL stripped of those parameters.
    pub fn from_url(url: &Url) -> (Self, Url) {
        let mut options = Self::default();
        let mut stripped = url.clone();
        let mut kept: Vec<(String, String)> = Vec::new();
        for (key, value) in url.query_pairs() {
            match key.as_ref() {
                "max_connections" => options.max_connections = value.parse().ok(),
                "min_connections" => options.min_connections = value.parse().ok(),
                "idle_timeout_secs" => options.idle_timeout_secs = value.parse().ok(),
                "acquire_timeout_secs" => options.acquire_timeout_secs = value.parse().ok(),
                _ => kept.push((key.into_owned(), value.into_owned())),
            }
        }
        if kept.is_empty() {
            stripped.set_query(None);
        } else {
            let query: Vec<String> = kept.iter().map(|(k, v)| format!("{k}={v}")).collect();
            stripped.set_query(Some(&query.join("&")));
        }
        (options, stripped)
    }

    pub fn max_connections_or_default(&self, is_sqlite: bool) -> u32 {
        self.max_connections.unwrap_or(if is_sqlite {
            DEFAULT_MAX_CONNECTIONS_SQLITE
        } else {
            DEFAULT_MAX_CONNECTIONS
        })
    }

    pub fn min_connections_or_default(&self) -> u32 {
        self.min_connections.unwrap_or(DEFAULT_MIN_CONNECTIONS)
    }

    pub fn idle_timeout_or_default(&self) -> u64 {
        self.idle_timeout_secs.unwrap_or(DEFAULT_IDLE_TIMEOUT_SECS)
    }

    pub fn acquire_timeout_or_default(&self) -> u64 {
        self.acquire_timeout_secs
            .unwrap_or(DEFAULT_ACQUIRE_TIMEOUT_SECS)
    }

    /// Validate pool options and return an error message if invalid.
    pub fn validate(&self) -> Result<(), String> {
        if let Some(max) = self.max_connections {
            if max == 0 {
                return Err("max_connections must be greater than 0".to_string());
            }
        }
        if let Some(min) = self.min_connections {
            if let Some(max) = self.max_connections {
                if min > max {
                    return Err(format!(
                        "min_connections ({}) cannot exceed max_connections ({})",
                        min, max
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Engine-level configuration, consumed once when the data source is set.
#[derive(Debug, Clone)]
pub struct OrmConfig {
    /// Column-name derivation for properties without an explicit override.
    pub naming: NamingPolicy,
    /// Property names dropped from every schema, regardless of overrides.
    pub blacklist: HashSet<String>,
    /// When true, a result column with no matching property is an error
    /// instead of a warning.
    pub strict: bool,
    /// Pool sizing; query-string values on the URL take precedence.
    pub pool: PoolOptions,
}

impl OrmConfig {
    pub fn new() -> Self {
        Self {
            naming: NamingPolicy::default(),
            blacklist: HashSet::new(),
            strict: false,
            pool: PoolOptions::default(),
        }
    }

    pub fn naming(mut self, policy: NamingPolicy) -> Self {
        self.naming = policy;
        self
    }

    pub fn blacklist(mut self, names: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.blacklist.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn pool(mut self, pool: PoolOptions) -> Self {
        self.pool = pool;
        self
    }
}

impl Default for OrmConfig {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_options_from_url() {
        let url = Url::parse("postgres://localhost/db?max_connections=5&sslmode=disable").unwrap();
        let (options, stripped) = PoolOptions::from_url(&url);
        assert_eq!(options.max_connections, Some(5));
        assert_eq!(stripped.query(), Some("sslmode=disable"));
    }

    #[test]
    fn test_pool_options_defaults() {
        let options = PoolOptions::default();
        assert_eq!(options.max_connections_or_default(false), 10);
        assert_eq!(options.max_connections_or_default(true), 1);
        assert_eq!(options.min_connections_or_default(), 1);
    }

    #[test]
    fn test_pool_options_validation() {
        let bad = PoolOptions {
            max_connections: Some(0),
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let inverted = PoolOptions {
            max_connections: Some(2),
            min_connections: Some(5),
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
        assert!(PoolOptions::default().validate().is_ok());
    }

    #[test]
    fn test_builder_style() {
        let config = OrmConfig::new()
            .strict(true)
            .blacklist(["internal_version"]);
        assert!(config.strict);
        assert!(config.blacklist.contains("internal_version"));
    }
}
