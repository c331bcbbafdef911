//! Store configuration read from the process environment.
//!
//! | Variable | Default | Meaning |
//! |----------|---------|---------|
//! | `USE_PERSISTENT_STORES` | `false` | `true` selects Postgres, otherwise in-memory |
//! | `DATABASE_URL` | required when persistent | Postgres connection string |
//! | `DB_MAX_CONNECTIONS` | `10` | pool size |
//! | `DB_ACQUIRE_TIMEOUT_MS` | `30000` | wait for a pooled connection |
//! | `DB_STATEMENT_TIMEOUT_MS` | `5000` | server-side per-statement bound |
//! | `STEP_TIMEOUT_MS` | `5000` | client-side bound on each unit-of-work step |

use std::time::Duration;

use thiserror::Error;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(30_000);
pub const DEFAULT_STATEMENT_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_millis(5_000);

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{0} must be set when USE_PERSISTENT_STORES=true")]
    Missing(&'static str),

    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

/// Postgres connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

impl DatabaseConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
            statement_timeout: DEFAULT_STATEMENT_TIMEOUT,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackendKind {
    InMemory,
    Postgres(DatabaseConfig),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    pub backend: StoreBackendKind,
    pub step_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackendKind::InMemory,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }
}

impl StoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source (used by tests).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let persistent = parse_or(&lookup, "USE_PERSISTENT_STORES", false)?;
        let step_timeout = millis_or(&lookup, "STEP_TIMEOUT_MS", DEFAULT_STEP_TIMEOUT)?;

        let backend = if persistent {
            let url = lookup("DATABASE_URL")
                .filter(|v| !v.trim().is_empty())
                .ok_or(ConfigError::Missing("DATABASE_URL"))?;
            StoreBackendKind::Postgres(DatabaseConfig {
                url,
                max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
                acquire_timeout: millis_or(&lookup, "DB_ACQUIRE_TIMEOUT_MS", DEFAULT_ACQUIRE_TIMEOUT)?,
                statement_timeout: millis_or(
                    &lookup,
                    "DB_STATEMENT_TIMEOUT_MS",
                    DEFAULT_STATEMENT_TIMEOUT,
                )?,
            })
        } else {
            StoreBackendKind::InMemory
        };

        Ok(Self {
            backend,
            step_timeout,
        })
    }
}

fn parse_or<F, T>(lookup: &F, var: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: core::str::FromStr,
{
    match lookup(var) {
        None => Ok(default),
        Some(raw) => raw.trim().parse::<T>().map_err(|_| ConfigError::Invalid {
            var,
            value: raw.clone(),
        }),
    }
}

fn millis_or<F>(lookup: &F, var: &'static str, default: Duration) -> Result<Duration, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let default_ms = u64::try_from(default.as_millis()).unwrap_or(u64::MAX);
    let ms: u64 = parse_or(lookup, var, default_ms)?;
    if ms == 0 {
        return Err(ConfigError::Invalid {
            var,
            value: "0".to_string(),
        });
    }
    Ok(Duration::from_millis(ms))
}
