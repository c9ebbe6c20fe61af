//! Process settings from environment variables. A `.env` file is loaded first when present.

use crate::error::ConfigError;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_SCHEMA: &str = "public";
pub const DEFAULT_EXPORT_RETENTION: Duration = Duration::from_secs(3600);
pub const DEFAULT_NOTIFY_QUEUE_SIZE: usize = 256;

#[derive(Clone, Debug)]
pub struct Settings {
    pub database_url: String,
    /// PostgreSQL schema holding entity tables and the export job table.
    pub schema: String,
    pub export_dir: PathBuf,
    pub export_retention: Duration,
    pub notify_queue_size: usize,
}

impl Settings {
    /// Reads `DATABASE_URL` (required), `CRUDKIT_SCHEMA`, `EXPORT_DIR`,
    /// `EXPORT_RETENTION_SECS` and `NOTIFY_QUEUE_SIZE`.
    pub fn from_env() -> Result<Settings, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Result<Settings, ConfigError> {
        let database_url = get("DATABASE_URL")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::Settings("DATABASE_URL is not set".into()))?;
        let schema = get("CRUDKIT_SCHEMA")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| DEFAULT_SCHEMA.into());
        let export_dir = get("EXPORT_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|| std::env::temp_dir().join("crudkit-exports"));
        let export_retention = parse::<u64>(&get, "EXPORT_RETENTION_SECS")?
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_EXPORT_RETENTION);
        let notify_queue_size = parse::<usize>(&get, "NOTIFY_QUEUE_SIZE")?.unwrap_or(DEFAULT_NOTIFY_QUEUE_SIZE);
        Ok(Settings {
            database_url,
            schema,
            export_dir,
            export_retention,
            notify_queue_size,
        })
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Result<Option<T>, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| ConfigError::Settings(format!("{}: {}", key, e))),
    }
}
