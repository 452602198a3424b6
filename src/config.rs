use std::env;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

const DEFAULT_DATABASE_URL: &str = "sqlite:./data/msgly.db?mode=rwc";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_TOKEN_TTL_SECS: u64 = 24 * 60 * 60;
const MAX_TOKEN_TTL_SECS: u64 = 365 * 24 * 60 * 60;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;
const DEV_SECRET_KEY: &str = "secret";

// bcrypt accepts costs 4..=31.
const MIN_WORK_FACTOR: u32 = 4;
const MAX_WORK_FACTOR: u32 = 31;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required environment variable {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },

    #[error("BCRYPT_WORK_FACTOR must be between {min} and {max}, got {got}")]
    WorkFactorOutOfRange { got: u32, min: u32, max: u32 },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    pub secret_key: String,
    pub bcrypt_work_factor: u32,
    pub token_ttl: Duration,
    pub hash_concurrency: usize,
    pub request_timeout: Duration,
    pub db_max_connections: u32,
}

impl Config {
    /// Reads configuration from the process environment. Call
    /// `dotenvy::dotenv()` first if a `.env` file should be honoured.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let secret_key = match lookup("SECRET_KEY") {
            Some(key) if !key.is_empty() => key,
            _ if cfg!(debug_assertions) => {
                tracing::warn!("SECRET_KEY not set, using the development key");
                DEV_SECRET_KEY.to_string()
            }
            _ => return Err(ConfigError::Missing("SECRET_KEY")),
        };

        let bcrypt_work_factor = parse_or(&lookup, "BCRYPT_WORK_FACTOR", bcrypt::DEFAULT_COST)?;
        if !(MIN_WORK_FACTOR..=MAX_WORK_FACTOR).contains(&bcrypt_work_factor) {
            return Err(ConfigError::WorkFactorOutOfRange {
                got: bcrypt_work_factor,
                min: MIN_WORK_FACTOR,
                max: MAX_WORK_FACTOR,
            });
        }

        let token_ttl_secs = parse_or(&lookup, "TOKEN_TTL_SECS", DEFAULT_TOKEN_TTL_SECS)?;
        if token_ttl_secs > MAX_TOKEN_TTL_SECS {
            return Err(ConfigError::Invalid {
                name: "TOKEN_TTL_SECS",
                value: token_ttl_secs.to_string(),
            });
        }

        let default_concurrency = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        let hash_concurrency = parse_or(&lookup, "HASH_CONCURRENCY", default_concurrency)?.max(1);

        Ok(Self {
            database_url: lookup("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            secret_key,
            bcrypt_work_factor,
            token_ttl: Duration::from_secs(token_ttl_secs),
            hash_concurrency,
            request_timeout: Duration::from_secs(parse_or(
                &lookup,
                "REQUEST_TIMEOUT_SECS",
                DEFAULT_REQUEST_TIMEOUT_SECS,
            )?),
            db_max_connections: parse_or(&lookup, "DB_MAX_CONNECTIONS", DEFAULT_DB_MAX_CONNECTIONS)?
                .max(1),
        })
    }
}

fn parse_or<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(name) {
        Some(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        None => Ok(default),
    }
}
