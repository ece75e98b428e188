//! Configuration management

use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{self, Context, Result};

/// Tuning for the chunked import pipeline
#[derive(Debug, Clone)]
pub struct ImportSettings {
    /// Data rows considered per invocation
    pub chunk_size: usize,
    /// Records per creation batch
    pub create_batch_size: usize,
    /// Creation batches running at once
    pub create_concurrency: usize,
    /// Emails per existence-check query
    pub dedup_batch_size: usize,
    /// Existence-check queries running at once
    pub dedup_concurrency: usize,
    /// Pause between records within a creation batch
    pub record_delay: Duration,
    /// Pause between creation batch groups
    pub batch_group_delay: Duration,
    /// Execution-time ceiling of one invocation
    pub time_budget: Duration,
    /// Fraction of `time_budget` after which no new batch group starts
    pub budget_fraction: f64,
    /// Auto-expiry of job locks and store leases
    pub lock_ttl: Duration,
    /// Jobs fetched as claim candidates per invocation
    pub candidate_limit: i64,
    /// Validation errors after which a chunk stops validating
    pub max_validation_errors: usize,
}

impl Default for ImportSettings {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            create_batch_size: 100,
            create_concurrency: 2,
            dedup_batch_size: 100,
            dedup_concurrency: 3,
            record_delay: Duration::from_millis(20),
            batch_group_delay: Duration::from_millis(100),
            time_budget: Duration::from_secs(60),
            budget_fraction: 0.8,
            lock_ttl: Duration::from_secs(300),
            candidate_limit: 5,
            max_validation_errors: 100,
        }
    }
}

impl ImportSettings {
    /// Elapsed time after which no new creation batch group is dispatched
    pub fn deadline(&self) -> Duration {
        self.time_budget.mul_f64(self.budget_fraction.clamp(0.0, 1.0))
    }

    /// Load overrides from `IMPORT_*` environment variables
    pub fn from_env() -> Result<Self> {
        let d = Self::default();
        let budget_fraction: f64 = env_parse("IMPORT_BUDGET_FRACTION", d.budget_fraction)?;
        if budget_fraction <= 0.0 || budget_fraction > 1.0 {
            anyhow::bail!("IMPORT_BUDGET_FRACTION must be in (0, 1], got {}", budget_fraction);
        }

        Ok(Self {
            chunk_size: env_parse("IMPORT_CHUNK_SIZE", d.chunk_size)?.max(1),
            create_batch_size: env_parse("IMPORT_CREATE_BATCH_SIZE", d.create_batch_size)?.max(1),
            create_concurrency: env_parse("IMPORT_CREATE_CONCURRENCY", d.create_concurrency)?.max(1),
            dedup_batch_size: env_parse("IMPORT_DEDUP_BATCH_SIZE", d.dedup_batch_size)?.max(1),
            dedup_concurrency: env_parse("IMPORT_DEDUP_CONCURRENCY", d.dedup_concurrency)?.max(1),
            record_delay: Duration::from_millis(env_parse("IMPORT_RECORD_DELAY_MS", d.record_delay.as_millis() as u64)?),
            batch_group_delay: Duration::from_millis(env_parse("IMPORT_BATCH_GROUP_DELAY_MS", d.batch_group_delay.as_millis() as u64)?),
            time_budget: Duration::from_secs(env_parse("IMPORT_TIME_BUDGET_SECS", d.time_budget.as_secs())?),
            budget_fraction,
            lock_ttl: Duration::from_secs(env_parse("IMPORT_LOCK_TTL_SECS", d.lock_ttl.as_secs())?),
            candidate_limit: env_parse("IMPORT_CANDIDATE_LIMIT", d.candidate_limit)?.max(1),
            max_validation_errors: d.max_validation_errors,
        })
    }
}

/// Application configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// PostgreSQL connection string
    pub database_url: String,

    /// HTTP listen address for the cron endpoint
    pub bind_addr: SocketAddr,

    /// Shared secret expected in `Authorization: Bearer ...` on cron calls
    pub cron_secret: Option<String>,

    /// Run the scheduler in-process every N seconds (disabled when unset)
    pub tick_interval: Option<Duration>,

    pub import: ImportSettings,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let database_url = std::env::var("DATABASE_URL")
            .context("DATABASE_URL must be set")?;

        let bind_addr = std::env::var("BIND_ADDR")
            .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
            .parse::<SocketAddr>()
            .context("BIND_ADDR must be a socket address like 0.0.0.0:8080")?;

        let cron_secret = std::env::var("CRON_SECRET").ok().filter(|s| !s.is_empty());
        if cron_secret.is_none() {
            tracing::warn!("CRON_SECRET is not set - cron endpoint accepts unauthenticated calls");
        }

        let tick_interval = match std::env::var("IMPORT_TICK_SECS") {
            Ok(v) => {
                let secs: u64 = v.parse().context("IMPORT_TICK_SECS must be a whole number of seconds")?;
                (secs > 0).then(|| Duration::from_secs(secs))
            }
            Err(_) => None,
        };

        Ok(Self {
            database_url,
            bind_addr,
            cron_secret,
            tick_interval,
            import: ImportSettings::from_env()?,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("{} has invalid value '{}': {}", key, raw, e)),
        Err(_) => Ok(default),
    }
}
