use dotenv::dotenv;
use std::collections::HashMap;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use twap_engine::aggregation::{Aggregator, DEFAULT_NOMINAL_BLOCK_SECS};
use twap_engine::processor::ProcessorSettings;
use twap_engine::resilience::RetryPolicy;
use twap_engine::runner::RunnerConfig;
use twap_engine::window::WindowCatalog;
use twap_engine::ConfigError;

/// Everything the service reads from its environment at startup.
#[derive(Debug, Clone)]
pub struct ServiceConfig {
    /// Fossil archive the confirmed pipeline reads headers from.
    pub fossil_db_url: String,
    /// Aggregate database both pipelines write to.
    pub pitchlake_db_url: String,
    pub eth_rpc_url: String,
    pub enable_confirmed: bool,
    pub enable_unconfirmed: bool,
    pub windows: WindowCatalog,
    pub initial_block: u64,
    pub batch_size: u64,
    pub retry_delay: Duration,
    pub batch_max_attempts: u32,
    pub poll_interval: Duration,
    pub nominal_block_secs: u64,
    /// Periodic unconfirmed recalibration; 0 disables it.
    pub recalibrate_every_blocks: u64,
    pub rpc_timeout: Duration,
    pub db_max_connections: u32,
    /// Drain the confirmed backlog once and exit.
    pub catch_up_only: bool,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv().ok();
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub fn from_map(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        Self::from_lookup(|name| vars.get(name).cloned())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let enable_confirmed = flag(&lookup, "ENABLE_CONFIRMED", true)?;
        let enable_unconfirmed = flag(&lookup, "ENABLE_UNCONFIRMED", true)?;

        // A disabled pipeline does not need its upstream.
        let fossil_db_url = if enable_confirmed {
            required(&lookup, "FOSSIL_DB_CONNECTION_STRING")?
        } else {
            lookup("FOSSIL_DB_CONNECTION_STRING").unwrap_or_default()
        };
        let eth_rpc_url = if enable_unconfirmed {
            required(&lookup, "ETH_RPC_URL")?
        } else {
            lookup("ETH_RPC_URL").unwrap_or_default()
        };

        let windows = match non_empty(&lookup, "TWAP_WINDOWS") {
            Some(spec) => WindowCatalog::parse(&spec)?,
            None => WindowCatalog::default(),
        };

        let batch_size = parsed(&lookup, "BATCH_SIZE", 1000u64)?;
        if batch_size == 0 {
            return Err(invalid("BATCH_SIZE", "0"));
        }
        let nominal_block_secs = parsed(&lookup, "NOMINAL_BLOCK_SECONDS", DEFAULT_NOMINAL_BLOCK_SECS)?;
        if nominal_block_secs == 0 {
            return Err(invalid("NOMINAL_BLOCK_SECONDS", "0"));
        }

        Ok(Self {
            fossil_db_url,
            pitchlake_db_url: required(&lookup, "PITCHLAKE_DB_CONNECTION_STRING")?,
            eth_rpc_url,
            enable_confirmed,
            enable_unconfirmed,
            windows,
            initial_block: parsed(&lookup, "INITIAL_BLOCK_NUMBER", 0)?,
            batch_size,
            retry_delay: Duration::from_millis(parsed(&lookup, "RETRY_DELAY_MS", 1000)?),
            batch_max_attempts: parsed(&lookup, "BATCH_MAX_ATTEMPTS", 5)?,
            poll_interval: Duration::from_secs(parsed(&lookup, "POLL_INTERVAL_SECS", 12)?),
            nominal_block_secs,
            recalibrate_every_blocks: parsed(&lookup, "RECALIBRATE_EVERY_BLOCKS", 0)?,
            rpc_timeout: Duration::from_secs(parsed(&lookup, "RPC_TIMEOUT_SECS", 10)?),
            db_max_connections: parsed(&lookup, "DB_MAX_CONNECTIONS", 5)?,
            catch_up_only: flag(&lookup, "CATCH_UP_ONLY", false)?,
        })
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            initial_block: self.initial_block,
            batch_size: self.batch_size,
            poll_interval: self.poll_interval,
            retry_delay: self.retry_delay,
        }
    }

    /// Confirmed batches give up after `BATCH_MAX_ATTEMPTS` and are replayed
    /// by the runner.
    pub fn confirmed_settings(&self) -> ProcessorSettings {
        self.settings(RetryPolicy::bounded(self.retry_delay, self.batch_max_attempts))
    }

    /// Unconfirmed folds retry until they succeed.
    pub fn unconfirmed_settings(&self) -> ProcessorSettings {
        self.settings(RetryPolicy::unlimited(self.retry_delay))
    }

    fn settings(&self, retry: RetryPolicy) -> ProcessorSettings {
        ProcessorSettings {
            catalog: self.windows.clone(),
            aggregator: Aggregator::new(self.nominal_block_secs),
            retry,
        }
    }
}

fn invalid(name: &'static str, value: &str) -> ConfigError {
    ConfigError::Invalid {
        name,
        value: value.to_string(),
    }
}

fn non_empty<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn required<F>(lookup: &F, name: &'static str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    non_empty(lookup, name).ok_or(ConfigError::Missing(name))
}

fn parsed<F, T>(lookup: &F, name: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match non_empty(lookup, name) {
        Some(value) => value.parse().map_err(|_| invalid(name, &value)),
        None => Ok(default),
    }
}

fn flag<F>(lookup: &F, name: &'static str, default: bool) -> Result<bool, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match non_empty(lookup, name) {
        None => Ok(default),
        Some(value) => match value.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            _ => Err(invalid(name, &value)),
        },
    }
}
