//! Config module contains the top-level config as well as per-subsystem
//! sections loaded from `config/base.toml`, overwritten by the `RUN_MODE`
//! file and the `VOUCHERS` environment variables.
use std::env;

use config_crate::{Config as RawConfig, ConfigError, Environment, File};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
    pub database_pool: DatabasePool,
    pub redis: Redis,
    pub cache: Cache,
    pub rate_limit: RateLimits,
    pub breaker: Breaker,
    pub queue: Queue,
    pub worker: Worker,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub host: String,
    pub port: String,
    pub thread_count: usize,
    pub database: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabasePool {
    pub min_idle: u32,
    pub max_size: u32,
    pub connect_timeout_ms: u64,
    pub idle_timeout_ms: u64,
    pub statement_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Redis {
    pub url: String,
    pub pool_size: u32,
    pub read_timeout_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Cache {
    pub user_ttl_s: usize,
    pub count_ttl_s: usize,
    pub result_ttl_s: usize,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RateLimits {
    pub user_max: u32,
    pub user_window_s: u64,
    pub ip_max: u32,
    pub ip_window_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Breaker {
    pub failure_threshold: u32,
    pub success_threshold: u32,
    pub call_timeout_s: u64,
    pub open_duration_s: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Queue {
    pub attempts: u32,
    pub backoff_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Worker {
    pub concurrency: usize,
    pub rate_per_sec: usize,
    pub tick_ms: u64,
}

impl Config {
    /// Creates config from base.toml, overwritten by <env>.toml, where env
    /// is one of dev, k8s, nightly. After that it can be overwritten by env
    /// variables with the VOUCHERS prefix.
    pub fn new() -> Result<Self, ConfigError> {
        let env = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());
        Config::with_env(env)
    }

    pub fn with_env<S: Into<String>>(env: S) -> Result<Self, ConfigError> {
        let mut s = RawConfig::new();

        s.merge(File::with_name("config/base"))?;
        s.merge(File::with_name(&format!("config/{}", env.into())).required(false))?;
        s.merge(Environment::with_prefix("VOUCHERS"))?;
        s.try_into()
    }
}
