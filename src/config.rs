//! Service configuration, read from `config/` toml files with
//! environment variable overrides.

use std::env;

use config_crate::{Config as RawConfig, ConfigError, Environment, File};

/// Namespace of the per-coupon issue request sets in the fast store
pub const COUPON_ISSUE_REQUEST_NAMESPACE: &'static str = "coupon:issue:request:v1";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: Server,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Server {
    pub database: String,
    pub redis: String,
    pub thread_count: usize,
    pub connection_timeout_secs: u64,
}

impl Config {
    /// Creates config from base.toml, which are overwritten by <env>.toml, where env is
    /// taken from the RUN_MODE environment variable. After that it could be overwritten
    /// by env variables like COUPONS_SERVER_DATABASE.
    pub fn new() -> Result<Self, ConfigError> {
        let env = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let mut s = RawConfig::new();
        s.merge(File::with_name("config/base"))?;
        s.merge(File::with_name(&format!("config/{}", env)).required(false))?;
        s.merge(Environment::with_prefix("COUPONS"))?;
        s.try_into()
    }
}
