use once_cell::sync::Lazy;
use std::path::PathBuf;

use crate::mb_define::DEFAULT_CACHE_DIR;

#[derive(Debug)]
pub struct Config {
    pub cache_dir: PathBuf,
    pub log_payloads: bool,
    pub tcp_retry_attempts: usize,
    pub tcp_retry_backoff_ms: u64,
    pub conn_idle_secs: u64,
}

impl Config {
    fn from_env() -> Self {
        let cache_dir = std::env::var("REGMAP_CACHE_DIR")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .map_or_else(|| PathBuf::from(DEFAULT_CACHE_DIR), PathBuf::from);
        let log_payloads = std::env::var("REGMAP_LOG_PAYLOADS")
            .map(|v| v == "1")
            .unwrap_or(false);
        let tcp_retry_attempts = std::env::var("REGMAP_TCP_RETRY_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|n: &usize| *n > 0)
            .unwrap_or(3usize);
        let tcp_retry_backoff_ms = std::env::var("REGMAP_TCP_RETRY_BACKOFF_MS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(100u64);
        let conn_idle_secs = std::env::var("REGMAP_CONN_IDLE_SECS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(300u64);
        Self {
            cache_dir,
            log_payloads,
            tcp_retry_attempts,
            tcp_retry_backoff_ms,
            conn_idle_secs,
        }
    }
}

/// Global config loaded once from environment at first access.
pub static GLOBAL_CONFIG: Lazy<Config> = Lazy::new(Config::from_env);

/// Convenience accessor
pub fn config() -> &'static Config {
    &GLOBAL_CONFIG
}
