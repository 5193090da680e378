use crate::error::{AppError, Result};

pub const YAHOO_API_URL: &str = "https://query1.finance.yahoo.com";
pub const FMP_API_URL: &str = "https://financialmodelingprep.com";
pub const COINGECKO_API_URL: &str = "https://api.coingecko.com/api/v3";
pub const COINCAP_API_URL: &str = "https://api.coincap.io/v2";

/// Fixed civil timezone for every scheduling decision.
pub const REFERENCE_TIMEZONE: &str = "America/New_York";

/// Symbols fetched concurrently per batch by per-symbol sources (Yahoo).
pub const SYMBOL_BATCH_SIZE: usize = 25;

/// Ids per request for batch sources (CoinGecko, CoinCap, FMP).
pub const ID_BATCH_SIZE: usize = 50;

/// Default per-request timeout for external price fetches (seconds).
pub const FETCH_TIMEOUT_SECS: u64 = 10;

/// Default pause between fetch batches (milliseconds).
pub const FETCH_BATCH_DELAY_MS: u64 = 250;

/// How long End keeps retrying a competition with no evaluation prices before
/// ending it with zero results.
pub const END_NO_DATA_GRACE_HOURS: i64 = 72;

/// Default internal poller cadence (seconds). 0 disables the poller.
pub const SCHEDULER_TICK_SECS: u64 = 60;

#[derive(Debug, Clone)]
pub struct Config {
    pub log_level: String,
    pub db_path: String,
    pub api_port: u16,
    /// Shared secret the trigger endpoint expects (CRON_SECRET).
    /// `None` means every trigger request is refused as misconfigured.
    pub cron_secret: Option<String>,
    /// Internal poller cadence in seconds (SCHEDULER_TICK_SECS)
    pub scheduler_tick_secs: u64,
    /// Per-request timeout for price fetches (FETCH_TIMEOUT_SECS)
    pub fetch_timeout_secs: u64,
    /// Delay between fetch batches (FETCH_BATCH_DELAY_MS)
    pub fetch_batch_delay_ms: u64,
    pub yahoo_api_url: String,
    pub fmp_api_url: String,
    /// Financial Modeling Prep key. Without it the FMP fallback is not registered.
    pub fmp_api_key: Option<String>,
    pub coingecko_api_url: String,
    pub coincap_api_url: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            db_path: std::env::var("DB_PATH").unwrap_or_else(|_| "daily_pick.db".to_string()),
            api_port: std::env::var("API_PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse::<u16>()
                .map_err(|_| AppError::Config("API_PORT must be a valid port number".to_string()))?,
            cron_secret: non_empty_var("CRON_SECRET"),
            scheduler_tick_secs: std::env::var("SCHEDULER_TICK_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(SCHEDULER_TICK_SECS),
            fetch_timeout_secs: std::env::var("FETCH_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .filter(|&v| v > 0)
                .unwrap_or(FETCH_TIMEOUT_SECS),
            fetch_batch_delay_ms: std::env::var("FETCH_BATCH_DELAY_MS")
                .ok()
                .and_then(|v| v.parse::<u64>().ok())
                .unwrap_or(FETCH_BATCH_DELAY_MS),
            yahoo_api_url: std::env::var("YAHOO_API_URL")
                .unwrap_or_else(|_| YAHOO_API_URL.to_string()),
            fmp_api_url: std::env::var("FMP_API_URL").unwrap_or_else(|_| FMP_API_URL.to_string()),
            fmp_api_key: non_empty_var("FMP_API_KEY"),
            coingecko_api_url: std::env::var("COINGECKO_API_URL")
                .unwrap_or_else(|_| COINGECKO_API_URL.to_string()),
            coincap_api_url: std::env::var("COINCAP_API_URL")
                .unwrap_or_else(|_| COINCAP_API_URL.to_string()),
        })
    }
}

fn non_empty_var(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
