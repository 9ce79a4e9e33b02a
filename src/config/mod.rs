//! Configuration, loaded once from environment variables at startup.
//!
//! Missing required values abort startup with a non-zero exit; missing
//! optional integrations (exchange keys, owner identity) degrade the
//! corresponding feature instead of failing.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub struct Config {
    /// SQLite URL, e.g. `sqlite://data/coinward.db`.
    pub database_url: String,
    pub port: u16,
    /// Owner identity compared against the auth header on mutating
    /// endpoints. Unset forces dry-run everywhere.
    pub owner_id: Option<String>,
    pub exchange_api_key: Option<String>,
    pub exchange_api_secret: Option<String>,
    pub dry_run_default: bool,
    /// Disables the background schedulers (API-only process).
    pub light_mode: bool,
    pub snapshot_interval_mins: u64,
    pub price_interval_secs: u64,
    pub tick_interval_mins: u64,
    pub mfa_threshold_usd: Decimal,
    pub min_trade_usd: Decimal,
    pub daily_loss_limit_usd: Decimal,
    pub optimizer_window_days: i64,
    pub optimizer_seed: u64,
    pub auto_execute_profit_taking: bool,
    /// Exact origins, or `*.domain` wildcard-subdomain forms.
    pub cors_origins: Vec<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let database_url =
            env::var("COINWARD_DATABASE_URL").context("COINWARD_DATABASE_URL is required")?;

        let owner_id = env::var("COINWARD_OWNER_ID").ok().filter(|s| !s.is_empty());
        let exchange_api_key = env::var("COINWARD_EXCHANGE_API_KEY").ok();
        let exchange_api_secret = env::var("COINWARD_EXCHANGE_API_SECRET").ok();

        let cors_origins = env::var("COINWARD_CORS_ORIGINS")
            .map(|raw| {
                raw.split(',')
                    .map(|s| s.trim().to_string())
                    .filter(|s| !s.is_empty())
                    .collect()
            })
            .unwrap_or_else(|_| vec!["*".to_string()]);

        Ok(Self {
            database_url,
            port: parse_or("COINWARD_PORT", 8787)?,
            owner_id,
            exchange_api_key,
            exchange_api_secret,
            dry_run_default: parse_or("COINWARD_DRY_RUN", true)?,
            light_mode: parse_or("COINWARD_LIGHT_MODE", false)?,
            snapshot_interval_mins: parse_or("COINWARD_SNAPSHOT_INTERVAL_MINS", 5)?,
            price_interval_secs: parse_or("COINWARD_PRICE_INTERVAL_SECS", 60)?,
            tick_interval_mins: parse_or("COINWARD_TICK_INTERVAL_MINS", 10)?,
            mfa_threshold_usd: parse_or("COINWARD_MFA_THRESHOLD_USD", Decimal::from(10_000))?,
            min_trade_usd: parse_or("COINWARD_MIN_TRADE_USD", Decimal::from(10))?,
            daily_loss_limit_usd: parse_or("COINWARD_DAILY_LOSS_LIMIT_USD", Decimal::from(500))?,
            optimizer_window_days: parse_or("COINWARD_OPTIMIZER_WINDOW_DAYS", 90)?,
            optimizer_seed: parse_or("COINWARD_OPTIMIZER_SEED", 42)?,
            auto_execute_profit_taking: parse_or("COINWARD_AUTO_EXECUTE_PROFIT_TAKING", false)?,
            cors_origins,
        })
    }

    /// Owner identity present and usable for auth.
    pub fn owner_configured(&self) -> bool {
        self.owner_id.is_some()
    }

    /// Live exchange credentials present; otherwise the mock serves.
    pub fn exchange_configured(&self) -> bool {
        self.exchange_api_key.is_some() && self.exchange_api_secret.is_some()
    }

    /// The effective dry-run default. No owner identity means nothing may
    /// execute for real, regardless of configuration.
    pub fn effective_dry_run(&self) -> bool {
        self.dry_run_default || !self.owner_configured()
    }
}

fn parse_or<T: FromStr>(key: &str, default: T) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        Err(_) => Ok(default),
    }
}
