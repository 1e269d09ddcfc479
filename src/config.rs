use std::time::Duration;

use serde::Deserialize;

use crate::tokens::DEFAULT_MAX_LIFETIME_DAYS;

const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 300;
/// Longest lifetime accepted in production, whatever the env says.
const PRODUCTION_LIFETIME_CEILING_DAYS: i64 = 365;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    /// Interval between background expiry sweeps.
    /// Set via AUDITOR_ACCESS_SWEEP_INTERVAL_SECS. Default: 300.
    pub sweep_interval: Duration,
    /// Maximum lifetime of an issued token, in days.
    /// Set via AUDITOR_ACCESS_MAX_LIFETIME_DAYS. Default: 90.
    pub max_lifetime_days: i64,
    /// Emit JSON log lines. Set via AUDITOR_ACCESS_LOG_JSON=1.
    pub log_json: bool,
    pub production: bool,
}

impl Config {
    pub fn max_lifetime(&self) -> chrono::Duration {
        chrono::Duration::days(self.max_lifetime_days)
    }
}

pub fn load() -> anyhow::Result<Config> {
    dotenvy::dotenv().ok();
    from_lookup(|key| std::env::var(key).ok())
}

/// Build the config from any key lookup; `load` passes the process env.
pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Config>
where
    F: Fn(&str) -> Option<String>,
{
    let env_mode = lookup("AUDITOR_ACCESS_ENV")
        .or_else(|| lookup("RUST_ENV"))
        .unwrap_or_default();
    let production = env_mode == "production";

    let max_lifetime_days = lookup("AUDITOR_ACCESS_MAX_LIFETIME_DAYS")
        .and_then(|v| v.parse::<i64>().ok())
        .filter(|d| *d > 0)
        .unwrap_or(DEFAULT_MAX_LIFETIME_DAYS);

    if production && max_lifetime_days > PRODUCTION_LIFETIME_CEILING_DAYS {
        anyhow::bail!(
            "AUDITOR_ACCESS_MAX_LIFETIME_DAYS={} exceeds the production ceiling of {} days",
            max_lifetime_days,
            PRODUCTION_LIFETIME_CEILING_DAYS
        );
    }

    let database_url = match lookup("DATABASE_URL") {
        Some(url) => url,
        None if production => anyhow::bail!("DATABASE_URL must be set in production"),
        None => "postgres://localhost/auditor_access".into(),
    };

    Ok(Config {
        database_url,
        sweep_interval: Duration::from_secs(
            lookup("AUDITOR_ACCESS_SWEEP_INTERVAL_SECS")
                .and_then(|v| v.parse().ok())
                .filter(|s| *s > 0)
                .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        ),
        max_lifetime_days,
        log_json: matches!(
            lookup("AUDITOR_ACCESS_LOG_JSON").as_deref(),
            Some("1") | Some("true")
        ),
        production,
    })
}
