use std::env;

use chrono_tz::Tz;

use crate::error::{BillingError, BillingResult};

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub app_name: String,
    pub environment: String,
    pub database_url: Option<String>,
    pub db_pool_max_connections: u32,
    pub db_pool_min_connections: u32,
    pub db_pool_acquire_timeout_seconds: u64,
    pub db_pool_idle_timeout_seconds: u64,
    pub billing_scheduler_enabled: bool,
    pub billing_timezone: String,
    pub billing_run_day: u32,
    pub billing_run_hour: u32,
    pub billing_run_minute: u32,
    pub billing_batch_processing_fee: bool,
    pub currency_symbol: String,
    pub app_public_url: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            app_name: env_or("APP_NAME", "Roomledger Billing"),
            environment: env_or("ENVIRONMENT", "development"),
            database_url: env_opt("DATABASE_URL"),
            db_pool_max_connections: env_parse_or("DB_POOL_MAX_CONNECTIONS", 5),
            db_pool_min_connections: env_parse_or("DB_POOL_MIN_CONNECTIONS", 1),
            db_pool_acquire_timeout_seconds: env_parse_or("DB_POOL_ACQUIRE_TIMEOUT_SECONDS", 5),
            db_pool_idle_timeout_seconds: env_parse_or("DB_POOL_IDLE_TIMEOUT_SECONDS", 600),
            billing_scheduler_enabled: env_parse_bool_or("BILLING_SCHEDULER_ENABLED", true),
            billing_timezone: env_or("BILLING_TIMEZONE", "Asia/Kolkata"),
            billing_run_day: clamp_run_day(env_parse_or("BILLING_RUN_DAY", 1)),
            billing_run_hour: env_parse_or("BILLING_RUN_HOUR", 0).min(23),
            billing_run_minute: env_parse_or("BILLING_RUN_MINUTE", 1).min(59),
            billing_batch_processing_fee: env_parse_bool_or("BILLING_BATCH_PROCESSING_FEE", false),
            currency_symbol: env_or("CURRENCY_SYMBOL", "₹"),
            app_public_url: normalize_url(&env_or("APP_PUBLIC_URL", "http://localhost:3000")),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment.trim().eq_ignore_ascii_case("production")
    }

    pub fn billing_tz(&self) -> BillingResult<Tz> {
        self.billing_timezone.parse::<Tz>().map_err(|_| {
            BillingError::Validation(format!(
                "BILLING_TIMEZONE '{}' is not a known IANA timezone.",
                self.billing_timezone
            ))
        })
    }
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr + Copy,
{
    env_opt(key)
        .and_then(|raw| raw.parse::<T>().ok())
        .unwrap_or(default)
}

fn env_parse_bool_or(key: &str, default: bool) -> bool {
    parse_bool(env_opt(key).as_deref()).unwrap_or(default)
}

fn parse_bool(raw: Option<&str>) -> Option<bool> {
    match raw.map(str::to_ascii_lowercase).as_deref() {
        Some("1" | "true" | "yes" | "on") => Some(true),
        Some("0" | "false" | "no" | "off") => Some(false),
        _ => None,
    }
}

/// Days past the 28th do not exist in every month.
fn clamp_run_day(day: u32) -> u32 {
    day.clamp(1, 28)
}

fn normalize_url(raw: &str) -> String {
    let mut url = raw.trim().to_string();
    while url.ends_with('/') {
        url.pop();
    }
    url
}

#[cfg(test)]
mod tests {
    use super::{clamp_run_day, normalize_url, parse_bool, AppConfig};

    #[test]
    fn parses_bools_leniently() {
        assert_eq!(parse_bool(Some("YES")), Some(true));
        assert_eq!(parse_bool(Some("off")), Some(false));
        assert_eq!(parse_bool(Some("maybe")), None);
        assert_eq!(parse_bool(None), None);
    }

    #[test]
    fn normalizes_public_url() {
        assert_eq!(normalize_url("https://app.example.com/"), "https://app.example.com");
        assert_eq!(normalize_url(" http://localhost:3000 "), "http://localhost:3000");
    }

    #[test]
    fn clamps_run_day() {
        assert_eq!(clamp_run_day(0), 1);
        assert_eq!(clamp_run_day(15), 15);
        assert_eq!(clamp_run_day(31), 28);
    }

    #[test]
    fn rejects_unknown_timezone() {
        let mut config = AppConfig::from_env();
        config.billing_timezone = "Asia/Kolkata".to_string();
        assert!(config.billing_tz().is_ok());
        config.billing_timezone = "Mars/Olympus".to_string();
        assert!(config.billing_tz().is_err());
    }
}
