use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub storage_url: String,
    pub port: u16,
    pub backend: BackendConfig,
    pub entitlement: EntitlementConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum BackendMode {
    Mock,
    Http,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub mode: BackendMode,
    pub base_url: String,
    pub api_key: String,
    pub receipt_secret: Option<String>,
}

pub const DEFAULT_TRIAL_DAYS: i64 = 7;
pub const MIN_TRIAL_DAYS: i64 = 1;
pub const MAX_TRIAL_DAYS: i64 = 365;

pub fn is_valid_trial_length(days: i64) -> bool {
    (MIN_TRIAL_DAYS..=MAX_TRIAL_DAYS).contains(&days)
}

fn parse_trial_days(raw: Option<String>) -> i64 {
    let Some(raw) = raw else {
        return DEFAULT_TRIAL_DAYS;
    };
    match raw.trim().parse::<i64>() {
        Ok(days) if is_valid_trial_length(days) => days,
        _ => {
            log::warn!(
                "TRIAL_DAYS {:?} is not a number of days in {}..={}, using {}",
                raw, MIN_TRIAL_DAYS, MAX_TRIAL_DAYS, DEFAULT_TRIAL_DAYS
            );
            DEFAULT_TRIAL_DAYS
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntitlementConfig {
    pub trial_days: i64,
    pub backend_timeout_ms: u64,
    pub refresh_interval_secs: u64,
    pub enable_debug_commands: bool,
}

impl Config {
    pub fn from_env() -> Result<Self, env::VarError> {
        let mode = match env::var("PURCHASE_BACKEND")
            .unwrap_or_else(|_| "mock".to_string())
            .to_lowercase()
            .as_str()
        {
            "http" => BackendMode::Http,
            "mock" => BackendMode::Mock,
            other => {
                log::warn!("Unknown PURCHASE_BACKEND {:?}, using mock backend", other);
                BackendMode::Mock
            }
        };

        let backend = match mode {
            BackendMode::Http => BackendConfig {
                mode,
                base_url: env::var("PURCHASE_BACKEND_URL")?,
                api_key: env::var("PURCHASE_BACKEND_API_KEY")?,
                receipt_secret: env::var("RECEIPT_SIGNING_SECRET").ok(),
            },
            BackendMode::Mock => BackendConfig {
                mode,
                base_url: String::new(),
                api_key: String::new(),
                receipt_secret: None,
            },
        };

        Ok(Config {
            storage_url: env::var("STORAGE_URL")
                .unwrap_or_else(|_| "file://entitlement.db".to_string()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse()
                .unwrap_or(8080),
            backend,
            entitlement: EntitlementConfig {
                trial_days: parse_trial_days(env::var("TRIAL_DAYS").ok()),
                backend_timeout_ms: env::var("BACKEND_TIMEOUT_MS")
                    .unwrap_or_else(|_| "4000".to_string())
                    .parse()
                    .unwrap_or(4000),
                refresh_interval_secs: env::var("REFRESH_INTERVAL_SECS")
                    .unwrap_or_else(|_| "0".to_string())
                    .parse()
                    .unwrap_or(0),
                enable_debug_commands: env::var("ENABLE_DEBUG_COMMANDS")
                    .map(|v| matches!(v.to_lowercase().as_str(), "1" | "true" | "yes"))
                    .unwrap_or(false),
            },
        })
    }
}

impl EntitlementConfig {
    /// Trial length used for fresh trials; out-of-range values fall back to the default.
    pub fn trial_length_days(&self) -> i64 {
        if is_valid_trial_length(self.trial_days) {
            self.trial_days
        } else {
            DEFAULT_TRIAL_DAYS
        }
    }

    pub fn backend_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.backend_timeout_ms)
    }
}

impl Default for EntitlementConfig {
    fn default() -> Self {
        Self {
            trial_days: DEFAULT_TRIAL_DAYS,
            backend_timeout_ms: 4000,
            refresh_interval_secs: 0,
            enable_debug_commands: false,
        }
    }
}
