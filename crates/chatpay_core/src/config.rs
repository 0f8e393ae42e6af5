use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::roles::PricingPolicy;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("toml parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("json parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub pricing: PricingPolicy,
    #[serde(default)]
    pub abuse: AbuseConfig,
    #[serde(default)]
    pub expiry: ExpiryConfig,
    #[serde(default)]
    pub audit: AuditConfig,
}

/// Copy-paste detection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbuseConfig {
    /// Sliding window in seconds within which repeats are counted.
    #[serde(default = "default_abuse_window_secs")]
    pub window_secs: u64,
    /// The n-th identical message inside the window is rejected.
    #[serde(default = "default_repeat_threshold")]
    pub repeat_threshold: u32,
    /// Upper bound of remembered messages per sender.
    #[serde(default = "default_max_records")]
    pub max_records_per_sender: usize,
}

fn default_abuse_window_secs() -> u64 {
    600
}

fn default_repeat_threshold() -> u32 {
    3
}

fn default_max_records() -> usize {
    64
}

impl Default for AbuseConfig {
    fn default() -> Self {
        Self {
            window_secs: default_abuse_window_secs(),
            repeat_threshold: default_repeat_threshold(),
            max_records_per_sender: default_max_records(),
        }
    }
}

/// Inactivity ceilings and sweep cadence.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpiryConfig {
    /// Inactivity allowed once a paid message has been billed.
    #[serde(default = "default_paid_inactivity_hours")]
    pub paid_inactivity_hours: i64,
    /// Inactivity allowed regardless of paid status.
    #[serde(default = "default_absolute_inactivity_hours")]
    pub absolute_inactivity_hours: i64,
    /// `expires_at` offset stamped when a deposit is captured.
    #[serde(default = "default_paid_session_hours")]
    pub paid_session_hours: i64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_paid_inactivity_hours() -> i64 {
    48
}

fn default_absolute_inactivity_hours() -> i64 {
    72
}

fn default_paid_session_hours() -> i64 {
    48
}

fn default_sweep_interval_secs() -> u64 {
    300
}

impl Default for ExpiryConfig {
    fn default() -> Self {
        Self {
            paid_inactivity_hours: default_paid_inactivity_hours(),
            absolute_inactivity_hours: default_absolute_inactivity_hours(),
            paid_session_hours: default_paid_session_hours(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Queue depth above which the audit bus warns that its worker lags.
    #[serde(default = "default_backlog_warning")]
    pub backlog_warning: usize,
    #[serde(default = "default_audit_db_path")]
    pub db_path: PathBuf,
}

fn default_true() -> bool {
    true
}

fn default_backlog_warning() -> usize {
    1024
}

fn default_audit_db_path() -> PathBuf {
    PathBuf::from("chatpay-audit.db")
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backlog_warning: default_backlog_warning(),
            db_path: default_audit_db_path(),
        }
    }
}

const CONFIG_FILE_PATH: &str = "chatpay.toml";
const CONFIG_PATH_ENV: &str = "CHATPAY_CONFIG";

fn parse_bool_env(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::Invalid(format!("{key} must be a number, got {value:?}")))
}

impl EngineConfig {
    /// Load from `$CHATPAY_CONFIG` or `chatpay.toml`, then apply `CHATPAY_*`
    /// environment overrides. A missing file yields the defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(CONFIG_FILE_PATH));

        let mut config = if path.exists() {
            Self::from_path(&path)?
        } else {
            Self::default()
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Read a config file; `.json` files are parsed as JSON, anything else as TOML.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;
        let config = if path.extension().is_some_and(|ext| ext == "json") {
            serde_json::from_str(&content)?
        } else {
            toml::from_str(&content)?
        };
        Ok(config)
    }

    /// Apply overrides from a key lookup (the process environment in `load`).
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("CHATPAY_ABUSE_WINDOW_SECS") {
            self.abuse.window_secs = parse_number("CHATPAY_ABUSE_WINDOW_SECS", &value)?;
        }
        if let Some(value) = lookup("CHATPAY_ABUSE_REPEAT_THRESHOLD") {
            self.abuse.repeat_threshold = parse_number("CHATPAY_ABUSE_REPEAT_THRESHOLD", &value)?;
        }
        if let Some(value) = lookup("CHATPAY_SWEEP_INTERVAL_SECS") {
            self.expiry.sweep_interval_secs = parse_number("CHATPAY_SWEEP_INTERVAL_SECS", &value)?;
        }
        if let Some(value) = lookup("CHATPAY_DEFAULT_PRICE") {
            self.pricing.default_price = parse_number("CHATPAY_DEFAULT_PRICE", &value)?;
        }
        if let Some(value) = lookup("CHATPAY_AUDIT_DB") {
            self.audit.db_path = PathBuf::from(value);
        }
        if let Some(value) = lookup("CHATPAY_AUDIT_ENABLED") {
            self.audit.enabled = parse_bool_env(&value);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let pricing = &self.pricing;
        if pricing.min_price == 0 || pricing.min_price > pricing.max_price {
            return Err(ConfigError::Invalid(format!(
                "price bounds {}..={} are not a valid range",
                pricing.min_price, pricing.max_price
            )));
        }
        if !(pricing.min_price..=pricing.max_price).contains(&pricing.default_price) {
            return Err(ConfigError::Invalid(format!(
                "default price {} is outside {}..={}",
                pricing.default_price, pricing.min_price, pricing.max_price
            )));
        }
        if self.abuse.repeat_threshold < 2 {
            return Err(ConfigError::Invalid(
                "abuse.repeat_threshold must be at least 2".to_string(),
            ));
        }
        if self.abuse.window_secs == 0 {
            return Err(ConfigError::Invalid("abuse.window_secs must be positive".to_string()));
        }
        let expiry = &self.expiry;
        if expiry.paid_inactivity_hours <= 0 || expiry.absolute_inactivity_hours <= 0 {
            return Err(ConfigError::Invalid(
                "inactivity ceilings must be positive".to_string(),
            ));
        }
        if expiry.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid(
                "expiry.sweep_interval_secs must be positive".to_string(),
            ));
        }
        if self.audit.backlog_warning == 0 {
            return Err(ConfigError::Invalid(
                "audit.backlog_warning must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
