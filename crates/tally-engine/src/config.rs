//! # Engine Configuration
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     TALLY_DB_PATH=/var/lib/tally/tally.db                              │
//! │     TALLY_INVOICE_PREFIX=STORE1                                        │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     explicit path, or $TALLY_CONFIG                                    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # tally.toml
//! [database]
//! path = "./tally.db"
//! max_connections = 5
//! busy_timeout_secs = 5
//!
//! [loyalty]
//! points_per_currency_unit_cents = 10000  # 100.00 spend earns 1 point
//! point_value_cents = 100                 # 1 point redeems for 1.00
//! enabled = true
//!
//! [invoice]
//! prefix = "INV"
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

use tally_core::loyalty::LoyaltyPolicy;
use tally_core::Money;
use tally_db::DbConfig;

/// Errors raised while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

// =============================================================================
// Database Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// How long a writer waits for the writer lock (seconds).
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_secs: u64,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./tally.db")
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

fn default_busy_timeout() -> u64 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
            min_connections: default_min_connections(),
            busy_timeout_secs: default_busy_timeout(),
        }
    }
}

// =============================================================================
// Loyalty Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoyaltySettings {
    /// Spend, in cents, that earns one base point.
    #[serde(default = "default_points_per_unit")]
    pub points_per_currency_unit_cents: i64,

    /// Value of one redeemed point, in cents.
    #[serde(default = "default_point_value")]
    pub point_value_cents: i64,

    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_points_per_unit() -> i64 {
    10_000
}

fn default_point_value() -> i64 {
    100
}

fn default_true() -> bool {
    true
}

impl Default for LoyaltySettings {
    fn default() -> Self {
        LoyaltySettings {
            points_per_currency_unit_cents: default_points_per_unit(),
            point_value_cents: default_point_value(),
            enabled: true,
        }
    }
}

// =============================================================================
// Invoice Settings
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvoiceSettings {
    #[serde(default = "default_invoice_prefix")]
    pub prefix: String,
}

fn default_invoice_prefix() -> String {
    "INV".to_string()
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        InvoiceSettings {
            prefix: default_invoice_prefix(),
        }
    }
}

// =============================================================================
// Engine Config
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub loyalty: LoyaltySettings,

    #[serde(default)]
    pub invoice: InvoiceSettings,
}

impl EngineConfig {
    /// Loads configuration: defaults, then the TOML file, then `TALLY_*`
    /// environment overrides. The result is validated.
    pub fn load(config_path: Option<PathBuf>) -> ConfigResult<Self> {
        let mut config = Self::default();

        let path = config_path.or_else(|| std::env::var("TALLY_CONFIG").ok().map(PathBuf::from));
        if let Some(path) = path {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Like [`EngineConfig::load`], falling back to defaults on any error.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.database.max_connections == 0 {
            return Err(ConfigError::InvalidConfig(
                "database.max_connections must be greater than 0".into(),
            ));
        }
        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::InvalidConfig(
                "database.min_connections cannot exceed max_connections".into(),
            ));
        }
        if self.loyalty.points_per_currency_unit_cents <= 0 {
            return Err(ConfigError::InvalidConfig(
                "loyalty.points_per_currency_unit_cents must be positive".into(),
            ));
        }
        if self.loyalty.point_value_cents <= 0 {
            return Err(ConfigError::InvalidConfig(
                "loyalty.point_value_cents must be positive".into(),
            ));
        }
        let prefix = self.invoice.prefix.trim();
        if prefix.is_empty() || !prefix.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(ConfigError::InvalidConfig(format!(
                "invoice.prefix must be non-empty and alphanumeric, got '{}'",
                self.invoice.prefix
            )));
        }
        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("TALLY_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(max) = std::env::var("TALLY_DB_MAX_CONNECTIONS") {
            match max.parse::<u32>() {
                Ok(n) => self.database.max_connections = n,
                Err(_) => warn!(value = %max, "Ignoring invalid TALLY_DB_MAX_CONNECTIONS"),
            }
        }

        if let Ok(prefix) = std::env::var("TALLY_INVOICE_PREFIX") {
            self.invoice.prefix = prefix;
        }

        if let Ok(enabled) = std::env::var("TALLY_LOYALTY_ENABLED") {
            match enabled.to_lowercase().as_str() {
                "1" | "true" | "yes" => self.loyalty.enabled = true,
                "0" | "false" | "no" => self.loyalty.enabled = false,
                _ => warn!(value = %enabled, "Unknown loyalty flag in environment"),
            }
        }
    }

    /// Pool configuration for [`tally_db::Database::new`].
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone())
            .max_connections(self.database.max_connections)
            .min_connections(self.database.min_connections)
            .busy_timeout(Duration::from_secs(self.database.busy_timeout_secs))
    }

    pub fn loyalty_policy(&self) -> LoyaltyPolicy {
        LoyaltyPolicy {
            spend_per_point: Money::from_cents(self.loyalty.points_per_currency_unit_cents),
            point_value: Money::from_cents(self.loyalty.point_value_cents),
            enabled: self.loyalty.enabled,
        }
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.invoice.prefix, "INV");
        assert_eq!(config.loyalty_policy(), LoyaltyPolicy::default());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: EngineConfig = toml::from_str(
            r#"
            [invoice]
            prefix = "STORE1"

            [loyalty]
            enabled = false
            "#,
        )
        .unwrap();
        assert_eq!(config.invoice.prefix, "STORE1");
        assert!(!config.loyalty.enabled);
        assert_eq!(config.loyalty.point_value_cents, 100);
        assert_eq!(config.database.max_connections, 5);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.database.max_connections = 0;
        assert!(config.validate().is_err());

        config.database.max_connections = 5;
        config.invoice.prefix = "INV-".to_string();
        assert!(config.validate().is_err());

        config.invoice.prefix = "INV".to_string();
        config.loyalty.point_value_cents = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let toml_str = toml::to_string_pretty(&EngineConfig::default()).unwrap();
        assert!(toml_str.contains("[database]"));
        assert!(toml_str.contains("[loyalty]"));
        assert!(toml_str.contains("[invoice]"));
    }
}
