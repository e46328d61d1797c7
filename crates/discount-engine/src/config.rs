//! # Engine Configuration
//!
//! Configuration for the discount engine services.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     DISCOUNT_DB_PATH=/var/lib/discount/discount.db                     │
//! │     DISCOUNT_CURRENCY=KES                                              │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/discount-engine/discount.toml (Linux)                    │
//! │     ~/Library/Application Support/com.discount.engine/discount.toml    │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # discount.toml
//! [database]
//! path = "/var/lib/discount/discount.db"
//! max_connections = 5
//!
//! [coupons]
//! code_length = 8
//! code_max_attempts = 16
//!
//! [payment]
//! currency = "KES"
//! msisdn_prefixes = ["2547", "2541"]
//! msisdn_length = 12
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{debug, info, warn};

use discount_core::validation::MsisdnPolicy;
use discount_db::DbConfig;

use crate::error::{EngineError, EngineResult};

// =============================================================================
// Database Settings
// =============================================================================

/// Where the coupon store lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSettings {
    /// SQLite file path.
    #[serde(default = "default_db_path")]
    pub path: PathBuf,

    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_db_path() -> PathBuf {
    directories::ProjectDirs::from("com", "discount", "engine")
        .map(|dirs| dirs.data_dir().join("discount.db"))
        .unwrap_or_else(|| PathBuf::from("discount.db"))
}

fn default_max_connections() -> u32 {
    5
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        DatabaseSettings {
            path: default_db_path(),
            max_connections: default_max_connections(),
        }
    }
}

// =============================================================================
// Coupon Settings
// =============================================================================

/// Coupon code generation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouponSettings {
    /// Characters per generated code.
    #[serde(default = "default_code_length")]
    pub code_length: usize,

    /// Generator draws before giving up with `CodeSpaceExhausted`.
    #[serde(default = "default_code_max_attempts")]
    pub code_max_attempts: u32,
}

fn default_code_length() -> usize {
    8
}

fn default_code_max_attempts() -> u32 {
    16
}

impl Default for CouponSettings {
    fn default() -> Self {
        CouponSettings {
            code_length: default_code_length(),
            code_max_attempts: default_code_max_attempts(),
        }
    }
}

// =============================================================================
// Payment Settings
// =============================================================================

/// Payment gateway parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSettings {
    /// ISO currency code passed to the gateway.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Accepted MSISDN prefixes in international form.
    #[serde(default = "default_msisdn_prefixes")]
    pub msisdn_prefixes: Vec<String>,

    #[serde(default = "default_msisdn_length")]
    pub msisdn_length: usize,
}

fn default_currency() -> String {
    "KES".to_string()
}

fn default_msisdn_prefixes() -> Vec<String> {
    MsisdnPolicy::default().prefixes
}

fn default_msisdn_length() -> usize {
    MsisdnPolicy::default().length
}

impl Default for PaymentSettings {
    fn default() -> Self {
        PaymentSettings {
            currency: default_currency(),
            msisdn_prefixes: default_msisdn_prefixes(),
            msisdn_length: default_msisdn_length(),
        }
    }
}

// =============================================================================
// Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub database: DatabaseSettings,

    #[serde(default)]
    pub coupons: CouponSettings,

    #[serde(default)]
    pub payment: PaymentSettings,
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (discount.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)
                    .map_err(|e| EngineError::Config(format!("{}: {}", path.display(), e)))?;
                config = Self::from_toml(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document. Missing sections and keys take their defaults.
    pub fn from_toml(contents: &str) -> EngineResult<Self> {
        toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Validates the configuration.
    pub fn validate(&self) -> EngineResult<()> {
        if self.database.max_connections == 0 {
            return Err(EngineError::Config(
                "database.max_connections must be greater than 0".into(),
            ));
        }

        if !(4..=32).contains(&self.coupons.code_length) {
            return Err(EngineError::Config(format!(
                "coupons.code_length must be between 4 and 32, got {}",
                self.coupons.code_length
            )));
        }

        if self.coupons.code_max_attempts == 0 {
            return Err(EngineError::Config(
                "coupons.code_max_attempts must be greater than 0".into(),
            ));
        }

        let currency = &self.payment.currency;
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
            return Err(EngineError::Config(format!(
                "payment.currency must be a 3-letter ISO code, got '{}'",
                currency
            )));
        }

        if self.payment.msisdn_prefixes.is_empty() {
            return Err(EngineError::Config(
                "payment.msisdn_prefixes must not be empty".into(),
            ));
        }

        if let Some(prefix) = self.payment.msisdn_prefixes.iter().find(|p| {
            p.is_empty()
                || p.len() > self.payment.msisdn_length
                || !p.chars().all(|c| c.is_ascii_digit())
        }) {
            return Err(EngineError::Config(format!(
                "invalid MSISDN prefix '{}'",
                prefix
            )));
        }

        Ok(())
    }

    /// Applies environment variable overrides.
    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("DISCOUNT_DB_PATH") {
            debug!(path = %path, "Overriding database path from environment");
            self.database.path = PathBuf::from(path);
        }

        if let Ok(currency) = std::env::var("DISCOUNT_CURRENCY") {
            self.payment.currency = currency.trim().to_uppercase();
        }

        if let Ok(length) = std::env::var("DISCOUNT_CODE_LENGTH") {
            match length.parse::<usize>() {
                Ok(n) => self.coupons.code_length = n,
                Err(_) => warn!(value = %length, "Ignoring non-numeric DISCOUNT_CODE_LENGTH"),
            }
        }

        if let Ok(attempts) = std::env::var("DISCOUNT_CODE_MAX_ATTEMPTS") {
            match attempts.parse::<u32>() {
                Ok(n) => self.coupons.code_max_attempts = n,
                Err(_) => {
                    warn!(value = %attempts, "Ignoring non-numeric DISCOUNT_CODE_MAX_ATTEMPTS")
                }
            }
        }

        // Comma separated, e.g. "2547,2541"
        if let Ok(prefixes) = std::env::var("DISCOUNT_MSISDN_PREFIXES") {
            self.payment.msisdn_prefixes = prefixes
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(str::to_string)
                .collect();
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("com", "discount", "engine")
            .map(|dirs| dirs.config_dir().join("discount.toml"))
    }

    // =========================================================================
    // Convenience Methods
    // =========================================================================

    /// Pool configuration for the coupon store.
    pub fn db_config(&self) -> DbConfig {
        DbConfig::new(self.database.path.clone()).max_connections(self.database.max_connections)
    }

    /// Accepted phone number shape for payment.
    pub fn msisdn_policy(&self) -> MsisdnPolicy {
        MsisdnPolicy {
            prefixes: self.payment.msisdn_prefixes.clone(),
            length: self.payment.msisdn_length,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EngineConfig::default();
        assert_eq!(config.coupons.code_length, 8);
        assert_eq!(config.coupons.code_max_attempts, 16);
        assert_eq!(config.payment.currency, "KES");
        assert_eq!(config.payment.msisdn_prefixes, vec!["2547", "2541"]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = EngineConfig::from_toml(
            r#"
            [payment]
            currency = "UGX"
            "#,
        )
        .unwrap();
        assert_eq!(config.payment.currency, "UGX");
        assert_eq!(config.payment.msisdn_length, 12);
        assert_eq!(config.coupons.code_length, 8);
    }

    #[test]
    fn test_config_validation() {
        let mut config = EngineConfig::default();

        config.coupons.code_length = 2;
        assert!(matches!(config.validate(), Err(EngineError::Config(_))));
        config.coupons.code_length = 8;

        config.payment.currency = "kes".to_string();
        assert!(config.validate().is_err());
        config.payment.currency = "KES".to_string();

        config.payment.msisdn_prefixes = vec!["25a7".to_string()];
        assert!(config.validate().is_err());
        config.payment.msisdn_prefixes = vec![];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_msisdn_policy_from_config() {
        let mut config = EngineConfig::default();
        config.payment.msisdn_prefixes = vec!["2567".to_string()];
        let policy = config.msisdn_policy();
        assert!(policy.validate("256712345678").is_ok());
        assert!(policy.validate("254712345678").is_err());
    }

    #[test]
    fn test_toml_serialization() {
        let config = EngineConfig::default();
        let toml_str = toml::to_string_pretty(&config).unwrap();
        assert!(toml_str.contains("[coupons]"));
        assert!(toml_str.contains("[payment]"));
    }
}
