//! Engine configuration module.
//!
//! This module provides configuration loading for the directory metadata
//! engine from environment variables.
//!
//! # Environment Variables
//!
//! - `DIRMETA_STAT_LEN`: Length in bytes of the opaque stat block that precedes
//!   the directory header (default: `128`)
//! - `DIRMETA_SYNC`: `1`/`true` to fsync after every committed mutation
//!   (default: off)

use crate::storage::MetaLayout;

/// Engine configuration.
///
/// Every metadata file must be opened with the same `stat_len` it was created
/// with; the engine cannot detect a mismatch other than as a corrupt header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    /// Length of the opaque stat block at the start of each file.
    pub stat_len: u64,
    /// Whether `flush` issues an fsync.
    pub sync: bool,
}

/// Error returned when loading configuration fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable has an invalid value.
    InvalidValue { name: String, message: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidValue { name, message } => {
                write!(f, "invalid value for {name}: {message}")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            stat_len: Self::DEFAULT_STAT_LEN,
            sync: false,
        }
    }
}

impl EngineConfig {
    /// Default stat block length.
    pub const DEFAULT_STAT_LEN: u64 = 128;

    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - `DIRMETA_STAT_LEN` is set but not a positive integer
    /// - `DIRMETA_SYNC` is set but not a recognised boolean
    pub fn from_env() -> Result<Self, ConfigError> {
        let stat_len = match std::env::var("DIRMETA_STAT_LEN") {
            Ok(value) => parse_stat_len(&value)?,
            Err(_) => Self::DEFAULT_STAT_LEN,
        };
        let sync = match std::env::var("DIRMETA_SYNC") {
            Ok(value) => parse_sync(&value)?,
            Err(_) => false,
        };

        Ok(Self { stat_len, sync })
    }

    /// File geometry implied by this configuration.
    #[must_use]
    pub const fn layout(&self) -> MetaLayout {
        MetaLayout::new(self.stat_len)
    }
}

fn parse_stat_len(value: &str) -> Result<u64, ConfigError> {
    match value.parse::<u64>() {
        Ok(len) if len > 0 => Ok(len),
        _ => Err(ConfigError::InvalidValue {
            name: "DIRMETA_STAT_LEN".to_string(),
            message: format!("'{value}' is not a positive byte length"),
        }),
    }
}

fn parse_sync(value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: "DIRMETA_SYNC".to_string(),
            message: format!("'{value}' is not a boolean"),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let config = EngineConfig::default();
        assert_eq!(config.stat_len, 128);
        assert!(!config.sync);
        assert_eq!(config.layout().first_page_offset(), 192);
    }

    #[test]
    fn test_parse_stat_len() {
        assert_eq!(parse_stat_len("4096"), Ok(4096));
        assert!(parse_stat_len("0").is_err());
        assert!(parse_stat_len("-1").is_err());
        assert!(parse_stat_len("abc").is_err());
    }

    #[test]
    fn test_parse_sync() {
        assert_eq!(parse_sync("1"), Ok(true));
        assert_eq!(parse_sync("TRUE"), Ok(true));
        assert_eq!(parse_sync("off"), Ok(false));
        assert!(parse_sync("maybe").is_err());
    }

    #[test]
    fn test_config_error_display_invalid() {
        let error = ConfigError::InvalidValue {
            name: "TEST_VAR".to_string(),
            message: "bad value".to_string(),
        };
        assert_eq!(error.to_string(), "invalid value for TEST_VAR: bad value");
    }
}
