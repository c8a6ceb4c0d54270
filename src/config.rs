//! Configuration Module
//!
//! Handles loading and managing locker configuration from environment
//! variables or from an embedding application's config file.

use std::env;

use serde::{Deserialize, Deserializer};

use crate::cache::KEY_DELIMITER;
use crate::error::{LockerError, Result};

/// Bytes per megabyte, used to convert the `maximum` option.
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Locker configuration parameters.
///
/// All values can be configured via environment variables with sensible
/// defaults. Option names follow the camelCase spelling when deserialized.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LockerConfig {
    /// Namespace separating this locker's entries from other instances
    pub locker_key: String,
    /// Garbage collection interval in milliseconds, 0 disables the sweep
    pub clear_garbage_interval: u64,
    /// Capacity limit in bytes, 0 = unbounded (configured in MB)
    #[serde(rename = "maximum", deserialize_with = "megabytes_to_bytes")]
    pub maximum_bytes: u64,
    /// Emit debug-level events
    pub debug: bool,
    /// Default read-refresh behaviour for new entries
    pub auto_read_refresh: bool,
    /// Default TTL in milliseconds for new entries
    pub default_expires: u64,
    /// Maximum length of a user key, in characters
    pub max_key_length: usize,
}

impl LockerConfig {
    /// Creates a new LockerConfig by loading values from environment variables.
    ///
    /// # Environment Variables
    /// - `LOCKER_KEY` - Namespace (default: "default")
    /// - `LOCKER_GC_INTERVAL_MS` - GC sweep interval (default: 15000)
    /// - `LOCKER_MAXIMUM_MB` - Capacity in MB (default: 0, unbounded)
    /// - `LOCKER_DEBUG` - Debug logging (default: false)
    /// - `LOCKER_AUTO_READ_REFRESH` - Read refresh default (default: false)
    /// - `LOCKER_DEFAULT_EXPIRES_MS` - Default TTL (default: 10000)
    /// - `LOCKER_MAX_KEY_LENGTH` - Maximum key length (default: 255)
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            locker_key: env::var("LOCKER_KEY")
                .ok()
                .filter(|v| !v.is_empty())
                .unwrap_or(defaults.locker_key),
            clear_garbage_interval: parse_env("LOCKER_GC_INTERVAL_MS")
                .unwrap_or(defaults.clear_garbage_interval),
            maximum_bytes: parse_env::<f64>("LOCKER_MAXIMUM_MB")
                .map(mb_to_bytes)
                .unwrap_or(defaults.maximum_bytes),
            debug: parse_env("LOCKER_DEBUG").unwrap_or(defaults.debug),
            auto_read_refresh: parse_env("LOCKER_AUTO_READ_REFRESH")
                .unwrap_or(defaults.auto_read_refresh),
            default_expires: parse_env("LOCKER_DEFAULT_EXPIRES_MS")
                .unwrap_or(defaults.default_expires),
            max_key_length: parse_env("LOCKER_MAX_KEY_LENGTH")
                .unwrap_or(defaults.max_key_length),
        }
    }

    /// Sets the namespace.
    pub fn with_locker_key(mut self, key: impl Into<String>) -> Self {
        self.locker_key = key.into();
        self
    }

    /// Sets the GC interval in milliseconds.
    pub fn with_clear_garbage_interval(mut self, interval_ms: u64) -> Self {
        self.clear_garbage_interval = interval_ms;
        self
    }

    /// Sets the capacity in megabytes.
    pub fn with_maximum_mb(mut self, megabytes: f64) -> Self {
        self.maximum_bytes = mb_to_bytes(megabytes);
        self
    }

    /// Sets the capacity in bytes.
    pub fn with_maximum_bytes(mut self, bytes: u64) -> Self {
        self.maximum_bytes = bytes;
        self
    }

    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    pub fn with_auto_read_refresh(mut self, refresh: bool) -> Self {
        self.auto_read_refresh = refresh;
        self
    }

    pub fn with_default_expires(mut self, expires_ms: u64) -> Self {
        self.default_expires = expires_ms;
        self
    }

    pub fn with_max_key_length(mut self, length: usize) -> Self {
        self.max_key_length = length;
        self
    }

    // == Validate ==
    /// Checks that the namespace can be used as a key prefix.
    pub fn validate(&self) -> Result<()> {
        if self.locker_key.is_empty() {
            return Err(LockerError::Validation(
                "lockerKey must not be empty".to_string(),
            ));
        }
        if self.locker_key.contains(KEY_DELIMITER) {
            return Err(LockerError::Validation(format!(
                "lockerKey must not contain the delimiter '{}'",
                KEY_DELIMITER
            )));
        }
        Ok(())
    }
}

impl Default for LockerConfig {
    fn default() -> Self {
        Self {
            locker_key: "default".to_string(),
            clear_garbage_interval: 15_000,
            maximum_bytes: 0,
            debug: false,
            auto_read_refresh: false,
            default_expires: 10_000,
            max_key_length: 255,
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|v| v.parse().ok())
}

/// Negative or non-finite sizes are treated as "unbounded".
fn mb_to_bytes(megabytes: f64) -> u64 {
    if megabytes.is_finite() && megabytes > 0.0 {
        (megabytes * BYTES_PER_MB) as u64
    } else {
        0
    }
}

fn megabytes_to_bytes<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    f64::deserialize(deserializer).map(mb_to_bytes)
}
