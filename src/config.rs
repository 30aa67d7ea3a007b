//! Process-wide configuration for scope caches.
//!
//! The only behavioral switch is whether transient values that nobody can
//! register for teardown fall back to the background reaper. Configuration
//! is read from the environment on first use and can be replaced at
//! runtime with [`ScopeConfig::install`].

use std::env;
use std::time::Duration;

use once_cell::sync::Lazy;
use parking_lot::RwLock;
#[cfg(feature = "config")]
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Environment variable enabling the reclamation fallback.
pub const ENV_RECLAMATION_FALLBACK: &str = "FERROUS_SCOPES_RECLAMATION_FALLBACK";
/// Environment variable setting the reaper scan interval in milliseconds.
pub const ENV_REAPER_SCAN_INTERVAL_MS: &str = "FERROUS_SCOPES_REAPER_SCAN_INTERVAL_MS";

const DEFAULT_SCAN_INTERVAL_MS: u64 = 50;

static GLOBAL: Lazy<RwLock<ScopeConfig>> = Lazy::new(|| RwLock::new(ScopeConfig::from_env()));

/// Scope cache configuration
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "config", serde(default))]
pub struct ScopeConfig {
    /// Let transient caches hand undisposed values to the background reaper.
    ///
    /// Off by default: reclamation is best-effort and may never run.
    pub reclamation_fallback: bool,
    /// How often the reaper looks for values nobody references anymore.
    pub reaper_scan_interval_ms: u64,
}

impl Default for ScopeConfig {
    fn default() -> Self {
        Self {
            reclamation_fallback: false,
            reaper_scan_interval_ms: DEFAULT_SCAN_INTERVAL_MS,
        }
    }
}

impl ScopeConfig {
    /// Reads configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Reads configuration through `lookup`; unset or invalid values keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(raw) = lookup(ENV_RECLAMATION_FALLBACK) {
            match parse_bool(&raw) {
                Some(value) => config.reclamation_fallback = value,
                None => warn!(key = ENV_RECLAMATION_FALLBACK, value = %raw, "ignoring invalid boolean"),
            }
        }
        if let Some(raw) = lookup(ENV_REAPER_SCAN_INTERVAL_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => config.reaper_scan_interval_ms = ms,
                _ => warn!(key = ENV_REAPER_SCAN_INTERVAL_MS, value = %raw, "ignoring invalid interval"),
            }
        }
        config
    }

    /// Parses configuration from JSON; missing fields keep their defaults.
    #[cfg(feature = "config")]
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn reaper_scan_interval(&self) -> Duration {
        Duration::from_millis(self.reaper_scan_interval_ms.max(1))
    }

    /// Snapshot of the process-wide configuration.
    pub fn global() -> ScopeConfig {
        GLOBAL.read().clone()
    }

    /// Replaces the process-wide configuration.
    ///
    /// Affects caches that did not pin their own policy. A reaper that is
    /// already running keeps its scan interval.
    pub fn install(self) {
        *GLOBAL.write() = self;
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
