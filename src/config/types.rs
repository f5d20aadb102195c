//! Configuration types.

use std::path::{Path, PathBuf};

use crate::config::constants::{
    BLOCKED_IPS_FILE, CACHE_FILE, PF_RULES_FILE, SNAPSHOT_FILE, VIRUSTOTAL_BASE_URL,
};

/// Library configuration (no CLI dependencies).
///
/// Built once at startup and passed to each component's constructor. There is
/// no implicit global state: every persisted path is derived from `data_dir`.
///
/// # Examples
///
/// ```no_run
/// use ip_sentry::Config;
///
/// let config = Config::new("my-api-key").with_data_dir("/tmp/ip-sentry");
/// ```
#[derive(Debug, Clone)]
pub struct Config {
    /// Directory holding the cache, snapshot, and blocked-IP files.
    pub data_dir: PathBuf,

    /// VirusTotal API key sent in the `x-apikey` header.
    pub api_key: String,

    /// Base URL of the reputation service endpoint.
    pub base_url: String,
}

impl Config {
    /// Creates a configuration with the platform-default data directory.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            data_dir: default_data_dir(),
            api_key: api_key.into(),
            base_url: VIRUSTOTAL_BASE_URL.to_string(),
        }
    }

    /// Overrides the data directory.
    pub fn with_data_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.data_dir = dir.into();
        self
    }

    /// Path of the durable reputation cache file.
    pub fn cache_file(&self) -> PathBuf {
        self.data_dir.join(CACHE_FILE)
    }

    /// Path of the last-scan snapshot file.
    pub fn snapshot_file(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    /// Path of the persisted blocked-IP set.
    pub fn blocked_ips_file(&self) -> PathBuf {
        self.data_dir.join(BLOCKED_IPS_FILE)
    }

    /// Path of the packet-filter rules file (macOS only).
    pub fn pf_rules_file(&self) -> PathBuf {
        self.data_dir.join(PF_RULES_FILE)
    }
}

/// Returns the platform-appropriate per-user data directory.
///
/// `%APPDATA%\ip-sentry` on Windows, `$XDG_CONFIG_HOME/ip-sentry` (falling
/// back to `~/.config/ip-sentry`) elsewhere.
pub fn default_data_dir() -> PathBuf {
    if cfg!(windows) {
        if let Ok(appdata) = std::env::var("APPDATA") {
            return Path::new(&appdata).join("ip-sentry");
        }
    }
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return Path::new(&xdg).join("ip-sentry");
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".config").join("ip-sentry")
}
