//! Firewall control: apply or remove an OS-level block for an IP address and
//! keep the persisted blocked-IP set in sync.
//!
//! The [`FirewallController`] owns the persisted set and enforces
//! idempotence; the [`FirewallStrategy`] trait hides how each OS family
//! actually installs rules. The persisted file is authoritative for what this
//! tool believes is blocked — manual edits to the firewall outside the tool
//! are an accepted blind spot.

mod strategies;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use log::{error, warn};
use serde_json::Value;

use crate::config::Config;
use crate::progress::LogSink;
use crate::util::write_atomic;

pub use crate::command::CommandError;
pub use strategies::{FirewallError, FirewallStrategy, Iptables, PacketFilter, WindowsFirewall};

const BLOCKED_IPS_KEY: &str = "blocked_ips";
const UNSUPPORTED_OS_MESSAGE: &str = "unsupported operating system";

/// Snapshot of the blocking subsystem's health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FirewallStatus {
    /// Name of the active firewall backend, or `"unsupported"`.
    pub platform: &'static str,
    /// Number of IPs in the persisted blocked set.
    pub blocked_count: usize,
    /// Whether the platform firewall tool answered a probe.
    pub firewall_available: bool,
}

/// Selects the firewall strategy for the running platform, or `None` when
/// the OS family has no supported rule-table mechanism.
pub fn platform_strategy(config: &Config) -> Option<Arc<dyn FirewallStrategy>> {
    if cfg!(target_os = "windows") {
        Some(Arc::new(WindowsFirewall))
    } else if cfg!(target_os = "linux") {
        Some(Arc::new(Iptables))
    } else if cfg!(target_os = "macos") {
        Some(Arc::new(PacketFilter::new(config.pf_rules_file())))
    } else {
        None
    }
}

/// Applies and removes OS-level blocks, backed by a persisted set of
/// currently blocked IPs.
pub struct FirewallController {
    strategy: Option<Arc<dyn FirewallStrategy>>,
    state_file: PathBuf,
    blocked: BTreeSet<String>,
}

impl FirewallController {
    /// Creates a controller for the running platform, loading the persisted
    /// blocked set from the configured data directory.
    pub fn new(config: &Config) -> Self {
        Self::with_strategy(platform_strategy(config), config.blocked_ips_file())
    }

    /// Creates a controller over an explicit strategy and state file. Pass
    /// `None` to model an unsupported platform (also used by tests).
    pub fn with_strategy(
        strategy: Option<Arc<dyn FirewallStrategy>>,
        state_file: PathBuf,
    ) -> Self {
        let blocked = load_blocked_set(&state_file);
        Self {
            strategy,
            state_file,
            blocked,
        }
    }

    /// Whether `ip` is in the persisted blocked set.
    pub fn is_blocked(&self, ip: &str) -> bool {
        self.blocked.contains(ip)
    }

    /// All currently blocked IPs, sorted.
    pub fn list_blocked(&self) -> Vec<String> {
        self.blocked.iter().cloned().collect()
    }

    /// Blocks `ip` at the OS firewall.
    ///
    /// Idempotent: a second call for the same IP succeeds without touching
    /// the OS. On success the persisted set is rewritten, preserving any
    /// extra metadata keys other tools stored in the file.
    pub async fn block(&mut self, ip: &str, log: &LogSink) -> (bool, String) {
        if self.blocked.contains(ip) {
            return (true, format!("IP {ip} is already blocked"));
        }
        let Some(strategy) = self.strategy.clone() else {
            return (false, UNSUPPORTED_OS_MESSAGE.to_string());
        };

        match strategy.install_block(ip).await {
            Ok(()) => {
                self.blocked.insert(ip.to_string());
                self.persist();
                let message = format!("Successfully blocked IP {ip} using {}", strategy.name());
                log.emit(&message);
                (true, message)
            }
            Err(e) => {
                let message = format!("Failed to block IP {ip}: {e}");
                log.emit(&message);
                (false, message)
            }
        }
    }

    /// Removes the block for `ip`. Idempotent like [`Self::block`].
    pub async fn unblock(&mut self, ip: &str, log: &LogSink) -> (bool, String) {
        if !self.blocked.contains(ip) {
            return (true, format!("IP {ip} is not blocked"));
        }
        let Some(strategy) = self.strategy.clone() else {
            return (false, UNSUPPORTED_OS_MESSAGE.to_string());
        };

        match strategy.remove_block(ip).await {
            Ok(()) => {
                self.blocked.remove(ip);
                self.persist();
                let message = format!("Successfully unblocked IP {ip}");
                log.emit(&message);
                (true, message)
            }
            Err(e) => {
                let message = format!("Failed to unblock IP {ip}: {e}");
                log.emit(&message);
                (false, message)
            }
        }
    }

    /// Reports the platform, blocked count, and tool reachability.
    pub async fn status(&self) -> FirewallStatus {
        let (platform, firewall_available) = match &self.strategy {
            Some(strategy) => (strategy.name(), strategy.available().await),
            None => ("unsupported", false),
        };
        FirewallStatus {
            platform,
            blocked_count: self.blocked.len(),
            firewall_available,
        }
    }

    /// Rewrites the state file, keeping any metadata keys stored alongside
    /// the blocked list. Persistence failures are logged, never raised: the
    /// firewall mutation already happened.
    fn persist(&self) {
        let mut object = match std::fs::read_to_string(&self.state_file)
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
        {
            Some(Value::Object(map)) => map,
            _ => serde_json::Map::new(),
        };
        object.insert(
            BLOCKED_IPS_KEY.to_string(),
            Value::Array(self.blocked.iter().cloned().map(Value::String).collect()),
        );

        let json = match serde_json::to_string_pretty(&Value::Object(object)) {
            Ok(json) => json,
            Err(e) => {
                error!("Failed to serialize blocked-IP set: {e}");
                return;
            }
        };
        if let Err(e) = write_atomic(&self.state_file, &json) {
            error!(
                "Failed to save blocked-IP set {}: {e:#}",
                self.state_file.display()
            );
        }
    }
}

fn load_blocked_set(path: &PathBuf) -> BTreeSet<String> {
    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(_) => return BTreeSet::new(),
    };
    match serde_json::from_str::<Value>(&raw) {
        Ok(value) => value
            .get(BLOCKED_IPS_KEY)
            .and_then(Value::as_array)
            .map(|ips| {
                ips.iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default(),
        Err(e) => {
            warn!(
                "Blocked-IP file {} is unreadable, starting empty: {e}",
                path.display()
            );
            BTreeSet::new()
        }
    }
}
