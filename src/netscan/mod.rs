//! Connection enumeration: a point-in-time snapshot of established outbound
//! connections, reduced to a mapping of public remote IP to owning process.
//!
//! The platform-specific inspection command sits behind the
//! [`ConnectionSource`] trait so the scan coordinator never branches on OS,
//! and tests can feed in a scripted connection table. Enumeration is a pure
//! read: no OS or persisted state is mutated, and "no results" is an empty
//! map, never an error. The returned mapping keeps the connection table's
//! line order, which the coordinator's `max_ips` truncation relies on.

mod parse;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use indexmap::IndexMap;
use log::debug;

use crate::command::run_command;
use crate::config::{COMMAND_TIMEOUT, PROCESS_LOOKUP_TIMEOUT};
use crate::models::UNKNOWN_PROCESS;
use crate::progress::LogSink;

pub use parse::is_external;
pub(crate) use parse::{parse_socket_table, parse_windows_netstat};

/// Capability interface for listing established outbound connections.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Returns a mapping of external remote IP to best-effort process name,
    /// in enumeration order. Failures degrade to an empty map with the
    /// reason logged.
    async fn established_connections(&self, log: &LogSink) -> IndexMap<String, String>;
}

/// Selects the connection source for the running platform.
pub fn platform_source() -> Arc<dyn ConnectionSource> {
    if cfg!(windows) {
        Arc::new(WindowsNetstat)
    } else {
        Arc::new(UnixSocketTable)
    }
}

/// Unix-family source: tries `ss` first, then falls back to `netstat`.
pub struct UnixSocketTable;

#[async_trait]
impl ConnectionSource for UnixSocketTable {
    async fn established_connections(&self, log: &LogSink) -> IndexMap<String, String> {
        log.emit("Fetching remote connections...");

        let attempts: [(&str, &[&str], bool); 2] = [
            ("ss", &["-tupn", "state", "established"], true),
            ("netstat", &["-tupn"], false),
        ];

        for (program, args, is_ss) in attempts {
            match run_command(program, args, COMMAND_TIMEOUT).await {
                Ok(out) if out.success => {
                    let connections = parse_socket_table(&out.stdout, is_ss);
                    log.emit(&format!("Found {} external IPs", connections.len()));
                    return connections;
                }
                Ok(out) => debug!("{program} exited with failure: {}", out.stderr.trim()),
                Err(e) => debug!("{program} unavailable: {e}"),
            }
        }

        log.emit("Neither ss nor netstat produced a connection table");
        IndexMap::new()
    }
}

/// Windows source: `netstat -ano` plus per-PID `tasklist` name resolution.
pub struct WindowsNetstat;

#[async_trait]
impl ConnectionSource for WindowsNetstat {
    async fn established_connections(&self, log: &LogSink) -> IndexMap<String, String> {
        log.emit("Fetching remote connections...");

        let out = match run_command("netstat", &["-ano"], COMMAND_TIMEOUT).await {
            Ok(out) if out.success => out,
            Ok(out) => {
                log.emit(&format!(
                    "netstat failed to list connections: {}",
                    out.stderr.trim()
                ));
                return IndexMap::new();
            }
            Err(e) => {
                log.emit(&format!("netstat unavailable: {e}"));
                return IndexMap::new();
            }
        };

        let pairs = parse_windows_netstat(&out.stdout);
        let mut names_by_pid: HashMap<String, String> = HashMap::new();
        let mut connections = IndexMap::new();

        for (ip, pid) in pairs {
            let name = match names_by_pid.get(&pid) {
                Some(name) => name.clone(),
                None => {
                    let name = resolve_process_name(&pid).await;
                    names_by_pid.insert(pid.clone(), name.clone());
                    name
                }
            };
            connections.insert(ip, name);
        }

        log.emit(&format!("Found {} external IPs", connections.len()));
        connections
    }
}

/// Best-effort PID to image-name resolution via `tasklist`.
async fn resolve_process_name(pid: &str) -> String {
    let filter = format!("PID eq {pid}");
    match run_command("tasklist", &["/FI", &filter], PROCESS_LOOKUP_TIMEOUT).await {
        Ok(out) if out.success => out
            .stdout
            .lines()
            .find(|line| line.contains(pid))
            .and_then(|line| line.split_whitespace().next())
            .map(str::to_string)
            .unwrap_or_else(|| UNKNOWN_PROCESS.to_string()),
        _ => UNKNOWN_PROCESS.to_string(),
    }
}
