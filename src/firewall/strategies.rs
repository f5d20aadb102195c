//! Platform-specific firewall rule installation.

use std::path::PathBuf;

use async_trait::async_trait;
use thiserror::Error;

use crate::command::{run_command, CommandError};
use crate::config::COMMAND_TIMEOUT;
use crate::util::write_atomic;

/// Error from installing or removing a firewall rule.
#[derive(Error, Debug)]
pub enum FirewallError {
    /// The underlying tool was missing, timed out, or could not be spawned.
    #[error(transparent)]
    Command(#[from] CommandError),

    /// The tool ran but reported failure.
    #[error("{0}")]
    Failed(String),

    /// The rules file could not be updated (packet-filter variant only).
    #[error("failed to update rules file: {0}")]
    RulesFile(String),
}

/// Capability interface for one platform's rule-table mechanism.
///
/// Implementations install and remove a full block (both directions) for a
/// single remote address. Idempotence and persistence of the blocked set are
/// the controller's job, not the strategy's.
#[async_trait]
pub trait FirewallStrategy: Send + Sync {
    /// Human-readable name of the firewall backend.
    fn name(&self) -> &'static str;

    /// Installs inbound and outbound block rules for `ip`.
    async fn install_block(&self, ip: &str) -> Result<(), FirewallError>;

    /// Removes the block rules for `ip`.
    async fn remove_block(&self, ip: &str) -> Result<(), FirewallError>;

    /// Whether the backing firewall tool is reachable on this host.
    async fn available(&self) -> bool;
}

fn command_failure(tool: &str, action: &str, out: &crate::command::CommandOutput) -> FirewallError {
    let detail = if out.stderr.trim().is_empty() {
        out.stdout.trim().to_string()
    } else {
        out.stderr.trim().to_string()
    };
    FirewallError::Failed(format!("{tool} could not {action}: {detail}"))
}

/// Windows rule-table firewall driven through `netsh advfirewall`.
///
/// Installs two named rules per address (inbound deny, outbound deny);
/// removal deletes both by name.
pub struct WindowsFirewall;

impl WindowsFirewall {
    fn rule_name(direction: &str, ip: &str) -> String {
        format!("IpSentry_Block_{direction}_{ip}")
    }
}

#[async_trait]
impl FirewallStrategy for WindowsFirewall {
    fn name(&self) -> &'static str {
        "Windows Firewall"
    }

    async fn install_block(&self, ip: &str) -> Result<(), FirewallError> {
        for (direction, dir_arg) in [("OUT", "dir=out"), ("IN", "dir=in")] {
            let name = format!("name={}", Self::rule_name(direction, ip));
            let remote = format!("remoteip={ip}");
            let args = [
                "advfirewall",
                "firewall",
                "add",
                "rule",
                name.as_str(),
                dir_arg,
                "action=block",
                remote.as_str(),
            ];
            let out = run_command("netsh", &args, COMMAND_TIMEOUT).await?;
            if !out.success {
                return Err(command_failure("netsh", "add the block rule", &out));
            }
        }
        Ok(())
    }

    async fn remove_block(&self, ip: &str) -> Result<(), FirewallError> {
        for direction in ["OUT", "IN"] {
            let name = format!("name={}", Self::rule_name(direction, ip));
            let args = ["advfirewall", "firewall", "delete", "rule", name.as_str()];
            let out = run_command("netsh", &args, COMMAND_TIMEOUT).await?;
            if !out.success {
                return Err(command_failure("netsh", "delete the block rule", &out));
            }
        }
        Ok(())
    }

    async fn available(&self) -> bool {
        matches!(
            run_command("netsh", &["advfirewall", "show", "allprofiles"], COMMAND_TIMEOUT).await,
            Ok(out) if out.success
        )
    }
}

/// Linux packet-filter list driven through `iptables`.
///
/// Appends INPUT/OUTPUT drop rules and then tries each known persistence
/// command until one succeeds. Persistence is best-effort: a host without
/// any of them still gets the runtime rules.
pub struct Iptables;

impl Iptables {
    async fn persist_rules(&self) {
        let persist_commands: [(&str, &[&str]); 3] = [
            ("iptables-save", &[]),
            ("service", &["iptables", "save"]),
            ("netfilter-persistent", &["save"]),
        ];
        for (program, args) in persist_commands {
            match run_command(program, args, COMMAND_TIMEOUT).await {
                Ok(out) if out.success => return,
                _ => continue,
            }
        }
        log::debug!("No iptables persistence command succeeded; rules are runtime-only");
    }
}

#[async_trait]
impl FirewallStrategy for Iptables {
    fn name(&self) -> &'static str {
        "iptables"
    }

    async fn install_block(&self, ip: &str) -> Result<(), FirewallError> {
        for args in [
            ["-A", "INPUT", "-s", ip, "-j", "DROP"],
            ["-A", "OUTPUT", "-d", ip, "-j", "DROP"],
        ] {
            let out = run_command("iptables", &args, COMMAND_TIMEOUT).await?;
            if !out.success {
                return Err(command_failure("iptables", "append the drop rule", &out));
            }
        }
        self.persist_rules().await;
        Ok(())
    }

    async fn remove_block(&self, ip: &str) -> Result<(), FirewallError> {
        for args in [
            ["-D", "INPUT", "-s", ip, "-j", "DROP"],
            ["-D", "OUTPUT", "-d", ip, "-j", "DROP"],
        ] {
            let out = run_command("iptables", &args, COMMAND_TIMEOUT).await?;
            if !out.success {
                return Err(command_failure("iptables", "delete the drop rule", &out));
            }
        }
        self.persist_rules().await;
        Ok(())
    }

    async fn available(&self) -> bool {
        matches!(
            run_command("iptables", &["--version"], COMMAND_TIMEOUT).await,
            Ok(out) if out.success
        )
    }
}

/// BSD-style packet filter (macOS `pfctl`) driven through a rules file.
///
/// Blocking appends drop directives to the rules file and reloads it;
/// removal rewrites the file without the address's directives and reloads,
/// so unblocking actually takes effect instead of only updating the
/// persisted set.
pub struct PacketFilter {
    rules_file: PathBuf,
}

impl PacketFilter {
    /// Creates a strategy writing rules to `rules_file`.
    pub fn new(rules_file: PathBuf) -> Self {
        Self { rules_file }
    }

    fn directives(ip: &str) -> [String; 2] {
        [
            format!("block drop from {ip} to any"),
            format!("block drop from any to {ip}"),
        ]
    }

    fn read_rules(&self) -> Vec<String> {
        std::fs::read_to_string(&self.rules_file)
            .map(|raw| raw.lines().map(str::to_string).collect())
            .unwrap_or_default()
    }

    fn write_rules(&self, lines: &[String]) -> Result<(), FirewallError> {
        let mut contents = lines.join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        write_atomic(&self.rules_file, &contents)
            .map_err(|e| FirewallError::RulesFile(format!("{e:#}")))
    }

    async fn reload(&self) -> Result<(), FirewallError> {
        let path = self.rules_file.to_string_lossy().into_owned();
        let out = run_command("pfctl", &["-f", path.as_str()], COMMAND_TIMEOUT).await?;
        if !out.success {
            return Err(command_failure("pfctl", "reload the rules file", &out));
        }
        // Enabling when already enabled reports an error; that is fine.
        let _ = run_command("pfctl", &["-e"], COMMAND_TIMEOUT).await;
        Ok(())
    }
}

#[async_trait]
impl FirewallStrategy for PacketFilter {
    fn name(&self) -> &'static str {
        "pf"
    }

    async fn install_block(&self, ip: &str) -> Result<(), FirewallError> {
        let mut lines = self.read_rules();
        for directive in Self::directives(ip) {
            if !lines.contains(&directive) {
                lines.push(directive);
            }
        }
        self.write_rules(&lines)?;
        self.reload().await
    }

    async fn remove_block(&self, ip: &str) -> Result<(), FirewallError> {
        let directives = Self::directives(ip);
        let mut lines = self.read_rules();
        lines.retain(|line| !directives.contains(line));
        self.write_rules(&lines)?;
        self.reload().await
    }

    async fn available(&self) -> bool {
        run_command("pfctl", &["-s", "info"], COMMAND_TIMEOUT)
            .await
            .is_ok()
    }
}
