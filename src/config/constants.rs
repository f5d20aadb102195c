//! Configuration constants.

use std::time::Duration;

/// Base URL for the VirusTotal IP address endpoint.
pub const VIRUSTOTAL_BASE_URL: &str = "https://www.virustotal.com/api/v3/ip_addresses";

/// Environment variable holding the VirusTotal API key.
pub const API_KEY_ENV: &str = "VT_API_KEY";

/// Total attempts per reputation lookup (first try included).
pub const MAX_RETRIES: usize = 3;

/// Delay between lookup attempts, including after a rate-limit response.
pub const RETRY_DELAY: Duration = Duration::from_secs(10);

/// Per-request timeout for reputation lookups.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for connection-table and firewall commands.
pub const COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Timeout for auxiliary per-PID process name lookups.
pub const PROCESS_LOOKUP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default number of IPs looked up concurrently per batch.
pub const DEFAULT_BATCH_SIZE: usize = 4;

/// Default pause between batches, in seconds. Keeps the aggregate request
/// rate under the public-API quota independently of per-request retries.
pub const DEFAULT_BATCH_DELAY_SECS: u64 = 60;

/// Default cap on IPs per scan. Zero means no limit.
pub const DEFAULT_MAX_IPS: usize = 0;

/// Default entry cap enforced by cache eviction.
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1000;

/// Durable reputation cache, keyed by IP.
pub const CACHE_FILE: &str = "ip_cache.json";

/// Transient snapshot of the most recent scan's results.
pub const SNAPSHOT_FILE: &str = "temp_scan_results.json";

/// Persisted authoritative set of firewalled IPs.
pub const BLOCKED_IPS_FILE: &str = "blocked_ips.json";

/// Rules file fed to the BSD packet filter on macOS.
pub const PF_RULES_FILE: &str = "pf_rules.conf";
