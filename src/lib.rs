//! ip_sentry library: outbound connection scanning and IP blocking.
//!
//! This library takes a point-in-time snapshot of the host's established
//! outbound connections, keeps the remote addresses that are public, enriches
//! each with a VirusTotal reputation verdict, and can block/unblock any such
//! address at the OS firewall level. Verdicts are cached in a JSON file so
//! repeated scans do not burn API quota.
//!
//! # Example
//!
//! ```no_run
//! use ip_sentry::{Config, LogSink, Scanner, ScanOptions};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::new("my-api-key");
//! let scanner = Scanner::new(&config)?;
//! let results = scanner.scan(&ScanOptions::default(), &LogSink::to_log()).await?;
//! println!("Scanned {} external IPs", results.len());
//! # Ok(())
//! # }
//! ```
//!
//! # Requirements
//!
//! This library requires a Tokio runtime. Use `#[tokio::main]` in your
//! application or ensure you're calling library functions within an async
//! context.

#![warn(missing_docs)]

pub mod cache;
mod command;
pub mod config;
pub mod firewall;
pub mod models;
pub mod netscan;
mod progress;
pub mod reputation;
pub mod scanner;
mod util;

// Re-export public API
pub use cache::{CacheStats, ResultCache};
pub use config::Config;
pub use firewall::{FirewallController, FirewallStatus, FirewallStrategy};
pub use models::{ScanResult, ScanSummary};
pub use netscan::{is_external, ConnectionSource};
pub use progress::LogSink;
pub use reputation::{QueryError, ReputationLookup, ReputationRecord, VirusTotalClient};
pub use scanner::{ScanError, ScanOptions, Scanner};
