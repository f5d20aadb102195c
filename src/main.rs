//! Main application entry point (CLI binary).
//!
//! This is a thin wrapper around the `ip_sentry` library that handles:
//! - Command-line argument parsing
//! - Environment variable loading (.env file)
//! - Logger initialization
//! - User-facing output formatting
//!
//! All core functionality is implemented in the library crate.

use std::process;
use std::sync::atomic::Ordering;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use ip_sentry::config::{
    API_KEY_ENV, DEFAULT_BATCH_DELAY_SECS, DEFAULT_BATCH_SIZE, DEFAULT_CACHE_MAX_ENTRIES,
    DEFAULT_MAX_IPS,
};
use ip_sentry::{
    Config, FirewallController, LogSink, ResultCache, ScanOptions, Scanner, ScanSummary,
};

#[derive(Parser)]
#[command(
    name = "ip-sentry",
    about = "Scan established outbound connections against VirusTotal and block hostile IPs",
    version
)]
struct Cli {
    /// Directory for the cache, snapshot, and blocked-IP files
    /// (defaults to the per-user config directory).
    #[arg(long, global = true)]
    data_dir: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Scan current outbound connections and report reputation verdicts
    Scan {
        /// Only scan IPs that are not already cached
        #[arg(long)]
        skip_cached: bool,

        /// Maximum IPs to scan this run (0 = unlimited)
        #[arg(long, default_value_t = DEFAULT_MAX_IPS)]
        max_ips: usize,

        /// Concurrent lookups per batch
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Seconds to wait between batches
        #[arg(long, default_value_t = DEFAULT_BATCH_DELAY_SECS)]
        batch_delay: u64,
    },

    /// Block an IP at the OS firewall
    Block {
        /// The IP address to block
        ip: String,
    },

    /// Remove the firewall block for an IP
    Unblock {
        /// The IP address to unblock
        ip: String,
    },

    /// List currently blocked IPs
    Blocked,

    /// Show firewall backend, blocked count, and cache statistics
    Status,

    /// Redisplay the most recent scan's results
    Last,

    /// Evict the oldest cache entries beyond a size limit
    Evict {
        /// Number of entries to keep
        #[arg(long, default_value_t = DEFAULT_CACHE_MAX_ENTRIES)]
        max_entries: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file (if it exists)
    let _ = dotenvy::dotenv();
    env_logger::init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        eprintln!("ip-sentry error: {e:#}");
        process::exit(1);
    }
    Ok(())
}

async fn run(cli: Cli) -> Result<()> {
    // Only the scan subcommand talks to the reputation service; everything
    // else works without an API key.
    let api_key = std::env::var(API_KEY_ENV).unwrap_or_default();
    let mut config = Config::new(api_key);
    if let Some(dir) = cli.data_dir {
        config = config.with_data_dir(dir);
    }

    match cli.command {
        Command::Scan {
            skip_cached,
            max_ips,
            batch_size,
            batch_delay,
        } => {
            if config.api_key.is_empty() {
                anyhow::bail!("set the {API_KEY_ENV} environment variable to scan");
            }
            let options = ScanOptions {
                skip_cached,
                max_ips,
                batch_size,
                batch_delay: Duration::from_secs(batch_delay),
            };
            run_scan(&config, &options).await
        }
        Command::Block { ip } => {
            let mut controller = FirewallController::new(&config);
            let (ok, message) = controller.block(&ip, &LogSink::null()).await;
            println!("{message}");
            if !ok {
                process::exit(1);
            }
            Ok(())
        }
        Command::Unblock { ip } => {
            let mut controller = FirewallController::new(&config);
            let (ok, message) = controller.unblock(&ip, &LogSink::null()).await;
            println!("{message}");
            if !ok {
                process::exit(1);
            }
            Ok(())
        }
        Command::Blocked => {
            let controller = FirewallController::new(&config);
            let blocked = controller.list_blocked();
            if blocked.is_empty() {
                println!("No IPs are currently blocked");
            } else {
                println!("Blocked IPs ({}):", blocked.len());
                for ip in blocked {
                    println!("  {ip}");
                }
            }
            Ok(())
        }
        Command::Status => {
            let controller = FirewallController::new(&config);
            let status = controller.status().await;
            let stats = ResultCache::new(&config).stats();
            println!("Firewall backend:   {}", status.platform);
            println!(
                "Firewall available: {}",
                if status.firewall_available { "yes" } else { "no" }
            );
            println!("Blocked IPs:        {}", status.blocked_count);
            println!("Cached IPs:         {}", stats.cached_ips);
            println!("Last-scan results:  {}", stats.snapshot_results);
            println!("Unique IPs seen:    {}", stats.total_unique_ips);
            Ok(())
        }
        Command::Last => {
            let results = ResultCache::new(&config).load_snapshot();
            if results.is_empty() {
                println!("No previous scan results found");
                return Ok(());
            }
            print_results(&results);
            Ok(())
        }
        Command::Evict { max_entries } => {
            let removed = ResultCache::new(&config).evict(max_entries);
            println!("Evicted {removed} cache entries");
            Ok(())
        }
    }
}

async fn run_scan(config: &Config, options: &ScanOptions) -> Result<()> {
    let scanner = Scanner::new(config).context("Failed to build the reputation client")?;

    // Ctrl-C requests cooperative cancellation; the batch in flight finishes
    // and its results are still saved.
    let stop = scanner.stop_flag();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Cancellation requested, finishing the current batch...");
            stop.store(true, Ordering::SeqCst);
        }
    });

    let results = scanner.scan(options, &LogSink::to_log()).await?;
    if results.is_empty() {
        println!("No external connections to report");
        return Ok(());
    }

    print_results(&results);
    let summary = ScanSummary::from_results(&results);
    println!(
        "Scanned {} IP{}: {} malicious, {} suspicious, {} clean",
        summary.total,
        if summary.total == 1 { "" } else { "s" },
        summary.malicious,
        summary.suspicious,
        summary.clean
    );
    Ok(())
}

fn print_results(results: &[ip_sentry::ScanResult]) {
    for result in results {
        match &result.reputation {
            Some(record) => println!(
                "{:<40} {:<20} malicious={} suspicious={} country={}",
                result.ip,
                result.process_name,
                record.engines_malicious,
                record.engines_suspicious,
                record.country
            ),
            None => println!(
                "{:<40} {:<20} (lookup failed)",
                result.ip, result.process_name
            ),
        }
    }
}
