//! Scan coordination: enumerate connections, fan out reputation lookups in
//! timed batches, and persist the merged results.
//!
//! Batches run their lookups concurrently; batches themselves are strictly
//! sequential with a pacing delay in between, which keeps the aggregate
//! request rate under the remote service's quota independently of the
//! client's per-request retries. Cancellation is cooperative: a polled stop
//! flag is checked before each batch and each task dispatch, and tasks
//! already in flight are always awaited, so whatever completed is still
//! merged and saved.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use indexmap::IndexMap;
use log::warn;
use thiserror::Error;

use crate::cache::ResultCache;
use crate::config::{Config, DEFAULT_BATCH_DELAY_SECS, DEFAULT_BATCH_SIZE, DEFAULT_MAX_IPS};
use crate::models::ScanResult;
use crate::netscan::{platform_source, ConnectionSource};
use crate::progress::LogSink;
use crate::reputation::{ReputationLookup, VirusTotalClient};

/// Parameters of one scan cycle.
#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Drop discovered IPs that already have a cache entry instead of
    /// re-reporting them.
    pub skip_cached: bool,
    /// Cap on IPs per scan; zero means no limit.
    pub max_ips: usize,
    /// Number of concurrent lookups per batch. Must be at least 1.
    pub batch_size: usize,
    /// Pause between batches.
    pub batch_delay: Duration,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            skip_cached: false,
            max_ips: DEFAULT_MAX_IPS,
            batch_size: DEFAULT_BATCH_SIZE,
            batch_delay: Duration::from_secs(DEFAULT_BATCH_DELAY_SECS),
        }
    }
}

/// Error refusing a scan before any work starts.
#[derive(Error, Debug)]
pub enum ScanError {
    /// `batch_size` was zero; running would mean an empty batch loop.
    #[error("batch size must be at least 1")]
    InvalidBatchSize,
}

/// Drives full scan cycles and owns the result cache.
pub struct Scanner {
    client: Arc<dyn ReputationLookup>,
    source: Arc<dyn ConnectionSource>,
    cache: ResultCache,
    stop: Arc<AtomicBool>,
}

impl Scanner {
    /// Creates a scanner wired to the real reputation service and the
    /// platform connection source.
    pub fn new(config: &Config) -> Result<Self, reqwest::Error> {
        let client = VirusTotalClient::new(&config.api_key, &config.base_url)?;
        Ok(Self::with_parts(
            Arc::new(client),
            platform_source(),
            ResultCache::new(config),
        ))
    }

    /// Creates a scanner over explicit collaborators (used by tests).
    pub fn with_parts(
        client: Arc<dyn ReputationLookup>,
        source: Arc<dyn ConnectionSource>,
        cache: ResultCache,
    ) -> Self {
        Self {
            client,
            source,
            cache,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Requests cooperative cancellation of the scan in progress. The
    /// currently dispatched batch finishes; no further batch starts.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }

    /// Handle to the stop flag, for wiring into signal handlers.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    /// The cache this scanner reads and writes.
    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    /// Runs one full scan cycle and returns the merged result list.
    ///
    /// See the module docs for the batching and cancellation model. A failed
    /// lookup yields a partial entry for that IP only; it never aborts the
    /// rest of the scan.
    pub async fn scan(
        &self,
        options: &ScanOptions,
        log: &LogSink,
    ) -> Result<Vec<ScanResult>, ScanError> {
        if options.batch_size == 0 {
            return Err(ScanError::InvalidBatchSize);
        }
        self.stop.store(false, Ordering::SeqCst);

        log.emit("Starting IP scan...");
        self.cache.clear_snapshot();

        let cache_map = self.cache.load();
        log.emit(&format!("Loaded {} cached IPs", cache_map.len()));

        let discovered = self.source.established_connections(log).await;
        if discovered.is_empty() {
            log.emit("No external IPs found");
            return Ok(Vec::new());
        }

        let mut candidates: Vec<(String, String)> = discovered.into_iter().collect();
        if options.skip_cached {
            let before = candidates.len();
            candidates.retain(|(ip, _)| !cache_map.contains_key(ip));
            log.emit(&format!(
                "Skipped {} cached IPs, {} remaining",
                before - candidates.len(),
                candidates.len()
            ));
        }
        if options.max_ips > 0 && candidates.len() > options.max_ips {
            candidates.truncate(options.max_ips);
            log.emit(&format!("Limited to {} IPs for this scan", candidates.len()));
        }
        if candidates.is_empty() {
            log.emit("No IPs left to scan after filtering");
            return Ok(Vec::new());
        }

        let total = candidates.len();
        let shared_cache = Arc::new(Mutex::new(cache_map));
        let results: Arc<Mutex<Vec<ScanResult>>> = Arc::new(Mutex::new(Vec::new()));
        let claimed: Arc<Mutex<HashSet<String>>> = Arc::new(Mutex::new(HashSet::new()));

        for (batch_index, batch) in candidates.chunks(options.batch_size).enumerate() {
            if self.stop.load(Ordering::SeqCst) {
                log.emit("Scan cancelled, skipping remaining batches");
                break;
            }

            let mut tasks = Vec::with_capacity(batch.len());
            for (ip, process_name) in batch.iter().cloned() {
                if self.stop.load(Ordering::SeqCst) {
                    break;
                }
                tasks.push(tokio::spawn(scan_one(
                    ip,
                    process_name,
                    Arc::clone(&self.client),
                    Arc::clone(&shared_cache),
                    Arc::clone(&results),
                    Arc::clone(&claimed),
                    log.clone(),
                )));
            }

            // Dispatched work is always awaited, even when cancelling.
            for outcome in join_all(tasks).await {
                if let Err(e) = outcome {
                    warn!("Scan worker panicked: {e}");
                }
            }

            let processed = (batch_index + 1) * options.batch_size;
            if processed < total && !self.stop.load(Ordering::SeqCst) {
                log.emit(&format!(
                    "Waiting {}s before next batch...",
                    options.batch_delay.as_secs()
                ));
                tokio::time::sleep(options.batch_delay).await;
            }
        }

        let final_cache = shared_cache.lock().expect("cache lock poisoned").clone();
        let final_results = results.lock().expect("results lock poisoned").clone();

        if self.cache.save(&final_cache) {
            log.emit(&format!("Cache updated with {} entries", final_cache.len()));
        }
        if self.cache.save_snapshot(&final_results) {
            log.emit("Last-scan snapshot saved");
        }
        log.emit("Scan complete");

        Ok(final_results)
    }

}

/// One batch worker: resolve a single IP, preferring the shared cache, and
/// append the outcome to the shared result list. Once dispatched, a worker
/// always runs to completion; cancellation is observed only between
/// dispatches and between batches.
async fn scan_one(
    ip: String,
    process_name: String,
    client: Arc<dyn ReputationLookup>,
    cache: Arc<Mutex<IndexMap<String, ScanResult>>>,
    results: Arc<Mutex<Vec<ScanResult>>>,
    claimed: Arc<Mutex<HashSet<String>>>,
    log: LogSink,
) {
    // Skip IPs another worker in this scan already claimed.
    if !claimed.lock().expect("claimed lock poisoned").insert(ip.clone()) {
        return;
    }

    let cached = cache.lock().expect("cache lock poisoned").get(&ip).cloned();
    let entry = match cached {
        Some(entry) => {
            log.emit(&format!("Using cached data for {ip}"));
            entry
        }
        None => match client.query(&ip, &log).await {
            Ok(record) => {
                let entry = ScanResult::merged(&ip, &process_name, record);
                cache
                    .lock()
                    .expect("cache lock poisoned")
                    .insert(ip.clone(), entry.clone());
                log.emit(&format!("Successfully scanned {ip}"));
                entry
            }
            Err(e) => {
                log.emit(&format!("Failed to scan {ip}: {e}"));
                ScanResult::partial(&ip, &process_name)
            }
        },
    };

    results.lock().expect("results lock poisoned").push(entry);
}
