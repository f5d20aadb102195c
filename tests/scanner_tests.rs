//! Integration tests for the scan coordinator, using scripted connection
//! sources and reputation lookups.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use indexmap::IndexMap;
use ip_sentry::reputation::{QueryError, ReputationRecord};
use ip_sentry::{
    ConnectionSource, LogSink, ResultCache, ReputationLookup, ScanError, ScanOptions, ScanResult,
    Scanner,
};
use tempfile::TempDir;

struct FakeSource(IndexMap<String, String>);

impl FakeSource {
    fn with_ips(ips: &[&str]) -> Self {
        Self(
            ips.iter()
                .map(|ip| (ip.to_string(), "fakeproc".to_string()))
                .collect(),
        )
    }
}

#[async_trait]
impl ConnectionSource for FakeSource {
    async fn established_connections(&self, _log: &LogSink) -> IndexMap<String, String> {
        self.0.clone()
    }
}

/// Scripted lookup: counts calls, fails for listed IPs, and can flip a stop
/// flag to exercise cancellation.
#[derive(Default)]
struct FakeLookup {
    calls: AtomicUsize,
    failing: HashSet<String>,
    // Set after scanner construction; the flag belongs to the scanner.
    stop_on_call: Mutex<Option<Arc<AtomicBool>>>,
}

#[async_trait]
impl ReputationLookup for FakeLookup {
    async fn query(&self, ip: &str, _log: &LogSink) -> Result<ReputationRecord, QueryError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(stop) = self.stop_on_call.lock().unwrap().as_ref() {
            stop.store(true, Ordering::SeqCst);
        }
        if self.failing.contains(ip) {
            return Err(QueryError::RetriesExhausted {
                ip: ip.to_string(),
                attempts: 3,
                last_error: "scripted failure".to_string(),
            });
        }
        Ok(ReputationRecord::not_found())
    }
}

fn cache_in(dir: &TempDir) -> ResultCache {
    ResultCache::at(
        dir.path().join("ip_cache.json"),
        dir.path().join("temp_scan_results.json"),
    )
}

fn capturing_sink() -> (LogSink, Arc<Mutex<Vec<String>>>) {
    let lines = Arc::new(Mutex::new(Vec::new()));
    let captured = Arc::clone(&lines);
    let sink = LogSink::new(move |line| captured.lock().unwrap().push(line.to_string()));
    (sink, lines)
}

fn count_matching(lines: &Arc<Mutex<Vec<String>>>, needle: &str) -> usize {
    lines
        .lock()
        .unwrap()
        .iter()
        .filter(|line| line.contains(needle))
        .count()
}

fn fast_options(batch_size: usize) -> ScanOptions {
    ScanOptions {
        batch_size,
        batch_delay: Duration::ZERO,
        ..ScanOptions::default()
    }
}

#[tokio::test]
async fn scans_every_ip_in_paced_batches() {
    let dir = TempDir::new().unwrap();
    let ips: Vec<String> = (1..=10).map(|i| format!("20.0.0.{i}")).collect();
    let ip_refs: Vec<&str> = ips.iter().map(String::as_str).collect();

    let lookup = Arc::new(FakeLookup::default());
    let scanner = Scanner::with_parts(
        Arc::clone(&lookup) as Arc<dyn ReputationLookup>,
        Arc::new(FakeSource::with_ips(&ip_refs)),
        cache_in(&dir),
    );

    let (sink, lines) = capturing_sink();
    let results = scanner.scan(&fast_options(4), &sink).await.unwrap();

    assert_eq!(results.len(), 10);
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 10);
    // 10 IPs at batch size 4 means two pauses (after batches one and two).
    assert_eq!(count_matching(&lines, "before next batch"), 2);

    // Everything landed in the cache and the snapshot.
    let cache = cache_in(&dir);
    assert_eq!(cache.load().len(), 10);
    assert_eq!(cache.load_snapshot().len(), 10);
}

#[tokio::test]
async fn cached_ips_are_reused_without_lookups() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);

    let mut seeded = IndexMap::new();
    seeded.insert(
        "20.0.0.1".to_string(),
        ScanResult::merged("20.0.0.1", "oldproc", ReputationRecord::not_found()),
    );
    assert!(cache.save(&seeded));

    let lookup = Arc::new(FakeLookup::default());
    let scanner = Scanner::with_parts(
        Arc::clone(&lookup) as Arc<dyn ReputationLookup>,
        Arc::new(FakeSource::with_ips(&["20.0.0.1", "20.0.0.2"])),
        cache,
    );

    let (sink, lines) = capturing_sink();
    let results = scanner.scan(&fast_options(4), &sink).await.unwrap();

    assert_eq!(results.len(), 2);
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
    assert_eq!(count_matching(&lines, "Using cached data for 20.0.0.1"), 1);

    // The cached entry is returned as-is, including its process name.
    let reused = results.iter().find(|r| r.ip == "20.0.0.1").unwrap();
    assert_eq!(reused.process_name, "oldproc");
}

#[tokio::test]
async fn skip_cached_drops_known_ips_entirely() {
    let dir = TempDir::new().unwrap();
    let cache = cache_in(&dir);

    let mut seeded = IndexMap::new();
    seeded.insert(
        "20.0.0.1".to_string(),
        ScanResult::merged("20.0.0.1", "oldproc", ReputationRecord::not_found()),
    );
    assert!(cache.save(&seeded));

    let lookup = Arc::new(FakeLookup::default());
    let scanner = Scanner::with_parts(
        Arc::clone(&lookup) as Arc<dyn ReputationLookup>,
        Arc::new(FakeSource::with_ips(&["20.0.0.1", "20.0.0.2"])),
        cache,
    );

    let options = ScanOptions {
        skip_cached: true,
        ..fast_options(4)
    };
    let results = scanner.scan(&options, &LogSink::null()).await.unwrap();

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].ip, "20.0.0.2");
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn max_ips_caps_the_candidate_list() {
    let dir = TempDir::new().unwrap();
    let lookup = Arc::new(FakeLookup::default());
    let scanner = Scanner::with_parts(
        Arc::clone(&lookup) as Arc<dyn ReputationLookup>,
        Arc::new(FakeSource::with_ips(&[
            "20.0.0.1", "20.0.0.2", "20.0.0.3", "20.0.0.4", "20.0.0.5",
        ])),
        cache_in(&dir),
    );

    let options = ScanOptions {
        max_ips: 2,
        ..fast_options(4)
    };
    let results = scanner.scan(&options, &LogSink::null()).await.unwrap();

    assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    // Truncation keeps the first IPs in enumeration order.
    let mut ips: Vec<&str> = results.iter().map(|r| r.ip.as_str()).collect();
    ips.sort_unstable();
    assert_eq!(ips, vec!["20.0.0.1", "20.0.0.2"]);
}

#[tokio::test]
async fn failed_lookup_yields_partial_entry_without_aborting() {
    let dir = TempDir::new().unwrap();
    let lookup = Arc::new(FakeLookup {
        failing: HashSet::from(["20.0.0.2".to_string()]),
        ..FakeLookup::default()
    });
    let scanner = Scanner::with_parts(
        Arc::clone(&lookup) as Arc<dyn ReputationLookup>,
        Arc::new(FakeSource::with_ips(&["20.0.0.1", "20.0.0.2", "20.0.0.3"])),
        cache_in(&dir),
    );

    let results = scanner
        .scan(&fast_options(4), &LogSink::null())
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    let failed = results.iter().find(|r| r.ip == "20.0.0.2").unwrap();
    assert!(failed.reputation.is_none());
    assert!(results
        .iter()
        .filter(|r| r.ip != "20.0.0.2")
        .all(|r| r.reputation.is_some()));

    // The failed IP must not be cached; a later scan retries it.
    let cached = cache_in(&dir).load();
    assert_eq!(cached.len(), 2);
    assert!(!cached.contains_key("20.0.0.2"));
}

#[tokio::test]
async fn cancellation_finishes_the_current_batch_and_saves_it() {
    let dir = TempDir::new().unwrap();
    let lookup = Arc::new(FakeLookup::default());
    let scanner = Scanner::with_parts(
        Arc::clone(&lookup) as Arc<dyn ReputationLookup>,
        Arc::new(FakeSource::with_ips(&[
            "20.0.0.1", "20.0.0.2", "20.0.0.3", "20.0.0.4",
        ])),
        cache_in(&dir),
    );

    // Wire the fake lookup to the scanner's real stop flag so the first
    // completed lookup requests cancellation mid-scan.
    *lookup.stop_on_call.lock().unwrap() = Some(scanner.stop_flag());

    let (sink, lines) = capturing_sink();
    let results = scanner.scan(&fast_options(2), &sink).await.unwrap();

    // The batch in flight completed; no second batch was dispatched.
    assert_eq!(results.len(), 2);
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 2);
    assert_eq!(count_matching(&lines, "Scan cancelled"), 1);

    // What completed was still merged and persisted.
    let cache = cache_in(&dir);
    assert_eq!(cache.load().len(), 2);
    assert_eq!(cache.load_snapshot().len(), 2);
}

#[tokio::test]
async fn zero_batch_size_is_refused() {
    let dir = TempDir::new().unwrap();
    let scanner = Scanner::with_parts(
        Arc::new(FakeLookup::default()),
        Arc::new(FakeSource::with_ips(&["20.0.0.1"])),
        cache_in(&dir),
    );

    let err = scanner
        .scan(&fast_options(0), &LogSink::null())
        .await
        .unwrap_err();
    assert!(matches!(err, ScanError::InvalidBatchSize));
}

#[tokio::test]
async fn empty_connection_table_is_an_empty_scan() {
    let dir = TempDir::new().unwrap();
    let lookup = Arc::new(FakeLookup::default());
    let scanner = Scanner::with_parts(
        Arc::clone(&lookup) as Arc<dyn ReputationLookup>,
        Arc::new(FakeSource::with_ips(&[])),
        cache_in(&dir),
    );

    let results = scanner
        .scan(&fast_options(4), &LogSink::null())
        .await
        .unwrap();
    assert!(results.is_empty());
    assert_eq!(lookup.calls.load(Ordering::SeqCst), 0);
}
