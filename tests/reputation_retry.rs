//! Integration tests for the reputation client's retry and rate-limit
//! handling, against a scripted local HTTP responder.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use ip_sentry::reputation::NumberOrNa;
use ip_sentry::{LogSink, ReputationLookup, ReputationRecord, VirusTotalClient};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

/// Serves one scripted `(status, body)` response per connection, then closes
/// it. Returns the base URL and a counter of requests actually received.
async fn serve_script(responses: Vec<(u16, String)>) -> (String, Arc<AtomicUsize>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let hits = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&hits);

    tokio::spawn(async move {
        for (status, body) in responses {
            let Ok((mut socket, _)) = listener.accept().await else {
                return;
            };
            counter.fetch_add(1, Ordering::SeqCst);

            // Drain the request head before answering.
            let mut buf = vec![0u8; 4096];
            let mut head = Vec::new();
            loop {
                match socket.read(&mut buf).await {
                    Ok(0) => break,
                    Ok(n) => {
                        head.extend_from_slice(&buf[..n]);
                        if head.windows(4).any(|w| w == b"\r\n\r\n") {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }

            let response = format!(
                "HTTP/1.1 {status} Scripted\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            );
            let _ = socket.write_all(response.as_bytes()).await;
            let _ = socket.shutdown().await;
        }
    });

    (format!("http://{addr}"), hits)
}

fn fast_client(base_url: &str) -> VirusTotalClient {
    VirusTotalClient::new("test-key", base_url)
        .unwrap()
        .with_retry_policy(3, Duration::ZERO)
}

#[tokio::test]
async fn succeeds_after_rate_limit_retries() {
    let body = serde_json::json!({
        "data": {
            "attributes": {
                "reputation": 7,
                "country": "NL",
                "last_analysis_stats": { "malicious": 1, "suspicious": 0, "harmless": 70 }
            }
        }
    })
    .to_string();

    let (base_url, hits) = serve_script(vec![
        (429, "{}".to_string()),
        (429, "{}".to_string()),
        (200, body),
    ])
    .await;

    let record = fast_client(&base_url)
        .query("93.184.216.34", &LogSink::null())
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    assert_eq!(record.reputation_score, NumberOrNa::Number(7));
    assert_eq!(record.country, "NL");
    assert_eq!(record.engines_malicious, 1);
    assert_eq!(record.engines_harmless, 70);
}

#[tokio::test]
async fn gives_up_after_exhausting_retries() {
    let (base_url, hits) = serve_script(vec![
        (429, "{}".to_string()),
        (429, "{}".to_string()),
        (429, "{}".to_string()),
    ])
    .await;

    let err = fast_client(&base_url)
        .query("93.184.216.34", &LogSink::null())
        .await
        .unwrap_err();

    assert_eq!(hits.load(Ordering::SeqCst), 3);
    let message = err.to_string();
    assert!(message.contains("93.184.216.34"));
    assert!(message.contains("3 attempts"));
}

#[tokio::test]
async fn not_found_maps_to_canonical_empty_record() {
    let (base_url, hits) = serve_script(vec![(404, "{}".to_string())]).await;

    let record = fast_client(&base_url)
        .query("203.0.113.9", &LogSink::null())
        .await
        .unwrap();

    // A 404 is an answer, not an error, and it burns no retries.
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(record, ReputationRecord::not_found());
}

#[tokio::test]
async fn server_errors_are_retried_like_rate_limits() {
    let body = serde_json::json!({
        "data": { "attributes": { "country": "DE" } }
    })
    .to_string();

    let (base_url, hits) = serve_script(vec![(500, "oops".to_string()), (200, body)]).await;

    let record = fast_client(&base_url)
        .query("198.51.100.4", &LogSink::null())
        .await
        .unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 2);
    assert_eq!(record.country, "DE");
}

#[tokio::test]
async fn missing_attributes_become_defaults() {
    let (base_url, _hits) = serve_script(vec![(200, r#"{"data":{}}"#.to_string())]).await;

    let record = fast_client(&base_url)
        .query("198.51.100.4", &LogSink::null())
        .await
        .unwrap();

    assert_eq!(record, ReputationRecord::not_found());
}
